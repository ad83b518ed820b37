//! Configuration management for Sof-IA
//!
//! Values are resolved as env > TOML file > default.

pub mod file;

use std::path::{Path, PathBuf};

use secrecy::SecretString;

use crate::{Error, Result};
use file::SofiaConfigFile;

/// Default shared intent-recognition session
pub const DEFAULT_INTENT_SESSION: &str = "sofia-default-session";

/// Sof-IA configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Voice loop configuration
    pub voice: VoiceConfig,

    /// Processing backend used by the voice loop
    pub backend: BackendConfig,

    /// HTTP server configuration
    pub server: ServerConfig,

    /// Cloud services behind the HTTP server
    pub services: ServicesConfig,

    /// Optional topic catalog file; the embedded catalog is used when absent
    pub topics_path: Option<PathBuf>,
}

/// Voice loop configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Spoken language tag
    pub language: String,

    /// Normalised wake phrases
    pub wake_phrases: Vec<String>,

    /// Recording window in seconds
    pub recording_secs: u32,

    /// Delay before re-opening recognition after a session ends
    pub restart_delay_ms: u64,

    /// Delay before re-opening recognition after a surfaced failure
    pub error_backoff_ms: u64,

    /// Delay before resuming listening after playback
    pub resume_delay_ms: u64,

    /// Preferred synthesis voice name
    pub preferred_voice: Option<String>,

    /// RMS energy threshold for the native recognizer
    pub energy_threshold: f32,

    /// Seconds without speech before a native session reports no-speech
    pub no_speech_timeout_secs: u64,

    /// Maximum lifetime of a native recognition session
    pub max_session_secs: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            language: "es-MX".to_string(),
            wake_phrases: ["sofia", "sofía", "hey sofia", "hola sofia"]
                .into_iter()
                .map(ToString::to_string)
                .collect(),
            recording_secs: 5,
            restart_delay_ms: 300,
            error_backoff_ms: 1500,
            resume_delay_ms: 250,
            preferred_voice: None,
            energy_threshold: 0.03,
            no_speech_timeout_secs: 8,
            max_session_secs: 60,
        }
    }
}

/// Processing backend configuration
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL of the HTTP backend
    pub base_url: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Send a per-controller session identifier instead of the shared default
    pub per_session_ids: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3001".to_string(),
            timeout_secs: 20,
            per_session_ids: false,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
        }
    }
}

/// Cloud services configuration
#[derive(Debug, Clone)]
pub struct ServicesConfig {
    /// `OpenAI` API key (transcription and synthesis)
    pub openai_api_key: Option<SecretString>,

    /// Transcription model
    pub stt_model: String,

    /// Synthesis model
    pub tts_model: String,

    /// Synthesis voice
    pub tts_voice: String,

    /// Minimum intent confidence before the generative fallback takes over
    pub confidence_threshold: f32,

    /// Canned reply used when no generative fallback is configured
    pub fallback_reply: String,

    /// Dialogflow intent recognition (offline keyword matching when absent)
    pub dialogflow: Option<DialogflowConfig>,

    /// Vertex AI generative fallback (canned reply when absent)
    pub vertex: Option<VertexConfig>,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            stt_model: "whisper-1".to_string(),
            tts_model: "tts-1".to_string(),
            tts_voice: "nova".to_string(),
            confidence_threshold: 0.5,
            fallback_reply: "Lo siento, no entendí tu pregunta. ¿Puedes decirlo de otra forma?"
                .to_string(),
            dialogflow: None,
            vertex: None,
        }
    }
}

/// Dialogflow ES configuration
#[derive(Debug, Clone)]
pub struct DialogflowConfig {
    pub project_id: String,
    pub access_token: SecretString,
    pub session_id: String,
    pub language_code: String,
}

/// Vertex AI configuration
#[derive(Debug, Clone)]
pub struct VertexConfig {
    pub project_id: String,
    pub location: String,
    pub model: String,
    pub access_token: SecretString,
    pub max_output_tokens: u32,
    pub max_reply_chars: usize,
}

impl Config {
    /// Load configuration from the standard file location and the process environment
    ///
    /// # Errors
    ///
    /// Returns error if an explicitly requested file cannot be loaded or the result is invalid
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let explicit = config_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("SOFIA_CONFIG").ok().map(PathBuf::from));

        let fc = match explicit {
            Some(path) => file::load_config_file_from(&path)?,
            None => file::load_config_file(),
        };

        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if the resolved configuration is invalid
    pub fn from_sources(fc: SofiaConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let voice_defaults = VoiceConfig::default();
        let wake_phrases = env("SOFIA_WAKE_PHRASES")
            .map(|s| s.split(',').map(ToString::to_string).collect::<Vec<_>>())
            .or(fc.voice.wake_phrases)
            .unwrap_or(voice_defaults.wake_phrases);

        let voice = VoiceConfig {
            language: env("SOFIA_LANGUAGE")
                .or(fc.voice.language)
                .unwrap_or(voice_defaults.language),
            wake_phrases: normalize_phrases(wake_phrases),
            recording_secs: parse_env(&env, "SOFIA_RECORDING_SECS")
                .or(fc.voice.recording_secs)
                .unwrap_or(voice_defaults.recording_secs),
            restart_delay_ms: fc
                .voice
                .restart_delay_ms
                .unwrap_or(voice_defaults.restart_delay_ms),
            error_backoff_ms: fc
                .voice
                .error_backoff_ms
                .unwrap_or(voice_defaults.error_backoff_ms),
            resume_delay_ms: fc
                .voice
                .resume_delay_ms
                .unwrap_or(voice_defaults.resume_delay_ms),
            preferred_voice: env("SOFIA_VOICE").or(fc.voice.preferred_voice),
            energy_threshold: fc
                .voice
                .energy_threshold
                .unwrap_or(voice_defaults.energy_threshold),
            no_speech_timeout_secs: fc
                .voice
                .no_speech_timeout_secs
                .unwrap_or(voice_defaults.no_speech_timeout_secs),
            max_session_secs: fc
                .voice
                .max_session_secs
                .unwrap_or(voice_defaults.max_session_secs),
        };

        let backend_defaults = BackendConfig::default();
        let backend = BackendConfig {
            base_url: env("SOFIA_BACKEND_URL")
                .or(fc.backend.url)
                .unwrap_or(backend_defaults.base_url),
            timeout_secs: parse_env(&env, "SOFIA_BACKEND_TIMEOUT_SECS")
                .or(fc.backend.timeout_secs)
                .unwrap_or(backend_defaults.timeout_secs),
            per_session_ids: fc
                .backend
                .per_session_ids
                .unwrap_or(backend_defaults.per_session_ids),
        };

        let server_defaults = ServerConfig::default();
        let server = ServerConfig {
            host: env("SOFIA_HOST")
                .or(fc.server.host)
                .unwrap_or(server_defaults.host),
            port: parse_env(&env, "SOFIA_PORT")
                .or_else(|| parse_env(&env, "PORT"))
                .or(fc.server.port)
                .unwrap_or(server_defaults.port),
        };

        let services = Self::resolve_services(fc.services, &env, &voice.language);

        let topics_path = env("SOFIA_TOPICS").or(fc.topics).map(PathBuf::from);

        let config = Self {
            voice,
            backend,
            server,
            services,
            topics_path,
        };
        config.validate()?;
        Ok(config)
    }

    fn resolve_services(
        fc: file::ServicesFileConfig,
        env: &impl Fn(&str) -> Option<String>,
        language: &str,
    ) -> ServicesConfig {
        let defaults = ServicesConfig::default();

        let dialogflow = match (
            env("DIALOGFLOW_PROJECT_ID").or(fc.dialogflow.project_id),
            env("DIALOGFLOW_ACCESS_TOKEN").or(fc.dialogflow.access_token),
        ) {
            (Some(project_id), Some(token)) => Some(DialogflowConfig {
                project_id,
                access_token: SecretString::from(token),
                session_id: env("DIALOGFLOW_SESSION_ID")
                    .or(fc.dialogflow.session_id)
                    .unwrap_or_else(|| DEFAULT_INTENT_SESSION.to_string()),
                language_code: fc
                    .dialogflow
                    .language_code
                    .unwrap_or_else(|| language.to_string()),
            }),
            (Some(_), None) => {
                tracing::warn!("dialogflow project configured without access token, using offline intents");
                None
            }
            _ => None,
        };

        let vertex = match (
            env("VERTEX_PROJECT_ID").or(fc.vertex.project_id),
            env("VERTEX_ACCESS_TOKEN").or(fc.vertex.access_token),
        ) {
            (Some(project_id), Some(token)) => Some(VertexConfig {
                project_id,
                location: env("VERTEX_LOCATION")
                    .or(fc.vertex.location)
                    .unwrap_or_else(|| "us-central1".to_string()),
                model: env("VERTEX_MODEL")
                    .or(fc.vertex.model)
                    .unwrap_or_else(|| "gemini-1.5-flash".to_string()),
                access_token: SecretString::from(token),
                max_output_tokens: fc.vertex.max_output_tokens.unwrap_or(256),
                max_reply_chars: fc.vertex.max_reply_chars.unwrap_or(600),
            }),
            _ => None,
        };

        ServicesConfig {
            openai_api_key: env("OPENAI_API_KEY")
                .or(fc.openai_api_key)
                .map(SecretString::from),
            stt_model: env("SOFIA_STT_MODEL")
                .or(fc.stt_model)
                .unwrap_or(defaults.stt_model),
            tts_model: env("SOFIA_TTS_MODEL")
                .or(fc.tts_model)
                .unwrap_or(defaults.tts_model),
            tts_voice: env("SOFIA_TTS_VOICE")
                .or(fc.tts_voice)
                .unwrap_or(defaults.tts_voice),
            confidence_threshold: fc
                .confidence_threshold
                .unwrap_or(defaults.confidence_threshold),
            fallback_reply: fc.fallback_reply.unwrap_or(defaults.fallback_reply),
            dialogflow,
            vertex,
        }
    }

    /// Check invariants the voice loop relies on
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid setting
    pub fn validate(&self) -> Result<()> {
        if self.voice.wake_phrases.is_empty() {
            return Err(Error::Config("at least one wake phrase is required".to_string()));
        }
        if self.voice.recording_secs == 0 {
            return Err(Error::Config("voice.recording_secs must be positive".to_string()));
        }
        if self.backend.timeout_secs == 0 {
            return Err(Error::Config("backend.timeout_secs must be positive".to_string()));
        }

        let url = url::Url::parse(&self.backend.base_url)
            .map_err(|e| Error::Config(format!("invalid backend url {}: {e}", self.backend.base_url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "backend url must be http or https, got {}",
                url.scheme()
            )));
        }

        Ok(())
    }
}

/// Lower-case, trim and de-duplicate wake phrases, dropping empty ones
#[must_use]
pub fn normalize_phrases(phrases: Vec<String>) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::with_capacity(phrases.len());
    for phrase in phrases {
        let phrase = phrase.trim().to_lowercase();
        if !phrase.is_empty() && !normalized.contains(&phrase) {
            normalized.push(phrase);
        }
    }
    normalized
}

fn parse_env<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::from_sources(SofiaConfigFile::default(), env_from(&[])).unwrap();
        assert_eq!(config.voice.recording_secs, 5);
        assert_eq!(config.voice.language, "es-MX");
        assert!(config.voice.wake_phrases.contains(&"hey sofia".to_string()));
        assert!(config.services.dialogflow.is_none());
        assert!(config.topics_path.is_none());
    }

    #[test]
    fn env_overrides_file() {
        let fc: SofiaConfigFile = toml::from_str(
            r#"
            [voice]
            language = "es-ES"
            recording_secs = 7

            [server]
            port = 8080
            "#,
        )
        .unwrap();

        let config = Config::from_sources(
            fc,
            env_from(&[("SOFIA_RECORDING_SECS", "3"), ("SOFIA_PORT", "9000")]),
        )
        .unwrap();

        assert_eq!(config.voice.language, "es-ES");
        assert_eq!(config.voice.recording_secs, 3);
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn wake_phrases_are_normalized() {
        let config = Config::from_sources(
            SofiaConfigFile::default(),
            env_from(&[("SOFIA_WAKE_PHRASES", "  Sofia ,HEY SOFIA,, sofia")]),
        )
        .unwrap();
        assert_eq!(config.voice.wake_phrases, vec!["sofia", "hey sofia"]);
    }

    #[test]
    fn dialogflow_requires_token() {
        let without = Config::from_sources(
            SofiaConfigFile::default(),
            env_from(&[("DIALOGFLOW_PROJECT_ID", "wallet")]),
        )
        .unwrap();
        assert!(without.services.dialogflow.is_none());

        let with = Config::from_sources(
            SofiaConfigFile::default(),
            env_from(&[
                ("DIALOGFLOW_PROJECT_ID", "wallet"),
                ("DIALOGFLOW_ACCESS_TOKEN", "ya29.token"),
            ]),
        )
        .unwrap();
        let dialogflow = with.services.dialogflow.unwrap();
        assert_eq!(dialogflow.session_id, DEFAULT_INTENT_SESSION);
        assert_eq!(dialogflow.access_token.expose_secret(), "ya29.token");
        assert_eq!(dialogflow.language_code, "es-MX");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let empty_phrases =
            Config::from_sources(SofiaConfigFile::default(), env_from(&[("SOFIA_WAKE_PHRASES", " , ")]));
        assert!(matches!(empty_phrases, Err(Error::Config(_))));

        let bad_url = Config::from_sources(
            SofiaConfigFile::default(),
            env_from(&[("SOFIA_BACKEND_URL", "ftp://backend")]),
        );
        assert!(matches!(bad_url, Err(Error::Config(_))));

        let zero_window = Config::from_sources(
            SofiaConfigFile::default(),
            env_from(&[("SOFIA_RECORDING_SECS", "0")]),
        );
        assert!(matches!(zero_window, Err(Error::Config(_))));
    }
}
