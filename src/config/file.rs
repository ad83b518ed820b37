//! TOML configuration file loading
//!
//! Supports `~/.config/sofia/config.toml` (or `SOFIA_CONFIG`) as a persistent config
//! source. All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct SofiaConfigFile {
    /// Voice loop configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Processing backend the voice loop talks to
    #[serde(default)]
    pub backend: BackendFileConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Cloud services behind the HTTP server
    #[serde(default)]
    pub services: ServicesFileConfig,

    /// Topic catalog path (JSON or TOML)
    pub topics: Option<String>,
}

/// Voice loop configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Spoken language tag (e.g. "es-MX")
    pub language: Option<String>,

    /// Wake phrases (e.g. ["sofia", "hey sofia"])
    pub wake_phrases: Option<Vec<String>>,

    /// Recording window in seconds
    pub recording_secs: Option<u32>,

    /// Delay before re-opening recognition after a session ends
    pub restart_delay_ms: Option<u64>,

    /// Delay before re-opening recognition after a surfaced failure
    pub error_backoff_ms: Option<u64>,

    /// Delay before resuming listening after playback
    pub resume_delay_ms: Option<u64>,

    /// Preferred synthesis voice name
    pub preferred_voice: Option<String>,

    /// RMS energy threshold for the native recognizer
    pub energy_threshold: Option<f32>,

    /// Seconds without speech before a native recognition session reports no-speech
    pub no_speech_timeout_secs: Option<u64>,

    /// Maximum lifetime of a native recognition session
    pub max_session_secs: Option<u64>,
}

/// Processing backend configuration
#[derive(Debug, Default, Deserialize)]
pub struct BackendFileConfig {
    /// Base URL of the HTTP backend
    pub url: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: Option<u64>,

    /// Send a per-controller session identifier
    pub per_session_ids: Option<bool>,
}

/// HTTP server configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Bind address
    pub host: Option<String>,

    /// Port to listen on
    pub port: Option<u16>,
}

/// Cloud services configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServicesFileConfig {
    /// `OpenAI` API key (transcription and synthesis)
    pub openai_api_key: Option<String>,

    /// Transcription model
    pub stt_model: Option<String>,

    /// Synthesis model
    pub tts_model: Option<String>,

    /// Synthesis voice
    pub tts_voice: Option<String>,

    /// Minimum intent confidence before the generative fallback takes over
    pub confidence_threshold: Option<f32>,

    /// Canned reply used when no generative fallback is configured
    pub fallback_reply: Option<String>,

    /// Dialogflow intent recognition
    #[serde(default)]
    pub dialogflow: DialogflowFileConfig,

    /// Vertex AI generative fallback
    #[serde(default)]
    pub vertex: VertexFileConfig,
}

/// Dialogflow configuration
#[derive(Debug, Default, Deserialize)]
pub struct DialogflowFileConfig {
    pub project_id: Option<String>,
    pub access_token: Option<String>,
    pub session_id: Option<String>,
    pub language_code: Option<String>,
}

/// Vertex AI configuration
#[derive(Debug, Default, Deserialize)]
pub struct VertexFileConfig {
    pub project_id: Option<String>,
    pub location: Option<String>,
    pub model: Option<String>,
    pub access_token: Option<String>,
    pub max_output_tokens: Option<u32>,
    pub max_reply_chars: Option<usize>,
}

/// Load the TOML config file from the standard path
///
/// Returns `SofiaConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> SofiaConfigFile {
    let Some(path) = config_file_path() else {
        return SofiaConfigFile::default();
    };

    if !path.exists() {
        return SofiaConfigFile::default();
    }

    match load_config_file_from(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            SofiaConfigFile::default()
        }
    }
}

/// Load an explicitly requested config file
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn load_config_file_from(path: &Path) -> Result<SofiaConfigFile> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
    let config = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Return the config file path: `~/.config/sofia/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("sofia").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_parses() {
        let file: SofiaConfigFile = toml::from_str(
            r#"
            [voice]
            wake_phrases = ["sofia", "oye sofia"]

            [services.dialogflow]
            project_id = "wallet-edu"
            "#,
        )
        .unwrap();

        assert_eq!(file.voice.wake_phrases.unwrap().len(), 2);
        assert!(file.voice.recording_secs.is_none());
        assert_eq!(file.services.dialogflow.project_id.as_deref(), Some("wallet-edu"));
        assert!(file.backend.url.is_none());
    }

    #[test]
    fn explicit_file_must_exist() {
        let missing = Path::new("/nonexistent/sofia/config.toml");
        assert!(matches!(load_config_file_from(missing), Err(Error::Config(_))));
    }
}
