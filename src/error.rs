//! Error types for the Sof-IA voice assistant

use thiserror::Error;

/// Result type alias for Sof-IA operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the assistant
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or codec error
    #[error("audio error: {0}")]
    Audio(String),

    /// Microphone acquisition failed
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    /// Speech recognition session error
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Intent recognition error
    #[error("intent error: {0}")]
    Intent(String),

    /// Backend processing failed (non-2xx, malformed reply, timeout)
    #[error("processing error: {0}")]
    Processing(String),

    /// Input rejected before dispatch
    #[error("empty input")]
    EmptyInput,

    /// No speech could be recognized in the submitted audio
    #[error("no speech recognized")]
    NoSpeech,

    /// The controller is no longer running
    #[error("voice controller stopped")]
    ControllerStopped,

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Why a microphone stream could not be acquired
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// The user or the platform refused microphone access
    #[error("microphone permission denied")]
    PermissionDenied,

    /// No input device is present
    #[error("no microphone found")]
    NotFound,

    /// The device exists but another consumer holds it
    #[error("microphone busy")]
    Busy,

    /// The device cannot satisfy the requested format
    #[error("unsupported capture constraints: {0}")]
    UnsupportedConstraints(String),

    /// Capture is only allowed from a secure context
    #[error("insecure context")]
    InsecureContext,

    /// Anything else the platform reported
    #[error("{0}")]
    Other(String),
}

impl CaptureError {
    /// User-visible message for this failure kind
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::PermissionDenied => {
                "Permiso de micrófono denegado. Habilítalo para poder hablar con Sof-IA."
            }
            Self::NotFound => "No se encontró ningún micrófono conectado.",
            Self::Busy => "El micrófono está siendo usado por otra aplicación.",
            Self::UnsupportedConstraints(_) => {
                "El micrófono no admite la configuración de audio solicitada."
            }
            Self::InsecureContext => "El micrófono solo está disponible en una conexión segura.",
            Self::Other(_) => "No se pudo acceder al micrófono.",
        }
    }
}

/// Error reported by a speech recognition session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionErrorKind {
    /// Session timed out without hearing speech
    NoSpeech,
    /// Session was aborted on request
    Aborted,
    /// Transient network failure in the recognition service
    Network,
    /// Audio capture for recognition failed
    AudioCapture,
    /// Recognition not permitted by the user
    NotAllowed,
    /// Recognition service refused the request
    ServiceNotAllowed,
    /// The requested language is not supported
    LanguageNotSupported,
    /// Any other provider-specific error
    Other(String),
}

impl RecognitionErrorKind {
    /// Expected errors are retried silently; the rest are surfaced to the user
    #[must_use]
    pub const fn is_benign(&self) -> bool {
        matches!(self, Self::NoSpeech | Self::Aborted | Self::Network)
    }

    /// User-visible message for surfaced errors
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::NoSpeech | Self::Aborted | Self::Network => String::new(),
            Self::AudioCapture => "No se pudo capturar audio para el reconocimiento de voz.".to_string(),
            Self::NotAllowed | Self::ServiceNotAllowed => {
                "El reconocimiento de voz no está permitido en este dispositivo.".to_string()
            }
            Self::LanguageNotSupported => {
                "El idioma configurado no es compatible con el reconocimiento de voz.".to_string()
            }
            Self::Other(detail) => format!("Error en el reconocimiento de voz: {detail}"),
        }
    }
}

impl std::fmt::Display for RecognitionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSpeech => write!(f, "no-speech"),
            Self::Aborted => write!(f, "aborted"),
            Self::Network => write!(f, "network"),
            Self::AudioCapture => write!(f, "audio-capture"),
            Self::NotAllowed => write!(f, "not-allowed"),
            Self::ServiceNotAllowed => write!(f, "service-not-allowed"),
            Self::LanguageNotSupported => write!(f, "language-not-supported"),
            Self::Other(detail) => write!(f, "{detail}"),
        }
    }
}
