//! Operating phase of the voice controller

use serde::Serialize;

/// Mutually exclusive operating mode; drives all UI and gating logic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Nothing open
    #[default]
    Idle,
    /// Recognition session open, scanning for a wake phrase
    Listening,
    /// Microphone captured for a bounded window
    Recording,
    /// Waiting for the backend reply
    Processing,
    /// Reply being spoken
    Speaking,
}

impl Phase {
    /// Phases that own the microphone or the speaker exclusively
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Recording | Self::Processing | Self::Speaking)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Listening => write!(f, "listening"),
            Self::Recording => write!(f, "recording"),
            Self::Processing => write!(f, "processing"),
            Self::Speaking => write!(f, "speaking"),
        }
    }
}
