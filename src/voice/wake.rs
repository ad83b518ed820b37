//! Wake phrase detection over recognized text

use crate::config::normalize_phrases;
use crate::{Error, Result};

/// Matches transcripts against configured wake phrases
#[derive(Debug, Clone)]
pub struct WakePhraseMatcher {
    phrases: Vec<String>,
}

impl WakePhraseMatcher {
    /// Create a matcher
    ///
    /// # Arguments
    ///
    /// * `phrases` - Wake phrases (e.g., "hey sofia"); normalised to lower case and trimmed
    ///
    /// # Errors
    ///
    /// Returns error if no non-empty phrase remains after normalisation
    pub fn new(phrases: Vec<String>) -> Result<Self> {
        let phrases = normalize_phrases(phrases);
        if phrases.is_empty() {
            return Err(Error::Config("no wake phrases configured".to_string()));
        }

        tracing::debug!(wake_phrases = ?phrases, "wake phrase matcher initialized");
        Ok(Self { phrases })
    }

    /// First configured phrase contained in `transcript`, if any
    #[must_use]
    pub fn find(&self, transcript: &str) -> Option<&str> {
        let normalized = transcript.trim().to_lowercase();
        if normalized.is_empty() {
            return None;
        }

        self.phrases
            .iter()
            .find(|phrase| normalized.contains(phrase.as_str()))
            .map(String::as_str)
    }

    /// Whether `transcript` contains any wake phrase
    #[must_use]
    pub fn matches(&self, transcript: &str) -> bool {
        self.find(transcript).is_some()
    }

    /// Configured phrases
    #[must_use]
    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }
}
