//! Speech playback
//!
//! Speaks reply text through the synthesis provider, one utterance at a time.

use std::sync::Arc;

use tokio::task::JoinHandle;

use super::controller::{ControllerEvent, Shared};
use super::provider::{SpeechSynthesisProvider, Utterance, VoiceInfo};
use super::Phase;

/// Pick the voice for `language`
///
/// A voice named `preferred` wins when installed; otherwise the first exact
/// language-tag match, then the first primary-subtag match (`es-MX` ~ `es-ES`),
/// then the provider's default voice.
#[must_use]
pub fn select_voice<'a>(
    voices: &'a [VoiceInfo],
    language: &str,
    preferred: Option<&str>,
) -> Option<&'a VoiceInfo> {
    if let Some(name) = preferred {
        if let Some(voice) = voices.iter().find(|v| v.name.eq_ignore_ascii_case(name)) {
            return Some(voice);
        }
    }

    let wanted = normalize_tag(language);
    let primary = primary_subtag(&wanted);

    voices
        .iter()
        .find(|v| normalize_tag(&v.language) == wanted)
        .or_else(|| {
            voices
                .iter()
                .find(|v| primary_subtag(&normalize_tag(&v.language)) == primary)
        })
        .or_else(|| voices.iter().find(|v| v.is_default))
}

fn normalize_tag(tag: &str) -> String {
    tag.trim().replace('_', "-").to_ascii_lowercase()
}

fn primary_subtag(tag: &str) -> &str {
    tag.split('-').next().unwrap_or(tag)
}

struct Speaking {
    utterance: u64,
    task: JoinHandle<()>,
}

pub(crate) struct SpeechPlayback {
    provider: Arc<dyn SpeechSynthesisProvider>,
    language: String,
    preferred_voice: Option<String>,
    current: Option<Speaking>,
    next_utterance: u64,
}

impl SpeechPlayback {
    pub(crate) fn new(
        provider: Arc<dyn SpeechSynthesisProvider>,
        language: String,
        preferred_voice: Option<String>,
    ) -> Self {
        Self {
            provider,
            language,
            preferred_voice,
            current: None,
            next_utterance: 0,
        }
    }

    pub(crate) const fn is_speaking(&self) -> bool {
        self.current.is_some()
    }

    /// Start speaking `text`; returns false when synthesis is unavailable
    ///
    /// Any utterance still playing is cancelled first.
    pub(crate) fn speak(&mut self, shared: &mut Shared, text: &str) -> bool {
        self.cancel();

        if !self.provider.is_available() {
            tracing::debug!("speech synthesis unavailable, skipping playback");
            return false;
        }

        self.next_utterance += 1;
        let utterance = self.next_utterance;

        let voices = self.provider.voices();
        let voice = select_voice(&voices, &self.language, self.preferred_voice.as_deref()).cloned();
        tracing::debug!(
            utterance,
            voice = voice.as_ref().map_or("default", |v| v.name.as_str()),
            "speaking reply"
        );

        shared.state.set_phase(Phase::Speaking);

        let request = Utterance {
            text: text.to_string(),
            language: self.language.clone(),
            voice,
        };
        let provider = Arc::clone(&self.provider);
        let events = shared.events.clone();
        let task = tokio::spawn(async move {
            let result = provider.speak(request).await;
            let _ = events.send(ControllerEvent::PlaybackDone { utterance, result });
        });

        self.current = Some(Speaking { utterance, task });
        true
    }

    /// Accept the completion of the current utterance; stale completions return false
    pub(crate) fn on_done(&mut self, utterance: u64) -> bool {
        match &self.current {
            Some(current) if current.utterance == utterance => {
                self.current = None;
                true
            }
            _ => {
                tracing::trace!(utterance, "stale playback completion ignored");
                false
            }
        }
    }

    /// Cancel whatever is playing
    pub(crate) fn cancel(&mut self) {
        if let Some(current) = self.current.take() {
            self.provider.cancel();
            current.task.abort();
            tracing::debug!(utterance = current.utterance, "playback cancelled");
        }
    }
}
