//! Voice interaction
//!
//! The controller runs the listen → record → process → speak loop over the
//! capability traits in [`provider`]; [`native`] implements them for desktop.

mod controller;
mod listening;
pub mod native;
mod phase;
mod playback;
mod processing;
pub mod provider;
mod recording;
mod router;
mod state;
mod timers;
mod wake;

pub use controller::{ControllerConfig, ControllerHandle, Providers, VoiceController};
pub use phase::Phase;
pub use playback::select_voice;
pub use processing::{HttpProcessingClient, PROCESSING_FAILED_MESSAGE, ProcessingBackend};
pub use provider::{
    AudioPayload, CaptureConstraints, MediaCaptureProvider, MediaStream, NoSpeechSynthesis,
    RecognitionEvent, RecognitionOptions, RecognitionSegment, RecognitionSession,
    RecognitionSink, SpeechRecognitionProvider, SpeechSynthesisProvider, Utterance, VoiceInfo,
};
pub use recording::EMPTY_RECORDING_MESSAGE;
pub use router::{IntentRouter, TopicOpener};
pub use state::VoiceSessionState;
pub use timers::TimerKind;
pub use wake::WakePhraseMatcher;
