//! Backend services: transcription, intent recognition, generative fallback and
//! speech synthesis, plus the [`Assistant`] pipeline that composes them

mod assistant;
mod fallback;
mod intent;
mod synthesizer;
mod transcriber;
mod types;

pub use assistant::Assistant;
pub use fallback::{CannedFallback, FallbackResponder, VertexFallback, truncate_reply};
pub use intent::{DialogflowClient, IntentRecognizer, KeywordIntentRecognizer};
pub use synthesizer::{OpenAiSynthesizer, Synthesizer};
pub use transcriber::{NO_SPEECH_RECOGNIZED, Transcriber, WhisperTranscriber};
pub use types::{IntentResult, ProcessReply, SynthesizedSpeech, TranscriptionResult};
