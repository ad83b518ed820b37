//! Desktop implementations of the capability traits
//!
//! Capture and playback use cpal; recognition and synthesis are delegated to
//! remote services.

mod capture;
mod playback;
mod recognizer;
mod segmenter;

pub use capture::{CpalCapture, MicrophoneStream, SAMPLE_RATE, samples_to_wav};
pub use playback::{AudioPlayback, DecodedAudio, RemoteSpeechSynthesizer, decode_audio, resample};
pub use recognizer::{RecognizerSettings, SegmentingRecognizer};
pub use segmenter::{UtteranceSegmenter, calculate_energy};
