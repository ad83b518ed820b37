//! Capability interfaces for speech recognition, microphone capture and speech synthesis
//!
//! The controller only talks to these traits. Production implementations live in
//! [`super::native`]; tests supply fakes.

use async_trait::async_trait;

use super::controller::{ControllerEvent, EventSender};
use crate::Result;
use crate::error::{CaptureError, RecognitionErrorKind};

/// Options for opening a recognition session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionOptions {
    /// Spoken language tag
    pub language: String,
    /// Keep the session open across utterances
    pub continuous: bool,
    /// Deliver interim (non-final) results
    pub interim_results: bool,
}

/// One recognized segment in a result batch
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionSegment {
    pub transcript: String,
    pub is_final: bool,
    pub confidence: Option<f32>,
}

impl RecognitionSegment {
    /// A final segment
    #[must_use]
    pub fn final_text(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            is_final: true,
            confidence: None,
        }
    }

    /// An interim segment
    #[must_use]
    pub fn interim(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            is_final: false,
            confidence: None,
        }
    }
}

/// Events a recognition session reports
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    /// The session is live
    Started,
    /// A batch of new results
    Results(Vec<RecognitionSegment>),
    /// The session failed; `Ended` follows
    Error(RecognitionErrorKind),
    /// The session stopped, for whatever reason
    Ended,
}

/// Delivers the events of one recognition session to the controller
#[derive(Clone)]
pub struct RecognitionSink {
    session: u64,
    events: EventSender,
}

impl RecognitionSink {
    pub(crate) const fn new(session: u64, events: EventSender) -> Self {
        Self { session, events }
    }

    /// Session this sink belongs to
    #[must_use]
    pub const fn session(&self) -> u64 {
        self.session
    }

    /// Report an event; returns false once the controller is gone
    pub fn emit(&self, event: RecognitionEvent) -> bool {
        self.events
            .send(ControllerEvent::Recognition {
                session: self.session,
                event,
            })
            .is_ok()
    }

    /// Whether the controller stopped receiving events
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

/// Handle to an open recognition session
///
/// Sessions are single-use: once ended they are dropped and a new one is opened.
pub trait RecognitionSession: Send {
    /// Ask the session to stop; `Ended` is reported asynchronously
    fn stop(&mut self);

    /// Tear the session down immediately; no further events are expected
    fn abort(&mut self);
}

/// Opens speech recognition sessions
pub trait SpeechRecognitionProvider: Send + Sync {
    /// Open a new session that reports through `sink`
    ///
    /// # Errors
    ///
    /// Returns the error kind when the session cannot be opened at all
    fn open(
        &self,
        options: &RecognitionOptions,
        sink: RecognitionSink,
    ) -> std::result::Result<Box<dyn RecognitionSession>, RecognitionErrorKind>;
}

/// Requested microphone format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub sample_rate: u32,
    pub channels: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

/// Captured audio ready for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPayload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl AudioPayload {
    /// WAV payload
    #[must_use]
    pub fn wav(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            mime_type: "audio/wav".to_string(),
        }
    }

    /// Whether nothing was captured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// File name matching the MIME type, for multipart uploads
    #[must_use]
    pub fn file_name(&self) -> &'static str {
        match self.mime_type.as_str() {
            "audio/webm" => "audio.webm",
            "audio/ogg" => "audio.ogg",
            "audio/mpeg" => "audio.mp3",
            _ => "audio.wav",
        }
    }
}

/// An acquired microphone stream with its recorder
pub trait MediaStream: Send {
    /// Begin accumulating audio chunks
    ///
    /// # Errors
    ///
    /// Returns error if the recorder cannot start on this stream
    fn start_recorder(&mut self) -> std::result::Result<(), CaptureError>;

    /// Stop the recorder and return everything it accumulated
    fn stop_recorder(&mut self) -> AudioPayload;

    /// Stop the hardware tracks, releasing the microphone
    fn stop_tracks(&mut self);

    /// Whether the hardware tracks are still running
    fn is_live(&self) -> bool;
}

/// Acquires microphone streams
#[async_trait]
pub trait MediaCaptureProvider: Send + Sync {
    /// Acquire a stream; this may wait on a permission prompt
    ///
    /// # Errors
    ///
    /// Returns the failure kind when no stream can be acquired
    async fn acquire(
        &self,
        constraints: &CaptureConstraints,
    ) -> std::result::Result<Box<dyn MediaStream>, CaptureError>;
}

/// A synthesis voice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceInfo {
    pub name: String,
    pub language: String,
    pub is_default: bool,
}

/// Text to be spoken
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub text: String,
    pub language: String,
    pub voice: Option<VoiceInfo>,
}

/// Speaks text aloud
#[async_trait]
pub trait SpeechSynthesisProvider: Send + Sync {
    /// Whether synthesis can run at all on this platform
    fn is_available(&self) -> bool;

    /// Installed voices
    fn voices(&self) -> Vec<VoiceInfo>;

    /// Speak until natural completion, cancellation or error
    ///
    /// # Errors
    ///
    /// Returns error if playback fails
    async fn speak(&self, utterance: Utterance) -> Result<()>;

    /// Cancel whatever is currently being spoken
    fn cancel(&self);
}

/// Synthesis provider for platforms without audio output
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSpeechSynthesis;

#[async_trait]
impl SpeechSynthesisProvider for NoSpeechSynthesis {
    fn is_available(&self) -> bool {
        false
    }

    fn voices(&self) -> Vec<VoiceInfo> {
        Vec::new()
    }

    async fn speak(&self, _utterance: Utterance) -> Result<()> {
        Ok(())
    }

    fn cancel(&self) {}
}
