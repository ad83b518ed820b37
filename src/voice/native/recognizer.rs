//! Speech recognition from the microphone and a remote transcriber
//!
//! Each session opens the microphone, cuts utterances with an energy segmenter and
//! transcribes them remotely. Sessions behave like browser recognition sessions:
//! they report `Started`, one `Results` batch per utterance, a `NoSpeech` error after
//! a quiet spell, and always finish with `Ended`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::capture::{MicrophoneStream, TrackRelease, samples_to_wav};
use super::segmenter::UtteranceSegmenter;
use crate::error::{CaptureError, RecognitionErrorKind};
use crate::services::Transcriber;
use crate::voice::provider::{
    AudioPayload, CaptureConstraints, MediaStream, RecognitionEvent, RecognitionOptions,
    RecognitionSegment, RecognitionSession, RecognitionSink, SpeechRecognitionProvider,
};

/// Tuning of the segmenting recognizer
#[derive(Debug, Clone)]
pub struct RecognizerSettings {
    /// RMS energy above which a chunk counts as speech
    pub energy_threshold: f32,
    /// Quiet time after which a session reports no-speech
    pub no_speech_timeout: Duration,
    /// Longest lifetime of one session
    pub max_session: Duration,
    /// How often the sample buffer is drained
    pub poll_interval: Duration,
}

impl Default for RecognizerSettings {
    fn default() -> Self {
        Self {
            energy_threshold: 0.03,
            no_speech_timeout: Duration::from_secs(8),
            max_session: Duration::from_secs(60),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl RecognizerSettings {
    /// Settings from the voice configuration
    #[must_use]
    pub fn from_config(voice: &crate::config::VoiceConfig) -> Self {
        Self {
            energy_threshold: voice.energy_threshold,
            no_speech_timeout: Duration::from_secs(voice.no_speech_timeout_secs),
            max_session: Duration::from_secs(voice.max_session_secs),
            ..Self::default()
        }
    }
}

/// Recognition provider backed by the local microphone
pub struct SegmentingRecognizer {
    transcriber: Arc<dyn Transcriber>,
    constraints: CaptureConstraints,
    settings: RecognizerSettings,
}

impl SegmentingRecognizer {
    #[must_use]
    pub fn new(transcriber: Arc<dyn Transcriber>, settings: RecognizerSettings) -> Self {
        Self {
            transcriber,
            constraints: CaptureConstraints::default(),
            settings,
        }
    }
}

impl SpeechRecognitionProvider for SegmentingRecognizer {
    fn open(
        &self,
        options: &RecognitionOptions,
        sink: RecognitionSink,
    ) -> Result<Box<dyn RecognitionSession>, RecognitionErrorKind> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RecognitionErrorKind::Other(e.to_string()))?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let tracks = Arc::new(Mutex::new(TrackSlot::Opening));
        let worker = SessionWorker {
            tracks: Arc::clone(&tracks),
            transcriber: Arc::clone(&self.transcriber),
            constraints: self.constraints.clone(),
            settings: self.settings.clone(),
            language: options.language.clone(),
            sink,
        };
        let task = runtime.spawn(worker.run(stop_rx));

        Ok(Box::new(SegmentingSession {
            stop_tx: Some(stop_tx),
            tracks,
            task,
        }))
    }
}

/// Microphone ownership of one session
enum TrackSlot {
    Opening,
    Open(TrackRelease),
    Aborted,
}

/// Release the session's microphone now, or make a pending open release it
fn release_tracks(tracks: &Mutex<TrackSlot>) {
    if let Ok(mut slot) = tracks.lock() {
        if let TrackSlot::Open(release) = std::mem::replace(&mut *slot, TrackSlot::Aborted) {
            release.release();
        }
    }
}

struct SegmentingSession {
    stop_tx: Option<oneshot::Sender<()>>,
    tracks: Arc<Mutex<TrackSlot>>,
    task: JoinHandle<()>,
}

impl RecognitionSession for SegmentingSession {
    fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }

    fn abort(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        release_tracks(&self.tracks);
        self.task.abort();
    }
}

impl Drop for SegmentingSession {
    fn drop(&mut self) {
        release_tracks(&self.tracks);
        self.task.abort();
    }
}

struct SessionWorker {
    tracks: Arc<Mutex<TrackSlot>>,
    transcriber: Arc<dyn Transcriber>,
    constraints: CaptureConstraints,
    settings: RecognizerSettings,
    language: String,
    sink: RecognitionSink,
}

impl SessionWorker {
    async fn run(self, mut stop_rx: oneshot::Receiver<()>) {
        let session = self.sink.session();
        let constraints = self.constraints.clone();
        let tracks = Arc::clone(&self.tracks);
        let opened = tokio::task::spawn_blocking(move || -> Result<MicrophoneStream, CaptureError> {
            let stream = MicrophoneStream::open(&constraints)?;
            let mut slot = tracks
                .lock()
                .map_err(|_| CaptureError::Other("session state poisoned".to_string()))?;
            if matches!(*slot, TrackSlot::Aborted) {
                // Dropping the stream releases the device
                return Err(CaptureError::Other("session aborted".to_string()));
            }
            *slot = TrackSlot::Open(stream.tracks());
            Ok(stream)
        })
        .await
        .map_err(|e| CaptureError::Other(e.to_string()))
        .and_then(|r| r);

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(session, error = %e, "recognizer could not open microphone");
                self.sink.emit(RecognitionEvent::Error(recognition_error(&e)));
                self.sink.emit(RecognitionEvent::Ended);
                return;
            }
        };
        if let Err(e) = stream.start_recorder() {
            self.sink.emit(RecognitionEvent::Error(recognition_error(&e)));
            self.sink.emit(RecognitionEvent::Ended);
            return;
        }

        self.sink.emit(RecognitionEvent::Started);

        let mut segmenter =
            UtteranceSegmenter::new(self.settings.energy_threshold, stream.sample_rate());
        let started = Instant::now();
        let mut last_heard = started;
        let mut ticker = tokio::time::interval(self.settings.poll_interval);

        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    tracing::debug!(session, "recognition stop requested");
                    break;
                }
                _ = ticker.tick() => {}
            }

            if self.sink.is_closed() {
                break;
            }

            let samples = stream.take_samples();
            if let Some(utterance) = segmenter.push(&samples) {
                last_heard = Instant::now();
                match self.transcribe(&utterance, stream.sample_rate()).await {
                    Ok(Some(segment)) => {
                        self.sink.emit(RecognitionEvent::Results(vec![segment]));
                    }
                    Ok(None) => {}
                    Err(kind) => {
                        self.sink.emit(RecognitionEvent::Error(kind));
                        break;
                    }
                }
            }
            if segmenter.in_speech() {
                last_heard = Instant::now();
            }

            if last_heard.elapsed() >= self.settings.no_speech_timeout {
                self.sink
                    .emit(RecognitionEvent::Error(RecognitionErrorKind::NoSpeech));
                break;
            }
            if started.elapsed() >= self.settings.max_session {
                tracing::debug!(session, "recognition session reached its maximum length");
                break;
            }
        }

        stream.stop_tracks();
        self.sink.emit(RecognitionEvent::Ended);
    }

    async fn transcribe(
        &self,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<Option<RecognitionSegment>, RecognitionErrorKind> {
        let bytes = samples_to_wav(samples, sample_rate)
            .map_err(|e| RecognitionErrorKind::Other(e.to_string()))?;

        let result = self
            .transcriber
            .transcribe(&AudioPayload::wav(bytes), &self.language)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "utterance transcription failed");
                RecognitionErrorKind::Network
            })?;

        let transcript = result.transcript.trim();
        if !result.success || transcript.is_empty() {
            tracing::trace!("utterance produced no transcript");
            return Ok(None);
        }

        Ok(Some(RecognitionSegment {
            transcript: transcript.to_string(),
            is_final: true,
            confidence: Some(result.confidence),
        }))
    }
}

const fn recognition_error(error: &CaptureError) -> RecognitionErrorKind {
    match error {
        CaptureError::PermissionDenied | CaptureError::InsecureContext => {
            RecognitionErrorKind::NotAllowed
        }
        CaptureError::NotFound
        | CaptureError::Busy
        | CaptureError::UnsupportedConstraints(_)
        | CaptureError::Other(_) => RecognitionErrorKind::AudioCapture,
    }
}
