//! Microphone capture through cpal
//!
//! cpal streams are not `Send`, so each acquired stream lives on its own thread
//! and is dropped there when its tracks are stopped. Stopping only signals that
//! thread; the next `open` joins it first, so a released device is always closed
//! before it is opened again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread::JoinHandle;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use crate::error::CaptureError;
use crate::voice::provider::{AudioPayload, CaptureConstraints, MediaCaptureProvider, MediaStream};
use crate::{Error, Result};

/// Sample rate requested for speech capture
pub const SAMPLE_RATE: u32 = 16_000;

/// Acquires microphone streams from the default input device
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalCapture;

#[async_trait]
impl MediaCaptureProvider for CpalCapture {
    async fn acquire(
        &self,
        constraints: &CaptureConstraints,
    ) -> std::result::Result<Box<dyn MediaStream>, CaptureError> {
        let constraints = constraints.clone();
        let stream = tokio::task::spawn_blocking(move || MicrophoneStream::open(&constraints))
            .await
            .map_err(|e| CaptureError::Other(e.to_string()))??;
        Ok(Box::new(stream))
    }
}

/// Capture threads that were told to stop and have not been joined yet
static RELEASING: Mutex<Vec<JoinHandle<()>>> = Mutex::new(Vec::new());

/// Join every released capture thread; blocks
fn join_released() {
    let workers = RELEASING
        .lock()
        .map(|mut pending| std::mem::take(&mut *pending))
        .unwrap_or_default();
    for worker in workers {
        let _ = worker.join();
    }
}

/// Stop signal and thread of one open stream
type CaptureThread = (mpsc::Sender<()>, JoinHandle<()>);

/// Shared handle that stops a capture thread from any owner without blocking
#[derive(Clone)]
pub(crate) struct TrackRelease {
    inner: Arc<Mutex<Option<CaptureThread>>>,
}

impl TrackRelease {
    pub(crate) fn new(stop_tx: mpsc::Sender<()>, worker: JoinHandle<()>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some((stop_tx, worker)))),
        }
    }

    /// Signal the capture thread and hand it to the next `open` to join
    pub(crate) fn release(&self) {
        let taken = self.inner.lock().ok().and_then(|mut slot| slot.take());
        if let Some((stop_tx, worker)) = taken {
            let _ = stop_tx.send(());
            if let Ok(mut pending) = RELEASING.lock() {
                pending.push(worker);
            }
        }
    }

    pub(crate) fn is_live(&self) -> bool {
        self.inner.lock().is_ok_and(|slot| slot.is_some())
    }
}

/// A live input stream with a mono sample buffer
pub struct MicrophoneStream {
    buffer: Arc<Mutex<Vec<f32>>>,
    recording: Arc<AtomicBool>,
    tracks: TrackRelease,
    sample_rate: u32,
}

impl MicrophoneStream {
    /// Open the default input device; blocks until the stream is running
    ///
    /// # Errors
    ///
    /// Returns the capture failure kind if the device cannot be opened
    pub fn open(constraints: &CaptureConstraints) -> std::result::Result<Self, CaptureError> {
        join_released();

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let recording = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let worker = {
            let constraints = constraints.clone();
            let buffer = Arc::clone(&buffer);
            let recording = Arc::clone(&recording);
            std::thread::Builder::new()
                .name("sofia-mic".to_string())
                .spawn(move || {
                    let stream = match build_input_stream(&constraints, buffer, recording) {
                        Ok((stream, rate)) => {
                            let _ = ready_tx.send(Ok(rate));
                            stream
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    // Runs until the tracks are stopped or the owner is dropped
                    let _ = stop_rx.recv();
                    drop(stream);
                    tracing::debug!("microphone released");
                })
                .map_err(|e| CaptureError::Other(e.to_string()))?
        };

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| CaptureError::Other("capture thread exited".to_string()))??;

        Ok(Self {
            buffer,
            recording,
            tracks: TrackRelease::new(stop_tx, worker),
            sample_rate,
        })
    }

    /// Handle that releases this stream's device from elsewhere
    pub(crate) fn tracks(&self) -> TrackRelease {
        self.tracks.clone()
    }

    /// Actual stream sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Drain the samples accumulated so far
    #[must_use]
    pub fn take_samples(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }
}

impl MediaStream for MicrophoneStream {
    fn start_recorder(&mut self) -> std::result::Result<(), CaptureError> {
        if !self.is_live() {
            return Err(CaptureError::Other("stream already stopped".to_string()));
        }
        drop(self.take_samples());
        self.recording.store(true, Ordering::SeqCst);
        tracing::debug!(sample_rate = self.sample_rate, "recorder started");
        Ok(())
    }

    fn stop_recorder(&mut self) -> AudioPayload {
        self.recording.store(false, Ordering::SeqCst);
        let samples = self.take_samples();
        if samples.is_empty() {
            return AudioPayload::wav(Vec::new());
        }

        match samples_to_wav(&samples, self.sample_rate) {
            Ok(bytes) => AudioPayload::wav(bytes),
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode recording");
                AudioPayload::wav(Vec::new())
            }
        }
    }

    fn stop_tracks(&mut self) {
        self.recording.store(false, Ordering::SeqCst);
        self.tracks.release();
    }

    fn is_live(&self) -> bool {
        self.tracks.is_live()
    }
}

impl Drop for MicrophoneStream {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}

fn build_input_stream(
    constraints: &CaptureConstraints,
    buffer: Arc<Mutex<Vec<f32>>>,
    recording: Arc<AtomicBool>,
) -> std::result::Result<(Stream, u32), CaptureError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or(CaptureError::NotFound)?;

    let rate = SampleRate(constraints.sample_rate);
    let supported = device
        .supported_input_configs()
        .map_err(|e| match e {
            cpal::SupportedStreamConfigsError::DeviceNotAvailable => CaptureError::NotFound,
            other => CaptureError::Other(other.to_string()),
        })?
        .filter(|c| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
        .min_by_key(|c| c.channels().abs_diff(constraints.channels))
        .ok_or_else(|| {
            CaptureError::UnsupportedConstraints(format!(
                "{} Hz, {} channel(s)",
                constraints.sample_rate, constraints.channels
            ))
        })?;

    let config: StreamConfig = supported.with_sample_rate(rate).config();
    let channels = usize::from(config.channels.max(1));

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = constraints.sample_rate,
        channels,
        "microphone opened"
    );

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if !recording.load(Ordering::Relaxed) {
                    return;
                }
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend(downmix(data, channels));
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| match e {
            cpal::BuildStreamError::DeviceNotAvailable => CaptureError::NotFound,
            cpal::BuildStreamError::StreamConfigNotSupported
            | cpal::BuildStreamError::InvalidArgument => CaptureError::UnsupportedConstraints(
                format!("{} Hz", constraints.sample_rate),
            ),
            cpal::BuildStreamError::StreamIdOverflow => CaptureError::Busy,
            cpal::BuildStreamError::BackendSpecific { err } => {
                CaptureError::Other(err.description)
            }
        })?;

    stream.play().map_err(|e| match e {
        cpal::PlayStreamError::DeviceNotAvailable => CaptureError::NotFound,
        cpal::PlayStreamError::BackendSpecific { err } => CaptureError::Other(err.description),
    })?;

    Ok((stream, constraints.sample_rate))
}

#[allow(clippy::cast_precision_loss)]
fn downmix(data: &[f32], channels: usize) -> impl Iterator<Item = f32> + '_ {
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
}

/// Encode mono f32 samples as 16-bit PCM WAV
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let pcm = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(pcm)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_averages_frames() {
        let stereo = [0.5, -0.5, 1.0, 0.0];
        let mono: Vec<f32> = downmix(&stereo, 2).collect();
        assert_eq!(mono, vec![0.0, 0.5]);
    }

    #[test]
    fn release_does_not_wait_for_capture_thread() {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let worker = std::thread::spawn(move || {
            let _ = stop_rx.recv();
            std::thread::sleep(std::time::Duration::from_millis(200));
            let _ = done_tx.send(());
        });

        let tracks = TrackRelease::new(stop_tx, worker);
        let other_owner = tracks.clone();
        assert!(tracks.is_live());

        other_owner.release();
        assert!(!tracks.is_live());
        // Returned before the thread finished closing the device
        assert!(done_rx.try_recv().is_err());

        // Released twice is a no-op
        tracks.release();

        join_released();
        assert!(done_rx.try_recv().is_ok());
    }

    #[test]
    fn wav_header_and_length() {
        let wav = samples_to_wav(&[0.0; 160], SAMPLE_RATE).unwrap();
        assert_eq!(&wav[..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + 160 * 2);
    }
}
