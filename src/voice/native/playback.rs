//! Speech output: server-rendered synthesis played through cpal

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::services::Synthesizer;
use crate::voice::provider::{SpeechSynthesisProvider, Utterance, VoiceInfo};
use crate::{Error, Result};

/// Decoded mono audio
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Playback length
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }
}

/// Decode MP3 or WAV bytes according to `mime_type`
///
/// # Errors
///
/// Returns error if the format is unsupported or the data is corrupt
pub fn decode_audio(bytes: &[u8], mime_type: &str) -> Result<DecodedAudio> {
    match mime_type {
        "audio/mpeg" | "audio/mp3" => decode_mp3(bytes),
        "audio/wav" | "audio/wave" | "audio/x-wav" => decode_wav(bytes),
        other => Err(Error::Audio(format!("unsupported audio format: {other}"))),
    }
}

#[allow(clippy::cast_precision_loss)]
fn decode_mp3(bytes: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(bytes));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or_default();
                let channels = frame.channels.max(1);
                samples.extend(frame.data.chunks(channels).map(|chunk| {
                    let sum: f32 = chunk.iter().map(|&s| f32::from(s) / 32768.0).sum();
                    sum / chunk.len() as f32
                }));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

#[allow(clippy::cast_precision_loss)]
fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio> {
    let mut reader =
        hound::WavReader::new(Cursor::new(bytes)).map_err(|e| Error::Audio(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Audio(e.to_string()))?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(e.to_string()))?
        }
    };

    let samples = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    Ok(DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Input frames per resampler chunk
const RESAMPLE_CHUNK: usize = 1024;

/// Resample mono audio from `from` Hz to `target` Hz
///
/// Output length is `samples.len() * target / from`; the filter delay is trimmed
/// and the tail is flushed with silence.
///
/// # Errors
///
/// Returns error if either rate is zero or the resampler fails
#[allow(clippy::cast_possible_truncation)]
pub fn resample(samples: &[f32], from: u32, target: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    if from == target || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    if from == 0 || target == 0 {
        return Err(Error::Audio(format!(
            "cannot resample from {from} Hz to {target} Hz"
        )));
    }

    let mut resampler =
        FftFixedIn::<f64>::new(from as usize, target as usize, RESAMPLE_CHUNK, 2, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let expected = (samples.len() as u64 * u64::from(target) / u64::from(from)) as usize;
    let delay = resampler.output_delay();
    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();

    let mut output: Vec<f64> = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);
    let mut offset = 0;
    while output.len() < delay + expected {
        let frames = resampler.input_frames_next();
        let mut chunk = vec![0.0; frames];
        if offset < input.len() {
            let end = (offset + frames).min(input.len());
            chunk[..end - offset].copy_from_slice(&input[offset..end]);
        }
        offset += frames;

        let result = resampler
            .process(&[chunk], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    Ok(output[delay..delay + expected]
        .iter()
        .map(|&s| s as f32)
        .collect())
}

/// Plays decoded audio on the default output device
pub struct AudioPlayback;

impl AudioPlayback {
    /// Whether an output device is present
    #[must_use]
    pub fn is_available() -> bool {
        cpal::default_host().default_output_device().is_some()
    }

    /// Play `audio` to completion, or until `keep_playing` returns false
    ///
    /// Blocks the calling thread.
    ///
    /// # Errors
    ///
    /// Returns error if the output device cannot be opened
    pub fn play_blocking(audio: &DecodedAudio, keep_playing: impl Fn() -> bool) -> Result<()> {
        if audio.samples.is_empty() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let wanted = SampleRate(audio.sample_rate);
        let supported = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .filter(|c| c.min_sample_rate() <= wanted && c.max_sample_rate() >= wanted)
            .min_by_key(|c| c.channels())
            .map(|c| c.with_sample_rate(wanted));

        let (config, samples): (StreamConfig, Vec<f32>) = match supported {
            Some(range) => (range.config(), audio.samples.clone()),
            None => {
                let fallback = device
                    .default_output_config()
                    .map_err(|e| Error::Audio(e.to_string()))?;
                let rate = fallback.sample_rate().0;
                (
                    fallback.config(),
                    resample(&audio.samples, audio.sample_rate, rate)?,
                )
            }
        };
        let channels = usize::from(config.channels.max(1));
        let output_rate = config.sample_rate.0;

        let samples = Arc::new(samples);
        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let stream = {
            let samples = Arc::clone(&samples);
            let position = Arc::clone(&position);
            let finished = Arc::clone(&finished);
            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        for frame in data.chunks_mut(channels) {
                            let pos = position.load(Ordering::Relaxed);
                            let sample = samples.get(pos).copied().unwrap_or_else(|| {
                                finished.store(true, Ordering::Relaxed);
                                0.0
                            });
                            frame.fill(sample);
                            if pos < samples.len() {
                                position.store(pos + 1, Ordering::Relaxed);
                            }
                        }
                    },
                    |err| {
                        tracing::error!(error = %err, "audio playback error");
                    },
                    None,
                )
                .map_err(|e| Error::Audio(e.to_string()))?
        };

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let duration_ms = (samples.len() as u64 * 1000) / u64::from(output_rate.max(1));
        let deadline = Instant::now() + Duration::from_millis(duration_ms + 500);

        while !finished.load(Ordering::Relaxed) {
            if !keep_playing() {
                tracing::debug!("playback interrupted");
                return Ok(());
            }
            if Instant::now() > deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }

        drop(stream);
        tracing::debug!(samples = samples.len(), "playback complete");
        Ok(())
    }
}

/// Synthesis provider that renders speech remotely and plays it locally
pub struct RemoteSpeechSynthesizer {
    synthesizer: Arc<dyn Synthesizer>,
    voice: VoiceInfo,
    available: bool,
    generation: Arc<AtomicU64>,
}

impl RemoteSpeechSynthesizer {
    /// Create a provider that speaks with `voice` in `language`
    #[must_use]
    pub fn new(synthesizer: Arc<dyn Synthesizer>, voice: &str, language: &str) -> Self {
        let available = AudioPlayback::is_available();
        if !available {
            tracing::warn!("no audio output device, replies will not be spoken");
        }

        Self {
            synthesizer,
            voice: VoiceInfo {
                name: voice.to_string(),
                language: language.to_string(),
                is_default: true,
            },
            available,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }
}

#[async_trait]
impl SpeechSynthesisProvider for RemoteSpeechSynthesizer {
    fn is_available(&self) -> bool {
        self.available
    }

    fn voices(&self) -> Vec<VoiceInfo> {
        vec![self.voice.clone()]
    }

    async fn speak(&self, utterance: Utterance) -> Result<()> {
        let generation = self.generation.load(Ordering::SeqCst);
        let voice = utterance.voice.as_ref().map(|v| v.name.as_str());

        let speech = self.synthesizer.synthesize(&utterance.text, voice).await?;
        let bytes = speech.decode()?;
        let audio = decode_audio(&bytes, &speech.mime_type)?;
        tracing::debug!(
            duration_ms = audio.duration().as_millis(),
            mime_type = %speech.mime_type,
            "playing synthesized speech"
        );

        let current = Arc::clone(&self.generation);
        tokio::task::spawn_blocking(move || {
            AudioPlayback::play_blocking(&audio, || current.load(Ordering::SeqCst) == generation)
        })
        .await
        .map_err(|e| Error::Audio(e.to_string()))?
    }

    fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::native::samples_to_wav;

    #[test]
    fn wav_round_trip_keeps_rate() {
        let wav = samples_to_wav(&[0.0, 0.5, -0.5], 22_050).unwrap();
        let audio = decode_audio(&wav, "audio/wav").unwrap();
        assert_eq!(audio.sample_rate, 22_050);
        assert_eq!(audio.samples.len(), 3);
        assert!((audio.samples[1] - 0.5).abs() < 0.001);
    }

    #[test]
    fn unsupported_format_rejected() {
        assert!(decode_audio(b"OggS", "audio/ogg").is_err());
    }

    #[test]
    #[allow(clippy::cast_precision_loss)]
    fn resample_halves_length() {
        let samples: Vec<f32> = (0..4800)
            .map(|i| (2.0 * std::f32::consts::PI * 300.0 * i as f32 / 48_000.0).sin() * 0.5)
            .collect();
        let out = resample(&samples, 48_000, 24_000).unwrap();
        assert_eq!(out.len(), 2400);

        // A 300 Hz tone survives the rate change with its level intact
        let level = |s: &[f32]| (s.iter().map(|v| v * v).sum::<f32>() / s.len() as f32).sqrt();
        assert!((level(&out[200..2200]) - level(&samples[400..4400])).abs() < 0.02);

        assert_eq!(resample(&samples, 16_000, 16_000).unwrap(), samples);
        assert!(resample(&samples, 0, 16_000).is_err());
    }
}
