//! Energy-based utterance segmentation
//!
//! Splits a continuous sample stream into utterances: speech starts when the RMS
//! energy of a chunk crosses the threshold and ends after a run of silence.

/// Minimum speech before an utterance counts, in seconds
const MIN_SPEECH_SECS: f32 = 0.3;

/// Trailing silence that closes an utterance, in seconds
const SILENCE_SECS: f32 = 0.5;

/// Longest utterance kept before it is cut, in seconds
const MAX_UTTERANCE_SECS: f32 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmenterState {
    Quiet,
    Speech,
}

/// Collects speech segments out of a sample stream
#[derive(Debug)]
pub struct UtteranceSegmenter {
    threshold: f32,
    min_speech_samples: usize,
    silence_samples: usize,
    max_samples: usize,
    state: SegmenterState,
    buffer: Vec<f32>,
    silence: usize,
}

impl UtteranceSegmenter {
    /// Create a segmenter for `sample_rate` with RMS `threshold`
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn new(threshold: f32, sample_rate: u32) -> Self {
        let samples = |secs: f32| (secs * sample_rate as f32) as usize;
        Self {
            threshold,
            min_speech_samples: samples(MIN_SPEECH_SECS),
            silence_samples: samples(SILENCE_SECS),
            max_samples: samples(MAX_UTTERANCE_SECS),
            state: SegmenterState::Quiet,
            buffer: Vec::new(),
            silence: 0,
        }
    }

    /// Feed a chunk; returns a completed utterance when one ends
    pub fn push(&mut self, samples: &[f32]) -> Option<Vec<f32>> {
        if samples.is_empty() {
            return None;
        }
        let energy = calculate_energy(samples);
        let is_speech = energy > self.threshold;

        match self.state {
            SegmenterState::Quiet => {
                if is_speech {
                    self.state = SegmenterState::Speech;
                    self.buffer.clear();
                    self.buffer.extend_from_slice(samples);
                    self.silence = 0;
                    tracing::trace!(energy, "speech onset");
                }
                None
            }
            SegmenterState::Speech => {
                self.buffer.extend_from_slice(samples);
                if is_speech {
                    self.silence = 0;
                } else {
                    self.silence += samples.len();
                }

                let voiced = self.buffer.len().saturating_sub(self.silence);
                if self.silence > self.silence_samples {
                    if voiced > self.min_speech_samples {
                        tracing::debug!(samples = self.buffer.len(), "utterance complete");
                        return Some(self.finish());
                    }
                    tracing::trace!("speech too short, discarded");
                    self.reset();
                } else if self.buffer.len() >= self.max_samples {
                    tracing::debug!(samples = self.buffer.len(), "utterance cut at maximum length");
                    return Some(self.finish());
                }
                None
            }
        }
    }

    /// Whether an utterance is being collected
    #[must_use]
    pub fn in_speech(&self) -> bool {
        self.state == SegmenterState::Speech
    }

    /// Drop any partial utterance
    pub fn reset(&mut self) {
        self.state = SegmenterState::Quiet;
        self.buffer.clear();
        self.silence = 0;
    }

    fn finish(&mut self) -> Vec<f32> {
        self.state = SegmenterState::Quiet;
        self.silence = 0;
        std::mem::take(&mut self.buffer)
    }
}

/// RMS energy of `samples`
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
