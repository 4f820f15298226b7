//! Immutable mono audio buffer
//!
//! Decoding is left to the caller; this type only owns the decoded mono samples and
//! their sample rate. Non-finite samples are zeroed on construction so that no later
//! stage ever sees a NaN.

use std::sync::Arc;

/// Mono sample sequence plus sample rate
///
/// Cloning is cheap: the samples are shared behind an `Arc` and never mutated.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Wrap decoded mono samples
    ///
    /// # Example
    ///
    /// ```
    /// use fingerprint_dsp::io::audio_buffer::AudioBuffer;
    ///
    /// let buffer = AudioBuffer::new(vec![0.0, f32::NAN, 0.5], 22050);
    /// assert_eq!(buffer.samples(), &[0.0, 0.0, 0.5]);
    /// ```
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        let mut samples = samples;
        let mut replaced = 0usize;
        for s in samples.iter_mut() {
            if !s.is_finite() {
                *s = 0.0;
                replaced += 1;
            }
        }
        if replaced > 0 {
            log::debug!("Replaced {} non-finite samples with silence", replaced);
        }
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    /// Downmix interleaved multi-channel samples by averaging the channels
    ///
    /// A trailing partial frame is dropped. `channels == 0` yields an empty buffer.
    pub fn from_interleaved(interleaved: &[f32], channels: usize, sample_rate: u32) -> Self {
        if channels <= 1 {
            return Self::new(interleaved.to_vec(), sample_rate);
        }
        let scale = 1.0 / channels as f32;
        let mono = interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() * scale)
            .collect();
        Self::new(mono, sample_rate)
    }

    /// Samples
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when there are no samples
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds (0 for an invalid sample rate)
    pub fn duration_seconds(&self) -> f32 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.samples.len() as f32 / self.sample_rate as f32
        }
    }

    /// True when the buffer cannot be analyzed at all
    pub fn is_degenerate(&self) -> bool {
        self.samples.is_empty() || self.sample_rate == 0
    }

    /// Copy a sub-range `[start, start + len)` into a new buffer, clamped to the data
    pub fn slice(&self, start: usize, len: usize) -> Self {
        let start = start.min(self.samples.len());
        let end = start.saturating_add(len).min(self.samples.len());
        Self {
            samples: self.samples[start..end].into(),
            sample_rate: self.sample_rate,
        }
    }

    /// Keep at most the first `seconds` of audio
    pub fn truncated(&self, seconds: f32) -> Self {
        let max_len = (seconds.max(0.0) * self.sample_rate as f32) as usize;
        if max_len >= self.samples.len() {
            self.clone()
        } else {
            self.slice(0, max_len)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_interleaved_averages_channels() {
        let buffer = AudioBuffer::from_interleaved(&[1.0, 0.0, 0.5, 0.5, 0.25], 2, 8000);
        assert_eq!(buffer.samples(), &[0.5, 0.5]);
        assert_eq!(buffer.sample_rate(), 8000);
    }

    #[test]
    fn test_duration_and_degenerate() {
        let buffer = AudioBuffer::new(vec![0.0; 22050], 22050);
        assert!((buffer.duration_seconds() - 1.0).abs() < 1e-6);
        assert!(!buffer.is_degenerate());

        let zero_rate = AudioBuffer::new(vec![0.0; 100], 0);
        assert_eq!(zero_rate.duration_seconds(), 0.0);
        assert!(zero_rate.is_degenerate());
        assert!(AudioBuffer::new(vec![], 44100).is_degenerate());
    }

    #[test]
    fn test_slice_and_truncate_clamp() {
        let buffer = AudioBuffer::new((0..10).map(|i| i as f32).collect(), 10);
        assert_eq!(buffer.slice(8, 5).samples(), &[8.0, 9.0]);
        assert!(buffer.slice(20, 5).is_empty());
        assert_eq!(buffer.truncated(0.5).len(), 5);
        assert_eq!(buffer.truncated(10.0).len(), 10);
    }
}
