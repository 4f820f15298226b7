//! Short-time Fourier transform magnitude
//!
//! Frames are centred (zero padded by `n_fft / 2` on both sides) so frame `i` describes
//! the audio around sample `i * hop`. The magnitude matrix is stored frame-major, one
//! `Vec<f32>` of `n_fft / 2 + 1` bins per frame.

use crate::error::AnalysisError;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

/// Magnitude spectrogram plus the parameters needed to interpret it
#[derive(Debug, Clone)]
pub struct Spectrogram {
    /// Magnitudes, frame-major
    pub frames: Vec<Vec<f32>>,
    /// Transform size used
    pub n_fft: usize,
    /// Hop between frames in samples
    pub hop_size: usize,
    /// Sample rate of the transformed signal
    pub sample_rate: u32,
}

impl Spectrogram {
    /// Number of frames
    pub fn n_frames(&self) -> usize {
        self.frames.len()
    }

    /// Number of frequency bins per frame
    pub fn n_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Centre frequency of bin `k` in Hz
    pub fn bin_frequency(&self, k: f32) -> f32 {
        k * self.sample_rate as f32 / self.n_fft as f32
    }

    /// Frame rate in frames per second
    pub fn frames_per_second(&self) -> f32 {
        self.sample_rate as f32 / self.hop_size as f32
    }

    /// Sum of squared magnitudes over the whole matrix
    pub fn total_power(&self) -> f64 {
        self.frames
            .iter()
            .flat_map(|f| f.iter())
            .map(|&m| (m as f64) * (m as f64))
            .sum()
    }
}

/// Compute a Hann-windowed magnitude STFT
///
/// # Arguments
///
/// * `samples` - Mono samples
/// * `sample_rate` - Sample rate in Hz
/// * `n_fft` - Transform size
/// * `hop_size` - Hop between frames
///
/// # Errors
///
/// Returns `AnalysisError::InvalidInput` for zero sizes or a signal shorter than one
/// frame, and `AnalysisError::NumericalError` if the transform produced non-finite values.
pub fn stft_magnitude(
    samples: &[f32],
    sample_rate: u32,
    n_fft: usize,
    hop_size: usize,
) -> Result<Spectrogram, AnalysisError> {
    if n_fft < 2 || hop_size == 0 {
        return Err(AnalysisError::InvalidInput(format!(
            "Invalid STFT parameters: n_fft={}, hop={}",
            n_fft, hop_size
        )));
    }
    if samples.len() < n_fft {
        return Err(AnalysisError::InvalidInput(format!(
            "Signal of {} samples is shorter than one {}-sample frame",
            samples.len(),
            n_fft
        )));
    }

    let pad = n_fft / 2;
    let n_frames = 1 + samples.len() / hop_size;
    let n_bins = n_fft / 2 + 1;

    log::debug!(
        "Computing STFT: {} samples, n_fft={}, hop={}, {} frames",
        samples.len(),
        n_fft,
        hop_size,
        n_frames
    );

    let window: Vec<f32> = (0..n_fft)
        .map(|i| {
            let t = 2.0 * std::f32::consts::PI * i as f32 / n_fft as f32;
            0.5 * (1.0 - t.cos())
        })
        .collect();

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n_fft);
    let mut buffer = vec![Complex::new(0.0f32, 0.0); n_fft];
    let mut frames = Vec::with_capacity(n_frames);

    for frame_idx in 0..n_frames {
        let centre = frame_idx * hop_size;
        for (i, slot) in buffer.iter_mut().enumerate() {
            // Position in the unpadded signal
            let pos = (centre + i) as isize - pad as isize;
            let x = if pos >= 0 && (pos as usize) < samples.len() {
                samples[pos as usize]
            } else {
                0.0
            };
            *slot = Complex::new(x * window[i], 0.0);
        }
        fft.process(&mut buffer);

        let mags: Vec<f32> = buffer[..n_bins].iter().map(|c| c.norm()).collect();
        if mags.iter().any(|m| !m.is_finite()) {
            return Err(AnalysisError::NumericalError(format!(
                "Non-finite magnitude in frame {}",
                frame_idx
            )));
        }
        frames.push(mags);
    }

    Ok(Spectrogram {
        frames,
        n_fft,
        hop_size,
        sample_rate,
    })
}

/// STFT with a single reduced-size retry
///
/// On failure the transform is retried once with `n_fft / 2` provided that stays at or
/// above `min_fft`. Returns `None` when both attempts fail.
pub fn stft_with_retry(
    samples: &[f32],
    sample_rate: u32,
    n_fft: usize,
    hop_size: usize,
    min_fft: usize,
) -> Option<Spectrogram> {
    match stft_magnitude(samples, sample_rate, n_fft, hop_size) {
        Ok(spec) => Some(spec),
        Err(e) => {
            let reduced = n_fft / 2;
            if reduced < min_fft.max(2) {
                log::warn!("STFT failed ({}), no smaller transform to retry with", e);
                return None;
            }
            log::warn!("STFT failed ({}), retrying with n_fft={}", e, reduced);
            let reduced_hop = hop_size.min(reduced / 2).max(1);
            match stft_magnitude(samples, sample_rate, reduced, reduced_hop) {
                Ok(spec) => Some(spec),
                Err(e) => {
                    log::warn!("Reduced STFT failed as well: {}", e);
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sr: u32, seconds: f32) -> Vec<f32> {
        let n = (sr as f32 * seconds) as usize;
        (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sr as f32).sin())
            .collect()
    }

    #[test]
    fn test_stft_peak_bin() {
        let sr = 22050;
        let spec = stft_magnitude(&sine(1000.0, sr, 1.0), sr, 2048, 512).unwrap();
        assert_eq!(spec.n_bins(), 1025);
        assert_eq!(spec.n_frames(), 1 + 22050 / 512);

        let mid = &spec.frames[spec.n_frames() / 2];
        let peak = mid
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(k, _)| k)
            .unwrap();
        let freq = spec.bin_frequency(peak as f32);
        assert!((freq - 1000.0).abs() < 15.0, "peak at {} Hz", freq);
    }

    #[test]
    fn test_stft_rejects_short_signal() {
        let result = stft_magnitude(&[0.0; 100], 22050, 2048, 512);
        assert!(matches!(result, Err(AnalysisError::InvalidInput(_))));
    }

    #[test]
    fn test_stft_retry_with_reduced_size() {
        // 1500 samples: too short for 2048, fine for 1024
        let spec = stft_with_retry(&sine(440.0, 22050, 0.068), 22050, 2048, 512, 256).unwrap();
        assert_eq!(spec.n_fft, 1024);

        // Too short for both attempts
        assert!(stft_with_retry(&[0.1; 300], 22050, 2048, 512, 256).is_none());
    }
}
