//! Harmonic-percussive source separation
//!
//! # Algorithm
//!
//! 1. Median-filter the magnitude along time (per bin) to enhance sustained, harmonic
//!    content
//! 2. Median-filter along frequency (per frame) to enhance broadband, percussive content
//! 3. Build soft Wiener masks `H^p / (H^p + P^p)` and apply them to the original magnitude
//!
//! When no spectrum is available a time-domain transient split is used instead: a fast
//! and a slow amplitude envelope are compared and the transient excess is routed to the
//! percussive signal.
//!
//! # Reference
//!
//! Fitzgerald, D. (2010). Harmonic/Percussive Separation using Median Filtering.
//! *Proceedings of the 13th International Conference on Digital Audio Effects (DAFx-10)*.

use super::stft::Spectrogram;
use crate::error::AnalysisError;

/// Numerical stability epsilon
const EPSILON: f32 = 1e-10;

/// Harmonic and percussive magnitude spectrograms
#[derive(Debug, Clone)]
pub struct HpssResult {
    /// Harmonic (time-smooth) component
    pub harmonic: Spectrogram,
    /// Percussive (frequency-smooth) component
    pub percussive: Spectrogram,
}

/// Separate a magnitude spectrogram into harmonic and percussive parts
///
/// # Arguments
///
/// * `spec` - Magnitude spectrogram
/// * `kernel` - Median kernel length in frames (harmonic) and bins (percussive)
/// * `power` - Soft-mask exponent
///
/// # Errors
///
/// Returns `AnalysisError::InvalidInput` for an empty spectrogram or a zero kernel.
pub fn hpss(spec: &Spectrogram, kernel: usize, power: f32) -> Result<HpssResult, AnalysisError> {
    if spec.frames.is_empty() {
        return Err(AnalysisError::InvalidInput(
            "Empty spectrogram".to_string(),
        ));
    }
    if kernel == 0 {
        return Err(AnalysisError::InvalidInput(
            "HPSS kernel must be > 0".to_string(),
        ));
    }

    let n_frames = spec.n_frames();
    let n_bins = spec.frames[0].len();
    let half = kernel / 2;

    log::debug!(
        "HPSS: {} frames x {} bins, kernel={}, power={}",
        n_frames,
        n_bins,
        kernel,
        power
    );

    let mut scratch = Vec::with_capacity(kernel);

    // Median along time for every bin
    let mut harm_med = vec![vec![0.0f32; n_bins]; n_frames];
    for k in 0..n_bins {
        for t in 0..n_frames {
            let lo = t.saturating_sub(half);
            let hi = (t + half + 1).min(n_frames);
            scratch.clear();
            scratch.extend((lo..hi).map(|i| spec.frames[i][k]));
            harm_med[t][k] = median_in_place(&mut scratch);
        }
    }

    // Median along frequency for every frame
    let mut perc_med = vec![vec![0.0f32; n_bins]; n_frames];
    for t in 0..n_frames {
        let frame = &spec.frames[t];
        for k in 0..n_bins {
            let lo = k.saturating_sub(half);
            let hi = (k + half + 1).min(n_bins);
            scratch.clear();
            scratch.extend_from_slice(&frame[lo..hi]);
            perc_med[t][k] = median_in_place(&mut scratch);
        }
    }

    let mut harmonic = Vec::with_capacity(n_frames);
    let mut percussive = Vec::with_capacity(n_frames);
    for t in 0..n_frames {
        let mut h_frame = Vec::with_capacity(n_bins);
        let mut p_frame = Vec::with_capacity(n_bins);
        for k in 0..n_bins {
            let h = harm_med[t][k].powf(power);
            let p = perc_med[t][k].powf(power);
            let denom = h + p + EPSILON;
            let m = spec.frames[t][k];
            h_frame.push(m * h / denom);
            p_frame.push(m * p / denom);
        }
        harmonic.push(h_frame);
        percussive.push(p_frame);
    }

    let wrap = |frames| Spectrogram {
        frames,
        n_fft: spec.n_fft,
        hop_size: spec.hop_size,
        sample_rate: spec.sample_rate,
    };

    Ok(HpssResult {
        harmonic: wrap(harmonic),
        percussive: wrap(percussive),
    })
}

fn median_in_place(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mid = values.len() / 2;
    let (_, m, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    *m
}

/// Time-domain transient split used when no spectrum could be computed
///
/// # Returns
///
/// `(harmonic, percussive)` signals that sum to the input
pub fn transient_split(samples: &[f32], sample_rate: u32) -> (Vec<f32>, Vec<f32>) {
    let fast = envelope(samples, sample_rate, 0.005);
    let slow = envelope(samples, sample_rate, 0.100);

    let mut harmonic = Vec::with_capacity(samples.len());
    let mut percussive = Vec::with_capacity(samples.len());
    for ((&x, &f), &s) in samples.iter().zip(&fast).zip(&slow) {
        let gain = if f > EPSILON {
            ((f - s) / f).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let p = x * gain;
        percussive.push(p);
        harmonic.push(x - p);
    }

    log::debug!("Time-domain transient split over {} samples", samples.len());
    (harmonic, percussive)
}

/// One-pole amplitude follower with the given time constant
fn envelope(samples: &[f32], sample_rate: u32, tau_seconds: f32) -> Vec<f32> {
    let coeff = if sample_rate == 0 {
        0.0
    } else {
        (-1.0 / (tau_seconds * sample_rate as f32)).exp()
    };
    let mut state = 0.0f32;
    samples
        .iter()
        .map(|&x| {
            state = coeff * state + (1.0 - coeff) * x.abs();
            state
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_from(frames: Vec<Vec<f32>>) -> Spectrogram {
        Spectrogram {
            frames,
            n_fft: 2 * 31 - 2,
            hop_size: 512,
            sample_rate: 22050,
        }
    }

    #[test]
    fn test_hpss_separates_line_and_column() {
        // 40 frames x 31 bins: a sustained tone in bin 10 and a click in frame 20
        let mut frames = vec![vec![0.0f32; 31]; 40];
        for f in frames.iter_mut() {
            f[10] = 1.0;
        }
        for k in 0..31 {
            frames[20][k] += 1.0;
        }

        let result = hpss(&spec_from(frames), 17, 2.0).unwrap();

        // Tone lives in the harmonic part away from the click
        assert!(result.harmonic.frames[5][10] > 0.9);
        assert!(result.percussive.frames[5][10] < 0.1);
        // Click lives in the percussive part away from the tone
        assert!(result.percussive.frames[20][25] > 0.9);
        assert!(result.harmonic.frames[20][25] < 0.1);
    }

    #[test]
    fn test_hpss_empty() {
        assert!(hpss(&spec_from(vec![]), 17, 2.0).is_err());
    }

    #[test]
    fn test_transient_split_sums_to_input() {
        let mut samples = vec![0.0f32; 4000];
        for (i, s) in samples.iter_mut().enumerate().skip(2000).take(200) {
            *s = if i % 2 == 0 { 0.8 } else { -0.8 };
        }
        let (h, p) = transient_split(&samples, 22050);
        for i in 0..samples.len() {
            assert!((h[i] + p[i] - samples[i]).abs() < 1e-6);
        }
        // The attack is mostly percussive
        let attack: f32 = p[2000..2040].iter().map(|x| x.abs()).sum();
        assert!(attack > 0.0);
    }
}
