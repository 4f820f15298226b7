//! Spectral flux onset envelope
//!
//! Positive change of the log-compressed magnitude, averaged over bins. Computed on the
//! percussive component so sustained harmonic changes do not register as onsets.

use super::normalize_max;
use crate::features::spectral::stft::Spectrogram;

/// Log compression gain applied before differencing
const LOG_GAIN: f32 = 10.0;

/// Spectral flux envelope, one value per spectrogram frame (the first frame is 0)
pub fn spectral_flux_envelope(spec: &Spectrogram) -> Vec<f32> {
    let n_frames = spec.n_frames();
    if n_frames == 0 {
        return vec![];
    }

    let mut prev: Vec<f32> = spec.frames[0]
        .iter()
        .map(|&m| (1.0 + LOG_GAIN * m).ln())
        .collect();
    let mut flux = Vec::with_capacity(n_frames);
    flux.push(0.0);

    for frame in &spec.frames[1..] {
        let mut sum = 0.0f32;
        for (k, &m) in frame.iter().enumerate() {
            let cur = (1.0 + LOG_GAIN * m).ln();
            sum += (cur - prev[k]).max(0.0);
            prev[k] = cur;
        }
        flux.push(sum / frame.len().max(1) as f32);
    }

    normalize_max(&mut flux);
    flux
}
