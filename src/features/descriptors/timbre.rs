//! Spectral shape descriptors and acousticness
//!
//! Centroid and roll-off are averaged over frames of the magnitude spectrogram. The pitch
//! track is the strongest harmonic bin between C2 and C7 in each frame.

use crate::features::onset::consistency;
use crate::features::spectral::stft::Spectrogram;

/// Pitch-track search range (C2 to C7), in Hz
const PITCH_MIN_HZ: f32 = 65.41;
const PITCH_MAX_HZ: f32 = 2093.0;

/// Mean spectral centroid in Hz (frames without energy count as 0)
pub fn spectral_centroid(spec: &Spectrogram) -> f32 {
    if spec.frames.is_empty() {
        return 0.0;
    }
    let total: f32 = spec
        .frames
        .iter()
        .map(|frame| {
            let mass: f32 = frame.iter().sum();
            if mass <= 1e-10 {
                return 0.0;
            }
            frame
                .iter()
                .enumerate()
                .map(|(k, &m)| spec.bin_frequency(k as f32) * m)
                .sum::<f32>()
                / mass
        })
        .sum();
    total / spec.frames.len() as f32
}

/// Mean frequency below which `fraction` of each frame's magnitude lies, in Hz
pub fn spectral_rolloff(spec: &Spectrogram, fraction: f32) -> f32 {
    if spec.frames.is_empty() {
        return 0.0;
    }
    let total: f32 = spec
        .frames
        .iter()
        .map(|frame| {
            let target = frame.iter().sum::<f32>() * fraction;
            if target <= 1e-10 {
                return 0.0;
            }
            let mut acc = 0.0;
            let bin = frame
                .iter()
                .position(|&m| {
                    acc += m;
                    acc >= target
                })
                .unwrap_or(frame.len().saturating_sub(1));
            spec.bin_frequency(bin as f32)
        })
        .sum();
    total / spec.frames.len() as f32
}

/// Pitch standard deviation over mean pitch, or `None` with no voiced frame
pub fn pitch_variance_ratio(harmonic: &Spectrogram) -> Option<f32> {
    let bin_hz = harmonic.bin_frequency(1.0);
    if bin_hz <= 0.0 {
        return None;
    }
    let lo = (PITCH_MIN_HZ / bin_hz).ceil() as usize;
    let hi = ((PITCH_MAX_HZ / bin_hz).floor() as usize).min(harmonic.n_bins().saturating_sub(1));
    if lo >= hi {
        return None;
    }
    let pitches: Vec<f32> = harmonic
        .frames
        .iter()
        .filter_map(|frame| {
            let (k, &m) = frame[lo..=hi]
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))?;
            (m > 1e-6).then(|| harmonic.bin_frequency((lo + k) as f32))
        })
        .collect();
    if pitches.is_empty() {
        return None;
    }
    let n = pitches.len() as f32;
    let mean = pitches.iter().sum::<f32>() / n;
    let std = (pitches.iter().map(|p| (p - mean).powi(2)).sum::<f32>() / n).sqrt();
    Some(std / (mean + 1e-6))
}

/// Acousticness in [0, 1]
///
/// `0.4 * warmth + 0.35 * harmonic_ratio + 0.25 * gentleness`, where warmth falls with the
/// spectral centroid (0 at 4 kHz and above) and gentleness is the evenness of the onset
/// envelope. Missing inputs count as 0.5.
pub fn acousticness(
    centroid_hz: Option<f32>,
    harmonic_power: f64,
    percussive_power: f64,
    envelope: &[f32],
) -> f32 {
    let warmth = centroid_hz.map_or(0.5, |c| 1.0 - (c / 4000.0).min(1.0));
    let total = harmonic_power + percussive_power;
    let harmonic_ratio = if total > 0.0 {
        (harmonic_power / total) as f32
    } else {
        0.5
    };
    let gentleness = if envelope.is_empty() {
        0.5
    } else {
        consistency(envelope)
    };
    (0.4 * warmth + 0.35 * harmonic_ratio + 0.25 * gentleness).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone_spectrogram(bin: usize) -> Spectrogram {
        let mut frame = vec![0.0f32; 1025];
        frame[bin] = 1.0;
        Spectrogram {
            frames: vec![frame; 10],
            n_fft: 2048,
            hop_size: 512,
            sample_rate: 22050,
        }
    }

    #[test]
    fn test_centroid_and_rolloff_of_pure_tone() {
        let spec = tone_spectrogram(93);
        let expected = spec.bin_frequency(93.0);
        assert!((spectral_centroid(&spec) - expected).abs() < 1.0);
        assert!((spectral_rolloff(&spec, 0.85) - expected).abs() < 1.0);
    }

    #[test]
    fn test_steady_pitch_has_no_variance() {
        let ratio = pitch_variance_ratio(&tone_spectrogram(40)).unwrap();
        assert!(ratio < 1e-3);
        let silent = Spectrogram {
            frames: vec![vec![0.0; 1025]; 4],
            n_fft: 2048,
            hop_size: 512,
            sample_rate: 22050,
        };
        assert!(pitch_variance_ratio(&silent).is_none());
    }

    #[test]
    fn test_acousticness_prefers_warm_harmonic_material() {
        let gentle = vec![0.5f32; 100];
        let warm = acousticness(Some(500.0), 9.0, 1.0, &gentle);
        let bright = acousticness(Some(5000.0), 1.0, 9.0, &[0.0, 1.0, 0.0, 1.0]);
        assert!(warm > 0.8, "warm {}", warm);
        assert!(bright < 0.3, "bright {}", bright);
    }
}
