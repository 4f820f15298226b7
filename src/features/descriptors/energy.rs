//! Energy descriptor
//!
//! `energy = clamp01(0.6 * rms_energy + 0.25 * percussive_presence + 0.15 * pulse_density)`
//! where `rms_energy = clamp01((p90_db + 60) / 60)` is the loudness of the loud frames in
//! absolute dBFS.

use super::percentile;
use crate::preprocessing::silence::{frame_rms, to_db};

/// Loud-frame RMS energy in [0, 1]
///
/// Uses the 90th percentile of frame RMS in dBFS, mapping -60 dBFS to 0 and 0 dBFS to 1.
/// Returns 0 for empty input.
pub fn rms_energy(samples: &[f32], frame_size: usize, hop_size: usize) -> f32 {
    let rms = frame_rms(samples, safe_frame_length(samples.len(), frame_size), hop_size);
    if rms.is_empty() {
        return 0.0;
    }
    let loud_db = percentile(&to_db(&rms), 90.0);
    ((loud_db + 60.0) / 60.0).clamp(0.0, 1.0)
}

/// Frame length that does not exceed the signal: the largest power of two that fits,
/// at least 256
pub fn safe_frame_length(signal_len: usize, desired: usize) -> usize {
    if signal_len >= desired || signal_len == 0 {
        return desired;
    }
    let pow2 = 1usize << (usize::BITS - 1 - signal_len.leading_zeros());
    pow2.clamp(256.min(signal_len), signal_len)
}

/// Share of percussive power in the harmonic + percussive total
pub fn percussive_presence(harmonic_power: f64, percussive_power: f64) -> f32 {
    (percussive_power / (harmonic_power + percussive_power + 1e-9)).clamp(0.0, 1.0) as f32
}

/// Mean of the max-normalized onset envelope
pub fn pulse_density(envelope: &[f32]) -> f32 {
    if envelope.is_empty() {
        return 0.0;
    }
    envelope.iter().sum::<f32>() / envelope.len() as f32
}

/// Perceived energy in [0, 1]
pub fn energy_score(rms_energy: f32, percussive_presence: f32, pulse_density: f32) -> f32 {
    (0.6 * rms_energy + 0.25 * percussive_presence + 0.15 * pulse_density).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms_energy_levels() {
        let loud: Vec<f32> = (0..22050)
            .map(|i| (i as f32 * 0.05).sin() * 0.9)
            .collect();
        let quiet: Vec<f32> = loud.iter().map(|&x| x * 0.01).collect();
        let e_loud = rms_energy(&loud, 2048, 512);
        let e_quiet = rms_energy(&quiet, 2048, 512);
        assert!(e_loud > 0.9, "loud {}", e_loud);
        assert!(e_quiet < e_loud);
        assert_eq!(rms_energy(&[0.0; 4096], 2048, 512), 0.0);
        assert_eq!(rms_energy(&[], 2048, 512), 0.0);
    }

    #[test]
    fn test_safe_frame_length() {
        assert_eq!(safe_frame_length(10_000, 2048), 2048);
        assert_eq!(safe_frame_length(1500, 2048), 1024);
        assert_eq!(safe_frame_length(300, 2048), 256);
        assert_eq!(safe_frame_length(100, 2048), 100);
    }

    #[test]
    fn test_energy_score_is_clamped() {
        assert_eq!(energy_score(1.0, 1.0, 1.0), 1.0);
        assert_eq!(energy_score(0.0, 0.0, 0.0), 0.0);
        assert!((percussive_presence(1.0, 1.0) - 0.5).abs() < 1e-6);
        assert_eq!(percussive_presence(0.0, 0.0), 0.0);
    }
}
