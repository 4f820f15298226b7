//! Loudness, dynamic range and silence ratio
//!
//! All three read frame RMS in dB relative to the loudest frame (clipped at -80 dB),
//! with a frame length of up to 2048 samples and a hop of a quarter frame.

use super::energy::safe_frame_length;
use super::percentile;
use crate::preprocessing::silence::{frame_rms, silence_ratio, to_relative_db};
use serde::{Deserialize, Serialize};

/// Loudness reported for digital silence
pub const SILENT_LOUDNESS_DB: f32 = -120.0;

/// Frames quieter than this (relative to the loudest) count as silent
pub const SILENCE_THRESHOLD_DB: f32 = -40.0;

/// Loudness summary of a signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Loudness {
    /// Mean relative frame level in dB
    pub loudness_db: f32,
    /// 95th minus 5th percentile of the relative frame level, in dB
    pub dynamic_range_db: f32,
    /// Fraction of frames below [`SILENCE_THRESHOLD_DB`]
    pub silence_ratio: f32,
}

/// Measure loudness, dynamics and silence of `samples`
pub fn measure_loudness(samples: &[f32], frame_size: usize) -> Loudness {
    let frame = safe_frame_length(samples.len(), frame_size);
    let rms = frame_rms(samples, frame, (frame / 4).max(1));
    let relative = to_relative_db(&rms);
    let silence = silence_ratio(relative.as_deref(), SILENCE_THRESHOLD_DB);

    match relative {
        Some(db) if !db.is_empty() => Loudness {
            loudness_db: db.iter().sum::<f32>() / db.len() as f32,
            dynamic_range_db: percentile(&db, 95.0) - percentile(&db, 5.0),
            silence_ratio: silence,
        },
        _ => Loudness {
            loudness_db: SILENT_LOUDNESS_DB,
            dynamic_range_db: 0.0,
            silence_ratio: silence,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence() {
        let l = measure_loudness(&[0.0; 22050], 2048);
        assert_eq!(l.loudness_db, SILENT_LOUDNESS_DB);
        assert_eq!(l.dynamic_range_db, 0.0);
        assert_eq!(l.silence_ratio, 1.0);
    }

    #[test]
    fn test_half_silent_signal() {
        let mut samples: Vec<f32> = (0..44100).map(|i| (i as f32 * 0.05).sin() * 0.5).collect();
        samples.extend(std::iter::repeat(0.0).take(44100));
        let l = measure_loudness(&samples, 2048);
        assert!((l.silence_ratio - 0.5).abs() < 0.05, "ratio {}", l.silence_ratio);
        assert!(l.dynamic_range_db > 60.0);
        assert!(l.loudness_db < 0.0);
    }

    #[test]
    fn test_steady_tone_has_no_dynamics() {
        let samples: Vec<f32> = (0..44100).map(|i| (i as f32 * 0.05).sin() * 0.5).collect();
        let l = measure_loudness(&samples, 2048);
        assert!(l.dynamic_range_db < 1.0);
        assert_eq!(l.silence_ratio, 0.0);
    }
}
