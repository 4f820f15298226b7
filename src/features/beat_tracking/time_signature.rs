//! Time signature detection
//!
//! Estimates the meter from the accent pattern of the tracked beats. Supports 4/4, 3/4,
//! 5/4 and 6/8.
//!
//! # Algorithm
//!
//! 1. Sample the onset envelope at every tracked beat (the beat accents)
//! 2. For each bar length, fold the accents by bar position and take the best phase's
//!    contrast: mean accent at that position over the mean accent everywhere else
//! 3. The strongest contrast wins; 4/4 is kept unless another meter beats it by 10 %
//! 4. Confidence blends how far the winning contrast sits above 1 with its margin over
//!    the runner-up
//!
//! # Example
//!
//! ```no_run
//! use fingerprint_dsp::features::beat_tracking::time_signature::{detect_time_signature, TimeSignature};
//!
//! // Strong first beat, two weak beats, eight bars
//! let accents: Vec<f32> = (0..24).map(|i| if i % 3 == 0 { 1.0 } else { 0.2 }).collect();
//! let estimate = detect_time_signature(&accents);
//! assert_eq!(estimate.signature, TimeSignature::ThreeFour);
//! println!("{} (confidence {:.2})", estimate.signature.name(), estimate.confidence);
//! ```

use serde::{Deserialize, Serialize};

/// Full bars needed before a bar length is scored
const MIN_BARS: usize = 2;

/// Added to the off-position mean before dividing
const ACCENT_FLOOR: f32 = 1e-3;

/// Relative contrast another meter needs to displace 4/4
const FOUR_FOUR_MARGIN: f32 = 1.1;

/// Musical time signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeSignature {
    /// 4/4 time (common time)
    #[default]
    #[serde(rename = "4/4")]
    FourFour,
    /// 3/4 time (waltz time)
    #[serde(rename = "3/4")]
    ThreeFour,
    /// 5/4 time
    #[serde(rename = "5/4")]
    FiveFour,
    /// 6/8 time (compound duple)
    #[serde(rename = "6/8")]
    SixEight,
}

impl TimeSignature {
    /// Every supported signature, 4/4 first
    pub const ALL: [TimeSignature; 4] = [
        TimeSignature::FourFour,
        TimeSignature::ThreeFour,
        TimeSignature::FiveFour,
        TimeSignature::SixEight,
    ];

    /// Tracked beats per bar
    pub fn beats_per_bar(&self) -> usize {
        match self {
            TimeSignature::FourFour => 4,
            TimeSignature::ThreeFour => 3,
            TimeSignature::FiveFour => 5,
            TimeSignature::SixEight => 6,
        }
    }

    /// Name as string (e.g., "4/4", "3/4", "6/8")
    pub fn name(&self) -> &'static str {
        match self {
            TimeSignature::FourFour => "4/4",
            TimeSignature::ThreeFour => "3/4",
            TimeSignature::FiveFour => "5/4",
            TimeSignature::SixEight => "6/8",
        }
    }
}

/// Detected meter
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TimeSignatureEstimate {
    /// Most likely signature (4/4 without evidence)
    pub signature: TimeSignature,
    /// Confidence in [0, 1]
    pub confidence: f32,
    /// Index of the first downbeat among the tracked beats
    pub downbeat_phase: usize,
}

/// Best-phase accent contrast for bars of `beats_per_bar` beats
///
/// # Returns
///
/// `(contrast, phase)`, or `None` with fewer than two full bars of accents
pub fn accent_contrast(accents: &[f32], beats_per_bar: usize) -> Option<(f32, usize)> {
    if beats_per_bar < 2 || accents.len() < beats_per_bar * MIN_BARS {
        return None;
    }
    (0..beats_per_bar)
        .map(|phase| {
            let (mut on, mut n_on, mut off, mut n_off) = (0.0f32, 0usize, 0.0f32, 0usize);
            for (i, &a) in accents.iter().enumerate() {
                if i % beats_per_bar == phase {
                    on += a.max(0.0);
                    n_on += 1;
                } else {
                    off += a.max(0.0);
                    n_off += 1;
                }
            }
            let on_mean = on / n_on.max(1) as f32;
            let off_mean = off / n_off.max(1) as f32;
            (on_mean / (off_mean + ACCENT_FLOOR), phase)
        })
        .max_by(|a, b| a.0.total_cmp(&b.0))
}

/// Detect the time signature from beat accents
///
/// # Arguments
///
/// * `accents` - Onset strength at each tracked beat, in beat order
///
/// # Returns
///
/// 4/4 with confidence 0 when there are too few beats to score any meter
pub fn detect_time_signature(accents: &[f32]) -> TimeSignatureEstimate {
    let scored: Vec<(TimeSignature, f32, usize)> = TimeSignature::ALL
        .iter()
        .filter_map(|&sig| {
            accent_contrast(accents, sig.beats_per_bar()).map(|(c, phase)| (sig, c, phase))
        })
        .collect();
    let Some(&best) = scored.iter().max_by(|a, b| a.1.total_cmp(&b.1)) else {
        return TimeSignatureEstimate::default();
    };

    let four = scored
        .iter()
        .find(|(sig, _, _)| *sig == TimeSignature::FourFour)
        .copied();
    let (signature, contrast, phase) = match four {
        Some(four) if best.0 != TimeSignature::FourFour && best.1 < four.1 * FOUR_FOUR_MARGIN => four,
        _ => best,
    };

    let runner_up = scored
        .iter()
        .filter(|(sig, _, _)| *sig != signature)
        .map(|(_, c, _)| *c)
        .fold(0.0f32, f32::max);
    let strength = if contrast > 0.0 {
        (1.0 - 1.0 / contrast).max(0.0)
    } else {
        0.0
    };
    let margin = if contrast > 0.0 {
        (1.0 - runner_up / contrast).max(0.0)
    } else {
        0.0
    };
    let confidence = (0.5 * strength + 0.5 * margin).clamp(0.0, 1.0);

    log::debug!(
        "Time signature {} (contrast {:.2}, runner-up {:.2}, downbeat phase {})",
        signature.name(),
        contrast,
        runner_up,
        phase
    );

    TimeSignatureEstimate {
        signature,
        confidence,
        downbeat_phase: phase,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accents(beats_per_bar: usize, phase: usize, bars: usize) -> Vec<f32> {
        (0..beats_per_bar * bars)
            .map(|i| if i % beats_per_bar == phase { 1.0 } else { 0.2 })
            .collect()
    }

    #[test]
    fn test_three_four() {
        let estimate = detect_time_signature(&accents(3, 0, 8));
        assert_eq!(estimate.signature, TimeSignature::ThreeFour);
        assert_eq!(estimate.downbeat_phase, 0);
        assert!(estimate.confidence > 0.5, "confidence {:.3}", estimate.confidence);
    }

    #[test]
    fn test_four_four_with_pickup() {
        let estimate = detect_time_signature(&accents(4, 1, 6));
        assert_eq!(estimate.signature, TimeSignature::FourFour);
        assert_eq!(estimate.downbeat_phase, 1);
        assert!(estimate.confidence > 0.5);
    }

    #[test]
    fn test_flat_accents_default_to_four_four() {
        let estimate = detect_time_signature(&[0.5f32; 32]);
        assert_eq!(estimate.signature, TimeSignature::FourFour);
        assert!(estimate.confidence < 0.1, "confidence {:.3}", estimate.confidence);
    }

    #[test]
    fn test_too_few_beats() {
        assert_eq!(detect_time_signature(&[1.0, 0.2, 0.2]), TimeSignatureEstimate::default());
        assert!(accent_contrast(&[1.0, 0.2, 0.2, 0.2], 3).is_none());
    }

    #[test]
    fn test_serialized_name() {
        for sig in TimeSignature::ALL {
            let json = serde_json::to_string(&sig).unwrap();
            assert_eq!(json, format!("\"{}\"", sig.name()));
        }
    }
}
