//! Onset-strength envelope
//!
//! Two methods, chosen by what the front-end could compute:
//! - Spectral flux of the percussive spectrogram (normal path)
//! - Energy flux of the time-domain percussive signal (transform fallback)
//!
//! Both produce a non-negative envelope normalized to a maximum of 1 (all zeros for
//! silence), one value per hop.

pub mod energy_flux;
pub mod spectral_flux;

use crate::error::AnalysisError;
use crate::features::spectral::context::{AnalysisContext, Separation};

/// Numerical stability epsilon
const EPSILON: f32 = 1e-10;

/// Onset-strength envelope with its frame rate
#[derive(Debug, Clone)]
pub struct OnsetEnvelope {
    /// Envelope values in [0, 1]
    pub values: Vec<f32>,
    /// Frames per second
    pub frame_rate: f32,
}

impl OnsetEnvelope {
    /// True when the envelope carries no onset energy at all
    pub fn is_silent(&self) -> bool {
        self.values.iter().all(|&v| v <= EPSILON)
    }

    /// Envelope length in seconds
    pub fn duration_seconds(&self) -> f32 {
        if self.frame_rate <= 0.0 {
            0.0
        } else {
            self.values.len() as f32 / self.frame_rate
        }
    }

    /// Envelope values at the given frame indices (out-of-range indices are skipped)
    pub fn sample_at(&self, frames: &[usize]) -> Vec<f32> {
        frames
            .iter()
            .filter_map(|&f| self.values.get(f).copied())
            .collect()
    }
}

/// Compute the onset envelope of the tempo window
///
/// # Errors
///
/// Propagates `AnalysisError::InvalidInput` from the energy-flux fallback on invalid sizes
pub fn onset_envelope(
    ctx: &AnalysisContext,
    frame_size: usize,
) -> Result<OnsetEnvelope, AnalysisError> {
    let frame_rate = ctx.sample_rate as f32 / ctx.hop_size as f32;
    let values = match &ctx.separation {
        Separation::Spectral(split) => spectral_flux::spectral_flux_envelope(&split.percussive),
        Separation::TimeDomain { percussive, .. } => {
            energy_flux::energy_flux_envelope(percussive, frame_size, ctx.hop_size)?
        }
    };
    log::debug!(
        "Onset envelope: {} frames at {:.2} fps",
        values.len(),
        frame_rate
    );
    Ok(OnsetEnvelope { values, frame_rate })
}

/// Scale `values` in place so the maximum is 1 (no-op for silence)
pub(crate) fn normalize_max(values: &mut [f32]) {
    let max = values.iter().copied().fold(0.0f32, f32::max);
    if max > EPSILON {
        for v in values.iter_mut() {
            *v /= max;
        }
    } else {
        for v in values.iter_mut() {
            *v = 0.0;
        }
    }
}

/// Mean and population standard deviation
pub(crate) fn mean_std(values: &[f32]) -> (f32, f32) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    let var = values.iter().map(|&v| (v - mean) * (v - mean)).sum::<f32>() / n;
    (mean, var.sqrt())
}

/// `1 - min(std / mean, 1)`: 1 for perfectly even values, 0 for erratic ones
pub(crate) fn consistency(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let (mean, std) = mean_std(values);
    1.0 - (std / (mean + 1e-6)).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consistency() {
        assert!((consistency(&[0.5, 0.5, 0.5]) - 1.0).abs() < 1e-4);
        assert_eq!(consistency(&[]), 0.0);
        assert!(consistency(&[0.0, 1.0, 0.0, 1.0]) < 0.1);
    }

    #[test]
    fn test_sample_at_skips_out_of_range() {
        let env = OnsetEnvelope {
            values: vec![0.1, 0.2, 0.3],
            frame_rate: 10.0,
        };
        assert_eq!(env.sample_at(&[0, 2, 7]), vec![0.1, 0.3]);
        assert!((env.duration_seconds() - 0.3).abs() < 1e-6);
    }
}
