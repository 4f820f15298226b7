//! Integer-factor decimation to the analysis rate
//!
//! Inputs faster than the analysis rate are reduced by the largest integer factor that
//! keeps the rate at or above the target. A block average over each group of `factor`
//! samples acts as the anti-alias filter; it is crude but more than sufficient for onset
//! envelopes and a chroma band that tops out at 5 kHz.

/// Decimate `samples` towards `target_rate`
///
/// # Returns
///
/// The (possibly unchanged) samples and their new sample rate
///
/// # Example
///
/// ```
/// use fingerprint_dsp::preprocessing::resample::decimate;
///
/// let (out, rate) = decimate(&[1.0; 8], 96000, 22050);
/// assert_eq!(rate, 24000);
/// assert_eq!(out.len(), 2);
/// ```
pub fn decimate(samples: &[f32], sample_rate: u32, target_rate: u32) -> (Vec<f32>, u32) {
    if target_rate == 0 || sample_rate < target_rate * 2 {
        return (samples.to_vec(), sample_rate);
    }
    let factor = (sample_rate / target_rate) as usize;
    let new_rate = sample_rate / factor as u32;

    log::debug!(
        "Decimating {} Hz -> {} Hz (factor {})",
        sample_rate,
        new_rate,
        factor
    );

    let scale = 1.0 / factor as f32;
    let out = samples
        .chunks(factor)
        .map(|block| block.iter().sum::<f32>() * scale)
        .collect();
    (out, new_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimate_common_rates() {
        assert_eq!(decimate(&[0.0; 4], 44100, 22050).1, 22050);
        assert_eq!(decimate(&[0.0; 4], 48000, 22050).1, 24000);
        // Below twice the target: untouched
        let (out, rate) = decimate(&[0.25; 10], 32000, 22050);
        assert_eq!(rate, 32000);
        assert_eq!(out.len(), 10);
    }

    #[test]
    fn test_decimate_block_average() {
        let (out, _) = decimate(&[1.0, 3.0, 2.0, 2.0, 5.0], 44100, 22050);
        assert_eq!(out, vec![2.0, 2.0, 2.5]);
    }
}
