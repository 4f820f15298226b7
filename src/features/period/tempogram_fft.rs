//! FFT-based tempogram for the pulse-derived tempo
//!
//! Applies FFT to the onset envelope and converts frequencies to BPM. The frequency
//! with the highest power is the dominant pulse; it serves as the independent
//! pulse-derived tempo reference during candidate scoring.
//!
//! # Reference
//!
//! Grosche, P., Müller, M., & Serrà, J. (2012). Robust Local Features for Remote Folk Music Identification.
//! *IEEE Transactions on Audio, Speech, and Language Processing*.
//!
//! # Algorithm
//!
//! 1. Remove the mean and apply a Hann window
//! 2. Zero-pad to 4x the next power of two and apply FFT
//! 3. Convert frequency bins to BPM: `BPM = Hz * 60`
//! 4. Filter within BPM range and take the highest-power bin
//!
//! # Example
//!
//! ```no_run
//! use fingerprint_dsp::features::period::tempogram_fft::fft_tempogram;
//!
//! let envelope = vec![0.0f32; 1000];
//! let tempogram = fft_tempogram(&envelope, 43.07, 30.0, 300.0)?;
//! // tempogram is Vec<(f32, f32)> where each pair is (BPM, power)
//! # Ok::<(), fingerprint_dsp::AnalysisError>(())
//! ```

use crate::error::AnalysisError;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

/// Numerical stability epsilon
const EPSILON: f32 = 1e-10;

/// Zero-padding factor on top of the next power of two
const PAD_FACTOR: usize = 4;

/// BPM estimate with confidence from FFT tempogram
#[derive(Debug, Clone)]
pub struct FftTempogramResult {
    /// BPM estimate
    pub bpm: f32,

    /// Confidence score (0.0-1.0) based on peak prominence
    pub confidence: f32,

    /// FFT power at this BPM
    pub power: f32,
}

/// Compute FFT tempogram
///
/// # Arguments
///
/// * `envelope` - Onset envelope (one value per frame)
/// * `frame_rate` - Envelope frames per second
/// * `min_bpm` - Minimum BPM to consider
/// * `max_bpm` - Maximum BPM to consider
///
/// # Returns
///
/// Tempogram as vector of (BPM, power) pairs, sorted by power (highest first)
///
/// # Errors
///
/// Returns `AnalysisError` if:
/// - Envelope is empty
/// - Frame rate is not positive
/// - BPM range is invalid
pub fn fft_tempogram(
    envelope: &[f32],
    frame_rate: f32,
    min_bpm: f32,
    max_bpm: f32,
) -> Result<Vec<(f32, f32)>, AnalysisError> {
    if envelope.is_empty() {
        return Err(AnalysisError::InvalidInput(
            "Onset envelope is empty".to_string(),
        ));
    }

    if frame_rate <= 0.0 {
        return Err(AnalysisError::InvalidInput(
            "Frame rate must be > 0".to_string(),
        ));
    }

    if min_bpm <= 0.0 || max_bpm <= min_bpm {
        return Err(AnalysisError::InvalidInput(format!(
            "Invalid BPM range: min={}, max={}",
            min_bpm, max_bpm
        )));
    }

    log::debug!(
        "Computing FFT tempogram: {} envelope values, frame_rate={:.2} Hz, BPM range=[{:.1}, {:.1}]",
        envelope.len(),
        frame_rate,
        min_bpm,
        max_bpm
    );

    let mean = envelope.iter().copied().sum::<f32>() / envelope.len() as f32;
    let n = envelope.len();
    let fft_size = n.next_power_of_two() * PAD_FACTOR;

    let mut fft_input: Vec<Complex<f32>> = Vec::with_capacity(fft_size);
    for (i, &x) in envelope.iter().enumerate() {
        // Hann window
        let w = if n > 1 {
            let t = 2.0 * std::f32::consts::PI * i as f32 / (n - 1) as f32;
            0.5 * (1.0 - t.cos())
        } else {
            1.0
        };
        fft_input.push(Complex::new((x - mean) * w, 0.0));
    }
    fft_input.resize(fft_size, Complex::new(0.0, 0.0));

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(fft_size);
    fft.process(&mut fft_input);

    let freq_resolution = frame_rate / fft_size as f32;
    let mut tempogram: Vec<(f32, f32)> = fft_input
        .iter()
        .take(fft_size / 2 + 1)
        .enumerate()
        .map(|(bin_idx, x)| (bin_idx as f32 * freq_resolution * 60.0, x.norm_sqr()))
        .filter(|&(bpm, _)| bpm >= min_bpm && bpm <= max_bpm)
        .collect();

    tempogram.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    log::debug!(
        "FFT tempogram: {} BPM candidates, top BPM={:.1} (power={:.6})",
        tempogram.len(),
        tempogram.first().map(|(bpm, _)| *bpm).unwrap_or(0.0),
        tempogram.first().map(|(_, power)| *power).unwrap_or(0.0)
    );

    Ok(tempogram)
}

/// Find best BPM estimate from FFT tempogram
///
/// Confidence is the prominence of the top peak over the best candidate that is not
/// part of the same spectral lobe (more than 2 BPM away).
///
/// # Returns
///
/// Best BPM estimate with confidence, or None if tempogram is empty or has no power
pub fn find_best_bpm_fft(tempogram: &[(f32, f32)]) -> Option<FftTempogramResult> {
    let &(best_bpm, best_power) = tempogram.first()?;
    if best_power <= EPSILON {
        return None;
    }

    let second_power = tempogram
        .iter()
        .find(|(bpm, _)| (bpm - best_bpm).abs() > 2.0)
        .map(|(_, power)| *power);

    let confidence = match second_power {
        Some(second) => ((best_power - second).max(0.0) / best_power).clamp(0.0, 1.0),
        // Only one lobe, moderate confidence
        None => 0.5,
    };

    Some(FftTempogramResult {
        bpm: best_bpm,
        confidence,
        power: best_power,
    })
}

/// Dominant pulse tempo of an onset envelope, or `None` for silence
pub fn pulse_tempo(
    envelope: &[f32],
    frame_rate: f32,
    min_bpm: f32,
    max_bpm: f32,
) -> Option<FftTempogramResult> {
    match fft_tempogram(envelope, frame_rate, min_bpm, max_bpm) {
        Ok(tempogram) => find_best_bpm_fft(&tempogram),
        Err(e) => {
            log::debug!("Pulse tempo unavailable: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fft_tempogram_periodic() {
        // Novelty curve with a spike every beat at 120 BPM
        let frame_rate = 44100.0 / 512.0;
        let period = (frame_rate / 2.0) as usize;
        let mut envelope = vec![0.0f32; 500];
        for (i, val) in envelope.iter_mut().enumerate() {
            if i % period == 0 {
                *val = 1.0;
            }
        }

        let tempogram = fft_tempogram(&envelope, frame_rate, 100.0, 140.0).unwrap();
        let best = find_best_bpm_fft(&tempogram).unwrap();
        // Integer period of 43 frames -> 120.2 BPM
        assert!(
            best.bpm >= 115.0 && best.bpm <= 125.0,
            "Expected BPM around 120, got {:.1}",
            best.bpm
        );
    }

    #[test]
    fn test_fft_tempogram_empty() {
        assert!(fft_tempogram(&[], 43.0, 40.0, 240.0).is_err());
    }

    #[test]
    fn test_fft_tempogram_invalid_params() {
        let envelope = vec![0.5f32; 100];
        assert!(fft_tempogram(&envelope, 0.0, 40.0, 240.0).is_err());
        assert!(fft_tempogram(&envelope, 43.0, 240.0, 40.0).is_err());
    }

    #[test]
    fn test_find_best_bpm_fft() {
        let tempogram = vec![(120.0, 0.9), (60.0, 0.3), (180.0, 0.2)];

        let result = find_best_bpm_fft(&tempogram).unwrap();

        assert_eq!(result.bpm, 120.0);
        assert_eq!(result.power, 0.9);
        // (best - second) / best = (0.9 - 0.3) / 0.9
        assert!((result.confidence - (2.0 / 3.0)).abs() < 1e-6);
    }

    #[test]
    fn test_pulse_tempo_silence() {
        assert!(find_best_bpm_fft(&[]).is_none());
        assert!(pulse_tempo(&[0.0; 256], 43.0, 30.0, 300.0).is_none());
    }
}
