//! Autocorrelation-based tempo estimation
//!
//! Finds periodicity in the onset-strength envelope using FFT-accelerated
//! autocorrelation. Two estimates come out of the same function:
//!
//! - [`periodicity_tempo`]: the strongest autocorrelation peak in the BPM range with no
//!   tempo prior, refined with its 2nd-4th harmonics (the onset-periodicity estimate)
//! - [`prior_tempo`]: the autocorrelation weighted by a log-normal prior around a typical
//!   tempo (the tempo that seeds the beat tracker)
//!
//! plus [`pulse_clarity`], the normalized autocorrelation height at the beat lag.
//!
//! # Algorithm
//!
//! 1. Remove the mean of the envelope
//! 2. Compute autocorrelation using FFT acceleration: `ACF = IFFT(|FFT(signal)|²)`
//! 3. Find local maxima of the ACF between the lags of `max_bpm` and `min_bpm`
//! 4. Refine the peak lag with parabolic interpolation
//! 5. Convert lag to BPM: `BPM = 60 * frame_rate / lag`
//!
//! # Reference
//!
//! Ellis, D. P. W., & Pikrakis, A. (2006). Real-time Beat Induction.
//! *Proceedings of the International Conference on Music Information Retrieval*.

use crate::error::AnalysisError;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

const EPSILON: f32 = 1e-10;

/// Onset-periodicity tempo estimate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeriodEstimate {
    /// Tempo in BPM
    pub bpm: f32,
    /// Refined beat lag in frames
    pub lag: f32,
    /// Normalized ACF height at the lag, in [0, 1]
    pub strength: f32,
}

/// Compute the autocorrelation of `signal` with the mean removed
///
/// Uses the identity `ACF = IFFT(|FFT(signal)|²)` with zero-padding to avoid circular
/// wrap-around. The result has the same length as the input; `acf[0]` is the signal
/// energy.
///
/// # Errors
///
/// Returns `AnalysisError::InvalidInput` for an empty signal
pub fn autocorrelation(signal: &[f32]) -> Result<Vec<f32>, AnalysisError> {
    let n = signal.len();
    if n == 0 {
        return Err(AnalysisError::InvalidInput(
            "Empty signal for autocorrelation".to_string(),
        ));
    }
    let mean = signal.iter().sum::<f32>() / n as f32;

    // FFT size: next power of 2 >= 2*n (for zero-padding)
    let fft_size = (2 * n).next_power_of_two();

    let mut fft_input: Vec<Complex<f32>> =
        signal.iter().map(|&x| Complex::new(x - mean, 0.0)).collect();
    fft_input.resize(fft_size, Complex::new(0.0, 0.0));

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(fft_size);
    fft.process(&mut fft_input);

    for x in &mut fft_input {
        *x = *x * x.conj();
    }

    let ifft = planner.plan_fft_inverse(fft_size);
    ifft.process(&mut fft_input);

    let scale = 1.0 / (fft_size as f32);
    Ok(fft_input[..n].iter().map(|x| x.re * scale).collect())
}

/// Lag search range `[lo, hi]` for a BPM range, capped at half the envelope
fn lag_range(n: usize, frame_rate: f32, min_bpm: f32, max_bpm: f32) -> Option<(usize, usize)> {
    let lo = ((60.0 * frame_rate / max_bpm).floor() as usize).max(1);
    let hi = ((60.0 * frame_rate / min_bpm).ceil() as usize).min(n / 2);
    (hi > lo + 1).then_some((lo, hi))
}

/// Parabolic interpolation of a peak at `idx`; returns the fractional lag
fn parabolic_peak(values: &[f32], idx: usize) -> f32 {
    if idx == 0 || idx + 1 >= values.len() {
        return idx as f32;
    }
    let (a, b, c) = (values[idx - 1], values[idx], values[idx + 1]);
    let denom = a - 2.0 * b + c;
    if denom.abs() < EPSILON {
        return idx as f32;
    }
    let offset = (0.5 * (a - c) / denom).clamp(-0.5, 0.5);
    idx as f32 + offset
}

fn local_maxima(acf: &[f32], lo: usize, hi: usize) -> Vec<usize> {
    (lo.max(1)..=hi.min(acf.len().saturating_sub(2)))
        .filter(|&i| acf[i] > acf[i - 1] && acf[i] >= acf[i + 1] && acf[i] > 0.0)
        .collect()
}

/// Strongest autocorrelation periodicity in `[min_bpm, max_bpm]`
///
/// The peak lag is refined with parabolic interpolation and then averaged with the lags
/// implied by its 2nd-4th multiples (each divided by its multiple), weighted by ACF
/// height. Multiples beyond half the envelope are ignored.
///
/// # Arguments
///
/// * `envelope` - Onset-strength envelope
/// * `frame_rate` - Envelope frames per second
/// * `min_bpm` - Slowest tempo considered
/// * `max_bpm` - Fastest tempo considered
///
/// # Returns
///
/// `None` for silent or aperiodic envelopes
pub fn periodicity_tempo(
    envelope: &[f32],
    frame_rate: f32,
    min_bpm: f32,
    max_bpm: f32,
) -> Option<PeriodEstimate> {
    let acf = autocorrelation(envelope).ok()?;
    if acf[0] <= EPSILON {
        return None;
    }
    let (lo, hi) = lag_range(envelope.len(), frame_rate, min_bpm, max_bpm)?;
    let best = local_maxima(&acf, lo, hi)
        .into_iter()
        .max_by(|&a, &b| acf[a].total_cmp(&acf[b]))?;

    let base_lag = parabolic_peak(&acf, best);
    let mut weighted = base_lag * acf[best];
    let mut weight = acf[best];

    for k in 2..=4usize {
        let target = base_lag * k as f32;
        let centre = target.round() as usize;
        if centre + 2 >= envelope.len() / 2 {
            break;
        }
        let peak = (centre.saturating_sub(2)..=centre + 2)
            .max_by(|&a, &b| acf[a].total_cmp(&acf[b]))
            .unwrap_or(centre);
        if acf[peak] <= 0.0 {
            continue;
        }
        let lag_k = parabolic_peak(&acf, peak) / k as f32;
        // Reject multiples that drifted to a different periodicity
        if (lag_k - base_lag).abs() > 0.5 {
            continue;
        }
        weighted += lag_k * acf[peak];
        weight += acf[peak];
    }

    let lag = weighted / weight;
    let bpm = 60.0 * frame_rate / lag;
    let strength = (acf[best] / acf[0]).clamp(0.0, 1.0);

    log::debug!(
        "Periodicity tempo: lag={:.2} frames -> {:.2} BPM (strength={:.3})",
        lag,
        bpm,
        strength
    );

    Some(PeriodEstimate { bpm, lag, strength })
}

/// Tempo of the ACF peak after weighting by a log-normal prior around `prior_bpm`
///
/// The prior has a standard deviation of one octave, so `prior_bpm / 2` and
/// `prior_bpm * 2` are each weighted by `exp(-0.5)`.
pub fn prior_tempo(
    envelope: &[f32],
    frame_rate: f32,
    prior_bpm: f32,
    min_bpm: f32,
    max_bpm: f32,
) -> Option<f32> {
    let acf = autocorrelation(envelope).ok()?;
    if acf[0] <= EPSILON {
        return None;
    }
    let (lo, hi) = lag_range(envelope.len(), frame_rate, min_bpm, max_bpm)?;

    let weighted: Vec<f32> = acf
        .iter()
        .enumerate()
        .map(|(lag, &v)| {
            if lag == 0 {
                return 0.0;
            }
            let bpm = 60.0 * frame_rate / lag as f32;
            let octaves = (bpm / prior_bpm).log2();
            v.max(0.0) * (-0.5 * octaves * octaves).exp()
        })
        .collect();

    let best = local_maxima(&weighted, lo, hi)
        .into_iter()
        .max_by(|&a, &b| weighted[a].total_cmp(&weighted[b]))?;
    let lag = parabolic_peak(&weighted, best);
    Some(60.0 * frame_rate / lag)
}

/// Normalized ACF height at `lag` frames: `ACF[lag] / ACF[0]`, clamped to [0, 1]
pub fn pulse_clarity(envelope: &[f32], lag: f32) -> f32 {
    let acf = match autocorrelation(envelope) {
        Ok(acf) => acf,
        Err(_) => return 0.0,
    };
    if acf[0] <= EPSILON || lag < 1.0 {
        return 0.0;
    }
    let i = lag.floor() as usize;
    if i + 1 >= acf.len() {
        return 0.0;
    }
    let frac = lag - i as f32;
    let value = acf[i] * (1.0 - frac) + acf[i + 1] * frac;
    (value / acf[0]).clamp(0.0, 1.0)
}
