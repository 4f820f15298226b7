//! Spectral-peak chroma extraction
//!
//! Each frame contributes its local magnitude maxima between 100 Hz and 5 kHz. A peak's
//! frequency is refined by parabolic interpolation over its neighbours, folded onto the
//! nearest pitch class, and weighted by its squared magnitude. Frames are then scaled to
//! a maximum of 1 so loud passages do not outvote quiet ones.
//!
//! # Reference
//!
//! Gómez, E. (2006). *Tonal Description of Music Audio Signals*. PhD thesis,
//! Universitat Pompeu Fabra (harmonic pitch-class profiles).

use crate::features::spectral::stft::Spectrogram;

/// Lowest peak frequency considered, in Hz
pub const MIN_PEAK_HZ: f32 = 100.0;

/// Highest peak frequency considered, in Hz
pub const MAX_PEAK_HZ: f32 = 5000.0;

/// Peaks below this fraction of the frame maximum (over all bins) are ignored
const RELATIVE_PEAK_FLOOR: f32 = 0.05;

/// Frames whose loudest bin is below this are treated as silent
const SILENT_FRAME: f32 = 1e-6;

/// A4 reference frequency
const A4_HZ: f32 = 440.0;

/// Extract one 12-bin chroma vector per spectrogram frame
///
/// Index 0 is C. Silent frames yield all zeros.
///
/// # Arguments
///
/// * `spec` - Magnitude spectrogram (normally the harmonic component)
///
/// # Returns
///
/// Frame-major chroma, each frame max-normalized
///
/// # Example
///
/// ```no_run
/// use fingerprint_dsp::features::chroma::extractor::extract_chroma;
/// use fingerprint_dsp::features::spectral::stft::stft_magnitude;
///
/// let samples = vec![0.0f32; 22050 * 5];
/// let spec = stft_magnitude(&samples, 22050, 2048, 512)?;
/// let chroma = extract_chroma(&spec);
/// assert_eq!(chroma.len(), spec.n_frames());
/// # Ok::<(), fingerprint_dsp::AnalysisError>(())
/// ```
pub fn extract_chroma(spec: &Spectrogram) -> Vec<[f32; 12]> {
    let bin_hz = spec.bin_frequency(1.0);
    if bin_hz <= 0.0 {
        return vec![[0.0; 12]; spec.n_frames()];
    }
    let lo = ((MIN_PEAK_HZ / bin_hz).floor() as usize).max(1);
    let hi = ((MAX_PEAK_HZ / bin_hz).ceil() as usize).min(spec.n_bins().saturating_sub(2));

    log::debug!(
        "Extracting chroma from {} frames (bins {}..={})",
        spec.n_frames(),
        lo,
        hi
    );

    spec.frames
        .iter()
        .map(|frame| frame_chroma(frame, lo, hi, bin_hz))
        .collect()
}

fn frame_chroma(frame: &[f32], lo: usize, hi: usize, bin_hz: f32) -> [f32; 12] {
    let mut chroma = [0.0f32; 12];
    if lo >= hi || hi + 1 >= frame.len() {
        return chroma;
    }
    let frame_max = frame.iter().copied().fold(0.0f32, f32::max);
    if frame_max <= SILENT_FRAME {
        return chroma;
    }
    let floor = frame_max * RELATIVE_PEAK_FLOOR;

    for k in lo..=hi {
        let (left, mag, right) = (frame[k - 1], frame[k], frame[k + 1]);
        if mag < floor || mag <= left || mag < right {
            continue;
        }
        let denom = left - 2.0 * mag + right;
        let offset = if denom.abs() > 1e-12 {
            (0.5 * (left - right) / denom).clamp(-0.5, 0.5)
        } else {
            0.0
        };
        let freq = (k as f32 + offset) * bin_hz;
        if !(MIN_PEAK_HZ..=MAX_PEAK_HZ).contains(&freq) {
            continue;
        }
        chroma[pitch_class(freq)] += mag * mag;
    }

    let max = chroma.iter().copied().fold(0.0f32, f32::max);
    if max > 0.0 {
        for c in chroma.iter_mut() {
            *c /= max;
        }
    }
    chroma
}

/// Nearest pitch class of `freq` (0 = C)
pub fn pitch_class(freq: f32) -> usize {
    let midi = 69.0 + 12.0 * (freq / A4_HZ).log2();
    (midi.round() as i64).rem_euclid(12) as usize
}
