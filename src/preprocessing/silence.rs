//! Lead-in trimming and frame-level silence measures
//!
//! The front-end drops a fixed lead-in before analysis (intros and encoder padding are
//! rarely representative). Frame RMS in decibels is shared with the loudness
//! descriptors.

/// Numerical floor added before taking logarithms
const AMPLITUDE_FLOOR: f32 = 1e-12;

/// Frames more than this far below the loudest frame are clipped to it
const TOP_DB: f32 = 80.0;

/// Drop the first `trim_seconds` of audio
///
/// Buffers shorter than twice the trim are returned untouched so that very short inputs
/// keep all of their samples.
pub fn trim_lead_in(samples: &[f32], sample_rate: u32, trim_seconds: f32) -> &[f32] {
    let trim = (trim_seconds.max(0.0) * sample_rate as f32) as usize;
    if trim == 0 || samples.len() < trim * 2 {
        return samples;
    }
    log::debug!("Trimming {} lead-in samples", trim);
    &samples[trim..]
}

/// Frame-wise RMS with the given frame and hop length
///
/// Signals shorter than one frame produce a single frame over the whole signal.
pub fn frame_rms(samples: &[f32], frame_size: usize, hop_size: usize) -> Vec<f32> {
    if samples.is_empty() || frame_size == 0 || hop_size == 0 {
        return vec![];
    }
    if samples.len() <= frame_size {
        return vec![rms(samples)];
    }
    let n_frames = 1 + (samples.len() - frame_size) / hop_size;
    (0..n_frames)
        .map(|i| rms(&samples[i * hop_size..i * hop_size + frame_size]))
        .collect()
}

fn rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    (frame.iter().map(|&x| x * x).sum::<f32>() / frame.len() as f32).sqrt()
}

/// Convert RMS values to dB relative to full scale
pub fn to_db(rms_values: &[f32]) -> Vec<f32> {
    rms_values
        .iter()
        .map(|&r| 20.0 * (r + AMPLITUDE_FLOOR).log10())
        .collect()
}

/// Convert RMS values to dB relative to the loudest frame, clipped at -80 dB
///
/// Returns `None` for digital silence (no frame above the amplitude floor).
pub fn to_relative_db(rms_values: &[f32]) -> Option<Vec<f32>> {
    let peak = rms_values.iter().copied().fold(0.0f32, f32::max);
    if peak <= 1e-9 {
        return None;
    }
    Some(
        rms_values
            .iter()
            .map(|&r| (20.0 * ((r + AMPLITUDE_FLOOR) / (peak + AMPLITUDE_FLOOR)).log10()).max(-TOP_DB))
            .collect(),
    )
}

/// Fraction of frames quieter than `threshold_db` relative to the loudest frame
///
/// Empty input and digital silence count as fully silent.
pub fn silence_ratio(relative_db: Option<&[f32]>, threshold_db: f32) -> f32 {
    match relative_db {
        Some(db) if !db.is_empty() => {
            db.iter().filter(|&&v| v < threshold_db).count() as f32 / db.len() as f32
        }
        _ => 1.0,
    }
}
