//! Energy flux onset envelope
//!
//! Time-domain fallback used when no spectrum is available.
//!
//! Algorithm:
//! 1. Divide audio into overlapping frames (frame_size, hop_size)
//! 2. Compute RMS energy per frame
//! 3. Compute energy derivative (flux): E_flux[n] = max(0, E[n] - E[n-1])
//! 4. Normalize to a maximum of 1
//!
//! # Reference
//!
//! Bello, J. P., Daudet, L., Abdallah, S., Duxbury, C., Davies, M., & Sandler, M. B. (2005).
//! A Tutorial on Onset Detection in Music Signals.
//! *IEEE Transactions on Speech and Audio Processing*, 13(5), 1035-1047.

use super::normalize_max;
use crate::error::AnalysisError;
use crate::preprocessing::silence::frame_rms;

/// Energy flux envelope, one value per frame (the first frame is always 0)
///
/// # Arguments
///
/// * `samples` - Audio samples (typically the percussive component)
/// * `frame_size` - Frame size for analysis (typically 2048)
/// * `hop_size` - Hop size between frames (typically 512)
///
/// # Errors
///
/// Returns `AnalysisError::InvalidInput` if a size is zero
pub fn energy_flux_envelope(
    samples: &[f32],
    frame_size: usize,
    hop_size: usize,
) -> Result<Vec<f32>, AnalysisError> {
    if frame_size == 0 {
        return Err(AnalysisError::InvalidInput(
            "Frame size must be > 0".to_string(),
        ));
    }
    if hop_size == 0 {
        return Err(AnalysisError::InvalidInput(
            "Hop size must be > 0".to_string(),
        ));
    }

    // Short signals get a frame that still yields several values
    let frame = frame_size.min((samples.len() / 4).max(1));
    let energies = frame_rms(samples, frame, hop_size.min(frame));
    if energies.len() < 2 {
        return Ok(vec![0.0; energies.len()]);
    }

    log::debug!(
        "Energy flux envelope: {} samples, frame={}, {} frames",
        samples.len(),
        frame,
        energies.len()
    );

    let mut flux = Vec::with_capacity(energies.len());
    flux.push(0.0);
    for pair in energies.windows(2) {
        flux.push((pair[1] - pair[0]).max(0.0));
    }
    normalize_max(&mut flux);
    Ok(flux)
}
