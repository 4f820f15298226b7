//! Feature extraction modules
//!
//! This module contains all feature extraction algorithms:
//! - Spectral front-end (STFT, harmonic/percussive split)
//! - Onset envelope, periodicity and beat tracking
//! - Tempo candidates and correction passes
//! - Chroma extraction and key detection
//! - Perceptual descriptors

pub mod beat_tracking;
pub mod chroma;
pub mod descriptors;
pub mod key;
pub mod onset;
pub mod period;
pub mod spectral;
pub mod tempo;
