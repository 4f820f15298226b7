//! Spectral front-end
//!
//! One magnitude transform per buffer, shared by every downstream feature:
//! - STFT with a reduced-size retry
//! - Median-filter harmonic/percussive separation
//! - Tempo window selection and the cached [`context::AnalysisContext`]

pub mod context;
pub mod hpss;
pub mod stft;
