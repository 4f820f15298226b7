//! Period estimation modules
//!
//! Turn the onset envelope into raw tempo evidence using:
//! - Autocorrelation (onset periodicity, prior-weighted tempo, pulse clarity)
//! - FFT tempogram (pulse-derived tempo)

pub mod autocorrelation;
pub mod tempogram_fft;
