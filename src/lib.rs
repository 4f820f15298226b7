//! # Fingerprint DSP
//!
//! Audio fingerprint engine for music catalogues: tempo, key and perceptual descriptors
//! (energy, danceability, valence, acousticness, loudness) from a mono PCM buffer.
//!
//! ## Features
//!
//! - **Tempo**: onset autocorrelation and tempogram evidence, alias-aware candidate scoring
//!   and an ordered list of correction passes
//! - **Key**: spectral-peak chroma against Krumhansl-Kessler templates, window votes, an
//!   optional external estimator and an ordered list of override rules
//! - **Calibration**: hot-reloadable scaler, key-confusion, ridge and BPM rule files
//! - **Chunk consensus**: long tracks are re-analyzed in windows and aggregated, flagging
//!   modulating keys
//!
//! ## Quick Start
//!
//! ```no_run
//! use fingerprint_dsp::{analyze_audio, AnalysisConfig};
//!
//! // Mono f32 samples in [-1, 1]
//! let samples: Vec<f32> = vec![];
//! let sample_rate = 44100;
//!
//! let result = analyze_audio(&samples, sample_rate, &AnalysisConfig::default())?;
//!
//! println!("BPM: {:.2} (confidence: {:.2})", result.bpm, result.bpm_confidence);
//! println!("Key: {} (confidence: {:.2})", result.key_label, result.key_confidence);
//! # Ok::<(), fingerprint_dsp::AnalysisError>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Audio Input → Front-end → Tempo → Key → Descriptors → Calibration → Chunk consensus → Output
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod analysis;
pub mod calibration;
pub mod config;
pub mod error;
pub mod features;
pub mod io;
pub mod preprocessing;
pub mod worker;

// Re-export main types
pub use analysis::chunks::{ChunkAnalysis, ChunkConsensus, ChunkWindow};
pub use analysis::pipeline::Analyzer;
pub use analysis::result::{AnalysisFlag, AnalysisMetadata, AnalysisResult, Key};
pub use calibration::{CalibrationSnapshot, CalibrationStore};
pub use config::AnalysisConfig;
pub use error::AnalysisError;
pub use features::key::{KeyCandidate, Mode, TonalEstimator, TonalProfile};
pub use io::audio_buffer::AudioBuffer;
pub use worker::{AnalysisPool, WorkerContext};

use std::sync::Arc;

/// Main analysis function
///
/// Analyzes a mono buffer with the process-wide calibration store (refreshed first) and no
/// external key estimator.
///
/// # Arguments
///
/// * `samples` - Mono audio samples, normalized to [-1.0, 1.0]
/// * `sample_rate` - Sample rate in Hz (typically 44100 or 48000)
/// * `config` - Analysis configuration parameters
///
/// # Returns
///
/// `AnalysisResult` with tempo, key, descriptors and metadata. Empty, silent or zero-rate
/// input yields a zero-confidence result.
///
/// # Errors
///
/// Returns `AnalysisError::InvalidInput` for an invalid configuration and
/// `AnalysisError::Timeout` when the analysis exceeds `analysis_timeout_seconds`
///
/// # Example
///
/// ```no_run
/// use fingerprint_dsp::{analyze_audio, AnalysisConfig};
///
/// let samples = vec![0.0f32; 44100 * 30]; // 30 seconds of silence
/// let result = analyze_audio(&samples, 44100, &AnalysisConfig::default())?;
/// assert_eq!(result.bpm, 0.0);
/// # Ok::<(), fingerprint_dsp::AnalysisError>(())
/// ```
pub fn analyze_audio(
    samples: &[f32],
    sample_rate: u32,
    config: &AnalysisConfig,
) -> Result<AnalysisResult, AnalysisError> {
    let store = CalibrationStore::global();
    store.refresh();
    analyze_audio_with(samples, sample_rate, config, store.snapshot(), None)
}

/// Analyze with an explicit calibration snapshot and an optional external key estimator
///
/// # Errors
///
/// Same as [`analyze_audio`]
pub fn analyze_audio_with(
    samples: &[f32],
    sample_rate: u32,
    config: &AnalysisConfig,
    calibration: Arc<CalibrationSnapshot>,
    estimator: Option<&dyn TonalEstimator>,
) -> Result<AnalysisResult, AnalysisError> {
    let buffer = AudioBuffer::new(samples.to_vec(), sample_rate);
    let analyzer = Analyzer::new(config, calibration);
    match estimator {
        Some(estimator) => analyzer.with_estimator(estimator).analyze(&buffer),
        None => analyzer.analyze(&buffer),
    }
}
