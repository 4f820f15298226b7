//! Whole-track analysis pipeline
//!
//! Runs the front-end, tempo, key, descriptor and calibration stages on one buffer, then
//! hands long tracks to chunk consensus. Every stage is timed into the result metadata.
//!
//! # Example
//!
//! ```no_run
//! use fingerprint_dsp::analysis::pipeline::Analyzer;
//! use fingerprint_dsp::calibration::CalibrationSnapshot;
//! use fingerprint_dsp::config::AnalysisConfig;
//! use fingerprint_dsp::io::audio_buffer::AudioBuffer;
//! use std::sync::Arc;
//!
//! let config = AnalysisConfig::default();
//! let analyzer = Analyzer::new(&config, Arc::new(CalibrationSnapshot::empty()));
//! let buffer = AudioBuffer::new(vec![0.0f32; 44100 * 30], 44100);
//! let result = analyzer.analyze(&buffer)?;
//! println!("{:.1} BPM, {}", result.bpm, result.key_label);
//! # Ok::<(), fingerprint_dsp::AnalysisError>(())
//! ```

use super::chunks::{merge_consensus, run_chunks};
use super::metadata::StageTimer;
use super::result::{AnalysisFlag, AnalysisResult};
use crate::calibration::CalibrationSnapshot;
use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::features::beat_tracking::time_signature::detect_time_signature;
use crate::features::descriptors::compute_descriptors;
use crate::features::key::{detect_key, TonalEstimator};
use crate::features::spectral::context::AnalysisContext;
use crate::features::tempo::estimate_tempo;
use crate::io::audio_buffer::AudioBuffer;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative wall-clock budget, checked between stages and chunk windows
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    /// Budget of `seconds` from now; `None` for a non-positive or non-finite budget
    pub fn after_seconds(seconds: f32) -> Option<Self> {
        if !seconds.is_finite() || seconds <= 0.0 {
            return None;
        }
        Some(Self {
            started: Instant::now(),
            budget: Duration::from_secs_f32(seconds),
        })
    }

    /// Budget in seconds
    pub fn budget_seconds(&self) -> f32 {
        self.budget.as_secs_f32()
    }

    /// True once the budget is spent
    pub fn expired(&self) -> bool {
        self.started.elapsed() >= self.budget
    }

    /// # Errors
    ///
    /// Returns `AnalysisError::Timeout` once the budget is spent
    pub fn check(&self) -> Result<(), AnalysisError> {
        if self.expired() {
            Err(AnalysisError::Timeout {
                seconds: self.budget_seconds(),
            })
        } else {
            Ok(())
        }
    }
}

/// One configured analysis: configuration, the calibration snapshot captured for it and
/// an optional external key estimator
pub struct Analyzer<'a> {
    config: &'a AnalysisConfig,
    calibration: Arc<CalibrationSnapshot>,
    estimator: Option<&'a dyn TonalEstimator>,
}

impl<'a> Analyzer<'a> {
    /// Analyzer without an external key estimator
    pub fn new(config: &'a AnalysisConfig, calibration: Arc<CalibrationSnapshot>) -> Self {
        Self {
            config,
            calibration,
            estimator: None,
        }
    }

    /// Blend `estimator` into key detection
    pub fn with_estimator(mut self, estimator: &'a dyn TonalEstimator) -> Self {
        self.estimator = Some(estimator);
        self
    }

    /// Analyze a whole track
    ///
    /// Silent, empty or zero-rate buffers yield a zero-confidence result. Tracks long
    /// enough for chunk consensus are re-analyzed window by window and the consensus is
    /// merged into the whole-track answer.
    ///
    /// # Errors
    ///
    /// Returns `AnalysisError::InvalidInput` for an invalid configuration and
    /// `AnalysisError::Timeout` when `analysis_timeout_seconds` runs out; partial chunk
    /// results are discarded in that case.
    pub fn analyze(&self, buffer: &AudioBuffer) -> Result<AnalysisResult, AnalysisError> {
        self.config.validate()?;
        let started = Instant::now();
        let deadline = Deadline::after_seconds(self.config.analysis_timeout_seconds);
        let mut timer = StageTimer::new();

        log::debug!(
            "Analyzing {} samples at {} Hz",
            buffer.len(),
            buffer.sample_rate()
        );

        let ctx = match timer.track("front_end", || AnalysisContext::build(buffer, self.config)) {
            Ok(ctx) => ctx,
            Err(e) => {
                log::warn!("Returning a zero-confidence result: {}", e);
                let mut result =
                    AnalysisResult::silent(buffer.duration_seconds(), buffer.sample_rate());
                finish(&mut result, &timer, started, &self.calibration);
                return Ok(result);
            }
        };

        let mut result = self.decide(&ctx, &mut timer, deadline.as_ref())?;

        if self.config.enable_chunks && !result.has_flag(AnalysisFlag::SilentInput) {
            let window_config = AnalysisConfig {
                trim_seconds: 0.0,
                max_analysis_seconds: None,
                enable_chunks: false,
                short_clip_corrections: false,
                ..self.config.clone()
            };
            let window_analyzer = Analyzer {
                config: &window_config,
                calibration: Arc::clone(&self.calibration),
                estimator: self.estimator,
            };
            let bpm_hint = (result.bpm > 0.0).then_some(result.bpm);
            let chunks = timer.track("chunks", || {
                run_chunks(
                    &ctx.samples,
                    ctx.sample_rate,
                    bpm_hint,
                    &self.config.chunks,
                    deadline.as_ref(),
                    |window| window_analyzer.analyze_window(window),
                )
            })?;
            if let Some(chunks) = chunks {
                if let Some(consensus) = &chunks.consensus {
                    merge_consensus(&mut result, consensus);
                }
                if chunks.truncated {
                    result.metadata.flag(AnalysisFlag::ChunksTruncated);
                }
                result.chunks = Some(chunks);
            }
        }

        if let Some(deadline) = &deadline {
            deadline.check()?;
        }
        finish(&mut result, &timer, started, &self.calibration);
        log::debug!(
            "Analysis done: {:.2} BPM ({:.2}), {} ({:.2}) in {:.1}ms",
            result.bpm,
            result.bpm_confidence,
            result.key_label,
            result.key_confidence,
            result.metadata.processing_time_ms
        );
        Ok(result)
    }

    /// Analyze one window without chunk consensus
    ///
    /// Never fails: front-end and tempo errors produce a zero-confidence result.
    pub fn analyze_window(&self, buffer: &AudioBuffer) -> AnalysisResult {
        let started = Instant::now();
        let mut timer = StageTimer::new();
        let outcome = timer
            .track("front_end", || AnalysisContext::build(buffer, self.config))
            .and_then(|ctx| self.decide(&ctx, &mut timer, None));
        let mut result = match outcome {
            Ok(result) => result,
            Err(e) => {
                log::warn!("Window analysis failed: {}", e);
                AnalysisResult::silent(buffer.duration_seconds(), buffer.sample_rate())
            }
        };
        finish(&mut result, &timer, started, &self.calibration);
        result
    }

    fn decide(
        &self,
        ctx: &AnalysisContext,
        timer: &mut StageTimer,
        deadline: Option<&Deadline>,
    ) -> Result<AnalysisResult, AnalysisError> {
        let check = || deadline.map_or(Ok(()), Deadline::check);
        let config = self.config;

        let tempo = match timer.track("tempo", || estimate_tempo(ctx, config)) {
            Ok(tempo) => tempo,
            Err(e) => {
                log::warn!("Tempo estimation failed, returning a zero-confidence result: {}", e);
                return Ok(AnalysisResult::silent(ctx.duration_seconds(), ctx.sample_rate));
            }
        };
        let time_signature = timer.track("time_signature", || {
            detect_time_signature(&tempo.envelope.sample_at(&tempo.beats))
        });
        check()?;

        let key = timer.track("key", || detect_key(ctx, config, self.estimator));
        check()?;

        let descriptors = timer.track("descriptors", || {
            compute_descriptors(ctx, &tempo, key.key, &key.chroma, config)
        });

        let mut result = AnalysisResult::silent(ctx.duration_seconds(), ctx.sample_rate);
        result.metadata.flags.clear();
        result.bpm = tempo.bpm;
        result.bpm_confidence = tempo.confidence;
        result.time_signature = time_signature;
        result.set_key(key.key);
        result.key_confidence = key.confidence;
        result.key_source = key.key_source.clone();
        result.descriptors = descriptors;
        result.tempo_diagnostics = tempo.diagnostics;
        result.key_details = key;
        result.metadata.is_short_clip = ctx.params.is_short_clip;
        result.metadata.full_transform_skipped = ctx.full_transform_skipped;

        if ctx.params.is_short_clip {
            result.metadata.flag(AnalysisFlag::ShortClip);
        }
        if ctx.spectrum.is_none() {
            result.metadata.flag(AnalysisFlag::SpectralFallback);
        }
        if result.bpm <= 0.0 && result.key_confidence <= 0.0 {
            result.metadata.flag(AnalysisFlag::SilentInput);
            return Ok(result);
        }

        let calibration = &self.calibration;
        let applied = timer.track("calibration", || calibration.apply(&mut result));
        for step in &applied {
            log::info!("Calibration step applied: {}", step);
        }
        result.calibration_applied = applied;
        Ok(result)
    }
}

fn finish(
    result: &mut AnalysisResult,
    timer: &StageTimer,
    started: Instant,
    calibration: &CalibrationSnapshot,
) {
    timer.log("Analysis");
    result.metadata.stage_timings_ms = timer.snapshot();
    result.metadata.processing_time_ms = started.elapsed().as_secs_f32() * 1000.0;
    result.metadata.calibration_version = calibration.version_label();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::beat_tracking::time_signature::TimeSignature;

    fn kick_track(bpm: f32, seconds: f32, sample_rate: u32) -> Vec<f32> {
        let n = (seconds * sample_rate as f32) as usize;
        let period = (60.0 / bpm * sample_rate as f32) as usize;
        let decay = (0.03 * sample_rate as f32) as usize;
        let mut seed = 777u32;
        (0..n)
            .map(|i| {
                seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
                let noise = ((seed >> 16) as f32 / 32768.0) - 1.0;
                let pos = i % period;
                if pos < decay {
                    0.6 * noise * (1.0 - pos as f32 / decay as f32)
                } else {
                    0.0
                }
            })
            .collect()
    }

    fn analyzer(config: &AnalysisConfig) -> Analyzer<'_> {
        Analyzer::new(config, Arc::new(CalibrationSnapshot::empty()))
    }

    #[test]
    fn test_deadline() {
        assert!(Deadline::after_seconds(0.0).is_none());
        assert!(Deadline::after_seconds(f32::NAN).is_none());
        let d = Deadline::after_seconds(60.0).unwrap();
        assert!(d.check().is_ok());
        let spent = Deadline {
            started: Instant::now(),
            budget: Duration::ZERO,
        };
        assert_eq!(spent.check(), Err(AnalysisError::Timeout { seconds: 0.0 }));
    }

    #[test]
    fn test_empty_buffer_is_zero_confidence() {
        let config = AnalysisConfig::default();
        let result = analyzer(&config)
            .analyze(&AudioBuffer::new(vec![], 44100))
            .unwrap();
        assert_eq!(result.bpm, 0.0);
        assert_eq!(result.key_confidence, 0.0);
        assert!(result.has_flag(AnalysisFlag::SilentInput));

        let result = analyzer(&config)
            .analyze(&AudioBuffer::new(vec![0.1; 1000], 0))
            .unwrap();
        assert_eq!(result.bpm_confidence, 0.0);
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let config = AnalysisConfig {
            hop_size: 0,
            ..AnalysisConfig::default()
        };
        let err = analyzer(&config)
            .analyze(&AudioBuffer::new(vec![0.0; 22050], 22050))
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidInput(_)));
    }

    #[test]
    fn test_kick_track_preview() {
        let config = AnalysisConfig::default();
        let samples = kick_track(120.0, 20.0, 22050);
        let result = analyzer(&config)
            .analyze(&AudioBuffer::new(samples, 22050))
            .unwrap();
        assert!((result.bpm - 120.0).abs() < 3.0, "got {}", result.bpm);
        assert!(result.has_flag(AnalysisFlag::ShortClip));
        assert!(result.chunks.is_none());
        assert!(result.metadata.stage_timings_ms.contains_key("tempo"));
        assert!(result.metadata.stage_timings_ms.contains_key("front_end"));
        assert!(result.metadata.stage_timings_ms.contains_key("time_signature"));
        // Equal kicks carry no bar accent
        assert_eq!(result.time_signature.signature, TimeSignature::FourFour);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["time_signature"]["signature"], "4/4");
    }

    #[test]
    fn test_window_analysis_never_fails() {
        let config = AnalysisConfig::default();
        let result = analyzer(&config).analyze_window(&AudioBuffer::new(vec![], 22050));
        assert_eq!(result.bpm, 0.0);
        assert!(result.has_flag(AnalysisFlag::SilentInput));
    }
}
