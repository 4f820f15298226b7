//! Key detection algorithm
//!
//! Builds the chroma profile of the harmonic component, scores it against the 24
//! Krumhansl-Kessler templates, gathers window votes and external candidates, and runs
//! the ordered override rules to reach the final root, mode and confidence.
//!
//! # Example
//!
//! ```no_run
//! use fingerprint_dsp::config::AnalysisConfig;
//! use fingerprint_dsp::features::key::detect_key;
//! use fingerprint_dsp::features::spectral::context::AnalysisContext;
//! use fingerprint_dsp::io::audio_buffer::AudioBuffer;
//!
//! let config = AnalysisConfig::default();
//! let buffer = AudioBuffer::new(vec![0.0f32; 22050 * 30], 22050);
//! let ctx = AnalysisContext::build(&buffer, &config)?;
//! let key = detect_key(&ctx, &config, None);
//! println!("{} ({:.2}, {})", key.key.label(), key.confidence, key.key_source);
//! # Ok::<(), fingerprint_dsp::AnalysisError>(())
//! ```

use super::consensus::{window_consensus, WindowConsensus};
use super::rules::{apply_rules, mode_bias_value, KeyEvidence};
use super::templates::{score_templates, TemplateScore};
use super::{KeyCandidate, TonalEstimator, TonalProfile};
use crate::analysis::result::Key;
use crate::config::AnalysisConfig;
use crate::features::chroma::ChromaTimeline;
use crate::features::spectral::context::AnalysisContext;
use serde::{Deserialize, Serialize};

/// Final key answer with the evidence behind it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyEstimate {
    /// Final key
    pub key: Key,
    /// Confidence in [0, 1]
    pub confidence: f32,
    /// Tag of the rule that produced the answer (`template` when none fired)
    pub key_source: String,
    /// Rules that fired, in order
    pub rules_fired: Vec<String>,
    /// Track chroma profile, max-normalized, index 0 = C
    pub chroma: [f32; 12],
    /// All 24 template scores, best first
    pub scores: Vec<TemplateScore>,
    /// Window votes, when they ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_consensus: Option<WindowConsensus>,
    /// External candidates that were available
    pub external: Vec<KeyCandidate>,
    /// Best template score minus the runner-up's
    pub runner_up_gap: f32,
    /// Third/sixth mode bias of the final root
    pub mode_bias: f32,
}

impl KeyEstimate {
    /// Zero-confidence default answer (C major)
    pub fn silent() -> Self {
        Self {
            key: Key::Major(0),
            confidence: 0.0,
            key_source: "template".to_string(),
            rules_fired: Vec::new(),
            chroma: [0.0; 12],
            scores: Vec::new(),
            window_consensus: None,
            external: Vec::new(),
            runner_up_gap: 0.0,
            mode_bias: 0.0,
        }
    }
}

/// Detect the key of the analysis window
///
/// # Arguments
///
/// * `ctx` - Front-end context
/// * `config` - Analysis configuration (key thresholds)
/// * `estimator` - Optional external tonal estimator; its errors are logged and absorbed
///
/// # Returns
///
/// The final key. Buffers without chroma energy return [`KeyEstimate::silent`].
pub fn detect_key(
    ctx: &AnalysisContext,
    config: &AnalysisConfig,
    estimator: Option<&dyn TonalEstimator>,
) -> KeyEstimate {
    let timeline = ChromaTimeline::from_context(ctx);
    let chroma = timeline.profile();
    if chroma.iter().all(|&c| c <= 0.0) {
        log::debug!("No chroma energy, key defaults to C major with confidence 0");
        return KeyEstimate::silent();
    }

    let thresholds = &config.key;
    let scores = score_templates(&chroma);
    let consensus = if ctx.params.use_window_consensus {
        window_consensus(&timeline.windows(thresholds.window_seconds, thresholds.window_hop_seconds))
    } else {
        log::debug!("Short clip: trusting the whole-window template over window votes");
        None
    };

    let standard = estimator.and_then(|e| external_candidate(e, ctx, TonalProfile::Standard));
    let percussive = estimator.and_then(|e| external_candidate(e, ctx, TonalProfile::Percussive));

    let evidence = KeyEvidence {
        chroma: &chroma,
        scores: &scores,
        consensus: consensus.as_ref(),
        external_standard: standard.as_ref(),
        external_percussive: percussive.as_ref(),
        is_short_clip: ctx.params.is_short_clip,
        thresholds,
    };
    let fallback = evidence.fallback();
    log::debug!(
        "Template fallback {}:{} (score {:.3})",
        fallback.root,
        fallback.mode.as_str(),
        fallback.score
    );

    let state = apply_rules(&evidence);
    let key = Key::new(state.root, state.mode);
    log::debug!(
        "Final key {} (confidence {:.2}, source {})",
        key.label(),
        state.confidence,
        state.source
    );

    KeyEstimate {
        key,
        confidence: state.confidence,
        key_source: state.source,
        rules_fired: state.fired.iter().map(|s| s.to_string()).collect(),
        chroma,
        runner_up_gap: scores
            .get(1)
            .map_or(0.0, |r| (fallback.score - r.score).max(0.0)),
        mode_bias: mode_bias_value(&chroma, state.root),
        scores,
        window_consensus: consensus,
        external: standard.into_iter().chain(percussive).collect(),
    }
}

fn external_candidate(
    estimator: &dyn TonalEstimator,
    ctx: &AnalysisContext,
    profile: TonalProfile,
) -> Option<KeyCandidate> {
    match estimator.estimate(ctx.window_samples(), ctx.sample_rate, profile) {
        Ok(candidate) => {
            let source = candidate.source.clone();
            Some(KeyCandidate::new(
                candidate.root,
                candidate.mode,
                candidate.confidence,
                source,
            ))
        }
        Err(e) => {
            log::warn!("External key estimator failed for {:?}: {}", profile, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnalysisError;
    use crate::features::key::Mode;
    use crate::io::audio_buffer::AudioBuffer;

    fn chord(freqs: &[(f32, f32)], sample_rate: u32, seconds: f32) -> Vec<f32> {
        let n = (sample_rate as f32 * seconds) as usize;
        (0..n)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                freqs
                    .iter()
                    .map(|(f, a)| a * (2.0 * std::f32::consts::PI * f * t).sin())
                    .sum::<f32>()
                    * 0.25
            })
            .collect()
    }

    struct Failing;

    impl TonalEstimator for Failing {
        fn estimate(&self, _: &[f32], _: u32, _: TonalProfile) -> Result<KeyCandidate, AnalysisError> {
            Err(AnalysisError::ProcessingError("estimator offline".to_string()))
        }
    }

    struct Fixed(KeyCandidate);

    impl TonalEstimator for Fixed {
        fn estimate(&self, _: &[f32], _: u32, _: TonalProfile) -> Result<KeyCandidate, AnalysisError> {
            Ok(self.0.clone())
        }
    }

    fn c_major_context() -> AnalysisContext {
        let samples = chord(&[(261.63, 1.0), (329.63, 0.7), (392.0, 0.8)], 22050, 12.0);
        let config = AnalysisConfig::default();
        AnalysisContext::build(&AudioBuffer::new(samples, 22050), &config).unwrap()
    }

    #[test]
    fn test_c_major_chord() {
        let ctx = c_major_context();
        let key = detect_key(&ctx, &AnalysisConfig::default(), None);
        assert_eq!(key.key, Key::Major(0), "got {} via {}", key.key.label(), key.key_source);
        assert!(key.confidence > 0.5);
        assert_eq!(key.scores.len(), 24);
        assert!(key.window_consensus.is_none());
    }

    #[test]
    fn test_estimator_failure_is_absorbed() {
        let ctx = c_major_context();
        let key = detect_key(&ctx, &AnalysisConfig::default(), Some(&Failing));
        assert_eq!(key.key, Key::Major(0));
        assert!(key.external.is_empty());
    }

    #[test]
    fn test_confident_external_candidate_overrides() {
        let ctx = c_major_context();
        let estimator = Fixed(KeyCandidate::new(2, Mode::Minor, 0.9, "ensemble"));
        let key = detect_key(&ctx, &AnalysisConfig::default(), Some(&estimator));
        assert_eq!(key.key, Key::Minor(2));
        assert!(key.confidence >= 0.9 - 1e-6);
        assert_eq!(key.external.len(), 2);
    }

    #[test]
    fn test_silence() {
        let config = AnalysisConfig::default();
        let ctx = AnalysisContext::build(&AudioBuffer::new(vec![0.0; 22050 * 10], 22050), &config)
            .unwrap();
        let key = detect_key(&ctx, &config, None);
        assert_eq!(key.key, Key::Major(0));
        assert_eq!(key.confidence, 0.0);
        assert!(key.rules_fired.is_empty());
    }
}
