//! Tempo estimation
//!
//! # Algorithm
//!
//! 1. Onset-strength envelope of the percussive component of the tempo window
//! 2. Raw evidence: beat-tracker tempo (seeded by a prior-weighted autocorrelation),
//!    onset-periodicity tempo, pulse-derived tempo and pulse clarity
//! 3. Octave-alias candidates scored by alignment, detector agreement and pulse support
//! 4. Ordered correction passes on the best candidate
//! 5. Confidence blended with the consistency of onset strength at the tracked beats
//!
//! # Example
//!
//! ```no_run
//! use fingerprint_dsp::config::AnalysisConfig;
//! use fingerprint_dsp::features::spectral::context::AnalysisContext;
//! use fingerprint_dsp::features::tempo::estimate_tempo;
//! use fingerprint_dsp::AudioBuffer;
//!
//! let config = AnalysisConfig::default();
//! let buffer = AudioBuffer::new(vec![0.0f32; 22050 * 30], 22050);
//! let ctx = AnalysisContext::build(&buffer, &config)?;
//! let tempo = estimate_tempo(&ctx, &config)?;
//! println!("{:.1} BPM ({:.2})", tempo.bpm, tempo.confidence);
//! # Ok::<(), fingerprint_dsp::AnalysisError>(())
//! ```

pub mod candidates;
pub mod passes;

use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::features::beat_tracking::dynamic_programming::{
    tempo_from_beats, track_beats, DEFAULT_TIGHTNESS,
};
use crate::features::descriptors::energy::rms_energy;
use crate::features::onset::{consistency, onset_envelope, OnsetEnvelope};
use crate::features::period::autocorrelation::{periodicity_tempo, prior_tempo};
use crate::features::period::tempogram_fft::pulse_tempo;
use crate::features::spectral::context::AnalysisContext;
use candidates::{build_candidates, score_candidates, RawTempo, TempoCandidate};
use passes::{apply_passes, PassContext, TempoDecision};
use serde::{Deserialize, Serialize};

/// Pulse-tempo search range
const PULSE_MIN_BPM: f32 = 30.0;
const PULSE_MAX_BPM: f32 = 300.0;

/// Confidence when no candidate could be scored and the beat tracker is used directly
const FALLBACK_CONFIDENCE: f32 = 0.6;

/// Tempo decision trail for one analysis
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TempoDiagnostics {
    /// Raw detector evidence
    pub raw: RawTempo,
    /// Scored alias candidates
    pub candidates: Vec<TempoCandidate>,
    /// Tempo picked by candidate scoring, before the correction passes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias_pick: Option<f32>,
    /// Correction passes that changed the answer, in order
    pub passes_fired: Vec<String>,
    /// `1 - min(std / mean, 1)` of onset strength at the tracked beats
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beat_consistency: Option<f32>,
    /// Loud-frame RMS energy used by the energy-gated passes
    pub energy_rms: f32,
    /// Start of the tempo window in the trimmed signal, in seconds
    pub window_offset_seconds: f32,
    /// Length of the tempo window, in seconds
    pub window_seconds: f32,
}

/// Final tempo with the intermediate signals later stages reuse
#[derive(Debug, Clone)]
pub struct TempoEstimate {
    /// Tempo in BPM (0 for silence)
    pub bpm: f32,
    /// Confidence in [0, 1]
    pub confidence: f32,
    /// Tracked beat frames in the tempo window
    pub beats: Vec<usize>,
    /// Onset envelope of the tempo window
    pub envelope: OnsetEnvelope,
    /// Decision trail
    pub diagnostics: TempoDiagnostics,
}

impl TempoEstimate {
    fn silent(envelope: OnsetEnvelope, diagnostics: TempoDiagnostics) -> Self {
        Self {
            bpm: 0.0,
            confidence: 0.0,
            beats: vec![],
            envelope,
            diagnostics,
        }
    }
}

/// Estimate the tempo of an analysis context
///
/// Silent input yields 0 BPM with confidence 0 and runs no correction pass.
///
/// # Errors
///
/// Returns `AnalysisError` if the onset envelope cannot be computed
pub fn estimate_tempo(
    ctx: &AnalysisContext,
    config: &AnalysisConfig,
) -> Result<TempoEstimate, AnalysisError> {
    let envelope = onset_envelope(ctx, config.frame_size)?;
    let fps = envelope.frame_rate;
    let energy_rms = rms_energy(&ctx.samples, config.frame_size, config.hop_size);

    let mut diagnostics = TempoDiagnostics {
        energy_rms,
        window_offset_seconds: ctx.window_offset_seconds(),
        window_seconds: ctx.window.len as f32 / ctx.sample_rate.max(1) as f32,
        ..TempoDiagnostics::default()
    };

    if envelope.is_silent() {
        log::debug!("Silent onset envelope, skipping tempo estimation");
        return Ok(TempoEstimate::silent(envelope, diagnostics));
    }

    let (min_bpm, max_bpm) = (config.min_bpm, config.max_bpm);
    let seed = prior_tempo(&envelope.values, fps, config.prior_bpm, min_bpm, max_bpm);
    let beats = seed
        .map(|bpm| track_beats(&envelope.values, fps, bpm, DEFAULT_TIGHTNESS))
        .unwrap_or_default();
    let periodicity = periodicity_tempo(&envelope.values, fps, min_bpm, max_bpm);
    let pulse = pulse_tempo(&envelope.values, fps, PULSE_MIN_BPM, PULSE_MAX_BPM);

    let raw = RawTempo {
        beat_tracker: tempo_from_beats(&beats, fps).or(seed),
        onset_periodicity: periodicity.map(|p| p.bpm),
        pulse: pulse.map(|p| p.bpm),
        pulse_clarity: periodicity.map_or(0.0, |p| p.strength),
    };
    log::debug!(
        "Raw tempo: beat tracker {:?}, onset periodicity {:?}, pulse {:?} (clarity {:.3})",
        raw.beat_tracker,
        raw.onset_periodicity,
        raw.pulse,
        raw.pulse_clarity
    );

    let short_clip = ctx.params.is_short_clip;
    let mut pool = build_candidates(&raw, min_bpm, max_bpm);
    let best = score_candidates(&mut pool, &raw, &config.tempo_weights, short_clip);

    let initial = match best {
        Some(i) => TempoDecision {
            bpm: pool[i].bpm,
            confidence: pool[i].score,
            onset_validation: ctx.params.use_onset_validation,
        },
        None => {
            let bpm = raw.beat_tracker.unwrap_or(0.0);
            log::warn!("No tempo candidate in range, using beat tracker {:.1} BPM", bpm);
            TempoDecision {
                bpm,
                confidence: if bpm > 0.0 { FALLBACK_CONFIDENCE } else { 0.0 },
                onset_validation: ctx.params.use_onset_validation,
            }
        }
    };
    diagnostics.raw = raw;
    diagnostics.alias_pick = best.map(|i| pool[i].bpm);
    diagnostics.candidates = pool;

    if initial.bpm <= 0.0 {
        return Ok(TempoEstimate::silent(envelope, diagnostics));
    }

    let pass_ctx = PassContext {
        envelope: &envelope.values,
        frame_rate: fps,
        is_short_clip: short_clip && config.short_clip_corrections,
        energy_rms,
        min_bpm,
        max_bpm,
    };
    let (decision, fired) = apply_passes(initial, &pass_ctx);
    diagnostics.passes_fired = fired;

    let mut confidence = decision.confidence;
    if !beats.is_empty() {
        let beat_consistency = consistency(&envelope.sample_at(&beats));
        confidence = 0.6 * confidence + 0.4 * beat_consistency;
        diagnostics.beat_consistency = Some(beat_consistency);
    }
    let confidence = confidence.clamp(0.0, 1.0);

    log::debug!(
        "Tempo: {:.2} BPM (confidence {:.3}, {} beats, passes {:?})",
        decision.bpm,
        confidence,
        beats.len(),
        diagnostics.passes_fired
    );

    Ok(TempoEstimate {
        bpm: decision.bpm,
        confidence,
        beats,
        envelope,
        diagnostics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::audio_buffer::AudioBuffer;

    /// Decaying noise bursts on every beat over a quiet sine bed
    fn kick_track(bpm: f32, sample_rate: u32, seconds: f32) -> AudioBuffer {
        let n = (seconds * sample_rate as f32) as usize;
        let period = (60.0 / bpm * sample_rate as f32) as usize;
        let decay = (0.03 * sample_rate as f32) as usize;
        let mut seed = 12345u32;
        let samples = (0..n)
            .map(|i| {
                seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
                let noise = ((seed >> 16) as f32 / 32768.0) - 1.0;
                let pos = i % period;
                let hit = if pos < decay {
                    noise * (1.0 - pos as f32 / decay as f32)
                } else {
                    0.0
                };
                let t = i as f32 / sample_rate as f32;
                0.6 * hit + 0.05 * (2.0 * std::f32::consts::PI * 220.0 * t).sin()
            })
            .collect();
        AudioBuffer::new(samples, sample_rate)
    }

    #[test]
    fn test_estimate_tempo_short_clip() {
        let config = AnalysisConfig::default();
        let ctx = AnalysisContext::build(&kick_track(120.0, 22050, 20.0), &config).unwrap();
        let tempo = estimate_tempo(&ctx, &config).unwrap();
        assert!((tempo.bpm - 120.0).abs() < 3.0, "got {:.2}", tempo.bpm);
        assert!((0.0..=1.0).contains(&tempo.confidence));
        assert!(tempo.confidence > 0.5, "confidence {:.3}", tempo.confidence);
        assert!(!tempo.beats.is_empty());
        for c in &tempo.diagnostics.candidates {
            assert!(c.bpm >= 20.0 && c.bpm <= 280.0);
        }
    }

    #[test]
    fn test_estimate_tempo_silence() {
        let config = AnalysisConfig::default();
        let buffer = AudioBuffer::new(vec![0.0; 22050 * 10], 22050);
        let ctx = AnalysisContext::build(&buffer, &config).unwrap();
        let tempo = estimate_tempo(&ctx, &config).unwrap();
        assert_eq!(tempo.bpm, 0.0);
        assert_eq!(tempo.confidence, 0.0);
        assert!(tempo.diagnostics.passes_fired.is_empty());
        assert!(tempo.diagnostics.candidates.is_empty());
    }
}
