//! Octave-alias tempo candidates and their scores
//!
//! Every raw detector estimate is expanded by the alias factors {0.5, 1, 2} into a
//! candidate pool bounded to the configured BPM range. Candidates closer than
//! [`MERGE_TOLERANCE_BPM`] are merged and keep the provenance of every contributing
//! detector.
//!
//! # Scoring
//!
//! ```text
//! base  = clamp01(w_a * alignment + w_d * detector_support + w_p * pulse_support
//!                 + multi_source_bonus + octave_preference + agreement_bonus - alias_penalty)
//! score = clamp01(base * (0.7 + 0.3 * clamp01(pulse_clarity)))
//! ```
//!
//! `agreement_bonus` and `alias_penalty` only apply to short clips.

use crate::config::TempoWeights;
use serde::{Deserialize, Serialize};

/// Alias factors applied to every raw estimate
pub const ALIAS_FACTORS: [f32; 3] = [0.5, 1.0, 2.0];

/// Candidates closer than this are merged into one
pub const MERGE_TOLERANCE_BPM: f32 = 1.0;

/// Decay constant of the tempo similarity, in BPM
const SIMILARITY_SCALE: f32 = 15.0;

/// Raw tempo detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Detector {
    /// Dynamic-programming beat tracker (mean inter-beat interval)
    BeatTracker,
    /// Strongest onset-envelope periodicity
    OnsetPeriodicity,
}

/// One detector/factor pair that produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandidateSource {
    /// Detector the estimate came from
    pub detector: Detector,
    /// Alias factor applied to the raw estimate
    pub factor: f32,
    /// Raw detector estimate before the factor
    pub base_bpm: f32,
}

/// Raw tempo evidence extracted from the onset envelope
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTempo {
    /// Beat-tracking estimate
    pub beat_tracker: Option<f32>,
    /// Onset-periodicity estimate
    pub onset_periodicity: Option<f32>,
    /// Pulse-derived tempo (Fourier tempogram peak)
    pub pulse: Option<f32>,
    /// Normalized autocorrelation height of the periodicity, in [0, 1]
    pub pulse_clarity: f32,
}

impl RawTempo {
    fn detector_values(&self) -> Vec<f32> {
        [self.beat_tracker, self.onset_periodicity]
            .into_iter()
            .flatten()
            .filter(|&v| v > 0.0)
            .collect()
    }
}

/// Tempo candidate with its provenance and score breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempoCandidate {
    /// Candidate tempo in BPM
    pub bpm: f32,
    /// Detector/factor pairs that produced this candidate
    pub sources: Vec<CandidateSource>,
    /// Alignment with the typical-tempo curve
    pub alignment: f32,
    /// Best alias-aware similarity to either raw detector
    pub detector_support: f32,
    /// Alias-aware similarity to the pulse-derived tempo
    pub pulse_support: f32,
    /// `min(sources * 0.05, 0.15)`
    pub multi_source_bonus: f32,
    /// Bonus for musically common octaves
    pub octave_preference: f32,
    /// Short-clip bonus when both detectors agree on this tempo
    pub agreement_bonus: f32,
    /// Short-clip penalty for candidates that only exist as aliases
    pub alias_penalty: f32,
    /// Final score in [0, 1]
    pub score: f32,
}

impl TempoCandidate {
    fn new(bpm: f32, source: CandidateSource) -> Self {
        Self {
            bpm,
            sources: vec![source],
            alignment: 0.0,
            detector_support: 0.0,
            pulse_support: 0.0,
            multi_source_bonus: 0.0,
            octave_preference: 0.0,
            agreement_bonus: 0.0,
            alias_penalty: 0.0,
            score: 0.0,
        }
    }
}

/// Alias-aware similarity of `candidate` to `reference`
///
/// `exp(-d / 15)` where `d` is the distance to the closest of `reference * {0.5, 1, 2}`.
/// Returns 0 when either tempo is not positive.
pub fn tempo_similarity(candidate: f32, reference: f32) -> f32 {
    if candidate <= 0.0 || reference <= 0.0 {
        return 0.0;
    }
    let distance = ALIAS_FACTORS
        .iter()
        .map(|f| (candidate - reference * f).abs())
        .fold(f32::INFINITY, f32::min);
    (-distance / SIMILARITY_SCALE).exp().clamp(0.0, 1.0)
}

/// Alignment of a tempo with the typical-tempo curve
///
/// The curve is 1.0 in 118-128 BPM, 0.85 in 105-140, 0.7 in 90-105 or 140-155, and
/// `max(0.2, 1 - |bpm - 125| / 100)` elsewhere. The best value over the tempo and its
/// x0.5, x2, x0.25 and x4 variants inside 60-180 BPM is returned.
pub fn tempo_alignment_score(bpm: f32) -> f32 {
    if bpm <= 0.0 {
        return 0.0;
    }
    [1.0f32, 0.5, 2.0, 0.25, 4.0]
        .iter()
        .map(|f| bpm * f)
        .filter(|c| (60.0..=180.0).contains(c))
        .map(alignment_curve)
        .fold(0.0, f32::max)
}

fn alignment_curve(bpm: f32) -> f32 {
    if (118.0..=128.0).contains(&bpm) {
        1.0
    } else if (105.0..=140.0).contains(&bpm) {
        0.85
    } else if (90.0..105.0).contains(&bpm) || (140.0..=155.0).contains(&bpm) {
        0.7
    } else {
        (1.0 - (bpm - 125.0).abs() / 100.0).max(0.2)
    }
}

fn octave_preference(bpm: f32, short_clip: bool) -> f32 {
    if short_clip {
        match bpm {
            b if (80.0..=145.0).contains(&b) => 0.10,
            b if (45.0..80.0).contains(&b) || (145.0..=180.0).contains(&b) => 0.04,
            b if b > 180.0 => 0.06,
            _ => 0.0,
        }
    } else {
        match bpm {
            b if (80.0..=145.0).contains(&b) => 0.15,
            b if (40.0..80.0).contains(&b) || (145.0..=180.0).contains(&b) => 0.05,
            _ => 0.0,
        }
    }
}

/// Expand the raw detector estimates into a deduplicated alias candidate pool
///
/// Candidates outside `[min_bpm, max_bpm]` are dropped.
pub fn build_candidates(raw: &RawTempo, min_bpm: f32, max_bpm: f32) -> Vec<TempoCandidate> {
    let detectors = [
        (Detector::BeatTracker, raw.beat_tracker),
        (Detector::OnsetPeriodicity, raw.onset_periodicity),
    ];

    let mut pool: Vec<TempoCandidate> = Vec::new();
    for (detector, value) in detectors {
        let Some(base_bpm) = value.filter(|&v| v > 0.0 && v.is_finite()) else {
            continue;
        };
        for &factor in &ALIAS_FACTORS {
            let bpm = base_bpm * factor;
            if bpm < min_bpm || bpm > max_bpm {
                continue;
            }
            let source = CandidateSource {
                detector,
                factor,
                base_bpm,
            };
            match pool
                .iter_mut()
                .find(|c| (c.bpm - bpm).abs() < MERGE_TOLERANCE_BPM)
            {
                Some(existing) => existing.sources.push(source),
                None => pool.push(TempoCandidate::new(bpm, source)),
            }
        }
    }
    pool
}

/// Score every candidate in place and return the index of the best one
pub fn score_candidates(
    candidates: &mut [TempoCandidate],
    raw: &RawTempo,
    weights: &TempoWeights,
    short_clip: bool,
) -> Option<usize> {
    let (w_align, w_detector, w_pulse) = weights.for_clip(short_clip);
    let detector_values = raw.detector_values();
    let clarity_boost = 0.7 + 0.3 * raw.pulse_clarity.clamp(0.0, 1.0);

    for candidate in candidates.iter_mut() {
        let bpm = candidate.bpm;
        candidate.alignment = tempo_alignment_score(bpm);
        candidate.detector_support = detector_values
            .iter()
            .map(|&r| tempo_similarity(bpm, r))
            .fold(0.0, f32::max);
        candidate.pulse_support = raw.pulse.map_or(0.0, |p| tempo_similarity(bpm, p));
        candidate.multi_source_bonus = (candidate.sources.len() as f32 * 0.05).min(0.15);
        candidate.octave_preference = octave_preference(bpm, short_clip);

        candidate.agreement_bonus = 0.0;
        candidate.alias_penalty = 0.0;
        if short_clip {
            if detector_values.len() >= 2 {
                let mut sorted = detector_values.clone();
                sorted.sort_by(|a, b| a.total_cmp(b));
                let spread = sorted[sorted.len() - 1] - sorted[0];
                let median = sorted[sorted.len() / 2];
                if spread <= 3.0 && (bpm - median).abs() <= 2.0 {
                    candidate.agreement_bonus = 0.05;
                }
            }
            if candidate
                .sources
                .iter()
                .all(|s| (s.factor - 1.0).abs() > 0.05)
            {
                candidate.alias_penalty = 0.04;
            }
        }

        let base = (w_align * candidate.alignment
            + w_detector * candidate.detector_support
            + w_pulse * candidate.pulse_support
            + candidate.multi_source_bonus
            + candidate.octave_preference
            + candidate.agreement_bonus
            - candidate.alias_penalty)
            .clamp(0.0, 1.0);
        candidate.score = (base * clarity_boost).clamp(0.0, 1.0);
    }

    let best = candidates
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.score.total_cmp(&b.score))
        .map(|(i, _)| i);

    if log::log_enabled!(log::Level::Debug) {
        let mut ranked: Vec<&TempoCandidate> = candidates.iter().collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        let summary: Vec<String> = ranked
            .iter()
            .take(5)
            .map(|c| format!("{:.1}({:.2})", c.bpm, c.score))
            .collect();
        log::debug!("Top tempo candidates [bpm(score)]: {}", summary.join(", "));
    }

    best
}
