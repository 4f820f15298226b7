//! Chunk consensus for long tracks
//!
//! # Algorithm
//!
//! 1. Split the trimmed track into overlapping windows. The window length is the
//!    configured chunk length or `target_beats` beats at the global tempo, whichever is
//!    shorter, but never below the minimum chunk length.
//! 2. Only the first `max_windows` windows are analyzed; a track with more is reported as
//!    truncated.
//! 3. Re-run the per-window pipeline on each window, aborting the remaining windows if one
//!    window exceeds the absolute timeout or two consecutive windows run slow.
//! 4. Aggregate: tempo by weighted median (weight = clamped window energy), key by a vote
//!    weighted by `confidence × energy`, descriptors by weighted mean. The circular spread
//!    of the voted roots flags a modulating track and caps its key confidence.
//!
//! Each aggregate needs at least two contributing windows, so a single window never
//! overrides the whole-track answer. A consensus tempo that is only an octave alias of
//! the whole-track tempo leaves the whole-track tempo in place. A partially complete run still aggregates the windows
//! it finished; a whole-analysis timeout discards them.

use super::pipeline::Deadline;
use super::result::{AnalysisFlag, AnalysisResult, Key};
use crate::config::ChunkSettings;
use crate::error::AnalysisError;
use crate::features::descriptors::valence::Mood;
use crate::features::key::KeyVote;
use crate::io::audio_buffer::AudioBuffer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

/// Descriptors averaged across windows
pub const CONSENSUS_FIELDS: [&str; 8] = [
    "energy",
    "danceability",
    "acousticness",
    "spectral_centroid",
    "valence",
    "dynamic_range",
    "silence_ratio",
    "loudness",
];

/// Root dispersion above which the track is treated as modulating, in semitones
pub const MODULATION_DISPERSION: f32 = 3.0;

/// Key confidence cap for modulating tracks
pub const MODULATING_CONFIDENCE_CAP: f32 = 0.45;

/// Windows below this key confidence do not vote
const MIN_KEY_CONFIDENCE: f32 = 0.1;

/// Energy weight bounds
const ENERGY_WEIGHT_MIN: f32 = 0.05;
const ENERGY_WEIGHT_MAX: f32 = 1.5;

/// Fewest windows an aggregate is built from
const MIN_WINDOWS: usize = 2;

/// Consecutive slow windows that abort the run
const MAX_SLOW_WINDOWS: usize = 2;

const STD_EPS: f32 = 1e-6;

/// Relative tolerance when matching a tempo against octave aliases
const OCTAVE_ALIAS_TOLERANCE: f32 = 0.03;

/// Per-window summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkWindow {
    /// 1-based window number
    pub index: usize,
    /// Window start in the trimmed track, in seconds
    pub start_seconds: f32,
    /// Window end in the trimmed track, in seconds
    pub end_seconds: f32,
    /// Window tempo
    pub bpm: f32,
    /// Window tempo confidence
    pub bpm_confidence: f32,
    /// Window key
    pub key: Key,
    /// Window key label
    pub key_label: String,
    /// Window key confidence
    pub key_confidence: f32,
    /// Key detector confidence before calibration
    pub key_detail_confidence: f32,
    /// Rule that produced the window key
    pub key_source: String,
    /// Window mood
    pub mood: Mood,
    /// Clamped window energy used as the aggregation weight
    pub energy_weight: f32,
    /// Descriptor values by feature name
    pub descriptors: BTreeMap<String, f32>,
    /// Wall time of the window analysis, in milliseconds
    pub elapsed_ms: f32,
}

impl ChunkWindow {
    /// Summarize one window's result
    pub fn from_result(
        index: usize,
        start_seconds: f32,
        end_seconds: f32,
        result: &AnalysisResult,
        elapsed_ms: f32,
    ) -> Self {
        let descriptors = CONSENSUS_FIELDS
            .iter()
            .filter_map(|&name| result.descriptors.get(name).map(|v| (name.to_string(), v)))
            .collect();
        Self {
            index,
            start_seconds,
            end_seconds,
            bpm: result.bpm,
            bpm_confidence: result.bpm_confidence,
            key: result.key,
            key_label: result.key_label.clone(),
            key_confidence: result.key_confidence,
            key_detail_confidence: result.key_details.confidence,
            key_source: result.key_source.clone(),
            mood: result.descriptors.mood,
            energy_weight: result
                .descriptors
                .energy
                .clamp(ENERGY_WEIGHT_MIN, ENERGY_WEIGHT_MAX),
            descriptors,
            elapsed_ms,
        }
    }

    /// Confidence the window votes with: the larger of the final and detector confidence
    pub fn vote_confidence(&self) -> f32 {
        self.key_confidence.max(self.key_detail_confidence)
    }
}

/// Aggregate of the windows
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkConsensus {
    /// Weighted-median tempo of the windows with a tempo
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bpm: Option<f32>,
    /// `1 - min(1, weighted std / weighted mean)` of the window tempos
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bpm_confidence: Option<f32>,
    /// Weighted standard deviation of the window tempos
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bpm_weighted_std: Option<f32>,
    /// Winning key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<Key>,
    /// Winner's share of the key vote, capped when modulating
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_confidence: Option<f32>,
    /// Key votes, heaviest first
    pub key_votes: Vec<KeyVote>,
    /// Circular dispersion of the voted roots, in semitones
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_dispersion_semitones: Option<f32>,
    /// Dispersion exceeds [`MODULATION_DISPERSION`]
    pub key_modulating: bool,
    /// Most frequent window mood
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mood: Option<Mood>,
    /// Weighted-mean descriptors
    pub descriptors: BTreeMap<String, f32>,
}

/// Chunk consensus block of a result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkAnalysis {
    /// Windows that completed
    pub windows: Vec<ChunkWindow>,
    /// Aggregate (absent when no window completed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consensus: Option<ChunkConsensus>,
    /// Window length, in seconds
    pub chunk_seconds: f32,
    /// Hop between window starts, in seconds
    pub hop_seconds: f32,
    /// Global tempo used to size the windows
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bpm_hint: Option<f32>,
    /// Fewer windows completed than the overlap hop produces
    pub truncated: bool,
    /// Windows the overlap hop would have produced without the cap
    pub total_possible: usize,
    /// Window cap
    pub max_windows: usize,
    /// Wall time of the whole run, in milliseconds
    pub wall_time_ms: f32,
}

/// Window layout of one track
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPlan {
    /// Window length, in seconds
    pub chunk_seconds: f32,
    /// Hop, in seconds
    pub hop_seconds: f32,
    /// Window length, in samples
    pub chunk_samples: usize,
    /// Window start samples
    pub starts: Vec<usize>,
    /// Windows the overlap hop would have produced
    pub total_possible: usize,
}

/// True if a track of `duration` seconds is long enough for chunk consensus
pub fn should_run(duration: f32, settings: &ChunkSettings) -> bool {
    if settings.max_windows == 0 || settings.chunk_seconds <= 0.0 || duration <= 0.0 {
        return false;
    }
    let min_duration = (settings.chunk_seconds + settings.min_chunk_seconds)
        .max(settings.chunk_seconds * 1.5)
        .max(settings.min_track_seconds);
    duration >= min_duration
}

/// Lay out the windows of a track
///
/// # Arguments
///
/// * `total_samples` - Track length in samples
/// * `sample_rate` - Sample rate in Hz
/// * `bpm_hint` - Global tempo, used to size windows in beats
/// * `settings` - Chunk settings
pub fn plan_chunks(
    total_samples: usize,
    sample_rate: u32,
    bpm_hint: Option<f32>,
    settings: &ChunkSettings,
) -> ChunkPlan {
    let sr = sample_rate.max(1) as f32;
    let mut chunk_seconds = settings.chunk_seconds.max(settings.min_chunk_seconds);
    if let Some(bpm) = bpm_hint.filter(|b| *b > 0.0) {
        let beat_window = settings.target_beats * 60.0 / bpm;
        chunk_seconds = settings
            .min_chunk_seconds
            .max(settings.chunk_seconds.min(beat_window));
    }
    let overlap = settings.overlap_seconds.clamp(0.0, chunk_seconds * 0.9);
    let mut hop_seconds = chunk_seconds - overlap;
    if hop_seconds <= chunk_seconds * 0.05 {
        hop_seconds = chunk_seconds * 0.5;
    }

    let chunk_samples = ((chunk_seconds * sr) as usize).max(1);
    let hop_samples = ((hop_seconds * sr) as usize).max(1);
    let min_chunk_samples = ((settings.min_chunk_seconds * sr) as usize).max(1);

    let mut starts: Vec<usize> = (0..total_samples)
        .step_by(hop_samples)
        .take_while(|&s| total_samples - s >= min_chunk_samples)
        .collect();
    let total_possible = starts.len();
    let max_windows = settings.max_windows.max(1);
    if starts.len() > max_windows {
        log::debug!(
            "Chunk plan capped at {} of {} windows ({:.1}s covered of {:.1}s)",
            max_windows,
            total_possible,
            (starts[max_windows - 1] + chunk_samples).min(total_samples) as f32 / sr,
            total_samples as f32 / sr
        );
        starts.truncate(max_windows);
    }

    ChunkPlan {
        chunk_seconds,
        hop_seconds,
        chunk_samples,
        starts,
        total_possible,
    }
}

/// Abort reason of a slow run
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SlowAbort {
    /// One window exceeded the absolute timeout
    WindowTimeout,
    /// Consecutive windows exceeded the expected duration
    ConsecutiveSlow,
}

/// Runaway-cost guard over window wall times
#[derive(Debug, Clone)]
pub struct SlowWindowGuard {
    timeout_seconds: f32,
    expected_seconds: f32,
    consecutive_slow: usize,
}

impl SlowWindowGuard {
    /// Guard for windows of `chunk_seconds`
    pub fn new(settings: &ChunkSettings, chunk_seconds: f32) -> Self {
        Self {
            timeout_seconds: settings.window_timeout_seconds,
            expected_seconds: chunk_seconds.max(5.0),
            consecutive_slow: 0,
        }
    }

    /// Record one window's wall time; returns the abort reason if the run must stop
    pub fn observe(&mut self, elapsed_seconds: f32) -> Option<SlowAbort> {
        if elapsed_seconds > self.timeout_seconds {
            return Some(SlowAbort::WindowTimeout);
        }
        if elapsed_seconds > self.expected_seconds {
            self.consecutive_slow += 1;
            if self.consecutive_slow >= MAX_SLOW_WINDOWS {
                return Some(SlowAbort::ConsecutiveSlow);
            }
        } else {
            self.consecutive_slow = 0;
        }
        None
    }
}

/// Run the per-window pipeline over a long track
///
/// # Arguments
///
/// * `samples` - Trimmed track samples
/// * `sample_rate` - Sample rate of `samples`
/// * `bpm_hint` - Global tempo
/// * `settings` - Chunk settings
/// * `deadline` - Whole-analysis deadline, checked before every window
/// * `analyze` - Per-window pipeline
///
/// # Returns
///
/// `None` when the track is too short for chunk consensus
///
/// # Errors
///
/// Returns `AnalysisError::Timeout` when the deadline passes; finished windows are dropped
pub fn run_chunks<F>(
    samples: &[f32],
    sample_rate: u32,
    bpm_hint: Option<f32>,
    settings: &ChunkSettings,
    deadline: Option<&Deadline>,
    mut analyze: F,
) -> Result<Option<ChunkAnalysis>, AnalysisError>
where
    F: FnMut(&AudioBuffer) -> AnalysisResult,
{
    let sr = sample_rate.max(1) as f32;
    let duration = samples.len() as f32 / sr;
    if !should_run(duration, settings) {
        return Ok(None);
    }

    let plan = plan_chunks(samples.len(), sample_rate, bpm_hint, settings);
    let mut guard = SlowWindowGuard::new(settings, plan.chunk_seconds);
    let wall_start = Instant::now();
    let mut windows: Vec<ChunkWindow> = Vec::with_capacity(plan.starts.len());
    let mut truncated = plan.total_possible > plan.starts.len();

    for &start in &plan.starts {
        if let Some(deadline) = deadline {
            deadline.check()?;
        }
        let end = (start + plan.chunk_samples).min(samples.len());
        let index = windows.len() + 1;
        let buffer = AudioBuffer::new(samples[start..end].to_vec(), sample_rate);

        let window_start = Instant::now();
        let result = analyze(&buffer);
        let elapsed = window_start.elapsed().as_secs_f32();

        if let Some(reason) = guard.observe(elapsed) {
            log::warn!(
                "Chunk window {} took {:.1}s ({:?}), aborting the remaining windows",
                index,
                elapsed,
                reason
            );
            truncated = true;
            break;
        }

        windows.push(ChunkWindow::from_result(
            index,
            start as f32 / sr,
            end as f32 / sr,
            &result,
            elapsed * 1000.0,
        ));
    }

    let consensus = build_consensus(&windows);
    log::debug!(
        "Chunk consensus: {}/{} windows of {:.1}s, truncated={}",
        windows.len(),
        plan.starts.len(),
        plan.chunk_seconds,
        truncated
    );

    Ok(Some(ChunkAnalysis {
        consensus,
        chunk_seconds: plan.chunk_seconds,
        hop_seconds: plan.hop_seconds,
        bpm_hint,
        truncated,
        total_possible: plan.total_possible,
        max_windows: settings.max_windows,
        wall_time_ms: wall_start.elapsed().as_secs_f32() * 1000.0,
        windows,
    }))
}

/// Weighted summary of one field
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedStat {
    /// Weighted mean
    pub mean: f32,
    /// Weighted standard deviation
    pub std: f32,
    /// Weighted median
    pub median: f32,
    /// Number of values
    pub count: usize,
}

/// Weighted mean, standard deviation and median of `(value, weight)` pairs
///
/// Weights below 0.01 are raised to 0.01. Returns `None` for no values.
pub fn weighted_stat(pairs: &[(f32, f32)]) -> Option<WeightedStat> {
    if pairs.is_empty() {
        return None;
    }
    let pairs: Vec<(f32, f32)> = pairs.iter().map(|&(v, w)| (v, w.max(0.01))).collect();
    let total: f32 = pairs.iter().map(|(_, w)| w).sum();
    let mean = pairs.iter().map(|(v, w)| v * w).sum::<f32>() / total;
    let std = if pairs.len() > 1 {
        (pairs.iter().map(|(v, w)| w * (v - mean).powi(2)).sum::<f32>() / total).sqrt()
    } else {
        0.0
    };
    Some(WeightedStat {
        mean,
        std,
        median: weighted_median(&pairs)?,
        count: pairs.len(),
    })
}

/// Smallest value whose cumulative weight reaches half the total
pub fn weighted_median(pairs: &[(f32, f32)]) -> Option<f32> {
    let mut sorted: Vec<(f32, f32)> = pairs.iter().copied().filter(|(_, w)| *w > 0.0).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
    let half = sorted.iter().map(|(_, w)| w).sum::<f32>() / 2.0;
    let mut cumulative = 0.0f32;
    for &(value, weight) in &sorted {
        cumulative += weight;
        if cumulative >= half {
            return Some(value);
        }
    }
    sorted.last().map(|(v, _)| *v)
}

/// Circular dispersion of weighted pitch-class roots, in semitones
///
/// `sqrt(-2 ln R) × 12 / 2π`, where `R` is the mean resultant length of the roots on the
/// pitch-class circle. Returns `None` without positive weight.
pub fn key_dispersion(entries: &[(u32, f32)]) -> Option<f32> {
    let total: f32 = entries.iter().map(|(_, w)| w.max(0.0)).sum();
    if total <= 0.0 {
        return None;
    }
    let step = 2.0 * std::f32::consts::PI / 12.0;
    let (cos_sum, sin_sum) = entries.iter().fold((0.0f32, 0.0f32), |(c, s), &(root, w)| {
        let angle = (root % 12) as f32 * step;
        (c + angle.cos() * w, s + angle.sin() * w)
    });
    let r = ((cos_sum * cos_sum + sin_sum * sin_sum).sqrt() / total).clamp(1e-9, 1.0);
    Some((-2.0 * r.ln()).max(0.0).sqrt() * 12.0 / (2.0 * std::f32::consts::PI))
}

/// Aggregate finished windows; `None` without windows
///
/// Fields with fewer than two contributing windows stay empty.
pub fn build_consensus(windows: &[ChunkWindow]) -> Option<ChunkConsensus> {
    if windows.is_empty() {
        return None;
    }
    let mut consensus = ChunkConsensus::default();

    let tempos: Vec<(f32, f32)> = windows
        .iter()
        .filter(|w| w.bpm > 0.0)
        .map(|w| (w.bpm, w.energy_weight))
        .collect();
    if let Some(stat) = weighted_stat(&tempos).filter(|s| s.count >= MIN_WINDOWS) {
        let reference = stat.mean.max(STD_EPS) + STD_EPS;
        consensus.bpm = Some(stat.median);
        consensus.bpm_confidence = Some((1.0 - (stat.std / reference).min(1.0)).clamp(0.0, 1.0));
        consensus.bpm_weighted_std = Some(stat.std);
    }

    let entries: Vec<(Key, f32)> = windows
        .iter()
        .filter(|w| w.vote_confidence() >= MIN_KEY_CONFIDENCE)
        .map(|w| (w.key, w.vote_confidence() * w.energy_weight.max(0.1)))
        .collect();
    if entries.len() >= MIN_WINDOWS {
        let mut votes: Vec<KeyVote> = Vec::new();
        for &(key, weight) in &entries {
            match votes
                .iter_mut()
                .find(|v| v.root == key.root() && v.mode == key.mode())
            {
                Some(vote) => vote.weight += weight,
                None => votes.push(KeyVote {
                    root: key.root(),
                    mode: key.mode(),
                    weight,
                }),
            }
        }
        votes.sort_by(|a, b| b.weight.total_cmp(&a.weight));
        let total: f32 = entries.iter().map(|(_, w)| w).sum();
        let best = votes[0];
        let mut confidence = (best.weight / total.max(1e-9)).min(1.0);

        let roots: Vec<(u32, f32)> = entries.iter().map(|(k, w)| (k.root(), *w)).collect();
        let dispersion = key_dispersion(&roots);
        if let Some(d) = dispersion {
            if d > MODULATION_DISPERSION {
                consensus.key_modulating = true;
                confidence = confidence.min(MODULATING_CONFIDENCE_CAP);
            }
        }
        consensus.key = Some(Key::new(best.root, best.mode));
        consensus.key_confidence = Some(confidence);
        consensus.key_dispersion_semitones = dispersion;
        consensus.key_votes = votes;
    }

    consensus.mood = most_common_mood(windows);

    for field in CONSENSUS_FIELDS {
        let pairs: Vec<(f32, f32)> = windows
            .iter()
            .filter_map(|w| w.descriptors.get(field).map(|&v| (v, w.energy_weight)))
            .collect();
        if let Some(stat) = weighted_stat(&pairs).filter(|s| s.count >= MIN_WINDOWS) {
            consensus.descriptors.insert(field.to_string(), stat.mean);
        }
    }

    Some(consensus)
}

fn most_common_mood(windows: &[ChunkWindow]) -> Option<Mood> {
    let mut counts: Vec<(Mood, usize)> = Vec::new();
    for w in windows {
        match counts.iter_mut().find(|(m, _)| *m == w.mood) {
            Some((_, n)) => *n += 1,
            None => counts.push((w.mood, 1)),
        }
    }
    // First-seen mood wins ties
    counts
        .iter()
        .fold(None::<(Mood, usize)>, |best, &(m, n)| match best {
            Some((_, b)) if b >= n => best,
            _ => Some((m, n)),
        })
        .map(|(m, _)| m)
}

/// True if `bpm` is a half, double, quarter or quadruple of `reference`
pub fn is_octave_alias(bpm: f32, reference: f32) -> bool {
    if bpm <= 0.0 || reference <= 0.0 {
        return false;
    }
    let ratio = bpm / reference;
    [0.25f32, 0.5, 2.0, 4.0]
        .iter()
        .any(|f| (ratio / f - 1.0).abs() <= OCTAVE_ALIAS_TOLERANCE)
}

/// Blend the consensus into the whole-track result
///
/// Tempo and descriptors are replaced (a tempo that is an octave alias of the whole-track
/// tempo is not), tempo confidence is the larger of the two. The key
/// is replaced; its confidence is the larger of the two unless the track modulates, in
/// which case it is the smaller, capped at [`MODULATING_CONFIDENCE_CAP`].
pub fn merge_consensus(result: &mut AnalysisResult, consensus: &ChunkConsensus) {
    if let Some(bpm) = consensus.bpm {
        if result.bpm > 0.0 && is_octave_alias(bpm, result.bpm) {
            log::debug!(
                "Chunk consensus {:.2} BPM is an octave alias of {:.2}, keeping the whole-track tempo",
                bpm,
                result.bpm
            );
        } else {
            result.bpm = bpm;
        }
    }
    if let Some(confidence) = consensus.bpm_confidence {
        result.bpm_confidence = result.bpm_confidence.max(confidence);
    }
    for (field, &value) in &consensus.descriptors {
        result.descriptors.set(field, value);
    }
    if let Some(mood) = consensus.mood {
        result.descriptors.mood = mood;
    }

    if let Some(key) = consensus.key {
        if key != result.key {
            log::info!("Chunk consensus key {} replaces {}", key.label(), result.key_label);
            result.key_source = "chunk_consensus".to_string();
        }
        result.set_key(key);
    }
    if let Some(confidence) = consensus.key_confidence {
        result.key_confidence = if consensus.key_modulating {
            result.key_confidence.min(confidence).min(MODULATING_CONFIDENCE_CAP)
        } else {
            result.key_confidence.max(confidence)
        };
    }
    if consensus.key_dispersion_semitones.is_some() {
        result.key_dispersion_semitones = consensus.key_dispersion_semitones;
    }
    if consensus.key_modulating {
        result.key_modulating = true;
        result.metadata.flag(AnalysisFlag::KeyModulating);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(bpm: f32, key: Key, key_confidence: f32, energy: f32) -> ChunkWindow {
        let mut result = AnalysisResult::silent(15.0, 22050);
        result.bpm = bpm;
        result.bpm_confidence = 0.8;
        result.set_key(key);
        result.key_confidence = key_confidence;
        result.descriptors.energy = energy;
        result.descriptors.valence = 0.5;
        ChunkWindow::from_result(1, 0.0, 15.0, &result, 10.0)
    }

    #[test]
    fn test_should_run() {
        let settings = ChunkSettings::default();
        assert!(!should_run(20.0, &settings));
        assert!(should_run(22.5, &settings));
        assert!(should_run(240.0, &settings));
        assert!(!should_run(
            240.0,
            &ChunkSettings {
                max_windows: 0,
                ..settings
            }
        ));
    }

    #[test]
    fn test_plan_uses_beat_window() {
        let settings = ChunkSettings::default();
        // 8 beats at 60 BPM = 8 s, inside [5, 15]
        let plan = plan_chunks(22050 * 40, 22050, Some(60.0), &settings);
        assert!((plan.chunk_seconds - 8.0).abs() < 1e-4);
        // hop = 8 - 5 = 3 s
        assert!((plan.hop_seconds - 3.0).abs() < 1e-4);
        assert_eq!(plan.starts.len(), plan.total_possible);

        // Fast tempos hit the minimum window
        let plan = plan_chunks(22050 * 40, 22050, Some(174.0), &settings);
        assert_eq!(plan.chunk_seconds, 5.0);

        // No hint: the configured length
        let plan = plan_chunks(22050 * 40, 22050, None, &settings);
        assert_eq!(plan.chunk_seconds, 15.0);
        assert!((plan.hop_seconds - 10.0).abs() < 1e-4);
        // Starts 0, 10, 20, 30 leave at least 5 s; 40 does not exist
        assert_eq!(plan.starts, vec![0, 220500, 441000, 661500]);
    }

    #[test]
    fn test_plan_caps_windows_and_keeps_overlap() {
        let settings = ChunkSettings::default();
        let total = 22050 * 600;
        let plan = plan_chunks(total, 22050, None, &settings);
        assert_eq!(plan.starts.len(), 16);
        // 0, 10, ..., 590 s
        assert_eq!(plan.total_possible, 60);
        assert!((plan.hop_seconds - 10.0).abs() < 1e-4);
        for pair in plan.starts.windows(2) {
            assert!(pair[1] - pair[0] < plan.chunk_samples);
        }
        assert_eq!(plan.starts[0], 0);
    }

    #[test]
    fn test_weighted_median() {
        assert_eq!(weighted_median(&[]), None);
        assert_eq!(weighted_median(&[(120.0, 1.0)]), Some(120.0));
        // Two heavy windows at 96 outweigh one light window at 128
        assert_eq!(weighted_median(&[(128.0, 0.3), (96.0, 1.0), (96.0, 1.0)]), Some(96.0));
        assert_eq!(weighted_median(&[(128.0, 2.5), (96.0, 1.0), (96.0, 1.0)]), Some(128.0));
    }

    #[test]
    fn test_agreeing_windows_have_no_dispersion() {
        let windows: Vec<ChunkWindow> = (0..6).map(|_| window(124.0, Key::Minor(9), 0.7, 0.8)).collect();
        let c = build_consensus(&windows).unwrap();
        assert_eq!(c.key, Some(Key::Minor(9)));
        assert!(c.key_dispersion_semitones.unwrap() < 1e-3);
        assert!(!c.key_modulating);
        assert!((c.key_confidence.unwrap() - 1.0).abs() < 1e-6);
        assert_eq!(c.bpm, Some(124.0));
        assert!((c.bpm_confidence.unwrap() - 1.0).abs() < 1e-4);
        assert!((c.descriptors["energy"] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_tritone_split_is_modulating() {
        let mut windows: Vec<ChunkWindow> = (0..3).map(|_| window(120.0, Key::Major(0), 0.9, 0.8)).collect();
        windows.extend((0..3).map(|_| window(120.0, Key::Major(6), 0.9, 0.8)));
        let c = build_consensus(&windows).unwrap();
        assert!(c.key_dispersion_semitones.unwrap() > MODULATION_DISPERSION);
        assert!(c.key_modulating);
        assert!(c.key_confidence.unwrap() <= MODULATING_CONFIDENCE_CAP);
    }

    #[test]
    fn test_low_confidence_windows_do_not_vote() {
        let windows = vec![
            window(0.0, Key::Major(0), 0.0, 0.0),
            window(100.0, Key::Minor(4), 0.05, 0.5),
            window(100.0, Key::Minor(4), 0.6, 0.5),
        ];
        let c = build_consensus(&windows).unwrap();
        // Only one window clears the vote threshold
        assert!(c.key.is_none());
        assert_eq!(c.bpm, Some(100.0));

        let single = build_consensus(&windows[1..2]).unwrap();
        assert!(single.bpm.is_none());
        assert!(single.descriptors.is_empty());
    }

    #[test]
    fn test_merge_rules() {
        let mut result = AnalysisResult::silent(200.0, 22050);
        result.bpm = 128.0;
        result.bpm_confidence = 0.9;
        result.key_confidence = 0.8;

        let consensus = ChunkConsensus {
            bpm: Some(96.0),
            bpm_confidence: Some(0.6),
            key: Some(Key::Minor(9)),
            key_confidence: Some(0.3),
            key_modulating: true,
            key_dispersion_semitones: Some(4.2),
            descriptors: [("energy".to_string(), 0.66)].into_iter().collect(),
            ..ChunkConsensus::default()
        };
        merge_consensus(&mut result, &consensus);

        assert_eq!(result.bpm, 96.0);
        assert_eq!(result.bpm_confidence, 0.9);
        assert_eq!(result.key, Key::Minor(9));
        assert_eq!(result.key_label, "A minor");
        assert_eq!(result.key_source, "chunk_consensus");
        assert_eq!(result.key_confidence, 0.3);
        assert!(result.key_modulating);
        assert!(result.has_flag(AnalysisFlag::KeyModulating));
        assert_eq!(result.descriptors.energy, 0.66);
    }

    #[test]
    fn test_octave_alias_keeps_whole_track_tempo() {
        assert!(is_octave_alias(90.1, 179.98));
        assert!(is_octave_alias(240.0, 60.0));
        assert!(!is_octave_alias(139.07, 179.98));
        assert!(!is_octave_alias(120.0, 120.0));
        assert!(!is_octave_alias(0.0, 120.0));

        let mut result = AnalysisResult::silent(200.0, 22050);
        result.bpm = 179.98;
        let consensus = ChunkConsensus {
            bpm: Some(90.0),
            bpm_confidence: Some(0.9),
            ..ChunkConsensus::default()
        };
        merge_consensus(&mut result, &consensus);
        assert_eq!(result.bpm, 179.98);
        assert_eq!(result.bpm_confidence, 0.9);
    }

    #[test]
    fn test_detector_confidence_lifts_vote() {
        let mut windows: Vec<ChunkWindow> = (0..2).map(|_| window(120.0, Key::Major(2), 0.05, 0.8)).collect();
        assert!(build_consensus(&windows).unwrap().key.is_none());

        for w in &mut windows {
            w.key_detail_confidence = 0.6;
        }
        let c = build_consensus(&windows).unwrap();
        assert_eq!(c.key, Some(Key::Major(2)));
        assert!((c.key_votes[0].weight - 2.0 * 0.6 * 0.8).abs() < 1e-5);
    }

    #[test]
    fn test_slow_window_guard() {
        let settings = ChunkSettings::default();
        let mut guard = SlowWindowGuard::new(&settings, 5.0);
        assert_eq!(guard.observe(1.0), None);
        assert_eq!(guard.observe(6.0), None);
        assert_eq!(guard.observe(1.0), None);
        assert_eq!(guard.observe(6.0), None);
        assert_eq!(guard.observe(7.0), Some(SlowAbort::ConsecutiveSlow));

        let mut guard = SlowWindowGuard::new(&settings, 5.0);
        assert_eq!(guard.observe(31.0), Some(SlowAbort::WindowTimeout));
    }

    #[test]
    fn test_run_chunks_with_stub_pipeline() {
        let settings = ChunkSettings::default();
        let samples = vec![0.1f32; 22050 * 60];
        let mut calls = 0;
        let analysis = run_chunks(&samples, 22050, Some(120.0), &settings, None, |buffer| {
            calls += 1;
            let mut r = AnalysisResult::silent(buffer.duration_seconds(), buffer.sample_rate());
            r.bpm = if calls <= 2 { 128.0 } else { 96.0 };
            r.set_key(Key::Major(7));
            r.key_confidence = 0.6;
            r.descriptors.energy = 0.7;
            r
        })
        .unwrap()
        .unwrap();

        assert_eq!(analysis.windows.len(), calls);
        assert_eq!(calls, settings.max_windows);
        // 5 s windows with a 0.5 s hop need far more than the cap
        assert!(analysis.total_possible > calls);
        assert!(analysis.truncated);
        let consensus = analysis.consensus.unwrap();
        assert_eq!(consensus.bpm, Some(96.0));
        assert_eq!(consensus.key, Some(Key::Major(7)));

        let short = run_chunks(&samples[..22050 * 10], 22050, None, &settings, None, |_| {
            AnalysisResult::silent(0.0, 22050)
        })
        .unwrap();
        assert!(short.is_none());
    }
}
