//! Ordered key override rules
//!
//! The template fallback is refined by a fixed list of rules. Each rule is a pure
//! function of the current answer and the evidence gathered for the track, and either
//! leaves the answer alone or returns a replacement tagged with its `key_source`. Rules
//! never lower the confidence; the final value is the largest any fired rule produced.
//!
//! A rule that sets `locked_root` pins the tonic: later blending rules may still change
//! the mode but not the root.
//!
//! Order matters, later rules may undo earlier ones:
//!
//! 1. `window_consensus` - section votes outvote the whole-track template
//! 2. `runner_interval` - promote a nearly tied runner-up with window or external backing
//! 3. `fifth_reconcile` - short clips: prefer a chroma-backed, nearly tied fifth
//! 4. `window_mode_votes` - mode split of the votes for the current root
//! 5. `chroma_peak` - loudest pitch class with a decisive margin
//! 6. `tonic_bias` - short clips: restore the template tonic over a tied fifth
//! 7. `external_standard` - blend the standard-profile external candidate
//! 8. `external_standard_dominant` - the same candidate a fourth/fifth away with a high score
//! 9. `external_percussive` / 10. `external_percussive_dominant` - same for the percussive
//!    profile
//! 11. `external_tonic` - fifth-related external candidate, gated on current confidence,
//!     pins the root
//! 12. `mode_bias` - thirds and sixths decide the mode of a weak answer
//! 13. `mode_rescue` - external candidate on the same root flips the mode

use super::consensus::{root_support, WindowConsensus};
use super::templates::{best_mode_for, score_of, TemplateScore};
use super::{interval, is_fifth_related, KeyCandidate, Mode};
use crate::config::{BlendThresholds, KeyThresholds};

/// Window dominance below which a differing window key is ignored
const OVERRIDE_DOMINANCE: f32 = 0.5;
const WINDOW_DOMINANCE: f32 = 0.65;
const WINDOW_SEPARATION: f32 = 0.15;
const SHORT_FIFTH_DOMINANCE: f32 = 0.75;
const SHORT_FIFTH_SEPARATION: f32 = 0.20;
/// Separation needed for a mode-only window switch
const WINDOW_MODE_SEPARATION: f32 = 0.05;

/// Support advantage that counts as window backing for the runner-up
const SUPPORT_DELTA: f32 = 0.18;
/// Current roots below this window support are considered weak
const WEAK_SUPPORT: f32 = 0.5;
/// External scores that count as backing (standard, percussive)
const STANDARD_BACKING: f32 = 0.35;
const PERCUSSIVE_BACKING: f32 = 0.45;
/// Runner-up intervals that may replace the current root
const RUNNER_INTERVALS: [u32; 7] = [2, 3, 4, 5, 7, 9, 10];
const RUNNER_SCORE_SLACK: f32 = 0.02;

/// Template scores this close to the best count as tied
const NEAR_TIE: f32 = 0.04;
const FIFTH_SKIP_DOMINANCE: f32 = 0.6;
const FALLBACK_BACKED_SUPPORT: f32 = 0.35;

const MODE_VOTE_GAIN: f32 = 0.3;
const MODE_BIAS_GAIN: f32 = 0.4;

/// Everything the rules may consult
#[derive(Debug, Clone, Copy)]
pub struct KeyEvidence<'a> {
    /// Track chroma profile, max-normalized
    pub chroma: &'a [f32; 12],
    /// All 24 template scores, best first
    pub scores: &'a [TemplateScore],
    /// Window votes, when enabled and available
    pub consensus: Option<&'a WindowConsensus>,
    /// Standard-profile external candidate
    pub external_standard: Option<&'a KeyCandidate>,
    /// Percussion-robust external candidate
    pub external_percussive: Option<&'a KeyCandidate>,
    /// The track is a preview clip
    pub is_short_clip: bool,
    /// Tuned thresholds
    pub thresholds: &'a KeyThresholds,
}

impl<'a> KeyEvidence<'a> {
    /// Best template key (C major with score 0 when no scores exist)
    pub fn fallback(&self) -> TemplateScore {
        self.scores.first().copied().unwrap_or(TemplateScore {
            root: 0,
            mode: Mode::Major,
            score: 0.0,
        })
    }

    /// Confidence of the template fallback
    pub fn fallback_confidence(&self) -> f32 {
        self.fallback().score.clamp(0.0, 1.0)
    }

    /// Window support of `root` relative to the strongest root
    pub fn support(&self, root: u32) -> f32 {
        self.consensus
            .map_or(0.0, |c| root_support(&c.root_weights(), root))
    }

    fn dominance(&self) -> f32 {
        self.consensus.map_or(0.0, |c| c.dominance)
    }

    fn template(&self, root: u32, mode: Mode) -> f32 {
        score_of(self.scores, root, mode)
    }

    fn chroma_ratio(&self, root: u32) -> f32 {
        let max = self.chroma.iter().copied().fold(0.0f32, f32::max);
        if max <= 0.0 {
            0.0
        } else {
            self.chroma[(root % 12) as usize] / max
        }
    }

    fn externally_backed(&self, root: u32, mode: Mode, standard_min: f32) -> bool {
        self.external_standard
            .is_some_and(|c| c.supports(root, mode, standard_min))
            || self
                .external_percussive
                .is_some_and(|c| c.supports(root, mode, PERCUSSIVE_BACKING))
    }

    fn externals(&self) -> [(Option<&'a KeyCandidate>, &'static str); 2] {
        [
            (self.external_standard, "external_standard"),
            (self.external_percussive, "external_percussive"),
        ]
    }
}

/// Current answer while the rules run
#[derive(Debug, Clone, PartialEq)]
pub struct KeyState {
    /// Tonic pitch class
    pub root: u32,
    /// Mode
    pub mode: Mode,
    /// Confidence (clamped to [0, 1] once all rules ran)
    pub confidence: f32,
    /// Tag of the rule that produced the answer
    pub source: String,
    /// Later rules may not change the root
    pub locked_root: bool,
    /// Names of the rules that fired, in order
    pub fired: Vec<&'static str>,
}

impl KeyState {
    /// The template fallback
    pub fn initial(evidence: &KeyEvidence<'_>) -> Self {
        let fallback = evidence.fallback();
        Self {
            root: fallback.root,
            mode: fallback.mode,
            confidence: evidence.fallback_confidence(),
            source: "template".to_string(),
            locked_root: false,
            fired: Vec::new(),
        }
    }

    /// True if the rule called `name` fired earlier
    pub fn has_fired(&self, name: &str) -> bool {
        self.fired.iter().any(|&f| f == name)
    }

    fn moved(&self, root: u32, mode: Mode, confidence: f32, source: impl Into<String>) -> Self {
        Self {
            root: root % 12,
            mode,
            confidence: self.confidence.max(confidence),
            source: source.into(),
            locked_root: self.locked_root,
            fired: self.fired.clone(),
        }
    }

    fn locked(mut self) -> Self {
        self.locked_root = true;
        self
    }
}

/// A key override rule
pub type KeyRule = fn(&KeyState, &KeyEvidence<'_>) -> Option<KeyState>;

/// All override rules, in application order
pub const KEY_RULES: [(&str, KeyRule); 13] = [
    ("window_consensus", window_consensus),
    ("runner_interval", runner_interval),
    ("fifth_reconcile", fifth_reconcile),
    ("window_mode_votes", window_mode_votes),
    ("chroma_peak", chroma_peak),
    ("tonic_bias", tonic_bias),
    ("external_standard", external_standard),
    ("external_standard_dominant", standard_dominant),
    ("external_percussive", external_percussive),
    ("external_percussive_dominant", percussive_dominant),
    ("external_tonic", external_tonic),
    ("mode_bias", mode_bias),
    ("mode_rescue", mode_rescue),
];

/// Run every rule over the template fallback
pub fn apply_rules(evidence: &KeyEvidence<'_>) -> KeyState {
    let mut state = KeyState::initial(evidence);
    for &(name, rule) in KEY_RULES.iter() {
        if let Some(mut next) = rule(&state, evidence) {
            log::info!(
                "Key rule {}: {}:{} -> {}:{} (confidence {:.2} -> {:.2}, source {})",
                name,
                state.root,
                state.mode.as_str(),
                next.root,
                next.mode.as_str(),
                state.confidence,
                next.confidence,
                next.source
            );
            next.fired.push(name);
            state = next;
        }
    }
    state.confidence = state.confidence.clamp(0.0, 1.0);
    state
}

fn window_consensus(state: &KeyState, ev: &KeyEvidence<'_>) -> Option<KeyState> {
    let c = ev.consensus?;
    let best = c.best();
    let same_root = best.root == state.root;
    let same_mode = best.mode == state.mode;

    if c.dominance >= OVERRIDE_DOMINANCE && !(same_root && same_mode) {
        let short_fifth = ev.is_short_clip && is_fifth_related(best.root, ev.fallback().root);
        let (min_dominance, min_separation) = if short_fifth {
            (SHORT_FIFTH_DOMINANCE, SHORT_FIFTH_SEPARATION)
        } else {
            (WINDOW_DOMINANCE, WINDOW_SEPARATION)
        };
        if c.separation >= min_separation || c.dominance >= min_dominance {
            return Some(state.moved(
                best.root,
                best.mode,
                c.dominance.min(0.99),
                "window_consensus",
            ));
        }
        None
    } else if same_root && !same_mode && c.separation >= WINDOW_MODE_SEPARATION {
        Some(state.moved(state.root, best.mode, c.dominance.min(0.95), "window_consensus"))
    } else {
        None
    }
}

fn runner_interval(state: &KeyState, ev: &KeyEvidence<'_>) -> Option<KeyState> {
    let runner = *ev.scores.get(1)?;
    let t = ev.thresholds;
    let best_score = ev.fallback().score;
    let gap = best_score - runner.score;
    let step = interval(runner.root, state.root);
    let short_fifth = ev.is_short_clip && matches!(step, 5 | 7);

    let final_support = ev.support(state.root);
    let runner_support = ev.support(runner.root);
    let threshold = if short_fifth {
        t.runner_support_short_fifth
    } else {
        t.runner_support
    };
    let window_backed = if short_fifth {
        runner_support >= threshold
    } else {
        runner_support >= threshold || runner_support - final_support >= SUPPORT_DELTA
    };
    let external_backed =
        !window_backed && ev.externally_backed(runner.root, runner.mode, STANDARD_BACKING);
    let weak_final = final_support < WEAK_SUPPORT;

    let mut promote = window_backed || external_backed;
    if short_fifth
        && (ev.chroma_ratio(runner.root) < t.fifth_chroma_ratio
            || runner.score + RUNNER_SCORE_SLACK < best_score)
    {
        promote = false;
    }
    if state.locked_root && runner.root != state.root {
        promote = false;
    }
    if !promote && weak_final && gap <= t.runner_margin * 0.6 {
        promote = true;
    }
    if !promote || !RUNNER_INTERVALS.contains(&step) {
        return None;
    }

    let mut margin = t.runner_margin;
    if runner_support >= threshold + 0.1 {
        margin *= 1.8;
    }
    if external_backed || weak_final {
        margin *= 1.2;
    }
    if gap > margin && !external_backed {
        return None;
    }
    let confidence = (runner_support.max(ev.fallback_confidence()) + 0.15).min(0.75);
    Some(state.moved(runner.root, runner.mode, confidence, "runner_interval"))
}

fn window_mode_votes(state: &KeyState, ev: &KeyEvidence<'_>) -> Option<KeyState> {
    let c = ev.consensus?;
    let (major, minor) = c.mode_breakdown(state.root);
    let total = major + minor;
    if total <= 0.0 {
        return None;
    }
    let difference = (major - minor).abs() / total;
    let dominant = if major >= minor { Mode::Major } else { Mode::Minor };
    if difference < ev.thresholds.window_mode_diff || dominant == state.mode {
        return None;
    }
    let confidence = (state.confidence + difference * MODE_VOTE_GAIN).min(0.85);
    Some(state.moved(state.root, dominant, confidence, "window_mode_votes"))
}

fn blend(
    state: &KeyState,
    ev: &KeyEvidence<'_>,
    candidate: Option<&KeyCandidate>,
    limits: BlendThresholds,
    label: &str,
) -> Option<KeyState> {
    let c = candidate?;
    if state.locked_root && c.root != state.root {
        return None;
    }
    let differs = c.root != state.root || c.mode != state.mode;
    if c.confidence >= limits.strict && differs {
        Some(state.moved(c.root, c.mode, c.confidence, label))
    } else if c.root == state.root && c.mode != state.mode && c.confidence >= limits.mode {
        Some(state.moved(c.root, c.mode, c.confidence, format!("{}_mode", label)))
    } else if c.confidence >= limits.rescue && state.confidence < ev.thresholds.rescue_confidence {
        Some(state.moved(c.root, c.mode, c.confidence, label))
    } else {
        None
    }
}

fn external_standard(state: &KeyState, ev: &KeyEvidence<'_>) -> Option<KeyState> {
    blend(
        state,
        ev,
        ev.external_standard,
        ev.thresholds.external_standard,
        "external_standard",
    )
}

fn external_percussive(state: &KeyState, ev: &KeyEvidence<'_>) -> Option<KeyState> {
    blend(
        state,
        ev,
        ev.external_percussive,
        ev.thresholds.external_percussive,
        "external_percussive",
    )
}

fn dominant_override(
    state: &KeyState,
    ev: &KeyEvidence<'_>,
    candidate: Option<&KeyCandidate>,
    label: &str,
) -> Option<KeyState> {
    let c = candidate?;
    if c.confidence < ev.thresholds.dominant_override_score
        || (state.locked_root && c.root != state.root)
        || !is_fifth_related(c.root, state.root)
    {
        return None;
    }
    Some(state.moved(c.root, c.mode, c.confidence, format!("{}_dominant", label)))
}

fn standard_dominant(state: &KeyState, ev: &KeyEvidence<'_>) -> Option<KeyState> {
    dominant_override(state, ev, ev.external_standard, "external_standard")
}

fn percussive_dominant(state: &KeyState, ev: &KeyEvidence<'_>) -> Option<KeyState> {
    dominant_override(state, ev, ev.external_percussive, "external_percussive")
}

fn external_tonic(state: &KeyState, ev: &KeyEvidence<'_>) -> Option<KeyState> {
    if state.locked_root || state.confidence < ev.thresholds.tonic_override_confidence {
        return None;
    }
    let final_support = ev.support(state.root);
    ev.externals().into_iter().find_map(|(candidate, label)| {
        let c = candidate?;
        if !is_fifth_related(c.root, state.root) || c.confidence < ev.thresholds.tonic_override_score {
            return None;
        }
        if ev.is_short_clip && ev.support(c.root) + 0.05 < final_support {
            return None;
        }
        Some(
            state
                .moved(c.root, c.mode, c.confidence, format!("{}_tonic", label))
                .locked(),
        )
    })
}

fn fifth_reconcile(state: &KeyState, ev: &KeyEvidence<'_>) -> Option<KeyState> {
    if !ev.is_short_clip || state.locked_root {
        return None;
    }
    let fallback = ev.fallback();
    if state.root == fallback.root && ev.dominance() >= FIFTH_SKIP_DOMINANCE {
        return None;
    }
    let fallback_template = ev.template(fallback.root, fallback.mode);
    let fallback_backed = ev.externally_backed(fallback.root, fallback.mode, 0.4)
        || ev.support(fallback.root) >= FALLBACK_BACKED_SUPPORT;

    let mut pick: Option<(TemplateScore, f32)> = None;
    for cand in ev.scores.iter().skip(1).take(5) {
        if cand.score + NEAR_TIE < fallback.score {
            continue;
        }
        if fallback_template > 0.0 && fallback_backed && cand.score + NEAR_TIE * 0.5 < fallback_template {
            continue;
        }
        if !is_fifth_related(cand.root, state.root) {
            continue;
        }
        let ratio = ev.chroma_ratio(cand.root);
        if ratio < ev.thresholds.fifth_chroma_ratio {
            continue;
        }
        if pick.map_or(true, |(_, best)| ratio > best) {
            pick = Some((*cand, ratio));
        }
    }

    let (cand, ratio) = pick?;
    log::debug!(
        "Fifth reconciliation candidate {}:{} (score {:.3}, chroma ratio {:.2})",
        cand.root,
        cand.mode.as_str(),
        cand.score,
        ratio
    );
    Some(
        state
            .moved(cand.root, cand.mode, cand.score, "fifth_reconcile")
            .locked(),
    )
}

fn chroma_peak(state: &KeyState, ev: &KeyEvidence<'_>) -> Option<KeyState> {
    if state.has_fired("fifth_reconcile") || state.locked_root {
        return None;
    }
    let (peak_root, peak_energy) = chroma_peak_root(ev.chroma);
    if peak_energy <= 0.0 || peak_root == state.root {
        return None;
    }
    let t = ev.thresholds;
    let energy_gap = peak_energy - ev.chroma[state.root as usize % 12];
    let peak_support = ev.support(peak_root);
    let support_gap = peak_support - ev.support(state.root);

    let mut apply = energy_gap >= t.chroma_peak_gap
        || peak_support >= t.chroma_peak_support
        || support_gap >= t.chroma_peak_support_gap;

    if ev.is_short_clip && is_fifth_related(peak_root, ev.fallback().root) {
        let mut decisive = (energy_gap >= t.chroma_peak_gap * 2.0 && peak_support >= 0.20)
            || energy_gap >= 0.25;
        if ev.dominance() >= 0.5 {
            decisive = decisive && energy_gap >= 0.30 && peak_support >= 0.22;
        }
        if !decisive {
            log::debug!(
                "Preview clip: keeping {} over fifth-related chroma peak {} (gap {:.3}, support {:.2})",
                state.root,
                peak_root,
                energy_gap,
                peak_support
            );
            apply = false;
        }
    }
    if !apply {
        return None;
    }

    let mode = best_mode_for(ev.scores, peak_root);
    let confidence = (state.confidence.max(peak_support) + 0.1).min(0.9);
    Some(
        state
            .moved(peak_root, mode, confidence, "chroma_peak")
            .locked(),
    )
}

fn mode_bias(state: &KeyState, ev: &KeyEvidence<'_>) -> Option<KeyState> {
    let bias = mode_bias_value(ev.chroma, state.root);
    let t = ev.thresholds;
    if bias.abs() < t.mode_bias_min || state.confidence >= t.mode_bias_confidence {
        return None;
    }
    let inferred = if bias >= 0.0 { Mode::Major } else { Mode::Minor };
    if inferred == state.mode {
        return None;
    }
    let confidence = (state.confidence + bias.abs() * MODE_BIAS_GAIN).min(0.55);
    Some(state.moved(state.root, inferred, confidence, "mode_bias"))
}

fn mode_rescue(state: &KeyState, ev: &KeyEvidence<'_>) -> Option<KeyState> {
    let mut result: Option<KeyState> = None;
    for (candidate, label) in ev.externals() {
        let Some(c) = candidate else { continue };
        let current = result.as_ref().unwrap_or(state);
        if c.root == current.root
            && c.mode != current.mode
            && c.confidence >= ev.thresholds.mode_rescue_score
        {
            let next = current.moved(c.root, c.mode, c.confidence, format!("{}_mode_rescue", label));
            result = Some(next);
        }
    }
    result
}

fn tonic_bias(state: &KeyState, ev: &KeyEvidence<'_>) -> Option<KeyState> {
    if !ev.is_short_clip || state.has_fired("chroma_peak") {
        return None;
    }
    let fallback = ev.fallback();
    if state.root == fallback.root || !is_fifth_related(state.root, fallback.root) {
        return None;
    }

    let fallback_triad = triad_energy(ev.chroma, fallback.root, fallback.mode);
    let final_triad = triad_energy(ev.chroma, state.root, state.mode);
    let fallback_template = ev.template(fallback.root, fallback.mode);
    let final_template = ev.template(state.root, state.mode);
    let fallback_support = ev.support(fallback.root);
    let final_support = ev.support(state.root);
    let fallback_backed = ev.externally_backed(fallback.root, fallback.mode, STANDARD_BACKING);

    let triad_tie = final_triad <= 0.0 || fallback_triad >= final_triad * 0.95;
    let template_tie = fallback_template + NEAR_TIE * 0.5 >= final_template;
    let mut support_tie = fallback_support + 0.02 >= final_support
        || (fallback_support >= 0.35 && final_support <= 0.55);
    if !fallback_backed && fallback_support < final_support - 0.01 {
        support_tie = false;
    }
    if !(triad_tie && template_tie && support_tie && (fallback_backed || final_support < 0.6)) {
        return None;
    }

    log::debug!(
        "Tonic bias: triad {:.3} vs {:.3}, template {:.3} vs {:.3}, support {:.2} vs {:.2}",
        fallback_triad,
        final_triad,
        fallback_template,
        final_template,
        fallback_support,
        final_support
    );
    let confidence = ev
        .fallback_confidence()
        .max(fallback_template)
        .max(fallback_support);
    Some(
        state
            .moved(fallback.root, fallback.mode, confidence, "tonic_bias")
            .locked(),
    )
}

/// Loudest pitch class and its energy (first one on ties)
pub fn chroma_peak_root(chroma: &[f32; 12]) -> (u32, f32) {
    chroma
        .iter()
        .enumerate()
        .fold((0u32, f32::MIN), |best, (pc, &e)| {
            if e > best.1 {
                (pc as u32, e)
            } else {
                best
            }
        })
}

/// `(M3 - m3) + 0.5 * (M6 - m6)` above `root`; positive leans major
pub fn mode_bias_value(chroma: &[f32; 12], root: u32) -> f32 {
    let at = |offset: u32| chroma[((root + offset) % 12) as usize];
    (at(4) - at(3)) + 0.5 * (at(9) - at(8))
}

/// Chroma energy of the root, third and fifth
pub fn triad_energy(chroma: &[f32; 12], root: u32, mode: Mode) -> f32 {
    let third = match mode {
        Mode::Major => 4,
        Mode::Minor => 3,
    };
    let at = |offset: u32| chroma[((root + offset) % 12) as usize];
    at(0) + at(third) + at(7)
}
