//! Ordered tempo correction passes
//!
//! Each pass is a pure function from the current decision to an optional replacement.
//! Passes run in the order of [`CORRECTION_PASSES`]; later passes see the output of earlier
//! ones and may reverse them. Every pass is gated so it only fires inside its own failure
//! mode and needs a minimum relative improvement, not just a better value.
//!
//! Most passes compare beat hypotheses by on/off-beat separation: the mean onset peak
//! at the hypothesized beats divided by the mean onset level half-way between them.

use super::candidates::tempo_alignment_score;

/// Added to the off-beat mean before dividing
const SEPARATION_FLOOR: f32 = 0.01;

/// Current tempo answer threaded through the passes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TempoDecision {
    /// Tempo in BPM
    pub bpm: f32,
    /// Confidence in [0, 1]
    pub confidence: f32,
    /// Whether the onset-validation pass may still run
    pub onset_validation: bool,
}

/// Read-only inputs shared by the passes
#[derive(Debug, Clone, Copy)]
pub struct PassContext<'a> {
    /// Onset-strength envelope of the tempo window
    pub envelope: &'a [f32],
    /// Envelope frames per second
    pub frame_rate: f32,
    /// Preview-length input
    pub is_short_clip: bool,
    /// Loud-frame RMS energy in [0, 1]
    pub energy_rms: f32,
    /// Lower alias bound
    pub min_bpm: f32,
    /// Upper alias bound
    pub max_bpm: f32,
}

/// A correction pass: `(decision, context) -> Some(new decision)` when it fires
pub type TempoPass = fn(&TempoDecision, &PassContext<'_>) -> Option<TempoDecision>;

/// Correction passes in application order
pub const CORRECTION_PASSES: [(&str, TempoPass); 6] = [
    ("intermediate_tempo", intermediate_tempo),
    ("slow_ballad", slow_ballad),
    ("mid_tempo", mid_tempo),
    ("extended_octave", extended_octave),
    ("onset_validation", onset_validation),
    ("guardrail", guardrail),
];

/// Run every pass in order and return the final decision and the names of the passes that fired
pub fn apply_passes(
    initial: TempoDecision,
    ctx: &PassContext<'_>,
) -> (TempoDecision, Vec<String>) {
    let mut decision = initial;
    let mut fired = Vec::new();
    if ctx.envelope.is_empty() || decision.bpm <= 0.0 {
        return (decision, fired);
    }
    for (name, pass) in CORRECTION_PASSES.iter() {
        if let Some(next) = pass(&decision, ctx) {
            log::info!(
                "Tempo pass {}: {:.2} -> {:.2} BPM (confidence {:.2} -> {:.2})",
                name,
                decision.bpm,
                next.bpm,
                decision.confidence,
                next.confidence
            );
            decision = next;
            fired.push((*name).to_string());
        }
    }
    (decision, fired)
}

/// On/off-beat onset separation for a beat hypothesis at `bpm`
///
/// On-beat strength is the envelope maximum over `[i - 1, i + 2)` at each beat, off-beat
/// strength the envelope mean over the same span around the mid-point between beats.
/// The best ratio over all beat phases is returned; `None` when the beat period is
/// shorter than two frames or no off-beat falls inside the envelope.
pub fn onset_separation(bpm: f32, envelope: &[f32], frame_rate: f32) -> Option<f32> {
    if bpm <= 0.0 || envelope.is_empty() || frame_rate <= 0.0 {
        return None;
    }
    let interval = 60.0 * frame_rate / bpm;
    if interval < 2.0 {
        return None;
    }
    let n = envelope.len();
    let span = |centre: usize| {
        let lo = centre.saturating_sub(1);
        let hi = (centre + 2).min(n);
        &envelope[lo..hi]
    };

    let phases = interval.round() as usize;
    (0..phases)
        .filter_map(|phase| {
            let mut on = Vec::new();
            let mut off = Vec::new();
            let mut t = phase as f32;
            while (t.round() as usize) < n {
                let beat = t.round() as usize;
                on.push(span(beat).iter().copied().fold(0.0f32, f32::max));
                let mid = (t + interval / 2.0).round() as usize;
                if mid < n {
                    let window = span(mid);
                    off.push(window.iter().sum::<f32>() / window.len() as f32);
                }
                t += interval;
            }
            if on.is_empty() || off.is_empty() {
                return None;
            }
            let on_mean = on.iter().sum::<f32>() / on.len() as f32;
            let off_mean = off.iter().sum::<f32>() / off.len() as f32;
            Some(on_mean / (off_mean + SEPARATION_FLOOR))
        })
        .max_by(|a, b| a.total_cmp(b))
}

fn separation_or_zero(bpm: f32, ctx: &PassContext<'_>) -> f32 {
    onset_separation(bpm, ctx.envelope, ctx.frame_rate).unwrap_or(0.0)
}

fn is_slow_ballad(bpm: f32, energy_rms: f32) -> bool {
    (60.0..=85.0).contains(&bpm) && bpm * 2.0 > 105.0 && energy_rms < 0.70
}

/// 70-80 BPM with high energy: try x1.2 / x1.25 (the dotted-feel error)
fn intermediate_tempo(d: &TempoDecision, ctx: &PassContext<'_>) -> Option<TempoDecision> {
    if !(70.0..=80.0).contains(&d.bpm) || ctx.energy_rms <= 0.65 {
        return None;
    }
    let current = separation_or_zero(d.bpm, ctx);
    let mut best: Option<(f32, f32)> = None;
    let mut best_sep = current;
    for factor in [1.2f32, 1.25] {
        let bpm = d.bpm * factor;
        if bpm > ctx.max_bpm {
            continue;
        }
        let Some(sep) = onset_separation(bpm, ctx.envelope, ctx.frame_rate) else {
            continue;
        };
        if sep > best_sep * 1.5 {
            best = Some((bpm, sep));
            best_sep = sep;
        }
    }
    best.map(|(bpm, _)| TempoDecision { bpm, ..*d })
}

/// Slow, quiet material: disable onset validation so the ballad is not doubled
fn slow_ballad(d: &TempoDecision, ctx: &PassContext<'_>) -> Option<TempoDecision> {
    if !d.onset_validation || !is_slow_ballad(d.bpm, ctx.energy_rms) {
        return None;
    }
    Some(TempoDecision {
        onset_validation: false,
        ..*d
    })
}

fn weighted_separation(bpm: f32, separation: f32) -> f32 {
    separation * (0.7 + 0.3 * tempo_alignment_score(bpm))
}

/// Short clips at 85-110 BPM: try x1.5 / x1.55 (capped at 152 BPM)
fn mid_tempo(d: &TempoDecision, ctx: &PassContext<'_>) -> Option<TempoDecision> {
    if !ctx.is_short_clip || !(85.0..=110.0).contains(&d.bpm) || d.confidence >= 0.90 {
        return None;
    }
    let mut best_score = weighted_separation(d.bpm, separation_or_zero(d.bpm, ctx));
    let mut best_bpm = None;
    for factor in [1.5f32, 1.55] {
        let bpm = d.bpm * factor;
        if bpm > ctx.max_bpm || bpm > 152.0 {
            continue;
        }
        let score = weighted_separation(bpm, separation_or_zero(bpm, ctx));
        if score > best_score * 1.20 {
            best_score = score;
            best_bpm = Some(bpm);
        }
    }
    best_bpm.map(|bpm| TempoDecision {
        bpm,
        confidence: d.confidence * 0.95,
        ..*d
    })
}

/// Short clips without onset validation: halve fast tempos, double slow ones
fn extended_octave(d: &TempoDecision, ctx: &PassContext<'_>) -> Option<TempoDecision> {
    if !ctx.is_short_clip || d.onset_validation {
        return None;
    }
    let factors: &[f32] = if d.bpm > 160.0 {
        &[0.5, 0.67, 0.75]
    } else if d.bpm < 90.0 {
        &[2.0, 1.5, 1.33]
    } else {
        return None;
    };

    let current = separation_or_zero(d.bpm, ctx);
    let mut best_sep = current;
    let mut best_bpm = None;
    for &factor in factors {
        let bpm = d.bpm * factor;
        if !(40.0..=250.0).contains(&bpm) {
            continue;
        }
        let sep = separation_or_zero(bpm, ctx);
        log::debug!(
            "Extended octave x{:.2}: {:.1} -> {:.1} BPM, separation {:.3} -> {:.3}",
            factor,
            d.bpm,
            bpm,
            current,
            sep
        );
        if sep > best_sep * 1.15 {
            best_sep = sep;
            best_bpm = Some(bpm);
        }
    }
    best_bpm.map(|bpm| TempoDecision {
        bpm,
        confidence: d.confidence * 0.90,
        ..*d
    })
}

fn octave_boost(bpm: f32) -> f32 {
    if (80.0..=140.0).contains(&bpm) {
        1.40
    } else if (40.0..80.0).contains(&bpm) || (bpm > 140.0 && bpm <= 180.0) {
        1.10
    } else {
        0.90
    }
}

/// Full tracks: compare the half and double tempo by boosted separation
fn onset_validation(d: &TempoDecision, ctx: &PassContext<'_>) -> Option<TempoDecision> {
    if !d.onset_validation {
        return None;
    }
    let base_sep = separation_or_zero(d.bpm, ctx);
    let mut best_score = base_sep * octave_boost(d.bpm);
    let mut best: Option<(f32, f32)> = None;
    for factor in [0.5f32, 2.0] {
        let bpm = d.bpm * factor;
        if bpm < ctx.min_bpm || bpm > ctx.max_bpm {
            continue;
        }
        let Some(sep) = onset_separation(bpm, ctx.envelope, ctx.frame_rate) else {
            continue;
        };
        let score = sep * octave_boost(bpm);
        if score > best_score * 1.10 {
            best_score = score;
            best = Some((bpm, sep));
        }
    }
    match best {
        Some((bpm, sep)) => Some(TempoDecision {
            bpm,
            confidence: d.confidence * (0.85 + 0.15 * sep).clamp(0.0, 1.0),
            ..*d
        }),
        None => {
            log::debug!(
                "Onset validation kept {:.1} BPM (separation {:.3})",
                d.bpm,
                base_sep
            );
            None
        }
    }
}

/// Extreme tempos: double below 60, halve above 180, if alignment clearly improves
fn guardrail(d: &TempoDecision, ctx: &PassContext<'_>) -> Option<TempoDecision> {
    let bpm = if d.bpm < 60.0 {
        d.bpm * 2.0
    } else if d.bpm > 180.0 {
        d.bpm * 0.5
    } else {
        return None;
    };
    if bpm < ctx.min_bpm || bpm > ctx.max_bpm {
        return None;
    }
    (tempo_alignment_score(bpm) - tempo_alignment_score(d.bpm) > 0.15)
        .then_some(TempoDecision { bpm, ..*d })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Kick-like envelope: a spike with a short decay at every beat
    fn kick_envelope(bpm: f32, frame_rate: f32, seconds: f32) -> Vec<f32> {
        let n = (seconds * frame_rate) as usize;
        let period = 60.0 * frame_rate / bpm;
        let mut env = vec![0.02f32; n];
        let mut t = 3.0f32;
        while (t.round() as usize) < n {
            let i = t.round() as usize;
            for (d, v) in [1.0f32, 0.4, 0.1].iter().enumerate() {
                if i + d < n {
                    env[i + d] = env[i + d].max(*v);
                }
            }
            t += period;
        }
        env
    }

    fn ctx<'a>(env: &'a [f32], short: bool, energy: f32) -> PassContext<'a> {
        PassContext {
            envelope: env,
            frame_rate: 43.066,
            is_short_clip: short,
            energy_rms: energy,
            min_bpm: 20.0,
            max_bpm: 280.0,
        }
    }

    #[test]
    fn test_separation_prefers_true_period() {
        let env = kick_envelope(100.0, 43.066, 30.0);
        let true_sep = onset_separation(100.0, &env, 43.066).unwrap();
        let double_sep = onset_separation(200.0, &env, 43.066).unwrap();
        assert!(true_sep > double_sep * 1.5, "{} vs {}", true_sep, double_sep);
        assert!(onset_separation(2000.0, &env, 43.066).is_none());
        assert!(onset_separation(100.0, &[], 43.066).is_none());
    }

    #[test]
    fn test_onset_validation_halves_double_tempo() {
        // 70 BPM material picked at 140: the half tempo separates much better
        let env = kick_envelope(70.0, 43.066, 60.0);
        let start = TempoDecision {
            bpm: 140.0,
            confidence: 0.8,
            onset_validation: true,
        };
        let next = onset_validation(&start, &ctx(&env, false, 0.8)).unwrap();
        assert!((next.bpm - 70.0).abs() < 1e-3);
        assert!(next.confidence <= start.confidence);
    }

    #[test]
    fn test_onset_validation_keeps_true_tempo() {
        let env = kick_envelope(140.0, 43.066, 60.0);
        let start = TempoDecision {
            bpm: 140.0,
            confidence: 0.8,
            onset_validation: true,
        };
        assert!(onset_validation(&start, &ctx(&env, false, 0.8)).is_none());
    }

    #[test]
    fn test_slow_ballad_disables_validation() {
        let env = kick_envelope(72.0, 43.066, 20.0);
        let start = TempoDecision {
            bpm: 72.0,
            confidence: 0.7,
            onset_validation: true,
        };
        let quiet = ctx(&env, false, 0.5);
        let next = slow_ballad(&start, &quiet).unwrap();
        assert!(!next.onset_validation);
        assert_eq!(next.bpm, 72.0);
        assert!(intermediate_tempo(&start, &quiet).is_none());
        assert!(slow_ballad(&start, &ctx(&env, false, 0.9)).is_none());
    }

    #[test]
    fn test_guardrail_only_when_alignment_improves() {
        let env = vec![0.5f32; 100];
        let slow = TempoDecision {
            bpm: 50.0,
            confidence: 0.5,
            onset_validation: false,
        };
        // 50 already aligns through its x2 variant, so doubling gains nothing
        assert_eq!(tempo_alignment_score(50.0), tempo_alignment_score(100.0));
        assert!(guardrail(&slow, &ctx(&env, false, 0.5)).is_none());

        let fast = TempoDecision {
            bpm: 190.0,
            ..slow
        };
        assert!(guardrail(&fast, &ctx(&env, false, 0.5)).is_none());
        assert!(guardrail(&TempoDecision { bpm: 120.0, ..slow }, &ctx(&env, false, 0.5)).is_none());
    }

    #[test]
    fn test_apply_passes_on_empty_envelope() {
        let start = TempoDecision {
            bpm: 120.0,
            confidence: 0.5,
            onset_validation: true,
        };
        let (d, fired) = apply_passes(start, &ctx(&[], false, 0.5));
        assert_eq!(d, start);
        assert!(fired.is_empty());
    }

    #[test]
    fn test_extended_octave_doubles_slow_short_clip() {
        // 128 BPM material detected at 64 on a short clip
        let env = kick_envelope(128.0, 43.066, 20.0);
        let start = TempoDecision {
            bpm: 64.0,
            confidence: 0.8,
            onset_validation: false,
        };
        let next = extended_octave(&start, &ctx(&env, true, 0.8)).unwrap();
        assert!((next.bpm - 128.0).abs() < 1e-3);
        assert!((next.confidence - 0.72).abs() < 1e-5);
    }

    #[test]
    fn test_intermediate_tempo_inside_ballad_energy_band() {
        // 90 BPM groove detected at 75; energy 0.68 also reads as a slow ballad
        let env = kick_envelope(90.0, 43.066, 30.0);
        let start = TempoDecision {
            bpm: 75.0,
            confidence: 0.7,
            onset_validation: true,
        };
        let c = ctx(&env, false, 0.68);
        assert!(is_slow_ballad(start.bpm, c.energy_rms));
        let next = intermediate_tempo(&start, &c).unwrap();
        assert!((next.bpm - 90.0).abs() < 1e-3);

        // The ballad pass then only switches off onset validation
        let (d, fired) = apply_passes(start, &c);
        assert!((d.bpm - 90.0).abs() < 1e-3);
        assert_eq!(fired.first().map(String::as_str), Some("intermediate_tempo"));
    }
}
