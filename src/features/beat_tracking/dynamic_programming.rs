//! Dynamic-programming beat tracker
//!
//! Finds the beat sequence that maximizes onset strength at the beats while keeping
//! inter-beat intervals close to a target period.
//!
//! # Reference
//!
//! Ellis, D. P. W. (2007). Beat Tracking by Dynamic Programming.
//! *Journal of New Music Research*, 36(1), 51-60.
//!
//! # Algorithm
//!
//! 1. Smooth the envelope with a Gaussian of width `period / 32` (local score)
//! 2. For each frame, `score[t] = local[t] + max(score[p] - tightness * ln((t - p) / period)²)`
//!    over predecessors `p` in `[t - 2 * period, t - period / 2]`
//! 3. Start from the last local maximum of the cumulative score that reaches half the
//!    median of all local maxima and backtrack
//! 4. Drop weak beats at both ends

use crate::features::onset::mean_std;

/// Default transition tightness
pub const DEFAULT_TIGHTNESS: f32 = 100.0;

/// Track beats in an onset envelope
///
/// # Arguments
///
/// * `envelope` - Onset-strength envelope
/// * `frame_rate` - Envelope frames per second
/// * `bpm` - Target tempo
/// * `tightness` - Penalty weight for deviating from the target period
///
/// # Returns
///
/// Beat frame indices in increasing order (empty for silence or an invalid tempo)
pub fn track_beats(envelope: &[f32], frame_rate: f32, bpm: f32, tightness: f32) -> Vec<usize> {
    if envelope.is_empty() || bpm <= 0.0 || frame_rate <= 0.0 {
        return vec![];
    }
    let period = 60.0 * frame_rate / bpm;
    if period < 1.0 || period * 2.0 > envelope.len() as f32 {
        return vec![];
    }

    let local = local_score(envelope, period);
    if local.iter().all(|&v| v <= 0.0) {
        return vec![];
    }

    let n = envelope.len();
    let min_step = (period / 2.0).round().max(1.0) as usize;
    let max_step = (period * 2.0).round() as usize;

    let mut cumulative = vec![0.0f32; n];
    let mut backlink: Vec<Option<usize>> = vec![None; n];

    for t in 0..n {
        let mut best: Option<(usize, f32)> = None;
        if t >= min_step {
            let lo = t.saturating_sub(max_step);
            for p in lo..=t - min_step {
                let ratio = (t - p) as f32 / period;
                let penalty = tightness * ratio.ln().powi(2);
                let candidate = cumulative[p] - penalty;
                if best.map_or(true, |(_, s)| candidate > s) {
                    best = Some((p, candidate));
                }
            }
        }
        match best {
            Some((p, s)) if s > 0.0 => {
                cumulative[t] = local[t] + s;
                backlink[t] = Some(p);
            }
            _ => cumulative[t] = local[t],
        }
    }

    let Some(last) = last_beat(&cumulative) else {
        return vec![];
    };

    let mut beats = vec![last];
    let mut cursor = last;
    while let Some(prev) = backlink[cursor] {
        beats.push(prev);
        cursor = prev;
    }
    beats.reverse();

    let beats = trim_weak_beats(beats, &local);
    log::debug!(
        "Tracked {} beats at target {:.2} BPM (period {:.2} frames)",
        beats.len(),
        bpm,
        period
    );
    beats
}

/// Tempo implied by a beat sequence: `60 * fps * (n - 1) / (last - first)`
pub fn tempo_from_beats(beats: &[usize], frame_rate: f32) -> Option<f32> {
    let (&first, &last) = (beats.first()?, beats.last()?);
    if beats.len() < 2 || last <= first {
        return None;
    }
    Some(60.0 * frame_rate * (beats.len() - 1) as f32 / (last - first) as f32)
}

fn local_score(envelope: &[f32], period: f32) -> Vec<f32> {
    let (_, std) = mean_std(envelope);
    let scale = if std > 1e-10 { 1.0 / std } else { 0.0 };

    let sigma = (period / 32.0).max(0.5);
    let half = period.round() as isize;
    let kernel: Vec<f32> = (-half..=half)
        .map(|i| (-0.5 * (i as f32 / sigma).powi(2)).exp())
        .collect();

    let n = envelope.len() as isize;
    (0..n)
        .map(|t| {
            kernel
                .iter()
                .enumerate()
                .filter_map(|(k, &w)| {
                    let idx = t + k as isize - half;
                    (idx >= 0 && idx < n).then(|| w * envelope[idx as usize] * scale)
                })
                .sum()
        })
        .collect()
}

fn last_beat(cumulative: &[f32]) -> Option<usize> {
    let n = cumulative.len();
    let is_max = |i: usize| {
        let left = i == 0 || cumulative[i] > cumulative[i - 1];
        let right = i + 1 == n || cumulative[i] >= cumulative[i + 1];
        left && right
    };
    let mut maxima: Vec<f32> = (0..n).filter(|&i| is_max(i)).map(|i| cumulative[i]).collect();
    if maxima.is_empty() {
        return None;
    }
    maxima.sort_by(|a, b| a.total_cmp(b));
    let median = maxima[maxima.len() / 2];
    (0..n)
        .rev()
        .find(|&i| is_max(i) && cumulative[i] >= 0.5 * median)
}

/// Drop leading and trailing beats whose local score is below half the mean
fn trim_weak_beats(beats: Vec<usize>, local: &[f32]) -> Vec<usize> {
    if beats.len() < 3 {
        return beats;
    }
    let strengths: Vec<f32> = beats.iter().map(|&b| local[b]).collect();
    let threshold = 0.5 * strengths.iter().sum::<f32>() / strengths.len() as f32;
    let start = strengths.iter().position(|&s| s >= threshold).unwrap_or(0);
    let end = strengths
        .iter()
        .rposition(|&s| s >= threshold)
        .map_or(beats.len(), |i| i + 1);
    beats[start..end.max(start)].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pulse_envelope(bpm: f32, frame_rate: f32, seconds: f32, offset: usize) -> Vec<f32> {
        let n = (seconds * frame_rate) as usize;
        let period = 60.0 * frame_rate / bpm;
        let mut env = vec![0.0f32; n];
        let mut t = offset as f32;
        while (t.round() as usize) < n {
            env[t.round() as usize] = 1.0;
            t += period;
        }
        env
    }

    #[test]
    fn test_track_beats_follows_pulses() {
        let frame_rate = 43.066;
        let env = pulse_envelope(120.0, frame_rate, 20.0, 7);
        let beats = track_beats(&env, frame_rate, 120.0, DEFAULT_TIGHTNESS);
        assert!(beats.len() >= 35, "only {} beats", beats.len());
        for &b in &beats {
            assert_eq!(env[b], 1.0, "beat at frame {} is off the pulse", b);
        }
        let bpm = tempo_from_beats(&beats, frame_rate).unwrap();
        assert!((bpm - 120.0).abs() < 1.0, "got {:.2}", bpm);
    }

    #[test]
    fn test_track_beats_silence() {
        assert!(track_beats(&[0.0; 400], 43.0, 120.0, DEFAULT_TIGHTNESS).is_empty());
        assert!(track_beats(&[], 43.0, 120.0, DEFAULT_TIGHTNESS).is_empty());
        assert!(track_beats(&[1.0; 400], 43.0, 0.0, DEFAULT_TIGHTNESS).is_empty());
    }

    #[test]
    fn test_tempo_from_beats() {
        assert_eq!(tempo_from_beats(&[0, 10, 20], 10.0), Some(60.0));
        assert_eq!(tempo_from_beats(&[5], 10.0), None);
    }
}
