//! Heuristic danceability
//!
//! Blends beat strength, rhythmic structure, tempo suitability and percussive groove:
//!
//! ```text
//! raw = 0.25 * beat_strength + 0.25 * rhythmic_structure
//!     + 0.35 * tempo_alignment + 0.15 * percussive_groove
//! danceability = clamp01(raw)^0.85 * tempo_penalty
//! ```
//!
//! Tempos below 60 BPM are penalized linearly, tempos above 180 BPM down to half.
//! Energetic or pulse-dense material keeps a small floor.

use crate::features::onset::{consistency, mean_std};
use crate::features::period::tempogram_fft::fft_tempogram;
use crate::features::tempo::candidates::tempo_alignment_score;
use serde::{Deserialize, Serialize};

/// Inputs of the danceability heuristic
#[derive(Debug, Clone, Copy)]
pub struct RhythmInputs<'a> {
    /// Max-normalized onset envelope
    pub envelope: &'a [f32],
    /// Envelope frames per second
    pub frame_rate: f32,
    /// Tracked beat frames
    pub beats: &'a [usize],
    /// Final tempo
    pub bpm: f32,
    /// Pulse clarity of the tempo estimate
    pub pulse_clarity: f32,
    /// Percussive share of the power
    pub percussive_presence: f32,
    /// Mean onset strength
    pub pulse_density: f32,
    /// Energy descriptor
    pub energy: f32,
}

/// Danceability with its components
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Danceability {
    /// Final value in [0, 1]
    pub value: f32,
    /// Onset strength at the beats relative to the envelope
    pub beat_strength: f32,
    /// Evenness of the inter-beat intervals
    pub beat_regularity: f32,
    /// Tracked beats over expected beats
    pub beat_density: f32,
    /// Typical-tempo alignment
    pub tempo_alignment: f32,
    /// Multiplier for extreme tempos
    pub tempo_penalty: f32,
}

/// Estimate danceability
pub fn danceability(input: &RhythmInputs<'_>) -> Danceability {
    let pulse_clarity = input.pulse_clarity.clamp(0.0, 1.0);
    let (onset_mean, onset_std) = mean_std(input.envelope);

    let beat_values: Vec<f32> = input
        .beats
        .iter()
        .filter_map(|&b| input.envelope.get(b).copied())
        .collect();
    let beat_strength_raw = if beat_values.is_empty() {
        pulse_clarity
    } else {
        beat_values.iter().sum::<f32>() / beat_values.len() as f32
    };
    let beat_strength = if onset_std > 1e-6 {
        0.5 + (beat_strength_raw - onset_mean) / (onset_std * 2.0)
    } else {
        beat_strength_raw
    };
    let beat_strength = (0.7 * beat_strength + 0.3 * pulse_clarity).clamp(0.0, 1.0);

    let beat_regularity = if input.beats.len() >= 2 {
        let intervals: Vec<f32> = input
            .beats
            .windows(2)
            .map(|w| (w[1] - w[0]) as f32)
            .collect();
        consistency(&intervals)
    } else {
        tempogram_consistency(input.envelope, input.frame_rate)
    }
    .clamp(0.0, 1.0);

    let tempo_alignment = tempo_alignment_score(input.bpm);
    let duration = if input.frame_rate > 0.0 {
        input.envelope.len() as f32 / input.frame_rate
    } else {
        0.0
    };
    let expected_beats = (duration * input.bpm / 60.0).max(1e-3);
    let beat_density = (input.beats.len() as f32 / expected_beats / 1.2).clamp(0.0, 1.0);

    let percussive_groove = (input.percussive_presence * 1.4).clamp(0.0, 1.0);
    let rhythmic_structure = (0.6 * beat_regularity + 0.4 * beat_density).clamp(0.0, 1.0);

    let raw = 0.25 * beat_strength
        + 0.25 * rhythmic_structure
        + 0.35 * tempo_alignment
        + 0.15 * percussive_groove;

    let tempo_penalty = if input.bpm < 60.0 {
        (input.bpm / 60.0).max(0.0)
    } else if input.bpm > 180.0 {
        (1.0 - (input.bpm - 180.0) / 120.0).max(0.5)
    } else {
        1.0
    };

    let floor = (0.05 * input.energy.clamp(0.0, 1.0)).max(0.05 * input.pulse_density.clamp(0.0, 1.0));
    let value = (raw.clamp(0.0, 1.0).powf(0.85) * tempo_penalty).max(floor);

    log::debug!(
        "Danceability {:.3}: beat {:.2}, regularity {:.2}, density {:.2}, tempo {:.2}, penalty {:.2}",
        value,
        beat_strength,
        beat_regularity,
        beat_density,
        tempo_alignment,
        tempo_penalty
    );

    Danceability {
        value,
        beat_strength,
        beat_regularity,
        beat_density,
        tempo_alignment,
        tempo_penalty,
    }
}

/// Evenness of the tempogram power: `1 - std / mean`, clamped to [0, 1]
fn tempogram_consistency(envelope: &[f32], frame_rate: f32) -> f32 {
    let Ok(tempogram) = fft_tempogram(envelope, frame_rate, 30.0, 300.0) else {
        return 0.0;
    };
    let powers: Vec<f32> = tempogram.iter().map(|&(_, p)| p).collect();
    let (mean, std) = mean_std(&powers);
    if mean <= 1e-6 {
        return 0.0;
    }
    (1.0 - std / mean).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pulses(period: usize, n: usize) -> (Vec<f32>, Vec<usize>) {
        let mut env = vec![0.05f32; n];
        let beats: Vec<usize> = (0..n).step_by(period).collect();
        for &b in &beats {
            env[b] = 1.0;
        }
        (env, beats)
    }

    #[test]
    fn test_steady_groove_is_danceable() {
        let frame_rate = 43.066;
        let (env, beats) = pulses(22, 1300);
        let bpm = 60.0 * frame_rate / 22.0;
        let d = danceability(&RhythmInputs {
            envelope: &env,
            frame_rate,
            beats: &beats,
            bpm,
            pulse_clarity: 0.9,
            percussive_presence: 0.6,
            pulse_density: 0.1,
            energy: 0.8,
        });
        assert!(d.value > 0.7, "danceability {:.3}", d.value);
        assert!(d.beat_regularity > 0.95);
        assert_eq!(d.tempo_penalty, 1.0);
    }

    #[test]
    fn test_silence_uses_floor() {
        let env = vec![0.0f32; 200];
        let d = danceability(&RhythmInputs {
            envelope: &env,
            frame_rate: 43.0,
            beats: &[],
            bpm: 0.0,
            pulse_clarity: 0.0,
            percussive_presence: 0.0,
            pulse_density: 0.0,
            energy: 0.0,
        });
        assert_eq!(d.value, 0.0);
    }

    #[test]
    fn test_slow_tempo_penalty() {
        let (env, beats) = pulses(86, 1300);
        let d = danceability(&RhythmInputs {
            envelope: &env,
            frame_rate: 43.066,
            beats: &beats,
            bpm: 30.0,
            pulse_clarity: 0.9,
            percussive_presence: 0.6,
            pulse_density: 0.1,
            energy: 0.8,
        });
        assert!((d.tempo_penalty - 0.5).abs() < 1e-6);
    }
}
