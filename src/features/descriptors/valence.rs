//! Valence (musical positiveness) and mood label
//!
//! Valence adds up a mode factor, key brightness, a tempo band, energy, chroma entropy,
//! pitch expressiveness and spectral brightness, clamped to [0, 1]. The mood label is a
//! banding of the final value.

use crate::analysis::result::Key;
use crate::features::key::Mode;
use serde::{Deserialize, Serialize};

/// Perceived brightness of each tonic, C through B
const KEY_BRIGHTNESS: [f32; 12] = [
    0.7, 0.35, 0.65, 0.3, 0.8, 0.55, 0.25, 0.75, 0.4, 0.5, 0.6, 0.45,
];

/// Mood band of a valence value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    /// valence >= 0.75
    Euphoric,
    /// valence >= 0.6
    Uplifting,
    /// valence >= 0.45
    Positive,
    /// valence >= 0.3
    Calm,
    /// valence < 0.3
    Melancholic,
}

impl Mood {
    /// Band a valence value
    pub fn from_valence(valence: f32) -> Self {
        match valence {
            v if v >= 0.75 => Mood::Euphoric,
            v if v >= 0.6 => Mood::Uplifting,
            v if v >= 0.45 => Mood::Positive,
            v if v >= 0.3 => Mood::Calm,
            _ => Mood::Melancholic,
        }
    }
}

/// Inputs of the valence estimate
#[derive(Debug, Clone, Copy)]
pub struct ValenceInputs<'a> {
    /// Final tempo
    pub bpm: f32,
    /// Final key
    pub key: Key,
    /// Track chroma profile
    pub chroma: &'a [f32; 12],
    /// Energy descriptor
    pub energy: f32,
    /// Pitch standard deviation over mean, when a pitch track exists
    pub pitch_variance_ratio: Option<f32>,
    /// Mean spectral roll-off in Hz, when a spectrum exists
    pub spectral_rolloff: Option<f32>,
}

/// Estimate valence and its mood band
pub fn valence_and_mood(input: &ValenceInputs<'_>) -> (f32, Mood) {
    let brightness = KEY_BRIGHTNESS[input.key.root() as usize % 12];
    let (base, mode_factor) = match input.key.mode() {
        Mode::Major => (brightness, 0.65),
        Mode::Minor => (brightness * 0.5, 0.35),
    };

    let tempo_factor = match input.bpm {
        b if b < 70.0 => -0.2,
        b if b < 100.0 => 0.0,
        b if b < 130.0 => 0.2,
        b if b < 160.0 => 0.1,
        _ => -0.1,
    };
    let energy_factor = input.energy.clamp(0.0, 1.0) * 0.1;
    let chroma_factor = (chroma_entropy(input.chroma) / 2.5).clamp(0.0, 1.0) * 0.15;
    let pitch_factor = match input.pitch_variance_ratio {
        Some(r) if (0.05..=0.15).contains(&r) => 0.1,
        Some(r) if r > 0.15 => -0.15,
        _ => 0.0,
    };
    let spectral_factor = input
        .spectral_rolloff
        .map_or(0.0, |r| ((r - 1000.0) / 7000.0).clamp(0.0, 1.0) * 0.1);

    let valence = (mode_factor
        + base * 0.3
        + tempo_factor
        + energy_factor
        + chroma_factor
        + pitch_factor
        + spectral_factor)
        .clamp(0.0, 1.0);
    (valence, Mood::from_valence(valence))
}

/// Shannon entropy (nats) of the chroma profile treated as a distribution
pub fn chroma_entropy(chroma: &[f32; 12]) -> f32 {
    let total: f32 = chroma.iter().sum::<f32>() + 1e-9;
    chroma
        .iter()
        .map(|&c| {
            let p = c / total;
            -p * (p + 1e-9).ln()
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_major_brighter_than_minor() {
        let chroma = [1.0f32; 12];
        let input = |key| ValenceInputs {
            bpm: 120.0,
            key,
            chroma: &chroma,
            energy: 0.7,
            pitch_variance_ratio: None,
            spectral_rolloff: Some(4000.0),
        };
        let (major, _) = valence_and_mood(&input(Key::Major(4)));
        let (minor, _) = valence_and_mood(&input(Key::Minor(4)));
        assert!(major > minor);
        assert!((0.0..=1.0).contains(&major));
    }

    #[test]
    fn test_mood_bands() {
        assert_eq!(Mood::from_valence(0.9), Mood::Euphoric);
        assert_eq!(Mood::from_valence(0.5), Mood::Positive);
        assert_eq!(Mood::from_valence(0.1), Mood::Melancholic);
    }

    #[test]
    fn test_chroma_entropy_range() {
        let flat = chroma_entropy(&[1.0; 12]);
        assert!((flat - 12.0f32.ln()).abs() < 1e-3);
        let mut single = [0.0f32; 12];
        single[0] = 1.0;
        assert!(chroma_entropy(&single) < 1e-3);
        assert_eq!(chroma_entropy(&[0.0; 12]), 0.0);
    }
}
