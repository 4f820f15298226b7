//! Continuous track descriptors
//!
//! Energy, danceability, valence and mood, acousticness, loudness and dynamics, and the
//! spectral shape measures they build on. Everything here reads artifacts the tempo and
//! key stages already computed; no extra transforms are run.

pub mod danceability;
pub mod energy;
pub mod loudness;
pub mod timbre;
pub mod valence;

use crate::analysis::result::Key;
use crate::config::AnalysisConfig;
use crate::features::spectral::context::AnalysisContext;
use crate::features::tempo::TempoEstimate;
use danceability::{danceability, Danceability, RhythmInputs};
use loudness::{measure_loudness, Loudness};
use serde::{Deserialize, Serialize};
use valence::{chroma_entropy, valence_and_mood, Mood, ValenceInputs};

/// Roll-off energy fraction
const ROLLOFF_FRACTION: f32 = 0.85;

/// Descriptor set of one analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Descriptors {
    /// Perceived energy in [0, 1]
    pub energy: f32,
    /// Loud-frame RMS energy in [0, 1]
    pub rms_energy: f32,
    /// Percussive share of the tempo-window power
    pub percussive_presence: f32,
    /// Mean onset strength
    pub pulse_density: f32,
    /// Danceability in [0, 1]
    pub danceability: f32,
    /// Danceability breakdown
    pub danceability_components: Danceability,
    /// Valence in [0, 1]
    pub valence: f32,
    /// Mood band of the valence
    pub mood: Mood,
    /// Acousticness in [0, 1]
    pub acousticness: f32,
    /// Loudness, dynamic range and silence ratio
    pub loudness: Loudness,
    /// Mean spectral centroid in Hz
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spectral_centroid: Option<f32>,
    /// Mean 85 % spectral roll-off in Hz
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spectral_rolloff: Option<f32>,
    /// Entropy of the chroma profile, in nats
    pub chroma_entropy: f32,
}

impl Descriptors {
    /// Look up a descriptor by its calibration feature name
    pub fn get(&self, name: &str) -> Option<f32> {
        match name {
            "energy" => Some(self.energy),
            "danceability" => Some(self.danceability),
            "valence" => Some(self.valence),
            "acousticness" => Some(self.acousticness),
            "loudness" => Some(self.loudness.loudness_db),
            "dynamic_range" => Some(self.loudness.dynamic_range_db),
            "silence_ratio" => Some(self.loudness.silence_ratio),
            "rms_energy" => Some(self.rms_energy),
            "percussive_presence" => Some(self.percussive_presence),
            "pulse_density" => Some(self.pulse_density),
            "spectral_centroid" => self.spectral_centroid,
            "spectral_rolloff" => self.spectral_rolloff,
            "chroma_entropy" => Some(self.chroma_entropy),
            _ => None,
        }
    }

    /// Overwrite a descriptor by its calibration feature name; returns false for unknown
    /// or derived names
    pub fn set(&mut self, name: &str, value: f32) -> bool {
        let slot = match name {
            "energy" => &mut self.energy,
            "danceability" => &mut self.danceability,
            "valence" => &mut self.valence,
            "acousticness" => &mut self.acousticness,
            "loudness" => &mut self.loudness.loudness_db,
            "dynamic_range" => &mut self.loudness.dynamic_range_db,
            "silence_ratio" => &mut self.loudness.silence_ratio,
            "spectral_centroid" => {
                self.spectral_centroid = Some(value);
                return true;
            }
            _ => return false,
        };
        *slot = value;
        if name == "valence" {
            self.mood = Mood::from_valence(value);
        }
        true
    }

    /// Descriptors of a buffer that carries no signal
    pub fn silent() -> Self {
        Self {
            energy: 0.0,
            rms_energy: 0.0,
            percussive_presence: 0.0,
            pulse_density: 0.0,
            danceability: 0.0,
            danceability_components: Danceability::default(),
            valence: 0.0,
            mood: Mood::from_valence(0.0),
            acousticness: 0.0,
            loudness: Loudness {
                loudness_db: loudness::SILENT_LOUDNESS_DB,
                dynamic_range_db: 0.0,
                silence_ratio: 1.0,
            },
            spectral_centroid: None,
            spectral_rolloff: None,
            chroma_entropy: 0.0,
        }
    }
}

/// Compute every descriptor
pub fn compute_descriptors(
    ctx: &AnalysisContext,
    tempo: &TempoEstimate,
    key: Key,
    chroma: &[f32; 12],
    config: &AnalysisConfig,
) -> Descriptors {
    let rms_energy = tempo.diagnostics.energy_rms;
    let (harmonic_power, percussive_power) = ctx.component_power();
    let percussive_presence = energy::percussive_presence(harmonic_power, percussive_power);
    let pulse_density = energy::pulse_density(&tempo.envelope.values);
    let energy = energy::energy_score(rms_energy, percussive_presence, pulse_density);

    let dance = danceability(&RhythmInputs {
        envelope: &tempo.envelope.values,
        frame_rate: tempo.envelope.frame_rate,
        beats: &tempo.beats,
        bpm: tempo.bpm,
        pulse_clarity: tempo.diagnostics.raw.pulse_clarity,
        percussive_presence,
        pulse_density,
        energy,
    });

    let spectral_centroid = ctx.spectrum.as_ref().map(timbre::spectral_centroid);
    let spectral_rolloff = ctx
        .spectrum
        .as_ref()
        .map(|s| timbre::spectral_rolloff(s, ROLLOFF_FRACTION));
    let pitch_variance_ratio = ctx
        .harmonic_spectrum()
        .and_then(timbre::pitch_variance_ratio);

    let (valence, mood) = valence_and_mood(&ValenceInputs {
        bpm: tempo.bpm,
        key,
        chroma,
        energy,
        pitch_variance_ratio,
        spectral_rolloff,
    });

    let acousticness = timbre::acousticness(
        spectral_centroid,
        harmonic_power,
        percussive_power,
        &tempo.envelope.values,
    );
    let loudness = measure_loudness(&ctx.samples, config.frame_size);

    log::debug!(
        "Descriptors: energy {:.2}, danceability {:.2}, valence {:.2} ({:?}), acousticness {:.2}, loudness {:.1} dB",
        energy,
        dance.value,
        valence,
        mood,
        acousticness,
        loudness.loudness_db
    );

    Descriptors {
        energy,
        rms_energy,
        percussive_presence,
        pulse_density,
        danceability: dance.value,
        danceability_components: dance,
        valence,
        mood,
        acousticness,
        loudness,
        spectral_centroid,
        spectral_rolloff,
        chroma_entropy: chroma_entropy(chroma),
    }
}

/// Percentile with linear interpolation between order statistics (0 for empty input)
pub fn percentile(values: &[f32], q: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pos = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f32;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f32;
    sorted[lo] * (1.0 - frac) + sorted[hi] * frac
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 50.0), 3.0);
        assert_eq!(percentile(&values, 100.0), 5.0);
        assert!((percentile(&values, 90.0) - 4.6).abs() < 1e-6);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_set_by_feature_name() {
        let mut d = Descriptors::silent();
        assert!(d.set("valence", 0.8));
        assert_eq!(d.mood, Mood::Euphoric);
        assert!(d.set("loudness", -9.5));
        assert_eq!(d.get("loudness"), Some(-9.5));
        assert!(d.set("spectral_centroid", 1800.0));
        assert_eq!(d.get("spectral_centroid"), Some(1800.0));
        assert!(!d.set("rms_energy", 0.3));
        assert_eq!(d.get("tempo"), None);
    }
}
