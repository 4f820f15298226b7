//! Key detection modules
//!
//! Detect musical key using:
//! - Krumhansl-Kessler templates (24 keys, Pearson correlation)
//! - Sliding-window vote consensus
//! - An optional external tonal estimator (standard and percussion-robust profiles)
//! - An ordered list of override rules, each tagged with the `key_source` it reports

pub mod consensus;
pub mod detector;
pub mod rules;
pub mod templates;

pub use consensus::{window_consensus, KeyVote, WindowConsensus};
pub use detector::{detect_key, KeyEstimate};
pub use rules::{apply_rules, KeyEvidence, KeyState, KEY_RULES};
pub use templates::{score_templates, TemplateScore};

use crate::error::AnalysisError;
use serde::{Deserialize, Serialize};

/// Key mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Major (Ionian)
    Major,
    /// Natural minor (Aeolian)
    Minor,
}

impl Mode {
    /// Lower-case name, as used in canonical key ids
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Major => "major",
            Mode::Minor => "minor",
        }
    }

    /// The other mode
    pub fn opposite(&self) -> Self {
        match self {
            Mode::Major => Mode::Minor,
            Mode::Minor => Mode::Major,
        }
    }

    /// Parse a mode label (`"major"`, `"Minor"`, `"min"`, …)
    pub fn parse(label: &str) -> Option<Self> {
        let label = label.trim().to_ascii_lowercase();
        if label.starts_with("maj") {
            Some(Mode::Major)
        } else if label.starts_with("min") {
            Some(Mode::Minor)
        } else {
            None
        }
    }
}

/// One competing key answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyCandidate {
    /// Pitch class of the tonic (0 = C)
    pub root: u32,
    /// Mode
    pub mode: Mode,
    /// Confidence or score in [0, 1]
    pub confidence: f32,
    /// Where the candidate came from
    pub source: String,
}

impl KeyCandidate {
    /// Build a candidate, folding the root into 0..12 and clamping the confidence
    pub fn new(root: u32, mode: Mode, confidence: f32, source: impl Into<String>) -> Self {
        Self {
            root: root % 12,
            mode,
            confidence: confidence.clamp(0.0, 1.0),
            source: source.into(),
        }
    }

    /// True if this candidate names `root` in `mode` with at least `min_score`
    pub fn supports(&self, root: u32, mode: Mode, min_score: f32) -> bool {
        self.confidence >= min_score && self.root == root % 12 && self.mode == mode
    }
}

/// Profile requested from an external tonal estimator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TonalProfile {
    /// General-purpose key profile
    Standard,
    /// Profile tuned for drum-heavy material
    Percussive,
}

/// Optional secondary key estimator blended into the answer
///
/// Implementations receive the samples of the analysis window.
/// Errors are logged by the detector and the candidate is treated as absent.
pub trait TonalEstimator: Send + Sync {
    /// Estimate a key with the given profile
    fn estimate(
        &self,
        samples: &[f32],
        sample_rate: u32,
        profile: TonalProfile,
    ) -> Result<KeyCandidate, AnalysisError>;
}

/// Interval from `reference` up to `candidate`, in semitones (0..12)
pub fn interval(candidate: u32, reference: u32) -> u32 {
    (candidate % 12 + 12 - reference % 12) % 12
}

/// True for a perfect fourth or fifth
pub fn is_fifth_related(candidate: u32, reference: u32) -> bool {
    matches!(interval(candidate, reference), 5 | 7)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intervals() {
        assert_eq!(interval(7, 0), 7);
        assert_eq!(interval(0, 7), 5);
        assert_eq!(interval(3, 3), 0);
        assert!(is_fifth_related(5, 0));
        assert!(is_fifth_related(2, 9));
        assert!(!is_fifth_related(4, 0));
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(Mode::parse("Major"), Some(Mode::Major));
        assert_eq!(Mode::parse(" min"), Some(Mode::Minor));
        assert_eq!(Mode::parse("dorian"), None);
        assert_eq!(Mode::Major.opposite(), Mode::Minor);
    }

    #[test]
    fn test_candidate_support() {
        let c = KeyCandidate::new(14, Mode::Minor, 1.3, "external");
        assert_eq!(c.root, 2);
        assert_eq!(c.confidence, 1.0);
        assert!(c.supports(2, Mode::Minor, 0.5));
        assert!(!c.supports(2, Mode::Major, 0.5));
    }
}
