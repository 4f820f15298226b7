//! Analysis result types
//!
//! [`AnalysisResult`] is the only record handed to callers. Every block serializes with
//! serde so the serving layer can cache it as JSON unchanged.

use crate::analysis::chunks::ChunkAnalysis;
use crate::features::beat_tracking::time_signature::TimeSignatureEstimate;
use crate::features::descriptors::Descriptors;
use crate::features::key::{KeyEstimate, Mode};
use crate::features::tempo::TempoDiagnostics;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pitch-class names with sharps, index 0 = C
pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Musical key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Key {
    /// Major key (0 = C, 1 = C#, ..., 11 = B)
    Major(u32),
    /// Minor key (0 = C, 1 = C#, ..., 11 = B)
    Minor(u32),
}

impl Key {
    /// Key from a tonic pitch class and mode
    pub fn new(root: u32, mode: Mode) -> Self {
        match mode {
            Mode::Major => Key::Major(root % 12),
            Mode::Minor => Key::Minor(root % 12),
        }
    }

    /// Tonic pitch class (0 = C)
    pub fn root(&self) -> u32 {
        match self {
            Key::Major(i) | Key::Minor(i) => *i % 12,
        }
    }

    /// Mode of the key
    pub fn mode(&self) -> Mode {
        match self {
            Key::Major(_) => Mode::Major,
            Key::Minor(_) => Mode::Minor,
        }
    }

    /// Display label, root name plus mode (e.g. "C major", "F# minor")
    ///
    /// # Example
    ///
    /// ```
    /// use fingerprint_dsp::analysis::result::Key;
    ///
    /// assert_eq!(Key::Major(0).label(), "C major");
    /// assert_eq!(Key::Minor(6).label(), "F# minor");
    /// ```
    pub fn label(&self) -> String {
        format!("{} {}", NOTE_NAMES[self.root() as usize], self.mode().as_str())
    }

    /// Canonical id used by calibration files (e.g. "0:major", "9:minor")
    pub fn canonical_id(&self) -> String {
        format!("{}:{}", self.root(), self.mode().as_str())
    }

    /// Parse a canonical id produced by [`Key::canonical_id`]
    ///
    /// # Example
    ///
    /// ```
    /// use fingerprint_dsp::analysis::result::Key;
    ///
    /// assert_eq!(Key::from_canonical_id("9:minor"), Some(Key::Minor(9)));
    /// assert_eq!(Key::from_canonical_id("14:major"), Some(Key::Major(2)));
    /// assert_eq!(Key::from_canonical_id("C major"), None);
    /// ```
    pub fn from_canonical_id(id: &str) -> Option<Self> {
        let (root, mode) = id.trim().split_once(':')?;
        let root: u32 = root.trim().parse().ok()?;
        Some(Self::new(root, Mode::parse(mode)?))
    }

    /// Parse a display label such as "Db major", "A minor" or "F#m"
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        let mut chars = label.chars();
        let letter = chars.next()?.to_ascii_uppercase();
        let natural: i32 = match letter {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => return None,
        };
        let rest = chars.as_str();
        let (shift, rest) = if let Some(r) = rest.strip_prefix('#').or_else(|| rest.strip_prefix('♯')) {
            (1, r)
        } else if let Some(r) = rest.strip_prefix('b').or_else(|| rest.strip_prefix('♭')) {
            (-1, r)
        } else {
            (0, rest)
        };
        let root = (natural + shift).rem_euclid(12) as u32;
        let rest = rest.trim();
        let mode = if rest.is_empty() {
            Mode::Major
        } else if rest == "m" {
            Mode::Minor
        } else {
            Mode::parse(rest)?
        };
        Some(Self::new(root, mode))
    }
}

/// Analysis flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisFlag {
    /// Buffer was empty, had no sample rate, or carried no onset energy
    SilentInput,
    /// Track is shorter than the preview threshold
    ShortClip,
    /// The spectral transform failed and the time-domain split was used
    SpectralFallback,
    /// Chunk windows disagree on the key root
    KeyModulating,
    /// Chunk consensus stopped before covering every window
    ChunksTruncated,
}

/// Complete analysis result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// BPM estimate (0 for silence)
    pub bpm: f32,

    /// BPM confidence (0.0-1.0)
    pub bpm_confidence: f32,

    /// Detected key
    pub key: Key,

    /// Display label of `key` (e.g. "C major")
    pub key_label: String,

    /// Key confidence (0.0-1.0)
    pub key_confidence: f32,

    /// Rule or stage that produced the key
    pub key_source: String,

    /// Chunk windows disagree on the key root
    pub key_modulating: bool,

    /// Circular spread of the chunk key roots, in semitones
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_dispersion_semitones: Option<f32>,

    /// Meter estimated from beat accents
    pub time_signature: TimeSignatureEstimate,

    /// Continuous descriptors
    pub descriptors: Descriptors,

    /// Tempo candidates, raw estimates and fired correction passes
    pub tempo_diagnostics: TempoDiagnostics,

    /// Key evidence: chroma, template scores, votes and fired rules
    pub key_details: KeyEstimate,

    /// Chunk consensus block (long tracks only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks: Option<ChunkAnalysis>,

    /// Calibration steps that changed the result, in order
    pub calibration_applied: Vec<String>,

    /// Analysis metadata
    pub metadata: AnalysisMetadata,
}

impl AnalysisResult {
    /// Zero-confidence result: 0 BPM, C major, silent descriptors
    pub fn silent(duration_seconds: f32, sample_rate: u32) -> Self {
        let key_details = KeyEstimate::silent();
        let mut metadata = AnalysisMetadata {
            duration_seconds,
            sample_rate,
            algorithm_version: env!("CARGO_PKG_VERSION").to_string(),
            is_short_clip: crate::config::is_short_clip(duration_seconds),
            ..AnalysisMetadata::default()
        };
        metadata.flag(AnalysisFlag::SilentInput);
        Self {
            bpm: 0.0,
            bpm_confidence: 0.0,
            key: key_details.key,
            key_label: key_details.key.label(),
            key_confidence: 0.0,
            key_source: key_details.key_source.clone(),
            key_modulating: false,
            key_dispersion_semitones: None,
            time_signature: TimeSignatureEstimate::default(),
            descriptors: Descriptors::silent(),
            tempo_diagnostics: TempoDiagnostics::default(),
            key_details,
            chunks: None,
            calibration_applied: Vec::new(),
            metadata,
        }
    }

    /// Replace the key and keep the label in sync
    pub fn set_key(&mut self, key: Key) {
        self.key = key;
        self.key_label = key.label();
    }

    /// Value of a calibration feature column (`bpm`, `bpm_confidence`, `key_confidence`,
    /// `duration` or any descriptor name)
    pub fn feature(&self, name: &str) -> Option<f32> {
        match name {
            "bpm" => Some(self.bpm),
            "bpm_confidence" => Some(self.bpm_confidence),
            "key_confidence" => Some(self.key_confidence),
            "duration" | "signal_duration" => Some(self.metadata.duration_seconds),
            _ => self.descriptors.get(name),
        }
    }

    /// Overwrite a calibration target; returns false for names that cannot be set
    pub fn set_feature(&mut self, name: &str, value: f32) -> bool {
        match name {
            "bpm" => {
                self.bpm = value;
                true
            }
            "bpm_confidence" => {
                self.bpm_confidence = value.clamp(0.0, 1.0);
                true
            }
            "key_confidence" => {
                self.key_confidence = value.clamp(0.0, 1.0);
                true
            }
            _ => self.descriptors.set(name, value),
        }
    }

    /// True if `flag` was raised
    pub fn has_flag(&self, flag: AnalysisFlag) -> bool {
        self.metadata.flags.contains(&flag)
    }
}

/// Analysis metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    /// Trimmed audio duration in seconds
    pub duration_seconds: f32,

    /// Sample rate the analysis ran at, in Hz
    pub sample_rate: u32,

    /// Processing time in milliseconds
    pub processing_time_ms: f32,

    /// Algorithm version
    pub algorithm_version: String,

    /// Track was analyzed as a preview clip
    pub is_short_clip: bool,

    /// Only the tempo window was transformed
    pub full_transform_skipped: bool,

    /// Analysis flags
    pub flags: Vec<AnalysisFlag>,

    /// Wall time per stage, in milliseconds
    pub stage_timings_ms: BTreeMap<String, f32>,

    /// Versions of the calibration files in effect
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration_version: Option<String>,
}

impl AnalysisMetadata {
    /// Raise `flag` once
    pub fn flag(&mut self, flag: AnalysisFlag) {
        if !self.flags.contains(&flag) {
            self.flags.push(flag);
        }
    }
}
