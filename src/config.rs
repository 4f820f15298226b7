//! Configuration parameters for audio analysis
//!
//! Every tuned constant of the decision core lives here so it can be overridden as
//! configuration rather than treated as algorithmic truth. The defaults reproduce the
//! reference behaviour; [`AnalysisConfig::from_env`] layers `FINGERPRINT_*` environment
//! overrides on top of them.

use crate::error::AnalysisError;
use std::path::PathBuf;
use std::str::FromStr;

/// Tracks shorter than this (seconds) are treated as preview clips
pub const SHORT_CLIP_THRESHOLD: f32 = 45.0;

/// Analysis configuration parameters
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    // Front-end
    /// Target analysis sample rate; faster inputs are decimated (default: 22050)
    pub analysis_sample_rate: u32,

    /// Frame size for STFT (default: 2048)
    pub frame_size: usize,

    /// Hop size for STFT (default: 512)
    pub hop_size: usize,

    /// Smallest frame size the reduced-size retry may use (default: 256)
    pub min_frame_size: usize,

    /// Fixed lead-in trimmed before analysis, in seconds (default: 0.5)
    pub trim_seconds: f32,

    /// Length of the tempo analysis window for full tracks, in seconds (default: 60.0)
    ///
    /// Tracks longer than this skip the full-track transform.
    pub tempo_window_seconds: f32,

    /// Only the first `max_analysis_seconds` of the buffer are analyzed when set
    pub max_analysis_seconds: Option<f32>,

    /// Median kernel length for HPSS, in frames and bins (default: 17)
    pub hpss_kernel: usize,

    /// Soft-mask exponent for HPSS (default: 2.0)
    pub hpss_mask_power: f32,

    // Tempo
    /// Lowest BPM any candidate may carry (default: 20.0)
    pub min_bpm: f32,

    /// Highest BPM any candidate may carry (default: 280.0)
    pub max_bpm: f32,

    /// Centre of the log-normal tempo prior used by the beat tracker (default: 120.0)
    pub prior_bpm: f32,

    /// Candidate scoring weights
    pub tempo_weights: TempoWeights,

    /// Allow the short-clip tempo corrections (mid-tempo and extended octave) on preview-length
    /// input (default: true; chunk windows run without them)
    pub short_clip_corrections: bool,

    // Key
    /// Key override thresholds
    pub key: KeyThresholds,

    // Chunk consensus
    /// Run chunk consensus on long tracks (default: true)
    pub enable_chunks: bool,

    /// Chunk sizing and abort limits
    pub chunks: ChunkSettings,

    // Runtime
    /// Wall-clock budget for one whole-track analysis, in seconds (default: 120.0)
    pub analysis_timeout_seconds: f32,

    /// Worker threads for [`crate::worker::AnalysisPool`] (default: available parallelism)
    pub workers: usize,

    /// Calibration rule files
    pub calibration: CalibrationPaths,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            analysis_sample_rate: 22050,
            frame_size: 2048,
            hop_size: 512,
            min_frame_size: 256,
            trim_seconds: 0.5,
            tempo_window_seconds: 60.0,
            max_analysis_seconds: None,
            hpss_kernel: 17,
            hpss_mask_power: 2.0,
            min_bpm: 20.0,
            max_bpm: 280.0,
            prior_bpm: 120.0,
            tempo_weights: TempoWeights::default(),
            short_clip_corrections: true,
            key: KeyThresholds::default(),
            enable_chunks: true,
            chunks: ChunkSettings::default(),
            analysis_timeout_seconds: 120.0,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2),
            calibration: CalibrationPaths::default(),
        }
    }
}

/// Weights of the tempo candidate score
///
/// `alignment` weighs the typical-tempo curve, `detector` the agreement with the raw
/// detectors and `pulse` the similarity to the pulse-derived tempo. Short clips lean on
/// the detectors more because the alignment curve is less reliable on a few bars.
#[derive(Debug, Clone, Copy)]
pub struct TempoWeights {
    /// Alignment weight for full tracks (default: 0.40)
    pub alignment: f32,
    /// Detector-agreement weight for full tracks (default: 0.30)
    pub detector: f32,
    /// Pulse-tempo weight for full tracks (default: 0.15)
    pub pulse: f32,
    /// Alignment weight for short clips (default: 0.25)
    pub short_alignment: f32,
    /// Detector-agreement weight for short clips (default: 0.35)
    pub short_detector: f32,
    /// Pulse-tempo weight for short clips (default: 0.20)
    pub short_pulse: f32,
}

impl Default for TempoWeights {
    fn default() -> Self {
        Self {
            alignment: 0.40,
            detector: 0.30,
            pulse: 0.15,
            short_alignment: 0.25,
            short_detector: 0.35,
            short_pulse: 0.20,
        }
    }
}

impl TempoWeights {
    /// Returns `(alignment, detector, pulse)` for the given clip class
    pub fn for_clip(&self, short_clip: bool) -> (f32, f32, f32) {
        if short_clip {
            (self.short_alignment, self.short_detector, self.short_pulse)
        } else {
            (self.alignment, self.detector, self.pulse)
        }
    }
}

/// Strictness of one external-estimator blend
#[derive(Debug, Clone, Copy)]
pub struct BlendThresholds {
    /// Score needed to override root and mode
    pub strict: f32,
    /// Score needed to switch mode when the root already matches
    pub mode: f32,
    /// Score needed to rescue a low-confidence answer
    pub rescue: f32,
}

/// Empirically tuned key override thresholds
#[derive(Debug, Clone, Copy)]
pub struct KeyThresholds {
    /// Window length for window consensus, in seconds (default: 6.0)
    pub window_seconds: f32,
    /// Hop between consensus windows, in seconds (default: 3.0)
    pub window_hop_seconds: f32,
    /// Standard-profile external blend (default: 0.55 / 0.35 / 0.40)
    pub external_standard: BlendThresholds,
    /// Percussion-robust external blend (default: 0.55 / 0.33 / 0.42)
    pub external_percussive: BlendThresholds,
    /// Answers below this confidence may be rescued by an external candidate (default: 0.35)
    pub rescue_confidence: f32,
    /// External score needed for a dominant/subdominant override (default: 0.55)
    pub dominant_override_score: f32,
    /// External score needed for the tonic override (default: 0.55)
    pub tonic_override_score: f32,
    /// Current confidence needed before the tonic override is considered (default: 0.45)
    pub tonic_override_confidence: f32,
    /// Chroma gap that justifies a peak override (default: 0.075)
    pub chroma_peak_gap: f32,
    /// Window support that justifies a peak override (default: 0.55)
    pub chroma_peak_support: f32,
    /// Window-support advantage that justifies a peak override (default: 0.18)
    pub chroma_peak_support_gap: f32,
    /// Chroma ratio a fifth-related root needs on short clips (default: 0.57)
    pub fifth_chroma_ratio: f32,
    /// Mode bias only runs below this confidence (default: 0.5)
    pub mode_bias_confidence: f32,
    /// Minimum |third/sixth bias| for a mode switch (default: 0.08)
    pub mode_bias_min: f32,
    /// Template score the opposite mode needs to rescue the mode (default: 0.58)
    pub mode_rescue_score: f32,
    /// Major/minor vote difference for a window mode switch (default: 0.32)
    pub window_mode_diff: f32,
    /// Runner-up window support that promotes it (default: 0.72)
    pub runner_support: f32,
    /// Same, for fifth-related runners on short clips (default: 0.78)
    pub runner_support_short_fifth: f32,
    /// Template gap a promoted runner-up may trail by (default: 0.025)
    pub runner_margin: f32,
}

impl Default for KeyThresholds {
    fn default() -> Self {
        Self {
            window_seconds: 6.0,
            window_hop_seconds: 3.0,
            external_standard: BlendThresholds {
                strict: 0.55,
                mode: 0.35,
                rescue: 0.40,
            },
            external_percussive: BlendThresholds {
                strict: 0.55,
                mode: 0.33,
                rescue: 0.42,
            },
            rescue_confidence: 0.35,
            dominant_override_score: 0.55,
            tonic_override_score: 0.55,
            tonic_override_confidence: 0.45,
            chroma_peak_gap: 0.075,
            chroma_peak_support: 0.55,
            chroma_peak_support_gap: 0.18,
            fifth_chroma_ratio: 0.57,
            mode_bias_confidence: 0.5,
            mode_bias_min: 0.08,
            mode_rescue_score: 0.58,
            window_mode_diff: 0.32,
            runner_support: 0.72,
            runner_support_short_fifth: 0.78,
            runner_margin: 0.025,
        }
    }
}

/// Chunk consensus sizing and abort limits
#[derive(Debug, Clone, Copy)]
pub struct ChunkSettings {
    /// Upper bound on the window length, in seconds (default: 15.0)
    pub chunk_seconds: f32,
    /// Overlap between windows, in seconds (default: 5.0)
    pub overlap_seconds: f32,
    /// Smallest window worth analyzing, in seconds (default: 5.0)
    pub min_chunk_seconds: f32,
    /// Most windows analyzed per track (default: 16)
    pub max_windows: usize,
    /// Window length target in beats at the global tempo (default: 8.0)
    pub target_beats: f32,
    /// A single window slower than this aborts the run, in seconds (default: 30.0)
    pub window_timeout_seconds: f32,
    /// Tracks shorter than this never run chunk consensus, in seconds (default: 22.5)
    pub min_track_seconds: f32,
}

impl Default for ChunkSettings {
    fn default() -> Self {
        Self {
            chunk_seconds: 15.0,
            overlap_seconds: 5.0,
            min_chunk_seconds: 5.0,
            max_windows: 16,
            target_beats: 8.0,
            window_timeout_seconds: 30.0,
            min_track_seconds: 22.5,
        }
    }
}

/// Locations of the four calibration rule files
///
/// A missing path (or a missing file) leaves that rule set empty.
#[derive(Debug, Clone, Default)]
pub struct CalibrationPaths {
    /// Linear scaler rules
    pub scalers: Option<PathBuf>,
    /// Key confusion map
    pub key_map: Option<PathBuf>,
    /// Ridge regression models
    pub ridge: Option<PathBuf>,
    /// BPM correction rules
    pub bpm_rules: Option<PathBuf>,
}

impl AnalysisConfig {
    /// Default configuration with `FINGERPRINT_*` environment overrides applied
    ///
    /// Recognised variables: `FINGERPRINT_TEMPO_WINDOW`, `FINGERPRINT_MAX_SECONDS`,
    /// `FINGERPRINT_ENABLE_CHUNKS`, `FINGERPRINT_CHUNK_SECONDS`, `FINGERPRINT_CHUNK_OVERLAP`,
    /// `FINGERPRINT_CHUNK_MAX_WINDOWS`, `FINGERPRINT_TIMEOUT`, `FINGERPRINT_WORKERS`,
    /// `FINGERPRINT_SCALERS`, `FINGERPRINT_KEY_MAP`, `FINGERPRINT_RIDGE` and
    /// `FINGERPRINT_BPM_RULES`. Malformed values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`AnalysisConfig::from_env`] with an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "FINGERPRINT_TEMPO_WINDOW") {
            config.tempo_window_seconds = v;
        }
        if let Some(v) = parse_var::<f32, _>(&lookup, "FINGERPRINT_MAX_SECONDS") {
            config.max_analysis_seconds = (v > 0.0).then_some(v);
        }
        if let Some(v) = lookup("FINGERPRINT_ENABLE_CHUNKS") {
            match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => config.enable_chunks = true,
                "0" | "false" | "no" | "off" => config.enable_chunks = false,
                other => log::warn!("Ignoring FINGERPRINT_ENABLE_CHUNKS={:?}", other),
            }
        }
        if let Some(v) = parse_var(&lookup, "FINGERPRINT_CHUNK_SECONDS") {
            config.chunks.chunk_seconds = v;
        }
        if let Some(v) = parse_var(&lookup, "FINGERPRINT_CHUNK_OVERLAP") {
            config.chunks.overlap_seconds = v;
        }
        if let Some(v) = parse_var(&lookup, "FINGERPRINT_CHUNK_MAX_WINDOWS") {
            config.chunks.max_windows = v;
        }
        if let Some(v) = parse_var(&lookup, "FINGERPRINT_TIMEOUT") {
            config.analysis_timeout_seconds = v;
        }
        if let Some(v) = parse_var::<usize, _>(&lookup, "FINGERPRINT_WORKERS") {
            config.workers = v.max(1);
        }

        let path = |name: &str| lookup(name).filter(|s| !s.trim().is_empty()).map(PathBuf::from);
        if let Some(p) = path("FINGERPRINT_SCALERS") {
            config.calibration.scalers = Some(p);
        }
        if let Some(p) = path("FINGERPRINT_KEY_MAP") {
            config.calibration.key_map = Some(p);
        }
        if let Some(p) = path("FINGERPRINT_RIDGE") {
            config.calibration.ridge = Some(p);
        }
        if let Some(p) = path("FINGERPRINT_BPM_RULES") {
            config.calibration.bpm_rules = Some(p);
        }

        config
    }

    /// Check the parameters the pipeline cannot recover from
    ///
    /// # Errors
    ///
    /// Returns `AnalysisError::InvalidInput` naming the first offending field
    pub fn validate(&self) -> Result<(), AnalysisError> {
        let invalid = |msg: String| Err(AnalysisError::InvalidInput(msg));
        if self.analysis_sample_rate == 0 {
            return invalid("analysis_sample_rate must be positive".to_string());
        }
        if self.hop_size == 0 || self.min_frame_size == 0 {
            return invalid(format!(
                "hop_size ({}) and min_frame_size ({}) must be positive",
                self.hop_size, self.min_frame_size
            ));
        }
        if self.frame_size < self.min_frame_size {
            return invalid(format!(
                "frame_size {} is below min_frame_size {}",
                self.frame_size, self.min_frame_size
            ));
        }
        if !(self.min_bpm > 0.0 && self.min_bpm < self.max_bpm) {
            return invalid(format!(
                "BPM range [{}, {}] is empty",
                self.min_bpm, self.max_bpm
            ));
        }
        if !(self.tempo_window_seconds > 0.0) {
            return invalid("tempo_window_seconds must be positive".to_string());
        }
        if self.enable_chunks && !(self.chunks.min_chunk_seconds > 0.0) {
            return invalid("chunks.min_chunk_seconds must be positive".to_string());
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("Ignoring malformed {}={:?}", name, raw);
            None
        }
    }
}

/// Parameters that depend on the (trimmed) track duration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveParams {
    /// Duration is below [`SHORT_CLIP_THRESHOLD`]
    pub is_short_clip: bool,
    /// Tempo analysis window, in seconds
    pub tempo_window_seconds: f32,
    /// Multi-window key voting is trusted
    pub use_window_consensus: bool,
    /// The onset-validation octave pass may run
    pub use_onset_validation: bool,
}

impl AdaptiveParams {
    /// Derive the parameters for a track of `duration` seconds
    ///
    /// Short clips use a tempo window of `min(0.8 × duration, 30)` and disable window
    /// consensus and onset validation.
    pub fn for_duration(duration: f32, config: &AnalysisConfig) -> Self {
        if duration < SHORT_CLIP_THRESHOLD {
            Self {
                is_short_clip: true,
                tempo_window_seconds: (duration * 0.8).min(30.0),
                use_window_consensus: false,
                use_onset_validation: false,
            }
        } else {
            Self {
                is_short_clip: false,
                tempo_window_seconds: config.tempo_window_seconds,
                use_window_consensus: true,
                use_onset_validation: true,
            }
        }
    }
}

/// True when `duration` is a preview-length clip (positive and below the threshold)
pub fn is_short_clip(duration: f32) -> bool {
    duration > 0.0 && duration < SHORT_CLIP_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_adaptive_params_short_clip() {
        let config = AnalysisConfig::default();
        let params = AdaptiveParams::for_duration(29.5, &config);
        assert!(params.is_short_clip);
        assert!((params.tempo_window_seconds - 23.6).abs() < 1e-4);
        assert!(!params.use_window_consensus);
        assert!(!params.use_onset_validation);

        let params = AdaptiveParams::for_duration(44.0, &config);
        assert_eq!(params.tempo_window_seconds, 30.0);
    }

    #[test]
    fn test_adaptive_params_full_track() {
        let config = AnalysisConfig::default();
        let params = AdaptiveParams::for_duration(180.0, &config);
        assert!(!params.is_short_clip);
        assert_eq!(params.tempo_window_seconds, 60.0);
        assert!(params.use_window_consensus);
        assert!(params.use_onset_validation);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let vars: HashMap<&str, &str> = [
            ("FINGERPRINT_TEMPO_WINDOW", "45"),
            ("FINGERPRINT_ENABLE_CHUNKS", "off"),
            ("FINGERPRINT_WORKERS", "0"),
            ("FINGERPRINT_TIMEOUT", "not-a-number"),
            ("FINGERPRINT_BPM_RULES", "/tmp/bpm.json"),
        ]
        .into_iter()
        .collect();

        let config = AnalysisConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.tempo_window_seconds, 45.0);
        assert!(!config.enable_chunks);
        assert_eq!(config.workers, 1);
        // Malformed values keep the default
        assert_eq!(config.analysis_timeout_seconds, 120.0);
        assert_eq!(
            config.calibration.bpm_rules,
            Some(PathBuf::from("/tmp/bpm.json"))
        );
        assert!(config.calibration.scalers.is_none());
    }

    #[test]
    fn test_validate() {
        assert!(AnalysisConfig::default().validate().is_ok());

        let config = AnalysisConfig {
            min_bpm: 200.0,
            max_bpm: 100.0,
            ..AnalysisConfig::default()
        };
        assert!(matches!(config.validate(), Err(AnalysisError::InvalidInput(_))));

        let config = AnalysisConfig {
            hop_size: 0,
            ..AnalysisConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_is_short_clip() {
        assert!(is_short_clip(30.0));
        assert!(!is_short_clip(0.0));
        assert!(!is_short_clip(45.0));
    }
}
