//! Linear feature scalers
//!
//! Each rule maps an analyzer output onto the reference scale with
//! `value × slope + intercept`, then applies the optional clamp. BPM is guarded: preview
//! clips and tempos inside the sweet spot are never scaled, and a scaled BPM that moves
//! by more than [`MAX_BPM_SHIFT`] is rejected outright.

use crate::analysis::result::AnalysisResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Features a scaler file may adjust
pub const SCALED_FEATURES: [&str; 6] = [
    "bpm",
    "danceability",
    "energy",
    "acousticness",
    "valence",
    "loudness",
];

/// Largest BPM change a scaler may make
pub const MAX_BPM_SHIFT: f32 = 10.0;

/// Raw tempos in this range are already trusted and left alone
pub const BPM_SWEET_SPOT: (f32, f32) = (138.0, 152.0);

/// Optional output bounds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Clamp {
    /// Lower bound
    #[serde(default)]
    pub min: Option<f32>,
    /// Upper bound
    #[serde(default)]
    pub max: Option<f32>,
}

/// One feature's linear mapping
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScalerRule {
    /// Multiplier
    pub slope: Option<f32>,
    /// Offset
    pub intercept: Option<f32>,
    /// Output bounds
    #[serde(default)]
    pub clamp: Option<Clamp>,
}

impl ScalerRule {
    /// Scaled value, or `None` when the rule lacks a slope or intercept
    pub fn apply(&self, value: f32) -> Option<f32> {
        let mut scaled = value * self.slope? + self.intercept?;
        if let Some(clamp) = self.clamp {
            if let Some(min) = clamp.min {
                scaled = scaled.max(min);
            }
            if let Some(max) = clamp.max {
                scaled = scaled.min(max);
            }
        }
        Some(scaled)
    }
}

/// Scaler rule file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScalerSet {
    /// Rules by feature name
    #[serde(default)]
    pub features: BTreeMap<String, ScalerRule>,
    /// Generation timestamp
    #[serde(default)]
    pub generated_at: Option<String>,
    /// Feature-set version the rules were fitted against
    #[serde(default)]
    pub feature_set_version: Option<String>,
}

impl ScalerSet {
    /// Scale every known feature of `result`
    ///
    /// # Returns
    ///
    /// One `scaler:<feature>` tag per feature that changed
    pub fn apply(&self, result: &mut AnalysisResult) -> Vec<String> {
        let mut applied = Vec::new();
        let is_short_clip = result.metadata.is_short_clip;

        for feature in SCALED_FEATURES {
            let Some(rule) = self.features.get(feature) else {
                continue;
            };
            let Some(raw) = result.feature(feature) else {
                continue;
            };

            let scaled = if feature == "bpm" {
                match scale_bpm(rule, raw, is_short_clip) {
                    Some(v) => v,
                    None => continue,
                }
            } else {
                match rule.apply(raw) {
                    Some(v) => v,
                    None => continue,
                }
            };

            if result.set_feature(feature, scaled) {
                log::debug!("Scaler {}: {:.3} -> {:.3}", feature, raw, scaled);
                applied.push(format!("scaler:{}", feature));
            }
        }

        if !applied.is_empty() {
            log::info!("Applied calibration scalers ({})", applied.join(", "));
        }
        applied
    }
}

/// Scaled BPM, or `None` when the guards keep the raw value
pub fn scale_bpm(rule: &ScalerRule, raw: f32, is_short_clip: bool) -> Option<f32> {
    if raw <= 0.0 {
        return None;
    }
    if is_short_clip {
        log::debug!("Skipping BPM scaler for short clip");
        return None;
    }
    if (BPM_SWEET_SPOT.0..=BPM_SWEET_SPOT.1).contains(&raw) {
        log::debug!("Skipping BPM scaler: {:.1} BPM is inside the sweet spot", raw);
        return None;
    }
    let scaled = rule.apply(raw)?;
    if (scaled - raw).abs() > MAX_BPM_SHIFT {
        log::info!(
            "Rejecting BPM scaler: {:.1} -> {:.1} moves more than {:.0} BPM",
            raw,
            scaled,
            MAX_BPM_SHIFT
        );
        return None;
    }
    Some(scaled)
}
