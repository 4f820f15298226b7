//! BPM correction rules
//!
//! An explicit list of condition → action rules. Enabled rules are tried in descending
//! priority and the first match fires; at most one rule changes the tempo per analysis.
//! Preview clips are never corrected.

use crate::analysis::result::AnalysisResult;
use serde::{Deserialize, Serialize};

fn enabled_default() -> bool {
    true
}

fn unit_factor() -> f32 {
    1.0
}

/// Conditions of a rule; absent conditions always match
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BpmConditions {
    /// Inclusive BPM range
    #[serde(default)]
    pub bpm_range: Option<[f32; 2]>,
    /// Inclusive energy range
    #[serde(default)]
    pub energy_range: Option<[f32; 2]>,
    /// Longest duration the rule applies to, in seconds
    #[serde(default)]
    pub duration_max: Option<f32>,
    /// Lowest BPM confidence the rule applies to
    #[serde(default)]
    pub confidence_min: Option<f32>,
}

/// Action of a rule
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BpmAction {
    /// Multiply the BPM by `factor`
    Multiply {
        /// Multiplier
        #[serde(default = "unit_factor")]
        factor: f32,
    },
    /// Action type this version does not know; the rule never fires
    #[serde(other)]
    Unsupported,
}

/// One correction rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BpmRule {
    /// Name reported when the rule fires
    #[serde(default)]
    pub name: String,
    /// Higher priorities are tried first
    #[serde(default)]
    pub priority: i32,
    /// Disabled rules are dropped on load
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    /// Conditions
    #[serde(default)]
    pub conditions: BpmConditions,
    /// Action
    pub action: BpmAction,
}

/// Measurements a rule is matched against
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BpmRuleInput {
    /// Current BPM
    pub bpm: f32,
    /// Current energy
    pub energy: f32,
    /// Track duration in seconds
    pub duration: f32,
    /// Current BPM confidence
    pub confidence: f32,
}

impl BpmRule {
    /// True if every present condition holds
    pub fn matches(&self, input: &BpmRuleInput) -> bool {
        let c = &self.conditions;
        if let Some([lo, hi]) = c.bpm_range {
            if !(lo..=hi).contains(&input.bpm) {
                return false;
            }
        }
        if let Some([lo, hi]) = c.energy_range {
            if !(lo..=hi).contains(&input.energy) {
                return false;
            }
        }
        if let Some(max) = c.duration_max {
            if input.duration > max {
                return false;
            }
        }
        if let Some(min) = c.confidence_min {
            if input.confidence < min {
                return false;
            }
        }
        true
    }
}

/// BPM rule file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BpmRuleSet {
    /// Rules as written in the file
    #[serde(default)]
    pub rules: Vec<BpmRule>,
    /// Rule-set version
    #[serde(default)]
    pub version: Option<String>,
    /// Generation timestamp
    #[serde(default)]
    pub generated_at: Option<String>,
    /// Feature-set version
    #[serde(default)]
    pub feature_set_version: Option<String>,
}

impl BpmRuleSet {
    /// Drop disabled rules and order the rest by descending priority
    ///
    /// The sort is stable, so equal priorities keep file order.
    pub fn prepared(mut self) -> Self {
        self.rules.retain(|r| r.enabled);
        self.rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        self
    }

    /// First matching rule with its corrected BPM
    pub fn first_match(&self, input: &BpmRuleInput) -> Option<(&BpmRule, f32)> {
        self.rules.iter().filter(|r| r.enabled).find_map(|rule| {
            if !rule.matches(input) {
                return None;
            }
            match rule.action {
                BpmAction::Multiply { factor } => Some((rule, input.bpm * factor)),
                BpmAction::Unsupported => None,
            }
        })
    }

    /// Apply at most one rule to `result`
    pub fn apply(&self, result: &mut AnalysisResult) -> Vec<String> {
        if self.rules.is_empty() || result.metadata.is_short_clip || result.bpm <= 0.0 {
            return Vec::new();
        }
        let input = BpmRuleInput {
            bpm: result.bpm,
            energy: result.descriptors.energy,
            duration: result.metadata.duration_seconds,
            confidence: result.bpm_confidence,
        };
        let Some((rule, corrected)) = self.first_match(&input) else {
            return Vec::new();
        };
        log::info!(
            "BPM rule '{}': {:.1} -> {:.1} BPM (energy {:.2}, duration {:.1}s)",
            rule.name,
            input.bpm,
            corrected,
            input.energy,
            input.duration
        );
        result.bpm = corrected;
        vec![format!("bpm_rule:{}", rule.name)]
    }
}
