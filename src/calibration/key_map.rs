//! Key confusion remap
//!
//! A learned confusion table maps each analyzer key to the distribution of true keys
//! observed for it on a reference set. Every template candidate with a positive score, and
//! the current key with at least its raw confidence, votes `score × probability` for each
//! of its targets and keeps `score × residual` for itself, where the residual is the
//! probability mass the table did not redistribute. The heaviest vote wins.
//!
//! Confidence becomes the largest of the raw confidence, the empirical accuracy of the
//! raw confidence's bin (or the table's overall raw accuracy) and the winner's posterior
//! share of all votes.

use crate::analysis::result::{AnalysisResult, Key};
use crate::features::key::TemplateScore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Score used for the current key when no template scores are available
const FALLBACK_SCORE: f32 = 0.25;

/// One likely true key of an analyzer key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyTarget {
    /// Canonical id of the true key (`"root:mode"`)
    pub canonical: String,
    /// Observed probability
    #[serde(default)]
    pub probability: f32,
    /// Display label
    #[serde(default)]
    pub label: Option<String>,
}

/// Confusion row of one analyzer key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyMapEntry {
    /// Likely true keys, most probable first
    #[serde(default)]
    pub targets: Vec<KeyTarget>,
}

/// Empirical accuracy of a raw-confidence range `[min, max)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBin {
    /// Inclusive lower bound
    pub min: f32,
    /// Exclusive upper bound
    pub max: f32,
    /// Share of correct answers in the bin
    #[serde(default)]
    pub accuracy: f32,
}

/// Key confusion file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyConfusionMap {
    /// Confusion rows by analyzer canonical id
    #[serde(default)]
    pub keys: BTreeMap<String, KeyMapEntry>,
    /// Confidence-accuracy bins
    #[serde(default)]
    pub confidence_bins: Vec<ConfidenceBin>,
    /// Overall raw accuracy, used when no bin matches
    #[serde(default)]
    pub raw_accuracy: Option<f32>,
    /// Generation timestamp
    #[serde(default)]
    pub generated_at: Option<String>,
    /// Feature-set version
    #[serde(default)]
    pub feature_set_version: Option<String>,
}

/// Outcome of a remap
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRemap {
    /// Winning key
    pub key: Key,
    /// Calibrated confidence
    pub confidence: f32,
    /// Winner's share of all votes
    pub posterior: f32,
    /// Accumulated votes by canonical id
    pub votes: BTreeMap<String, f32>,
}

impl KeyConfusionMap {
    /// Accuracy of the bin containing `raw_confidence`
    pub fn bin_accuracy(&self, raw_confidence: f32) -> Option<f32> {
        self.confidence_bins
            .iter()
            .find(|b| b.min <= raw_confidence && raw_confidence < b.max)
            .map(|b| b.accuracy)
    }

    /// Vote over the candidates
    ///
    /// # Arguments
    ///
    /// * `scores` - Template scores; entries with a non-positive score do not vote
    /// * `current` - Current key, voting with at least `raw_confidence`
    /// * `raw_confidence` - Current key confidence
    ///
    /// # Returns
    ///
    /// `None` when nothing voted or the winning id cannot be parsed
    pub fn remap(&self, scores: &[TemplateScore], current: Key, raw_confidence: f32) -> Option<KeyRemap> {
        let raw_confidence = raw_confidence.clamp(0.0, 1.0);
        let mut candidates: Vec<(Key, f32)> = scores
            .iter()
            .map(|s| (Key::new(s.root, s.mode), s.score.clamp(0.0, 1.0)))
            .filter(|(_, score)| *score > 0.0)
            .collect();
        // The current key may come from an override rule, not the template ranking
        let seed = if raw_confidence > 0.0 {
            raw_confidence
        } else if scores.is_empty() {
            FALLBACK_SCORE
        } else {
            0.0
        };
        match candidates.iter_mut().find(|(key, _)| *key == current) {
            Some((_, score)) => *score = score.max(seed),
            None if seed > 0.0 => candidates.push((current, seed)),
            None => {}
        }

        let mut votes: BTreeMap<String, f32> = BTreeMap::new();
        let mut labels: BTreeMap<String, String> = BTreeMap::new();
        for (key, score) in candidates {
            let id = key.canonical_id();
            let mut redistributed = 0.0f32;
            if let Some(entry) = self.keys.get(&id) {
                for target in &entry.targets {
                    if target.canonical.is_empty() || target.probability <= 0.0 {
                        continue;
                    }
                    *votes.entry(target.canonical.clone()).or_insert(0.0) += score * target.probability;
                    redistributed += target.probability;
                    if let Some(label) = &target.label {
                        labels.insert(target.canonical.clone(), label.clone());
                    }
                }
            }
            let residual = (1.0 - redistributed).max(0.0);
            if residual > 0.0 {
                *votes.entry(id).or_insert(0.0) += score * residual;
            }
        }

        let total: f32 = votes.values().sum();
        let (best_id, best_vote) = votes
            .iter()
            .fold(None::<(&String, f32)>, |best, (id, &v)| match best {
                Some((_, b)) if b >= v => best,
                _ => Some((id, v)),
            })?;
        let key = Key::from_canonical_id(best_id)
            .or_else(|| labels.get(best_id).and_then(|l| Key::from_label(l)))?;
        let posterior = if total > 0.0 { best_vote / total } else { 0.0 };
        let accuracy = self
            .bin_accuracy(raw_confidence)
            .or(self.raw_accuracy)
            .unwrap_or(0.0);

        Some(KeyRemap {
            key,
            confidence: raw_confidence.max(accuracy).max(posterior).clamp(0.0, 1.0),
            posterior,
            votes,
        })
    }

    /// Remap the key of `result`
    ///
    /// Short clips are left alone: the table was fitted on full tracks.
    pub fn apply(&self, result: &mut AnalysisResult) -> Vec<String> {
        if self.keys.is_empty() || result.metadata.is_short_clip {
            return Vec::new();
        }
        let Some(remap) = self.remap(&result.key_details.scores, result.key, result.key_confidence) else {
            return Vec::new();
        };

        if remap.key != result.key {
            log::info!(
                "Key calibration: {} -> {} (posterior {:.2})",
                result.key_label,
                remap.key.label(),
                remap.posterior
            );
        }
        result.set_key(remap.key);
        result.key_confidence = remap.confidence;
        vec!["key_map".to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::key::Mode;

    fn target(canonical: &str, probability: f32) -> KeyTarget {
        KeyTarget {
            canonical: canonical.to_string(),
            probability,
            label: None,
        }
    }

    fn map(rows: &[(&str, Vec<KeyTarget>)]) -> KeyConfusionMap {
        KeyConfusionMap {
            keys: rows
                .iter()
                .map(|(id, targets)| {
                    (
                        id.to_string(),
                        KeyMapEntry {
                            targets: targets.clone(),
                        },
                    )
                })
                .collect(),
            ..KeyConfusionMap::default()
        }
    }

    fn score(root: u32, mode: Mode, score: f32) -> TemplateScore {
        TemplateScore { root, mode, score }
    }

    #[test]
    fn test_self_target_keeps_key() {
        let table = map(&[("0:major", vec![target("0:major", 0.6), target("9:minor", 0.2)])]);
        let scores = [score(0, Mode::Major, 0.9), score(9, Mode::Minor, 0.1)];
        let remap = table.remap(&scores, Key::Major(0), 0.7).unwrap();
        assert_eq!(remap.key, Key::Major(0));
        assert!(remap.confidence >= 0.7);
    }

    #[test]
    fn test_confusion_moves_key() {
        // The analyzer reports G major for most A-minor tracks
        let table = map(&[("7:major", vec![target("9:minor", 0.8)])]);
        let scores = [score(7, Mode::Major, 0.8), score(9, Mode::Minor, 0.2)];
        let remap = table.remap(&scores, Key::Major(7), 0.5).unwrap();
        assert_eq!(remap.key, Key::Minor(9));
        // 9:minor = 0.8×0.8 + 0.2 = 0.84, 7:major residual = 0.16
        assert!((remap.votes["9:minor"] - 0.84).abs() < 1e-5);
        assert!((remap.posterior - 0.84).abs() < 1e-5);
        assert!((remap.confidence - 0.84).abs() < 1e-5);
    }

    #[test]
    fn test_bin_accuracy_lifts_confidence() {
        let mut table = map(&[("0:major", vec![target("0:major", 0.5)])]);
        table.confidence_bins = vec![
            ConfidenceBin {
                min: 0.0,
                max: 0.5,
                accuracy: 0.4,
            },
            ConfidenceBin {
                min: 0.5,
                max: 1.01,
                accuracy: 0.95,
            },
        ];
        table.raw_accuracy = Some(0.6);
        assert_eq!(table.bin_accuracy(0.2), Some(0.4));
        assert_eq!(table.bin_accuracy(2.0), None);

        let scores = [score(0, Mode::Major, 0.6), score(5, Mode::Major, 0.6)];
        let remap = table.remap(&scores, Key::Major(0), 0.55).unwrap();
        assert_eq!(remap.key, Key::Major(0));
        assert!((remap.confidence - 0.95).abs() < 1e-6);
    }

    #[test]
    fn test_no_votes() {
        let table = map(&[("0:major", vec![target("0:major", 1.0)])]);
        let scores = [score(0, Mode::Major, -0.2)];
        assert!(table.remap(&scores, Key::Major(0), 0.0).is_none());

        let remap = table.remap(&[], Key::Major(0), 0.0).unwrap();
        assert_eq!(remap.key, Key::Major(0));
        assert_eq!(remap.posterior, 1.0);
    }

    #[test]
    fn test_override_key_survives_confirming_row() {
        // A minor came from an override; its row only confirms it
        let table = map(&[("9:minor", vec![target("9:minor", 0.9)])]);
        let scores = [score(0, Mode::Major, 0.6), score(9, Mode::Minor, 0.55)];
        let remap = table.remap(&scores, Key::Minor(9), 0.7).unwrap();
        assert_eq!(remap.key, Key::Minor(9));
        assert!((remap.votes["9:minor"] - 0.7).abs() < 1e-5);
        assert!((remap.votes["0:major"] - 0.6).abs() < 1e-5);

        // Not among the template scores at all
        let scores = [score(0, Mode::Major, 0.6)];
        let remap = table.remap(&scores, Key::Minor(9), 0.7).unwrap();
        assert_eq!(remap.key, Key::Minor(9));
    }
}
