//! Ridge regression calibration models
//!
//! Each target is a linear model over a shared list of feature columns, standardized with
//! the per-feature mean and standard deviation stored at fit time. A zero standard
//! deviation is treated as 1. Percent-scale targets are clamped to [0, 1].

use crate::analysis::result::AnalysisResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One target's model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RidgeModel {
    /// Coefficient per feature column
    #[serde(default)]
    pub weights: Vec<f32>,
    /// Intercept
    #[serde(default)]
    pub intercept: f32,
    /// Feature means at fit time
    #[serde(default)]
    pub feature_means: Vec<f32>,
    /// Feature standard deviations at fit time
    #[serde(default)]
    pub feature_stds: Vec<f32>,
    /// Target lives in [0, 1]
    #[serde(default)]
    pub percent_scale: bool,
}

impl RidgeModel {
    /// Predict from a feature vector in column order
    ///
    /// Returns `None` when the vector length does not match the weights.
    pub fn predict(&self, features: &[f32]) -> Option<f32> {
        if features.len() != self.weights.len() {
            return None;
        }
        let mut prediction = self.intercept;
        for (i, (&x, &w)) in features.iter().zip(self.weights.iter()).enumerate() {
            let mean = self.feature_means.get(i).copied().unwrap_or(0.0);
            let std = match self.feature_stds.get(i).copied() {
                Some(s) if s != 0.0 => s,
                _ => 1.0,
            };
            prediction += (x - mean) / std * w;
        }
        if self.percent_scale {
            prediction = prediction.clamp(0.0, 1.0);
        }
        Some(prediction)
    }
}

/// Ridge model file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RidgeModels {
    /// Models by target name
    #[serde(default)]
    pub targets: BTreeMap<String, RidgeModel>,
    /// Input columns shared by every model
    #[serde(default)]
    pub feature_columns: Vec<String>,
    /// Generation timestamp
    #[serde(default)]
    pub generated_at: Option<String>,
    /// Feature-set version
    #[serde(default)]
    pub feature_set_version: Option<String>,
}

impl RidgeModels {
    /// Feature vector of `result` in column order, or `None` if any column is missing
    pub fn feature_vector(&self, result: &AnalysisResult) -> Option<Vec<f32>> {
        self.feature_columns
            .iter()
            .map(|name| result.feature(name))
            .collect()
    }

    /// Predict every target and write it into `result`
    ///
    /// All predictions read the features as they were before this step.
    pub fn apply(&self, result: &mut AnalysisResult) -> Vec<String> {
        if self.targets.is_empty() || self.feature_columns.is_empty() {
            return Vec::new();
        }
        let Some(features) = self.feature_vector(result) else {
            log::debug!("Skipping ridge calibration: a feature column is missing");
            return Vec::new();
        };

        let mut applied = Vec::new();
        for (target, model) in &self.targets {
            let Some(prediction) = model.predict(&features) else {
                log::warn!(
                    "Ridge model for {} has {} weights for {} columns",
                    target,
                    model.weights.len(),
                    features.len()
                );
                continue;
            };
            if result.set_feature(target, prediction) {
                applied.push(format!("ridge:{}", target));
            } else {
                log::debug!("Ridge target {} is not a settable feature", target);
            }
        }
        if !applied.is_empty() {
            log::info!("Applied ridge models ({})", applied.join(", "));
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standardized_prediction() {
        let model = RidgeModel {
            weights: vec![0.5, -0.2],
            intercept: 0.4,
            feature_means: vec![0.5, 100.0],
            feature_stds: vec![0.25, 0.0],
            percent_scale: false,
        };
        // (0.75 - 0.5) / 0.25 × 0.5 + (101 - 100) / 1 × -0.2 + 0.4
        let p = model.predict(&[0.75, 101.0]).unwrap();
        assert!((p - 0.7).abs() < 1e-5);
        assert!(model.predict(&[0.75]).is_none());
    }

    #[test]
    fn test_percent_scale_clamps() {
        let model = RidgeModel {
            weights: vec![2.0],
            intercept: 0.9,
            feature_means: vec![0.0],
            feature_stds: vec![1.0],
            percent_scale: true,
        };
        assert_eq!(model.predict(&[1.0]), Some(1.0));
        assert_eq!(model.predict(&[-5.0]), Some(0.0));
    }

    #[test]
    fn test_parse_model_file() {
        let json = r#"{
            "feature_columns": ["energy", "danceability"],
            "targets": {
                "valence": {"weights": [0.1, 0.2], "intercept": 0.5,
                            "feature_means": [0.5, 0.5], "feature_stds": [0.2, 0.2],
                            "percent_scale": true}
            }
        }"#;
        let models: RidgeModels = serde_json::from_str(json).unwrap();
        assert_eq!(models.feature_columns.len(), 2);
        assert!(models.targets["valence"].percent_scale);
    }
}
