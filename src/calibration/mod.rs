//! Calibration layer
//!
//! Four independent corrections learned against a reference dataset, applied in a fixed
//! order after the decision core:
//!
//! 1. Linear feature scalers ([`scalers`])
//! 2. Key confusion remap ([`key_map`])
//! 3. Ridge models for continuous descriptors ([`ridge`])
//! 4. Priority-ordered BPM rules ([`bpm_rules`]), always last
//!
//! Each step is a no-op when its rule file is absent, unreadable or malformed. The rule
//! files are held in an immutable [`CalibrationSnapshot`]; analyses capture an `Arc` to
//! the snapshot they started with, and [`CalibrationStore::refresh`] swaps in a new one
//! when a file's modification time changes.
//!
//! # Example
//!
//! ```no_run
//! use fingerprint_dsp::calibration::CalibrationStore;
//! use fingerprint_dsp::config::CalibrationPaths;
//!
//! let store = CalibrationStore::new(CalibrationPaths {
//!     scalers: Some("config/calibration_scalers.json".into()),
//!     ..CalibrationPaths::default()
//! });
//! let snapshot = store.snapshot();
//! println!("calibration version {:?}", snapshot.version_label());
//! ```

pub mod bpm_rules;
pub mod key_map;
pub mod ridge;
pub mod scalers;

pub use bpm_rules::{BpmRule, BpmRuleSet};
pub use key_map::KeyConfusionMap;
pub use ridge::RidgeModels;
pub use scalers::ScalerSet;

use crate::analysis::result::AnalysisResult;
use crate::config::{AnalysisConfig, CalibrationPaths};
use crate::error::AnalysisError;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::SystemTime;

/// Immutable set of loaded calibration rules
#[derive(Debug, Clone, Default)]
pub struct CalibrationSnapshot {
    /// Linear scalers
    pub scalers: Option<Arc<ScalerSet>>,
    /// Key confusion map
    pub key_map: Option<Arc<KeyConfusionMap>>,
    /// Ridge models
    pub ridge: Option<Arc<RidgeModels>>,
    /// BPM rules, enabled only and sorted by priority
    pub bpm_rules: Option<Arc<BpmRuleSet>>,
    /// Incremented on every swap
    pub generation: u64,
}

impl CalibrationSnapshot {
    /// Snapshot without any rules
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load every configured rule file
    ///
    /// Missing or malformed files are logged and leave their rule set empty.
    pub fn load(paths: &CalibrationPaths) -> Self {
        Self {
            scalers: load_optional(paths.scalers.as_deref(), "scaler").map(Arc::new),
            key_map: load_optional(paths.key_map.as_deref(), "key map").map(Arc::new),
            ridge: load_optional(paths.ridge.as_deref(), "ridge").map(Arc::new),
            bpm_rules: load_optional::<BpmRuleSet>(paths.bpm_rules.as_deref(), "BPM rule")
                .map(|set| Arc::new(set.prepared())),
            generation: 0,
        }
    }

    /// True when no rule set is loaded
    pub fn is_empty(&self) -> bool {
        self.scalers.is_none() && self.key_map.is_none() && self.ridge.is_none() && self.bpm_rules.is_none()
    }

    /// Feature-set versions of the loaded files, joined with `/`
    pub fn version_label(&self) -> Option<String> {
        let versions: Vec<&str> = [
            self.scalers.as_ref().and_then(|s| s.feature_set_version.as_deref()),
            self.key_map.as_ref().and_then(|s| s.feature_set_version.as_deref()),
            self.ridge.as_ref().and_then(|s| s.feature_set_version.as_deref()),
            self.bpm_rules
                .as_ref()
                .and_then(|s| s.feature_set_version.as_deref().or(s.version.as_deref())),
        ]
        .into_iter()
        .flatten()
        .collect();
        (!versions.is_empty()).then(|| versions.join("/"))
    }

    /// Apply every loaded correction to `result`
    ///
    /// # Returns
    ///
    /// Tags of the steps that changed something, in application order
    pub fn apply(&self, result: &mut AnalysisResult) -> Vec<String> {
        let mut applied = Vec::new();
        if let Some(scalers) = &self.scalers {
            applied.extend(scalers.apply(result));
        }
        if let Some(key_map) = &self.key_map {
            applied.extend(key_map.apply(result));
        }
        if let Some(ridge) = &self.ridge {
            applied.extend(ridge.apply(result));
        }
        if let Some(rules) = &self.bpm_rules {
            applied.extend(rules.apply(result));
        }
        applied
    }
}

/// Parse a JSON rule file
///
/// # Errors
///
/// Returns `AnalysisError::Calibration` if the file cannot be read or parsed
pub fn load_rule_file<T: DeserializeOwned>(path: &Path) -> Result<T, AnalysisError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| AnalysisError::Calibration(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&text)
        .map_err(|e| AnalysisError::Calibration(format!("{}: {}", path.display(), e)))
}

fn load_optional<T: DeserializeOwned>(path: Option<&Path>, what: &str) -> Option<T> {
    let path = path?;
    if !path.exists() {
        log::info!("No {} calibration at {}, using raw outputs", what, path.display());
        return None;
    }
    match load_rule_file(path) {
        Ok(rules) => {
            log::info!("Loaded {} calibration from {}", what, path.display());
            Some(rules)
        }
        Err(e) => {
            log::warn!("Ignoring {} calibration: {}", what, e);
            None
        }
    }
}

fn file_mtime(path: Option<&Path>) -> Option<SystemTime> {
    std::fs::metadata(path?).ok()?.modified().ok()
}

/// Modification times last seen by the store, in rule-file order
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct SeenTimes([Option<SystemTime>; 4]);

impl SeenTimes {
    fn read(paths: &CalibrationPaths) -> Self {
        Self([
            file_mtime(paths.scalers.as_deref()),
            file_mtime(paths.key_map.as_deref()),
            file_mtime(paths.ridge.as_deref()),
            file_mtime(paths.bpm_rules.as_deref()),
        ])
    }
}

/// Hot-reloading holder of the current [`CalibrationSnapshot`]
#[derive(Debug)]
pub struct CalibrationStore {
    paths: CalibrationPaths,
    current: RwLock<Arc<CalibrationSnapshot>>,
    seen: Mutex<SeenTimes>,
}

impl CalibrationStore {
    /// Load the rule files at `paths`
    pub fn new(paths: CalibrationPaths) -> Self {
        let seen = SeenTimes::read(&paths);
        let snapshot = CalibrationSnapshot::load(&paths);
        Self {
            paths,
            current: RwLock::new(Arc::new(snapshot)),
            seen: Mutex::new(seen),
        }
    }

    /// Store without rule files
    pub fn empty() -> Self {
        Self::new(CalibrationPaths::default())
    }

    /// Process-wide store configured from `FINGERPRINT_*` environment variables
    pub fn global() -> &'static CalibrationStore {
        static GLOBAL: OnceLock<CalibrationStore> = OnceLock::new();
        GLOBAL.get_or_init(|| CalibrationStore::new(AnalysisConfig::from_env().calibration))
    }

    /// Configured rule-file paths
    pub fn paths(&self) -> &CalibrationPaths {
        &self.paths
    }

    /// Snapshot to use for the next analysis
    pub fn snapshot(&self) -> Arc<CalibrationSnapshot> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Reload the rule files whose modification time changed
    ///
    /// Only one refresh runs at a time. In-flight analyses keep the snapshot they
    /// captured.
    ///
    /// # Returns
    ///
    /// `true` if a new snapshot was swapped in
    pub fn refresh(&self) -> bool {
        let mut seen = match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = SeenTimes::read(&self.paths);
        if now == *seen {
            return false;
        }

        let previous = self.snapshot();
        let mut next = (*previous).clone();
        let paths: [(&Option<PathBuf>, &str); 4] = [
            (&self.paths.scalers, "scalers"),
            (&self.paths.key_map, "key map"),
            (&self.paths.ridge, "ridge"),
            (&self.paths.bpm_rules, "BPM rules"),
        ];
        for (i, (path, what)) in paths.iter().enumerate() {
            if now.0[i] == seen.0[i] {
                continue;
            }
            let path = path.as_deref();
            match i {
                0 => next.scalers = load_optional(path, what).map(Arc::new),
                1 => next.key_map = load_optional(path, what).map(Arc::new),
                2 => next.ridge = load_optional(path, what).map(Arc::new),
                _ => {
                    next.bpm_rules = load_optional::<BpmRuleSet>(path, what)
                        .map(|set| Arc::new(set.prepared()))
                }
            }
            log::info!("Reloaded {} calibration (modification time changed)", what);
        }
        next.generation = previous.generation + 1;

        match self.current.write() {
            Ok(mut guard) => *guard = Arc::new(next),
            Err(poisoned) => *poisoned.into_inner() = Arc::new(next),
        }
        *seen = now;
        true
    }
}
