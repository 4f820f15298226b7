//! Stage timing

use std::collections::BTreeMap;
use std::time::Instant;

/// Wall time spent per analysis stage
#[derive(Debug, Clone, Default)]
pub struct StageTimer {
    sections: BTreeMap<String, f32>,
}

impl StageTimer {
    /// Empty timer
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` and add its wall time to `stage`
    pub fn track<T>(&mut self, stage: &str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        self.add(stage, start.elapsed().as_secs_f32() * 1000.0);
        out
    }

    /// Add `ms` milliseconds to `stage`; negative or non-finite values are ignored
    pub fn add(&mut self, stage: &str, ms: f32) {
        if !ms.is_finite() || ms < 0.0 {
            return;
        }
        *self.sections.entry(stage.to_string()).or_insert(0.0) += ms;
    }

    /// Milliseconds recorded for `stage`
    pub fn get(&self, stage: &str) -> Option<f32> {
        self.sections.get(stage).copied()
    }

    /// Recorded stages
    pub fn snapshot(&self) -> BTreeMap<String, f32> {
        self.sections.clone()
    }

    /// Log every stage, slowest first
    pub fn log(&self, label: &str) {
        if self.sections.is_empty() {
            return;
        }
        let mut ordered: Vec<(&String, &f32)> = self.sections.iter().collect();
        ordered.sort_by(|a, b| b.1.total_cmp(a.1));
        let parts: Vec<String> = ordered
            .iter()
            .map(|(name, ms)| format!("{}: {:.1}ms", name, ms))
            .collect();
        log::debug!("{} timings: {}", label, parts.join(", "));
    }
}
