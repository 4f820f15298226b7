//! Bounded worker pool
//!
//! Each worker runs one whole-track analysis end to end. Workers share nothing mutable:
//! every job captures the calibration snapshot current at submission time and keeps it
//! for its whole run, even if the store is refreshed meanwhile.
//!
//! Code running inside a worker must pass [`WorkerContext::worker`] when it builds a pool;
//! such requests are refused with [`AnalysisError::NestedPool`].
//!
//! # Example
//!
//! ```no_run
//! use fingerprint_dsp::config::AnalysisConfig;
//! use fingerprint_dsp::io::audio_buffer::AudioBuffer;
//! use fingerprint_dsp::worker::{AnalysisPool, WorkerContext};
//!
//! let pool = AnalysisPool::new(AnalysisConfig::default(), WorkerContext::top_level())?;
//! let result = pool.analyze(AudioBuffer::new(vec![0.0f32; 44100 * 30], 44100))?;
//! println!("{:.1} BPM", result.bpm);
//! # Ok::<(), fingerprint_dsp::AnalysisError>(())
//! ```

use crate::analysis::pipeline::Analyzer;
use crate::analysis::result::AnalysisResult;
use crate::calibration::{CalibrationSnapshot, CalibrationStore};
use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::features::key::TonalEstimator;
use crate::io::audio_buffer::AudioBuffer;
use crossbeam_channel::RecvTimeoutError;
use rayon::prelude::*;
use std::sync::Arc;
use std::time::Duration;

/// Whether the caller is itself running inside a worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerContext {
    /// True inside a pool worker
    pub inside_worker: bool,
}

impl WorkerContext {
    /// Caller outside any pool
    pub fn top_level() -> Self {
        Self {
            inside_worker: false,
        }
    }

    /// Caller running inside a pool worker
    pub fn worker() -> Self {
        Self {
            inside_worker: true,
        }
    }
}

/// Pool of analysis workers
pub struct AnalysisPool {
    pool: rayon::ThreadPool,
    config: Arc<AnalysisConfig>,
    store: Option<Arc<CalibrationStore>>,
    estimator: Option<Arc<dyn TonalEstimator>>,
    threads: usize,
}

impl AnalysisPool {
    /// Pool of `config.workers` threads using the process-wide calibration store
    ///
    /// # Errors
    ///
    /// Returns `AnalysisError::NestedPool` when `context` says the caller is a worker,
    /// `AnalysisError::InvalidInput` for an invalid configuration, and
    /// `AnalysisError::ProcessingError` if the threads cannot be started
    pub fn new(config: AnalysisConfig, context: WorkerContext) -> Result<Self, AnalysisError> {
        if context.inside_worker {
            log::warn!("Refusing to build a worker pool from inside a worker");
            return Err(AnalysisError::NestedPool);
        }
        config.validate()?;

        let threads = config.workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("fingerprint-worker-{}", i))
            .panic_handler(|_| log::error!("Analysis worker panicked"))
            .build()
            .map_err(|e| AnalysisError::ProcessingError(format!("Worker pool: {}", e)))?;
        log::debug!("Started analysis pool with {} workers", threads);

        Ok(Self {
            pool,
            config: Arc::new(config),
            store: None,
            estimator: None,
            threads,
        })
    }

    /// Use `store` instead of the process-wide calibration store
    pub fn with_store(mut self, store: Arc<CalibrationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Blend `estimator` into every key decision
    pub fn with_estimator(mut self, estimator: Arc<dyn TonalEstimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    /// Number of worker threads
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Refresh the calibration store and capture its current snapshot
    pub fn calibration(&self) -> Arc<CalibrationSnapshot> {
        let store = match &self.store {
            Some(store) => store.as_ref(),
            None => CalibrationStore::global(),
        };
        if store.refresh() {
            log::info!("Calibration reloaded: {:?}", store.snapshot().version_label());
        }
        store.snapshot()
    }

    /// Analyze one track on a worker with a wall-clock timeout
    ///
    /// # Errors
    ///
    /// Returns `AnalysisError::Timeout` when no result arrives within
    /// `analysis_timeout_seconds` (the late result is dropped), and
    /// `AnalysisError::WorkerFailed` if the worker dies before reporting
    pub fn analyze(&self, buffer: AudioBuffer) -> Result<AnalysisResult, AnalysisError> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let config = Arc::clone(&self.config);
        let snapshot = self.calibration();
        let estimator = self.estimator.clone();

        self.pool.spawn(move || {
            let result = run_job(&config, snapshot, estimator.as_deref(), &buffer);
            // The caller is gone after a timeout
            let _ = tx.send(result);
        });

        let seconds = self.config.analysis_timeout_seconds;
        let received = if seconds.is_finite() && seconds > 0.0 {
            rx.recv_timeout(Duration::from_secs_f32(seconds))
        } else {
            rx.recv().map_err(|_| RecvTimeoutError::Disconnected)
        };
        match received {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("Analysis exceeded {:.1}s, dropping its result", seconds);
                Err(AnalysisError::Timeout { seconds })
            }
            Err(RecvTimeoutError::Disconnected) => Err(AnalysisError::WorkerFailed(
                "worker exited without a result".to_string(),
            )),
        }
    }

    /// Analyze many tracks in parallel, one result per buffer in input order
    ///
    /// Each analysis carries its own cooperative deadline; a track that runs out of time
    /// reports `AnalysisError::Timeout` without affecting the others.
    pub fn analyze_batch(&self, buffers: &[AudioBuffer]) -> Vec<Result<AnalysisResult, AnalysisError>> {
        let snapshot = self.calibration();
        let config = self.config.as_ref();
        let estimator = self.estimator.as_deref();
        log::debug!("Batch of {} tracks on {} workers", buffers.len(), self.threads);
        self.pool.install(|| {
            buffers
                .par_iter()
                .map(|buffer| run_job(config, Arc::clone(&snapshot), estimator, buffer))
                .collect()
        })
    }
}

fn run_job(
    config: &AnalysisConfig,
    snapshot: Arc<CalibrationSnapshot>,
    estimator: Option<&dyn TonalEstimator>,
    buffer: &AudioBuffer,
) -> Result<AnalysisResult, AnalysisError> {
    let analyzer = Analyzer::new(config, snapshot);
    match estimator {
        Some(estimator) => analyzer.with_estimator(estimator).analyze(buffer),
        None => analyzer.analyze(buffer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::result::AnalysisFlag;
    use crate::features::key::{KeyCandidate, TonalProfile};

    fn config(workers: usize) -> AnalysisConfig {
        AnalysisConfig {
            workers,
            ..AnalysisConfig::default()
        }
    }

    fn chord(seconds: f32) -> AudioBuffer {
        let sr = 22050;
        let samples = (0..(seconds * sr as f32) as usize)
            .map(|i| {
                let t = i as f32 / sr as f32;
                [261.63f32, 329.63, 392.0]
                    .iter()
                    .map(|f| (2.0 * std::f32::consts::PI * f * t).sin())
                    .sum::<f32>()
                    * 0.2
            })
            .collect();
        AudioBuffer::new(samples, sr)
    }

    fn pool(workers: usize) -> AnalysisPool {
        AnalysisPool::new(config(workers), WorkerContext::top_level())
            .unwrap()
            .with_store(Arc::new(CalibrationStore::empty()))
    }

    struct Panicking;

    impl TonalEstimator for Panicking {
        fn estimate(&self, _: &[f32], _: u32, _: TonalProfile) -> Result<KeyCandidate, AnalysisError> {
            panic!("estimator crashed");
        }
    }

    #[test]
    fn test_nested_pool_is_refused() {
        let err = AnalysisPool::new(config(1), WorkerContext::worker()).err();
        assert_eq!(err, Some(AnalysisError::NestedPool));
    }

    #[test]
    fn test_silence_through_pool() {
        let result = pool(2).analyze(AudioBuffer::new(vec![0.0; 22050 * 10], 22050)).unwrap();
        assert_eq!(result.bpm, 0.0);
        assert!(result.has_flag(AnalysisFlag::SilentInput));
    }

    #[test]
    fn test_timeout_is_surfaced() {
        let config = AnalysisConfig {
            analysis_timeout_seconds: 0.001,
            ..config(1)
        };
        let pool = AnalysisPool::new(config, WorkerContext::top_level())
            .unwrap()
            .with_store(Arc::new(CalibrationStore::empty()));
        let err = pool.analyze(chord(120.0)).unwrap_err();
        assert!(matches!(err, AnalysisError::Timeout { .. }), "got {:?}", err);
    }

    #[test]
    fn test_worker_panic_is_reported() {
        let pool = pool(1).with_estimator(Arc::new(Panicking));
        let err = pool.analyze(chord(10.0)).unwrap_err();
        assert!(matches!(err, AnalysisError::WorkerFailed(_)));
    }

    #[test]
    fn test_batch_keeps_order() {
        let buffers = vec![
            chord(10.0),
            AudioBuffer::new(vec![], 22050),
            AudioBuffer::new(vec![0.0; 22050 * 5], 22050),
        ];
        let results = pool(2).analyze_batch(&buffers);
        assert_eq!(results.len(), 3);
        let first = results[0].as_ref().unwrap();
        assert!(first.key_confidence > 0.0);
        assert!(results[1].as_ref().unwrap().has_flag(AnalysisFlag::SilentInput));
        assert!(results[2].as_ref().unwrap().has_flag(AnalysisFlag::SilentInput));
    }
}
