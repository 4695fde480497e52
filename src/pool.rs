//! Fixed-size worker pool for per-unit phases
//!
//! Each phase is a batch of independent units (one file, one asset). Workers
//! fold results into thread-local batches which are merged once after every
//! unit has finished, so no lock is taken on the hot path. A unit's failure is
//! recorded against that unit and never aborts its siblings.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::metrics::{PhaseSummary, Timer};

/// Cooperative cancellation flag shared by all phases of a run.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A failed unit of work and the reason it failed.
#[derive(Debug)]
pub struct UnitFailure {
    pub unit: String,
    pub error: PipelineError,
}

/// Everything a phase produced once its barrier is reached.
#[derive(Debug)]
pub struct PhaseOutcome<R> {
    pub phase: &'static str,
    pub results: Vec<R>,
    pub failures: Vec<UnitFailure>,
    pub skipped: usize,
    pub elapsed_ms: u64,
}

impl<R> PhaseOutcome<R> {
    pub fn summary(&self) -> PhaseSummary {
        PhaseSummary::from_outcome(self)
    }
}

/// Phase name plus how often to log progress.
#[derive(Debug, Clone, Copy)]
pub struct Phase {
    pub name: &'static str,
    pub progress_every: usize,
}

impl Phase {
    pub fn new(name: &'static str) -> Self {
        Self { name, progress_every: 0 }
    }

    pub fn progress_every(mut self, n: usize) -> Self {
        self.progress_every = n;
        self
    }
}

struct Batch<R> {
    results: Vec<R>,
    failures: Vec<UnitFailure>,
    skipped: usize,
}

impl<R> Batch<R> {
    fn empty() -> Self {
        Self { results: Vec::new(), failures: Vec::new(), skipped: 0 }
    }

    fn merge(mut self, mut other: Self) -> Self {
        self.results.append(&mut other.results);
        self.failures.append(&mut other.failures);
        self.skipped += other.skipped;
        self
    }
}

pub struct WorkerPool {
    pool: rayon::ThreadPool,
    workers: usize,
    cancel: CancelToken,
}

impl WorkerPool {
    pub fn new(workers: usize, cancel: CancelToken) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("asset-worker-{}", i))
            .build()
            .map_err(|e| PipelineError::Configuration(format!("Failed to build worker pool: {}", e)))?;

        Ok(Self { pool, workers, cancel })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Run `work` over every unit and wait for all of them.
    ///
    /// `label` names a unit in failure reports. Units not yet started when the
    /// cancel token fires are counted as skipped.
    pub fn run<T, R, L, F>(&self, phase: Phase, units: &[T], label: L, work: F) -> PhaseOutcome<R>
    where
        T: Sync,
        R: Send,
        L: Fn(&T) -> String + Sync,
        F: Fn(&T) -> Result<R> + Sync,
    {
        let timer = Timer::new();
        let started = AtomicUsize::new(0);
        let total = units.len();

        info!("{}: {} units on {} workers", phase.name, total, self.workers);

        let batch = self.pool.install(|| {
            units
                .par_iter()
                .fold(Batch::empty, |mut batch, unit| {
                    if self.cancel.is_cancelled() {
                        batch.skipped += 1;
                        return batch;
                    }

                    let n = started.fetch_add(1, Ordering::Relaxed) + 1;
                    if phase.progress_every > 0 && n % phase.progress_every == 0 {
                        info!("{}: {}/{}", phase.name, n, total);
                    }

                    match work(unit) {
                        Ok(result) => batch.results.push(result),
                        Err(error) => {
                            let unit = label(unit);
                            warn!("{}: {} failed: {}", phase.name, unit, error);
                            batch.failures.push(UnitFailure { unit, error });
                        }
                    }
                    batch
                })
                .reduce(Batch::empty, Batch::merge)
        });

        let outcome = PhaseOutcome {
            phase: phase.name,
            results: batch.results,
            failures: batch.failures,
            skipped: batch.skipped,
            elapsed_ms: timer.elapsed_ms(),
        };

        info!(
            "{}: finished in {}ms ({} ok, {} failed, {} skipped)",
            phase.name,
            outcome.elapsed_ms,
            outcome.results.len(),
            outcome.failures.len(),
            outcome.skipped
        );

        outcome
    }
}
