//! Run summary and timing

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::assemble::AssemblyReport;
use crate::pool::PhaseOutcome;

/// One failed unit as shown to the operator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureEntry {
    pub unit: String,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseSummary {
    pub phase: String,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub elapsed_ms: u64,
    pub failures: Vec<FailureEntry>,
}

impl PhaseSummary {
    pub fn from_outcome<R>(outcome: &PhaseOutcome<R>) -> Self {
        let mut failures: Vec<FailureEntry> = outcome.failures.iter()
            .map(|f| FailureEntry {
                unit: f.unit.clone(),
                kind: f.error.kind().to_string(),
                message: f.error.to_string(),
            })
            .collect();
        failures.sort_by(|a, b| a.unit.cmp(&b.unit));

        Self {
            phase: outcome.phase.to_string(),
            succeeded: outcome.results.len(),
            failed: outcome.failures.len(),
            skipped: outcome.skipped,
            elapsed_ms: outcome.elapsed_ms,
            failures,
        }
    }
}

/// Per-bucket counts for one media class, for manual cross-checking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BucketSummary {
    pub class: String,
    pub buckets: Vec<(String, usize)>,
    pub unbucketed: usize,
    pub assets: usize,
    pub conflicts: Vec<FailureEntry>,
}

impl BucketSummary {
    pub fn from_report(class: &str, report: &AssemblyReport) -> Self {
        Self {
            class: class.to_string(),
            buckets: report.bucket_counts.clone(),
            unbucketed: report.unbucketed,
            assets: report.assets,
            conflicts: report.conflicts.iter()
                .map(|c| FailureEntry {
                    unit: c.key.clone(),
                    kind: "duplicate_key".to_string(),
                    message: c.to_error().to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub phases: Vec<PhaseSummary>,
    pub buckets: Vec<BucketSummary>,
    pub cancelled: bool,
    pub total_ms: u64,
}

impl RunSummary {
    pub fn push_phase(&mut self, phase: PhaseSummary) {
        self.phases.push(phase);
    }

    pub fn phase(&self, name: &str) -> Option<&PhaseSummary> {
        self.phases.iter().find(|p| p.phase == name)
    }

    pub fn total_failures(&self) -> usize {
        self.phases.iter().map(|p| p.failed).sum::<usize>()
            + self.buckets.iter().map(|b| b.conflicts.len()).sum::<usize>()
    }

    /// Write the human-readable summary to the log.
    pub fn log(&self) {
        for bucket in &self.buckets {
            info!("Verify that the following {} counts match:", bucket.class);
            for (name, count) in &bucket.buckets {
                info!("  {}: {}", name, count);
            }
            info!("  {} assets assembled, {} files outside any variant directory", bucket.assets, bucket.unbucketed);
            for conflict in &bucket.conflicts {
                warn!("  conflict: {}", conflict.message);
            }
        }

        for phase in &self.phases {
            info!(
                "{}: {} ok, {} failed, {} skipped ({}ms)",
                phase.phase, phase.succeeded, phase.failed, phase.skipped, phase.elapsed_ms
            );
            for failure in &phase.failures {
                warn!("  [{}] {}: {}", failure.kind, failure.unit, failure.message);
            }
        }

        if self.cancelled {
            warn!("Run was cancelled; later units were skipped");
        }
        info!("Finished in {}ms with {} failures", self.total_ms, self.total_failures());
    }
}

/// Timer for tracking phase latency
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
