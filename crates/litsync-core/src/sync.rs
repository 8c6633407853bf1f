//! # Synchronizer
//!
//! One synchronization run:
//!
//! 1. resolve the watermark (or take `resume_after`)
//! 2. list the source's batches, keep those above it, sort ascending
//! 3. fetch and merge each batch
//! 4. resolve references (after every batch or once at the end)
//!
//! Any non-recoverable error aborts the run, is handed to the
//! `FailureReporter` once, and comes back as a `SyncFailure` naming the last
//! fully applied batch. Nothing is rolled back: every upsert is atomic and
//! merging is idempotent, so a later run picks up from there.
//!
//! A batch that aborts half-way leaves some of its records stamped with its
//! sequence number, which already moves the watermark to it. Re-run with
//! `resume_after` set to the reported last applied batch to re-merge it.

use crate::merge::{MergeEngine, MergeStats, ReferencePolicy};
use crate::report::{FailureReporter, LogReporter};
use crate::resolve::{ReferenceResolver, ResolveStats};
use crate::source::BatchSource;
use crate::store::RecordStore;
use crate::watermark::{pending_batches, resolve_watermark};
use crate::SyncError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

// =============================================================================
// OPTIONS
// =============================================================================

/// When the resolution pass runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolveMode {
    /// Once, after every pending batch is merged.
    #[default]
    AfterAll,
    /// After each merged batch.
    PerBatch,
}

impl fmt::Display for ResolveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AfterAll => "after-all",
            Self::PerBatch => "per-batch",
        })
    }
}

impl FromStr for ResolveMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "after-all" => Ok(Self::AfterAll),
            "per-batch" => Ok(Self::PerBatch),
            other => Err(SyncError::Config(format!(
                "unknown resolve mode '{other}' (expected after-all or per-batch)"
            ))),
        }
    }
}

/// Knobs for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    pub policy: ReferencePolicy,
    pub resolve_mode: ResolveMode,
    /// Process batches above this sequence number instead of the watermark.
    /// Must not exceed the watermark.
    pub resume_after: Option<u64>,
}

/// Run-level cancellation, honored between batches.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// =============================================================================
// REPORT
// =============================================================================

/// What a run did.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Batches above this were eligible.
    pub start_watermark: u64,
    /// Watermark after the run.
    pub final_watermark: u64,
    /// Batches fully merged, ascending.
    pub batches_applied: Vec<u64>,
    pub merge: MergeStats,
    pub resolve: ResolveStats,
}

impl SyncReport {
    /// Highest fully merged batch, or the start watermark if none was.
    #[must_use]
    pub fn last_applied(&self) -> u64 {
        self.batches_applied
            .last()
            .copied()
            .unwrap_or(self.start_watermark)
    }
}

/// An aborted run.
#[derive(Debug, Error)]
#[error("{context}: {error}")]
pub struct SyncFailure {
    #[source]
    pub error: SyncError,
    /// Component and batch the run stopped in.
    pub context: String,
    /// Safe resume point: the last batch fully merged.
    pub last_applied: u64,
    /// Work done before the abort; all of it is committed.
    pub report: SyncReport,
}

// =============================================================================
// SYNCHRONIZER
// =============================================================================

/// Composes watermark, source, merge and resolution into one run.
pub struct Synchronizer<'a> {
    store: &'a mut dyn RecordStore,
    source: &'a dyn BatchSource,
    reporter: &'a dyn FailureReporter,
    options: SyncOptions,
    cancel: CancelFlag,
}

impl<'a> Synchronizer<'a> {
    pub fn new(store: &'a mut dyn RecordStore, source: &'a dyn BatchSource) -> Self {
        Self {
            store,
            source,
            reporter: &LogReporter,
            options: SyncOptions::default(),
            cancel: CancelFlag::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: &'a dyn FailureReporter) -> Self {
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    fn fail(&self, context: String, error: SyncError, report: SyncReport) -> SyncFailure {
        let last_applied = report.last_applied();
        let context = format!("{context} (last applied batch {last_applied})");
        self.reporter.report(&context, &error);
        SyncFailure {
            error,
            context,
            last_applied,
            report,
        }
    }

    /// Execute the run.
    pub fn run(mut self) -> Result<SyncReport, SyncFailure> {
        let mut report = SyncReport::default();

        let watermark = match resolve_watermark(&*self.store) {
            Ok(w) => w,
            Err(e) => return Err(self.fail("resolve watermark".to_string(), e, report)),
        };
        report.start_watermark = watermark;
        report.final_watermark = watermark;

        // Resuming can only re-merge what the store already reflects; a
        // resume point above the watermark would skip batches for good.
        let start = match self.options.resume_after {
            Some(after) if after > watermark => {
                let error = SyncError::Config(format!(
                    "cannot resume after batch {after}: the store only reflects batches up to {watermark}"
                ));
                return Err(self.fail("resume point".to_string(), error, report));
            }
            Some(after) => after,
            None => watermark,
        };
        report.start_watermark = start;

        let listing = match self.source.list_available_batches() {
            Ok(listing) => listing,
            Err(e) => return Err(self.fail("list batches".to_string(), e, report)),
        };
        let pending = match pending_batches(listing, start) {
            Ok(pending) => pending,
            Err(e) => return Err(self.fail("list batches".to_string(), e, report)),
        };

        tracing::info!(
            watermark,
            start,
            pending = pending.len(),
            policy = %self.options.policy,
            resolve_mode = %self.options.resolve_mode,
            "starting synchronization"
        );

        let mut engine = MergeEngine::new(self.options.policy);
        for batch in &pending {
            if self.cancel.is_cancelled() {
                return Err(self.fail(
                    format!("cancelled before batch {}", batch.seq),
                    SyncError::Cancelled,
                    report,
                ));
            }

            let items = match self.source.fetch_batch(batch) {
                Ok(items) => items,
                Err(e) => {
                    return Err(self.fail(
                        format!("fetch batch {} ({})", batch.seq, batch.locator),
                        e,
                        report,
                    ));
                }
            };

            match engine.merge(&mut *self.store, batch.seq, items) {
                Ok(stats) => report.merge.absorb(stats),
                Err(e) => return Err(self.fail(format!("merge batch {}", batch.seq), e, report)),
            }
            report.batches_applied.push(batch.seq);

            if self.options.resolve_mode == ResolveMode::PerBatch {
                match ReferenceResolver::resolve_references(&mut *self.store) {
                    Ok(stats) => report.resolve.absorb(stats),
                    Err(e) => {
                        return Err(self.fail(
                            format!("resolve after batch {}", batch.seq),
                            e,
                            report,
                        ));
                    }
                }
            }
        }

        if self.options.resolve_mode == ResolveMode::AfterAll {
            if self.cancel.is_cancelled() {
                return Err(self.fail(
                    "cancelled before resolution".to_string(),
                    SyncError::Cancelled,
                    report,
                ));
            }
            match ReferenceResolver::resolve_references(&mut *self.store) {
                Ok(stats) => report.resolve.absorb(stats),
                Err(e) => return Err(self.fail("resolve references".to_string(), e, report)),
            }
        }

        report.final_watermark = match resolve_watermark(&*self.store) {
            Ok(w) => w,
            Err(e) => return Err(self.fail("resolve final watermark".to_string(), e, report)),
        };

        tracing::info!(
            batches = report.batches_applied.len(),
            inserted = report.merge.inserted,
            updated = report.merge.updated,
            unchanged = report.merge.unchanged,
            skipped = report.merge.skipped(),
            resolved = report.resolve.resolved,
            watermark = report.final_watermark,
            "synchronization complete"
        );
        Ok(report)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::MemoryReporter;
    use crate::source::MemorySource;
    use crate::store::MemoryStore;
    use crate::{ExternalId, RawRecord};

    #[test]
    fn run_applies_pending_batches_in_order() {
        let mut store = MemoryStore::new();
        let source = MemorySource::new()
            .with_batch(7, vec![RawRecord::new("C")])
            .with_batch(3, vec![RawRecord::new("A").citing(["C"])])
            .with_batch(5, vec![RawRecord::new("B")]);

        let report = Synchronizer::new(&mut store, &source).run().expect("run");

        assert_eq!(report.batches_applied, vec![3, 5, 7]);
        assert_eq!(report.final_watermark, 7);
        assert_eq!(report.merge.inserted, 3);
        assert_eq!(source.fetched(), vec![3, 5, 7]);
        assert_eq!(store.dirty_count().expect("dirty"), 0);
    }

    #[test]
    fn second_run_fetches_nothing() {
        let mut store = MemoryStore::new();
        let source = MemorySource::new()
            .with_batch(3, vec![RawRecord::new("A")])
            .with_batch(7, vec![RawRecord::new("B")]);

        Synchronizer::new(&mut store, &source).run().expect("first run");
        let report = Synchronizer::new(&mut store, &source).run().expect("second run");

        assert!(report.batches_applied.is_empty());
        assert_eq!(report.start_watermark, 7);
        assert_eq!(source.fetched(), vec![3, 7]);
    }

    #[test]
    fn source_failure_reports_resume_point() {
        let mut store = MemoryStore::new();
        let source = MemorySource::new()
            .with_batch(1, vec![RawRecord::new("A")])
            .with_batch(2, vec![RawRecord::new("B")])
            .with_batch(3, vec![RawRecord::new("C")])
            .failing_at(2);
        let reporter = MemoryReporter::new();

        let failure = Synchronizer::new(&mut store, &source)
            .with_reporter(&reporter)
            .run()
            .expect_err("batch 2 fails");

        assert_eq!(failure.last_applied, 1);
        assert!(matches!(failure.error, SyncError::SourceUnavailable { .. }));
        assert_eq!(reporter.reports().len(), 1);
        assert!(reporter.reports()[0].0.contains("fetch batch 2"));
        // Batch 1 stays committed.
        assert!(
            store
                .find_by_external_id(&ExternalId::new("A"))
                .expect("lookup")
                .is_some()
        );
    }

    #[test]
    fn cancellation_stops_before_next_batch() {
        let mut store = MemoryStore::new();
        let source = MemorySource::new().with_batch(1, vec![RawRecord::new("A")]);
        let cancel = CancelFlag::new();
        cancel.cancel();

        let failure = Synchronizer::new(&mut store, &source)
            .with_cancel(cancel)
            .run()
            .expect_err("cancelled");

        assert!(matches!(failure.error, SyncError::Cancelled));
        assert_eq!(failure.last_applied, 0);
        assert!(source.fetched().is_empty());
    }

    #[test]
    fn resume_after_reprocesses_batches() {
        let mut store = MemoryStore::new();
        let source = MemorySource::new()
            .with_batch(1, vec![RawRecord::new("A")])
            .with_batch(2, vec![RawRecord::new("B")]);

        Synchronizer::new(&mut store, &source).run().expect("first run");
        let report = Synchronizer::new(&mut store, &source)
            .with_options(SyncOptions {
                resume_after: Some(1),
                ..SyncOptions::default()
            })
            .run()
            .expect("resume");

        assert_eq!(report.batches_applied, vec![2]);
        assert_eq!(report.merge.unchanged, 1);
        assert_eq!(store.len().expect("len"), 2);
    }

    #[test]
    fn resume_point_above_watermark_is_rejected() {
        let mut store = MemoryStore::new();
        let source = MemorySource::new()
            .with_batch(1, vec![RawRecord::new("A")])
            .with_batch(2, vec![RawRecord::new("B")])
            .with_batch(3, vec![RawRecord::new("C")]);
        let reporter = MemoryReporter::new();

        let failure = Synchronizer::new(&mut store, &source)
            .with_reporter(&reporter)
            .with_options(SyncOptions {
                resume_after: Some(2),
                ..SyncOptions::default()
            })
            .run()
            .expect_err("resume point above empty store");

        assert!(matches!(failure.error, SyncError::Config(_)));
        assert_eq!(failure.last_applied, 0);
        assert!(source.fetched().is_empty());
        assert_eq!(store.len().expect("len"), 0);
        assert_eq!(reporter.reports().len(), 1);

        // Nothing was skipped: a plain run still ingests every batch.
        let report = Synchronizer::new(&mut store, &source).run().expect("run");
        assert_eq!(report.batches_applied, vec![1, 2, 3]);
        assert_eq!(store.len().expect("len"), 3);
    }

    #[test]
    fn resolve_mode_parses() {
        assert_eq!(
            "per-batch".parse::<ResolveMode>().expect("parse"),
            ResolveMode::PerBatch
        );
        assert_eq!(ResolveMode::default().to_string(), "after-all");
        assert!("never".parse::<ResolveMode>().is_err());
    }
}
