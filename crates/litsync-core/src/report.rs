//! # Failure Reporting
//!
//! Sink for errors that abort a run. The synchronizer calls
//! `FailureReporter::report` exactly once per aborted run, with a context
//! string naming the component, the batch (if any) and the resume point.

use crate::SyncError;
use std::sync::Mutex;

/// Receives unrecoverable errors.
///
/// Implementations must not fail: a reporter that cannot deliver should log
/// and move on, the run is aborting anyway.
pub trait FailureReporter: Send + Sync {
    fn report(&self, context: &str, error: &SyncError);
}

/// Reports through `tracing` at error level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl FailureReporter for LogReporter {
    fn report(&self, context: &str, error: &SyncError) {
        tracing::error!(context, error = %error, "synchronization aborted");
    }
}

/// Keeps reports in memory. Used by tests and by callers that want to
/// inspect failures after the run.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    reports: Mutex<Vec<(String, String)>>,
}

impl MemoryReporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `(context, error message)` pairs in report order.
    #[must_use]
    pub fn reports(&self) -> Vec<(String, String)> {
        match self.reports.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl FailureReporter for MemoryReporter {
    fn report(&self, context: &str, error: &SyncError) {
        let entry = (context.to_string(), error.to_string());
        match self.reports.lock() {
            Ok(mut guard) => guard.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }
}

impl<R: FailureReporter + ?Sized> FailureReporter for &R {
    fn report(&self, context: &str, error: &SyncError) {
        (**self).report(context, error);
    }
}
