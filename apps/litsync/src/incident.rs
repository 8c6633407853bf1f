//! # Incident Log
//!
//! `FailureReporter` that appends one JSON object per aborted run to a file,
//! for operators and alerting to pick up:
//!
//! ```json
//! {"timestamp_secs":1760745600,"context":"merge batch 1219 (last applied batch 1218)","error":"Store unavailable: ..."}
//! ```

use litsync_core::{FailureReporter, SyncError};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Appends incidents to a JSON-lines file and logs them.
#[derive(Debug)]
pub struct IncidentFileReporter {
    path: PathBuf,
    file: Mutex<File>,
}

impl IncidentFileReporter {
    /// Open (or create) the incident file for appending.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                SyncError::Config(format!(
                    "cannot open incident log {}: {}",
                    path.display(),
                    e
                ))
            })?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }
}

impl FailureReporter for IncidentFileReporter {
    fn report(&self, context: &str, error: &SyncError) {
        tracing::error!(context, error = %error, "synchronization aborted");

        let timestamp_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let line = serde_json::json!({
            "timestamp_secs": timestamp_secs,
            "context": context,
            "error": error.to_string(),
        });

        let written = match self.file.lock() {
            Ok(mut file) => writeln!(file, "{line}").and_then(|()| file.flush()),
            Err(poisoned) => {
                let mut file = poisoned.into_inner();
                writeln!(file, "{line}").and_then(|()| file.flush())
            }
        };
        if let Err(e) = written {
            tracing::error!(path = %self.path.display(), error = %e, "cannot write incident log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_one_line_per_report() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("incidents.jsonl");

        let reporter = IncidentFileReporter::open(&path).expect("open");
        reporter.report("fetch batch 3", &SyncError::source_failure("n0003.xml", "gone"));
        reporter.report("watermark", &SyncError::StoreUnavailable("down".to_string()));

        let text = std::fs::read_to_string(&path).expect("read");
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["context"], "fetch batch 3");
        assert!(
            lines[1]["error"]
                .as_str()
                .is_some_and(|e| e.contains("down"))
        );
    }

    #[test]
    fn reopening_appends() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("incidents.jsonl");

        for _ in 0..2 {
            IncidentFileReporter::open(&path)
                .expect("open")
                .report("run", &SyncError::Cancelled);
        }

        let text = std::fs::read_to_string(&path).expect("read");
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn unopenable_path_is_a_config_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let result = IncidentFileReporter::open(dir.path().join("missing").join("x.jsonl"));
        assert!(matches!(result, Err(SyncError::Config(_))));
    }
}
