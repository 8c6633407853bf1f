//! # Configuration
//!
//! `litsync.toml` holds the defaults for a deployment. Every key is optional;
//! command-line flags override the file and built-in defaults fill the rest.
//!
//! ```toml
//! database = "pubmed.redb"
//! source = "https://ftp.ncbi.nlm.nih.gov/pubmed/updatefiles/"
//! work_dir = "/var/tmp/litsync"
//! policy = "reverse-index"
//! resolve_mode = "after-all"
//! keep_artifacts = false
//! incident_log = "incidents.jsonl"
//! http_timeout_secs = 300
//! ```

use litsync_core::{ReferencePolicy, ResolveMode, SyncError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "litsync.toml";

pub const DEFAULT_DATABASE: &str = "litsync.redb";
pub const DEFAULT_WORK_DIR: &str = "litsync-work";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 120;

/// Partial settings, as read from a file or collected from flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub database: Option<PathBuf>,
    /// Directory path or `http(s)://` index URL.
    pub source: Option<String>,
    /// Download directory for a remote source.
    pub work_dir: Option<PathBuf>,
    pub policy: Option<ReferencePolicy>,
    pub resolve_mode: Option<ResolveMode>,
    pub keep_artifacts: Option<bool>,
    /// JSON-lines file receiving one entry per aborted run.
    pub incident_log: Option<PathBuf>,
    pub http_timeout_secs: Option<u64>,
}

impl SyncConfig {
    /// Parse a config file.
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&text).map_err(|e| match e {
            SyncError::Config(msg) => SyncError::Config(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    /// Parse config text.
    pub fn parse(text: &str) -> Result<Self, SyncError> {
        toml::from_str(text).map_err(|e| SyncError::Config(e.to_string()))
    }

    /// Load the explicit file if given, else `litsync.toml` if present,
    /// else nothing.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, SyncError> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.is_file() {
                    tracing::debug!(path = %fallback.display(), "using config file");
                    Self::load(fallback)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Values set in `overrides` win.
    #[must_use]
    pub fn overlay(self, overrides: SyncConfig) -> SyncConfig {
        SyncConfig {
            database: overrides.database.or(self.database),
            source: overrides.source.or(self.source),
            work_dir: overrides.work_dir.or(self.work_dir),
            policy: overrides.policy.or(self.policy),
            resolve_mode: overrides.resolve_mode.or(self.resolve_mode),
            keep_artifacts: overrides.keep_artifacts.or(self.keep_artifacts),
            incident_log: overrides.incident_log.or(self.incident_log),
            http_timeout_secs: overrides.http_timeout_secs.or(self.http_timeout_secs),
        }
    }

    /// Fill the gaps with defaults.
    pub fn resolve(self) -> Result<Settings, SyncError> {
        let timeout = self.http_timeout_secs.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
        if timeout == 0 {
            return Err(SyncError::Config(
                "http_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.source.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(SyncError::Config("source must not be empty".to_string()));
        }

        Ok(Settings {
            database: self
                .database
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE)),
            source: self.source,
            work_dir: self
                .work_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WORK_DIR)),
            policy: self.policy.unwrap_or_default(),
            resolve_mode: self.resolve_mode.unwrap_or_default(),
            keep_artifacts: self.keep_artifacts.unwrap_or(false),
            incident_log: self.incident_log,
            http_timeout: Duration::from_secs(timeout),
        })
    }
}

/// Effective settings for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub database: PathBuf,
    pub source: Option<String>,
    pub work_dir: PathBuf,
    pub policy: ReferencePolicy,
    pub resolve_mode: ResolveMode,
    pub keep_artifacts: bool,
    pub incident_log: Option<PathBuf>,
    pub http_timeout: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_file() {
        let config = SyncConfig::parse(
            r#"
            database = "pubmed.redb"
            source = "https://example.org/updatefiles/"
            policy = "fire-and-forget"
            resolve_mode = "per-batch"
            keep_artifacts = true
            http_timeout_secs = 30
            "#,
        )
        .expect("parse");

        assert_eq!(config.database, Some(PathBuf::from("pubmed.redb")));
        assert_eq!(config.policy, Some(ReferencePolicy::FireAndForget));
        assert_eq!(config.resolve_mode, Some(ResolveMode::PerBatch));
        assert_eq!(config.keep_artifacts, Some(true));
        assert_eq!(config.http_timeout_secs, Some(30));
    }

    #[test]
    fn rejects_unknown_keys_and_values() {
        assert!(matches!(
            SyncConfig::parse("databse = \"x\""),
            Err(SyncError::Config(_))
        ));
        assert!(matches!(
            SyncConfig::parse("policy = \"eventually\""),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn overrides_win() {
        let file = SyncConfig {
            database: Some(PathBuf::from("file.redb")),
            policy: Some(ReferencePolicy::FireAndForget),
            ..SyncConfig::default()
        };
        let flags = SyncConfig {
            database: Some(PathBuf::from("flag.redb")),
            ..SyncConfig::default()
        };

        let merged = file.overlay(flags);
        assert_eq!(merged.database, Some(PathBuf::from("flag.redb")));
        assert_eq!(merged.policy, Some(ReferencePolicy::FireAndForget));
    }

    #[test]
    fn defaults_fill_gaps() {
        let settings = SyncConfig::default().resolve().expect("resolve");
        assert_eq!(settings.database, PathBuf::from(DEFAULT_DATABASE));
        assert_eq!(settings.work_dir, PathBuf::from(DEFAULT_WORK_DIR));
        assert_eq!(settings.policy, ReferencePolicy::ReverseIndex);
        assert_eq!(settings.resolve_mode, ResolveMode::AfterAll);
        assert!(!settings.keep_artifacts);
        assert_eq!(
            settings.http_timeout,
            Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS)
        );
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = SyncConfig {
            http_timeout_secs: Some(0),
            ..SyncConfig::default()
        };
        assert!(matches!(config.resolve(), Err(SyncError::Config(_))));
    }
}
