//! # litsync CLI Module
//!
//! ## Available Commands
//!
//! - `init` - Create an empty record database
//! - `status` - Record count, dirty count, watermark
//! - `watermark` - Print the watermark only
//! - `sync` - Merge every batch above the watermark, then resolve references
//! - `resolve` - Run a resolution pass on its own
//! - `show` - Print one record
//! - `export` - Dump the store as JSON lines with a BLAKE3 checksum

mod commands;

use crate::config::{Settings, SyncConfig};
use clap::{Parser, Subcommand};
use litsync_core::{ReferencePolicy, ResolveMode, SyncError};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// litsync - incremental synchronizer for batch-published citation corpora
///
/// Merges numbered update files (PubMed `updatefiles/` and the like) into a
/// local record store and resolves citations between records.
#[derive(Parser, Debug)]
#[command(name = "litsync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (defaults to ./litsync.toml when present)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the record database
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long = "json", global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create an empty record database
    Init {
        /// Replace an existing database
        #[arg(short, long)]
        force: bool,
    },

    /// Show store status
    Status,

    /// Print the current watermark
    Watermark,

    /// Merge pending batches and resolve references
    Sync {
        /// Batch directory or http(s) index URL
        #[arg(short, long)]
        source: Option<String>,

        /// Download directory for a remote source
        #[arg(short, long)]
        work_dir: Option<PathBuf>,

        /// Keep downloaded batch files after the run
        #[arg(long)]
        keep_artifacts: bool,

        /// Forward-reference policy: reverse-index or fire-and-forget
        #[arg(short, long)]
        policy: Option<ReferencePolicy>,

        /// When to resolve references: after-all or per-batch
        #[arg(short, long)]
        resolve: Option<ResolveMode>,

        /// Process batches above this number instead of the watermark
        #[arg(long)]
        resume_after: Option<u64>,

        /// Append one JSON line per aborted run to this file
        #[arg(long)]
        incident_log: Option<PathBuf>,
    },

    /// Run a reference resolution pass over dirty records
    Resolve,

    /// Show one record
    Show {
        /// External identifier (PMID)
        #[arg(short, long)]
        id: String,
    },

    /// Export all records as JSON lines
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
}

impl Cli {
    /// File config overlaid with the flags given on this invocation.
    pub fn settings(&self) -> Result<Settings, SyncError> {
        let file = SyncConfig::discover(self.config.as_deref())?;

        let mut flags = SyncConfig {
            database: self.database.clone(),
            ..SyncConfig::default()
        };
        if let Some(Commands::Sync {
            source,
            work_dir,
            keep_artifacts,
            policy,
            resolve,
            incident_log,
            ..
        }) = &self.command
        {
            flags.source = source.clone();
            flags.work_dir = work_dir.clone();
            flags.keep_artifacts = keep_artifacts.then_some(true);
            flags.policy = *policy;
            flags.resolve_mode = *resolve;
            flags.incident_log = incident_log.clone();
        }

        file.overlay(flags).resolve()
    }
}

/// Execute the CLI command.
pub async fn execute(cli: Cli) -> Result<(), SyncError> {
    let settings = cli.settings()?;
    if cli.verbose {
        tracing::debug!(?settings, "effective settings");
    }

    match cli.command {
        Some(Commands::Init { force }) => cmd_init(&settings, force, cli.json_mode),
        Some(Commands::Status) | None => cmd_status(&settings, cli.json_mode),
        Some(Commands::Watermark) => cmd_watermark(&settings, cli.json_mode),
        Some(Commands::Sync { resume_after, .. }) => {
            cmd_sync(&settings, resume_after, cli.json_mode).await
        }
        Some(Commands::Resolve) => cmd_resolve(&settings, cli.json_mode),
        Some(Commands::Show { id }) => cmd_show(&settings, &id, cli.json_mode),
        Some(Commands::Export { output }) => cmd_export(&settings, &output, cli.json_mode),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn sync_flags_override_defaults() {
        let cli = Cli::parse_from([
            "litsync",
            "--config",
            "/nonexistent/litsync.toml",
            "sync",
            "--source",
            "/data",
        ]);
        // An explicit config path must exist.
        assert!(matches!(cli.settings(), Err(SyncError::Config(_))));

        let cli = Cli::parse_from([
            "litsync",
            "-D",
            "records.redb",
            "sync",
            "--source",
            "/data",
            "--policy",
            "fire-and-forget",
            "--resolve",
            "per-batch",
            "--keep-artifacts",
        ]);
        let settings = cli.settings().expect("settings");
        assert_eq!(settings.database, PathBuf::from("records.redb"));
        assert_eq!(settings.source.as_deref(), Some("/data"));
        assert_eq!(settings.policy, ReferencePolicy::FireAndForget);
        assert_eq!(settings.resolve_mode, ResolveMode::PerBatch);
        assert!(settings.keep_artifacts);
    }

    #[test]
    fn unknown_policy_is_rejected_by_parser() {
        let result = Cli::try_parse_from(["litsync", "sync", "--policy", "sometimes"]);
        assert!(result.is_err());
    }
}
