//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use crate::config::Settings;
use crate::incident::IncidentFileReporter;
use crate::mirror::{self, HttpIndex, HttpSource};
use litsync_core::{
    BatchSource, CancelFlag, DirectorySource, ExternalId, FailureReporter, LogReporter,
    RecordStore, RedbStore, ReferenceResolver, SyncError, SyncFailure, SyncOptions, SyncReport,
    Synchronizer, export_jsonl, resolve_watermark,
};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

// =============================================================================
// HELPERS
// =============================================================================

/// Open an existing record database.
///
/// Commands other than `init` and `sync` refuse to create a database as a
/// side effect of a typo in `--database`.
fn open_existing(db_path: &Path) -> Result<RedbStore, SyncError> {
    if !db_path.is_file() {
        return Err(SyncError::StoreUnavailable(format!(
            "no database at {} (run `litsync init` first)",
            db_path.display()
        )));
    }
    RedbStore::open(db_path)
}

/// Validate output path for security.
///
/// For output files, we validate the parent directory exists and is a
/// directory, and resolve it so ".." and symlinks cannot redirect the write.
fn validate_output_path(path: &Path) -> Result<PathBuf, SyncError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        SyncError::Config(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(SyncError::Config(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| SyncError::Config("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Create an empty record database.
pub fn cmd_init(settings: &Settings, force: bool, json_mode: bool) -> Result<(), SyncError> {
    let db_path = &settings.database;

    if db_path.exists() {
        if !force {
            return Err(SyncError::Config(format!(
                "database {} already exists (use --force to replace it)",
                db_path.display()
            )));
        }
        std::fs::remove_file(db_path).map_err(|e| {
            SyncError::StoreUnavailable(format!("cannot remove {}: {}", db_path.display(), e))
        })?;
        tracing::warn!(path = %db_path.display(), "replaced existing database");
    }

    RedbStore::open(db_path)?;

    if json_mode {
        print_json(&serde_json::json!({
            "database": db_path.to_string_lossy(),
            "created": true
        }));
    } else {
        println!("Initialized empty database at {:?}", db_path);
    }
    Ok(())
}

// =============================================================================
// STATUS COMMANDS
// =============================================================================

/// Show store status.
pub fn cmd_status(settings: &Settings, json_mode: bool) -> Result<(), SyncError> {
    let store = open_existing(&settings.database)?;
    let records = store.len()?;
    let dirty = store.dirty_count()?;
    let watermark = resolve_watermark(&store)?;
    let next_id = store.next_internal_id()?;

    if json_mode {
        print_json(&serde_json::json!({
            "database": settings.database.to_string_lossy(),
            "records": records,
            "dirty": dirty,
            "watermark": watermark,
            "next_internal_id": next_id,
            "policy": settings.policy.to_string(),
            "resolve_mode": settings.resolve_mode.to_string()
        }));
        return Ok(());
    }

    println!("litsync Store Status");
    println!("====================");
    println!("Database:  {:?}", settings.database);
    println!();
    println!("Records:   {}", records);
    println!("Dirty:     {}", dirty);
    println!("Watermark: {}", watermark);
    println!("Next id:   {}", next_id);
    println!();
    println!("Policy:    {}", settings.policy);
    println!("Resolve:   {}", settings.resolve_mode);

    Ok(())
}

/// Print the watermark.
pub fn cmd_watermark(settings: &Settings, json_mode: bool) -> Result<(), SyncError> {
    let store = open_existing(&settings.database)?;
    let watermark = resolve_watermark(&store)?;

    if json_mode {
        print_json(&serde_json::json!({ "watermark": watermark }));
    } else {
        println!("{watermark}");
    }
    Ok(())
}

// =============================================================================
// SYNC COMMAND
// =============================================================================

/// Run one synchronization.
///
/// A remote source is fetched batch by batch inside the run, so each batch
/// is merged before the next one is downloaded. Ctrl-C stops the run at the
/// next batch boundary.
pub async fn cmd_sync(
    settings: &Settings,
    resume_after: Option<u64>,
    json_mode: bool,
) -> Result<(), SyncError> {
    let source = settings.source.clone().ok_or_else(|| {
        SyncError::Config("no source given (--source or `source` in the config file)".to_string())
    })?;

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, stopping after the current batch");
                cancel.cancel();
            }
        });
    }

    let reporter: Box<dyn FailureReporter> = match &settings.incident_log {
        Some(path) => Box::new(IncidentFileReporter::open(path)?),
        None => Box::new(LogReporter),
    };

    let batches: Box<dyn BatchSource + Send> = if mirror::is_remote(&source) {
        let index = HttpIndex::new(&source, settings.http_timeout)?;
        Box::new(HttpSource::new(
            index,
            &settings.work_dir,
            settings.keep_artifacts,
            tokio::runtime::Handle::current(),
        )?)
    } else {
        Box::new(DirectorySource::new(&source))
    };

    let mut store = RedbStore::open(&settings.database)?;

    let options = SyncOptions {
        policy: settings.policy,
        resolve_mode: settings.resolve_mode,
        resume_after,
    };

    tracing::info!(
        source = %source,
        policy = %options.policy,
        resolve = %options.resolve_mode,
        "starting synchronization"
    );

    let outcome = tokio::task::spawn_blocking(move || {
        Synchronizer::new(&mut store, batches.as_ref())
            .with_options(options)
            .with_reporter(reporter.as_ref())
            .with_cancel(cancel)
            .run()
    })
    .await
    .map_err(|e| SyncError::StoreUnavailable(format!("synchronization task failed: {e}")))?;

    match outcome {
        Ok(report) => {
            print_sync_report(&report, json_mode);
            Ok(())
        }
        Err(failure) => {
            print_sync_failure(&failure, json_mode);
            Err(failure.error)
        }
    }
}

fn report_json(report: &SyncReport) -> serde_json::Value {
    serde_json::json!({
        "start_watermark": report.start_watermark,
        "final_watermark": report.final_watermark,
        "batches_applied": report.batches_applied,
        "inserted": report.merge.inserted,
        "updated": report.merge.updated,
        "unchanged": report.merge.unchanged,
        "skipped": report.merge.skipped(),
        "dropped_citations": report.merge.dropped_citations,
        "redirtied": report.merge.redirtied,
        "resolve": report.resolve
    })
}

fn print_sync_report(report: &SyncReport, json_mode: bool) {
    if json_mode {
        print_json(&report_json(report));
        return;
    }

    println!("Synchronization Complete");
    println!("========================");
    println!(
        "Watermark:  {} -> {}",
        report.start_watermark, report.final_watermark
    );
    println!("Batches:    {}", report.batches_applied.len());
    println!();
    println!("Inserted:   {}", report.merge.inserted);
    println!("Updated:    {}", report.merge.updated);
    println!("Unchanged:  {}", report.merge.unchanged);
    println!("Skipped:    {}", report.merge.skipped());
    println!("Dropped:    {} citations", report.merge.dropped_citations);
    println!("Redirtied:  {}", report.merge.redirtied);
    println!();
    println!("Resolved:   {} citations", report.resolve.resolved);
    println!("Unresolved: {} citations", report.resolve.unresolved);
}

fn print_sync_failure(failure: &SyncFailure, json_mode: bool) {
    if json_mode {
        print_json(&serde_json::json!({
            "error": failure.error.to_string(),
            "context": failure.context,
            "last_applied": failure.last_applied,
            "progress": report_json(&failure.report)
        }));
        return;
    }

    println!("Synchronization Aborted");
    println!("=======================");
    println!("Context:      {}", failure.context);
    println!("Last applied: {}", failure.last_applied);
    println!(
        "Batches:      {} merged before the abort",
        failure.report.batches_applied.len()
    );
    println!();
    println!(
        "Re-run with `--resume-after {}` to re-merge any partially applied batch.",
        failure.last_applied
    );
}

// =============================================================================
// RESOLVE COMMAND
// =============================================================================

/// Run a resolution pass over the dirty records.
pub fn cmd_resolve(settings: &Settings, json_mode: bool) -> Result<(), SyncError> {
    let mut store = open_existing(&settings.database)?;
    let stats = ReferenceResolver::resolve_references(&mut store)?;

    if json_mode {
        print_json(&serde_json::json!(stats));
    } else {
        println!("Resolution Pass");
        println!("===============");
        println!("Records:    {}", stats.records);
        println!("Resolved:   {}", stats.resolved);
        println!("Unresolved: {}", stats.unresolved);
    }
    Ok(())
}

// =============================================================================
// SHOW COMMAND
// =============================================================================

/// Print one record.
pub fn cmd_show(settings: &Settings, id: &str, json_mode: bool) -> Result<(), SyncError> {
    let store = open_existing(&settings.database)?;
    let record = store
        .find_by_external_id(&ExternalId::new(id))?
        .ok_or_else(|| SyncError::Config(format!("no record with external id {id}")))?;

    if json_mode {
        print_json(&serde_json::json!(record));
        return Ok(());
    }

    println!("Record {}", record.external_id);
    println!("==========");
    println!("Internal id: {}", record.internal_id);
    println!("Batch:       {}", record.batch_seq);
    println!("Dirty:       {}", record.dirty);
    println!();
    for (field, values) in &record.payload.0 {
        println!("{field}: {}", values.join("; "));
    }
    println!();
    println!(
        "Citations ({} resolved of {}):",
        record.resolved_count(),
        record.citations.len()
    );
    for citation in &record.citations {
        match citation.resolved {
            Some(internal) => println!("  {} -> #{}", citation.target, internal),
            None => println!("  {} (unresolved)", citation.target),
        }
    }
    Ok(())
}

// =============================================================================
// EXPORT COMMAND
// =============================================================================

/// Export every record as JSON lines.
pub fn cmd_export(settings: &Settings, output: &Path, json_mode: bool) -> Result<(), SyncError> {
    let store = open_existing(&settings.database)?;
    let output = validate_output_path(output)?;

    let file = File::create(&output).map_err(|e| {
        SyncError::SerializationError(format!("cannot create {}: {}", output.display(), e))
    })?;
    let summary = export_jsonl(&store, BufWriter::new(file))?;

    if json_mode {
        print_json(&serde_json::json!({
            "output": output.to_string_lossy(),
            "records": summary.records,
            "bytes": summary.bytes,
            "checksum": summary.checksum
        }));
    } else {
        println!("Exported {} records ({} bytes) to {:?}", summary.records, summary.bytes, output);
        if let Some(checksum) = &summary.checksum {
            println!("BLAKE3: {checksum}");
        }
    }
    Ok(())
}
