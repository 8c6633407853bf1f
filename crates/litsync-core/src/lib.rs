//! # litsync-core
//!
//! Incremental merge and cross-reference resolution engine for
//! batch-published bibliographic corpora (PubMed update files and the like).
//!
//! A run derives a watermark from the store, merges every newer batch with
//! per-record change detection, then resolves citations expressed as external
//! identifiers into internal storage keys.
//!
//! ## Layout
//!
//! - `types`: identifiers, records, raw parser output, `SyncError`
//! - `store` / `storage`: the `RecordStore` contract, in-memory and redb stores
//! - `source`: the `BatchSource` contract, directory source, batch parsers
//! - `watermark`, `merge`, `resolve`: the engine
//! - `sync`: one complete run, with failure reporting and cancellation
//! - `export`: deterministic JSON-lines dump
//!
//! The core is synchronous and has no network dependencies; transport lives
//! in the `litsync` binary.

// =============================================================================
// MODULES
// =============================================================================

pub mod export;
pub mod ingestor;
pub mod merge;
pub mod primitives;
pub mod report;
pub mod resolve;
pub mod source;
pub mod storage;
pub mod store;
pub mod sync;
pub mod types;
pub mod watermark;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    BatchDescriptor, Citation, ExternalId, InternalId, Payload, RawItem, RawRecord, Record,
    RecordDefect, RecordDraft, SyncError,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use export::{ExportSummary, export_jsonl};
pub use ingestor::Ingestor;
pub use merge::{MergeEngine, MergeStats, ReferencePolicy};
pub use report::{FailureReporter, LogReporter, MemoryReporter};
pub use resolve::{ReferenceResolver, ResolveStats};
pub use store::{MemoryStore, RecordFilter, RecordStore};
pub use sync::{CancelFlag, ResolveMode, SyncFailure, SyncOptions, SyncReport, Synchronizer};
pub use watermark::{pending_batches, resolve_watermark};

// =============================================================================
// RE-EXPORTS: Collaborators
// =============================================================================

pub use source::{
    BatchFormat, BatchSource, DirectorySource, MemorySource, batch_seq_from_name, load_batch_file,
};
pub use storage::RedbStore;

#[cfg(feature = "crypto-hash")]
pub use export::compute_blake3_hash;
