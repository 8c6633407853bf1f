//! # Core Type Definitions
//!
//! This module contains all core types for the litsync engine:
//! - Record identifiers (`ExternalId`, `InternalId`)
//! - Stored representation (`Record`, `RecordDraft`, `Citation`, `Payload`)
//! - Parser output (`RawRecord`, `RawItem`, `RecordDefect`)
//! - Batch addressing (`BatchDescriptor`)
//! - Error types (`SyncError`)
//!
//! ## Ordering Guarantees
//!
//! All identifier types implement `Ord` so that stores, indexes and exports
//! iterate in a deterministic order (`BTreeMap`/`BTreeSet` only).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Corpus-assigned identifier of a record (a PMID for PubMed batches).
///
/// Stable across republication. Used as the natural key for identity and as
/// the target of citations.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExternalId(pub String);

impl ExternalId {
    /// Create a new external identifier.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExternalId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Storage-assigned key of a record.
///
/// Allocated by the store on first insert of an `ExternalId` and never
/// reassigned afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InternalId(pub u64);

impl fmt::Display for InternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// PAYLOAD
// =============================================================================

/// Opaque structured metadata carried by a record.
///
/// Field name -> list of values (a record may have many authors, several
/// abstract sections, ...). The engine never inspects it; it is replaced
/// wholesale when a record's citation set changes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(pub BTreeMap<String, Vec<String>>);

impl Payload {
    /// Create an empty payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style single value insertion.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(field, value);
        self
    }

    /// Append a value to a field.
    pub fn push(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(value.into());
    }

    /// All values of a field (empty slice if absent).
    #[must_use]
    pub fn get(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First value of a field.
    #[must_use]
    pub fn first(&self, field: &str) -> Option<&str> {
        self.get(field).first().map(String::as_str)
    }

    /// Number of distinct fields.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// =============================================================================
// CITATION
// =============================================================================

/// A directed reference from one record to another.
///
/// Initially known only by the target's external identifier;
/// `resolved` is filled in by the resolution pass once the target exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// External identifier of the cited record.
    pub target: ExternalId,
    /// Internal identifier of the cited record, once known.
    pub resolved: Option<InternalId>,
}

impl Citation {
    /// Create a citation that has not been resolved yet.
    #[must_use]
    pub fn unresolved(target: ExternalId) -> Self {
        Self {
            target,
            resolved: None,
        }
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }
}

// =============================================================================
// RECORD
// =============================================================================

/// The stored representation of one corpus entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Storage-assigned key.
    pub internal_id: InternalId,
    /// Corpus-assigned natural key.
    pub external_id: ExternalId,
    /// Opaque metadata.
    pub payload: Payload,
    /// Outbound citations, in publication order.
    pub citations: Vec<Citation>,
    /// Citations need (re-)resolution against the current store contents.
    pub dirty: bool,
    /// Batch that most recently produced or modified this record.
    pub batch_seq: u64,
}

impl Record {
    /// The citation targets as an unordered set.
    ///
    /// This is the basis of change detection: two citation lists with the
    /// same targets in a different order are considered equal.
    #[must_use]
    pub fn citation_targets(&self) -> BTreeSet<&ExternalId> {
        self.citations.iter().map(|c| &c.target).collect()
    }

    /// True if any citation to `target` is still unresolved.
    #[must_use]
    pub fn cites_unresolved(&self, target: &ExternalId) -> bool {
        self.citations
            .iter()
            .any(|c| c.resolved.is_none() && &c.target == target)
    }

    /// Number of citations that carry a resolved internal id.
    #[must_use]
    pub fn resolved_count(&self) -> usize {
        self.citations.iter().filter(|c| c.is_resolved()).count()
    }

    /// Convert into a draft for re-upsert. The internal id is kept by the
    /// store because upserts are keyed on the external id.
    #[must_use]
    pub fn into_draft(self) -> RecordDraft {
        RecordDraft {
            external_id: self.external_id,
            payload: self.payload,
            citations: self.citations,
            dirty: self.dirty,
            batch_seq: self.batch_seq,
        }
    }
}

/// A record as handed to `RecordStore::upsert`.
///
/// Carries everything except the internal id, which the store owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDraft {
    pub external_id: ExternalId,
    pub payload: Payload,
    pub citations: Vec<Citation>,
    pub dirty: bool,
    pub batch_seq: u64,
}

impl RecordDraft {
    /// Attach the store-assigned internal id.
    #[must_use]
    pub fn into_record(self, internal_id: InternalId) -> Record {
        Record {
            internal_id,
            external_id: self.external_id,
            payload: self.payload,
            citations: self.citations,
            dirty: self.dirty,
            batch_seq: self.batch_seq,
        }
    }
}

// =============================================================================
// RAW RECORDS (parser output)
// =============================================================================

/// A record as produced by a batch parser, before merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub external_id: String,
    #[serde(default)]
    pub payload: Payload,
    #[serde(default)]
    pub citation_target_ids: Vec<String>,
}

impl RawRecord {
    #[must_use]
    pub fn new(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            payload: Payload::new(),
            citation_target_ids: Vec::new(),
        }
    }

    /// Builder-style citation list.
    #[must_use]
    pub fn citing<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.citation_target_ids = targets.into_iter().map(Into::into).collect();
        self
    }

    /// Builder-style payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }
}

/// A record the parser could not turn into a `RawRecord`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDefect {
    /// Zero-based position of the record inside its batch.
    pub position: usize,
    /// External id, if the parser got far enough to read one.
    pub external_id: Option<String>,
    pub reason: String,
}

/// One entry of a materialized batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawItem {
    Parsed(RawRecord),
    Defect(RecordDefect),
}

impl From<RawRecord> for RawItem {
    fn from(record: RawRecord) -> Self {
        Self::Parsed(record)
    }
}

impl From<RecordDefect> for RawItem {
    fn from(defect: RecordDefect) -> Self {
        Self::Defect(defect)
    }
}

// =============================================================================
// BATCHES
// =============================================================================

/// A remote batch as listed by a `BatchSource`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BatchDescriptor {
    /// Publication sequence number.
    pub seq: u64,
    /// Source-specific locator (file path, URL, in-memory key).
    pub locator: String,
}

impl BatchDescriptor {
    #[must_use]
    pub fn new(seq: u64, locator: impl Into<String>) -> Self {
        Self {
            seq,
            locator: locator.into(),
        }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur while synchronizing.
///
/// Only `MalformedRecord` is recoverable: it is contained to the record it
/// describes. Every other kind aborts the current run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The record store could not be reached or failed an operation.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The batch listing or a batch fetch failed.
    #[error("Source unavailable ({locator}): {reason}")]
    SourceUnavailable { locator: String, reason: String },

    /// A single record could not be parsed or failed validation.
    #[error(
        "Malformed record #{position} in batch {batch_seq} (external id {external_id:?}): {reason}"
    )]
    MalformedRecord {
        batch_seq: u64,
        position: usize,
        external_id: Option<String>,
        reason: String,
    },

    /// A citation points at a record whose external id does not match.
    #[error("Citation {citing} -> {target} resolves inconsistently: {details}")]
    ResolutionInconsistency {
        citing: ExternalId,
        target: ExternalId,
        details: String,
    },

    /// A stored document could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A batch arrived with a sequence number lower than one already merged.
    #[error("Batch {got} arrived after batch {last}; batches must be merged in increasing order")]
    OutOfOrderBatch { last: u64, got: u64 },

    /// The run was cancelled at a batch boundary.
    #[error("Run cancelled")]
    Cancelled,

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Shorthand for source failures.
    pub fn source_failure(locator: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::SourceUnavailable {
            locator: locator.into(),
            reason: reason.to_string(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(citations: &[&str]) -> Record {
        RecordDraft {
            external_id: ExternalId::new("1"),
            payload: Payload::new(),
            citations: citations
                .iter()
                .map(|c| Citation::unresolved(ExternalId::new(*c)))
                .collect(),
            dirty: true,
            batch_seq: 1,
        }
        .into_record(InternalId(0))
    }

    #[test]
    fn citation_targets_ignore_order() {
        let a = record(&["A", "B"]);
        let b = record(&["B", "A"]);
        assert_eq!(a.citation_targets(), b.citation_targets());
    }

    #[test]
    fn cites_unresolved_only_counts_open_citations() {
        let mut rec = record(&["A", "B"]);
        rec.citations[0].resolved = Some(InternalId(7));

        assert!(!rec.cites_unresolved(&ExternalId::new("A")));
        assert!(rec.cites_unresolved(&ExternalId::new("B")));
        assert_eq!(rec.resolved_count(), 1);
    }

    #[test]
    fn draft_round_trip_keeps_content() {
        let rec = record(&["A"]);
        let again = rec.clone().into_draft().into_record(rec.internal_id);
        assert_eq!(rec, again);
    }

    #[test]
    fn payload_builder_appends_values() {
        let payload = Payload::new()
            .with("author", "Curie M")
            .with("author", "Curie P")
            .with("title", "Radioactive substances");

        assert_eq!(payload.get("author").len(), 2);
        assert_eq!(payload.first("title"), Some("Radioactive substances"));
        assert!(payload.get("missing").is_empty());
        assert_eq!(payload.field_count(), 2);
    }
}
