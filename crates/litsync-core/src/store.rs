//! # Record Store
//!
//! The document store contract used by the engine, plus the in-memory
//! implementation.
//!
//! This module defines the `RecordStore` trait. All in-memory structures use
//! `BTreeMap` for deterministic ordering.

use crate::primitives::{EMPTY_WATERMARK, SCAN_PAGE_SIZE};
use crate::{ExternalId, InternalId, Record, RecordDraft, SyncError};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// SCAN FILTER
// =============================================================================

/// Predicate for `RecordStore::scan_page`.
///
/// Kept as a closed set of filters so persistent stores can answer each one
/// from an index instead of a full table walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFilter {
    /// Every record.
    All,
    /// Records whose citations await resolution.
    Dirty,
}

impl RecordFilter {
    /// Evaluate the filter against a record.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::All => true,
            Self::Dirty => record.dirty,
        }
    }
}

/// First internal id a page starting after `after` may contain, or `None`
/// once the id space is exhausted.
pub(crate) fn page_start(after: Option<InternalId>) -> Option<u64> {
    match after {
        None => Some(0),
        Some(id) => id.0.checked_add(1),
    }
}

// =============================================================================
// RECORDSTORE TRAIT
// =============================================================================

/// The RecordStore trait defines the store operations the engine needs.
///
/// Every mutation goes through `upsert`, which must be atomic per document.
/// No cross-record transactions are required.
pub trait RecordStore {
    /// Point lookup by corpus identifier.
    fn find_by_external_id(&self, id: &ExternalId) -> Result<Option<Record>, SyncError>;

    /// Point lookup by storage key.
    fn find_by_internal_id(&self, id: InternalId) -> Result<Option<Record>, SyncError>;

    /// Insert or replace a record, keyed on its external id.
    ///
    /// A known external id keeps its internal id; an unknown one gets a
    /// freshly allocated id. Returns the stored record.
    fn upsert(&mut self, draft: RecordDraft) -> Result<Record, SyncError>;

    /// Up to `limit` records matching the filter whose internal id is above
    /// `after`, in internal id order.
    ///
    /// Large result sets are walked page by page, passing the last id of one
    /// page as `after` for the next; an empty page ends the walk.
    fn scan_page(
        &self,
        filter: RecordFilter,
        after: Option<InternalId>,
        limit: usize,
    ) -> Result<Vec<Record>, SyncError>;

    /// All records matching the filter, in internal id order.
    fn scan(&self, filter: RecordFilter) -> Result<Vec<Record>, SyncError> {
        let mut out = Vec::new();
        let mut after = None;
        loop {
            let page = self.scan_page(filter, after, SCAN_PAGE_SIZE)?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.internal_id);
            out.extend(page);
        }
        Ok(out)
    }

    /// Highest `batch_seq` across all records, or `EMPTY_WATERMARK`.
    fn max_batch_seq(&self) -> Result<u64, SyncError>;

    /// Internal ids of records whose current citation list names `target`.
    fn citing(&self, target: &ExternalId) -> Result<Vec<InternalId>, SyncError>;

    /// Total number of records.
    fn len(&self) -> Result<usize, SyncError>;

    /// True if the store holds no record.
    fn is_empty(&self) -> Result<bool, SyncError> {
        Ok(self.len()? == 0)
    }

    /// Number of records awaiting resolution.
    fn dirty_count(&self) -> Result<usize, SyncError> {
        Ok(self.scan(RecordFilter::Dirty)?.len())
    }
}

// =============================================================================
// MEMORY STORE
// =============================================================================

/// Volatile record store.
///
/// Uses `BTreeMap` exclusively for deterministic ordering.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    /// Record storage: InternalId -> Record
    records: BTreeMap<InternalId, Record>,

    /// Reverse lookup: ExternalId -> InternalId
    external_index: BTreeMap<ExternalId, InternalId>,

    /// Citation target -> citing records
    cited_by: BTreeMap<ExternalId, BTreeSet<InternalId>>,

    /// Next available InternalId
    next_internal_id: u64,
}

impl MemoryStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn unindex_citations(&mut self, record: &Record) {
        for target in record.citation_targets() {
            if let Some(citers) = self.cited_by.get_mut(target) {
                citers.remove(&record.internal_id);
                if citers.is_empty() {
                    self.cited_by.remove(target);
                }
            }
        }
    }

    fn index_citations(&mut self, record: &Record) {
        for target in record.citation_targets() {
            self.cited_by
                .entry(target.clone())
                .or_default()
                .insert(record.internal_id);
        }
    }
}

impl RecordStore for MemoryStore {
    fn find_by_external_id(&self, id: &ExternalId) -> Result<Option<Record>, SyncError> {
        Ok(self
            .external_index
            .get(id)
            .and_then(|internal| self.records.get(internal))
            .cloned())
    }

    fn find_by_internal_id(&self, id: InternalId) -> Result<Option<Record>, SyncError> {
        Ok(self.records.get(&id).cloned())
    }

    fn upsert(&mut self, draft: RecordDraft) -> Result<Record, SyncError> {
        let internal_id = match self.external_index.get(&draft.external_id) {
            Some(&existing) => existing,
            None => {
                let id = InternalId(self.next_internal_id);
                self.next_internal_id = self.next_internal_id.saturating_add(1);
                self.external_index.insert(draft.external_id.clone(), id);
                id
            }
        };

        if let Some(previous) = self.records.remove(&internal_id) {
            self.unindex_citations(&previous);
        }

        let record = draft.into_record(internal_id);
        self.index_citations(&record);
        self.records.insert(internal_id, record.clone());
        Ok(record)
    }

    fn scan_page(
        &self,
        filter: RecordFilter,
        after: Option<InternalId>,
        limit: usize,
    ) -> Result<Vec<Record>, SyncError> {
        let Some(start) = page_start(after) else {
            return Ok(Vec::new());
        };
        Ok(self
            .records
            .range(InternalId(start)..)
            .map(|(_, record)| record)
            .filter(|r| filter.matches(r))
            .take(limit)
            .cloned()
            .collect())
    }

    fn max_batch_seq(&self) -> Result<u64, SyncError> {
        Ok(self
            .records
            .values()
            .map(|r| r.batch_seq)
            .max()
            .unwrap_or(EMPTY_WATERMARK))
    }

    fn citing(&self, target: &ExternalId) -> Result<Vec<InternalId>, SyncError> {
        Ok(self
            .cited_by
            .get(target)
            .map(|citers| citers.iter().copied().collect())
            .unwrap_or_default())
    }

    fn len(&self) -> Result<usize, SyncError> {
        Ok(self.records.len())
    }
}

// =============================================================================
// TESTS
// =============================================================================
