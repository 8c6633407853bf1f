//! # redb-backed Record Storage
//!
//! A disk-backed record store using the redb embedded database.
//!
//! redb provides:
//! - ACID transactions
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//!
//! Every `upsert` is exactly one write transaction covering the document and
//! all of its index entries, so a crash never leaves an index pointing at a
//! half-written record.
//!
//! ## Indexes
//!
//! | table            | key                      | purpose                         |
//! |------------------|--------------------------|---------------------------------|
//! | `records`        | internal id              | postcard-encoded `Record`       |
//! | `external_index` | external id              | natural key -> internal id      |
//! | `dirty_index`    | internal id              | work queue for resolution       |
//! | `batch_index`    | (batch_seq, internal id) | watermark as an ordered max     |
//! | `cited_by`       | (target, internal id)    | reverse citation lookup         |

use crate::primitives::{EMPTY_WATERMARK, NEXT_INTERNAL_ID_KEY};
use crate::store::{RecordFilter, RecordStore, page_start};
use crate::{ExternalId, InternalId, Record, RecordDraft, SyncError};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::Path;

/// Table for records: InternalId(u64) -> serialized Record bytes
const RECORDS: TableDefinition<u64, &[u8]> = TableDefinition::new("records");

/// Table for the natural key: ExternalId -> InternalId(u64)
const EXTERNAL_INDEX: TableDefinition<&str, u64> = TableDefinition::new("external_index");

/// Table for dirty records: InternalId(u64) -> ()
const DIRTY_INDEX: TableDefinition<u64, ()> = TableDefinition::new("dirty_index");

/// Table for batch ordering: (batch_seq, InternalId) -> ()
const BATCH_INDEX: TableDefinition<(u64, u64), ()> = TableDefinition::new("batch_index");

/// Table for reverse citations: (target ExternalId, citing InternalId) -> ()
const CITED_BY: TableDefinition<(&str, u64), ()> = TableDefinition::new("cited_by");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

fn store_err(e: impl std::fmt::Display) -> SyncError {
    SyncError::StoreUnavailable(e.to_string())
}

fn decode(bytes: &[u8]) -> Result<Record, SyncError> {
    postcard::from_bytes(bytes).map_err(|e| SyncError::SerializationError(e.to_string()))
}

/// A disk-backed record store using redb.
pub struct RedbStore {
    /// The redb database handle.
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

impl RedbStore {
    /// Open or create a record database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let db = Database::create(path.as_ref()).map_err(store_err)?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(store_err)?;
            let _ = write_txn.open_table(RECORDS).map_err(store_err)?;
            let _ = write_txn.open_table(EXTERNAL_INDEX).map_err(store_err)?;
            let _ = write_txn.open_table(DIRTY_INDEX).map_err(store_err)?;
            let _ = write_txn.open_table(BATCH_INDEX).map_err(store_err)?;
            let _ = write_txn.open_table(CITED_BY).map_err(store_err)?;
            let _ = write_txn.open_table(METADATA).map_err(store_err)?;
            write_txn.commit().map_err(store_err)?;
        }

        Ok(Self { db })
    }

    /// Fetch records by internal id inside one read transaction.
    fn load_many(&self, ids: &[u64]) -> Result<Vec<Record>, SyncError> {
        let read_txn = self.db.begin_read().map_err(store_err)?;
        let table = read_txn.open_table(RECORDS).map_err(store_err)?;

        let mut out = Vec::with_capacity(ids.len());
        for &id in ids {
            // Index entries without a record would mean a torn write; redb
            // transactions rule that out, so a miss is a store fault.
            let data = table
                .get(id)
                .map_err(store_err)?
                .ok_or_else(|| store_err(format!("index references missing record #{id}")))?;
            out.push(decode(data.value())?);
        }
        Ok(out)
    }

    /// Internal id counter (for status output).
    pub fn next_internal_id(&self) -> Result<u64, SyncError> {
        let read_txn = self.db.begin_read().map_err(store_err)?;
        let meta = read_txn.open_table(METADATA).map_err(store_err)?;
        Ok(meta
            .get(NEXT_INTERNAL_ID_KEY)
            .map_err(store_err)?
            .map(|v| v.value())
            .unwrap_or(0))
    }
}

// =============================================================================
// RECORDSTORE TRAIT IMPLEMENTATION
// =============================================================================

impl RecordStore for RedbStore {
    fn find_by_external_id(&self, id: &ExternalId) -> Result<Option<Record>, SyncError> {
        let read_txn = self.db.begin_read().map_err(store_err)?;
        let index = read_txn.open_table(EXTERNAL_INDEX).map_err(store_err)?;
        let Some(internal) = index
            .get(id.as_str())
            .map_err(store_err)?
            .map(|v| v.value())
        else {
            return Ok(None);
        };

        let records = read_txn.open_table(RECORDS).map_err(store_err)?;
        match records.get(internal).map_err(store_err)? {
            Some(data) => Ok(Some(decode(data.value())?)),
            None => Ok(None),
        }
    }

    fn find_by_internal_id(&self, id: InternalId) -> Result<Option<Record>, SyncError> {
        let read_txn = self.db.begin_read().map_err(store_err)?;
        let records = read_txn.open_table(RECORDS).map_err(store_err)?;
        match records.get(id.0).map_err(store_err)? {
            Some(data) => Ok(Some(decode(data.value())?)),
            None => Ok(None),
        }
    }

    fn upsert(&mut self, draft: RecordDraft) -> Result<Record, SyncError> {
        let write_txn = self.db.begin_write().map_err(store_err)?;

        let stored = {
            let mut records = write_txn.open_table(RECORDS).map_err(store_err)?;
            let mut external = write_txn.open_table(EXTERNAL_INDEX).map_err(store_err)?;
            let mut dirty = write_txn.open_table(DIRTY_INDEX).map_err(store_err)?;
            let mut batches = write_txn.open_table(BATCH_INDEX).map_err(store_err)?;
            let mut cited_by = write_txn.open_table(CITED_BY).map_err(store_err)?;
            let mut meta = write_txn.open_table(METADATA).map_err(store_err)?;

            let existing = external
                .get(draft.external_id.as_str())
                .map_err(store_err)?
                .map(|v| v.value());

            let internal_id = match existing {
                Some(id) => InternalId(id),
                None => {
                    let next = meta
                        .get(NEXT_INTERNAL_ID_KEY)
                        .map_err(store_err)?
                        .map(|v| v.value())
                        .unwrap_or(0);
                    meta.insert(NEXT_INTERNAL_ID_KEY, next.saturating_add(1))
                        .map_err(store_err)?;
                    external
                        .insert(draft.external_id.as_str(), next)
                        .map_err(store_err)?;
                    InternalId(next)
                }
            };

            // Drop the previous version's index entries.
            let previous = match records.get(internal_id.0).map_err(store_err)? {
                Some(data) => Some(decode(data.value())?),
                None => None,
            };
            if let Some(prev) = previous {
                dirty.remove(prev.internal_id.0).map_err(store_err)?;
                batches
                    .remove((prev.batch_seq, prev.internal_id.0))
                    .map_err(store_err)?;
                for target in prev.citation_targets() {
                    cited_by
                        .remove((target.as_str(), prev.internal_id.0))
                        .map_err(store_err)?;
                }
            }

            let record = draft.into_record(internal_id);
            let bytes = postcard::to_allocvec(&record)
                .map_err(|e| SyncError::SerializationError(e.to_string()))?;

            records
                .insert(internal_id.0, bytes.as_slice())
                .map_err(store_err)?;
            if record.dirty {
                dirty.insert(internal_id.0, ()).map_err(store_err)?;
            }
            batches
                .insert((record.batch_seq, internal_id.0), ())
                .map_err(store_err)?;
            for target in record.citation_targets() {
                cited_by
                    .insert((target.as_str(), internal_id.0), ())
                    .map_err(store_err)?;
            }

            record
        };

        write_txn.commit().map_err(store_err)?;
        Ok(stored)
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
        match filter {
            RecordFilter::All => {
                let read_txn = self.db.begin_read().map_err(store_err)?;
                let table = read_txn.open_table(RECORDS).map_err(store_err)?;
                let mut out = Vec::new();
                for entry in table.range(start..).map_err(store_err)?.take(limit) {
                    let (_, value) = entry.map_err(store_err)?;
                    out.push(decode(value.value())?);
                }
                Ok(out)
            }
            RecordFilter::Dirty => {
                let ids = {
                    let read_txn = self.db.begin_read().map_err(store_err)?;
                    let table = read_txn.open_table(DIRTY_INDEX).map_err(store_err)?;
                    let mut ids = Vec::new();
                    for entry in table.range(start..).map_err(store_err)?.take(limit) {
                        let (key, _) = entry.map_err(store_err)?;
                        ids.push(key.value());
                    }
                    ids
                };
                self.load_many(&ids)
            }
        }
    }

    fn max_batch_seq(&self) -> Result<u64, SyncError> {
        let read_txn = self.db.begin_read().map_err(store_err)?;
        let table = read_txn.open_table(BATCH_INDEX).map_err(store_err)?;
        Ok(table
            .last()
            .map_err(store_err)?
            .map(|(key, _)| key.value().0)
            .unwrap_or(EMPTY_WATERMARK))
    }

    fn citing(&self, target: &ExternalId) -> Result<Vec<InternalId>, SyncError> {
        let read_txn = self.db.begin_read().map_err(store_err)?;
        let table = read_txn.open_table(CITED_BY).map_err(store_err)?;

        let mut citers = Vec::new();
        for entry in table
            .range((target.as_str(), 0u64)..=(target.as_str(), u64::MAX))
            .map_err(store_err)?
        {
            let (key, _) = entry.map_err(store_err)?;
            citers.push(InternalId(key.value().1));
        }
        Ok(citers)
    }

    fn len(&self) -> Result<usize, SyncError> {
        let read_txn = self.db.begin_read().map_err(store_err)?;
        let table = read_txn.open_table(RECORDS).map_err(store_err)?;
        Ok(table.len().map_err(store_err)? as usize)
    }

    fn dirty_count(&self) -> Result<usize, SyncError> {
        let read_txn = self.db.begin_read().map_err(store_err)?;
        let table = read_txn.open_table(DIRTY_INDEX).map_err(store_err)?;
        Ok(table.len().map_err(store_err)? as usize)
    }
}

// =============================================================================
// TESTS
// =============================================================================
