//! # Watermark Resolver
//!
//! Derives the synchronization progress marker from durable state.
//!
//! The watermark is the highest `batch_seq` across all stored records. It is
//! never kept in a separate checkpoint: the records are the checkpoint. It is
//! always computed as an explicit aggregate (`RecordStore::max_batch_seq`),
//! never read off an arbitrary document.

use crate::store::RecordStore;
use crate::{BatchDescriptor, SyncError};
use std::collections::BTreeMap;

/// Highest batch sequence number reflected in the store.
///
/// Returns `EMPTY_WATERMARK` (0) for an empty store. Fails with
/// `StoreUnavailable` if the store cannot answer, before any batch is fetched.
pub fn resolve_watermark<S: RecordStore + ?Sized>(store: &S) -> Result<u64, SyncError> {
    let watermark = store.max_batch_seq()?;
    tracing::debug!(watermark, "resolved watermark");
    Ok(watermark)
}

/// Select the batches still to be applied.
///
/// Keeps only batches strictly above `watermark` and returns them in
/// ascending sequence order. Two listed batches sharing a sequence number
/// make the listing ambiguous and fail with `SourceUnavailable`.
pub fn pending_batches(
    listing: Vec<BatchDescriptor>,
    watermark: u64,
) -> Result<Vec<BatchDescriptor>, SyncError> {
    let mut by_seq: BTreeMap<u64, BatchDescriptor> = BTreeMap::new();
    for batch in listing {
        if batch.seq <= watermark {
            continue;
        }
        if let Some(previous) = by_seq.get(&batch.seq) {
            return Err(SyncError::source_failure(
                batch.locator.clone(),
                format!(
                    "batch {} listed twice (also as {})",
                    batch.seq, previous.locator
                ),
            ));
        }
        by_seq.insert(batch.seq, batch);
    }
    Ok(by_seq.into_values().collect())
}
