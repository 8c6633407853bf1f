//! # Reference Resolution
//!
//! Second pass of a run: turns citation targets (external ids) into
//! internal ids for every dirty record, then clears `dirty`.
//!
//! A citation whose target is not in the store stays unresolved. `dirty` is
//! cleared regardless; whether that citation is ever retried depends on the
//! `ReferencePolicy` the merge engine runs with.

use crate::primitives::SCAN_PAGE_SIZE;
use crate::store::{RecordFilter, RecordStore};
use crate::{Citation, ExternalId, InternalId, Record, SyncError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome of one resolution pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveStats {
    /// Dirty records processed (and cleared).
    pub records: usize,
    /// Citations that now point at an internal id.
    pub resolved: usize,
    /// Citations whose target is not in the store yet.
    pub unresolved: usize,
}

impl ResolveStats {
    pub fn absorb(&mut self, other: ResolveStats) {
        self.records += other.records;
        self.resolved += other.resolved;
        self.unresolved += other.unresolved;
    }
}

/// Resolves citations of dirty records against the current store contents.
pub struct ReferenceResolver;

impl ReferenceResolver {
    /// Run one resolution pass over all dirty records.
    ///
    /// Citations that are already resolved are re-checked against the store;
    /// a link to a missing record, or to a record carrying another external
    /// id, fails the pass with `ResolutionInconsistency`. Records processed
    /// before the failure stay committed.
    pub fn resolve_references<S: RecordStore + ?Sized>(
        store: &mut S,
    ) -> Result<ResolveStats, SyncError> {
        Self::resolve_in_pages(store, SCAN_PAGE_SIZE)
    }

    /// Dirty records are read `page_size` at a time; each page is written
    /// back before the next is read.
    fn resolve_in_pages<S: RecordStore + ?Sized>(
        store: &mut S,
        page_size: usize,
    ) -> Result<ResolveStats, SyncError> {
        let mut stats = ResolveStats::default();

        // Target lookups within one pass; the pass inserts no records, so a
        // miss stays a miss.
        let mut targets: BTreeMap<ExternalId, Option<InternalId>> = BTreeMap::new();

        let mut after = None;
        loop {
            let page = store.scan_page(RecordFilter::Dirty, after, page_size)?;
            let Some(last) = page.last().map(|r| r.internal_id) else {
                break;
            };
            after = Some(last);

            for record in page {
                Self::resolve_record(store, record, &mut targets, &mut stats)?;
            }
        }

        tracing::info!(
            records = stats.records,
            resolved = stats.resolved,
            unresolved = stats.unresolved,
            "resolution pass complete"
        );
        Ok(stats)
    }

    fn resolve_record<S: RecordStore + ?Sized>(
        store: &mut S,
        mut record: Record,
        targets: &mut BTreeMap<ExternalId, Option<InternalId>>,
        stats: &mut ResolveStats,
    ) -> Result<(), SyncError> {
        for citation in &mut record.citations {
            let resolved = match citation.resolved {
                Some(id) => {
                    Self::verify(store, &record.external_id, citation, id)?;
                    Some(id)
                }
                None => match targets.get(&citation.target) {
                    Some(known) => *known,
                    None => {
                        let found = Self::lookup(store, &record.external_id, &citation.target)?;
                        targets.insert(citation.target.clone(), found);
                        found
                    }
                },
            };
            citation.resolved = resolved;
            if resolved.is_some() {
                stats.resolved += 1;
            } else {
                stats.unresolved += 1;
            }
        }

        record.dirty = false;
        tracing::debug!(
            external_id = %record.external_id,
            resolved = record.resolved_count(),
            citations = record.citations.len(),
            "resolved record"
        );
        Self::persist(store, record)?;
        stats.records += 1;
        Ok(())
    }

    fn persist<S: RecordStore + ?Sized>(store: &mut S, record: Record) -> Result<(), SyncError> {
        store.upsert(record.into_draft()).map(|_| ())
    }

    fn lookup<S: RecordStore + ?Sized>(
        store: &S,
        citing: &ExternalId,
        target: &ExternalId,
    ) -> Result<Option<InternalId>, SyncError> {
        match store.find_by_external_id(target)? {
            Some(found) if &found.external_id != target => {
                Err(SyncError::ResolutionInconsistency {
                    citing: citing.clone(),
                    target: target.clone(),
                    details: format!(
                        "lookup returned record {} with external id {}",
                        found.internal_id, found.external_id
                    ),
                })
            }
            Some(found) => Ok(Some(found.internal_id)),
            None => Ok(None),
        }
    }

    fn verify<S: RecordStore + ?Sized>(
        store: &S,
        citing: &ExternalId,
        citation: &Citation,
        id: InternalId,
    ) -> Result<(), SyncError> {
        let inconsistency = |details: String| SyncError::ResolutionInconsistency {
            citing: citing.clone(),
            target: citation.target.clone(),
            details,
        };
        match store.find_by_internal_id(id)? {
            None => Err(inconsistency(format!("linked record {id} does not exist"))),
            Some(target) if target.external_id != citation.target => Err(inconsistency(format!(
                "linked record {id} carries external id {}",
                target.external_id
            ))),
            Some(_) => Ok(()),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
