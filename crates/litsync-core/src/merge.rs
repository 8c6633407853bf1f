//! # Merge Engine
//!
//! Applies one batch of raw records to the store.
//!
//! Per record the engine decides between insert, update and no-op:
//! - unknown external id: insert, dirty, stamped with the batch
//! - known external id, same citation target *set*: no-op
//! - known external id, different set: payload and citations replaced,
//!   every citation unresolved again, dirty, stamped with the batch
//!
//! Payload changes that leave the citation set untouched are a no-op as well;
//! the citation set is the only change signal.
//!
//! Re-merging an applied batch is a no-op: it never creates duplicates and
//! never flips `dirty` on unchanged records.

use crate::ingestor::{Ingestor, ValidRecord};
use crate::store::RecordStore;
use crate::{ExternalId, RawItem, RecordDraft, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// REFERENCE POLICY
// =============================================================================

/// What happens to records citing a target that arrives after them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferencePolicy {
    /// Resolution clears `dirty` for good; a citation whose target was absent
    /// stays unresolved until the citing record itself changes.
    FireAndForget,
    /// Inserting a record re-dirties every record holding an unresolved
    /// citation to it, so the next resolution pass backfills the link.
    #[default]
    ReverseIndex,
}

impl fmt::Display for ReferencePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FireAndForget => "fire-and-forget",
            Self::ReverseIndex => "reverse-index",
        })
    }
}

impl FromStr for ReferencePolicy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fire-and-forget" => Ok(Self::FireAndForget),
            "reverse-index" => Ok(Self::ReverseIndex),
            other => Err(SyncError::Config(format!(
                "unknown reference policy '{other}' (expected fire-and-forget or reverse-index)"
            ))),
        }
    }
}

// =============================================================================
// MERGE STATISTICS
// =============================================================================

/// Outcome of merging one or more batches.
#[derive(Debug, Default)]
pub struct MergeStats {
    /// Records seen for the first time.
    pub inserted: usize,
    /// Known records whose citation set changed.
    pub updated: usize,
    /// Known records republished with the same citation set.
    pub unchanged: usize,
    /// Existing records re-marked dirty because a record they cite arrived.
    pub redirtied: usize,
    /// Records skipped as malformed. Always `SyncError::MalformedRecord`.
    pub rejected: Vec<SyncError>,
    /// Invalid citation targets dropped from otherwise valid records.
    pub dropped_citations: usize,
}

impl MergeStats {
    /// Number of records skipped.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.rejected.len()
    }

    /// Number of upserts performed for batch records (excludes re-dirtying).
    #[must_use]
    pub fn upserts(&self) -> usize {
        self.inserted + self.updated
    }

    /// Fold another batch's statistics into this one.
    pub fn absorb(&mut self, other: MergeStats) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.redirtied += other.redirtied;
        self.rejected.extend(other.rejected);
        self.dropped_citations += other.dropped_citations;
    }
}

enum Outcome {
    Inserted { redirtied: usize },
    Updated,
    Unchanged,
}

// =============================================================================
// MERGE ENGINE
// =============================================================================

/// Merges batches into a store, in increasing batch order.
#[derive(Debug, Clone, Default)]
pub struct MergeEngine {
    policy: ReferencePolicy,
    last_batch: Option<u64>,
}

impl MergeEngine {
    #[must_use]
    pub fn new(policy: ReferencePolicy) -> Self {
        Self {
            policy,
            last_batch: None,
        }
    }

    /// Merge one batch.
    ///
    /// Malformed records are skipped and reported in `MergeStats::rejected`;
    /// the rest of the batch is still applied. Store failures abort the
    /// batch after the current record: everything upserted before it stays
    /// committed.
    ///
    /// A batch below the last merged one fails with `OutOfOrderBatch`
    /// without touching the store. Merging the same batch again is allowed.
    pub fn merge<S, I>(
        &mut self,
        store: &mut S,
        batch_seq: u64,
        items: I,
    ) -> Result<MergeStats, SyncError>
    where
        S: RecordStore + ?Sized,
        I: IntoIterator,
        I::Item: Into<RawItem>,
    {
        if let Some(last) = self.last_batch.filter(|&last| batch_seq < last) {
            return Err(SyncError::OutOfOrderBatch {
                last,
                got: batch_seq,
            });
        }
        self.last_batch = Some(batch_seq);

        let mut stats = MergeStats::default();
        for (position, item) in items.into_iter().enumerate() {
            let valid = match item.into() {
                RawItem::Defect(defect) => {
                    Self::reject(
                        &mut stats,
                        SyncError::MalformedRecord {
                            batch_seq,
                            position: defect.position,
                            external_id: defect.external_id,
                            reason: defect.reason,
                        },
                    );
                    continue;
                }
                RawItem::Parsed(raw) => match Ingestor::validate(&raw) {
                    Ok(valid) => {
                        for reason in &valid.dropped_citations {
                            tracing::warn!(
                                batch_seq,
                                external_id = %valid.external_id,
                                reason = %reason,
                                "dropping invalid citation"
                            );
                        }
                        stats.dropped_citations += valid.dropped_citations.len();
                        valid
                    }
                    Err(reason) => {
                        Self::reject(
                            &mut stats,
                            SyncError::MalformedRecord {
                                batch_seq,
                                position,
                                external_id: Some(raw.external_id),
                                reason,
                            },
                        );
                        continue;
                    }
                },
            };

            match self.merge_record(store, batch_seq, valid)? {
                Outcome::Inserted { redirtied } => {
                    stats.inserted += 1;
                    stats.redirtied += redirtied;
                }
                Outcome::Updated => stats.updated += 1,
                Outcome::Unchanged => stats.unchanged += 1,
            }
        }

        tracing::info!(
            batch_seq,
            inserted = stats.inserted,
            updated = stats.updated,
            unchanged = stats.unchanged,
            redirtied = stats.redirtied,
            skipped = stats.skipped(),
            "merged batch"
        );
        Ok(stats)
    }

    fn reject(stats: &mut MergeStats, error: SyncError) {
        tracing::warn!(error = %error, "skipping malformed record");
        stats.rejected.push(error);
    }

    fn merge_record<S: RecordStore + ?Sized>(
        &self,
        store: &mut S,
        batch_seq: u64,
        valid: ValidRecord,
    ) -> Result<Outcome, SyncError> {
        let existing = store.find_by_external_id(&valid.external_id)?;

        let unchanged = existing
            .as_ref()
            .is_some_and(|record| record.citation_targets() == valid.target_set());
        if unchanged {
            tracing::debug!(external_id = %valid.external_id, "unchanged");
            return Ok(Outcome::Unchanged);
        }

        // Citers are re-dirtied before the target is stored. Should the store
        // fail in between, re-merging the batch still sees the target as new.
        let redirtied = match (&existing, self.policy) {
            (None, ReferencePolicy::ReverseIndex) => {
                Self::redirty_citers(store, &valid.external_id)?
            }
            _ => 0,
        };

        let citations = valid.unresolved_citations();
        let stored = store.upsert(RecordDraft {
            external_id: valid.external_id,
            payload: valid.payload,
            citations,
            dirty: true,
            batch_seq,
        })?;

        if existing.is_some() {
            tracing::debug!(external_id = %stored.external_id, internal_id = %stored.internal_id, "updated");
            return Ok(Outcome::Updated);
        }

        tracing::debug!(external_id = %stored.external_id, internal_id = %stored.internal_id, "inserted");
        Ok(Outcome::Inserted { redirtied })
    }

    /// Mark every clean record holding an unresolved citation to `target`
    /// as dirty. `batch_seq` of those records is left untouched.
    fn redirty_citers<S: RecordStore + ?Sized>(
        store: &mut S,
        target: &ExternalId,
    ) -> Result<usize, SyncError> {
        let mut count = 0;
        for citer_id in store.citing(target)? {
            let Some(citer) = store.find_by_internal_id(citer_id)? else {
                continue;
            };
            if citer.dirty || !citer.cites_unresolved(target) {
                continue;
            }
            tracing::debug!(citer = %citer.external_id, target = %target, "re-dirtied");
            let mut draft = citer.into_draft();
            draft.dirty = true;
            store.upsert(draft)?;
            count += 1;
        }
        Ok(count)
    }
}

// =============================================================================
// TESTS
// =============================================================================
