//! # Ingestor Module
//!
//! Raw record validation and normalization.
//!
//! - Validate raw records before they reach the store
//! - Reject malformed input with a reason
//! - Drop unusable citation targets without losing the record
//! - Normalize identifiers (trim) and collapse duplicate citation targets
//! - No semantic inference or enrichment of the payload

use crate::primitives::{
    MAX_CITATIONS_PER_RECORD, MAX_EXTERNAL_ID_LENGTH, MAX_PAYLOAD_BYTES, MAX_PAYLOAD_FIELDS,
};
use crate::{Citation, ExternalId, RawRecord};
use std::collections::BTreeSet;

/// A raw record that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidRecord {
    pub external_id: ExternalId,
    pub payload: crate::Payload,
    /// Citation targets in publication order, first occurrence kept.
    pub citation_targets: Vec<ExternalId>,
    /// Reasons for citation targets that were dropped as invalid.
    pub dropped_citations: Vec<String>,
}

impl ValidRecord {
    /// The citation targets as an unordered set.
    #[must_use]
    pub fn target_set(&self) -> BTreeSet<&ExternalId> {
        self.citation_targets.iter().collect()
    }

    /// Fresh, unresolved citation list.
    #[must_use]
    pub fn unresolved_citations(&self) -> Vec<Citation> {
        self.citation_targets
            .iter()
            .cloned()
            .map(Citation::unresolved)
            .collect()
    }
}

/// The Ingestor handles raw record validation.
pub struct Ingestor;

impl Ingestor {
    /// Validate an identifier string.
    fn check_id(id: &str, what: &str) -> Result<(), String> {
        if id.is_empty() {
            return Err(format!("{what} is empty"));
        }
        if id.len() > MAX_EXTERNAL_ID_LENGTH {
            return Err(format!(
                "{what} is {} bytes, limit is {MAX_EXTERNAL_ID_LENGTH}",
                id.len()
            ));
        }
        if id.chars().any(char::is_whitespace) {
            return Err(format!("{what} '{id}' contains whitespace"));
        }
        Ok(())
    }

    /// Validate and normalize a raw record.
    ///
    /// A record is valid if:
    /// - The external id is present, within length limits and has no
    ///   inner whitespace (surrounding whitespace is trimmed)
    /// - Citation targets breaking the same rules are dropped, with a
    ///   reason in `dropped_citations`; the record itself stays valid
    /// - Citation count and payload size are within limits
    ///
    /// Returns the reason as `Err` if validation fails.
    pub fn validate(raw: &RawRecord) -> Result<ValidRecord, String> {
        let external_id = raw.external_id.trim();
        Self::check_id(external_id, "external id")?;

        if raw.citation_target_ids.len() > MAX_CITATIONS_PER_RECORD {
            return Err(format!(
                "{} citations, limit is {MAX_CITATIONS_PER_RECORD}",
                raw.citation_target_ids.len()
            ));
        }

        if raw.payload.field_count() > MAX_PAYLOAD_FIELDS {
            return Err(format!(
                "{} payload fields, limit is {MAX_PAYLOAD_FIELDS}",
                raw.payload.field_count()
            ));
        }

        let payload_bytes: usize = raw
            .payload
            .0
            .iter()
            .map(|(k, vs)| k.len() + vs.iter().map(String::len).sum::<usize>())
            .sum();
        if payload_bytes > MAX_PAYLOAD_BYTES {
            return Err(format!(
                "payload is {payload_bytes} bytes, limit is {MAX_PAYLOAD_BYTES}"
            ));
        }

        let mut seen = BTreeSet::new();
        let mut citation_targets = Vec::with_capacity(raw.citation_target_ids.len());
        let mut dropped_citations = Vec::new();
        for (position, target) in raw.citation_target_ids.iter().enumerate() {
            let target = target.trim();
            if let Err(reason) = Self::check_id(target, "citation target") {
                dropped_citations.push(format!("citation #{position}: {reason}"));
                continue;
            }
            if seen.insert(target) {
                citation_targets.push(ExternalId::new(target));
            }
        }

        Ok(ValidRecord {
            external_id: ExternalId::new(external_id),
            payload: raw.payload.clone(),
            citation_targets,
            dropped_citations,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
