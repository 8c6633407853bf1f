//! # Engine Primitives
//!
//! Hardcoded limits and constants for the litsync engine.
//!
//! These values are compiled into the binary and are immutable at runtime.

/// Watermark reported for an empty store.
///
/// Batch sequence numbers start at 1, so every published batch is above it.
pub const EMPTY_WATERMARK: u64 = 0;

/// Maximum length of an external identifier.
///
/// PMIDs are at most 8 digits today; the limit leaves room for DOIs and
/// other corpus identifiers while rejecting garbage.
pub const MAX_EXTERNAL_ID_LENGTH: usize = 256;

/// Maximum number of citations on a single record.
///
/// Records above this are rejected as malformed.
pub const MAX_CITATIONS_PER_RECORD: usize = 20_000;

/// Maximum number of payload fields on a single record.
pub const MAX_PAYLOAD_FIELDS: usize = 512;

/// Maximum total size of all payload values of a single record (4 MB).
pub const MAX_PAYLOAD_BYTES: usize = 4 * 1024 * 1024;

/// Maximum decompressed size of one batch file (2 GB).
///
/// Guards against decompression bombs in downloaded archives.
pub const MAX_BATCH_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Records fetched per page when walking a scan.
///
/// Bounds memory during resolution passes and exports of large stores.
pub const SCAN_PAGE_SIZE: usize = 1024;

/// Metadata key holding the next internal id to allocate.
pub const NEXT_INTERNAL_ID_KEY: &str = "next_internal_id";
