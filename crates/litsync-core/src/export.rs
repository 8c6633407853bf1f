//! # Export Module
//!
//! Dumps the store as JSON lines, one `Record` per line in internal id
//! order. The output is deterministic for a given store state, so its digest
//! can be compared across machines.
//!
//! With the `crypto-hash` feature the export also yields a BLAKE3 digest of
//! the bytes written.

use crate::primitives::SCAN_PAGE_SIZE;
use crate::store::{RecordFilter, RecordStore};
use crate::SyncError;
use std::io::{self, Write};

/// What an export wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub records: usize,
    pub bytes: u64,
    /// BLAKE3 hex digest of the output (`crypto-hash` feature only).
    pub checksum: Option<String>,
}

/// Counts (and with `crypto-hash`, hashes) everything passed through.
struct DigestWriter<W> {
    inner: W,
    bytes: u64,
    #[cfg(feature = "crypto-hash")]
    hasher: blake3::Hasher,
}

impl<W: Write> DigestWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            bytes: 0,
            #[cfg(feature = "crypto-hash")]
            hasher: blake3::Hasher::new(),
        }
    }

    fn checksum(&self) -> Option<String> {
        #[cfg(feature = "crypto-hash")]
        {
            Some(self.hasher.finalize().to_hex().to_string())
        }
        #[cfg(not(feature = "crypto-hash"))]
        {
            None
        }
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.bytes += n as u64;
        #[cfg(feature = "crypto-hash")]
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Write every record as one JSON line.
///
/// The store is read one page at a time, so memory stays bounded by the
/// page size rather than the store size.
pub fn export_jsonl<S, W>(store: &S, writer: W) -> Result<ExportSummary, SyncError>
where
    S: RecordStore + ?Sized,
    W: Write,
{
    let mut out = DigestWriter::new(writer);
    let mut records = 0usize;
    let mut after = None;

    loop {
        let page = store.scan_page(RecordFilter::All, after, SCAN_PAGE_SIZE)?;
        let Some(last) = page.last().map(|r| r.internal_id) else {
            break;
        };
        after = Some(last);

        for record in &page {
            serde_json::to_writer(&mut out, record)
                .map_err(|e| SyncError::SerializationError(e.to_string()))?;
            out.write_all(b"\n")
                .map_err(|e| SyncError::SerializationError(e.to_string()))?;
        }
        records += page.len();
    }
    out.flush()
        .map_err(|e| SyncError::SerializationError(e.to_string()))?;

    tracing::info!(records, bytes = out.bytes, "exported store");
    Ok(ExportSummary {
        records,
        bytes: out.bytes,
        checksum: out.checksum(),
    })
}

/// BLAKE3 hex digest of raw bytes.
///
/// # Requires
///
/// This function is only available with the `crypto-hash` feature enabled.
#[cfg(feature = "crypto-hash")]
#[must_use]
pub fn compute_blake3_hash(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}
