//! # Batch Sources
//!
//! Where batches come from. A `BatchSource` lists the published batches and
//! materializes one of them into raw items; filtering against the watermark
//! and ordering happen in the synchronizer.
//!
//! ## File naming
//!
//! A batch file's sequence number is the digit run after the last `n` before
//! the first `.` of its name: `pubmed24n1219.xml.gz` is batch 1219.
//!
//! ## Formats
//!
//! | suffix       | parser                         |
//! |--------------|--------------------------------|
//! | `.xml`       | PubMed `PubmedArticleSet`      |
//! | `.xml.gz`    | same, gzip-compressed          |
//! | `.jsonl`     | one JSON record per line       |
//! | `.jsonl.gz`  | same, gzip-compressed          |

mod jsonl;
mod pubmed_xml;

pub use jsonl::parse_jsonl;
pub use pubmed_xml::parse_pubmed_xml;

use crate::primitives::MAX_BATCH_BYTES;
use crate::{BatchDescriptor, RawItem, SyncError};
use flate2::read::GzDecoder;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

// =============================================================================
// BATCH SOURCE TRAIT
// =============================================================================

/// Enumerates and materializes published batches.
pub trait BatchSource {
    /// Every batch the source currently publishes, in any order.
    fn list_available_batches(&self) -> Result<Vec<BatchDescriptor>, SyncError>;

    /// Materialize one batch.
    ///
    /// Per-record parse failures come back as `RawItem::Defect`; only a batch
    /// that cannot be read at all is an error (`SourceUnavailable`).
    fn fetch_batch(&self, batch: &BatchDescriptor) -> Result<Vec<RawItem>, SyncError>;
}

// =============================================================================
// FILE NAMES AND FORMATS
// =============================================================================

/// Sequence number encoded in a batch file name, if any.
pub fn batch_seq_from_name(name: &str) -> Option<u64> {
    static BATCH_NAME: OnceLock<Result<Regex, String>> = OnceLock::new();
    let regex = BATCH_NAME.get_or_init(|| {
        Regex::new(r"^[^.]*n(\d+)\.").map_err(|err| err.to_string())
    });
    let regex = match regex {
        Ok(re) => re,
        Err(msg) => {
            tracing::error!(error = %msg, "batch name regex init failed");
            return None;
        }
    };

    regex
        .captures(name)
        .and_then(|caps| caps.get(1))
        .and_then(|digits| digits.as_str().parse().ok())
}

/// On-disk encoding of a batch file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchFormat {
    PubmedXml,
    JsonLines,
}

impl BatchFormat {
    /// Format and compression of a file, from its name.
    pub fn detect(name: &str) -> Option<(Self, bool)> {
        [
            (".xml.gz", Self::PubmedXml, true),
            (".xml", Self::PubmedXml, false),
            (".jsonl.gz", Self::JsonLines, true),
            (".jsonl", Self::JsonLines, false),
        ]
        .into_iter()
        .find(|(suffix, _, _)| name.ends_with(suffix))
        .map(|(_, format, gz)| (format, gz))
    }

    /// Parse a decoded batch.
    pub fn parse(self, text: &str) -> Result<Vec<RawItem>, String> {
        match self {
            Self::PubmedXml => parse_pubmed_xml(text),
            Self::JsonLines => Ok(parse_jsonl(text)),
        }
    }
}

/// Read a batch file into memory, decompressing if needed, capped at
/// `MAX_BATCH_BYTES`.
fn read_batch_file(path: &Path, compressed: bool) -> Result<String, SyncError> {
    let locator = path.display().to_string();
    let file = File::open(path).map_err(|e| SyncError::source_failure(&locator, e))?;

    let reader: Box<dyn Read> = if compressed {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    let mut bytes = Vec::new();
    reader
        .take(MAX_BATCH_BYTES.saturating_add(1))
        .read_to_end(&mut bytes)
        .map_err(|e| SyncError::source_failure(&locator, e))?;
    if bytes.len() as u64 > MAX_BATCH_BYTES {
        return Err(SyncError::source_failure(
            &locator,
            format!("batch exceeds {MAX_BATCH_BYTES} bytes once decoded"),
        ));
    }

    String::from_utf8(bytes)
        .map_err(|e| SyncError::source_failure(&locator, format!("not UTF-8: {e}")))
}

/// Decode and parse one batch file, picking the format from its name.
///
/// Errors name the batch by `locator`, which need not be the path: a
/// downloaded copy reports the URL it came from.
pub fn load_batch_file(path: &Path, locator: &str) -> Result<Vec<RawItem>, SyncError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (format, compressed) = BatchFormat::detect(&name)
        .ok_or_else(|| SyncError::source_failure(locator, "unrecognized batch file format"))?;

    let text = read_batch_file(path, compressed)?;
    format
        .parse(&text)
        .map_err(|reason| SyncError::source_failure(locator, reason))
}

// =============================================================================
// DIRECTORY SOURCE
// =============================================================================

/// Batch files in a local directory (not recursive).
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl BatchSource for DirectorySource {
    fn list_available_batches(&self) -> Result<Vec<BatchDescriptor>, SyncError> {
        let locator = self.dir.display().to_string();
        let entries =
            std::fs::read_dir(&self.dir).map_err(|e| SyncError::source_failure(&locator, e))?;

        let mut batches = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SyncError::source_failure(&locator, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match (batch_seq_from_name(&name), BatchFormat::detect(&name)) {
                (Some(seq), Some(_)) => {
                    batches.push(BatchDescriptor::new(seq, path.display().to_string()));
                }
                _ => tracing::warn!(file = %name, "ignoring file without batch name or format"),
            }
        }

        tracing::debug!(dir = %locator, count = batches.len(), "listed batches");
        Ok(batches)
    }

    fn fetch_batch(&self, batch: &BatchDescriptor) -> Result<Vec<RawItem>, SyncError> {
        let items = load_batch_file(Path::new(&batch.locator), &batch.locator)?;
        tracing::info!(batch_seq = batch.seq, records = items.len(), file = %batch.locator, "fetched batch");
        Ok(items)
    }
}

// =============================================================================
// MEMORY SOURCE
// =============================================================================

/// In-memory batches, keyed by sequence number.
///
/// Records every fetch so callers can check which batches a run touched.
#[derive(Debug, Default)]
pub struct MemorySource {
    batches: BTreeMap<u64, Vec<RawItem>>,
    unavailable: Option<u64>,
    fetched: Mutex<Vec<u64>>,
}

impl MemorySource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style batch registration.
    #[must_use]
    pub fn with_batch<I>(mut self, seq: u64, items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<RawItem>,
    {
        self.batches
            .insert(seq, items.into_iter().map(Into::into).collect());
        self
    }

    /// Make fetching `seq` fail with `SourceUnavailable`.
    #[must_use]
    pub fn failing_at(mut self, seq: u64) -> Self {
        self.unavailable = Some(seq);
        self
    }

    /// Sequence numbers fetched so far, in fetch order.
    #[must_use]
    pub fn fetched(&self) -> Vec<u64> {
        match self.fetched.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl BatchSource for MemorySource {
    fn list_available_batches(&self) -> Result<Vec<BatchDescriptor>, SyncError> {
        Ok(self
            .batches
            .keys()
            .map(|&seq| BatchDescriptor::new(seq, format!("memory:{seq}")))
            .collect())
    }

    fn fetch_batch(&self, batch: &BatchDescriptor) -> Result<Vec<RawItem>, SyncError> {
        match self.fetched.lock() {
            Ok(mut guard) => guard.push(batch.seq),
            Err(poisoned) => poisoned.into_inner().push(batch.seq),
        }
        if self.unavailable == Some(batch.seq) {
            return Err(SyncError::source_failure(&batch.locator, "connection reset"));
        }
        self.batches
            .get(&batch.seq)
            .cloned()
            .ok_or_else(|| SyncError::source_failure(&batch.locator, "no such batch"))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RawRecord;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn batch_seq_follows_last_n_before_first_dot() {
        assert_eq!(batch_seq_from_name("pubmed24n1219.xml.gz"), Some(1219));
        assert_eq!(batch_seq_from_name("pubmed24n0001.xml"), Some(1));
        assert_eq!(batch_seq_from_name("batch_n7.jsonl"), Some(7));
        assert_eq!(batch_seq_from_name("README.md"), None);
        assert_eq!(batch_seq_from_name("pubmed24n.xml"), None);
        assert_eq!(batch_seq_from_name("pubmed24n12.xml.gz.md5"), Some(12));
    }

    #[test]
    fn format_detection() {
        assert_eq!(
            BatchFormat::detect("pubmed24n0001.xml.gz"),
            Some((BatchFormat::PubmedXml, true))
        );
        assert_eq!(
            BatchFormat::detect("b_n1.jsonl"),
            Some((BatchFormat::JsonLines, false))
        );
        assert_eq!(BatchFormat::detect("pubmed24n12.xml.gz.md5"), None);
    }

    #[test]
    fn directory_source_lists_and_fetches() {
        let dir = tempdir().expect("temp dir");
        std::fs::write(
            dir.path().join("batch_n2.jsonl"),
            "{\"external_id\": \"A\", \"citations\": [\"B\"]}\n",
        )
        .expect("write");

        let gz = File::create(dir.path().join("batch_n3.jsonl.gz")).expect("create");
        let mut encoder = GzEncoder::new(gz, Compression::default());
        encoder
            .write_all(b"{\"external_id\": \"B\"}\n")
            .expect("compress");
        encoder.finish().expect("finish");

        std::fs::write(dir.path().join("notes.txt"), "ignore me").expect("write");
        std::fs::write(dir.path().join("pubmed24n0003.xml.gz.md5"), "abc").expect("write");

        let source = DirectorySource::new(dir.path());
        let mut listing = source.list_available_batches().expect("list");
        listing.sort();
        let seqs: Vec<u64> = listing.iter().map(|b| b.seq).collect();
        assert_eq!(seqs, vec![2, 3]);

        let items = source.fetch_batch(&listing[1]).expect("fetch");
        assert_eq!(items, vec![RawItem::Parsed(RawRecord::new("B"))]);
    }

    #[test]
    fn unreadable_batch_is_source_unavailable() {
        let dir = tempdir().expect("temp dir");
        std::fs::write(dir.path().join("pubmed24n0005.xml"), "<PubmedArticleSet><Pub").expect("write");

        let source = DirectorySource::new(dir.path());
        let listing = source.list_available_batches().expect("list");
        let err = source.fetch_batch(&listing[0]).expect_err("broken xml");
        assert!(matches!(err, SyncError::SourceUnavailable { .. }));
    }

    #[test]
    fn missing_directory_is_source_unavailable() {
        let dir = tempdir().expect("temp dir");
        let source = DirectorySource::new(dir.path().join("nope"));
        assert!(matches!(
            source.list_available_batches(),
            Err(SyncError::SourceUnavailable { .. })
        ));
    }

    #[test]
    fn memory_source_records_fetches() {
        let source = MemorySource::new()
            .with_batch(1, vec![RawRecord::new("A")])
            .with_batch(2, vec![RawRecord::new("B")])
            .failing_at(2);

        let listing = source.list_available_batches().expect("list");
        assert_eq!(listing.len(), 2);
        source.fetch_batch(&listing[0]).expect("fetch");
        assert!(source.fetch_batch(&listing[1]).is_err());
        assert_eq!(source.fetched(), vec![1, 2]);
    }
}
