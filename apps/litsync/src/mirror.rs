//! # HTTP Source
//!
//! Batches published on a remote index (an HTML directory listing such as
//! the PubMed `updatefiles/` page). `HttpSource` is a `BatchSource`: the
//! synchronizer asks for one batch at a time, and each fetch downloads that
//! batch into the work directory, decodes it, and removes the file again.
//!
//! The synchronizer runs on a blocking thread; fetches drive the async
//! client through a handle to the application runtime.

use litsync_core::{
    BatchDescriptor, BatchSource, RawItem, SyncError, batch_seq_from_name, load_batch_file,
};
use regex::Regex;
use reqwest::{Client, Url};
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use tokio::runtime::Handle;

/// True if `source` names a remote index rather than a directory.
pub fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Batch file names linked from an index page, deduplicated, in page order.
///
/// Only `href`s whose last path segment ends in `.xml.gz` or `.jsonl.gz`
/// count; checksum companions (`.md5`) and navigation links are ignored.
pub fn extract_batch_links(html: &str) -> Vec<String> {
    static HREF: OnceLock<Result<Regex, String>> = OnceLock::new();
    let regex = HREF.get_or_init(|| {
        Regex::new(r#"(?i)href\s*=\s*["']([^"'?#]+\.(?:xml|jsonl)\.gz)["']"#)
            .map_err(|e| e.to_string())
    });
    let Ok(regex) = regex else {
        return Vec::new();
    };

    let mut seen = BTreeSet::new();
    regex
        .captures_iter(html)
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| m.as_str().rsplit('/').next())
        .filter(|name| !name.is_empty())
        .filter(|name| seen.insert(name.to_string()))
        .map(str::to_string)
        .collect()
}

/// Client for a remote batch index.
#[derive(Debug, Clone)]
pub struct HttpIndex {
    client: Client,
    index: Url,
}

impl HttpIndex {
    /// Mirror for the index page at `index_url`.
    pub fn new(index_url: &str, timeout: Duration) -> Result<Self, SyncError> {
        // A directory URL without the trailing slash would make relative
        // links resolve against its parent.
        let normalized = if index_url.ends_with('/') || index_url.ends_with(".html") {
            index_url.to_string()
        } else {
            format!("{index_url}/")
        };
        let index = Url::parse(&normalized)
            .map_err(|e| SyncError::Config(format!("invalid source URL '{index_url}': {e}")))?;

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("litsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self { client, index })
    }

    /// Every batch the index links to. The locator is the absolute URL.
    pub async fn list(&self) -> Result<Vec<BatchDescriptor>, SyncError> {
        let html = self
            .client
            .get(self.index.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SyncError::source_failure(self.index.as_str(), e))?
            .text()
            .await
            .map_err(|e| SyncError::source_failure(self.index.as_str(), e))?;

        let mut batches = Vec::new();
        for name in extract_batch_links(&html) {
            let Some(seq) = batch_seq_from_name(&name) else {
                tracing::debug!(name = %name, "ignoring link without batch number");
                continue;
            };
            let url = self
                .index
                .join(&name)
                .map_err(|e| SyncError::source_failure(self.index.as_str(), e))?;
            batches.push(BatchDescriptor::new(seq, url.to_string()));
        }

        tracing::info!(index = %self.index, batches = batches.len(), "listed remote batches");
        Ok(batches)
    }

    /// Download one batch into `work_dir` and return its path.
    ///
    /// The body is written under a `.part` name and renamed once complete;
    /// a failed write leaves nothing behind.
    async fn download(&self, batch: &BatchDescriptor, work_dir: &Path) -> Result<PathBuf, SyncError> {
        let name = batch
            .locator
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| SyncError::source_failure(&batch.locator, "URL has no file name"))?;
        let target = work_dir.join(name);
        let partial = work_dir.join(format!("{name}.part"));

        let bytes = self
            .client
            .get(&batch.locator)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SyncError::source_failure(&batch.locator, e))?
            .bytes()
            .await
            .map_err(|e| SyncError::source_failure(&batch.locator, e))?;

        let written = match tokio::fs::write(&partial, &bytes).await {
            Ok(()) => tokio::fs::rename(&partial, &target).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            remove_artifact(&partial);
            return Err(SyncError::source_failure(&batch.locator, e));
        }

        tracing::debug!(seq = batch.seq, bytes = bytes.len(), path = %target.display(), "downloaded batch");
        Ok(target)
    }
}

/// Delete a downloaded file; a file that is already gone is fine.
fn remove_artifact(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cannot remove downloaded batch");
        }
    }
}

// =============================================================================
// BATCH SOURCE
// =============================================================================

/// `BatchSource` over a remote index, downloading one batch per fetch.
#[derive(Debug)]
pub struct HttpSource {
    index: HttpIndex,
    work_dir: PathBuf,
    keep_artifacts: bool,
    runtime: Handle,
}

impl HttpSource {
    /// Source downloading into `work_dir`, which is created if missing.
    ///
    /// Must be used from a thread outside the runtime `runtime` belongs to,
    /// such as a `spawn_blocking` task.
    pub fn new(
        index: HttpIndex,
        work_dir: impl Into<PathBuf>,
        keep_artifacts: bool,
        runtime: Handle,
    ) -> Result<Self, SyncError> {
        let work_dir = work_dir.into();
        std::fs::create_dir_all(&work_dir).map_err(|e| {
            SyncError::Config(format!(
                "cannot create work dir {}: {}",
                work_dir.display(),
                e
            ))
        })?;
        Ok(Self {
            index,
            work_dir,
            keep_artifacts,
            runtime,
        })
    }
}

impl BatchSource for HttpSource {
    fn list_available_batches(&self) -> Result<Vec<BatchDescriptor>, SyncError> {
        self.runtime.block_on(self.index.list())
    }

    fn fetch_batch(&self, batch: &BatchDescriptor) -> Result<Vec<RawItem>, SyncError> {
        let path = self
            .runtime
            .block_on(self.index.download(batch, &self.work_dir))?;
        let items = load_batch_file(&path, &batch.locator);
        if !self.keep_artifacts {
            remove_artifact(&path);
        }

        let items = items?;
        tracing::info!(batch_seq = batch.seq, records = items.len(), url = %batch.locator, "fetched batch");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = r#"
        <html><body><pre>
        <a href="../">Parent Directory</a>
        <a href="pubmed24n1219.xml.gz">pubmed24n1219.xml.gz</a>
        <a href="pubmed24n1219.xml.gz.md5">pubmed24n1219.xml.gz.md5</a>
        <a href='pubmed24n1220.xml.gz'>pubmed24n1220.xml.gz</a>
        <a HREF="/pubmed/updatefiles/pubmed24n1221.xml.gz">abs</a>
        <a href="pubmed24n1219.xml.gz">again</a>
        <a href="README.txt">README.txt</a>
        </pre></body></html>
    "#;

    #[test]
    fn extracts_batch_links_only() {
        assert_eq!(
            extract_batch_links(INDEX),
            vec![
                "pubmed24n1219.xml.gz",
                "pubmed24n1220.xml.gz",
                "pubmed24n1221.xml.gz"
            ]
        );
    }

    #[test]
    fn extracted_names_carry_sequence_numbers() {
        let seqs: Vec<Option<u64>> = extract_batch_links(INDEX)
            .iter()
            .map(|n| batch_seq_from_name(n))
            .collect();
        assert_eq!(seqs, vec![Some(1219), Some(1220), Some(1221)]);
    }

    #[test]
    fn remote_detection() {
        assert!(is_remote("https://ftp.ncbi.nlm.nih.gov/pubmed/updatefiles/"));
        assert!(is_remote("http://mirror.local/batches"));
        assert!(!is_remote("/data/pubmed"));
        assert!(!is_remote("batches"));
    }

    #[test]
    fn index_url_gets_trailing_slash() {
        let index = HttpIndex::new("https://example.org/pubmed/updatefiles", Duration::from_secs(5))
            .expect("index");
        assert_eq!(
            index.index.join("pubmed24n0001.xml.gz").expect("join").as_str(),
            "https://example.org/pubmed/updatefiles/pubmed24n0001.xml.gz"
        );
    }

    #[test]
    fn invalid_url_is_a_config_error() {
        assert!(matches!(
            HttpIndex::new("::not a url", Duration::from_secs(5)),
            Err(SyncError::Config(_))
        ));
    }
}
