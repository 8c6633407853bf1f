//! Sync against a remote index served from a local HTTP listener.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use flate2::Compression;
use flate2::write::GzEncoder;
use litsync::cli::cmd_sync;
use litsync::config::{Settings, SyncConfig};
use litsync_core::{
    ExternalId, RecordStore, RedbStore, ReferencePolicy, SyncError, resolve_watermark,
};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

// =============================================================================
// FIXTURES
// =============================================================================

type Requests = Arc<Mutex<Vec<String>>>;

/// Serve `routes` (path -> body) over HTTP/1.1; anything else is a 404.
///
/// Returns the index URL and the log of requested paths.
async fn serve(routes: BTreeMap<String, Vec<u8>>) -> (String, Requests) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let routes = Arc::new(routes);
    let requests: Requests = Arc::default();

    let log = Arc::clone(&requests);
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let routes = Arc::clone(&routes);
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut buf).await.unwrap_or(0);
                    if n == 0 {
                        return;
                    }
                    head.extend_from_slice(&buf[..n]);
                }
                let head = String::from_utf8_lossy(&head);
                let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
                log.lock().unwrap().push(path.clone());

                let response = match routes.get(&path) {
                    Some(body) => {
                        let mut out = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                            body.len()
                        )
                        .into_bytes();
                        out.extend_from_slice(body);
                        out
                    }
                    None => b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                        .to_vec(),
                };
                let _ = socket.write_all(&response).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (format!("http://{addr}/updatefiles/"), requests)
}

fn gzip(lines: &[&str]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(lines.join("\n").as_bytes()).unwrap();
    encoder.finish().unwrap()
}

fn index_page(names: &[&str]) -> Vec<u8> {
    let links: String = names
        .iter()
        .map(|n| format!("<a href=\"{n}\">{n}</a>\n"))
        .collect();
    format!("<html><body><pre>\n<a href=\"../\">Parent</a>\n{links}</pre></body></html>").into_bytes()
}

fn settings(dir: &TempDir, url: &str, keep_artifacts: bool) -> Settings {
    SyncConfig {
        database: Some(dir.path().join("records.redb")),
        source: Some(url.to_string()),
        work_dir: Some(dir.path().join("work")),
        policy: Some(ReferencePolicy::ReverseIndex),
        keep_artifacts: Some(keep_artifacts),
        incident_log: Some(dir.path().join("incidents.jsonl")),
        ..SyncConfig::default()
    }
    .resolve()
    .unwrap()
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

const FIRST: &str = "updates-n0001.jsonl.gz";
const SECOND: &str = "updates-n0002.jsonl.gz";

// =============================================================================
// TESTS
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_download_keeps_batches_merged_before_it() {
    let routes = BTreeMap::from([
        ("/updatefiles/".to_string(), index_page(&[FIRST, SECOND])),
        (
            format!("/updatefiles/{FIRST}"),
            gzip(&[r#"{"external_id": "1", "citations": ["2"]}"#]),
        ),
    ]);
    let (url, _) = serve(routes).await;
    let dir = TempDir::new().unwrap();
    let settings = settings(&dir, &url, false);

    let result = cmd_sync(&settings, None, true).await;
    assert!(matches!(result, Err(SyncError::SourceUnavailable { .. })));

    // Batch 1 was merged before batch 2 was requested.
    let store = RedbStore::open(&settings.database).unwrap();
    assert_eq!(resolve_watermark(&store).unwrap(), 1);
    assert!(
        store
            .find_by_external_id(&ExternalId::new("1"))
            .unwrap()
            .is_some()
    );
    drop(store);

    assert!(files_in(&settings.work_dir).is_empty());
    let incidents = std::fs::read_to_string(dir.path().join("incidents.jsonl")).unwrap();
    assert!(incidents.contains(SECOND));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn only_pending_batches_are_downloaded() {
    let routes = BTreeMap::from([
        ("/updatefiles/".to_string(), index_page(&[FIRST, SECOND])),
        (
            format!("/updatefiles/{FIRST}"),
            gzip(&[r#"{"external_id": "1", "citations": ["2"]}"#]),
        ),
        (
            format!("/updatefiles/{SECOND}"),
            gzip(&[r#"{"external_id": "2", "citations": []}"#]),
        ),
    ]);
    let (url, requests) = serve(routes).await;
    let dir = TempDir::new().unwrap();
    let settings = settings(&dir, &url, true);

    cmd_sync(&settings, None, true).await.unwrap();

    let store = RedbStore::open(&settings.database).unwrap();
    assert_eq!(resolve_watermark(&store).unwrap(), 2);
    let two = store
        .find_by_external_id(&ExternalId::new("2"))
        .unwrap()
        .unwrap();
    let one = store
        .find_by_external_id(&ExternalId::new("1"))
        .unwrap()
        .unwrap();
    assert_eq!(one.citations[0].resolved, Some(two.internal_id));
    drop(store);

    // Kept artifacts are complete files, never `.part` leftovers.
    assert_eq!(files_in(&settings.work_dir), vec![FIRST, SECOND]);

    requests.lock().unwrap().clear();
    cmd_sync(&settings, None, true).await.unwrap();
    assert_eq!(*requests.lock().unwrap(), vec!["/updatefiles/".to_string()]);
}
