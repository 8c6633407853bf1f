//! # litsync
//!
//! Incremental synchronizer for batch-published citation corpora.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  apps/litsync (THE BINARY)               │
//! │                                                          │
//! │  ┌─────────────┐   ┌─────────────┐   ┌───────────────┐   │
//! │  │    CLI      │   │ HTTP mirror │   │ incident log  │   │
//! │  │   (clap)    │   │  (reqwest)  │   │ (JSON lines)  │   │
//! │  └──────┬──────┘   └──────┬──────┘   └───────┬───────┘   │
//! │         └─────────────────┼──────────────────┘           │
//! │                           ▼                              │
//! │                   ┌───────────────┐                      │
//! │                   │ litsync-core  │                      │
//! │                   │ (THE ENGINE)  │                      │
//! │                   └───────────────┘                      │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! litsync init
//! litsync sync --source https://ftp.ncbi.nlm.nih.gov/pubmed/updatefiles/
//! litsync status --json
//! litsync show --id 31452104
//! ```

use clap::Parser;
use litsync::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    // LITSYNC_LOG_FORMAT=json enables machine-parseable output. Logs go to
    // stderr so `--json` command output stays clean on stdout.
    let log_format = std::env::var("LITSYNC_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if cli.verbose {
        "litsync=debug,litsync_core=debug"
    } else {
        "litsync=info,litsync_core=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the startup banner.
fn print_banner() {
    println!("litsync v{}", env!("CARGO_PKG_VERSION"));
    println!();
}
