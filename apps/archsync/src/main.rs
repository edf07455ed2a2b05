//! # archsync
//!
//! Command-line entry point for the architecture version & constraint
//! reconciliation engine.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   apps/archsync (THE BINARY)                 │
//! │                                                              │
//! │  ┌─────────────┐   ┌──────────────┐   ┌──────────────────┐   │
//! │  │    CLI      │   │ HttpBackend  │   │   Dev server     │   │
//! │  │   (clap)    │──▶│  (reqwest)   │──▶│     (axum)       │   │
//! │  └──────┬──────┘   └──────────────┘   └────────┬─────────┘   │
//! │         │                                      │             │
//! │         ▼                                      ▼             │
//! │  ┌──────────────────┐                ┌──────────────────┐    │
//! │  │ EnvironmentStore │                │ InMemoryBackend  │    │
//! │  └──────────────────┘                └──────────────────┘    │
//! │              archsync-core (THE ENGINE)                      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the development version store
//! archsync serve --port 8080 --seed fixtures.json
//!
//! # Work against it
//! archsync -a arch-1 -e dev show
//! archsync -a arch-1 -e dev apply -f constraints.json
//! archsync -a arch-1 diff -s dev -t prod
//! ```

use archsync::cli::{Cli, execute};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // ARCHSYNC_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("ARCHSYNC_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let default_filter = if cli.verbose {
        "archsync=debug,archsync_core=debug,tower_http=debug"
    } else {
        "archsync=info,archsync_core=info,tower_http=debug"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    // Logs go to stderr so `--json-mode` output on stdout stays parseable.
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if let Err(e) = execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
