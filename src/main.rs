//! collector: fetch a source periodically and keep every distinct version.
//!
//! ## Architecture overview
//!
//! ```text
//! ┌──────────┐  cycle   ┌──────────┐  bytes   ┌──────────┐
//! │ poll.rs  │ ───────► │  fetch/  │ ───────► │  store/  │
//! │(schedule)│ ◄─────── │(protocol)│          │ (dedup)  │
//! └──────────┘  errors  └──────────┘          └──────────┘
//!      ▲                      ▲
//!      │ CancellationToken    │ RequestId / X-Request-Id
//! ┌──────────┐          ┌────────────┐
//! │ main.rs  │          │ request.rs │
//! └──────────┘          └────────────┘
//! ```
//!
//! * **`fetch/`**: the `Fetcher` trait, request options, and the
//!   scheme-to-fetcher registry (HTTP/HTTPS and `file://`).
//! * **`request`**: per-attempt identity and cancellation.
//! * **`store/`**: fingerprints payloads and writes only new ones.
//! * **`poll`**: the once/recurring scheduler with jitter.
//! * **`config`**: the validated, immutable run configuration.
//! * **`main`**: parses flags, sets up logging and Ctrl-C, runs the scheduler.
//!
//! Run one collector per (source, storage directory) pair.  Two processes
//! writing the same source into the same directory are not coordinated.

mod config;
mod error;
mod fetch;
mod poll;
mod request;
mod store;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::{parse_duration, CollectorConfig};
use fetch::FetcherRegistry;
use poll::Scheduler;

/// Fetch a source, store it when it changed, and repeat.
///
/// Existing files in the storage directory are never overwritten.
#[derive(Parser, Debug)]
#[command(name = "collector", version, about)]
struct Args {
    /// Fetch the source once, write to storage if changed, and exit.
    /// Otherwise keep running and fetch every interval.
    #[arg(long)]
    once: bool,

    /// Refresh the source every interval (with jitter). Ignored with --once.
    #[arg(long, default_value = "5m", value_parser = parse_duration)]
    interval: Duration,

    /// Shift each interval by a random amount up to +/- this duration,
    /// e.g. 5m (interval) +/- 23s (jitter).
    #[arg(long, default_value = "23s", value_parser = parse_duration)]
    jitter: Duration,

    /// Fetch this source, prefixed with protocol://.
    /// Supported: http://, https://, file://
    #[arg(long)]
    source: String,

    /// Store results in this directory. Created if missing; a temporary
    /// directory is used when omitted.
    #[arg(long)]
    storage: Option<PathBuf>,

    /// Application name, used in the user agent and request ids.
    #[arg(long)]
    appname: Option<String>,

    /// Give up on a single fetch after this long.
    #[arg(long, value_parser = parse_duration)]
    timeout: Option<Duration>,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, default_value = "info")]
    log_level: String,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&args.log_level);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("collector failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    // -- configuration -------------------------------------------------------
    let registry = FetcherRegistry::with_defaults().context("creating HTTP client")?;
    let mut builder = CollectorConfig::builder()
        .once(args.once)
        .interval(args.interval)
        .jitter(args.jitter)
        .source(args.source)
        .fetch_timeout(args.timeout);
    if let Some(root) = args.storage {
        builder = builder.storage_root(root);
    }
    if let Some(name) = args.appname {
        builder = builder.app_name(name);
    }
    let config = builder.build(&registry).context("invalid configuration")?;

    // -- shutdown ------------------------------------------------------------
    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
                shutdown.cancel();
            }
        }
    });

    // -- run -----------------------------------------------------------------
    let mut scheduler = Scheduler::new(config, registry);
    scheduler.run(&shutdown).await?;
    Ok(())
}

/// Log to stderr; `RUST_LOG` overrides `--log-level`.
fn init_tracing(level: &str) {
    let default_filter = format!("{}={level},warn", env!("CARGO_CRATE_NAME"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
