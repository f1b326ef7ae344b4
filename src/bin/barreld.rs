//! `barreld` - a standalone server exposing a `Barrel` store over the line protocol.

use std::path::PathBuf;
use std::time::Duration;

use barrel::net::Server;
use barrel::{Barrel, Options};
use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Mirrors `options::DEFAULT_FILE_SIZE_LIMIT`; kept as a literal here since clap's
/// `default_value_t` needs a `const`-evaluable expression at the call site.
const DEFAULT_FILE_SIZE_LIMIT: u64 = 1024 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(name = "barreld", about = "An embedded Bitcask-model key-value store, served over TCP")]
struct Args {
    /// Directory backing the store.
    #[arg(long, default_value = "./data")]
    dir: PathBuf,

    /// Address to bind the line-protocol listener to.
    #[arg(long, default_value = "127.0.0.1:7878")]
    bind: String,

    /// Byte threshold at which the active file is rotated.
    #[arg(long, default_value_t = DEFAULT_FILE_SIZE_LIMIT)]
    file_size_limit: u64,

    /// Call `sync` after every successful write.
    #[arg(long)]
    auto_sync: bool,

    /// Cadence, in seconds, of background compaction. Zero disables it.
    #[arg(long, default_value_t = 180)]
    compact_interval_secs: u64,

    /// Enable verbose logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<(), barrel::Error> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let opts = Options::new(&args.dir)
        .debug(args.debug)
        .auto_sync(args.auto_sync)
        .file_size_limit(args.file_size_limit)
        .compact_interval(if args.compact_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(args.compact_interval_secs))
        });

    let store = Barrel::open(opts)?;
    let listener = TcpListener::bind(&args.bind).await?;
    tracing::info!(addr = %args.bind, dir = ?args.dir, "barreld listening");

    let shutdown_store = store.clone();
    let server = Server::new(listener, store.clone(), async {
        shutdown_signal().await;
    });

    server.run().await;

    shutdown_store.shutdown()?;
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm.recv() => {},
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
