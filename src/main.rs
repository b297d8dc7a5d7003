//! GPSS server - sharing backend for uploaded Pokemon records and bundles.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use url::Url;

use gpss_server::{process, Config};

/// GPSS server - content-addressed record sharing with download codes
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on for HTTP requests
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// Path to SQLite database file (in-memory when omitted)
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Base URL of the record parsing/legality oracle
    #[arg(long, default_value = "http://localhost:9911")]
    oracle: Url,

    /// Response cache budget in bytes (a third of system memory when omitted)
    #[arg(long)]
    cache_budget: Option<u64>,

    /// Hours between integrity reconciliation sweeps
    #[arg(long, default_value = "24")]
    reconcile_interval_hours: u64,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut config = Config::default();
    config.listen_addr = Some(args.listen);
    config.sqlite_path = args.database;
    config.oracle_url = args.oracle;
    config.cache.memory_budget = args.cache_budget;
    config.reconciler.interval = Duration::from_secs(args.reconcile_interval_hours * 60 * 60);
    config.log_level = args.log_level.parse().unwrap_or(tracing::Level::INFO);

    process::spawn_service(&config).await;
}
