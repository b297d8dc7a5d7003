mod utils;

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::timeout;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::http_server;
use crate::oracle::HttpOracle;
use crate::reconciler::Reconciler;
use crate::{Config, ServiceState};

const FINAL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

pub async fn spawn_service(config: &Config) {
    let (non_blocking_writer, _guard) = tracing_appender::non_blocking(std::io::stdout());
    let env_filter = EnvFilter::builder()
        .with_default_directive(config.log_level.into())
        .from_env_lossy();

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(non_blocking_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry().with(stdout_layer).init();

    utils::register_panic_logger();

    let (graceful_waiter, shutdown_rx) = utils::graceful_shutdown_blocker();

    let oracle = Arc::new(HttpOracle::new(config.oracle_url.clone()));
    let state = match ServiceState::from_config(config, oracle).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("error creating server state: {}", e);
            std::process::exit(3);
        }
    };

    let mut handles = Vec::new();

    let listen_addr = config
        .listen_addr
        .unwrap_or_else(|| SocketAddr::from_str("0.0.0.0:8080").unwrap());

    let http_config = http_server::Config::new(listen_addr);
    let http_state = state.clone();
    let http_rx = shutdown_rx.clone();
    let http_handle = tokio::spawn(async move {
        tracing::info!("Starting API server on {}", listen_addr);
        if let Err(e) = http_server::run(http_config, http_state, http_rx).await {
            tracing::error!("API server error: {}", e);
        }
    });
    handles.push(http_handle);

    let reconciler = Reconciler::new(
        state.database().clone(),
        state.oracle().clone(),
        config.reconciler.clone(),
    );
    let reconciler_rx = shutdown_rx.clone();
    let reconciler_handle = tokio::spawn(async move {
        tracing::info!("Starting integrity reconciler");
        reconciler.run(reconciler_rx).await;
    });
    handles.push(reconciler_handle);

    let _ = graceful_waiter.await;

    if timeout(FINAL_SHUTDOWN_TIMEOUT, join_all(handles))
        .await
        .is_err()
    {
        tracing::error!(
            "Failed to shut down within {} seconds",
            FINAL_SHUTDOWN_TIMEOUT.as_secs()
        );
        std::process::exit(4);
    }
}
