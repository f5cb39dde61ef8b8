// src/utils/signal.rs
//! Shutdown signal for the driver

use std::future::Future;
use std::io;
use tracing::{error, info};

/// Resolve on Ctrl-C
///
/// If the handler cannot be installed the error is logged and the future
/// never resolves, so the run is left to finish on its own.
pub async fn shutdown_signal() {
    settle(tokio::signal::ctrl_c()).await
}

async fn settle<F>(signal: F)
where
    F: Future<Output = io::Result<()>>,
{
    match signal.await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => {
            error!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await
        }
    }
}
