//! ATLAS BiPRO Sync Daemon
//!
//! Polls every configured carrier's TransferService, downloads pending
//! shipments, persists their documents into the document archive and
//! acknowledges receipt.

mod config;
mod sync;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::sync::Syncd;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    info!("Starting ATLAS BiPRO sync daemon");

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    let syncd = Syncd::new(config)?;

    // Ctrl-C cancels cooperatively: in-flight downloads abort, partially
    // persisted shipments stay unacknowledged for the next run.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            signal_cancel.cancel();
        }
    });

    syncd.run(cancel).await
}
