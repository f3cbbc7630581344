//! Sync loop across all configured carriers

use anyhow::{Context, Result};
use atlas_bipro::archive::HttpArchive;
use atlas_bipro::auth::Authenticator;
use atlas_bipro::orchestrator::{Orchestrator, OrchestratorConfig};
use atlas_bipro::ratelimit::{RateLimiter, RateLimiterConfig};
use atlas_bipro::transfer::TransferClient;
use atlas_bipro::transport::ReqwestTransport;
use atlas_bipro::{SystemClock, TokenCache};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{load_roster, Config};

/// The sync daemon: one transfer client per carrier, one shared token
/// cache and archive, one orchestrator bounding global concurrency.
pub struct Syncd {
    config: Config,
    clients: Vec<Arc<TransferClient>>,
    orchestrator: Orchestrator,
    token_cache: Arc<TokenCache>,
}

impl Syncd {
    pub fn new(config: Config) -> Result<Self> {
        let roster = load_roster(config.carriers_file.as_ref())?;
        info!("Loaded {} carriers from roster", roster.len());

        let clock = Arc::new(SystemClock);
        let token_cache = Arc::new(TokenCache::new(clock.clone()));

        let mut clients = Vec::new();
        for entry in roster {
            let credentials = entry
                .auth
                .resolve()
                .with_context(|| format!("credentials for carrier {}", entry.carrier.name))?;
            // Certificate carriers pin their client identity on the
            // transport itself.
            let transport = Arc::new(ReqwestTransport::new(
                entry.carrier.timeouts.connect(),
                credentials.identity(),
            )?);
            let authenticator = Arc::new(Authenticator::new(
                transport.clone(),
                token_cache.clone(),
                clock.clone(),
            ));
            let limiter = Arc::new(RateLimiter::new(
                entry.carrier.name.clone(),
                RateLimiterConfig::default(),
            ));
            clients.push(Arc::new(TransferClient::new(
                entry.carrier,
                credentials,
                transport,
                authenticator,
                limiter,
            )));
        }

        let archive = Arc::new(HttpArchive::new(
            config.archive_url.clone(),
            reqwest::Client::new(),
        ));
        let orchestrator = Orchestrator::new(archive, OrchestratorConfig::default());

        Ok(Self {
            config,
            clients,
            orchestrator,
            token_cache,
        })
    }

    /// Run sync rounds until cancelled.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!("Starting sync loop over {} carriers", self.clients.len());

        loop {
            for client in &self.clients {
                if cancel.is_cancelled() {
                    info!("Sync loop cancelled");
                    return Ok(());
                }
                let carrier = client.carrier().name.clone();
                match self.orchestrator.sync_carrier(client.clone(), &cancel).await {
                    Ok(report) => {
                        if report.total > 0 {
                            info!(
                                carrier = %carrier,
                                total = report.total,
                                acknowledged = report.acknowledged.len(),
                                failed = report.failures.len(),
                                "carrier sync finished"
                            );
                        }
                        for failure in &report.failures {
                            warn!(
                                carrier = %carrier,
                                shipment = %failure.shipment_id,
                                kind = failure.error.kind(),
                                error = %failure.error,
                                "shipment failed"
                            );
                        }
                    }
                    Err(e) => {
                        error!(carrier = %carrier, error = %e, "carrier sync failed");
                    }
                }
                let limiter = client.limiter().snapshot();
                let tokens = self.token_cache.stats();
                info!(
                    carrier = %carrier,
                    rate_width = limiter.width,
                    tokens_issued = tokens.issued,
                    token_invalidations = tokens.invalidations,
                    "carrier diagnostics"
                );
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Sync loop cancelled");
                    return Ok(());
                }
                _ = sleep(Duration::from_secs(self.config.poll_interval_secs)) => {}
            }
        }
    }
}
