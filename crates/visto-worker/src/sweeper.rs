// Periodic timeout sweeper
//
// Scans in-progress instances across all organizations and applies timeout
// transitions for approval nodes whose deadline has passed. Each pass is
// idempotent: the gateway's compare-and-set makes a lost race a no-op, so
// running several sweepers at once is safe.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use visto_core::ApprovalGateway;

const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 300;

/// Sweeper configuration loaded from the environment
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub interval: Duration,
}

impl SweeperConfig {
    pub fn from_env() -> Self {
        let seconds = std::env::var("SWEEP_INTERVAL_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECONDS);
        Self {
            interval: Duration::from_secs(seconds),
        }
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECONDS),
        }
    }
}

/// Periodic sweeper with graceful shutdown
pub struct Sweeper {
    gateway: Arc<ApprovalGateway>,
    config: SweeperConfig,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Sweeper {
    pub fn new(gateway: Arc<ApprovalGateway>, config: SweeperConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            gateway,
            config,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Handle used to stop the run loop from another task
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    /// One sweep pass; returns the number of instances transitioned
    pub async fn run_once(&self) -> visto_core::Result<usize> {
        self.gateway.sweep(Utc::now()).await
    }

    /// Run sweep passes until a shutdown signal arrives. A failed pass is
    /// logged and retried on the next tick.
    pub async fn run(mut self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(0) => tracing::debug!("sweep pass complete, nothing due"),
                        Ok(swept) => tracing::info!(swept, "sweep pass complete"),
                        Err(e) => tracing::error!(error = %e, "sweep pass failed"),
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        tracing::info!("sweeper shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}
