//! Dead-proxy reanimation sweep
//!
//! Periodically moves dead proxies whose backoff has elapsed back into the
//! eligible pool.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info};

use crate::registry::ProxyRegistry;

/// Reanimation sweep configuration
#[derive(Debug, Clone)]
pub struct ReanimatorConfig {
    /// How often to re-check dead proxies
    pub interval: Duration,
}

impl Default for ReanimatorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
        }
    }
}

/// Periodic reanimation sweep over the registry
pub struct ReanimatorService {
    registry: Arc<ProxyRegistry>,
    config: ReanimatorConfig,
}

impl ReanimatorService {
    pub fn new(registry: Arc<ProxyRegistry>, config: ReanimatorConfig) -> Self {
        Self { registry, config }
    }

    /// Run the sweep (call in a spawned task); a zero interval disables it.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if self.config.interval.is_zero() {
            return;
        }
        info!(
            "starting reanimator with {}s interval",
            self.config.interval.as_secs()
        );

        let mut ticker = interval(self.config.interval);
        ticker.tick().await; // Skip immediate tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let moved = self.registry.reanimate();
                    if moved > 0 {
                        debug!(count = moved, "proxies moved from 'dead' to 'reanimated'");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("reanimator shutting down");
                        break;
                    }
                }
            }
        }
    }
}
