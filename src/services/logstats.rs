//! Periodic pool statistics emission
//!
//! Logs the pool summary line and refreshes the collaborator's gauges at a
//! configurable interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::info;

use crate::registry::ProxyRegistry;
use crate::stats::{self, StatsSink};

/// Stats logger configuration
#[derive(Debug, Clone)]
pub struct LogStatsConfig {
    /// How often to report; zero disables the logger
    pub interval: Duration,
}

impl Default for LogStatsConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
        }
    }
}

/// Periodic pool statistics reporter
pub struct LogStatsService {
    registry: Arc<ProxyRegistry>,
    sink: Arc<dyn StatsSink>,
    config: LogStatsConfig,
}

impl LogStatsService {
    pub fn new(
        registry: Arc<ProxyRegistry>,
        sink: Arc<dyn StatsSink>,
        config: LogStatsConfig,
    ) -> Self {
        Self {
            registry,
            sink,
            config,
        }
    }

    /// Run the reporter (call in a spawned task); a zero interval disables it.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if self.config.interval.is_zero() {
            return;
        }

        // First report on startup, then one per interval.
        self.emit();

        let mut ticker = interval(self.config.interval);
        ticker.tick().await; // Skip immediate tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.emit();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("stats logger shutting down");
                        break;
                    }
                }
            }
        }
    }

    fn emit(&self) {
        let snapshot = self.registry.stats();
        info!("{}", snapshot);
        stats::publish(&snapshot, self.sink.as_ref());
    }
}
