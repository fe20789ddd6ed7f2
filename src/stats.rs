//! Observability output.
//!
//! The dispatcher and the stats logger push pool gauges through whatever
//! metrics sink the surrounding crawler provides.

use tracing::debug;

use crate::registry::PoolStats;

/// Gauge keys used for pool observability
pub const UNCHECKED: &str = "proxies/unchecked";
pub const GOOD: &str = "proxies/good";
pub const DEAD: &str = "proxies/dead";
pub const REANIMATED: &str = "proxies/reanimated";
pub const MEAN_BACKOFF: &str = "proxies/mean_backoff";

/// Metrics sink provided by the collaborator.
pub trait StatsSink: Send + Sync {
    fn set_gauge(&self, key: &'static str, value: f64);
}

/// Default sink: emits gauges as tracing events.
#[derive(Debug, Default)]
pub struct TracingStatsSink;

impl StatsSink for TracingStatsSink {
    fn set_gauge(&self, key: &'static str, value: f64) {
        debug!(key, value, "stat");
    }
}

/// Sink that drops everything.
#[derive(Debug, Default)]
pub struct NullStatsSink;

impl StatsSink for NullStatsSink {
    fn set_gauge(&self, _key: &'static str, _value: f64) {}
}

/// Push the full set of pool gauges to a sink.
pub fn publish(stats: &PoolStats, sink: &dyn StatsSink) {
    sink.set_gauge(UNCHECKED, stats.unchecked as f64);
    sink.set_gauge(GOOD, stats.good as f64);
    sink.set_gauge(DEAD, stats.dead as f64);
    sink.set_gauge(REANIMATED, stats.reanimated as f64);
    sink.set_gauge(MEAN_BACKOFF, stats.mean_backoff_secs);
}
