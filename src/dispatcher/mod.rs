//! Request dispatch: proxy assignment, outcome handling, retry scheduling.
//!
//! The surrounding fetch engine calls [`RotatingProxyDispatcher::assign`]
//! before sending a request and [`RotatingProxyDispatcher::report_outcome`]
//! when it has a result; the dispatcher keeps the registry honest and tells
//! the engine whether to pass the result upstream, retry, or give up.

mod slot;

pub use slot::SlotTracker;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::backoff;
use crate::config::Config;
use crate::error::{CarouselError, Result};
use crate::models::proxy::proxy_slot;
use crate::models::request::{BanSignal, Disposition, FetchRequest};
use crate::registry::{PoolStats, ProxyRegistry};
use crate::services::{LogStatsConfig, LogStatsService, ReanimatorConfig, ReanimatorService};
use crate::stats::{self, StatsSink, TracingStatsSink};

/// Assigns a rotating proxy to every outbound request and drives retries
/// when a proxy turns out to be banned.
pub struct RotatingProxyDispatcher {
    registry: Arc<ProxyRegistry>,
    slots: SlotTracker,
    sink: Arc<dyn StatsSink>,
    config: Config,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for RotatingProxyDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatingProxyDispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RotatingProxyDispatcher {
    /// Build a dispatcher from configuration.
    ///
    /// Loads the proxy source and fails with
    /// [`CarouselError::NotConfigured`] when no usable proxy survives
    /// cleanup, before any dispatch can begin.
    pub fn new(config: Config) -> Result<Self> {
        let entries = config.load_proxy_entries()?;
        let registry = ProxyRegistry::new(
            entries,
            Box::new(backoff::full_jitter(
                config.backoff_base,
                config.backoff_cap,
            )),
        );
        if registry.is_empty() {
            return Err(CarouselError::NotConfigured);
        }
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            registry: Arc::new(registry),
            slots: SlotTracker::new(),
            sink: Arc::new(TracingStatsSink),
            config,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Replace the default tracing sink with the collaborator's.
    pub fn with_stats_sink(mut self, sink: Arc<dyn StatsSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn registry(&self) -> Arc<ProxyRegistry> {
        self.registry.clone()
    }

    pub fn stats(&self) -> PoolStats {
        self.registry.stats()
    }

    /// In-flight request count for a concurrency slot.
    pub fn in_flight(&self, slot: &str) -> usize {
        self.slots.get(slot)
    }

    /// Bind a proxy and concurrency slot to an outbound request.
    ///
    /// Requests that already carry an externally supplied proxy are left
    /// alone. When the live pool is empty, the dispatcher either aborts
    /// (abort-on-empty configured) or resets the registry and draws once
    /// more; a second failure is fatal either way.
    pub fn assign(&self, request: &mut FetchRequest) -> Result<()> {
        if request.proxy.is_some() && !request.rotating {
            return Ok(());
        }
        let proxy = match self.registry.get_random() {
            Some(proxy) => proxy,
            None => {
                if self.config.stop_if_no_proxies {
                    error!("no proxies available; stopping dispatch");
                    return Err(CarouselError::NoProxiesAvailable);
                }
                warn!("no proxies available; marking all proxies as unchecked");
                self.registry.reset();
                match self.registry.get_random() {
                    Some(proxy) => proxy,
                    None => {
                        error!("no proxies available even after a reset");
                        return Err(CarouselError::NoProxiesAfterReset);
                    }
                }
            }
        };
        let slot = proxy_slot(&proxy);
        self.slots.acquire(&slot);
        request.proxy = Some(proxy);
        request.slot = Some(slot);
        request.rotating = true;
        Ok(())
    }

    /// Interpret the outcome of a dispatched request.
    ///
    /// The engine reports one [`BanSignal`] per attempt, whether the
    /// attempt produced a response or a transport exception. Outcomes for
    /// requests that bypassed rotation are ignored.
    pub fn report_outcome(&self, request: &FetchRequest, ban: BanSignal) -> Result<Disposition> {
        if !request.rotating {
            return Ok(Disposition::Untracked);
        }
        let Some(proxy) = request.proxy.as_deref() else {
            return Ok(Disposition::Untracked);
        };
        if self.registry.get_proxy(proxy).is_none() {
            return Ok(Disposition::Untracked);
        }
        if let Some(slot) = request.slot.as_deref() {
            self.slots.release(slot);
        }
        let disposition = match ban {
            BanSignal::Unknown => Ok(Disposition::NoSignal),
            BanSignal::Clean => {
                self.registry.mark_good(proxy);
                Ok(Disposition::Succeeded)
            }
            BanSignal::Banned => {
                self.registry.mark_dead(proxy);
                self.retry(request)
            }
        };
        stats::publish(&self.registry.stats(), self.sink.as_ref());
        disposition
    }

    /// Produce the follow-up attempt after a ban, or give up past the
    /// ceiling. The fresh request goes through the normal assignment path,
    /// so it gets a newly drawn proxy and the empty-pool policy applies.
    fn retry(&self, request: &FetchRequest) -> Result<Disposition> {
        let retries = request.retry_count + 1;
        let ceiling = request.max_retries.unwrap_or(self.config.max_retries);
        if retries <= ceiling {
            debug!(
                url = %request.url,
                retries,
                ceiling,
                "retrying with another proxy"
            );
            let mut retried = request.retry();
            self.assign(&mut retried)?;
            Ok(Disposition::Retry(retried))
        } else {
            debug!(
                url = %request.url,
                retries,
                "gave up retrying with different proxies"
            );
            Ok(Disposition::Exhausted { retries })
        }
    }

    /// Start the periodic reanimation sweep and stats logger.
    ///
    /// Must be called from within a tokio runtime. Idempotent while
    /// running.
    pub fn on_start(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }
        if !self.config.reanimate_interval.is_zero() {
            let service = ReanimatorService::new(
                self.registry.clone(),
                ReanimatorConfig {
                    interval: self.config.reanimate_interval,
                },
            );
            let shutdown = self.shutdown_tx.subscribe();
            tasks.push(tokio::spawn(async move { service.run(shutdown).await }));
        }
        if !self.config.logstats_interval.is_zero() {
            let service = LogStatsService::new(
                self.registry.clone(),
                self.sink.clone(),
                LogStatsConfig {
                    interval: self.config.logstats_interval,
                },
            );
            let shutdown = self.shutdown_tx.subscribe();
            tasks.push(tokio::spawn(async move { service.run(shutdown).await }));
        }
    }

    /// Stop both periodic tasks and wait for them; no tick fires after
    /// this returns.
    pub async fn on_stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::proxy::ProxyHealth;
    use crate::stats::testing::RecordingStatsSink;
    use std::time::Duration;

    fn test_config(proxies: &[&str]) -> Config {
        Config {
            proxy_list: proxies.iter().map(|p| p.to_string()).collect(),
            ..Config::default()
        }
    }

    fn dispatcher_with(proxies: &[&str]) -> RotatingProxyDispatcher {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        RotatingProxyDispatcher::new(test_config(proxies)).unwrap()
    }

    #[test]
    fn test_new_without_proxies_is_not_configured() {
        let err = RotatingProxyDispatcher::new(test_config(&[])).unwrap_err();
        assert!(matches!(err, CarouselError::NotConfigured));

        let err = RotatingProxyDispatcher::new(test_config(&["# only", "# comments"])).unwrap_err();
        assert!(matches!(err, CarouselError::NotConfigured));
    }

    #[test]
    fn test_assign_binds_proxy_slot_and_tag() {
        let dispatcher = dispatcher_with(&["proxy.example:3128"]);
        let mut request = FetchRequest::new("https://site.example/page");

        dispatcher.assign(&mut request).unwrap();

        assert_eq!(request.proxy.as_deref(), Some("http://proxy.example:3128"));
        assert_eq!(request.slot.as_deref(), Some("proxy.example"));
        assert!(request.rotating);
        assert_eq!(dispatcher.in_flight("proxy.example"), 1);
    }

    #[test]
    fn test_assign_leaves_external_proxy_alone() {
        let dispatcher = dispatcher_with(&["proxy.example:3128"]);
        let mut request =
            FetchRequest::with_proxy("https://site.example/page", "http://mine.example:8080");

        dispatcher.assign(&mut request).unwrap();

        assert_eq!(request.proxy.as_deref(), Some("http://mine.example:8080"));
        assert!(request.slot.is_none());
        assert!(!request.rotating);
    }

    #[test]
    fn test_outcome_for_external_proxy_is_untracked() {
        let dispatcher = dispatcher_with(&["proxy.example:3128"]);
        let mut request =
            FetchRequest::with_proxy("https://site.example/page", "http://mine.example:8080");
        dispatcher.assign(&mut request).unwrap();

        let disposition = dispatcher
            .report_outcome(&request, BanSignal::Banned)
            .unwrap();

        assert_eq!(disposition, Disposition::Untracked);
        let stats = dispatcher.stats();
        assert_eq!(stats.dead, 0);
    }

    #[test]
    fn test_clean_outcome_marks_good() {
        let dispatcher = dispatcher_with(&["a.example:3128"]);
        let mut request = FetchRequest::new("https://site.example/page");
        dispatcher.assign(&mut request).unwrap();

        let disposition = dispatcher
            .report_outcome(&request, BanSignal::Clean)
            .unwrap();

        assert_eq!(disposition, Disposition::Succeeded);
        assert_eq!(
            dispatcher
                .registry()
                .get_proxy("http://a.example:3128")
                .unwrap()
                .health,
            ProxyHealth::Good
        );
        assert_eq!(dispatcher.in_flight("a.example"), 0);
    }

    #[test]
    fn test_unknown_outcome_leaves_registry_untouched() {
        let dispatcher = dispatcher_with(&["a.example:3128"]);
        let mut request = FetchRequest::new("https://site.example/page");
        dispatcher.assign(&mut request).unwrap();

        let disposition = dispatcher
            .report_outcome(&request, BanSignal::Unknown)
            .unwrap();

        assert_eq!(disposition, Disposition::NoSignal);
        let stats = dispatcher.stats();
        assert_eq!(stats.unchecked, 1);
        assert_eq!(stats.good, 0);
        assert_eq!(stats.dead, 0);
    }

    #[test]
    fn test_ban_retries_with_a_different_proxy() {
        let dispatcher = dispatcher_with(&["a.example:3128", "b.example:3128"]);
        let mut request = FetchRequest::new("https://site.example/page");
        dispatcher.assign(&mut request).unwrap();
        let first = request.proxy.clone().unwrap();

        let disposition = dispatcher
            .report_outcome(&request, BanSignal::Banned)
            .unwrap();

        let Disposition::Retry(retried) = disposition else {
            panic!("expected a retry, got {:?}", disposition);
        };
        assert_eq!(retried.retry_count, 1);
        assert!(retried.dont_filter);
        assert!(retried.rotating);
        assert_ne!(retried.proxy.as_deref(), Some(first.as_str()));
        assert_eq!(
            dispatcher.registry().get_proxy(&first).unwrap().health,
            ProxyHealth::Dead
        );
    }

    #[test]
    fn test_retry_ceiling_exhausts_after_two_retries() {
        let dispatcher = dispatcher_with(&["a.example:3128", "b.example:3128", "c.example:3128"]);
        let mut request = FetchRequest::new("https://site.example/page").with_max_retries(2);
        dispatcher.assign(&mut request).unwrap();

        let first = dispatcher
            .report_outcome(&request, BanSignal::Banned)
            .unwrap();
        let Disposition::Retry(second_attempt) = first else {
            panic!("expected first retry, got {:?}", first);
        };
        assert_eq!(second_attempt.retry_count, 1);

        let second = dispatcher
            .report_outcome(&second_attempt, BanSignal::Banned)
            .unwrap();
        let Disposition::Retry(third_attempt) = second else {
            panic!("expected second retry, got {:?}", second);
        };
        assert_eq!(third_attempt.retry_count, 2);

        let third = dispatcher
            .report_outcome(&third_attempt, BanSignal::Banned)
            .unwrap();
        assert_eq!(third, Disposition::Exhausted { retries: 3 });
    }

    #[test]
    fn test_empty_pool_resets_once_and_reassigns() {
        let dispatcher = dispatcher_with(&["a.example:3128"]);
        dispatcher.registry().mark_dead("http://a.example:3128");

        let mut request = FetchRequest::new("https://site.example/page");
        dispatcher.assign(&mut request).unwrap();

        assert_eq!(request.proxy.as_deref(), Some("http://a.example:3128"));
        assert_eq!(
            dispatcher
                .registry()
                .get_proxy("http://a.example:3128")
                .unwrap()
                .health,
            ProxyHealth::Unchecked
        );
    }

    #[test]
    fn test_empty_pool_aborts_when_configured() {
        let config = Config {
            stop_if_no_proxies: true,
            ..test_config(&["a.example:3128"])
        };
        let dispatcher = RotatingProxyDispatcher::new(config).unwrap();
        dispatcher.registry().mark_dead("http://a.example:3128");

        let mut request = FetchRequest::new("https://site.example/page");
        let err = dispatcher.assign(&mut request).unwrap_err();

        assert!(matches!(err, CarouselError::NoProxiesAvailable));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_retry_after_last_proxy_dies_goes_through_reset() {
        let dispatcher = dispatcher_with(&["a.example:3128"]);
        let mut request = FetchRequest::new("https://site.example/page");
        dispatcher.assign(&mut request).unwrap();

        // The only proxy dies; the retry path resets the pool and hands the
        // same proxy back as unchecked.
        let disposition = dispatcher
            .report_outcome(&request, BanSignal::Banned)
            .unwrap();
        let Disposition::Retry(retried) = disposition else {
            panic!("expected a retry, got {:?}", disposition);
        };
        assert_eq!(retried.proxy.as_deref(), Some("http://a.example:3128"));
    }

    #[test]
    fn test_outcomes_publish_gauges() {
        let sink = Arc::new(RecordingStatsSink::default());
        let dispatcher = RotatingProxyDispatcher::new(test_config(&["a.example:3128"]))
            .unwrap()
            .with_stats_sink(sink.clone());

        let mut request = FetchRequest::new("https://site.example/page");
        dispatcher.assign(&mut request).unwrap();
        dispatcher
            .report_outcome(&request, BanSignal::Clean)
            .unwrap();

        assert_eq!(sink.get(stats::GOOD), Some(1.0));
        assert_eq!(sink.get(stats::UNCHECKED), Some(0.0));
        assert_eq!(sink.get(stats::DEAD), Some(0.0));
    }

    #[test]
    fn test_on_stop_without_start_is_a_noop() {
        tokio_test::block_on(async {
            let dispatcher = dispatcher_with(&["a.example:3128"]);
            dispatcher.on_stop().await;
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_reanimates_dead_proxies_until_stopped() {
        let config = Config {
            backoff_base: Duration::ZERO,
            backoff_cap: Duration::ZERO,
            logstats_interval: Duration::ZERO,
            ..test_config(&["a.example:3128", "b.example:3128"])
        };
        let dispatcher = RotatingProxyDispatcher::new(config).unwrap();
        let registry = dispatcher.registry();

        registry.mark_dead("http://a.example:3128");
        dispatcher.on_start();

        // First sweep runs after one reanimation interval.
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(
            registry.get_proxy("http://a.example:3128").unwrap().health,
            ProxyHealth::Reanimated
        );

        dispatcher.on_stop().await;

        // No further ticks after shutdown.
        registry.mark_dead("http://b.example:3128");
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(
            registry.get_proxy("http://b.example:3128").unwrap().health,
            ProxyHealth::Dead
        );
    }
}
