//! Proxy registry and per-proxy health state machine.
//!
//! Owns every known proxy and the four disjoint category sets
//! (unchecked / good / dead / reanimated) that partition them. All
//! mutation happens behind one lock, so category membership stays atomic
//! for the dispatcher as well as the periodic services.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use serde::Serialize;
use tracing::{debug, warn};

use crate::models::proxy::{add_http_if_no_scheme, ProxyHealth};

/// Backoff schedule injected into the registry: failure count in, delay out.
pub type BackoffFn = Box<dyn Fn(u32) -> Duration + Send + Sync>;

/// Health record for one proxy
#[derive(Debug, Clone, Serialize)]
pub struct ProxyRecord {
    pub url: String,
    pub health: ProxyHealth,
    /// Consecutive failures; cleared when the proxy is marked good
    pub failed_attempts: u32,
    pub last_failure: Option<DateTime<Utc>>,
    /// Backoff interval stamped when the proxy was last marked dead
    pub backoff: Option<Duration>,
}

/// Counts per health category plus the mean backoff over dead proxies
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PoolStats {
    pub unchecked: usize,
    pub good: usize,
    pub dead: usize,
    pub reanimated: usize,
    pub mean_backoff_secs: f64,
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "proxies(good: {}, dead: {}, unchecked: {}, reanimated: {}, mean backoff: {:.0}s)",
            self.good, self.dead, self.unchecked, self.reanimated, self.mean_backoff_secs
        )
    }
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, ProxyRecord>,
    unchecked: HashSet<String>,
    good: HashSet<String>,
    dead: HashSet<String>,
    reanimated: HashSet<String>,
}

impl Inner {
    fn set_mut(&mut self, health: ProxyHealth) -> &mut HashSet<String> {
        match health {
            ProxyHealth::Unchecked => &mut self.unchecked,
            ProxyHealth::Good => &mut self.good,
            ProxyHealth::Dead => &mut self.dead,
            ProxyHealth::Reanimated => &mut self.reanimated,
        }
    }

    /// Move a proxy between category sets, keeping its record in sync.
    fn transition(&mut self, url: &str, to: ProxyHealth) {
        let from = match self.records.get(url) {
            Some(record) => record.health,
            None => return,
        };
        if from == to {
            return;
        }
        self.set_mut(from).remove(url);
        self.set_mut(to).insert(url.to_string());
        if let Some(record) = self.records.get_mut(url) {
            record.health = to;
        }
    }
}

/// Registry of all known proxies and their health state
pub struct ProxyRegistry {
    inner: RwLock<Inner>,
    backoff: BackoffFn,
}

impl ProxyRegistry {
    /// Build a registry from raw proxy entries.
    ///
    /// Entries are trimmed; blank lines and `#` comments are dropped;
    /// schemeless entries get a default `http://` scheme; duplicates
    /// collapse. Everything starts unchecked.
    pub fn new<I, S>(entries: I, backoff: BackoffFn) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut inner = Inner::default();
        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry.is_empty() || entry.starts_with('#') {
                continue;
            }
            let url = add_http_if_no_scheme(entry);
            if inner.records.contains_key(&url) {
                continue;
            }
            inner.unchecked.insert(url.clone());
            inner.records.insert(
                url.clone(),
                ProxyRecord {
                    url,
                    health: ProxyHealth::Unchecked,
                    failed_attempts: 0,
                    last_failure: None,
                    backoff: None,
                },
            );
        }
        Self {
            inner: RwLock::new(inner),
            backoff,
        }
    }

    /// Number of known proxies across all categories
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }

    /// Draw a uniformly random proxy from unchecked, good, and reanimated.
    ///
    /// Dead proxies are never returned. `None` when no proxy is available.
    pub fn get_random(&self) -> Option<String> {
        let inner = self.inner.read();
        let available: Vec<&String> = inner
            .unchecked
            .iter()
            .chain(inner.good.iter())
            .chain(inner.reanimated.iter())
            .collect();
        available
            .choose(&mut rand::thread_rng())
            .map(|url| (*url).clone())
    }

    /// Snapshot of a known proxy's record; `None` if never registered.
    pub fn get_proxy(&self, url: &str) -> Option<ProxyRecord> {
        self.inner.read().records.get(url).cloned()
    }

    /// Mark a proxy dead, stamping failure time and backoff interval.
    ///
    /// The backoff is computed from the failure count accumulated so far,
    /// so repeat offenders wait longer. Idempotent for already-dead
    /// proxies; unknown proxies are ignored with a warning.
    pub fn mark_dead(&self, url: &str) {
        self.mark_dead_at(url, Utc::now());
    }

    pub fn mark_dead_at(&self, url: &str, now: DateTime<Utc>) {
        let mut inner = self.inner.write();
        let (health, attempts) = match inner.records.get(url) {
            Some(record) => (record.health, record.failed_attempts),
            None => {
                warn!(proxy = %url, "proxy not found in registry");
                return;
            }
        };
        if health == ProxyHealth::Dead {
            return;
        }
        if health == ProxyHealth::Good {
            debug!(proxy = %url, "good proxy became dead");
        } else {
            debug!(proxy = %url, "proxy is dead");
        }
        let delay = (self.backoff)(attempts);
        inner.transition(url, ProxyHealth::Dead);
        if let Some(record) = inner.records.get_mut(url) {
            record.last_failure = Some(now);
            record.backoff = Some(delay);
            record.failed_attempts = attempts + 1;
        }
    }

    /// Mark a proxy good and clear its failure bookkeeping.
    pub fn mark_good(&self, url: &str) {
        let mut inner = self.inner.write();
        let health = match inner.records.get(url) {
            Some(record) => record.health,
            None => {
                warn!(proxy = %url, "proxy not found in registry");
                return;
            }
        };
        if health != ProxyHealth::Good {
            debug!(proxy = %url, "proxy is good");
        }
        inner.transition(url, ProxyHealth::Good);
        if let Some(record) = inner.records.get_mut(url) {
            record.failed_attempts = 0;
            record.last_failure = None;
            record.backoff = None;
        }
    }

    /// Move dead proxies whose backoff has elapsed into reanimated.
    ///
    /// This is the only way a proxy leaves the dead set. Returns how many
    /// were moved.
    pub fn reanimate(&self) -> usize {
        self.reanimate_at(Utc::now())
    }

    pub fn reanimate_at(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.inner.write();
        let due: Vec<String> = inner
            .dead
            .iter()
            .filter(|url| {
                inner.records.get(*url).is_some_and(|record| {
                    match (record.last_failure, record.backoff) {
                        (Some(failed_at), Some(delay)) => (now - failed_at)
                            .to_std()
                            .is_ok_and(|elapsed| elapsed >= delay),
                        // Dead proxies always carry a stamp; a missing one is due.
                        _ => true,
                    }
                })
            })
            .cloned()
            .collect();
        for url in &due {
            inner.transition(url, ProxyHealth::Reanimated);
        }
        due.len()
    }

    /// Return every non-good proxy to unchecked.
    ///
    /// Used when the active pool is exhausted; failure counts survive, so
    /// reanimation backoff keeps growing for repeat offenders.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        let non_good: Vec<String> = inner
            .records
            .values()
            .filter(|record| {
                record.health != ProxyHealth::Good && record.health != ProxyHealth::Unchecked
            })
            .map(|record| record.url.clone())
            .collect();
        for url in &non_good {
            inner.transition(url, ProxyHealth::Unchecked);
        }
    }

    /// Counts per category plus the mean backoff of dead proxies.
    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.read();
        let mean_backoff_secs = if inner.dead.is_empty() {
            0.0
        } else {
            let total: f64 = inner
                .dead
                .iter()
                .filter_map(|url| inner.records.get(url).and_then(|record| record.backoff))
                .map(|delay| delay.as_secs_f64())
                .sum();
            total / inner.dead.len() as f64
        };
        PoolStats {
            unchecked: inner.unchecked.len(),
            good: inner.good.len(),
            dead: inner.dead.len(),
            reanimated: inner.reanimated.len(),
            mean_backoff_secs,
        }
    }

    #[cfg(test)]
    fn assert_partitioned(&self) {
        let inner = self.inner.read();
        let sets = [
            (&inner.unchecked, ProxyHealth::Unchecked),
            (&inner.good, ProxyHealth::Good),
            (&inner.dead, ProxyHealth::Dead),
            (&inner.reanimated, ProxyHealth::Reanimated),
        ];
        let member_count: usize = sets.iter().map(|(set, _)| set.len()).sum();
        assert_eq!(member_count, inner.records.len());
        for (url, record) in &inner.records {
            for (set, health) in &sets {
                assert_eq!(
                    set.contains(url),
                    record.health == *health,
                    "{} should be in exactly the {} set",
                    url,
                    record.health
                );
            }
        }
    }
}
