use serde::{Deserialize, Serialize};

/// Ban indicator reported by the fetch engine for a completed attempt.
///
/// The tri-state is deliberate: `Unknown` means the engine had no opinion and
/// must leave proxy-health accounting untouched, which is not the same thing
/// as `Clean`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BanSignal {
    /// The response (or transport failure) indicates the proxy is banned
    Banned,
    /// The response proves the proxy works
    Clean,
    /// No ban verdict either way
    Unknown,
}

impl BanSignal {
    pub fn from_flag(flag: Option<bool>) -> Self {
        match flag {
            Some(true) => BanSignal::Banned,
            Some(false) => BanSignal::Clean,
            None => BanSignal::Unknown,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            BanSignal::Banned => Some(true),
            BanSignal::Clean => Some(false),
            BanSignal::Unknown => None,
        }
    }
}

/// An outbound fetch plus the rotation metadata the dispatcher attaches.
///
/// The surrounding fetch engine carries this alongside whatever request
/// representation it uses natively; the dispatcher only reads and writes
/// these fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Target URL, used as the request identity in logs
    pub url: String,
    /// Proxy bound to this attempt
    pub proxy: Option<String>,
    /// Concurrency slot key derived from the bound proxy
    pub slot: Option<String>,
    /// Set when the proxy was assigned by rotation; externally pinned
    /// proxies leave this false and bypass outcome handling
    pub rotating: bool,
    /// Number of proxy retries so far
    pub retry_count: u32,
    /// Per-request override of the configured retry ceiling
    pub max_retries: Option<u32>,
    /// Retried attempts must bypass the engine's request deduplication
    pub dont_filter: bool,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            proxy: None,
            slot: None,
            rotating: false,
            retry_count: 0,
            max_retries: None,
            dont_filter: false,
        }
    }

    /// A request carrying its own proxy, outside rotation management.
    pub fn with_proxy(url: impl Into<String>, proxy: impl Into<String>) -> Self {
        Self {
            proxy: Some(proxy.into()),
            ..Self::new(url)
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// The follow-up attempt after a ban: unassigned, counted, and flagged to
    /// bypass deduplication. The dispatcher routes it back through assignment.
    pub fn retry(&self) -> FetchRequest {
        FetchRequest {
            url: self.url.clone(),
            proxy: None,
            slot: None,
            rotating: false,
            retry_count: self.retry_count + 1,
            max_retries: self.max_retries,
            dont_filter: true,
        }
    }
}

/// What the dispatcher decided about a reported outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Request was not rotation-managed; outcome passes through untouched
    Untracked,
    /// Proxy confirmed working; the result goes to the caller
    Succeeded,
    /// No ban verdict; registry untouched, outcome passes through
    NoSignal,
    /// Banned within the retry budget; re-issue this request
    Retry(FetchRequest),
    /// Banned past the retry budget; surface the failure to the caller
    Exhausted { retries: u32 },
}
