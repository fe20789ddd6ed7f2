//! Carousel - Rotating-Proxy Middleware Core
//!
//! Proxy lifecycle management and retry/backoff scheduling for a web-crawl
//! fetch engine. The engine asks for a proxy per outbound request, reports
//! each outcome with a tri-state ban verdict, and Carousel keeps track of
//! dead and alive proxies so the crawl avoids banned exits.
//!
//! ## Features
//!
//! - Four-state proxy health tracking (unchecked, good, dead, reanimated)
//! - Dead proxies re-checked with randomized exponential backoff (full jitter)
//! - Per-request proxy rotation with a configurable retry ceiling
//! - Per-proxy concurrency isolation via host-derived slot keys
//! - Periodic reanimation sweep and stats logging with clean shutdown

pub mod backoff;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod models;
pub mod registry;
pub mod services;
pub mod stats;

pub use config::Config;
pub use dispatcher::RotatingProxyDispatcher;
pub use error::{CarouselError, Result};
pub use models::{BanSignal, Disposition, FetchRequest, ProxyHealth};
pub use registry::{PoolStats, ProxyRegistry};
