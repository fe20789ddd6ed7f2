use thiserror::Error;

/// Unified error type for the Carousel middleware core
#[derive(Error, Debug)]
pub enum CarouselError {
    // Startup errors
    #[error("no proxies configured")]
    NotConfigured,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // Pool exhaustion
    #[error("no proxies available")]
    NoProxiesAvailable,

    #[error("no proxies available even after a reset")]
    NoProxiesAfterReset,

    // I/O errors (proxy list file)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Carousel operations
pub type Result<T> = std::result::Result<T, CarouselError>;

impl CarouselError {
    /// Fatal errors require the caller to stop issuing new requests.
    ///
    /// In-flight requests may still complete; only new dispatch must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CarouselError::NotConfigured
                | CarouselError::NoProxiesAvailable
                | CarouselError::NoProxiesAfterReset
        )
    }
}
