use std::path::PathBuf;
use thiserror::Error;

/// Boxed transport failure, so fetchers other than reqwest can report their own errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure kinds raised while mirroring.
///
/// None of these halt a run: the crawl loop logs them, bumps a counter in the
/// [`RunReport`](crate::downloader::RunReport) and moves on to the next item.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// The URL is off-host or matches an excluded path. A routing decision, not a fault.
    #[error("{url} is outside the mirror scope")]
    ScopeRejected { url: String },

    /// The server answered with a non-2xx status.
    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    /// DNS, connection or timeout failure before a status was received.
    #[error("request for {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: BoxError,
    },

    /// Persisting a page or asset to the mirror tree failed.
    #[error("failed to write {path:?}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The metadata sidecar could not be serialized.
    #[error("failed to serialize metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl MirrorError {
    /// True for the kinds that mean "could not retrieve" (non-2xx or transport).
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, Self::HttpStatus { .. } | Self::Transport { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_failure_kinds() {
        let status = MirrorError::HttpStatus {
            url: "https://example.com/a.css".to_string(),
            status: 404,
        };
        assert!(status.is_fetch_failure());
        assert_eq!(status.to_string(), "HTTP 404 for https://example.com/a.css");

        let transport = MirrorError::Transport {
            url: "https://example.com/".to_string(),
            source: Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            )),
        };
        assert!(transport.is_fetch_failure());

        let scope = MirrorError::ScopeRejected {
            url: "https://other.com/".to_string(),
        };
        assert!(!scope.is_fetch_failure());
    }
}
