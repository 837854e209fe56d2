//! Error taxonomy for the digest pipeline.
//!
//! Only [`ConfigError`] is fatal. Every other error is contained at the
//! item or source boundary: fetch errors become failed links or empty
//! sources, service errors and malformed payloads degrade into fallback
//! records.

use thiserror::Error;

/// Fatal setup problems, raised before any fetch or enrichment work starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// A single HTTP fetch failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// 429 or 5xx; retried by the transport.
    #[error("transient HTTP status {0}")]
    Transient(u16),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("proxy failure: {0}")]
    Proxy(String),

    #[error("TLS failure: {0}")]
    Tls(String),

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }

    /// Failures that justify retrying the whole source without a proxy.
    pub fn is_proxy_or_tls(&self) -> bool {
        matches!(self, FetchError::Proxy(_) | FetchError::Tls(_))
    }
}

/// Feed documents that could not be parsed as RSS or Atom.
#[derive(Debug, Error)]
#[error("feed is neither RSS ({rss}) nor Atom ({atom})")]
pub struct FeedError {
    pub rss: String,
    pub atom: String,
}

/// Failures of the external text-analysis call itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("service request failed: {0}")]
    Transport(String),

    #[error("service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("service call timed out after {0}s")]
    Timeout(u64),

    #[error("service returned an empty completion")]
    Empty,
}

/// Why a service response could not be turned into analysis items.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Malformed {
    #[error("response JSON is truncated: {0}")]
    Truncated(String),

    #[error("response is not valid JSON: {0}")]
    Invalid(String),

    #[error("response is neither an array nor an object")]
    UnexpectedShape,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_classification() {
        assert!(FetchError::Transient(503).is_transient());
        assert!(!FetchError::Status(404).is_transient());
        assert!(FetchError::Proxy("connect tunnel".into()).is_proxy_or_tls());
        assert!(FetchError::Tls("bad certificate".into()).is_proxy_or_tls());
        assert!(!FetchError::Timeout.is_proxy_or_tls());
    }

    #[test]
    fn test_config_error_display() {
        let e = ConfigError::Missing("LLM_API_KEY");
        assert_eq!(e.to_string(), "missing required setting `LLM_API_KEY`");
    }
}
