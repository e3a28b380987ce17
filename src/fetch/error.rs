//! Error types for the fetch module

use crate::error::Error as CrateError;
use std::time::Duration;
use thiserror::Error;

/// Error type for network and browser operations
#[derive(Debug, Error)]
pub enum CrawlError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote answered with a non-success status
    #[error("{url} returned HTTP {status}")]
    Status {
        /// Requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// Attempt exceeded its deadline
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// URL parsing error
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Response body was not the expected JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Browser automation failure
    #[error("Browser error: {0}")]
    Browser(String),

    /// Capability not compiled in or not offered by the platform
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl CrawlError {
    /// Worth retrying within the same run
    pub fn is_transient(&self) -> bool {
        match self {
            CrawlError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            CrawlError::Status { status, .. } => *status == 429 || *status >= 500,
            CrawlError::Timeout(_) | CrawlError::Browser(_) => true,
            _ => false,
        }
    }

    /// Remote rejected our credentials
    pub fn is_auth(&self) -> bool {
        matches!(self, CrawlError::Status { status: 401 | 403, .. })
    }

    /// The resource is gone; skipping it is safe
    pub fn is_missing(&self) -> bool {
        matches!(self, CrawlError::Status { status: 404 | 410, .. })
    }
}

impl From<CrawlError> for CrateError {
    fn from(err: CrawlError) -> Self {
        if err.is_auth() {
            return CrateError::Authentication(err.to_string());
        }
        match err {
            CrawlError::Http(_)
            | CrawlError::Status { .. }
            | CrawlError::Timeout(_)
            | CrawlError::Browser(_) => CrateError::TransientNetwork(err.to_string()),
            CrawlError::Json(e) => CrateError::MalformedRecord(e.to_string()),
            CrawlError::UrlParse(e) => CrateError::Config(format!("URL parse error: {}", e)),
            CrawlError::Unsupported(msg) => CrateError::Config(msg),
            CrawlError::Other(msg) => CrateError::Other(msg),
        }
    }
}
