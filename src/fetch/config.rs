//! # Fetcher Configuration Module
//!
//! Options for outbound requests made during a crawl: identification,
//! politeness and the retry policy for transient failures. Uses the same
//! builder shape as the other configuration structs in the crate.

use crate::retry::RetryPolicy;
use std::num::NonZeroU32;

/// Configuration for the fetcher
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent to use for requests
    pub user_agent: String,

    /// Maximum requests per second, `None` for unthrottled
    pub requests_per_second: Option<NonZeroU32>,

    /// Retry policy for transient failures; also sets per-request deadlines
    pub retry: RetryPolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("vidsrc/{}", env!("CARGO_PKG_VERSION")),
            requests_per_second: NonZeroU32::new(2),
            retry: RetryPolicy::default(),
        }
    }
}

/// Builder for FetchConfig
#[derive(Debug, Default)]
pub struct FetchConfigBuilder {
    config: FetchConfig,
}

impl FetchConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: FetchConfig::default(),
        }
    }

    /// Set the user agent to use for requests
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Set the request rate; zero disables throttling
    pub fn requests_per_second(mut self, rps: u32) -> Self {
        self.config.requests_per_second = NonZeroU32::new(rps);
        self
    }

    /// Set the retry policy
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Build the configuration
    pub fn build(self) -> FetchConfig {
        self.config
    }
}

impl FetchConfig {
    /// Create a new builder
    pub fn builder() -> FetchConfigBuilder {
        FetchConfigBuilder::new()
    }
}
