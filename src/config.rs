//! # Runtime Configuration Module
//!
//! Process-wide settings: where the store lives, how outbound requests
//! behave, and how patiently logins and channel runs are retried. Built with
//! the same builder shape as [`FetchConfig`], or read from `VIDSRC_*`
//! environment variables with [`Config::from_env`].
//!
//! | Variable                     | Setting                             |
//! |------------------------------|-------------------------------------|
//! | `VIDSRC_DATABASE`            | database file path                  |
//! | `VIDSRC_USER_AGENT`          | user agent of outbound requests     |
//! | `VIDSRC_FETCH_TIMEOUT_SECS`  | deadline of a first fetch attempt   |
//! | `VIDSRC_REQUESTS_PER_SECOND` | politeness quota, 0 for unthrottled |
//! | `VIDSRC_MAX_ATTEMPTS`        | channel run attempts                |

use crate::error::{Error, Result};
use crate::fetch::FetchConfig;
use crate::retry::RetryPolicy;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default database file, relative to the working directory
pub const DEFAULT_DATABASE: &str = "vidsrc.db";

/// Runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database file path
    pub database: PathBuf,

    /// Outbound request settings
    pub fetch: FetchConfig,

    /// Retry policy of scripted browser logins
    pub login_retry: RetryPolicy,

    /// Attempts per channel run before it is reported as failed
    pub max_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: PathBuf::from(DEFAULT_DATABASE),
            fetch: FetchConfig::default(),
            login_retry: RetryPolicy::login(),
            max_attempts: 3,
        }
    }
}

impl Config {
    /// Create a new builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Defaults overridden by any `VIDSRC_*` variables that are set
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut builder = ConfigBuilder::new();
        if let Some(path) = lookup("VIDSRC_DATABASE") {
            builder = builder.database(path);
        }
        if let Some(agent) = lookup("VIDSRC_USER_AGENT") {
            builder = builder.user_agent(agent);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "VIDSRC_FETCH_TIMEOUT_SECS")? {
            if secs == 0 {
                return Err(Error::Config("VIDSRC_FETCH_TIMEOUT_SECS must be positive".to_string()));
            }
            builder = builder.fetch_timeout(Duration::from_secs(secs));
        }
        if let Some(rps) = parse_var::<u32>(&lookup, "VIDSRC_REQUESTS_PER_SECOND")? {
            builder = builder.requests_per_second(rps);
        }
        if let Some(attempts) = parse_var::<u32>(&lookup, "VIDSRC_MAX_ATTEMPTS")? {
            if attempts == 0 {
                return Err(Error::Config("VIDSRC_MAX_ATTEMPTS must be positive".to_string()));
            }
            builder = builder.max_attempts(attempts);
        }
        Ok(builder.build())
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| Error::Config(format!("invalid {} '{}': {}", name, raw, e)))
        })
        .transpose()
}

/// Builder for Config
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn database(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.database = path.into();
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.fetch.user_agent = user_agent.into();
        self
    }

    /// Deadline of the first fetch attempt; later attempts get multiples of it
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.config.fetch.retry.attempt_timeout = timeout;
        self
    }

    /// Zero disables throttling
    pub fn requests_per_second(mut self, rps: u32) -> Self {
        self.config.fetch.requests_per_second = NonZeroU32::new(rps);
        self
    }

    pub fn fetch_retry(mut self, retry: RetryPolicy) -> Self {
        self.config.fetch.retry = retry;
        self
    }

    pub fn login_retry(mut self, retry: RetryPolicy) -> Self {
        self.config.login_retry = retry;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        self.config
    }
}
