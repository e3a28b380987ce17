//! Static mapping from platform to crawl strategy and login flow.

use super::{ApiCrawler, GraphCrawler, Strategy};
use crate::auth::{Authenticator, BrowserLogin, LoginDriver, TokenLogin};
use crate::channel::{Channel, Platform};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetch::{FetchConfig, Fetcher};
use crate::retry::RetryPolicy;
use std::sync::Arc;
use url::Url;

/// Builds the per-run strategy and authenticator for a channel
#[derive(Clone)]
pub struct Registry {
    fetch: FetchConfig,
    login_retry: RetryPolicy,
    driver: Arc<dyn LoginDriver>,
}

impl Registry {
    pub fn new(config: &Config, driver: Arc<dyn LoginDriver>) -> Self {
        Self {
            fetch: config.fetch.clone(),
            login_retry: config.login_retry.clone(),
            driver,
        }
    }

    /// A fresh strategy with an empty visited set
    pub fn strategy(&self, channel: &Channel) -> Result<Strategy> {
        let url = channel_url(channel)?;
        let fetcher = Fetcher::new(&self.fetch)?;
        Ok(match channel.platform {
            Platform::Timcast => {
                Strategy::Graph(GraphCrawler::new(fetcher, url, &channel.options)?)
            }
            Platform::PeerTube => Strategy::Api(ApiCrawler::new(fetcher, url, &channel.options)?),
        })
    }

    pub fn authenticator(&self, channel: &Channel) -> Result<Authenticator> {
        Ok(match channel.platform {
            Platform::Timcast => Authenticator::Browser(BrowserLogin::new(
                self.driver.clone(),
                self.login_retry.clone(),
            )),
            Platform::PeerTube => {
                let base = channel_url(channel)?
                    .join("/")
                    .map_err(|e| Error::Config(format!("invalid channel url: {}", e)))?;
                Authenticator::Token(TokenLogin::new(base, &self.fetch)?)
            }
        })
    }
}

fn channel_url(channel: &Channel) -> Result<Url> {
    Url::parse(&channel.url)
        .map_err(|e| Error::Config(format!("channel {} has invalid url '{}': {}", channel.extern_id, channel.url, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthParams, UnavailableDriver};
    use crate::channel::{ChannelOptions, CursorKind};

    fn channel(platform: Platform, url: &str) -> Channel {
        Channel {
            id: 1,
            extern_id: "chan".to_string(),
            name: "Channel".to_string(),
            url: url.to_string(),
            platform,
            auth: AuthParams::None,
            options: ChannelOptions::default(),
            cursor: None,
        }
    }

    fn registry() -> Registry {
        Registry::new(&Config::default(), Arc::new(UnavailableDriver))
    }

    #[test]
    fn test_platform_dispatch() {
        let registry = registry();

        let graph = channel(Platform::Timcast, "https://timcast.com/members-area/");
        assert_eq!(registry.strategy(&graph).unwrap().cursor_kind(), CursorKind::Count);
        assert!(matches!(
            registry.authenticator(&graph).unwrap(),
            Authenticator::Browser(_)
        ));

        let api = channel(Platform::PeerTube, "https://tube.example/video-channels/news");
        assert_eq!(registry.strategy(&api).unwrap().cursor_kind(), CursorKind::Offset);
        assert!(matches!(
            registry.authenticator(&api).unwrap(),
            Authenticator::Token(_)
        ));
    }

    #[test]
    fn test_invalid_url_is_config_error() {
        let broken = channel(Platform::PeerTube, "not a url");
        assert!(matches!(registry().strategy(&broken), Err(Error::Config(_))));
    }
}
