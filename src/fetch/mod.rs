//! Page and resource fetcher.
//!
//! Wraps a `reqwest` client with the pieces every crawl needs: session
//! attachment, a politeness rate limit, per-attempt deadlines, retries with
//! backoff for transient failures, and the set of URLs already visited in the
//! current run so cyclic link graphs terminate.

mod config;
mod embed;
mod error;
mod html;

pub use config::{FetchConfig, FetchConfigBuilder};
pub use embed::extract_embedded_json;
pub use error::CrawlError;
pub use html::{ParsedPage, parse_page};

use crate::auth::SessionHandle;
use crate::retry::RetryPolicy;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::header::REFERER;
use reqwest::{Client as ReqwestClient, RequestBuilder};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Fetcher scoped to a single crawl run
pub struct Fetcher {
    client: ReqwestClient,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
    retry: RetryPolicy,
    visited: HashSet<String>,
}

impl Fetcher {
    /// Create a fetcher with an empty visited set
    pub fn new(config: &FetchConfig) -> Result<Self, CrawlError> {
        let client = ReqwestClient::builder()
            .user_agent(config.user_agent.clone())
            .build()?;
        let limiter = config
            .requests_per_second
            .map(|rps| Arc::new(RateLimiter::direct(Quota::per_second(rps))));

        Ok(Self {
            client,
            limiter,
            retry: config.retry.clone(),
            visited: HashSet::new(),
        })
    }

    /// Record `url` as visited. Returns `false` if it was already seen.
    pub fn mark_visited(&mut self, url: &Url) -> bool {
        self.visited.insert(url.as_str().to_string())
    }

    pub fn is_visited(&self, url: &Url) -> bool {
        self.visited.contains(url.as_str())
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    /// Fetch and parse an HTML page, once per run.
    ///
    /// Returns `Ok(None)` without any network traffic when the page was
    /// already visited.
    #[instrument(skip(self, session), fields(url = %url))]
    pub async fn fetch_page(
        &mut self,
        url: &Url,
        session: &SessionHandle,
    ) -> Result<Option<ParsedPage>, CrawlError> {
        if !self.mark_visited(url) {
            debug!("Skipping duplicate url");
            return Ok(None);
        }
        let body = self.get_text(url, session, None).await?;
        debug!("Got {} bytes", body.len());
        Ok(Some(parse_page(url, &body)))
    }

    /// Authenticated GET returning the body as text
    pub async fn get_text(
        &self,
        url: &Url,
        session: &SessionHandle,
        referer: Option<&Url>,
    ) -> Result<String, CrawlError> {
        self.send(url, |timeout| {
            let mut request = session.apply(self.client.get(url.clone()).timeout(timeout));
            if let Some(referer) = referer {
                request = request.header(REFERER, referer.as_str());
            }
            request
        })
        .await
    }

    /// Authenticated GET with query parameters, decoded as JSON
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &Url,
        query: &[(&str, String)],
        session: &SessionHandle,
    ) -> Result<T, CrawlError> {
        let body = self
            .send(url, |timeout| {
                session.apply(self.client.get(url.clone()).query(query).timeout(timeout))
            })
            .await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Authenticated form POST, decoded as JSON
    pub async fn post_form<T: DeserializeOwned>(
        &self,
        url: &Url,
        form: &[(&str, String)],
        session: &SessionHandle,
    ) -> Result<T, CrawlError> {
        let body = self
            .send(url, |timeout| {
                session.apply(self.client.post(url.clone()).form(form).timeout(timeout))
            })
            .await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn send<F>(&self, url: &Url, build: F) -> Result<String, CrawlError>
    where
        F: Fn(Duration) -> RequestBuilder,
    {
        let what = format!("request to {}", url);
        self.retry
            .run(
                &what,
                |attempt| {
                    let timeout = self.retry.timeout_for(attempt);
                    let request = build(timeout);
                    // The deadline covers the body as well as the headers
                    let classify = move |e: reqwest::Error| {
                        if e.is_timeout() {
                            CrawlError::Timeout(timeout)
                        } else {
                            CrawlError::Http(e)
                        }
                    };
                    async move {
                        if let Some(limiter) = &self.limiter {
                            limiter.until_ready().await;
                        }
                        let response = request.send().await.map_err(classify)?;

                        let status = response.status();
                        if !status.is_success() {
                            return Err(CrawlError::Status {
                                url: response.url().to_string(),
                                status: status.as_u16(),
                            });
                        }
                        response.text().await.map_err(classify)
                    }
                },
                CrawlError::is_transient,
            )
            .await
    }
}
