//! Offset pagination over a PeerTube listing endpoint.

use super::{CrawlEvent, CrawlItem, StopReason};
use crate::auth::SessionHandle;
use crate::channel::{ChannelOptions, Cursor};
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::normalize::{NormalizedVideo, PEERTUBE_VIDEO_PATH, from_peertube};
use async_stream::stream;
use futures::Stream;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

/// Items requested per listing page unless the channel overrides it
pub const DEFAULT_PAGE_SIZE: u32 = 25;

#[derive(Debug, Deserialize)]
struct Listing {
    #[serde(default)]
    data: Vec<Value>,
    #[serde(default)]
    total: Option<u64>,
}

/// Paginated API crawler
pub struct ApiCrawler {
    fetcher: Fetcher,
    base: Url,
    listing: Url,
    page_size: u32,
    limit: Option<u64>,
}

impl ApiCrawler {
    /// Crawler for the channel at `url`.
    ///
    /// The listing endpoint is `api_path` resolved against the instance root.
    /// Without one, a `/video-channels/<name>` URL maps to that channel's
    /// video listing and any other URL is used as the listing itself.
    pub fn new(fetcher: Fetcher, url: Url, options: &ChannelOptions) -> Result<Self> {
        let base = url
            .join("/")
            .map_err(|e| Error::Config(format!("invalid channel url {}: {}", url, e)))?;
        let listing = match &options.api_path {
            Some(path) => base.join(path),
            None => match channel_handle(&url) {
                Some(handle) => base.join(&format!("/api/v1/video-channels/{}/videos", handle)),
                None => Ok(url.clone()),
            },
        }
        .map_err(|e| Error::Config(format!("invalid api path for {}: {}", url, e)))?;

        let page_size = match options.page_size {
            Some(0) => return Err(Error::Config("page_size must be positive".to_string())),
            Some(size) => size,
            None => DEFAULT_PAGE_SIZE,
        };

        Ok(Self {
            fetcher,
            base,
            listing,
            page_size,
            limit: options.limit,
        })
    }

    pub fn listing(&self) -> &Url {
        &self.listing
    }

    /// Page through the listing from `cursor`.
    ///
    /// The cursor moves one step per listed item, including items that are
    /// skipped as malformed, so a resumed crawl requests exactly the next
    /// unprocessed item. Servers may cap the page size, so a short page does
    /// not end the crawl; an empty page or reaching the reported `total` does.
    pub fn crawl<'a>(
        &'a mut self,
        session: &'a SessionHandle,
        cursor: Cursor,
    ) -> impl Stream<Item = Result<CrawlEvent>> + Send + 'a {
        stream! {
            let mut cursor = cursor;
            let mut yielded: u64 = 0;

            if self.limit == Some(0) {
                yield Ok(CrawlEvent::Finished { reason: StopReason::LimitReached, cursor });
                return;
            }

            loop {
                let query = [
                    ("start", cursor.position().to_string()),
                    ("count", self.page_size.to_string()),
                    ("sort", "-publishedAt".to_string()),
                    ("nsfw", "true".to_string()),
                ];
                debug!(url = %self.listing, start = cursor.position(), "Requesting page");
                let page: Listing = match self.fetcher.get_json(&self.listing, &query, session).await {
                    Ok(page) => page,
                    Err(e) => {
                        yield Err(Error::from(e));
                        return;
                    }
                };
                let received = page.data.len();
                debug!(items = received, total = page.total, "Received page");

                for item in page.data {
                    let result = self.detail(&item, session).await;
                    cursor = cursor.advance();
                    let video = match result {
                        Ok(Some(video)) => video,
                        Ok(None) => continue,
                        Err(e) if e.is_retryable() => {
                            yield Err(e);
                            return;
                        }
                        Err(e) => {
                            warn!(start = cursor.position() - 1, "Skipping malformed item: {}", e);
                            continue;
                        }
                    };

                    yielded += 1;
                    yield Ok(CrawlEvent::Item(CrawlItem { video, cursor }));

                    if self.limit.is_some_and(|limit| yielded >= limit) {
                        info!(count = yielded, "Limit reached");
                        yield Ok(CrawlEvent::Finished { reason: StopReason::LimitReached, cursor });
                        return;
                    }
                }

                let reported_end = page.total.is_some_and(|total| cursor.position() >= total);
                if received == 0 || reported_end {
                    info!(count = yielded, start = cursor.position(), "Listing exhausted");
                    yield Ok(CrawlEvent::Finished { reason: StopReason::Exhausted, cursor });
                    return;
                }
            }
        }
    }

    // Ok(None) when the video disappeared between listing and detail.
    async fn detail(
        &self,
        item: &Value,
        session: &SessionHandle,
    ) -> Result<Option<NormalizedVideo>> {
        let id = ["shortUUID", "uuid"]
            .iter()
            .find_map(|key| item.get(key).and_then(Value::as_str))
            .ok_or_else(|| Error::MalformedRecord("listed video has no id".to_string()))?;
        let url = self
            .base
            .join(&format!("{}{}", PEERTUBE_VIDEO_PATH, id))
            .map_err(|e| Error::MalformedRecord(format!("video id '{}': {}", id, e)))?;

        let json: Value = match self.fetcher.get_json(&url, &[], session).await {
            Ok(json) => json,
            Err(e) if e.is_missing() => {
                warn!(url = %url, "Skipping missing video: {}", e);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        from_peertube(&self.base, json).map(Some)
    }
}

fn channel_handle(url: &Url) -> Option<String> {
    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
    match (segments.next(), segments.next()) {
        (Some("video-channels" | "c"), Some(handle)) => Some(handle.to_string()),
        _ => None,
    }
}
