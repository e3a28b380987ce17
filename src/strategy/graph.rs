//! Breadth-first crawl over a members site whose videos live in embedded
//! players.

use super::{CrawlEvent, CrawlItem, StopReason};
use crate::auth::SessionHandle;
use crate::channel::{ChannelOptions, Cursor, Pattern, Whitelist};
use crate::error::{Error, Result};
use crate::fetch::{Fetcher, extract_embedded_json};
use crate::normalize::from_embed;
use async_stream::stream;
use futures::Stream;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, info, warn};
use url::Url;

/// Player frames recognized when a channel does not override the pattern
pub const DEFAULT_EMBED_PATTERN: &str = "^https://rumble.com/embed/";

/// Identifier of an embedded video: the last non-empty path segment of the frame URL
pub fn embed_id(frame: &Url) -> Option<String> {
    frame
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(str::to_string)
}

/// Link-following crawler
pub struct GraphCrawler {
    fetcher: Fetcher,
    seed: Url,
    whitelist: Whitelist,
    embed_pattern: Pattern,
    depth: Option<u32>,
    limit: Option<u64>,
}

impl GraphCrawler {
    pub fn new(fetcher: Fetcher, seed: Url, options: &ChannelOptions) -> Result<Self> {
        let embed_pattern = match &options.embed_pattern {
            Some(pattern) => pattern.clone(),
            None => Pattern::new(DEFAULT_EMBED_PATTERN)?,
        };
        if options.whitelist.is_empty() {
            warn!(seed = %seed, "Empty whitelist, only the seed page will be crawled");
        }
        Ok(Self {
            fetcher,
            seed,
            whitelist: options.whitelist.clone(),
            embed_pattern,
            depth: options.depth,
            limit: options.limit,
        })
    }

    /// Traverse from the seed page.
    ///
    /// Pages are visited in FIFO order; the videos embedded in a page are
    /// yielded before any of its links are followed. The cursor counts items
    /// and continues from `cursor`. With a limit, the limit-th item is yielded
    /// and nothing further is fetched.
    pub fn crawl<'a>(
        &'a mut self,
        session: &'a SessionHandle,
        cursor: Cursor,
    ) -> impl Stream<Item = Result<CrawlEvent>> + Send + 'a {
        stream! {
            let mut cursor = cursor;
            let mut yielded: u64 = 0;
            let mut depth_cut = false;
            let mut queued: HashSet<Url> = HashSet::new();
            let mut queue: VecDeque<(Url, u32)> = VecDeque::new();
            queue.push_back((self.seed.clone(), 0));
            queued.insert(self.seed.clone());

            if self.limit == Some(0) {
                yield Ok(CrawlEvent::Finished { reason: StopReason::LimitReached, cursor });
                return;
            }

            while let Some((url, hops)) = queue.pop_front() {
                debug!(url = %url, hops, "Visiting page");
                let page = match self.fetcher.fetch_page(&url, session).await {
                    Ok(Some(page)) => page,
                    Ok(None) => continue,
                    Err(e) if e.is_missing() => {
                        warn!(url = %url, "Skipping missing page: {}", e);
                        continue;
                    }
                    Err(e) => {
                        yield Err(Error::from(e));
                        return;
                    }
                };

                for frame in &page.frames {
                    if !self.embed_pattern.matches(frame.as_str()) {
                        debug!(src = %frame, "Ignoring frame");
                        continue;
                    }
                    if !self.fetcher.mark_visited(frame) {
                        debug!(src = %frame, "Skipping duplicate frame");
                        continue;
                    }
                    let Some(extern_id) = embed_id(frame) else {
                        warn!(src = %frame, "Frame URL has no embed id");
                        continue;
                    };

                    // Player hosts only check the referring page, not the member session
                    let body = match self
                        .fetcher
                        .get_text(frame, &SessionHandle::Anonymous, Some(&url))
                        .await
                    {
                        Ok(body) => body,
                        Err(e) if e.is_missing() => {
                            warn!(src = %frame, "Skipping missing embed: {}", e);
                            continue;
                        }
                        Err(e) => {
                            yield Err(Error::from(e));
                            return;
                        }
                    };
                    debug!(src = %frame, bytes = body.len(), "Received embed");

                    let Some(json) = extract_embedded_json(&body) else {
                        continue;
                    };
                    let video = match from_embed(&extern_id, json) {
                        Ok(video) => video,
                        Err(e) => {
                            warn!(src = %frame, "Skipping malformed embed: {}", e);
                            continue;
                        }
                    };

                    cursor = cursor.advance();
                    yielded += 1;
                    yield Ok(CrawlEvent::Item(CrawlItem { video, cursor }));

                    if let Some(limit) = self.limit {
                        debug!("Video count: {} of {}", yielded, limit);
                        if yielded >= limit {
                            info!(count = yielded, "Limit reached");
                            yield Ok(CrawlEvent::Finished { reason: StopReason::LimitReached, cursor });
                            return;
                        }
                    }
                }

                let can_descend = self.depth.is_none_or(|depth| hops < depth);
                for link in &page.anchors {
                    if queued.contains(link) || self.fetcher.is_visited(link) {
                        continue;
                    }
                    if !self.whitelist.allows(link.as_str()) {
                        debug!(href = %link, "Skipping link outside whitelist");
                        continue;
                    }
                    if !can_descend {
                        depth_cut = true;
                        continue;
                    }
                    queued.insert(link.clone());
                    queue.push_back((link.clone(), hops + 1));
                }
            }

            let reason = if depth_cut {
                info!(count = yielded, "Depth reached");
                StopReason::DepthReached
            } else {
                info!(count = yielded, pages = self.fetcher.visited_count(), "Crawl exhausted");
                StopReason::Exhausted
            };
            yield Ok(CrawlEvent::Finished { reason, cursor });
        }
    }
}
