//! Crawl strategies.
//!
//! A strategy turns one channel into a lazy stream of [`CrawlEvent`]s: every
//! normalized video comes paired with the cursor that is safe to commit once
//! that video is merged, and the stream ends with a single
//! [`CrawlEvent::Finished`] carrying the reason traversal stopped.
//!
//! Two shapes exist:
//!
//! - [`GraphCrawler`]: breadth-first link following from a seed page, bounded
//!   by a whitelist, a hop depth and an item limit
//! - [`ApiCrawler`]: offset pagination over a REST listing
//!
//! Hitting a bound is a normal way to finish, not an error. Network and
//! authentication failures end the stream with an `Err`.

mod api;
mod graph;
mod registry;

pub use api::ApiCrawler;
pub use graph::{GraphCrawler, embed_id};
pub use registry::Registry;

use crate::auth::SessionHandle;
use crate::channel::{Cursor, CursorKind};
use crate::error::{Error, Result};
use crate::normalize::NormalizedVideo;
use futures::stream::BoxStream;
use std::fmt;
use tracing::warn;

/// A video together with the cursor to commit after merging it
#[derive(Debug, Clone, PartialEq)]
pub struct CrawlItem {
    pub video: NormalizedVideo,
    pub cursor: Cursor,
}

/// Why a crawl stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No candidates left
    Exhausted,

    /// The per-run item limit was reached
    LimitReached,

    /// Eligible links were left unfollowed because of the depth bound
    DepthReached,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::Exhausted => "Exhausted",
            StopReason::LimitReached => "Limit reached",
            StopReason::DepthReached => "Depth reached",
        };
        f.write_str(text)
    }
}

/// One step of a crawl
#[derive(Debug, Clone, PartialEq)]
pub enum CrawlEvent {
    Item(CrawlItem),

    /// Last event of a successful crawl
    Finished { reason: StopReason, cursor: Cursor },
}

/// Platform strategy for one crawl run
pub enum Strategy {
    Graph(GraphCrawler),
    Api(ApiCrawler),
}

impl Strategy {
    /// Cursor shape this strategy reads and writes
    pub fn cursor_kind(&self) -> CursorKind {
        match self {
            Strategy::Graph(_) => CursorKind::Count,
            Strategy::Api(_) => CursorKind::Offset,
        }
    }

    /// Starting cursor for a run: the committed one, or zero on first run.
    ///
    /// A count cursor is accepted as an offset by paginated strategies.
    pub fn resume_from(&self, committed: Option<Cursor>) -> Result<Cursor> {
        let kind = self.cursor_kind();
        match committed {
            None => Ok(Cursor::start(kind)),
            Some(cursor) if cursor.kind() == kind => Ok(cursor),
            // Unversioned counts left by older listing crawls were offsets
            Some(Cursor::Count { count }) if kind == CursorKind::Offset => {
                warn!(count, "Reading stored count as a listing offset");
                Ok(Cursor::Offset { start: count })
            }
            Some(cursor) => Err(Error::Config(format!(
                "stored cursor {:?} does not match the {:?} cursor of this platform",
                cursor, kind
            ))),
        }
    }

    /// Crawl from `cursor` using `session` for authenticated requests
    pub fn crawl<'a>(
        &'a mut self,
        session: &'a SessionHandle,
        cursor: Cursor,
    ) -> BoxStream<'a, Result<CrawlEvent>> {
        match self {
            Strategy::Graph(graph) => Box::pin(graph.crawl(session, cursor)),
            Strategy::Api(api) => Box::pin(api.crawl(session, cursor)),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelOptions, Whitelist};
    use crate::fetch::{FetchConfig, Fetcher};
    use url::Url;

    fn graph() -> Strategy {
        let options = ChannelOptions {
            whitelist: Whitelist::new(["^https://site/"]).unwrap(),
            ..ChannelOptions::default()
        };
        let fetcher = Fetcher::new(&FetchConfig::default()).unwrap();
        let seed = Url::parse("https://site/").unwrap();
        Strategy::Graph(GraphCrawler::new(fetcher, seed, &options).unwrap())
    }

    fn api() -> Strategy {
        let fetcher = Fetcher::new(&FetchConfig::default()).unwrap();
        let url = Url::parse("https://tube.example/video-channels/news").unwrap();
        Strategy::Api(ApiCrawler::new(fetcher, url, &ChannelOptions::default()).unwrap())
    }

    #[test]
    fn test_resume_from() {
        let strategy = graph();
        assert_eq!(strategy.resume_from(None).unwrap(), Cursor::Count { count: 0 });
        assert_eq!(
            strategy.resume_from(Some(Cursor::Count { count: 7 })).unwrap(),
            Cursor::Count { count: 7 }
        );
        assert!(matches!(
            strategy.resume_from(Some(Cursor::Offset { start: 7 })),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_legacy_count_resumes_listing() {
        let strategy = api();
        let legacy = Cursor::from_json(r#"{"count": 40}"#).unwrap();
        assert_eq!(
            strategy.resume_from(Some(legacy)).unwrap(),
            Cursor::Offset { start: 40 }
        );
        assert_eq!(
            strategy.resume_from(Some(Cursor::Offset { start: 3 })).unwrap(),
            Cursor::Offset { start: 3 }
        );
        assert_eq!(strategy.resume_from(None).unwrap(), Cursor::Offset { start: 0 });
    }
}
