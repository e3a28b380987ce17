//! Channels: remote content sources tracked locally.
//!
//! A channel carries everything a crawl needs: the seed URL, the platform
//! that decides which strategy runs, opaque auth parameters, crawl options
//! and the last committed cursor.

mod cursor;
mod options;

pub use cursor::{CURSOR_VERSION, Cursor, CursorKind};
pub use options::{ChannelOptions, Pattern, Whitelist};

use crate::auth::AuthParams;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Remote platforms with a registered crawl strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Members-only site scraped through a browser session, videos in embedded players
    Timcast,

    /// PeerTube instance queried through its REST API
    PeerTube,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::Timcast, Platform::PeerTube];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Timcast => "timcast",
            Platform::PeerTube => "peertube",
        }
    }

    /// Guess the platform from a channel URL.
    pub fn detect(url: &str) -> Option<Platform> {
        if url.starts_with("https://timcast.com/") {
            Some(Platform::Timcast)
        } else if url.contains("/video-channels/") || url.contains("/api/v1/") {
            Some(Platform::PeerTube)
        } else {
            None
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Config(format!("unknown platform '{}'", s)))
    }
}

/// A channel as stored locally
#[derive(Debug, Clone)]
pub struct Channel {
    /// Row id
    pub id: i64,

    /// Globally unique external identifier
    pub extern_id: String,

    /// Display name
    pub name: String,

    /// Seed URL
    pub url: String,

    pub platform: Platform,

    pub auth: AuthParams,

    pub options: ChannelOptions,

    /// Last committed cursor, `None` before the first successful merge
    pub cursor: Option<Cursor>,
}

/// Fields needed to provision a channel
#[derive(Debug, Clone)]
pub struct NewChannel {
    pub extern_id: String,
    pub name: String,
    pub url: String,
    pub platform: Platform,
    pub auth: AuthParams,
    pub options: ChannelOptions,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_parse() {
        assert_eq!("peertube".parse::<Platform>().unwrap(), Platform::PeerTube);
        assert_eq!("Timcast".parse::<Platform>().unwrap(), Platform::Timcast);
        assert!("youtube".parse::<Platform>().is_err());
    }

    #[test]
    fn test_platform_detect() {
        assert_eq!(
            Platform::detect("https://timcast.com/members-area/"),
            Some(Platform::Timcast)
        );
        assert_eq!(
            Platform::detect("https://tube.example/video-channels/news"),
            Some(Platform::PeerTube)
        );
        assert_eq!(Platform::detect("https://example.com/"), None);
    }
}
