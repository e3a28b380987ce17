//! Canonical video records.
//!
//! Every platform's payload is mapped onto [`NormalizedVideo`] and
//! [`NormalizedSource`] before it reaches the store. The raw payload always
//! travels along in `original` for archival; nothing downstream interprets it.

mod embed;
mod peertube;

pub use embed::from_embed;
pub use peertube::{PEERTUBE_VIDEO_PATH, from_peertube};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Remote timestamp format used by embedded players, e.g. `2022-07-22T02:45:35+00:00`
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

/// Publication time of a video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Published {
    /// Reported by the platform
    Reported(DateTime<Utc>),

    /// The reported value did not parse and the crawl time stands in
    Estimated(DateTime<Utc>),
}

impl Published {
    pub fn time(&self) -> DateTime<Utc> {
        match *self {
            Published::Reported(ts) | Published::Estimated(ts) => ts,
        }
    }

    pub fn is_estimated(&self) -> bool {
        matches!(self, Published::Estimated(_))
    }
}

/// A remote video in canonical form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedVideo {
    /// Identifier unique within the channel
    pub extern_id: String,

    /// Display title, title-cased
    pub title: String,

    /// Poster image URL
    pub poster: Option<String>,

    /// Duration in seconds
    pub duration: Option<i64>,

    /// Publication time
    pub published: Option<Published>,

    /// Tag names, deduplicated case-insensitively
    pub tags: Vec<String>,

    /// Renditions
    pub sources: Vec<NormalizedSource>,

    /// Raw remote payload
    pub original: Value,
}

/// One rendition of a video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSource {
    /// Identifier unique within the video, when the platform has one
    pub extern_id: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub fps: Option<i64>,
    /// Size in bytes
    pub size: Option<i64>,
    pub mime: Option<String>,
    pub url: String,
    pub original: Value,
}

/// Title-case a string: the first letter of every word upper case, the rest
/// lower case. Any character that is not a letter starts a new word.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_word = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}

/// Parse a remote timestamp.
///
/// Missing values stay `None`. Unparseable values fall back to the current
/// time, marked as estimated, so the record is still imported.
pub fn parse_published(raw: Option<&str>) -> Option<Published> {
    let raw = raw?.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(Published::Reported(ts.with_timezone(&Utc)));
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, DATETIME_FORMAT) {
        return Some(Published::Reported(ts.with_timezone(&Utc)));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(Published::Reported(ts.and_utc()));
    }
    warn!("Error parsing datetime '{}', using current time", raw);
    Some(Published::Estimated(Utc::now()))
}

/// Guess a MIME type from the file extension of a URL
pub fn mime_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "m3u8" => "application/x-mpegURL",
        "mpd" => "application/dash+xml",
        _ => return None,
    };
    Some(mime.to_string())
}

/// Drop empty and case-insensitively repeated tags, keeping first spellings
pub(crate) fn dedupe_tags(tags: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.to_lowercase()))
        .collect()
}
