//! Per-channel crawl options.
//!
//! Options are stored as free-form JSON on the channel row. Regular
//! expressions are compiled while parsing, so a malformed whitelist entry is
//! rejected when the options are written instead of in the middle of a crawl.

use crate::error::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A compiled regular expression that serializes as its source text
#[derive(Debug, Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(source: &str) -> Result<Self> {
        Regex::new(source)
            .map(Pattern)
            .map_err(|e| Error::Config(format!("invalid pattern '{}': {}", source, e)))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Match anchored at the start of `text`.
    pub fn matches(&self, text: &str) -> bool {
        self.0.find(text).is_some_and(|m| m.start() == 0)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Serialize for Pattern {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Pattern::new(&source).map_err(serde::de::Error::custom)
    }
}

/// Set of URL patterns a graph crawl may follow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Whitelist(Vec<Pattern>);

impl Whitelist {
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        patterns
            .into_iter()
            .map(|p| Pattern::new(p.as_ref()))
            .collect::<Result<Vec<_>>>()
            .map(Whitelist)
    }

    /// An empty whitelist allows nothing.
    pub fn allows(&self, url: &str) -> bool {
        self.0.iter().any(|p| p.matches(url))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Crawl bounds and platform tweaks for one channel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelOptions {
    /// Maximum link-following hops from the seed URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,

    /// Maximum number of items yielded per run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,

    /// Links a graph crawl may follow
    #[serde(default, skip_serializing_if = "Whitelist::is_empty")]
    pub whitelist: Whitelist,

    /// Overrides the platform's embedded-player URL pattern
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed_pattern: Option<Pattern>,

    /// Items requested per API page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,

    /// Listing endpoint for API crawls, relative to the channel URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_path: Option<String>,
}

impl ChannelOptions {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::Config(format!("invalid channel options: {}", e)))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
