//! Resumable crawl cursor.
//!
//! Each strategy owns one cursor shape. Cursors are persisted inside a
//! versioned JSON envelope so the schema can evolve without breaking stored
//! channels:
//!
//! ```json
//! {"version":1,"cursor":{"kind":"offset","start":50}}
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current envelope version
pub const CURSOR_VERSION: u32 = 1;

/// Progress marker for one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Cursor {
    /// Number of items processed so far (graph crawls)
    Count { count: u64 },

    /// Offset of the next item to request (paginated APIs)
    Offset { start: u64 },
}

/// Discriminant of a [`Cursor`], used to check it against a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorKind {
    Count,
    Offset,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    cursor: Cursor,
}

impl Cursor {
    /// The zero cursor for the given kind
    pub fn start(kind: CursorKind) -> Self {
        match kind {
            CursorKind::Count => Cursor::Count { count: 0 },
            CursorKind::Offset => Cursor::Offset { start: 0 },
        }
    }

    pub fn kind(&self) -> CursorKind {
        match self {
            Cursor::Count { .. } => CursorKind::Count,
            Cursor::Offset { .. } => CursorKind::Offset,
        }
    }

    /// Progress value regardless of kind
    pub fn position(&self) -> u64 {
        match *self {
            Cursor::Count { count } => count,
            Cursor::Offset { start } => start,
        }
    }

    /// Cursor moved forward by one item
    pub fn advance(self) -> Self {
        match self {
            Cursor::Count { count } => Cursor::Count { count: count + 1 },
            Cursor::Offset { start } => Cursor::Offset { start: start + 1 },
        }
    }

    /// Serialize into the versioned envelope
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&Envelope {
            version: CURSOR_VERSION,
            cursor: *self,
        })?)
    }

    /// Parse a stored cursor.
    ///
    /// Besides the envelope, the unversioned shapes written by older crawlers
    /// are accepted: a bare number or `{"count": N}`, both read as a count.
    /// Anything else is a [`Error::Config`] error.
    pub fn from_json(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| Error::Config(format!("unrecognized cursor {}: {}", raw, e)))?;

        if let Some(n) = value.as_u64() {
            return Ok(Cursor::Count { count: n });
        }

        let Some(obj) = value.as_object() else {
            return Err(Error::Config(format!("unrecognized cursor: {}", raw)));
        };

        if let Some(version) = obj.get("version") {
            let envelope: Envelope = serde_json::from_value(value.clone())
                .map_err(|e| Error::Config(format!("invalid cursor envelope: {}", e)))?;
            if envelope.version != CURSOR_VERSION {
                return Err(Error::Config(format!(
                    "unsupported cursor version {}",
                    version
                )));
            }
            return Ok(envelope.cursor);
        }

        if obj.contains_key("kind") {
            return serde_json::from_value(value)
                .map_err(|e| Error::Config(format!("invalid cursor: {}", e)));
        }

        match obj.get("count").and_then(Value::as_u64) {
            Some(count) => Ok(Cursor::Count { count }),
            None => Err(Error::Config(format!("unrecognized cursor: {}", raw))),
        }
    }
}
