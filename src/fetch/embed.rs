//! Extraction of the video description that embedded players inline as a
//! minified JavaScript assignment.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::{debug, warn};

static ASSIGNMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"g\.f\["\w{6,7}"\]=(\{.*\}),loaded:d\(\)"#).expect("valid assignment regex")
});

// The "path" member holds script, not JSON; cut it out up to the "w" member.
static PATH_MEMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^(.*)"path":.*,("w":.*$)"#).expect("valid trim regex"));

/// Pull the player JSON out of an embed page.
///
/// Returns `None` (after logging) when the assignment is missing or the
/// captured text is not valid JSON.
pub fn extract_embedded_json(body: &str) -> Option<Value> {
    let Some(captures) = ASSIGNMENT.captures(body) else {
        warn!(bytes = body.len(), "No embedded player data found");
        return None;
    };
    let raw = &captures[1];
    debug!(bytes = raw.len(), "Extracted embedded player data");

    let mut last_error = None;
    for candidate in candidates(raw) {
        match serde_json::from_str(&candidate) {
            Ok(value) => return Some(value),
            Err(e) => last_error = Some(e),
        }
    }

    if let Some(e) = last_error {
        warn!("Invalid embedded player JSON: {}", e);
    }
    debug!("{}", raw);
    None
}

// The cut can swallow the closing brace of the enclosing object depending on
// where "w" sits, so both closings are tried before the untouched text.
fn candidates(raw: &str) -> Vec<String> {
    if !PATH_MEMBER.is_match(raw) {
        return vec![raw.to_string()];
    }
    vec![
        PATH_MEMBER.replace(raw, "${1}${2}").into_owned(),
        PATH_MEMBER.replace(raw, "${1}${2}}").into_owned(),
        raw.to_string(),
    ]
}
