//! Embedded player payloads

use super::{NormalizedSource, NormalizedVideo, mime_from_url, parse_published, title_case};
use crate::error::{Error, Result};
use serde_json::Value;
use tracing::debug;

/// Map an embedded player's JSON onto a video.
///
/// `extern_id` is the embed id taken from the frame URL. Renditions come from
/// `ua.mp4`, keyed by height; entries without a URL are skipped.
pub fn from_embed(extern_id: &str, json: Value) -> Result<NormalizedVideo> {
    let title = json
        .get("title")
        .and_then(Value::as_str)
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| Error::MalformedRecord(format!("embed {} has no title", extern_id)))?;

    let poster = json.get("i").and_then(Value::as_str).map(str::to_string);
    let duration = json.get("duration").and_then(as_i64);
    let published = parse_published(json.get("pubDate").and_then(Value::as_str));

    let mut sources = Vec::new();
    if let Some(renditions) = json.pointer("/ua/mp4").and_then(Value::as_object) {
        for (height, props) in renditions {
            let Some(url) = props.get("url").and_then(Value::as_str) else {
                debug!(height = %height, "Skipping rendition without url");
                continue;
            };
            let meta = props.get("meta");
            let field = |name: &str| meta.and_then(|m| m.get(name)).and_then(as_i64);
            sources.push(NormalizedSource {
                extern_id: Some(format!("mp4-{}", height)),
                width: field("w"),
                height: field("h").or_else(|| height.parse().ok()),
                fps: json.get("fps").and_then(as_i64),
                size: field("size"),
                mime: mime_from_url(url).or_else(|| Some("video/mp4".to_string())),
                url: url.to_string(),
                original: props.clone(),
            });
        }
    }

    Ok(NormalizedVideo {
        extern_id: extern_id.to_string(),
        title: title_case(title),
        poster,
        duration,
        published,
        tags: Vec::new(),
        sources,
        original: json,
    })
}

// Players emit numbers both as JSON numbers and as strings.
fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
