//! PeerTube video details (`GET /api/v1/videos/{id}`)

use super::{
    NormalizedSource, NormalizedVideo, dedupe_tags, mime_from_url, parse_published, title_case,
};
use crate::error::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;
use url::Url;

/// Path of the video detail endpoint, relative to the instance root
pub const PEERTUBE_VIDEO_PATH: &str = "/api/v1/videos/";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoDetail {
    uuid: Option<String>,
    #[serde(rename = "shortUUID")]
    short_uuid: Option<String>,
    name: String,
    thumbnail_path: Option<String>,
    preview_path: Option<String>,
    duration: Option<i64>,
    published_at: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    category: Option<Label>,
}

#[derive(Debug, Deserialize)]
struct Label {
    label: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoFile {
    id: Option<i64>,
    resolution: Option<Resolution>,
    fps: Option<i64>,
    size: Option<i64>,
    file_url: String,
}

#[derive(Debug, Deserialize)]
struct Resolution {
    id: Option<i64>,
}

/// Map a PeerTube video detail payload onto a video.
///
/// Relative thumbnail paths are resolved against `base`. Sources come from
/// `files` and from every `streamingPlaylists[].files`.
pub fn from_peertube(base: &Url, json: Value) -> Result<NormalizedVideo> {
    let detail: VideoDetail = serde_json::from_value(json.clone())
        .map_err(|e| Error::MalformedRecord(format!("PeerTube video: {}", e)))?;

    let extern_id = detail
        .uuid
        .or(detail.short_uuid)
        .ok_or_else(|| Error::MalformedRecord(format!("PeerTube video '{}' has no uuid", detail.name)))?;

    let poster = detail
        .thumbnail_path
        .or(detail.preview_path)
        .and_then(|path| base.join(&path).ok())
        .map(String::from);

    let category = detail.category.and_then(|c| c.label);
    let tags = dedupe_tags(detail.tags.into_iter().chain(category));

    let playlist_files = json
        .get("streamingPlaylists")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|playlist| playlist.get("files").and_then(Value::as_array))
        .flatten();
    let files = json
        .get("files")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .chain(playlist_files);

    let mut sources: Vec<NormalizedSource> = Vec::new();
    for file in files {
        let parsed: VideoFile = match serde_json::from_value(file.clone()) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(video = %extern_id, "Skipping malformed file entry: {}", e);
                continue;
            }
        };
        if sources.iter().any(|s| s.url == parsed.file_url) {
            continue;
        }
        sources.push(NormalizedSource {
            extern_id: parsed.id.map(|id| format!("file-{}", id)),
            width: None,
            height: parsed.resolution.and_then(|r| r.id).filter(|h| *h > 0),
            fps: parsed.fps.filter(|f| *f > 0),
            size: parsed.size,
            mime: mime_from_url(&parsed.file_url),
            url: parsed.file_url,
            original: file.clone(),
        });
    }

    Ok(NormalizedVideo {
        extern_id,
        title: title_case(&detail.name),
        poster,
        duration: detail.duration,
        published: parse_published(detail.published_at.as_deref()),
        tags,
        sources,
        original: json,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detail() -> Value {
        json!({
            "uuid": "9c9de5e8-0a1e-484a-b099-e80766180a6d",
            "shortUUID": "kkGMgK9ZtnKfYAgnEtQxbv",
            "name": "weekly roundup",
            "thumbnailPath": "/lazy-static/thumbnails/abc.jpg",
            "duration": 754,
            "publishedAt": "2022-07-22T02:45:35.000Z",
            "tags": ["news", "Weekly"],
            "category": {"id": 11, "label": "News & Politics"},
            "files": [
                {"id": 41, "resolution": {"id": 720, "label": "720p"}, "fps": 30, "size": 123456,
                 "fileUrl": "https://tube.example/static/web-videos/abc-720.mp4"},
                {"resolution": {"id": 0, "label": "Audio"}}
            ],
            "streamingPlaylists": [
                {"id": 7, "files": [
                    {"id": 42, "resolution": {"id": 1080}, "fps": 60, "size": 999,
                     "fileUrl": "https://tube.example/static/streaming-playlists/hls/abc-1080.mp4"}
                ]}
            ]
        })
    }

    #[test]
    fn test_from_peertube() {
        let base = Url::parse("https://tube.example").unwrap();
        let video = from_peertube(&base, detail()).unwrap();

        assert_eq!(video.extern_id, "9c9de5e8-0a1e-484a-b099-e80766180a6d");
        assert_eq!(video.title, "Weekly Roundup");
        assert_eq!(
            video.poster.as_deref(),
            Some("https://tube.example/lazy-static/thumbnails/abc.jpg")
        );
        assert_eq!(video.duration, Some(754));
        assert_eq!(video.tags, vec!["news", "Weekly", "News & Politics"]);

        // The entry without fileUrl is skipped
        assert_eq!(video.sources.len(), 2);
        assert_eq!(video.sources[0].extern_id.as_deref(), Some("file-41"));
        assert_eq!(video.sources[0].height, Some(720));
        assert_eq!(video.sources[1].fps, Some(60));
        assert_eq!(video.sources[1].mime.as_deref(), Some("video/mp4"));
    }

    #[test]
    fn test_from_peertube_missing_name() {
        let base = Url::parse("https://tube.example").unwrap();
        let err = from_peertube(&base, json!({"uuid": "x"})).unwrap_err();
        assert!(matches!(err, Error::MalformedRecord(_)));
    }
}
