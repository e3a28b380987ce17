//! Merge of one normalized video into the store.
//!
//! Everything here runs on the caller's transaction. The steps are, in order:
//! video row, tag delta, renditions, archived payloads, channel cursor. Any
//! error before the cursor step leaves the cursor where it was once the
//! caller rolls back.

use super::error::DbError;
use crate::channel::Cursor;
use crate::normalize::{NormalizedSource, NormalizedVideo};
use chrono::Utc;
use libsql::{Connection, params};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// What a merge changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Row id of the merged video
    pub video_id: i64,

    /// The video row was inserted by this merge
    pub created: bool,

    /// Mutable fields of an existing video changed
    pub updated: bool,

    pub tags_added: usize,
    pub tags_removed: usize,
    pub sources_created: usize,
    pub sources_updated: usize,

    /// Archived payloads were written; `false` means archiving failed and was skipped
    pub archived: bool,
}

impl MergeOutcome {
    /// Nothing observable changed
    pub fn is_noop(&self) -> bool {
        !self.created
            && !self.updated
            && self.tags_added == 0
            && self.tags_removed == 0
            && self.sources_created == 0
            && self.sources_updated == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Created,
    Updated,
    Unchanged,
}

/// Merge `video` into `channel_id` and, when given, persist `cursor` as the
/// last statement.
pub(super) async fn merge_video(
    conn: &Connection,
    channel_id: i64,
    video: &NormalizedVideo,
    cursor: Option<&Cursor>,
) -> Result<MergeOutcome, DbError> {
    let now = Utc::now().timestamp();

    let (video_id, change) = upsert_video(conn, channel_id, video, now).await?;
    let (tags_added, tags_removed) = reconcile_tags(conn, video_id, &video.tags).await?;

    let mut outcome = MergeOutcome {
        video_id,
        created: change == Change::Created,
        updated: change == Change::Updated,
        tags_added,
        tags_removed,
        ..MergeOutcome::default()
    };

    let mut archived_sources = Vec::with_capacity(video.sources.len());
    for source in &video.sources {
        let (source_id, change) = upsert_source(conn, video_id, source).await?;
        match change {
            Change::Created => outcome.sources_created += 1,
            Change::Updated => outcome.sources_updated += 1,
            Change::Unchanged => {}
        }
        archived_sources.push((source_id, &source.original));
    }

    outcome.archived = archive(conn, video_id, &video.original, &archived_sources, now).await?;

    if let Some(cursor) = cursor {
        save_cursor(conn, channel_id, cursor, now).await?;
    }

    debug!(
        video_id,
        created = outcome.created,
        tags_added,
        tags_removed,
        sources_created = outcome.sources_created,
        "Merged video {}",
        video.extern_id
    );
    Ok(outcome)
}

/// Persist the channel cursor; a no-op when it is unchanged
pub(super) async fn save_cursor(
    conn: &Connection,
    channel_id: i64,
    cursor: &Cursor,
    now: i64,
) -> Result<(), DbError> {
    let json = cursor
        .to_json()
        .map_err(|e| DbError::Data(format!("Failed to serialize cursor: {}", e)))?;
    conn.execute(
        "UPDATE channels SET cursor = ?1, updated = ?2 WHERE id = ?3 AND cursor IS NOT ?1",
        params![json, now, channel_id],
    )
    .await
    .map_err(|e| DbError::query("Failed to save cursor", e))?;
    Ok(())
}

async fn query_id<P>(conn: &Connection, sql: &str, params: P, context: &str) -> Result<Option<i64>, DbError>
where
    P: libsql::params::IntoParams,
{
    let mut rows = conn
        .query(sql, params)
        .await
        .map_err(|e| DbError::query(context, e))?;
    match rows.next().await {
        Ok(Some(row)) => Ok(Some(
            row.get(0)
                .map_err(|e| DbError::Data(format!("{}: {}", context, e)))?,
        )),
        Ok(None) => Ok(None),
        Err(e) => Err(DbError::Data(format!("{}: {}", context, e))),
    }
}

async fn upsert_video(
    conn: &Connection,
    channel_id: i64,
    video: &NormalizedVideo,
    now: i64,
) -> Result<(i64, Change), DbError> {
    let published = video.published.map(|p| p.time().to_rfc3339());
    let estimated = i64::from(video.published.is_some_and(|p| p.is_estimated()));
    let existing = query_id(
        conn,
        "SELECT id FROM videos WHERE channel_id = ? AND extern_id = ?",
        params![channel_id, video.extern_id.as_str()],
        "Failed to look up video",
    )
    .await?;

    match existing {
        None => {
            conn.execute(
                "INSERT INTO videos (channel_id, extern_id, title, poster, duration, published,
                                     published_estimated, created, updated)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    channel_id,
                    video.extern_id.as_str(),
                    video.title.as_str(),
                    video.poster.clone(),
                    video.duration,
                    published,
                    estimated,
                    now,
                    now,
                ],
            )
            .await
            .map_err(|e| DbError::query("Failed to add video", e))?;
            Ok((conn.last_insert_rowid(), Change::Created))
        }
        Some(id) => {
            // A stored publication time is only replaced when it was a fallback
            // and the platform now reports one; estimates never churn.
            let changed = conn
                .execute(
                    "UPDATE videos SET title = ?1, poster = ?2, duration = ?3,
                         published = CASE WHEN ?4 IS NOT NULL
                                           AND (published IS NULL OR (published_estimated AND NOT ?5))
                                          THEN ?4 ELSE published END,
                         published_estimated = CASE WHEN ?4 IS NOT NULL
                                           AND (published IS NULL OR (published_estimated AND NOT ?5))
                                          THEN ?5 ELSE published_estimated END,
                         updated = ?6
                     WHERE id = ?7
                       AND (title IS NOT ?1 OR poster IS NOT ?2 OR duration IS NOT ?3
                            OR (?4 IS NOT NULL
                                AND (published IS NULL OR (published_estimated AND NOT ?5))))",
                    params![
                        video.title.as_str(),
                        video.poster.clone(),
                        video.duration,
                        published,
                        estimated,
                        now,
                        id,
                    ],
                )
                .await
                .map_err(|e| DbError::query("Failed to update video", e))?;
            let change = if changed > 0 {
                Change::Updated
            } else {
                Change::Unchanged
            };
            Ok((id, change))
        }
    }
}

async fn reconcile_tags(
    conn: &Connection,
    video_id: i64,
    tags: &[String],
) -> Result<(usize, usize), DbError> {
    let mut existing: HashMap<String, i64> = HashMap::new();
    {
        let mut rows = conn
            .query(
                "SELECT t.id, t.name FROM video_tags vt JOIN tags t ON t.id = vt.tag_id
                 WHERE vt.video_id = ?",
                params![video_id],
            )
            .await
            .map_err(|e| DbError::query("Failed to get video tags", e))?;
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DbError::Data(format!("Failed to read video tags: {}", e)))?
        {
            let id: i64 = row
                .get(0)
                .map_err(|e| DbError::Data(format!("Failed to get tag id: {}", e)))?;
            let name: String = row
                .get(1)
                .map_err(|e| DbError::Data(format!("Failed to get tag name: {}", e)))?;
            existing.insert(name.to_lowercase(), id);
        }
    }

    let mut desired: Vec<&str> = Vec::new();
    let mut desired_keys = HashSet::new();
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && desired_keys.insert(tag.to_lowercase()) {
            desired.push(tag);
        }
    }

    let mut removed = 0;
    for (key, tag_id) in &existing {
        if desired_keys.contains(key) {
            continue;
        }
        removed += conn
            .execute(
                "DELETE FROM video_tags WHERE video_id = ? AND tag_id = ?",
                params![video_id, *tag_id],
            )
            .await
            .map_err(|e| DbError::query("Failed to remove tag", e))? as usize;
    }

    let mut added = 0;
    for tag in desired {
        if existing.contains_key(&tag.to_lowercase()) {
            continue;
        }
        let tag_id = ensure_tag(conn, tag).await?;
        added += conn
            .execute(
                "INSERT INTO video_tags (video_id, tag_id) VALUES (?, ?) ON CONFLICT DO NOTHING",
                params![video_id, tag_id],
            )
            .await
            .map_err(|e| DbError::query("Failed to add tag", e))? as usize;
    }

    Ok((added, removed))
}

async fn ensure_tag(conn: &Connection, name: &str) -> Result<i64, DbError> {
    conn.execute(
        "INSERT INTO tags (name) VALUES (?) ON CONFLICT(name) DO NOTHING",
        params![name],
    )
    .await
    .map_err(|e| DbError::query("Failed to create tag", e))?;

    query_id(
        conn,
        "SELECT id FROM tags WHERE name = ?",
        params![name],
        "Failed to look up tag",
    )
    .await?
    .ok_or_else(|| DbError::Data(format!("Tag '{}' vanished after insert", name)))
}

#[derive(Debug, PartialEq)]
struct SourceRow {
    id: i64,
    extern_id: Option<String>,
    width: Option<i64>,
    height: Option<i64>,
    fps: Option<i64>,
    size: Option<i64>,
    mime: Option<String>,
    url: String,
}

impl SourceRow {
    fn matches(&self, source: &NormalizedSource) -> bool {
        self.extern_id == source.extern_id
            && self.width == source.width
            && self.height == source.height
            && self.fps == source.fps
            && self.size == source.size
            && self.mime == source.mime
            && self.url == source.url
    }
}

async fn find_source(
    conn: &Connection,
    video_id: i64,
    source: &NormalizedSource,
) -> Result<Option<SourceRow>, DbError> {
    let mut rows = conn
        .query(
            "SELECT id, extern_id, width, height, fps, size, mime, url FROM sources
             WHERE video_id = ?1 AND (extern_id = ?2 OR url = ?3)
             ORDER BY CASE WHEN extern_id = ?2 THEN 0 ELSE 1 END
             LIMIT 1",
            params![video_id, source.extern_id.clone(), source.url.as_str()],
        )
        .await
        .map_err(|e| DbError::query("Failed to look up source", e))?;

    let row = match rows.next().await {
        Ok(Some(row)) => row,
        Ok(None) => return Ok(None),
        Err(e) => return Err(DbError::Data(format!("Failed to look up source: {}", e))),
    };
    let get = |e: libsql::Error| DbError::Data(format!("Failed to read source: {}", e));
    Ok(Some(SourceRow {
        id: row.get(0).map_err(get)?,
        extern_id: row.get(1).map_err(get)?,
        width: row.get(2).map_err(get)?,
        height: row.get(3).map_err(get)?,
        fps: row.get(4).map_err(get)?,
        size: row.get(5).map_err(get)?,
        mime: row.get(6).map_err(get)?,
        url: row.get(7).map_err(get)?,
    }))
}

// A rendition is the same row if either its extern_id or its URL matches.
async fn upsert_source(
    conn: &Connection,
    video_id: i64,
    source: &NormalizedSource,
) -> Result<(i64, Change), DbError> {
    let Some(existing) = find_source(conn, video_id, source).await? else {
        conn.execute(
            "INSERT INTO sources (video_id, extern_id, width, height, fps, size, mime, url)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                video_id,
                source.extern_id.clone(),
                source.width,
                source.height,
                source.fps,
                source.size,
                source.mime.clone(),
                source.url.as_str(),
            ],
        )
        .await
        .map_err(|e| DbError::query("Failed to add source", e))?;
        return Ok((conn.last_insert_rowid(), Change::Created));
    };

    if existing.matches(source) {
        return Ok((existing.id, Change::Unchanged));
    }

    // Matched on extern_id while another row still holds the URL: that row
    // is the stale copy.
    conn.execute(
        "DELETE FROM sources WHERE video_id = ? AND url = ? AND id != ?",
        params![video_id, source.url.as_str(), existing.id],
    )
    .await
    .map_err(|e| DbError::query("Failed to drop stale source", e))?;

    conn.execute(
        "UPDATE sources SET extern_id = ?, width = ?, height = ?, fps = ?, size = ?, mime = ?, url = ?
         WHERE id = ?",
        params![
            source.extern_id.clone(),
            source.width,
            source.height,
            source.fps,
            source.size,
            source.mime.clone(),
            source.url.as_str(),
            existing.id,
        ],
    )
    .await
    .map_err(|e| DbError::query("Failed to update source", e))?;
    Ok((existing.id, Change::Updated))
}

/// Write the raw payloads inside a savepoint. Failure to write them is
/// logged and rolled back to the savepoint; the merge carries on.
async fn archive(
    conn: &Connection,
    video_id: i64,
    original: &Value,
    sources: &[(i64, &Value)],
    now: i64,
) -> Result<bool, DbError> {
    conn.execute("SAVEPOINT archive", params![])
        .await
        .map_err(|e| DbError::Transaction(format!("Failed to open archive savepoint: {}", e)))?;

    let written = match write_archive(conn, video_id, original, sources, now).await {
        Ok(()) => true,
        Err(e) => {
            warn!(video_id, "Failed to archive original payload: {}", e);
            conn.execute("ROLLBACK TO SAVEPOINT archive", params![])
                .await
                .map_err(|e| DbError::Transaction(format!("Failed to roll back archive: {}", e)))?;
            false
        }
    };

    conn.execute("RELEASE SAVEPOINT archive", params![])
        .await
        .map_err(|e| DbError::Transaction(format!("Failed to release archive savepoint: {}", e)))?;
    Ok(written)
}

async fn write_archive(
    conn: &Connection,
    video_id: i64,
    original: &Value,
    sources: &[(i64, &Value)],
    now: i64,
) -> Result<(), DbError> {
    let metadata = serde_json::to_string(original)
        .map_err(|e| DbError::Data(format!("Failed to serialize payload: {}", e)))?;
    conn.execute(
        "INSERT INTO video_meta (video_id, metadata, updated) VALUES (?1, ?2, ?3)
         ON CONFLICT(video_id) DO UPDATE SET metadata = excluded.metadata, updated = excluded.updated
         WHERE video_meta.metadata IS NOT excluded.metadata",
        params![video_id, metadata, now],
    )
    .await
    .map_err(|e| DbError::query("Failed to archive video payload", e))?;

    for (source_id, original) in sources {
        let metadata = serde_json::to_string(original)
            .map_err(|e| DbError::Data(format!("Failed to serialize payload: {}", e)))?;
        conn.execute(
            "INSERT INTO source_meta (source_id, metadata, updated) VALUES (?1, ?2, ?3)
             ON CONFLICT(source_id) DO UPDATE SET metadata = excluded.metadata, updated = excluded.updated
             WHERE source_meta.metadata IS NOT excluded.metadata",
            params![*source_id, metadata, now],
        )
        .await
        .map_err(|e| DbError::query("Failed to archive source payload", e))?;
    }
    Ok(())
}
