//! # Store Schema Module
//!
//! Tables for channels, videos, renditions, tags and archived payloads.
//! The unique constraints here are what make merging safe under repeated
//! and racing runs:
//!
//! - `channels(extern_id)`
//! - `videos(channel_id, extern_id)`
//! - `sources(video_id, extern_id)` and `sources(video_id, url)`
//! - `tags(name)`, case-insensitive
//! - `video_tags(video_id, tag_id)`

use super::error::DbError;
use libsql::{Connection, params};

const TABLES: &[(&str, &str)] = &[
    (
        "channels",
        "CREATE TABLE IF NOT EXISTS channels (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            extern_id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            url TEXT NOT NULL,
            platform TEXT NOT NULL,
            auth TEXT NOT NULL DEFAULT '{\"method\":\"none\"}',
            options TEXT NOT NULL DEFAULT '{}',
            cursor TEXT,
            created INTEGER NOT NULL,
            updated INTEGER NOT NULL
        )",
    ),
    (
        "videos",
        "CREATE TABLE IF NOT EXISTS videos (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            channel_id INTEGER NOT NULL,
            extern_id TEXT NOT NULL,
            title TEXT NOT NULL,
            poster TEXT,
            duration INTEGER,
            published TEXT,
            published_estimated INTEGER NOT NULL DEFAULT 0,
            created INTEGER NOT NULL,
            updated INTEGER NOT NULL,
            UNIQUE (channel_id, extern_id),
            FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE
        )",
    ),
    (
        "sources",
        "CREATE TABLE IF NOT EXISTS sources (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            video_id INTEGER NOT NULL,
            extern_id TEXT,
            width INTEGER,
            height INTEGER,
            fps INTEGER,
            size INTEGER,
            mime TEXT,
            url TEXT NOT NULL,
            UNIQUE (video_id, extern_id),
            UNIQUE (video_id, url),
            FOREIGN KEY (video_id) REFERENCES videos(id) ON DELETE CASCADE
        )",
    ),
    (
        "tags",
        "CREATE TABLE IF NOT EXISTS tags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL COLLATE NOCASE UNIQUE
        )",
    ),
    (
        "video_tags",
        "CREATE TABLE IF NOT EXISTS video_tags (
            video_id INTEGER NOT NULL,
            tag_id INTEGER NOT NULL,
            PRIMARY KEY (video_id, tag_id),
            FOREIGN KEY (video_id) REFERENCES videos(id) ON DELETE CASCADE,
            FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
        )",
    ),
    (
        "video_meta",
        "CREATE TABLE IF NOT EXISTS video_meta (
            video_id INTEGER PRIMARY KEY,
            metadata TEXT NOT NULL,
            updated INTEGER NOT NULL,
            FOREIGN KEY (video_id) REFERENCES videos(id) ON DELETE CASCADE
        )",
    ),
    (
        "source_meta",
        "CREATE TABLE IF NOT EXISTS source_meta (
            source_id INTEGER PRIMARY KEY,
            metadata TEXT NOT NULL,
            updated INTEGER NOT NULL,
            FOREIGN KEY (source_id) REFERENCES sources(id) ON DELETE CASCADE
        )",
    ),
];

/// Table names, in creation order
pub const TABLE_NAMES: [&str; 7] = [
    "channels",
    "videos",
    "sources",
    "tags",
    "video_tags",
    "video_meta",
    "source_meta",
];

/// Initialize the database schema
pub async fn initialize_schema(conn: &Connection) -> Result<(), DbError> {
    conn.execute("PRAGMA foreign_keys = ON", params![])
        .await
        .map_err(|e| DbError::Schema(format!("Failed to enable foreign keys: {}", e)))?;

    for (name, ddl) in TABLES {
        conn.execute(ddl, params![])
            .await
            .map_err(|e| DbError::Schema(format!("Failed to create {} table: {}", name, e)))?;
    }

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_videos_channel_id ON videos(channel_id)",
        params![],
    )
    .await
    .map_err(|e| DbError::Schema(format!("Failed to create index on videos: {}", e)))?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_video_tags_tag_id ON video_tags(tag_id)",
        params![],
    )
    .await
    .map_err(|e| DbError::Schema(format!("Failed to create index on video_tags: {}", e)))?;

    Ok(())
}
