//! # Store Module
//!
//! Local persistence for channels and everything imported from them, backed
//! by libsql.
//!
//! ## Key Components
//!
//! - [`Store`]: connection wrapper with channel provisioning, read helpers and
//!   the transactional merge
//! - [`ChannelStore`]: the slice of the store the orchestrator depends on
//! - [`MergeOutcome`]: what a single merge changed
//!
//! A merge runs in one transaction and writes the channel cursor last, so a
//! failed merge never advances the cursor. Unique-constraint races are
//! retried once.

mod error;
mod merge;
mod schema;

pub use error::DbError;
pub use merge::MergeOutcome;
pub use schema::TABLE_NAMES;

use crate::auth::AuthParams;
use crate::channel::{Channel, ChannelOptions, Cursor, NewChannel};
use crate::error::{Error, Result};
use crate::normalize::NormalizedVideo;
use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Row, Rows, params};
use serde_json::Value;
use std::future::Future;
use tracing::{debug, instrument, warn};

/// The store operations a channel run needs
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// Load a channel with its last committed cursor
    async fn load_channel(&self, id: i64) -> Result<Channel>;

    /// Ids of all channels, in a stable order
    async fn channel_ids(&self) -> Result<Vec<i64>>;

    /// Merge one video and advance the cursor in the same transaction
    async fn merge_item(
        &self,
        channel_id: i64,
        video: &NormalizedVideo,
        cursor: &Cursor,
    ) -> Result<MergeOutcome>;

    /// Persist a cursor without merging anything
    async fn save_cursor(&self, channel_id: i64, cursor: &Cursor) -> Result<()>;
}

/// A video row
#[derive(Debug, Clone, PartialEq)]
pub struct StoredVideo {
    pub id: i64,
    pub channel_id: i64,
    pub extern_id: String,
    pub title: String,
    pub poster: Option<String>,
    pub duration: Option<i64>,
    /// RFC 3339 timestamp
    pub published: Option<String>,
    /// `published` is the crawl time standing in for an unparseable value
    pub published_estimated: bool,
    pub created: i64,
    pub updated: i64,
}

/// A rendition row
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSource {
    pub id: i64,
    pub extern_id: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub fps: Option<i64>,
    pub size: Option<i64>,
    pub mime: Option<String>,
    pub url: String,
}

const CHANNEL_COLUMNS: &str = "id, extern_id, name, url, platform, auth, options, cursor";

/// Database manager for channels and imported videos
#[derive(Clone)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Create a new store, initializing the schema
    #[instrument(skip(conn))]
    pub async fn new(conn: Connection) -> std::result::Result<Self, DbError> {
        schema::initialize_schema(&conn).await?;

        Ok(Self { conn })
    }

    /// Open (or create) a local database file
    pub async fn new_from_path(path: &str) -> std::result::Result<Self, DbError> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DbError::Connection(format!("Failed to open database: {}", e)))?;

        let conn = db
            .connect()
            .map_err(|e| DbError::Connection(format!("Failed to connect to database: {}", e)))?;

        Self::new(conn).await
    }

    /// Execute a custom query with parameters
    pub async fn execute_query<P>(&self, sql: &str, params: P) -> std::result::Result<Rows, DbError>
    where
        P: libsql::params::IntoParams,
    {
        self.conn
            .query(sql, params)
            .await
            .map_err(|e| DbError::Query(format!("Failed to execute query: {}", e)))
    }

    /// Register a channel, returning its id
    #[instrument(skip(self, channel), fields(extern_id = %channel.extern_id))]
    pub async fn add_channel(&self, channel: &NewChannel) -> Result<i64> {
        let now = Utc::now().timestamp();
        self.conn
            .execute(
                "INSERT INTO channels (extern_id, name, url, platform, auth, options, cursor, created, updated)
                 VALUES (?, ?, ?, ?, ?, ?, NULL, ?, ?)",
                params![
                    channel.extern_id.as_str(),
                    channel.name.as_str(),
                    channel.url.as_str(),
                    channel.platform.as_str(),
                    channel.auth.to_json()?,
                    channel.options.to_json()?,
                    now,
                    now,
                ],
            )
            .await
            .map_err(|e| DbError::query("Failed to add channel", e))?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Get a channel by id
    pub async fn get_channel(&self, id: i64) -> Result<Option<Channel>> {
        let sql = format!("SELECT {} FROM channels WHERE id = ?", CHANNEL_COLUMNS);
        self.query_channel(&sql, params![id]).await
    }

    /// Get a channel by id, or by extern_id when `key` is not a number
    pub async fn find_channel(&self, key: &str) -> Result<Option<Channel>> {
        if let Ok(id) = key.parse::<i64>() {
            if let Some(channel) = self.get_channel(id).await? {
                return Ok(Some(channel));
            }
        }
        let sql = format!("SELECT {} FROM channels WHERE extern_id = ?", CHANNEL_COLUMNS);
        self.query_channel(&sql, params![key]).await
    }

    /// All channels, ordered by id
    #[instrument(skip(self))]
    pub async fn list_channels(&self) -> Result<Vec<Channel>> {
        let sql = format!("SELECT {} FROM channels ORDER BY id", CHANNEL_COLUMNS);
        let mut rows = self
            .conn
            .query(&sql, params![])
            .await
            .map_err(|e| DbError::Query(format!("Failed to list channels: {}", e)))?;

        let mut channels = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DbError::Data(format!("Failed to read channels: {}", e)))?
        {
            channels.push(row_to_channel(&row)?);
        }
        Ok(channels)
    }

    /// Replace a channel's crawl options
    pub async fn set_options(&self, id: i64, options: &ChannelOptions) -> Result<()> {
        self.update_channel_column(id, "options", options.to_json()?).await
    }

    /// Replace a channel's authentication parameters
    pub async fn set_auth(&self, id: i64, auth: &AuthParams) -> Result<()> {
        self.update_channel_column(id, "auth", auth.to_json()?).await
    }

    /// Forget a channel's progress so the next run starts from scratch
    pub async fn reset_cursor(&self, id: i64) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE channels SET cursor = NULL, updated = ? WHERE id = ?",
                params![Utc::now().timestamp(), id],
            )
            .await
            .map_err(|e| DbError::query("Failed to reset cursor", e))?;
        if changed == 0 {
            return Err(DbError::NotFound(format!("channel {}", id)).into());
        }
        Ok(())
    }

    /// Videos of a channel, ordered by id
    pub async fn list_videos(&self, channel_id: i64) -> std::result::Result<Vec<StoredVideo>, DbError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, channel_id, extern_id, title, poster, duration, published,
                        published_estimated, created, updated
                 FROM videos WHERE channel_id = ? ORDER BY id",
                params![channel_id],
            )
            .await
            .map_err(|e| DbError::Query(format!("Failed to list videos: {}", e)))?;

        let mut videos = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DbError::Data(format!("Failed to read videos: {}", e)))?
        {
            let get = |e: libsql::Error| DbError::Data(format!("Failed to read video: {}", e));
            videos.push(StoredVideo {
                id: row.get(0).map_err(get)?,
                channel_id: row.get(1).map_err(get)?,
                extern_id: row.get(2).map_err(get)?,
                title: row.get(3).map_err(get)?,
                poster: row.get(4).map_err(get)?,
                duration: row.get(5).map_err(get)?,
                published: row.get(6).map_err(get)?,
                published_estimated: row.get::<i64>(7).map_err(get)? != 0,
                created: row.get(8).map_err(get)?,
                updated: row.get(9).map_err(get)?,
            });
        }
        Ok(videos)
    }

    /// Tag names of a video, sorted case-insensitively
    pub async fn video_tags(&self, video_id: i64) -> std::result::Result<Vec<String>, DbError> {
        let mut rows = self
            .conn
            .query(
                "SELECT t.name FROM video_tags vt JOIN tags t ON t.id = vt.tag_id
                 WHERE vt.video_id = ? ORDER BY t.name",
                params![video_id],
            )
            .await
            .map_err(|e| DbError::Query(format!("Failed to get video tags: {}", e)))?;

        let mut tags = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DbError::Data(format!("Failed to read video tags: {}", e)))?
        {
            tags.push(
                row.get(0)
                    .map_err(|e| DbError::Data(format!("Failed to get tag name: {}", e)))?,
            );
        }
        Ok(tags)
    }

    /// Renditions of a video, ordered by id
    pub async fn video_sources(&self, video_id: i64) -> std::result::Result<Vec<StoredSource>, DbError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, extern_id, width, height, fps, size, mime, url
                 FROM sources WHERE video_id = ? ORDER BY id",
                params![video_id],
            )
            .await
            .map_err(|e| DbError::Query(format!("Failed to get sources: {}", e)))?;

        let mut sources = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DbError::Data(format!("Failed to read sources: {}", e)))?
        {
            let get = |e: libsql::Error| DbError::Data(format!("Failed to read source: {}", e));
            sources.push(StoredSource {
                id: row.get(0).map_err(get)?,
                extern_id: row.get(1).map_err(get)?,
                width: row.get(2).map_err(get)?,
                height: row.get(3).map_err(get)?,
                fps: row.get(4).map_err(get)?,
                size: row.get(5).map_err(get)?,
                mime: row.get(6).map_err(get)?,
                url: row.get(7).map_err(get)?,
            });
        }
        Ok(sources)
    }

    /// Archived raw payload of a video
    pub async fn video_meta(&self, video_id: i64) -> std::result::Result<Option<Value>, DbError> {
        let mut rows = self
            .conn
            .query(
                "SELECT metadata FROM video_meta WHERE video_id = ?",
                params![video_id],
            )
            .await
            .map_err(|e| DbError::Query(format!("Failed to get video metadata: {}", e)))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let raw: String = row
                    .get(0)
                    .map_err(|e| DbError::Data(format!("Failed to get metadata: {}", e)))?;
                let value = serde_json::from_str(&raw)
                    .map_err(|e| DbError::Data(format!("Invalid archived metadata: {}", e)))?;
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DbError::Data(format!("Failed to get video metadata: {}", e))),
        }
    }

    /// Merge one video, optionally advancing the channel cursor in the same
    /// transaction. A unique-constraint conflict is retried once.
    #[instrument(skip(self, video, cursor), fields(extern_id = %video.extern_id))]
    pub async fn merge(
        &self,
        channel_id: i64,
        video: &NormalizedVideo,
        cursor: Option<&Cursor>,
    ) -> std::result::Result<MergeOutcome, DbError> {
        retry_conflict(|| self.merge_once(channel_id, video, cursor)).await
    }

    async fn merge_once(
        &self,
        channel_id: i64,
        video: &NormalizedVideo,
        cursor: Option<&Cursor>,
    ) -> std::result::Result<MergeOutcome, DbError> {
        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| DbError::Transaction(format!("Failed to start transaction: {}", e)))?;

        match merge::merge_video(&tx, channel_id, video, cursor).await {
            Ok(outcome) => {
                tx.commit()
                    .await
                    .map_err(|e| DbError::Transaction(format!("Failed to commit transaction: {}", e)))?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!("Failed to roll back merge: {}", rollback);
                }
                Err(e)
            }
        }
    }

    async fn query_channel<P>(&self, sql: &str, params: P) -> Result<Option<Channel>>
    where
        P: libsql::params::IntoParams,
    {
        let mut rows = self
            .conn
            .query(sql, params)
            .await
            .map_err(|e| DbError::Query(format!("Failed to get channel: {}", e)))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_channel(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DbError::Data(format!("Failed to get channel: {}", e)).into()),
        }
    }

    async fn update_channel_column(&self, id: i64, column: &str, value: String) -> Result<()> {
        let sql = format!("UPDATE channels SET {} = ?, updated = ? WHERE id = ?", column);
        let changed = self
            .conn
            .execute(&sql, params![value, Utc::now().timestamp(), id])
            .await
            .map_err(|e| DbError::query("Failed to update channel", e))?;
        if changed == 0 {
            return Err(DbError::NotFound(format!("channel {}", id)).into());
        }
        debug!(channel = id, "Updated channel {}", column);
        Ok(())
    }
}

/// Run `op`, and run it once more if it hit a unique-constraint conflict.
/// The second run reselects, so it sees the row the other writer committed.
async fn retry_conflict<T, F, Fut>(mut op: F) -> std::result::Result<T, DbError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, DbError>>,
{
    match op().await {
        Err(DbError::Conflict(msg)) => {
            warn!("Merge conflict ({}), retrying", msg);
            op().await
        }
        result => result,
    }
}

// Stored JSON that no longer parses is a configuration problem, not a
// database one, so those errors keep their `Config` kind.
fn row_to_channel(row: &Row) -> Result<Channel> {
    let get = |e: libsql::Error| Error::from(DbError::Data(format!("Failed to read channel: {}", e)));

    let platform: String = row.get(4).map_err(get)?;
    let auth: String = row.get(5).map_err(get)?;
    let options: String = row.get(6).map_err(get)?;
    let cursor: Option<String> = row.get(7).map_err(get)?;

    Ok(Channel {
        id: row.get(0).map_err(get)?,
        extern_id: row.get(1).map_err(get)?,
        name: row.get(2).map_err(get)?,
        url: row.get(3).map_err(get)?,
        platform: platform.parse()?,
        auth: AuthParams::from_json(&auth)?,
        options: ChannelOptions::from_json(&options)?,
        cursor: cursor.as_deref().map(Cursor::from_json).transpose()?,
    })
}

#[async_trait]
impl ChannelStore for Store {
    async fn load_channel(&self, id: i64) -> Result<Channel> {
        self.get_channel(id)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("channel {}", id)).into())
    }

    async fn channel_ids(&self) -> Result<Vec<i64>> {
        let mut rows = self
            .conn
            .query("SELECT id FROM channels ORDER BY id", params![])
            .await
            .map_err(|e| DbError::Query(format!("Failed to list channels: {}", e)))?;

        let mut ids = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DbError::Data(format!("Failed to read channel ids: {}", e)))?
        {
            ids.push(
                row.get(0)
                    .map_err(|e| DbError::Data(format!("Failed to get channel id: {}", e)))?,
            );
        }
        Ok(ids)
    }

    async fn merge_item(
        &self,
        channel_id: i64,
        video: &NormalizedVideo,
        cursor: &Cursor,
    ) -> Result<MergeOutcome> {
        Ok(self.merge(channel_id, video, Some(cursor)).await?)
    }

    async fn save_cursor(&self, channel_id: i64, cursor: &Cursor) -> Result<()> {
        merge::save_cursor(&self.conn, channel_id, cursor, Utc::now().timestamp()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Platform, Whitelist};
    use crate::normalize::{NormalizedSource, Published};
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;

    async fn setup_test_db() -> std::result::Result<(Store, tempfile::TempDir), DbError> {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();

        let store = Store::new_from_path(&db_path).await?;

        Ok((store, temp_dir))
    }

    fn new_channel(extern_id: &str) -> NewChannel {
        NewChannel {
            extern_id: extern_id.to_string(),
            name: format!("Channel {}", extern_id),
            url: "https://site/".to_string(),
            platform: Platform::Timcast,
            auth: AuthParams::None,
            options: ChannelOptions {
                whitelist: Whitelist::new(["^https://site/a/"]).unwrap(),
                ..ChannelOptions::default()
            },
        }
    }

    fn video(extern_id: &str, tags: &[&str]) -> NormalizedVideo {
        NormalizedVideo {
            extern_id: extern_id.to_string(),
            title: "Some Title".to_string(),
            poster: Some("https://img/p.jpg".to_string()),
            duration: Some(60),
            published: None,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            sources: vec![NormalizedSource {
                extern_id: Some("mp4-720".to_string()),
                width: Some(1280),
                height: Some(720),
                fps: None,
                size: Some(1000),
                mime: Some("video/mp4".to_string()),
                url: format!("https://cdn/{}-720.mp4", extern_id),
                original: json!({"url": format!("https://cdn/{}-720.mp4", extern_id)}),
            }],
            original: json!({"title": "some title", "id": extern_id}),
        }
    }

    #[tokio::test]
    async fn test_database_initialization() {
        let (store, _temp_dir) = setup_test_db().await.unwrap();

        let mut result = store
            .execute_query(
                "SELECT name FROM sqlite_master WHERE type='table' ORDER BY name",
                params![],
            )
            .await
            .unwrap();

        let mut tables = Vec::new();
        while let Some(row) = result.next().await.unwrap() {
            let table_name: String = row.get(0).unwrap();
            tables.push(table_name);
        }

        for name in TABLE_NAMES {
            assert!(tables.contains(&name.to_string()), "missing table {}", name);
        }
    }

    #[tokio::test]
    async fn test_add_and_get_channel() {
        let (store, _temp_dir) = setup_test_db().await.unwrap();

        let id = store.add_channel(&new_channel("c1")).await.unwrap();
        assert!(id > 0);

        let channel = store.get_channel(id).await.unwrap().unwrap();
        assert_eq!(channel.extern_id, "c1");
        assert_eq!(channel.platform, Platform::Timcast);
        assert_eq!(channel.options.whitelist.len(), 1);
        assert_eq!(channel.cursor, None);

        let found = store.find_channel("c1").await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert!(store.find_channel("nope").await.unwrap().is_none());

        // extern_id is globally unique
        let err = store.add_channel(&new_channel("c1")).await.unwrap_err();
        assert!(matches!(err, Error::StorageConflict(_)));
        assert_eq!(store.list_channels().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_set_options_and_reset_cursor() {
        let (store, _temp_dir) = setup_test_db().await.unwrap();
        let id = store.add_channel(&new_channel("c1")).await.unwrap();

        let options = ChannelOptions {
            limit: Some(5),
            ..ChannelOptions::default()
        };
        store.set_options(id, &options).await.unwrap();
        store.save_cursor(id, &Cursor::Count { count: 4 }).await.unwrap();

        let channel = store.load_channel(id).await.unwrap();
        assert_eq!(channel.options.limit, Some(5));
        assert_eq!(channel.cursor, Some(Cursor::Count { count: 4 }));

        store.reset_cursor(id).await.unwrap();
        assert_eq!(store.load_channel(id).await.unwrap().cursor, None);

        assert!(store.reset_cursor(999).await.is_err());
        assert!(store.load_channel(999).await.is_err());
    }

    #[tokio::test]
    async fn test_merge_is_idempotent() {
        let (store, _temp_dir) = setup_test_db().await.unwrap();
        let id = store.add_channel(&new_channel("c1")).await.unwrap();
        let v = video("v1", &["news", "politics"]);

        let first = store.merge(id, &v, Some(&Cursor::Count { count: 1 })).await.unwrap();
        assert!(first.created);
        assert!(first.archived);
        assert_eq!(first.tags_added, 2);
        assert_eq!(first.sources_created, 1);

        let before = store.list_videos(id).await.unwrap();
        let second = store.merge(id, &v, Some(&Cursor::Count { count: 1 })).await.unwrap();
        assert!(!second.created);
        assert!(second.is_noop());
        assert_eq!(second.video_id, first.video_id);

        assert_eq!(store.list_videos(id).await.unwrap(), before);
        assert_eq!(store.video_sources(first.video_id).await.unwrap().len(), 1);
        assert_eq!(
            store.video_meta(first.video_id).await.unwrap(),
            Some(v.original.clone())
        );
    }

    #[tokio::test]
    async fn test_same_extern_id_updates_in_place() {
        let (store, _temp_dir) = setup_test_db().await.unwrap();
        let id = store.add_channel(&new_channel("c1")).await.unwrap();

        store.merge(id, &video("v1", &[]), None).await.unwrap();
        let mut renamed = video("v1", &[]);
        renamed.title = "Other Title".to_string();
        let outcome = store.merge(id, &renamed, None).await.unwrap();

        assert!(!outcome.created);
        assert!(outcome.updated);
        let videos = store.list_videos(id).await.unwrap();
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].title, "Other Title");

        // Same extern_id in another channel is a different video
        let other = store.add_channel(&new_channel("c2")).await.unwrap();
        assert!(store.merge(other, &video("v1", &[]), None).await.unwrap().created);
    }

    #[tokio::test]
    async fn test_tag_merge_applies_only_the_delta() {
        let (store, _temp_dir) = setup_test_db().await.unwrap();
        let id = store.add_channel(&new_channel("c1")).await.unwrap();

        let first = store.merge(id, &video("v1", &["a", "b"]), None).await.unwrap();
        let outcome = store.merge(id, &video("v1", &["B", "c"]), None).await.unwrap();

        assert_eq!(outcome.tags_added, 1);
        assert_eq!(outcome.tags_removed, 1);
        assert_eq!(store.video_tags(first.video_id).await.unwrap(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_source_upsert_keys() {
        let (store, _temp_dir) = setup_test_db().await.unwrap();
        let id = store.add_channel(&new_channel("c1")).await.unwrap();
        let mut v = video("v1", &[]);
        let video_id = store.merge(id, &v, None).await.unwrap().video_id;

        // Same extern_id, new URL: updated in place
        v.sources[0].url = "https://cdn/v1-720-new.mp4".to_string();
        let outcome = store.merge(id, &v, None).await.unwrap();
        assert_eq!((outcome.sources_created, outcome.sources_updated), (0, 1));

        // Same URL, no extern_id: still the same row
        v.sources[0].extern_id = None;
        v.sources[0].size = Some(2000);
        let outcome = store.merge(id, &v, None).await.unwrap();
        assert_eq!((outcome.sources_created, outcome.sources_updated), (0, 1));

        let sources = store.video_sources(video_id).await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].url, "https://cdn/v1-720-new.mp4");
        assert_eq!(sources[0].size, Some(2000));
    }

    #[tokio::test]
    async fn test_failed_merge_does_not_advance_cursor() {
        let (store, _temp_dir) = setup_test_db().await.unwrap();
        let id = store.add_channel(&new_channel("c1")).await.unwrap();
        store.merge(id, &video("v1", &[]), Some(&Cursor::Count { count: 1 })).await.unwrap();

        store
            .conn
            .execute(
                "CREATE TRIGGER reject_bad BEFORE INSERT ON sources
                 WHEN NEW.url LIKE '%bad%'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END",
                params![],
            )
            .await
            .unwrap();

        let err = store
            .merge(id, &video("bad", &["x"]), Some(&Cursor::Count { count: 2 }))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Query(_)));

        let channel = store.load_channel(id).await.unwrap();
        assert_eq!(channel.cursor, Some(Cursor::Count { count: 1 }));
        // The video row from the failed merge was rolled back too
        assert_eq!(store.list_videos(id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_archive_failure_does_not_block_merge() {
        let (store, _temp_dir) = setup_test_db().await.unwrap();
        let id = store.add_channel(&new_channel("c1")).await.unwrap();

        store
            .conn
            .execute(
                "CREATE TRIGGER reject_meta BEFORE INSERT ON video_meta
                 BEGIN SELECT RAISE(ABORT, 'archive offline'); END",
                params![],
            )
            .await
            .unwrap();

        let outcome = store
            .merge(id, &video("v1", &["a"]), Some(&Cursor::Count { count: 1 }))
            .await
            .unwrap();
        assert!(outcome.created);
        assert!(!outcome.archived);
        assert_eq!(store.video_meta(outcome.video_id).await.unwrap(), None);
        assert_eq!(store.video_sources(outcome.video_id).await.unwrap().len(), 1);
        assert_eq!(
            store.load_channel(id).await.unwrap().cursor,
            Some(Cursor::Count { count: 1 })
        );
    }

    #[tokio::test]
    async fn test_unique_violation_is_a_conflict() {
        let (store, _temp_dir) = setup_test_db().await.unwrap();
        let id = store.add_channel(&new_channel("c1")).await.unwrap();
        store.merge(id, &video("v1", &[]), None).await.unwrap();

        let err = store
            .conn
            .execute(
                "INSERT INTO videos (channel_id, extern_id, title, created, updated)
                 VALUES (?, 'v1', 'Duplicate', 0, 0)",
                params![id],
            )
            .await
            .map_err(|e| DbError::query("Failed to add video", e))
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_conflict_is_retried_against_the_committed_row() {
        let (store, _temp_dir) = setup_test_db().await.unwrap();
        let id = store.add_channel(&new_channel("c1")).await.unwrap();
        let v = video("v1", &["news"]);
        let attempts = AtomicU32::new(0);

        let (store, v, attempts) = (&store, &v, &attempts);
        let outcome = retry_conflict(|| async move {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                // Another writer commits the same video first
                store.merge_once(id, v, None).await.unwrap();
                return Err(DbError::Conflict("videos.channel_id, videos.extern_id".into()));
            }
            store.merge_once(id, v, Some(&Cursor::Count { count: 1 })).await
        })
        .await
        .unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert!(!outcome.created);
        assert_eq!(store.list_videos(id).await.unwrap().len(), 1);
        assert_eq!(
            store.load_channel(id).await.unwrap().cursor,
            Some(Cursor::Count { count: 1 })
        );
    }

    #[tokio::test]
    async fn test_conflict_is_retried_only_once() {
        let attempts = AtomicU32::new(0);
        let attempts = &attempts;
        let result: std::result::Result<(), DbError> = retry_conflict(|| async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(DbError::Conflict("tags.name".into()))
        })
        .await;

        assert!(matches!(result, Err(DbError::Conflict(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_row_read_errors_are_reported() {
        let (store, _temp_dir) = setup_test_db().await.unwrap();
        let id = store.add_channel(&new_channel("c1")).await.unwrap();

        // Replace the table with a view whose rows fail to evaluate
        for sql in [
            "PRAGMA foreign_keys = OFF",
            "DROP TABLE videos",
            "CREATE VIEW videos AS
             SELECT 1 AS id, 1 AS channel_id, 'v1' AS extern_id,
                    abs(-9223372036854775808) AS title, NULL AS poster, NULL AS duration,
                    NULL AS published, 0 AS published_estimated, 0 AS created, 0 AS updated",
        ] {
            store.conn.execute(sql, params![]).await.unwrap();
        }

        assert!(store.list_videos(id).await.is_err());
    }

    #[tokio::test]
    async fn test_reported_time_replaces_estimate() {
        let (store, _temp_dir) = setup_test_db().await.unwrap();
        let id = store.add_channel(&new_channel("c1")).await.unwrap();
        let reported = Utc.with_ymd_and_hms(2022, 7, 22, 2, 45, 35).unwrap();

        let mut v = video("v1", &[]);
        v.published = Some(Published::Estimated(Utc::now()));
        store.merge(id, &v, None).await.unwrap();
        assert!(store.list_videos(id).await.unwrap()[0].published_estimated);

        // Another estimate leaves the row alone
        v.published = Some(Published::Estimated(Utc::now() + chrono::Duration::hours(1)));
        assert!(store.merge(id, &v, None).await.unwrap().is_noop());

        v.published = Some(Published::Reported(reported));
        assert!(store.merge(id, &v, None).await.unwrap().updated);
        let stored = &store.list_videos(id).await.unwrap()[0];
        assert_eq!(stored.published.as_deref(), Some(reported.to_rfc3339().as_str()));
        assert!(!stored.published_estimated);

        // A reported time is never overwritten
        v.published = Some(Published::Reported(reported + chrono::Duration::days(1)));
        assert!(!store.merge(id, &v, None).await.unwrap().updated);
        v.published = Some(Published::Estimated(Utc::now()));
        assert!(!store.merge(id, &v, None).await.unwrap().updated);
        let stored = &store.list_videos(id).await.unwrap()[0];
        assert_eq!(stored.published.as_deref(), Some(reported.to_rfc3339().as_str()));
    }
}
