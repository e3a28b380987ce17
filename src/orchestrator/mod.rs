//! # Orchestrator Module
//!
//! Runs channel updates: login, crawl, merge every item, commit the final
//! cursor. A run moves `Idle -> Crawling -> {Committed, Failed}`. Failed
//! attempts with a retryable error are retried from the last committed
//! cursor, which is reloaded from the store each time.
//!
//! Batch updates run channels one after another so sessions for the same
//! platform are never interleaved.

use crate::auth::LoginDriver;
use crate::channel::Cursor;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::store::{ChannelStore, MergeOutcome};
use crate::strategy::{CrawlEvent, Registry, StopReason};
use futures::StreamExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, error, info, info_span, instrument};

/// Lifecycle of one channel run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Crawling,
    Committed,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RunState::Idle => "idle",
            RunState::Crawling => "crawling",
            RunState::Committed => "committed",
            RunState::Failed => "failed",
        };
        f.write_str(text)
    }
}

/// Summary of a channel run
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub channel_id: i64,
    pub state: RunState,

    /// Attempt that produced this report, 1-based
    pub attempts: u32,

    /// Items merged
    pub merged: u64,
    pub created: u64,
    pub updated: u64,

    /// Items whose merge changed nothing
    pub unchanged: u64,

    pub stop: Option<StopReason>,

    /// Last committed cursor
    pub cursor: Option<Cursor>,

    /// Why the run failed
    pub error: Option<String>,
}

impl RunReport {
    fn new(channel_id: i64, attempts: u32, cursor: Option<Cursor>) -> Self {
        Self {
            channel_id,
            state: RunState::Idle,
            attempts,
            merged: 0,
            created: 0,
            updated: 0,
            unchanged: 0,
            stop: None,
            cursor,
            error: None,
        }
    }

    fn failed(channel_id: i64, error: &Error) -> Self {
        Self {
            state: RunState::Failed,
            error: Some(error.to_string()),
            ..Self::new(channel_id, 0, None)
        }
    }

    fn record(&mut self, outcome: &MergeOutcome, cursor: Cursor) {
        self.merged += 1;
        if outcome.created {
            self.created += 1;
        } else if outcome.is_noop() {
            self.unchanged += 1;
        } else {
            self.updated += 1;
        }
        self.cursor = Some(cursor);
    }

    fn transition(&mut self, state: RunState) {
        debug!(from = %self.state, to = %state, "Run state");
        self.state = state;
    }
}

/// Drives channel runs against a store
pub struct Orchestrator<S: ChannelStore> {
    store: S,
    registry: Registry,
    retry: RetryPolicy,
}

impl<S: ChannelStore> Orchestrator<S> {
    pub fn new(store: S, registry: Registry, retry: RetryPolicy) -> Self {
        Self {
            store,
            registry,
            retry,
        }
    }

    /// Orchestrator with the configured attempt budget and login driver
    pub fn from_config(store: S, config: &Config, driver: Arc<dyn LoginDriver>) -> Self {
        let retry = RetryPolicy {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_secs(5),
            ..RetryPolicy::default()
        };
        Self::new(store, Registry::new(config, driver), retry)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Update one channel, retrying retryable failures.
    ///
    /// Safe to call repeatedly: each attempt resumes from the committed
    /// cursor and merging is idempotent.
    #[instrument(skip(self))]
    pub async fn update_channel(&self, channel_id: i64) -> Result<RunReport> {
        let what = format!("update of channel {}", channel_id);
        let result = self
            .retry
            .run(&what, |attempt| self.attempt(channel_id, attempt), Error::is_retryable)
            .await;
        if let Err(e) = &result {
            error!(channel = channel_id, "Channel update failed: {}", e);
        }
        result
    }

    /// Update every channel in turn. A failed channel does not stop the batch.
    pub async fn update_all(&self, mut progress: impl FnMut(&RunReport)) -> Result<Vec<RunReport>> {
        let ids = self.store.channel_ids().await?;
        info!(channels = ids.len(), "Updating all channels");

        let mut reports = Vec::with_capacity(ids.len());
        for id in ids {
            let report = match self.update_channel(id).await {
                Ok(report) => report,
                Err(e) => RunReport::failed(id, &e),
            };
            progress(&report);
            reports.push(report);
        }
        Ok(reports)
    }

    async fn attempt(&self, channel_id: i64, attempt: u32) -> Result<RunReport> {
        let channel = self.store.load_channel(channel_id).await?;
        let span = info_span!("update_channel", channel = %channel.extern_id, attempt);

        async move {
            info!(
                name = %channel.name,
                url = %channel.url,
                options = ?channel.options,
                "Updating channel"
            );

            let mut report = RunReport::new(channel.id, attempt, channel.cursor);
            let mut strategy = self.registry.strategy(&channel)?;
            let start = strategy.resume_from(channel.cursor)?;
            let session = self
                .registry
                .authenticator(&channel)?
                .login(&channel.auth)
                .await?;

            report.transition(RunState::Crawling);
            let mut events = strategy.crawl(&session, start);
            while let Some(event) = events.next().await {
                match event? {
                    CrawlEvent::Item(item) => {
                        let outcome = self
                            .store
                            .merge_item(channel.id, &item.video, &item.cursor)
                            .await?;
                        debug!(
                            extern_id = %item.video.extern_id,
                            created = outcome.created,
                            noop = outcome.is_noop(),
                            "Merged video"
                        );
                        report.record(&outcome, item.cursor);
                    }
                    CrawlEvent::Finished { reason, cursor } => {
                        self.store.save_cursor(channel.id, &cursor).await?;
                        report.cursor = Some(cursor);
                        report.stop = Some(reason);
                        report.transition(RunState::Committed);
                    }
                }
            }

            if report.state != RunState::Committed {
                return Err(Error::Other("crawl ended without finishing".to_string()));
            }
            info!(
                merged = report.merged,
                created = report.created,
                stop = ?report.stop,
                "Channel updated"
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }
}
