//! # vidsrc - Incremental channel import for remote video platforms
//!
//! This crate crawls video channels on external platforms and merges what it
//! finds into a local libsql store. Every run resumes from the last cursor the
//! store committed, and merging is idempotent, so interrupted or repeated
//! runs never duplicate rows or skip items.
//!
//! ## Features
//!
//! - Scripted browser form login (cookie sessions) and REST token login
//!   (bearer sessions)
//! - Breadth-first link crawling bounded by a URL whitelist, a hop depth and
//!   an item limit
//! - Offset pagination over REST listings with per-item cursors
//! - Normalization of embedded player JSON and PeerTube payloads
//! - Transactional upsert of videos, renditions and tags, with the raw
//!   payloads archived alongside
//! - Bounded retries with exponential backoff at the request, login and
//!   channel-run levels
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vidsrc::auth::UnavailableDriver;
//! use vidsrc::config::Config;
//! use vidsrc::orchestrator::Orchestrator;
//! use vidsrc::store::Store;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let store = Store::new_from_path("vidsrc.db").await?;
//!
//!     let orchestrator = Orchestrator::from_config(store, &config, Arc::new(UnavailableDriver));
//!     let report = orchestrator.update_channel(1).await?;
//!
//!     println!("{} videos merged, stopped: {:?}", report.merged, report.stop);
//!     Ok(())
//! }
//! ```

mod error;

pub mod auth;
pub mod channel;
pub mod config;
pub mod fetch;
pub mod normalize;
pub mod orchestrator;
pub mod retry;
pub mod store;
pub mod strategy;

pub use error::{Error, Result};

/// Re-export of the types most callers need
pub mod prelude {
    pub use crate::channel::{Channel, ChannelOptions, Cursor, NewChannel, Platform};
    pub use crate::error::Error;
    pub use crate::error::Result;
    pub use crate::orchestrator::{Orchestrator, RunReport, RunState};
    pub use crate::store::Store;
}
