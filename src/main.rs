//! # vidsrc CLI Application
//!
//! Command-line front end for provisioning channels and running imports.
//!
//! ## Subcommands
//!
//! - `add-channel`: Register a channel with its platform, auth and options
//! - `configure`: Replace a channel's options or auth parameters
//! - `update`: Crawl one channel and merge what it finds
//! - `update-all`: Update every channel in turn
//! - `list`: Show registered channels and their cursors
//! - `videos`: Show the videos imported for a channel
//! - `reset-cursor`: Make the next update start from scratch
//!
//! Settings come from `VIDSRC_*` environment variables; `--database`
//! overrides the database path.

mod telemetry;

use anyhow::{Context, anyhow};
use chrono::DateTime;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::instrument;
use vidsrc::auth::{AuthParams, LoginDriver};
use vidsrc::channel::{Channel, ChannelOptions, NewChannel, Platform};
use vidsrc::config::Config;
use vidsrc::orchestrator::{Orchestrator, RunState};
use vidsrc::store::Store;

#[derive(Parser)]
#[command(author, version, about = "Incremental channel import for remote video platforms", long_about = None)]
struct Cli {
    /// Database path
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Also write logs to this file, rotated daily
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Register a channel
    AddChannel(AddChannelArgs),

    /// Replace a channel's options or auth parameters
    Configure(ConfigureArgs),

    /// Update one channel
    Update(UpdateArgs),

    /// Update all channels one after another
    UpdateAll(UpdateAllArgs),

    /// List registered channels
    List(ListArgs),

    /// List the videos imported for a channel
    Videos(VideosArgs),

    /// Forget a channel's progress
    ResetCursor(ChannelArg),
}

#[derive(Args, Debug)]
struct AddChannelArgs {
    /// Globally unique channel identifier
    #[arg(required = true)]
    extern_id: String,

    /// Seed URL
    #[arg(required = true)]
    url: String,

    /// Display name (defaults to the identifier)
    #[arg(short, long)]
    name: Option<String>,

    /// Platform (timcast|peertube); guessed from the URL when omitted
    #[arg(short, long)]
    platform: Option<Platform>,

    /// Crawl options as JSON, e.g. '{"depth":2,"whitelist":["^https://site/a/"]}'
    #[arg(short, long)]
    options: Option<String>,

    /// Auth parameters as JSON, e.g. '{"method":"password","username":"me","password":"env[TUBE_PASSWORD]"}'
    #[arg(short, long)]
    auth: Option<String>,
}

#[derive(Args, Debug)]
struct ConfigureArgs {
    /// Channel id or identifier
    #[arg(required = true)]
    channel: String,

    /// New crawl options as JSON
    #[arg(short, long)]
    options: Option<String>,

    /// New auth parameters as JSON
    #[arg(short, long)]
    auth: Option<String>,
}

#[derive(Args, Debug)]
struct UpdateArgs {
    /// Channel id or identifier
    #[arg(required = true)]
    channel: String,

    #[command(flatten)]
    browser: BrowserArgs,
}

#[derive(Args, Debug)]
struct UpdateAllArgs {
    #[command(flatten)]
    browser: BrowserArgs,
}

#[derive(Args, Debug)]
struct BrowserArgs {
    /// Chromium executable used for form logins
    #[arg(long)]
    chrome: Option<PathBuf>,

    /// Show the browser window during form logins
    #[arg(long)]
    headed: bool,
}

#[derive(Args, Debug)]
struct ListArgs {
    /// Show options and cursors
    #[arg(short, long)]
    details: bool,
}

#[derive(Args, Debug)]
struct VideosArgs {
    /// Channel id or identifier
    #[arg(required = true)]
    channel: String,

    /// Show tags and renditions
    #[arg(short, long)]
    details: bool,
}

#[derive(Args, Debug)]
struct ChannelArg {
    /// Channel id or identifier
    #[arg(required = true)]
    channel: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _otel = telemetry::init_tracing_subscriber(cli.log_file.as_deref())?;

    let mut config = Config::from_env()?;
    if let Some(database) = cli.database {
        config.database = database;
    }
    let store = Store::new_from_path(&config.database.to_string_lossy()).await?;

    match cli.command {
        Commands::AddChannel(args) => add_channel_command(&store, args).await?,
        Commands::Configure(args) => configure_command(&store, args).await?,
        Commands::Update(args) => update_command(store, &config, args).await?,
        Commands::UpdateAll(args) => update_all_command(store, &config, args).await?,
        Commands::List(args) => list_command(&store, args).await?,
        Commands::Videos(args) => videos_command(&store, args).await?,
        Commands::ResetCursor(args) => {
            let channel = find_channel(&store, &args.channel).await?;
            store.reset_cursor(channel.id).await?;
            println!("Cursor of {} reset", channel.extern_id);
        }
    }

    Ok(())
}

async fn find_channel(store: &Store, key: &str) -> anyhow::Result<Channel> {
    store
        .find_channel(key)
        .await?
        .ok_or_else(|| anyhow!("No channel '{}'", key))
}

fn login_driver(args: &BrowserArgs) -> Arc<dyn LoginDriver> {
    #[cfg(feature = "browser")]
    {
        Arc::new(vidsrc::auth::ChromiumDriver::new(!args.headed, args.chrome.clone()))
    }
    #[cfg(not(feature = "browser"))]
    {
        let _ = args;
        Arc::new(vidsrc::auth::UnavailableDriver)
    }
}

#[instrument(skip(store, args))]
async fn add_channel_command(store: &Store, args: AddChannelArgs) -> anyhow::Result<()> {
    let platform = match args.platform {
        Some(platform) => platform,
        None => Platform::detect(&args.url)
            .ok_or_else(|| anyhow!("Cannot tell the platform of {}, pass --platform", args.url))?,
    };
    let options = match &args.options {
        Some(raw) => ChannelOptions::from_json(raw)?,
        None => ChannelOptions::default(),
    };
    let auth = match &args.auth {
        Some(raw) => AuthParams::from_json(raw)?,
        None => AuthParams::None,
    };

    let id = store
        .add_channel(&NewChannel {
            name: args.name.unwrap_or_else(|| args.extern_id.clone()),
            extern_id: args.extern_id,
            url: args.url,
            platform,
            auth,
            options,
        })
        .await?;
    println!("Added channel {} ({})", id, platform);
    Ok(())
}

#[instrument(skip(store, args))]
async fn configure_command(store: &Store, args: ConfigureArgs) -> anyhow::Result<()> {
    if args.options.is_none() && args.auth.is_none() {
        return Err(anyhow!("Nothing to change, pass --options or --auth"));
    }
    let channel = find_channel(store, &args.channel).await?;
    if let Some(raw) = &args.options {
        store.set_options(channel.id, &ChannelOptions::from_json(raw)?).await?;
        println!("Options of {} updated", channel.extern_id);
    }
    if let Some(raw) = &args.auth {
        store.set_auth(channel.id, &AuthParams::from_json(raw)?).await?;
        println!("Auth of {} updated", channel.extern_id);
    }
    Ok(())
}

async fn update_command(store: Store, config: &Config, args: UpdateArgs) -> anyhow::Result<()> {
    let channel = find_channel(&store, &args.channel).await?;
    let orchestrator = Orchestrator::from_config(store, config, login_driver(&args.browser));

    let report = orchestrator
        .update_channel(channel.id)
        .await
        .with_context(|| format!("Updating {} failed", channel.extern_id))?;

    println!(
        "{}: {} merged ({} new, {} changed, {} unchanged) in {} attempt(s)",
        channel.extern_id, report.merged, report.created, report.updated, report.unchanged, report.attempts
    );
    if let Some(stop) = report.stop {
        println!("Stopped: {}", stop);
    }
    Ok(())
}

async fn update_all_command(store: Store, config: &Config, args: UpdateAllArgs) -> anyhow::Result<()> {
    let total = store.list_channels().await?.len();
    let orchestrator = Orchestrator::from_config(store, config, login_driver(&args.browser));

    let progress_bar = ProgressBar::new(total as u64);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?
            .progress_chars("##-"),
    );
    progress_bar.set_message("Updating channels...");

    let reports = orchestrator
        .update_all(|report| {
            progress_bar.inc(1);
            progress_bar.set_message(format!("Channel {} {}", report.channel_id, report.state));
        })
        .await?;
    progress_bar.finish_with_message("Done");

    let failed: Vec<_> = reports.iter().filter(|r| r.state == RunState::Failed).collect();
    let merged: u64 = reports.iter().map(|r| r.merged).sum();
    println!("{} channels updated, {} videos merged", reports.len() - failed.len(), merged);
    for report in &failed {
        println!(
            "  channel {} failed: {}",
            report.channel_id,
            report.error.as_deref().unwrap_or("unknown error")
        );
    }
    if !failed.is_empty() {
        return Err(anyhow!("{} channel(s) failed", failed.len()));
    }
    Ok(())
}

async fn list_command(store: &Store, args: ListArgs) -> anyhow::Result<()> {
    let channels = store.list_channels().await?;
    println!("Channels: {}", channels.len());

    for channel in channels {
        println!("{:>4}  {}  [{}]  {}", channel.id, channel.extern_id, channel.platform, channel.url);
        if args.details {
            println!("      Name: {}", channel.name);
            println!("      Options: {}", channel.options.to_json()?);
            match channel.cursor {
                Some(cursor) => println!("      Cursor: {}", cursor.to_json()?),
                None => println!("      Cursor: none"),
            }
        }
    }
    Ok(())
}

async fn videos_command(store: &Store, args: VideosArgs) -> anyhow::Result<()> {
    let channel = find_channel(store, &args.channel).await?;
    let videos = store.list_videos(channel.id).await?;
    println!("Videos of {}: {}", channel.extern_id, videos.len());

    for video in videos {
        let published = match video.published.as_deref() {
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map(|p| p.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|_| raw.to_string()),
            None => "-".to_string(),
        };
        let published = if video.published_estimated {
            format!("~{}", published)
        } else {
            published
        };
        println!("{:>6}  {}  {}  {}", video.id, published, video.extern_id, video.title);
        if args.details {
            let tags = store.video_tags(video.id).await?;
            if !tags.is_empty() {
                println!("        Tags: {}", tags.join(", "));
            }
            for source in store.video_sources(video.id).await? {
                println!(
                    "        {}x{} {} {}",
                    source.width.map(|w| w.to_string()).unwrap_or_default(),
                    source.height.map(|h| h.to_string()).unwrap_or_default(),
                    source.mime.as_deref().unwrap_or("-"),
                    source.url
                );
            }
        }
    }
    Ok(())
}
