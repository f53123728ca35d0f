//! # CLI
//!
//! Command surface for post-ledger. Each subcommand runs one pipeline stage:
//! - `download`: fetch top posts, clean them, append unseen ones to the ledger.
//! - `render`: draw cards for every row not yet published.
//! - `upload`: publish rendered cards and flip their ledger flag.
//!
//! All stage logic lives in [`crate::synchronise`]; this module only loads the
//! config, builds the adapters and prints a summary. [`run`] is exported so
//! integration tests can drive the CLI without spawning a process.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::download::{validate_time_filter, RedditFetcher};
use crate::ledger::LedgerClient;
use crate::load_config::{load_config, AppConfig, MASTODON_TOKEN_VAR};
use crate::render::ImageRenderer;
use crate::sheets::GoogleSheetsStore;
use crate::synchronise::{ingest, publish_pending, render_pending, FetchRequest};
use crate::upload::MastodonPublisher;

/// CLI for post-ledger: collect, render and publish subreddit tips.
#[derive(Parser)]
#[clap(
    name = "post-ledger",
    version,
    about = "Collect top subreddit posts into a spreadsheet ledger, \
             render them onto images and publish each once"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch top posts, clean them and append unseen ones to the ledger
    Download {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Subreddit to read, overrides reddit.subreddit
        #[clap(long)]
        subreddit: Option<String>,
        /// Number of posts to fetch, overrides reddit.post_count
        #[clap(long)]
        post_count: Option<usize>,
        /// hour/day/week/month/year/all, overrides reddit.time_filter
        #[clap(long)]
        time_filter: Option<String>,
    },
    /// Render cards for every ledger row not yet published
    Render {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
    /// Publish rendered cards and mark their rows as uploaded
    Upload {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Number of posts to publish in this run, overrides publish.post_count
        #[clap(long)]
        post_count: Option<usize>,
    },
}

fn ledger_from(config: &AppConfig) -> LedgerClient<GoogleSheetsStore> {
    LedgerClient::new(GoogleSheetsStore::new(
        config.ledger.spreadsheet_id.clone(),
        config.ledger.worksheet.clone(),
        config.sheets_access_token.clone(),
    ))
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Download {
            config,
            subreddit,
            post_count,
            time_filter,
        } => {
            let config = load_config(config)?;
            let request = FetchRequest {
                subreddit: subreddit.unwrap_or_else(|| config.reddit.subreddit.clone()),
                post_count: post_count.unwrap_or(config.reddit.post_count),
                time_filter: time_filter.unwrap_or_else(|| config.reddit.time_filter.clone()),
            };
            validate_time_filter(&request.time_filter).map_err(anyhow::Error::msg)?;
            tracing::info!(command = "download", "Starting collection");

            let fetcher = RedditFetcher::new(config.reddit.user_agent.clone());
            let ledger = ledger_from(&config);
            let report = ingest(&fetcher, &ledger, &request, config.clean)
                .await
                .context("Collection failed")?;
            tracing::info!(command = "download", ?report, "Collection complete");
            println!(
                "Collected {} posts: {} appended, {} already in ledger, {} rejected by cleanup.",
                report.fetched,
                report.appended.len(),
                report.already_present.len(),
                report.rejected.len()
            );
            Ok(())
        }
        Commands::Render { config } => {
            let config = load_config(config)?;
            tracing::info!(command = "render", "Starting render");
            let ledger = ledger_from(&config);
            let renderer = ImageRenderer::new(config.render.clone());
            let report = render_pending(&ledger, &renderer)
                .await
                .context("Rendering failed")?;
            tracing::info!(command = "render", ?report, "Render complete");
            println!(
                "Rendered {} records ({} already rendered, {} not renderable, {} failed).",
                report.rendered.len(),
                report.already_generated.len(),
                report.not_renderable.len(),
                report.failed.len()
            );
            Ok(())
        }
        Commands::Upload { config, post_count } => {
            let config = load_config(config)?;
            let token = config.mastodon_access_token.clone().with_context(|| {
                format!("{MASTODON_TOKEN_VAR} environment variable not set")
            })?;
            tracing::info!(command = "upload", "Starting publish");
            let ledger = ledger_from(&config);
            let renderer = ImageRenderer::new(config.render.clone());
            let publisher = MastodonPublisher::new(&config.publish.instance_url, token);
            let limit = post_count.unwrap_or(config.publish.post_count);
            let report = publish_pending(
                &ledger,
                renderer.layout(),
                &publisher,
                &config.publish,
                limit,
            )
            .await
            .context("Publishing failed")?;
            tracing::info!(command = "upload", ?report, "Publish complete");
            println!(
                "Published {} posts ({} without images, {} failed).",
                report.published.len(),
                report.missing_images.len(),
                report.failed.len()
            );
            if report.failed.is_empty() {
                Ok(())
            } else {
                Err(anyhow::anyhow!(
                    "{} posts failed to publish: {}",
                    report.failed.len(),
                    report.failed.join(", ")
                ))
            }
        }
    }
}
