//! Pipeline stages: collect → render → publish, each driven through the ledger.
//!
//! The stages run as separate invocations and only talk to each other through
//! the ledger and the card directories:
//!   - [`ingest`] fetches top posts, cleans them and appends the ones the
//!     ledger has not seen yet.
//!   - [`render_pending`] draws cards for every row not yet published.
//!   - [`publish_pending`] publishes cards and flips the row's flag only after
//!     the platform accepted the post.
//!
//! Every stage handles one post at a time and awaits each remote call before
//! issuing the next. Ledger transport errors abort the stage.

use serde::Serialize;
use tracing::{error, info, warn};

use crate::contract::{
    FetchError, Fetcher, PostRecord, Publisher, RenderOutcome, Renderer, SheetStore,
};
use crate::ledger::{LedgerClient, LedgerError, MarkOutcome};
use crate::preprocess::{clean_posts, CleanLimits};
use crate::render::ImageLayout;
use crate::upload::{build_caption, PublishConfig};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("fetching posts failed: {0}")]
    Fetch(FetchError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// What to collect from the content source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub subreddit: String,
    pub post_count: usize,
    pub time_filter: String,
}

#[derive(Debug, Default, Serialize)]
pub struct IngestReport {
    pub fetched: usize,
    pub rejected: Vec<String>,
    pub appended: Vec<String>,
    pub already_present: Vec<String>,
}

/// Fetches, cleans and appends new posts. A post is appended only after the
/// ledger reported its id as absent.
pub async fn ingest<F, S>(
    fetcher: &F,
    ledger: &LedgerClient<S>,
    request: &FetchRequest,
    limits: CleanLimits,
) -> Result<IngestReport, PipelineError>
where
    F: Fetcher + ?Sized,
    S: SheetStore,
{
    info!(
        subreddit = %request.subreddit,
        post_count = request.post_count,
        time_filter = %request.time_filter,
        "[INGEST] Starting collection"
    );
    let posts = fetcher
        .fetch_top(&request.subreddit, request.post_count, &request.time_filter)
        .await
        .map_err(|e| {
            error!(error = %e, "[INGEST][ERROR] Fetch failed");
            PipelineError::Fetch(e)
        })?;

    let mut report = IngestReport {
        fetched: posts.len(),
        ..IngestReport::default()
    };
    let cleaned = clean_posts(posts, limits);
    report.rejected = cleaned.rejected;

    for post in cleaned.kept {
        info!(id = %post.id, "[INGEST] Trying post");
        match ledger.find_row(&post.id).await {
            Ok(row) => {
                info!(id = %post.id, row, "[INGEST] Already in ledger");
                report.already_present.push(post.id);
            }
            Err(LedgerError::RowNotFound(_)) => {
                let record = PostRecord::from(post);
                ledger.append_post(&record).await?;
                report.appended.push(record.id);
            }
            Err(e) => {
                error!(id = %post.id, error = %e, "[INGEST][ERROR] Ledger lookup failed");
                return Err(e.into());
            }
        }
    }

    info!(
        appended = report.appended.len(),
        already_present = report.already_present.len(),
        rejected = report.rejected.len(),
        "[INGEST] Collection complete"
    );
    Ok(report)
}

#[derive(Debug, Default, Serialize)]
pub struct RenderReport {
    pub rendered: Vec<String>,
    pub already_generated: Vec<String>,
    pub not_renderable: Vec<String>,
    pub failed: Vec<String>,
}

/// Draws cards for every unpublished row. A record that fails to render is
/// logged and counted; the rest still get drawn.
pub async fn render_pending<R, S>(
    ledger: &LedgerClient<S>,
    renderer: &R,
) -> Result<RenderReport, PipelineError>
where
    R: Renderer + ?Sized,
    S: SheetStore,
{
    let pending = ledger.list_unprocessed().await?;
    info!(pending = pending.len(), "[RENDER] Rendering unpublished rows");
    let mut report = RenderReport::default();

    for record in pending {
        match renderer.render(&record) {
            Ok(RenderOutcome::Rendered(paths)) => {
                info!(id = %record.id, cards = paths.len(), "[RENDER] Rendered");
                report.rendered.push(record.id);
            }
            Ok(RenderOutcome::AlreadyGenerated) => report.already_generated.push(record.id),
            Ok(RenderOutcome::NotRenderable) => {
                info!(id = %record.id, "[RENDER] Text outside card limits, skipped");
                report.not_renderable.push(record.id);
            }
            Err(e) => {
                error!(id = %record.id, error = %e, "[RENDER][ERROR] Render failed");
                report.failed.push(record.id);
            }
        }
    }
    Ok(report)
}

#[derive(Debug, Default, Serialize)]
pub struct PublishedItem {
    pub id: String,
    pub status_id: String,
    pub url: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct PublishReport {
    pub published: Vec<PublishedItem>,
    pub missing_images: Vec<String>,
    pub failed: Vec<String>,
    /// Published, but the flag was already set by the time it was written.
    pub already_marked: Vec<String>,
}

/// Publishes up to `limit` unpublished rows, in ledger order.
///
/// The flag is flipped only after the platform accepted the post. Rows
/// without cards and rows whose publish failed keep their flag unset and are
/// retried on the next run.
pub async fn publish_pending<P, S>(
    ledger: &LedgerClient<S>,
    layout: &ImageLayout,
    publisher: &P,
    config: &PublishConfig,
    limit: usize,
) -> Result<PublishReport, PipelineError>
where
    P: Publisher + ?Sized,
    S: SheetStore,
{
    let pending = ledger.list_unprocessed().await?;
    info!(
        pending = pending.len(),
        limit,
        "[PUBLISH] Publishing unpublished rows"
    );
    let mut report = PublishReport::default();

    for record in pending.into_iter().take(limit) {
        let images = layout.generated_images(&record.id);
        if images.is_empty() {
            warn!(id = %record.id, "[PUBLISH] Image file not found, skipping");
            report.missing_images.push(record.id);
            continue;
        }

        let caption = build_caption(&record, config);
        let published = match publisher.publish(&images, &caption).await {
            Ok(published) => published,
            Err(e) => {
                error!(id = %record.id, error = %e, "[PUBLISH][ERROR] Publish failed");
                report.failed.push(record.id);
                continue;
            }
        };

        match ledger.mark_uploaded(&record.id).await? {
            MarkOutcome::Marked => {}
            MarkOutcome::AlreadyMarked => report.already_marked.push(record.id.clone()),
        }
        for path in &images {
            if let Err(e) = layout.move_to_uploaded(path) {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "[PUBLISH] Could not move card to uploaded"
                );
            }
        }
        info!(id = %record.id, status_id = %published.status_id, "[PUBLISH] Published");
        report.published.push(PublishedItem {
            id: record.id,
            status_id: published.status_id,
            url: published.url,
        });
    }
    Ok(report)
}
