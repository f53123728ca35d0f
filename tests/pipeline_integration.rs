use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::tempdir;

use post_ledger::contract::{
    MockFetcher, MockPublisher, MockRenderer, PublishError, PublishedPost, RawPost,
    RenderError, RenderOutcome, SheetStore, StoreError,
};
use post_ledger::ledger::LedgerClient;
use post_ledger::preprocess::CleanLimits;
use post_ledger::render::ImageLayout;
use post_ledger::sheets::InMemorySheet;
use post_ledger::synchronise::{
    ingest, publish_pending, render_pending, FetchRequest, PipelineError,
};
use post_ledger::upload::{PublishConfig, DEFAULT_CAPTION_PREFIX};

fn raw(id: &str, title: &str) -> RawPost {
    RawPost {
        id: id.to_string(),
        title: title.to_string(),
        selftext: String::new(),
        author: format!("author_{id}"),
        url: format!("https://www.reddit.com/comments/{id}/"),
    }
}

fn request() -> FetchRequest {
    FetchRequest {
        subreddit: "unethicallifeprotips".to_string(),
        post_count: 15,
        time_filter: "month".to_string(),
    }
}

fn publish_config() -> PublishConfig {
    PublishConfig {
        instance_url: "https://example.social".to_string(),
        caption_prefix: DEFAULT_CAPTION_PREFIX.to_string(),
        hashtags: vec!["lpt".to_string()],
        post_count: 1,
    }
}

fn seeded_ledger(rows: &[&[&str]]) -> LedgerClient<InMemorySheet> {
    LedgerClient::new(InMemorySheet::from_rows(
        rows.iter()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect())
            .collect(),
    ))
}

/// Store wrapper that records which operations reached the worksheet.
struct RecordingSheet {
    inner: InMemorySheet,
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingSheet {
    fn push(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl SheetStore for RecordingSheet {
    async fn row_values(&self, row: usize) -> Result<Vec<String>, StoreError> {
        self.inner.row_values(row).await
    }

    async fn col_values(&self, col: usize) -> Result<Vec<String>, StoreError> {
        self.push(format!("col_values({col})"));
        self.inner.col_values(col).await
    }

    async fn cell(&self, row: usize, col: usize) -> Result<String, StoreError> {
        self.inner.cell(row, col).await
    }

    async fn update_cell(&self, row: usize, col: usize, value: &str) -> Result<(), StoreError> {
        self.push(format!("update_cell({row},{col})"));
        self.inner.update_cell(row, col, value).await
    }

    async fn update_row(&self, row: usize, values: Vec<String>) -> Result<(), StoreError> {
        self.push(format!("update_row({row})"));
        self.inner.update_row(row, values).await
    }

    async fn all_values(&self) -> Result<Vec<Vec<String>>, StoreError> {
        self.inner.all_values().await
    }
}

/// Serves a listing captured before another writer flagged a row; every
/// other read sees the current grid.
struct StaleListingSheet {
    current: InMemorySheet,
    listing: Vec<Vec<String>>,
}

#[async_trait]
impl SheetStore for StaleListingSheet {
    async fn row_values(&self, row: usize) -> Result<Vec<String>, StoreError> {
        self.current.row_values(row).await
    }

    async fn col_values(&self, col: usize) -> Result<Vec<String>, StoreError> {
        self.current.col_values(col).await
    }

    async fn cell(&self, row: usize, col: usize) -> Result<String, StoreError> {
        self.current.cell(row, col).await
    }

    async fn update_cell(&self, row: usize, col: usize, value: &str) -> Result<(), StoreError> {
        self.current.update_cell(row, col, value).await
    }

    async fn update_row(&self, row: usize, values: Vec<String>) -> Result<(), StoreError> {
        self.current.update_row(row, values).await
    }

    async fn all_values(&self) -> Result<Vec<Vec<String>>, StoreError> {
        Ok(self.listing.clone())
    }
}

fn rows(grid: &[&[&str]]) -> Vec<Vec<String>> {
    grid.iter()
        .map(|row| row.iter().map(|cell| cell.to_string()).collect())
        .collect()
}

#[tokio::test]
async fn ingest_appends_cleaned_new_posts_and_skips_known_ones() {
    let ledger = seeded_ledger(&[
        &["title", "selftext", "author", "url", "id", "image_uploaded"],
        &["Old tip", "", "x", "https://x", "b2", ""],
    ]);

    let mut fetcher = MockFetcher::new();
    fetcher
        .expect_fetch_top()
        .withf(|sub, limit, t| {
            sub.to_string() == "unethicallifeprotips" && *limit == 15 && t.to_string() == "month"
        })
        .times(1)
        .returning(|_, _, _| {
            Ok(vec![
                raw("a1", "ULPT: Always carry a clipboard, nobody questions you"),
                raw("b2", "ULPT: Wear a hi-vis vest to get into any event for free"),
                raw("c3", "ULPT Request: how do I get out of jury duty"),
                raw("d4", "ULPT: short"),
            ])
        });

    let report = ingest(&fetcher, &ledger, &request(), CleanLimits::default())
        .await
        .unwrap();

    assert_eq!(report.fetched, 4);
    assert_eq!(report.appended, vec!["a1"]);
    assert_eq!(report.already_present, vec!["b2"]);
    assert_eq!(report.rejected, vec!["c3", "d4"]);

    let rows = ledger.store().snapshot();
    assert_eq!(rows.len(), 3);
    assert_eq!(
        rows[2],
        vec![
            "Always carry a clipboard, nobody questions you",
            "",
            "author_a1",
            "https://www.reddit.com/comments/a1/",
            "a1",
            "",
        ]
    );
    // the existing row keeps its original title
    assert_eq!(rows[1][0], "Old tip");
}

#[tokio::test]
async fn ingest_is_idempotent_across_runs() {
    let ledger = LedgerClient::new(InMemorySheet::new());
    let mut fetcher = MockFetcher::new();
    fetcher.expect_fetch_top().times(2).returning(|_, _, _| {
        Ok(vec![
            raw("a1", "ULPT: Always carry a clipboard, nobody questions you"),
            raw("b2", "ULPT: Wear a hi-vis vest to get into any event for free"),
        ])
    });

    let first = ingest(&fetcher, &ledger, &request(), CleanLimits::default())
        .await
        .unwrap();
    let second = ingest(&fetcher, &ledger, &request(), CleanLimits::default())
        .await
        .unwrap();

    assert_eq!(first.appended, vec!["a1", "b2"]);
    assert!(second.appended.is_empty());
    assert_eq!(second.already_present, vec!["a1", "b2"]);
    // header plus one row per post
    assert_eq!(ledger.store().snapshot().len(), 3);
}

#[tokio::test]
async fn every_append_is_preceded_by_a_lookup() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let ledger = LedgerClient::new(RecordingSheet {
        inner: InMemorySheet::from_rows(vec![
            ["title", "selftext", "author", "url", "id", "image_uploaded"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        ]),
        log: Arc::clone(&log),
    });
    let mut fetcher = MockFetcher::new();
    fetcher.expect_fetch_top().returning(|_, _, _| {
        Ok(vec![
            raw("a1", "ULPT: Always carry a clipboard, nobody questions you"),
            raw("b2", "ULPT: Wear a hi-vis vest to get into any event for free"),
        ])
    });

    ingest(&fetcher, &ledger, &request(), CleanLimits::default())
        .await
        .unwrap();

    let log = log.lock().unwrap().clone();
    let writes: Vec<usize> = log
        .iter()
        .enumerate()
        .filter(|(_, op)| op.starts_with("update_row"))
        .map(|(idx, _)| idx)
        .collect();
    assert_eq!(writes.len(), 2);
    for idx in writes {
        // find_row scans the id column before append_row does
        assert!(log[..idx].iter().filter(|op| *op == "col_values(5)").count() >= 2);
        assert_eq!(log[idx - 1], "col_values(5)");
    }
    assert_eq!(log.iter().filter(|op| op.starts_with("update_row")).count(), 2);
}

#[tokio::test]
async fn ingest_surfaces_fetch_failures() {
    let ledger = LedgerClient::new(InMemorySheet::new());
    let mut fetcher = MockFetcher::new();
    fetcher
        .expect_fetch_top()
        .returning(|_, _, _| Err("503 from reddit".into()));

    let err = ingest(&fetcher, &ledger, &request(), CleanLimits::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Fetch(_)));
    assert!(ledger.store().snapshot().is_empty());
}

#[tokio::test]
async fn render_pending_only_visits_unpublished_rows() {
    let ledger = seeded_ledger(&[
        &["title", "id", "image_uploaded"],
        &["t1", "a1", ""],
        &["t2", "b2", "TRUE"],
        &["t3", "c3", ""],
        &["t4", "d4", ""],
        &["t5", "e5", ""],
    ]);
    let mut renderer = MockRenderer::new();
    renderer
        .expect_render()
        .times(4)
        .returning(|record| match record.id.as_str() {
            "a1" => Ok(RenderOutcome::Rendered(vec![PathBuf::from("title_a1.jpg")])),
            "c3" => Ok(RenderOutcome::AlreadyGenerated),
            "d4" => Ok(RenderOutcome::NotRenderable),
            _ => Err(RenderError::Image("encoder exploded".to_string())),
        });

    let report = render_pending(&ledger, &renderer).await.unwrap();
    assert_eq!(report.rendered, vec!["a1"]);
    assert_eq!(report.already_generated, vec!["c3"]);
    assert_eq!(report.not_renderable, vec!["d4"]);
    assert_eq!(report.failed, vec!["e5"]);
}

#[tokio::test]
async fn publish_marks_only_after_success_and_moves_cards() {
    let dir = tempdir().unwrap();
    let layout = ImageLayout::new(dir.path());
    fs::create_dir_all(layout.generated_dir()).unwrap();
    for id in ["a1", "c3"] {
        fs::write(layout.title_path(id), b"jpg").unwrap();
    }
    fs::write(layout.self_text_path("a1"), b"jpg").unwrap();

    let ledger = seeded_ledger(&[
        &["title", "selftext", "author", "url", "id", "image_uploaded"],
        &["t1", "Body text", "alice", "https://r/a1", "a1", ""],
        &["t2", "", "bob", "https://r/b2", "b2", ""],
        &["t3", "", "carol", "https://r/c3", "c3", ""],
    ]);

    let mut publisher = MockPublisher::new();
    let expected_a1 = vec![layout.title_path("a1"), layout.self_text_path("a1")];
    publisher
        .expect_publish()
        .withf(move |images, caption| {
            images.to_vec() == expected_a1
                && caption.to_string() == "Body text #lpt  Author: u/alice  URL: https://r/a1"
        })
        .times(1)
        .returning(|_, _| {
            Ok(PublishedPost {
                status_id: "111".to_string(),
                url: Some("https://example.social/@me/111".to_string()),
            })
        });
    let title_c3 = layout.title_path("c3");
    publisher
        .expect_publish()
        .withf(move |images, _| images.to_vec() == vec![title_c3.clone()])
        .times(1)
        .returning(|_, _| Err(PublishError::Rejected("422".to_string())));

    let report = publish_pending(&ledger, &layout, &publisher, &publish_config(), 10)
        .await
        .unwrap();

    assert_eq!(report.published.len(), 1);
    assert_eq!(report.published[0].id, "a1");
    assert_eq!(report.published[0].status_id, "111");
    assert_eq!(report.missing_images, vec!["b2"]);
    assert_eq!(report.failed, vec!["c3"]);

    let pending: Vec<String> = ledger
        .list_unprocessed()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(pending, vec!["b2", "c3"]);

    assert!(layout.generated_images("a1").is_empty());
    assert!(layout.uploaded_dir().join("title_a1.jpg").is_file());
    assert!(layout.uploaded_dir().join("self_text_a1.jpg").is_file());
    assert!(layout.title_path("c3").is_file());
}

#[tokio::test]
async fn publish_respects_the_limit() {
    let dir = tempdir().unwrap();
    let layout = ImageLayout::new(dir.path());
    fs::create_dir_all(layout.generated_dir()).unwrap();
    for id in ["a1", "b2", "c3"] {
        fs::write(layout.title_path(id), b"jpg").unwrap();
    }
    let ledger = seeded_ledger(&[
        &["id", "image_uploaded"],
        &["a1", ""],
        &["b2", ""],
        &["c3", ""],
    ]);

    let mut publisher = MockPublisher::new();
    publisher.expect_publish().times(2).returning(|images, _| {
        Ok(PublishedPost {
            status_id: images[0].display().to_string(),
            url: None,
        })
    });

    let report = publish_pending(&ledger, &layout, &publisher, &publish_config(), 2)
        .await
        .unwrap();
    let ids: Vec<&str> = report.published.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["a1", "b2"]);

    let pending: Vec<String> = ledger
        .list_unprocessed()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(pending, vec!["c3"]);
}

#[tokio::test]
async fn publish_reports_rows_flagged_by_another_writer() {
    let dir = tempdir().unwrap();
    let layout = ImageLayout::new(dir.path());
    fs::create_dir_all(layout.generated_dir()).unwrap();
    fs::write(layout.title_path("a1"), b"jpg").unwrap();

    let ledger = LedgerClient::new(StaleListingSheet {
        current: InMemorySheet::from_rows(rows(&[&["id", "image_uploaded"], &["a1", "TRUE"]])),
        listing: rows(&[&["id", "image_uploaded"], &["a1", ""]]),
    });

    let mut publisher = MockPublisher::new();
    publisher.expect_publish().times(1).returning(|_, _| {
        Ok(PublishedPost {
            status_id: "222".to_string(),
            url: None,
        })
    });

    let report = publish_pending(&ledger, &layout, &publisher, &publish_config(), 5)
        .await
        .unwrap();

    assert_eq!(report.published.len(), 1);
    assert_eq!(report.published[0].id, "a1");
    assert_eq!(report.already_marked, vec!["a1"]);
    assert!(report.failed.is_empty());
    assert_eq!(ledger.store().current.cell(2, 2).await.unwrap(), "TRUE");
    assert!(layout.uploaded_dir().join("title_a1.jpg").is_file());
}
