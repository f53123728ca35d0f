//! # contract: the seams between the pipeline and the services it drives
//!
//! Every external collaborator (the spreadsheet holding the ledger, the content
//! source, the image renderer and the social account) sits behind one trait in
//! this module, next to the plain data types that cross those seams.
//!
//! ## Mocking & Testing
//! - The traits are annotated for `mockall` so tests can script collaborators.
//!   Mocks are exported under the default `test-export-mocks` feature so the
//!   integration tests in `tests/` can use them too.
//!
//! ## Adding New Backends
//! - Implement the trait for the new service.
//! - Convert upstream failures into the trait's error type; never panic on a
//!   remote error.

use std::path::PathBuf;

use async_trait::async_trait;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use serde::{Deserialize, Serialize};

/// Boxed transport error coming back from a remote store.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Boxed error coming back from the content source.
pub type FetchError = Box<dyn std::error::Error + Send + Sync>;

/// A post as handed over by the content source, before cleaning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPost {
    pub id: String,
    pub title: String,
    pub selftext: String,
    pub author: String,
    pub url: String,
}

/// One ledger row. The upload flag is a real boolean here; only the ledger
/// adapter knows how the spreadsheet spells it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: String,
    pub title: String,
    pub selftext: String,
    pub author: String,
    pub url: String,
    pub image_uploaded: bool,
}

impl From<RawPost> for PostRecord {
    fn from(post: RawPost) -> Self {
        PostRecord {
            id: post.id,
            title: post.title,
            selftext: post.selftext,
            author: post.author,
            url: post.url,
            image_uploaded: false,
        }
    }
}

/// Cell-level access to a single worksheet. Rows and columns are 1-based,
/// row 1 being the header row.
///
/// Implementations return values the way hosted spreadsheets do: blank cells
/// read as empty strings and trailing blanks are trimmed from row and column
/// reads.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait SheetStore: Send + Sync {
    /// All values of one row, up to its last non-empty cell.
    async fn row_values(&self, row: usize) -> Result<Vec<String>, StoreError>;

    /// All values of one column (header included), up to its last non-empty cell.
    async fn col_values(&self, col: usize) -> Result<Vec<String>, StoreError>;

    /// A single cell; blank cells read as an empty string.
    async fn cell(&self, row: usize, col: usize) -> Result<String, StoreError>;

    /// Overwrite a single cell.
    async fn update_cell(&self, row: usize, col: usize, value: &str) -> Result<(), StoreError>;

    /// Write `values` into `row`, starting at column 1.
    async fn update_row(&self, row: usize, values: Vec<String>) -> Result<(), StoreError>;

    /// The whole worksheet, header row first.
    async fn all_values(&self) -> Result<Vec<Vec<String>>, StoreError>;
}

/// Source of candidate posts.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Top posts of `subreddit` over `time_filter`, at most `limit` of them.
    async fn fetch_top(
        &self,
        subreddit: &str,
        limit: usize,
        time_filter: &str,
    ) -> Result<Vec<RawPost>, FetchError>;
}

/// Result of asking a renderer to draw one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Images written, title image first.
    Rendered(Vec<PathBuf>),
    /// A title image already exists in the generated or uploaded directory.
    AlreadyGenerated,
    /// The record's text falls outside the renderable limits.
    NotRenderable,
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("IO error while rendering: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not load font {0}")]
    Font(PathBuf),

    #[error("could not encode image: {0}")]
    Image(String),

    #[error("post id {0:?} is not usable in a file name")]
    InvalidId(String),
}

/// Draws post text onto image files.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait Renderer: Send + Sync {
    fn render(&self, record: &PostRecord) -> Result<RenderOutcome, RenderError>;
}

/// What the social account returned for a published post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedPost {
    pub status_id: String,
    pub url: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("no images to publish")]
    NoImages,

    #[error("could not read image {path}: {source}")]
    ReadImage {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("platform rejected the request: {0}")]
    Rejected(String),
}

/// Uploads rendered images to a social account.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `images` as one post with `caption`.
    async fn publish(
        &self,
        images: &[PathBuf],
        caption: &str,
    ) -> Result<PublishedPost, PublishError>;
}
