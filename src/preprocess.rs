//! Text cleaning between the content source and the ledger.
//!
//! Titles carry a leading tag word (`ULPT:`, `LPT`, ...) that is dropped.
//! Requests for tips are not tips and are discarded, as are titles that end
//! up too short or too long to make a readable image.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::contract::RawPost;

pub const DEFAULT_MIN_LEN: usize = 20;
pub const DEFAULT_MAX_LEN: usize = 500;

/// Length bounds, in characters, for a cleaned title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanLimits {
    #[serde(default = "default_min_len")]
    pub min_len: usize,
    #[serde(default = "default_max_len")]
    pub max_len: usize,
}

fn default_min_len() -> usize {
    DEFAULT_MIN_LEN
}

fn default_max_len() -> usize {
    DEFAULT_MAX_LEN
}

impl Default for CleanLimits {
    fn default() -> Self {
        Self {
            min_len: DEFAULT_MIN_LEN,
            max_len: DEFAULT_MAX_LEN,
        }
    }
}

fn is_request(text: &str) -> bool {
    text.to_lowercase().contains("request")
}

/// Cleans one title, or returns `None` when the post should be dropped.
///
/// The length bound is checked on the text after the tag word, leading space
/// included; the returned text has that space trimmed.
pub fn cleanup_title(text: &str, limits: CleanLimits) -> Option<String> {
    if is_request(text) {
        return None;
    }
    let rest = &text[text.find(' ')?..];
    let len = rest.chars().count();
    if len < limits.min_len || len > limits.max_len {
        return None;
    }
    Some(rest.trim_start().to_string())
}

#[derive(Debug, Default)]
pub struct CleanReport {
    pub kept: Vec<RawPost>,
    pub rejected: Vec<String>,
}

/// Keeps the posts whose title survives [`cleanup_title`], with the cleaned
/// title substituted. Rejected post ids are reported in listing order.
pub fn clean_posts(posts: Vec<RawPost>, limits: CleanLimits) -> CleanReport {
    let mut report = CleanReport::default();
    for post in posts {
        match cleanup_title(&post.title, limits) {
            Some(title) => report.kept.push(RawPost { title, ..post }),
            None => {
                debug!(id = %post.id, title = %post.title, "Dropping post during cleanup");
                report.rejected.push(post.id);
            }
        }
    }
    info!(
        kept = report.kept.len(),
        rejected = report.rejected.len(),
        "Cleaned fetched posts"
    );
    report
}
