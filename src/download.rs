//! Fetching candidate posts from Reddit.
//!
//! [`RedditFetcher`] reads the public `top.json` listing of a subreddit; no
//! account is needed. Listings are requested with `raw_json=1` so titles come
//! back unescaped. The time filter is checked before any request is sent.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::contract::{FetchError, Fetcher, RawPost};

pub const DEFAULT_REDDIT_ENDPOINT: &str = "https://www.reddit.com";
pub const DEFAULT_SUBREDDIT: &str = "unethicallifeprotips";
pub const DEFAULT_POST_COUNT: usize = 15;
pub const DEFAULT_TIME_FILTER: &str = "month";

/// Time windows accepted by the `top` listing.
pub const TIME_FILTERS: [&str; 6] = ["hour", "day", "week", "month", "year", "all"];

pub fn validate_time_filter(time_filter: &str) -> Result<(), FetchError> {
    if TIME_FILTERS.contains(&time_filter) {
        Ok(())
    } else {
        Err(format!(
            "invalid time filter {time_filter:?}, expected one of {}",
            TIME_FILTERS.join("/")
        )
        .into())
    }
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<Child>,
}

#[derive(Debug, Deserialize)]
struct Child {
    data: Submission,
}

#[derive(Debug, Deserialize)]
struct Submission {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    selftext: String,
    // null for deleted accounts
    author: Option<String>,
    #[serde(default)]
    url: String,
}

/// Extracts the posts from a `top.json` listing body, in listing order.
pub fn parse_listing(body: &str) -> Result<Vec<RawPost>, FetchError> {
    let listing: Listing = serde_json::from_str(body)?;
    Ok(listing
        .data
        .children
        .into_iter()
        .map(|child| {
            let s = child.data;
            RawPost {
                id: s.id,
                title: s.title,
                selftext: s.selftext,
                author: s.author.unwrap_or_else(|| "[deleted]".to_string()),
                url: s.url,
            }
        })
        .collect())
}

/// Read-only client for public subreddit listings.
pub struct RedditFetcher {
    client: Client,
    endpoint: String,
    user_agent: String,
}

impl RedditFetcher {
    pub fn new(user_agent: String) -> Self {
        Self::with_endpoint(DEFAULT_REDDIT_ENDPOINT.to_string(), user_agent)
    }

    pub fn with_endpoint(endpoint: String, user_agent: String) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            user_agent,
        }
    }

    fn top_url(&self, subreddit: &str) -> String {
        format!("{}/r/{}/top.json", self.endpoint, subreddit)
    }
}

#[async_trait]
impl Fetcher for RedditFetcher {
    async fn fetch_top(
        &self,
        subreddit: &str,
        limit: usize,
        time_filter: &str,
    ) -> Result<Vec<RawPost>, FetchError> {
        validate_time_filter(time_filter)?;
        let url = self.top_url(subreddit);
        info!(url = %url, limit, time_filter, "Fetching top posts");

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .query(&[
                ("limit", limit.to_string()),
                ("t", time_filter.to_string()),
                // unescaped text, no &amp; in titles
                ("raw_json", "1".to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            error!(%status, url = %url, "Reddit returned error. Response body: {body}");
            return Err(format!("Reddit API error {status} for {url}").into());
        }

        let mut posts = parse_listing(&body)?;
        posts.truncate(limit);
        debug!(count = posts.len(), subreddit, "Parsed listing");
        Ok(posts)
    }
}
