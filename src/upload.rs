//! Publishing rendered cards to a Mastodon-compatible account.
//!
//! - Each card is uploaded through `POST /api/v2/media`; the returned media
//!   ids are attached to a single status created with `POST /api/v1/statuses`.
//! - Every status request carries a fresh `Idempotency-Key`, so a request the
//!   server already accepted is not turned into a second post by the client.
//! - Captions credit the original author and link the source post.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::contract::{PostRecord, PublishError, PublishedPost, Publisher};

pub const DEFAULT_CAPTION_PREFIX: &str = "Unethical life pro tips be like... ";
pub const MAX_NUM_HASHTAGS: usize = 18;
/// Mastodon's per-status attachment limit.
pub const MAX_MEDIA_PER_STATUS: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    pub instance_url: String,
    #[serde(default = "default_caption_prefix")]
    pub caption_prefix: String,
    #[serde(default = "default_hashtags")]
    pub hashtags: Vec<String>,
    #[serde(default = "default_post_count")]
    pub post_count: usize,
}

fn default_caption_prefix() -> String {
    DEFAULT_CAPTION_PREFIX.to_string()
}

fn default_hashtags() -> Vec<String> {
    vec!["lifeprotips".to_string(), "lpt".to_string()]
}

fn default_post_count() -> usize {
    1
}

/// Renders hashtags as `#a #b`, at most [`MAX_NUM_HASHTAGS`], skipping blanks
/// and stripping any `#` the config already carries.
pub fn format_hashtags(tags: &[String]) -> String {
    tags.iter()
        .map(|tag| tag.trim().trim_start_matches('#'))
        .filter(|tag| !tag.is_empty())
        .take(MAX_NUM_HASHTAGS)
        .map(|tag| format!("#{tag}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Caption for a published record: the post body (or the configured prefix
/// when there is none), the hashtags, then the author credit and source link.
pub fn build_caption(record: &PostRecord, config: &PublishConfig) -> String {
    let prefix = if record.selftext.is_empty() {
        config.caption_prefix.as_str()
    } else {
        record.selftext.as_str()
    };
    let hashtags = format_hashtags(&config.hashtags);
    let mut caption = prefix.to_string();
    if !hashtags.is_empty() {
        if !caption.is_empty() && !caption.ends_with(' ') {
            caption.push(' ');
        }
        caption.push_str(&hashtags);
    }
    caption.push_str(&format!("  Author: u/{}  URL: {}", record.author, record.url));
    caption
}

#[derive(Debug, Deserialize)]
struct MediaAttachment {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Status {
    id: String,
    url: Option<String>,
}

/// Client for one account on a Mastodon-compatible instance.
pub struct MastodonPublisher {
    client: Client,
    instance_url: String,
    access_token: String,
}

impl MastodonPublisher {
    pub fn new(instance_url: &str, access_token: String) -> Self {
        let instance_url =
            if instance_url.starts_with("http://") || instance_url.starts_with("https://") {
                instance_url.trim_end_matches('/').to_string()
            } else {
                format!("https://{}", instance_url.trim_end_matches('/'))
            };
        Self {
            client: Client::new(),
            instance_url,
            access_token,
        }
    }

    pub fn instance_url(&self) -> &str {
        &self.instance_url
    }

    async fn upload_media(&self, path: &Path) -> Result<String, PublishError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| PublishError::ReadImage {
                path: path.to_path_buf(),
                source,
            })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "card.jpg".to_string());
        let part = Part::bytes(bytes).file_name(file_name).mime_str("image/jpeg")?;
        let form = Form::new().part("file", part);

        let url = format!("{}/api/v2/media", self.instance_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .multipart(form)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, path = %path.display(), "Media upload rejected. Response body: {body}");
            return Err(PublishError::Rejected(format!(
                "media upload returned {status}: {body}"
            )));
        }
        let media: MediaAttachment = response.json().await?;
        debug!(media_id = %media.id, path = %path.display(), "Uploaded media");
        Ok(media.id)
    }
}

#[async_trait]
impl Publisher for MastodonPublisher {
    async fn publish(
        &self,
        images: &[PathBuf],
        caption: &str,
    ) -> Result<PublishedPost, PublishError> {
        if images.is_empty() {
            return Err(PublishError::NoImages);
        }

        let mut media_ids = Vec::with_capacity(images.len());
        for path in images.iter().take(MAX_MEDIA_PER_STATUS) {
            media_ids.push(self.upload_media(path).await?);
        }

        let mut form: Vec<(&str, &str)> = vec![("status", caption)];
        for id in &media_ids {
            form.push(("media_ids[]", id.as_str()));
        }

        let url = format!("{}/api/v1/statuses", self.instance_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .header("Idempotency-Key", Uuid::new_v4().to_string())
            .form(&form)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(%status, "Status creation rejected. Response body: {body}");
            return Err(PublishError::Rejected(format!(
                "status creation returned {status}: {body}"
            )));
        }
        let created: Status = response.json().await?;
        info!(status_id = %created.id, media = media_ids.len(), "Published status");
        Ok(PublishedPost {
            status_id: created.id,
            url: created.url,
        })
    }
}
