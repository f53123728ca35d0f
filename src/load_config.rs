//! # Configuration loading
//!
//! The static part of the configuration lives in a YAML file with the
//! sections `ledger`, `reddit`, `clean`, `render` and `publish`. Only
//! `ledger.spreadsheet_id` and `publish.instance_url` are required; every
//! other field has a default.
//!
//! ## Secrets
//! Tokens never go into the file. They are read from the environment:
//! - `GOOGLE_SHEETS_ACCESS_TOKEN`, required by every command.
//! - `MASTODON_ACCESS_TOKEN`, required by `upload` only.
//!
//! The binary loads a `.env` file before calling [`load_config`].

use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::Deserialize;
use tracing::{error, info};

use crate::download::{
    validate_time_filter, DEFAULT_POST_COUNT, DEFAULT_SUBREDDIT, DEFAULT_TIME_FILTER,
};
use crate::preprocess::CleanLimits;
use crate::render::RenderConfig;
use crate::upload::PublishConfig;

pub const SHEETS_TOKEN_VAR: &str = "GOOGLE_SHEETS_ACCESS_TOKEN";
pub const MASTODON_TOKEN_VAR: &str = "MASTODON_ACCESS_TOKEN";

/// Fully merged configuration: the static YAML file plus secrets from the
/// environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub ledger: LedgerConfig,
    pub reddit: RedditConfig,
    pub clean: CleanLimits,
    pub render: RenderConfig,
    pub publish: PublishConfig,
    pub sheets_access_token: String,
    /// Only the publish stage needs it.
    pub mastodon_access_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    pub spreadsheet_id: String,
    #[serde(default = "default_worksheet")]
    pub worksheet: String,
}

fn default_worksheet() -> String {
    "Sheet1".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedditConfig {
    #[serde(default = "default_subreddit")]
    pub subreddit: String,
    #[serde(default = "default_post_count")]
    pub post_count: usize,
    #[serde(default = "default_time_filter")]
    pub time_filter: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_subreddit() -> String {
    DEFAULT_SUBREDDIT.to_string()
}

fn default_post_count() -> usize {
    DEFAULT_POST_COUNT
}

fn default_time_filter() -> String {
    DEFAULT_TIME_FILTER.to_string()
}

fn default_user_agent() -> String {
    format!("post-ledger/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            subreddit: default_subreddit(),
            post_count: default_post_count(),
            time_filter: default_time_filter(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Deserialize)]
struct StaticConfig {
    ledger: LedgerConfig,
    #[serde(default)]
    reddit: RedditConfig,
    #[serde(default)]
    clean: CleanLimits,
    #[serde(default)]
    render: RenderConfig,
    publish: PublishConfig,
}

/// Loads a static YAML config file (no secrets) and injects the access tokens
/// from the environment.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => content,
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!("Failed to read config file {:?}: {}", path_ref, e));
        }
    };

    let static_conf: StaticConfig = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    if let Err(e) = validate_time_filter(&static_conf.reddit.time_filter) {
        error!(error = %e, "Invalid reddit.time_filter in config");
        anyhow::bail!("Invalid reddit.time_filter: {e}");
    }
    if static_conf.clean.min_len > static_conf.clean.max_len {
        anyhow::bail!(
            "clean.min_len ({}) must not exceed clean.max_len ({})",
            static_conf.clean.min_len,
            static_conf.clean.max_len
        );
    }

    let sheets_access_token = match std::env::var(SHEETS_TOKEN_VAR) {
        Ok(token) if !token.trim().is_empty() => {
            info!("{SHEETS_TOKEN_VAR} found in env");
            token
        }
        Ok(_) => {
            error!("{SHEETS_TOKEN_VAR} is empty");
            anyhow::bail!("{SHEETS_TOKEN_VAR} environment variable is empty");
        }
        Err(e) => {
            error!(error = ?e, "{SHEETS_TOKEN_VAR} environment variable not set");
            return Err(anyhow::anyhow!(
                "{SHEETS_TOKEN_VAR} environment variable not set: {e}"
            ));
        }
    };

    let mastodon_access_token = std::env::var(MASTODON_TOKEN_VAR)
        .ok()
        .filter(|token| !token.trim().is_empty());

    info!(
        spreadsheet_id = %static_conf.ledger.spreadsheet_id,
        subreddit = %static_conf.reddit.subreddit,
        output_dir = %static_conf.render.output_dir.display(),
        mastodon_token_set = mastodon_access_token.is_some(),
        "Config loaded and merged successfully"
    );

    Ok(AppConfig {
        ledger: static_conf.ledger,
        reddit: static_conf.reddit,
        clean: static_conf.clean,
        render: static_conf.render,
        publish: static_conf.publish,
        sheets_access_token,
        mastodon_access_token,
    })
}
