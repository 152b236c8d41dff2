//! Run settings. Required parameters come from the environment; tuning comes from an
//! optional config file. Search order: ./reelbook.toml, then
//! $XDG_CONFIG_HOME/reelbook/config.toml (or ~/.config/reelbook/config.toml).

use crate::feed::{FeedQuery, RetryPolicy};
use crate::preview::PreviewSettings;
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

pub const ENV_PAGE_ID: &str = "FB_PAGE_ID";
pub const ENV_ACCESS_TOKEN: &str = "FB_ACCESS_TOKEN";
pub const ENV_START_DATE: &str = "START_DATE";
pub const ENV_END_DATE: &str = "END_DATE";
pub const ENV_BOOK_TITLE: &str = "BOOK_TITLE";
pub const ENV_BOOK_AUTHOR: &str = "BOOK_AUTHOR";
pub const ENV_OUTPUT_FILE: &str = "OUTPUT_FILE";

/// Every variable `Settings::resolve` reads.
pub const ENV_VARS: &[&str] = &[
    ENV_PAGE_ID,
    ENV_ACCESS_TOKEN,
    ENV_START_DATE,
    ENV_END_DATE,
    ENV_BOOK_TITLE,
    ENV_BOOK_AUTHOR,
    ENV_OUTPUT_FILE,
];

pub const DEFAULT_OUTPUT_FILE: &str = "facebook_videos.epub";
pub const DEFAULT_WORK_DIR: &str = "ebook_assets";
pub const DEFAULT_GRAPH_API_BASE: &str = "https://graph.facebook.com/v19.0";
pub const DEFAULT_PAGE_SIZE: u32 = 25;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_RETRY_COUNT: u32 = 2;
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}.")]
    Missing(&'static str),

    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("{0}")]
    File(String),
}

/// Config file contents. All fields optional; only present keys override defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct FileConfig {
    /// Directory holding downloads, previews, the cover and the processed-post list.
    pub work_dir: Option<PathBuf>,
    /// Graph API root including the version segment.
    pub graph_api_base: Option<String>,
    /// Posts requested per feed page.
    pub page_size: Option<u32>,
    pub user_agent: Option<String>,
    pub timeout_secs: Option<u64>,
    /// Retries after the first attempt for each media download (default 2).
    pub retry_count: Option<u32>,
    /// Delay in seconds before each retry, e.g. [1, 2, 4]. Last value repeats.
    pub retry_backoff_secs: Option<Vec<u64>>,
    pub ffmpeg_path: Option<PathBuf>,
    pub preview_seconds: Option<u32>,
    pub preview_fps: Option<u32>,
    pub preview_width: Option<u32>,
    /// TrueType font for the cover banner.
    pub font_path: Option<PathBuf>,
    /// Prepend a linked index chapter (default: true).
    pub index_chapter: Option<bool>,
    /// Also write a 1600x2560 print cover (default: false).
    pub kdp_cover: Option<bool>,
}

/// Search order: (1) ./reelbook.toml, (2) $XDG_CONFIG_HOME/reelbook/config.toml.
/// Missing file returns Ok(None). Invalid TOML or I/O error reading a present file returns Err.
pub fn load_config() -> Result<Option<FileConfig>, ConfigError> {
    let cwd = std::env::current_dir()
        .map_err(|e| ConfigError::File(format!("Cannot determine current directory: {}", e)))?;
    let mut paths = vec![cwd.join("reelbook.toml")];
    if let Some(d) = dirs::config_dir() {
        paths.push(d.join("reelbook").join("config.toml"));
    }
    for path in &paths {
        if path.exists() {
            let s = std::fs::read_to_string(path).map_err(|e| {
                ConfigError::File(format!("Cannot read config {}: {}", path.display(), e))
            })?;
            let config: FileConfig = toml::from_str(&s).map_err(|e| {
                ConfigError::File(format!("Invalid config {}: {}", path.display(), e))
            })?;
            tracing::debug!(path = %path.display(), "config file loaded");
            return Ok(Some(config));
        }
    }
    Ok(None)
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub page_id: String,
    pub access_token: String,
    pub since: NaiveDate,
    pub until: NaiveDate,
    pub title: String,
    pub author: String,
    pub language: String,
    pub output: PathBuf,
    pub work_dir: PathBuf,
    pub graph_api_base: String,
    pub page_size: u32,
    pub user_agent: Option<String>,
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
    pub preview: PreviewSettings,
    pub font_path: Option<PathBuf>,
    pub index_chapter: bool,
    pub kdp_cover: bool,
}

impl Settings {
    /// Build settings from an environment lookup and the optional file config.
    /// Empty or whitespace-only variables count as missing.
    pub fn resolve(
        lookup: impl Fn(&str) -> Option<String>,
        file: Option<&FileConfig>,
    ) -> Result<Self, ConfigError> {
        let get = |var: &'static str| -> Option<String> {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let require = |var: &'static str| get(var).ok_or(ConfigError::Missing(var));

        let page_id = require(ENV_PAGE_ID)?;
        let access_token = require(ENV_ACCESS_TOKEN)?;
        let since = parse_date(ENV_START_DATE, &require(ENV_START_DATE)?)?;
        let until = parse_date(ENV_END_DATE, &require(ENV_END_DATE)?)?;
        if since > until {
            return Err(ConfigError::Invalid {
                var: ENV_END_DATE,
                reason: format!("{} is before {} {}", until, ENV_START_DATE, since),
            });
        }
        let title = require(ENV_BOOK_TITLE)?;
        let author = require(ENV_BOOK_AUTHOR)?;
        let output = get(ENV_OUTPUT_FILE)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_FILE));

        let defaults = FileConfig::default();
        let file = file.unwrap_or(&defaults);

        let page_size = file.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size == 0 {
            return Err(ConfigError::Invalid {
                var: "page_size",
                reason: "must be at least 1".to_string(),
            });
        }
        let retry_count = file.retry_count.unwrap_or(DEFAULT_RETRY_COUNT);
        let retry = match &file.retry_backoff_secs {
            Some(backoff) if !backoff.is_empty() => {
                RetryPolicy::with_backoff_secs(retry_count, backoff)
            }
            _ => RetryPolicy::immediate(retry_count),
        };

        let preview_defaults = PreviewSettings::default();
        let preview = PreviewSettings {
            program: file
                .ffmpeg_path
                .clone()
                .unwrap_or(preview_defaults.program),
            seconds: file.preview_seconds.unwrap_or(preview_defaults.seconds).max(1),
            fps: file.preview_fps.unwrap_or(preview_defaults.fps).max(1),
            width: file.preview_width.unwrap_or(preview_defaults.width).max(16),
        };

        Ok(Self {
            page_id,
            access_token,
            since,
            until,
            title,
            author,
            language: "en".to_string(),
            output,
            work_dir: file
                .work_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WORK_DIR)),
            graph_api_base: file
                .graph_api_base
                .clone()
                .unwrap_or_else(|| DEFAULT_GRAPH_API_BASE.to_string()),
            page_size,
            user_agent: file.user_agent.clone(),
            timeout_secs: file.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            retry,
            preview,
            font_path: file.font_path.clone(),
            index_chapter: file.index_chapter.unwrap_or(true),
            kdp_cover: file.kdp_cover.unwrap_or(false),
        })
    }

    pub fn feed_query(&self) -> FeedQuery<'_> {
        FeedQuery {
            api_base: &self.graph_api_base,
            page_id: &self.page_id,
            access_token: &self.access_token,
            since: self.since,
            until: self.until,
            page_size: self.page_size,
        }
    }
}

fn parse_date(var: &'static str, value: &str) -> Result<NaiveDate, ConfigError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|e| ConfigError::Invalid {
        var,
        reason: format!("'{}' is not a YYYY-MM-DD date ({})", value, e),
    })
}
