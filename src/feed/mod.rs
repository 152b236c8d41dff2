//! Feed fetching: paginate a page's `posts` edge over a date window and keep the video posts.

mod client;
mod error;

pub use client::{redact_token, HttpClient, HttpClientBuilder, HttpTransport, RetryPolicy};
pub use error::FetchError;

use crate::model::Post;
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashSet;

/// Fields requested for every post.
pub const POST_FIELDS: &str = "id,message,created_time,attachments{media,type,url,subattachments}";

/// Parameters of one feed walk.
#[derive(Debug, Clone)]
pub struct FeedQuery<'a> {
    /// Graph API root including version, e.g. `https://graph.facebook.com/v19.0`.
    pub api_base: &'a str,
    pub page_id: &'a str,
    pub access_token: &'a str,
    pub since: NaiveDate,
    pub until: NaiveDate,
    pub page_size: u32,
}

impl FeedQuery<'_> {
    /// URL of the first feed page. Later pages come from `paging.next`.
    pub fn first_page_url(&self) -> Result<String, FetchError> {
        let base = format!(
            "{}/{}/posts",
            self.api_base.trim_end_matches('/'),
            self.page_id
        );
        let since = self.since.format("%Y-%m-%d").to_string();
        let until = self.until.format("%Y-%m-%d").to_string();
        let limit = self.page_size.to_string();
        let url = reqwest::Url::parse_with_params(
            &base,
            &[
                ("fields", POST_FIELDS),
                ("since", since.as_str()),
                ("until", until.as_str()),
                ("limit", limit.as_str()),
                ("access_token", self.access_token),
            ],
        )
        .map_err(|e| FetchError::InvalidUrl {
            input: base.clone(),
            reason: e.to_string(),
        })?;
        Ok(url.to_string())
    }
}

/// One page of the `posts` edge.
#[derive(Debug, Deserialize)]
struct FeedPage {
    #[serde(default)]
    data: Vec<Post>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    #[serde(default)]
    next: Option<String>,
}

/// Result of a feed walk. `error` is set when pagination stopped early; `posts`
/// still holds everything gathered before the failure.
#[derive(Debug)]
pub struct FeedOutcome {
    pub posts: Vec<Post>,
    pub pages: usize,
    pub error: Option<FetchError>,
}

impl FeedOutcome {
    pub fn is_partial(&self) -> bool {
        self.error.is_some()
    }
}

/// Walk the feed from the first page until there is no `next` link, keeping
/// posts that carry a video attachment. Posts are returned in arrival order and
/// each id appears once.
///
/// A failed request ends the walk; what was collected so far is returned with the error.
pub async fn fetch_video_posts(transport: &dyn HttpTransport, query: &FeedQuery<'_>) -> FeedOutcome {
    let mut outcome = FeedOutcome {
        posts: Vec::new(),
        pages: 0,
        error: None,
    };
    let mut seen: HashSet<String> = HashSet::new();
    let mut next = match query.first_page_url() {
        Ok(url) => Some(url),
        Err(e) => {
            outcome.error = Some(e);
            return outcome;
        }
    };

    while let Some(url) = next.take() {
        tracing::debug!(page = outcome.pages + 1, url = %redact_token(&url), "fetching feed page");
        let page = match fetch_page(transport, &url).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(
                    pages = outcome.pages,
                    kept = outcome.posts.len(),
                    error = %e,
                    "feed pagination stopped; keeping posts fetched so far"
                );
                outcome.error = Some(e);
                break;
            }
        };
        outcome.pages += 1;
        let total = page.data.len();
        let before = outcome.posts.len();
        for post in page.data {
            if post.has_video() && seen.insert(post.id.clone()) {
                outcome.posts.push(post);
            }
        }
        tracing::info!(
            page = outcome.pages,
            posts = total,
            video_posts = outcome.posts.len() - before,
            "feed page received"
        );
        next = page
            .paging
            .and_then(|p| p.next)
            .filter(|n| !n.is_empty());
    }
    outcome
}

async fn fetch_page(transport: &dyn HttpTransport, url: &str) -> Result<FeedPage, FetchError> {
    let body = transport.get(url).await?;
    serde_json::from_slice(&body).map_err(|e| FetchError::Decode {
        url: redact_token(url),
        reason: e.to_string(),
    })
}
