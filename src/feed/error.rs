//! Transport error shared by the feed fetcher and the asset acquirer.

use thiserror::Error;

/// Failure of one HTTP GET. Never fatal on its own: the feed fetcher stops
/// paginating and the asset acquirer retries, then gives up on that asset.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Invalid URL: {input}: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("Network error: could not reach {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Non-2xx status. `detail` carries the Graph API error message when the body has one.
    #[error("HTTP {status} when fetching {url}{}", format_detail(.detail))]
    HttpStatus {
        status: u16,
        url: String,
        detail: Option<String>,
    },

    #[error("Failed to read response body from {url}: {source}")]
    BodyRead {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Unexpected response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("Cannot store {key}: {source}")]
    Store {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// Transport-level failures worth another attempt. Client errors (4xx except 429),
    /// decode and storage errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network { .. } | FetchError::BodyRead { .. } => true,
            FetchError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            FetchError::InvalidUrl { .. } | FetchError::Decode { .. } | FetchError::Store { .. } => {
                false
            }
        }
    }
}

fn format_detail(detail: &Option<String>) -> String {
    detail
        .as_deref()
        .map(|d| format!(": {}", d))
        .unwrap_or_default()
}

/// Pull `error.message` out of a Graph API error body, if there is one.
pub(crate) fn graph_error_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_message_includes_graph_detail() {
        let e = FetchError::HttpStatus {
            status: 400,
            url: "https://graph.example/posts".into(),
            detail: Some("Invalid OAuth access token.".into()),
        };
        assert_eq!(
            e.to_string(),
            "HTTP 400 when fetching https://graph.example/posts: Invalid OAuth access token."
        );
    }

    #[test]
    fn http_status_message_without_detail() {
        let e = FetchError::HttpStatus {
            status: 503,
            url: "https://cdn.example/v.mp4".into(),
            detail: None,
        };
        assert_eq!(e.to_string(), "HTTP 503 when fetching https://cdn.example/v.mp4");
    }

    #[test]
    fn retryable_statuses() {
        let status = |s: u16| FetchError::HttpStatus {
            status: s,
            url: String::new(),
            detail: None,
        };
        assert!(status(500).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!FetchError::Decode {
            url: String::new(),
            reason: "bad json".into()
        }
        .is_retryable());
    }

    #[test]
    fn graph_error_message_extracts_message() {
        let body = br#"{"error":{"message":"(#100) Tried accessing nonexisting field","type":"OAuthException","code":100}}"#;
        assert_eq!(
            graph_error_message(body).as_deref(),
            Some("(#100) Tried accessing nonexisting field")
        );
        assert!(graph_error_message(b"<html>").is_none());
    }
}
