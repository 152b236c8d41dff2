//! Data model for feed posts and the chapters built from them.
//!
//! `Post` and `Attachment` mirror the Graph API `posts` edge with the field set
//! `id,message,created_time,attachments{media,type,url,subattachments}`.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;

/// Graph API timestamps use a numeric offset without a colon (`+0000`).
const GRAPH_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

/// Graph API list wrapper: `{ "data": [...] }`.
#[derive(Debug, Clone, Deserialize)]
pub struct DataList<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

/// One feed post. Immutable once fetched.
#[derive(Debug, Clone, Deserialize)]
pub struct Post {
    pub id: String,
    #[serde(deserialize_with = "deserialize_graph_time")]
    pub created_time: DateTime<FixedOffset>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    attachments: Option<DataList<Attachment>>,
}

/// Kind of attachment as far as this tool cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Video,
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Attachment {
    /// Raw Graph `type`, e.g. `video_inline`, `video_autoplay`, `photo`, `album`.
    #[serde(rename = "type", default)]
    pub type_name: Option<String>,
    /// Target link of the attachment.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub media: Option<Media>,
    #[serde(default)]
    subattachments: Option<DataList<Attachment>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Media {
    /// Direct video file URL (only present for videos).
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub image: Option<MediaImage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaImage {
    pub src: String,
}

impl Post {
    pub fn attachments(&self) -> &[Attachment] {
        self.attachments
            .as_ref()
            .map(|list| list.data.as_slice())
            .unwrap_or_default()
    }

    /// Flattened attachment list: each attachment's sub-attachments, or the attachment itself when it has none.
    pub fn effective_attachments(&self) -> Vec<&Attachment> {
        let mut out = Vec::new();
        for attachment in self.attachments() {
            let subs = attachment.subattachments();
            if subs.is_empty() {
                out.push(attachment);
            } else {
                out.extend(subs);
            }
        }
        out
    }

    /// True if any attachment, or any of its sub-attachments, is a video.
    pub fn has_video(&self) -> bool {
        self.attachments()
            .iter()
            .any(|a| a.is_video() || a.subattachments().iter().any(Attachment::is_video))
    }

    /// Effective attachments of video kind, in feed order.
    pub fn video_attachments(&self) -> Vec<&Attachment> {
        self.effective_attachments()
            .into_iter()
            .filter(|a| a.is_video())
            .collect()
    }

    /// Canonical web URL of the post.
    pub fn permalink(&self) -> String {
        format!("https://www.facebook.com/{}", self.id)
    }
}

impl Attachment {
    pub fn kind(&self) -> AttachmentKind {
        match self.type_name.as_deref() {
            Some(t) if t.starts_with("video") => AttachmentKind::Video,
            _ => AttachmentKind::Other,
        }
    }

    pub fn is_video(&self) -> bool {
        self.kind() == AttachmentKind::Video
    }

    pub fn subattachments(&self) -> &[Attachment] {
        self.subattachments
            .as_ref()
            .map(|list| list.data.as_slice())
            .unwrap_or_default()
    }

    pub fn video_url(&self) -> Option<&str> {
        self.media
            .as_ref()
            .and_then(|m| m.source.as_deref())
            .filter(|s| !s.is_empty())
    }

    pub fn thumbnail_url(&self) -> Option<&str> {
        self.media
            .as_ref()
            .and_then(|m| m.image.as_ref())
            .map(|i| i.src.as_str())
            .filter(|s| !s.is_empty())
    }
}

fn deserialize_graph_time<'de, D>(deserializer: D) -> Result<DateTime<FixedOffset>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_graph_time(&raw).map_err(serde::de::Error::custom)
}

/// Parse a Graph API timestamp (`2024-03-01T12:00:00+0000`); RFC 3339 is accepted too.
pub fn parse_graph_time(raw: &str) -> Result<DateTime<FixedOffset>, String> {
    DateTime::parse_from_str(raw, GRAPH_TIME_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .map_err(|e| format!("invalid timestamp {:?}: {}", raw, e))
}

/// One EPUB chapter: a titled XHTML body fragment plus the image files it references.
#[derive(Debug, Clone)]
pub struct Chapter {
    pub title: String,
    /// XHTML id of the chapter heading; also the stem of the chapter document.
    pub anchor: String,
    pub body: String,
    /// Files referenced from `body` as `images/<file name>`.
    pub images: Vec<PathBuf>,
    /// Still image used for the index chapter and the cover collage.
    pub thumbnail: Option<PathBuf>,
}

impl Chapter {
    pub fn file_name(&self) -> String {
        format!("{}.xhtml", self.anchor)
    }
}
