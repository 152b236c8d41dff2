//! Chapter formatting: one XHTML fragment per post, plus the index chapter.

use crate::model::{Chapter, Post};
use std::path::{Path, PathBuf};

/// Caption used when a post has no message.
pub const DEFAULT_CAPTION: &str =
    "A short educational clip from our page. Watch it, pause where it helps, and come back to it whenever you need a refresher.";

/// Hashtags assigned round-robin by chapter ordinal.
pub const HASHTAGS: [&str; 9] = [
    "#LearnSomethingNew",
    "#EducationalVideo",
    "#DailyLearning",
    "#KnowledgeIsPower",
    "#StudyTips",
    "#LifelongLearning",
    "#WatchAndLearn",
    "#SkillBuilding",
    "#LearningTogether",
];

pub const INDEX_ANCHOR: &str = "index";
pub const INDEX_TITLE: &str = "Video Index";

/// Image embedded in a post chapter: the animated preview when one was made,
/// otherwise the still thumbnail.
#[derive(Debug, Clone)]
pub struct PostMedia {
    pub display: PathBuf,
    pub thumbnail: Option<PathBuf>,
}

impl PostMedia {
    pub fn new(preview: Option<PathBuf>, thumbnail: Option<PathBuf>) -> Option<Self> {
        let display = preview.or_else(|| thumbnail.clone())?;
        Some(Self { display, thumbnail })
    }
}

/// Id of a post's chapter heading, also used as its document stem and as the
/// index link target. Characters outside `[A-Za-z0-9_-]` become `-`; the `post-`
/// prefix keeps the id a valid XML name.
pub fn chapter_anchor(post_id: &str) -> String {
    let cleaned: String = post_id
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    format!("post-{}", cleaned)
}

pub fn hashtag_for(ordinal: usize) -> &'static str {
    HASHTAGS[ordinal % HASHTAGS.len()]
}

/// Human-readable chapter title: `March 1, 2024`.
pub fn chapter_title(post: &Post) -> String {
    post.created_time.format("%B %-d, %Y").to_string()
}

/// Render one post. Pure: the output depends only on the arguments.
pub fn format_chapter(post: &Post, media: &PostMedia, ordinal: usize) -> Chapter {
    let title = chapter_title(post);
    let anchor = chapter_anchor(&post.id);
    let posted = post.created_time.format("%A, %B %-d, %Y at %H:%M").to_string();
    let text = post
        .message
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(paragraphs)
        .unwrap_or_else(|| format!("<p>{}</p>", escape(DEFAULT_CAPTION)));
    let image_name = file_name(&media.display);
    let hashtag = hashtag_for(ordinal);

    let body = format!(
        r#"<section class="post">
  <h1 id="{anchor}">{title}</h1>
  <p class="dateline">Posted {posted}</p>
  <div class="message">
{text}
  </div>
  <div class="clip">
    <a href="{link}"><img src="images/{image}" alt="Video preview for {title}"/></a>
    <p class="caption">Tap the image to watch the full video on the page.</p>
  </div>
  <h2>Why watch</h2>
  <p>Video {number} in this collection. Short clips like this one are easiest to remember when you watch them more than once and try the idea yourself straight away.</p>
  <h2>Reflection</h2>
  <p>What is one thing from this clip you could use today? Jot it down before moving on to the next video.</p>
  <p class="hashtags">{hashtag}</p>
</section>"#,
        anchor = anchor,
        title = escape(&title),
        posted = escape(&posted),
        text = text,
        link = escape(&post.permalink()),
        image = escape(&image_name),
        number = ordinal + 1,
        hashtag = escape(hashtag),
    );

    let mut images = vec![media.display.clone()];
    if let Some(thumb) = &media.thumbnail {
        if thumb != &media.display {
            images.push(thumb.clone());
        }
    }
    Chapter {
        title,
        anchor,
        body,
        images,
        thumbnail: media.thumbnail.clone().or_else(|| Some(media.display.clone())),
    }
}

/// Index chapter listing every chapter with its thumbnail and a link to its heading.
pub fn index_chapter(chapters: &[Chapter]) -> Chapter {
    let mut entries = String::new();
    let mut images = Vec::new();
    for ch in chapters {
        let thumb = ch
            .thumbnail
            .as_ref()
            .map(|t| {
                images.push(t.clone());
                format!(
                    r#"<img src="images/{}" alt="" class="thumb"/>"#,
                    escape(&file_name(t))
                )
            })
            .unwrap_or_default();
        entries.push_str(&format!(
            "    <li><a href=\"{file}#{anchor}\">{thumb}<span>{title}</span></a></li>\n",
            file = ch.file_name(),
            anchor = ch.anchor,
            thumb = thumb,
            title = escape(&ch.title),
        ));
    }
    let body = format!(
        r#"<section class="index">
  <h1 id="{anchor}">{title}</h1>
  <p>{count} videos in this book.</p>
  <ul class="video-index">
{entries}  </ul>
</section>"#,
        anchor = INDEX_ANCHOR,
        title = INDEX_TITLE,
        count = chapters.len(),
        entries = entries,
    );
    Chapter {
        title: INDEX_TITLE.to_string(),
        anchor: INDEX_ANCHOR.to_string(),
        body,
        images,
        thumbnail: None,
    }
}

fn paragraphs(message: &str) -> String {
    message
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| {
            let lines: Vec<String> = p.lines().map(escape).collect();
            format!("<p>{}</p>", lines.join("<br/>"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub(crate) fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
