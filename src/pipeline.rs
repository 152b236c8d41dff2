//! One harvesting run: fetch the feed, drop posts already processed, download media,
//! make previews, format chapters, compose the cover and write the book.
//!
//! Posts and their attachments are handled strictly one after another. The processed
//! set is persisted after each post, so an interrupted run picks up where it stopped.

use crate::assets::{acquire, asset_key, AssetDirs, AssetKind, AssetStore, PROCESSED_SET_FILE};
use crate::chapter::{format_chapter, index_chapter, PostMedia};
use crate::config::Settings;
use crate::cover::{write_kdp_cover, CoverComposer, CoverError};
use crate::epub::{write_epub, EpubBook, EpubError};
use crate::feed::{fetch_video_posts, HttpTransport};
use crate::model::{Chapter, Post};
use crate::preview::PreviewGenerator;
use crate::processed::{ProcessedSet, ProcessedSetError};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Cannot create working directory {path}: {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    ProcessedSet(#[from] ProcessedSetError),

    #[error("{0}")]
    Cover(#[from] CoverError),

    #[error("{0}")]
    Epub(#[from] EpubError),
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Fetch and filter only; download nothing and write no book.
    pub dry_run: bool,
    pub show_progress: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Video posts returned by the feed.
    pub fetched: usize,
    /// Of those, posts not processed by an earlier run.
    pub new_posts: usize,
    /// Post chapters written (the index chapter is not counted).
    pub chapters: usize,
    /// New posts dropped because no image could be obtained.
    pub skipped: usize,
    /// True when feed pagination stopped on an error.
    pub partial_feed: bool,
    /// Book path; None when nothing was written.
    pub output: Option<PathBuf>,
}

/// Run the whole pipeline with `transport` for every network request.
pub async fn run(
    settings: &Settings,
    transport: &dyn HttpTransport,
    options: &RunOptions,
) -> Result<RunSummary, PipelineError> {
    let outcome = fetch_video_posts(transport, &settings.feed_query()).await;
    let partial_feed = outcome.is_partial();
    let fetched = outcome.posts.len();
    tracing::info!(posts = fetched, pages = outcome.pages, partial = partial_feed, "feed fetched");

    if options.dry_run {
        let processed = ProcessedSet::load(settings.work_dir.join(PROCESSED_SET_FILE))?;
        let new_posts = processed.retain_new(outcome.posts).len();
        tracing::info!(
            new_posts,
            output = %settings.output.display(),
            "dry run; nothing downloaded"
        );
        return Ok(RunSummary {
            fetched,
            new_posts,
            partial_feed,
            ..RunSummary::default()
        });
    }

    let dirs = AssetDirs::create(&settings.work_dir).map_err(|e| PipelineError::WorkDir {
        path: settings.work_dir.clone(),
        source: e,
    })?;
    let mut processed = ProcessedSet::load(dirs.processed_set_path())?;
    let posts = processed.retain_new(outcome.posts);
    let new_posts = posts.len();
    if posts.is_empty() {
        tracing::info!(fetched, "no new video posts; nothing to write");
        return Ok(RunSummary {
            fetched,
            partial_feed,
            ..RunSummary::default()
        });
    }

    let generator = PreviewGenerator::new(settings.preview.clone());
    let progress = progress_bar(posts.len(), options.show_progress);
    let mut chapters: Vec<Chapter> = Vec::with_capacity(posts.len());
    let mut skipped = 0;
    for post in &posts {
        progress.set_message(format!("post {}", post.id));
        match collect_media(settings, transport, &dirs, &generator, post).await {
            Some(media) => {
                chapters.push(format_chapter(post, &media, chapters.len()));
                processed.record(&post.id)?;
            }
            None => {
                tracing::warn!(post_id = %post.id, "no preview or thumbnail; post skipped");
                skipped += 1;
            }
        }
        progress.inc(1);
    }
    progress.finish_and_clear();

    if chapters.is_empty() {
        tracing::warn!(skipped, "no post yielded a chapter; nothing to write");
        return Ok(RunSummary {
            fetched,
            new_posts,
            skipped,
            partial_feed,
            ..RunSummary::default()
        });
    }

    let thumbnails: Vec<PathBuf> = chapters.iter().filter_map(|c| c.thumbnail.clone()).collect();
    let cover_path = dirs.cover_path();
    CoverComposer::with_font_path(settings.font_path.as_deref()).write(
        &settings.title,
        &settings.author,
        &thumbnails,
        &cover_path,
    )?;
    if settings.kdp_cover {
        if let Err(e) = write_kdp_cover(&cover_path, &dirs.kdp_cover_path()) {
            tracing::warn!(error = %e, "print-size cover not written");
        }
    }

    let post_chapters = chapters.len();
    if settings.index_chapter {
        let index = index_chapter(&chapters);
        chapters.insert(0, index);
    }

    write_epub(
        &EpubBook {
            title: &settings.title,
            author: &settings.author,
            language: &settings.language,
            cover_image: Some(&cover_path),
            chapters: &chapters,
        },
        &settings.output,
    )?;

    Ok(RunSummary {
        fetched,
        new_posts,
        chapters: post_chapters,
        skipped,
        partial_feed,
        output: Some(settings.output.clone()),
    })
}

/// Download media for the post's video attachments in order and stop at the first
/// one that yields something to show. Failures fall through to the next attachment.
async fn collect_media(
    settings: &Settings,
    transport: &dyn HttpTransport,
    dirs: &AssetDirs,
    generator: &PreviewGenerator,
    post: &Post,
) -> Option<PostMedia> {
    for (index, attachment) in post.video_attachments().into_iter().enumerate() {
        let video = match attachment.video_url() {
            Some(url) => {
                let key = asset_key(&post.id, index, AssetKind::Video);
                acquire(transport, &dirs.videos, url, &key, &settings.retry)
                    .await
                    .into_path()
            }
            None => None,
        };
        let preview = match &video {
            Some(video) => {
                let target = dirs.gifs.location(&asset_key(&post.id, index, AssetKind::Preview));
                generator.generate(video, &target).await
            }
            None => None,
        };
        let thumbnail = match attachment.thumbnail_url() {
            Some(url) => {
                let key = asset_key(&post.id, index, AssetKind::Thumbnail);
                acquire(transport, &dirs.thumbnails, url, &key, &settings.retry)
                    .await
                    .into_path()
            }
            None => None,
        };
        if let Some(media) = PostMedia::new(preview, thumbnail) {
            return Some(media);
        }
        tracing::debug!(post_id = %post.id, index, "attachment produced no image");
    }
    None
}

fn progress_bar(len: usize, visible: bool) -> indicatif::ProgressBar {
    if !visible {
        return indicatif::ProgressBar::hidden();
    }
    let bar = indicatif::ProgressBar::new(len as u64);
    if let Ok(style) =
        indicatif::ProgressStyle::with_template("{spinner} {msg} [{bar:40}] {pos}/{len} ({elapsed})")
    {
        bar.set_style(
            style
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
                .progress_chars("█▉▊▋▌▍▎▏ "),
        );
    }
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}
