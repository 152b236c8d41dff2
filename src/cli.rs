//! CLI parsing and orchestration. Resolves settings from env, config file and flags,
//! runs the pipeline and maps errors to exit codes.

use crate::config::{self, ConfigError, Settings, ENV_VARS};
use crate::feed::HttpClient;
use crate::pipeline::{self, PipelineError, RunOptions, RunSummary};
use clap::Parser;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Pipeline(#[from] PipelineError),
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliRunError::Config(_) | CliRunError::InvalidInput(_) => 1,
            CliRunError::Pipeline(PipelineError::ProcessedSet(_)) => 2,
            CliRunError::Pipeline(_) => 3,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "reelbook")]
#[command(about = "Collect a Facebook page's video posts into an EPUB with animated previews")]
#[command(
    after_help = "Required environment: FB_PAGE_ID, FB_ACCESS_TOKEN, START_DATE, END_DATE (YYYY-MM-DD), BOOK_TITLE, BOOK_AUTHOR. Optional: OUTPUT_FILE.\nConfig file keys (work_dir, graph_api_base, page_size, user_agent, timeout_secs, retry_count, retry_backoff_secs, ffmpeg_path, preview_seconds, preview_fps, preview_width, font_path, index_chapter, kdp_cover) are read from ./reelbook.toml or $XDG_CONFIG_HOME/reelbook/config.toml. CLI flags override environment and config."
)]
pub struct Args {
    /// Output EPUB path (overrides OUTPUT_FILE; default facebook_videos.epub).
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Working directory for downloads, previews, cover and processed-post list.
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Do not prepend the linked video index chapter.
    #[arg(long)]
    pub no_index: bool,

    /// Also write a 1600x2560 print cover next to cover.jpg.
    #[arg(long)]
    pub kdp_cover: bool,

    /// Fetch the feed and report how many posts are new, without downloading or writing.
    #[arg(long)]
    pub dry_run: bool,

    /// Suppress progress output (warnings and errors only).
    #[arg(short, long)]
    pub quiet: bool,

    /// Debug logging and the full error chain.
    #[arg(long)]
    pub verbose: bool,
}

impl Args {
    /// Apply flag overrides on top of resolved settings.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(output) = &self.output {
            settings.output = output.clone();
        }
        if let Some(work_dir) = &self.work_dir {
            settings.work_dir = work_dir.clone();
        }
        if self.no_index {
            settings.index_chapter = false;
        }
        if self.kdp_cover {
            settings.kdp_cover = true;
        }
    }
}

/// Snapshot of the variables `Settings::resolve` reads.
fn read_env() -> HashMap<String, String> {
    ENV_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok().map(|v| (var.to_string(), v)))
        .collect()
}

/// Ensure the output's parent directory exists.
fn validate_output_path(path: &Path) -> Result<(), CliRunError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            return Err(CliRunError::InvalidInput(format!(
                "Cannot write output: {}: parent directory does not exist.",
                path.display()
            )));
        }
    }
    Ok(())
}

/// Entry point for the CLI. Returns the run summary; Err carries exit code and message.
pub async fn run(args: &Args) -> Result<RunSummary, CliRunError> {
    let file = config::load_config()?;
    let env = read_env();
    let mut settings = Settings::resolve(|var| env.get(var).cloned(), file.as_ref())?;
    args.apply(&mut settings);
    validate_output_path(&settings.output)?;

    let mut builder = HttpClient::builder().timeout_secs(settings.timeout_secs);
    if let Some(ua) = &settings.user_agent {
        builder = builder.user_agent(ua.clone());
    }
    let client = builder
        .build()
        .map_err(|e| CliRunError::InvalidInput(format!("Failed to create HTTP client: {}", e)))?;

    tracing::info!(
        page = %settings.page_id,
        since = %settings.since,
        until = %settings.until,
        work_dir = %settings.work_dir.display(),
        "starting run"
    );
    let options = RunOptions {
        dry_run: args.dry_run,
        show_progress: !args.quiet,
    };
    let summary = pipeline::run(&settings, &client, &options).await?;

    if !args.quiet {
        if args.dry_run {
            eprintln!("New posts: {}", summary.new_posts);
            eprintln!("Output: {}", settings.output.display());
        } else if let Some(path) = &summary.output {
            eprintln!("Wrote {} ({} videos)", path.display(), summary.chapters);
        } else {
            eprintln!("No new video posts; no book written.");
        }
    }
    Ok(summary)
}
