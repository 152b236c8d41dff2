//! reelbook: collect a Facebook page's video posts over a date window into an EPUB,
//! with animated GIF previews, a thumbnail collage cover and a linked index.

pub mod assets;
pub mod chapter;
pub mod cli;
pub mod config;
pub mod cover;
pub mod epub;
pub mod feed;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod preview;
pub mod processed;

// Re-exports for CLI and consumers.
pub use assets::{acquire, asset_key, Acquired, AssetDirs, AssetKind, AssetStore, FsStore, MemoryStore};
pub use chapter::{format_chapter, index_chapter, PostMedia};
pub use config::{ConfigError, FileConfig, Settings};
pub use cover::{CoverComposer, CoverError, CoverLayout};
pub use epub::{write_epub, EpubBook, EpubError};
pub use feed::{fetch_video_posts, FeedQuery, FetchError, HttpClient, HttpTransport, RetryPolicy};
pub use model::{Chapter, Post};
pub use pipeline::{PipelineError, RunOptions, RunSummary};
pub use preview::{PreviewGenerator, PreviewSettings};
pub use processed::{ProcessedSet, ProcessedSetError};
