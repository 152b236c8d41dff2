//! Asset cache and acquisition.
//!
//! Every asset has a deterministic key derived from the post id and its kind
//! (`<postId>.mp4`, `<postId>.jpg`, `<postId>.gif`). Presence of the key in the
//! store is the cache: a present asset is never fetched again.

use crate::feed::{FetchError, HttpTransport, RetryPolicy};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const VIDEOS_DIR: &str = "videos";
pub const GIFS_DIR: &str = "gifs";
pub const THUMBNAILS_DIR: &str = "thumbnails";
pub const PROCESSED_SET_FILE: &str = "processed_posts.json";
pub const COVER_FILE: &str = "cover.jpg";
pub const KDP_COVER_FILE: &str = "cover_kdp.jpg";

/// Kind of per-post asset; decides the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Video,
    Thumbnail,
    Preview,
}

impl AssetKind {
    pub fn extension(self) -> &'static str {
        match self {
            AssetKind::Video => "mp4",
            AssetKind::Thumbnail => "jpg",
            AssetKind::Preview => "gif",
        }
    }
}

/// Store key for the `index`-th video attachment of a post. The first attachment
/// uses the bare post id; later ones get a `_<n>` suffix.
pub fn asset_key(post_id: &str, index: usize, kind: AssetKind) -> String {
    let stem: String = post_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if index == 0 {
        format!("{}.{}", stem, kind.extension())
    } else {
        format!("{}_{}.{}", stem, index, kind.extension())
    }
}

/// Key/value cache of downloaded bytes.
pub trait AssetStore: Send + Sync {
    fn has(&self, key: &str) -> bool;
    /// Location of a stored asset, or None when absent.
    fn get(&self, key: &str) -> Option<PathBuf>;
    /// Store bytes under `key` and return the asset's location.
    fn put(&self, key: &str, bytes: &[u8]) -> io::Result<PathBuf>;
    /// Location an asset would have under `key`, present or not.
    fn location(&self, key: &str) -> PathBuf;
}

/// Directory-backed store: one file per key.
#[derive(Debug, Clone)]
pub struct FsStore {
    dir: PathBuf,
}

impl FsStore {
    /// Open a store rooted at `dir`, creating the directory tree if needed.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl AssetStore for FsStore {
    fn has(&self, key: &str) -> bool {
        self.dir.join(key).is_file()
    }

    fn get(&self, key: &str) -> Option<PathBuf> {
        let path = self.dir.join(key);
        path.is_file().then_some(path)
    }

    fn put(&self, key: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        let path = self.dir.join(key);
        // Only the final name counts as cached; a crash mid-write leaves just the .part file.
        let partial = self.dir.join(format!("{}.part", key));
        std::fs::write(&partial, bytes)?;
        std::fs::rename(&partial, &path)?;
        Ok(path)
    }

    fn location(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

/// In-memory store for tests. Locations are synthetic paths under `root`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    root: PathBuf,
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AssetStore for MemoryStore {
    fn has(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    fn get(&self, key: &str) -> Option<PathBuf> {
        self.has(key).then(|| self.root.join(key))
    }

    fn put(&self, key: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        self.lock().insert(key.to_string(), bytes.to_vec());
        Ok(self.root.join(key))
    }

    fn location(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

/// Outcome of [acquire].
#[derive(Debug)]
pub enum Acquired {
    /// Already in the store; no request was made.
    Cached(PathBuf),
    Downloaded { path: PathBuf, attempts: u32 },
    /// All attempts failed. The caller skips the asset.
    Failed { attempts: u32, error: FetchError },
}

impl Acquired {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Acquired::Cached(path) | Acquired::Downloaded { path, .. } => Some(path.as_path()),
            Acquired::Failed { .. } => None,
        }
    }

    pub fn into_path(self) -> Option<PathBuf> {
        match self {
            Acquired::Cached(path) | Acquired::Downloaded { path, .. } => Some(path),
            Acquired::Failed { .. } => None,
        }
    }
}

/// Fetch `url` into `store` under `key` unless it is already there.
///
/// Makes at most `retry.max_attempts()` requests. Only retryable errors (network,
/// 5xx, 429) are retried; a failure is reported as [Acquired::Failed], never as a panic
/// or an error that would stop the run.
pub async fn acquire(
    transport: &dyn HttpTransport,
    store: &dyn AssetStore,
    url: &str,
    key: &str,
    retry: &RetryPolicy,
) -> Acquired {
    if let Some(path) = store.get(key) {
        tracing::debug!(key, "asset cached");
        return Acquired::Cached(path);
    }

    let mut attempt = 0;
    loop {
        attempt += 1;
        let error = match transport.get(url).await {
            Ok(bytes) => match store.put(key, &bytes) {
                Ok(path) => {
                    tracing::info!(key, bytes = bytes.len(), attempts = attempt, "asset downloaded");
                    return Acquired::Downloaded {
                        path,
                        attempts: attempt,
                    };
                }
                Err(e) => FetchError::Store {
                    key: key.to_string(),
                    source: e,
                },
            },
            Err(e) => e,
        };

        if attempt >= retry.max_attempts() || !error.is_retryable() {
            tracing::warn!(key, attempts = attempt, error = %error, "asset download failed; skipping");
            return Acquired::Failed {
                attempts: attempt,
                error,
            };
        }
        tracing::debug!(key, attempt, error = %error, "download attempt failed; retrying");
        let delay = retry.delay_after(attempt - 1);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// The working-directory layout: root plus the three asset subdirectories.
#[derive(Debug, Clone)]
pub struct AssetDirs {
    pub root: PathBuf,
    pub videos: FsStore,
    pub gifs: FsStore,
    pub thumbnails: FsStore,
}

impl AssetDirs {
    /// Create (if missing) and open the working directories under `root`.
    pub fn create(root: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            videos: FsStore::open(root.join(VIDEOS_DIR))?,
            gifs: FsStore::open(root.join(GIFS_DIR))?,
            thumbnails: FsStore::open(root.join(THUMBNAILS_DIR))?,
        })
    }

    pub fn processed_set_path(&self) -> PathBuf {
        self.root.join(PROCESSED_SET_FILE)
    }

    pub fn cover_path(&self) -> PathBuf {
        self.root.join(COVER_FILE)
    }

    pub fn kdp_cover_path(&self) -> PathBuf {
        self.root.join(KDP_COVER_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays scripted responses in order and counts requests.
    struct CountingTransport {
        calls: AtomicUsize,
        script: Mutex<VecDeque<Result<Vec<u8>, u16>>>,
    }

    impl CountingTransport {
        fn new(script: Vec<Result<Vec<u8>, u16>>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                script: Mutex::new(script.into()),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HttpTransport for CountingTransport {
        async fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script.lock().unwrap().pop_front() {
                Some(Ok(bytes)) => Ok(bytes),
                Some(Err(status)) => Err(FetchError::HttpStatus {
                    status,
                    url: url.to_string(),
                    detail: None,
                }),
                None => Err(FetchError::HttpStatus {
                    status: 503,
                    url: url.to_string(),
                    detail: None,
                }),
            }
        }
    }

    #[test]
    fn asset_key_is_deterministic() {
        assert_eq!(asset_key("100_200", 0, AssetKind::Video), "100_200.mp4");
        assert_eq!(asset_key("100_200", 0, AssetKind::Thumbnail), "100_200.jpg");
        assert_eq!(asset_key("100_200", 0, AssetKind::Preview), "100_200.gif");
        assert_eq!(asset_key("100_200", 2, AssetKind::Video), "100_200_2.mp4");
        assert_eq!(asset_key("a/b c", 0, AssetKind::Video), "a_b_c.mp4");
    }

    #[tokio::test]
    async fn cache_hit_makes_no_request() {
        let store = MemoryStore::new("/mem");
        store.put("1.mp4", b"video").unwrap();
        let transport = CountingTransport::new(vec![]);
        let result = acquire(&transport, &store, "https://v/1.mp4", "1.mp4", &RetryPolicy::default()).await;
        assert!(matches!(result, Acquired::Cached(_)));
        assert_eq!(result.path(), Some(Path::new("/mem/1.mp4")));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn miss_downloads_and_stores() {
        let store = MemoryStore::new("/mem");
        let transport = CountingTransport::new(vec![Ok(b"jpeg".to_vec())]);
        let result = acquire(&transport, &store, "https://i/1.jpg", "1.jpg", &RetryPolicy::default()).await;
        assert!(matches!(result, Acquired::Downloaded { attempts: 1, .. }));
        assert_eq!(store.bytes("1.jpg").as_deref(), Some(b"jpeg".as_slice()));
        assert_eq!(transport.calls(), 1);

        // Second acquisition is served from the store.
        let again = acquire(&transport, &store, "https://i/1.jpg", "1.jpg", &RetryPolicy::default()).await;
        assert!(matches!(again, Acquired::Cached(_)));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let store = MemoryStore::new("/mem");
        let transport = CountingTransport::new(vec![Err(503), Err(500), Ok(b"ok".to_vec())]);
        let result = acquire(&transport, &store, "https://v/1.mp4", "1.mp4", &RetryPolicy::immediate(2)).await;
        assert!(matches!(result, Acquired::Downloaded { attempts: 3, .. }));
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn retries_are_bounded_and_failure_is_reported() {
        let store = MemoryStore::new("/mem");
        let transport = CountingTransport::new(vec![Err(503), Err(503), Err(503), Ok(b"late".to_vec())]);
        let result = acquire(&transport, &store, "https://v/1.mp4", "1.mp4", &RetryPolicy::immediate(2)).await;
        match result {
            Acquired::Failed { attempts, error } => {
                assert_eq!(attempts, 3);
                assert!(matches!(error, FetchError::HttpStatus { status: 503, .. }));
            }
            other => panic!("expected Failed, got {:?}", other),
        }
        assert_eq!(transport.calls(), 3);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let store = MemoryStore::new("/mem");
        let transport = CountingTransport::new(vec![Err(404), Ok(b"never".to_vec())]);
        let result = acquire(&transport, &store, "https://v/1.mp4", "1.mp4", &RetryPolicy::immediate(2)).await;
        assert!(matches!(result, Acquired::Failed { attempts: 1, .. }));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn fs_store_round_trip_and_cache_by_presence() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsStore::open(tmp.path().join("nested").join("videos")).unwrap();
        assert!(store.dir().is_dir());
        assert!(!store.has("1.mp4"));
        assert!(store.get("1.mp4").is_none());

        let transport = CountingTransport::new(vec![Ok(b"bytes".to_vec())]);
        let result = acquire(&transport, &store, "https://v/1.mp4", "1.mp4", &RetryPolicy::default()).await;
        let path = result.into_path().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"bytes");
        assert!(store.has("1.mp4"));
        assert!(!store.dir().join("1.mp4.part").exists());

        let fresh = CountingTransport::new(vec![]);
        let cached = acquire(&fresh, &store, "https://v/1.mp4", "1.mp4", &RetryPolicy::default()).await;
        assert!(matches!(cached, Acquired::Cached(_)));
        assert_eq!(fresh.calls(), 0);
    }

    #[test]
    fn asset_dirs_create_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("ebook_assets");
        let dirs = AssetDirs::create(&root).unwrap();
        assert!(root.join(VIDEOS_DIR).is_dir());
        assert!(root.join(GIFS_DIR).is_dir());
        assert!(root.join(THUMBNAILS_DIR).is_dir());
        assert_eq!(dirs.processed_set_path(), root.join(PROCESSED_SET_FILE));
        assert_eq!(dirs.cover_path(), root.join(COVER_FILE));
        assert!(AssetDirs::create(&root).is_ok());
    }
}
