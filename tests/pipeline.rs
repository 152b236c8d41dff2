use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use reelbook::config::{FileConfig, Settings};
use reelbook::pipeline::{run, RunOptions};
use reelbook::{FetchError, HttpTransport};
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::Mutex;

const VIDEO_URL: &str = "https://cdn.test/v/111_222.mp4";
const THUMB_URL: &str = "https://cdn.test/t/111_222.jpg";

/// Serves canned bodies by URL and records every request.
struct FakeGraph {
    bodies: HashMap<String, Vec<u8>>,
    calls: Mutex<Vec<String>>,
}

impl FakeGraph {
    fn new(bodies: Vec<(String, Vec<u8>)>) -> Self {
        Self {
            bodies: bodies.into_iter().collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpTransport for FakeGraph {
    async fn get(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        self.bodies.get(url).cloned().ok_or_else(|| FetchError::HttpStatus {
            status: 404,
            url: url.to_string(),
            detail: None,
        })
    }
}

fn settings(work: &Path, output: &Path) -> Settings {
    let env: HashMap<&str, String> = [
        ("FB_PAGE_ID", "111".to_string()),
        ("FB_ACCESS_TOKEN", "secret".to_string()),
        ("START_DATE", "2024-03-01".to_string()),
        ("END_DATE", "2024-03-31".to_string()),
        ("BOOK_TITLE", "Knot Tying Basics".to_string()),
        ("BOOK_AUTHOR", "Harbor Sailing Club".to_string()),
        ("OUTPUT_FILE", output.display().to_string()),
    ]
    .into_iter()
    .collect();
    let file = FileConfig {
        work_dir: Some(work.to_path_buf()),
        graph_api_base: Some("https://graph.test/v19.0".to_string()),
        ffmpeg_path: Some("reelbook-no-such-transcoder".into()),
        font_path: Some(work.join("no-font.ttf")),
        ..FileConfig::default()
    };
    Settings::resolve(|k| env.get(k).cloned(), Some(&file)).unwrap()
}

fn thumbnail_jpeg() -> Vec<u8> {
    let img = RgbImage::from_pixel(80, 60, Rgb([20, 120, 200]));
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, 80)
        .encode_image(&img)
        .unwrap();
    buf
}

fn feed_page() -> Vec<u8> {
    serde_json::json!({
        "data": [
            {
                "id": "111_222",
                "created_time": "2024-03-04T09:15:00+0000",
                "message": "Bowline in under ten seconds.",
                "attachments": {"data": [{
                    "type": "video_inline",
                    "url": "https://www.facebook.com/111/videos/222",
                    "media": {"source": VIDEO_URL, "image": {"src": THUMB_URL}}
                }]}
            },
            {
                "id": "111_333",
                "created_time": "2024-03-05T09:15:00+0000",
                "message": "Club meeting moved to Thursday."
            }
        ],
        "paging": {}
    })
    .to_string()
    .into_bytes()
}

fn fake_graph(settings: &Settings) -> FakeGraph {
    let first = settings.feed_query().first_page_url().unwrap();
    FakeGraph::new(vec![
        (first, feed_page()),
        (VIDEO_URL.to_string(), b"not really an mp4".to_vec()),
        (THUMB_URL.to_string(), thumbnail_jpeg()),
    ])
}

fn processed_ids(work: &Path) -> Vec<String> {
    serde_json::from_slice(&std::fs::read(work.join("processed_posts.json")).unwrap()).unwrap()
}

fn options() -> RunOptions {
    RunOptions {
        dry_run: false,
        show_progress: false,
    }
}

#[tokio::test]
async fn end_to_end_builds_book_from_video_posts() {
    let tmp = tempfile::tempdir().unwrap();
    let work = tmp.path().join("assets");
    let output = tmp.path().join("book.epub");
    let settings = settings(&work, &output);
    let graph = fake_graph(&settings);

    let summary = run(&settings, &graph, &options()).await.unwrap();
    assert_eq!(summary.fetched, 1);
    assert_eq!(summary.new_posts, 1);
    assert_eq!(summary.chapters, 1);
    assert_eq!(summary.output.as_deref(), Some(output.as_path()));
    assert_eq!(graph.calls_to(VIDEO_URL), 1);
    assert_eq!(graph.calls_to(THUMB_URL), 1);

    assert!(work.join("videos/111_222.mp4").is_file());
    assert!(work.join("thumbnails/111_222.jpg").is_file());
    assert!(!work.join("gifs/111_222.gif").exists());
    assert!(work.join("cover.jpg").is_file());
    assert_eq!(processed_ids(&work), vec!["111_222"]);

    let mut zip = zip::ZipArchive::new(std::fs::File::open(&output).unwrap()).unwrap();
    let chapter_docs: Vec<String> = zip
        .file_names()
        .filter(|n| n.starts_with("OEBPS/") && n.ends_with(".xhtml"))
        .filter(|n| !n.ends_with("nav.xhtml") && !n.ends_with("cover.xhtml"))
        .map(String::from)
        .collect();
    assert_eq!(chapter_docs.len(), 2, "{:?}", chapter_docs);

    let mut opf = String::new();
    zip.by_name("OEBPS/content.opf")
        .unwrap()
        .read_to_string(&mut opf)
        .unwrap();
    assert!(opf.find("idref=\"index\"").unwrap() < opf.find("idref=\"post-111_222\"").unwrap());

    // Without a transcoder the chapter shows the still thumbnail.
    let mut chapter = String::new();
    zip.by_name("OEBPS/post-111_222.xhtml")
        .unwrap()
        .read_to_string(&mut chapter)
        .unwrap();
    assert!(chapter.contains("images/111_222.jpg"));
    assert!(chapter.contains("Bowline in under ten seconds."));
    assert!(zip.by_name("OEBPS/images/111_222.jpg").is_ok());
}

#[tokio::test]
async fn rerun_skips_processed_posts() {
    let tmp = tempfile::tempdir().unwrap();
    let work = tmp.path().join("assets");
    let settings = settings(&work, &tmp.path().join("book.epub"));

    let first = fake_graph(&settings);
    run(&settings, &first, &options()).await.unwrap();

    let second = fake_graph(&settings);
    let summary = run(&settings, &second, &options()).await.unwrap();
    assert_eq!(summary.fetched, 1);
    assert_eq!(summary.new_posts, 0);
    assert!(summary.output.is_none());
    assert_eq!(second.total_calls(), 1, "only the feed page is requested");
    assert_eq!(processed_ids(&work), vec!["111_222"]);
}

#[tokio::test]
async fn post_without_any_image_is_not_recorded() {
    let tmp = tempfile::tempdir().unwrap();
    let work = tmp.path().join("assets");
    let output = tmp.path().join("book.epub");
    let settings = settings(&work, &output);
    let first = settings.feed_query().first_page_url().unwrap();
    // Media URLs are unknown to the fake, so both downloads fail.
    let graph = FakeGraph::new(vec![(first, feed_page())]);

    let summary = run(&settings, &graph, &options()).await.unwrap();
    assert_eq!(summary.new_posts, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.chapters, 0);
    assert!(summary.output.is_none());
    assert!(!output.exists());
    assert!(!work.join("processed_posts.json").exists());
}

#[tokio::test]
async fn failed_feed_writes_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let work = tmp.path().join("assets");
    let output = tmp.path().join("book.epub");
    let settings = settings(&work, &output);
    let graph = FakeGraph::new(Vec::new());

    let summary = run(&settings, &graph, &options()).await.unwrap();
    assert!(summary.partial_feed);
    assert_eq!(summary.fetched, 0);
    assert!(summary.output.is_none());
    assert!(!output.exists());
}

#[tokio::test]
async fn dry_run_counts_without_downloading() {
    let tmp = tempfile::tempdir().unwrap();
    let work = tmp.path().join("assets");
    let output = tmp.path().join("book.epub");
    let settings = settings(&work, &output);
    let graph = fake_graph(&settings);

    let summary = run(
        &settings,
        &graph,
        &RunOptions {
            dry_run: true,
            show_progress: false,
        },
    )
    .await
    .unwrap();
    assert_eq!(summary.new_posts, 1);
    assert_eq!(graph.total_calls(), 1);
    assert!(!work.exists());
    assert!(!output.exists());
}
