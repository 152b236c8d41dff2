//! EPUB 3 writer. Packages the cover, ordered chapters and their images into one file
//! (mimetype, container, OPF, nav.xhtml, toc.ncx, cover page, chapter documents).

use crate::model::Chapter;
use std::collections::BTreeMap;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const MIMETYPE: &[u8] = b"application/epub+zip";
const OEBPS_PREFIX: &str = "OEBPS/";
const CONTAINER_XML: &[u8] = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<container version=\"1.0\" xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\">\n  <rootfiles>\n    <rootfile full-path=\"OEBPS/content.opf\" media-type=\"application/oebps-package+xml\"/>\n  </rootfiles>\n</container>";
const STYLESHEET: &str = r#"body { font-family: serif; margin: 0 1em; }
h1 { font-size: 1.4em; margin-top: 1em; }
h2 { font-size: 1.1em; margin-top: 1.2em; }
.dateline { color: #666; font-size: 0.9em; }
.clip { text-align: center; margin: 1em 0; }
.clip img { max-width: 100%; height: auto; }
.caption { font-size: 0.85em; color: #666; }
.hashtags { font-weight: bold; }
ul.video-index { list-style: none; padding: 0; }
ul.video-index li { margin: 0.6em 0; }
ul.video-index img.thumb { width: 6em; height: auto; vertical-align: middle; margin-right: 0.6em; }
.cover { text-align: center; }
.cover img { max-width: 100%; height: auto; }
"#;

/// Everything the writer needs. Chapters are written in slice order.
#[derive(Debug, Clone, Copy)]
pub struct EpubBook<'a> {
    pub title: &'a str,
    pub author: &'a str,
    pub language: &'a str,
    /// JPEG or PNG shown on the cover page and flagged as the cover image.
    pub cover_image: Option<&'a Path>,
    pub chapters: &'a [Chapter],
}

#[derive(Debug, Error)]
pub enum EpubError {
    #[error("Cannot write EPUB: book title is empty.")]
    EmptyTitle,

    #[error("Cannot write EPUB: book author is empty.")]
    EmptyAuthor,

    #[error("Cannot write EPUB: book has no chapters.")]
    NoChapters,

    #[error("Cannot write EPUB: two chapters share the id {anchor}.")]
    DuplicateChapter { anchor: String },

    #[error("Cannot read image for EPUB: {path}: {source}")]
    ReadImage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create EPUB file: {path}: {source}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write EPUB archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl From<std::io::Error> for EpubError {
    fn from(e: std::io::Error) -> Self {
        EpubError::Zip(zip::result::ZipError::Io(e))
    }
}

/// One image file packaged under `OEBPS/images/`.
#[derive(Debug)]
struct ImageItem {
    id: String,
    href: String,
    source: PathBuf,
    media_type: &'static str,
}

/// Write `book` to `path` as EPUB 3 with an EPUB 2 NCX for older readers.
pub fn write_epub(book: &EpubBook<'_>, path: &Path) -> Result<(), EpubError> {
    validate_book(book)?;
    let images = collect_images(book.chapters);
    let cover = book.cover_image.map(|p| ImageItem {
        id: "cover-image".to_string(),
        href: format!("images/cover.{}", extension_of(p)),
        source: p.to_path_buf(),
        media_type: media_type_for(p),
    });
    let identifier = format!("urn:uuid:{}", uuid::Uuid::new_v4());
    let modified = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

    let file = std::fs::File::create(path).map_err(|e| EpubError::CreateFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut zip = ZipWriter::new(file);
    let stored = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .unix_permissions(0o644);
    let deflated = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    // mimetype must be the first entry and uncompressed.
    zip.start_file("mimetype", stored)?;
    zip.write_all(MIMETYPE)?;
    zip.start_file("META-INF/container.xml", deflated)?;
    zip.write_all(CONTAINER_XML)?;

    let opf = package_document(book, cover.as_ref(), &images, &identifier, &modified);
    put_text(&mut zip, "content.opf", &opf, deflated)?;
    put_text(&mut zip, "nav.xhtml", &nav_document(book), deflated)?;
    put_text(&mut zip, "toc.ncx", &ncx_document(book, &identifier), deflated)?;
    put_text(&mut zip, "style.css", STYLESHEET, deflated)?;
    if let Some(cover) = &cover {
        put_text(&mut zip, "cover.xhtml", &cover_document(book, cover), deflated)?;
    }
    for chapter in book.chapters {
        put_text(&mut zip, &chapter.file_name(), &chapter_document(chapter), deflated)?;
    }

    // Already-compressed media gains nothing from deflate.
    for item in cover.iter().chain(images.iter()) {
        let bytes = std::fs::read(&item.source).map_err(|e| EpubError::ReadImage {
            path: item.source.clone(),
            source: e,
        })?;
        zip.start_file(format!("{}{}", OEBPS_PREFIX, item.href), stored)?;
        zip.write_all(&bytes)?;
    }

    zip.finish()?;
    tracing::info!(
        path = %path.display(),
        chapters = book.chapters.len(),
        images = images.len(),
        "EPUB written"
    );
    Ok(())
}

fn validate_book(book: &EpubBook<'_>) -> Result<(), EpubError> {
    if book.title.trim().is_empty() {
        return Err(EpubError::EmptyTitle);
    }
    if book.author.trim().is_empty() {
        return Err(EpubError::EmptyAuthor);
    }
    if book.chapters.is_empty() {
        return Err(EpubError::NoChapters);
    }
    let mut seen = std::collections::HashSet::new();
    for ch in book.chapters {
        if !seen.insert(ch.anchor.as_str()) {
            return Err(EpubError::DuplicateChapter {
                anchor: ch.anchor.clone(),
            });
        }
    }
    Ok(())
}

/// Unique images across all chapters, keyed by file name (first source wins).
fn collect_images(chapters: &[Chapter]) -> Vec<ImageItem> {
    let mut by_name: BTreeMap<String, PathBuf> = BTreeMap::new();
    for path in chapters.iter().flat_map(|c| c.images.iter()) {
        if let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) {
            by_name.entry(name).or_insert_with(|| path.clone());
        }
    }
    by_name
        .into_iter()
        .enumerate()
        .map(|(i, (name, source))| ImageItem {
            id: format!("img-{}", i + 1),
            media_type: media_type_for(&source),
            href: format!("images/{}", name),
            source,
        })
        .collect()
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_else(|| "jpg".to_string())
}

fn media_type_for(path: &Path) -> &'static str {
    match extension_of(path).as_str() {
        "gif" => "image/gif",
        "png" => "image/png",
        "webp" => "image/webp",
        _ => "image/jpeg",
    }
}

fn put_text(
    zip: &mut ZipWriter<impl Write + Seek>,
    name: &str,
    contents: &str,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    zip.start_file(format!("{}{}", OEBPS_PREFIX, name), options)?;
    zip.write_all(contents.as_bytes())?;
    Ok(())
}

fn package_document(
    book: &EpubBook<'_>,
    cover: Option<&ImageItem>,
    images: &[ImageItem],
    identifier: &str,
    modified: &str,
) -> String {
    let mut manifest = String::from(
        r#"    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="css" href="style.css" media-type="text/css"/>
"#,
    );
    let mut spine = String::new();
    if let Some(cover) = cover {
        manifest.push_str(&format!(
            "    <item id=\"{}\" href=\"{}\" media-type=\"{}\" properties=\"cover-image\"/>\n",
            cover.id, cover.href, cover.media_type
        ));
        manifest.push_str(
            "    <item id=\"cover\" href=\"cover.xhtml\" media-type=\"application/xhtml+xml\"/>\n",
        );
        spine.push_str("    <itemref idref=\"cover\" linear=\"no\"/>\n");
    }
    for image in images {
        manifest.push_str(&format!(
            "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"/>\n",
            image.id,
            xml_escape(&image.href),
            image.media_type
        ));
    }
    for chapter in book.chapters {
        manifest.push_str(&format!(
            "    <item id=\"{}\" href=\"{}\" media-type=\"application/xhtml+xml\"/>\n",
            chapter.anchor,
            chapter.file_name()
        ));
        spine.push_str(&format!("    <itemref idref=\"{}\"/>\n", chapter.anchor));
    }
    let cover_meta = cover
        .map(|c| format!("    <meta name=\"cover\" content=\"{}\"/>\n", c.id))
        .unwrap_or_default();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="book-id">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="book-id">{identifier}</dc:identifier>
    <dc:title>{title}</dc:title>
    <dc:creator>{creator}</dc:creator>
    <dc:language>{language}</dc:language>
    <meta property="dcterms:modified">{modified}</meta>
{cover_meta}  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine toc="ncx">
{spine}  </spine>
</package>
"#,
        identifier = identifier,
        title = xml_escape(book.title),
        creator = xml_escape(book.author),
        language = xml_escape(book.language),
        modified = modified,
        cover_meta = cover_meta,
        manifest = manifest,
        spine = spine,
    )
}

fn nav_document(book: &EpubBook<'_>) -> String {
    let items: String = book
        .chapters
        .iter()
        .map(|ch| {
            format!(
                "      <li><a href=\"{}\">{}</a></li>\n",
                ch.file_name(),
                xml_escape(&ch.title)
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head>
  <meta charset="UTF-8"/>
  <title>Table of Contents</title>
</head>
<body>
  <nav epub:type="toc" id="toc">
    <h1>Contents</h1>
    <ol>
{items}    </ol>
  </nav>
</body>
</html>
"#,
        items = items
    )
}

fn ncx_document(book: &EpubBook<'_>, identifier: &str) -> String {
    let nav_points: String = book
        .chapters
        .iter()
        .enumerate()
        .map(|(i, ch)| {
            format!(
                r#"    <navPoint id="navpoint-{n}" playOrder="{n}">
      <navLabel><text>{label}</text></navLabel>
      <content src="{src}"/>
    </navPoint>
"#,
                n = i + 1,
                label = xml_escape(&ch.title),
                src = ch.file_name()
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="{uid}"/>
    <meta name="dtb:depth" content="1"/>
  </head>
  <docTitle>
    <text>{title}</text>
  </docTitle>
  <navMap>
{nav_points}  </navMap>
</ncx>
"#,
        uid = identifier,
        title = xml_escape(book.title),
        nav_points = nav_points
    )
}

fn cover_document(book: &EpubBook<'_>, cover: &ImageItem) -> String {
    xhtml_page(
        "Cover",
        &format!(
            "<div class=\"cover\">\n  <img src=\"{}\" alt=\"{}\"/>\n</div>",
            cover.href,
            xml_escape(book.title)
        ),
    )
}

fn chapter_document(chapter: &Chapter) -> String {
    xhtml_page(&xml_escape(&chapter.title), &chapter.body)
}

fn xhtml_page(title: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head>
  <meta charset="UTF-8"/>
  <title>{title}</title>
  <link rel="stylesheet" type="text/css" href="style.css"/>
</head>
<body>
{body}
</body>
</html>
"#,
        title = title,
        body = body
    )
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
