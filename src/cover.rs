//! Cover image: a title/author banner above a grid collage of thumbnails.

use ab_glyph::{FontVec, PxScale};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MAX_COLUMNS: u32 = 3;
pub const CELL_SIZE: u32 = 300;
pub const PADDING: u32 = 40;
pub const BANNER_HEIGHT: u32 = 220;
/// Gap between a thumbnail and the edge of its cell.
const CELL_INSET: u32 = 6;
/// Largest width or height a baseline JPEG can hold.
pub const MAX_JPEG_DIMENSION: u32 = 65535;
const TITLE_PX: f32 = 56.0;
const AUTHOR_PX: f32 = 32.0;
const JPEG_QUALITY: u8 = 90;

pub const KDP_WIDTH: u32 = 1600;
pub const KDP_HEIGHT: u32 = 2560;
const KDP_QUALITY: u8 = 95;

const BACKGROUND: Rgb<u8> = Rgb([24, 28, 38]);
const TITLE_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const AUTHOR_COLOR: Rgb<u8> = Rgb([200, 205, 215]);

/// Fonts tried when no font path is configured.
pub const FALLBACK_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/TTF/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans-Bold.ttf",
    "/System/Library/Fonts/Supplemental/Arial Bold.ttf",
    "/Library/Fonts/Arial Bold.ttf",
    "C:\\Windows\\Fonts\\arialbd.ttf",
];

#[derive(Debug, Error)]
pub enum CoverError {
    #[error("Failed to encode cover image: {0}")]
    Encode(#[from] image::ImageError),

    #[error("Cannot write cover image {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot read cover image {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Grid geometry for a given thumbnail count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverLayout {
    pub columns: u32,
    pub rows: u32,
    pub cell: u32,
    pub width: u32,
    pub height: u32,
}

impl CoverLayout {
    /// columns = min(3, max(1, n)); rows = ceil(n / columns), at least 1.
    ///
    /// Cells shrink below `CELL_SIZE` when the grid would otherwise be taller than
    /// a JPEG can encode. Rows never go below one pixel each, so beyond that the
    /// row count is capped and [Self::capacity] is less than `count`.
    pub fn for_count(count: usize) -> Self {
        let n = u32::try_from(count).unwrap_or(u32::MAX);
        let columns = n.clamp(1, MAX_COLUMNS);
        let grid_height = MAX_JPEG_DIMENSION - BANNER_HEIGHT - PADDING;
        let rows = n.div_ceil(columns).clamp(1, grid_height);
        let cell = CELL_SIZE.min(grid_height / rows);
        Self {
            columns,
            rows,
            cell,
            width: columns * cell + 2 * PADDING,
            height: BANNER_HEIGHT + rows * cell + PADDING,
        }
    }

    /// Number of thumbnails the grid has room for.
    pub fn capacity(&self) -> usize {
        (self.columns as usize) * (self.rows as usize)
    }

    /// Top-left corner of cell `index` (row-major).
    pub fn cell_origin(&self, index: u32) -> (u32, u32) {
        let col = index % self.columns;
        let row = index / self.columns;
        (PADDING + col * self.cell, BANNER_HEIGHT + row * self.cell)
    }
}

/// Encoded cover plus the layout it was drawn with.
#[derive(Debug)]
pub struct Cover {
    pub layout: CoverLayout,
    pub jpeg: Vec<u8>,
    /// Thumbnails actually drawn (failed loads are skipped).
    pub drawn: usize,
}

pub struct CoverComposer {
    font: Option<FontVec>,
}

impl CoverComposer {
    pub fn new(font: Option<FontVec>) -> Self {
        Self { font }
    }

    /// Load the configured font, or the first readable fallback. None means the
    /// banner is drawn without text.
    pub fn with_font_path(configured: Option<&Path>) -> Self {
        let candidates: Vec<PathBuf> = match configured {
            Some(p) => vec![p.to_path_buf()],
            None => FALLBACK_FONTS.iter().map(PathBuf::from).collect(),
        };
        let font = candidates.iter().find_map(|path| {
            let bytes = std::fs::read(path).ok()?;
            match FontVec::try_from_vec(bytes) {
                Ok(font) => {
                    tracing::debug!(font = %path.display(), "cover font loaded");
                    Some(font)
                }
                Err(e) => {
                    tracing::warn!(font = %path.display(), error = %e, "not a usable font");
                    None
                }
            }
        });
        if font.is_none() {
            tracing::warn!("no cover font found; title and author will not be drawn (set font_path)");
        }
        Self::new(font)
    }

    /// Draw the cover and encode it as JPEG.
    pub fn compose(&self, title: &str, author: &str, thumbnails: &[PathBuf]) -> Result<Cover, CoverError> {
        let layout = CoverLayout::for_count(thumbnails.len());
        let mut canvas = RgbImage::from_pixel(layout.width, layout.height, BACKGROUND);

        if let Some(font) = &self.font {
            draw_centered(&mut canvas, font, title, TITLE_PX, 60, TITLE_COLOR);
            draw_centered(&mut canvas, font, author, AUTHOR_PX, 140, AUTHOR_COLOR);
        }

        let inset = CELL_INSET.min(layout.cell / 10);
        let inner = layout.cell.saturating_sub(2 * inset).max(1);
        if thumbnails.len() > layout.capacity() {
            tracing::warn!(
                thumbnails = thumbnails.len(),
                capacity = layout.capacity(),
                "too many thumbnails for one cover; extra ones left out"
            );
        }
        let mut drawn = 0;
        for (i, path) in thumbnails.iter().take(layout.capacity()).enumerate() {
            let thumb = match image::open(path) {
                Ok(img) => img.resize_to_fill(inner, inner, FilterType::Lanczos3).to_rgb8(),
                Err(e) => {
                    tracing::warn!(thumbnail = %path.display(), error = %e, "skipping thumbnail on cover");
                    continue;
                }
            };
            let (x, y) = layout.cell_origin(i as u32);
            imageops::overlay(
                &mut canvas,
                &thumb,
                i64::from(x + inset),
                i64::from(y + inset),
            );
            drawn += 1;
        }

        let jpeg = encode_jpeg(&canvas, JPEG_QUALITY)?;
        Ok(Cover { layout, jpeg, drawn })
    }

    /// Compose and write the cover to `path`.
    pub fn write(&self, title: &str, author: &str, thumbnails: &[PathBuf], path: &Path) -> Result<Cover, CoverError> {
        let cover = self.compose(title, author, thumbnails)?;
        std::fs::write(path, &cover.jpeg).map_err(|e| CoverError::Write {
            path: path.to_path_buf(),
            source: e,
        })?;
        tracing::info!(
            path = %path.display(),
            columns = cover.layout.columns,
            rows = cover.layout.rows,
            thumbnails = cover.drawn,
            "cover written"
        );
        Ok(cover)
    }
}

/// Resize an existing cover to the 1600x2560 print size (Lanczos, JPEG quality 95).
pub fn write_kdp_cover(source: &Path, target: &Path) -> Result<(), CoverError> {
    let img = image::open(source).map_err(|e| CoverError::Read {
        path: source.to_path_buf(),
        source: e,
    })?;
    let resized = img
        .resize_exact(KDP_WIDTH, KDP_HEIGHT, FilterType::Lanczos3)
        .to_rgb8();
    let jpeg = encode_jpeg(&resized, KDP_QUALITY)?;
    std::fs::write(target, jpeg).map_err(|e| CoverError::Write {
        path: target.to_path_buf(),
        source: e,
    })?;
    tracing::info!(path = %target.display(), "print-size cover written");
    Ok(())
}

fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>, CoverError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(img)?;
    Ok(buf)
}

fn draw_centered(canvas: &mut RgbImage, font: &FontVec, text: &str, px: f32, y: i32, color: Rgb<u8>) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    // Shrink long titles until they fit between the side paddings.
    let max_width = canvas.width().saturating_sub(2 * PADDING);
    let mut scale = PxScale::from(px);
    let (mut w, _) = text_size(scale, font, text);
    while w > max_width && scale.x > 12.0 {
        scale = PxScale::from(scale.x * 0.9);
        w = text_size(scale, font, text).0;
    }
    let x = (canvas.width().saturating_sub(w) / 2) as i32;
    draw_text_mut(canvas, color, x, y, scale, font, text);
}
