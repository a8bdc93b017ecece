use std::sync::Arc;

use image::{Rgba, RgbaImage, imageops};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::ops::pattern::{self, BackgroundKind};
use crate::theme::Theme;

// ============================================================================
// TILED IMAGE - sparse 64×64 chunk storage with copy-on-write chunks
// ============================================================================

pub const CHUNK_SIZE: u32 = 64;

/// Largest surface we agree to allocate (~256 megapixels).
pub const MAX_PIXELS: u64 = 256_000_000;

static TRANSPARENT_PIXEL: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Sparse tiled image backed by a flat `Vec<Option<Arc<RgbaImage>>>`.
///
/// Chunks are wrapped in `Arc` so `clone()` only bumps reference counts.
/// History snapshots are plain clones of the ink layer; a stroke then
/// COW-clones only the chunks it touches, which is what keeps fifty
/// full-frame snapshots affordable.
#[derive(Clone)]
pub struct TiledImage {
    width: u32,
    height: u32,
    chunks_per_row: u32,
    chunks: Vec<Option<Arc<RgbaImage>>>,
}

impl std::fmt::Debug for TiledImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiledImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("chunks", &self.chunk_count())
            .finish()
    }
}

impl TiledImage {
    /// Create an empty (fully transparent) tiled image.
    pub fn new(width: u32, height: u32) -> Self {
        let (width, height) = if dimensions_valid(width, height) {
            (width, height)
        } else {
            log::warn!("TiledImage::new: {}×{} is out of range, clamped to 1×1", width, height);
            (1, 1)
        };
        let chunks_per_row = width.div_ceil(CHUNK_SIZE);
        let chunks_per_col = height.div_ceil(CHUNK_SIZE);
        Self {
            width,
            height,
            chunks_per_row,
            chunks: vec![None; (chunks_per_row * chunks_per_col) as usize],
        }
    }

    /// Import from a flat `RgbaImage`. Only chunks with visible pixels are stored.
    pub fn from_rgba_image(src: &RgbaImage) -> Self {
        let mut img = Self::new(src.width(), src.height());
        if img.width != src.width() || img.height != src.height() {
            return img;
        }
        let width = img.width;
        let height = img.height;
        let chunks_x = img.chunks_per_row as usize;
        let total = img.chunks.len();

        let built: Vec<Option<Arc<RgbaImage>>> = (0..total)
            .into_par_iter()
            .map(|flat| {
                let base_x = (flat % chunks_x) as u32 * CHUNK_SIZE;
                let base_y = (flat / chunks_x) as u32 * CHUNK_SIZE;
                let cw = CHUNK_SIZE.min(width - base_x);
                let ch = CHUNK_SIZE.min(height - base_y);
                let mut chunk = RgbaImage::new(CHUNK_SIZE, CHUNK_SIZE);
                let mut has_content = false;
                for ly in 0..ch {
                    for lx in 0..cw {
                        let px = *src.get_pixel(base_x + lx, base_y + ly);
                        if px[3] != 0 {
                            has_content = true;
                            chunk.put_pixel(lx, ly, px);
                        }
                    }
                }
                has_content.then(|| Arc::new(chunk))
            })
            .collect();

        img.chunks = built;
        img
    }

    /// Flatten into a contiguous `RgbaImage`.
    pub fn to_rgba_image(&self) -> RgbaImage {
        let mut out = RgbaImage::new(self.width, self.height);
        for (cx, cy) in self.chunk_keys().collect::<Vec<_>>() {
            let Some(chunk) = self.get_chunk(cx, cy) else { continue };
            let base_x = cx * CHUNK_SIZE;
            let base_y = cy * CHUNK_SIZE;
            let cw = CHUNK_SIZE.min(self.width - base_x);
            let ch = CHUNK_SIZE.min(self.height - base_y);
            for ly in 0..ch {
                for lx in 0..cw {
                    out.put_pixel(base_x + lx, base_y + ly, *chunk.get_pixel(lx, ly));
                }
            }
        }
        out
    }

    #[inline]
    fn chunk_coord(x: u32, y: u32) -> (u32, u32) {
        (x / CHUNK_SIZE, y / CHUNK_SIZE)
    }

    #[inline]
    fn local(x: u32, y: u32) -> (u32, u32) {
        (x % CHUNK_SIZE, y % CHUNK_SIZE)
    }

    #[inline]
    fn flat_index(&self, cx: u32, cy: u32) -> usize {
        (cy * self.chunks_per_row + cx) as usize
    }

    /// Read a pixel; out-of-bounds and missing chunks read as transparent.
    #[inline]
    pub fn get_pixel(&self, x: u32, y: u32) -> &Rgba<u8> {
        if x >= self.width || y >= self.height {
            return &TRANSPARENT_PIXEL;
        }
        let (cx, cy) = Self::chunk_coord(x, y);
        let (lx, ly) = Self::local(x, y);
        self.chunks[self.flat_index(cx, cy)]
            .as_ref()
            .map(|c| c.get_pixel(lx, ly))
            .unwrap_or(&TRANSPARENT_PIXEL)
    }

    /// Write a pixel (creates the chunk on demand, COW-clones if shared).
    #[inline]
    pub fn put_pixel(&mut self, x: u32, y: u32, pixel: Rgba<u8>) {
        if x >= self.width || y >= self.height {
            return;
        }
        let (cx, cy) = Self::chunk_coord(x, y);
        let (lx, ly) = Self::local(x, y);
        let idx = self.flat_index(cx, cy);
        if pixel[3] == 0 && self.chunks[idx].is_none() {
            return;
        }
        let arc = self.chunks[idx]
            .get_or_insert_with(|| Arc::new(RgbaImage::new(CHUNK_SIZE, CHUNK_SIZE)));
        Arc::make_mut(arc).put_pixel(lx, ly, pixel);
    }

    pub fn get_chunk(&self, cx: u32, cy: u32) -> Option<&RgbaImage> {
        self.chunks.get(self.flat_index(cx, cy)).and_then(|c| c.as_deref())
    }

    /// Iterator over populated chunk coordinates.
    pub fn chunk_keys(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let cpr = self.chunks_per_row;
        self.chunks
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(move |(i, _)| ((i as u32) % cpr, (i as u32) / cpr))
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_some()).count()
    }

    /// Drop all chunks (make the image fully transparent).
    pub fn clear(&mut self) {
        for slot in &mut self.chunks {
            *slot = None;
        }
    }

    /// True when no pixel has any alpha.
    pub fn is_blank(&self) -> bool {
        self.chunks
            .iter()
            .flatten()
            .all(|chunk| chunk.pixels().all(|p| p[3] == 0))
    }

    /// Pixel-wise equality. Chunk layout and sharing are ignored.
    pub fn pixels_eq(&self, other: &TiledImage) -> bool {
        if self.width != other.width || self.height != other.height {
            return false;
        }
        self.chunks.iter().zip(&other.chunks).all(|(a, b)| match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) if Arc::ptr_eq(a, b) => true,
            (Some(a), Some(b)) => a.as_raw() == b.as_raw(),
            (Some(c), None) | (None, Some(c)) => c.pixels().all(|p| p[3] == 0),
        })
    }

    /// Copy into a `width`×`height` image anchored at the top-left corner.
    /// Growing pads with transparency, shrinking clips. Fully retained
    /// chunks are shared, not copied.
    pub fn anchored_copy(&self, width: u32, height: u32) -> TiledImage {
        let mut out = TiledImage::new(width, height);
        let keep_cx = out.chunks_per_row.min(self.chunks_per_row);
        let keep_cy = out.height.div_ceil(CHUNK_SIZE).min(self.height.div_ceil(CHUNK_SIZE));
        let visible_w = out.width.min(self.width);
        let visible_h = out.height.min(self.height);

        for cy in 0..keep_cy {
            for cx in 0..keep_cx {
                let Some(src) = &self.chunks[self.flat_index(cx, cy)] else { continue };
                let base_x = cx * CHUNK_SIZE;
                let base_y = cy * CHUNK_SIZE;
                let mut chunk = Arc::clone(src);
                // Pixels past the visible edge must not survive a later grow.
                let edge_x = visible_w.saturating_sub(base_x).min(CHUNK_SIZE);
                let edge_y = visible_h.saturating_sub(base_y).min(CHUNK_SIZE);
                if edge_x < CHUNK_SIZE || edge_y < CHUNK_SIZE {
                    let data = Arc::make_mut(&mut chunk);
                    for (lx, ly, px) in data.enumerate_pixels_mut() {
                        if lx >= edge_x || ly >= edge_y {
                            *px = TRANSPARENT_PIXEL;
                        }
                    }
                }
                let idx = out.flat_index(cx, cy);
                out.chunks[idx] = Some(chunk);
            }
        }
        out
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Approximate memory owned by this image. Chunks shared with other
    /// snapshots only count their pointer.
    pub fn memory_bytes(&self) -> usize {
        let chunk_bytes = (CHUNK_SIZE * CHUNK_SIZE * 4) as usize;
        self.chunks
            .iter()
            .flatten()
            .map(|arc| {
                if Arc::strong_count(arc) == 1 {
                    chunk_bytes
                } else {
                    std::mem::size_of::<usize>() * 2
                }
            })
            .sum()
    }
}

pub fn dimensions_valid(width: u32, height: u32) -> bool {
    width > 0 && height > 0 && (width as u64) * (height as u64) <= MAX_PIXELS
}

// ============================================================================
// COMPOSITING - straight-alpha pixel blends used by tools and the display pass
// ============================================================================

/// How paint combines with the pixels already on a layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compositing {
    /// Source-over.
    #[default]
    Normal,
    /// Destination-out: coverage removes alpha, color is ignored.
    Erase,
    /// Multiply, then source-over. Darkens what is underneath without hiding it.
    Highlight,
}

impl Compositing {
    /// Blend `color` at `coverage` (0..=1) onto `dst`.
    pub fn apply(self, dst: Rgba<u8>, color: Rgba<u8>, coverage: f32) -> Rgba<u8> {
        let coverage = coverage.clamp(0.0, 1.0);
        if coverage <= 0.0 {
            return dst;
        }
        match self {
            Compositing::Erase => {
                let a = unit(dst[3]) * (1.0 - coverage);
                if a <= 0.0 {
                    TRANSPARENT_PIXEL
                } else {
                    Rgba([dst[0], dst[1], dst[2], to_u8(a)])
                }
            }
            Compositing::Normal => {
                let src_a = unit(color[3]) * coverage;
                if src_a >= 1.0 {
                    return color;
                }
                over(dst, [unit(color[0]), unit(color[1]), unit(color[2])], src_a)
            }
            Compositing::Highlight => {
                let src_a = unit(color[3]) * coverage;
                let dst_a = unit(dst[3]);
                let mut mixed = [0.0f32; 3];
                for (c, m) in mixed.iter_mut().enumerate() {
                    let s = unit(color[c]);
                    let d = unit(dst[c]);
                    *m = (1.0 - dst_a) * s + dst_a * (s * d);
                }
                over(dst, mixed, src_a)
            }
        }
    }
}

/// Source-over with straight alpha.
fn over(dst: Rgba<u8>, src: [f32; 3], src_a: f32) -> Rgba<u8> {
    let dst_a = unit(dst[3]);
    let out_a = src_a + dst_a * (1.0 - src_a);
    if out_a <= 0.0 {
        return TRANSPARENT_PIXEL;
    }
    let channel =
        |c: usize| (src[c] * src_a + unit(dst[c]) * dst_a * (1.0 - src_a)) / out_a;
    Rgba([to_u8(channel(0)), to_u8(channel(1)), to_u8(channel(2)), to_u8(out_a)])
}

#[inline]
fn unit(v: u8) -> f32 {
    v as f32 / 255.0
}

#[inline]
fn to_u8(v: f32) -> u8 {
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

// ============================================================================
// SURFACE - base / ink / preview layers of one drawing cell or PDF page
// ============================================================================

/// What occupies the base layer. Exactly one source at a time.
#[derive(Clone, Debug)]
pub enum BaseSource {
    Pattern(BackgroundKind),
    /// An externally rendered page, kept at its native resolution.
    Page(Arc<RgbaImage>),
}

pub struct Surface {
    width: u32,
    height: u32,
    theme: Theme,
    base_source: BaseSource,
    base: RgbaImage,
    ink: TiledImage,
    preview: TiledImage,
    /// Bumped on every pixel change, for hosts that cache the composite.
    pub generation: u64,
}

impl Surface {
    pub fn new(width: u32, height: u32, base_source: BaseSource, theme: Theme) -> EngineResult<Self> {
        if !dimensions_valid(width, height) {
            return Err(EngineError::InvalidDimensions { width, height });
        }
        let mut surface = Self {
            width,
            height,
            theme,
            base_source,
            base: RgbaImage::new(width, height),
            ink: TiledImage::new(width, height),
            preview: TiledImage::new(width, height),
            generation: 0,
        };
        surface.regenerate_base();
        Ok(surface)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }

    pub fn base_source(&self) -> &BaseSource {
        &self.base_source
    }

    /// Resize all three layers. The base is re-rendered at the new size; ink
    /// keeps its top-left anchored content (see `TiledImage::anchored_copy`);
    /// the preview is discarded.
    pub fn resize(&mut self, width: u32, height: u32) -> EngineResult<()> {
        if !dimensions_valid(width, height) {
            return Err(EngineError::InvalidDimensions { width, height });
        }
        if (width, height) == (self.width, self.height) {
            self.clear_preview();
            return Ok(());
        }
        log::debug!("surface resize {}×{} → {}×{}", self.width, self.height, width, height);
        self.width = width;
        self.height = height;
        self.ink = self.ink.anchored_copy(width, height);
        self.preview = TiledImage::new(width, height);
        self.regenerate_base();
        Ok(())
    }

    /// Replace the base layer source and re-render it synchronously.
    pub fn set_base(&mut self, source: BaseSource) {
        self.base_source = source;
        self.regenerate_base();
    }

    pub fn set_theme(&mut self, theme: Theme) {
        if self.theme == theme {
            return;
        }
        self.theme = theme;
        if matches!(self.base_source, BaseSource::Pattern(_)) {
            self.regenerate_base();
        }
    }

    fn regenerate_base(&mut self) {
        self.base = match &self.base_source {
            BaseSource::Pattern(kind) => {
                pattern::generate(self.width, self.height, *kind, &self.theme.palette())
            }
            BaseSource::Page(page) => {
                if page.dimensions() == (self.width, self.height) {
                    (**page).clone()
                } else {
                    imageops::resize(&**page, self.width, self.height, imageops::FilterType::Triangle)
                }
            }
        };
        self.mark_dirty();
    }

    pub fn base(&self) -> &RgbaImage {
        &self.base
    }

    pub fn ink(&self) -> &TiledImage {
        &self.ink
    }

    pub fn ink_mut(&mut self) -> &mut TiledImage {
        self.mark_dirty();
        &mut self.ink
    }

    pub fn preview(&self) -> &TiledImage {
        &self.preview
    }

    pub fn preview_mut(&mut self) -> &mut TiledImage {
        self.mark_dirty();
        &mut self.preview
    }

    pub fn clear_preview(&mut self) {
        if self.preview.chunk_count() > 0 {
            self.preview.clear();
            self.mark_dirty();
        }
    }

    /// Cheap (copy-on-write) snapshot of the ink pixels.
    pub fn ink_snapshot(&self) -> TiledImage {
        self.ink.clone()
    }

    /// Put snapshot pixels back into the ink layer. A snapshot taken at other
    /// dimensions is anchored top-left and clipped, never stretched.
    pub fn restore_ink(&mut self, pixels: &TiledImage) {
        self.ink = if (pixels.width(), pixels.height()) == (self.width, self.height) {
            pixels.clone()
        } else {
            log::debug!(
                "restoring {}×{} ink into {}×{} surface",
                pixels.width(),
                pixels.height(),
                self.width,
                self.height
            );
            pixels.anchored_copy(self.width, self.height)
        };
        self.mark_dirty();
    }

    /// Base → ink → preview, as shown on screen.
    pub fn composite_for_display(&self) -> RgbaImage {
        let width = self.width;
        let mut out = self.base.clone();
        let row_bytes = width as usize * 4;
        out.par_chunks_mut(row_bytes)
            .enumerate()
            .for_each(|(y, row)| {
                let y = y as u32;
                for x in 0..width {
                    let ink = *self.ink.get_pixel(x, y);
                    let preview = *self.preview.get_pixel(x, y);
                    if ink[3] == 0 && preview[3] == 0 {
                        continue;
                    }
                    let i = x as usize * 4;
                    let mut px = Rgba([row[i], row[i + 1], row[i + 2], row[i + 3]]);
                    px = Compositing::Normal.apply(px, ink, 1.0);
                    px = Compositing::Normal.apply(px, preview, 1.0);
                    row[i..i + 4].copy_from_slice(&px.0);
                }
            });
        out
    }

    pub fn mark_dirty(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn red() -> Rgba<u8> {
        Rgba([255, 0, 0, 255])
    }

    #[test]
    fn tiled_image_reads_back_written_pixels() {
        let mut img = TiledImage::new(130, 70);
        img.put_pixel(129, 69, red());
        img.put_pixel(0, 0, red());
        assert_eq!(*img.get_pixel(129, 69), red());
        assert_eq!(*img.get_pixel(64, 64), TRANSPARENT_PIXEL);
        assert_eq!(*img.get_pixel(500, 500), TRANSPARENT_PIXEL);
        assert_eq!(img.chunk_count(), 2);
    }

    #[test]
    fn clones_share_chunks_until_written() {
        let mut img = TiledImage::new(64, 64);
        img.put_pixel(1, 1, red());
        let snapshot = img.clone();
        img.put_pixel(2, 2, red());
        assert_eq!(*snapshot.get_pixel(2, 2), TRANSPARENT_PIXEL);
        assert!(!snapshot.pixels_eq(&img));
    }

    #[test]
    fn pixels_eq_ignores_empty_chunks() {
        let mut a = TiledImage::new(100, 100);
        a.put_pixel(5, 5, red());
        a.put_pixel(5, 5, TRANSPARENT_PIXEL);
        let b = TiledImage::new(100, 100);
        assert!(a.pixels_eq(&b));
        assert!(a.is_blank());
    }

    #[test]
    fn rgba_round_trip_keeps_pixels() {
        let mut src = RgbaImage::new(70, 3);
        src.put_pixel(69, 2, red());
        let tiled = TiledImage::from_rgba_image(&src);
        assert_eq!(tiled.to_rgba_image(), src);
    }

    #[test]
    fn anchored_copy_clips_and_does_not_resurrect() {
        let mut img = TiledImage::new(100, 100);
        img.put_pixel(10, 10, red());
        img.put_pixel(90, 90, red());
        let shrunk = img.anchored_copy(50, 50);
        assert_eq!(*shrunk.get_pixel(10, 10), red());
        let regrown = shrunk.anchored_copy(100, 100);
        assert_eq!(*regrown.get_pixel(90, 90), TRANSPARENT_PIXEL);
        assert_eq!(*regrown.get_pixel(10, 10), red());
    }

    #[test]
    fn erase_removes_alpha_proportionally() {
        let px = Compositing::Erase.apply(red(), red(), 0.5);
        assert_eq!(px[3], 128);
        assert_eq!(Compositing::Erase.apply(red(), red(), 1.0), TRANSPARENT_PIXEL);
    }

    #[test]
    fn highlight_never_fully_occludes() {
        let black_text = Rgba([0, 0, 0, 255]);
        let yellow = Rgba([255, 235, 59, 90]);
        let once = Compositing::Highlight.apply(black_text, yellow, 1.0);
        assert_eq!(once, black_text);
        let paper = Rgba([255, 255, 255, 255]);
        let mut px = paper;
        for _ in 0..3 {
            px = Compositing::Highlight.apply(px, yellow, 1.0);
        }
        assert!(px[2] < paper[2]);
        assert!(px[0] > 200);
    }

    #[test]
    fn surface_rejects_zero_dimensions() {
        let err = Surface::new(0, 10, BaseSource::Pattern(BackgroundKind::Blank), Theme::Light);
        assert!(matches!(err, Err(EngineError::InvalidDimensions { .. })));
    }

    #[test]
    fn composite_orders_base_ink_preview() {
        let mut surface =
            Surface::new(4, 4, BaseSource::Pattern(BackgroundKind::Blank), Theme::Light).unwrap();
        assert_eq!(*surface.composite_for_display().get_pixel(0, 0), Rgba([255, 255, 255, 255]));
        surface.ink_mut().put_pixel(0, 0, red());
        let blue = Rgba([0, 0, 255, 255]);
        surface.preview_mut().put_pixel(0, 0, blue);
        assert_eq!(*surface.composite_for_display().get_pixel(0, 0), blue);
        surface.clear_preview();
        assert_eq!(*surface.composite_for_display().get_pixel(0, 0), red());
    }

    #[test]
    fn layer_access_bumps_generation_with_wraparound() {
        let mut surface =
            Surface::new(4, 4, BaseSource::Pattern(BackgroundKind::Blank), Theme::Light).unwrap();
        surface.generation = u64::MAX;
        surface.ink_mut();
        assert_eq!(surface.generation, 0);
        surface.preview_mut();
        assert_eq!(surface.generation, 1);
    }

    #[test]
    fn resize_keeps_ink_and_drops_preview() {
        let mut surface =
            Surface::new(40, 40, BaseSource::Pattern(BackgroundKind::Grid), Theme::Light).unwrap();
        surface.ink_mut().put_pixel(3, 3, red());
        surface.preview_mut().put_pixel(4, 4, red());
        surface.resize(40, 80).unwrap();
        assert_eq!(surface.base().dimensions(), (40, 80));
        assert_eq!(*surface.ink().get_pixel(3, 3), red());
        assert!(surface.preview().is_blank());
    }
}
