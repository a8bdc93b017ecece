// ============================================================================
// INK OPERATIONS - clear / insert image
// ============================================================================

use image::{RgbaImage, imageops};

use crate::canvas::{Compositing, Surface};
use crate::components::history::HistoryManager;

/// Wipe the ink layer and record it as one undoable step.
pub fn clear(surface: &mut Surface, history: &mut HistoryManager) {
    surface.clear_preview();
    surface.ink_mut().clear();
    history.push(surface.ink_snapshot(), "Clear");
}

/// Placement of an inserted image: top-left corner and scaled size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Placement {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Centre `src` on a `w`×`h` surface, shrinking (never enlarging) it to fit
/// while keeping its aspect ratio. `None` for empty input.
pub fn fit_centered(src_w: u32, src_h: u32, w: u32, h: u32) -> Option<Placement> {
    if src_w == 0 || src_h == 0 || w == 0 || h == 0 {
        return None;
    }
    let scale = (w as f64 / src_w as f64).min(h as f64 / src_h as f64).min(1.0);
    let width = ((src_w as f64 * scale).round() as u32).clamp(1, w);
    let height = ((src_h as f64 * scale).round() as u32).clamp(1, h);
    Some(Placement { x: (w - width) / 2, y: (h - height) / 2, width, height })
}

/// Composite an external image over the ink layer, centred and fitted, then
/// push a history entry. Returns where it landed.
pub fn insert_image(surface: &mut Surface, history: &mut HistoryManager, image: &RgbaImage) -> Option<Placement> {
    let (w, h) = surface.dimensions();
    let Some(place) = fit_centered(image.width(), image.height(), w, h) else {
        log::warn!("insert_image: ignoring empty {}×{} image", image.width(), image.height());
        return None;
    };
    let scaled;
    let src = if (place.width, place.height) == image.dimensions() {
        image
    } else {
        scaled = imageops::resize(image, place.width, place.height, imageops::FilterType::Triangle);
        &scaled
    };

    let ink = surface.ink_mut();
    for (sx, sy, px) in src.enumerate_pixels() {
        if px[3] == 0 {
            continue;
        }
        let (x, y) = (place.x + sx, place.y + sy);
        let dst = *ink.get_pixel(x, y);
        ink.put_pixel(x, y, Compositing::Normal.apply(dst, *px, 1.0));
    }
    history.push(surface.ink_snapshot(), "Insert image");
    log::debug!(
        "inserted {}×{} image at ({}, {}) as {}×{}",
        image.width(),
        image.height(),
        place.x,
        place.y,
        place.width,
        place.height
    );
    Some(place)
}
