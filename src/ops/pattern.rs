// ============================================================================
// BACKGROUND PATTERNS - paper fill plus grid / ruled lines / dot grid
// ============================================================================

use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::theme::Palette;

/// Ruling pitch in surface pixels.
pub const PATTERN_PITCH: u32 = 20;

/// Dot radius for `BackgroundKind::Dots`.
pub const DOT_RADIUS: f32 = 1.5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundKind {
    #[default]
    Blank,
    Grid,
    Lines,
    Dots,
}

impl BackgroundKind {
    pub fn all() -> &'static [BackgroundKind] {
        &[
            BackgroundKind::Blank,
            BackgroundKind::Grid,
            BackgroundKind::Lines,
            BackgroundKind::Dots,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BackgroundKind::Blank => "blank",
            BackgroundKind::Grid => "grid",
            BackgroundKind::Lines => "lines",
            BackgroundKind::Dots => "dots",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|k| k.name().eq_ignore_ascii_case(name))
    }
}

/// Render a background. Pure: the same arguments always yield the same bytes,
/// so the base layer can be re-derived on every size or theme change.
pub fn generate(width: u32, height: u32, kind: BackgroundKind, palette: &Palette) -> RgbaImage {
    let mut out = RgbaImage::from_pixel(width, height, palette.paper);
    if kind == BackgroundKind::Blank || width == 0 || height == 0 {
        return out;
    }

    let paper = palette.paper;
    let rule = palette.rule;
    let row_bytes = width as usize * 4;
    out.par_chunks_mut(row_bytes)
        .enumerate()
        .for_each(|(y, row)| {
            let y = y as u32;
            for x in 0..width {
                let t = match kind {
                    BackgroundKind::Blank => 0.0,
                    BackgroundKind::Grid => rule_coverage(on_rule(x) || on_rule(y)),
                    BackgroundKind::Lines => rule_coverage(on_rule(y)),
                    BackgroundKind::Dots => dot_coverage(x, y),
                };
                if t > 0.0 {
                    let i = x as usize * 4;
                    row[i..i + 4].copy_from_slice(&mix(paper, rule, t).0);
                }
            }
        });
    out
}

#[inline]
fn on_rule(v: u32) -> bool {
    v % PATTERN_PITCH == 0
}

#[inline]
fn rule_coverage(hit: bool) -> f32 {
    if hit { 1.0 } else { 0.0 }
}

/// Anti-aliased dot coverage around the nearest pitch intersection.
fn dot_coverage(x: u32, y: u32) -> f32 {
    let dx = nearest_offset(x);
    let dy = nearest_offset(y);
    let d = (dx * dx + dy * dy).sqrt() - DOT_RADIUS;
    (0.5 - d).clamp(0.0, 1.0)
}

/// Signed distance from a pixel centre to the closest multiple of the pitch.
fn nearest_offset(v: u32) -> f32 {
    let pitch = PATTERN_PITCH as f32;
    let centre = v as f32 + 0.5;
    let nearest = (centre / pitch).round() * pitch;
    centre - nearest
}

fn mix(a: Rgba<u8>, b: Rgba<u8>, t: f32) -> Rgba<u8> {
    let lerp = |c: usize| (a[c] as f32 + (b[c] as f32 - a[c] as f32) * t).round() as u8;
    Rgba([lerp(0), lerp(1), lerp(2), lerp(3)])
}
