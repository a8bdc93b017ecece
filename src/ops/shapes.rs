use image::Rgba;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::canvas::{Compositing, TiledImage};

/// Arrowhead wing angle off the shaft.
pub const ARROW_HEAD_ANGLE: f32 = std::f32::consts::FRAC_PI_6;
/// Head length as a multiple of the (floored) stroke width.
pub const ARROW_HEAD_SCALE: f32 = 4.0;
/// Widths below this still get a head sized as if drawn at this width.
pub const ARROW_MIN_WIDTH: f32 = 3.0;

/// Discrete shapes drawn by dragging from a start point to an end point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeKind {
    Line,
    Rectangle,
    Ellipse,
    Arrow,
}

/// Which layer a shape is being rendered for.
///
/// Preview frames are outline-only even for filled shapes; only the commit
/// pass fills. Both passes share the same geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderPass {
    Preview,
    Commit,
}

/// A shape in surface pixel coordinates, between two drag points.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShapeSpec {
    pub kind: ShapeKind,
    pub start: (f32, f32),
    pub end: (f32, f32),
    pub width: f32,
    pub filled: bool,
}

// ============================================================================
// COVERAGE - an anti-aliased alpha mask over a clipped bounding box
// ============================================================================

/// Per-pixel coverage (0..=1) for the region `[x0, x0+width) × [y0, y0+height)`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Coverage {
    pub x0: u32,
    pub y0: u32,
    pub width: u32,
    pub height: u32,
    pub alpha: Vec<f32>,
}

impl Coverage {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Coverage at surface coordinates; zero outside the region.
    pub fn get(&self, x: u32, y: u32) -> f32 {
        if x < self.x0 || y < self.y0 || x >= self.x0 + self.width || y >= self.y0 + self.height {
            return 0.0;
        }
        self.alpha[((y - self.y0) * self.width + (x - self.x0)) as usize]
    }

    /// Iterate `(x, y, coverage)` over covered pixels.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32, f32)> + '_ {
        self.alpha.iter().enumerate().filter(|(_, a)| **a > 0.0).map(move |(i, a)| {
            let i = i as u32;
            (self.x0 + i % self.width, self.y0 + i / self.width, *a)
        })
    }
}

/// Evaluate `coverage_at` for every pixel centre inside the padded float bounds.
fn rasterize<F>(
    min: (f32, f32),
    max: (f32, f32),
    pad: f32,
    canvas_w: u32,
    canvas_h: u32,
    coverage_at: F,
) -> Coverage
where
    F: Fn(f32, f32) -> f32 + Sync,
{
    let x0 = ((min.0 - pad).floor() as i64).max(0);
    let y0 = ((min.1 - pad).floor() as i64).max(0);
    let x1 = ((max.0 + pad).ceil() as i64).min(canvas_w as i64);
    let y1 = ((max.1 + pad).ceil() as i64).min(canvas_h as i64);
    if x1 <= x0 || y1 <= y0 {
        return Coverage::default();
    }
    let width = (x1 - x0) as u32;
    let height = (y1 - y0) as u32;
    let (x0, y0) = (x0 as u32, y0 as u32);

    let mut alpha = vec![0.0f32; width as usize * height as usize];
    alpha
        .par_chunks_mut(width as usize)
        .enumerate()
        .for_each(|(row, out)| {
            let py = (y0 + row as u32) as f32 + 0.5;
            for (col, a) in out.iter_mut().enumerate() {
                let px = (x0 + col as u32) as f32 + 0.5;
                let c = coverage_at(px, py);
                if c > 0.001 {
                    *a = c;
                }
            }
        });

    Coverage { x0, y0, width, height, alpha }
}

// ============================================================================
// SDF helpers - negative inside
// ============================================================================

#[inline]
fn sdf_line_segment(px: f32, py: f32, a: (f32, f32), b: (f32, f32)) -> f32 {
    let dx = b.0 - a.0;
    let dy = b.1 - a.1;
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq <= f32::EPSILON {
        0.0
    } else {
        (((px - a.0) * dx + (py - a.1) * dy) / len_sq).clamp(0.0, 1.0)
    };
    let cx = a.0 + t * dx;
    let cy = a.1 + t * dy;
    ((px - cx) * (px - cx) + (py - cy) * (py - cy)).sqrt()
}

/// Box centred at origin with half-extents (hx, hy).
#[inline]
fn sdf_box(px: f32, py: f32, hx: f32, hy: f32) -> f32 {
    let dx = px.abs() - hx;
    let dy = py.abs() - hy;
    let outside = (dx.max(0.0) * dx.max(0.0) + dy.max(0.0) * dy.max(0.0)).sqrt();
    let inside = dx.max(dy).min(0.0);
    outside + inside
}

/// Ellipse centred at origin (gradient-normalised approximation).
#[inline]
fn sdf_ellipse(px: f32, py: f32, rx: f32, ry: f32) -> f32 {
    let nx = px / rx;
    let ny = py / ry;
    let len = (nx * nx + ny * ny).sqrt();
    if len < 1e-8 {
        return -rx.min(ry);
    }
    let scale = (rx * rx * ny * ny + ry * ry * nx * nx).sqrt() / (rx * ry * len);
    (len - 1.0) / scale
}

/// Signed distance to a triangle (any winding).
fn sdf_triangle(px: f32, py: f32, v: [(f32, f32); 3]) -> f32 {
    let mut d = f32::MAX;
    let mut inside = false;
    let mut j = 2;
    for i in 0..3 {
        d = d.min(sdf_line_segment(px, py, v[i], v[j]));
        let (xi, yi) = v[i];
        let (xj, yj) = v[j];
        if (yi > py) != (yj > py) && px < (xj - xi) * (py - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    if inside { -d } else { d }
}

#[inline]
fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Coverage of a signed distance with a one-pixel anti-aliased edge.
#[inline]
fn coverage_of(d: f32) -> f32 {
    smoothstep(0.5, -0.5, d)
}

// ============================================================================
// FREEHAND
// ============================================================================

/// Round-capped segment from `a` to `b`. `a == b` stamps a dot.
pub fn rasterize_segment(a: (f32, f32), b: (f32, f32), width: f32, canvas_w: u32, canvas_h: u32) -> Coverage {
    let half = width.max(0.0) * 0.5;
    rasterize(
        (a.0.min(b.0), a.1.min(b.1)),
        (a.0.max(b.0), a.1.max(b.1)),
        half + 2.0,
        canvas_w,
        canvas_h,
        |px, py| coverage_of(sdf_line_segment(px, py, a, b) - half),
    )
}

// ============================================================================
// SHAPES
// ============================================================================

/// The two wing tips of an arrowhead at `spec.end`.
pub fn arrow_head(spec: &ShapeSpec) -> [(f32, f32); 2] {
    let (sx, sy) = spec.start;
    let (ex, ey) = spec.end;
    let angle = (ey - sy).atan2(ex - sx);
    let len = spec.width.max(ARROW_MIN_WIDTH) * ARROW_HEAD_SCALE;
    let wing = |offset: f32| {
        let a = angle + offset;
        (ex - len * a.cos(), ey - len * a.sin())
    };
    [wing(-ARROW_HEAD_ANGLE), wing(ARROW_HEAD_ANGLE)]
}

/// Normalised centre and half-extents of the box spanned by the drag points.
fn spanned_box(spec: &ShapeSpec) -> ((f32, f32), (f32, f32)) {
    let min_x = spec.start.0.min(spec.end.0);
    let max_x = spec.start.0.max(spec.end.0);
    let min_y = spec.start.1.min(spec.end.1);
    let max_y = spec.start.1.max(spec.end.1);
    (
        ((min_x + max_x) * 0.5, (min_y + max_y) * 0.5),
        ((max_x - min_x) * 0.5, (max_y - min_y) * 0.5),
    )
}

/// Rasterise a shape for the given pass. Fill (commit only) and outline share
/// one color, so their coverages merge by max.
pub fn rasterize_shape(spec: &ShapeSpec, pass: RenderPass, canvas_w: u32, canvas_h: u32) -> Coverage {
    let half = spec.width.max(0.0) * 0.5;
    let fill = spec.filled && pass == RenderPass::Commit;
    let (centre, extents) = spanned_box(spec);
    let (cx, cy) = centre;
    let (hx, hy) = extents;

    match spec.kind {
        ShapeKind::Line => rasterize_segment(spec.start, spec.end, spec.width, canvas_w, canvas_h),
        // No direction to point the head along.
        ShapeKind::Arrow if hx < 0.25 && hy < 0.25 => {
            rasterize_segment(spec.start, spec.end, spec.width, canvas_w, canvas_h)
        }
        ShapeKind::Arrow => {
            let [w1, w2] = arrow_head(spec);
            let min = (
                spec.start.0.min(spec.end.0).min(w1.0).min(w2.0),
                spec.start.1.min(spec.end.1).min(w1.1).min(w2.1),
            );
            let max = (
                spec.start.0.max(spec.end.0).max(w1.0).max(w2.0),
                spec.start.1.max(spec.end.1).max(w1.1).max(w2.1),
            );
            let (start, end) = (spec.start, spec.end);
            rasterize(min, max, half + 2.0, canvas_w, canvas_h, move |px, py| {
                let stroke = sdf_line_segment(px, py, start, end)
                    .min(sdf_line_segment(px, py, end, w1))
                    .min(sdf_line_segment(px, py, end, w2))
                    - half;
                let mut cov = coverage_of(stroke);
                if fill {
                    cov = cov.max(coverage_of(sdf_triangle(px, py, [end, w1, w2])));
                }
                cov
            })
        }
        ShapeKind::Rectangle => rasterize(
            (cx - hx, cy - hy),
            (cx + hx, cy + hy),
            half + 2.0,
            canvas_w,
            canvas_h,
            move |px, py| {
                let d = sdf_box(px - cx, py - cy, hx, hy);
                let mut cov = coverage_of(d.abs() - half);
                if fill {
                    cov = cov.max(coverage_of(d));
                }
                cov
            },
        ),
        ShapeKind::Ellipse => {
            // A flat ellipse degenerates to its long axis.
            if hx < 0.5 || hy < 0.5 {
                let (a, b) = if hx >= hy {
                    ((cx - hx, cy), (cx + hx, cy))
                } else {
                    ((cx, cy - hy), (cx, cy + hy))
                };
                return rasterize_segment(a, b, spec.width, canvas_w, canvas_h);
            }
            rasterize(
                (cx - hx, cy - hy),
                (cx + hx, cy + hy),
                half + 2.0,
                canvas_w,
                canvas_h,
                move |px, py| {
                    let d = sdf_ellipse(px - cx, py - cy, hx, hy);
                    let mut cov = coverage_of(d.abs() - half);
                    if fill {
                        cov = cov.max(coverage_of(d));
                    }
                    cov
                },
            )
        }
    }
}

/// Blend a coverage mask onto a layer.
pub fn paint_coverage(target: &mut TiledImage, coverage: &Coverage, color: Rgba<u8>, compositing: Compositing) {
    for (x, y, a) in coverage.iter() {
        let dst = *target.get_pixel(x, y);
        target.put_pixel(x, y, compositing.apply(dst, color, a));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(kind: ShapeKind, start: (f32, f32), end: (f32, f32), filled: bool) -> ShapeSpec {
        ShapeSpec { kind, start, end, width: 2.0, filled }
    }

    fn covered(c: &Coverage) -> Vec<(u32, u32, u32)> {
        c.iter().map(|(x, y, a)| (x, y, (a * 1000.0).round() as u32)).collect()
    }

    #[test]
    fn swapped_corners_render_identically() {
        for kind in [ShapeKind::Rectangle, ShapeKind::Ellipse] {
            for filled in [false, true] {
                let a = rasterize_shape(&spec(kind, (10.0, 10.0), (50.0, 40.0), filled), RenderPass::Commit, 100, 100);
                let b = rasterize_shape(&spec(kind, (50.0, 40.0), (10.0, 10.0), filled), RenderPass::Commit, 100, 100);
                assert_eq!(covered(&a), covered(&b), "{kind:?} filled={filled}");
            }
        }
    }

    #[test]
    fn preview_skips_fill() {
        let s = spec(ShapeKind::Rectangle, (10.0, 10.0), (50.0, 40.0), true);
        let preview = rasterize_shape(&s, RenderPass::Preview, 100, 100);
        let commit = rasterize_shape(&s, RenderPass::Commit, 100, 100);
        assert_eq!(preview.get(30, 25), 0.0);
        assert!(commit.get(30, 25) > 0.99);
        // Outline is the same in both passes.
        assert_eq!(preview.get(10, 25), commit.get(10, 25));
    }

    #[test]
    fn unfilled_preview_matches_commit() {
        let s = spec(ShapeKind::Ellipse, (5.0, 5.0), (60.0, 30.0), false);
        let preview = rasterize_shape(&s, RenderPass::Preview, 80, 80);
        let commit = rasterize_shape(&s, RenderPass::Commit, 80, 80);
        assert_eq!(preview, commit);
    }

    #[test]
    fn segment_is_round_capped() {
        let c = rasterize_segment((10.0, 10.0), (30.0, 10.0), 6.0, 50, 50);
        assert!(c.get(20, 10) > 0.99);
        assert!(c.get(8, 10) > 0.5);
        assert_eq!(c.get(20, 20), 0.0);
    }

    #[test]
    fn dot_when_points_coincide() {
        let c = rasterize_segment((10.0, 10.0), (10.0, 10.0), 4.0, 50, 50);
        assert!(c.get(9, 9) > 0.5);
        assert!(!c.is_empty());
    }

    #[test]
    fn thin_arrow_still_gets_visible_head() {
        let s = ShapeSpec { kind: ShapeKind::Arrow, start: (10.0, 50.0), end: (90.0, 50.0), width: 0.5, filled: false };
        let [w1, w2] = arrow_head(&s);
        let head = ((w1.0 - 90.0).powi(2) + (w1.1 - 50.0).powi(2)).sqrt();
        assert!((head - ARROW_MIN_WIDTH * ARROW_HEAD_SCALE).abs() < 1e-3);
        // Wings sit symmetrically behind the tip.
        assert!(w1.0 < 90.0 && w2.0 < 90.0);
        assert!((w1.1 - 50.0 + (w2.1 - 50.0)).abs() < 1e-3);
    }

    #[test]
    fn filled_arrow_fills_head_only_on_commit() {
        let s = ShapeSpec { kind: ShapeKind::Arrow, start: (10.0, 50.0), end: (90.0, 50.0), width: 4.0, filled: true };
        let [w1, _] = arrow_head(&s);
        // A point between the shaft and a wing, inside the head triangle.
        let probe_x = (90.0 + w1.0) / 2.0;
        let probe_y = 50.0 + (w1.1 - 50.0) / 3.0;
        let (px, py) = (probe_x as u32, probe_y as u32);
        let commit = rasterize_shape(&s, RenderPass::Commit, 100, 100);
        assert!(commit.get(px, py) > 0.9);
    }

    #[test]
    fn zero_length_arrow_is_a_dot() {
        let s = spec(ShapeKind::Arrow, (30.0, 30.0), (30.0, 30.0), false);
        let c = rasterize_shape(&s, RenderPass::Commit, 60, 60);
        assert!(c.get(30, 30) > 0.5);
        // No head wings trailing off to the left.
        assert_eq!(c.get(20, 26), 0.0);
        assert!(c.width <= 8 && c.height <= 8);
    }

    #[test]
    fn degenerate_ellipse_draws_a_line() {
        let s = spec(ShapeKind::Ellipse, (10.0, 20.0), (40.0, 20.0), false);
        let c = rasterize_shape(&s, RenderPass::Commit, 60, 60);
        assert!(c.get(25, 19) > 0.5 || c.get(25, 20) > 0.5);
    }

    #[test]
    fn clipped_to_canvas() {
        let c = rasterize_segment((-50.0, -50.0), (5.0, 5.0), 4.0, 10, 10);
        assert_eq!((c.x0, c.y0), (0, 0));
        assert!(c.width <= 10 && c.height <= 10);
        let outside = rasterize_segment((-50.0, -50.0), (-40.0, -40.0), 4.0, 10, 10);
        assert!(outside.is_empty());
    }

    #[test]
    fn paint_coverage_writes_color() {
        let mut layer = TiledImage::new(20, 20);
        let c = rasterize_segment((2.0, 10.0), (18.0, 10.0), 4.0, 20, 20);
        paint_coverage(&mut layer, &c, Rgba([0, 0, 0, 255]), Compositing::Normal);
        assert_eq!(*layer.get_pixel(10, 10), Rgba([0, 0, 0, 255]));
        assert_eq!(layer.get_pixel(10, 2)[3], 0);
    }
}
