use image::{GrayImage, Luma, Rgba};

use crate::canvas::{Compositing, Surface, TiledImage};
use crate::components::history::HistoryManager;
use crate::components::tools::{StrokePoint, ToolConfig};
use crate::ops::shapes::{self, RenderPass};

/// Host-assigned pointer identifier (mouse, pen, or one touch contact).
pub type PointerId = u64;

/// What a pointer event did to the surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputResponse {
    /// Not for us: view mode, wrong pointer, or no gesture in progress.
    Ignored,
    /// Gesture started or advanced; ink or preview may have changed.
    Consumed,
    /// Gesture finished and one history entry was pushed.
    Committed,
}

// ============================================================================
// GESTURE STATE
// ============================================================================

/// Per-gesture paint bookkeeping for continuous tools.
///
/// Coverage is accumulated as a max over every segment of the gesture and
/// recomposited from the ink at gesture start, so overlapping segment joins
/// never darken a translucent stroke.
pub struct FreehandStroke {
    pub pointer: PointerId,
    pub last: StrokePoint,
    origin: TiledImage,
    mask: GrayImage,
    drew: bool,
}

pub enum Gesture {
    Idle,
    Freehand(FreehandStroke),
    Shape {
        pointer: PointerId,
        start: (f32, f32),
        /// Last previewed end point; the commit reuses it.
        current: Option<(f32, f32)>,
    },
}

impl Gesture {
    fn pointer(&self) -> Option<PointerId> {
        match self {
            Gesture::Idle => None,
            Gesture::Freehand(stroke) => Some(stroke.pointer),
            Gesture::Shape { pointer, .. } => Some(*pointer),
        }
    }
}

/// Height-resize drag on the bottom edge of a resizable surface.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeightDrag {
    pub pointer: PointerId,
    pub start_client_y: f32,
    pub start_height: u32,
}

// ============================================================================
// INPUT STATE MACHINE
// ============================================================================

pub struct InputState {
    editable: bool,
    gesture: Gesture,
    height_drag: Option<HeightDrag>,
}

impl Default for InputState {
    fn default() -> Self {
        Self { editable: true, gesture: Gesture::Idle, height_drag: None }
    }
}

impl InputState {
    pub fn editable(&self) -> bool {
        self.editable
    }

    /// Toggle view/edit mode. Leaving edit mode abandons any active gesture.
    pub fn set_editable(&mut self, editable: bool, surface: &mut Surface) {
        if !editable {
            self.abandon(surface);
            self.height_drag = None;
        }
        self.editable = editable;
    }

    pub fn gesture(&self) -> &Gesture {
        &self.gesture
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.gesture, Gesture::Idle)
    }

    /// Pointer currently captured by a gesture or height drag, if any.
    pub fn captured_pointer(&self) -> Option<PointerId> {
        self.gesture.pointer().or(self.height_drag.map(|d| d.pointer))
    }

    pub fn pointer_down(
        &mut self,
        surface: &mut Surface,
        tool: &ToolConfig,
        pointer: PointerId,
        point: StrokePoint,
    ) -> InputResponse {
        if !self.editable || !self.is_idle() || self.height_drag.is_some() {
            return InputResponse::Ignored;
        }
        let (w, h) = surface.dimensions();
        self.gesture = if tool.kind.is_freehand() {
            Gesture::Freehand(FreehandStroke {
                pointer,
                last: point,
                origin: surface.ink_snapshot(),
                mask: GrayImage::new(w, h),
                drew: false,
            })
        } else {
            Gesture::Shape { pointer, start: point.pos(), current: None }
        };
        InputResponse::Consumed
    }

    pub fn pointer_move(
        &mut self,
        surface: &mut Surface,
        tool: &ToolConfig,
        pointer: PointerId,
        point: StrokePoint,
    ) -> InputResponse {
        if !self.editable || self.gesture.pointer() != Some(pointer) {
            return InputResponse::Ignored;
        }
        match &mut self.gesture {
            Gesture::Idle => InputResponse::Ignored,
            Gesture::Freehand(stroke) => {
                let from = stroke.last;
                paint_freehand(surface, tool, stroke, from, point);
                stroke.last = point;
                stroke.drew = true;
                InputResponse::Consumed
            }
            Gesture::Shape { start, current, .. } => {
                *current = Some(point.pos());
                render_shape(surface, tool, *start, point.pos(), RenderPass::Preview);
                InputResponse::Consumed
            }
        }
    }

    /// Finish the gesture. Pointer-leave is routed here too.
    pub fn pointer_up(
        &mut self,
        surface: &mut Surface,
        history: &mut HistoryManager,
        tool: &ToolConfig,
        pointer: PointerId,
        point: StrokePoint,
    ) -> InputResponse {
        if !self.editable || self.gesture.pointer() != Some(pointer) {
            return InputResponse::Ignored;
        }
        match std::mem::replace(&mut self.gesture, Gesture::Idle) {
            Gesture::Idle => InputResponse::Ignored,
            Gesture::Freehand(mut stroke) => {
                if !stroke.drew || point.pos() != stroke.last.pos() {
                    let from = stroke.last;
                    paint_freehand(surface, tool, &mut stroke, from, point);
                }
                history.push(surface.ink_snapshot(), format!("{} stroke", tool.kind.label()));
                InputResponse::Committed
            }
            Gesture::Shape { start, current, .. } => {
                surface.clear_preview();
                // No preview yet (a tap, or a resize dropped it): end at the release point.
                let end = current.unwrap_or(point.pos());
                render_shape(surface, tool, start, end, RenderPass::Commit);
                history.push(surface.ink_snapshot(), tool.kind.label());
                InputResponse::Committed
            }
        }
    }

    pub fn pointer_leave(
        &mut self,
        surface: &mut Surface,
        history: &mut HistoryManager,
        tool: &ToolConfig,
        pointer: PointerId,
        point: StrokePoint,
    ) -> InputResponse {
        self.pointer_up(surface, history, tool, pointer, point)
    }

    /// Drop the active gesture without a history entry, restoring the ink to
    /// what it was when the gesture began.
    pub fn abandon(&mut self, surface: &mut Surface) {
        match std::mem::replace(&mut self.gesture, Gesture::Idle) {
            Gesture::Idle => {}
            Gesture::Freehand(stroke) => {
                log::debug!("abandoning freehand gesture");
                if stroke.drew {
                    surface.restore_ink(&stroke.origin);
                }
            }
            Gesture::Shape { .. } => surface.clear_preview(),
        }
    }

    /// The surface changed size under an active gesture. The preview is
    /// already gone; the shape gesture stays alive and re-previews on the next
    /// move. A freehand stroke restarts its coverage bookkeeping from the
    /// resized ink.
    pub fn surface_resized(&mut self, surface: &Surface) {
        match &mut self.gesture {
            Gesture::Idle => {}
            Gesture::Freehand(stroke) => reseat(stroke, surface),
            Gesture::Shape { current, .. } => *current = None,
        }
    }

    // ------------------------------------------------------------------
    // Height drag
    // ------------------------------------------------------------------

    pub fn begin_height_drag(&mut self, pointer: PointerId, client_y: f32, height: u32) -> bool {
        if !self.editable || !self.is_idle() || self.height_drag.is_some() {
            return false;
        }
        self.height_drag = Some(HeightDrag { pointer, start_client_y: client_y, start_height: height });
        true
    }

    /// Proposed surface height for the current drag position, before bounds.
    /// `scale` maps client pixels to surface pixels.
    pub fn update_height_drag(&self, pointer: PointerId, client_y: f32, scale: f32) -> Option<f32> {
        let drag = self.height_drag.filter(|d| d.pointer == pointer)?;
        Some(drag.start_height as f32 + (client_y - drag.start_client_y) * scale)
    }

    pub fn end_height_drag(&mut self, pointer: PointerId) -> Option<HeightDrag> {
        if self.height_drag.is_some_and(|d| d.pointer == pointer) {
            self.height_drag.take()
        } else {
            None
        }
    }

    pub fn height_drag(&self) -> Option<&HeightDrag> {
        self.height_drag.as_ref()
    }
}

fn reseat(stroke: &mut FreehandStroke, surface: &Surface) {
    let (w, h) = surface.dimensions();
    if stroke.mask.dimensions() != (w, h) {
        stroke.origin = surface.ink_snapshot();
        stroke.mask = GrayImage::new(w, h);
    }
}

fn paint_freehand(
    surface: &mut Surface,
    tool: &ToolConfig,
    stroke: &mut FreehandStroke,
    a: StrokePoint,
    b: StrokePoint,
) {
    reseat(stroke, surface);
    let (w, h) = surface.dimensions();
    let width = tool.stroke_width(a.pressure, b.pressure);
    let coverage = shapes::rasterize_segment(a.pos(), b.pos(), width, w, h);
    if coverage.is_empty() {
        return;
    }
    let color = tool.paint();
    let ink = surface.ink_mut();
    for (x, y, c) in coverage.iter() {
        let level = (c * 255.0).round() as u8;
        let Luma([seen]) = *stroke.mask.get_pixel(x, y);
        if level <= seen {
            continue;
        }
        stroke.mask.put_pixel(x, y, Luma([level]));
        let under = *stroke.origin.get_pixel(x, y);
        ink.put_pixel(x, y, tool.compositing.apply(under, color, level as f32 / 255.0));
    }
}

/// One geometry function for both passes; only the target layer and the fill
/// differ.
fn render_shape(surface: &mut Surface, tool: &ToolConfig, start: (f32, f32), end: (f32, f32), pass: RenderPass) {
    let Some(spec) = tool.shape_spec(start, end) else { return };
    let (w, h) = surface.dimensions();
    let coverage = shapes::rasterize_shape(&spec, pass, w, h);
    let color: Rgba<u8> = tool.paint();
    match pass {
        RenderPass::Preview => {
            surface.clear_preview();
            shapes::paint_coverage(surface.preview_mut(), &coverage, color, Compositing::Normal);
        }
        RenderPass::Commit => {
            shapes::paint_coverage(surface.ink_mut(), &coverage, color, tool.compositing);
        }
    }
}
