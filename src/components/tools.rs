use image::Rgba;
use serde::{Deserialize, Serialize};

use crate::canvas::Compositing;
use crate::ops::shapes::{ShapeKind, ShapeSpec};
use crate::theme::Theme;

/// Eraser width as a multiple of the base width.
pub const ERASER_WIDTH_FACTOR: f32 = 3.0;
/// Highlighter width as a multiple of the base width.
pub const HIGHLIGHTER_WIDTH_FACTOR: f32 = 3.0;
/// Highlighter paint alpha.
pub const HIGHLIGHTER_OPACITY: f32 = 0.35;
/// Pressure assumed when the device reports none.
pub const DEFAULT_PRESSURE: f32 = 0.5;

pub const DEFAULT_BASE_WIDTH: f32 = 3.0;

const HIGHLIGHTER_YELLOW: [u8; 3] = [255, 235, 59];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    #[default]
    Pen,
    Eraser,
    Highlighter,
    Line,
    Rect,
    Ellipse,
    Arrow,
}

impl ToolKind {
    pub fn all() -> &'static [ToolKind] {
        &[
            ToolKind::Pen,
            ToolKind::Eraser,
            ToolKind::Highlighter,
            ToolKind::Line,
            ToolKind::Rect,
            ToolKind::Ellipse,
            ToolKind::Arrow,
        ]
    }

    pub fn label(&self) -> &'static str {
        match self {
            ToolKind::Pen => "Pen",
            ToolKind::Eraser => "Eraser",
            ToolKind::Highlighter => "Highlighter",
            ToolKind::Line => "Line",
            ToolKind::Rect => "Rectangle",
            ToolKind::Ellipse => "Ellipse",
            ToolKind::Arrow => "Arrow",
        }
    }

    /// Continuous tools paint straight onto the ink layer while the pointer moves.
    pub fn is_freehand(&self) -> bool {
        matches!(self, ToolKind::Pen | ToolKind::Eraser | ToolKind::Highlighter)
    }

    pub fn shape_kind(&self) -> Option<ShapeKind> {
        match self {
            ToolKind::Line => Some(ShapeKind::Line),
            ToolKind::Rect => Some(ShapeKind::Rectangle),
            ToolKind::Ellipse => Some(ShapeKind::Ellipse),
            ToolKind::Arrow => Some(ShapeKind::Arrow),
            _ => None,
        }
    }

    pub fn default_compositing(&self) -> Compositing {
        match self {
            ToolKind::Eraser => Compositing::Erase,
            ToolKind::Highlighter => Compositing::Highlight,
            _ => Compositing::Normal,
        }
    }
}

/// One pointer sample in surface pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StrokePoint {
    pub x: f32,
    pub y: f32,
    pub pressure: f32,
}

impl StrokePoint {
    pub fn new(x: f32, y: f32, pressure: Option<f32>) -> Self {
        let pressure = match pressure {
            Some(p) if p.is_finite() => p.clamp(0.0, 1.0),
            _ => DEFAULT_PRESSURE,
        };
        Self { x, y, pressure }
    }

    pub fn pos(&self) -> (f32, f32) {
        (self.x, self.y)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub kind: ToolKind,
    /// Straight RGBA. Ignored by the eraser.
    pub color: [u8; 4],
    pub base_width: f32,
    /// Shapes only: fill before stroking, same color.
    pub filled: bool,
    pub compositing: Compositing,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self::for_kind(ToolKind::Pen, Theme::Light)
    }
}

impl ToolConfig {
    /// Defaults for a tool under the given theme.
    pub fn for_kind(kind: ToolKind, theme: Theme) -> Self {
        let color = match kind {
            ToolKind::Highlighter => {
                let [r, g, b] = HIGHLIGHTER_YELLOW;
                [r, g, b, (HIGHLIGHTER_OPACITY * 255.0).round() as u8]
            }
            _ => theme.palette().ink.0,
        };
        Self {
            kind,
            color,
            base_width: DEFAULT_BASE_WIDTH,
            filled: false,
            compositing: kind.default_compositing(),
        }
    }

    pub fn paint(&self) -> Rgba<u8> {
        Rgba(self.color)
    }

    /// Width of a freehand segment whose endpoints carry `a` and `b` pressure.
    ///
    /// Pen width grows with pressure; eraser and highlighter use a fixed,
    /// wider multiple so they feel like their physical counterparts.
    pub fn stroke_width(&self, a: f32, b: f32) -> f32 {
        let base = self.base_width.max(0.0);
        match self.kind {
            ToolKind::Eraser => base * ERASER_WIDTH_FACTOR,
            ToolKind::Highlighter => base * HIGHLIGHTER_WIDTH_FACTOR,
            _ => {
                let avg = (a.clamp(0.0, 1.0) + b.clamp(0.0, 1.0)) * 0.5;
                base * (0.5 + avg)
            }
        }
    }

    /// Geometry for a shape tool dragged from `start` to `end`.
    pub fn shape_spec(&self, start: (f32, f32), end: (f32, f32)) -> Option<ShapeSpec> {
        let kind = self.kind.shape_kind()?;
        Some(ShapeSpec {
            kind,
            start,
            end,
            width: self.base_width.max(0.0),
            filled: self.filled,
        })
    }
}
