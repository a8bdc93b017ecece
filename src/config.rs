use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::canvas::dimensions_valid;
use crate::components::history::DEFAULT_HISTORY_LIMIT;
use crate::components::tools::ToolKind;
use crate::error::{EngineError, EngineResult};
use crate::ops::pattern::BackgroundKind;

/// Parameters that distinguish the full drawing cell, the mini cell and the
/// page overlay. Everything else about a surface is shared.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SurfaceConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Bottom-edge drag changes the height.
    #[serde(default)]
    pub resizable_height: bool,
    #[serde(default = "default_min_height")]
    pub min_height: u32,
    #[serde(default = "default_max_height")]
    pub max_height: u32,
    #[serde(default = "default_tools")]
    pub tools: Vec<ToolKind>,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default)]
    pub background: BackgroundKind,
    /// Base layer comes from an external page renderer.
    #[serde(default)]
    pub overlay: bool,
}

fn default_width() -> u32 {
    800
}

fn default_height() -> u32 {
    400
}

fn default_min_height() -> u32 {
    100
}

fn default_max_height() -> u32 {
    800
}

fn default_tools() -> Vec<ToolKind> {
    ToolKind::all().to_vec()
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self::drawing_cell()
    }
}

impl SurfaceConfig {
    /// Standalone drawing cell: fixed size, every tool.
    pub fn drawing_cell() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            resizable_height: false,
            min_height: default_min_height(),
            max_height: default_max_height(),
            tools: default_tools(),
            history_limit: default_history_limit(),
            background: BackgroundKind::Blank,
            overlay: false,
        }
    }

    /// Compact cell whose height the user drags.
    pub fn mini_cell() -> Self {
        Self {
            width: 400,
            height: 200,
            resizable_height: true,
            ..Self::drawing_cell()
        }
    }

    /// Annotation layer over a rendered page; the size follows the page.
    pub fn pdf_overlay() -> Self {
        Self {
            width: 612,
            height: 792,
            overlay: true,
            ..Self::drawing_cell()
        }
    }

    pub fn preset(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "drawing" | "drawing_cell" => Some(Self::drawing_cell()),
            "mini" | "mini_cell" => Some(Self::mini_cell()),
            "pdf" | "pdf_overlay" => Some(Self::pdf_overlay()),
            _ => None,
        }
    }

    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()
    }

    pub fn load(path: &Path) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&text)?;
        log::debug!("loaded surface config from {}", path.display());
        Ok(config)
    }

    pub fn allows(&self, tool: ToolKind) -> bool {
        self.tools.contains(&tool)
    }

    /// Clamp a requested height into this surface's bounds.
    pub fn clamp_height(&self, height: f32) -> u32 {
        let lo = self.min_height.min(self.max_height) as f32;
        let hi = self.max_height.max(self.min_height) as f32;
        height.round().clamp(lo, hi) as u32
    }

    fn validate(mut self) -> EngineResult<Self> {
        if !dimensions_valid(self.width, self.height) {
            return Err(EngineError::InvalidDimensions { width: self.width, height: self.height });
        }
        if self.min_height > self.max_height {
            std::mem::swap(&mut self.min_height, &mut self.max_height);
        }
        self.history_limit = self.history_limit.max(1);
        if self.tools.is_empty() {
            log::warn!("surface config lists no tools; enabling all");
            self.tools = default_tools();
        }
        Ok(self)
    }
}
