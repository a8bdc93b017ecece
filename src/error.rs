use thiserror::Error;

use crate::components::tools::ToolKind;

/// Failure to turn a saved payload back into pixels, or pixels into a payload.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is not a PNG data URL")]
    MissingPrefix,
    #[error("payload base64 is invalid: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),
    #[error("decoded image is empty ({width}×{height})")]
    Empty { width: u32, height: u32 },
}

/// Outcome of a page render that did not produce pixels.
///
/// `Cancelled` is not a failure: it is filtered out before anything is reported.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("render cancelled")]
    Cancelled,
    #[error("page {index} is out of range ({count} pages)")]
    PageOutOfRange { index: usize, count: usize },
    #[error("page render failed: {0}")]
    Failed(String),
}

impl RenderError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RenderError::Cancelled)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Payload(#[from] PayloadError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("tool {0:?} is not available on this surface")]
    ToolUnavailable(ToolKind),
    #[error("invalid surface dimensions {width}×{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("surface height is fixed")]
    FixedHeight,
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
