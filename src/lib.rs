//! Raster annotation engine: layered drawing surfaces with pointer-driven
//! freehand and shape tools, snapshot undo/redo, generated paper patterns and
//! externally rendered page backgrounds.

pub mod canvas;
pub mod cli;
pub mod components;
pub mod config;
pub mod drawing;
pub mod error;
pub mod io;
pub mod logger;
pub mod ops;
pub mod page;
pub mod theme;

pub use canvas::{BaseSource, Compositing, Surface, TiledImage};
pub use components::history::HistoryManager;
pub use components::input::{InputResponse, PointerId};
pub use components::tools::{StrokePoint, ToolConfig, ToolKind};
pub use config::SurfaceConfig;
pub use drawing::Drawing;
pub use error::{EngineError, EngineResult, PayloadError, RenderError};
pub use io::ImagePayload;
pub use ops::pattern::BackgroundKind;
pub use page::{CancelToken, PageCompletion, PageOutcome, PageRenderer, RenderRequest, RenderedPage};
pub use theme::Theme;
