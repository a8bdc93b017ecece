// ============================================================================
// DRAWING - one annotatable surface as seen by its host cell or page view
// ============================================================================

use image::RgbaImage;
use uuid::Uuid;

use crate::canvas::{BaseSource, Surface, TiledImage};
use crate::components::history::HistoryManager;
use crate::components::input::{InputResponse, InputState, PointerId};
use crate::components::tools::{StrokePoint, ToolConfig, ToolKind};
use crate::config::SurfaceConfig;
use crate::error::{EngineError, EngineResult, PayloadError};
use crate::io::{self, ImagePayload};
use crate::ops::canvas_ops::{self, Placement};
use crate::ops::pattern::BackgroundKind;
use crate::page::{PageCompletion, PageOutcome, PageSource, RenderRequest};
use crate::theme::Theme;

pub struct Drawing {
    id: Uuid,
    config: SurfaceConfig,
    surface: Surface,
    history: HistoryManager,
    input: InputState,
    tool: ToolConfig,
    /// The host picked a color; theme changes leave it alone.
    custom_color: bool,
    /// Displayed (client) size; `None` means 1:1.
    display_size: Option<(f32, f32)>,
    pages: PageSource,
    /// Page the ink layer belongs to, once a page has been installed.
    ink_page: Option<usize>,
    dirty: bool,
}

impl Drawing {
    /// Fresh blank surface.
    pub fn new(config: SurfaceConfig, theme: Theme) -> EngineResult<Self> {
        let background = if config.overlay { BackgroundKind::Blank } else { config.background };
        let surface = Surface::new(config.width, config.height, BaseSource::Pattern(background), theme)?;
        let mut history = HistoryManager::new(config.history_limit);
        history.seed(surface.ink_snapshot(), "New drawing");
        let id = Uuid::new_v4();
        let initial_tool = config.tools.first().copied().unwrap_or_default();
        log::debug!(
            "[{}] created {}×{} surface ({:?}, overlay={})",
            id,
            config.width,
            config.height,
            background,
            config.overlay
        );
        Ok(Self {
            id,
            tool: ToolConfig::for_kind(initial_tool, theme),
            config,
            surface,
            history,
            input: InputState::default(),
            custom_color: false,
            display_size: None,
            pages: PageSource::new(),
            ink_page: None,
            dirty: false,
        })
    }

    /// Surface initialised from a saved payload. A payload that fails to
    /// decode leaves a blank canvas; the error is returned alongside it for
    /// the host to display.
    pub fn open(
        config: SurfaceConfig,
        theme: Theme,
        payload: Option<&ImagePayload>,
    ) -> EngineResult<(Self, Option<PayloadError>)> {
        let mut drawing = Self::new(config, theme)?;
        let error = match payload {
            Some(payload) => drawing.load_payload(payload).err(),
            None => None,
        };
        Ok((drawing, error))
    }

    /// Replace the ink with a saved payload and restart history from it.
    pub fn load_payload(&mut self, payload: &ImagePayload) -> Result<(), PayloadError> {
        self.input.abandon(&mut self.surface);
        let image = match io::decode_payload(payload) {
            Ok(image) => image,
            Err(e) => {
                log::warn!("[{}] saved drawing could not be decoded: {}", self.id, e);
                self.surface.restore_ink(&TiledImage::new(self.surface.width(), self.surface.height()));
                self.history.seed(self.surface.ink_snapshot(), "Open (blank)");
                self.dirty = false;
                return Err(e);
            }
        };

        let (w, h) = image.dimensions();
        let target = if self.config.overlay {
            Some((w, h))
        } else if self.config.resizable_height {
            Some((self.surface.width(), self.config.clamp_height(h as f32)))
        } else {
            None
        };
        if let Some((tw, th)) = target {
            if let Err(e) = self.resize(tw, th) {
                log::warn!("[{}] keeping current size for saved drawing: {}", self.id, e);
            }
        }

        self.surface.restore_ink(&TiledImage::from_rgba_image(&image));
        self.history.seed(self.surface.ink_snapshot(), "Open");
        self.dirty = false;
        log::debug!("[{}] opened saved {}×{} drawing", self.id, w, h);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &SurfaceConfig {
        &self.config
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn input(&self) -> &InputState {
        &self.input
    }

    pub fn tool(&self) -> &ToolConfig {
        &self.tool
    }

    pub fn theme(&self) -> Theme {
        self.surface.theme()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.surface.dimensions()
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn history_memory(&self) -> usize {
        self.history.memory_usage()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_saved(&mut self) {
        self.dirty = false;
    }

    // ------------------------------------------------------------------
    // Output
    // ------------------------------------------------------------------

    /// Ink layer only, as an opaque payload. Clears the dirty flag.
    pub fn save(&mut self) -> Result<ImagePayload, PayloadError> {
        let payload = io::encode_payload(self.surface.ink())?;
        self.dirty = false;
        log::debug!("[{}] saved {} byte payload", self.id, payload.len());
        Ok(payload)
    }

    /// Base, ink and preview as shown on screen.
    pub fn composite(&self) -> RgbaImage {
        self.surface.composite_for_display()
    }

    /// Flattened image for export (background included).
    pub fn export_flattened(&self) -> Result<ImagePayload, PayloadError> {
        io::encode_image_payload(&self.composite())
    }

    // ------------------------------------------------------------------
    // Collaborator operations
    // ------------------------------------------------------------------

    pub fn set_tool(&mut self, tool: ToolConfig) -> EngineResult<()> {
        if !self.config.allows(tool.kind) {
            return Err(EngineError::ToolUnavailable(tool.kind));
        }
        if !self.input.is_idle() {
            log::debug!("[{}] tool changed mid-gesture; gesture abandoned", self.id);
            self.input.abandon(&mut self.surface);
        }
        self.custom_color = tool.color != ToolConfig::for_kind(tool.kind, self.theme()).color;
        self.tool = tool;
        Ok(())
    }

    /// Switch tool kind keeping the theme's defaults for it.
    pub fn select_tool(&mut self, kind: ToolKind) -> EngineResult<()> {
        let mut tool = ToolConfig::for_kind(kind, self.theme());
        tool.base_width = self.tool.base_width;
        tool.filled = self.tool.filled;
        self.set_tool(tool)
    }

    pub fn undo(&mut self) -> bool {
        self.input.abandon(&mut self.surface);
        let undone = self.history.undo(&mut self.surface);
        if let Some(desc) = &undone {
            log::debug!("[{}] undo '{}'", self.id, desc);
            self.dirty = true;
        }
        undone.is_some()
    }

    pub fn redo(&mut self) -> bool {
        self.input.abandon(&mut self.surface);
        let redone = self.history.redo(&mut self.surface);
        if let Some(desc) = &redone {
            log::debug!("[{}] redo '{}'", self.id, desc);
            self.dirty = true;
        }
        redone.is_some()
    }

    pub fn clear(&mut self) {
        self.input.abandon(&mut self.surface);
        canvas_ops::clear(&mut self.surface, &mut self.history);
        self.dirty = true;
    }

    /// Switch to a generated background. Replaces an installed page and
    /// cancels any page render still in flight.
    pub fn set_background(&mut self, kind: BackgroundKind) {
        self.pages.cancel();
        self.surface.set_base(BaseSource::Pattern(kind));
        self.config.background = kind;
    }

    pub fn resize(&mut self, width: u32, height: u32) -> EngineResult<()> {
        self.surface.resize(width, height)?;
        self.input.surface_resized(&self.surface);
        Ok(())
    }

    pub fn insert_image(&mut self, image: &RgbaImage) -> Option<Placement> {
        self.input.abandon(&mut self.surface);
        let placed = canvas_ops::insert_image(&mut self.surface, &mut self.history, image);
        if placed.is_some() {
            self.dirty = true;
        }
        placed
    }

    pub fn set_theme(&mut self, theme: Theme) {
        if theme == self.theme() {
            return;
        }
        self.surface.set_theme(theme);
        if !self.custom_color {
            self.tool.color = ToolConfig::for_kind(self.tool.kind, theme).color;
        }
    }

    pub fn set_editable(&mut self, editable: bool) {
        self.input.set_editable(editable, &mut self.surface);
    }

    pub fn editable(&self) -> bool {
        self.input.editable()
    }

    // ------------------------------------------------------------------
    // Pointer input (client coordinates)
    // ------------------------------------------------------------------

    /// Size the surface is displayed at, in client units.
    pub fn set_display_size(&mut self, width: f32, height: f32) {
        self.display_size = (width > 0.0 && height > 0.0).then_some((width, height));
    }

    /// `surface / displayed` per axis.
    pub fn display_scale(&self) -> (f32, f32) {
        match self.display_size {
            Some((dw, dh)) => (self.surface.width() as f32 / dw, self.surface.height() as f32 / dh),
            None => (1.0, 1.0),
        }
    }

    pub fn to_surface(&self, client_x: f32, client_y: f32, pressure: Option<f32>) -> StrokePoint {
        let (sx, sy) = self.display_scale();
        StrokePoint::new(client_x * sx, client_y * sy, pressure)
    }

    pub fn pointer_down(&mut self, pointer: PointerId, x: f32, y: f32, pressure: Option<f32>) -> InputResponse {
        let point = self.to_surface(x, y, pressure);
        self.input.pointer_down(&mut self.surface, &self.tool, pointer, point)
    }

    pub fn pointer_move(&mut self, pointer: PointerId, x: f32, y: f32, pressure: Option<f32>) -> InputResponse {
        let point = self.to_surface(x, y, pressure);
        self.input.pointer_move(&mut self.surface, &self.tool, pointer, point)
    }

    pub fn pointer_up(&mut self, pointer: PointerId, x: f32, y: f32, pressure: Option<f32>) -> InputResponse {
        let point = self.to_surface(x, y, pressure);
        let response = self.input.pointer_up(&mut self.surface, &mut self.history, &self.tool, pointer, point);
        if response == InputResponse::Committed {
            self.dirty = true;
        }
        response
    }

    pub fn pointer_leave(&mut self, pointer: PointerId, x: f32, y: f32, pressure: Option<f32>) -> InputResponse {
        self.pointer_up(pointer, x, y, pressure)
    }

    // ------------------------------------------------------------------
    // Height drag
    // ------------------------------------------------------------------

    pub fn begin_height_drag(&mut self, pointer: PointerId, client_y: f32) -> EngineResult<bool> {
        if !self.config.resizable_height {
            return Err(EngineError::FixedHeight);
        }
        Ok(self.input.begin_height_drag(pointer, client_y, self.surface.height()))
    }

    /// Resize to follow the drag. Returns the new height while dragging.
    pub fn update_height_drag(&mut self, pointer: PointerId, client_y: f32) -> EngineResult<Option<u32>> {
        let (_, scale) = self.display_scale();
        let Some(proposed) = self.input.update_height_drag(pointer, client_y, scale) else {
            return Ok(None);
        };
        let height = self.config.clamp_height(proposed);
        if height != self.surface.height() {
            self.resize(self.surface.width(), height)?;
            // The displayed box grows with the surface.
            if let Some((dw, _)) = self.display_size {
                self.display_size = Some((dw, height as f32 / scale));
            }
        }
        Ok(Some(height))
    }

    pub fn end_height_drag(&mut self, pointer: PointerId) -> Option<u32> {
        self.input.end_height_drag(pointer).map(|drag| {
            let height = self.surface.height();
            if height != drag.start_height {
                log::debug!("[{}] height drag {} → {}", self.id, drag.start_height, height);
                self.config.height = height;
            }
            height
        })
    }

    // ------------------------------------------------------------------
    // External page
    // ------------------------------------------------------------------

    /// Issue a page render; any earlier one is cancelled. Await
    /// `RenderRequest::run` off the surface, then hand the completion to
    /// `finish_page`.
    pub fn request_page(&mut self, index: usize, scale: f32) -> RenderRequest {
        self.pages.request(index, scale)
    }

    /// Hand back a finished render. A completion for a different page than
    /// the ink belongs to starts that page with blank ink and fresh history;
    /// the host saves the old page's payload before navigating.
    pub fn finish_page(&mut self, completion: PageCompletion) -> PageOutcome {
        let index = completion.index;
        let outcome = self.pages.finish(completion, &mut self.surface);
        match &outcome {
            PageOutcome::Applied { width, height, .. } => {
                self.input.surface_resized(&self.surface);
                self.config.width = *width;
                self.config.height = *height;
                self.attach_ink_to_page(index);
            }
            PageOutcome::Failed(e) => {
                log::warn!("[{}] page base unavailable: {}", self.id, e);
                self.attach_ink_to_page(index);
            }
            PageOutcome::Superseded | PageOutcome::Cancelled => {}
        }
        outcome
    }

    fn attach_ink_to_page(&mut self, index: usize) {
        if self.ink_page.is_some_and(|page| page != index) {
            self.input.abandon(&mut self.surface);
            self.surface.clear_preview();
            self.surface.ink_mut().clear();
            self.history.seed(self.surface.ink_snapshot(), format!("Page {}", index + 1));
            self.dirty = false;
            log::debug!("[{}] ink detached for page {}", self.id, index);
        }
        self.ink_page = Some(index);
    }

    pub fn cancel_page(&mut self) {
        self.pages.cancel();
    }

    pub fn current_page(&self) -> Option<usize> {
        self.pages.current_page()
    }
}
