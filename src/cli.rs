// ============================================================================
// inkcell CLI - headless gesture replay against one surface
// ============================================================================
//
// Usage examples:
//   inkcell --script strokes.json --output out.png
//   inkcell --preset mini --background dots --dark --script s.json --payload-out saved.txt
//   inkcell --payload-in saved.txt --script undo.json --output restored.png
//   inkcell --preset pdf --page-dir pages/ --page 2 --scale 1.5 --script notes.json -o page.png
//
// Everything runs on the current thread; the page render is driven to
// completion with `pollster`.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use image::imageops;
use serde::Deserialize;

use crate::components::input::PointerId;
use crate::components::tools::{ToolConfig, ToolKind};
use crate::config::SurfaceConfig;
use crate::drawing::Drawing;
use crate::error::{EngineError, EngineResult, RenderError};
use crate::io::{self, ImagePayload};
use crate::ops::pattern::BackgroundKind;
use crate::page::{CancelToken, PageOutcome, PageRenderer, RenderedPage};
use crate::theme::Theme;

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// Replay pointer gestures on an annotation surface and write the result.
#[derive(Parser, Debug)]
#[command(
    name = "inkcell",
    about = "Headless raster annotation surface",
    long_about = "Build a drawing surface from a preset or config file, optionally open a\n\
                  saved payload or a page image, replay a JSON gesture script, and write\n\
                  the composited PNG and/or the saved ink payload.\n\n\
                  Example:\n  \
                  inkcell --script strokes.json --output out.png"
)]
pub struct CliArgs {
    /// JSON gesture script (an array of steps, or {"steps": [...]}).
    #[arg(short, long, value_name = "SCRIPT.json")]
    pub script: Option<PathBuf>,

    /// Write the composited surface (background included) as PNG.
    #[arg(short, long, value_name = "FILE.png")]
    pub output: Option<PathBuf>,

    /// Write the saved ink payload (data URL text).
    #[arg(long, value_name = "FILE")]
    pub payload_out: Option<PathBuf>,

    /// Open a previously saved ink payload before replaying.
    #[arg(long, value_name = "FILE")]
    pub payload_in: Option<PathBuf>,

    /// Surface config JSON. Overrides --preset.
    #[arg(short, long, value_name = "FILE.json")]
    pub config: Option<PathBuf>,

    /// drawing, mini or pdf.
    #[arg(long, default_value = "drawing")]
    pub preset: String,

    /// blank, grid, lines or dots.
    #[arg(short, long)]
    pub background: Option<String>,

    /// Use the dark palette.
    #[arg(long)]
    pub dark: bool,

    /// Directory of page images (sorted by name) used as the page renderer.
    #[arg(long, value_name = "DIR")]
    pub page_dir: Option<PathBuf>,

    /// Zero-based page index to install from --page-dir.
    #[arg(long, default_value_t = 0)]
    pub page: usize,

    /// Page render scale.
    #[arg(long, default_value_t = 1.0)]
    pub scale: f32,

    /// Debug-level logging and a summary on stdout.
    #[arg(short, long)]
    pub verbose: bool,
}

// ============================================================================
// Gesture script
// ============================================================================

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Script {
    Steps(Vec<Step>),
    Wrapped { steps: Vec<Step> },
}

impl Script {
    pub fn steps(&self) -> &[Step] {
        match self {
            Script::Steps(steps) | Script::Wrapped { steps } => steps,
        }
    }

    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Tool {
        kind: ToolKind,
        #[serde(default)]
        color: Option<[u8; 4]>,
        #[serde(default)]
        width: Option<f32>,
        #[serde(default)]
        filled: Option<bool>,
    },
    Down {
        x: f32,
        y: f32,
        #[serde(default)]
        pressure: Option<f32>,
        #[serde(default)]
        pointer: PointerId,
    },
    Move {
        x: f32,
        y: f32,
        #[serde(default)]
        pressure: Option<f32>,
        #[serde(default)]
        pointer: PointerId,
    },
    Up {
        x: f32,
        y: f32,
        #[serde(default)]
        pressure: Option<f32>,
        #[serde(default)]
        pointer: PointerId,
    },
    Leave {
        x: f32,
        y: f32,
        #[serde(default)]
        pointer: PointerId,
    },
    /// Down at the first point, move through the rest, up at the last.
    Stroke {
        points: Vec<[f32; 2]>,
        #[serde(default)]
        pointer: PointerId,
    },
    Undo,
    Redo,
    Clear,
    Background {
        kind: BackgroundKind,
    },
    Resize {
        width: u32,
        height: u32,
    },
    Insert {
        path: PathBuf,
    },
    Theme {
        dark: bool,
    },
    Editable {
        editable: bool,
    },
}

/// Apply every step in order. Stops at the first hard error.
pub fn run_script(drawing: &mut Drawing, script: &Script) -> EngineResult<()> {
    for (i, step) in script.steps().iter().enumerate() {
        log::debug!("step {}: {:?}", i, step);
        apply_step(drawing, step)?;
    }
    Ok(())
}

fn apply_step(drawing: &mut Drawing, step: &Step) -> EngineResult<()> {
    match step {
        Step::Tool { kind, color, width, filled } => {
            let mut tool = ToolConfig::for_kind(*kind, drawing.theme());
            if let Some(color) = color {
                tool.color = *color;
            }
            if let Some(width) = width {
                tool.base_width = *width;
            }
            if let Some(filled) = filled {
                tool.filled = *filled;
            }
            drawing.set_tool(tool)?;
        }
        Step::Down { x, y, pressure, pointer } => {
            drawing.pointer_down(*pointer, *x, *y, *pressure);
        }
        Step::Move { x, y, pressure, pointer } => {
            drawing.pointer_move(*pointer, *x, *y, *pressure);
        }
        Step::Up { x, y, pressure, pointer } => {
            drawing.pointer_up(*pointer, *x, *y, *pressure);
        }
        Step::Leave { x, y, pointer } => {
            drawing.pointer_leave(*pointer, *x, *y, None);
        }
        Step::Stroke { points, pointer } => {
            let Some((first, rest)) = points.split_first() else { return Ok(()) };
            drawing.pointer_down(*pointer, first[0], first[1], None);
            for p in rest {
                drawing.pointer_move(*pointer, p[0], p[1], None);
            }
            let last = points.last().unwrap_or(first);
            drawing.pointer_up(*pointer, last[0], last[1], None);
        }
        Step::Undo => {
            drawing.undo();
        }
        Step::Redo => {
            drawing.redo();
        }
        Step::Clear => drawing.clear(),
        Step::Background { kind } => drawing.set_background(*kind),
        Step::Resize { width, height } => drawing.resize(*width, *height)?,
        Step::Insert { path } => {
            let image = io::load_image(path)?;
            drawing.insert_image(&image);
        }
        Step::Theme { dark } => drawing.set_theme(Theme::from_dark_flag(*dark)),
        Step::Editable { editable } => drawing.set_editable(*editable),
    }
    Ok(())
}

// ============================================================================
// Page images from a directory
// ============================================================================

/// Treats each image file in a directory as one page.
pub struct ImageDirRenderer {
    pages: Vec<PathBuf>,
}

impl ImageDirRenderer {
    pub fn open(dir: &Path) -> EngineResult<Self> {
        let mut pages: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg" | "webp" | "bmp"))
                    .unwrap_or(false)
            })
            .collect();
        pages.sort();
        Ok(Self { pages })
    }
}

impl PageRenderer for ImageDirRenderer {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    async fn render_page(&self, index: usize, scale: f32, cancel: &CancelToken) -> Result<RenderedPage, RenderError> {
        let path = self
            .pages
            .get(index)
            .ok_or(RenderError::PageOutOfRange { index, count: self.pages.len() })?;
        let image = io::load_image(path).map_err(|e| RenderError::Failed(e.to_string()))?;
        cancel.check()?;
        let (width, height) = image.dimensions();
        let scale = if scale.is_finite() && scale > 0.0 { scale } else { 1.0 };
        let raster = if (scale - 1.0).abs() < f32::EPSILON {
            image
        } else {
            let w = ((width as f32 * scale).round() as u32).max(1);
            let h = ((height as f32 * scale).round() as u32).max(1);
            imageops::resize(&image, w, h, imageops::FilterType::Triangle)
        };
        Ok(RenderedPage { raster, width, height })
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the CLI and return an OS exit code: `0` on success, `1` on failure.
pub fn run(args: CliArgs) -> ExitCode {
    let start = Instant::now();
    match run_inner(&args) {
        Ok(drawing) => {
            if args.verbose {
                let (w, h) = drawing.dimensions();
                println!(
                    "{}×{} surface, {} history entries, {:.1} ms",
                    w,
                    h,
                    drawing.history_len(),
                    start.elapsed().as_secs_f64() * 1000.0
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn build_config(args: &CliArgs) -> EngineResult<SurfaceConfig> {
    let mut config = match &args.config {
        Some(path) => SurfaceConfig::load(path)?,
        None => SurfaceConfig::preset(&args.preset).ok_or_else(|| {
            EngineError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("unknown preset '{}' (expected drawing, mini or pdf)", args.preset),
            ))
        })?,
    };
    if let Some(name) = &args.background {
        config.background = BackgroundKind::from_name(name).ok_or_else(|| {
            EngineError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("unknown background '{}'", name),
            ))
        })?;
    }
    Ok(config)
}

/// Everything but the exit code; returns the finished drawing.
pub fn run_inner(args: &CliArgs) -> EngineResult<Drawing> {
    let config = build_config(args)?;
    let theme = Theme::from_dark_flag(args.dark);

    let payload = match &args.payload_in {
        Some(path) => Some(ImagePayload::from_string(std::fs::read_to_string(path)?)),
        None => None,
    };
    let (mut drawing, decode_error) = Drawing::open(config, theme, payload.as_ref())?;
    if let Some(e) = decode_error {
        eprintln!("warning: saved drawing could not be opened, starting blank: {}", e);
    }

    if let Some(dir) = &args.page_dir {
        let renderer = ImageDirRenderer::open(dir)?;
        let request = drawing.request_page(args.page, args.scale);
        let completion = pollster::block_on(request.run(&renderer));
        if let PageOutcome::Failed(e) = drawing.finish_page(completion) {
            eprintln!("warning: page {} unavailable, using a blank base: {}", args.page, e);
        }
    }

    if let Some(path) = &args.script {
        let script = Script::from_json_str(&std::fs::read_to_string(path)?)?;
        run_script(&mut drawing, &script)?;
    }

    if let Some(path) = &args.output {
        io::write_png(&drawing.composite(), path)?;
        log::info!("wrote {}", path.display());
    }
    if let Some(path) = &args.payload_out {
        let payload = drawing.save()?;
        std::fs::write(path, payload.as_str())?;
        log::info!("wrote payload {}", path.display());
    }
    Ok(drawing)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["inkcell"];
        argv.extend_from_slice(extra);
        CliArgs::parse_from(argv)
    }

    #[test]
    fn script_accepts_both_shapes() {
        let bare = Script::from_json_str(r#"[{"op":"undo"},{"op":"down","x":1,"y":2}]"#).unwrap();
        let wrapped = Script::from_json_str(r#"{"steps":[{"op":"undo"},{"op":"down","x":1,"y":2}]}"#).unwrap();
        assert_eq!(bare.steps(), wrapped.steps());
        assert_eq!(bare.steps()[1], Step::Down { x: 1.0, y: 2.0, pressure: None, pointer: 0 });
    }

    #[test]
    fn replay_writes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("s.json");
        std::fs::write(
            &script,
            r#"[{"op":"tool","kind":"rect","filled":true},{"op":"stroke","points":[[10,10],[30,30],[60,40]]}]"#,
        )
        .unwrap();
        let png = dir.path().join("out.png");
        let saved = dir.path().join("saved.txt");
        let a = args(&[
            "--script",
            script.to_str().unwrap(),
            "--output",
            png.to_str().unwrap(),
            "--payload-out",
            saved.to_str().unwrap(),
            "--background",
            "grid",
        ]);
        let drawing = run_inner(&a).unwrap();
        assert_eq!(drawing.history_len(), 2);
        let out = io::load_image(&png).unwrap();
        assert_eq!(out.dimensions(), (800, 400));
        let payload = ImagePayload::from_string(std::fs::read_to_string(&saved).unwrap());
        let ink = io::decode_payload(&payload).unwrap();
        assert_eq!(ink.get_pixel(35, 25)[3], 255);
        assert_eq!(ink.get_pixel(200, 200)[3], 0);
    }

    #[test]
    fn page_dir_installs_requested_page() {
        let dir = tempfile::tempdir().unwrap();
        for (name, shade) in [("a.png", 10u8), ("b.png", 20u8)] {
            let img = image::RgbaImage::from_pixel(30, 40, image::Rgba([shade, 0, 0, 255]));
            io::write_png(&img, &dir.path().join(name)).unwrap();
        }
        let a = args(&["--preset", "pdf", "--page-dir", dir.path().to_str().unwrap(), "--page", "1", "--scale", "2"]);
        let drawing = run_inner(&a).unwrap();
        assert_eq!(drawing.dimensions(), (60, 80));
        assert_eq!(drawing.current_page(), Some(1));
        assert_eq!(drawing.surface().base().get_pixel(5, 5)[0], 20);
    }

    #[test]
    fn unknown_preset_fails() {
        assert!(run_inner(&args(&["--preset", "poster"])).is_err());
    }

    #[test]
    fn unavailable_tool_in_script_fails() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = dir.path().join("c.json");
        std::fs::write(&cfg, r#"{"tools":["pen"]}"#).unwrap();
        let script = dir.path().join("s.json");
        std::fs::write(&script, r#"[{"op":"tool","kind":"arrow"}]"#).unwrap();
        let a = args(&["--config", cfg.to_str().unwrap(), "--script", script.to_str().unwrap()]);
        assert!(matches!(run_inner(&a), Err(EngineError::ToolUnavailable(ToolKind::Arrow))));
    }
}
