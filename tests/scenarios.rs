use image::{Rgba, RgbaImage};

use inkcell::ops::pattern;
use inkcell::ops::shapes::{self, RenderPass, ShapeKind, ShapeSpec};
use inkcell::{
    BackgroundKind, CancelToken, Drawing, PageOutcome, PageRenderer, RenderError, RenderedPage, SurfaceConfig, Theme,
    ToolConfig, ToolKind,
};

fn blank(width: u32, height: u32) -> Drawing {
    let config = SurfaceConfig { width, height, ..SurfaceConfig::drawing_cell() };
    Drawing::new(config, Theme::Light).unwrap()
}

fn line(d: &mut Drawing, from: (f32, f32), to: (f32, f32)) {
    d.pointer_down(1, from.0, from.1, None);
    d.pointer_move(1, to.0, to.1, None);
    d.pointer_up(1, to.0, to.1, None);
}

#[test]
fn saved_line_round_trips_through_payload() {
    let mut d = blank(400, 300);
    line(&mut d, (0.0, 0.0), (100.0, 100.0));
    assert!(d.surface().ink().get_pixel(50, 50)[3] > 0);
    let payload = d.save().unwrap();

    // Undo/redo on the drawing that made the line.
    assert!(d.undo());
    assert!(d.surface().ink().is_blank());
    assert!(d.redo());
    assert!(d.surface().ink().get_pixel(50, 50)[3] > 0);

    // Reopened, the line is there and history starts at it.
    let config = SurfaceConfig { width: 400, height: 300, ..SurfaceConfig::drawing_cell() };
    let (mut reopened, err) = Drawing::open(config, Theme::Light, Some(&payload)).unwrap();
    assert!(err.is_none());
    assert!(reopened.surface().ink().pixels_eq(d.surface().ink()));
    assert!(!reopened.undo());
    assert!(reopened.surface().ink().pixels_eq(d.surface().ink()));
}

#[test]
fn three_preview_frames_one_history_entry() {
    let mut d = blank(200, 200);
    d.select_tool(ToolKind::Rect).unwrap();
    let before = d.history_len();
    d.pointer_down(1, 10.0, 10.0, None);
    d.pointer_move(1, 30.0, 30.0, None);
    d.pointer_move(1, 50.0, 40.0, None);
    d.pointer_move(1, 70.0, 60.0, None);
    d.pointer_up(1, 70.0, 60.0, None);
    assert_eq!(d.history_len(), before + 1);
}

#[test]
fn n_gestures_undo_to_empty_and_redo_to_final() {
    let mut d = blank(160, 120);
    let empty = d.surface().ink_snapshot();
    let tools = [ToolKind::Pen, ToolKind::Highlighter, ToolKind::Line, ToolKind::Ellipse, ToolKind::Arrow, ToolKind::Eraser];
    for (i, kind) in tools.iter().enumerate() {
        d.select_tool(*kind).unwrap();
        let o = i as f32 * 10.0;
        line(&mut d, (5.0 + o, 5.0), (80.0, 60.0 + o));
    }
    let last = d.surface().ink_snapshot();

    for _ in 0..tools.len() {
        assert!(d.undo());
    }
    assert!(d.surface().ink().pixels_eq(&empty));
    assert!(!d.undo());
    for _ in 0..tools.len() {
        assert!(d.redo());
    }
    assert!(d.surface().ink().pixels_eq(&last));
    assert!(!d.redo());
}

#[test]
fn history_is_capped_at_fifty() {
    let mut d = blank(100, 100);
    for i in 0..60 {
        let y = (i % 100) as f32;
        line(&mut d, (0.0, y), (99.0, y));
    }
    assert_eq!(d.history_len(), 50);
    let mut undos = 0;
    while d.undo() {
        undos += 1;
    }
    assert_eq!(undos, 49);
    // The oldest surviving state still has the early strokes baked in.
    assert!(!d.surface().ink().is_blank());
}

#[test]
fn grid_generation_is_byte_identical() {
    for theme in [Theme::Light, Theme::Dark] {
        let a = pattern::generate(321, 123, BackgroundKind::Grid, &theme.palette());
        let b = pattern::generate(321, 123, BackgroundKind::Grid, &theme.palette());
        assert_eq!(a.as_raw(), b.as_raw());
    }
}

#[test]
fn swapped_corners_give_same_region() {
    for kind in [ShapeKind::Rectangle, ShapeKind::Ellipse] {
        for filled in [false, true] {
            let fwd = ShapeSpec { kind, start: (10.0, 10.0), end: (50.0, 40.0), width: 3.0, filled };
            let rev = ShapeSpec { start: (50.0, 40.0), end: (10.0, 10.0), ..fwd };
            assert_eq!(
                shapes::rasterize_shape(&fwd, RenderPass::Commit, 64, 64),
                shapes::rasterize_shape(&rev, RenderPass::Commit, 64, 64)
            );
        }
    }
}

#[test]
fn stroke_width_follows_pressure_and_eraser_is_wider() {
    for base in [1.0, 2.5, 8.0] {
        let pen = ToolConfig { base_width: base, ..ToolConfig::for_kind(ToolKind::Pen, Theme::Light) };
        let eraser = ToolConfig { base_width: base, ..ToolConfig::for_kind(ToolKind::Eraser, Theme::Light) };
        let light = pen.stroke_width(0.1, 0.1);
        let heavy = pen.stroke_width(0.9, 0.9);
        assert!(heavy > light);
        assert!(eraser.stroke_width(0.5, 0.5) >= heavy);
    }
}

/// Solid pages; the red channel names the page.
struct Pages;

impl PageRenderer for Pages {
    fn page_count(&self) -> usize {
        4
    }

    async fn render_page(&self, index: usize, _scale: f32, cancel: &CancelToken) -> Result<RenderedPage, RenderError> {
        cancel.check()?;
        Ok(RenderedPage {
            raster: RgbaImage::from_pixel(50 + index as u32, 70, Rgba([index as u8 * 40, 0, 0, 255])),
            width: 50 + index as u32,
            height: 70,
        })
    }
}

#[test]
fn late_page_two_does_not_replace_page_three() {
    let mut d = Drawing::new(SurfaceConfig::pdf_overlay(), Theme::Light).unwrap();
    let page2 = d.request_page(2, 1.0);
    let page3 = d.request_page(3, 1.0);

    let done3 = pollster::block_on(page3.run(&Pages));
    assert!(matches!(d.finish_page(done3), PageOutcome::Applied { index: 3, .. }));

    // Drawing still works against the installed page.
    line(&mut d, (5.0, 5.0), (40.0, 40.0));

    let done2 = pollster::block_on(page2.run(&Pages));
    let outcome = d.finish_page(done2);
    assert!(matches!(outcome, PageOutcome::Superseded | PageOutcome::Cancelled));
    assert_eq!(d.current_page(), Some(3));
    assert_eq!(d.dimensions(), (53, 70));
    assert_eq!(d.surface().base().get_pixel(0, 0)[0], 120);
    assert!(d.surface().ink().get_pixel(20, 20)[3] > 0);
}

#[test]
fn eraser_on_overlay_reveals_page() {
    let mut d = Drawing::new(SurfaceConfig::pdf_overlay(), Theme::Light).unwrap();
    let req = d.request_page(1, 1.0);
    d.finish_page(pollster::block_on(req.run(&Pages)));
    line(&mut d, (5.0, 30.0), (45.0, 30.0));
    d.select_tool(ToolKind::Eraser).unwrap();
    line(&mut d, (25.0, 20.0), (25.0, 40.0));
    assert_eq!(d.surface().ink().get_pixel(25, 30)[3], 0);
    assert_eq!(*d.composite().get_pixel(25, 30), Rgba([40, 0, 0, 255]));
}

#[test]
fn switching_pages_starts_with_blank_ink() {
    let mut d = Drawing::new(SurfaceConfig::pdf_overlay(), Theme::Light).unwrap();
    let req = d.request_page(1, 1.0);
    d.finish_page(pollster::block_on(req.run(&Pages)));
    line(&mut d, (5.0, 30.0), (45.0, 30.0));
    assert!(d.can_undo());

    // Re-rendering the same page keeps its annotations.
    let req = d.request_page(1, 1.0);
    d.finish_page(pollster::block_on(req.run(&Pages)));
    assert!(d.surface().ink().get_pixel(25, 30)[3] > 0);
    assert!(d.can_undo());

    let req = d.request_page(2, 1.0);
    assert!(matches!(d.finish_page(pollster::block_on(req.run(&Pages))), PageOutcome::Applied { index: 2, .. }));
    assert!(d.surface().ink().is_blank());
    assert!(!d.can_undo());
    assert_eq!(d.history_len(), 1);
    assert!(!d.undo());
    assert_eq!(*d.composite().get_pixel(25, 30), Rgba([80, 0, 0, 255]));
}
