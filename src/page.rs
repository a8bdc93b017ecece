// ============================================================================
// PAGE SOURCE - externally rendered page rasters as the base layer
// ============================================================================

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use image::RgbaImage;

use crate::canvas::{BaseSource, Surface};
use crate::error::RenderError;
use crate::ops::pattern::BackgroundKind;

/// One page rendered by the host's document renderer.
#[derive(Clone, Debug)]
pub struct RenderedPage {
    pub raster: RgbaImage,
    /// Natural page size at scale 1.0, as reported by the renderer.
    pub width: u32,
    pub height: u32,
}

/// Cooperative cancellation flag shared between a request and its renderer.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// `Err(Cancelled)` once cancelled; renderers can `?` this between steps.
    pub fn check(&self) -> Result<(), RenderError> {
        if self.is_cancelled() { Err(RenderError::Cancelled) } else { Ok(()) }
    }
}

/// The host's page renderer. Rendering may take any amount of time; the
/// engine never blocks on it.
pub trait PageRenderer {
    fn page_count(&self) -> usize;

    fn render_page(
        &self,
        index: usize,
        scale: f32,
        cancel: &CancelToken,
    ) -> impl Future<Output = Result<RenderedPage, RenderError>>;
}

// ============================================================================
// REQUESTS & COMPLETIONS
// ============================================================================

/// A page render that has been issued but not yet awaited.
#[derive(Debug)]
pub struct RenderRequest {
    pub token: u64,
    pub index: usize,
    pub scale: f32,
    cancel: CancelToken,
}

impl RenderRequest {
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Drive the render. The surface is not borrowed while this is pending,
    /// so pointer input keeps working against the current base.
    pub async fn run<R: PageRenderer>(self, renderer: &R) -> PageCompletion {
        let result = match self.cancel.check() {
            Err(e) => Err(e),
            Ok(()) => {
                let count = renderer.page_count();
                if self.index >= count {
                    Err(RenderError::PageOutOfRange { index: self.index, count })
                } else {
                    renderer.render_page(self.index, self.scale, &self.cancel).await
                }
            }
        };
        // A result that lands after cancellation is never applied.
        let result = result.and_then(|page| self.cancel.check().map(|()| page));
        PageCompletion { token: self.token, index: self.index, result }
    }
}

#[derive(Debug)]
pub struct PageCompletion {
    pub token: u64,
    pub index: usize,
    pub result: Result<RenderedPage, RenderError>,
}

/// What happened when a completion was handed back.
#[derive(Clone, Debug, PartialEq)]
pub enum PageOutcome {
    /// The page is now the base layer and the surface matches its size.
    Applied { index: usize, width: u32, height: u32 },
    /// A newer request exists; the result was discarded.
    Superseded,
    /// The request was cancelled; nothing to report.
    Cancelled,
    /// Rendering failed; the base fell back to blank.
    Failed(RenderError),
}

#[derive(Debug)]
struct InFlight {
    token: u64,
    index: usize,
    cancel: CancelToken,
}

// ============================================================================
// PAGE SOURCE
// ============================================================================

/// Tracks the latest page request for one surface.
#[derive(Debug, Default)]
pub struct PageSource {
    next_token: u64,
    in_flight: Option<InFlight>,
    current_page: Option<usize>,
}

impl PageSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a new request, cancelling whatever was still pending.
    pub fn request(&mut self, index: usize, scale: f32) -> RenderRequest {
        self.cancel();
        self.next_token += 1;
        let cancel = CancelToken::new();
        self.in_flight = Some(InFlight { token: self.next_token, index, cancel: cancel.clone() });
        log::debug!("page request #{} for page {} at scale {}", self.next_token, index, scale);
        RenderRequest { token: self.next_token, index, scale, cancel }
    }

    /// Cancel the pending request, if any.
    pub fn cancel(&mut self) {
        if let Some(pending) = self.in_flight.take() {
            log::debug!("cancelling page request #{} (page {})", pending.token, pending.index);
            pending.cancel.cancel();
        }
    }

    /// Page currently installed as the base layer.
    pub fn current_page(&self) -> Option<usize> {
        self.current_page
    }

    /// Apply a completion to the surface if it is still the latest request.
    pub fn finish(&mut self, completion: PageCompletion, surface: &mut Surface) -> PageOutcome {
        let is_latest = self.in_flight.as_ref().is_some_and(|p| p.token == completion.token);
        if !is_latest {
            // The newest token with nothing in flight was cancelled outright.
            let outcome = if completion.token >= self.next_token {
                PageOutcome::Cancelled
            } else {
                PageOutcome::Superseded
            };
            log::debug!(
                "dropping page completion #{} (page {}): {:?}",
                completion.token,
                completion.index,
                outcome
            );
            return outcome;
        }
        self.in_flight = None;

        match completion.result {
            Ok(page) => {
                let (w, h) = page.raster.dimensions();
                if let Err(e) = surface.resize(w, h) {
                    log::warn!("page {} raster rejected: {}", completion.index, e);
                    surface.set_base(BaseSource::Pattern(BackgroundKind::Blank));
                    self.current_page = None;
                    return PageOutcome::Failed(RenderError::Failed(e.to_string()));
                }
                surface.set_base(BaseSource::Page(Arc::new(page.raster)));
                self.current_page = Some(completion.index);
                log::debug!("page {} installed at {}×{}", completion.index, w, h);
                PageOutcome::Applied { index: completion.index, width: w, height: h }
            }
            Err(RenderError::Cancelled) => PageOutcome::Cancelled,
            Err(e) => {
                log::warn!("page {} failed to render: {}", completion.index, e);
                surface.set_base(BaseSource::Pattern(BackgroundKind::Blank));
                self.current_page = None;
                PageOutcome::Failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theme::Theme;
    use image::Rgba;

    /// Pages are solid fills whose red channel is the page index.
    struct SolidPages {
        count: usize,
        fail_on: Option<usize>,
    }

    impl PageRenderer for SolidPages {
        fn page_count(&self) -> usize {
            self.count
        }

        async fn render_page(&self, index: usize, scale: f32, cancel: &CancelToken) -> Result<RenderedPage, RenderError> {
            cancel.check()?;
            if self.fail_on == Some(index) {
                return Err(RenderError::Failed("corrupt page".into()));
            }
            let w = (60.0 * scale) as u32;
            let h = (80.0 * scale) as u32;
            Ok(RenderedPage {
                raster: RgbaImage::from_pixel(w, h, Rgba([index as u8, 0, 0, 255])),
                width: 60,
                height: 80,
            })
        }
    }

    fn overlay() -> Surface {
        Surface::new(10, 10, BaseSource::Pattern(BackgroundKind::Blank), Theme::Light).unwrap()
    }

    fn pages() -> SolidPages {
        SolidPages { count: 5, fail_on: None }
    }

    #[test]
    fn applied_page_resizes_surface() {
        let mut surface = overlay();
        let mut source = PageSource::new();
        let req = source.request(1, 2.0);
        let done = pollster::block_on(req.run(&pages()));
        let outcome = source.finish(done, &mut surface);
        assert_eq!(outcome, PageOutcome::Applied { index: 1, width: 120, height: 160 });
        assert_eq!(surface.dimensions(), (120, 160));
        assert_eq!(surface.base().get_pixel(0, 0)[0], 1);
        assert_eq!(source.current_page(), Some(1));
    }

    #[test]
    fn superseded_render_never_overwrites_newer_page() {
        let mut surface = overlay();
        let mut source = PageSource::new();
        let renderer = pages();
        let page2 = source.request(2, 1.0);
        let page3 = source.request(3, 1.0);
        assert!(page2.cancel_token().is_cancelled());

        let done3 = pollster::block_on(page3.run(&renderer));
        assert!(matches!(source.finish(done3, &mut surface), PageOutcome::Applied { index: 3, .. }));

        let done2 = pollster::block_on(page2.run(&renderer));
        assert_eq!(source.finish(done2, &mut surface), PageOutcome::Superseded);
        assert_eq!(surface.base().get_pixel(0, 0)[0], 3);
    }

    #[test]
    fn stale_success_is_discarded_even_if_renderer_ignores_cancel() {
        let mut surface = overlay();
        let mut source = PageSource::new();
        let stale = source.request(2, 1.0);
        let token = stale.token;
        let _fresh = source.request(3, 1.0);
        let forged = PageCompletion {
            token,
            index: 2,
            result: Ok(RenderedPage { raster: RgbaImage::new(5, 5), width: 5, height: 5 }),
        };
        assert_eq!(source.finish(forged, &mut surface), PageOutcome::Superseded);
        assert_eq!(surface.dimensions(), (10, 10));
    }

    #[test]
    fn explicit_cancel_is_silent() {
        let mut surface = overlay();
        let mut source = PageSource::new();
        let req = source.request(1, 1.0);
        source.cancel();
        let done = pollster::block_on(req.run(&pages()));
        assert!(matches!(done.result, Err(RenderError::Cancelled)));
        assert_eq!(source.finish(done, &mut surface), PageOutcome::Cancelled);
        assert_eq!(surface.dimensions(), (10, 10));
    }

    #[test]
    fn failure_falls_back_to_blank() {
        let mut surface = overlay();
        let mut source = PageSource::new();
        let renderer = SolidPages { count: 5, fail_on: Some(4) };
        let done = pollster::block_on(source.request(1, 1.0).run(&renderer));
        source.finish(done, &mut surface);

        let done = pollster::block_on(source.request(4, 1.0).run(&renderer));
        let outcome = source.finish(done, &mut surface);
        assert!(matches!(outcome, PageOutcome::Failed(RenderError::Failed(_))));
        assert!(matches!(surface.base_source(), BaseSource::Pattern(BackgroundKind::Blank)));
        assert_eq!(source.current_page(), None);
    }

    #[test]
    fn out_of_range_is_a_failure() {
        let mut surface = overlay();
        let mut source = PageSource::new();
        let done = pollster::block_on(source.request(9, 1.0).run(&pages()));
        assert_eq!(
            source.finish(done, &mut surface),
            PageOutcome::Failed(RenderError::PageOutOfRange { index: 9, count: 5 })
        );
    }
}
