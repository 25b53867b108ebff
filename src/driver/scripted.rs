//! Deterministic render surface with no browser behind it.
//!
//! A scripted document is a list of renders, one per scroll position. Each
//! positive scroll advances one position until the last render is reached;
//! further scrolls leave the offset unchanged, which is how a real document
//! behaves at its bottom edge.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use url::Url;

use super::{DriverError, NavigationFailure, PageDriver, RawImage, Ready, ViewportState};

const PATTERN_WIDTH: u32 = 96;
const PATTERN_HEIGHT: u32 = 64;

/// One render of the scripted document.
#[derive(Debug, Clone)]
pub struct ScriptedPage {
    pub image: RawImage,
    /// Capture attempts that fail at this position before one succeeds.
    pub capture_failures: u32,
    /// Render samples never settle at this position.
    pub unstable: bool,
    pub end_marker: bool,
    /// Scrolling away from this position has no effect.
    pub stuck: bool,
}

impl ScriptedPage {
    pub fn new(image: RawImage) -> Self {
        Self {
            image,
            capture_failures: 0,
            unstable: false,
            end_marker: false,
            stuck: false,
        }
    }

    /// A structured page whose perceptual hash differs for every seed.
    pub fn patterned(seed: u32) -> Self {
        Self::new(pattern_image(seed, 0))
    }

    /// An empty white render, like a separator between sections.
    pub fn blank() -> Self {
        let img = RgbaImage::from_pixel(PATTERN_WIDTH, PATTERN_HEIGHT, Rgba([255, 255, 255, 255]));
        Self::new(RawImage::from_rgba(&img).unwrap_or_else(|_| empty_image()))
    }

    pub fn failing_capture(mut self, attempts: u32) -> Self {
        self.capture_failures = attempts;
        self
    }

    pub fn unstable(mut self) -> Self {
        self.unstable = true;
        self
    }

    pub fn with_end_marker(mut self) -> Self {
        self.end_marker = true;
        self
    }

    pub fn stuck(mut self) -> Self {
        self.stuck = true;
        self
    }
}

/// Shared counters observed by tests while the driver is owned elsewhere.
#[derive(Debug, Clone, Default)]
pub struct DriverProbe {
    inner: Arc<ProbeCounters>,
}

#[derive(Debug, Default)]
struct ProbeCounters {
    opens: AtomicU32,
    closes: AtomicU32,
    live: AtomicU32,
    peak: AtomicU32,
    captures: AtomicU32,
    scrolls: AtomicU32,
}

impl DriverProbe {
    pub fn opens(&self) -> u32 {
        self.inner.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.inner.closes.load(Ordering::SeqCst)
    }

    pub fn live_sessions(&self) -> u32 {
        self.inner.live.load(Ordering::SeqCst)
    }

    pub fn peak_sessions(&self) -> u32 {
        self.inner.peak.load(Ordering::SeqCst)
    }

    pub fn capture_attempts(&self) -> u32 {
        self.inner.captures.load(Ordering::SeqCst)
    }

    pub fn scrolls(&self) -> u32 {
        self.inner.scrolls.load(Ordering::SeqCst)
    }
}

pub struct ScriptedDriver {
    pages: Vec<ScriptedPage>,
    failures_left: Vec<u32>,
    viewport_height: u32,
    position: usize,
    open: bool,
    endless: bool,
    title: Option<String>,
    deny_access: Option<String>,
    unreachable_opens: u32,
    open_delay: Duration,
    noise: u32,
    probe: DriverProbe,
}

impl ScriptedDriver {
    pub fn new(pages: Vec<ScriptedPage>) -> Self {
        let failures_left = pages.iter().map(|p| p.capture_failures).collect();
        Self {
            pages,
            failures_left,
            viewport_height: PATTERN_HEIGHT,
            position: 0,
            open: false,
            endless: false,
            title: None,
            deny_access: None,
            unreachable_opens: 0,
            open_delay: Duration::ZERO,
            noise: 0,
            probe: DriverProbe::default(),
        }
    }

    /// Document of `count` distinct patterned renders.
    pub fn with_distinct_pages(count: u32) -> Self {
        Self::new((0..count).map(ScriptedPage::patterned).collect())
    }

    /// Every scroll reveals a new render; the document never ends.
    pub fn endless() -> Self {
        let mut driver = Self::new(vec![ScriptedPage::patterned(0)]);
        driver.endless = true;
        driver
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn deny_access(mut self, reason: impl Into<String>) -> Self {
        self.deny_access = Some(reason.into());
        self
    }

    /// The first `times` navigations fail as unreachable.
    pub fn unreachable_for(mut self, times: u32) -> Self {
        self.unreachable_opens = times;
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn probe(&self) -> DriverProbe {
        self.probe.clone()
    }

    fn state(&self) -> ViewportState {
        let height = u64::from(self.viewport_height);
        let last = if self.endless {
            self.position + 1
        } else {
            self.pages.len().saturating_sub(1)
        };
        ViewportState {
            offset: self.position as u64 * height,
            max_offset: last as u64 * height,
            viewport_height: self.viewport_height,
            end_marker: self.current().map(|p| p.end_marker).unwrap_or(false),
        }
    }

    fn current(&self) -> Option<&ScriptedPage> {
        if self.endless {
            self.pages.first()
        } else {
            self.pages.get(self.position)
        }
    }

    fn current_image(&self) -> Result<RawImage, DriverError> {
        if self.endless {
            return Ok(pattern_image(self.position as u32, 0));
        }
        self.current()
            .map(|p| p.image.clone())
            .ok_or_else(|| DriverError::Capture("document has no renders".to_string()))
    }

    fn ensure_open(&self) -> Result<(), DriverError> {
        if self.open {
            Ok(())
        } else {
            Err(DriverError::Session("no document is open".to_string()))
        }
    }

    fn release(&mut self) {
        if self.open {
            self.open = false;
            self.probe.inner.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl PageDriver for ScriptedDriver {
    async fn open(&mut self, url: &Url) -> Result<Ready, DriverError> {
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        self.release();
        self.probe.inner.opens.fetch_add(1, Ordering::SeqCst);

        if self.unreachable_opens > 0 {
            self.unreachable_opens -= 1;
            return Err(NavigationFailure::Unreachable(format!("{url} did not respond")).into());
        }
        if let Some(reason) = &self.deny_access {
            return Err(NavigationFailure::AccessDenied(reason.clone()).into());
        }

        self.open = true;
        self.position = 0;
        let live = self.probe.inner.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.inner.peak.fetch_max(live, Ordering::SeqCst);

        Ok(Ready {
            url: url.clone(),
            title: self.title.clone(),
        })
    }

    async fn scroll_by(&mut self, delta: i64) -> Result<ViewportState, DriverError> {
        self.ensure_open()?;
        self.probe.inner.scrolls.fetch_add(1, Ordering::SeqCst);
        let stuck = !self.endless && self.current().map(|p| p.stuck).unwrap_or(false);
        if stuck {
            return Ok(self.state());
        }
        if delta > 0 && (self.endless || self.position + 1 < self.pages.len()) {
            self.position += 1;
        } else if delta < 0 && self.position > 0 {
            self.position -= 1;
        }
        Ok(self.state())
    }

    async fn viewport_state(&mut self) -> Result<ViewportState, DriverError> {
        self.ensure_open()?;
        Ok(self.state())
    }

    async fn capture_visible_region(&mut self) -> Result<RawImage, DriverError> {
        self.ensure_open()?;
        self.probe.inner.captures.fetch_add(1, Ordering::SeqCst);
        if let Some(left) = self.failures_left.get_mut(self.position) {
            if *left > 0 && !self.endless {
                *left -= 1;
                return Err(DriverError::Capture(format!(
                    "screenshot at position {} failed",
                    self.position
                )));
            }
        }
        self.current_image()
    }

    async fn sample_render(&mut self) -> Result<RawImage, DriverError> {
        self.ensure_open()?;
        if self.current().map(|p| p.unstable).unwrap_or(false) && !self.endless {
            self.noise = self.noise.wrapping_add(1);
            return Ok(pattern_image(self.position as u32, self.noise));
        }
        self.current_image()
    }

    async fn close(&mut self) {
        self.release();
        self.probe.inner.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Vertical bars at seed-dependent columns; `noise` flips one pixel.
fn pattern_image(seed: u32, noise: u32) -> RawImage {
    let mut img = RgbaImage::from_pixel(PATTERN_WIDTH, PATTERN_HEIGHT, Rgba([255, 255, 255, 255]));
    let bar_a = seed.wrapping_mul(13) % (PATTERN_WIDTH - 8);
    let bar_b = seed.wrapping_mul(29).wrapping_add(40) % (PATTERN_WIDTH - 6);
    let rule = seed.wrapping_mul(7) % (PATTERN_HEIGHT - 5);

    for (x, y, pixel) in img.enumerate_pixels_mut() {
        if x >= bar_a && x < bar_a + 8 {
            *pixel = Rgba([20, 20, 20, 255]);
        } else if x >= bar_b && x < bar_b + 6 {
            *pixel = Rgba([110, 110, 110, 255]);
        } else if y >= rule && y < rule + 5 {
            *pixel = Rgba([180, 60, 60, 255]);
        }
    }
    if noise > 0 {
        let x = noise % PATTERN_WIDTH;
        img.put_pixel(x, PATTERN_HEIGHT - 1, Rgba([(noise % 251) as u8, 0, 0, 255]));
    }

    // Encoding an in-memory RGBA buffer as PNG cannot fail.
    RawImage::from_rgba(&img).unwrap_or_else(|_| empty_image())
}

fn empty_image() -> RawImage {
    RawImage {
        width: PATTERN_WIDTH,
        height: PATTERN_HEIGHT,
        data: Vec::new(),
    }
}
