//! DevTools-protocol driver backed by a locally installed Chromium.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, Viewport as ClipRect};
use chromiumoxide::handler::viewport::Viewport as CdpViewport;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::preflight::preflight;
use super::{DriverError, NavigationFailure, PageDriver, RawImage, Ready, ViewportState};
use crate::viewport::Viewport;

pub const DEFAULT_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Phrases that mark a login wall or permission page.
pub const DEFAULT_ACCESS_DENIED_MARKERS: &[&str] = &[
    "access denied",
    "403 forbidden",
    "you need permission",
    "request access",
    "sign in to continue",
];

const STATE_SCRIPT: &str = r#"(() => {
  const sel = __SCROLL_SELECTOR__;
  const endSel = __END_SELECTOR__;
  const delta = __DELTA__;
  const root = document.scrollingElement || document.documentElement;
  const el = (sel && document.querySelector(sel)) || root;
  if (delta !== 0) {
    el.scrollTo({ top: el.scrollTop + delta, behavior: 'instant' });
  }
  const viewport = el === root ? window.innerHeight : el.clientHeight;
  let endMarker = false;
  if (endSel) {
    const marker = document.querySelector(endSel);
    if (marker) {
      const r = marker.getBoundingClientRect();
      endMarker = r.height > 0 && r.top < window.innerHeight && r.bottom > 0;
    }
  }
  return JSON.stringify({
    offset: Math.max(0, Math.round(el.scrollTop)),
    maxOffset: Math.max(0, Math.round(el.scrollHeight - viewport)),
    viewportHeight: Math.max(1, Math.round(viewport)),
    endMarker,
  });
})()"#;

// Page mode: offsets count page elements, so one "viewport" is one element.
const PAGE_SCRIPT: &str = r#"(() => {
  const pages = document.querySelectorAll(__PAGE_SELECTOR__);
  const endSel = __END_SELECTOR__;
  const count = pages.length;
  if (count === 0) {
    return JSON.stringify({ count: 0, index: 0 });
  }
  const index = Math.min(Math.max(__INDEX__, 0), count - 1);
  const el = pages[index];
  if (__SCROLL__) {
    el.scrollIntoView({ block: 'start', behavior: 'instant' });
  }
  const r = el.getBoundingClientRect();
  let endMarker = false;
  if (endSel) {
    const marker = document.querySelector(endSel);
    if (marker) {
      const m = marker.getBoundingClientRect();
      endMarker = m.height > 0 && m.top < r.bottom && m.bottom > r.top;
    }
  }
  return JSON.stringify({
    count,
    index,
    state: { offset: index, maxOffset: count - 1, viewportHeight: 1, endMarker },
    clip: {
      x: r.left + window.scrollX,
      y: r.top + window.scrollY,
      width: r.width,
      height: r.height,
    },
  });
})()"#;

const TEXT_PROBE_SCRIPT: &str = r#"(() => {
  const body = document.body ? document.body.innerText || '' : '';
  return ((document.title || '') + '\n' + body.slice(0, 4000)).toLowerCase();
})()"#;

#[derive(Debug, Clone)]
pub struct ChromiumOptions {
    /// Browser window and layout viewport size.
    pub viewport: Viewport,
    pub headless: bool,
    /// Explicit browser binary; auto-detected when absent.
    pub chrome_path: Option<PathBuf>,
    pub navigation_timeout: Duration,
    /// Probe the URL over HTTP before launching the browser.
    pub preflight: bool,
    /// CSS selectors hidden before pagination (cookie banners, toolbars).
    pub hide_selectors: Vec<String>,
    /// Element that scrolls instead of the window.
    pub scroll_container: Option<String>,
    /// Element whose visibility marks the end of the document.
    pub end_marker_selector: Option<String>,
    /// Wait for this element after navigation, up to the navigation timeout.
    pub ready_selector: Option<String>,
    /// Capture each matching element as one frame, clipped to its box.
    pub page_selector: Option<String>,
    /// Lowercase phrases that classify the rendered page as access denied.
    pub access_denied_markers: Vec<String>,
}

impl Default for ChromiumOptions {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            headless: true,
            chrome_path: None,
            navigation_timeout: DEFAULT_NAVIGATION_TIMEOUT,
            preflight: true,
            hide_selectors: Vec::new(),
            scroll_container: None,
            end_marker_selector: None,
            ready_selector: None,
            page_selector: None,
            access_denied_markers: DEFAULT_ACCESS_DENIED_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PageGeometry {
    count: usize,
    index: usize,
    #[serde(default)]
    state: Option<ViewportState>,
    #[serde(default)]
    clip: Option<ElementBox>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct ElementBox {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

struct Session {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

/// Owns at most one Chromium process at a time.
pub struct ChromiumDriver {
    options: ChromiumOptions,
    session: Option<Session>,
    /// Current page element when paginating by `page_selector`.
    page_index: Option<usize>,
}

impl ChromiumDriver {
    pub fn new(options: ChromiumOptions) -> Self {
        Self {
            options,
            session: None,
            page_index: None,
        }
    }

    async fn launch(&self) -> Result<Session, DriverError> {
        let vp = self.options.viewport;
        let mut builder = BrowserConfig::builder()
            .window_size(vp.width, vp.height)
            .viewport(CdpViewport {
                width: vp.width,
                height: vp.height,
                ..Default::default()
            });
        if !self.options.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.options.chrome_path {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(DriverError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| DriverError::Launch(e.to_string()))?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler.abort();
                return Err(DriverError::Launch(e.to_string()));
            }
        };
        debug!(viewport = %vp, headless = self.options.headless, "chromium launched");

        Ok(Session {
            browser,
            page,
            handler,
        })
    }

    fn page(&self) -> Result<&Page, DriverError> {
        self.session
            .as_ref()
            .map(|s| &s.page)
            .ok_or_else(|| DriverError::Session("no document is open".to_string()))
    }

    async fn eval_json<T: DeserializeOwned>(&self, script: &str) -> Result<T, String> {
        let page = self.page().map_err(|e| e.to_string())?;
        let raw: String = page
            .evaluate(script)
            .await
            .map_err(|e| e.to_string())?
            .into_value()
            .map_err(|e| e.to_string())?;
        serde_json::from_str(&raw).map_err(|e| e.to_string())
    }

    fn state_script(&self, delta: i64) -> String {
        STATE_SCRIPT
            .replace("__SCROLL_SELECTOR__", &js_value(&self.options.scroll_container))
            .replace("__END_SELECTOR__", &js_value(&self.options.end_marker_selector))
            .replace("__DELTA__", &delta.to_string())
    }

    fn page_script(&self, selector: &str, index: usize, scroll: bool) -> String {
        PAGE_SCRIPT
            .replace("__PAGE_SELECTOR__", &js_value(&selector))
            .replace("__END_SELECTOR__", &js_value(&self.options.end_marker_selector))
            .replace("__INDEX__", &index.to_string())
            .replace("__SCROLL__", if scroll { "true" } else { "false" })
    }

    async fn query_page(&self, index: usize, scroll: bool) -> Result<PageGeometry, String> {
        let selector = self
            .options
            .page_selector
            .as_deref()
            .ok_or_else(|| "no page selector configured".to_string())?;
        self.eval_json(&self.page_script(selector, index, scroll)).await
    }

    /// Move to page element `index` (clamped) and report it as the viewport.
    async fn goto_page(&mut self, index: usize) -> Result<ViewportState, DriverError> {
        let geometry = self.query_page(index, true).await.map_err(DriverError::Scroll)?;
        match geometry.state {
            Some(state) if geometry.count > 0 => {
                self.page_index = Some(geometry.index);
                Ok(state)
            }
            _ => Err(DriverError::Scroll(
                "page elements disappeared from the document".to_string(),
            )),
        }
    }

    async fn page_clip(&self, index: usize) -> Result<ClipRect, DriverError> {
        let geometry = self.query_page(index, false).await.map_err(DriverError::Capture)?;
        let rect = geometry
            .clip
            .filter(|r| r.width >= 1.0 && r.height >= 1.0)
            .ok_or_else(|| DriverError::Capture(format!("page element {index} has no visible box")))?;
        Ok(ClipRect {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            scale: 1.0,
        })
    }

    async fn wait_until_ready(&self, session: &Session) -> Result<(), DriverError> {
        let Some(selector) = self.options.ready_selector.as_deref() else {
            return Ok(());
        };
        let script = format!("document.querySelector({}) !== null", js_value(&selector));
        let poll = async {
            loop {
                let found = match session.page.evaluate(script.as_str()).await {
                    Ok(result) => result.into_value::<bool>().unwrap_or(false),
                    Err(e) => {
                        debug!(error = %e, "ready check failed");
                        false
                    }
                };
                if found {
                    return;
                }
                tokio::time::sleep(READY_POLL_INTERVAL).await;
            }
        };
        let timeout = self.options.navigation_timeout;
        tokio::time::timeout(timeout, poll).await.map_err(|_| {
            DriverError::from(NavigationFailure::Other(format!(
                "`{selector}` did not appear within {timeout:?}"
            )))
        })?;
        debug!(selector, "document ready");
        Ok(())
    }

    /// Enter page mode when the page selector matches something.
    async fn detect_pages(&mut self) {
        self.page_index = None;
        if self.options.page_selector.is_none() {
            return;
        }
        match self.query_page(0, true).await {
            Ok(geometry) if geometry.count > 0 => {
                info!(pages = geometry.count, "capturing page elements");
                self.page_index = Some(0);
            }
            Ok(_) => warn!("page selector matched nothing, paginating by viewport"),
            Err(e) => warn!(error = %e, "page selector query failed, paginating by viewport"),
        }
    }

    async fn navigate(&self, session: &Session, url: &Url) -> Result<Option<String>, DriverError> {
        let timeout = self.options.navigation_timeout;
        let navigation = async {
            session.page.goto(url.as_str()).await?;
            session.page.wait_for_navigation().await?;
            Ok::<_, chromiumoxide::error::CdpError>(())
        };
        match tokio::time::timeout(timeout, navigation).await {
            Err(_) => return Err(NavigationFailure::Timeout(timeout).into()),
            Ok(Err(e)) => return Err(classify_navigation_error(&e.to_string()).into()),
            Ok(Ok(())) => {}
        }

        let title = session
            .page
            .get_title()
            .await
            .ok()
            .flatten()
            .filter(|t| !t.trim().is_empty());
        Ok(title)
    }

    async fn check_access(&self, session: &Session) -> Result<(), DriverError> {
        if self.options.access_denied_markers.is_empty() {
            return Ok(());
        }
        let text: String = match session.page.evaluate(TEXT_PROBE_SCRIPT).await {
            Ok(result) => result.into_value().unwrap_or_default(),
            Err(e) => {
                debug!(error = %e, "text probe failed");
                return Ok(());
            }
        };
        if let Some(marker) = self
            .options
            .access_denied_markers
            .iter()
            .find(|m| text.contains(m.to_lowercase().as_str()))
        {
            return Err(NavigationFailure::AccessDenied(format!(
                "page shows \"{marker}\"; authentication is not performed"
            ))
            .into());
        }
        Ok(())
    }

    async fn hide_overlays(&self, session: &Session) {
        if self.options.hide_selectors.is_empty() {
            return;
        }
        let css = format!(
            "{} {{ display: none !important; visibility: hidden !important; }}",
            self.options.hide_selectors.join(", ")
        );
        let css = serde_json::to_string(&css).unwrap_or_else(|_| "\"\"".to_string());
        let script = format!(
            "(() => {{ const s = document.createElement('style'); s.textContent = {css}; document.head.appendChild(s); return true; }})()"
        );
        if let Err(e) = session.page.evaluate(script.as_str()).await {
            warn!(error = %e, "could not hide overlays");
        }
    }

    async fn shutdown(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.browser.close().await {
                debug!(error = %e, "browser close failed");
            }
            if let Err(e) = session.browser.wait().await {
                debug!(error = %e, "browser wait failed");
            }
            session.handler.abort();
            info!("chromium session closed");
        }
    }
}

fn classify_navigation_error(message: &str) -> NavigationFailure {
    const UNREACHABLE: &[&str] = &[
        "ERR_NAME_NOT_RESOLVED",
        "ERR_CONNECTION_REFUSED",
        "ERR_CONNECTION_RESET",
        "ERR_INTERNET_DISCONNECTED",
        "ERR_ADDRESS_UNREACHABLE",
        "ERR_CERT",
    ];
    if UNREACHABLE.iter().any(|code| message.contains(code)) {
        NavigationFailure::Unreachable(message.to_string())
    } else if message.contains("ERR_INVALID_AUTH_CREDENTIALS") || message.contains("ERR_BLOCKED") {
        NavigationFailure::AccessDenied(message.to_string())
    } else {
        NavigationFailure::Other(message.to_string())
    }
}

#[async_trait]
impl PageDriver for ChromiumDriver {
    async fn open(&mut self, url: &Url) -> Result<Ready, DriverError> {
        self.shutdown().await;

        if self.options.preflight {
            preflight(url, self.options.navigation_timeout).await?;
        }

        let session = self.launch().await?;
        let prepared = async {
            let title = self.navigate(&session, url).await?;
            self.wait_until_ready(&session).await?;
            self.check_access(&session).await?;
            self.hide_overlays(&session).await;
            Ok::<_, DriverError>(title)
        }
        .await;
        // Keep the session even on failure so close() tears it down.
        self.session = Some(session);
        let title = prepared?;
        self.detect_pages().await;

        let url = self
            .page()?
            .url()
            .await
            .ok()
            .flatten()
            .and_then(|u| Url::parse(&u).ok())
            .unwrap_or_else(|| url.clone());
        Ok(Ready { url, title })
    }

    async fn scroll_by(&mut self, delta: i64) -> Result<ViewportState, DriverError> {
        if let Some(index) = self.page_index {
            let next = match delta.signum() {
                1 => index + 1,
                -1 => index.saturating_sub(1),
                _ => index,
            };
            return self.goto_page(next).await;
        }
        self.eval_json(&self.state_script(delta))
            .await
            .map_err(DriverError::Scroll)
    }

    async fn viewport_state(&mut self) -> Result<ViewportState, DriverError> {
        if let Some(index) = self.page_index {
            let geometry = self.query_page(index, false).await.map_err(DriverError::Scroll)?;
            return geometry.state.ok_or_else(|| {
                DriverError::Scroll("page elements disappeared from the document".to_string())
            });
        }
        self.eval_json(&self.state_script(0))
            .await
            .map_err(DriverError::Scroll)
    }

    async fn capture_visible_region(&mut self) -> Result<RawImage, DriverError> {
        let mut builder = ScreenshotParams::builder().format(CaptureScreenshotFormat::Png);
        if let Some(index) = self.page_index {
            // Pages taller than the window are captured whole.
            builder = builder
                .capture_beyond_viewport(true)
                .clip(self.page_clip(index).await?);
        }
        let params = builder.build();
        let bytes = self
            .page()?
            .screenshot(params)
            .await
            .map_err(|e| DriverError::Capture(e.to_string()))?;
        RawImage::from_encoded(bytes).map_err(|e| DriverError::Capture(e.to_string()))
    }

    async fn close(&mut self) {
        self.page_index = None;
        self.shutdown().await;
    }
}

fn js_value<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_script_embeds_selectors_as_json() {
        let driver = ChromiumDriver::new(ChromiumOptions {
            scroll_container: Some("#viewer \"main\"".to_string()),
            ..ChromiumOptions::default()
        });
        let script = driver.state_script(-120);
        assert!(script.contains(r##"const sel = "#viewer \"main\"";"##));
        assert!(script.contains("const endSel = null;"));
        assert!(script.contains("const delta = -120;"));
    }

    #[test]
    fn page_script_selects_element_by_index() {
        let driver = ChromiumDriver::new(ChromiumOptions {
            end_marker_selector: Some("#end".to_string()),
            ..ChromiumOptions::default()
        });
        let script = driver.page_script(".outer_page", 3, true);
        assert!(script.contains(r#"document.querySelectorAll(".outer_page")"#));
        assert!(script.contains("Math.max(3, 0)"));
        assert!(script.contains("if (true)"));
        assert!(script.contains(r##"const endSel = "#end";"##));
        assert!(driver.page_script(".p", 0, false).contains("if (false)"));
    }

    #[test]
    fn page_geometry_parses_state_and_clip() {
        let geometry: PageGeometry = serde_json::from_str(
            r#"{"count":4,"index":1,"state":{"offset":1,"maxOffset":3,"viewportHeight":1,"endMarker":false},"clip":{"x":8,"y":1210.5,"width":816,"height":1056}}"#,
        )
        .unwrap();
        let state = geometry.state.unwrap();
        assert_eq!((state.offset, state.max_offset), (1, 3));
        assert!(!state.at_bottom());
        assert_eq!(geometry.clip.unwrap().height, 1056.0);

        let empty: PageGeometry = serde_json::from_str(r#"{"count":0,"index":0}"#).unwrap();
        assert!(empty.state.is_none());
    }

    #[test]
    fn page_mode_is_off_until_a_document_is_open() {
        let driver = ChromiumDriver::new(ChromiumOptions {
            page_selector: Some(".outer_page".to_string()),
            ready_selector: Some(".document_scroller".to_string()),
            ..ChromiumOptions::default()
        });
        assert!(driver.page_index.is_none());
    }

    #[test]
    fn chrome_net_errors_are_classified() {
        assert!(matches!(
            classify_navigation_error("net::ERR_NAME_NOT_RESOLVED"),
            NavigationFailure::Unreachable(_)
        ));
        assert!(matches!(
            classify_navigation_error("net::ERR_INVALID_AUTH_CREDENTIALS"),
            NavigationFailure::AccessDenied(_)
        ));
        assert!(matches!(
            classify_navigation_error("frame detached"),
            NavigationFailure::Other(_)
        ));
    }
}
