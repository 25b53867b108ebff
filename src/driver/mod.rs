//! Browser driving primitives used by the capture pipeline.
//!
//! The [`PageDriver`] trait is the only surface through which the rest of the
//! crate touches a rendered document: navigate, scroll, sample the render
//! surface and capture the visible region. Implementations own their
//! underlying browser session exclusively.
//!
//! # Module Structure
//!
//! - [`chromium`] - DevTools-protocol driver backed by a local Chromium (feature `chromium`)
//! - [`preflight`] - HTTP probe that classifies unreachable and access-denied targets
//! - [`RawImage`] - Encoded frame buffers exchanged with drivers

#[cfg(feature = "chromium")]
mod chromium;
mod preflight;
mod raw_image;
mod scripted;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

#[cfg(feature = "chromium")]
pub use chromium::{ChromiumDriver, ChromiumOptions};
pub use preflight::{preflight, PreflightVerdict};
pub use raw_image::RawImage;
// In-memory render surface for the crate's own tests; not part of the API.
#[doc(hidden)]
pub use scripted::{DriverProbe, ScriptedDriver, ScriptedPage};

pub const DEFAULT_RENDER_INTERVAL: Duration = Duration::from_millis(400);
pub const DEFAULT_RENDER_RETRIES: u32 = 8;

/// Navigation finished and the document is ready for pagination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ready {
    pub url: Url,
    pub title: Option<String>,
}

/// Scroll geometry reported by the render surface after a scroll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewportState {
    pub offset: u64,
    pub max_offset: u64,
    pub viewport_height: u32,
    /// Explicit end-of-document marker is visible.
    #[serde(default)]
    pub end_marker: bool,
}

impl ViewportState {
    pub fn at_bottom(&self) -> bool {
        self.offset >= self.max_offset
    }
}

/// How the render surface is polled while waiting for lazy content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPolicy {
    pub interval: Duration,
    /// Total number of samples taken before giving up.
    pub max_retries: u32,
}

impl Default for RenderPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RENDER_INTERVAL,
            max_retries: DEFAULT_RENDER_RETRIES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stable {
    pub samples: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("render did not stabilise after {attempts} samples")]
pub struct RenderTimeout {
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NavigationFailure {
    #[error("document unreachable: {0}")]
    Unreachable(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("navigation timed out after {0:?}")]
    Timeout(Duration),
    #[error("navigation failed: {0}")]
    Other(String),
}

impl NavigationFailure {
    /// Access denial is a property of the document, not of the attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, NavigationFailure::AccessDenied(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    #[error(transparent)]
    Navigation(#[from] NavigationFailure),
    #[error("scroll failed: {0}")]
    Scroll(String),
    #[error("capture failed: {0}")]
    Capture(String),
    #[error("browser session error: {0}")]
    Session(String),
    #[error("could not start browser: {0}")]
    Launch(String),
}

impl DriverError {
    pub fn is_retryable_navigation(&self) -> bool {
        match self {
            DriverError::Navigation(failure) => failure.is_retryable(),
            DriverError::Session(_) => true,
            _ => false,
        }
    }
}

/// A single browser session able to render one document.
///
/// Calls are strictly sequential: the pipeline never issues a capture while a
/// scroll or render wait is in flight.
#[async_trait]
pub trait PageDriver: Send {
    /// Navigate to `url`. Opening again replaces the previous session.
    async fn open(&mut self, url: &Url) -> Result<Ready, DriverError>;

    /// Scroll vertically by `delta` CSS pixels and report the new geometry.
    async fn scroll_by(&mut self, delta: i64) -> Result<ViewportState, DriverError>;

    /// Current geometry without scrolling.
    async fn viewport_state(&mut self) -> Result<ViewportState, DriverError>;

    /// Capture the visible region losslessly.
    async fn capture_visible_region(&mut self) -> Result<RawImage, DriverError>;

    /// Sample used for render-stability checks. Defaults to a full capture.
    async fn sample_render(&mut self) -> Result<RawImage, DriverError> {
        self.capture_visible_region().await
    }

    /// Poll the render surface until two consecutive samples are
    /// pixel-identical or the sample budget is spent.
    async fn wait_for_stable_render(
        &mut self,
        policy: &RenderPolicy,
    ) -> Result<Stable, RenderTimeout> {
        let budget = policy.max_retries.max(2);
        let mut previous: Option<RawImage> = None;

        for attempt in 1..=budget {
            match self.sample_render().await {
                Ok(sample) => {
                    if let Some(prev) = previous.as_ref() {
                        if prev.same_pixels(&sample) {
                            return Ok(Stable { samples: attempt });
                        }
                    }
                    previous = Some(sample);
                }
                Err(err) => {
                    debug!(attempt, error = %err, "render sample failed");
                    previous = None;
                }
            }
            if attempt < budget && !policy.interval.is_zero() {
                tokio::time::sleep(policy.interval).await;
            }
        }

        Err(RenderTimeout { attempts: budget })
    }

    /// Release the browser session. Must be safe to call more than once.
    async fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_denied_is_not_retryable() {
        assert!(!NavigationFailure::AccessDenied("403".into()).is_retryable());
        assert!(NavigationFailure::Unreachable("dns".into()).is_retryable());
        assert!(DriverError::Session("crash".into()).is_retryable_navigation());
        assert!(!DriverError::Capture("blank".into()).is_retryable_navigation());
        assert!(!DriverError::Launch("no chrome".into()).is_retryable_navigation());
    }

    #[test]
    fn viewport_state_bottom_detection() {
        let state = ViewportState {
            offset: 900,
            max_offset: 900,
            viewport_height: 900,
            end_marker: false,
        };
        assert!(state.at_bottom());
        assert!(!ViewportState { offset: 10, ..state }.at_bottom());
    }

    #[test]
    fn access_denied_display_leads_with_reason_class() {
        let failure = NavigationFailure::AccessDenied("HTTP 401".into());
        assert_eq!(failure.to_string(), "access denied: HTTP 401");
    }
}
