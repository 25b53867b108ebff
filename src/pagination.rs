//! Bounded auto-scroll loop over a rendered document.
//!
//! Each iteration scrolls by one viewport minus an overlap margin, waits for
//! the render to settle and captures the visible region. The loop stops once
//! the bottom of the document has been captured, on cancellation, on an
//! explicit end marker, after a run of scrolls that produced no new content,
//! or at the capture-attempt ceiling.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::driver::{DriverError, PageDriver, RawImage, RenderPolicy, ViewportState};
use crate::error::{FolioError, Result};
use crate::frames::{Frame, FrameStore};
use crate::progress::{estimate_total, Phase, ProgressEvent, ProgressSink};

pub const DEFAULT_OVERLAP: f64 = 0.05;
pub const DEFAULT_NO_PROGRESS_LIMIT: u32 = 3;
pub const DEFAULT_MAX_FRAMES: u32 = 2000;
pub const DEFAULT_MAX_CONSECUTIVE_CAPTURE_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaginationPolicy {
    /// Fraction of the viewport re-captured at each step, in `[0, 0.5)`.
    pub overlap: f64,
    /// Consecutive iterations without new content before stopping. A
    /// duplicate frame counts as progress while the viewport is still moving
    /// towards the bottom.
    pub no_progress_limit: u32,
    /// Ceiling on capture attempts.
    pub max_frames: u32,
    /// Skipped captures tolerated in a row; one more aborts the run.
    pub max_consecutive_capture_failures: u32,
    pub render: RenderPolicy,
}

impl Default for PaginationPolicy {
    fn default() -> Self {
        Self {
            overlap: DEFAULT_OVERLAP,
            no_progress_limit: DEFAULT_NO_PROGRESS_LIMIT,
            max_frames: DEFAULT_MAX_FRAMES,
            max_consecutive_capture_failures: DEFAULT_MAX_CONSECUTIVE_CAPTURE_FAILURES,
            render: RenderPolicy::default(),
        }
    }
}

impl PaginationPolicy {
    /// Scroll distance for one step, never less than one pixel.
    pub fn step(&self, viewport_height: u32) -> u64 {
        let overlap = self.overlap.clamp(0.0, 0.5);
        ((f64::from(viewport_height) * (1.0 - overlap)).floor() as u64).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    Bottom,
    NoProgress,
    EndMarker,
    FrameCeiling,
    Cancelled,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            StopReason::Bottom => "bottom of document reached",
            StopReason::NoProgress => "no new content",
            StopReason::EndMarker => "end-of-document marker",
            StopReason::FrameCeiling => "frame ceiling reached",
            StopReason::Cancelled => "cancelled",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationSummary {
    pub stop_reason: StopReason,
    pub attempts: u32,
    pub stored: u32,
    pub duplicates: u32,
    pub skipped: u32,
    pub degraded: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capture_errors: Vec<String>,
}

impl PaginationSummary {
    fn new() -> Self {
        Self {
            stop_reason: StopReason::NoProgress,
            attempts: 0,
            stored: 0,
            duplicates: 0,
            skipped: 0,
            degraded: 0,
            capture_errors: Vec::new(),
        }
    }
}

pub struct PaginationController<'a, D: PageDriver + ?Sized> {
    driver: &'a mut D,
    policy: PaginationPolicy,
    cancel: CancellationToken,
    progress: Option<ProgressSink>,
}

impl<'a, D: PageDriver + ?Sized> PaginationController<'a, D> {
    pub fn new(driver: &'a mut D, policy: PaginationPolicy, cancel: CancellationToken) -> Self {
        Self {
            driver,
            policy,
            cancel,
            progress: None,
        }
    }

    pub fn with_progress(mut self, sink: Option<ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Walk the document, adding frames to `store`.
    ///
    /// Cancellation is not an error here: the summary reports it and the
    /// caller decides what to discard. An error means too many captures in a
    /// row were skipped, or the driver could not scroll.
    pub async fn run(mut self, store: &mut FrameStore) -> Result<PaginationSummary> {
        let mut summary = PaginationSummary::new();
        let mut state = self.driver.viewport_state().await?;
        let step = self.policy.step(state.viewport_height);
        let max_frames = self.policy.max_frames.max(1);

        let mut previous_offset = state.offset;
        let mut no_progress = 0u32;
        let mut consecutive_failures = 0u32;
        let mut first = true;

        debug!(step, max_frames, "starting pagination");

        loop {
            if self.cancel.is_cancelled() {
                summary.stop_reason = StopReason::Cancelled;
                break;
            }

            if !first {
                if state.end_marker {
                    summary.stop_reason = StopReason::EndMarker;
                    break;
                }
                if no_progress >= self.policy.no_progress_limit {
                    summary.stop_reason = StopReason::NoProgress;
                    break;
                }
                if summary.attempts >= max_frames {
                    summary.stop_reason = StopReason::FrameCeiling;
                    break;
                }
                state = self
                    .driver
                    .scroll_by(step as i64)
                    .await
                    .map_err(FolioError::from)?;
            }

            let advanced = first || state.offset > previous_offset;
            previous_offset = previous_offset.max(state.offset);
            first = false;

            let degraded = match self.driver.wait_for_stable_render(&self.policy.render).await {
                Ok(stable) => {
                    debug!(samples = stable.samples, offset = state.offset, "render stable");
                    false
                }
                Err(timeout) => {
                    warn!(offset = state.offset, %timeout, "render never settled, capturing degraded frame");
                    summary.degraded += 1;
                    true
                }
            };

            if self.cancel.is_cancelled() {
                summary.stop_reason = StopReason::Cancelled;
                break;
            }

            let sequence = summary.attempts;
            summary.attempts += 1;

            let frame = match self.capture_with_retry().await.and_then(|image| {
                Frame::new(sequence, image, state.offset, store.policy())
                    .map_err(|e| DriverError::Capture(format!("capture is not a valid image: {e}")))
            }) {
                Ok(frame) => frame.degraded(degraded),
                Err(err) => {
                    consecutive_failures += 1;
                    summary.skipped += 1;
                    summary.capture_errors.push(err.to_string());
                    warn!(
                        sequence,
                        offset = state.offset,
                        consecutive = consecutive_failures,
                        error = %err,
                        "CaptureError: frame skipped"
                    );
                    if consecutive_failures > self.policy.max_consecutive_capture_failures {
                        return Err(FolioError::Capture {
                            failures: consecutive_failures,
                            last: err.to_string(),
                        });
                    }
                    continue;
                }
            };
            consecutive_failures = 0;

            let outcome = store.add(frame);
            if outcome.is_stored() {
                summary.stored += 1;
            } else {
                summary.duplicates += 1;
            }

            // Blank separators repeat mid-document; only a stalled scroll or a
            // re-captured bottom counts against progress.
            if advanced && (outcome.is_stored() || !state.at_bottom()) {
                no_progress = 0;
            } else {
                no_progress += 1;
                debug!(no_progress, offset = state.offset, ?outcome, "no new content");
            }

            self.emit(store.len() as u32, &state, step);

            if state.at_bottom() && !state.end_marker {
                // Lazy documents grow once the bottom is rendered.
                let settled = self.driver.viewport_state().await.map_err(FolioError::from)?;
                if settled.at_bottom() {
                    summary.stop_reason = StopReason::Bottom;
                    break;
                }
                debug!(max_offset = settled.max_offset, "document grew at the bottom");
                state = settled;
            }
        }

        info!(
            reason = %summary.stop_reason,
            attempts = summary.attempts,
            stored = summary.stored,
            duplicates = summary.duplicates,
            skipped = summary.skipped,
            "pagination finished"
        );
        Ok(summary)
    }

    async fn capture_with_retry(&mut self) -> std::result::Result<RawImage, DriverError> {
        match self.driver.capture_visible_region().await {
            Ok(image) => Ok(image),
            Err(first) => {
                debug!(error = %first, "capture failed, retrying once");
                self.driver.capture_visible_region().await
            }
        }
    }

    fn emit(&self, frames_captured: u32, state: &ViewportState, step: u64) {
        if let Some(sink) = &self.progress {
            let event = ProgressEvent {
                estimated_total: estimate_total(state.max_offset, step)
                    .map(|total| total.max(frames_captured)),
                ..ProgressEvent::new(Phase::Paginating, frames_captured)
            };
            sink(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{ScriptedDriver, ScriptedPage};
    use crate::frames::DedupPolicy;
    use std::time::Duration;
    use url::Url;

    fn fast_policy() -> PaginationPolicy {
        PaginationPolicy {
            render: RenderPolicy {
                interval: Duration::ZERO,
                max_retries: 3,
            },
            ..PaginationPolicy::default()
        }
    }

    async fn paginate(
        mut driver: ScriptedDriver,
        policy: PaginationPolicy,
    ) -> (Result<PaginationSummary>, FrameStore) {
        driver
            .open(&Url::parse("https://example.com/doc").unwrap())
            .await
            .unwrap();
        let mut store = FrameStore::new(DedupPolicy::strict());
        let result = PaginationController::new(&mut driver, policy, CancellationToken::new())
            .run(&mut store)
            .await;
        (result, store)
    }

    #[test]
    fn step_applies_overlap() {
        let policy = PaginationPolicy::default();
        assert_eq!(policy.step(1000), 950);
        assert_eq!(policy.step(0), 1);
    }

    #[tokio::test]
    async fn finite_document_stops_at_bottom() {
        let (result, store) = paginate(ScriptedDriver::with_distinct_pages(4), fast_policy()).await;
        let summary = result.unwrap();
        assert_eq!(summary.stop_reason, StopReason::Bottom);
        assert_eq!(store.len(), 4);
        assert_eq!(summary.attempts, 4, "no re-captures once the bottom is stored");
        assert_eq!(summary.duplicates, 0);
    }

    #[tokio::test]
    async fn blank_run_mid_document_does_not_stop_pagination() {
        let pages = vec![
            ScriptedPage::patterned(1),
            ScriptedPage::blank(),
            ScriptedPage::blank(),
            ScriptedPage::blank(),
            ScriptedPage::blank(),
            ScriptedPage::patterned(2),
            ScriptedPage::patterned(3),
        ];
        let (result, store) = paginate(ScriptedDriver::new(pages), fast_policy()).await;
        let summary = result.unwrap();
        assert_eq!(summary.stop_reason, StopReason::Bottom);
        assert_eq!(summary.attempts, 7);
        assert_eq!(summary.duplicates, 3);
        assert_eq!(store.len(), 4);
    }

    #[tokio::test]
    async fn single_viewport_document_takes_one_frame() {
        let (result, store) = paginate(ScriptedDriver::with_distinct_pages(1), fast_policy()).await;
        let summary = result.unwrap();
        assert_eq!(summary.stop_reason, StopReason::Bottom);
        assert_eq!(summary.attempts, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn stalled_scroll_stops_on_no_progress() {
        let pages = vec![
            ScriptedPage::patterned(0),
            ScriptedPage::patterned(1).stuck(),
            ScriptedPage::patterned(2),
        ];
        let (result, store) = paginate(ScriptedDriver::new(pages), fast_policy()).await;
        let summary = result.unwrap();
        assert_eq!(summary.stop_reason, StopReason::NoProgress);
        assert_eq!(store.len(), 2);
        assert_eq!(summary.duplicates, DEFAULT_NO_PROGRESS_LIMIT);
    }

    #[tokio::test]
    async fn end_marker_stops_immediately() {
        let pages = vec![
            ScriptedPage::patterned(0),
            ScriptedPage::patterned(1).with_end_marker(),
            ScriptedPage::patterned(2),
        ];
        let (result, store) = paginate(ScriptedDriver::new(pages), fast_policy()).await;
        assert_eq!(result.unwrap().stop_reason, StopReason::EndMarker);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn endless_document_hits_ceiling() {
        let policy = PaginationPolicy {
            max_frames: 12,
            ..fast_policy()
        };
        let (result, store) = paginate(ScriptedDriver::endless(), policy).await;
        let summary = result.unwrap();
        assert_eq!(summary.stop_reason, StopReason::FrameCeiling);
        assert_eq!(summary.attempts, 12);
        assert!(store.len() <= 12);
    }

    #[tokio::test]
    async fn unstable_render_is_degraded_not_fatal() {
        let pages = vec![
            ScriptedPage::patterned(0),
            ScriptedPage::patterned(1).unstable(),
        ];
        let (result, store) = paginate(ScriptedDriver::new(pages), fast_policy()).await;
        let summary = result.unwrap();
        assert!(summary.degraded >= 1);
        assert_eq!(store.len(), 2);
        assert!(store.frames()[1].degraded);
    }

    #[tokio::test]
    async fn single_capture_failure_is_retried() {
        let pages = vec![
            ScriptedPage::patterned(0),
            ScriptedPage::patterned(1).failing_capture(1),
        ];
        let (result, store) = paginate(ScriptedDriver::new(pages), fast_policy()).await;
        assert_eq!(result.unwrap().skipped, 0);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn persistent_capture_failures_abort() {
        let pages = (0..6)
            .map(|i| ScriptedPage::patterned(i).failing_capture(if i == 0 { 0 } else { 10 }))
            .collect();
        let (result, _) = paginate(ScriptedDriver::new(pages), fast_policy()).await;
        match result {
            Err(FolioError::Capture { failures, .. }) => {
                assert_eq!(failures, DEFAULT_MAX_CONSECUTIVE_CAPTURE_FAILURES + 1)
            }
            other => panic!("expected capture abort, got {other:?}"),
        }
    }
}
