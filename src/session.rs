//! One cancellable capture: navigate, paginate, assemble.
//!
//! A [`CaptureSession`] owns the request, the cancellation token and the
//! progress sink for a single run. It always closes the driver, never leaves
//! a partial PDF at the output path and produces exactly one
//! [`CaptureOutcome`]. [`CaptureManager`] keeps at most one session in flight.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::driver::{PageDriver, Ready};
use crate::error::{ErrorPayload, FolioError, Result};
use crate::frames::{write_artifacts, DedupPolicy, Frame, FrameStore};
use crate::pagination::{PaginationController, PaginationPolicy, PaginationSummary, StopReason};
use crate::pdf::{AssemblyReport, PdfAssembler, PdfOptions, SkippedFrame};
use crate::progress::{Phase, ProgressEvent, ProgressSink};
use crate::target::derive_name;

pub const DEFAULT_NAVIGATION_RETRIES: u32 = 2;
const NAVIGATION_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Idle,
    Navigating,
    Paginating,
    Assembling,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub url: Url,
    pub output_dir: PathBuf,
    /// Overrides the name derived from the page title or URL.
    pub name: Option<String>,
}

impl CaptureRequest {
    pub fn new(url: Url, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            url,
            output_dir: output_dir.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub pagination: PaginationPolicy,
    pub dedup: DedupPolicy,
    pub pdf: PdfOptions,
    /// Extra navigation attempts after the first; access denial is never retried.
    pub navigation_retries: u32,
    /// Write captured frames next to the output when the run fails.
    pub keep_artifacts: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            pagination: PaginationPolicy::default(),
            dedup: DedupPolicy::default(),
            pdf: PdfOptions::default(),
            navigation_retries: DEFAULT_NAVIGATION_RETRIES,
            keep_artifacts: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureReport {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub output: PathBuf,
    pub pages: u32,
    pub bytes: u64,
    pub stop_reason: StopReason,
    pub capture_attempts: u32,
    pub duplicates: u32,
    pub skipped_captures: u32,
    pub degraded_frames: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capture_errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_pages: Vec<SkippedFrame>,
    pub duration_ms: u64,
}

/// Terminal result of a session.
#[derive(Debug, Clone)]
pub enum CaptureOutcome {
    Success(CaptureReport),
    Cancelled,
    Failure(ErrorPayload),
}

impl CaptureOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CaptureOutcome::Success(_))
    }
}

pub struct CaptureSession {
    request: CaptureRequest,
    config: CaptureConfig,
    cancel: CancellationToken,
    progress: Option<ProgressSink>,
    state: SessionState,
    name: Option<String>,
    artifacts: Vec<Frame>,
}

impl CaptureSession {
    pub fn new(request: CaptureRequest, config: CaptureConfig, cancel: CancellationToken) -> Self {
        Self {
            request,
            config,
            cancel,
            progress: None,
            state: SessionState::Idle,
            name: None,
            artifacts: Vec::new(),
        }
    }

    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run to completion. The driver is closed on every path.
    pub async fn run<D: PageDriver + ?Sized>(mut self, driver: &mut D) -> CaptureOutcome {
        let started = Instant::now();
        info!(url = %self.request.url, "capture started");

        let result = self.drive(driver).await;
        driver.close().await;

        match result {
            Ok(mut report) => {
                report.duration_ms = started.elapsed().as_millis() as u64;
                self.transition(SessionState::Completed);
                self.emit(ProgressEvent {
                    pages_assembled: report.pages,
                    ..ProgressEvent::new(Phase::Done, report.pages)
                });
                CaptureOutcome::Success(report)
            }
            Err(FolioError::Cancelled) => {
                self.transition(SessionState::Cancelled);
                info!("capture cancelled");
                CaptureOutcome::Cancelled
            }
            Err(err) => {
                self.transition(SessionState::Failed);
                self.retain_artifacts();
                error!(kind = %err.kind(), error = %err, "capture failed");
                CaptureOutcome::Failure(err.to_payload())
            }
        }
    }

    async fn drive<D: PageDriver + ?Sized>(&mut self, driver: &mut D) -> Result<CaptureReport> {
        self.transition(SessionState::Navigating);
        self.emit(ProgressEvent::new(Phase::Navigating, 0));
        let ready = self.navigate(driver).await?;

        let name = derive_name(
            self.request.name.as_deref(),
            ready.title.as_deref(),
            &ready.url,
        );
        let output = self.request.output_dir.join(format!("{name}.pdf"));
        self.name = Some(name.clone());
        debug!(output = %output.display(), "derived output path");

        self.transition(SessionState::Paginating);
        let mut store = FrameStore::new(self.config.dedup);
        let summary = PaginationController::new(
            driver,
            self.config.pagination,
            self.cancel.clone(),
        )
        .with_progress(self.progress.clone())
        .run(&mut store)
        .await;

        let summary = match summary {
            Ok(summary) => summary,
            Err(err) => {
                self.artifacts = store.into_frames();
                return Err(err);
            }
        };

        // The browser is not needed for assembly.
        driver.close().await;

        if summary.stop_reason == StopReason::Cancelled || self.cancel.is_cancelled() {
            return Err(FolioError::Cancelled);
        }

        let frames = store.finalize()?;
        self.transition(SessionState::Assembling);
        fs::create_dir_all(&self.request.output_dir)?;

        let options = PdfOptions {
            title: Some(ready.title.clone().unwrap_or_else(|| name.clone())),
            ..self.config.pdf.clone()
        };
        let assembler = PdfAssembler::new(options);
        let cancel = self.cancel.clone();
        let sink = self.progress.clone();
        let total = frames.len() as u32;
        let target = output.clone();

        let (frames, assembled) = tokio::task::spawn_blocking(move || {
            let result = assembler.assemble(&frames, &target, &cancel, |pages| {
                if let Some(sink) = &sink {
                    sink(&ProgressEvent {
                        pages_assembled: pages,
                        estimated_total: Some(total),
                        ..ProgressEvent::new(Phase::Assembling, total)
                    });
                }
            });
            (frames, result)
        })
        .await
        .map_err(|e| FolioError::Io(std::io::Error::other(e.to_string())))?;

        let report = match assembled {
            Ok(report) => report,
            Err(err) => {
                self.artifacts = frames.into_inner();
                return Err(err.into());
            }
        };

        Ok(build_report(&ready, report, summary))
    }

    async fn navigate<D: PageDriver + ?Sized>(&self, driver: &mut D) -> Result<Ready> {
        let attempts = self.config.navigation_retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(FolioError::Cancelled),
                result = driver.open(&self.request.url) => result,
            };
            match result {
                Ok(ready) => {
                    info!(url = %ready.url, title = ?ready.title, attempt, "document ready");
                    return Ok(ready);
                }
                Err(err) if err.is_retryable_navigation() && attempt < attempts => {
                    warn!(attempt, error = %err, "navigation failed, retrying");
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return Err(FolioError::Cancelled),
                        _ = tokio::time::sleep(NAVIGATION_RETRY_DELAY) => {}
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn retain_artifacts(&self) {
        if !self.config.keep_artifacts || self.artifacts.is_empty() {
            return;
        }
        let name = self
            .name
            .clone()
            .unwrap_or_else(|| derive_name(self.request.name.as_deref(), None, &self.request.url));
        let dir = self.request.output_dir.join(format!("{name}-frames"));
        match write_artifacts(&self.artifacts, &dir) {
            Ok(count) => info!(dir = %dir.display(), count, "kept frames from failed run"),
            Err(err) => warn!(dir = %dir.display(), error = %err, "could not keep frames"),
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(sink) = &self.progress {
            sink(&event);
        }
    }
}

fn build_report(ready: &Ready, pdf: AssemblyReport, summary: PaginationSummary) -> CaptureReport {
    CaptureReport {
        url: ready.url.to_string(),
        title: ready.title.clone(),
        output: pdf.path,
        pages: pdf.pages,
        bytes: pdf.bytes,
        stop_reason: summary.stop_reason,
        capture_attempts: summary.attempts,
        duplicates: summary.duplicates,
        skipped_captures: summary.skipped,
        degraded_frames: summary.degraded,
        capture_errors: summary.capture_errors,
        skipped_pages: pdf.skipped,
        duration_ms: 0,
    }
}

/// Admits one capture at a time.
#[derive(Clone)]
pub struct CaptureManager {
    config: CaptureConfig,
    slot: Arc<Semaphore>,
}

impl CaptureManager {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            slot: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.slot.available_permits() == 0
    }

    /// Run a capture, or reject with [`FolioError::Busy`] if one is in flight.
    pub async fn capture<D: PageDriver + ?Sized>(
        &self,
        request: CaptureRequest,
        driver: &mut D,
        cancel: CancellationToken,
        progress: Option<ProgressSink>,
    ) -> Result<CaptureOutcome> {
        let _permit = self
            .slot
            .clone()
            .try_acquire_owned()
            .map_err(|_| FolioError::Busy)?;

        let mut session = CaptureSession::new(request, self.config.clone(), cancel);
        if let Some(sink) = progress {
            session = session.with_progress(sink);
        }
        Ok(session.run(driver).await)
    }
}
