//! Folio Library
//!
//! Captures a paginated online document into a single PDF. A headless browser
//! renders the document, the viewport is scrolled step by step, every stable
//! render is screenshotted, near-identical neighbouring frames are dropped and
//! the survivors become one PDF page each.
//!
//! # Module Overview
//!
//! - [`driver`] - Browser driving (`PageDriver`) and the Chromium backend
//! - [`pagination`] - Scroll/capture loop and its stop conditions
//! - [`frames`] - Ordered frame store with perceptual-hash deduplication
//! - [`phash`] - Gradient hashes used to compare frames
//! - [`pdf`] - Atomic PDF assembly
//! - [`session`] - Cancellable capture sessions and the single-flight manager
//! - [`target`] - URL validation and output naming
//! - [`config`] - Configuration file support
//! - [`output`] - JSON output schemas
//!
//! # Example
//!
//! ```no_run
//! use folio_lib::driver::PageDriver;
//! use folio_lib::session::{CaptureConfig, CaptureOutcome, CaptureRequest, CaptureSession};
//! use tokio_util::sync::CancellationToken;
//! use url::Url;
//!
//! # async fn example(driver: &mut impl PageDriver) -> folio_lib::Result<()> {
//! let url = Url::parse("https://example.com/doc/7")?;
//! let request = CaptureRequest::new(url, "out");
//! let outcome = CaptureSession::new(request, CaptureConfig::default(), CancellationToken::new())
//!     .run(driver)
//!     .await;
//! if let CaptureOutcome::Success(report) = outcome {
//!     println!("{} pages -> {}", report.pages, report.output.display());
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod frames;
pub mod image_loader;
pub mod output;
pub mod pagination;
pub mod pdf;
pub mod phash;
pub mod progress;
pub mod session;
pub mod target;
pub mod viewport;

pub use config::Config;
pub use driver::{PageDriver, RawImage};
pub use error::{ErrorKind, ErrorPayload, FolioError, Result};
pub use frames::{DedupPolicy, Frame, FrameStore, OrderedFrames};
pub use output::{FolioOutput, FOLIO_OUTPUT_VERSION};
pub use pagination::{PaginationController, PaginationPolicy, StopReason};
pub use pdf::{AssemblyReport, PdfAssembler, PdfOptions};
pub use progress::{Phase, ProgressEvent, ProgressSink};
pub use session::{CaptureConfig, CaptureManager, CaptureOutcome, CaptureRequest, CaptureSession};
pub use target::{derive_name, parse_target};
pub use viewport::Viewport;
