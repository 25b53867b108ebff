use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use folio_lib::progress::{ProgressEvent, ProgressSink};
use folio_lib::session::{CaptureManager, CaptureOutcome, CaptureRequest};
use folio_lib::target::parse_target;
use folio_lib::{Config, FolioError, FolioOutput};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::cli::CaptureArgs;
use crate::formatting::{finish, render_error};
use crate::settings::{
    load_config, log_effective_config, resolve_capture_settings, validate, CaptureFlagSources,
};

/// Run the capture command.
pub async fn run_capture(
    raw_args: &[String],
    config_path: Option<PathBuf>,
    verbose: bool,
    args: CaptureArgs,
) -> ExitCode {
    let format = args.format;
    let report = args.report.clone();

    let config = match load_config(config_path.as_deref()) {
        Ok(cfg) => cfg,
        Err(err) => return render_error(err, format, report.as_deref()),
    };
    let flag_sources = CaptureFlagSources::from_args(raw_args);
    let resolved = resolve_capture_settings(&args, config, &flag_sources);
    if let Err(err) = validate(&resolved.config, config_path.as_deref()) {
        return render_error(err, format, report.as_deref());
    }
    if verbose {
        log_effective_config(&resolved.config, config_path.as_deref());
    }

    let url = match parse_target(&args.url) {
        Ok(url) => url,
        Err(err) => return render_error(err.into(), format, report.as_deref()),
    };
    let mut request = CaptureRequest::new(url.clone(), resolved.output_dir.clone());
    if let Some(name) = args.name.clone() {
        request = request.with_name(name);
    }

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn(cancel_on_interrupt(cancel.clone()));

    let progress: Option<ProgressSink> = if verbose {
        Some(Arc::new(|event: &ProgressEvent| eprintln!("{event}")))
    } else {
        None
    };

    let manager = CaptureManager::new(resolved.config.capture_config());
    let outcome = capture_with_browser(&manager, &resolved.config, request, cancel, progress).await;
    interrupt.abort();

    match outcome {
        Ok(outcome) => finish(
            FolioOutput::from_capture(outcome, url.as_str(), resolved.config.viewport),
            format,
            report.as_deref(),
        ),
        Err(err) => render_error(err, format, report.as_deref()),
    }
}

async fn cancel_on_interrupt(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupt received, cancelling capture");
        cancel.cancel();
    }
}

#[cfg(feature = "chromium")]
async fn capture_with_browser(
    manager: &CaptureManager,
    config: &Config,
    request: CaptureRequest,
    cancel: CancellationToken,
    progress: Option<ProgressSink>,
) -> Result<CaptureOutcome, FolioError> {
    let mut driver = folio_lib::driver::ChromiumDriver::new(config.chromium_options());
    manager.capture(request, &mut driver, cancel, progress).await
}

#[cfg(not(feature = "chromium"))]
async fn capture_with_browser(
    _manager: &CaptureManager,
    _config: &Config,
    _request: CaptureRequest,
    _cancel: CancellationToken,
    _progress: Option<ProgressSink>,
) -> Result<CaptureOutcome, FolioError> {
    Err(FolioError::Driver(
        "folio was built without the `chromium` feature; rebuild with it enabled to capture URLs"
            .to_string(),
    ))
}
