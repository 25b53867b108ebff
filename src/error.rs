use crate::driver::{DriverError, NavigationFailure};
use crate::frames::EmptySequence;
use crate::image_loader::ImageLoadError;
use crate::pdf::AssemblyError;
use crate::target::TargetParseError;
use crate::viewport::ViewportParseError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::ParseError;

#[derive(Debug, Error)]
pub enum FolioError {
    #[error("Navigation failed: {0}")]
    Navigation(NavigationFailure),

    #[error("Capture failed for {failures} consecutive frames: {last}")]
    Capture { failures: u32, last: String },

    #[error(transparent)]
    EmptySequence(#[from] EmptySequence),

    #[error("PDF assembly failed: {0}")]
    Assembly(AssemblyError),

    #[error("Capture cancelled")]
    Cancelled,

    #[error("A capture session is already in progress")]
    Busy,

    #[error("Browser driver error: {0}")]
    Driver(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] ParseError),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Target(#[from] TargetParseError),

    #[error(transparent)]
    Viewport(#[from] ViewportParseError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl FolioError {
    pub fn config(message: impl Into<String>) -> Self {
        FolioError::Config(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FolioError::Navigation(_) => ErrorKind::Navigation,
            FolioError::Capture { .. } => ErrorKind::Capture,
            FolioError::EmptySequence(_) => ErrorKind::EmptySequence,
            FolioError::Assembly(_) => ErrorKind::Assembly,
            FolioError::Cancelled => ErrorKind::Cancelled,
            FolioError::Busy => ErrorKind::Busy,
            FolioError::Driver(_) => ErrorKind::Driver,
            FolioError::Io(_) | FolioError::Image(_) | FolioError::Serialization(_) => {
                ErrorKind::Internal
            }
            FolioError::InvalidUrl(_)
            | FolioError::Target(_)
            | FolioError::Viewport(_)
            | FolioError::Config(_) => ErrorKind::Config,
        }
    }

    /// Message shown to the user. Navigation failures render without the
    /// "Navigation failed" prefix so access denial reads as such.
    pub fn user_message(&self) -> String {
        match self {
            FolioError::Navigation(failure) => failure.to_string(),
            other => other.to_string(),
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        let kind = self.kind();
        let message = self.user_message();
        let remediation = match self {
            FolioError::Navigation(NavigationFailure::AccessDenied(_)) => {
                "The document requires a login or permission that folio does not provide. Only publicly viewable documents can be captured."
            }
            FolioError::Navigation(NavigationFailure::Unreachable(_)) => {
                "Check the URL, connectivity, proxy or VPN and retry."
            }
            FolioError::Navigation(NavigationFailure::Timeout(_)) => {
                "Increase --nav-timeout or make sure the page loads without blocking."
            }
            FolioError::Navigation(NavigationFailure::Other(_)) => {
                "Re-run with --verbose to see the browser error."
            }
            FolioError::Capture { .. } => {
                "Screenshots kept failing; retry, try --headful, or lower the viewport size."
            }
            FolioError::EmptySequence(_) => {
                "No page content was captured; check that the document renders in a normal browser."
            }
            FolioError::Assembly(_) => {
                "Check that the output directory exists and is writable, and that disk space is available."
            }
            FolioError::Cancelled => "Capture was stopped before completion; no file was written.",
            FolioError::Busy => "Wait for the running capture to finish or cancel it first.",
            FolioError::Driver(msg) => {
                let lower = msg.to_ascii_lowercase();
                if lower.contains("could not auto detect")
                    || lower.contains("executable")
                    || lower.contains("not found")
                {
                    "Install Chrome/Chromium or set browser.chrome_path in the config file."
                } else {
                    "Re-run with --verbose; make sure no other process holds the browser profile."
                }
            }
            FolioError::Io(_) => "Check file paths and permissions.",
            FolioError::InvalidUrl(_) => "Verify the URL format (e.g., https://example.com/doc/123).",
            FolioError::Target(TargetParseError::UnsupportedScheme { .. }) => {
                "Use an http, https or file URL."
            }
            FolioError::Target(_) => "Verify the URL format (e.g., https://example.com/doc/123).",
            FolioError::Viewport(_) => "Pass --viewport as WIDTHxHEIGHT, e.g. 1280x1600.",
            FolioError::Image(_) => "A captured image could not be processed; re-run with --verbose.",
            FolioError::Serialization(_) => "Re-run with --verbose; file an issue if persistent.",
            FolioError::Config(_) => {
                "Check flags and config values (e.g., --viewport WIDTHxHEIGHT, --overlap 0.05)."
            }
        };
        ErrorPayload::new(kind, message, remediation)
    }
}

impl From<DriverError> for FolioError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Navigation(failure) => FolioError::Navigation(failure),
            other => FolioError::Driver(other.to_string()),
        }
    }
}

impl From<AssemblyError> for FolioError {
    fn from(err: AssemblyError) -> Self {
        match err {
            AssemblyError::Cancelled => FolioError::Cancelled,
            other => FolioError::Assembly(other),
        }
    }
}

impl From<ImageLoadError> for FolioError {
    fn from(err: ImageLoadError) -> Self {
        match err {
            ImageLoadError::Empty(empty) => FolioError::EmptySequence(empty),
            ImageLoadError::Load(image) => FolioError::Image(image),
            other => FolioError::Config(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, FolioError>;

/// Error taxonomy surfaced to the caller in terminal failures. Render
/// timeouts never end a session; they mark frames degraded instead.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Navigation,
    Capture,
    EmptySequence,
    Assembly,
    Cancelled,
    Busy,
    Driver,
    Config,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Navigation => "NavigationError",
            ErrorKind::Capture => "CaptureError",
            ErrorKind::EmptySequence => "EmptySequenceError",
            ErrorKind::Assembly => "AssemblyError",
            ErrorKind::Cancelled => "CancelledError",
            ErrorKind::Busy => "BusyError",
            ErrorKind::Driver => "DriverError",
            ErrorKind::Config => "ConfigError",
            ErrorKind::Internal => "InternalError",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
}

impl ErrorPayload {
    pub fn new(kind: ErrorKind, message: String, remediation: impl Into<String>) -> Self {
        Self {
            kind,
            message,
            remediation: Some(remediation.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn access_denied_payload_explains_limitation() {
        let err = FolioError::Navigation(NavigationFailure::AccessDenied(
            "HTTP 403 Forbidden".to_string(),
        ));
        let payload = err.to_payload();
        assert_eq!(payload.kind, ErrorKind::Navigation);
        assert!(
            payload.message.starts_with("access denied"),
            "expected access denied message, got: {}",
            payload.message
        );
        let remediation = payload.remediation.unwrap_or_default();
        assert!(
            remediation.contains("login"),
            "expected remediation to explain the login limitation, got: {remediation}"
        );
    }

    #[test]
    fn unreachable_and_access_denied_share_kind_but_not_remediation() {
        let denied = FolioError::Navigation(NavigationFailure::AccessDenied("x".into()));
        let unreachable = FolioError::Navigation(NavigationFailure::Unreachable("dns".into()));
        assert_eq!(denied.kind(), unreachable.kind());
        assert_ne!(
            denied.to_payload().remediation,
            unreachable.to_payload().remediation
        );
    }

    #[test]
    fn driver_errors_map_navigation_into_taxonomy() {
        let err: FolioError =
            DriverError::Navigation(NavigationFailure::Timeout(Duration::from_secs(3))).into();
        assert_eq!(err.kind(), ErrorKind::Navigation);

        let err: FolioError = DriverError::Session("browser crashed".into()).into();
        assert_eq!(err.kind(), ErrorKind::Driver);
    }

    #[test]
    fn assembly_cancellation_becomes_cancelled() {
        let err: FolioError = AssemblyError::Cancelled.into();
        assert!(matches!(err, FolioError::Cancelled));
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn driver_payload_suggests_browser_install_for_missing_binary() {
        let err = FolioError::Driver("Could not auto detect a chrome executable".into());
        let remediation = err.to_payload().remediation.unwrap_or_default();
        assert!(
            remediation.contains("Chromium"),
            "expected install hint, got: {remediation}"
        );
    }

    #[test]
    fn parse_errors_are_config_errors() {
        let err: FolioError = "12x".parse::<crate::Viewport>().unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert!(err.to_payload().remediation.unwrap_or_default().contains("WIDTHxHEIGHT"));

        let err: FolioError = crate::target::parse_target("ftp://example.com/doc")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn kind_display_uses_taxonomy_names() {
        assert_eq!(ErrorKind::EmptySequence.to_string(), "EmptySequenceError");
        assert_eq!(ErrorKind::Navigation.to_string(), "NavigationError");
    }

    #[test]
    fn kind_serializes_camel_case() {
        let json = serde_json::to_string(&ErrorKind::EmptySequence).expect("serialize kind");
        assert_eq!(json, "\"emptySequence\"");
    }
}
