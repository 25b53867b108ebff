use crate::error::ErrorPayload;
use crate::pdf::AssemblyReport;
use crate::session::{CaptureOutcome, CaptureReport};
use crate::Viewport;
use serde::{Deserialize, Serialize};

/// Schema version for output payloads.
pub const FOLIO_OUTPUT_VERSION: &str = "0.1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum FolioOutput {
    Success(CaptureOutput),
    Assembled(AssembleOutput),
    Cancelled(CancelledOutput),
    Error(ErrorOutput),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureOutput {
    pub version: String,
    pub viewport: Viewport,
    #[serde(flatten)]
    pub report: CaptureReport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssembleOutput {
    pub version: String,
    pub inputs: u32,
    pub duplicates: u32,
    #[serde(flatten)]
    pub report: AssemblyReport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledOutput {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorOutput {
    pub version: String,
    #[serde(flatten)]
    pub error: ErrorPayload,
}

impl FolioOutput {
    pub fn from_capture(outcome: CaptureOutcome, url: &str, viewport: Viewport) -> Self {
        match outcome {
            CaptureOutcome::Success(report) => FolioOutput::Success(CaptureOutput {
                version: FOLIO_OUTPUT_VERSION.to_string(),
                viewport,
                report,
            }),
            CaptureOutcome::Cancelled => FolioOutput::Cancelled(CancelledOutput {
                version: FOLIO_OUTPUT_VERSION.to_string(),
                url: Some(url.to_string()),
            }),
            CaptureOutcome::Failure(error) => FolioOutput::error(error),
        }
    }

    pub fn error(error: ErrorPayload) -> Self {
        FolioOutput::Error(ErrorOutput {
            version: FOLIO_OUTPUT_VERSION.to_string(),
            error,
        })
    }
}
