use std::sync::Arc;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Navigating,
    Paginating,
    Assembling,
    Done,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Navigating => "navigating",
            Phase::Paginating => "paginating",
            Phase::Assembling => "assembling",
            Phase::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub phase: Phase,
    pub frames_captured: u32,
    /// Derived from scroll extent; absent until the document reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_total: Option<u32>,
    #[serde(default)]
    pub pages_assembled: u32,
}

impl ProgressEvent {
    pub fn new(phase: Phase, frames_captured: u32) -> Self {
        Self {
            phase,
            frames_captured,
            estimated_total: None,
            pages_assembled: 0,
        }
    }
}

impl std::fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.phase, self.estimated_total) {
            (Phase::Assembling, _) => write!(
                f,
                "[assembling] page {}/{}",
                self.pages_assembled, self.frames_captured
            ),
            (phase, Some(total)) => {
                write!(f, "[{phase}] {} of ~{total} frames", self.frames_captured)
            }
            (phase, None) => write!(f, "[{phase}] {} frames", self.frames_captured),
        }
    }
}

pub type ProgressSink = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Frames needed to cover `max_offset` with the given scroll step.
pub fn estimate_total(max_offset: u64, step: u64) -> Option<u32> {
    if step == 0 {
        return None;
    }
    Some((max_offset.div_ceil(step) + 1).min(u64::from(u32::MAX)) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_counts_first_frame() {
        assert_eq!(estimate_total(0, 100), Some(1));
        assert_eq!(estimate_total(250, 100), Some(4));
        assert_eq!(estimate_total(250, 0), None);
    }

    #[test]
    fn event_serializes_camel_case() {
        let event = ProgressEvent {
            estimated_total: Some(9),
            ..ProgressEvent::new(Phase::Paginating, 3)
        };
        let json = serde_json::to_value(event).unwrap();
        assert_eq!(json["phase"], "paginating");
        assert_eq!(json["framesCaptured"], 3);
        assert_eq!(json["estimatedTotal"], 9);
    }
}
