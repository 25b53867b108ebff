use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Largest edge Chromium will rasterise in a single screenshot.
pub const MAX_VIEWPORT_EDGE: u32 = 16_384;

/// Browser window size used while paging through a document.
///
/// The height is also the scroll unit: every step advances by one viewport
/// height less the overlap margin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 1600,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ViewportParseError {
    #[error("Invalid viewport '{0}': expected WIDTHxHEIGHT (e.g., 1280x1600)")]
    InvalidFormat(String),
    #[error("Invalid viewport {axis} '{value}': not a number")]
    InvalidNumber { axis: &'static str, value: String },
    #[error("Viewport {axis} must be between 1 and {MAX_VIEWPORT_EDGE} pixels, got {value}")]
    OutOfRange { axis: &'static str, value: u32 },
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Result<Self, ViewportParseError> {
        check_edge("width", width)?;
        check_edge("height", height)?;
        Ok(Self { width, height })
    }
}

fn check_edge(axis: &'static str, value: u32) -> Result<(), ViewportParseError> {
    if value == 0 || value > MAX_VIEWPORT_EDGE {
        return Err(ViewportParseError::OutOfRange { axis, value });
    }
    Ok(())
}

fn parse_edge(axis: &'static str, raw: &str) -> Result<u32, ViewportParseError> {
    raw.trim()
        .parse()
        .map_err(|_| ViewportParseError::InvalidNumber {
            axis,
            value: raw.trim().to_string(),
        })
}

impl FromStr for Viewport {
    type Err = ViewportParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (width, height) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| ViewportParseError::InvalidFormat(s.to_string()))?;
        if height.contains(['x', 'X']) {
            return Err(ViewportParseError::InvalidFormat(s.to_string()));
        }
        Viewport::new(parse_edge("width", width)?, parse_edge("height", height)?)
    }
}

impl std::fmt::Display for Viewport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lower_and_upper_separator() {
        assert_eq!("1280x1600".parse::<Viewport>().unwrap(), Viewport::default());
        let vp: Viewport = " 800 X 600 ".parse().unwrap();
        assert_eq!((vp.width, vp.height), (800, 600));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(matches!(
            "1280".parse::<Viewport>(),
            Err(ViewportParseError::InvalidFormat(_))
        ));
        assert!(matches!(
            "1x2x3".parse::<Viewport>(),
            Err(ViewportParseError::InvalidFormat(_))
        ));
        assert!(matches!(
            "widex900".parse::<Viewport>(),
            Err(ViewportParseError::InvalidNumber { axis: "width", .. })
        ));
    }

    #[test]
    fn rejects_zero_and_oversized_edges() {
        assert_eq!(
            "0x900".parse::<Viewport>(),
            Err(ViewportParseError::OutOfRange {
                axis: "width",
                value: 0
            })
        );
        assert!("1280x20000".parse::<Viewport>().is_err());
    }

    #[test]
    fn display_round_trips() {
        let vp = Viewport::new(1024, 768).unwrap();
        assert_eq!(vp.to_string().parse::<Viewport>().unwrap(), vp);
    }
}
