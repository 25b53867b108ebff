//! TOML configuration.
//!
//! Every section and field is optional; missing values take the built-in
//! defaults. Lookup order is an explicit path, then
//! `~/.config/folio/config.toml`, then defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::driver::{RenderPolicy, DEFAULT_RENDER_INTERVAL, DEFAULT_RENDER_RETRIES};
use crate::frames::DedupPolicy;
use crate::pagination::{
    PaginationPolicy, DEFAULT_MAX_CONSECUTIVE_CAPTURE_FAILURES, DEFAULT_MAX_FRAMES,
    DEFAULT_NO_PROGRESS_LIMIT, DEFAULT_OVERLAP,
};
use crate::pdf::{ImageEncoding, PdfOptions, DEFAULT_COMPRESSION_LEVEL, DEFAULT_DPI, DEFAULT_JPEG_QUALITY};
use crate::session::{CaptureConfig, DEFAULT_NAVIGATION_RETRIES};
use crate::Viewport;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub viewport: Viewport,
    pub timeouts: Timeouts,
    pub render: RenderConfig,
    pub pagination: PaginationConfig,
    pub dedup: DedupPolicy,
    pub pdf: PdfConfig,
    pub browser: BrowserConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Timeouts {
    #[serde(with = "humantime_serde")]
    pub navigation: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            navigation: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RenderConfig {
    /// Pause between render-stability samples.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    pub max_retries: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RENDER_INTERVAL,
            max_retries: DEFAULT_RENDER_RETRIES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PaginationConfig {
    pub overlap: f64,
    pub no_progress_limit: u32,
    pub max_frames: u32,
    pub max_consecutive_capture_failures: u32,
    pub navigation_retries: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            overlap: DEFAULT_OVERLAP,
            no_progress_limit: DEFAULT_NO_PROGRESS_LIMIT,
            max_frames: DEFAULT_MAX_FRAMES,
            max_consecutive_capture_failures: DEFAULT_MAX_CONSECUTIVE_CAPTURE_FAILURES,
            navigation_retries: DEFAULT_NAVIGATION_RETRIES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingKind {
    #[default]
    Flate,
    Jpeg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PdfConfig {
    pub dpi: f32,
    pub encoding: EncodingKind,
    pub compression_level: u32,
    pub jpeg_quality: u8,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            dpi: DEFAULT_DPI,
            encoding: EncodingKind::Flate,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl PdfConfig {
    pub fn image_encoding(&self) -> ImageEncoding {
        match self.encoding {
            EncodingKind::Flate => ImageEncoding::Flate {
                level: self.compression_level,
            },
            EncodingKind::Jpeg => ImageEncoding::Jpeg {
                quality: self.jpeg_quality,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrowserConfig {
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    pub preflight: bool,
    pub hide_selectors: Vec<String>,
    pub scroll_container: Option<String>,
    pub end_marker_selector: Option<String>,
    /// Element that must exist before pagination starts.
    pub ready_selector: Option<String>,
    /// One frame per matching element instead of per viewport.
    pub page_selector: Option<String>,
    /// Replaces the built-in phrases when set.
    pub access_denied_markers: Option<Vec<String>>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_path: None,
            preflight: true,
            hide_selectors: Vec::new(),
            scroll_container: None,
            end_marker_selector: None,
            ready_selector: None,
            page_selector: None,
            access_denied_markers: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub directory: Option<PathBuf>,
    pub keep_artifacts: bool,
}

impl Config {
    pub fn central_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config").join("folio").join("config.toml"))
    }

    /// Explicit path must exist; the central file is used only if present.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::central_config_path() {
                Some(central) if central.is_file() => Self::from_file(&central),
                _ => Ok(Config::default()),
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        let p = &self.pagination;
        if !(0.0..0.5).contains(&p.overlap) {
            return Err(format!("pagination.overlap must be in [0, 0.5), got {}", p.overlap));
        }
        if p.no_progress_limit == 0 {
            return Err("pagination.no_progress_limit must be at least 1".to_string());
        }
        if p.max_frames == 0 {
            return Err("pagination.max_frames must be at least 1".to_string());
        }
        if self.render.max_retries < 2 {
            return Err(format!(
                "render.max_retries must be at least 2 to compare samples, got {}",
                self.render.max_retries
            ));
        }
        if !(self.pdf.dpi.is_finite() && self.pdf.dpi > 0.0) {
            return Err(format!("pdf.dpi must be positive, got {}", self.pdf.dpi));
        }
        if self.pdf.compression_level > 9 {
            return Err(format!(
                "pdf.compression_level must be 0-9, got {}",
                self.pdf.compression_level
            ));
        }
        if !(1..=100).contains(&self.pdf.jpeg_quality) {
            return Err(format!(
                "pdf.jpeg_quality must be 1-100, got {}",
                self.pdf.jpeg_quality
            ));
        }
        if !(4..=64).contains(&self.dedup.hash_size) {
            return Err(format!(
                "dedup.hash_size must be 4-64, got {}",
                self.dedup.hash_size
            ));
        }
        Viewport::new(self.viewport.width, self.viewport.height)
            .map_err(|e| format!("viewport: {e}"))?;
        if self.timeouts.navigation.is_zero() {
            return Err("timeouts.navigation must be greater than zero".to_string());
        }
        let b = &self.browser;
        for (key, selector) in [
            ("browser.scroll_container", &b.scroll_container),
            ("browser.end_marker_selector", &b.end_marker_selector),
            ("browser.ready_selector", &b.ready_selector),
            ("browser.page_selector", &b.page_selector),
        ] {
            if selector.as_deref().is_some_and(|s| s.trim().is_empty()) {
                return Err(format!("{key} must not be empty"));
            }
        }
        Ok(())
    }

    pub fn render_policy(&self) -> RenderPolicy {
        RenderPolicy {
            interval: self.render.interval,
            max_retries: self.render.max_retries,
        }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            pagination: PaginationPolicy {
                overlap: self.pagination.overlap,
                no_progress_limit: self.pagination.no_progress_limit,
                max_frames: self.pagination.max_frames,
                max_consecutive_capture_failures: self.pagination.max_consecutive_capture_failures,
                render: self.render_policy(),
            },
            dedup: self.dedup,
            pdf: PdfOptions {
                dpi: self.pdf.dpi,
                encoding: self.pdf.image_encoding(),
                title: None,
            },
            navigation_retries: self.pagination.navigation_retries,
            keep_artifacts: self.output.keep_artifacts,
        }
    }

    #[cfg(feature = "chromium")]
    pub fn chromium_options(&self) -> crate::driver::ChromiumOptions {
        let defaults = crate::driver::ChromiumOptions::default();
        crate::driver::ChromiumOptions {
            viewport: self.viewport,
            headless: self.browser.headless,
            chrome_path: self.browser.chrome_path.clone(),
            navigation_timeout: self.timeouts.navigation,
            preflight: self.browser.preflight,
            hide_selectors: self.browser.hide_selectors.clone(),
            scroll_container: self.browser.scroll_container.clone(),
            end_marker_selector: self.browser.end_marker_selector.clone(),
            ready_selector: self.browser.ready_selector.clone(),
            page_selector: self.browser.page_selector.clone(),
            access_denied_markers: self
                .browser
                .access_denied_markers
                .clone()
                .unwrap_or(defaults.access_denied_markers),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.timeouts.navigation, Duration::from_secs(30));
        assert_eq!(cfg.pagination.no_progress_limit, 3);
        assert_eq!(cfg.pdf.image_encoding(), ImageEncoding::Flate { level: 6 });
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let cfg: Config = toml::from_str(
            r##"
            [viewport]
            width = 1024
            height = 768

            [render]
            interval = "250ms"

            [pdf]
            encoding = "jpeg"
            jpeg_quality = 75

            [browser]
            hide_selectors = ["#cookie-banner", ".toolbar"]
            ready_selector = ".document_scroller"
            page_selector = ".outer_page"
            "##,
        )
        .expect("parse");
        assert_eq!(cfg.viewport.width, 1024);
        assert_eq!(cfg.render.interval, Duration::from_millis(250));
        assert_eq!(cfg.render.max_retries, DEFAULT_RENDER_RETRIES);
        assert_eq!(cfg.pdf.image_encoding(), ImageEncoding::Jpeg { quality: 75 });
        assert_eq!(cfg.browser.hide_selectors.len(), 2);
        assert_eq!(cfg.browser.ready_selector.as_deref(), Some(".document_scroller"));
        assert_eq!(cfg.browser.page_selector.as_deref(), Some(".outer_page"));
        assert!(cfg.browser.headless);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<Config>("[pagination]\noverlapp = 0.1\n").is_err());
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let mut cfg = Config::default();
        cfg.pagination.overlap = 0.5;
        assert!(cfg.validate().unwrap_err().contains("overlap"));

        let mut cfg = Config::default();
        cfg.pdf.compression_level = 12;
        assert!(cfg.validate().unwrap_err().contains("compression_level"));

        let mut cfg = Config::default();
        cfg.render.max_retries = 1;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::default();
        cfg.browser.page_selector = Some("  ".to_string());
        assert!(cfg.validate().unwrap_err().contains("browser.page_selector"));
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("folio.toml");
        fs::write(&path, "[pagination]\nmax_frames = 40\n").unwrap();
        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.capture_config().pagination.max_frames, 40);
    }

    #[test]
    fn load_missing_explicit_file_fails() {
        let err = Config::load(Some(Path::new("/nonexistent/folio.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
