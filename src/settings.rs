use std::path::{Path, PathBuf};
use std::time::Duration;

use folio_lib::config::EncodingKind;
use folio_lib::{Config, FolioError};

use crate::cli::CaptureArgs;

/// Tracks which CLI flags were explicitly provided vs. defaulted.
#[derive(Debug, Default)]
pub struct CaptureFlagSources {
    pub output_dir: bool,
    pub viewport: bool,
    pub nav_timeout: bool,
    pub render_interval: bool,
    pub render_retries: bool,
    pub max_frames: bool,
    pub overlap: bool,
    pub dpi: bool,
    pub compression_level: bool,
}

impl CaptureFlagSources {
    pub fn from_args(args: &[String]) -> Self {
        Self {
            output_dir: flag_present(args, "--output-dir") || flag_present(args, "-o"),
            viewport: flag_present(args, "--viewport"),
            nav_timeout: flag_present(args, "--nav-timeout"),
            render_interval: flag_present(args, "--render-interval"),
            render_retries: flag_present(args, "--render-retries"),
            max_frames: flag_present(args, "--max-frames"),
            overlap: flag_present(args, "--overlap"),
            dpi: flag_present(args, "--dpi"),
            compression_level: flag_present(args, "--compression-level"),
        }
    }
}

/// Checks if a flag was present in the command-line arguments.
pub fn flag_present(args: &[String], flag: &str) -> bool {
    args.iter()
        .any(|arg| arg == flag || arg.starts_with(&format!("{flag}=")))
}

/// Resolved settings after merging CLI args and config file.
#[derive(Debug, Clone)]
pub struct ResolvedCaptureSettings {
    pub config: Config,
    pub output_dir: PathBuf,
}

/// Merge CLI arguments into `config`, preferring CLI when flags are present.
///
/// Switch-style flags (`--keep-artifacts`, `--headful`, `--jpeg-quality`) can
/// only turn a behaviour on, so they apply whenever given.
pub fn resolve_capture_settings(
    args: &CaptureArgs,
    mut config: Config,
    flags: &CaptureFlagSources,
) -> ResolvedCaptureSettings {
    if flags.viewport {
        config.viewport = args.viewport;
    }
    if flags.nav_timeout {
        config.timeouts.navigation = Duration::from_secs(args.nav_timeout);
    }
    if flags.render_interval {
        config.render.interval = Duration::from_millis(args.render_interval);
    }
    if flags.render_retries {
        config.render.max_retries = args.render_retries;
    }
    if flags.max_frames {
        config.pagination.max_frames = args.max_frames;
    }
    if flags.overlap {
        config.pagination.overlap = args.overlap;
    }
    if flags.dpi {
        config.pdf.dpi = args.dpi;
    }
    if flags.compression_level {
        config.pdf.compression_level = args.compression_level;
    }
    if let Some(quality) = args.jpeg_quality {
        config.pdf.encoding = EncodingKind::Jpeg;
        config.pdf.jpeg_quality = quality;
    }
    if args.keep_artifacts {
        config.output.keep_artifacts = true;
    }
    if args.headful {
        config.browser.headless = false;
    }

    let output_dir = if flags.output_dir {
        args.output_dir.clone()
    } else {
        config
            .output
            .directory
            .clone()
            .unwrap_or_else(|| args.output_dir.clone())
    };

    ResolvedCaptureSettings { config, output_dir }
}

/// Load config from a TOML file, central config, or return defaults.
/// Priority: explicit path > ~/.config/folio/config.toml > defaults
pub fn load_config(path: Option<&Path>) -> Result<Config, FolioError> {
    let cfg = Config::load(path).map_err(|e| {
        let loc = path
            .map(|p| p.display().to_string())
            .or_else(|| Config::central_config_path().map(|p| p.display().to_string()))
            .unwrap_or_else(|| "defaults".to_string());
        FolioError::Config(format!("Failed to read config {}: {}", loc, e))
    })?;

    validate(&cfg, path)?;
    Ok(cfg)
}

/// Re-check a config after CLI overrides were merged in.
pub fn validate(cfg: &Config, path: Option<&Path>) -> Result<(), FolioError> {
    cfg.validate().map_err(|e| {
        let prefix = path
            .map(|p| format!("Invalid config ({}): {}", p.display(), e))
            .unwrap_or_else(|| format!("Invalid config: {}", e));
        FolioError::Config(prefix)
    })
}

/// Format effective config as a single-line string.
pub fn format_effective_config(config: &Config, config_source: Option<&Path>) -> String {
    let source = config_source
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "defaults".to_string());
    let encoding = match config.pdf.encoding {
        EncodingKind::Flate => format!("flate/{}", config.pdf.compression_level),
        EncodingKind::Jpeg => format!("jpeg/{}", config.pdf.jpeg_quality),
    };
    format!(
        "Effective config [{source}]: viewport={}, timeouts: nav={}s, render: interval={}ms retries={}, pagination: overlap={:.2} no-progress={} max-frames={}, dedup: distance={} luma={}, pdf: dpi={} encoding={encoding}, headless={}",
        config.viewport,
        config.timeouts.navigation.as_secs(),
        config.render.interval.as_millis(),
        config.render.max_retries,
        config.pagination.overlap,
        config.pagination.no_progress_limit,
        config.pagination.max_frames,
        config.dedup.max_distance,
        config.dedup.max_luma_delta,
        config.pdf.dpi,
        config.browser.headless,
    )
}

/// Log effective config to stderr (verbose mode).
pub fn log_effective_config(config: &Config, config_path: Option<&Path>) {
    eprintln!("{}", format_effective_config(config, config_path));
}
