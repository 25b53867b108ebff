use clap::{Args, Parser, Subcommand, ValueEnum};
use folio_lib::Viewport;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "folio")]
#[command(
    version,
    about = "folio - Capture paginated web documents as PDF",
    long_about = "folio\n\nModes:\n- capture: open a publicly viewable document in a headless browser, page through it and write every distinct viewport as one PDF page.\n- assemble: build a PDF from local images with the same deduplication and page layout.\n\nExit codes: 0 success, 1 cancelled, 2 failure."
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, help = "Enable verbose output (debug logs and progress on stderr)")]
    pub verbose: bool,

    #[arg(
        long,
        global = true,
        value_name = "PATH",
        help = "Optional config file (TOML); defaults to ~/.config/folio/config.toml; CLI flags override config"
    )]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Capture a paginated document from a URL into a PDF
    Capture(CaptureArgs),

    /// Assemble local images into a PDF, one page per image
    Assemble {
        #[arg(required = true, help = "Images in page order")]
        images: Vec<PathBuf>,

        #[arg(long, short, help = "Output PDF path")]
        output: PathBuf,

        #[arg(long, help = "Drop images that look the same as the previous one")]
        dedup: bool,

        #[arg(long, default_value = "96", help = "Pixels per inch used to size PDF pages")]
        dpi: f32,

        #[arg(long, value_enum, default_value = "json", help = "Output format")]
        format: OutputFormat,
    },
}

#[derive(Args, Debug, Clone)]
pub struct CaptureArgs {
    #[arg(help = "Document URL (http, https or file)")]
    pub url: String,

    #[arg(
        long,
        short = 'o',
        default_value = ".",
        value_name = "DIR",
        help = "Directory for the PDF; created if missing"
    )]
    pub output_dir: PathBuf,

    #[arg(long, help = "File name without extension (default: page title or URL)")]
    pub name: Option<String>,

    #[arg(
        long,
        default_value = "1280x1600",
        help = "Viewport dimensions (WIDTHxHEIGHT)"
    )]
    pub viewport: Viewport,

    #[arg(
        long,
        default_value = "30",
        value_name = "SECS",
        help = "Navigation timeout (seconds)"
    )]
    pub nav_timeout: u64,

    #[arg(
        long,
        default_value = "400",
        value_name = "MS",
        help = "Pause between render-stability samples (milliseconds)"
    )]
    pub render_interval: u64,

    #[arg(
        long,
        default_value = "8",
        help = "Render-stability samples before capturing anyway"
    )]
    pub render_retries: u32,

    #[arg(long, default_value = "2000", help = "Hard ceiling on capture attempts")]
    pub max_frames: u32,

    #[arg(
        long,
        default_value = "0.05",
        help = "Fraction of the viewport repeated between consecutive captures"
    )]
    pub overlap: f64,

    #[arg(long, default_value = "96", help = "Pixels per inch used to size PDF pages")]
    pub dpi: f32,

    #[arg(
        long,
        value_name = "1-100",
        help = "Store pages as JPEG with this quality instead of lossless"
    )]
    pub jpeg_quality: Option<u8>,

    #[arg(
        long,
        default_value = "6",
        value_name = "0-9",
        help = "Lossless compression level"
    )]
    pub compression_level: u32,

    #[arg(
        long,
        help = "Write captured frames to <output-dir>/<name>-frames when the capture fails"
    )]
    pub keep_artifacts: bool,

    #[arg(long, help = "Show the browser window")]
    pub headful: bool,

    #[arg(long, value_enum, default_value = "json", help = "Output format")]
    pub format: OutputFormat,

    #[arg(long, value_name = "PATH", help = "Also write the JSON report to this file")]
    pub report: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum, Default, Debug)]
pub enum OutputFormat {
    #[default]
    Json,
    Pretty,
}

pub fn parse() -> Cli {
    Cli::parse()
}
