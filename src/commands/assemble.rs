use std::path::PathBuf;
use std::process::ExitCode;

use folio_lib::image_loader::{load_images, ImageLoadOptions};
use folio_lib::output::{AssembleOutput, FOLIO_OUTPUT_VERSION};
use folio_lib::pdf::{PdfAssembler, PdfOptions};
use folio_lib::target::sanitize_name;
use folio_lib::{FolioError, FolioOutput};
use tokio_util::sync::CancellationToken;

use crate::cli::OutputFormat;
use crate::formatting::{finish, render_error};
use crate::settings::{flag_present, load_config, log_effective_config, validate};

pub struct AssembleArgs {
    pub images: Vec<PathBuf>,
    pub output: PathBuf,
    pub dedup: bool,
    pub dpi: f32,
    pub format: OutputFormat,
}

/// Run the assemble command.
pub fn run_assemble(
    raw_args: &[String],
    config_path: Option<PathBuf>,
    verbose: bool,
    args: AssembleArgs,
) -> ExitCode {
    let format = args.format;
    let mut config = match load_config(config_path.as_deref()) {
        Ok(cfg) => cfg,
        Err(err) => return render_error(err, format, None),
    };
    if flag_present(raw_args, "--dpi") {
        config.pdf.dpi = args.dpi;
    }
    if let Err(err) = validate(&config, config_path.as_deref()) {
        return render_error(err, format, None);
    }
    if verbose {
        log_effective_config(&config, config_path.as_deref());
        eprintln!("Loading {} image(s)\u{2026}", args.images.len());
    }

    let loaded = match load_images(
        &args.images,
        ImageLoadOptions {
            dedup: args.dedup,
            policy: config.dedup,
        },
    ) {
        Ok(loaded) => loaded,
        Err(err) => return render_error(err.into(), format, None),
    };

    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(err) = std::fs::create_dir_all(parent) {
            return render_error(FolioError::Io(err), format, None);
        }
    }

    let title = args
        .output
        .file_stem()
        .map(|stem| sanitize_name(&stem.to_string_lossy()));
    let assembler = PdfAssembler::new(PdfOptions {
        title,
        ..config.capture_config().pdf
    });
    let total = loaded.frames.len();
    let result = assembler.assemble(
        &loaded.frames,
        &args.output,
        &CancellationToken::new(),
        |pages| {
            if verbose {
                eprintln!("[assembling] page {pages}/{total}");
            }
        },
    );

    let mut report = match result {
        Ok(report) => report,
        Err(err) => return render_error(err.into(), format, None),
    };
    report.skipped.extend(loaded.skipped);

    finish(
        FolioOutput::Assembled(AssembleOutput {
            version: FOLIO_OUTPUT_VERSION.to_string(),
            inputs: loaded.inputs,
            duplicates: loaded.duplicates,
            report,
        }),
        format,
        None,
    )
}
