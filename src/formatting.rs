use std::fmt::Write as FmtWrite;
use std::io::{self, IsTerminal};
use std::path::Path;
use std::process::ExitCode;

use folio_lib::{FolioError, FolioOutput};

use crate::cli::OutputFormat;

/// Write output to stdout in the requested format, and the JSON form to
/// `report` when given.
pub fn write_output(
    body: &FolioOutput,
    format: OutputFormat,
    report: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(body)?),
        OutputFormat::Pretty => write_pretty_output(body)?,
    };
    if let Some(path) = report {
        std::fs::write(path, serde_json::to_string_pretty(body)?)?;
    }
    Ok(())
}

/// Render `body`, falling back to an error line if stdout or the report file
/// cannot be written, and return the exit code for it.
pub fn finish(body: FolioOutput, format: OutputFormat, report: Option<&Path>) -> ExitCode {
    if let Err(write_err) = write_output(&body, format, report) {
        eprintln!("Failed to write output: {}", write_err);
        return ExitCode::from(2);
    }
    exit_code_for(&body)
}

/// Render an error and return the appropriate exit code.
pub fn render_error(err: FolioError, format: OutputFormat, report: Option<&Path>) -> ExitCode {
    let payload = FolioOutput::error(err.to_payload());
    if let Err(write_err) = write_output(&payload, format, report) {
        eprintln!("Failed to write error output: {}", write_err);
    }
    ExitCode::from(2)
}

/// 0 for a written PDF, 1 for a cancelled capture, 2 for any failure.
pub fn exit_code_for(body: &FolioOutput) -> ExitCode {
    match body {
        FolioOutput::Success(_) | FolioOutput::Assembled(_) => ExitCode::SUCCESS,
        FolioOutput::Cancelled(_) => ExitCode::from(1),
        FolioOutput::Error(_) => ExitCode::from(2),
    }
}

fn write_pretty_output(body: &FolioOutput) -> io::Result<()> {
    if io::stdout().is_terminal() {
        println!("{}", format_pretty(body, true));
        return Ok(());
    }

    // Non-tty: keep JSON shape for pipelines.
    let content = serde_json::to_string_pretty(body)
        .unwrap_or_else(|_| "{\"status\":\"error\"}".to_string());
    println!("{content}");
    Ok(())
}

/// Format output for human consumption in a terminal.
pub fn format_pretty(body: &FolioOutput, colorize: bool) -> String {
    let mut buf = String::new();
    match body {
        FolioOutput::Success(out) => {
            let report = &out.report;
            let header = color("[DONE]", "32", colorize);
            writeln!(
                buf,
                "{header} {} page{} -> {}",
                report.pages,
                plural(report.pages),
                report.output.display()
            )
            .ok();
            if let Some(title) = &report.title {
                writeln!(buf, "Title: {title}").ok();
            }
            writeln!(buf, "Source: {} (viewport {})", report.url, out.viewport).ok();
            writeln!(
                buf,
                "Stopped: {} after {} capture{} ({} duplicate{} dropped) in {:.1}s",
                report.stop_reason,
                report.capture_attempts,
                plural(report.capture_attempts),
                report.duplicates,
                plural(report.duplicates),
                report.duration_ms as f64 / 1000.0
            )
            .ok();
            writeln!(buf, "Size: {}", human_bytes(report.bytes)).ok();

            let warnings = report.skipped_captures + report.degraded_frames;
            if warnings > 0 || !report.skipped_pages.is_empty() {
                writeln!(buf, "{}", color("Warnings:", "33", colorize)).ok();
                if report.skipped_captures > 0 {
                    writeln!(buf, "- {} capture(s) skipped", report.skipped_captures).ok();
                }
                if report.degraded_frames > 0 {
                    writeln!(
                        buf,
                        "- {} frame(s) captured before rendering settled",
                        report.degraded_frames
                    )
                    .ok();
                }
                for error in report.capture_errors.iter().take(5) {
                    writeln!(buf, "- {error}").ok();
                }
                for skipped in &report.skipped_pages {
                    writeln!(buf, "- page {} left out: {}", skipped.sequence, skipped.reason).ok();
                }
            }
        }
        FolioOutput::Assembled(out) => {
            let header = color("[DONE]", "32", colorize);
            writeln!(
                buf,
                "{header} {} page{} from {} image{} -> {}",
                out.report.pages,
                plural(out.report.pages),
                out.inputs,
                plural(out.inputs),
                out.report.path.display()
            )
            .ok();
            if out.duplicates > 0 {
                writeln!(buf, "Duplicates dropped: {}", out.duplicates).ok();
            }
            writeln!(buf, "Size: {}", human_bytes(out.report.bytes)).ok();
            for skipped in &out.report.skipped {
                writeln!(buf, "- image {} left out: {}", skipped.sequence, skipped.reason).ok();
            }
        }
        FolioOutput::Cancelled(out) => {
            let header = color("[CANCELLED]", "33", colorize);
            match &out.url {
                Some(url) => writeln!(buf, "{header} Capture of {url} stopped; no file written"),
                None => writeln!(buf, "{header} Capture stopped; no file written"),
            }
            .ok();
        }
        FolioOutput::Error(out) => {
            let header = color("[ERROR]", "31", colorize);
            writeln!(buf, "{} {}: {}", header, out.error.kind, out.error.message).ok();
            if let Some(remediation) = &out.error.remediation {
                writeln!(buf, "Hint: {}", remediation).ok();
            }
        }
    }
    buf
}

/// Apply ANSI color codes when enabled.
fn color(text: &str, code: &str, colorize: bool) -> String {
    if colorize {
        format!("\x1b[{}m{}\x1b[0m", code, text)
    } else {
        text.to_string()
    }
}

fn plural(n: u32) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
