mod cli;
mod commands;
mod formatting;
mod settings;

use std::process::ExitCode;

use cli::Commands;
use commands::{run_assemble, run_capture, AssembleArgs};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    run().await
}

/// Logs go to stderr so stdout carries only the JSON output.
/// `RUST_LOG` takes precedence over `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "folio=debug,folio_lib=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn run() -> ExitCode {
    let raw_args: Vec<String> = std::env::args().collect();
    let args = cli::parse();
    init_tracing(args.verbose);

    match args.command {
        Commands::Capture(capture) => {
            run_capture(&raw_args, args.config, args.verbose, capture).await
        }
        Commands::Assemble {
            images,
            output,
            dedup,
            dpi,
            format,
        } => run_assemble(
            &raw_args,
            args.config,
            args.verbose,
            AssembleArgs {
                images,
                output,
                dedup,
                dpi,
                format,
            },
        ),
    }
}
