mod catalog;
mod cli;
mod logging;
mod model;
mod orchestrator;
mod supervisor;
#[cfg(feature = "tui")]
mod tui;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let interactive = args.is_interactive();
    let _log_guard = logging::init(args.effective_log_level(), args.log_target())?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), interactive, "starting");

    match cli::run(args).await {
        Ok(()) => {
            // Detached children keep no handles open, but leave promptly anyway
            if !interactive {
                std::process::exit(0);
            }
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "exiting with error");
            if interactive {
                Err(e)
            } else {
                eprintln!("{e:#}");
                std::process::exit(1);
            }
        }
    }
}
