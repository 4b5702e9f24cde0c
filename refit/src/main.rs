mod cli;

use clap::Parser;
use console::style;
use refit_core::{logging, CancelToken, Engine, Toolchain};
use tracing::warn;

/// Exit code for a user interrupt, matching shell convention (128 + SIGINT).
const EXIT_INTERRUPTED: i32 = 130;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let cli = cli::Cli::parse();

    let Some(config) = cli.to_config() else {
        eprintln!("{} target directory required (positional or --dir)", style("error:").red().bold());
        return 1;
    };

    if let Err(e) = config.validate() {
        eprintln!("{} {}", style("error:").red().bold(), e);
        return 1;
    }

    if cli.check_only {
        println!("CHECK_OK: {}", config.target_dir.display());
        return 0;
    }

    // Tool discovery is fatal before any work starts; the message names the
    // missing binary.
    let tools = match Toolchain::discover() {
        Ok(tools) => tools,
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            return 1;
        }
    };

    let log_path = match logging::init_run_logging(
        &config.target_dir,
        config.mode.as_str(),
        &config.log_level,
    ) {
        Ok(path) => Some(path),
        Err(e) => {
            eprintln!("{} could not initialize logging: {e}", style("warning:").yellow());
            None
        }
    };

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            eprintln!("\ninterrupt received; finishing in-flight work");
            cancel.cancel();
        }) {
            warn!(error = %e, "Could not install Ctrl-C handler");
        }
    }

    let engine = Engine::new(config, tools);
    match engine.run(&cancel, log_path) {
        Ok(summary) => {
            print!("{}", refit_core::render_colored(&summary.report));
            if let Some(path) = summary.report_path {
                println!("  report: {}", style(path.display()).dim());
            }
            if summary.cancelled {
                EXIT_INTERRUPTED
            } else {
                0
            }
        }
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            1
        }
    }
}
