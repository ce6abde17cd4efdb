//! vmarray-probe: show that a VirtualArray commits memory lazily.

use std::process::ExitCode;

use vmarray_probe::{app, config, errors};

fn main() -> ExitCode {
    let config = config::ProbeConfig::parse();

    // Initialize tracing
    let default_level = if config.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .init();

    match app::run(&config) {
        Ok(()) => ExitCode::from(errors::EXIT_OK),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(errors::exit_code(&err))
        }
    }
}
