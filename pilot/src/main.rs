use crate::app::{App, Args};

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod app;
mod error;

fn main() -> ExitCode {
    let args = Args::parse();

    // stdout carries commands only, so every log line goes to stderr.
    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match App::new(&args).and_then(|app| app.run()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "pilot stopped");
            ExitCode::FAILURE
        }
    }
}
