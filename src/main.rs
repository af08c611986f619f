use clap::Parser;
use ruuvi_exporter::app::{self, Options};
use ruuvi_exporter::source::StdinSource;
use std::panic::{self, PanicHookInfo};
use tracing_subscriber::EnvFilter;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();
    init_tracing(options.verbose);

    match app::run(options, &StdinSource).await {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            tracing::error!(error = %why, "exporter failed");
            std::process::exit(EXIT_ERROR);
        }
    }
}
