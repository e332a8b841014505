//! Prism CLI entry point.

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use prism_cli::cli::Cli;
use prism_cli::commands;
use prism_cli::config::Settings;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level().to_string()));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match Settings::from_env(cli.state_dir()) {
        Ok(settings) => commands::execute(cli.command, &settings, cli.json).await,
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
