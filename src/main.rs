//! Constellation CLI entry point.

use anyhow::{Context, Result};
use clap::Parser;

use constellation::cli::{commands, Cli};
use constellation::infrastructure::{init_logging, ConfigLoader};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path).context("failed to load configuration")?,
        None => ConfigLoader::load().context("failed to load configuration")?,
    };
    if let Some(path) = &cli.planner_script {
        config.process.planner_script_path = Some(path.display().to_string());
    }

    init_logging(&config.process).context("failed to initialize logging")?;

    let exit_code = if cli.interactive {
        commands::handle_interactive(&config, cli.json).await?
    } else if let Some(request) = &cli.request {
        commands::handle_request(&config, request, cli.json).await?
    } else {
        unreachable!("clap enforces exactly one of --interactive/--request")
    };

    std::process::exit(exit_code);
}
