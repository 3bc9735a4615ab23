use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use shannon_gateway::cli::{Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serving the gateway when no subcommand is given.
        None | Some(Command::Run) => {
            init_tracing();
            let (config, _config_path) = shannon_gateway::cli::load_config()?;
            shannon_gateway::cli::run::run(Arc::new(config)).await
        }
        Some(Command::Doctor) => {
            let (config, config_path) = shannon_gateway::cli::load_config()?;
            let passed = shannon_gateway::cli::doctor::run(&config, &config_path).await?;
            if !passed {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = shannon_gateway::cli::load_config()?;
            let valid = shannon_gateway::cli::config::validate(&config, &config_path);
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = shannon_gateway::cli::load_config()?;
            shannon_gateway::cli::config::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("shannon {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing (only for the `run` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,shannon_gateway=debug")))
        .json()
        .init();
}
