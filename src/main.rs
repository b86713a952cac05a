//! CLI for mqttagent
//!
//! Loads the env file and configuration, starts every broker session and the
//! worker pool, and runs until SIGINT, SIGTERM or SIGQUIT.

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info, warn};

use mqttagent::agent::Agent;
use mqttagent::config::load_config;
use mqttagent::utils::{logging, signals};

#[derive(Parser)]
#[command(name = "mqttagent", version, about = "Device-side MQTT messaging agent")]
struct Cli {
    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Environment file loaded before the configuration
    #[arg(long, default_value = "./conf.d/default.conf")]
    env: PathBuf,

    /// Configuration file (JSON, TOML or YAML); defaults to `$CONFIG_FILE`
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let env_loaded = dotenvy::from_path(&cli.env);
    logging::init(if cli.debug { "debug" } else { "info" });
    if let Err(e) = env_loaded {
        warn!(path = %cli.env.display(), "env file not loaded: {}", e);
    }

    if let Err(e) = run(cli).await {
        error!("Agent failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    // CONFIG_FILE may come from the env file, so read it after dotenvy
    let config_file = cli
        .config
        .or_else(|| std::env::var_os("CONFIG_FILE").map(PathBuf::from));
    let settings = load_config(config_file.as_deref())?;
    let mut agent = Agent::from_settings(&settings);
    agent.start()?;

    match signals::wait_for_shutdown_signal().await {
        Ok(signal) => info!(signal, "Shutdown signal received. Stopping."),
        Err(e) => error!("Failed to listen for shutdown signals: {}", e),
    }

    agent.stop().await;
    Ok(())
}
