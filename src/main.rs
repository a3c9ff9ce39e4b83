//! zm-device - Main Entry Point
//!
//! Process bootstrap for the device agent: loads the configuration tree
//! from disk, spawns the agent loop, replays the tree through the control
//! channel, and translates process signals into control commands. Exit
//! codes are owned here; the agent core defines none.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tracing::{error, info};
use zm_device::agent::DeviceAgent;
use zm_device::config::ConfigTree;
use zm_device::error::{AgentError, AgentResult};
use zm_device::observability::init_default_logging;
use zm_device::transport::mqtt::MqttBrokerClient;

/// Device agent bridging a local control channel to a pub/sub broker
#[derive(Parser)]
#[command(name = "zm-device")]
#[command(about = "Device agent bridging a control channel to a pub/sub broker")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose dispatch logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent until interrupted
    Run,
    /// Validate the configuration tree
    Config {
        /// Show the resolved session settings
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting zm-device v{}", env!("CARGO_PKG_VERSION"));

    let config_text = match load_configuration_text(&cli.config) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_agent(&config_text, cli.verbose).await,
        Commands::Config { show } => handle_config_command(&config_text, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration_text(config_path: &Option<PathBuf>) -> AgentResult<String> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(std::fs::read_to_string(path)?)
        }
        None => {
            // Try default locations
            let default_paths = ["zm-device.toml", "config/zm-device.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(std::fs::read_to_string(&path)?);
                }
            }

            Err(AgentError::Bootstrap {
                message: "No configuration file found. Provide one with -c/--config or create zm-device.toml".to_string(),
            })
        }
    }
}

async fn run_agent(config_text: &str, verbose: bool) -> AgentResult<()> {
    // Fail fast on an unparseable file before spawning anything
    ConfigTree::parse(config_text)?;

    let (agent, mut handle) = DeviceAgent::new(MqttBrokerClient::new());
    let runner = tokio::spawn(agent.run());

    handle.ready().await;
    if verbose {
        handle.verbose().await;
    }
    handle.configure(config_text).await;
    handle.start().await;

    info!("Agent is running; waiting for broker traffic...");

    // Graceful shutdown on SIGINT/SIGTERM
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }

    handle.terminate().await;
    runner.await?;
    Ok(())
}

fn handle_config_command(config_text: &str, show: bool) -> AgentResult<()> {
    let tree = ConfigTree::parse(config_text)?;

    if show {
        let resolved = zm_device::session::SessionConfig::resolve(&tree);
        println!("endpoint  = {}", resolved.endpoint.as_deref().unwrap_or("(unset)"));
        println!("identity  = {}", resolved.identity.as_deref().unwrap_or("(unset)"));
        println!("producer  = {}", resolved.producer.as_deref().unwrap_or("(none)"));
        for consumer in &resolved.consumers {
            println!("consumer  = {}/{}", consumer.stream, consumer.pattern);
        }
    }

    info!("Configuration validation complete");
    Ok(())
}
