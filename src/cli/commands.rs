//! Command execution.

use anyhow::{anyhow, Context, Result};
use std::path::Path;

use crate::adapters::http::RelayHttpServer;
use crate::domain::models::RelayConfig;
use crate::infrastructure::config::{ConfigLoader, DEFAULT_CONFIG_FILE};
use crate::infrastructure::logging::LoggerImpl;
use crate::infrastructure::setup;

use super::types::{Cli, Commands, ConfigCommands};

/// Execute a parsed command line.
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve { host, port } => {
            let mut config = ConfigLoader::load_with(cli.config.as_deref())?;
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            serve(config).await
        }
        Commands::Init { force } => {
            let path = cli.config.as_deref().unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
            init(path, force, cli.json)
        }
        Commands::Config(ConfigCommands::Show) => {
            let config = ConfigLoader::load_with(cli.config.as_deref())?;
            show(&config, cli.json)
        }
        Commands::Config(ConfigCommands::Validate) => {
            ConfigLoader::load_with(cli.config.as_deref())?;
            if cli.json {
                println!("{}", serde_json::json!({ "valid": true }));
            } else {
                println!("Configuration is valid");
            }
            Ok(())
        }
    }
}

async fn serve(config: RelayConfig) -> Result<()> {
    // Held until the server stops so file logs are flushed.
    let _logger = LoggerImpl::init(&config.logging).context("Failed to initialize logging")?;

    let dispatcher = setup::build_dispatcher(&config)?;
    let server = RelayHttpServer::new(dispatcher, config.server.clone());

    server
        .serve_with_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow!(e))
        .context("HTTP server failed")?;

    tracing::info!("Relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

fn init(path: &Path, force: bool, json: bool) -> Result<()> {
    let written = setup::create_config_file(path, force)?;
    if json {
        println!(
            "{}",
            serde_json::json!({ "path": path.display().to_string(), "written": written })
        );
    } else if written {
        println!("Wrote {}", path.display());
    } else {
        println!("{} already exists (use --force to overwrite)", path.display());
    }
    Ok(())
}

fn show(config: &RelayConfig, json: bool) -> Result<()> {
    let mut redacted = config.clone();
    if redacted.api_key.is_some() {
        redacted.api_key = Some("***".to_string());
    }
    if redacted.agent.api_key.is_some() {
        redacted.agent.api_key = Some("***".to_string());
    }

    let rendered = if json {
        serde_json::to_string_pretty(&redacted)?
    } else {
        serde_yaml::to_string(&redacted)?
    };
    println!("{rendered}");
    Ok(())
}
