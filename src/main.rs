// src/main.rs

//! The entry point for the sqlgate server.

use anyhow::Result;
use sqlgate::config::Config;
use sqlgate::server;
use std::env;
use std::path::Path;
use tracing::error;
use tracing_subscriber::{filter::EnvFilter, prelude::*};

const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("sqlgate version {VERSION}");
        return Ok(());
    }

    // An explicit --config must exist; the default path is optional.
    let explicit_config = args
        .iter()
        .position(|arg| arg == "--config")
        .map(|i| args.get(i + 1).map(|s| s.as_str()));
    let loaded = match explicit_config {
        Some(Some(path)) => Config::from_file(path).map_err(|e| (path, e)),
        Some(None) => {
            eprintln!("--config flag requires a value");
            std::process::exit(1);
        }
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            Config::from_file(DEFAULT_CONFIG_PATH).map_err(|e| (DEFAULT_CONFIG_PATH, e))
        }
        None => Ok(Config::default()),
    };
    let mut config = match loaded {
        Ok(cfg) => cfg,
        Err((path, e)) => {
            eprintln!("Failed to load configuration from \"{path}\": {e:#}");
            std::process::exit(1);
        }
    };

    if let Some(port_index) = args.iter().position(|arg| arg == "--port") {
        if let Some(port_str) = args.get(port_index + 1) {
            match port_str.parse::<u16>() {
                Ok(port) => config.port = port,
                Err(_) => {
                    eprintln!("Invalid port number: {port_str}");
                    std::process::exit(1);
                }
            }
        } else {
            eprintln!("--port flag requires a value");
            std::process::exit(1);
        }
        if let Err(e) = config.validate() {
            eprintln!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    }

    // RUST_LOG takes precedence over the configured level.
    let log_level = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::registry()
        .with(EnvFilter::new(log_level))
        .with(tracing_subscriber::fmt::layer().compact().with_ansi(true))
        .init();

    if let Err(e) = server::run(config).await {
        error!("Server runtime error: {}", e);
        return Err(e);
    }

    Ok(())
}
