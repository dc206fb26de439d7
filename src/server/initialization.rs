// src/server/initialization.rs

//! Handles the server initialization process: TLS, gateway state and the listener.

use super::context::ServerContext;
use crate::config::Config;
use crate::core::state::GatewayState;
use anyhow::{Result, anyhow};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tokio_rustls::{TlsAcceptor, rustls};
use tracing::{info, warn};

/// Initializes all server components before starting the main loop.
pub async fn setup(config: Config) -> Result<ServerContext> {
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(1);

    let acceptor = setup_tls(&config)?;

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    let connection_permits = Arc::new(Semaphore::new(config.max_clients));

    let state = GatewayState::initialize(config);
    info!("Gateway state initialized.");
    info!(
        "sqlgate listening on {}",
        listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| format!("{}:{}", state.config.host, state.config.port))
    );

    Ok(ServerContext {
        state,
        listener,
        shutdown_tx,
        background_tasks: JoinSet::new(),
        acceptor,
        connection_permits,
    })
}

/// Sets up the TLS acceptor if TLS is enabled in the configuration.
fn setup_tls(config: &Config) -> Result<Option<TlsAcceptor>> {
    if !config.tls.enabled {
        return Ok(None);
    }
    info!("TLS is enabled. Loading certificate and key.");
    let certs = load_certs(&config.tls.cert_path)?;
    let key = load_key(&config.tls.key_path)?;
    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(Some(TlsAcceptor::from(Arc::new(server_config))))
}

fn load_certs(path: &str) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let cert_file = File::open(path)
        .map_err(|e| anyhow!("Failed to open certificate file '{}': {}", path, e))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(anyhow!("No certificates found in '{}'", path));
    }
    Ok(certs)
}

fn load_key(path: &str) -> Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let key_file = File::open(path)
        .map_err(|e| anyhow!("Failed to open private key file '{}': {}", path, e))?;
    rustls_pemfile::private_key(&mut BufReader::new(key_file))?
        .ok_or_else(|| anyhow!("No private key found in key file '{}'", path))
}

fn log_startup_info(config: &Config) {
    info!(
        "Engine database '{}'{}.",
        config.engine.path,
        if config.engine.read_only { " (read-only)" } else { "" }
    );
    info!(
        "Accepting up to {} concurrent clients, {} byte output chunks.",
        config.max_clients, config.output.chunk_size
    );
    match config.session.query_timeout {
        Some(limit) => info!("Queries are interrupted after {:?}.", limit),
        None => warn!("No session.query_timeout set. Queries may run indefinitely."),
    }
}
