// src/server/connection_loop.rs

//! Contains the main server loop for accepting connections and handling graceful shutdown.

use super::context::ServerContext;
use crate::connection::ConnectionHandler;
use crate::core::handler::build_router;
use crate::core::metrics;
use crate::core::session::ConnectionId;
use anyhow::{Result, anyhow};
use std::future::Future;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

const CLIENT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
const BACKGROUND_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolves on the first SIGINT or SIGTERM.
pub(super) fn termination_signal() -> Result<impl Future<Output = ()> + Send> {
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow!("Failed to register SIGINT handler: {}", e))?;
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow!("Failed to register SIGTERM handler: {}", e))?;
    Ok(async move {
        tokio::select! {
            _ = sigint.recv() => info!("SIGINT received, initiating graceful shutdown."),
            _ = sigterm.recv() => info!("SIGTERM received, initiating graceful shutdown."),
        }
    })
}

/// The main server loop that accepts connections until `shutdown` resolves.
pub async fn run(mut ctx: ServerContext, shutdown: impl Future<Output = ()> + Send) {
    let mut connection_counter: u64 = 0;
    let mut client_tasks = JoinSet::new();
    let router = build_router(ctx.state.clone());
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => break,

            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => warn!("A background task finished unexpectedly without an error."),
                    Ok(Err(e)) => { error!("CRITICAL: Background task failed: {}. Shutting down.", e); break; }
                    Err(e) => { error!("CRITICAL: Background task panicked: {e:?}. Shutting down."); break; }
                }
            },

            res = ctx.listener.accept() => {
                let (socket, addr) = match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                };
                metrics::CONNECTIONS_RECEIVED_TOTAL.inc();

                let Ok(permit) = ctx.connection_permits.clone().try_acquire_owned() else {
                    warn!("Client limit reached, rejecting connection from {}", addr);
                    metrics::CONNECTIONS_REJECTED_TOTAL.inc();
                    continue;
                };
                info!("Accepted new connection from: {}", addr);

                connection_counter = connection_counter.wrapping_add(1);
                let connection_id = ConnectionId(connection_counter);
                let state = ctx.state.clone();
                let router = router.clone();
                let shutdown_rx = ctx.shutdown_tx.subscribe();
                let acceptor = ctx.acceptor.clone();

                client_tasks.spawn(async move {
                    let _permit = permit;
                    let result = match acceptor {
                        Some(acceptor) => match acceptor.accept(socket).await {
                            Ok(tls_stream) => {
                                debug!("TLS handshake successful for {addr}");
                                ConnectionHandler::new(tls_stream, addr, connection_id, state, shutdown_rx)
                                    .run(router)
                                    .await
                            }
                            Err(e) => {
                                warn!("TLS handshake error for {addr}: {e}");
                                return;
                            }
                        },
                        None => {
                            ConnectionHandler::new(socket, addr, connection_id, state, shutdown_rx)
                                .run(router)
                                .await
                        }
                    };
                    if let Err(e) = result {
                        warn!("Connection from {} terminated unexpectedly: {}", addr, e);
                    }
                });
            },

            Some(res) = client_tasks.join_next() => {
                if let Err(e) = res
                    && e.is_panic()
                {
                    error!("A client handler panicked: {e:?}");
                }
            },
        }
    }

    info!("Shutting down. Sending signal to all tasks.");
    if ctx.shutdown_tx.send(()).is_err() {
        debug!("No task was listening for the shutdown signal.");
    }

    if tokio::time::timeout(CLIENT_DRAIN_TIMEOUT, async {
        while client_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for client connections to drain, aborting them.");
        client_tasks.shutdown().await;
    }
    info!(
        "All client connections closed. {} sessions remain registered.",
        ctx.state.registry.session_count()
    );

    info!("Waiting for background tasks to finish...");
    if tokio::time::timeout(BACKGROUND_DRAIN_TIMEOUT, async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    };
    info!("Server shutdown complete.");
}
