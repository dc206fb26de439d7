// src/connection/handler.rs

//! Defines the `ConnectionHandler` which manages the full lifecycle of a client connection.

use super::guard::ConnectionGuard;
use super::identity::ConnectionIdentity;
use crate::core::GatewayError;
use crate::core::session::ConnectionId;
use crate::core::state::GatewayState;
use axum::{Extension, Router};
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Serves HTTP/1.1 on one accepted stream, plain or TLS.
///
/// The connection gets its session identity before the first request is read
/// and gives it back when the handler returns, whatever the reason.
pub struct ConnectionHandler<S> {
    stream: S,
    addr: SocketAddr,
    connection_id: ConnectionId,
    state: Arc<GatewayState>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        stream: S,
        addr: SocketAddr,
        connection_id: ConnectionId,
        state: Arc<GatewayState>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            stream,
            addr,
            connection_id,
            state,
            shutdown_rx,
        }
    }

    /// Runs until the client closes the connection or the server shuts down.
    ///
    /// Fails without serving anything if no session id can be reserved.
    pub async fn run(mut self, router: Router) -> Result<(), GatewayError> {
        let session_id = self.state.registry.assign_id(self.connection_id)?;
        let _guard = ConnectionGuard::new(
            self.state.registry.clone(),
            self.connection_id,
            self.addr,
        );
        debug!(
            "Connection {} from {} assigned connID={}",
            self.connection_id, self.addr, session_id
        );

        let identity = ConnectionIdentity {
            connection_id: self.connection_id,
            session_id,
            addr: self.addr,
        };
        let service = TowerToHyperService::new(router.layer(Extension(identity)));
        let conn = http1::Builder::new().serve_connection(TokioIo::new(self.stream), service);
        tokio::pin!(conn);

        let result = tokio::select! {
            result = conn.as_mut() => result,
            _ = self.shutdown_rx.recv() => {
                info!("Connection handler for {} received shutdown signal.", self.addr);
                conn.as_mut().graceful_shutdown();
                conn.await
            }
        };

        result.map_err(|e| GatewayError::Internal(format!("http connection error: {e}")))
    }
}
