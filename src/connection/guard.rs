// src/connection/guard.rs

//! Defines `ConnectionGuard`, an RAII guard for connection resource management.

use crate::core::GatewayError;
use crate::core::metrics;
use crate::core::session::{ConnectionId, SessionRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// An RAII guard ensuring a connection's session is released however the
/// connection handler's scope is exited.
pub struct ConnectionGuard {
    registry: Arc<SessionRegistry>,
    connection_id: ConnectionId,
    addr: SocketAddr,
}

impl ConnectionGuard {
    pub(crate) fn new(
        registry: Arc<SessionRegistry>,
        connection_id: ConnectionId,
        addr: SocketAddr,
    ) -> Self {
        metrics::CONNECTED_CLIENTS.inc();
        Self {
            registry,
            connection_id,
            addr,
        }
    }
}

impl Drop for ConnectionGuard {
    /// Releases the connection's identity and closes its session, if one was created.
    fn drop(&mut self) {
        metrics::CONNECTED_CLIENTS.dec();
        match self.registry.release_connection(self.connection_id) {
            Ok(session_id) => debug!(
                "Connection {} from {} closed, released connID={}",
                self.connection_id, self.addr, session_id
            ),
            Err(e @ GatewayError::ConnectionNotFound(_)) => {
                warn!("Cleanup for {} found nothing to release: {}", self.addr, e)
            }
            Err(e) => warn!("Failed to release connection {}: {}", self.addr, e),
        }
    }
}
