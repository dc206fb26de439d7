// src/connection/identity.rs

use crate::core::session::{ConnectionId, SessionId};
use std::net::SocketAddr;

/// The identity of the connection a request arrived on.
///
/// Attached to every request as an extension, so handlers can reach the
/// session owned by their connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionIdentity {
    pub connection_id: ConnectionId,
    pub session_id: SessionId,
    pub addr: SocketAddr,
}
