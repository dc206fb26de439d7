// src/core/session/registry.rs

//! The concurrency-safe registry binding live connections to session
//! identities and identities to sessions.
//!
//! Three maps are kept in sync:
//! - `connections`: connection -> session id
//! - `reserved`: session id -> owning connection (the active-id set)
//! - `sessions`: session id -> session, populated lazily on first query
//!
//! Lock order is `reserved` before `connections`/`sessions`. No code path holds a
//! guard on `connections` or `sessions` while acquiring `reserved`.

use super::{ConnectionId, Session, SessionId};
use crate::config::SessionConfig;
use crate::core::GatewayError;
use crate::core::engine::Engine;
use crate::core::metrics;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Produces candidate session ids.
pub trait IdSource: Send + Sync {
    fn next_id(&self) -> u64;
}

/// Draws ids from the thread-local CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdSource;

impl IdSource for RandomIdSource {
    fn next_id(&self) -> u64 {
        rand::random()
    }
}

pub struct SessionRegistry {
    engine: Arc<dyn Engine>,
    id_source: Box<dyn IdSource>,
    id_retry_limit: usize,
    connections: DashMap<ConnectionId, SessionId>,
    reserved: DashMap<SessionId, ConnectionId>,
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new(engine: Arc<dyn Engine>, config: &SessionConfig) -> Self {
        Self {
            engine,
            id_source: Box::new(RandomIdSource),
            id_retry_limit: config.id_retry_limit,
            connections: DashMap::new(),
            reserved: DashMap::new(),
            sessions: DashMap::new(),
        }
    }

    /// Replaces the id source. Used to make collisions reproducible.
    pub fn with_id_source(mut self, source: impl IdSource + 'static) -> Self {
        self.id_source = Box::new(source);
        self
    }

    /// Reserves a fresh session id for `conn`.
    ///
    /// Each candidate is claimed with a vacant-entry insert, so two callers can
    /// never reserve the same value. Calling this again for a connection that
    /// already holds an id returns that id.
    pub fn assign_id(&self, conn: ConnectionId) -> Result<SessionId, GatewayError> {
        if let Some(existing) = self.connections.get(&conn) {
            return Ok(*existing);
        }

        for attempt in 1..=self.id_retry_limit {
            let candidate = SessionId(self.id_source.next_id());
            match self.reserved.entry(candidate) {
                Entry::Vacant(slot) => {
                    slot.insert(conn);
                    self.connections.insert(conn, candidate);
                    debug!("assigned connID={} to connection {}", candidate, conn);
                    return Ok(candidate);
                }
                Entry::Occupied(_) => {
                    warn!(
                        "session id collision on {} (attempt {}/{})",
                        candidate, attempt, self.id_retry_limit
                    );
                }
            }
        }

        Err(GatewayError::Configuration(format!(
            "could not reserve a unique session id for connection {} after {} attempts",
            conn, self.id_retry_limit
        )))
    }

    /// Returns the session for `id`, opening a new engine instance on first use.
    ///
    /// Fails with `SessionAcquisition` if `id` is no longer reserved, or if the
    /// engine cannot be opened. A failed creation leaves nothing behind, so a
    /// later call may try again.
    pub async fn get_or_create_session(&self, id: SessionId) -> Result<Arc<Session>, GatewayError> {
        if let Some(session) = self.sessions.get(&id) {
            return Ok(session.value().clone());
        }
        if !self.reserved.contains_key(&id) {
            return Err(stale_identity(id));
        }

        let engine = self.engine.clone();
        let connection = tokio::task::spawn_blocking(move || engine.connect())
            .await
            .map_err(|e| GatewayError::SessionAcquisition(format!("engine open panicked: {e}")))??;
        let candidate = Arc::new(Session::new(id, connection));

        // The reservation guard is held while publishing so that a concurrent
        // release either runs entirely before (and we see no reservation) or
        // entirely after (and finds the session to close).
        let outcome = match self.reserved.get(&id) {
            None => Err(stale_identity(id)),
            Some(_reservation) => match self.sessions.entry(id) {
                Entry::Occupied(existing) => Ok(Some(existing.get().clone())),
                Entry::Vacant(slot) => {
                    slot.insert(candidate.clone());
                    Ok(None)
                }
            },
        };

        match outcome {
            Ok(None) => {
                metrics::SESSIONS_CREATED_TOTAL.inc();
                info!(
                    "created {} session for connID={}",
                    self.engine.name(),
                    id
                );
                Ok(candidate)
            }
            Ok(Some(winner)) => {
                debug!("concurrent session creation for connID={}, discarding ours", id);
                candidate.close();
                Ok(winner)
            }
            Err(e) => {
                candidate.close();
                Err(e)
            }
        }
    }

    /// Tears down everything owned by `conn`.
    ///
    /// Returns `ConnectionNotFound` if the connection was already released.
    /// The session, if any, is closed exactly once.
    pub fn release_connection(&self, conn: ConnectionId) -> Result<SessionId, GatewayError> {
        let (_, id) = self
            .connections
            .remove(&conn)
            .ok_or(GatewayError::ConnectionNotFound(conn))?;

        let session = match self.reserved.entry(id) {
            Entry::Occupied(reservation) if *reservation.get() == conn => {
                let session = self.sessions.remove(&id).map(|(_, session)| session);
                reservation.remove();
                session
            }
            _ => {
                warn!(
                    "connID={} was not reserved by connection {} at release",
                    id, conn
                );
                None
            }
        };

        if let Some(session) = session {
            session.close();
        }
        debug!("released connID={} for connection {}", id, conn);
        Ok(id)
    }

    pub fn session_id_of(&self, conn: ConnectionId) -> Option<SessionId> {
        self.connections.get(&conn).map(|id| *id)
    }

    pub fn is_reserved(&self, id: SessionId) -> bool {
        self.reserved.contains_key(&id)
    }

    pub fn has_session(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Number of reserved session ids, equal to the number of open connections.
    pub fn active_ids(&self) -> usize {
        self.reserved.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

fn stale_identity(id: SessionId) -> GatewayError {
    GatewayError::SessionAcquisition(format!("connID={id} is not active"))
}
