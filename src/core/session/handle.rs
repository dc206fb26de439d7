// src/core/session/handle.rs

//! Defines `Session`, the exclusive handle to one engine instance, and
//! `SessionLease`, the RAII guard that grants a single caller the right to use it.

use super::SessionId;
use crate::core::GatewayError;
use crate::core::engine::{EngineConnection, Interrupt, ResultSink};
use crate::core::metrics;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, warn};

/// The engine instance and its closed flag. Both transitions happen under one lock,
/// so whoever takes the engine out while `closed` is set is the one that closes it.
struct Slot {
    closed: bool,
    engine: Option<Box<dyn EngineConnection>>,
}

/// An exclusive handle to one engine instance.
///
/// Execution is serialized by an async lock held for the whole query, so two
/// requests never reach the engine at the same time regardless of how the
/// transport schedules them.
pub struct Session {
    id: SessionId,
    exclusive: Arc<AsyncMutex<()>>,
    slot: Mutex<Slot>,
    interrupter: Arc<dyn Interrupt>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(id: SessionId, engine: Box<dyn EngineConnection>) -> Self {
        metrics::ACTIVE_SESSIONS.inc();
        let interrupter = engine.interrupter();
        Self {
            id,
            exclusive: Arc::new(AsyncMutex::new(())),
            slot: Mutex::new(Slot {
                closed: false,
                engine: Some(engine),
            }),
            interrupter,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.slot.lock().closed
    }

    pub fn interrupter(&self) -> Arc<dyn Interrupt> {
        self.interrupter.clone()
    }

    /// Waits until no other caller is using the engine and takes it.
    ///
    /// Fails with `SessionAcquisition` once the session has been closed.
    pub async fn acquire(self: &Arc<Self>) -> Result<SessionLease, GatewayError> {
        let exclusive = self.exclusive.clone().lock_owned().await;
        let engine = {
            let mut slot = self.slot.lock();
            if slot.closed {
                None
            } else {
                slot.engine.take()
            }
        };
        match engine {
            Some(engine) => Ok(SessionLease {
                session: self.clone(),
                engine: Some(engine),
                _exclusive: exclusive,
            }),
            None => Err(GatewayError::SessionAcquisition(format!(
                "session {} has been closed",
                self.id
            ))),
        }
    }

    /// Closes the session. Returns `false` if it was already closed.
    ///
    /// An idle engine is closed straight away, on the blocking pool when a
    /// runtime is available. If a lease is outstanding the running query is
    /// interrupted and the lease closes the engine when it is dropped.
    pub fn close(&self) -> bool {
        let idle_engine = {
            let mut slot = self.slot.lock();
            if slot.closed {
                return false;
            }
            slot.closed = true;
            slot.engine.take()
        };
        match idle_engine {
            Some(engine) => self.close_engine(engine),
            None => self.interrupter.interrupt(),
        }
        true
    }

    fn close_engine(&self, engine: Box<dyn EngineConnection>) {
        metrics::ACTIVE_SESSIONS.dec();
        let id = self.id;
        let close = move || match engine.close() {
            Ok(()) => info!("closed session for connID={}", id),
            Err(e) => warn!("failed to close session connID={}: {}", id, e),
        };
        // Closing may block on the engine, so it stays off the async workers.
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(close);
            }
            Err(_) => close(),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(engine) = self.slot.get_mut().engine.take() {
            self.close_engine(engine);
        }
    }
}

/// Exclusive use of a session's engine. Dropping the lease hands the engine
/// back, or closes it if the session was closed in the meantime.
pub struct SessionLease {
    session: Arc<Session>,
    engine: Option<Box<dyn EngineConnection>>,
    _exclusive: OwnedMutexGuard<()>,
}

impl SessionLease {
    pub fn session_id(&self) -> SessionId {
        self.session.id
    }

    /// A handle that aborts the query this lease is running.
    pub fn interrupter(&self) -> Arc<dyn Interrupt> {
        self.session.interrupter()
    }

    pub fn execute(&mut self, query: &str, sink: &mut dyn ResultSink) -> Result<(), GatewayError> {
        match self.engine.as_mut() {
            Some(engine) => engine.execute(query, sink),
            None => Err(GatewayError::SessionAcquisition(format!(
                "session {} has no engine",
                self.session.id
            ))),
        }
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        let Some(engine) = self.engine.take() else {
            return;
        };
        let to_close = {
            let mut slot = self.session.slot.lock();
            if slot.closed {
                Some(engine)
            } else {
                slot.engine = Some(engine);
                None
            }
        };
        if let Some(engine) = to_close {
            self.session.close_engine(engine);
        }
    }
}
