// src/core/session/mod.rs

//! Connection-scoped session lifecycle: identities, sessions, and the
//! registry that binds them to live connections.

mod handle;
mod registry;

pub use handle::{Session, SessionLease};
pub use registry::{IdSource, RandomIdSource, SessionRegistry};

use std::fmt;

/// Identifies one accepted network connection for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A randomly drawn token naming a reserved session slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
