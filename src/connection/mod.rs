// src/connection/mod.rs

//! Manages the lifecycle of a single client connection: identity assignment,
//! HTTP serving, and teardown of the session bound to it.

mod guard;
mod handler;
mod identity;

pub use guard::ConnectionGuard;
pub use handler::ConnectionHandler;
pub use identity::ConnectionIdentity;
