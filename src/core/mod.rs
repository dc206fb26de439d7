// src/core/mod.rs

//! The central module containing the core logic and data structures of the gateway.

pub mod engine;
pub mod errors;
pub mod handler;
pub mod metrics;
pub mod protocol;
pub mod session;
pub mod state;

pub use errors::GatewayError;
