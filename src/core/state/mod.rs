// src/core/state/mod.rs

//! Defines the central `GatewayState` shared by the accept loop and every handler.

mod core;

pub use self::core::GatewayState;
