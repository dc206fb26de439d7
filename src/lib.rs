// src/lib.rs

pub mod config;
pub mod connection;
pub mod core;
pub mod server;

pub use crate::core::GatewayError;
