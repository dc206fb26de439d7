// src/core/state/core.rs

//! Defines the central `GatewayState` struct, holding all shared gateway-wide state.

use crate::config::Config;
use crate::core::engine::{Engine, SqliteEngine};
use crate::core::session::SessionRegistry;
use std::sync::Arc;
use tracing::info;

/// The state shared by the accept loop, the connection handlers and the
/// request handlers. It is constructed once at startup and passed explicitly;
/// nothing here is reachable through a global.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub registry: Arc<SessionRegistry>,
}

impl GatewayState {
    /// Builds the state with the default SQLite engine.
    pub fn initialize(config: Config) -> Arc<Self> {
        let engine = Arc::new(SqliteEngine::new(config.engine.clone()));
        Self::with_engine(config, engine)
    }

    /// Builds the state around a caller-provided engine.
    pub fn with_engine(config: Config, engine: Arc<dyn Engine>) -> Arc<Self> {
        info!(
            "Using the {} engine with database '{}'.",
            engine.name(),
            config.engine.path
        );
        let registry = Arc::new(SessionRegistry::new(engine, &config.session));
        Arc::new(Self {
            config: Arc::new(config),
            registry,
        })
    }
}
