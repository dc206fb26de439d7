// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;
use std::future::Future;

mod connection_loop;
mod context;
mod initialization;
mod metrics_server;
mod spawner;

pub use context::ServerContext;
pub use initialization::setup;

/// The main server startup function, orchestrating all setup phases.
pub async fn run(config: Config) -> Result<()> {
    // 1. Initialize gateway state, listener, TLS.
    let mut server_context = initialization::setup(config).await?;

    // 2. Spawn background tasks.
    spawner::spawn_all(&mut server_context);

    // 3. Accept connections until SIGINT or SIGTERM.
    connection_loop::run(server_context, connection_loop::termination_signal()?).await;

    Ok(())
}

/// Runs the accept loop on an already initialized context until `shutdown` resolves.
pub async fn serve(ctx: ServerContext, shutdown: impl Future<Output = ()> + Send) {
    connection_loop::run(ctx, shutdown).await;
}
