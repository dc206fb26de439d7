// src/core/handler/mod.rs

//! HTTP request handling: routing, the query endpoint and liveness.

mod query;
mod router;

pub use query::{QueryParams, read_query};
pub use router::build_router;
