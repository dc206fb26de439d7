// src/core/metrics.rs

//! Defines and registers Prometheus metrics for gateway monitoring.
//!
//! This module uses `lazy_static` so that metrics are registered only once
//! globally for the entire process lifetime.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, Histogram, TextEncoder, register_counter, register_counter_vec,
    register_gauge, register_histogram,
};

lazy_static! {
    // --- Gauges ---
    /// The number of clients currently connected.
    pub static ref CONNECTED_CLIENTS: Gauge =
        register_gauge!("sqlgate_connected_clients", "Number of currently connected clients.").unwrap();
    /// The number of sessions holding an open engine instance.
    pub static ref ACTIVE_SESSIONS: Gauge =
        register_gauge!("sqlgate_active_sessions", "Number of sessions with an open engine instance.").unwrap();


    // --- Counters ---
    /// The total number of connections accepted since startup.
    pub static ref CONNECTIONS_RECEIVED_TOTAL: Counter =
        register_counter!("sqlgate_connections_received_total", "Total number of connections received.").unwrap();
    /// The total number of connections dropped because `max_clients` was reached.
    pub static ref CONNECTIONS_REJECTED_TOTAL: Counter =
        register_counter!("sqlgate_connections_rejected_total", "Total number of connections rejected at the client limit.").unwrap();
    /// The total number of engine instances opened for sessions.
    pub static ref SESSIONS_CREATED_TOTAL: Counter =
        register_counter!("sqlgate_sessions_created_total", "Total number of sessions created.").unwrap();
    /// The total number of queries received by the query endpoint.
    pub static ref QUERIES_TOTAL: Counter =
        register_counter!("sqlgate_queries_total", "Total number of queries received.").unwrap();
    /// Query failures, labeled by error kind.
    pub static ref QUERY_ERRORS_TOTAL: CounterVec =
        register_counter_vec!("sqlgate_query_errors_total", "Total number of failed queries, labeled by kind.", &["kind"]).unwrap();
    /// The total number of rows written to response streams.
    pub static ref ROWS_STREAMED_TOTAL: Counter =
        register_counter!("sqlgate_rows_streamed_total", "Total number of rows streamed to clients.").unwrap();


    // --- Histograms ---
    /// Wall time from query receipt until its stream ends.
    pub static ref QUERY_LATENCY_SECONDS: Histogram =
        register_histogram!("sqlgate_query_latency_seconds", "Latency of query execution and streaming in seconds.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
