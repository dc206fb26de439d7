// src/core/engine/mod.rs

//! The seam between the gateway and the embedded query engine.
//!
//! An `Engine` opens exclusive `EngineConnection`s. A connection executes a
//! query string and pushes its output, result set by result set and row by
//! row, into a `ResultSink`. All methods here block and are expected to run on
//! the blocking thread pool.

pub mod sqlite;

pub use sqlite::SqliteEngine;

use crate::core::GatewayError;
use std::borrow::Cow;
use std::sync::Arc;

/// A single scalar produced by the engine, borrowed from the current row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<'a> {
    Null,
    Integer(i64),
    Real(f64),
    Text(Cow<'a, str>),
    Blob(&'a [u8]),
}

/// Receives the output of a query as it is produced.
///
/// The engine calls `begin_result_set` once per statement, followed by one
/// `write_row` per row of that statement. A returned error aborts execution.
pub trait ResultSink {
    fn begin_result_set(&mut self, columns: &[String]) -> Result<(), GatewayError>;
    fn write_row(&mut self, row: &[Value<'_>]) -> Result<(), GatewayError>;
}

/// A thread-safe handle that aborts whatever query its connection is running.
pub trait Interrupt: Send + Sync {
    fn interrupt(&self);
}

/// One exclusively owned engine instance.
pub trait EngineConnection: Send {
    /// Runs every statement in `query`, forwarding all output to `sink`.
    fn execute(&mut self, query: &str, sink: &mut dyn ResultSink) -> Result<(), GatewayError>;

    fn interrupter(&self) -> Arc<dyn Interrupt>;

    /// Releases the engine instance.
    fn close(self: Box<Self>) -> Result<(), GatewayError>;
}

/// A factory of engine instances. One is shared by the whole server.
pub trait Engine: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn connect(&self) -> Result<Box<dyn EngineConnection>, GatewayError>;
}
