// src/core/engine/sqlite.rs

//! SQLite backend built on `rusqlite`.

use super::{Engine, EngineConnection, Interrupt, ResultSink, Value};
use crate::config::EngineConfig;
use crate::core::GatewayError;
use rusqlite::types::ValueRef;
use rusqlite::{Batch, Connection, InterruptHandle, OpenFlags};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::debug;

/// Opens one SQLite connection per session.
///
/// With the default `:memory:` path every session gets a private database.
pub struct SqliteEngine {
    config: EngineConfig,
}

impl SqliteEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    fn open_flags(&self) -> OpenFlags {
        let base = OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if self.config.read_only {
            base | OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            base | OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
        }
    }
}

impl Engine for SqliteEngine {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn connect(&self) -> Result<Box<dyn EngineConnection>, GatewayError> {
        let conn = Connection::open_with_flags(&self.config.path, self.open_flags()).map_err(
            |e| {
                GatewayError::SessionAcquisition(format!(
                    "failed to open '{}': {e}",
                    self.config.path
                ))
            },
        )?;

        if let Some(timeout) = self.config.busy_timeout {
            conn.busy_timeout(timeout)
                .map_err(|e| GatewayError::Configuration(format!("busy_timeout: {e}")))?;
        }

        for sql in &self.config.init_sql {
            conn.execute_batch(sql).map_err(|e| {
                GatewayError::Configuration(format!("init_sql '{sql}' failed: {e}"))
            })?;
        }

        let interrupter = Arc::new(SqliteInterrupt(conn.get_interrupt_handle()));
        Ok(Box::new(SqliteConnection { conn, interrupter }))
    }
}

struct SqliteInterrupt(InterruptHandle);

impl Interrupt for SqliteInterrupt {
    fn interrupt(&self) {
        self.0.interrupt();
    }
}

struct SqliteConnection {
    conn: Connection,
    interrupter: Arc<SqliteInterrupt>,
}

impl EngineConnection for SqliteConnection {
    fn execute(&mut self, query: &str, sink: &mut dyn ResultSink) -> Result<(), GatewayError> {
        let mut batch = Batch::new(&self.conn, query);
        while let Some(mut stmt) = batch.next().map_err(execution_error)? {
            let columns: Vec<String> = stmt
                .column_names()
                .iter()
                .map(|name| name.to_string())
                .collect();
            sink.begin_result_set(&columns)?;

            let mut rows = stmt.query([]).map_err(execution_error)?;
            while let Some(row) = rows.next().map_err(execution_error)? {
                let mut values = Vec::with_capacity(columns.len());
                for idx in 0..columns.len() {
                    let value = row
                        .get_ref(idx)
                        .map_err(|e| GatewayError::Encoding(format!("column {idx}: {e}")))?;
                    values.push(Value::from(value));
                }
                sink.write_row(&values)?;
            }
        }
        Ok(())
    }

    fn interrupter(&self) -> Arc<dyn Interrupt> {
        self.interrupter.clone()
    }

    fn close(self: Box<Self>) -> Result<(), GatewayError> {
        debug!("closing sqlite connection");
        self.conn
            .close()
            .map_err(|(_, e)| GatewayError::Internal(format!("sqlite close failed: {e}")))
    }
}

fn execution_error(e: rusqlite::Error) -> GatewayError {
    GatewayError::QueryExecution(e.to_string())
}

impl<'a> From<ValueRef<'a>> for Value<'a> {
    fn from(value: ValueRef<'a>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(bytes) => Value::Text(match std::str::from_utf8(bytes) {
                Ok(s) => Cow::Borrowed(s),
                Err(_) => String::from_utf8_lossy(bytes),
            }),
            ValueRef::Blob(bytes) => Value::Blob(bytes),
        }
    }
}
