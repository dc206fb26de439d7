// src/core/protocol/csv_codec.rs

//! Implements the tabular record format and its `tokio_util` `Encoder`.
//!
//! Records are comma-separated and terminated by `\n`. Fields are quoted with
//! `"` when they contain a delimiter, a quote, a line break, leading or
//! trailing whitespace, when they are empty, or when they equal the null
//! marker. Embedded quotes are doubled. NULL is written as the bare null
//! marker, so it can never be confused with an empty string (which is `""`).

use crate::core::GatewayError;
use crate::core::engine::Value;
use bytes::BytesMut;
use tokio_util::codec::Encoder;

const DELIMITER: u8 = b',';
const QUOTE: u8 = b'"';
const TERMINATOR: &[u8] = b"\n";
const BLOB_PREFIX: &[u8] = b"\\x";

/// One unit of output.
#[derive(Debug, Clone, Copy)]
pub enum CsvRecord<'a> {
    /// The column names of a result set.
    Header(&'a [String]),
    /// One row, positionally aligned with the preceding header.
    Row(&'a [Value<'a>]),
    /// The empty line separating two result sets.
    Boundary,
}

/// Encodes `CsvRecord`s into a byte buffer.
#[derive(Debug, Clone)]
pub struct CsvCodec {
    null_marker: String,
}

impl CsvCodec {
    pub fn new(null_marker: impl Into<String>) -> Self {
        Self {
            null_marker: null_marker.into(),
        }
    }

    pub fn null_marker(&self) -> &str {
        &self.null_marker
    }

    fn needs_quotes(&self, field: &str) -> bool {
        field.is_empty()
            || field == self.null_marker
            || field.starts_with(char::is_whitespace)
            || field.ends_with(char::is_whitespace)
            || field
                .bytes()
                .any(|b| matches!(b, DELIMITER | QUOTE | b'\r' | b'\n'))
    }

    fn write_text(&self, field: &str, dst: &mut BytesMut) {
        if !self.needs_quotes(field) {
            dst.extend_from_slice(field.as_bytes());
            return;
        }
        dst.reserve(field.len() + 2);
        dst.extend_from_slice(&[QUOTE]);
        for chunk in field.as_bytes().split_inclusive(|&b| b == QUOTE) {
            dst.extend_from_slice(chunk);
            if chunk.last() == Some(&QUOTE) {
                dst.extend_from_slice(&[QUOTE]);
            }
        }
        dst.extend_from_slice(&[QUOTE]);
    }

    fn write_value(&self, value: &Value<'_>, dst: &mut BytesMut) {
        match value {
            Value::Null => dst.extend_from_slice(self.null_marker.as_bytes()),
            Value::Integer(i) => {
                let mut buf = itoa::Buffer::new();
                dst.extend_from_slice(buf.format(*i).as_bytes());
            }
            Value::Real(f) => {
                let mut buf = ryu::Buffer::new();
                dst.extend_from_slice(buf.format(*f).as_bytes());
            }
            Value::Text(s) => self.write_text(s, dst),
            Value::Blob(bytes) => {
                dst.reserve(BLOB_PREFIX.len() + bytes.len() * 2);
                dst.extend_from_slice(BLOB_PREFIX);
                dst.extend_from_slice(hex::encode(bytes).as_bytes());
            }
        }
    }
}

impl Default for CsvCodec {
    fn default() -> Self {
        Self::new("\\N")
    }
}

impl Encoder<CsvRecord<'_>> for CsvCodec {
    type Error = GatewayError;

    fn encode(&mut self, item: CsvRecord<'_>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            CsvRecord::Header(columns) => {
                for (i, name) in columns.iter().enumerate() {
                    if i > 0 {
                        dst.extend_from_slice(&[DELIMITER]);
                    }
                    self.write_text(name, dst);
                }
            }
            CsvRecord::Row(values) => {
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        dst.extend_from_slice(&[DELIMITER]);
                    }
                    self.write_value(value, dst);
                }
            }
            CsvRecord::Boundary => {}
        }
        dst.extend_from_slice(TERMINATOR);
        Ok(())
    }
}
