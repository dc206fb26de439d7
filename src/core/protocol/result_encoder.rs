// src/core/protocol/result_encoder.rs

//! Streams a sequence of result sets into chunks of CSV, one row at a time.

use super::csv_codec::{CsvCodec, CsvRecord};
use crate::config::OutputConfig;
use crate::core::GatewayError;
use crate::core::engine::{ResultSink, Value};
use crate::core::metrics;
use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio_util::codec::Encoder;

/// Destination for encoded chunks.
pub trait ChunkSink {
    fn send_chunk(&mut self, chunk: Bytes) -> Result<(), GatewayError>;
}

impl<S: ChunkSink + ?Sized> ChunkSink for &mut S {
    fn send_chunk(&mut self, chunk: Bytes) -> Result<(), GatewayError> {
        (**self).send_chunk(chunk)
    }
}

impl ChunkSink for Vec<Bytes> {
    fn send_chunk(&mut self, chunk: Bytes) -> Result<(), GatewayError> {
        self.push(chunk);
        Ok(())
    }
}

/// Forwards chunks from a blocking thread to the async response body.
///
/// Sending fails once the receiving side is gone, which is how a client
/// disconnect reaches the engine.
pub struct ChannelSink {
    tx: mpsc::Sender<Result<Bytes, GatewayError>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Result<Bytes, GatewayError>>) -> Self {
        Self { tx }
    }
}

impl ChunkSink for ChannelSink {
    fn send_chunk(&mut self, chunk: Bytes) -> Result<(), GatewayError> {
        self.tx
            .blocking_send(Ok(chunk))
            .map_err(|_| GatewayError::Encoding("client went away".into()))
    }
}

/// What an encoder produced, reported once encoding finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeSummary {
    pub result_sets: usize,
    pub rows: u64,
    pub bytes: u64,
}

/// A `ResultSink` that turns engine output into CSV chunks.
///
/// Each result set with at least one column is introduced by a header
/// record; result sets are separated by an empty line when configured.
/// Result sets without columns produce no output at all. Rows are encoded
/// as soon as they arrive and the buffer is handed to the `ChunkSink` once
/// it reaches `chunk_size`.
pub struct StreamingResultEncoder<S: ChunkSink> {
    codec: CsvCodec,
    sink: S,
    buf: BytesMut,
    chunk_size: usize,
    separate_result_sets: bool,
    in_silent_set: bool,
    summary: EncodeSummary,
}

impl<S: ChunkSink> StreamingResultEncoder<S> {
    pub fn new(config: &OutputConfig, sink: S) -> Self {
        Self {
            codec: CsvCodec::new(config.null_marker.clone()),
            sink,
            buf: BytesMut::with_capacity(config.chunk_size),
            chunk_size: config.chunk_size,
            separate_result_sets: config.result_set_separator,
            in_silent_set: false,
            summary: EncodeSummary::default(),
        }
    }

    /// Flushes whatever is still buffered and returns the summary.
    pub fn finish(mut self) -> Result<EncodeSummary, GatewayError> {
        self.flush()?;
        Ok(self.summary)
    }

    fn flush(&mut self) -> Result<(), GatewayError> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = self.buf.split().freeze();
        self.summary.bytes += chunk.len() as u64;
        self.sink.send_chunk(chunk)
    }

    fn flush_if_full(&mut self) -> Result<(), GatewayError> {
        if self.buf.len() >= self.chunk_size {
            self.flush()?;
        }
        Ok(())
    }
}

impl<S: ChunkSink> ResultSink for StreamingResultEncoder<S> {
    fn begin_result_set(&mut self, columns: &[String]) -> Result<(), GatewayError> {
        self.in_silent_set = columns.is_empty();
        if self.in_silent_set {
            return Ok(());
        }
        if self.separate_result_sets && self.summary.result_sets > 0 {
            self.codec.encode(CsvRecord::Boundary, &mut self.buf)?;
        }
        self.codec.encode(CsvRecord::Header(columns), &mut self.buf)?;
        self.summary.result_sets += 1;
        self.flush_if_full()
    }

    fn write_row(&mut self, row: &[Value<'_>]) -> Result<(), GatewayError> {
        if self.in_silent_set {
            return Ok(());
        }
        self.codec.encode(CsvRecord::Row(row), &mut self.buf)?;
        self.summary.rows += 1;
        metrics::ROWS_STREAMED_TOTAL.inc();
        self.flush_if_full()
    }
}
