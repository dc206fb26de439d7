// src/core/protocol/mod.rs

//! The tabular output format and the streaming encoder built on it.

pub mod csv_codec;
pub mod result_encoder;

pub use csv_codec::{CsvCodec, CsvRecord};
pub use result_encoder::{ChannelSink, ChunkSink, EncodeSummary, StreamingResultEncoder};
