//! Delivery of dispatched batches
//!
//! [`BatchSink`] is a [`Listener`](crate::analytics::Listener) that writes each
//! batch to any combination of:
//! - File (JSONL) - daily files under the events directory
//! - Stdout - formatted lines or JSON
//! - HTTP - POSTs the batch as a JSON array

pub mod sink;

pub use sink::{BatchSink, DEFAULT_HTTP_TIMEOUT, DisplayFormat, SinkKind, format_display};
