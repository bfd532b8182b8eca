//! Pluggable storage sinks.

pub mod aws;
pub mod backend;
pub mod local;
pub mod memory;
#[cfg(test)]
pub(crate) mod testing;

pub use backend::{ByteStream, Sink, SinkError, SinkWriter};
