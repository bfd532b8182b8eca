//! Abstract sink trait.
//!
//! Every persistence backend must implement [`Sink`].  The trait works in
//! terms of byte streams so callers never learn the underlying medium,
//! and it carries exactly three operations: write, read and delete.

use bytes::Bytes;
use futures::stream::BoxStream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

use crate::domain::File;
use crate::path::StorageKey;

/// Boxed future returned by sink operations.
pub type SinkFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SinkError>> + Send + 'a>>;

/// Lazy, finite, non-restartable byte sequence read from a sink.
pub type ByteStream = BoxStream<'static, Result<Bytes, SinkError>>;

/// Backend-level failure.
#[derive(Debug, Error)]
pub enum SinkError {
    /// No object exists at the key.
    #[error("no object stored at {key}")]
    NotFound { key: String },

    /// Any other I/O or service failure.
    #[error(transparent)]
    Unavailable(#[from] anyhow::Error),
}

impl SinkError {
    pub fn not_found(key: &StorageKey) -> Self {
        SinkError::NotFound {
            key: key.to_string(),
        }
    }
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Unavailable(err.into())
    }
}

/// An open write to one key.
///
/// Bytes become visible at the key only when [`SinkWriter::close`]
/// succeeds.  Dropping a writer without closing it discards everything
/// written so far and leaves any previous object untouched.
pub trait SinkWriter: Send {
    /// Append a chunk.
    fn write(&mut self, chunk: Bytes) -> SinkFuture<'_, ()>;

    /// Persist all written bytes at the key.
    fn close(self: Box<Self>) -> SinkFuture<'static, ()>;
}

/// Async persistence capability over one storage backend.
pub trait Sink: Send + Sync + 'static {
    /// Open a writer for `file`.  Intermediate directories or prefixes are
    /// created as needed.
    fn write(&self, file: &File) -> SinkFuture<'_, Box<dyn SinkWriter>>;

    /// Stream the object at `key`.  Fails with [`SinkError::NotFound`] if
    /// nothing is stored there.
    fn read(&self, key: &StorageKey) -> SinkFuture<'_, ByteStream>;

    /// Remove the object at `key`.  Deleting a missing key is not an error.
    fn delete(&self, key: &StorageKey) -> SinkFuture<'_, ()>;
}

/// Write `data` to `file` in one chunk and close.
pub async fn write_all(sink: &dyn Sink, file: &File, data: Bytes) -> Result<(), SinkError> {
    let mut writer = sink.write(file).await?;
    writer.write(data).await?;
    writer.close().await
}

/// Whether an object is stored at `key`.
pub async fn exists(sink: &dyn Sink, key: &StorageKey) -> Result<bool, SinkError> {
    match sink.read(key).await {
        Ok(_) => Ok(true),
        Err(SinkError::NotFound { .. }) => Ok(false),
        Err(err) => Err(err),
    }
}

/// Drain a byte stream into memory, failing once it exceeds `limit` bytes.
pub async fn collect(mut stream: ByteStream, limit: usize) -> Result<Bytes, SinkError> {
    use futures::StreamExt;

    let mut buf = bytes::BytesMut::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if buf.len() + chunk.len() > limit {
            return Err(SinkError::Unavailable(anyhow::anyhow!(
                "stored object exceeds {limit} bytes"
            )));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.freeze())
}
