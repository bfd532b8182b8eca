//! Sink wrappers for tests.

use std::time::Duration;

use super::backend::{ByteStream, Sink, SinkFuture, SinkWriter};
use super::memory::MemorySink;
use crate::domain::File;
use crate::path::StorageKey;

/// A [`MemorySink`] whose reads stall for `delay` before returning, so two
/// concurrent read-modify-write cycles overlap.
pub(crate) struct SlowSink {
    pub inner: MemorySink,
    pub delay: Duration,
}

impl SlowSink {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MemorySink::new(),
            delay,
        }
    }
}

impl Sink for SlowSink {
    fn write(&self, file: &File) -> SinkFuture<'_, Box<dyn SinkWriter>> {
        self.inner.write(file)
    }

    fn read(&self, key: &StorageKey) -> SinkFuture<'_, ByteStream> {
        let key = key.clone();
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.inner.read(&key).await
        })
    }

    fn delete(&self, key: &StorageKey) -> SinkFuture<'_, ()> {
        self.inner.delete(key)
    }
}
