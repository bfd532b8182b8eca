//! In-memory sink.
//!
//! Objects are held in a `tokio::sync::RwLock<HashMap<...>>`.  Nothing
//! survives a restart; this backend exists for tests and for throwaway
//! local runs (`storage.backend: memory`).

use bytes::{Bytes, BytesMut};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::backend::{ByteStream, Sink, SinkError, SinkFuture, SinkWriter};
use crate::domain::File;
use crate::path::StorageKey;

/// One stored object.
#[derive(Debug, Clone)]
pub struct MemoryObject {
    pub data: Bytes,
    pub content_type: String,
}

type Objects = Arc<RwLock<HashMap<String, MemoryObject>>>;

/// In-memory storage backend.
#[derive(Default, Clone)]
pub struct MemorySink {
    objects: Objects,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the object at `key`, if any.
    pub async fn get(&self, key: &str) -> Option<MemoryObject> {
        self.objects.read().await.get(key).cloned()
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

struct MemoryWriter {
    objects: Objects,
    key: String,
    content_type: String,
    buf: BytesMut,
}

impl SinkWriter for MemoryWriter {
    fn write(&mut self, chunk: Bytes) -> SinkFuture<'_, ()> {
        self.buf.extend_from_slice(&chunk);
        Box::pin(async { Ok(()) })
    }

    fn close(self: Box<Self>) -> SinkFuture<'static, ()> {
        let this = *self;
        Box::pin(async move {
            let object = MemoryObject {
                data: this.buf.freeze(),
                content_type: this.content_type,
            };
            this.objects.write().await.insert(this.key, object);
            Ok(())
        })
    }
}

impl Sink for MemorySink {
    fn write(&self, file: &File) -> SinkFuture<'_, Box<dyn SinkWriter>> {
        let writer: Box<dyn SinkWriter> = Box::new(MemoryWriter {
            objects: Arc::clone(&self.objects),
            key: file.key().to_string(),
            content_type: file.content_type().to_string(),
            buf: BytesMut::new(),
        });
        Box::pin(async move { Ok(writer) })
    }

    fn read(&self, key: &StorageKey) -> SinkFuture<'_, ByteStream> {
        let key = key.clone();
        Box::pin(async move {
            let object = self
                .objects
                .read()
                .await
                .get(key.as_str())
                .cloned()
                .ok_or_else(|| SinkError::not_found(&key))?;
            let stream: ByteStream = Box::pin(futures::stream::once(async move { Ok(object.data) }));
            Ok(stream)
        })
    }

    fn delete(&self, key: &StorageKey) -> SinkFuture<'_, ()> {
        let key = key.clone();
        Box::pin(async move {
            self.objects.write().await.remove(key.as_str());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::{alias_table_key, AssetType};
    use crate::sink::backend::{collect, exists, write_all};

    #[tokio::test]
    async fn test_roundtrip_and_content_type() {
        let sink = MemorySink::new();
        let file = File::json(alias_table_key("acme", AssetType::Js).unwrap());

        write_all(&sink, &file, Bytes::from("{}")).await.unwrap();

        let object = sink.get("acme/js/alias.json").await.unwrap();
        assert_eq!(object.content_type, "application/json");
        let data = collect(sink.read(file.key()).await.unwrap(), 64)
            .await
            .unwrap();
        assert_eq!(data, Bytes::from("{}"));
    }

    #[tokio::test]
    async fn test_unclosed_writer_persists_nothing() {
        let sink = MemorySink::new();
        let file = File::json(alias_table_key("acme", AssetType::Js).unwrap());

        let mut writer = sink.write(&file).await.unwrap();
        writer.write(Bytes::from("{}")).await.unwrap();
        drop(writer);

        assert!(sink.is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let sink = MemorySink::new();
        let file = File::json(alias_table_key("acme", AssetType::Css).unwrap());
        write_all(&sink, &file, Bytes::from("{}")).await.unwrap();

        sink.delete(file.key()).await.unwrap();
        sink.delete(file.key()).await.unwrap();

        assert!(matches!(
            sink.read(file.key()).await,
            Err(SinkError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_exists_tracks_writes_and_deletes() {
        let sink = MemorySink::new();
        let file = File::json(alias_table_key("acme", AssetType::Js).unwrap());
        assert!(!exists(&sink, file.key()).await.unwrap());

        write_all(&sink, &file, Bytes::from("{}")).await.unwrap();
        assert!(exists(&sink, file.key()).await.unwrap());

        sink.delete(file.key()).await.unwrap();
        assert!(!exists(&sink, file.key()).await.unwrap());
    }
}
