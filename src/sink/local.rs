//! Local filesystem sink.
//!
//! Objects are stored as plain files under a configurable root directory.
//! The storage key is used directly as a relative path
//! (e.g. `acme/js/widget/1.0.0/esm/index.js`).
//!
//! Writes are crash-safe: bytes go to a temp file under `.tmp/`, which is
//! fsynced and renamed over the final path on close.

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

use super::backend::{ByteStream, Sink, SinkError, SinkFuture, SinkWriter};
use crate::domain::File;
use crate::path::StorageKey;

/// Stores objects on the local filesystem.
pub struct FilesystemSink {
    /// Root directory for all stored objects.
    root: PathBuf,
}

impl FilesystemSink {
    /// Create a new `FilesystemSink` rooted at `root`.
    ///
    /// The directory will be created if it does not exist.
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(root.join(".tmp"))?;
        Ok(Self { root })
    }

    /// Resolve a storage key to an absolute file path under the root.
    fn resolve(&self, key: &StorageKey) -> Result<PathBuf, SinkError> {
        for component in Path::new(key.as_str()).components() {
            if !matches!(component, Component::Normal(_)) {
                return Err(SinkError::Unavailable(anyhow::anyhow!(
                    "refusing non-normal path component in storage key: {key}"
                )));
            }
        }
        Ok(self.root.join(key.as_str()))
    }

    fn temp_path(&self) -> PathBuf {
        let id = uuid::Uuid::new_v4();
        self.root.join(".tmp").join(format!("tmp-{id}"))
    }
}

/// Pending write: a temp file renamed into place on close.
struct FilesystemWriter {
    file: Option<tokio::fs::File>,
    tmp_path: Option<PathBuf>,
    final_path: PathBuf,
}

impl SinkWriter for FilesystemWriter {
    fn write(&mut self, chunk: Bytes) -> SinkFuture<'_, ()> {
        Box::pin(async move {
            let file = self
                .file
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("write after close"))?;
            file.write_all(&chunk).await?;
            Ok(())
        })
    }

    fn close(mut self: Box<Self>) -> SinkFuture<'static, ()> {
        let file = self.file.take();
        let tmp_path = self.tmp_path.take();
        let final_path = self.final_path.clone();
        Box::pin(async move {
            let (Some(mut file), Some(tmp_path)) = (file, tmp_path) else {
                return Err(anyhow::anyhow!("writer already closed").into());
            };
            file.flush().await?;
            file.sync_all().await?;
            drop(file);

            if let Some(parent) = final_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            if let Err(err) = tokio::fs::rename(&tmp_path, &final_path).await {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Err(err.into());
            }
            debug!("fs sink committed {}", final_path.display());
            Ok(())
        })
    }
}

impl Drop for FilesystemWriter {
    fn drop(&mut self) {
        // Abandoned before close: discard the partial temp file.
        if let Some(tmp_path) = self.tmp_path.take() {
            self.file.take();
            let _ = std::fs::remove_file(tmp_path);
        }
    }
}

impl Sink for FilesystemSink {
    fn write(&self, file: &File) -> SinkFuture<'_, Box<dyn SinkWriter>> {
        let key = file.key().clone();
        Box::pin(async move {
            let final_path = self.resolve(&key)?;
            let tmp_path = self.temp_path();
            if let Some(parent) = tmp_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let handle = tokio::fs::File::create(&tmp_path).await?;
            debug!("fs sink write: key={}", key);

            let writer: Box<dyn SinkWriter> = Box::new(FilesystemWriter {
                file: Some(handle),
                tmp_path: Some(tmp_path),
                final_path,
            });
            Ok(writer)
        })
    }

    fn read(&self, key: &StorageKey) -> SinkFuture<'_, ByteStream> {
        let key = key.clone();
        Box::pin(async move {
            let path = self.resolve(&key)?;
            debug!("fs sink read: key={}", key);

            let handle = match tokio::fs::File::open(&path).await {
                Ok(handle) => handle,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    return Err(SinkError::not_found(&key));
                }
                Err(err) => return Err(err.into()),
            };
            if handle.metadata().await?.is_dir() {
                return Err(SinkError::not_found(&key));
            }

            Ok(ReaderStream::new(handle).map_err(SinkError::from).boxed())
        })
    }

    fn delete(&self, key: &StorageKey) -> SinkFuture<'_, ()> {
        let key = key.clone();
        Box::pin(async move {
            let path = self.resolve(&key)?;
            debug!("fs sink delete: key={}", key);

            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }

            // The containing directory goes with the file, but never the root.
            if let Some(parent) = path.parent() {
                if parent != self.root && parent.starts_with(&self.root) {
                    match tokio::fs::remove_dir_all(parent).await {
                        Ok(()) => {}
                        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                        Err(err) => return Err(err.into()),
                    }
                }
            }
            Ok(())
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────
