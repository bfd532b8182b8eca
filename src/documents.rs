//! Read-modify-write of JSON documents held in a sink.
//!
//! Alias tables and import maps are small documents that many requests
//! update.  Every update runs fetch, merge, persist while holding the
//! document's entry in [`KeyLocks`], so two updates to the same document
//! never interleave.  Updates always read the sink; the [`DocumentCache`]
//! only serves plain reads.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use crate::domain::File;
use crate::errors::AssetError;
use crate::ingest::{Pipeline, Stage};
use crate::path::StorageKey;
use crate::sink::backend::{collect, write_all};
use crate::sink::{Sink, SinkError};

/// Documents larger than this are refused on read.
const MAX_DOCUMENT_BYTES: usize = 16 * 1024 * 1024;

// -- Write locks --------------------------------------------------------------

/// One async mutex per storage key, created on demand.
#[derive(Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<StorageKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    /// Wait up to `timeout` for exclusive access to `key`.
    pub async fn acquire(
        &self,
        key: &StorageKey,
        timeout: Duration,
    ) -> Result<OwnedMutexGuard<()>, AssetError> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Entries nobody holds or waits on are only referenced by the map.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        tokio::time::timeout(timeout, lock.lock_owned())
            .await
            .map_err(|_| AssetError::Conflict(key.to_string()))
    }

    /// Number of keys with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// -- Cache --------------------------------------------------------------------

struct CacheState<T> {
    generation: u64,
    entries: HashMap<StorageKey, T>,
}

/// Process-local, lazily filled view of parsed documents.
///
/// Every invalidation bumps a generation counter.  A reader records the
/// generation before fetching from the sink and may only fill the cache if
/// it is unchanged, so a fetch that raced a write never re-installs the
/// older document.
pub struct DocumentCache<T> {
    state: RwLock<CacheState<T>>,
}

impl<T> Default for DocumentCache<T> {
    fn default() -> Self {
        Self {
            state: RwLock::new(CacheState {
                generation: 0,
                entries: HashMap::new(),
            }),
        }
    }
}

impl<T: Clone> DocumentCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached document (if any) and the current generation.
    pub fn lookup(&self, key: &StorageKey) -> (Option<T>, u64) {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        (state.entries.get(key).cloned(), state.generation)
    }

    /// Install `value` if no invalidation happened since `generation` was
    /// observed.  Returns whether it was installed.
    pub fn fill(&self, key: &StorageKey, value: T, generation: u64) -> bool {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if state.generation != generation {
            return false;
        }
        state.entries.insert(key.clone(), value);
        true
    }

    /// Drop the cached document for `key`.
    pub fn invalidate(&self, key: &StorageKey) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.generation += 1;
        state.entries.remove(key);
    }
}

/// Invalidates a cache entry when dropped, whether the surrounding write
/// completed, failed or was cancelled.
struct InvalidateOnDrop<'a, T: Clone> {
    cache: &'a DocumentCache<T>,
    key: &'a StorageKey,
}

impl<T: Clone> Drop for InvalidateOnDrop<'_, T> {
    fn drop(&mut self) {
        self.cache.invalidate(self.key);
    }
}

// -- Store --------------------------------------------------------------------

/// JSON document persistence over a sink.
pub struct DocumentStore {
    sink: Arc<dyn Sink>,
    locks: KeyLocks,
    lock_timeout: Duration,
}

impl DocumentStore {
    pub fn new(sink: Arc<dyn Sink>, lock_timeout: Duration) -> Self {
        Self {
            sink,
            locks: KeyLocks::default(),
            lock_timeout,
        }
    }

    pub fn locks(&self) -> &KeyLocks {
        &self.locks
    }

    /// Fetch and parse the document at `key`.  A missing document is
    /// `NotFound`.
    pub async fn load<T: DeserializeOwned>(&self, key: &StorageKey) -> Result<T, AssetError> {
        let stream = self.sink.read(key).await?;
        let bytes = collect(stream, MAX_DOCUMENT_BYTES).await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            AssetError::BackendUnavailable(anyhow::anyhow!(
                "stored document {key} is not valid JSON: {e}"
            ))
        })
    }

    /// Like [`load`](Self::load), but a missing document is the empty
    /// document.
    pub async fn load_or_default<T: DeserializeOwned + Default>(
        &self,
        key: &StorageKey,
    ) -> Result<T, AssetError> {
        match self.load(key).await {
            Ok(doc) => Ok(doc),
            Err(AssetError::NotFound(_)) => {
                debug!("document {} absent; starting from empty", key);
                Ok(T::default())
            }
            Err(err) => Err(err),
        }
    }

    /// Serialize `doc` as pretty JSON and write it to `key`.
    pub async fn persist<T: Serialize>(&self, key: &StorageKey, doc: &T) -> Result<(), AssetError> {
        let mut body = serde_json::to_vec_pretty(doc).map_err(|e| {
            AssetError::BackendUnavailable(anyhow::anyhow!("serializing {key}: {e}"))
        })?;
        body.push(b'\n');

        write_all(self.sink.as_ref(), &File::json(key.clone()), Bytes::from(body))
            .await
            .map_err(|e| match e {
                // A write never reports a missing object; anything is an outage.
                SinkError::NotFound { key } => {
                    AssetError::BackendUnavailable(anyhow::anyhow!("write to {key} failed"))
                }
                other => other.into(),
            })?;

        let document = key.segments().last().unwrap_or_default().to_string();
        metrics::counter!(crate::metrics::DOCUMENT_WRITES_TOTAL, "document" => document).increment(1);
        Ok(())
    }

    /// Read through `cache`.  Returns `None` when no document is stored;
    /// absence is not cached.
    pub async fn read_cached<T>(
        &self,
        cache: &DocumentCache<T>,
        key: &StorageKey,
    ) -> Result<Option<T>, AssetError>
    where
        T: DeserializeOwned + Clone,
    {
        let (cached, generation) = cache.lookup(key);
        if let Some(doc) = cached {
            debug!("document cache hit: {}", key);
            return Ok(Some(doc));
        }
        match self.load::<T>(key).await {
            Ok(doc) => {
                cache.fill(key, doc.clone(), generation);
                Ok(Some(doc))
            }
            Err(AssetError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Fetch-merge-persist under the document's write lock.
    ///
    /// `apply` mutates the fetched document (or the empty document when
    /// none is stored) and reports whether it changed anything; unchanged
    /// documents are not written back.  Returns the resulting document and
    /// whether it was written.
    pub async fn update<T, F>(
        &self,
        key: &StorageKey,
        cache: &DocumentCache<T>,
        pipeline: &mut Pipeline,
        apply: F,
    ) -> Result<(T, bool), AssetError>
    where
        T: Serialize + DeserializeOwned + Default + Clone,
        F: FnOnce(&mut T) -> bool,
    {
        let _guard = self.locks.acquire(key, self.lock_timeout).await?;

        pipeline.advance(Stage::Merging);
        let mut doc: T = self.load_or_default(key).await?;
        if !apply(&mut doc) {
            debug!("document {} unchanged; skipping write", key);
            return Ok((doc, false));
        }

        pipeline.advance(Stage::Persisting);
        let _invalidate = InvalidateOnDrop { cache, key };
        self.persist(key, &doc).await?;
        Ok((doc, true))
    }
}
