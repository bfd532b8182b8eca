//! assetpipe library: versioned JS/CSS asset storage.
//!
//! This crate provides the components of the asset server: a pluggable
//! storage sink, the key scheme, streaming multipart ingestion, and
//! fetch-merge-persist handling of alias tables and import maps.

use std::sync::Arc;
use std::time::Duration;

pub mod bearer;
pub mod config;
pub mod documents;
pub mod domain;
pub mod errors;
pub mod handlers;
pub mod ingest;
pub mod metrics;
pub mod path;
pub mod server;
pub mod sink;

use crate::config::Config;
use crate::documents::{DocumentCache, DocumentStore};
use crate::domain::{AliasTable, ImportMap};
use crate::sink::Sink;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Storage sink (local filesystem, S3 or memory).
    pub sink: Arc<dyn Sink>,
    /// Read-modify-write access to alias tables and import maps.
    pub documents: DocumentStore,
    /// Parsed alias tables, keyed by storage key.
    pub aliases: DocumentCache<AliasTable>,
    /// Parsed import maps, keyed by storage key.
    pub import_maps: DocumentCache<ImportMap>,
}

impl AppState {
    pub fn new(config: Config, sink: Arc<dyn Sink>) -> Self {
        let lock_timeout = Duration::from_millis(config.server.write_lock_timeout_ms);
        Self {
            documents: DocumentStore::new(Arc::clone(&sink), lock_timeout),
            sink,
            config,
            aliases: DocumentCache::new(),
            import_maps: DocumentCache::new(),
        }
    }
}
