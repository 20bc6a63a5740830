//! Durable key/value storage for cache entries.
//!
//! The [`EntryStore`] trait is the byte-level backend contract. [`PersistentStore`] binds a backend to a single
//! namespace, takes care of (de)serializing [`Entry`] values, and turns every storage failure into a cache miss.
//! Expiry is not this layer's business: each cache kind decides on its own what "too old" means.

pub mod file;
pub mod memory;

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::entry::Entry;
use crate::error::Result;

#[doc(inline)]
pub use file::FileStore;
#[doc(inline)]
pub use memory::MemoryStore;

/// Namespaced byte store backing the caches.
#[async_trait]
pub trait EntryStore: Debug + Send + Sync + 'static {
    /// Replace the value stored under `key`.
    async fn put(&self, namespace: &str, key: &str, value: Vec<u8>) -> Result<()>;
    /// `Ok(None)` is the only way to say "no such key".
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>>;
    async fn delete(&self, namespace: &str, key: &str) -> Result<()>;
    async fn clear_namespace(&self, namespace: &str) -> Result<()>;

    async fn has(&self, namespace: &str, key: &str) -> Result<bool> {
        Ok(self.get(namespace, key).await?.is_some())
    }
}

/// A namespace-bound, typed and failure-tolerant view of an [`EntryStore`].
#[derive(Debug, Clone)]
pub struct PersistentStore {
    backend:   Arc<dyn EntryStore>,
    namespace: Arc<str>,
}

impl PersistentStore {
    pub fn new<N: AsRef<str>>(backend: Arc<dyn EntryStore>, namespace: N) -> Self {
        Self {
            backend,
            namespace: Arc::from(namespace.as_ref()),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn backend(&self) -> Arc<dyn EntryStore> {
        Arc::clone(&self.backend)
    }

    /// Fetch and decode an entry. Missing keys, unreachable storage and undecodable payloads all come back as
    /// `None`; a corrupt payload stays in place until the next successful write overwrites it.
    pub async fn get<T>(&self, key: &str) -> Option<Entry<T>>
    where
        T: DeserializeOwned,
    {
        let bytes = match self.backend.get(&self.namespace, key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(namespace = %self.namespace, key, "store miss");
                return None;
            }
            Err(err) => {
                warn!(namespace = %self.namespace, key, %err, "store read failed, treating as miss");
                return None;
            }
        };

        match postcard::from_bytes::<Entry<T>>(&bytes) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(namespace = %self.namespace, key, %err, "corrupt cache entry, treating as miss");
                None
            }
        }
    }

    /// Stamp `payload` with the current time and store it. Returns the stamp, or `None` if nothing was written.
    pub async fn put<T>(&self, key: &str, payload: &T) -> Option<DateTime<Utc>>
    where
        T: Serialize,
    {
        let entry = Entry::new(key, payload);
        let stored_at = entry.stored_at();
        self.put_entry(&entry).await.then_some(stored_at)
    }

    /// Store a pre-built entry as is, keeping its timestamp.
    pub async fn put_entry<T>(&self, entry: &Entry<T>) -> bool
    where
        T: Serialize,
    {
        let bytes = match postcard::to_stdvec(entry) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(namespace = %self.namespace, key = entry.key(), %err, "cannot encode cache entry");
                return false;
            }
        };

        match self.backend.put(&self.namespace, entry.key(), bytes).await {
            Ok(()) => true,
            Err(err) => {
                warn!(namespace = %self.namespace, key = entry.key(), %err, "store write failed");
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) {
        if let Err(err) = self.backend.delete(&self.namespace, key).await {
            warn!(namespace = %self.namespace, key, %err, "store delete failed");
        }
    }

    pub async fn clear(&self) {
        if let Err(err) = self.backend.clear_namespace(&self.namespace).await {
            warn!(namespace = %self.namespace, %err, "store clear failed");
        }
    }

    pub async fn has(&self, key: &str) -> bool {
        self.backend.has(&self.namespace, key).await.unwrap_or_else(|err| {
            warn!(namespace = %self.namespace, key, %err, "store lookup failed");
            false
        })
    }
}
