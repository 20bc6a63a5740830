use std::fmt::Debug;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CacheError;
use crate::error::SharedError;
use crate::metrics::MetricsSnapshot;
use crate::metrics::ScopeKey;

/// A record that can live in a [`CollectionCache`](crate::collection::CollectionCache).
pub trait CollectionRecord: Debug + Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable identity, unique within the collection.
    fn id(&self) -> i64;
}

/// Client-side predicate over a cached collection. `Default` must match everything.
pub trait RecordFilter<R>: Debug + Default + Clone + Send + Sync + 'static {
    fn matches(&self, record: &R) -> bool;
}

// The remote side of the collection cache. Implementations wrap the HTTP API client.
#[async_trait]
pub trait CollectionSource: Send + Sync + 'static {
    type Record: CollectionRecord;
    type Filter: RecordFilter<Self::Record>;

    /// Fetch the authoritative collection. The cache always asks for the full working set by passing the default
    /// filter; narrower filters are applied client-side.
    async fn fetch_collection(&self, filter: &Self::Filter) -> Result<Vec<Self::Record>, CacheError>;
}

#[async_trait]
pub trait MetricsSource: Send + Sync + 'static {
    async fn fetch_metrics(&self, scope: &ScopeKey) -> Result<MetricsSnapshot, CacheError>;
}

/// Hooks for things the cache deliberately keeps away from its callers: failures of detached work and degraded
/// operation.
#[async_trait]
pub trait Observer: Send + Sync + 'static {
    async fn on_sync(&self, _namespace: &str, _records: usize) {}
    async fn on_sync_error(&self, _namespace: &str, _error: &SharedError) {}
    async fn on_warning(&self, _message: &str) {}
}
