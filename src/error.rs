use std::sync::Arc;

use thiserror::Error;

pub type Result<T, E = CacheError> = std::result::Result<T, E>;

/// Failures the cache layer can run into.
///
/// Once the caches are built, only [`CacheError::FetchFailed`] ever reaches a caller of the cache API, and only from
/// the blocking paths. Storage and serialization problems are downgraded to cache misses at the store boundary.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("fetch failed: {0}")]
    FetchFailed(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A cache handle could not be assembled.
    #[error("cannot build cache: {0}")]
    Build(#[from] fieldx::error::FieldXError),

    /// The synchronizer task went away before producing a result.
    #[error("synchronization aborted: {0}")]
    SyncAborted(String),
}

impl CacheError {
    pub fn fetch_failed<S: ToString>(msg: S) -> Self {
        Self::FetchFailed(msg.to_string())
    }

    pub fn storage_unavailable<S: ToString>(msg: S) -> Self {
        Self::StorageUnavailable(msg.to_string())
    }

    /// Errors that mean "treat as no cache" rather than "tell the user".
    pub fn is_degradable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_) | Self::Serialization(_) | Self::Io(_))
    }
}

impl From<tokio::task::JoinError> for CacheError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::SyncAborted(err.to_string())
    }
}

pub type SharedError = Arc<CacheError>;
