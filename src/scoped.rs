//! Independently keyed cache with a two-tier lookup.
//!
//! The fast tier is a moka cache living as long as the process; the durable tier is a [`PersistentStore`] that
//! survives restarts. Durable hits are promoted to the fast tier. Freshness is judged by each entry's own timestamp,
//! so a promoted entry keeps the age it had when it was originally written.

use std::fmt::Debug;
use std::fmt::Display;
use std::hash::Hash;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use moka::future::Cache;
use moka::policy::EvictionPolicy;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use tracing::trace;

use crate::entry::Entry;
use crate::store::PersistentStore;

pub trait ScopedKey: Debug + Display + Hash + Clone + Eq + Send + Sync + 'static {}

impl<K> ScopedKey for K where K: Debug + Display + Hash + Clone + Eq + Send + Sync + 'static {}

pub trait ScopedValue: Debug + Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<V> ScopedValue for V where V: Debug + Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

pub struct ScopedCache<K, V>
where
    K: ScopedKey,
    V: ScopedValue,
{
    fast:    Cache<K, Entry<V>>,
    durable: PersistentStore,
    ttl:     Duration,
}

impl<K, V> Debug for ScopedCache<K, V>
where
    K: ScopedKey,
    V: ScopedValue,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedCache")
            .field("namespace", &self.durable.namespace())
            .field("ttl", &self.ttl)
            .field("fast_entries", &self.fast.entry_count())
            .finish()
    }
}

impl<K, V> ScopedCache<K, V>
where
    K: ScopedKey,
    V: ScopedValue,
{
    pub fn new(durable: PersistentStore, ttl: Duration, capacity: u64) -> Self {
        let fast = Cache::builder()
            .max_capacity(capacity)
            .name(durable.namespace())
            .eviction_policy(EvictionPolicy::tiny_lfu())
            .build();
        Self { fast, durable, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn namespace(&self) -> &str {
        self.durable.namespace()
    }

    fn is_expired(&self, entry: &Entry<V>) -> bool {
        entry.is_stale(self.ttl)
    }

    /// Fresh entry for `key`, if any. Entries past the TTL are dropped from both tiers on the way.
    pub async fn get(&self, key: &K) -> Option<Entry<V>> {
        if let Some(entry) = self.fast.get(key).await {
            if !self.is_expired(&entry) {
                trace!(%key, "fast tier hit");
                return Some(entry);
            }
            debug!(%key, "expired in fast tier");
            self.invalidate(key).await;
            return None;
        }

        let entry = self.durable.get::<V>(&key.to_string()).await?;
        if self.is_expired(&entry) {
            debug!(%key, age = ?entry.age(), "expired in durable tier, deleting");
            self.durable.delete(&key.to_string()).await;
            return None;
        }

        trace!(%key, "durable tier hit, promoting");
        self.fast.insert(key.clone(), entry.clone()).await;
        Some(entry)
    }

    /// Whatever is stored for `key`, regardless of age. Nothing is evicted; durable hits are still promoted.
    pub async fn peek(&self, key: &K) -> Option<Entry<V>> {
        if let Some(entry) = self.fast.get(key).await {
            return Some(entry);
        }
        let entry = self.durable.get::<V>(&key.to_string()).await?;
        self.fast.insert(key.clone(), entry.clone()).await;
        Some(entry)
    }

    /// Write through both tiers with a fresh timestamp.
    pub async fn put(&self, key: K, value: V) -> DateTime<Utc> {
        let entry = Entry::new(key.to_string(), value);
        let stored_at = entry.stored_at();
        // A failed durable write leaves the fast tier authoritative until the next reload.
        self.durable.put_entry(&entry).await;
        self.fast.insert(key, entry).await;
        stored_at
    }

    /// Store a pre-stamped entry in both tiers, e.g. one carried over from another cache.
    pub async fn put_entry(&self, key: K, entry: Entry<V>) {
        self.durable.put_entry(&entry).await;
        self.fast.insert(key, entry).await;
    }

    /// Existence check that ignores freshness.
    pub async fn has(&self, key: &K) -> bool {
        self.fast.contains_key(key) || self.durable.has(&key.to_string()).await
    }

    pub async fn invalidate(&self, key: &K) {
        self.fast.invalidate(key).await;
        self.durable.delete(&key.to_string()).await;
    }

    pub async fn invalidate_all(&self) {
        self.fast.invalidate_all();
        self.durable.clear().await;
    }
}
