//! Session lifecycle: warm the caches once per login, forget everything on logout.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::debug;
use tracing::instrument;

use crate::booking::Booking;
use crate::booking::BookingFilter;
use crate::bus::EventBus;
use crate::collection::CollectionCache;
use crate::collection::CollectionEvent;
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::error::SharedError;
use crate::metrics::MetricsCache;
use crate::store::EntryStore;
use crate::store::PersistentStore;
use crate::traits::CollectionSource;
use crate::traits::MetricsSource;
use crate::traits::Observer;

/// Whether the current session has already been warmed up. Clones share the flag.
#[derive(Debug, Default, Clone)]
pub struct SessionState {
    warm: Arc<AtomicBool>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_warm(&self) -> bool {
        self.warm.load(Ordering::Acquire)
    }

    pub fn mark_warm(&self) {
        self.warm.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.warm.store(false, Ordering::Release);
    }
}

pub type BookingEvent = CollectionEvent<Booking>;

/// Owner of every cache a signed-in user works with.
///
/// ```ignore
/// let manager = CacheManager::new(CacheConfig::new(), api.clone(), api, Arc::new(FileStore::open(dir).await?))?;
/// manager.bus().subscribe(EventKind::Updated, |ev| refresh_list(ev));
/// manager.on_login().await?;
/// ```
pub struct CacheManager<B, M>
where
    B: CollectionSource<Record = Booking, Filter = BookingFilter>,
    M: MetricsSource,
{
    config:   CacheConfig,
    session:  SessionState,
    bus:      EventBus<BookingEvent>,
    bookings: Arc<CollectionCache<B>>,
    metrics:  Arc<MetricsCache<M>>,
}

impl<B, M> std::fmt::Debug for CacheManager<B, M>
where
    B: CollectionSource<Record = Booking, Filter = BookingFilter>,
    M: MetricsSource,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("config", &self.config)
            .field("session", &self.session)
            .field("bookings", &self.bookings)
            .field("metrics", &self.metrics)
            .finish()
    }
}

impl<B, M> CacheManager<B, M>
where
    B: CollectionSource<Record = Booking, Filter = BookingFilter>,
    M: MetricsSource,
{
    pub fn new(
        config: CacheConfig,
        bookings_source: Arc<B>,
        metrics_source: Arc<M>,
        store: Arc<dyn EntryStore>,
    ) -> Result<Self, CacheError> {
        let session = SessionState::new();
        let bus = EventBus::new(config.event_capacity());

        let bookings = CollectionCache::builder()
            .source(bookings_source)
            .store(PersistentStore::new(Arc::clone(&store), config.bookings_namespace()))
            .bus(bus.clone())
            .session(session.clone())
            .freshness_window(config.freshness_window())
            .build()?;
        let metrics = MetricsCache::builder()
            .source(metrics_source)
            .store(PersistentStore::new(store, config.metrics_namespace()))
            .ttl(config.metrics_ttl())
            .capacity(config.metrics_capacity())
            .build()?;

        Ok(Self {
            config,
            session,
            bus,
            bookings,
            metrics,
        })
    }

    pub fn with_observer(self, observer: Arc<dyn Observer>) -> Self {
        self.bookings.set_observer(Arc::clone(&observer));
        self.metrics.set_observer(observer);
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn bus(&self) -> &EventBus<BookingEvent> {
        &self.bus
    }

    pub fn bookings(&self) -> &Arc<CollectionCache<B>> {
        &self.bookings
    }

    pub fn metrics(&self) -> &Arc<MetricsCache<M>> {
        &self.metrics
    }

    /// Warm the booking collection. Safe to call from every consumer that needs it; only the first call per session
    /// may hit the network.
    #[instrument(level = "trace", skip(self))]
    pub async fn on_login(&self) -> Result<(), SharedError> {
        self.bookings.warmup().await
    }

    /// Purge everything the session cached. The next [`on_login`](Self::on_login) starts from scratch.
    #[instrument(level = "trace", skip(self))]
    pub async fn on_logout(&self) {
        debug!("purging session caches");
        self.bookings.clear().await;
        self.metrics.invalidate_all().await;
        self.session.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let state = SessionState::new();
        let handle = state.clone();
        assert!(!handle.is_warm());

        state.mark_warm();
        assert!(handle.is_warm());

        handle.reset();
        assert!(!state.is_warm());
    }
}
