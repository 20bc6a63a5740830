//! # venue-cache
//!
//! Client-side caching layer for a venue/booking management application.
//!
//! The application shows the same data in many places at once: booking lists, calendars and dashboards. Each of them
//! asks for data on mount. Without a cache every component fires its own request; with this crate they read a shared
//! local copy, and the network is only consulted when that copy is missing or getting old.
//!
//! # The Basics
//!
//! There are two kinds of cached data:
//!
//! - A **record collection** (bookings) cached as a whole under one namespace entry. Consumers filter it client-side
//!   with a [`BookingFilter`] or any predicate. See [`CollectionCache`].
//! - **Scoped values** (dashboard metrics) keyed by dashboard kind and location, with their own TTL. See
//!   [`ScopedCache`] and [`MetricsCache`].
//!
//! The caches operate on the following principles:
//!
//! - Cache-first. A stored entry is served right away, even when stale; staleness only triggers a background refresh.
//! - Single-flight. Any number of consumers asking for a sync at the same time result in a single request.
//! - Storage failures degrade to cache misses and are never propagated to readers.
//! - Mutations performed locally (create, update, delete) are applied to the cached collection in place and announced
//!   over an [`EventBus`], so that every view stays in sync without refetching.
//! - Entries are kept by an [`EntryStore`] backend: [`MemoryStore`] for the process lifetime or [`FileStore`] to
//!   survive restarts. Metrics additionally live in an in-process [moka](https://crates.io/crates/moka) tier.
//!
//! # Session Lifecycle
//!
//! [`CacheManager`] owns the caches, the bus and the session state. Call [`CacheManager::on_login`] whenever a
//! consumer needs the bookings; only the first call of a session may fetch. [`CacheManager::on_logout`] purges all
//! cached data so that nothing leaks into the next session.
//!
//! ```ignore
//! let manager = CacheManager::new(CacheConfig::new(), bookings_api, metrics_api, Arc::new(MemoryStore::new()))?;
//! manager.on_login().await?;
//!
//! let todays = manager
//!     .bookings()
//!     .read(Some(&BookingFilter::default().with_date(today)))
//!     .await;
//! ```
//!
//! # Crate Features
//!
//! - `tracing` brings in `tracing-subscriber` and [`init_tracing`], a subscriber driven by `RUST_LOG`.
//! - `test` exposes the `test` module with scripted fake sources and fixtures.

pub mod booking;
pub mod bus;
pub mod collection;
pub mod config;
pub mod entry;
pub mod error;
pub mod metrics;
pub mod scoped;
pub mod session;
pub mod single_flight;
pub mod store;
pub mod traits;

#[doc(inline)]
pub use booking::Booking;
#[doc(inline)]
pub use booking::BookingFilter;
#[doc(inline)]
pub use bus::EventBus;
#[doc(inline)]
pub use collection::CollectionCache;
#[doc(inline)]
pub use config::CacheConfig;
#[doc(inline)]
pub use error::CacheError;
#[doc(inline)]
pub use metrics::MetricsCache;
#[doc(inline)]
pub use scoped::ScopedCache;
#[doc(inline)]
pub use session::CacheManager;
#[doc(inline)]
pub use store::EntryStore;
#[doc(inline)]
pub use store::FileStore;
#[doc(inline)]
pub use store::MemoryStore;

pub mod prelude {
    pub use crate::booking::*;
    pub use crate::bus::BusEvent;
    pub use crate::bus::EventBus;
    pub use crate::bus::EventKind;
    pub use crate::bus::Subscription;
    pub use crate::collection::CacheState;
    pub use crate::collection::CollectionCache;
    pub use crate::collection::CollectionEvent;
    pub use crate::collection::UpdateSource;
    pub use crate::config::CacheConfig;
    pub use crate::entry::Entry;
    pub use crate::error::CacheError;
    pub use crate::error::SharedError;
    pub use crate::metrics::*;
    pub use crate::scoped::ScopedCache;
    pub use crate::session::CacheManager;
    pub use crate::session::SessionState;
    pub use crate::store::EntryStore;
    pub use crate::store::FileStore;
    pub use crate::store::MemoryStore;
    pub use crate::store::PersistentStore;
    pub use crate::traits::*;
}

/// Install a global `fmt` subscriber filtered by `RUST_LOG`.
#[cfg(feature = "tracing")]
pub fn init_tracing() -> Result<(), tracing_subscriber::util::TryInitError> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    tracing::info!("Tracing initialized");
    Ok(())
}
