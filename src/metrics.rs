//! Pre-aggregated dashboard statistics, cached per dashboard kind and location.

use std::collections::HashMap;
use std::fmt::Debug;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use fieldx::fxstruct;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use crate::entry::Entry;
use crate::error::CacheError;
use crate::error::SharedError;
use crate::scoped::ScopedCache;
use crate::single_flight::Pending;
use crate::single_flight::SingleFlight;
use crate::store::PersistentStore;
use crate::traits::MetricsSource;
use crate::traits::Observer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DashboardKind {
    Owner,
    Manager,
    Staff,
}

impl Display for DashboardKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Owner => "owner",
            Self::Manager => "manager",
            Self::Staff => "staff",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocationScope {
    All,
    Location(i64),
}

impl Display for LocationScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Location(id) => write!(f, "{id}"),
        }
    }
}

/// Identifies one dashboard's numbers. Rendered as `<kind>:<location id|all>`, which is also its storage key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeKey {
    pub kind:     DashboardKind,
    pub location: LocationScope,
}

impl ScopeKey {
    pub fn new(kind: DashboardKind, location: LocationScope) -> Self {
        Self { kind, location }
    }

    pub fn all(kind: DashboardKind) -> Self {
        Self::new(kind, LocationScope::All)
    }

    pub fn location(kind: DashboardKind, location_id: i64) -> Self {
        Self::new(kind, LocationScope::Location(location_id))
    }
}

impl Display for ScopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.location)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardMetrics {
    pub total_bookings:   u64,
    pub bookings_today:   u64,
    pub guests_today:     u64,
    pub pending_bookings: u64,
    pub revenue_today:    f64,
    pub revenue_month:    f64,
    pub outstanding:      f64,
    /// 0.0 to 1.0
    pub occupancy_rate:   f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id:         i64,
    pub booking_id: Option<i64>,
    pub amount:     f64,
    pub method:     String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub metrics:             DashboardMetrics,
    pub recent_transactions: Vec<Transaction>,
}

/// [`ScopedCache`] of dashboard snapshots wired to a [`MetricsSource`]. The builder gives back an `Arc`.
///
/// Unlike the bare scoped cache, [`load`](Self::load) keeps serving a snapshot past its TTL while a refresh runs in
/// the background, so a dashboard always has something to render once it has been loaded at least once.
///
/// Invalidating a scope, or all of them, detaches the refreshes running for it: they still answer whoever was
/// waiting on them but do not write back, and the next request starts a new fetch.
#[fxstruct(
    sync,
    rc,
    no_new,
    default(off),
    builder(
        doc("Builder object of [`MetricsCache`].", "", "See [`MetricsCache::builder()`] method."),
        method_doc("Implement builder pattern for [`MetricsCache`]."),
    )
)]
pub struct MetricsCache<S>
where
    S: MetricsSource,
{
    #[fieldx(get(clone), builder(required))]
    source: Arc<S>,

    /// Durable tier of the scoped cache.
    #[fieldx(private, builder(vis(pub), required))]
    store: PersistentStore,

    /// Age after which a snapshot expires.
    #[fieldx(get(copy), default(Duration::from_secs(5 * 60)))]
    ttl: Duration,

    /// Maximum number of scopes held by the in-process tier.
    #[fieldx(get(copy), default(1_000))]
    capacity: u64,

    #[fieldx(lazy, get(clone), builder(off))]
    scoped: Arc<ScopedCache<ScopeKey, MetricsSnapshot>>,

    #[fieldx(lock, optional, clearer, get(clone), set)]
    observer: Arc<dyn Observer>,

    // Only scopes with a refresh running are kept here.
    #[fieldx(private, builder(off), default(parking_lot::Mutex::new(HashMap::new())))]
    flights: parking_lot::Mutex<HashMap<ScopeKey, SingleFlight<MetricsSnapshot>>>,

    // Serializes writing a fetched snapshot back with invalidation.
    #[fieldx(private, builder(off), default(Mutex::new(())))]
    write_lock: Mutex<()>,
}

impl<S: MetricsSource> Debug for MetricsCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCache")
            .field("namespace", &self.store.namespace())
            .field("ttl", &self.ttl)
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl<S: MetricsSource> MetricsCache<S> {
    fn build_scoped(&self) -> Arc<ScopedCache<ScopeKey, MetricsSnapshot>> {
        Arc::new(ScopedCache::new(self.store.clone(), self.ttl(), self.capacity()))
    }

    pub fn is_refreshing(&self, scope: &ScopeKey) -> bool {
        self.flights.lock().get(scope).is_some_and(SingleFlight::is_in_flight)
    }

    /// Snapshot for `scope`, fetching only when nothing at all is cached for it.
    ///
    /// A snapshot older than the TTL is still returned, and a background refresh is started for it.
    #[instrument(level = "trace", skip(self), fields(scope = %scope))]
    pub async fn load(&self, scope: ScopeKey) -> Result<MetricsSnapshot, SharedError> {
        if let Some(entry) = self.scoped().peek(&scope).await {
            if entry.is_stale(self.ttl) {
                debug!(age = ?entry.age(), "serving stale metrics, revalidating");
                drop(self.refresh_in_background(scope));
            }
            return Ok(entry.into_payload());
        }

        self.refresh(scope).await
    }

    /// Fetch `scope` anew and wait for it. Callers asking for the same scope at once share one request.
    #[instrument(level = "trace", skip(self), fields(scope = %scope))]
    pub async fn refresh(&self, scope: ScopeKey) -> Result<MetricsSnapshot, SharedError> {
        self.start_refresh(scope).wait().await
    }

    /// Detached [`refresh`](Self::refresh). Failures are logged and passed to the observer; the cached snapshot, if
    /// any, stays.
    pub fn refresh_in_background(&self, scope: ScopeKey) -> JoinHandle<Result<(), SharedError>> {
        let pending = self.start_refresh(scope);
        let namespace = self.store.namespace().to_string();
        let observer = self.observer();
        tokio::spawn(async move {
            match pending.wait().await {
                Ok(_) => {
                    debug!(%scope, "background metrics refresh done");
                    if let Some(observer) = observer {
                        observer.on_sync(&namespace, 1).await;
                    }
                    Ok(())
                }
                Err(err) => {
                    warn!(%scope, %err, "background metrics refresh failed");
                    if let Some(observer) = observer {
                        observer.on_sync_error(&namespace, &err).await;
                    }
                    Err(err)
                }
            }
        })
    }

    fn start_refresh(&self, scope: ScopeKey) -> Pending<MetricsSnapshot> {
        let Some(myself) = self.myself()
        else {
            return Pending::failed(CacheError::SyncAborted(format!("metrics cache is gone, cannot refresh {scope}")));
        };

        // Registration happens under the map lock so that pruning cannot race a flight being started.
        let mut flights = self.flights.lock();
        flights.retain(|_, flight| flight.is_in_flight());
        let flight = flights.entry(scope).or_default();
        let handle = flight.clone();
        flight.begin(move |epoch| async move { myself.fetch_and_store(scope, handle, epoch).await })
    }

    async fn fetch_and_store(
        &self,
        scope: ScopeKey,
        flight: SingleFlight<MetricsSnapshot>,
        epoch: u64,
    ) -> Result<MetricsSnapshot, CacheError> {
        debug!(%scope, "fetching metrics");
        let snapshot = self.source.fetch_metrics(&scope).await?;

        let _guard = self.write_lock.lock().await;
        if flight.is_current(epoch) {
            self.scoped().put(scope, snapshot.clone()).await;
        }
        else {
            debug!(%scope, "metrics invalidated while fetching, dropping result");
        }
        Ok(snapshot)
    }

    /// Fresh snapshot only, no fetching.
    pub async fn get(&self, scope: &ScopeKey) -> Option<Entry<MetricsSnapshot>> {
        self.scoped().get(scope).await
    }

    pub async fn put(&self, scope: ScopeKey, snapshot: MetricsSnapshot) -> DateTime<Utc> {
        self.scoped().put(scope, snapshot).await
    }

    /// Whether anything, fresh or not, can be rendered for `scope` before a fetch completes.
    pub async fn has(&self, scope: &ScopeKey) -> bool {
        self.scoped().has(scope).await
    }

    /// Drop `scope` from both tiers. A refresh running for it is detached and will not write back.
    pub async fn invalidate(&self, scope: &ScopeKey) {
        let _guard = self.write_lock.lock().await;
        let flight = self.flights.lock().remove(scope);
        if let Some(flight) = flight {
            flight.forget();
        }
        self.scoped().invalidate(scope).await;
    }

    pub async fn invalidate_all(&self) {
        let _guard = self.write_lock.lock().await;
        let flights = std::mem::take(&mut *self.flights.lock());
        for flight in flights.into_values() {
            flight.forget();
        }
        self.scoped().invalidate_all().await;
    }
}
