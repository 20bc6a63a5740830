//! Read-through cache holding a whole record collection as a single entry.
//!
//! Reads are always served from the stored entry, stale or not. Staleness only decides whether a background sync is
//! kicked off. Network fetches go through a [`SingleFlight`] so that any number of consumers asking at once result
//! in one request. Single-record mutations are applied to the stored collection in place, no refetch needed.
//!
//! A sync replaces the stored collection wholesale when it lands. An [`upsert`](CollectionCache::upsert) or
//! [`remove`](CollectionCache::remove) made while a sync is in flight is therefore overwritten by whatever the server
//! returned, which includes the change only if the server had it by then. [`clear`](CollectionCache::clear) is the
//! exception: it detaches the running sync so that its result is dropped.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use fieldx::fxstruct;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use crate::bus::BusEvent;
use crate::bus::EventBus;
use crate::bus::EventKind;
use crate::entry::Entry;
use crate::error::CacheError;
use crate::error::SharedError;
use crate::session::SessionState;
use crate::single_flight::Pending;
use crate::single_flight::SingleFlight;
use crate::store::PersistentStore;
use crate::traits::CollectionRecord;
use crate::traits::CollectionSource;
use crate::traits::Observer;
use crate::traits::RecordFilter;

/// What caused a collection update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateSource {
    Api,
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CollectionEvent<R> {
    Updated {
        source:    UpdateSource,
        record:    Option<R>,
        record_id: Option<i64>,
    },
    Cleared,
}

impl<R: CollectionRecord> BusEvent for CollectionEvent<R> {
    fn kind(&self) -> EventKind {
        match self {
            Self::Updated { .. } => EventKind::Updated,
            Self::Cleared => EventKind::Cleared,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Nothing stored and nothing being fetched.
    Empty,
    /// Nothing stored yet, a fetch is running.
    Warming,
    Fresh,
    /// Stored data is older than the freshness window. Still served.
    Stale,
}

type Records<S> = Vec<<S as CollectionSource>::Record>;

/// Shared handle on a cached collection. The builder gives back an `Arc`.
///
/// ```ignore
/// let bookings = CollectionCache::builder()
///     .source(api)
///     .store(PersistentStore::new(backend, "bookings"))
///     .bus(bus)
///     .session(session)
///     .freshness_window(Duration::from_secs(300))
///     .build()?;
/// bookings.warmup().await?;
/// let confirmed = bookings
///     .read(Some(&BookingFilter::default().with_status(BookingStatus::Confirmed)))
///     .await;
/// ```
#[fxstruct(
    sync,
    rc,
    no_new,
    default(off),
    builder(
        doc("Builder object of [`CollectionCache`].", "", "See [`CollectionCache::builder()`] method."),
        method_doc("Implement builder pattern for [`CollectionCache`]."),
    )
)]
pub struct CollectionCache<S>
where
    S: CollectionSource,
{
    #[fieldx(get(clone), builder(required))]
    source: Arc<S>,

    /// The collection is kept under the store's namespace name.
    #[fieldx(get, builder(required))]
    store: PersistentStore,

    #[fieldx(get, builder(required))]
    bus: EventBus<CollectionEvent<S::Record>>,

    #[fieldx(get, builder(required))]
    session: SessionState,

    /// Age after which a stored collection is revalidated in the background.
    #[fieldx(get(copy), default(Duration::from_secs(5 * 60)))]
    freshness_window: Duration,

    #[fieldx(lock, optional, clearer, get(clone), set)]
    observer: Arc<dyn Observer>,

    #[fieldx(private, builder(off), default(SingleFlight::new()))]
    flight: SingleFlight<Records<S>>,

    // Serializes read-modify-write cycles on the stored collection.
    #[fieldx(private, builder(off), default(Mutex::new(())))]
    write_lock: Mutex<()>,
}

impl<S: CollectionSource> Debug for CollectionCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionCache")
            .field("namespace", &self.namespace())
            .field("freshness_window", &self.freshness_window)
            .field("flight", &self.flight)
            .finish()
    }
}

impl<S: CollectionSource> CollectionCache<S> {
    pub fn namespace(&self) -> &str {
        self.store.namespace()
    }

    pub fn is_syncing(&self) -> bool {
        self.flight.is_in_flight()
    }

    async fn entry(&self) -> Option<Entry<Records<S>>> {
        self.store.get(self.namespace()).await
    }

    async fn records(&self) -> Records<S> {
        self.entry().await.map(Entry::into_payload).unwrap_or_default()
    }

    // A failed write keeps the previous entry readable; the observer is told the cache is running degraded.
    async fn persist(&self, records: &Records<S>) {
        if self.store.put(self.namespace(), records).await.is_none() {
            if let Some(observer) = self.observer() {
                let message = format!("cannot persist {} collection, serving previous data", self.namespace());
                observer.on_warning(&message).await;
            }
        }
    }

    fn apply_filter(records: Records<S>, filter: Option<&S::Filter>) -> Records<S> {
        match filter {
            Some(filter) => records.into_iter().filter(|r| filter.matches(r)).collect(),
            None => records,
        }
    }

    pub async fn state(&self) -> CacheState {
        match self.entry().await {
            None if self.is_syncing() => CacheState::Warming,
            None => CacheState::Empty,
            Some(entry) if entry.is_stale(self.freshness_window) => CacheState::Stale,
            Some(_) => CacheState::Fresh,
        }
    }

    pub async fn stored_at(&self) -> Option<DateTime<Utc>> {
        self.entry().await.map(|e| e.stored_at())
    }

    /// Cached collection, optionally narrowed by `filter`, in stored order. Never touches the network; an empty
    /// cache reads as an empty list.
    pub async fn read(&self, filter: Option<&S::Filter>) -> Records<S> {
        Self::apply_filter(self.records().await, filter)
    }

    /// Like [`read`](Self::read) with an ad hoc predicate.
    pub async fn read_where<P>(&self, predicate: P) -> Records<S>
    where
        P: Fn(&S::Record) -> bool,
    {
        self.records().await.into_iter().filter(|r| predicate(r)).collect()
    }

    pub async fn get(&self, id: i64) -> Option<S::Record> {
        self.records().await.into_iter().find(|r| r.id() == id)
    }

    pub async fn len(&self) -> usize {
        self.records().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Populate the cache once per session.
    ///
    /// Fetches only when nothing, or an empty collection, is stored; a stale entry is good enough here. The session
    /// flag is raised whatever the outcome, so the many components calling this on mount do not each trigger a
    /// fetch. A failed fetch is still reported to the caller.
    #[instrument(level = "trace", skip(self), fields(namespace = %self.namespace()))]
    pub async fn warmup(&self) -> Result<(), SharedError> {
        if self.session.is_warm() {
            return Ok(());
        }

        let needs_fetch = self.entry().await.is_none_or(|e| e.payload().is_empty());
        let outcome = if needs_fetch {
            debug!("warming up");
            self.synchronize().wait().await.map(|_| ())
        }
        else {
            debug!("already populated, skipping warmup fetch");
            Ok(())
        };

        self.session.mark_warm();
        outcome
    }

    /// Cache-first read. Stored data is returned right away, and if it is stale a background sync is started. With
    /// nothing stored the caller waits for the fetch, and its failure is returned.
    #[instrument(level = "trace", skip(self, filter), fields(namespace = %self.namespace()))]
    pub async fn read_or_sync(&self, filter: Option<&S::Filter>) -> Result<Records<S>, SharedError> {
        let records = match self.entry().await {
            Some(entry) => {
                if entry.is_stale(self.freshness_window) {
                    debug!(age = ?entry.age(), "serving stale collection, revalidating");
                    // Detached on purpose; failures are logged by the task itself.
                    drop(self.sync_in_background());
                }
                entry.into_payload()
            }
            None => self.synchronize().wait().await?,
        };
        Ok(Self::apply_filter(records, filter))
    }

    /// Refresh the collection without blocking the caller.
    ///
    /// The returned handle resolves once the sync is over. Nobody has to await it: errors are logged, passed on to
    /// the observer, and the previously cached collection stays in place.
    pub fn sync_in_background(&self) -> JoinHandle<Result<(), SharedError>> {
        let pending = self.synchronize();
        let namespace = self.namespace().to_string();
        let observer = self.observer();
        tokio::spawn(async move {
            match pending.wait().await {
                Ok(records) => {
                    debug!(%namespace, count = records.len(), "background sync done");
                    if let Some(observer) = observer {
                        observer.on_sync(&namespace, records.len()).await;
                    }
                    Ok(())
                }
                Err(err) => {
                    warn!(%namespace, %err, "background sync failed, keeping cached data");
                    if let Some(observer) = observer {
                        observer.on_sync_error(&namespace, &err).await;
                    }
                    Err(err)
                }
            }
        })
    }

    fn synchronize(&self) -> Pending<Records<S>> {
        let Some(myself) = self.myself()
        else {
            return Pending::failed(CacheError::SyncAborted(format!("{} cache is gone", self.namespace())));
        };
        self.flight
            .begin(move |epoch| async move { myself.fetch_and_store(epoch).await })
    }

    async fn fetch_and_store(&self, epoch: u64) -> Result<Records<S>, CacheError> {
        debug!(namespace = %self.namespace(), "fetching collection");
        let records = self.source.fetch_collection(&S::Filter::default()).await?;

        {
            let _guard = self.write_lock.lock().await;
            if !self.flight.is_current(epoch) {
                debug!(namespace = %self.namespace(), "cache cleared while fetching, dropping result");
                return Ok(records);
            }
            self.persist(&records).await;
        }

        self.bus.publish(CollectionEvent::Updated {
            source:    UpdateSource::Api,
            record:    None,
            record_id: None,
        });

        Ok(records)
    }

    /// Replace the whole stored collection.
    pub async fn replace_all(&self, records: Records<S>) {
        {
            let _guard = self.write_lock.lock().await;
            self.persist(&records).await;
        }
        self.bus.publish(CollectionEvent::Updated {
            source:    UpdateSource::Api,
            record:    None,
            record_id: None,
        });
    }

    /// Replace the record with the same id, or put a new one at the front.
    ///
    /// Applies to a loaded collection only: with nothing stored, `None` is returned and nothing is published, since
    /// a one-record entry would pass for the full working set and suppress the next warmup.
    #[instrument(level = "trace", skip(self, record), fields(namespace = %self.namespace(), id = record.id()))]
    pub async fn upsert(&self, record: S::Record) -> Option<UpdateSource> {
        let source = {
            let _guard = self.write_lock.lock().await;
            let mut records = self.entry().await?.into_payload();

            let source = match records.iter_mut().find(|r| r.id() == record.id()) {
                Some(slot) => {
                    *slot = record.clone();
                    UpdateSource::Update
                }
                None => {
                    records.insert(0, record.clone());
                    UpdateSource::Create
                }
            };
            self.persist(&records).await;
            source
        };

        let record_id = record.id();
        self.bus.publish(CollectionEvent::Updated {
            source,
            record: Some(record),
            record_id: Some(record_id),
        });
        Some(source)
    }

    /// Drop a record by id. Returns `true` if it was there.
    #[instrument(level = "trace", skip(self), fields(namespace = %self.namespace()))]
    pub async fn remove(&self, id: i64) -> bool {
        let removed = {
            let _guard = self.write_lock.lock().await;
            let Some(entry) = self.entry().await
            else {
                return false;
            };

            let mut records = entry.into_payload();
            let before = records.len();
            records.retain(|r| r.id() != id);
            let removed = records.len() != before;
            if removed {
                self.persist(&records).await;
            }
            removed
        };

        if removed {
            self.bus.publish(CollectionEvent::Updated {
                source:    UpdateSource::Delete,
                record:    None,
                record_id: Some(id),
            });
        }
        removed
    }

    /// Forget everything and end the session's warm state.
    ///
    /// A sync already running is left alone, but its result is not written back and it is not joined by anybody
    /// asking after this call: the next warmup or read fetches anew.
    #[instrument(level = "trace", skip(self), fields(namespace = %self.namespace()))]
    pub async fn clear(&self) {
        {
            let _guard = self.write_lock.lock().await;
            self.flight.forget();
            self.store.delete(self.namespace()).await;
            self.session.reset();
        }
        self.bus.publish(CollectionEvent::Cleared);
    }
}
