use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::trace;

use crate::error::CacheError;
use crate::error::SharedError;

type Outcome<T> = Result<T, SharedError>;
type Slot<T> = Arc<Mutex<FlightState<T>>>;

struct FlightState<T> {
    // Bumped by forget(); a fetch remembers the epoch it was started under.
    epoch:   u64,
    running: Option<watch::Receiver<Option<Outcome<T>>>>,
}

/// Collapses logically concurrent fetches into one.
///
/// The first caller of [`run_exclusive`](Self::run_exclusive) starts the task; everybody arriving while it runs
/// gets the very same outcome, error included. Once the task is done the slot is free again and the next call starts
/// a new fetch. Nothing is retried here, that is up to the caller.
///
/// The task runs detached on the tokio runtime: a waiter giving up does not cancel the fetch for the others.
///
/// Every fetch is started under an epoch which is passed to the task. [`forget`](Self::forget) moves on to the next
/// epoch and detaches the running fetch: its waiters still get its outcome, but callers coming in afterwards start a
/// new one. A task can tell whether it has been forgotten with [`is_current`](Self::is_current).
pub struct SingleFlight<T> {
    slot: Slot<T>,
}

impl<T> Clone for SingleFlight<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Default for SingleFlight<T> {
    fn default() -> Self {
        Self {
            slot: Arc::new(Mutex::new(FlightState {
                epoch:   0,
                running: None,
            })),
        }
    }
}

impl<T> Debug for SingleFlight<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.slot.lock();
        f.debug_struct("SingleFlight")
            .field("epoch", &state.epoch)
            .field("in_flight", &state.running.is_some())
            .finish()
    }
}

// Frees the slot even if the task panics, in which case waiters observe a closed channel. A forgotten fetch leaves
// the slot alone, it may already belong to a newer one.
struct SlotGuard<T> {
    slot:  Slot<T>,
    epoch: u64,
}

impl<T> Drop for SlotGuard<T> {
    fn drop(&mut self) {
        let mut state = self.slot.lock();
        if state.epoch == self.epoch {
            state.running.take();
        }
    }
}

impl<T> SingleFlight<T> {
    pub fn is_in_flight(&self) -> bool {
        self.slot.lock().running.is_some()
    }

    /// Whether a fetch started under `epoch` has not been forgotten since.
    pub fn is_current(&self, epoch: u64) -> bool {
        self.slot.lock().epoch == epoch
    }

    /// Detach the running fetch, if any, and start a new epoch.
    pub fn forget(&self) {
        let mut state = self.slot.lock();
        state.epoch += 1;
        if state.running.take().is_some() {
            trace!(epoch = state.epoch, "detached in-flight fetch");
        }
    }
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `task` unless a fetch is already running, and return a handle on the shared outcome either way. The
    /// task receives the epoch it runs under.
    ///
    /// Registration happens before this method returns, so a caller that detaches the handle still leaves the slot
    /// occupied for anybody coming in right after.
    pub fn begin<F, Fut>(&self, task: F) -> Pending<T>
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = Result<T, CacheError>> + Send + 'static,
    {
        let mut state = self.slot.lock();
        if let Some(rx) = state.running.as_ref() {
            trace!("attaching to in-flight fetch");
            return Pending { rx: rx.clone() };
        }

        let (tx, rx) = watch::channel(None);
        state.running = Some(rx.clone());

        let epoch = state.epoch;
        let fut = task(epoch);
        let guard = SlotGuard {
            slot: Arc::clone(&self.slot),
            epoch,
        };
        tokio::spawn(async move {
            let outcome = fut.await.map_err(Arc::new);
            // Free the slot before waking the waiters so that whoever reacts to the outcome can start anew.
            drop(guard);
            let _ = tx.send(Some(outcome));
        });

        Pending { rx }
    }

    pub async fn run_exclusive<F, Fut>(&self, task: F) -> Outcome<T>
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = Result<T, CacheError>> + Send + 'static,
    {
        self.begin(task).wait().await
    }
}

/// The shared outcome of a fetch started or joined via [`SingleFlight::begin`].
pub struct Pending<T> {
    rx: watch::Receiver<Option<Outcome<T>>>,
}

impl<T> Pending<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// An outcome that is known before anything is started.
    pub fn failed(err: CacheError) -> Self {
        let (_tx, rx) = watch::channel(Some(Err(Arc::new(err))));
        Self { rx }
    }

    pub async fn wait(mut self) -> Outcome<T> {
        let outcome = self
            .rx
            .wait_for(Option::is_some)
            .await
            .map(|done| (*done).clone())
            .map_err(|_| Arc::new(CacheError::SyncAborted("fetch task vanished".to_string())))?;

        outcome.unwrap_or_else(|| Err(Arc::new(CacheError::SyncAborted("empty outcome".to_string()))))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use tokio::task::JoinSet;

    use super::*;

    #[tokio::test]
    async fn concurrent_callers_share_one_run() {
        let flight = SingleFlight::<u32>::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let mut set = JoinSet::new();

        for _ in 0..8 {
            let flight = flight.clone();
            let runs = Arc::clone(&runs);
            set.spawn(async move {
                flight
                    .run_exclusive(|_| async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(42)
                    })
                    .await
            });
        }

        while let Some(res) = set.join_next().await {
            assert_eq!(res.unwrap().unwrap(), 42);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!flight.is_in_flight());
    }

    #[tokio::test]
    async fn failure_is_shared_and_not_retried() {
        let flight = SingleFlight::<u32>::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let first = {
            let runs = Arc::clone(&runs);
            flight.run_exclusive(|_| async move {
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                Err(CacheError::fetch_failed("boom"))
            })
        };
        let second = flight.run_exclusive(|_| async { Ok(1) });

        let (a, b) = tokio::join!(first, second);
        assert!(matches!(*a.unwrap_err(), CacheError::FetchFailed(_)));
        assert!(matches!(*b.unwrap_err(), CacheError::FetchFailed(_)));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn later_calls_start_fresh() {
        let flight = SingleFlight::<u32>::new();
        assert_eq!(flight.run_exclusive(|_| async { Ok(1) }).await.unwrap(), 1);
        assert_eq!(flight.run_exclusive(|_| async { Ok(2) }).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn panicking_task_frees_the_slot() {
        let flight = SingleFlight::<u32>::new();
        let res = flight
            .run_exclusive(|_| async {
                if true {
                    panic!("fetch exploded");
                }
                Ok(0)
            })
            .await;
        assert!(matches!(*res.unwrap_err(), CacheError::SyncAborted(_)));
        assert!(!flight.is_in_flight());
        assert_eq!(flight.run_exclusive(|_| async { Ok(7) }).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn begin_registers_before_returning() {
        let flight = SingleFlight::<u32>::new();
        let pending = flight.begin(|_| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(5)
        });
        assert!(flight.is_in_flight());

        let joined = flight.run_exclusive(|_| async { Ok(99) }).await.unwrap();
        assert_eq!(joined, 5);
        assert_eq!(pending.wait().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn forgotten_fetch_is_not_joined() {
        let flight = SingleFlight::<u32>::new();
        let old = flight.begin(|epoch| async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            Ok(epoch as u32)
        });

        flight.forget();
        assert!(!flight.is_in_flight());
        assert!(!flight.is_current(0));
        assert!(flight.is_current(1));

        let fresh = flight.run_exclusive(|epoch| async move { Ok(100 + epoch as u32) }).await.unwrap();
        assert_eq!(fresh, 101);
        assert_eq!(old.wait().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn forgotten_fetch_does_not_free_a_newer_slot() {
        let flight = SingleFlight::<u32>::new();
        let old = flight.begin(|_| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(1)
        });
        flight.forget();
        let new = flight.begin(|_| async {
            tokio::time::sleep(Duration::from_millis(60)).await;
            Ok(2)
        });

        assert_eq!(old.wait().await.unwrap(), 1);
        assert!(flight.is_in_flight());
        assert_eq!(flight.run_exclusive(|_| async { Ok(3) }).await.unwrap(), 2);
        assert_eq!(new.wait().await.unwrap(), 2);
    }

    #[test]
    fn debug_needs_no_bounds() {
        #[allow(dead_code)]
        struct Opaque;
        let flight = SingleFlight::<Opaque>::default();
        assert_eq!(format!("{flight:?}"), "SingleFlight { epoch: 0, in_flight: false }");
    }
}
