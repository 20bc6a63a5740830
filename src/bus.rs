//! Publish/subscribe channel keeping independent consumers in sync with cache mutations.
//!
//! Delivery is synchronous, at most once per subscriber and publish, in subscription order. There is no replay: a
//! consumer that subscribes late must read the cache itself to catch up.

use std::fmt::Debug;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Updated,
    Cleared,
}

pub trait BusEvent: Clone + Debug + Send + Sync + 'static {
    fn kind(&self) -> EventKind;
}

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Subscriber<E> {
    id:      u64,
    kind:    Option<EventKind>,
    handler: Handler<E>,
}

struct BusInner<E> {
    subscribers: Mutex<Vec<Subscriber<E>>>,
    next_id:     AtomicU64,
    sender:      broadcast::Sender<E>,
}

pub struct EventBus<E: BusEvent> {
    inner: Arc<BusInner<E>>,
}

impl<E: BusEvent> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: BusEvent> Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Handle returned by [`EventBus::subscribe`]. Dropping it keeps the subscription alive; call
/// [`unsubscribe`](Self::unsubscribe) to stop receiving events.
pub struct Subscription<E: BusEvent> {
    id:  u64,
    bus: Weak<BusInner<E>>,
}

impl<E: BusEvent> Subscription<E> {
    pub fn unsubscribe(self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.subscribers.lock().retain(|s| s.id != self.id);
        }
    }
}

impl<E: BusEvent> EventBus<E> {
    /// `capacity` bounds the backlog of the broadcast side used by [`listen`](Self::listen).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                sender,
            }),
        }
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription<E>
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.add_subscriber(Some(kind), Arc::new(handler))
    }

    /// Receive every event regardless of its kind.
    pub fn subscribe_all<F>(&self, handler: F) -> Subscription<E>
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.add_subscriber(None, Arc::new(handler))
    }

    fn add_subscriber(&self, kind: Option<EventKind>, handler: Handler<E>) -> Subscription<E> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.lock().push(Subscriber { id, kind, handler });
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Async view of the bus. Like handlers, a stream only sees events published after it was created; a receiver
    /// falling behind by more than the configured capacity loses the overflow.
    pub fn listen(&self) -> BroadcastStream<E> {
        BroadcastStream::new(self.inner.sender.subscribe())
    }

    pub fn publish(&self, event: E) {
        let kind = event.kind();
        // Handlers run outside the lock so they are free to subscribe or unsubscribe.
        let handlers = self
            .inner
            .subscribers
            .lock()
            .iter()
            .filter(|s| s.kind.is_none_or(|k| k == kind))
            .map(|s| Arc::clone(&s.handler))
            .collect::<Vec<_>>();

        trace!(?kind, handlers = handlers.len(), "publishing");

        for handler in handlers {
            handler(&event);
        }

        // No listeners is not an error.
        let _ = self.inner.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}
