//! Type-routed asynchronous event bus.
//!
//! Subscribers register for a concrete Rust type `T` and receive every event
//! dispatched as that type, delivered through a bounded, per-subscriber FIFO
//! queue. A publisher's `dispatch` call fans out to every matching subscriber
//! in parallel and returns once all of them have either accepted the event or
//! a shared deadline has elapsed — a slow or dead subscriber never blocks the
//! publisher or its siblings.
//!
//! Rust has no runtime subtyping for plain `struct`/`enum` payloads, so
//! "subscribe by interface" (routing concrete events to subscribers of a
//! shared shape) is realized with the [`Notification`] marker trait:
//! publishing any `T: Notification` also fans out to subscribers of
//! `Arc<dyn Notification>`.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::warn;

mod notification;
mod timestamp;

pub use notification::{Notification, NotificationCategory};
pub use timestamp::Timestamp;

/// Default bound for a subscriber's queue (§4.1 "Queue sizing").
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;
/// Bound used for internal control-plane subscriptions (supervisor, controller).
pub const CONTROL_QUEUE_CAPACITY: usize = 20;
/// Default global dispatch deadline.
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

type BoxedEvent = Box<dyn Any + Send>;

struct Slot {
    id: u64,
    tx: mpsc::Sender<BoxedEvent>,
}

#[derive(Default)]
struct Handlers {
    by_type: HashMap<TypeId, Vec<Slot>>,
}

struct Inner {
    handlers: RwLock<Handlers>,
    next_id: AtomicU64,
    dispatch_timeout: Duration,
}

/// The event bus itself. Cheaply cloneable; all clones share the same
/// subscriber table.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<Inner>,
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("dispatch_timeout", &self.inner.dispatch_timeout)
            .finish()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(DEFAULT_DISPATCH_TIMEOUT)
    }
}

impl Bus {
    pub fn new(dispatch_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                handlers: RwLock::new(Handlers::default()),
                next_id: AtomicU64::new(0),
                dispatch_timeout,
            }),
        }
    }

    /// Register a subscription for events of exact type `T`.
    pub fn subscribe<T>(&self) -> Subscription<T>
    where
        T: Send + 'static,
    {
        self.subscribe_with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn subscribe_with_capacity<T>(&self, capacity: usize) -> Subscription<T>
    where
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let type_id = TypeId::of::<T>();
        self.inner
            .handlers
            .write()
            .expect("event bus handler table poisoned")
            .by_type
            .entry(type_id)
            .or_default()
            .push(Slot { id, tx });

        Subscription {
            bus: self.inner.clone(),
            type_id,
            id,
            rx: Some(rx),
            _marker: std::marker::PhantomData,
        }
    }

    /// Subscribe to every event published through [`Bus::notify`], regardless
    /// of its concrete type, as long as it implements [`Notification`].
    pub fn subscribe_notifications(&self) -> Subscription<Arc<dyn Notification>> {
        self.subscribe_with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Dispatch a concrete event to every subscriber of exactly type `T`.
    ///
    /// Returns once every matching subscriber has accepted the event or the
    /// dispatch deadline has elapsed, whichever comes first.
    pub async fn dispatch<T>(&self, event: T)
    where
        T: Clone + Send + Sync + 'static,
    {
        self.dispatch_as(TypeId::of::<T>(), event).await;
    }

    /// Publish a [`Notification`]-implementing event both under its own
    /// concrete type and under the shared `Arc<dyn Notification>` channel.
    pub async fn notify<T>(&self, event: T)
    where
        T: Notification + Clone + Send + Sync + 'static,
    {
        let boxed: Arc<dyn Notification> = Arc::new(event.clone());
        self.dispatch(event).await;
        self.dispatch_as(TypeId::of::<Arc<dyn Notification>>(), boxed)
            .await;
    }

    async fn dispatch_as<T>(&self, type_id: TypeId, event: T)
    where
        T: Clone + Send + Sync + 'static,
    {
        let slots: Vec<(u64, mpsc::Sender<BoxedEvent>)> = {
            let handlers = self
                .inner
                .handlers
                .read()
                .expect("event bus handler table poisoned");
            match handlers.by_type.get(&type_id) {
                Some(v) => v.iter().map(|s| (s.id, s.tx.clone())).collect(),
                None => return,
            }
        };

        if slots.is_empty() {
            return;
        }

        let deadline = self.inner.dispatch_timeout;
        let mut tasks = Vec::with_capacity(slots.len());
        for (id, tx) in slots {
            let payload: BoxedEvent = Box::new(event.clone());
            tasks.push(tokio::spawn(async move {
                let dropped = tokio::time::timeout(deadline, tx.send(payload))
                    .await
                    .is_err()
                    || tx.is_closed();
                (id, dropped)
            }));
        }

        let mut dead = Vec::new();
        for task in tasks {
            if let Ok((id, dropped)) = task.await {
                if dropped {
                    warn!(subscriber = id, "event bus: dropped event for subscriber");
                    dead.push(id);
                }
            }
        }

        if !dead.is_empty() {
            self.prune(type_id, &dead);
        }
    }

    fn prune(&self, type_id: TypeId, dead_ids: &[u64]) {
        let mut handlers = self
            .inner
            .handlers
            .write()
            .expect("event bus handler table poisoned");
        if let Some(slots) = handlers.by_type.get_mut(&type_id) {
            slots.retain(|s| !(s.tx.is_closed() && dead_ids.contains(&s.id)));
        }
    }
}

/// A live registration for events of type `T`. Dropping it (or calling
/// [`Subscription::cancel`] explicitly) guarantees no further event is
/// delivered to its queue.
pub struct Subscription<T> {
    bus: Arc<Inner>,
    type_id: TypeId,
    id: u64,
    rx: Option<mpsc::Receiver<BoxedEvent>>,
    _marker: std::marker::PhantomData<T>,
}

impl<T: Send + 'static> Subscription<T> {
    /// Receive the next event, in FIFO order relative to any single publisher.
    pub async fn recv(&mut self) -> Option<T> {
        let boxed = self.rx.as_mut()?.recv().await?;
        Some(*boxed.downcast::<T>().expect("event bus type mismatch"))
    }

    pub fn try_recv(&mut self) -> Result<T, mpsc::error::TryRecvError> {
        let boxed = self
            .rx
            .as_mut()
            .ok_or(mpsc::error::TryRecvError::Disconnected)?
            .try_recv()?;
        Ok(*boxed.downcast::<T>().expect("event bus type mismatch"))
    }

    /// Explicitly cancel the subscription. Equivalent to dropping it.
    pub fn cancel(self) {
        drop(self);
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        let mut handlers = self
            .bus
            .handlers
            .write()
            .expect("event bus handler table poisoned");
        if let Some(slots) = handlers.by_type.get_mut(&self.type_id) {
            let id = self.id;
            slots.retain(|s| s.id != id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Ping(u32);

    #[tokio::test]
    async fn subscription_receives_events_in_order() {
        let bus = Bus::default();
        let mut sub = bus.subscribe::<Ping>();

        bus.dispatch(Ping(1)).await;
        bus.dispatch(Ping(2)).await;
        bus.dispatch(Ping(3)).await;

        assert_eq!(sub.recv().await, Some(Ping(1)));
        assert_eq!(sub.recv().await, Some(Ping(2)));
        assert_eq!(sub.recv().await, Some(Ping(3)));
    }

    #[tokio::test]
    async fn cancel_stops_delivery() {
        let bus = Bus::default();
        let sub = bus.subscribe::<Ping>();
        sub.cancel();

        bus.dispatch(Ping(1)).await;

        let mut sub2 = bus.subscribe::<Ping>();
        bus.dispatch(Ping(2)).await;
        assert_eq!(sub2.recv().await, Some(Ping(2)));
    }

    #[tokio::test]
    async fn drop_also_cancels() {
        let bus = Bus::default();
        {
            let _sub = bus.subscribe::<Ping>();
        }
        assert_eq!(
            bus.inner
                .handlers
                .read()
                .unwrap()
                .by_type
                .get(&TypeId::of::<Ping>())
                .map(|v| v.len())
                .unwrap_or(0),
            0
        );
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_block_others() {
        let bus = Bus::new(Duration::from_millis(50));
        let _never_reads = bus.subscribe_with_capacity::<Ping>(1);
        let mut fast = bus.subscribe::<Ping>();

        // Fill the slow subscriber's queue, then dispatch once more so its
        // send must time out.
        bus.dispatch(Ping(0)).await;
        let started = std::time::Instant::now();
        bus.dispatch(Ping(1)).await;
        assert!(started.elapsed() < Duration::from_secs(1));

        assert_eq!(fast.recv().await, Some(Ping(0)));
        assert_eq!(fast.recv().await, Some(Ping(1)));
    }

    #[tokio::test]
    async fn notify_reaches_both_concrete_and_trait_subscribers() {
        use std::sync::atomic::AtomicBool;

        #[derive(Clone)]
        struct Announce(&'static str);
        impl Notification for Announce {
            fn category(&self) -> NotificationCategory {
                NotificationCategory::Status
            }
            fn message(&self) -> String {
                self.0.to_string()
            }
        }

        let bus = Bus::default();
        let mut concrete = bus.subscribe::<Announce>();
        let mut generic = bus.subscribe_notifications();

        bus.notify(Announce("hello")).await;

        let seen_concrete = concrete.recv().await;
        assert!(matches!(seen_concrete, Some(Announce(s)) if s == "hello"));

        let seen_generic = generic.recv().await.unwrap();
        assert_eq!(seen_generic.message(), "hello");

        let _unused = AtomicBool::new(false); // silence unused-import in some cfgs
    }
}
