//! A process-singleton typed publish/subscribe bus.
//!
//! Subscribers register a handler per event kind (a concrete Rust type).
//! `publish` completes once every handler registered for that type has run,
//! in registration order; a handler's error is logged against the event
//! kind and never blocks or cancels the others. A second subscription mode
//! hands out a bounded queue (a `tokio::sync::broadcast` receiver) for
//! callers that want to drain events themselves instead of registering a
//! callback; a slow queue drops the oldest events and counts the drop.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::broadcast;

use room_presence_shared::RoomPresenceError;

const DEFAULT_QUEUE_CAPACITY: usize = 1024;

type BoxFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

trait ErasedHandler: Send + Sync {
    fn call(&self, event: Box<dyn Any + Send + Sync>) -> BoxFuture<'static>;
}

struct HandlerFn<E, F> {
    f: F,
    _marker: PhantomData<fn(E)>,
}

impl<E, F, Fut> ErasedHandler for HandlerFn<E, F>
where
    E: Send + Sync + 'static,
    F: Fn(E) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), RoomPresenceError>> + Send + 'static,
{
    fn call(&self, event: Box<dyn Any + Send + Sync>) -> BoxFuture<'static> {
        let event = *event
            .downcast::<E>()
            .expect("event-bus dispatched event to handler registered for a different type");
        let fut = (self.f)(event);
        Box::pin(async move {
            if let Err(err) = fut.await {
                tracing::error!(
                    event_kind = std::any::type_name::<E>(),
                    error = %err,
                    "event handler failed"
                );
            }
        })
    }
}

struct Registration {
    id: u64,
    handler: Arc<dyn ErasedHandler>,
}

/// Process-singleton publish/subscribe bus. Construct once at bootstrap and
/// share an `Arc<EventBus>` with every component.
#[derive(Default)]
pub struct EventBus {
    handlers: Mutex<HashMap<TypeId, Vec<Registration>>>,
    broadcasters: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register an instance subscription. The returned guard must be kept
    /// alive for the subscription to remain active; dropping it deregisters
    /// the handler.
    pub fn subscribe<E, F, Fut>(self: &Arc<Self>, handler: F) -> SubscriptionGuard
    where
        E: Send + Sync + 'static,
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RoomPresenceError>> + Send + 'static,
    {
        let type_id = TypeId::of::<E>();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let erased: Arc<dyn ErasedHandler> = Arc::new(HandlerFn {
            f: handler,
            _marker: PhantomData,
        });

        self.handlers
            .lock()
            .unwrap()
            .entry(type_id)
            .or_default()
            .push(Registration { id, handler: erased });

        SubscriptionGuard {
            bus: Arc::downgrade(self),
            type_id,
            id,
        }
    }

    /// Publish an event to every instance subscriber registered for `E`, in
    /// registration order, then fan it out to any iterator subscribers.
    /// Resolves once every handler has completed.
    pub async fn publish<E>(&self, event: E)
    where
        E: Clone + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<E>();

        let handlers: Vec<Arc<dyn ErasedHandler>> = {
            let map = self.handlers.lock().unwrap();
            map.get(&type_id)
                .map(|regs| regs.iter().map(|r| r.handler.clone()).collect())
                .unwrap_or_default()
        };

        for handler in handlers {
            let boxed: Box<dyn Any + Send + Sync> = Box::new(event.clone());
            handler.call(boxed).await;
        }

        let sender = {
            let map = self.broadcasters.lock().unwrap();
            map.get(&type_id)
                .and_then(|any| any.downcast_ref::<broadcast::Sender<E>>())
                .cloned()
        };
        if let Some(sender) = sender {
            // No active receivers is not an error: the event simply has no
            // iterator subscriber right now.
            let _ = sender.send(event);
        }
    }

    /// Acquire a bounded iterator subscription for event kind `E`.
    pub fn subscribe_queue<E>(&self, capacity: usize) -> EventQueue<E>
    where
        E: Clone + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<E>();
        let mut map = self.broadcasters.lock().unwrap();
        let entry = map.entry(type_id).or_insert_with(|| {
            let (tx, _rx) = broadcast::channel::<E>(capacity.max(1));
            Box::new(tx)
        });
        let sender = entry
            .downcast_ref::<broadcast::Sender<E>>()
            .expect("broadcaster type mismatch for event kind")
            .clone();
        let receiver = sender.subscribe();
        EventQueue {
            receiver,
            dropped: 0,
        }
    }
}

/// Deregisters an instance subscription when dropped.
pub struct SubscriptionGuard {
    bus: Weak<EventBus>,
    type_id: TypeId,
    id: u64,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            if let Some(regs) = bus.handlers.lock().unwrap().get_mut(&self.type_id) {
                regs.retain(|r| r.id != self.id);
            }
        }
    }
}

/// A bounded, drop-oldest queue over one event kind.
pub struct EventQueue<E> {
    receiver: broadcast::Receiver<E>,
    dropped: u64,
}

impl<E: Clone + Send + 'static> EventQueue<E> {
    /// Await the next event, in publish order. Returns `None` once the bus
    /// (and every sender clone) has been dropped.
    pub async fn next(&mut self) -> Option<E> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.dropped += skipped;
                    tracing::warn!(
                        event_kind = std::any::type_name::<E>(),
                        skipped,
                        total_dropped = self.dropped,
                        "event queue overflowed, oldest events dropped"
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Number of events dropped due to queue overflow over this queue's
    /// lifetime.
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone)]
    struct Ping(u32);

    #[derive(Clone)]
    struct Pong(u32);

    #[tokio::test]
    async fn instance_subscribers_run_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let order_a = order.clone();
        let _guard_a = bus.subscribe::<Ping, _, _>(move |_| {
            let order = order_a.clone();
            async move {
                order.lock().unwrap().push('a');
                Ok(())
            }
        });

        let order_b = order.clone();
        let _guard_b = bus.subscribe::<Ping, _, _>(move |_| {
            let order = order_b.clone();
            async move {
                order.lock().unwrap().push('b');
                Ok(())
            }
        });

        bus.publish(Ping(1)).await;
        assert_eq!(*order.lock().unwrap(), vec!['a', 'b']);
    }

    #[tokio::test]
    async fn dropping_the_guard_deregisters_the_handler() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_clone = calls.clone();
        let guard = bus.subscribe::<Ping, _, _>(move |_| {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        bus.publish(Ping(1)).await;
        drop(guard);
        bus.publish(Ping(2)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn a_failing_handler_does_not_block_the_next_one() {
        let bus = EventBus::new();
        let ran = Arc::new(AtomicUsize::new(0));

        let _guard_fail = bus.subscribe::<Ping, _, _>(|_| async {
            Err(RoomPresenceError::Inference("boom".into()))
        });

        let ran_clone = ran.clone();
        let _guard_ok = bus.subscribe::<Ping, _, _>(move |_| {
            let ran = ran_clone.clone();
            async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        bus.publish(Ping(1)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_event_kinds_do_not_cross_talk() {
        let bus = EventBus::new();
        let mut pings = bus.subscribe_queue::<Ping>(8);
        let mut pongs = bus.subscribe_queue::<Pong>(8);

        bus.publish(Ping(1)).await;
        bus.publish(Pong(2)).await;

        assert_eq!(pings.next().await.map(|p| p.0), Some(1));
        assert_eq!(pongs.next().await.map(|p| p.0), Some(2));
    }

    #[tokio::test]
    async fn iterator_subscription_drops_oldest_on_overflow() {
        let bus = EventBus::new();
        let mut queue = bus.subscribe_queue::<Ping>(2);

        for i in 0..5 {
            bus.publish(Ping(i)).await;
        }

        // Only the most recent `capacity` events survive; the rest were
        // dropped and counted.
        let mut seen = Vec::new();
        loop {
            match queue.receiver.try_recv() {
                Ok(event) => seen.push(event.0),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        assert_eq!(seen, vec![3, 4]);
    }
}
