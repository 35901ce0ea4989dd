//! In-process publish/subscribe with per-target routing.
//!
//! Each subscription owns a bounded ring of pending events. Publishing
//! never blocks: when a subscriber's ring is full its oldest unread event
//! is dropped and the subscription's drop counter incremented. An optional
//! durable store journals every published event for cursor-based replay.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{Event, EventType};
use crate::domain::ports::{EventStore, ReplayedEvent};

/// Default per-subscription queue capacity.
pub const DEFAULT_BUFFER: usize = 256;

/// Counters exposed for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct EventBusStats {
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub subscriptions: usize,
}

struct SubscriberQueue {
    items: Mutex<VecDeque<Event>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl SubscriberQueue {
    fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Offer an event; drops the oldest queued item on overflow. Never blocks.
    fn offer(&self, event: Event) -> bool {
        let mut dropped = false;
        {
            let mut items = self.items.lock().expect("subscriber queue poisoned");
            if items.len() >= self.capacity {
                items.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                dropped = true;
            }
            items.push_back(event);
        }
        self.notify.notify_one();
        dropped
    }

    fn pop(&self) -> Option<Event> {
        self.items.lock().expect("subscriber queue poisoned").pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Pending items are discarded; wake anyone blocked in recv.
        self.items.lock().expect("subscriber queue poisoned").clear();
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct SubscriptionEntry {
    id: u64,
    target: String,
    types: Option<HashSet<EventType>>,
    queue: Arc<SubscriberQueue>,
}

struct BusInner {
    subscriptions: Mutex<Vec<SubscriptionEntry>>,
    next_id: AtomicU64,
    capacity: usize,
    store: Option<Arc<dyn EventStore>>,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// The in-process event bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscriptions: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
                store: None,
                published: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Attach a durable journal; every published event is appended to it.
    pub fn with_store(capacity: usize, store: Arc<dyn EventStore>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscriptions: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
                store: Some(store),
                published: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Register a subscription for `target`, optionally filtered to a set of
    /// event types. The returned handle unsubscribes on drop.
    pub fn subscribe(&self, target: impl Into<String>, types: Option<Vec<EventType>>) -> EventSubscription {
        self.subscribe_with_capacity(target, types, self.inner.capacity)
    }

    /// Like `subscribe` with an explicit queue capacity.
    pub fn subscribe_with_capacity(
        &self,
        target: impl Into<String>,
        types: Option<Vec<EventType>>,
        capacity: usize,
    ) -> EventSubscription {
        let target = target.into();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue::new(capacity.max(1)));
        let entry = SubscriptionEntry {
            id,
            target: target.clone(),
            types: types.map(|t| t.into_iter().collect()),
            queue: queue.clone(),
        };

        self.inner
            .subscriptions
            .lock()
            .expect("subscription registry poisoned")
            .push(entry);

        debug!(subscription = id, %target, "subscribed");

        EventSubscription { bus: Arc::downgrade(&self.inner), id, target, queue }
    }

    /// Publish an event to every matching live subscription, then journal it.
    /// Delivery is best-effort and never blocks the publisher.
    pub async fn publish(&self, event: Event) {
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        {
            let subscriptions = self
                .inner
                .subscriptions
                .lock()
                .expect("subscription registry poisoned");
            for entry in subscriptions.iter() {
                if !event.matches_target(&entry.target) {
                    continue;
                }
                if let Some(types) = &entry.types {
                    if !types.contains(&event.event_type) {
                        continue;
                    }
                }
                if entry.queue.offer(event.clone()) {
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                }
                self.inner.delivered.fetch_add(1, Ordering::Relaxed);
            }
        }

        if let Some(store) = &self.inner.store {
            if let Err(e) = store.append(&event).await {
                warn!(error = %e, event_id = %event.event_id, "failed to journal event");
            }
        }
    }

    /// Replay journaled events newer than `cursor` for a reconnecting
    /// subscriber. Empty when no durable store is configured.
    pub async fn replay(
        &self,
        cursor: i64,
        target: Option<&str>,
        limit: u32,
    ) -> DomainResult<Vec<ReplayedEvent>> {
        match &self.inner.store {
            Some(store) => store.replay_since(cursor, target, limit).await,
            None => Ok(Vec::new()),
        }
    }

    pub fn stats(&self) -> EventBusStats {
        EventBusStats {
            published: self.inner.published.load(Ordering::Relaxed),
            delivered: self.inner.delivered.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            subscriptions: self
                .inner
                .subscriptions
                .lock()
                .expect("subscription registry poisoned")
                .len(),
        }
    }
}

impl BusInner {
    fn remove(&self, id: u64) {
        let mut subscriptions = self.subscriptions.lock().expect("subscription registry poisoned");
        if let Some(pos) = subscriptions.iter().position(|s| s.id == id) {
            let entry = subscriptions.swap_remove(pos);
            entry.queue.close();
        }
    }
}

/// A live subscription handle. Dropping it unsubscribes.
pub struct EventSubscription {
    bus: std::sync::Weak<BusInner>,
    id: u64,
    target: String,
    queue: Arc<SubscriberQueue>,
}

impl EventSubscription {
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Events dropped from this subscription's queue due to overflow.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    /// Receive the next event, waiting if the queue is empty. Returns
    /// `None` once the subscription is closed.
    pub async fn recv(&self) -> Option<Event> {
        loop {
            if let Some(event) = self.queue.pop() {
                return Some(event);
            }
            if self.queue.is_closed() {
                return None;
            }
            self.queue.notify.notified().await;
        }
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Option<Event> {
        self.queue.pop()
    }

    /// Explicitly close and deregister.
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        } else {
            self.queue.close();
        }
    }
}
