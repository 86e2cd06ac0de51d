use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use super::handler::EventHandler;
use super::{BusEvent, Topic};

struct Registration {
    id: u64,
    mailbox: mpsc::UnboundedSender<BusEvent>,
}

struct Inner {
    /// topic -> registrations, in subscription order
    subscribers: RwLock<HashMap<Topic, Vec<Registration>>>,
    next_id: AtomicU64,
}

impl Inner {
    fn read(&self) -> RwLockReadGuard<'_, HashMap<Topic, Vec<Registration>>> {
        self.subscribers.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Topic, Vec<Registration>>> {
        self.subscribers.write().unwrap_or_else(|e| e.into_inner())
    }

    fn remove(&self, id: u64, topics: &[Topic]) {
        let mut subscribers = self.write();
        for topic in topics {
            if let Some(registrations) = subscribers.get_mut(topic) {
                registrations.retain(|r| r.id != id);
                if registrations.is_empty() {
                    subscribers.remove(topic);
                }
            }
        }
    }
}

/// In-process publish/subscribe bus
///
/// Every subscription owns a mailbox drained by its own tokio task:
/// - `publish` only enqueues, so it never blocks and never fails
/// - a slow, failing or panicking handler only affects its own mailbox
/// - events published in sequence by one task reach each handler in that order
///
/// There is no ordering across subscribers, and no persistence.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register `handler` for every future event on `topic`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self, topic: Topic, handler: Arc<dyn EventHandler>) -> Subscription {
        self.subscribe_topics(&[topic], handler)
    }

    /// Register one handler for several topics, sharing a single mailbox.
    ///
    /// Events on all of these topics reach the handler in publish order.
    pub fn subscribe_topics(&self, topics: &[Topic], handler: Arc<dyn EventHandler>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::unbounded_channel::<BusEvent>();

        let mut unique: Vec<Topic> = Vec::with_capacity(topics.len());
        for topic in topics {
            if !unique.contains(topic) {
                unique.push(*topic);
            }
        }
        let topics = unique;

        {
            let mut subscribers = self.inner.write();
            for topic in &topics {
                subscribers.entry(*topic).or_default().push(Registration {
                    id,
                    mailbox: tx.clone(),
                });
            }
        }
        drop(tx);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let topic = event.topic();
                match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(subscription_id = id, topic = %topic, error = %e, "event handler failed");
                    }
                    Err(_) => {
                        error!(subscription_id = id, topic = %topic, "event handler panicked");
                    }
                }
            }
            debug!(subscription_id = id, "subscription closed");
        });

        debug!(subscription_id = id, topics = ?topics, "subscribed");

        Subscription {
            id,
            topics,
            bus: Arc::downgrade(&self.inner),
            detached: false,
        }
    }

    /// Dispatch `event` to every handler currently registered for its topic.
    ///
    /// Returns the number of handlers the event was queued for. Zero
    /// subscribers is a no-op.
    pub fn publish(&self, event: BusEvent) -> usize {
        let topic = event.topic();
        let mailboxes: Vec<mpsc::UnboundedSender<BusEvent>> = match self.inner.read().get(&topic) {
            Some(registrations) => registrations.iter().map(|r| r.mailbox.clone()).collect(),
            None => return 0,
        };

        let delivered = mailboxes
            .iter()
            .filter(|mailbox| mailbox.send(event.clone()).is_ok())
            .count();

        debug!(topic = %topic, chat_id = %event.chat_id(), delivered, "published event");
        delivered
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.inner.read().get(&topic).map(Vec::len).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Owned, revocable handle for a registered handler.
///
/// Dropping it (or calling [`Subscription::unsubscribe`]) removes the handler;
/// events already queued are still delivered. Call [`Subscription::detach`] to
/// keep the handler for the bus's lifetime instead.
#[must_use = "dropping a Subscription unsubscribes the handler"]
pub struct Subscription {
    id: u64,
    topics: Vec<Topic>,
    bus: Weak<Inner>,
    detached: bool,
}

impl Subscription {
    pub fn topics(&self) -> &[Topic] {
        &self.topics
    }

    pub fn unsubscribe(self) {
        drop(self);
    }

    pub fn detach(mut self) {
        self.detached = true;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        if let Some(inner) = self.bus.upgrade() {
            inner.remove(self.id, &self.topics);
            debug!(subscription_id = self.id, "unsubscribed");
        }
    }
}
