//! In-memory message bus.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt};

use super::store::MemoryStore;
use crate::cluster::{InboundHandler, MessageBus, Payload};
use crate::error::{Result, TribuneError};

/// Shared network connecting every `MemoryBus` client.
///
/// Durable lists live in the attached `MemoryStore`, so payloads pushed by a
/// worker's store are drained through its bus, as they would be on a shared
/// backend.
pub struct MemoryBroker {
    store: Arc<MemoryStore>,
    subscriptions: Mutex<HashMap<(usize, String), InboundHandler>>,
    published: Mutex<Vec<(String, Payload)>>,
    next_client: AtomicUsize,
}

impl MemoryBroker {
    pub fn new(store: Arc<MemoryStore>) -> Arc<Self> {
        Arc::new(Self {
            store,
            subscriptions: Mutex::new(HashMap::new()),
            published: Mutex::new(Vec::new()),
            next_client: AtomicUsize::new(0),
        })
    }

    /// Open a new client on this broker.
    pub fn connect(self: &Arc<Self>) -> Arc<MemoryBus> {
        Arc::new(MemoryBus {
            id: self.next_client.fetch_add(1, Ordering::SeqCst),
            broker: Arc::clone(self),
            ended: AtomicBool::new(false),
        })
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Number of clients subscribed to `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscriptions
            .lock()
            .unwrap()
            .keys()
            .filter(|(_, t)| t == topic)
            .count()
    }

    /// Every payload published on `topic`, in publish order.
    pub fn published(&self, topic: &str) -> Vec<Payload> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Deliver `payload` to every subscriber of `topic`, awaiting each handler.
    pub async fn deliver(&self, topic: &str, payload: Payload) {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload.clone()));

        let handlers: Vec<InboundHandler> = {
            let subscriptions = self.subscriptions.lock().unwrap();
            let mut matching: Vec<_> = subscriptions
                .iter()
                .filter(|((_, t), _)| t == topic)
                .map(|((client, _), handler)| (*client, Arc::clone(handler)))
                .collect();
            matching.sort_by_key(|(client, _)| *client);
            matching.into_iter().map(|(_, handler)| handler).collect()
        };

        for handler in handlers {
            handler(payload.clone()).await;
        }
    }
}

/// A single client connection to a `MemoryBroker`.
pub struct MemoryBus {
    id: usize,
    broker: Arc<MemoryBroker>,
    ended: AtomicBool,
}

impl MemoryBus {
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Whether this client holds a subscription on `topic`.
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.broker
            .subscriptions
            .lock()
            .unwrap()
            .contains_key(&(self.id, topic.to_string()))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_ended() {
            return Err(TribuneError::Bus("client ended".into()));
        }
        Ok(())
    }
}

impl MessageBus for MemoryBus {
    fn subscribe<'a>(
        &'a self,
        topic: &'a str,
        handler: InboundHandler,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            self.ensure_open()?;
            self.broker
                .subscriptions
                .lock()
                .unwrap()
                .insert((self.id, topic.to_string()), handler);
            Ok(())
        }
        .boxed()
    }

    fn unsubscribe<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            self.ensure_open()?;
            self.broker
                .subscriptions
                .lock()
                .unwrap()
                .remove(&(self.id, topic.to_string()));
            Ok(())
        }
        .boxed()
    }

    fn publish<'a>(&'a self, topic: &'a str, payload: Payload) -> BoxFuture<'a, Result<()>> {
        async move {
            self.ensure_open()?;
            self.broker.deliver(topic, payload).await;
            Ok(())
        }
        .boxed()
    }

    fn drain_list<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<Payload>>> {
        async move {
            self.ensure_open()?;
            Ok(self.broker.store.take_list(key))
        }
        .boxed()
    }

    fn end(&self) -> BoxFuture<'_, Result<()>> {
        async move {
            self.ended.store(true, Ordering::SeqCst);
            self.broker
                .subscriptions
                .lock()
                .unwrap()
                .retain(|(client, _), _| *client != self.id);
            Ok(())
        }
        .boxed()
    }
}
