//! In-memory claim store.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::time::Instant;

use crate::cluster::{ClaimStore, Payload};
use crate::error::{Result, TribuneError};

/// Store operation, used for failure injection and call recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Incr,
    Expire,
    Delete,
    Push,
    Close,
}

#[derive(Debug)]
struct Counter {
    value: i64,
    expires_at: Option<Instant>,
}

impl Counter {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Default)]
struct StoreState {
    counters: HashMap<String, Counter>,
    lists: HashMap<String, Vec<Payload>>,
    failing: HashSet<StoreOp>,
    operations: Vec<(StoreOp, String)>,
    closed: bool,
}

impl StoreState {
    fn begin(&mut self, op: StoreOp, key: &str) -> Result<()> {
        if self.closed {
            return Err(TribuneError::StoreUnavailable("connection closed".into()));
        }
        if self.failing.contains(&op) {
            return Err(TribuneError::StoreUnavailable(format!(
                "injected {:?} failure",
                op
            )));
        }
        self.operations.push((op, key.to_string()));
        Ok(())
    }

    fn evict_expired(&mut self, key: &str) {
        let now = Instant::now();
        if self.counters.get(key).is_some_and(|c| c.is_expired(now)) {
            self.counters.remove(key);
        }
    }
}

/// Claim store backed by process memory.
///
/// Workers attach through `connect`, so every client contends for the same
/// beacon. Expiry is evaluated lazily against
/// `tokio::time::Instant`, so paused-clock tests can advance past a TTL.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    latency: Mutex<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a per-node client on this store.
    pub fn connect(self: &Arc<Self>) -> Arc<MemoryStoreClient> {
        Arc::new(MemoryStoreClient {
            store: Arc::clone(self),
            closed: AtomicBool::new(false),
        })
    }

    /// Make every subsequent call of `op` fail with `StoreUnavailable`.
    pub fn fail_on(&self, op: StoreOp) {
        self.state.lock().unwrap().failing.insert(op);
    }

    /// Undo `fail_on`.
    pub fn recover(&self, op: StoreOp) {
        self.state.lock().unwrap().failing.remove(&op);
    }

    /// Delay every operation by `latency` before it takes effect.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Current counter value, honoring expiry.
    pub fn value(&self, key: &str) -> Option<i64> {
        let mut state = self.state.lock().unwrap();
        state.evict_expired(key);
        state.counters.get(key).map(|c| c.value)
    }

    /// Remaining time-to-live of a counter, if one was applied.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut state = self.state.lock().unwrap();
        state.evict_expired(key);
        state
            .counters
            .get(key)
            .and_then(|c| c.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Snapshot of a durable list.
    pub fn list(&self, key: &str) -> Vec<Payload> {
        self.state
            .lock()
            .unwrap()
            .lists
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Remove and return a durable list in append order.
    pub fn take_list(&self, key: &str) -> Vec<Payload> {
        self.state
            .lock()
            .unwrap()
            .lists
            .remove(key)
            .unwrap_or_default()
    }

    /// Every successful operation, in call order.
    pub fn operations(&self) -> Vec<(StoreOp, String)> {
        self.state.lock().unwrap().operations.clone()
    }

    /// Number of successful calls of `op`.
    pub fn count(&self, op: StoreOp) -> usize {
        self.state
            .lock()
            .unwrap()
            .operations
            .iter()
            .filter(|(o, _)| *o == op)
            .count()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    async fn delay(&self) {
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

impl ClaimStore for MemoryStore {
    fn incr<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<i64>> {
        async move {
            self.delay().await;
            let mut state = self.state.lock().unwrap();
            state.begin(StoreOp::Incr, key)?;
            state.evict_expired(key);
            let counter = state.counters.entry(key.to_string()).or_insert(Counter {
                value: 0,
                expires_at: None,
            });
            counter.value += 1;
            Ok(counter.value)
        }
        .boxed()
    }

    fn expire<'a>(&'a self, key: &'a str, ttl: Duration) -> BoxFuture<'a, Result<()>> {
        async move {
            self.delay().await;
            let mut state = self.state.lock().unwrap();
            state.begin(StoreOp::Expire, key)?;
            state.evict_expired(key);
            if let Some(counter) = state.counters.get_mut(key) {
                counter.expires_at = Some(Instant::now() + ttl);
            }
            Ok(())
        }
        .boxed()
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            self.delay().await;
            let mut state = self.state.lock().unwrap();
            state.begin(StoreOp::Delete, key)?;
            state.counters.remove(key);
            Ok(())
        }
        .boxed()
    }

    fn push<'a>(&'a self, key: &'a str, payload: Payload) -> BoxFuture<'a, Result<()>> {
        async move {
            self.delay().await;
            let mut state = self.state.lock().unwrap();
            state.begin(StoreOp::Push, key)?;
            state.lists.entry(key.to_string()).or_default().push(payload);
            Ok(())
        }
        .boxed()
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        async move {
            let mut state = self.state.lock().unwrap();
            state.begin(StoreOp::Close, "")?;
            state.closed = true;
            Ok(())
        }
        .boxed()
    }
}

/// One node's connection to a shared `MemoryStore`.
///
/// Closing a client only affects that client, matching a per-node
/// connection to a shared server.
pub struct MemoryStoreClient {
    store: Arc<MemoryStore>,
    closed: AtomicBool,
}

impl MemoryStoreClient {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(TribuneError::StoreUnavailable("connection closed".into()));
        }
        Ok(())
    }
}

impl ClaimStore for MemoryStoreClient {
    fn incr<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<i64>> {
        async move {
            self.ensure_open()?;
            self.store.incr(key).await
        }
        .boxed()
    }

    fn expire<'a>(&'a self, key: &'a str, ttl: Duration) -> BoxFuture<'a, Result<()>> {
        async move {
            self.ensure_open()?;
            self.store.expire(key, ttl).await
        }
        .boxed()
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            self.ensure_open()?;
            self.store.delete(key).await
        }
        .boxed()
    }

    fn push<'a>(&'a self, key: &'a str, payload: Payload) -> BoxFuture<'a, Result<()>> {
        async move {
            self.ensure_open()?;
            self.store.push(key, payload).await
        }
        .boxed()
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        async move {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
        .boxed()
    }
}
