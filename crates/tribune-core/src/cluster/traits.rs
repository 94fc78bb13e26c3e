use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use super::node::NodeId;
use crate::error::Result;

/// Opaque message payload carried on a topic or stored in an error list.
pub type Payload = String;

/// Callback receiving the speaker's liveness from a monitoring heartbeat.
pub type LivenessCallback = Arc<dyn Fn(bool) -> BoxFuture<'static, ()> + Send + Sync>;

/// Callback receiving each payload delivered on a subscribed topic.
pub type InboundHandler = Arc<dyn Fn(Payload) -> BoxFuture<'static, ()> + Send + Sync>;

/// Shared key-value store offering the atomic operations the election needs.
///
/// Every contending node talks to the same key namespace. Keys are only ever
/// mutated through `incr` and `delete`; no caller sets an arbitrary value.
pub trait ClaimStore: Send + Sync + 'static {
    /// Atomically increment `key`, creating it at 1 if absent, and return the new value.
    fn incr<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<i64>>;

    /// Apply a time-to-live to `key`.
    fn expire<'a>(&'a self, key: &'a str, ttl: Duration) -> BoxFuture<'a, Result<()>>;

    /// Delete `key`. Deleting an absent key succeeds.
    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Append a payload to the durable list stored under `key`.
    fn push<'a>(&'a self, key: &'a str, payload: Payload) -> BoxFuture<'a, Result<()>>;

    /// Close the underlying connection.
    fn close(&self) -> BoxFuture<'_, Result<()>>;
}

/// Liveness channel for the speaker role.
///
/// A channel is either signaling (advertising this node as alive) or
/// monitoring (reporting the speaker's liveness to a callback). Entering one
/// mode cancels the other. Implementations must not invoke the callback
/// before `monitoring_mode` returns.
pub trait HeartbeatChannel: Send + Sync + 'static {
    /// Start advertising this node as alive.
    fn signaling_mode(&self) -> BoxFuture<'_, Result<()>>;

    /// Start monitoring the speaker, reporting liveness to `on_status`.
    fn monitoring_mode(&self, on_status: LivenessCallback) -> BoxFuture<'_, Result<()>>;

    /// Emit a single "I am alive" signal.
    fn signal(&self) -> BoxFuture<'_, Result<()>>;

    /// Stop signaling and monitoring.
    fn end(&self) -> BoxFuture<'_, Result<()>>;
}

/// Topic-based publish/subscribe plus durable list draining.
///
/// A bus client holds at most one handler per topic: subscribing again
/// replaces the previous handler. Implementations must not invoke a handler
/// before `subscribe` returns.
pub trait MessageBus: Send + Sync + 'static {
    fn subscribe<'a>(&'a self, topic: &'a str, handler: InboundHandler)
        -> BoxFuture<'a, Result<()>>;

    /// Cancel the subscription on `topic`. Unsubscribing an unknown topic succeeds.
    fn unsubscribe<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, Result<()>>;

    fn publish<'a>(&'a self, topic: &'a str, payload: Payload) -> BoxFuture<'a, Result<()>>;

    /// Read and clear the list under `key`, returning items in append order.
    fn drain_list<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<Payload>>>;

    /// Tear down every subscription held by this client.
    fn end(&self) -> BoxFuture<'_, Result<()>>;
}

/// The collaborators a worker is wired to.
#[derive(Clone)]
pub struct Backend {
    pub store: Arc<dyn ClaimStore>,
    pub bus: Arc<dyn MessageBus>,
    pub heartbeat: Arc<dyn HeartbeatChannel>,
}

impl Backend {
    pub fn new(
        store: Arc<dyn ClaimStore>,
        bus: Arc<dyn MessageBus>,
        heartbeat: Arc<dyn HeartbeatChannel>,
    ) -> Self {
        Self {
            store,
            bus,
            heartbeat,
        }
    }
}

/// Last observed lifesign for a named signal.
#[derive(Debug, Clone)]
pub struct LifesignInfo {
    /// Signal name.
    pub name: String,
    /// Node that emitted the latest signal.
    pub node_id: NodeId,
    /// When the latest signal was emitted.
    pub last_signal: DateTime<Utc>,
}

impl LifesignInfo {
    /// Whether the signal is recent enough to consider its emitter alive.
    pub fn is_alive(&self, dead_threshold: Duration) -> bool {
        let cutoff = chrono::Duration::from_std(dead_threshold)
            .ok()
            .and_then(|threshold| Utc::now().checked_sub_signed(threshold));
        match cutoff {
            Some(cutoff) => self.last_signal > cutoff,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifesign_validity() {
        let fresh = LifesignInfo {
            name: "speaker-lifesign".into(),
            node_id: NodeId::new(),
            last_signal: Utc::now(),
        };
        assert!(fresh.is_alive(Duration::from_secs(5)));

        let stale = LifesignInfo {
            last_signal: Utc::now() - chrono::Duration::seconds(30),
            ..fresh
        };
        assert!(!stale.is_alive(Duration::from_secs(5)));
    }
}
