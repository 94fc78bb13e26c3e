//! In-memory collaborators for exercising workers without a database.
//!
//! A `MemoryStore` plays the shared beacon store, a `MemoryBroker` the
//! shared pub/sub network, and each node gets its own store client, bus
//! client and `MockHeartbeat`.
//!
//! # Example
//!
//! ```ignore
//! let cluster = MemoryCluster::new();
//! let node = cluster.node();
//! let worker = Worker::new(NodeId::new(), node.backend.clone());
//! worker.start().await?;
//! node.heartbeat.report(false).await;
//! ```

mod bus;
mod heartbeat;
mod store;

pub use bus::{MemoryBroker, MemoryBus};
pub use heartbeat::{HeartbeatMode, MockHeartbeat};
pub use store::{MemoryStore, MemoryStoreClient, StoreOp};

use std::sync::Arc;
use std::time::Duration;

use crate::cluster::Backend;

/// Default wait for asynchronous test conditions.
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A shared store and broker that several test nodes attach to.
pub struct MemoryCluster {
    pub store: Arc<MemoryStore>,
    pub broker: Arc<MemoryBroker>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let broker = MemoryBroker::new(Arc::clone(&store));
        Self { store, broker }
    }

    /// Attach a new node with its own connections.
    pub fn node(&self) -> TestNode {
        let store = self.store.connect();
        let bus = self.broker.connect();
        let heartbeat = Arc::new(MockHeartbeat::new());
        let backend = Backend::new(store.clone(), bus.clone(), heartbeat.clone());
        TestNode {
            backend,
            store,
            bus,
            heartbeat,
        }
    }
}

/// One node's collaborators, kept concrete for assertions.
pub struct TestNode {
    pub backend: Backend,
    pub store: Arc<MemoryStoreClient>,
    pub bus: Arc<MemoryBus>,
    pub heartbeat: Arc<MockHeartbeat>,
}

/// Poll `condition` until it holds or `DEFAULT_TEST_TIMEOUT` elapses.
pub async fn wait_until<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + DEFAULT_TEST_TIMEOUT;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
