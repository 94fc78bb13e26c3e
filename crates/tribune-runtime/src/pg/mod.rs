//! PostgreSQL-backed collaborators.
//!
//! All three share one pool: the beacon and error lists live in tables, the
//! topic rides on LISTEN/NOTIFY, and the lifesign is a timestamped row.

mod bus;
mod heartbeat;
mod pool;
mod schema;
mod store;

pub use bus::PgMessageBus;
pub use heartbeat::PgHeartbeat;
pub use pool::Database;
pub use schema::ensure_schema;
pub use store::PgClaimStore;

use std::sync::Arc;

use tribune_core::cluster::{Backend, NodeId};
use tribune_core::config::HeartbeatConfig;

/// Build a worker backend whose collaborators all use `db`.
pub fn backend(db: &Database, node_id: NodeId, heartbeat: HeartbeatConfig) -> Backend {
    let pool = db.pool().clone();
    Backend::new(
        Arc::new(PgClaimStore::new(pool.clone())),
        Arc::new(PgMessageBus::new(pool.clone())),
        Arc::new(PgHeartbeat::new(pool, node_id, heartbeat)),
    )
}
