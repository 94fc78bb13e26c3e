pub mod cluster;
pub mod config;
pub mod error;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cluster::{
    Backend, ClaimStore, HeartbeatChannel, InboundHandler, LivenessCallback, MessageBus, NodeId,
    Payload, WorkerMode,
};
pub use config::TribuneConfig;
pub use error::{Result, TribuneError};
