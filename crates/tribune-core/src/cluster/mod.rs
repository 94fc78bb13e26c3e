mod mode;
mod node;
mod traits;

pub use mode::WorkerMode;
pub use node::NodeId;
pub use traits::{
    Backend, ClaimStore, HeartbeatChannel, InboundHandler, LifesignInfo, LivenessCallback,
    MessageBus, Payload,
};
