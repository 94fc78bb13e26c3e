pub mod pg;
pub mod worker;

pub use pg::{Database, PgClaimStore, PgHeartbeat, PgMessageBus};
pub use worker::{ElectionOutcome, ErrorReporter, FatalReceiver, SkipReason, Worker};
