//! Tribune - speaker election for a pool of identical workers
//!
//! Every worker listens on a shared topic while one of them, the speaker,
//! broadcasts on it. When the speaker's lifesign stops, the listeners race
//! for a shared beacon and the single winner takes over.

mod logging;
mod runtime;

#[doc(hidden)]
pub use tribune_core;
pub use tribune_runtime;

pub use logging::init_tracing;
pub use runtime::prelude;
pub use runtime::{Tribune, TribuneBuilder};

#[cfg(feature = "testing")]
pub use tribune_core::testing;
