//! Scriptable heartbeat channel.

use std::sync::Mutex;

use futures::future::{BoxFuture, FutureExt};

use crate::cluster::{HeartbeatChannel, LivenessCallback};
use crate::error::{Result, TribuneError};

/// Mode a `MockHeartbeat` is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatMode {
    Idle,
    Signaling,
    Monitoring,
    Ended,
}

struct MockState {
    mode: HeartbeatMode,
    callback: Option<LivenessCallback>,
    last_callback: Option<LivenessCallback>,
    signals: usize,
    registrations: usize,
    fail_signal: bool,
}

/// Heartbeat channel driven by the test instead of a clock.
///
/// `report` plays the role of the monitor noticing the speaker's state.
pub struct MockHeartbeat {
    state: Mutex<MockState>,
}

impl Default for MockHeartbeat {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHeartbeat {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                mode: HeartbeatMode::Idle,
                callback: None,
                last_callback: None,
                signals: 0,
                registrations: 0,
                fail_signal: false,
            }),
        }
    }

    pub fn mode(&self) -> HeartbeatMode {
        self.state.lock().unwrap().mode
    }

    /// Number of single `signal` calls received.
    pub fn signals(&self) -> usize {
        self.state.lock().unwrap().signals
    }

    /// Number of `monitoring_mode` registrations received.
    pub fn registrations(&self) -> usize {
        self.state.lock().unwrap().registrations
    }

    /// Make `signal` fail until called again with `false`.
    pub fn fail_signal(&self, fail: bool) {
        self.state.lock().unwrap().fail_signal = fail;
    }

    /// Report the speaker's liveness to the active monitor.
    ///
    /// Returns `false` when no monitor is registered.
    pub async fn report(&self, alive: bool) -> bool {
        let callback = self.state.lock().unwrap().callback.clone();
        match callback {
            Some(callback) => {
                callback(alive).await;
                true
            }
            None => false,
        }
    }

    /// Deliver a report to the most recent monitor even if it was since
    /// cancelled, as a late in-flight notification would.
    pub async fn report_late(&self, alive: bool) -> bool {
        let callback = self.state.lock().unwrap().last_callback.clone();
        match callback {
            Some(callback) => {
                callback(alive).await;
                true
            }
            None => false,
        }
    }
}

impl HeartbeatChannel for MockHeartbeat {
    fn signaling_mode(&self) -> BoxFuture<'_, Result<()>> {
        async move {
            let mut state = self.state.lock().unwrap();
            state.mode = HeartbeatMode::Signaling;
            state.callback = None;
            Ok(())
        }
        .boxed()
    }

    fn monitoring_mode(&self, on_status: LivenessCallback) -> BoxFuture<'_, Result<()>> {
        async move {
            let mut state = self.state.lock().unwrap();
            state.mode = HeartbeatMode::Monitoring;
            state.last_callback = Some(on_status.clone());
            state.callback = Some(on_status);
            state.registrations += 1;
            Ok(())
        }
        .boxed()
    }

    fn signal(&self) -> BoxFuture<'_, Result<()>> {
        async move {
            let mut state = self.state.lock().unwrap();
            if state.fail_signal {
                return Err(TribuneError::Heartbeat("injected signal failure".into()));
            }
            state.signals += 1;
            Ok(())
        }
        .boxed()
    }

    fn end(&self) -> BoxFuture<'_, Result<()>> {
        async move {
            let mut state = self.state.lock().unwrap();
            state.mode = HeartbeatMode::Ended;
            state.callback = None;
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_report_requires_monitor() {
        let heartbeat = MockHeartbeat::new();
        assert!(!heartbeat.report(false).await);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let callback: LivenessCallback = Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {}.boxed()
        });

        heartbeat.monitoring_mode(callback).await.unwrap();
        assert!(heartbeat.report(false).await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        heartbeat.signaling_mode().await.unwrap();
        assert_eq!(heartbeat.mode(), HeartbeatMode::Signaling);
        assert!(!heartbeat.report(false).await);
        assert!(heartbeat.report_late(false).await);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_signal_failure_injection() {
        let heartbeat = MockHeartbeat::new();
        heartbeat.fail_signal(true);
        tokio_test::assert_err!(heartbeat.signal().await);
        heartbeat.fail_signal(false);
        tokio_test::assert_ok!(heartbeat.signal().await);
        assert_eq!(heartbeat.signals(), 1);
    }
}
