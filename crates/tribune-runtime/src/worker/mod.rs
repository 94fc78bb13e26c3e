//! The speaker/listener worker.
//!
//! A worker starts as a listener: it subscribes to the topic and monitors
//! the speaker's lifesign. When the lifesign reports the speaker dead it runs
//! an election against the shared beacon, and the single winner becomes the
//! speaker, broadcasting on the topic at a fixed interval until it is
//! explicitly demoted or ended.

mod election;
mod messaging;

pub use election::{ElectionOutcome, SkipReason};
pub use messaging::ErrorReporter;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use tribune_core::cluster::{Backend, LivenessCallback, NodeId, Payload, WorkerMode};
use tribune_core::config::WorkerConfig;
use tribune_core::error::{Result, TribuneError};

/// Produces the next payload to broadcast.
pub type MessageGenerator = Arc<dyn Fn() -> Payload + Send + Sync>;

/// Handles one inbound payload, reporting failures through the reporter.
pub type MessageHandler = Arc<dyn Fn(Payload, ErrorReporter) + Send + Sync>;

/// Runs after a won election, before the beacon is released.
pub type ClaimHook = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Receiver for fatal worker errors such as a missing message generator.
pub type FatalReceiver = watch::Receiver<Option<Arc<TribuneError>>>;

struct ModeState {
    mode: WorkerMode,
    /// Broadcast timer, present only while speaking.
    timer: Option<JoinHandle<()>>,
    /// Topic currently subscribed, present only while listening.
    subscribed: Option<String>,
}

pub(crate) struct WorkerInner {
    id: NodeId,
    backend: Backend,
    config: RwLock<WorkerConfig>,
    generator: RwLock<Option<MessageGenerator>>,
    handler: RwLock<Option<MessageHandler>>,
    claim_hook: RwLock<Option<ClaimHook>>,
    state: Mutex<ModeState>,
    stopped: AtomicBool,
    /// Held for the whole of an election attempt; `end` waits on it.
    electing: Mutex<()>,
    fatal_tx: watch::Sender<Option<Arc<TribuneError>>>,
}

/// A node competing for the speaker role.
///
/// Cloning yields another handle to the same worker.
#[derive(Clone)]
pub struct Worker {
    inner: Arc<WorkerInner>,
}

impl Worker {
    /// Create a listener with the default configuration.
    pub fn new(id: NodeId, backend: Backend) -> Self {
        Self::with_config(id, backend, WorkerConfig::default())
    }

    /// Create a listener with the given configuration.
    pub fn with_config(id: NodeId, backend: Backend, config: WorkerConfig) -> Self {
        let (fatal_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(WorkerInner {
                id,
                backend,
                config: RwLock::new(config),
                generator: RwLock::new(None),
                handler: RwLock::new(None),
                claim_hook: RwLock::new(None),
                state: Mutex::new(ModeState {
                    mode: WorkerMode::Listener,
                    timer: None,
                    subscribed: None,
                }),
                stopped: AtomicBool::new(false),
                electing: Mutex::new(()),
                fatal_tx,
            }),
        }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Snapshot of the current configuration.
    pub async fn config(&self) -> WorkerConfig {
        self.inner.config.read().await.clone()
    }

    /// Set one configuration option by name.
    ///
    /// Returns `Ok(false)` when the name is not recognized. Changes take
    /// effect the next time mode wiring is applied.
    pub async fn configure(&self, name: &str, value: &str) -> Result<bool> {
        let applied = self.inner.config.write().await.set(name, value)?;
        if !applied {
            tracing::debug!(node_id = %self.inner.id, option = name, "Ignoring unknown option");
        }
        Ok(applied)
    }

    /// Install the producer called on every broadcast tick.
    pub async fn set_message_generator<F>(&self, generator: F)
    where
        F: Fn() -> Payload + Send + Sync + 'static,
    {
        *self.inner.generator.write().await = Some(Arc::new(generator));
    }

    /// Install the handler called for every inbound payload.
    pub async fn on_message<F>(&self, handler: F)
    where
        F: Fn(Payload, ErrorReporter) + Send + Sync + 'static,
    {
        *self.inner.handler.write().await = Some(Arc::new(handler));
    }

    /// Install a hook run after winning an election, before the beacon is released.
    ///
    /// The hook must not call `end` on this worker: `end` waits for the
    /// running election to finish.
    pub async fn on_claim<F, Fut>(&self, hook: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let hook: ClaimHook = Arc::new(move || hook().boxed());
        *self.inner.claim_hook.write().await = Some(hook);
    }

    pub async fn mode(&self) -> WorkerMode {
        self.inner.state.lock().await.mode
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }

    /// Switch mode, re-applying its wiring even if the mode is unchanged.
    pub async fn set_mode(&self, mode: WorkerMode) {
        self.inner.set_mode(mode).await;
    }

    /// Switch mode by name. Unknown names are ignored and return `false`.
    pub async fn set_mode_named(&self, name: &str) -> bool {
        match WorkerMode::from_str(name) {
            Some(mode) => {
                self.inner.set_mode(mode).await;
                true
            }
            None => {
                tracing::debug!(node_id = %self.inner.id, mode = name, "Ignoring unknown mode");
                false
            }
        }
    }

    /// Run one election attempt.
    pub async fn try_to_speak(&self) -> Result<ElectionOutcome> {
        self.inner.try_to_speak().await
    }

    /// Generate and publish one message.
    pub async fn send_message(&self) -> Result<()> {
        self.inner.send_message().await
    }

    /// Drain the error list, returning every payload recorded since the last drain.
    pub async fn list_errors(&self) -> Result<Vec<Payload>> {
        self.inner.list_errors().await
    }

    /// Subscribe to fatal errors raised from background tasks.
    pub fn fatal_errors(&self) -> FatalReceiver {
        self.inner.fatal_tx.subscribe()
    }

    /// Apply the wiring for the current mode.
    pub async fn start(&self) -> Result<()> {
        self.inner.start().await
    }

    /// Stop the worker and release its collaborators.
    pub async fn end(&self) -> Result<()> {
        self.inner.end().await;
        Ok(())
    }
}

impl WorkerInner {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    async fn start(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.lock().await;
        if self.is_stopped() {
            return Err(TribuneError::InvalidState("worker has been ended".into()));
        }
        self.apply_mode(&mut state).await;
        tracing::info!(node_id = %self.id, mode = %state.mode, "Worker started");
        Ok(())
    }

    /// Returns `false` if the worker has been ended and nothing changed.
    async fn set_mode(self: &Arc<Self>, mode: WorkerMode) -> bool {
        let mut state = self.state.lock().await;
        if self.is_stopped() {
            tracing::debug!(node_id = %self.id, mode = %mode, "Ignoring mode change on ended worker");
            return false;
        }

        let previous = state.mode;
        state.mode = mode;
        self.apply_mode(&mut state).await;

        if previous != mode {
            tracing::info!(node_id = %self.id, from = %previous, to = %mode, "Worker mode changed");
        }
        true
    }

    /// Tear down whatever the previous mode held, then wire the current one.
    async fn apply_mode(self: &Arc<Self>, state: &mut ModeState) {
        if let Some(timer) = state.timer.take() {
            self.stop_timer(timer).await;
        }

        let config = self.config.read().await.clone();

        let subscribed = state
            .subscribed
            .take()
            .unwrap_or_else(|| config.topic.clone());
        if let Err(e) = self.backend.bus.unsubscribe(&subscribed).await {
            tracing::warn!(node_id = %self.id, topic = %subscribed, "Failed to unsubscribe: {}", e);
        }

        match state.mode {
            WorkerMode::Speaker => {
                if let Err(e) = self.backend.heartbeat.signaling_mode().await {
                    tracing::warn!(node_id = %self.id, "Failed to enter signaling mode: {}", e);
                }
                state.timer = Some(self.spawn_broadcast(config.message_interval()));
            }
            WorkerMode::Listener => {
                match self
                    .backend
                    .bus
                    .subscribe(&config.topic, self.inbound_handler())
                    .await
                {
                    Ok(()) => state.subscribed = Some(config.topic.clone()),
                    Err(e) => {
                        tracing::warn!(node_id = %self.id, topic = %config.topic, "Failed to subscribe: {}", e);
                    }
                }
                if let Err(e) = self
                    .backend
                    .heartbeat
                    .monitoring_mode(self.liveness_callback())
                    .await
                {
                    tracing::warn!(node_id = %self.id, "Failed to enter monitoring mode: {}", e);
                }
            }
        }
    }

    /// Callback handed to the heartbeat monitor.
    ///
    /// The status is processed on its own task so that mode changes made
    /// by an election cannot cancel it through the monitor's teardown.
    fn liveness_callback(self: &Arc<Self>) -> LivenessCallback {
        let worker = Arc::downgrade(self);
        Arc::new(move |alive| {
            let worker = worker.clone();
            async move {
                let Some(worker) = worker.upgrade() else {
                    return;
                };
                let task = tokio::spawn(async move { worker.on_speaker_status(alive).await });
                if let Err(e) = task.await {
                    tracing::error!("Speaker status task failed: {}", e);
                }
            }
            .boxed()
        })
    }

    async fn end(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        // An election past its increment still needs the store to release the beacon.
        let _election = self.electing.lock().await;

        let mut state = self.state.lock().await;
        if let Some(timer) = state.timer.take() {
            self.stop_timer(timer).await;
        }
        if let Some(topic) = state.subscribed.take() {
            if let Err(e) = self.backend.bus.unsubscribe(&topic).await {
                tracing::warn!(node_id = %self.id, topic = %topic, "Failed to unsubscribe: {}", e);
            }
        }
        if let Err(e) = self.backend.bus.end().await {
            tracing::warn!(node_id = %self.id, "Failed to end message bus: {}", e);
        }
        if let Err(e) = self.backend.heartbeat.end().await {
            tracing::warn!(node_id = %self.id, "Failed to end heartbeat: {}", e);
        }
        if let Err(e) = self.backend.store.close().await {
            tracing::warn!(node_id = %self.id, "Failed to close store connection: {}", e);
        }

        tracing::info!(node_id = %self.id, mode = %state.mode, "Worker ended");
    }

    /// Cancel the broadcast timer and wait until a tick in flight has finished.
    async fn stop_timer(&self, timer: JoinHandle<()>) {
        timer.abort();
        if let Err(e) = timer.await {
            if !e.is_cancelled() {
                tracing::warn!(node_id = %self.id, "Broadcast task failed: {}", e);
            }
        }
    }

    fn raise_fatal(&self, error: TribuneError) {
        tracing::error!(node_id = %self.id, error = %error, "Fatal worker error");
        self.fatal_tx.send_replace(Some(Arc::new(error)));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    use tokio_test::assert_ok;

    use tribune_core::testing::{HeartbeatMode, MemoryCluster, StoreOp, TestNode};

    use super::*;

    fn worker_for(node: &TestNode) -> Worker {
        Worker::new(NodeId::new(), node.backend.clone())
    }

    async fn counting_generator(worker: &Worker) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        worker
            .set_message_generator(move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                format!("message-{}", n)
            })
            .await;
        count
    }

    #[tokio::test]
    async fn test_start_wires_listener() {
        let cluster = MemoryCluster::new();
        let node = cluster.node();
        let worker = worker_for(&node);

        assert_eq!(worker.mode().await, WorkerMode::Listener);
        assert_eq!(node.heartbeat.mode(), HeartbeatMode::Idle);

        assert_ok!(worker.start().await);
        assert!(node.bus.is_subscribed("speech"));
        assert_eq!(node.heartbeat.mode(), HeartbeatMode::Monitoring);
        assert_eq!(node.heartbeat.registrations(), 1);
    }

    #[tokio::test]
    async fn test_repeated_listener_wiring_is_idempotent() {
        let cluster = MemoryCluster::new();
        let node = cluster.node();
        let worker = worker_for(&node);
        assert_ok!(worker.start().await);

        for _ in 0..3 {
            worker.set_mode(WorkerMode::Listener).await;
        }

        assert_eq!(cluster.broker.subscriber_count("speech"), 1);
        assert_eq!(node.heartbeat.registrations(), 4);
        assert_eq!(node.heartbeat.mode(), HeartbeatMode::Monitoring);
    }

    #[tokio::test]
    async fn test_configure_options() {
        let cluster = MemoryCluster::new();
        let node = cluster.node();
        let worker = worker_for(&node);

        assert!(assert_ok!(worker.configure("topic", "news").await));
        assert!(assert_ok!(worker.configure("errorlist", "news-errors").await));
        assert!(!assert_ok!(worker.configure("volume", "11").await));
        assert!(matches!(
            worker.configure("message_interval", "0").await,
            Err(TribuneError::Config(_))
        ));

        let config = worker.config().await;
        assert_eq!(config.topic, "news");
        assert_eq!(config.error_list, "news-errors");
        assert_eq!(config.message_interval_ms, 500);

        worker
            .on_message(|payload, errors| {
                errors.fail("rejected", payload);
            })
            .await;
        assert_ok!(worker.start().await);
        assert!(node.bus.is_subscribed("news"));
        assert!(!node.bus.is_subscribed("speech"));

        cluster.broker.deliver("news", "headline".to_string()).await;
        assert_eq!(cluster.store.list("news-errors"), vec!["headline"]);
    }

    #[tokio::test]
    async fn test_topic_change_moves_subscription() {
        let cluster = MemoryCluster::new();
        let node = cluster.node();
        let worker = worker_for(&node);
        assert_ok!(worker.start().await);

        assert_ok!(worker.configure("topic", "news").await);
        // takes effect on the next wiring
        assert!(node.bus.is_subscribed("speech"));

        worker.set_mode(WorkerMode::Listener).await;
        assert!(node.bus.is_subscribed("news"));
        assert!(!node.bus.is_subscribed("speech"));
    }

    #[tokio::test]
    async fn test_set_mode_named() {
        let cluster = MemoryCluster::new();
        let node = cluster.node();
        let worker = worker_for(&node);
        counting_generator(&worker).await;

        assert!(worker.set_mode_named("speaker").await);
        assert_eq!(worker.mode().await, WorkerMode::Speaker);

        assert!(!worker.set_mode_named("orator").await);
        assert_eq!(worker.mode().await, WorkerMode::Speaker);

        assert!(worker.set_mode_named("listener").await);
        assert_eq!(worker.mode().await, WorkerMode::Listener);

        assert_ok!(worker.end().await);
    }

    #[tokio::test]
    async fn test_dead_speaker_triggers_election() {
        let cluster = MemoryCluster::new();
        let watcher_node = cluster.node();
        let calm_node = cluster.node();

        let watcher = worker_for(&watcher_node);
        counting_generator(&watcher).await;
        assert_ok!(watcher.start().await);

        let calm = worker_for(&calm_node);
        assert_ok!(calm.start().await);

        assert!(calm_node.heartbeat.report(true).await);
        assert_eq!(calm.mode().await, WorkerMode::Listener);
        assert_eq!(cluster.store.count(StoreOp::Incr), 0);

        assert!(watcher_node.heartbeat.report(false).await);
        assert_eq!(watcher.mode().await, WorkerMode::Speaker);
        assert_eq!(watcher_node.heartbeat.mode(), HeartbeatMode::Signaling);
        assert_eq!(watcher_node.heartbeat.signals(), 1);

        // a speaker has no monitor to report to
        assert!(!watcher_node.heartbeat.report(false).await);

        assert_ok!(watcher.end().await);
        assert_ok!(calm.end().await);
    }

    #[tokio::test]
    async fn test_end_releases_collaborators() {
        let cluster = MemoryCluster::new();
        let node = cluster.node();
        let other = cluster.node();
        let worker = worker_for(&node);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        worker
            .on_message(move |payload, _| sink.lock().unwrap().push(payload))
            .await;
        counting_generator(&worker).await;
        assert_ok!(worker.start().await);

        assert_ok!(worker.end().await);
        assert!(worker.is_stopped());
        assert!(node.bus.is_ended());
        assert!(node.store.is_closed());
        assert!(!other.store.is_closed());
        assert_eq!(node.heartbeat.mode(), HeartbeatMode::Ended);
        assert_eq!(cluster.broker.subscriber_count("speech"), 0);

        // a liveness report already in flight when the worker ended
        assert!(node.heartbeat.report_late(false).await);
        assert_eq!(cluster.store.count(StoreOp::Incr), 0);
        assert_eq!(worker.mode().await, WorkerMode::Listener);

        assert_ok!(worker.send_message().await);
        assert!(cluster.broker.published("speech").is_empty());

        cluster.broker.deliver("speech", "after".to_string()).await;
        assert!(seen.lock().unwrap().is_empty());

        worker.set_mode(WorkerMode::Speaker).await;
        assert_eq!(worker.mode().await, WorkerMode::Listener);

        assert!(matches!(
            worker.start().await,
            Err(TribuneError::InvalidState(_))
        ));
        assert_ok!(worker.end().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_stops_speaker_timer() {
        let cluster = MemoryCluster::new();
        let node = cluster.node();
        let worker = worker_for(&node);
        let generated = counting_generator(&worker).await;

        worker.set_mode(WorkerMode::Speaker).await;
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(generated.load(Ordering::SeqCst), 1);

        assert_ok!(worker.end().await);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(generated.load(Ordering::SeqCst), 1);
    }
}
