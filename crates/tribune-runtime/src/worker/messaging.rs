use std::fmt::Display;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::FutureExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use tribune_core::cluster::{InboundHandler, Payload};
use tribune_core::error::{Result, TribuneError};

use super::WorkerInner;

/// Continuation handed to the message handler for reporting failed payloads.
///
/// Reported payloads are appended to the worker's error list. The reporter
/// may be cloned and used after the handler returns.
#[derive(Clone)]
pub struct ErrorReporter {
    tx: mpsc::UnboundedSender<Payload>,
}

impl ErrorReporter {
    /// Record `payload` as failed.
    ///
    /// Returns `false` if the worker is gone and the payload was dropped.
    pub fn fail(&self, reason: impl Display, payload: Payload) -> bool {
        tracing::debug!(reason = %reason, "Inbound message failed");
        match self.tx.send(payload) {
            Ok(()) => true,
            Err(lost) => {
                tracing::warn!(payload = %lost.0, "Worker is gone, failed message not recorded");
                false
            }
        }
    }

    /// Record `payload` as failed if `outcome` is an error.
    pub fn report<E: Display>(&self, outcome: std::result::Result<(), E>, payload: Payload) {
        if let Err(reason) = outcome {
            self.fail(reason, payload);
        }
    }
}

impl WorkerInner {
    /// Generate one payload and publish it on the topic.
    pub(super) async fn send_message(&self) -> Result<()> {
        if self.is_stopped() {
            return Ok(());
        }

        let generator = self
            .generator
            .read()
            .await
            .clone()
            .ok_or(TribuneError::GeneratorMissing)?;
        let payload = generator();
        let topic = self.config.read().await.topic.clone();

        self.backend.bus.publish(&topic, payload).await
    }

    /// Spawn the repeating broadcast, first firing one period from now.
    pub(super) fn spawn_broadcast(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let worker = Arc::downgrade(self);
        let node_id = self.id;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::debug!(node_id = %node_id, period_ms = period.as_millis() as u64, "Broadcast started");

            loop {
                ticker.tick().await;
                let Some(worker) = worker.upgrade() else {
                    break;
                };
                if worker.is_stopped() {
                    break;
                }

                match worker.send_message().await {
                    Ok(()) => {}
                    Err(TribuneError::GeneratorMissing) => {
                        worker.raise_fatal(TribuneError::GeneratorMissing);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(node_id = %node_id, "Failed to publish message: {}", e);
                    }
                }
            }

            tracing::debug!(node_id = %node_id, "Broadcast stopped");
        })
    }

    /// Handler handed to the message bus while listening.
    pub(super) fn inbound_handler(self: &Arc<Self>) -> InboundHandler {
        let worker = Arc::downgrade(self);
        Arc::new(move |payload| {
            let worker = worker.clone();
            async move {
                if let Some(worker) = worker.upgrade() {
                    worker.handle_inbound(payload).await;
                }
            }
            .boxed()
        })
    }

    async fn handle_inbound(self: &Arc<Self>, payload: Payload) {
        if self.is_stopped() {
            return;
        }

        let handler = self.handler.read().await.clone();
        let Some(handler) = handler else {
            tracing::debug!(node_id = %self.id, "No message handler, dropping message");
            return;
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        handler(payload, ErrorReporter { tx });

        loop {
            match rx.try_recv() {
                Ok(failed) => self.record_failure(failed).await,
                Err(TryRecvError::Empty) => {
                    // The handler kept a reporter; keep collecting in the background.
                    tokio::spawn(collect_late_failures(Arc::downgrade(self), rx));
                    break;
                }
                Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    async fn record_failure(&self, payload: Payload) {
        let error_list = self.config.read().await.error_list.clone();
        if let Err(e) = self.backend.store.push(&error_list, payload).await {
            tracing::error!(node_id = %self.id, list = %error_list, "Failed to record failed message: {}", e);
        }
    }

    pub(super) async fn list_errors(&self) -> Result<Vec<Payload>> {
        let error_list = self.config.read().await.error_list.clone();
        self.backend.bus.drain_list(&error_list).await
    }
}

async fn collect_late_failures(worker: Weak<WorkerInner>, mut rx: mpsc::UnboundedReceiver<Payload>) {
    while let Some(failed) = rx.recv().await {
        let Some(worker) = worker.upgrade() else {
            break;
        };
        worker.record_failure(failed).await;
    }
}
