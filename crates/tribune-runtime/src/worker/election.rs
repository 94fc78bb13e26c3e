use std::sync::Arc;
use std::time::Duration;

use tribune_core::cluster::WorkerMode;
use tribune_core::error::Result;

use super::WorkerInner;

/// Result of a single election attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionOutcome {
    /// This node claimed the beacon and is now the speaker.
    Won,
    /// Another node claimed the beacon first.
    Lost {
        /// Beacon value observed after this node's increment.
        position: i64,
    },
    /// The attempt ended without this node becoming speaker.
    Skipped(SkipReason),
}

impl ElectionOutcome {
    pub fn is_won(&self) -> bool {
        matches!(self, Self::Won)
    }
}

/// Why an election attempt was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The worker has been ended.
    Stopped,
    /// Another attempt on this node is still running.
    InProgress,
}

impl WorkerInner {
    /// React to a liveness report from the heartbeat monitor.
    pub(super) async fn on_speaker_status(self: &Arc<Self>, alive: bool) {
        if self.is_stopped() {
            return;
        }
        if alive {
            tracing::debug!(node_id = %self.id, "Speaker is alive");
            return;
        }

        tracing::info!(node_id = %self.id, "Speaker is silent, trying to speak");
        match self.try_to_speak().await {
            Ok(outcome) => {
                tracing::debug!(node_id = %self.id, outcome = ?outcome, "Election finished");
            }
            Err(e) => {
                tracing::warn!(node_id = %self.id, "Election attempt failed: {}", e);
            }
        }
    }

    /// Race for the beacon and, on winning, become the speaker.
    ///
    /// After the mode switch the claim is finalized in order: beacon TTL,
    /// one lifesign, the claim hook, beacon release. The first failure stops
    /// the sequence and is returned; the node stays speaker regardless.
    /// `end` waits for a running attempt, so a claim made here is always
    /// released or given its TTL while the store is still open.
    pub(super) async fn try_to_speak(self: &Arc<Self>) -> Result<ElectionOutcome> {
        if self.is_stopped() {
            return Ok(ElectionOutcome::Skipped(SkipReason::Stopped));
        }
        let Ok(_election) = self.electing.try_lock() else {
            tracing::debug!(node_id = %self.id, "Election already in progress");
            return Ok(ElectionOutcome::Skipped(SkipReason::InProgress));
        };

        let (beacon_key, beacon_ttl) = {
            let config = self.config.read().await;
            (config.beacon_key.clone(), config.beacon_ttl())
        };

        let position = match self.backend.store.incr(&beacon_key).await {
            Ok(position) => position,
            Err(e) => {
                tracing::warn!(node_id = %self.id, beacon = %beacon_key, "Failed to increment beacon: {}", e);
                return Err(e);
            }
        };

        if position != 1 {
            tracing::debug!(node_id = %self.id, position, "Beacon already claimed");
            return Ok(ElectionOutcome::Lost { position });
        }

        if self.is_stopped() {
            // Ended while the increment was in flight; don't leave a claim without a TTL.
            self.release_abandoned(&beacon_key).await;
            return Ok(ElectionOutcome::Skipped(SkipReason::Stopped));
        }

        tracing::info!(node_id = %self.id, beacon = %beacon_key, "Claimed beacon");
        if !self.set_mode(WorkerMode::Speaker).await {
            // Ended before the mode switch; `end` is waiting for the release.
            self.release_abandoned(&beacon_key).await;
            return Ok(ElectionOutcome::Skipped(SkipReason::Stopped));
        }

        if let Err(e) = self.finalize_claim(&beacon_key, beacon_ttl).await {
            tracing::error!(node_id = %self.id, beacon = %beacon_key, "Failed to finalize claim: {}", e);
            return Err(e);
        }

        Ok(ElectionOutcome::Won)
    }

    async fn release_abandoned(&self, beacon_key: &str) {
        if let Err(e) = self.backend.store.delete(beacon_key).await {
            tracing::warn!(node_id = %self.id, beacon = %beacon_key, "Failed to release beacon after end: {}", e);
        }
    }

    async fn finalize_claim(&self, beacon_key: &str, beacon_ttl: Duration) -> Result<()> {
        self.backend.store.expire(beacon_key, beacon_ttl).await?;
        self.backend.heartbeat.signal().await?;
        self.get_attention().await?;
        self.backend.store.delete(beacon_key).await?;
        Ok(())
    }

    async fn get_attention(&self) -> Result<()> {
        let hook = self.claim_hook.read().await.clone();
        match hook {
            Some(hook) => hook().await,
            None => Ok(()),
        }
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::future::join_all;
    use tokio_test::{assert_err, assert_ok};

    use tribune_core::testing::{HeartbeatMode, MemoryCluster, StoreOp, TestNode};
    use tribune_core::{ClaimStore, NodeId, TribuneError};

    use super::*;
    use crate::worker::Worker;

    const BEACON: &str = "speaker-tribune";

    async fn started(node: &TestNode) -> Worker {
        let worker = Worker::new(NodeId::new(), node.backend.clone());
        worker.set_message_generator(|| "tick".to_string()).await;
        assert_ok!(worker.start().await);
        worker
    }

    #[test]
    fn test_outcome_is_won() {
        assert!(ElectionOutcome::Won.is_won());
        assert!(!ElectionOutcome::Lost { position: 2 }.is_won());
        assert!(!ElectionOutcome::Skipped(SkipReason::InProgress).is_won());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_elections_have_one_winner() {
        let cluster = MemoryCluster::new();
        cluster.store.set_latency(Duration::from_millis(10));

        let nodes: Vec<TestNode> = (0..5).map(|_| cluster.node()).collect();
        let mut workers = Vec::new();
        for node in &nodes {
            workers.push(started(node).await);
        }

        let outcomes = join_all(workers.iter().map(|w| w.try_to_speak())).await;

        let mut winners = 0;
        for (worker, outcome) in workers.iter().zip(outcomes) {
            let outcome = assert_ok!(outcome);
            if outcome.is_won() {
                winners += 1;
                assert_eq!(worker.mode().await, WorkerMode::Speaker);
            } else {
                assert!(matches!(outcome, ElectionOutcome::Lost { position } if position > 1));
                assert_eq!(worker.mode().await, WorkerMode::Listener);
            }
        }

        assert_eq!(winners, 1);
        // the winner releases the beacon once its claim is finalized
        assert_eq!(cluster.store.value(BEACON), None);

        for worker in &workers {
            assert_ok!(worker.end().await);
        }
    }

    #[tokio::test]
    async fn test_winner_finalizes_in_order() {
        let cluster = MemoryCluster::new();
        let node = cluster.node();
        let worker = started(&node).await;

        let hooked = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hooked);
        worker
            .on_claim(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        let outcome = assert_ok!(worker.try_to_speak().await);
        assert_eq!(outcome, ElectionOutcome::Won);
        assert_eq!(worker.mode().await, WorkerMode::Speaker);
        assert_eq!(node.heartbeat.mode(), HeartbeatMode::Signaling);
        assert_eq!(node.heartbeat.signals(), 1);
        assert_eq!(hooked.load(Ordering::SeqCst), 1);

        let beacon_ops: Vec<StoreOp> = cluster
            .store
            .operations()
            .into_iter()
            .filter(|(_, key)| key == BEACON)
            .map(|(op, _)| op)
            .collect();
        assert_eq!(beacon_ops, vec![StoreOp::Incr, StoreOp::Expire, StoreOp::Delete]);

        assert_ok!(worker.end().await);
    }

    #[tokio::test]
    async fn test_claimed_beacon_means_lost() {
        let cluster = MemoryCluster::new();
        let node = cluster.node();
        let worker = started(&node).await;

        assert_eq!(assert_ok!(cluster.store.incr(BEACON).await), 1);

        let outcome = assert_ok!(worker.try_to_speak().await);
        assert_eq!(outcome, ElectionOutcome::Lost { position: 2 });
        assert_eq!(worker.mode().await, WorkerMode::Listener);
        assert_eq!(node.heartbeat.mode(), HeartbeatMode::Monitoring);
        assert!(node.bus.is_subscribed("speech"));
        assert_eq!(node.heartbeat.signals(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_beacon_expires() {
        let cluster = MemoryCluster::new();
        let node = cluster.node();
        let worker = started(&node).await;

        // a speaker that claimed but crashed before releasing
        assert_ok!(cluster.store.incr(BEACON).await);
        assert_ok!(cluster.store.expire(BEACON, Duration::from_secs(10)).await);

        assert!(!assert_ok!(worker.try_to_speak().await).is_won());

        tokio::time::advance(Duration::from_secs(11)).await;

        let outcome = assert_ok!(worker.try_to_speak().await);
        assert!(outcome.is_won());
        assert_ok!(worker.end().await);
    }

    #[tokio::test]
    async fn test_signal_failure_keeps_speaker_and_beacon() {
        let cluster = MemoryCluster::new();
        let node = cluster.node();
        let worker = started(&node).await;
        node.heartbeat.fail_signal(true);

        let err = assert_err!(worker.try_to_speak().await);
        assert!(matches!(err, TribuneError::Heartbeat(_)));

        assert_eq!(worker.mode().await, WorkerMode::Speaker);
        assert_eq!(cluster.store.value(BEACON), Some(1));
        assert!(cluster.store.ttl(BEACON).is_some());
        assert_eq!(cluster.store.count(StoreOp::Delete), 0);

        assert_ok!(worker.end().await);
    }

    #[tokio::test]
    async fn test_claim_hook_failure_skips_release() {
        let cluster = MemoryCluster::new();
        let node = cluster.node();
        let worker = started(&node).await;
        worker
            .on_claim(|| async { Err(TribuneError::InvalidState("audience unreachable".into())) })
            .await;

        let err = assert_err!(worker.try_to_speak().await);
        assert!(matches!(err, TribuneError::InvalidState(_)));

        assert_eq!(worker.mode().await, WorkerMode::Speaker);
        assert_eq!(node.heartbeat.signals(), 1);
        assert_eq!(cluster.store.value(BEACON), Some(1));

        assert_ok!(worker.end().await);
    }

    #[tokio::test]
    async fn test_expire_failure_stops_before_signal() {
        let cluster = MemoryCluster::new();
        let node = cluster.node();
        let worker = started(&node).await;
        cluster.store.fail_on(StoreOp::Expire);

        let err = assert_err!(worker.try_to_speak().await);
        assert!(matches!(err, TribuneError::StoreUnavailable(_)));
        assert_eq!(worker.mode().await, WorkerMode::Speaker);
        assert_eq!(node.heartbeat.signals(), 0);
        assert_eq!(cluster.store.ttl(BEACON), None);

        assert_ok!(worker.end().await);
    }

    #[tokio::test]
    async fn test_incr_failure_changes_nothing() {
        let cluster = MemoryCluster::new();
        let node = cluster.node();
        let worker = started(&node).await;
        cluster.store.fail_on(StoreOp::Incr);

        let err = assert_err!(worker.try_to_speak().await);
        assert!(matches!(err, TribuneError::StoreUnavailable(_)));
        assert_eq!(worker.mode().await, WorkerMode::Listener);
        assert!(node.bus.is_subscribed("speech"));
        assert_eq!(node.heartbeat.signals(), 0);

        // an unavailable store must not break the listener for good
        cluster.store.recover(StoreOp::Incr);
        assert!(assert_ok!(worker.try_to_speak().await).is_won());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_attempts_are_skipped() {
        let cluster = MemoryCluster::new();
        cluster.store.set_latency(Duration::from_millis(100));
        let node = cluster.node();
        let worker = started(&node).await;

        let first = tokio::spawn({
            let worker = worker.clone();
            async move { worker.try_to_speak().await }
        });
        tokio::task::yield_now().await;

        let second = assert_ok!(worker.try_to_speak().await);
        assert_eq!(second, ElectionOutcome::Skipped(SkipReason::InProgress));

        let first = assert_ok!(first.await.unwrap());
        assert!(first.is_won());
        assert_eq!(cluster.store.count(StoreOp::Incr), 1);

        assert_ok!(worker.end().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_during_increment_releases_claim() {
        let cluster = MemoryCluster::new();
        cluster.store.set_latency(Duration::from_millis(100));
        let node = cluster.node();
        let worker = started(&node).await;

        let attempt = tokio::spawn({
            let worker = worker.clone();
            async move { worker.try_to_speak().await }
        });
        tokio::task::yield_now().await;

        assert_ok!(worker.end().await);

        let outcome = assert_ok!(attempt.await.unwrap());
        assert_eq!(outcome, ElectionOutcome::Skipped(SkipReason::Stopped));
        assert_eq!(worker.mode().await, WorkerMode::Listener);
        assert_eq!(node.heartbeat.signals(), 0);
        assert_eq!(cluster.store.value(BEACON), None);
        assert!(node.store.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_during_finalize_keeps_beacon_claimable() {
        let cluster = MemoryCluster::new();
        cluster.store.set_latency(Duration::from_millis(50));
        let node = cluster.node();
        let worker = started(&node).await;

        let attempt = tokio::spawn({
            let worker = worker.clone();
            async move { worker.try_to_speak().await }
        });
        // past the increment, with the TTL still in flight
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cluster.store.value(BEACON), Some(1));

        assert_ok!(worker.end().await);
        assert!(node.store.is_closed());

        let outcome = assert_ok!(attempt.await.unwrap());
        assert!(outcome.is_won());
        assert_eq!(cluster.store.value(BEACON), None);

        tokio::time::advance(Duration::from_secs(3600)).await;
        let fresh_node = cluster.node();
        let fresh = started(&fresh_node).await;
        assert!(assert_ok!(fresh.try_to_speak().await).is_won());
        assert_ok!(fresh.end().await);
    }

    #[tokio::test]
    async fn test_elections_after_end_are_skipped() {
        let cluster = MemoryCluster::new();
        let node = cluster.node();
        let worker = started(&node).await;
        assert_ok!(worker.end().await);

        let outcome = assert_ok!(worker.try_to_speak().await);
        assert_eq!(outcome, ElectionOutcome::Skipped(SkipReason::Stopped));
        assert_eq!(cluster.store.count(StoreOp::Incr), 0);
    }
}
