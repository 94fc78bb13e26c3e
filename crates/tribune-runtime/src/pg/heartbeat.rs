use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use sqlx::PgPool;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use tribune_core::cluster::{HeartbeatChannel, LifesignInfo, LivenessCallback, NodeId};
use tribune_core::config::HeartbeatConfig;
use tribune_core::error::{Result, TribuneError};

/// Lifesign channel over the `tribune_lifesigns` table.
///
/// Signaling upserts `last_signal` every interval; monitoring reads it every
/// interval and reports whether it is younger than the dead threshold.
pub struct PgHeartbeat {
    pool: PgPool,
    node_id: NodeId,
    config: HeartbeatConfig,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PgHeartbeat {
    pub fn new(pool: PgPool, node_id: NodeId, config: HeartbeatConfig) -> Self {
        Self {
            pool,
            node_id,
            config,
            task: Mutex::new(None),
        }
    }

    /// Latest lifesign for the configured signal, if any.
    pub async fn lifesign(&self) -> Result<Option<LifesignInfo>> {
        fetch_lifesign(&self.pool, &self.config.signal_name).await
    }

    async fn replace_task(&self, task: Option<JoinHandle<()>>) {
        let mut current = self.task.lock().await;
        if let Some(previous) = std::mem::replace(&mut *current, task) {
            previous.abort();
        }
    }
}

fn heartbeat_error(e: sqlx::Error) -> TribuneError {
    TribuneError::Heartbeat(e.to_string())
}

async fn send_signal(pool: &PgPool, name: &str, node_id: NodeId) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO tribune_lifesigns (name, node_id, last_signal)
        VALUES ($1, $2, NOW())
        ON CONFLICT (name) DO UPDATE SET
            node_id = EXCLUDED.node_id,
            last_signal = NOW()
        "#,
    )
    .bind(name)
    .bind(node_id.as_uuid())
    .execute(pool)
    .await
    .map_err(heartbeat_error)?;

    Ok(())
}

async fn fetch_lifesign(pool: &PgPool, name: &str) -> Result<Option<LifesignInfo>> {
    let row: Option<(String, Uuid, DateTime<Utc>)> = sqlx::query_as(
        "SELECT name, node_id, last_signal FROM tribune_lifesigns WHERE name = $1",
    )
    .bind(name)
    .fetch_optional(pool)
    .await
    .map_err(heartbeat_error)?;

    Ok(row.map(|(name, node_id, last_signal)| LifesignInfo {
        name,
        node_id: NodeId::from_uuid(node_id),
        last_signal,
    }))
}

impl HeartbeatChannel for PgHeartbeat {
    fn signaling_mode(&self) -> BoxFuture<'_, Result<()>> {
        async move {
            let pool = self.pool.clone();
            let name = self.config.signal_name.clone();
            let node_id = self.node_id;
            let interval = self.config.interval();

            let task = tokio::spawn(async move {
                loop {
                    if let Err(e) = send_signal(&pool, &name, node_id).await {
                        tracing::warn!(signal = %name, "Failed to send lifesign: {}", e);
                    }
                    tokio::time::sleep(interval).await;
                }
            });

            self.replace_task(Some(task)).await;
            tracing::debug!(node_id = %self.node_id, "Lifesign signaling");
            Ok(())
        }
        .boxed()
    }

    fn monitoring_mode(&self, on_status: LivenessCallback) -> BoxFuture<'_, Result<()>> {
        async move {
            let pool = self.pool.clone();
            let name = self.config.signal_name.clone();
            let interval = self.config.interval();
            let dead_threshold = self.config.dead_threshold();

            let task = tokio::spawn(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    match fetch_lifesign(&pool, &name).await {
                        Ok(lifesign) => {
                            let alive = lifesign.is_some_and(|l| l.is_alive(dead_threshold));
                            on_status(alive).await;
                        }
                        Err(e) => {
                            tracing::warn!(signal = %name, "Failed to read lifesign: {}", e);
                        }
                    }
                }
            });

            self.replace_task(Some(task)).await;
            tracing::debug!(node_id = %self.node_id, "Lifesign monitoring");
            Ok(())
        }
        .boxed()
    }

    fn signal(&self) -> BoxFuture<'_, Result<()>> {
        async move { send_signal(&self.pool, &self.config.signal_name, self.node_id).await }.boxed()
    }

    fn end(&self) -> BoxFuture<'_, Result<()>> {
        async move {
            self.replace_task(None).await;
            Ok(())
        }
        .boxed()
    }
}
