use std::collections::HashMap;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use tribune_core::cluster::{InboundHandler, MessageBus, Payload};
use tribune_core::error::{Result, TribuneError};

/// Message bus over PostgreSQL LISTEN/NOTIFY.
///
/// Each subscription owns a dedicated listener connection and task; handlers
/// for one topic run one at a time in notification order.
pub struct PgMessageBus {
    pool: PgPool,
    subscriptions: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl PgMessageBus {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Topics with an active listener task.
    pub async fn topics(&self) -> Vec<String> {
        self.subscriptions.lock().await.keys().cloned().collect()
    }
}

fn bus_error(e: sqlx::Error) -> TribuneError {
    TribuneError::Bus(e.to_string())
}

async fn listen_loop(mut listener: PgListener, topic: String, handler: InboundHandler) {
    tracing::info!("Listening for messages on topic: {}", topic);

    loop {
        match listener.recv().await {
            Ok(notification) => {
                handler(notification.payload().to_string()).await;
            }
            Err(e) => {
                tracing::warn!(topic = %topic, "Error receiving notification: {}", e);
                // recv reconnects on the next call
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

impl MessageBus for PgMessageBus {
    fn subscribe<'a>(
        &'a self,
        topic: &'a str,
        handler: InboundHandler,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let mut listener = PgListener::connect_with(&self.pool)
                .await
                .map_err(bus_error)?;
            listener.listen(topic).await.map_err(bus_error)?;

            let task = tokio::spawn(listen_loop(listener, topic.to_string(), handler));
            if let Some(previous) = self
                .subscriptions
                .lock()
                .await
                .insert(topic.to_string(), task)
            {
                previous.abort();
            }
            Ok(())
        }
        .boxed()
    }

    fn unsubscribe<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            if let Some(task) = self.subscriptions.lock().await.remove(topic) {
                task.abort();
                tracing::debug!(topic = %topic, "Unsubscribed");
            }
            Ok(())
        }
        .boxed()
    }

    fn publish<'a>(&'a self, topic: &'a str, payload: Payload) -> BoxFuture<'a, Result<()>> {
        async move {
            sqlx::query("SELECT pg_notify($1, $2)")
                .bind(topic)
                .bind(payload)
                .execute(&self.pool)
                .await
                .map_err(bus_error)?;
            Ok(())
        }
        .boxed()
    }

    fn drain_list<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Vec<Payload>>> {
        async move {
            let mut rows: Vec<(i64, String)> =
                sqlx::query_as("DELETE FROM tribune_lists WHERE key = $1 RETURNING id, value")
                    .bind(key)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(bus_error)?;

            rows.sort_by_key(|(id, _)| *id);
            Ok(rows.into_iter().map(|(_, value)| value).collect())
        }
        .boxed()
    }

    fn end(&self) -> BoxFuture<'_, Result<()>> {
        async move {
            let mut subscriptions = self.subscriptions.lock().await;
            for (topic, task) in subscriptions.drain() {
                task.abort();
                tracing::debug!(topic = %topic, "Subscription closed");
            }
            Ok(())
        }
        .boxed()
    }
}
