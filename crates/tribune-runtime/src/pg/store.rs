use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use sqlx::PgPool;

use tribune_core::cluster::{ClaimStore, Payload};
use tribune_core::error::{Result, TribuneError};

/// Increment a beacon, restarting it at 1 if its TTL has lapsed.
const INCR_SQL: &str = r#"
INSERT INTO tribune_beacons (key, value, expires_at)
VALUES ($1, 1, NULL)
ON CONFLICT (key) DO UPDATE SET
    value = CASE
        WHEN tribune_beacons.expires_at IS NOT NULL AND tribune_beacons.expires_at <= NOW() THEN 1
        ELSE tribune_beacons.value + 1
    END,
    expires_at = CASE
        WHEN tribune_beacons.expires_at IS NOT NULL AND tribune_beacons.expires_at <= NOW() THEN NULL
        ELSE tribune_beacons.expires_at
    END
RETURNING value
"#;

/// Claim store over the `tribune_beacons` and `tribune_lists` tables.
pub struct PgClaimStore {
    pool: PgPool,
}

impl PgClaimStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn store_error(e: sqlx::Error) -> TribuneError {
    TribuneError::StoreUnavailable(e.to_string())
}

impl ClaimStore for PgClaimStore {
    fn incr<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<i64>> {
        async move {
            sqlx::query_scalar::<_, i64>(INCR_SQL)
                .bind(key)
                .fetch_one(&self.pool)
                .await
                .map_err(store_error)
        }
        .boxed()
    }

    fn expire<'a>(&'a self, key: &'a str, ttl: Duration) -> BoxFuture<'a, Result<()>> {
        async move {
            sqlx::query(
                r#"
                UPDATE tribune_beacons
                SET expires_at = NOW() + make_interval(secs => $2)
                WHERE key = $1
                "#,
            )
            .bind(key)
            .bind(ttl.as_secs_f64())
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
            Ok(())
        }
        .boxed()
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            sqlx::query("DELETE FROM tribune_beacons WHERE key = $1")
                .bind(key)
                .execute(&self.pool)
                .await
                .map_err(store_error)?;
            Ok(())
        }
        .boxed()
    }

    fn push<'a>(&'a self, key: &'a str, payload: Payload) -> BoxFuture<'a, Result<()>> {
        async move {
            sqlx::query("INSERT INTO tribune_lists (key, value) VALUES ($1, $2)")
                .bind(key)
                .bind(payload)
                .execute(&self.pool)
                .await
                .map_err(store_error)?;
            Ok(())
        }
        .boxed()
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        async move {
            self.pool.close().await;
            Ok(())
        }
        .boxed()
    }
}
