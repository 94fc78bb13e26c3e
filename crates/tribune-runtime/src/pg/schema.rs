//! Tables backing the PostgreSQL collaborators.

use sqlx::PgPool;
use tracing::debug;

use tribune_core::error::{Result, TribuneError};

/// Advisory lock serializing schema creation across nodes ("TRIB" in hex).
const SCHEMA_LOCK_ID: i64 = 0x54524942;

pub(crate) const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS tribune_beacons (
    key TEXT PRIMARY KEY,
    value BIGINT NOT NULL,
    expires_at TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS tribune_lists (
    id BIGSERIAL PRIMARY KEY,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_tribune_lists_key ON tribune_lists (key, id);

CREATE TABLE IF NOT EXISTS tribune_lifesigns (
    name TEXT PRIMARY KEY,
    node_id UUID NOT NULL,
    last_signal TIMESTAMPTZ NOT NULL
);
"#;

/// Create the Tribune tables if they don't exist.
///
/// Holds a session advisory lock on one connection so concurrent nodes don't
/// race on DDL.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    let mut conn = pool.acquire().await?;

    debug!("Acquiring schema lock...");
    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(SCHEMA_LOCK_ID)
        .execute(&mut *conn)
        .await
        .map_err(|e| TribuneError::StoreUnavailable(format!("Failed to acquire schema lock: {}", e)))?;

    let result = sqlx::raw_sql(SCHEMA_SQL).execute(&mut *conn).await;

    if let Err(e) = sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(SCHEMA_LOCK_ID)
        .execute(&mut *conn)
        .await
    {
        tracing::warn!("Failed to release schema lock: {}", e);
    }

    result?;
    debug!("Schema ready");
    Ok(())
}
