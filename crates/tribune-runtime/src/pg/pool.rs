use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};

use tribune_core::config::DatabaseConfig;
use tribune_core::error::{Result, TribuneError};

/// Connection pool shared by a node's collaborators.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection from configuration.
    pub async fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_secs(config.pool_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| TribuneError::StoreUnavailable(format!("Failed to connect: {}", e)))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| TribuneError::StoreUnavailable(format!("Health check failed: {}", e)))?;
        Ok(())
    }
}
