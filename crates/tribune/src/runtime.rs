//! Wiring for a single PostgreSQL-backed worker.

use tokio::sync::broadcast;

use tribune_core::cluster::NodeId;
use tribune_core::config::TribuneConfig;
use tribune_core::error::{Result, TribuneError};
use tribune_runtime::pg::{self, Database};
use tribune_runtime::Worker;

/// Prelude module for common imports.
pub mod prelude {
    pub use uuid::Uuid;

    pub use tribune_core::cluster::{NodeId, Payload, WorkerMode};
    pub use tribune_core::config::TribuneConfig;
    pub use tribune_core::error::{Result, TribuneError};
    pub use tribune_runtime::{ElectionOutcome, ErrorReporter, Worker};

    pub use crate::{Tribune, TribuneBuilder};
}

/// A configured node, ready to connect its worker to the database.
pub struct Tribune {
    config: TribuneConfig,
    node_id: NodeId,
    shutdown_tx: broadcast::Sender<()>,
}

impl Tribune {
    pub fn builder() -> TribuneBuilder {
        TribuneBuilder::new()
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn config(&self) -> &TribuneConfig {
        &self.config
    }

    /// Connect to the database, install the schema and build a worker.
    ///
    /// The worker is not started; install callbacks before calling `run`.
    pub async fn connect(&self) -> Result<Worker> {
        let db = Database::from_config(&self.config.database).await?;
        db.health_check().await?;
        pg::ensure_schema(db.pool()).await?;
        tracing::info!(node_id = %self.node_id, "Connected to database");

        let backend = pg::backend(&db, self.node_id, self.config.heartbeat.clone());
        Ok(Worker::with_config(
            self.node_id,
            backend,
            self.config.worker.clone(),
        ))
    }

    /// Start `worker` and keep it running until shutdown.
    ///
    /// Returns early with the error if the worker raises a fatal one.
    pub async fn run(&self, worker: &Worker) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut fatal = worker.fatal_errors();

        worker.start().await?;
        tracing::info!(node_id = %self.node_id, "Tribune worker running");

        let outcome = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal");
                Ok(())
            }
            _ = shutdown_rx.recv() => {
                tracing::info!("Received shutdown notification");
                Ok(())
            }
            Ok(()) = fatal.changed() => {
                let raised = fatal.borrow().clone();
                match raised.as_deref() {
                    Some(TribuneError::GeneratorMissing) => Err(TribuneError::GeneratorMissing),
                    Some(e) => Err(TribuneError::InvalidState(e.to_string())),
                    None => Ok(()),
                }
            }
        };

        worker.end().await?;
        tracing::info!(node_id = %self.node_id, "Tribune worker stopped");
        outcome
    }

    /// Request shutdown of a running `run`.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Builder for a `Tribune` node.
#[derive(Default)]
pub struct TribuneBuilder {
    config: Option<TribuneConfig>,
    node_id: Option<NodeId>,
}

impl TribuneBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration.
    pub fn config(mut self, config: TribuneConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Load the configuration from a TOML file.
    pub fn config_file(self, path: impl AsRef<std::path::Path>) -> Result<Self> {
        Ok(self.config(TribuneConfig::from_file(path)?))
    }

    /// Override the node ID from the configuration.
    pub fn node_id(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }

    pub fn build(self) -> Result<Tribune> {
        let config = self
            .config
            .ok_or_else(|| TribuneError::Config("Configuration is required".to_string()))?;
        let node_id = self.node_id.unwrap_or_else(|| config.node.node_id());
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Tribune {
            config,
            node_id,
            shutdown_tx,
        })
    }
}
