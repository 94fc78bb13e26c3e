use thiserror::Error;

/// Core error type for Tribune operations.
#[derive(Error, Debug)]
pub enum TribuneError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Heartbeat error: {0}")]
    Heartbeat(String),

    #[error("Message bus error: {0}")]
    Bus(String),

    /// A broadcast tick fired with no message generator installed.
    #[error("Message generator is not defined")]
    GeneratorMissing,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),
}

impl TribuneError {
    /// Whether this error signals a misconfiguration rather than a transient failure.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::GeneratorMissing | Self::Config(_))
    }
}

/// Result type alias using TribuneError.
pub type Result<T> = std::result::Result<T, TribuneError>;
