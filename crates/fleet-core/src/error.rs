//! Error types for the fleet agent.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors
    #[error("Required configuration missing: {0}")]
    ConfigMissing(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Registration errors
    #[error("Coordinator unreachable: {0}")]
    Unreachable(String),

    #[error("Registration rejected: {reason}")]
    Rejected { reason: String },

    #[error("Coordinator did not respond within {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Bootstrap deadline of {seconds}s exceeded after {attempts} attempts: {last_error}")]
    BootstrapTimeout {
        seconds: u64,
        attempts: u32,
        last_error: String,
    },

    #[error("Bootstrap cancelled")]
    Cancelled,

    // Infrastructure errors
    #[error("Cache mount failed: {0}")]
    MountFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the error may clear up on its own and is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Unreachable(_) | Error::Timeout { .. })
    }

    /// Whether the error points at the machine's configuration.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::ConfigMissing(_) | Error::InvalidConfig(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::InvalidConfig(err.to_string())
    }
}
