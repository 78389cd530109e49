use thiserror::Error;

/// Result type for infra operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the shared infrastructure
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or unusable configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A global logging subscriber could not be installed
    #[error("Logging setup failed: {0}")]
    Logging(String),

    /// Internal invariant violated
    #[error("Internal error: {0}")]
    Internal(String),

    /// Free-form error, usually carrying an attached context
    #[error("{0}")]
    Custom(String),
}
