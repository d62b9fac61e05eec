//! Error types for ward-core

use thiserror::Error;

use crate::gateway::GatewayError;

/// Result type alias using ward-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ward-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Network gateway error (transport, timeout, or server response)
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Document or entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Optimistic-concurrency put lost against a concurrent writer
    #[error("Revision conflict for document {0}")]
    RevisionConflict(String),

    /// The operation is restricted to online use and no connectivity is available
    #[error("This operation requires connectivity")]
    RequiresConnectivity,
}

impl Error {
    /// Whether the error is a transient network condition that the offline
    /// path can absorb (queue + optimistic write) rather than surface.
    pub const fn is_transient_network(&self) -> bool {
        match self {
            Self::Gateway(gateway) => gateway.is_transient(),
            _ => false,
        }
    }
}
