//! Error types for the remote cache server.
//!
//! Most faults inside the server are recoverable: a broken region store or a dead listener is
//! logged and the call carries on. The variants here describe what went wrong when an error does
//! have to travel, either back to an RPC caller or up to the process composition root.

use std::io;
use thiserror::Error;

/// Main error type for remote cache server operations.
#[derive(Debug, Error)]
pub enum CacheServerError {
    /// Double startup, invalid attributes, or use of a server that was already shut down.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The backing store failed while applying or resolving a region operation.
    #[error("region access error in [{region}]: {reason}")]
    RegionAccess { region: String, reason: String },

    /// A listener could not be assigned an id or could not be persisted.
    #[error("listener registration error: {0}")]
    ListenerRegistration(String),

    /// The service directory could not be reached or refused the operation.
    #[error("directory error: {0}")]
    Directory(String),

    /// The service name is not bound in the directory.
    #[error("service [{0}] is not bound")]
    NotBound(String),

    /// A remote call failed on the wire.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CacheServerError {
    pub fn region(region: impl Into<String>, reason: impl ToString) -> Self {
        Self::RegionAccess {
            region: region.into(),
            reason: reason.to_string(),
        }
    }

    /// Faults the server swallows with a log line instead of failing the call.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::RegionAccess { .. } | Self::ListenerRegistration(_) | Self::NotBound(_)
        )
    }
}

impl From<reqwest::Error> for CacheServerError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// A specialized `Result` type for remote cache server operations.
pub type Result<T> = std::result::Result<T, CacheServerError>;
