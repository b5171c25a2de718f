//! Sync error types.

use thiserror::Error;

use crate::db::StoreError;

/// Errors that can occur while configuring or running a replication.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Endpoint or credentials missing or malformed
    #[error("Sync not configured: {0}")]
    Configuration(String),

    /// Could not reach the server
    #[error("Connection error: {0}")]
    Connection(String),

    /// The server rejected the credentials
    #[error("Authentication failed for {url} (status {status})")]
    Unauthorized { url: String, status: u16 },

    /// Unexpected HTTP status
    #[error("Server returned status {status} for {url}")]
    Http { url: String, status: u16 },

    /// The server answered with something we could not understand
    #[error("Sync protocol error: {0}")]
    Protocol(String),

    /// The engine task could not be spawned
    #[error("Replicator could not start: {0}")]
    Start(String),

    /// Local store failure while applying or reading changes
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReplicationError {
    /// Errors worth retrying: the server may come back.
    pub fn is_transient(&self) -> bool {
        match self {
            ReplicationError::Connection(_) => true,
            ReplicationError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ReplicationError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ReplicationError::Protocol(e.to_string())
        } else {
            ReplicationError::Connection(e.to_string())
        }
    }
}
