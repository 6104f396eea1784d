//! Error taxonomy for the offline core.
//!
//! `StoreError` covers the local mirror (a cache, never the system of
//! record — read-side callers degrade to empty results instead of
//! propagating). `RemoteError` covers live and replayed calls against the
//! hosted backend and is what gets recorded on a pending mutation when a
//! replay attempt fails.

use thiserror::Error;

/// Failures of the local durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("unknown store '{0}'")]
    UnknownStore(String),

    #[error("store '{store}' has no declared index on '{field}'")]
    UnknownIndex { store: String, field: String },

    #[error("row has no 'id' field")]
    MissingKey,

    #[error("row is not a JSON object")]
    NotAnObject,

    #[error("serialize/deserialize row: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("store connection lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// True when the error indicates degraded offline capability rather
    /// than a caller bug (used to decide warn-and-continue vs propagate).
    pub fn is_degraded_capability(&self) -> bool {
        matches!(self, StoreError::Sqlite(_) | StoreError::Poisoned)
    }
}

/// Failures talking to the hosted backend.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("{0}")]
    Network(String),

    #[error("{message} (HTTP {status})")]
    Status { status: u16, message: String },

    #[error("invalid response from backend: {0}")]
    BadResponse(String),
}

impl RemoteError {
    /// Map a transport-level reqwest error to a user-readable message,
    /// mirroring what the UI shows in its "saved offline" fallback path.
    pub fn from_transport(base_url: &str, err: &reqwest::Error) -> Self {
        if err.is_connect() {
            return RemoteError::Network(format!("cannot reach backend at {base_url}"));
        }
        if err.is_timeout() {
            return RemoteError::Network(format!("connection to {base_url} timed out"));
        }
        RemoteError::Network(format!("network error communicating with {base_url}: {err}"))
    }
}
