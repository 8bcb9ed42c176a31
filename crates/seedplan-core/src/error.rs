use thiserror::Error;

/// Core error type shared across seedplan crates.
#[derive(Debug, Error)]
pub enum Error {
    /// The snapshot violates internal invariants.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
    /// A JSON document could not be encoded or decoded.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// The JSON Schema for snapshots could not be compiled.
    #[error("schema error: {0}")]
    Schema(String),
}

/// Convenience alias for results returned by seedplan crates.
pub type Result<T> = std::result::Result<T, Error>;
