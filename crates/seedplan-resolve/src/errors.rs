use thiserror::Error;

/// Errors raised while materializing a dependency operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    /// The record writer refused the record.
    #[error("record rejected by {table}: {reason}")]
    Rejected { table: String, reason: String },
    /// A `${table.field}` placeholder had no created record to point at.
    #[error("unresolved reference {placeholder}")]
    UnresolvedReference { placeholder: String },
    /// The operation this one depends on failed earlier in the run.
    #[error("dependency on {table} failed")]
    DependencyFailed { table: String },
    #[error("writer error: {0}")]
    Other(String),
}
