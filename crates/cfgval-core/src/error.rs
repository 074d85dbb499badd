use thiserror::Error;

/// Core error type shared across cfgval crates.
#[derive(Debug, Error)]
pub enum Error {
    /// The schema violates internal invariants.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    /// The schema document does not match its JSON Schema contract.
    #[error("schema document rejected: {0}")]
    InvalidDocument(String),
    /// The requested tables form a reference cycle.
    #[error("dependency cycle between tables: {}", .0.join(", "))]
    Cycle(Vec<String>),
    /// A table name is not part of the schema.
    #[error("unknown table: {0}")]
    UnknownTable(String),
    /// A module name is not part of the schema.
    #[error("unknown module: {0}")]
    UnknownModule(String),
    /// A requested feature is not yet supported.
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for results returned by cfgval crates.
pub type Result<T> = std::result::Result<T, Error>;
