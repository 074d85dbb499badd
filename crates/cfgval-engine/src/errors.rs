use thiserror::Error;

use cfgval_core::ErrorInfo;
use cfgval_store::StoreError;

/// Engine failures that are not validation verdicts.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("core error: {0}")]
    Core(#[from] cfgval_core::Error),
    #[error("expression error in {context}: {message}")]
    Expression { context: String, message: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

impl From<EngineError> for ErrorInfo {
    fn from(err: EngineError) -> Self {
        ErrorInfo::internal(err.to_string())
    }
}
