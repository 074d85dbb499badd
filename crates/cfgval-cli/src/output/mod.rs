mod atomic;
mod logging;
mod report;

use thiserror::Error;

pub use atomic::write_json_atomic;
pub use logging::init_logging;
pub use report::{BatchOutcome, ValidationReport, load_batch, load_config};

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("logging error: {0}")]
    Logging(String),
    #[error("invalid output: {0}")]
    Invalid(String),
}

pub type OutputResult<T> = Result<T, OutputError>;
