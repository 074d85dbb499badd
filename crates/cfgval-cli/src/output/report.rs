use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use cfgval_core::{EditRequest, ErrorInfo};
use cfgval_engine::{GlobalCacheStats, ValidationStats};

use super::{OutputError, OutputResult};

/// Read a configuration document (`table -> key -> fields`) as text.
pub fn load_config(path: &Path) -> OutputResult<String> {
    let contents = std::fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Err(OutputError::Invalid(format!("{} is empty", path.display())));
    }
    Ok(contents)
}

/// Read one batch file: a JSON array of edit requests.
pub fn load_batch(path: &Path) -> OutputResult<Vec<EditRequest>> {
    let contents = std::fs::read_to_string(path)?;
    let batch: Vec<EditRequest> = serde_json::from_str(&contents)?;
    if batch.is_empty() {
        return Err(OutputError::Invalid(format!("{} holds no edits", path.display())));
    }
    Ok(batch)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Accepted,
    Rejected,
}

/// Result of validating one batch file within the run's session.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub source: String,
    pub items: usize,
    pub status: BatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl BatchOutcome {
    pub fn new(source: impl Into<String>, items: usize, result: Result<(), ErrorInfo>) -> Self {
        let source = source.into();
        match result {
            Ok(()) => Self {
                source,
                items,
                status: BatchStatus::Accepted,
                message: None,
                error: None,
            },
            Err(error) => Self {
                source,
                items,
                status: BatchStatus::Rejected,
                message: Some(error.message()),
                error: Some(error),
            },
        }
    }

    pub fn is_rejected(&self) -> bool {
        self.status == BatchStatus::Rejected
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub run_id: Uuid,
    pub session_id: Uuid,
    pub schema_version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub accepted: usize,
    pub rejected: usize,
    pub batches: Vec<BatchOutcome>,
    pub stats: ValidationStats,
    pub cache: GlobalCacheStats,
}

impl ValidationReport {
    pub fn new(
        run_id: Uuid,
        session_id: Uuid,
        schema_version: &str,
        started_at: DateTime<Utc>,
        batches: Vec<BatchOutcome>,
        stats: ValidationStats,
        cache: GlobalCacheStats,
    ) -> Self {
        let rejected = batches.iter().filter(|batch| batch.is_rejected()).count();
        Self {
            run_id,
            session_id,
            schema_version: schema_version.to_string(),
            started_at,
            finished_at: Utc::now(),
            accepted: batches.len() - rejected,
            rejected,
            batches,
            stats,
            cache,
        }
    }
}
