use async_trait::async_trait;
use thiserror::Error;

use cfgval_core::FieldMap;

use crate::notify::Subscription;
use crate::pipeline::{Pipeline, Reply};
use crate::search::{Record, Search};

/// Errors raised by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid store request: {0}")]
    InvalidRequest(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Trait implemented by key-value configuration stores.
///
/// Keys are full store keys (`TABLE|key`); every key holds a flat hash.
#[async_trait]
pub trait Store: Send + Sync {
    /// Returns the engine identifier (e.g. `memory`).
    fn engine(&self) -> &'static str;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Keys matching a glob pattern (`*`, `?`, `\` escapes).
    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>>;

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>>;

    async fn hmget(&self, key: &str, fields: &[String]) -> StoreResult<Vec<Option<String>>>;

    /// All fields of a key; empty when the key does not exist.
    async fn hgetall(&self, key: &str) -> StoreResult<FieldMap>;

    /// Execute a batch of reads in one round trip. Replies follow command order.
    async fn exec(&self, pipeline: Pipeline) -> StoreResult<Vec<Reply>>;

    /// Entries matching a key pattern and optional predicate/field filter.
    async fn lookup(&self, search: &Search) -> StoreResult<Vec<Record>>;

    /// Number of entries [`Store::lookup`] would return.
    async fn count(&self, search: &Search) -> StoreResult<usize>;

    /// Subscribe to change events for keys matching any of the patterns.
    async fn subscribe(&self, patterns: &[String]) -> StoreResult<Subscription>;
}
