//! Validation engine for cfgval.
//!
//! A [`Validator`] holds the schema, the schema engine, the custom hook
//! registry and the process-wide [`GlobalCache`]. Callers open a [`Session`]
//! and submit batches of edits; each batch goes through key parsing,
//! pre-checks, pipelined dependent-data fetch, syntax validation and
//! per-entry semantic validation, and the first failure comes back as a
//! structured [`cfgval_core::ErrorInfo`]. Whole configuration documents are
//! validated through the same pipeline.

pub mod config;
pub mod errors;
pub mod fetch;
pub mod global_cache;
pub mod hooks;
mod pipeline;
pub mod resolver;
pub mod rules;
pub mod schema_engine;
pub mod session;
pub mod stats;
pub mod tree;
pub mod whole_config;

pub use config::{DEFAULT_CACHE_TTL_SECS, MAX_BULK_ENTRIES_IN_PIPELINE, ValidatorConfig};
pub use errors::{EngineError, EngineResult};
pub use fetch::{FetchCache, FetchState, RequestCache};
pub use global_cache::{GlobalCache, GlobalCacheStats, TableData};
pub use hooks::{CustomValidator, HookContext, HookEdit, HookRegistry, SessionScratch};
pub use resolver::{DepDataForDelete, ReferenceResolver};
pub use rules::RuleEngine;
pub use schema_engine::{SchemaEngine, SemanticTarget};
pub use session::{Session, Validator};
pub use stats::{StatsRecorder, ValidationStats};
pub use tree::{DataTree, EntryNode, FieldValue, Origin};
pub use whole_config::{ConfigDocument, parse_config};
