use std::collections::BTreeMap;
use std::sync::Arc;

use uuid::Uuid;

use cfgval_core::SchemaModel;
use cfgval_store::Store;

use crate::config::ValidatorConfig;
use crate::errors::EngineResult;
use crate::fetch::{FetchCache, RequestCache};
use crate::global_cache::GlobalCache;
use crate::hooks::{HookRegistry, SessionScratch};
use crate::resolver::{DepDataForDelete, ReferenceResolver};
use crate::rules::RuleEngine;
use crate::schema_engine::SchemaEngine;
use crate::stats::{StatsRecorder, ValidationStats};

/// Process-wide validator state shared by every session.
#[derive(Clone)]
pub struct Validator {
    pub(crate) schema: Arc<SchemaModel>,
    pub(crate) engine: Arc<dyn SchemaEngine>,
    pub(crate) hooks: Arc<HookRegistry>,
    pub(crate) global_cache: GlobalCache,
    pub(crate) stats: Arc<StatsRecorder>,
    pub(crate) config: ValidatorConfig,
    pub(crate) store: Arc<dyn Store>,
}

impl Validator {
    /// Validator backed by the built-in [`RuleEngine`].
    pub fn new(
        schema: Arc<SchemaModel>,
        store: Arc<dyn Store>,
        config: ValidatorConfig,
    ) -> EngineResult<Self> {
        let engine = Arc::new(RuleEngine::new(Arc::clone(&schema))?);
        let global_cache = GlobalCache::new(
            Arc::clone(&store),
            Arc::clone(&schema),
            config.cache_ttl(),
            config.batch_size(),
        );

        tracing::info!(
            event = "validator_ready",
            store = store.engine(),
            engine = engine.engine(),
            tables = schema.tables().count(),
            cache_ttl_secs = config.cache_ttl_secs
        );

        Ok(Self {
            schema,
            engine,
            hooks: Arc::new(HookRegistry::new()),
            global_cache,
            stats: Arc::new(StatsRecorder::default()),
            config,
            store,
        })
    }

    pub fn with_engine(mut self, engine: Arc<dyn SchemaEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_hooks(mut self, hooks: HookRegistry) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn open_session(&self) -> Session {
        let session = Session {
            id: Uuid::new_v4(),
            validator: self.clone(),
            requests: RequestCache::new(),
            fetch: FetchCache::new(),
            max_elems: BTreeMap::new(),
            scratch: SessionScratch::default(),
        };
        tracing::debug!(event = "session_opened", session = %session.id);
        session
    }

    pub fn schema(&self) -> &SchemaModel {
        &self.schema
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn global_cache(&self) -> &GlobalCache {
        &self.global_cache
    }

    pub fn stats(&self) -> ValidationStats {
        self.stats.snapshot()
    }

    pub fn clear_stats(&self) {
        self.stats.clear();
    }

    /// Stop the global cache listener.
    pub async fn shutdown(&self) {
        self.global_cache.shutdown().await;
    }
}

/// Per-caller validation session.
///
/// Edits validated in earlier calls stay in the request cache and overlay
/// store data for later calls until the session is closed.
pub struct Session {
    pub(crate) id: Uuid,
    pub(crate) validator: Validator,
    pub(crate) requests: RequestCache,
    pub(crate) fetch: FetchCache,
    /// Entry count per table with a max-elements bound.
    pub(crate) max_elems: BTreeMap<String, usize>,
    pub(crate) scratch: SessionScratch,
}

impl Session {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Tables ordered so that referencing tables come first.
    pub fn sort_dep_tables<S: AsRef<str>>(&self, tables: &[S]) -> EngineResult<Vec<String>> {
        Ok(self.validator.schema.graph().sort_dep_tables(tables)?)
    }

    pub fn ordered_tables(&self, module: &str) -> EngineResult<Vec<String>> {
        Ok(self.validator.schema.graph().ordered_tables(module)?)
    }

    pub fn ordered_dep_tables(&self, module: &str, table: &str) -> EngineResult<Vec<String>> {
        Ok(self.validator.schema.graph().ordered_dep_tables(module, table)?)
    }

    pub fn dep_tables(&self, table: &str) -> EngineResult<Vec<String>> {
        Ok(self.validator.schema.graph().dep_tables(table)?)
    }

    pub fn referring_tables(&self, table: &str) -> Vec<String> {
        self.validator.schema.graph().referring_tables(table)
    }

    /// Entries to delete or trim, transitively, when `full_key` is deleted.
    pub async fn dep_data_for_delete(&self, full_key: &str) -> EngineResult<Vec<DepDataForDelete>> {
        let resolver = ReferenceResolver::new(
            &self.validator.schema,
            self.validator.store.as_ref(),
            self.validator.config.batch_size(),
        );
        resolver.dep_data_for_delete(full_key).await
    }

    pub fn store_hint(&mut self, key: &str, value: Option<serde_json::Value>) {
        self.scratch.store_hint(key, value);
    }

    pub fn load_hint(&self, key: &str) -> Option<&serde_json::Value> {
        self.scratch.load_hint(key)
    }

    pub fn close(mut self) {
        self.requests.clear();
        self.fetch.reset();
        tracing::debug!(event = "session_closed", session = %self.id);
    }
}
