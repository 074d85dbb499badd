use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use cfgval_core::{EditRequest, ErrorInfo, FieldMap, NULL_FIELD, Operation, RetCode, SchemaModel};
use cfgval_store::Store;

use crate::tree::EntryNode;

/// One batch edit as seen by custom validators: table and key split apart,
/// placeholder fields removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HookEdit {
    pub table: String,
    pub key: String,
    pub op: Operation,
    pub fields: FieldMap,
    pub replace: bool,
}

impl HookEdit {
    /// Checked conversion of a request; unknown tables are rejected.
    pub fn from_request(schema: &SchemaModel, request: &EditRequest) -> Result<Self, ErrorInfo> {
        let (info, key) = schema.try_split_key(&request.key).ok_or_else(|| {
            ErrorInfo::new(
                RetCode::SyntaxError,
                format!("Invalid table or key for {}", request.key),
            )
        })?;
        Ok(Self {
            table: info.name.clone(),
            key: key.to_string(),
            op: request.op,
            fields: request
                .fields
                .iter()
                .filter(|(name, _)| name.as_str() != NULL_FIELD)
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            replace: request.replace,
        })
    }
}

/// Opaque per-session values shared with custom validators.
#[derive(Debug, Default)]
pub struct SessionScratch {
    hints: BTreeMap<String, serde_json::Value>,
}

impl SessionScratch {
    /// `None` removes `key`; an empty key clears every hint.
    pub fn store_hint(&mut self, key: &str, value: Option<serde_json::Value>) {
        if key.is_empty() {
            self.hints.clear();
            return;
        }
        match value {
            Some(value) => {
                self.hints.insert(key.to_string(), value);
            }
            None => {
                self.hints.remove(key);
            }
        }
    }

    pub fn load_hint(&self, key: &str) -> Option<&serde_json::Value> {
        self.hints.get(key)
    }

    pub fn len(&self) -> usize {
        self.hints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hints.is_empty()
    }
}

/// Everything a custom validator sees for one node of one edit.
pub struct HookContext<'a> {
    pub edits: &'a [HookEdit],
    pub current: &'a HookEdit,
    /// Field the hook is declared on; empty for table-level hooks.
    pub node_name: &'a str,
    pub node_value: String,
    /// Entry after the edit, merged with stored data.
    pub entry: &'a EntryNode,
    pub scratch: &'a mut SessionScratch,
    pub store: &'a dyn Store,
}

/// Application-provided validation invoked by hook name.
#[async_trait]
pub trait CustomValidator: Send + Sync {
    async fn validate(&self, ctx: &mut HookContext<'_>) -> Result<(), ErrorInfo>;
}

/// Name -> validator lookup shared by every session of a validator.
#[derive(Default, Clone)]
pub struct HookRegistry {
    hooks: BTreeMap<String, Arc<dyn CustomValidator>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, hook: Arc<dyn CustomValidator>) {
        self.hooks.insert(name.into(), hook);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CustomValidator>> {
        self.hooks.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.hooks.keys().map(String::as_str)
    }
}
