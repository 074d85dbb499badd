//! Whole-configuration validation on top of the edit pipeline.
//!
//! A configuration document maps `table -> key -> field -> value`. Scalars
//! become plain fields and arrays become leaf-lists. Entries are turned into
//! creates or updates against the current state and validated as one batch,
//! referenced tables first.

use std::collections::BTreeMap;

use serde_json::Value;

use cfgval_core::{
    EditRequest, ErrorInfo, FieldMap, LEAF_LIST_SEPARATOR, LEAF_LIST_SUFFIX, NULL_FIELD, RetCode,
};

use crate::errors::EngineError;
use crate::fetch::fetch_entries;
use crate::session::Session;

/// Configuration document: table -> key -> field -> value.
pub type ConfigDocument = BTreeMap<String, BTreeMap<String, BTreeMap<String, Value>>>;

const INVALID_JSON_MSG: &str = "Invalid JSON configuration";
const INVALID_VALUE_MSG: &str = "Invalid field value";

/// How existing entries absorb the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Merge {
    /// The document holds the complete entry; other stored fields go.
    Replace,
    /// The document is merged over the stored entry.
    Overlay,
}

pub fn parse_config(json: &str) -> Result<ConfigDocument, ErrorInfo> {
    serde_json::from_str(json).map_err(|err| {
        ErrorInfo::new(RetCode::SyntaxError, INVALID_JSON_MSG)
            .with_constraint_msg(format!("{INVALID_JSON_MSG}: {err}"))
    })
}

impl Session {
    /// Validate `json` as the complete contents of the entries it names.
    /// Stored fields the document leaves out are validated as deletes.
    pub async fn validate_config(&mut self, json: &str) -> Result<(), ErrorInfo> {
        let doc = parse_config(json)?;
        let batch = self.config_batch(&doc, Merge::Replace).await?;
        self.validate_edit_config_labeled(|| "validate_config".to_string(), &batch)
            .await
    }

    /// Validate `json` as a delta merged over the existing entries.
    pub async fn validate_incremental_config(&mut self, json: &str) -> Result<(), ErrorInfo> {
        let doc = parse_config(json)?;
        let batch = self.config_batch(&doc, Merge::Overlay).await?;
        self.validate_edit_config_labeled(|| "validate_incremental_config".to_string(), &batch)
            .await
    }

    async fn config_batch(
        &self,
        doc: &ConfigDocument,
        merge: Merge,
    ) -> Result<Vec<EditRequest>, ErrorInfo> {
        let schema = &self.validator.schema;
        let mut store_keys = Vec::new();
        for (table, entries) in doc {
            let Some(info) = schema.table(table) else {
                return Err(
                    ErrorInfo::new(RetCode::SyntaxError, format!("Unknown table {table}"))
                        .with_table(table.as_str()),
                );
            };
            store_keys.extend(entries.keys().map(|key| info.store_key(key)));
        }

        let tables: Vec<&str> = doc.keys().map(String::as_str).collect();
        let mut order = schema
            .graph()
            .sort_dep_tables(&tables)
            .map_err(EngineError::from)?;
        order.reverse();

        let stored: BTreeMap<String, FieldMap> = fetch_entries(
            self.validator.store.as_ref(),
            &store_keys,
            self.validator.config.batch_size(),
        )
        .await?
        .into_iter()
        .collect();

        let mut batch = Vec::with_capacity(store_keys.len());
        for table in &order {
            let (Some(info), Some(entries)) = (schema.table(table), doc.get(table)) else {
                continue;
            };
            for (key, values) in entries {
                let store_key = info.store_key(key);
                let fields = flat_fields(&info.name, info.key_components(key), values)?;
                let base = stored.get(&store_key).cloned();
                let current = self.requests.replay(&info.name, key, base, u64::MAX);

                let Some(current) = current else {
                    let fields = if fields.is_empty() {
                        FieldMap::from([(NULL_FIELD.to_string(), NULL_FIELD.to_string())])
                    } else {
                        fields
                    };
                    batch.push(EditRequest::create(store_key, fields));
                    continue;
                };

                let stale: FieldMap = match merge {
                    Merge::Overlay => FieldMap::new(),
                    Merge::Replace => current
                        .keys()
                        .filter(|name| name.as_str() != NULL_FIELD && !fields.contains_key(*name))
                        .map(|name| (name.clone(), String::new()))
                        .collect(),
                };
                if !fields.is_empty() {
                    batch.push(EditRequest::update(store_key.clone(), fields));
                }
                if !stale.is_empty() {
                    batch.push(EditRequest::delete(store_key, stale));
                }
            }
        }

        tracing::debug!(
            event = "config_batch_built",
            session = %self.id,
            tables = order.len(),
            items = batch.len(),
            merge = ?merge
        );
        Ok(batch)
    }
}

fn flat_fields(
    table: &str,
    keys: Vec<String>,
    values: &BTreeMap<String, Value>,
) -> Result<FieldMap, ErrorInfo> {
    let mut flat = FieldMap::new();
    for (name, value) in values {
        let invalid = || {
            ErrorInfo::new(RetCode::SyntaxInvalidInputData, INVALID_VALUE_MSG)
                .with_table(table)
                .with_keys(keys.clone())
                .with_field(name.as_str())
        };
        match value {
            Value::Array(items) => {
                let items = items
                    .iter()
                    .map(|item| scalar(item).ok_or_else(invalid))
                    .collect::<Result<Vec<_>, _>>()?;
                let name = if name.ends_with(LEAF_LIST_SUFFIX) {
                    name.clone()
                } else {
                    format!("{name}{LEAF_LIST_SUFFIX}")
                };
                flat.insert(name, items.join(LEAF_LIST_SEPARATOR.to_string().as_str()));
            }
            other => {
                flat.insert(name.clone(), scalar(other).ok_or_else(invalid)?);
            }
        }
    }
    Ok(flat)
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}
