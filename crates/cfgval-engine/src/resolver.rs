use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;

use cfgval_core::{
    DEFAULT_KEY_DELIM, ErrorInfo, FieldMap, KeyPart, LEAF_LIST_SUFFIX, ReferenceDescriptor, RetCode,
    SchemaModel, TableInfo, base_field_name, split_leaf_list,
};
use cfgval_store::{Predicate, Search, Store};

use crate::errors::EngineResult;
use crate::fetch::{FetchCache, RequestCache, fetch_entries};

pub(crate) const IN_USE_MSG: &str = "Validation failed for Delete operation, given instance is in use";
pub(crate) const IN_USE_TAG: &str = "instance-in-use";

/// Entries to delete or trim when `ref_key` is removed.
///
/// An empty field map means the whole entry goes; otherwise the named fields
/// (or leaf-list values) are removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepDataForDelete {
    pub ref_key: String,
    pub entries: BTreeMap<String, FieldMap>,
}

/// Value of `field` in an entry, read from the key components first.
pub(crate) fn entry_values(info: &TableInfo, key: &str, fields: &FieldMap, field: &str) -> Vec<String> {
    let field = base_field_name(field);
    if let Some((_, value)) = info
        .key_pattern
        .bind(key)
        .into_iter()
        .find(|(name, _)| name == field)
    {
        return vec![value];
    }
    if let Some(value) = fields.get(&format!("{field}{LEAF_LIST_SUFFIX}")) {
        return split_leaf_list(value);
    }
    match fields.get(field) {
        Some(value) if info.field(field).is_some_and(|f| f.is_leaf_list()) => split_leaf_list(value),
        Some(value) => vec![value.clone()],
        None => Vec::new(),
    }
}

/// Resolves leafref targets to store keys and answers reverse-reference queries.
pub struct ReferenceResolver<'a> {
    schema: &'a SchemaModel,
    store: &'a dyn Store,
    batch: usize,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(schema: &'a SchemaModel, store: &'a dyn Store, batch: usize) -> Self {
        Self {
            schema,
            store,
            batch: batch.max(1),
        }
    }

    /// Key of the single target entry a leafref value names, when the
    /// descriptor and its key bindings pin down every key component.
    pub fn exact_target_key(
        &self,
        info: &TableInfo,
        key: &str,
        fields: &FieldMap,
        descriptor: &ReferenceDescriptor,
        value: &str,
    ) -> Option<String> {
        let target = self.schema.table(&descriptor.target_table)?;
        if !target.is_key(&descriptor.target_field) {
            return None;
        }

        let mut known: BTreeMap<String, String> = BTreeMap::new();
        known.insert(descriptor.target_field.clone(), value.to_string());
        for binding in &descriptor.bindings {
            if let Some(bound) = entry_values(info, key, fields, &binding.source_field).first() {
                known.insert(binding.target_field.clone(), bound.clone());
            }
        }

        let mut components = Vec::with_capacity(target.key_pattern.parts().len());
        for part in target.key_pattern.parts() {
            match part {
                KeyPart::Field(name) => components.push(known.get(name)?.clone()),
                KeyPart::LeafList(_) => return None,
            }
        }
        Some(components.join(target.key_delim()))
    }

    /// Exact (table, key) targets of every leafref value an entry holds.
    pub fn exact_leafref_targets(
        &self,
        table: &str,
        key: &str,
        fields: &FieldMap,
    ) -> Vec<(String, String)> {
        let Some(info) = self.schema.table(table) else {
            return Vec::new();
        };
        let mut targets = Vec::new();
        for (field, descriptors) in &info.leafrefs {
            for value in entry_values(info, key, fields, field) {
                if value.is_empty() {
                    continue;
                }
                for descriptor in descriptors {
                    if descriptor.target_table == info.name {
                        continue;
                    }
                    if let Some(target_key) = self.exact_target_key(info, key, fields, descriptor, &value) {
                        targets.push((descriptor.target_table.clone(), target_key));
                    }
                }
            }
        }
        targets
    }

    /// Stage the targets of the leafref fields an edit carries. Tables in
    /// `skip` are supplied by must-expression prefetch instead.
    pub async fn stage_leafrefs(
        &self,
        fetch: &mut FetchCache,
        requests: &RequestCache,
        info: &TableInfo,
        key: &str,
        fields: &FieldMap,
        skip: &BTreeSet<String>,
    ) -> EngineResult<()> {
        for (field, descriptors) in &info.leafrefs {
            let carried = fields.keys().any(|name| base_field_name(name) == field) || info.is_key(field);
            if !carried {
                continue;
            }
            for value in entry_values(info, key, fields, field) {
                if value.is_empty() {
                    continue;
                }
                for descriptor in descriptors {
                    if skip.contains(&descriptor.target_table) {
                        continue;
                    }
                    let Some(target) = self.schema.table(&descriptor.target_table) else {
                        continue;
                    };

                    if let Some(target_key) = self.exact_target_key(info, key, fields, descriptor, &value) {
                        fetch.stage(&target.name, &target_key);
                        continue;
                    }

                    for found in self.find_targets(target, descriptor, &value).await? {
                        fetch.stage(&target.name, &found);
                    }
                    for pending in requests.keys_upto(&target.name, u64::MAX) {
                        fetch.stage(&target.name, &pending);
                    }
                }
            }
        }
        Ok(())
    }

    /// Store keys (without table prefix) of target entries holding `value`.
    async fn find_targets(
        &self,
        target: &TableInfo,
        descriptor: &ReferenceDescriptor,
        value: &str,
    ) -> EngineResult<Vec<String>> {
        let prefix_len = target.name.len() + target.key_delim().len();
        let full_keys = if target.is_key(&descriptor.target_field) {
            let known = BTreeMap::from([(descriptor.target_field.as_str(), value)]);
            self.store
                .keys(&target.key_pattern.find_expression(&known))
                .await?
        } else {
            let search = Search::new(target.key_pattern.table_glob())
                .with_keys(target.keys.clone(), target.key_delim())
                .with_predicate(Predicate::FieldEquals {
                    field: descriptor.target_field.clone(),
                    value: value.to_string(),
                });
            self.store
                .lookup(&search)
                .await?
                .into_iter()
                .map(|record| record.key)
                .collect()
        };
        Ok(full_keys
            .into_iter()
            .filter_map(|full_key| full_key.get(prefix_len..).map(str::to_string))
            .collect())
    }

    /// Entry state before edit `seq`: store data overlaid with earlier edits.
    async fn entry_before(
        &self,
        requests: &RequestCache,
        info: &TableInfo,
        key: &str,
        seq: u64,
    ) -> EngineResult<Option<FieldMap>> {
        let before = seq.saturating_sub(1);
        if let Some(state) = requests.resolve_before(&info.name, key, seq) {
            return Ok(state);
        }
        let stored = self.store.hgetall(&info.store_key(key)).await?;
        let base = (!stored.is_empty()).then_some(stored);
        Ok(requests.replay(&info.name, key, base, before))
    }

    /// Reject deleting an entry (or one of its fields) that other entries
    /// still reference once the edits before `seq` are applied.
    pub async fn check_delete_constraint(
        &self,
        requests: &RequestCache,
        info: &TableInfo,
        key: &str,
        field: Option<&str>,
        seq: u64,
    ) -> EngineResult<Option<ErrorInfo>> {
        let field = field.map(base_field_name);
        let own = self
            .entry_before(requests, info, key, seq)
            .await?
            .unwrap_or_default();

        for reverse in &info.reverse_refs {
            let Some(referrer) = self.schema.table(&reverse.table) else {
                continue;
            };
            for descriptor in referrer.references_to(&reverse.field, &info.name) {
                if let Some(field) = field {
                    if descriptor.target_field != field {
                        continue;
                    }
                }

                for value in entry_values(info, key, &own, &descriptor.target_field) {
                    if value.is_empty() {
                        continue;
                    }
                    let found = self
                        .find_referrer(requests, referrer, &reverse.field, descriptor, info, key, &own, &value, seq)
                        .await?;
                    if let Some(ref_key) = found {
                        tracing::debug!(
                            event = "delete_constraint_violated",
                            table = %info.name,
                            key = %key,
                            referrer = %referrer.store_key(&ref_key),
                            field = %reverse.field
                        );
                        return Ok(Some(
                            ErrorInfo::new(RetCode::SemanticError, IN_USE_MSG)
                                .with_table(info.name.as_str())
                                .with_keys(info.key_components(key))
                                .with_field(field.unwrap_or_default())
                                .with_value(value)
                                .with_constraint_msg(IN_USE_MSG)
                                .with_app_tag(IN_USE_TAG),
                        ));
                    }
                }
            }
        }
        Ok(None)
    }

    /// First entry of `referrer` whose `field` still points at `value`.
    #[allow(clippy::too_many_arguments)]
    async fn find_referrer(
        &self,
        requests: &RequestCache,
        referrer: &TableInfo,
        field: &str,
        descriptor: &ReferenceDescriptor,
        target: &TableInfo,
        target_key: &str,
        target_fields: &FieldMap,
        value: &str,
        seq: u64,
    ) -> EngineResult<Option<String>> {
        let mut candidates = self.stored_referrers(referrer, field, &target.name, value).await?;

        let missing: Vec<String> = requests
            .keys_upto(&referrer.name, seq.saturating_sub(1))
            .into_iter()
            .filter(|key| !candidates.contains_key(key))
            .map(|key| referrer.store_key(&key))
            .collect();
        let prefix_len = referrer.name.len() + referrer.key_delim().len();
        for (full_key, fields) in fetch_entries(self.store, &missing, self.batch).await? {
            if let Some(key) = full_key.get(prefix_len..) {
                candidates.insert(key.to_string(), Some(fields));
            }
        }
        for key in requests.keys_upto(&referrer.name, seq.saturating_sub(1)) {
            candidates.entry(key).or_insert(None);
        }

        for (key, base) in candidates {
            if referrer.name == target.name && key == target_key {
                continue;
            }
            let Some(fields) = requests.replay(&referrer.name, &key, base, seq.saturating_sub(1)) else {
                continue;
            };
            let holds = entry_values(referrer, &key, &fields, field)
                .iter()
                .any(|held| held == value || *held == format!("[{}{}{}]", target.name, target.key_delim(), value));
            if holds && self.bindings_match(referrer, &key, &fields, descriptor, target, target_key, target_fields) {
                return Ok(Some(key));
            }
        }
        Ok(None)
    }

    /// Store entries of `referrer` whose `field` holds `value`, keyed without prefix.
    async fn stored_referrers(
        &self,
        referrer: &TableInfo,
        field: &str,
        target_table: &str,
        value: &str,
    ) -> EngineResult<BTreeMap<String, Option<FieldMap>>> {
        let prefix_len = referrer.name.len() + referrer.key_delim().len();
        let mut found = BTreeMap::new();

        if referrer.is_key(field) {
            let known = BTreeMap::from([(base_field_name(field), value)]);
            let keys = self
                .store
                .keys(&referrer.key_pattern.find_expression(&known))
                .await?;
            for (full_key, fields) in fetch_entries(self.store, &keys, self.batch).await? {
                if let Some(key) = full_key.get(prefix_len..) {
                    found.insert(key.to_string(), Some(fields));
                }
            }
            return Ok(found);
        }

        let target_delim = self
            .schema
            .table(target_table)
            .map(TableInfo::key_delim)
            .unwrap_or(DEFAULT_KEY_DELIM);
        let search = Search::new(referrer.key_pattern.table_glob())
            .with_keys(referrer.keys.clone(), referrer.key_delim())
            .with_predicate(reference_predicate(field, target_table, target_delim, value));
        for record in self.store.lookup(&search).await? {
            if let Some(key) = record.key.get(prefix_len..) {
                found.insert(key.to_string(), Some(record.fields));
            }
        }
        Ok(found)
    }

    /// Whether every key binding of the descriptor agrees with the target entry.
    #[allow(clippy::too_many_arguments)]
    fn bindings_match(
        &self,
        referrer: &TableInfo,
        key: &str,
        fields: &FieldMap,
        descriptor: &ReferenceDescriptor,
        target: &TableInfo,
        target_key: &str,
        target_fields: &FieldMap,
    ) -> bool {
        descriptor.bindings.iter().all(|binding| {
            let source = entry_values(referrer, key, fields, &binding.source_field);
            let bound = entry_values(target, target_key, target_fields, &binding.target_field);
            source.is_empty() || bound.is_empty() || source.iter().any(|value| bound.contains(value))
        })
    }

    /// Entries to delete or trim, transitively, when `full_key` is removed.
    ///
    /// Each discovered key is expanded once; a reference cycle cannot loop.
    pub async fn dep_data_for_delete(&self, full_key: &str) -> EngineResult<Vec<DepDataForDelete>> {
        let mut out = Vec::new();
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::from([full_key.to_string()]);

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }
            let Some((info, key)) = self.schema.try_split_key(&current) else {
                continue;
            };
            let own = self.store.hgetall(&current).await?;

            for reverse in &info.reverse_refs {
                let Some(referrer) = self.schema.table(&reverse.table) else {
                    continue;
                };
                for descriptor in referrer.references_to(&reverse.field, &info.name) {
                    let mut entries = BTreeMap::new();
                    for value in entry_values(info, key, &own, &descriptor.target_field) {
                        if value.is_empty() {
                            continue;
                        }
                        let found = self
                            .stored_referrers(referrer, &reverse.field, &info.name, &value)
                            .await?;
                        for (ref_key, fields) in found {
                            let fields = fields.unwrap_or_default();
                            if !self.bindings_match(referrer, &ref_key, &fields, descriptor, info, key, &own) {
                                continue;
                            }
                            let full_ref = referrer.store_key(&ref_key);
                            let field_info = referrer.field(&reverse.field);
                            if referrer.is_key(&reverse.field)
                                || field_info.is_some_and(|f| f.mandatory && !f.is_leaf_list())
                            {
                                entries.insert(full_ref.clone(), FieldMap::new());
                                queue.push_back(full_ref);
                            } else if field_info.is_some_and(|f| f.is_leaf_list()) {
                                entries.insert(
                                    full_ref,
                                    FieldMap::from([(format!("{}{LEAF_LIST_SUFFIX}", reverse.field), value.clone())]),
                                );
                            } else {
                                entries.insert(full_ref, FieldMap::from([(reverse.field.clone(), String::new())]));
                            }
                        }
                    }
                    if !entries.is_empty() {
                        out.push(DepDataForDelete {
                            ref_key: current.clone(),
                            entries,
                        });
                    }
                }
            }
        }

        tracing::debug!(event = "dep_data_for_delete", key = %full_key, groups = out.len());
        Ok(out)
    }
}

/// Non-key reference match: plain value, `[TABLE|value]` form, or leaf-list element.
fn reference_predicate(field: &str, target_table: &str, delim: &str, value: &str) -> Predicate {
    let field = base_field_name(field);
    Predicate::Any(vec![
        Predicate::FieldEquals {
            field: field.to_string(),
            value: value.to_string(),
        },
        Predicate::FieldEquals {
            field: field.to_string(),
            value: format!("[{target_table}{delim}{value}]"),
        },
        Predicate::LeafListContains {
            field: format!("{field}{LEAF_LIST_SUFFIX}"),
            value: value.to_string(),
        },
    ])
}
