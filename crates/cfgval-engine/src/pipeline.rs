use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use cfgval_core::{
    EditRequest, ErrorInfo, FieldMap, NULL_FIELD, Operation, RetCode, SchemaModel, TableInfo,
    ValidateType, base_field_name,
};
use cfgval_store::Search;

use crate::errors::EngineError;
use crate::global_cache::TableData;
use crate::hooks::{HookContext, HookEdit};
use crate::resolver::ReferenceResolver;
use crate::schema_engine::SemanticTarget;
use crate::session::Session;
use crate::tree::{DataTree, EntryNode, Origin};

const MAX_ELEMENTS_MSG: &str = "Max elements limit reached";
const MAX_ELEMENTS_TAG: &str = "too-many-elements";
const MANDATORY_DELETE_MSG: &str = "Mandatory field getting deleted";
const MANDATORY_DELETE_TAG: &str = "mandatory-field-delete";

/// One batch item with its key split and its request-cache sequence number.
struct Item<'b> {
    request: &'b EditRequest,
    info: &'b TableInfo,
    key: &'b str,
    seq: u64,
}

impl Item<'_> {
    fn table(&self) -> &str {
        &self.info.name
    }

    fn keys(&self) -> Vec<String> {
        self.info.key_components(self.key)
    }
}

impl Session {
    /// Validate one batch of edits against store data and the edits this
    /// session accepted earlier. Fails fast on the first invalid item; a
    /// failed call leaves the session as it was before the call.
    pub async fn validate_edit_config(&mut self, batch: &[EditRequest]) -> Result<(), ErrorInfo> {
        self.validate_edit_config_labeled(String::new, batch).await
    }

    /// Like [`Session::validate_edit_config`]; `label` names the caller in
    /// debug logs and is only evaluated when debug logging is enabled.
    pub async fn validate_edit_config_labeled<F>(
        &mut self,
        label: F,
        batch: &[EditRequest],
    ) -> Result<(), ErrorInfo>
    where
        F: FnOnce() -> String + Send,
    {
        let _timer = self.validator.stats.start();
        if self.validator.config.skip_validation {
            return Ok(());
        }
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(
                event = "validate_edit_config",
                session = %self.id,
                caller = %label(),
                items = batch.len()
            );
        }

        let schema = Arc::clone(&self.validator.schema);
        let call_start = self.requests.next_seq();
        let counts = self.max_elems.clone();

        let result = self.run(&schema, batch, call_start).await;
        match &result {
            Ok(()) => {
                tracing::debug!(event = "validation_succeeded", session = %self.id, items = batch.len());
            }
            Err(err) => {
                self.requests.truncate_from(call_start);
                self.max_elems = counts;
                tracing::info!(
                    event = "validation_failed",
                    session = %self.id,
                    code = ?err.code,
                    table = %err.table,
                    field = %err.field,
                    msg = %err.msg
                );
            }
        }
        self.fetch.reset();
        result
    }

    async fn run(
        &mut self,
        schema: &SchemaModel,
        batch: &[EditRequest],
        call_start: u64,
    ) -> Result<(), ErrorInfo> {
        let items = self.parse_keys(schema, batch)?;
        let check_syntax = self.pre_check(schema, &items).await?;

        let store = Arc::clone(&self.validator.store);
        let batch_size = self.validator.config.batch_size();
        let resolver = ReferenceResolver::new(schema, store.as_ref(), batch_size);
        let chain = |table: &str, key: &str, fields: &FieldMap| resolver.exact_leafref_targets(table, key, fields);
        self.fetch
            .flush(store.as_ref(), schema, &self.requests, call_start, batch_size, chain)
            .await?;

        if check_syntax {
            let (tree, dep) = self.syntax_trees(&items);
            if !tree.is_empty() {
                self.validator.engine.validate_syntax(&tree, &dep)?;
            }
        }
        if self.validator.config.skip_semantic_validation {
            return Ok(());
        }

        let edits = batch
            .iter()
            .map(|request| HookEdit::from_request(schema, request))
            .collect::<Result<Vec<_>, _>>()?;
        let mut prefetched = BTreeMap::new();
        for (index, item) in items.iter().enumerate() {
            if !item.request.validate_type.checks_semantics() {
                continue;
            }
            match item.request.op {
                Operation::None => continue,
                Operation::Update if item.request.is_null_only() => continue,
                Operation::Delete if item.request.replace => continue,
                _ => {}
            }
            self.validate_semantics(schema, &items, index, &edits, &mut prefetched)
                .await?;
        }
        Ok(())
    }

    /// Split every key and feed the request cache in batch order.
    fn parse_keys<'b>(
        &mut self,
        schema: &'b SchemaModel,
        batch: &'b [EditRequest],
    ) -> Result<Vec<Item<'b>>, ErrorInfo> {
        let mut items = Vec::with_capacity(batch.len());
        for request in batch {
            let Some((info, key)) = schema.try_split_key(&request.key) else {
                return Err(ErrorInfo::new(
                    RetCode::SyntaxError,
                    format!("Invalid table or key for {}", request.key),
                )
                .with_keys(vec![request.key.clone()]));
            };
            let seq = self
                .requests
                .push(&info.name, key, request.op, request.fields.clone());
            items.push(Item {
                request,
                info,
                key,
                seq,
            });
        }
        Ok(items)
    }

    /// Max-elements and delete checks, and staging of dependent data.
    /// Returns whether syntax validation still applies to the call.
    async fn pre_check(&mut self, schema: &SchemaModel, items: &[Item<'_>]) -> Result<bool, ErrorInfo> {
        let store = Arc::clone(&self.validator.store);
        let resolver = ReferenceResolver::new(schema, store.as_ref(), self.validator.config.batch_size());
        let mut check_syntax = true;

        for item in items {
            if item.request.validate_type == ValidateType::None {
                continue;
            }
            let (info, key, seq) = (item.info, item.key, item.seq);

            match item.request.op {
                Operation::Create => {
                    self.check_max_elements(item).await?;
                    self.fetch.stage(&info.name, key);
                }
                Operation::Update => {
                    self.fetch.stage(&info.name, key);
                }
                Operation::Delete if item.request.is_whole_delete() => {
                    if info.max_elements.is_some() {
                        let count = self.element_count(info).await?;
                        self.max_elems.insert(info.name.clone(), count.saturating_sub(1));
                    }
                    let violation = resolver
                        .check_delete_constraint(&self.requests, info, key, None, seq)
                        .await?;
                    if let Some(err) = violation {
                        return Err(err);
                    }
                    check_syntax = false;
                    self.fetch.stage(&info.name, key);
                }
                Operation::Delete => {
                    for name in item.request.fields.keys() {
                        if name == NULL_FIELD {
                            continue;
                        }
                        check_field_delete(item, name)?;
                        let violation = resolver
                            .check_delete_constraint(&self.requests, info, key, Some(name), seq)
                            .await?;
                        if let Some(err) = violation {
                            return Err(err);
                        }
                    }
                    self.fetch.stage(&info.name, key);
                }
                Operation::None => {}
            }

            if matches!(item.request.op, Operation::Create | Operation::Update) {
                let skip = info.expression_tables(item.request.op);
                resolver
                    .stage_leafrefs(
                        &mut self.fetch,
                        &self.requests,
                        info,
                        key,
                        &item.request.fields,
                        &skip,
                    )
                    .await?;
            }
        }
        Ok(check_syntax)
    }

    async fn check_max_elements(&mut self, item: &Item<'_>) -> Result<(), ErrorInfo> {
        let info = item.info;
        let Some(limit) = info.max_elements else {
            return Ok(());
        };
        let count = self.element_count(info).await?;
        if count as u64 >= limit {
            return Err(ErrorInfo::new(RetCode::SyntaxError, MAX_ELEMENTS_MSG)
                .with_table(item.table())
                .with_keys(item.keys())
                .with_constraint_msg(format!("Max elements limit {limit} reached"))
                .with_app_tag(MAX_ELEMENTS_TAG));
        }
        self.max_elems.insert(info.name.clone(), count + 1);
        Ok(())
    }

    /// Entry count of a table, read from the store once per session.
    async fn element_count(&mut self, info: &TableInfo) -> Result<usize, ErrorInfo> {
        if let Some(count) = self.max_elems.get(&info.name) {
            return Ok(*count);
        }
        let search = Search::new(info.key_pattern.table_glob());
        let count = self
            .validator
            .store
            .count(&search)
            .await
            .map_err(EngineError::from)?;
        self.max_elems.insert(info.name.clone(), count);
        Ok(count)
    }

    /// Request entries to check for syntax, and the base each complete entry
    /// is checked against: empty for creates, the current entry for updates.
    fn syntax_trees(&self, items: &[Item<'_>]) -> (DataTree, DataTree) {
        let mut tree = DataTree::new();
        let mut dep = DataTree::new();
        for item in items {
            if !item.request.validate_type.checks_syntax() {
                continue;
            }
            let (table, key) = (item.table(), item.key);
            match item.request.op {
                Operation::Create => {
                    if dep.entry(table, key).is_none() {
                        dep.insert(
                            table,
                            key,
                            EntryNode {
                                origin: Origin::Request,
                                fields: BTreeMap::new(),
                            },
                        );
                    }
                }
                Operation::Update => {
                    if dep.entry(table, key).is_none() {
                        let current = self
                            .fetch
                            .view(&self.requests, table, key, item.seq.saturating_sub(1));
                        if let Some(fields) = current {
                            dep.insert(table, key, EntryNode::from_flat(item.info, key, &fields, Origin::Store));
                        }
                    }
                }
                Operation::Delete | Operation::None => continue,
            }
            tree.upsert(
                table,
                key,
                EntryNode::from_flat(item.info, key, &item.request.fields, Origin::Request),
            );
        }

        tracing::debug!(
            event = "syntax_tree_built",
            session = %self.id,
            entries = tree.len(),
            bases = dep.len()
        );
        (tree, dep)
    }

    async fn validate_semantics(
        &mut self,
        schema: &SchemaModel,
        items: &[Item<'_>],
        index: usize,
        edits: &[HookEdit],
        prefetched: &mut BTreeMap<String, Arc<TableData>>,
    ) -> Result<(), ErrorInfo> {
        let item = &items[index];
        let request = item.request;
        let (info, table, key, seq) = (item.info, item.table(), item.key, item.seq);

        let before = self.fetch.view(&self.requests, table, key, seq.saturating_sub(1));
        match (request.op, before.is_some()) {
            (Operation::Create, true) => {
                return Err(ErrorInfo::new(RetCode::SemanticKeyAlreadyExist, "Key already exists")
                    .with_table(table)
                    .with_keys(item.keys()));
            }
            (Operation::Update | Operation::Delete, false) => {
                return Err(ErrorInfo::new(RetCode::SemanticKeyNotExist, "Key does not exist")
                    .with_table(table)
                    .with_keys(item.keys()));
            }
            _ => {}
        }

        let removed = request.is_whole_delete();
        let state = if removed {
            before
        } else {
            self.fetch.view(&self.requests, table, key, seq)
        };
        let mut entry = EntryNode::from_flat(info, key, &state.unwrap_or_default(), Origin::Request);
        if request.op == Operation::Update && request.replace {
            for later in &items[index + 1..] {
                if later.request.op == Operation::Delete
                    && later.request.replace
                    && later.table() == table
                    && later.key == key
                {
                    for name in later.request.fields.keys() {
                        entry.remove(base_field_name(name));
                    }
                }
            }
        }

        let changed: BTreeSet<String> = match request.op {
            Operation::Create => entry.fields.keys().cloned().collect(),
            _ => request
                .fields
                .keys()
                .filter(|name| name.as_str() != NULL_FIELD)
                .map(|name| base_field_name(name).to_string())
                .collect(),
        };

        self.run_hooks(info, &edits[index], edits, &entry).await?;

        let mut app_dep = DataTree::new();
        for expr_table in info.expression_tables(request.op) {
            let Some(expr_info) = schema.table(&expr_table) else {
                continue;
            };
            let data = match prefetched.get(&expr_table) {
                Some(data) => Arc::clone(data),
                None => {
                    let data = self.validator.global_cache.get_or_set(&expr_table).await?;
                    prefetched.insert(expr_table.clone(), Arc::clone(&data));
                    data
                }
            };
            let mut data = TableData::clone(&data);
            self.requests.overlay_table(&expr_table, &mut data, seq);
            for (entry_key, fields) in &data {
                app_dep.insert(
                    &expr_table,
                    entry_key,
                    EntryNode::from_flat(expr_info, entry_key, fields, Origin::Store),
                );
            }
        }

        let dep = self.fetch.to_tree(schema, &self.requests, seq);
        let mut tree = DataTree::new();
        if !removed {
            tree.insert(table, key, entry.clone());
        }

        let target = SemanticTarget {
            table,
            key,
            op: request.op,
            entry: &entry,
            changed: &changed,
            removed,
        };
        self.validator
            .engine
            .validate_semantics(&target, &tree, &dep, &app_dep)
    }

    async fn run_hooks(
        &mut self,
        info: &TableInfo,
        current: &HookEdit,
        edits: &[HookEdit],
        entry: &EntryNode,
    ) -> Result<(), ErrorInfo> {
        for binding in &info.hooks {
            let Some(hook) = self.validator.hooks.get(&binding.hook) else {
                tracing::debug!(event = "hook_not_registered", hook = %binding.hook, table = %info.name);
                continue;
            };
            let node_name = binding.node.as_deref().unwrap_or_default();
            let node_value = if node_name.is_empty() {
                String::new()
            } else {
                entry.values(node_name).join(",")
            };

            let mut ctx = HookContext {
                edits,
                current,
                node_name,
                node_value,
                entry,
                scratch: &mut self.scratch,
                store: self.validator.store.as_ref(),
            };
            hook.validate(&mut ctx).await?;
            tracing::debug!(event = "hook_passed", hook = %binding.hook, table = %info.name, key = %current.key);
        }
        Ok(())
    }
}

/// Deleting a single field must keep the entry schema-valid.
fn check_field_delete(item: &Item<'_>, name: &str) -> Result<(), ErrorInfo> {
    let Some(field) = item.info.field(name) else {
        return Ok(());
    };
    if field.is_leaf_list() && field.requires_elements() {
        return Err(ErrorInfo::new(
            RetCode::SyntaxMinimumInvalid,
            format!("Field '{}' requires at least one element", field.name),
        )
        .with_table(item.table())
        .with_keys(item.keys())
        .with_field(field.name.as_str()));
    }
    if field.mandatory {
        return Err(
            ErrorInfo::new(RetCode::SemanticMandatoryDataMissing, MANDATORY_DELETE_MSG)
                .with_table(item.table())
                .with_keys(item.keys())
                .with_field(field.name.as_str())
                .with_app_tag(MANDATORY_DELETE_TAG),
        );
    }
    Ok(())
}
