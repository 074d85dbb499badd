use std::collections::BTreeMap;

use cfgval_core::{FieldMap, LEAF_LIST_SUFFIX, NULL_FIELD, Operation, SchemaModel, base_field_name};
use cfgval_store::{Pipeline, Store};

use crate::errors::EngineResult;
use crate::tree::{DataTree, EntryNode, Origin};

/// One edit held in the session request cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEdit {
    pub seq: u64,
    pub op: Operation,
    pub fields: FieldMap,
}

impl PendingEdit {
    fn is_whole_delete(&self) -> bool {
        self.op == Operation::Delete && self.fields.is_empty()
    }

    /// Whether the edit replaces the whole entry state.
    fn resets(&self) -> bool {
        self.op == Operation::Create || self.is_whole_delete()
    }

    /// Apply this edit on top of an entry state.
    fn apply(&self, state: &mut Option<FieldMap>) {
        match self.op {
            Operation::Create => *state = Some(without_null(&self.fields)),
            Operation::Delete if self.fields.is_empty() => *state = None,
            Operation::Delete => {
                if let Some(current) = state.as_mut() {
                    for name in self.fields.keys() {
                        remove_field(current, name);
                    }
                }
            }
            Operation::Update => {
                if let Some(current) = state.as_mut() {
                    current.extend(without_null(&self.fields));
                }
            }
            Operation::None => {
                state
                    .get_or_insert_with(FieldMap::new)
                    .extend(without_null(&self.fields));
            }
        }
    }
}

fn without_null(fields: &FieldMap) -> FieldMap {
    fields
        .iter()
        .filter(|(name, _)| name.as_str() != NULL_FIELD)
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Remove a field whatever leaf-list marker the stored name carries.
fn remove_field(fields: &mut FieldMap, name: &str) {
    let base = base_field_name(name);
    fields.remove(base);
    fields.remove(&format!("{base}{LEAF_LIST_SUFFIX}"));
}

/// Session-scoped table -> key -> ordered in-flight edits.
///
/// Edits are replayed in submission order and take priority over store data.
#[derive(Debug, Default)]
pub struct RequestCache {
    tables: BTreeMap<String, BTreeMap<String, Vec<PendingEdit>>>,
    next_seq: u64,
}

impl RequestCache {
    pub fn new() -> Self {
        Self {
            tables: BTreeMap::new(),
            next_seq: 1,
        }
    }

    /// Sequence number the next pushed edit receives.
    pub fn next_seq(&self) -> u64 {
        self.next_seq.max(1)
    }

    pub fn push(&mut self, table: &str, key: &str, op: Operation, fields: FieldMap) -> u64 {
        let seq = self.next_seq();
        self.next_seq = seq + 1;
        self.tables
            .entry(table.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default()
            .push(PendingEdit { seq, op, fields });
        seq
    }

    /// Drop every edit numbered `seq` or later.
    pub fn truncate_from(&mut self, seq: u64) {
        for entries in self.tables.values_mut() {
            for edits in entries.values_mut() {
                edits.retain(|edit| edit.seq < seq);
            }
            entries.retain(|_, edits| !edits.is_empty());
        }
        self.tables.retain(|_, entries| !entries.is_empty());
        self.next_seq = seq.max(1);
    }

    pub fn edits(&self, table: &str, key: &str) -> &[PendingEdit] {
        self.tables
            .get(table)
            .and_then(|entries| entries.get(key))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Keys of `table` touched by an edit numbered `upto` or earlier.
    pub fn keys_upto(&self, table: &str, upto: u64) -> Vec<String> {
        self.tables
            .get(table)
            .into_iter()
            .flatten()
            .filter(|(_, edits)| edits.iter().any(|edit| edit.seq <= upto))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Replay the edits numbered `upto` or earlier over a base state.
    pub fn replay(
        &self,
        table: &str,
        key: &str,
        base: Option<FieldMap>,
        upto: u64,
    ) -> Option<FieldMap> {
        let mut state = base;
        for edit in self.edits(table, key).iter().filter(|edit| edit.seq <= upto) {
            edit.apply(&mut state);
        }
        state
    }

    /// Entry state before `before`, when the request cache alone decides it.
    ///
    /// Returns `None` when no create or whole delete precedes `before`, in
    /// which case store data is needed as the base.
    pub fn resolve_before(&self, table: &str, key: &str, before: u64) -> Option<Option<FieldMap>> {
        let edits = self.edits(table, key);
        let start = edits
            .iter()
            .rposition(|edit| edit.seq < before && edit.resets())?;
        let mut state = None;
        for edit in edits[start..].iter().filter(|edit| edit.seq < before) {
            edit.apply(&mut state);
        }
        Some(state)
    }

    /// Overlay the edits numbered `upto` or earlier on a table snapshot.
    pub fn overlay_table(&self, table: &str, data: &mut BTreeMap<String, FieldMap>, upto: u64) {
        for key in self.keys_upto(table, upto) {
            let base = data.remove(&key);
            if let Some(fields) = self.replay(table, &key, base, upto) {
                data.insert(key, fields);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn clear(&mut self) {
        self.tables.clear();
        self.next_seq = 1;
    }
}

/// Fetch state of one staged entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchState {
    NotFetched,
    Fetched(FieldMap),
    /// Absent from the store, or deleted by the request cache.
    Deleted,
}

/// Staging cache for dependent data, flushed in pipelined batches.
#[derive(Debug, Default)]
pub struct FetchCache {
    entries: BTreeMap<String, BTreeMap<String, FetchState>>,
    round_trips: usize,
}

impl FetchCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an entry for fetch; staging twice is a no-op.
    pub fn stage(&mut self, table: &str, key: &str) -> bool {
        let entries = self.entries.entry(table.to_string()).or_default();
        if entries.contains_key(key) {
            return false;
        }
        entries.insert(key.to_string(), FetchState::NotFetched);
        true
    }

    pub fn state(&self, table: &str, key: &str) -> Option<&FetchState> {
        self.entries.get(table).and_then(|entries| entries.get(key))
    }

    pub fn is_staged(&self, table: &str, key: &str) -> bool {
        self.state(table, key).is_some()
    }

    /// Staged entries still waiting for data.
    pub fn pending(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .flat_map(|(table, entries)| {
                entries
                    .iter()
                    .filter(|(_, state)| **state == FetchState::NotFetched)
                    .map(move |(key, _)| (table.clone(), key.clone()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn round_trips(&self) -> usize {
        self.round_trips
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.round_trips = 0;
    }

    fn set(&mut self, table: &str, key: &str, state: FetchState) {
        self.entries
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), state);
    }

    /// Resolve every pending entry, from the request cache when it decides
    /// the entry state before `call_start`, otherwise with pipelined store
    /// reads of at most `batch` keys per round trip. `chain` names further
    /// entries to stage once an entry resolves; the loop runs to a fixed point.
    pub async fn flush<F>(
        &mut self,
        store: &dyn Store,
        schema: &SchemaModel,
        requests: &RequestCache,
        call_start: u64,
        batch: usize,
        chain: F,
    ) -> EngineResult<()>
    where
        F: Fn(&str, &str, &FieldMap) -> Vec<(String, String)>,
    {
        loop {
            let pending = self.pending();
            if pending.is_empty() {
                return Ok(());
            }

            let mut resolved = Vec::with_capacity(pending.len());
            let mut to_read = Vec::new();
            for (table, key) in pending {
                match requests.resolve_before(&table, &key, call_start) {
                    Some(state) => resolved.push((table, key, state)),
                    None => to_read.push((table, key)),
                }
            }

            for chunk in to_read.chunks(batch.max(1)) {
                let mut pipeline = Pipeline::new();
                for (table, key) in chunk {
                    let store_key = schema
                        .table(table)
                        .map(|info| info.store_key(key))
                        .unwrap_or_else(|| format!("{table}|{key}"));
                    pipeline.hgetall(store_key);
                }
                let replies = store.exec(pipeline).await?;
                self.round_trips += 1;
                for ((table, key), reply) in chunk.iter().zip(replies) {
                    let hash = reply.into_hash()?;
                    let state = if hash.is_empty() { None } else { Some(hash) };
                    resolved.push((table.clone(), key.clone(), state));
                }
            }

            for (table, key, state) in resolved {
                match state {
                    Some(fields) => {
                        for (next_table, next_key) in chain(&table, &key, &fields) {
                            self.stage(&next_table, &next_key);
                        }
                        self.set(&table, &key, FetchState::Fetched(fields));
                    }
                    None => self.set(&table, &key, FetchState::Deleted),
                }
            }

            tracing::debug!(
                event = "fetch_flush_round",
                staged = self.len(),
                round_trips = self.round_trips
            );
        }
    }

    /// Entry state after the request edits numbered `upto` or earlier.
    /// Entries never fetched count as absent from the store.
    pub fn view(
        &self,
        requests: &RequestCache,
        table: &str,
        key: &str,
        upto: u64,
    ) -> Option<FieldMap> {
        let base = match self.state(table, key) {
            Some(FetchState::Fetched(fields)) => Some(fields.clone()),
            _ => None,
        };
        requests.replay(table, key, base, upto)
    }

    /// Schema-shaped tree of every staged entry as seen at `upto`.
    pub fn to_tree(&self, schema: &SchemaModel, requests: &RequestCache, upto: u64) -> DataTree {
        let mut tree = DataTree::new();
        for (table, entries) in &self.entries {
            let Some(info) = schema.table(table) else {
                continue;
            };
            for key in entries.keys() {
                if let Some(fields) = self.view(requests, table, key, upto) {
                    tree.insert(
                        table,
                        key,
                        EntryNode::from_flat(info, key, &fields, Origin::Store),
                    );
                }
            }
        }
        tree
    }
}

/// Read full hashes for `keys` in pipelined batches; absent keys are skipped.
pub async fn fetch_entries(
    store: &dyn Store,
    keys: &[String],
    batch: usize,
) -> EngineResult<Vec<(String, FieldMap)>> {
    let mut out = Vec::with_capacity(keys.len());
    for chunk in keys.chunks(batch.max(1)) {
        let mut pipeline = Pipeline::new();
        for key in chunk {
            pipeline.hgetall(key.as_str());
        }
        let replies = store.exec(pipeline).await?;
        for (key, reply) in chunk.iter().zip(replies) {
            let hash = reply.into_hash()?;
            if !hash.is_empty() {
                out.push((key.clone(), hash));
            }
        }
    }
    Ok(out)
}
