use std::collections::BTreeSet;

use cfgval_core::{ErrorInfo, Operation};

use crate::tree::{DataTree, EntryNode};

/// The entry a semantic check is about, with the fields its edit changed.
#[derive(Debug, Clone, Copy)]
pub struct SemanticTarget<'a> {
    pub table: &'a str,
    pub key: &'a str,
    pub op: Operation,
    /// Entry after the edit; for a whole-entry delete, the entry being removed.
    pub entry: &'a EntryNode,
    pub changed: &'a BTreeSet<String>,
    /// The entry leaves the data set with this edit.
    pub removed: bool,
}

/// Schema constraint evaluator behind the validation pipeline.
///
/// `validate_syntax` checks every entry of `tree` on its own. `dep` holds the
/// base of each entry whose presence constraints (mandatory fields,
/// min-elements) apply: an empty node for creates, the stored entry for
/// updates. `validate_semantics` evaluates cross-entry constraints for one
/// target over `tree`, the fetched dependent data `dep` and the
/// must-expression data `app_dep`.
pub trait SchemaEngine: Send + Sync {
    /// Returns the engine identifier (e.g. `rules`).
    fn engine(&self) -> &'static str;

    fn validate_syntax(&self, tree: &DataTree, dep: &DataTree) -> Result<(), ErrorInfo>;

    fn validate_semantics(
        &self,
        target: &SemanticTarget<'_>,
        tree: &DataTree,
        dep: &DataTree,
        app_dep: &DataTree,
    ) -> Result<(), ErrorInfo>;
}
