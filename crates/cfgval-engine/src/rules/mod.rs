//! Built-in schema engine evaluating the schema model directly.

pub mod expr;

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;

use cfgval_core::{
    ErrorInfo, FieldInfo, FieldType, OpMask, Operation, ReferenceDescriptor, RetCode, SchemaModel,
    TableInfo,
};

use crate::errors::{EngineError, EngineResult};
use crate::schema_engine::{SchemaEngine, SemanticTarget};
use crate::tree::{DataTree, EntryNode, FieldValue};

use self::expr::{EvalContext, Expr, compile};

const MIN_ELEMENTS_MSG: &str = "min-elements constraint not honored";
const MAX_ELEMENTS_MSG: &str = "max-elements constraint not honored";
const MUST_FAILED_MSG: &str = "Must expression validation failed";
const WHEN_FAILED_MSG: &str = "When expression validation failed";
const LEAFREF_MISSING_MSG: &str = "Dependent data is missing";
const LEAFREF_TAG: &str = "instance-required";

struct CompiledMust {
    node: Option<String>,
    expr: Expr,
    ops: OpMask,
    error_message: Option<String>,
    error_app_tag: Option<String>,
}

struct CompiledWhen {
    node: Option<String>,
    expr: Expr,
}

#[derive(Default)]
struct CompiledTable {
    must: Vec<CompiledMust>,
    when: Vec<CompiledWhen>,
    patterns: BTreeMap<String, Regex>,
}

/// Schema engine over [`SchemaModel`] with an XPath-subset evaluator.
pub struct RuleEngine {
    schema: Arc<SchemaModel>,
    tables: BTreeMap<String, CompiledTable>,
}

impl RuleEngine {
    /// Compile every pattern and must/when expression of the schema.
    pub fn new(schema: Arc<SchemaModel>) -> EngineResult<Self> {
        let mut tables = BTreeMap::new();
        for info in schema.tables() {
            let mut compiled = CompiledTable::default();

            for field in info.fields.values() {
                if let FieldType::String {
                    pattern: Some(pattern),
                    ..
                } = &field.field_type
                {
                    let regex = Regex::new(&format!("^(?:{pattern})$")).map_err(|err| {
                        EngineError::Expression {
                            context: format!("{}.{} pattern", info.name, field.name),
                            message: err.to_string(),
                        }
                    })?;
                    compiled.patterns.insert(field.name.clone(), regex);
                }
            }

            for must in &info.must {
                let expr = compile(&must.expression).map_err(|message| EngineError::Expression {
                    context: format!("{} must", info.name),
                    message,
                })?;
                compiled.must.push(CompiledMust {
                    node: must.node.clone(),
                    expr,
                    ops: must.ops,
                    error_message: must.error_message.clone(),
                    error_app_tag: must.error_app_tag.clone(),
                });
            }

            for when in &info.when {
                let expr = compile(&when.expression).map_err(|message| EngineError::Expression {
                    context: format!("{} when", info.name),
                    message,
                })?;
                compiled.when.push(CompiledWhen {
                    node: when.node.clone(),
                    expr,
                });
            }

            tables.insert(info.name.clone(), compiled);
        }

        tracing::debug!(event = "rule_engine_compiled", tables = tables.len());
        Ok(Self { schema, tables })
    }

    fn table_info(&self, table: &str) -> Result<&TableInfo, ErrorInfo> {
        self.schema.table(table).ok_or_else(|| {
            ErrorInfo::new(RetCode::SyntaxError, format!("Unknown table {table}")).with_table(table)
        })
    }

    fn check_fields(&self, info: &TableInfo, key: &str, entry: &EntryNode) -> Result<(), ErrorInfo> {
        let syntax_error = |code: RetCode, msg: String, field: &str, value: &str| {
            ErrorInfo::new(code, msg)
                .with_table(info.name.as_str())
                .with_keys(info.key_components(key))
                .with_field(field)
                .with_value(value)
        };

        for (name, value) in &entry.fields {
            let Some(field) = info.field(name) else {
                return Err(syntax_error(
                    RetCode::SyntaxInvalidField,
                    format!("Unknown field '{name}'"),
                    name,
                    &value.to_flat(),
                ));
            };

            if !field.is_leaf_list() && matches!(value, FieldValue::LeafList(_)) {
                return Err(syntax_error(
                    RetCode::SyntaxInvalidInputData,
                    format!("Field '{name}' is not a leaf-list"),
                    name,
                    &value.to_flat(),
                ));
            }

            for item in value.values() {
                if let Err((code, msg)) = self.check_type(info, field, item) {
                    return Err(syntax_error(code, msg, name, item));
                }
            }

            if field.is_leaf_list() {
                let count = value.values().len() as u64;
                if field.min_elements.is_some_and(|min| count < min) {
                    return Err(syntax_error(
                        RetCode::SyntaxMinimumInvalid,
                        MIN_ELEMENTS_MSG.to_string(),
                        name,
                        "",
                    ));
                }
                if field.max_elements.is_some_and(|max| count > max) {
                    return Err(syntax_error(
                        RetCode::SyntaxMaximumInvalid,
                        MAX_ELEMENTS_MSG.to_string(),
                        name,
                        "",
                    ));
                }
            }
        }
        Ok(())
    }

    fn check_type(&self, info: &TableInfo, field: &FieldInfo, value: &str) -> Result<(), (RetCode, String)> {
        match &field.field_type {
            FieldType::String {
                min_length,
                max_length,
                ..
            } => {
                let length = value.chars().count() as u64;
                if min_length.is_some_and(|min| length < min) || max_length.is_some_and(|max| length > max) {
                    return Err((
                        RetCode::SyntaxOutOfRange,
                        format!("Length of '{value}' out of range for '{}'", field.name),
                    ));
                }
                let pattern = self
                    .tables
                    .get(&info.name)
                    .and_then(|table| table.patterns.get(&field.name));
                if let Some(pattern) = pattern {
                    if !pattern.is_match(value) {
                        return Err((
                            RetCode::SyntaxInvalidInputData,
                            format!("Value '{value}' does not match the pattern of '{}'", field.name),
                        ));
                    }
                }
                Ok(())
            }
            FieldType::Uint { min, max } => {
                let parsed = value.parse::<u64>().map_err(|_| {
                    (
                        RetCode::SyntaxInvalidInputData,
                        format!("Value '{value}' is not an unsigned integer"),
                    )
                })?;
                if min.is_some_and(|min| parsed < min) || max.is_some_and(|max| parsed > max) {
                    return Err((
                        RetCode::SyntaxOutOfRange,
                        format!("Value '{value}' out of range for '{}'", field.name),
                    ));
                }
                Ok(())
            }
            FieldType::Int { min, max } => {
                let parsed = value.parse::<i64>().map_err(|_| {
                    (
                        RetCode::SyntaxInvalidInputData,
                        format!("Value '{value}' is not an integer"),
                    )
                })?;
                if min.is_some_and(|min| parsed < min) || max.is_some_and(|max| parsed > max) {
                    return Err((
                        RetCode::SyntaxOutOfRange,
                        format!("Value '{value}' out of range for '{}'", field.name),
                    ));
                }
                Ok(())
            }
            FieldType::Boolean => match value {
                "true" | "false" => Ok(()),
                _ => Err((
                    RetCode::SyntaxInvalidInputData,
                    format!("Value '{value}' is not a boolean"),
                )),
            },
            FieldType::Enumeration { values } => {
                if values.iter().any(|allowed| allowed == value) {
                    Ok(())
                } else if values.iter().any(|allowed| allowed == value.trim()) {
                    Err((
                        RetCode::SyntaxEnumWhitespace,
                        format!("Enum value '{value}' has leading or trailing whitespace"),
                    ))
                } else {
                    Err((
                        RetCode::SyntaxEnumInvalid,
                        format!("Invalid enum value '{value}' for '{}'", field.name),
                    ))
                }
            }
        }
    }

    /// Mandatory fields and min-elements bounds on a complete entry.
    fn check_presence(&self, info: &TableInfo, key: &str, entry: &EntryNode) -> Result<(), ErrorInfo> {
        for field in info.fields.values() {
            if info.is_key(&field.name) || entry.contains(&field.name) {
                continue;
            }
            let error = if field.mandatory {
                ErrorInfo::new(
                    RetCode::SyntaxMissingField,
                    format!("Mandatory field '{}' is missing", field.name),
                )
            } else if field.requires_elements() {
                ErrorInfo::new(RetCode::SyntaxMinimumInvalid, MIN_ELEMENTS_MSG)
            } else {
                continue;
            };
            return Err(error
                .with_table(info.name.as_str())
                .with_keys(info.key_components(key))
                .with_field(field.name.as_str()));
        }
        Ok(())
    }

    /// Whether a leafref value resolves to an entry of the view.
    fn reference_exists(
        &self,
        view: &DataTree,
        entry: &EntryNode,
        descriptor: &ReferenceDescriptor,
        value: &str,
    ) -> bool {
        let Some(target) = self.schema.table(&descriptor.target_table) else {
            return false;
        };
        let value = strip_table_reference(value, target);

        view.entries(&target.name).any(|(_, candidate)| {
            candidate.values(&descriptor.target_field).iter().any(|held| held == value)
                && descriptor.bindings.iter().all(|binding| {
                    let wanted = entry.values(&binding.source_field);
                    wanted.is_empty()
                        || candidate
                            .values(&binding.target_field)
                            .iter()
                            .any(|held| wanted.contains(held))
                })
        })
    }

    fn check_leafrefs(
        &self,
        info: &TableInfo,
        target: &SemanticTarget<'_>,
        view: &DataTree,
    ) -> Result<(), ErrorInfo> {
        for (field, descriptors) in &info.leafrefs {
            if target.op != Operation::Create && !target.changed.contains(field) {
                continue;
            }
            let union_plain = info.field(field).is_some_and(|f| f.union_plain);
            for value in target.entry.values(field) {
                if value.is_empty() {
                    continue;
                }
                let found = descriptors
                    .iter()
                    .any(|descriptor| self.reference_exists(view, target.entry, descriptor, value));
                if found || union_plain {
                    continue;
                }

                tracing::debug!(
                    event = "leafref_missing",
                    table = %info.name,
                    key = %target.key,
                    field = %field,
                    value = %value
                );
                let bound = descriptors.iter().any(|descriptor| !descriptor.bindings.is_empty());
                let mut error = ErrorInfo::new(RetCode::SemanticDependentDataMissing, LEAFREF_MISSING_MSG)
                    .with_table(info.name.as_str())
                    .with_keys(info.key_components(target.key))
                    .with_constraint_msg(format!("No instance found for '{value}'"))
                    .with_app_tag(LEAFREF_TAG);
                if !bound {
                    error = error.with_field(field.as_str()).with_value(value.as_str());
                }
                return Err(error);
            }
        }
        Ok(())
    }
}

/// `[TABLE|value]` references name the target key in table form.
fn strip_table_reference<'v>(value: &'v str, target: &TableInfo) -> &'v str {
    value
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .and_then(|inner| inner.strip_prefix(target.name.as_str()))
        .and_then(|rest| rest.strip_prefix(target.key_delim()))
        .unwrap_or(value)
}

impl SchemaEngine for RuleEngine {
    fn engine(&self) -> &'static str {
        "rules"
    }

    fn validate_syntax(&self, tree: &DataTree, dep: &DataTree) -> Result<(), ErrorInfo> {
        for (table, key, entry) in tree.iter() {
            let info = self.table_info(table)?;
            self.check_fields(info, key, entry)?;

            if let Some(base) = dep.entry(table, key) {
                let mut merged = base.clone();
                merged.merge_from(entry);
                self.check_presence(info, key, &merged)?;
            }
        }
        Ok(())
    }

    fn validate_semantics(
        &self,
        target: &SemanticTarget<'_>,
        tree: &DataTree,
        dep: &DataTree,
        app_dep: &DataTree,
    ) -> Result<(), ErrorInfo> {
        let info = self.table_info(target.table)?;
        let Some(compiled) = self.tables.get(&info.name) else {
            return Ok(());
        };

        let mut view = app_dep.clone();
        view.merge(dep);
        view.merge(tree);
        if target.removed {
            view.remove_entry(target.table, target.key);
        } else {
            view.insert(target.table, target.key, target.entry.clone());
        }

        if target.op != Operation::Delete {
            self.check_leafrefs(info, target, &view)?;
        }

        let context = EvalContext {
            schema: self.schema.as_ref(),
            view: &view,
            table: info.name.as_str(),
            entry: target.entry,
            node: None,
            op: target.op,
        };
        let internal = |err: String| {
            ErrorInfo::internal(format!("expression evaluation failed: {err}"))
                .with_table(info.name.as_str())
                .with_keys(info.key_components(target.key))
        };

        if target.op != Operation::Delete {
            for when in &compiled.when {
                if let Some(node) = &when.node {
                    if !target.entry.contains(node) {
                        continue;
                    }
                }
                let ctx = EvalContext {
                    node: when.node.as_deref(),
                    ..context
                };
                if !when.expr.is_true(&ctx).map_err(internal)? {
                    return Err(ErrorInfo::new(RetCode::SemanticError, WHEN_FAILED_MSG)
                        .with_table(info.name.as_str())
                        .with_keys(info.key_components(target.key))
                        .with_field(when.node.clone().unwrap_or_default()));
                }
            }
        }

        for must in &compiled.must {
            if !must.ops.applies_to(target.op) {
                continue;
            }
            // A removed entry no longer carries its own constraints.
            if target.removed && must.ops.is_empty() {
                continue;
            }
            if let Some(node) = &must.node {
                if !target.entry.contains(node) {
                    continue;
                }
                if target.op != Operation::Create && !target.changed.contains(node) {
                    continue;
                }
            }

            let ctx = EvalContext {
                node: must.node.as_deref(),
                ..context
            };
            if must.expr.is_true(&ctx).map_err(internal)? {
                continue;
            }

            tracing::debug!(
                event = "must_failed",
                table = %info.name,
                key = %target.key,
                node = ?must.node
            );
            let mut error = ErrorInfo::new(RetCode::SemanticError, MUST_FAILED_MSG)
                .with_table(info.name.as_str())
                .with_constraint_msg(must.error_message.clone().unwrap_or_default())
                .with_app_tag(must.error_app_tag.clone().unwrap_or_default());
            if let Some(node) = &must.node {
                error = error
                    .with_keys(info.key_components(target.key))
                    .with_field(node.as_str())
                    .with_value(target.entry.values(node).join(","));
            }
            return Err(error);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfgval_core::{fields, load_document};

    use crate::tree::Origin;

    fn engine() -> RuleEngine {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../cfgval-core/tests/fixtures/sonic.schema.json");
        let doc = load_document(&path).expect("fixture");
        let schema = Arc::new(SchemaModel::from_document(&doc).expect("schema"));
        RuleEngine::new(schema).expect("engine")
    }

    fn request_tree(engine: &RuleEngine, table: &str, key: &str, pairs: &[(&str, &str)]) -> DataTree {
        let info = engine.schema.table(table).expect("table");
        let mut tree = DataTree::new();
        tree.insert(
            table,
            key,
            EntryNode::from_flat(info, key, &fields(pairs.iter().copied()), Origin::Request),
        );
        tree
    }

    fn complete(tree: &DataTree) -> DataTree {
        let mut dep = DataTree::new();
        for (table, key, entry) in tree.iter() {
            dep.insert(
                table,
                key,
                EntryNode {
                    origin: Origin::Store,
                    fields: entry
                        .fields
                        .iter()
                        .filter(|(name, _)| name.as_str() == "name")
                        .map(|(name, value)| (name.clone(), value.clone()))
                        .collect(),
                },
            );
        }
        dep
    }

    #[test]
    fn type_checks_map_to_codes() {
        let engine = engine();
        let cases = [
            (vec![("vlanid", "4095")], RetCode::SyntaxOutOfRange),
            (vec![("vlanid", "ten")], RetCode::SyntaxInvalidInputData),
            (vec![("vlanid", "10"), ("admin_status", " up")], RetCode::SyntaxEnumWhitespace),
            (vec![("vlanid", "10"), ("admin_status", "sideways")], RetCode::SyntaxEnumInvalid),
            (vec![("vlanid", "10"), ("color", "red")], RetCode::SyntaxInvalidField),
            (vec![("vlanid@", "10")], RetCode::SyntaxInvalidInputData),
        ];
        for (pairs, code) in cases {
            let tree = request_tree(&engine, "VLAN", "Vlan10", &pairs);
            let err = engine
                .validate_syntax(&tree, &DataTree::new())
                .expect_err("syntax error");
            assert_eq!(err.code, code, "{pairs:?}");
            assert_eq!(err.table, "VLAN");
            assert_eq!(err.keys, vec!["Vlan10".to_string()]);
        }
    }

    #[test]
    fn key_pattern_is_checked() {
        let engine = engine();
        let tree = request_tree(&engine, "VLAN", "Vlan_x", &[("vlanid", "10")]);
        let err = engine
            .validate_syntax(&tree, &DataTree::new())
            .expect_err("pattern");
        assert_eq!(err.code, RetCode::SyntaxInvalidInputData);
        assert_eq!(err.field, "name");
    }

    #[test]
    fn mandatory_fields_only_on_complete_entries() {
        let engine = engine();
        let tree = request_tree(&engine, "VLAN", "Vlan10", &[("mtu", "9000")]);
        assert!(engine.validate_syntax(&tree, &DataTree::new()).is_ok());

        let err = engine
            .validate_syntax(&tree, &complete(&tree))
            .expect_err("missing vlanid");
        assert_eq!(err.code, RetCode::SyntaxMissingField);
        assert_eq!(err.field, "vlanid");
    }

    #[test]
    fn when_rejects_mirror_on_drop() {
        let engine = engine();
        let tree = request_tree(
            &engine,
            "ACL_RULE",
            "TestACL1|Rule1",
            &[("PACKET_ACTION", "DROP"), ("MIRROR_ACTION", "everflow")],
        );
        let entry = tree.entry("ACL_RULE", "TestACL1|Rule1").expect("entry").clone();
        let mut dep = DataTree::new();
        let acl = engine.schema.table("ACL_TABLE").expect("acl");
        dep.insert(
            "ACL_TABLE",
            "TestACL1",
            EntryNode::from_flat(acl, "TestACL1", &fields([("type", "MIRROR")]), Origin::Store),
        );
        let mirror = engine.schema.table("MIRROR_SESSION").expect("mirror");
        dep.insert(
            "MIRROR_SESSION",
            "everflow",
            EntryNode::from_flat(mirror, "everflow", &fields([("type", "ERSPAN")]), Origin::Store),
        );

        let changed = entry.fields.keys().cloned().collect();
        let target = SemanticTarget {
            table: "ACL_RULE",
            key: "TestACL1|Rule1",
            op: Operation::Create,
            entry: &entry,
            changed: &changed,
            removed: false,
        };
        let err = engine
            .validate_semantics(&target, &tree, &dep, &DataTree::new())
            .expect_err("when");
        assert_eq!(err.code, RetCode::SemanticError);
        assert_eq!(err.msg, WHEN_FAILED_MSG);
        assert_eq!(err.field, "MIRROR_ACTION");
    }
}
