use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;

use crate::document::{FieldKind, FieldType, SchemaDocument, TableDef};
use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::keys::KeyPattern;
use crate::request::{OpMask, base_field_name};
use crate::validation::validate_document;

/// Key binding carried by a leafref predicate `[target = current()/../source]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBinding {
    pub target_field: String,
    pub source_field: String,
}

/// Resolved target of one leafref path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceDescriptor {
    pub target_table: String,
    pub target_field: String,
    pub raw_path: String,
    pub bindings: Vec<KeyBinding>,
}

/// Must-expression with the tables it reads and the operations it guards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MustInfo {
    /// Field the expression hangs off, `None` for list level.
    pub node: Option<String>,
    pub expression: String,
    pub referenced_tables: BTreeSet<String>,
    pub ops: OpMask,
    pub error_message: Option<String>,
    pub error_app_tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhenInfo {
    pub node: Option<String>,
    pub expression: String,
    pub referenced_tables: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookBinding {
    pub node: Option<String>,
    pub hook: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: String,
    pub kind: FieldKind,
    pub field_type: FieldType,
    pub mandatory: bool,
    pub default: Option<String>,
    pub min_elements: Option<u64>,
    pub max_elements: Option<u64>,
    pub union_plain: bool,
}

impl FieldInfo {
    pub fn is_leaf_list(&self) -> bool {
        self.kind == FieldKind::LeafList
    }

    /// Whether removing the field would break a min-elements bound.
    pub fn requires_elements(&self) -> bool {
        self.is_leaf_list() && self.min_elements.unwrap_or(0) > 0
    }
}

/// A (table, field) pair holding a leafref into another table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReverseReference {
    pub table: String,
    pub field: String,
}

/// Immutable per-table metadata derived from the schema.
#[derive(Debug, Clone)]
pub struct TableInfo {
    pub name: String,
    pub module: String,
    pub keys: Vec<String>,
    pub key_pattern: KeyPattern,
    pub max_elements: Option<u64>,
    pub fields: BTreeMap<String, FieldInfo>,
    pub leafrefs: BTreeMap<String, Vec<ReferenceDescriptor>>,
    pub must: Vec<MustInfo>,
    pub when: Vec<WhenInfo>,
    pub hooks: Vec<HookBinding>,
    pub dependent_on: Option<String>,
    /// Referencing (table, field) pairs, in dependency order.
    pub reverse_refs: Vec<ReverseReference>,
}

impl TableInfo {
    pub fn key_delim(&self) -> &str {
        self.key_pattern.delim()
    }

    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.get(base_field_name(name))
    }

    pub fn is_key(&self, field: &str) -> bool {
        let field = base_field_name(field);
        self.keys.iter().any(|key| key == field)
    }

    pub fn is_mandatory(&self, field: &str) -> bool {
        self.field(field).map(|info| info.mandatory).unwrap_or(false)
    }

    pub fn default_value(&self, field: &str) -> Option<&str> {
        self.field(field).and_then(|info| info.default.as_deref())
    }

    pub fn store_key(&self, key: &str) -> String {
        self.key_pattern.store_key(key)
    }

    /// Key component values of an entry key.
    pub fn key_components(&self, key: &str) -> Vec<String> {
        self.key_pattern
            .components(key)
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Tables read by must/when expressions that apply to `op`.
    pub fn expression_tables(&self, op: crate::request::Operation) -> BTreeSet<String> {
        let mut tables = BTreeSet::new();
        for must in &self.must {
            if must.ops.applies_to(op) {
                tables.extend(must.referenced_tables.iter().cloned());
            }
        }
        for when in &self.when {
            tables.extend(when.referenced_tables.iter().cloned());
        }
        tables
    }

    /// Leafref descriptors of any field that point at `target`.
    pub fn references_to<'a>(
        &'a self,
        field: &str,
        target: &'a str,
    ) -> impl Iterator<Item = &'a ReferenceDescriptor> + 'a {
        self.leafrefs
            .get(base_field_name(field))
            .into_iter()
            .flatten()
            .filter(move |descriptor| descriptor.target_table == target)
    }
}

/// Compiled regular expressions used to scan schema paths and expressions.
struct PathScanner {
    list_step: Regex,
    binding: Regex,
    op_guard: Regex,
}

impl PathScanner {
    fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|err| Error::InvalidSchema(err.to_string()))
        };
        Ok(Self {
            list_step: compile(r"([A-Za-z0-9_\-]+)_LIST\b")?,
            binding: compile(
                r"\[\s*(?:[A-Za-z0-9_\-]+:)?([A-Za-z0-9_\-]+)\s*=\s*current\(\)\s*/\s*\.\.\s*/\s*(?:[A-Za-z0-9_\-]+:)?([A-Za-z0-9_\-@]+)\s*\]",
            )?,
            op_guard: compile(r#"operation\s*!=\s*['"](CREATE|UPDATE|DELETE)['"]"#)?,
        })
    }

    /// Known tables whose list step appears in `text`.
    fn mentioned_tables(&self, text: &str, known: &BTreeSet<String>) -> BTreeSet<String> {
        self.list_step
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .filter(|name| known.contains(name))
            .collect()
    }

    fn guarded_ops(&self, text: &str) -> OpMask {
        let mut mask = OpMask::EMPTY;
        for caps in self.op_guard.captures_iter(text) {
            match caps.get(1).map(|m| m.as_str()) {
                Some("CREATE") => mask.insert(OpMask::CREATE),
                Some("UPDATE") => mask.insert(OpMask::UPDATE),
                Some("DELETE") => mask.insert(OpMask::DELETE),
                _ => {}
            }
        }
        mask
    }

    fn parse_leafref(
        &self,
        owner: &str,
        raw_path: &str,
        known: &BTreeSet<String>,
    ) -> Result<ReferenceDescriptor> {
        let without_predicates = strip_predicates(raw_path);
        let targets = self.mentioned_tables(&without_predicates, known);
        let mut targets = targets.into_iter();
        let target_table = match (targets.next(), targets.next()) {
            (Some(table), None) => table,
            (None, _) => {
                return Err(Error::InvalidSchema(format!(
                    "leafref path '{raw_path}' in {owner} names no known table"
                )));
            }
            (Some(_), Some(_)) => {
                return Err(Error::InvalidSchema(format!(
                    "leafref path '{raw_path}' in {owner} names more than one table"
                )));
            }
        };

        let last = without_predicates
            .rsplit('/')
            .find(|segment| !segment.trim().is_empty())
            .unwrap_or_default();
        let target_field = strip_prefix(last.trim()).to_string();
        if target_field.is_empty() || target_field.ends_with("_LIST") {
            return Err(Error::InvalidSchema(format!(
                "leafref path '{raw_path}' in {owner} does not end in a field"
            )));
        }

        let bindings = self
            .binding
            .captures_iter(raw_path)
            .filter_map(|caps| match (caps.get(1), caps.get(2)) {
                (Some(target), Some(source)) => Some(KeyBinding {
                    target_field: target.as_str().to_string(),
                    source_field: base_field_name(source.as_str()).to_string(),
                }),
                _ => None,
            })
            .collect();

        Ok(ReferenceDescriptor {
            target_table,
            target_field,
            raw_path: raw_path.to_string(),
            bindings,
        })
    }
}

fn strip_prefix(segment: &str) -> &str {
    segment.rsplit(':').next().unwrap_or(segment)
}

fn strip_predicates(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut depth = 0usize;
    for ch in path.chars() {
        match ch {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(ch),
            _ => {}
        }
    }
    out
}

/// Immutable schema registry shared by every session.
#[derive(Debug, Clone)]
pub struct SchemaModel {
    schema_version: String,
    tables: BTreeMap<String, TableInfo>,
    modules: BTreeMap<String, Vec<String>>,
    delimiters: BTreeSet<String>,
    graph: DependencyGraph,
}

impl SchemaModel {
    /// Build the registry from a compiled schema document.
    pub fn from_document(doc: &SchemaDocument) -> Result<Self> {
        validate_document(doc)?;

        let scanner = PathScanner::new()?;
        let known: BTreeSet<String> = doc
            .modules
            .iter()
            .flat_map(|module| module.tables.iter().map(|table| table.name.clone()))
            .collect();

        let mut tables = BTreeMap::new();
        let mut modules = BTreeMap::new();
        let mut delimiters = BTreeSet::new();

        for module in &doc.modules {
            let mut names = Vec::with_capacity(module.tables.len());
            for def in &module.tables {
                let info = build_table(&module.name, def, &scanner, &known)?;
                delimiters.insert(info.key_delim().to_string());
                names.push(info.name.clone());
                tables.insert(info.name.clone(), info);
            }
            modules.insert(module.name.clone(), names);
        }

        let graph = DependencyGraph::build(&tables);
        build_reverse_references(&mut tables, &graph)?;

        Ok(Self {
            schema_version: doc.schema_version.clone(),
            tables,
            modules,
            delimiters,
            graph,
        })
    }

    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableInfo> {
        self.tables.values()
    }

    pub fn module_tables(&self, module: &str) -> Option<&[String]> {
        self.modules.get(module).map(Vec::as_slice)
    }

    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Split a store key into (table, key).
    ///
    /// The first configured delimiter found in the key decides the split, and
    /// the prefix must be a known table using that delimiter.
    pub fn try_split_key<'a>(&self, full_key: &'a str) -> Option<(&TableInfo, &'a str)> {
        let (table, key) = self
            .delimiters
            .iter()
            .filter_map(|delim| full_key.find(delim.as_str()).map(|idx| (idx, delim)))
            .min_by_key(|(idx, _)| *idx)
            .map(|(idx, delim)| (&full_key[..idx], &full_key[idx + delim.len()..]))?;

        let info = self.tables.get(table)?;
        if full_key[table.len()..].starts_with(info.key_delim()) {
            Some((info, key))
        } else {
            None
        }
    }

    /// Split a store key into (table, key), or two empty strings when the key
    /// does not belong to a known table.
    pub fn split_key(&self, full_key: &str) -> (String, String) {
        match self.try_split_key(full_key) {
            Some((info, key)) => (info.name.clone(), key.to_string()),
            None => (String::new(), String::new()),
        }
    }
}

fn build_table(
    module: &str,
    def: &TableDef,
    scanner: &PathScanner,
    known: &BTreeSet<String>,
) -> Result<TableInfo> {
    let key_pattern =
        KeyPattern::parse(&def.name, &def.key_delim, def.key_pattern.as_deref(), &def.keys)?;

    let mut fields = BTreeMap::new();
    let mut leafrefs = BTreeMap::new();
    for field in &def.fields {
        fields.insert(
            field.name.clone(),
            FieldInfo {
                name: field.name.clone(),
                kind: field.kind,
                field_type: field.field_type.clone(),
                mandatory: field.mandatory,
                default: field.default.clone(),
                min_elements: field.min_elements,
                max_elements: field.max_elements,
                union_plain: field.union_plain,
            },
        );

        if !field.leafref.is_empty() {
            let owner = format!("{}.{}", def.name, field.name);
            let descriptors = field
                .leafref
                .iter()
                .map(|path| scanner.parse_leafref(&owner, path, known))
                .collect::<Result<Vec<_>>>()?;
            leafrefs.insert(field.name.clone(), descriptors);
        }
    }

    let must = def
        .must
        .iter()
        .map(|must| MustInfo {
            node: must.node.clone(),
            expression: must.expression.clone(),
            referenced_tables: scanner.mentioned_tables(&must.expression, known),
            ops: scanner.guarded_ops(&must.expression),
            error_message: must.error_message.clone(),
            error_app_tag: must.error_app_tag.clone(),
        })
        .collect();

    let when = def
        .when
        .iter()
        .map(|when| WhenInfo {
            node: when.node.clone(),
            expression: when.expression.clone(),
            referenced_tables: scanner.mentioned_tables(&when.expression, known),
        })
        .collect();

    let hooks = def
        .custom_validation
        .iter()
        .map(|hook| HookBinding {
            node: hook.node.clone(),
            hook: hook.hook.clone(),
        })
        .collect();

    Ok(TableInfo {
        name: def.name.clone(),
        module: module.to_string(),
        keys: def.keys.clone(),
        key_pattern,
        max_elements: def.max_elements,
        fields,
        leafrefs,
        must,
        when,
        hooks,
        dependent_on: def.dependent_on.clone(),
        reverse_refs: Vec::new(),
    })
}

fn build_reverse_references(
    tables: &mut BTreeMap<String, TableInfo>,
    graph: &DependencyGraph,
) -> Result<()> {
    let mut reverse: BTreeMap<String, BTreeSet<ReverseReference>> = BTreeMap::new();
    for info in tables.values() {
        for (field, descriptors) in &info.leafrefs {
            for descriptor in descriptors {
                reverse
                    .entry(descriptor.target_table.clone())
                    .or_default()
                    .insert(ReverseReference {
                        table: info.name.clone(),
                        field: field.clone(),
                    });
            }
        }
    }

    for (target, refs) in reverse {
        let referrers: Vec<&str> = refs.iter().map(|r| r.table.as_str()).collect();
        let order = graph.sort_dep_tables(&referrers)?;
        let rank = |table: &str| order.iter().position(|name| name == table);

        let mut refs: Vec<ReverseReference> = refs.into_iter().collect();
        refs.sort_by(|a, b| {
            rank(&a.table)
                .cmp(&rank(&b.table))
                .then_with(|| a.field.cmp(&b.field))
        });

        if let Some(info) = tables.get_mut(&target) {
            info.reverse_refs = refs;
        }
    }

    Ok(())
}
