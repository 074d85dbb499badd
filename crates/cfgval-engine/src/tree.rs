use std::collections::BTreeMap;

use serde::Serialize;

use cfgval_core::{
    FieldMap, LEAF_LIST_SEPARATOR, LEAF_LIST_SUFFIX, NULL_FIELD, TableInfo, base_field_name,
    split_leaf_list,
};

/// Schema-shaped value of one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Leaf(String),
    LeafList(Vec<String>),
}

impl FieldValue {
    pub fn values(&self) -> &[String] {
        match self {
            FieldValue::Leaf(value) => std::slice::from_ref(value),
            FieldValue::LeafList(values) => values,
        }
    }

    /// Flat store encoding of the value.
    pub fn to_flat(&self) -> String {
        match self {
            FieldValue::Leaf(value) => value.clone(),
            FieldValue::LeafList(values) => values.join(&LEAF_LIST_SEPARATOR.to_string()),
        }
    }
}

/// Where the data of an entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Request,
    Store,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryNode {
    pub origin: Origin,
    pub fields: BTreeMap<String, FieldValue>,
}

impl EntryNode {
    /// Translate a flat hash into a schema-shaped entry. Key components become
    /// fields, `NULL` placeholders are dropped and `name@` fields become leaf-lists.
    pub fn from_flat(info: &TableInfo, key: &str, flat: &FieldMap, origin: Origin) -> Self {
        let mut fields = BTreeMap::new();
        for (name, value) in info.key_pattern.bind(key) {
            fields.insert(name, FieldValue::Leaf(value));
        }

        for (name, value) in flat {
            if name == NULL_FIELD {
                continue;
            }
            let base = base_field_name(name);
            let is_list = name.ends_with(LEAF_LIST_SUFFIX)
                || info.field(base).is_some_and(|field| field.is_leaf_list());
            let value = if is_list {
                FieldValue::LeafList(split_leaf_list(value))
            } else {
                FieldValue::Leaf(value.clone())
            };
            fields.insert(base.to_string(), value);
        }

        Self { origin, fields }
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(base_field_name(field))
    }

    /// Values of a field; empty when absent.
    pub fn values(&self, field: &str) -> &[String] {
        self.get(field).map(FieldValue::values).unwrap_or(&[])
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(base_field_name(field))
    }

    pub fn remove(&mut self, field: &str) -> Option<FieldValue> {
        self.fields.remove(base_field_name(field))
    }

    /// Overwrite fields with those of `other`.
    pub fn merge_from(&mut self, other: &EntryNode) {
        for (name, value) in &other.fields {
            self.fields.insert(name.clone(), value.clone());
        }
        if other.origin == Origin::Request {
            self.origin = Origin::Request;
        }
    }

    /// Flat encoding without key components.
    pub fn to_flat(&self, info: &TableInfo) -> FieldMap {
        self.fields
            .iter()
            .filter(|(name, _)| !info.is_key(name))
            .map(|(name, value)| match value {
                FieldValue::Leaf(_) => (name.clone(), value.to_flat()),
                FieldValue::LeafList(_) => (format!("{name}{LEAF_LIST_SUFFIX}"), value.to_flat()),
            })
            .collect()
    }
}

/// table -> key -> entry, the unit handed to the schema engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DataTree {
    tables: BTreeMap<String, BTreeMap<String, EntryNode>>,
}

impl DataTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: &str, key: &str, node: EntryNode) {
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), node);
    }

    /// Insert, or merge fields into an existing entry.
    pub fn upsert(&mut self, table: &str, key: &str, node: EntryNode) {
        let entries = self.tables.entry(table.to_string()).or_default();
        match entries.get_mut(key) {
            Some(existing) => existing.merge_from(&node),
            None => {
                entries.insert(key.to_string(), node);
            }
        }
    }

    pub fn entry(&self, table: &str, key: &str) -> Option<&EntryNode> {
        self.tables.get(table).and_then(|entries| entries.get(key))
    }

    pub fn entry_mut(&mut self, table: &str, key: &str) -> Option<&mut EntryNode> {
        self.tables
            .get_mut(table)
            .and_then(|entries| entries.get_mut(key))
    }

    pub fn remove_entry(&mut self, table: &str, key: &str) -> Option<EntryNode> {
        let entries = self.tables.get_mut(table)?;
        let removed = entries.remove(key);
        if entries.is_empty() {
            self.tables.remove(table);
        }
        removed
    }

    pub fn entries<'a>(
        &'a self,
        table: &str,
    ) -> impl Iterator<Item = (&'a String, &'a EntryNode)> + use<'a> {
        self.tables.get(table).into_iter().flatten()
    }

    /// Every (table, key, entry) triple in table/key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &EntryNode)> {
        self.tables.iter().flat_map(|(table, entries)| {
            entries
                .iter()
                .map(move |(key, node)| (table.as_str(), key.as_str(), node))
        })
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Merge another tree into this one; entries in `other` win field by field.
    pub fn merge(&mut self, other: &DataTree) {
        for (table, key, node) in other.iter() {
            self.upsert(table, key, node.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }

    /// JSON rendering for debug logs and the CLI.
    pub fn dump(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfgval_core::{
        FieldDef, FieldKind, FieldType, ModuleDef, SchemaDocument, SchemaModel, TableDef, fields,
    };

    fn model() -> SchemaModel {
        let field = |name: &str, kind: FieldKind| FieldDef {
            name: name.to_string(),
            kind,
            field_type: FieldType::default(),
            mandatory: false,
            default: None,
            min_elements: None,
            max_elements: None,
            leafref: Vec::new(),
            union_plain: false,
        };
        let doc = SchemaDocument {
            schema_version: "0.1".to_string(),
            modules: vec![ModuleDef {
                name: "m".to_string(),
                tables: vec![TableDef {
                    name: "ACL_TABLE".to_string(),
                    keys: vec!["aclname".to_string()],
                    key_delim: "|".to_string(),
                    key_pattern: None,
                    max_elements: None,
                    fields: vec![
                        field("aclname", FieldKind::Leaf),
                        field("type", FieldKind::Leaf),
                        field("ports", FieldKind::LeafList),
                    ],
                    must: Vec::new(),
                    when: Vec::new(),
                    custom_validation: Vec::new(),
                    dependent_on: None,
                }],
            }],
        };
        SchemaModel::from_document(&doc).expect("model")
    }

    #[test]
    fn flat_translation_handles_keys_lists_and_null() {
        let model = model();
        let info = model.table("ACL_TABLE").expect("table");
        let node = EntryNode::from_flat(
            info,
            "TestACL1",
            &fields([("ports@", "Ethernet0,Ethernet4"), ("type", "L3"), ("NULL", "NULL")]),
            Origin::Request,
        );
        assert_eq!(node.values("aclname"), ["TestACL1".to_string()]);
        assert_eq!(node.values("ports").len(), 2);
        assert!(!node.contains("NULL"));
        assert_eq!(
            node.to_flat(info),
            fields([("ports@", "Ethernet0,Ethernet4"), ("type", "L3")])
        );
    }

    #[test]
    fn merge_overrides_fields() {
        let model = model();
        let info = model.table("ACL_TABLE").expect("table");
        let mut base = DataTree::new();
        base.insert(
            "ACL_TABLE",
            "A",
            EntryNode::from_flat(info, "A", &fields([("type", "L3")]), Origin::Store),
        );
        let mut other = DataTree::new();
        other.insert(
            "ACL_TABLE",
            "A",
            EntryNode::from_flat(info, "A", &fields([("type", "L2")]), Origin::Request),
        );
        base.merge(&other);

        let entry = base.entry("ACL_TABLE", "A").expect("entry");
        assert_eq!(entry.values("type"), ["L2".to_string()]);
        assert_eq!(entry.origin, Origin::Request);
        assert_eq!(base.len(), 1);
        assert!(base.remove_entry("ACL_TABLE", "A").is_some());
        assert!(base.is_empty());
    }
}
