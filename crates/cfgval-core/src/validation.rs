use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;

use crate::document::{FieldKind, FieldType, SchemaDocument, TableDef};
use crate::error::{Error, Result};

/// Validate internal consistency of a schema document.
///
/// This checks:
/// - duplicate modules/tables/fields
/// - key names are declared fields
/// - must/when/hook nodes name declared fields
/// - `dependent_on` names a known table
/// - field types are well formed
pub fn validate_document(doc: &SchemaDocument) -> Result<()> {
    let mut modules = BTreeSet::new();
    let mut catalog: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();

    for module in &doc.modules {
        if !modules.insert(module.name.as_str()) {
            return Err(Error::InvalidSchema(format!(
                "duplicate module name: {}",
                module.name
            )));
        }

        for table in &module.tables {
            if catalog.contains_key(table.name.as_str()) {
                return Err(Error::InvalidSchema(format!(
                    "duplicate table name: {}.{}",
                    module.name, table.name
                )));
            }

            let mut fields = BTreeSet::new();
            for field in &table.fields {
                if !fields.insert(field.name.as_str()) {
                    return Err(Error::InvalidSchema(format!(
                        "duplicate field name: {}.{}",
                        table.name, field.name
                    )));
                }
            }

            catalog.insert(table.name.as_str(), fields);
        }
    }

    for module in &doc.modules {
        for table in &module.tables {
            let fields = catalog.get(table.name.as_str()).ok_or_else(|| {
                Error::InvalidSchema(format!("missing table in catalog: {}", table.name))
            })?;
            validate_table(table, fields, &catalog)?;
        }
    }

    Ok(())
}

fn validate_table(
    table: &TableDef,
    fields: &BTreeSet<&str>,
    catalog: &BTreeMap<&str, BTreeSet<&str>>,
) -> Result<()> {
    if table.keys.is_empty() {
        return Err(Error::InvalidSchema(format!(
            "table {} declares no keys",
            table.name
        )));
    }

    for key in &table.keys {
        if !fields.contains(key.as_str()) {
            return Err(Error::InvalidSchema(format!(
                "key field not found: {}.{}",
                table.name, key
            )));
        }
    }

    let nodes = table
        .must
        .iter()
        .map(|must| must.node.as_deref())
        .chain(table.when.iter().map(|when| when.node.as_deref()))
        .chain(table.custom_validation.iter().map(|hook| hook.node.as_deref()));
    for node in nodes.flatten() {
        if !fields.contains(node) {
            return Err(Error::InvalidSchema(format!(
                "constraint node not found: {}.{}",
                table.name, node
            )));
        }
    }

    for hook in &table.custom_validation {
        if hook.hook.trim().is_empty() {
            return Err(Error::InvalidSchema(format!(
                "empty custom validation name in table {}",
                table.name
            )));
        }
    }

    if let Some(parent) = &table.dependent_on {
        if !catalog.contains_key(parent.as_str()) {
            return Err(Error::InvalidSchema(format!(
                "dependent table not found: {} -> {}",
                table.name, parent
            )));
        }
    }

    for field in &table.fields {
        if field.kind == FieldKind::Leaf
            && (field.min_elements.is_some() || field.max_elements.is_some())
        {
            return Err(Error::InvalidSchema(format!(
                "element bounds on leaf field: {}.{}",
                table.name, field.name
            )));
        }
        if let (Some(min), Some(max)) = (field.min_elements, field.max_elements) {
            if min > max {
                return Err(Error::InvalidSchema(format!(
                    "min-elements above max-elements: {}.{}",
                    table.name, field.name
                )));
            }
        }

        match &field.field_type {
            FieldType::String {
                pattern: Some(pattern),
                ..
            } => {
                Regex::new(pattern).map_err(|err| {
                    Error::InvalidSchema(format!(
                        "invalid pattern for {}.{}: {err}",
                        table.name, field.name
                    ))
                })?;
            }
            FieldType::Enumeration { values } if values.is_empty() => {
                return Err(Error::InvalidSchema(format!(
                    "enumeration without values: {}.{}",
                    table.name, field.name
                )));
            }
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{FieldDef, ModuleDef};

    fn field(name: &str) -> FieldDef {
        FieldDef {
            name: name.to_string(),
            kind: FieldKind::Leaf,
            field_type: FieldType::default(),
            mandatory: false,
            default: None,
            min_elements: None,
            max_elements: None,
            leafref: Vec::new(),
            union_plain: false,
        }
    }

    fn doc(tables: Vec<TableDef>) -> SchemaDocument {
        SchemaDocument {
            schema_version: "0.1".to_string(),
            modules: vec![ModuleDef {
                name: "m".to_string(),
                tables,
            }],
        }
    }

    fn table(name: &str, keys: &[&str], fields: Vec<FieldDef>) -> TableDef {
        TableDef {
            name: name.to_string(),
            keys: keys.iter().map(|key| key.to_string()).collect(),
            key_delim: "|".to_string(),
            key_pattern: None,
            max_elements: None,
            fields,
            must: Vec::new(),
            when: Vec::new(),
            custom_validation: Vec::new(),
            dependent_on: None,
        }
    }

    #[test]
    fn accepts_consistent_document() {
        let doc = doc(vec![table("PORT", &["name"], vec![field("name"), field("mtu")])]);
        assert!(validate_document(&doc).is_ok());
    }

    #[test]
    fn rejects_undeclared_key() {
        let doc = doc(vec![table("PORT", &["name"], vec![field("mtu")])]);
        let err = validate_document(&doc).expect_err("missing key field");
        assert!(err.to_string().contains("key field not found"));
    }

    #[test]
    fn rejects_duplicate_tables() {
        let doc = doc(vec![
            table("PORT", &["name"], vec![field("name")]),
            table("PORT", &["name"], vec![field("name")]),
        ]);
        assert!(validate_document(&doc).is_err());
    }

    #[test]
    fn rejects_bad_pattern() {
        let mut name = field("name");
        name.field_type = FieldType::String {
            pattern: Some("Vlan(".to_string()),
            min_length: None,
            max_length: None,
        };
        let doc = doc(vec![table("VLAN", &["name"], vec![name])]);
        assert!(validate_document(&doc).is_err());
    }
}
