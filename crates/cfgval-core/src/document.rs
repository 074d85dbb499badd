use std::path::Path;

use jsonschema::JSONSchema;
use schemars::schema::RootSchema;
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Delimiter used between table name and key components unless a table overrides it.
pub const DEFAULT_KEY_DELIM: &str = "|";

fn default_key_delim() -> String {
    DEFAULT_KEY_DELIM.to_string()
}

/// Compiled schema handed to the validator at startup.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SchemaDocument {
    /// Contract version for this document format.
    pub schema_version: String,
    /// Schema modules, each owning a set of tables.
    pub modules: Vec<ModuleDef>,
}

/// A schema module (one compiled model file).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ModuleDef {
    pub name: String,
    pub tables: Vec<TableDef>,
}

/// Declaration of one configuration table.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TableDef {
    pub name: String,
    /// Key component names in key order.
    pub keys: Vec<String>,
    #[serde(default = "default_key_delim")]
    pub key_delim: String,
    /// Key layout such as `VLAN_MEMBER|{name}|{ifname}`.
    #[serde(default)]
    pub key_pattern: Option<String>,
    #[serde(default)]
    pub max_elements: Option<u64>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub must: Vec<MustDef>,
    #[serde(default)]
    pub when: Vec<WhenDef>,
    #[serde(default)]
    pub custom_validation: Vec<CustomValidationDef>,
    /// Table that must be ordered after this one.
    #[serde(default)]
    pub dependent_on: Option<String>,
}

/// Declaration of a single field (leaf or leaf-list).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FieldDef {
    pub name: String,
    #[serde(default)]
    pub kind: FieldKind,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub min_elements: Option<u64>,
    #[serde(default)]
    pub max_elements: Option<u64>,
    /// Raw leafref paths. More than one path is a union of references.
    #[serde(default)]
    pub leafref: Vec<String>,
    /// The field also accepts values that are not references.
    #[serde(default)]
    pub union_plain: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    #[default]
    Leaf,
    LeafList,
}

/// Value type of a field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(tag = "base", rename_all = "snake_case")]
pub enum FieldType {
    String {
        #[serde(default)]
        pattern: Option<String>,
        #[serde(default)]
        min_length: Option<u64>,
        #[serde(default)]
        max_length: Option<u64>,
    },
    Uint {
        #[serde(default)]
        min: Option<u64>,
        #[serde(default)]
        max: Option<u64>,
    },
    Int {
        #[serde(default)]
        min: Option<i64>,
        #[serde(default)]
        max: Option<i64>,
    },
    Boolean,
    Enumeration {
        values: Vec<String>,
    },
}

impl Default for FieldType {
    fn default() -> Self {
        FieldType::String {
            pattern: None,
            min_length: None,
            max_length: None,
        }
    }
}

/// Must-expression attached to a field, or to the table when `node` is absent.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MustDef {
    #[serde(default)]
    pub node: Option<String>,
    pub expression: String,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub error_app_tag: Option<String>,
}

/// When-expression gating a field, or the table when `node` is absent.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WhenDef {
    #[serde(default)]
    pub node: Option<String>,
    pub expression: String,
}

/// Named custom validation hook bound to a field or the table.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CustomValidationDef {
    #[serde(default)]
    pub node: Option<String>,
    pub hook: String,
}

/// Emit the JSON Schema for schema documents.
pub fn document_json_schema() -> RootSchema {
    schema_for!(SchemaDocument)
}

/// Check a raw document against the JSON Schema contract and decode it.
pub fn parse_document(value: &Value) -> Result<SchemaDocument> {
    let schema = serde_json::to_value(document_json_schema())?;
    let compiled =
        JSONSchema::compile(&schema).map_err(|err| Error::InvalidSchema(err.to_string()))?;

    if let Err(errors) = compiled.validate(value) {
        let messages: Vec<String> = errors
            .map(|error| {
                let path = error.instance_path.to_string();
                let path = if path.is_empty() { "/".to_string() } else { path };
                format!("{path}: {error}")
            })
            .collect();
        return Err(Error::InvalidDocument(messages.join("; ")));
    }

    Ok(serde_json::from_value(value.clone())?)
}

/// Read and decode a schema document from disk.
pub fn load_document(path: &Path) -> Result<SchemaDocument> {
    let contents = std::fs::read_to_string(path)?;
    let value: Value = serde_json::from_str(&contents)?;
    parse_document(&value)
}
