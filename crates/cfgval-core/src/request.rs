use std::collections::BTreeMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Flat field map of one store hash.
pub type FieldMap = BTreeMap<String, String>;

/// Placeholder field used for entries that carry no data.
pub const NULL_FIELD: &str = "NULL";

/// Suffix marking a leaf-list field in flat store data.
pub const LEAF_LIST_SUFFIX: char = '@';

/// Separator between leaf-list values in flat store data.
pub const LEAF_LIST_SEPARATOR: char = ',';

/// Strip the leaf-list marker from a flat field name.
pub fn base_field_name(name: &str) -> &str {
    name.strip_suffix(LEAF_LIST_SUFFIX).unwrap_or(name)
}

/// Split a flat leaf-list value. An empty string is one empty instance.
pub fn split_leaf_list(value: &str) -> Vec<String> {
    value.split(LEAF_LIST_SEPARATOR).map(str::to_string).collect()
}

/// Edit operation requested for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    None,
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::None => "NONE",
            Operation::Create => "CREATE",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of operations a must-expression guards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct OpMask(u8);

impl OpMask {
    pub const EMPTY: OpMask = OpMask(0);
    pub const CREATE: OpMask = OpMask(1);
    pub const UPDATE: OpMask = OpMask(2);
    pub const DELETE: OpMask = OpMask(4);

    pub fn from_op(op: Operation) -> OpMask {
        match op {
            Operation::Create => OpMask::CREATE,
            Operation::Update => OpMask::UPDATE,
            Operation::Delete => OpMask::DELETE,
            Operation::None => OpMask::EMPTY,
        }
    }

    pub fn insert(&mut self, other: OpMask) {
        self.0 |= other.0;
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// An empty mask applies to every operation.
    pub fn applies_to(&self, op: Operation) -> bool {
        self.is_empty() || self.0 & OpMask::from_op(op).0 != 0
    }
}

/// Depth of validation requested for one edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ValidateType {
    /// Dependent data only; the edit feeds the request cache and is not checked.
    None,
    Syntax,
    Semantics,
    All,
}

impl ValidateType {
    pub fn checks_syntax(&self) -> bool {
        matches!(self, ValidateType::Syntax | ValidateType::All)
    }

    pub fn checks_semantics(&self) -> bool {
        matches!(self, ValidateType::Semantics | ValidateType::All)
    }
}

/// One item of an edit batch, addressed by a full store key such as `PORT|Ethernet4`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EditRequest {
    pub validate_type: ValidateType,
    pub op: Operation,
    pub key: String,
    #[serde(default)]
    pub fields: FieldMap,
    #[serde(default)]
    pub replace: bool,
}

impl EditRequest {
    pub fn new(op: Operation, key: impl Into<String>, fields: FieldMap) -> Self {
        Self {
            validate_type: ValidateType::All,
            op,
            key: key.into(),
            fields,
            replace: false,
        }
    }

    pub fn create(key: impl Into<String>, fields: FieldMap) -> Self {
        Self::new(Operation::Create, key, fields)
    }

    pub fn update(key: impl Into<String>, fields: FieldMap) -> Self {
        Self::new(Operation::Update, key, fields)
    }

    pub fn delete(key: impl Into<String>, fields: FieldMap) -> Self {
        Self::new(Operation::Delete, key, fields)
    }

    pub fn with_validate_type(mut self, validate_type: ValidateType) -> Self {
        self.validate_type = validate_type;
        self
    }

    pub fn with_replace(mut self, replace: bool) -> Self {
        self.replace = replace;
        self
    }

    /// Whether this is a DELETE of the whole entry rather than of named fields.
    pub fn is_whole_delete(&self) -> bool {
        self.op == Operation::Delete && self.fields.is_empty()
    }

    /// Whether the edit carries nothing but the `NULL` placeholder.
    pub fn is_null_only(&self) -> bool {
        self.fields.len() == 1 && self.fields.contains_key(NULL_FIELD)
    }
}

/// Build a field map from literal pairs.
pub fn fields<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> FieldMap {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_mask_applies_everywhere() {
        let mask = OpMask::default();
        assert!(mask.applies_to(Operation::Create));
        assert!(mask.applies_to(Operation::Delete));

        let mut delete_only = OpMask::EMPTY;
        delete_only.insert(OpMask::DELETE);
        assert!(delete_only.applies_to(Operation::Delete));
        assert!(!delete_only.applies_to(Operation::Update));
    }

    #[test]
    fn leaf_list_helpers() {
        assert_eq!(base_field_name("ports@"), "ports");
        assert_eq!(base_field_name("mtu"), "mtu");
        assert_eq!(split_leaf_list("a,b"), vec!["a", "b"]);
        assert_eq!(split_leaf_list(""), vec![""]);
    }

    #[test]
    fn null_only_update_is_detected() {
        let edit = EditRequest::update("PORT|Ethernet0", fields([("NULL", "NULL")]));
        assert!(edit.is_null_only());
        assert!(!EditRequest::delete("PORT|Ethernet0", FieldMap::new()).is_null_only());
    }
}
