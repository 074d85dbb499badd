use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use cfgval_core::{DEFAULT_KEY_DELIM, FieldMap, split_leaf_list};

/// Filter evaluated against an entry's named key components and hash fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Always,
    /// Hash field equals a value.
    FieldEquals { field: String, value: String },
    /// Named key component equals a value.
    KeyEquals { component: String, value: String },
    /// Comma-separated leaf-list field contains the value as an element.
    LeafListContains { field: String, value: String },
    Any(Vec<Predicate>),
    All(Vec<Predicate>),
}

impl Predicate {
    pub fn matches(&self, components: &BTreeMap<String, String>, hash: &FieldMap) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::FieldEquals { field, value } => hash.get(field) == Some(value),
            Predicate::KeyEquals { component, value } => components.get(component) == Some(value),
            Predicate::LeafListContains { field, value } => hash
                .get(field)
                .is_some_and(|list| split_leaf_list(list).iter().any(|item| item == value)),
            Predicate::Any(predicates) => predicates
                .iter()
                .any(|predicate| predicate.matches(components, hash)),
            Predicate::All(predicates) => predicates
                .iter()
                .all(|predicate| predicate.matches(components, hash)),
        }
    }
}

/// Advanced lookup request: key pattern, predicate, required field and limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Search {
    pub pattern: String,
    /// Names bound to the key components after the table prefix.
    pub key_names: Vec<String>,
    pub key_delim: String,
    pub predicate: Option<Predicate>,
    /// Only entries holding this field are returned.
    pub with_field: Option<String>,
    pub limit: Option<usize>,
}

impl Search {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            key_names: Vec::new(),
            key_delim: DEFAULT_KEY_DELIM.to_string(),
            predicate: None,
            with_field: None,
            limit: None,
        }
    }

    pub fn with_keys(mut self, key_names: Vec<String>, key_delim: impl Into<String>) -> Self {
        self.key_names = key_names;
        self.key_delim = key_delim.into();
        self
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn requiring_field(mut self, field: impl Into<String>) -> Self {
        self.with_field = Some(field.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Bind the components of a full key to the configured key names.
    pub fn key_components(&self, full_key: &str) -> BTreeMap<String, String> {
        let Some((_, key)) = full_key.split_once(self.key_delim.as_str()) else {
            return BTreeMap::new();
        };
        let count = self.key_names.len().max(1);
        self.key_names
            .iter()
            .cloned()
            .zip(key.splitn(count, self.key_delim.as_str()).map(str::to_string))
            .collect()
    }

    /// Whether an entry passes the predicate and field filter.
    pub fn accepts(&self, full_key: &str, hash: &FieldMap) -> bool {
        if let Some(field) = &self.with_field {
            if !hash.contains_key(field) {
                return false;
            }
        }
        match &self.predicate {
            Some(predicate) => predicate.matches(&self.key_components(full_key), hash),
            None => true,
        }
    }
}

/// Entry returned by a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub fields: FieldMap,
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfgval_core::fields;

    #[test]
    fn key_components_are_named() {
        let search = Search::new("ACL_RULE|*")
            .with_keys(vec!["aclname".to_string(), "rulename".to_string()], "|");
        let components = search.key_components("ACL_RULE|TestACL1|Rule1");
        assert_eq!(components.get("aclname").map(String::as_str), Some("TestACL1"));
        assert_eq!(components.get("rulename").map(String::as_str), Some("Rule1"));
    }

    #[test]
    fn leaf_list_membership_is_exact() {
        let hash = fields([("ports@", "Ethernet4,Ethernet40")]);
        let contains = |value: &str| Predicate::LeafListContains {
            field: "ports@".to_string(),
            value: value.to_string(),
        };
        assert!(contains("Ethernet4").matches(&BTreeMap::new(), &hash));
        assert!(contains("Ethernet40").matches(&BTreeMap::new(), &hash));
        assert!(!contains("Ethernet0").matches(&BTreeMap::new(), &hash));
    }

    #[test]
    fn any_and_field_filter() {
        let search = Search::new("MIRROR_SESSION|*")
            .with_predicate(Predicate::Any(vec![
                Predicate::FieldEquals {
                    field: "dst_port".to_string(),
                    value: "Ethernet0".to_string(),
                },
                Predicate::FieldEquals {
                    field: "dst_port".to_string(),
                    value: "[PORT|Ethernet0]".to_string(),
                },
            ]))
            .requiring_field("dst_port");
        assert!(search.accepts("MIRROR_SESSION|m1", &fields([("dst_port", "[PORT|Ethernet0]")])));
        assert!(!search.accepts("MIRROR_SESSION|m1", &fields([("src_ip", "1.1.1.1")])));
    }
}
