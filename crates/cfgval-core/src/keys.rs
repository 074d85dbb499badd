use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Glob match used for store key patterns.
///
/// `*` matches any run of characters (including none), `?` exactly one,
/// and `\` escapes the next character. Character classes are not supported.
pub fn key_match(value: &str, pattern: &str) -> bool {
    let value: Vec<char> = value.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    let (mut v, mut p) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;

    while v < value.len() {
        if p < pattern.len() {
            match pattern[p] {
                '*' => {
                    backtrack = Some((p, v));
                    p += 1;
                    continue;
                }
                '?' => {
                    v += 1;
                    p += 1;
                    continue;
                }
                '\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == value[v] {
                        v += 1;
                        p += 2;
                        continue;
                    }
                }
                literal => {
                    if literal == value[v] {
                        v += 1;
                        p += 1;
                        continue;
                    }
                }
            }
        }

        match backtrack {
            Some((star, matched)) => {
                p = star + 1;
                v = matched + 1;
                backtrack = Some((star, matched + 1));
            }
            None => return false,
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

/// Escape glob metacharacters in a literal key component.
pub fn escape_glob(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '*' | '?' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// One component of a table key layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPart {
    Field(String),
    LeafList(String),
}

impl KeyPart {
    pub fn name(&self) -> &str {
        match self {
            KeyPart::Field(name) | KeyPart::LeafList(name) => name,
        }
    }
}

/// Parsed key layout of a table, e.g. `VLAN_MEMBER|{name}|{ifname}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPattern {
    table: String,
    delim: String,
    parts: Vec<KeyPart>,
}

impl KeyPattern {
    /// Parse a declared layout, or build the default one from the key names.
    pub fn parse(table: &str, delim: &str, pattern: Option<&str>, keys: &[String]) -> Result<Self> {
        if delim.is_empty() {
            return Err(Error::InvalidSchema(format!(
                "empty key delimiter for table {table}"
            )));
        }

        let parts = match pattern {
            None => keys.iter().cloned().map(KeyPart::Field).collect(),
            Some(pattern) => {
                let mut segments = pattern.split(delim);
                let head = segments.next().unwrap_or_default();
                if head != table {
                    return Err(Error::InvalidSchema(format!(
                        "key pattern '{pattern}' does not start with table {table}"
                    )));
                }
                segments
                    .map(|segment| parse_segment(table, segment))
                    .collect::<Result<Vec<_>>>()?
            }
        };

        for part in &parts {
            if !keys.iter().any(|key| key == part.name()) {
                return Err(Error::InvalidSchema(format!(
                    "key pattern of {table} names unknown key '{}'",
                    part.name()
                )));
            }
        }

        Ok(Self {
            table: table.to_string(),
            delim: delim.to_string(),
            parts,
        })
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.parts
    }

    pub fn delim(&self) -> &str {
        &self.delim
    }

    /// Split a key (without table prefix) into its components.
    pub fn components<'a>(&self, key: &'a str) -> Vec<&'a str> {
        if self.parts.len() <= 1 {
            return vec![key];
        }
        key.splitn(self.parts.len(), self.delim.as_str()).collect()
    }

    /// Pair key component names with their values.
    pub fn bind(&self, key: &str) -> Vec<(String, String)> {
        self.parts
            .iter()
            .zip(self.components(key))
            .map(|(part, value)| (part.name().to_string(), value.to_string()))
            .collect()
    }

    /// Full store key for a key remainder.
    pub fn store_key(&self, key: &str) -> String {
        format!("{}{}{}", self.table, self.delim, key)
    }

    /// Store glob selecting every entry of the table.
    pub fn table_glob(&self) -> String {
        format!("{}{}*", escape_glob(&self.table), self.delim)
    }

    /// Store glob matching entries whose named components equal the given
    /// values; unknown components become `*`.
    pub fn find_expression(&self, known: &BTreeMap<&str, &str>) -> String {
        let mut expr = escape_glob(&self.table);
        for part in &self.parts {
            expr.push_str(&self.delim);
            match (part, known.get(part.name())) {
                (KeyPart::Field(_), Some(value)) => expr.push_str(&escape_glob(value)),
                (KeyPart::LeafList(_), Some(value)) => {
                    expr.push('*');
                    expr.push_str(&escape_glob(value));
                    expr.push('*');
                }
                (_, None) => expr.push('*'),
            }
        }
        expr
    }
}

fn parse_segment(table: &str, segment: &str) -> Result<KeyPart> {
    if let Some(inner) = segment
        .strip_prefix("({")
        .and_then(|rest| rest.strip_suffix("},)*"))
    {
        return Ok(KeyPart::LeafList(inner.to_string()));
    }
    if let Some(inner) = segment
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
    {
        return Ok(KeyPart::Field(inner.to_string()));
    }
    Err(Error::InvalidSchema(format!(
        "unsupported key pattern segment '{segment}' in table {table}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn glob_wildcards() {
        assert!(key_match("PORT|Ethernet0", "PORT|*"));
        assert!(key_match("PORT|", "PORT|*"));
        assert!(key_match("PORT|Ethernet0", "PORT|Ethernet?"));
        assert!(!key_match("PORT|Ethernet10", "PORT|Ethernet?"));
        assert!(key_match("A|x|y", "A|*|y"));
        assert!(!key_match("A|x|z", "A|*|y"));
        assert!(key_match("abcabc", "*abc"));
    }

    #[test]
    fn glob_escape_is_literal() {
        assert!(key_match("T|a*b", "T|a\\*b"));
        assert!(!key_match("T|axb", "T|a\\*b"));
        assert!(key_match("T|a*b", &format!("T|{}", escape_glob("a*b"))));
    }

    #[test]
    fn glob_has_no_character_classes() {
        assert!(!key_match("T|a", "T|[a]"));
        assert!(key_match("T|[a]", "T|[a]"));
    }

    #[test]
    fn default_pattern_follows_key_order() {
        let pattern = KeyPattern::parse("VLAN_MEMBER", "|", None, &keys(&["name", "ifname"]))
            .expect("pattern");
        assert_eq!(
            pattern.bind("Vlan10|Ethernet0"),
            vec![
                ("name".to_string(), "Vlan10".to_string()),
                ("ifname".to_string(), "Ethernet0".to_string())
            ]
        );
        assert_eq!(pattern.store_key("Vlan10|Ethernet0"), "VLAN_MEMBER|Vlan10|Ethernet0");

        let mut known = BTreeMap::new();
        known.insert("ifname", "Ethernet0");
        assert_eq!(pattern.find_expression(&known), "VLAN_MEMBER|*|Ethernet0");
    }

    #[test]
    fn declared_pattern_must_match_keys() {
        let ok = KeyPattern::parse(
            "ACL_RULE",
            "|",
            Some("ACL_RULE|{aclname}|{rulename}"),
            &keys(&["aclname", "rulename"]),
        );
        assert!(ok.is_ok());

        let bad = KeyPattern::parse("ACL_RULE", "|", Some("ACL_RULE|{x}"), &keys(&["aclname"]));
        assert!(bad.is_err());
    }

    #[test]
    fn single_key_keeps_delimiters() {
        let pattern = KeyPattern::parse("ROUTE", "|", None, &keys(&["prefix"])).expect("pattern");
        assert_eq!(pattern.components("a|b"), vec!["a|b"]);
    }
}
