use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use cfgval_core::{Error, SchemaModel, load_document, parse_document};

fn fixture_path() -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/sonic.schema.json")
}

fn load_model() -> SchemaModel {
    let doc = load_document(&fixture_path()).expect("load schema document");
    SchemaModel::from_document(&doc).expect("build schema model")
}

#[test]
fn fixture_document_matches_contract() {
    let contents = fs::read_to_string(fixture_path())
        .unwrap_or_else(|_| panic!("missing fixture at {}", fixture_path().display()));
    let value: serde_json::Value = serde_json::from_str(&contents).expect("parse fixture");
    let doc = parse_document(&value).expect("document validates");
    assert_eq!(doc.schema_version, cfgval_core::SCHEMA_VERSION);
}

#[test]
fn contract_rejects_wrong_shapes() {
    let value = serde_json::json!({
        "schema_version": "0.1",
        "modules": [{ "name": "m", "tables": [{ "name": "T", "keys": "name" }] }]
    });
    let err = parse_document(&value).expect_err("keys must be an array");
    assert!(matches!(err, Error::InvalidDocument(_)));
}

#[test]
fn sort_dep_tables_orders_referencing_first() {
    let model = load_model();
    let order = model
        .graph()
        .sort_dep_tables(&["PORT", "ACL_RULE", "ACL_TABLE"])
        .expect("acyclic");
    assert_eq!(order, vec!["ACL_RULE", "ACL_TABLE", "PORT"]);
}

#[test]
fn ordered_tables_per_module() {
    let model = load_model();
    assert_eq!(
        model.graph().ordered_tables("sonic-vlan").expect("module"),
        vec!["VLAN_MEMBER", "VLAN"]
    );
    assert_eq!(
        model.graph().ordered_tables("sonic-acl").expect("module"),
        vec!["ACL_RULE", "ACL_TABLE"]
    );
    assert!(matches!(
        model.graph().ordered_tables("sonic-none"),
        Err(Error::UnknownModule(_))
    ));
}

#[test]
fn ordered_dep_tables_keeps_key_referrers() {
    let model = load_model();
    assert_eq!(
        model
            .graph()
            .ordered_dep_tables("sonic-vlan", "VLAN")
            .expect("tables"),
        vec!["VLAN_MEMBER", "VLAN"]
    );
    assert_eq!(
        model
            .graph()
            .ordered_dep_tables("sonic-bgp", "BGP_PEER_GROUP")
            .expect("tables"),
        vec!["BGP_NEIGHBOR", "BGP_PEER_GROUP"]
    );
}

#[test]
fn dep_tables_closure() {
    let model = load_model();
    let deps = model.graph().dep_tables("ACL_RULE").expect("deps");
    let expected: BTreeSet<String> =
        ["ACL_RULE", "ACL_TABLE", "MIRROR_SESSION", "PORT", "PORTCHANNEL"]
            .iter()
            .map(|name| name.to_string())
            .collect();
    assert_eq!(deps.iter().cloned().collect::<BTreeSet<_>>(), expected);

    for table in &deps {
        let nested = model.graph().dep_tables(table).expect("deps");
        assert!(nested.iter().all(|name| expected.contains(name)));
    }
}

#[test]
fn reverse_references_follow_dependency_order() {
    let model = load_model();
    let port = model.table("PORT").expect("PORT");
    let tables: Vec<&str> = port.reverse_refs.iter().map(|r| r.table.as_str()).collect();

    let position = |name: &str| tables.iter().position(|table| *table == name);
    assert!(position("ACL_TABLE") < position("PORTCHANNEL"));
    assert!(tables.contains(&"VLAN_MEMBER"));
    assert!(tables.contains(&"MIRROR_SESSION"));
    assert!(tables.contains(&"INTERFACE"));
}

#[test]
fn split_key_examples() {
    let model = load_model();
    assert_eq!(
        model.split_key("PORT|Ethernet4"),
        ("PORT".to_string(), "Ethernet4".to_string())
    );
    assert_eq!(
        model.split_key("ACL_RULE|TestACL1|Rule1"),
        ("ACL_RULE".to_string(), "TestACL1|Rule1".to_string())
    );
    assert_eq!(model.split_key("PORTS|Ethernet4"), (String::new(), String::new()));
    assert_eq!(model.split_key("PORT:Ethernet4"), (String::new(), String::new()));
}
