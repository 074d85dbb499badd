mod common;

use cfgval_core::RetCode;

use common::{create, delete, seed, store, update, validator};

#[tokio::test]
async fn vlan_id_must_be_unique() {
    let store = store();
    seed(&store, "VLAN|Vlan10", &[("vlanid", "10")]);
    let validator = validator(&store);
    let mut session = validator.open_session();

    let err = session
        .validate_edit_config(&[create("VLAN|Vlan11", &[("vlanid", "10")])])
        .await
        .expect_err("vlanid 10 is taken");
    assert_eq!(err.code, RetCode::SemanticError);
    assert_eq!(err.msg, "Must expression validation failed");
    assert_eq!(err.constraint_msg, "Vlan ID is already in use by another VLAN");
    assert_eq!(err.app_tag, "vlanid-in-use");
    assert_eq!(err.field, "vlanid");
    assert_eq!(err.value, "10");
    assert_eq!(err.keys, vec!["Vlan11".to_string()]);
    assert_eq!(err.message(), "Vlan ID is already in use by another VLAN");

    session
        .validate_edit_config(&[create("VLAN|Vlan12", &[("vlanid", "12")])])
        .await
        .expect("free vlanid");

    let err = session
        .validate_edit_config(&[create("VLAN|Vlan13", &[("vlanid", "12")])])
        .await
        .expect_err("taken by the pending create of Vlan12");
    assert_eq!(err.app_tag, "vlanid-in-use");
}

#[tokio::test]
async fn duplicate_vlan_ids_in_one_batch() {
    let store = store();
    let validator = validator(&store);
    let mut session = validator.open_session();

    let err = session
        .validate_edit_config(&[
            create("VLAN|Vlan20", &[("vlanid", "20")]),
            create("VLAN|Vlan21", &[("vlanid", "20")]),
        ])
        .await
        .expect_err("second create collides");
    assert_eq!(err.keys, vec!["Vlan21".to_string()]);
}

#[tokio::test]
async fn acl_type_is_locked_while_rules_exist() {
    let store = store();
    seed(&store, "ACL_TABLE|TestACL1", &[("type", "L3")]);
    seed(&store, "ACL_RULE|TestACL1|Rule1", &[("PACKET_ACTION", "FORWARD")]);
    let validator = validator(&store);
    let mut session = validator.open_session();

    let err = session
        .validate_edit_config(&[update("ACL_TABLE|TestACL1", &[("type", "MIRROR")])])
        .await
        .expect_err("rule attached");
    assert_eq!(err.code, RetCode::SemanticError);
    assert_eq!(err.constraint_msg, "ACL table type cannot change while rules are attached");
    assert_eq!(err.app_tag, "acl-type-locked");
    assert_eq!(err.field, "type");

    session
        .validate_edit_config(&[update("ACL_TABLE|TestACL1", &[("policy_desc", "edge filter")])])
        .await
        .expect("type untouched");
}

#[tokio::test]
async fn acl_type_change_after_rule_delete() {
    let store = store();
    seed(&store, "ACL_TABLE|TestACL1", &[("type", "L3")]);
    seed(&store, "ACL_RULE|TestACL1|Rule1", &[("PACKET_ACTION", "FORWARD")]);
    let validator = validator(&store);
    let mut session = validator.open_session();

    session
        .validate_edit_config(&[
            delete("ACL_RULE|TestACL1|Rule1", &[]),
            update("ACL_TABLE|TestACL1", &[("type", "MIRROR")]),
        ])
        .await
        .expect("no rules left");
}

#[tokio::test]
async fn when_condition_on_mirror_action() {
    let store = store();
    seed(&store, "PORT|Ethernet0", &[("admin_status", "up")]);
    seed(&store, "ACL_TABLE|TestACL1", &[("type", "MIRROR")]);
    seed(&store, "MIRROR_SESSION|everflow", &[("dst_port", "Ethernet0")]);
    let validator = validator(&store);
    let mut session = validator.open_session();

    let err = session
        .validate_edit_config(&[create(
            "ACL_RULE|TestACL1|Rule2",
            &[("PACKET_ACTION", "DROP"), ("MIRROR_ACTION", "everflow")],
        )])
        .await
        .expect_err("mirror on a dropping rule");
    assert_eq!(err.code, RetCode::SemanticError);
    assert_eq!(err.msg, "When expression validation failed");
    assert_eq!(err.field, "MIRROR_ACTION");

    session
        .validate_edit_config(&[create(
            "ACL_RULE|TestACL1|Rule2",
            &[("PACKET_ACTION", "FORWARD"), ("MIRROR_ACTION", "everflow")],
        )])
        .await
        .expect("forwarding rule may mirror");
}

#[tokio::test]
async fn field_delete_rechecks_list_level_must() {
    let store = store();
    seed(&store, "VRF|Vrf1", &[("fallback", "false")]);
    seed(&store, "BGP_PEER_GROUP|Vrf1|PG1", &[("asn", "65000")]);
    let validator = validator(&store);
    let mut session = validator.open_session();

    let err = session
        .validate_edit_config(&[delete("BGP_PEER_GROUP|Vrf1|PG1", &[("asn", "")])])
        .await
        .expect_err("asn is required by the list constraint");
    assert_eq!(err.code, RetCode::SemanticError);
    assert_eq!(err.msg, "Must expression validation failed");
    assert_eq!(err.table, "BGP_PEER_GROUP");
    assert_eq!(err.constraint_msg, "Peer group requires an AS number");
    assert_eq!(err.app_tag, "peer-group-asn-required");

    session
        .validate_edit_config(&[delete("BGP_PEER_GROUP|Vrf1|PG1", &[])])
        .await
        .expect("whole entry may go");
}

#[tokio::test]
async fn list_level_must_applies_on_create() {
    let store = store();
    seed(&store, "VRF|Vrf1", &[("fallback", "false")]);
    let validator = validator(&store);
    let mut session = validator.open_session();

    let err = session
        .validate_edit_config(&[create("BGP_PEER_GROUP|Vrf1|PG2", &[("NULL", "NULL")])])
        .await
        .expect_err("no asn");
    assert_eq!(err.app_tag, "peer-group-asn-required");

    session
        .validate_edit_config(&[create("BGP_PEER_GROUP|Vrf1|PG2", &[("asn", "65001")])])
        .await
        .expect("asn present");
}
