mod common;

use cfgval_core::RetCode;

use common::{create, seed, store, validator};

#[tokio::test]
async fn self_contained_config_is_accepted() {
    let store = store();
    let validator = validator(&store);
    let mut session = validator.open_session();

    // ACL_TABLE sorts before PORT by name; the referenced PORT entries must
    // still be validated first.
    session
        .validate_config(
            r#"{
                "ACL_TABLE": {
                    "TestACL1": {
                        "type": "L3",
                        "stage": "INGRESS",
                        "ports": ["Ethernet0", "Ethernet4"]
                    }
                },
                "PORT": {
                    "Ethernet0": {"admin_status": "up", "mtu": 9100},
                    "Ethernet4": {"admin_status": "up"}
                }
            }"#,
        )
        .await
        .expect("references resolve inside the document");
}

#[tokio::test]
async fn dangling_reference_in_config() {
    let store = store();
    seed(&store, "PORT|Ethernet0", &[("admin_status", "up")]);
    let validator = validator(&store);
    let mut session = validator.open_session();

    let err = session
        .validate_config(r#"{"MIRROR_SESSION": {"everflow": {"dst_port": "Ethernet8"}}}"#)
        .await
        .expect_err("Ethernet8 is nowhere");
    assert_eq!(err.code, RetCode::SemanticDependentDataMissing);
    assert_eq!(err.table, "MIRROR_SESSION");
    assert_eq!(err.value, "Ethernet8");
}

#[tokio::test]
async fn full_config_replaces_stored_fields() {
    let store = store();
    seed(&store, "VLAN|Vlan10", &[("vlanid", "10"), ("mtu", "9100")]);
    let validator = validator(&store);
    let doc = r#"{"VLAN": {"Vlan10": {"mtu": "1500"}}}"#;

    let err = validator
        .open_session()
        .validate_config(doc)
        .await
        .expect_err("vlanid left out");
    assert_eq!(err.code, RetCode::SemanticMandatoryDataMissing);
    assert_eq!(err.app_tag, "mandatory-field-delete");
    assert_eq!(err.field, "vlanid");

    validator
        .open_session()
        .validate_incremental_config(doc)
        .await
        .expect("merged over the stored vlanid");

    validator
        .open_session()
        .validate_config(r#"{"VLAN": {"Vlan10": {"vlanid": 10}}}"#)
        .await
        .expect("mtu may be dropped");
}

#[tokio::test]
async fn incremental_config_checks_constraints() {
    let store = store();
    seed(&store, "VLAN|Vlan10", &[("vlanid", "10")]);
    let validator = validator(&store);
    let mut session = validator.open_session();

    let err = session
        .validate_incremental_config(r#"{"VLAN": {"Vlan11": {"vlanid": "10"}}}"#)
        .await
        .expect_err("vlanid 10 is taken");
    assert_eq!(err.app_tag, "vlanid-in-use");
    assert_eq!(err.keys, vec!["Vlan11".to_string()]);
}

#[tokio::test]
async fn accepted_config_overlays_later_edits() {
    let store = store();
    let validator = validator(&store);
    let mut session = validator.open_session();

    session
        .validate_incremental_config(r#"{"PORT": {"Ethernet8": {}}}"#)
        .await
        .expect("bare port");
    session
        .validate_edit_config(&[create("MIRROR_SESSION|everflow", &[("dst_port", "Ethernet8")])])
        .await
        .expect("port accepted by the earlier call");
}

#[tokio::test]
async fn malformed_config_documents() {
    let store = store();
    let validator = validator(&store);
    let mut session = validator.open_session();

    let err = session
        .validate_config(r#"{"VLANjunk": {"Vlan100": {"members": ["Ethernet4"]}}}"#)
        .await
        .expect_err("unknown table");
    assert_eq!(err.code, RetCode::SyntaxError);
    assert_eq!(err.table, "VLANjunk");

    let err = session
        .validate_config(r#"{"PORT": {"Ethernet0": {"mtu": null}}}"#)
        .await
        .expect_err("null value");
    assert_eq!(err.code, RetCode::SyntaxInvalidInputData);
    assert_eq!(err.field, "mtu");

    let err = session
        .validate_incremental_config("not json")
        .await
        .expect_err("not json");
    assert_eq!(err.code, RetCode::SyntaxError);
}
