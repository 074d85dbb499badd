mod common;

use std::sync::Arc;

use cfgval_core::RetCode;
use cfgval_store::MemoryStore;

use common::{create, delete, seed, store, update, validator};

fn seeded() -> Arc<MemoryStore> {
    let store = store();
    seed(
        &store,
        "TEST_LEAFLIST|t1",
        &[("with-min1-max2@", "a"), ("with-min4@", "a,b,c,d")],
    );
    store
}

#[tokio::test]
async fn max_elements_exceeded() {
    let store = seeded();
    let validator = validator(&store);
    let mut session = validator.open_session();

    let err = session
        .validate_edit_config(&[create(
            "TEST_LEAFLIST|t2",
            &[("with-min1-max2@", "a,b,c"), ("with-min4@", "a,b,c,d")],
        )])
        .await
        .expect_err("three elements, two allowed");
    assert_eq!(err.code, RetCode::SyntaxMaximumInvalid);
    assert_eq!(err.details, "max-elements constraint not honored");
    assert_eq!(err.field, "with-min1-max2");
    assert_eq!(err.table, "TEST_LEAFLIST");
    assert_eq!(err.keys, vec!["t2".to_string()]);
}

#[tokio::test]
async fn min_elements_missing_on_create() {
    let store = seeded();
    let validator = validator(&store);
    let mut session = validator.open_session();

    let err = session
        .validate_edit_config(&[create("TEST_LEAFLIST|t2", &[("with-min1-max2@", "a")])])
        .await
        .expect_err("with-min4 absent");
    assert_eq!(err.code, RetCode::SyntaxMinimumInvalid);
    assert_eq!(err.details, "min-elements constraint not honored");
    assert_eq!(err.field, "with-min4");
}

#[tokio::test]
async fn empty_string_counts_as_one_instance() {
    let store = seeded();
    let validator = validator(&store);
    let mut session = validator.open_session();

    session
        .validate_edit_config(&[create(
            "TEST_LEAFLIST|t2",
            &[("with-min1-max2@", ""), ("with-min4@", "a,b,c,d")],
        )])
        .await
        .expect("one empty instance satisfies min 1");
}

#[tokio::test]
async fn update_below_minimum() {
    let store = seeded();
    let validator = validator(&store);
    let mut session = validator.open_session();

    let err = session
        .validate_edit_config(&[update("TEST_LEAFLIST|t1", &[("with-min4@", "a,b,c")])])
        .await
        .expect_err("three of four");
    assert_eq!(err.code, RetCode::SyntaxMinimumInvalid);
    assert_eq!(err.field, "with-min4");

    session
        .validate_edit_config(&[update("TEST_LEAFLIST|t1", &[])])
        .await
        .expect("empty update");
}

#[tokio::test]
async fn deleting_a_required_leaf_list() {
    let store = seeded();
    let validator = validator(&store);
    let mut session = validator.open_session();

    let err = session
        .validate_edit_config(&[delete("TEST_LEAFLIST|t1", &[("with-min1-max2@", "")])])
        .await
        .expect_err("min 1 leaf-list");
    assert_eq!(err.code, RetCode::SyntaxMinimumInvalid);
    assert_eq!(err.field, "with-min1-max2");

    session
        .validate_edit_config(&[delete("TEST_LEAFLIST|t1", &[("without-minmax@", "")])])
        .await
        .expect("unbounded leaf-list");
}

#[tokio::test]
async fn replace_keeps_the_minimum_check() {
    let store = seeded();
    let validator = validator(&store);
    let mut session = validator.open_session();

    let err = session
        .validate_edit_config(&[
            delete("TEST_LEAFLIST|t1", &[("with-min1-max2@", "")]).with_replace(true),
            update("TEST_LEAFLIST|t1", &[("with-min1-max2@", "x,y")]).with_replace(true),
        ])
        .await
        .expect_err("delete part of a replace");
    assert_eq!(err.code, RetCode::SyntaxMinimumInvalid);
}

#[tokio::test]
async fn replace_update_with_companion_delete() {
    let store = seeded();
    seed(&store, "TEST_LEAFLIST|t1", &[("without-minmax@", "p,q")]);
    let validator = validator(&store);
    let mut session = validator.open_session();

    session
        .validate_edit_config(&[
            update("TEST_LEAFLIST|t1", &[("with-min4@", "a,b,c,d,e")]).with_replace(true),
            delete("TEST_LEAFLIST|t1", &[("without-minmax@", "")]).with_replace(true),
        ])
        .await
        .expect("replace pair");
}
