mod common;

use std::time::Duration;

use cfgval_core::{RetCode, fields};
use cfgval_engine::GlobalCache;

use common::{create, seed, store, validator};

async fn wait_for(cache: &GlobalCache, table: &str, key: &str, present: bool) {
    for _ in 0..200 {
        let data = cache.get(table).await.expect("cache read");
        if data.is_some_and(|data| data.contains_key(key) == present) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("cache never observed {table}|{key} present={present}");
}

#[tokio::test]
async fn store_writes_reach_cached_tables() {
    let store = store();
    seed(&store, "VLAN|Vlan10", &[("vlanid", "10")]);
    let validator = validator(&store);
    let mut session = validator.open_session();

    session
        .validate_edit_config(&[create("VLAN|Vlan11", &[("vlanid", "11")])])
        .await
        .expect("unique vlanid");
    let cache = validator.global_cache();
    assert_eq!(cache.cached_tables().await, vec!["VLAN".to_string()]);

    store
        .hset("VLAN|Vlan20", fields([("vlanid", "20")]))
        .expect("store write");
    wait_for(cache, "VLAN", "Vlan20", true).await;

    let err = validator
        .open_session()
        .validate_edit_config(&[create("VLAN|Vlan21", &[("vlanid", "20")])])
        .await
        .expect_err("vlanid 20 now taken");
    assert_eq!(err.code, RetCode::SemanticError);
    assert_eq!(err.app_tag, "vlanid-in-use");

    store.del("VLAN|Vlan20").expect("store delete");
    wait_for(cache, "VLAN", "Vlan20", false).await;

    let stats = cache.stats().await;
    assert_eq!(stats.full_scans, 1);
    assert!(stats.key_refreshes >= 2);
    assert_eq!(stats.listener_restarts, 1);

    validator.shutdown().await;
}

#[tokio::test]
async fn cache_is_shared_by_sessions() {
    let store = store();
    seed(&store, "VLAN|Vlan10", &[("vlanid", "10")]);
    let validator = validator(&store);

    for (index, vlan) in ["Vlan30", "Vlan31", "Vlan32"].into_iter().enumerate() {
        let vlanid = (30 + index).to_string();
        let mut session = validator.open_session();
        session
            .validate_edit_config(&[create(&format!("VLAN|{vlan}"), &[("vlanid", vlanid.as_str())])])
            .await
            .expect("unique vlanid");
        session.close();
    }

    assert_eq!(validator.global_cache().stats().await.full_scans, 1);
    validator.global_cache().clear().await;
    assert!(validator.global_cache().cached_tables().await.is_empty());
}
