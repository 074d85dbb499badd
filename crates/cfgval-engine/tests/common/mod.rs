#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use cfgval_core::{EditRequest, SchemaModel, fields, load_document};
use cfgval_engine::{Validator, ValidatorConfig};
use cfgval_store::{MemoryStore, Store};

pub fn schema() -> Arc<SchemaModel> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../cfgval-core/tests/fixtures/sonic.schema.json");
    let doc = load_document(&path).expect("load schema fixture");
    Arc::new(SchemaModel::from_document(&doc).expect("build schema model"))
}

pub fn store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

pub fn seed(store: &MemoryStore, key: &str, pairs: &[(&str, &str)]) {
    store
        .hset(key, fields(pairs.iter().copied()))
        .expect("seed store");
}

pub fn validator(store: &Arc<MemoryStore>) -> Validator {
    validator_with(store, ValidatorConfig::default())
}

pub fn validator_with(store: &Arc<MemoryStore>, config: ValidatorConfig) -> Validator {
    let store: Arc<dyn Store> = Arc::clone(store) as Arc<dyn Store>;
    Validator::new(schema(), store, config).expect("build validator")
}

pub fn create(key: &str, pairs: &[(&str, &str)]) -> EditRequest {
    EditRequest::create(key, fields(pairs.iter().copied()))
}

pub fn update(key: &str, pairs: &[(&str, &str)]) -> EditRequest {
    EditRequest::update(key, fields(pairs.iter().copied()))
}

pub fn delete(key: &str, pairs: &[(&str, &str)]) -> EditRequest {
    EditRequest::delete(key, fields(pairs.iter().copied()))
}
