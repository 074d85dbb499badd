use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use cfgval_core::{DependencyReport, FieldMap, SchemaModel, load_document};
use cfgval_engine::{EngineResult, Session, Validator, ValidatorConfig, parse_config};
use cfgval_store::{MemoryStore, Store};

use crate::CliError;
use crate::output::{BatchOutcome, load_batch, load_config};

/// Schema, store snapshot and settings a validator is built from.
#[derive(Debug, Clone)]
pub struct Sources<'a> {
    pub schema: &'a Path,
    pub store: Option<&'a Path>,
    pub config: &'a Path,
}

pub fn load_schema(path: &Path) -> Result<Arc<SchemaModel>, CliError> {
    let doc = load_document(path)?;
    Ok(Arc::new(SchemaModel::from_document(&doc)?))
}

pub fn build_validator(sources: &Sources<'_>) -> Result<Validator, CliError> {
    let schema = load_schema(sources.schema)?;
    let store = match sources.store {
        Some(path) => MemoryStore::load_json(path)?,
        None => MemoryStore::new(),
    };
    let store: Arc<dyn Store> = Arc::new(store);
    let config = ValidatorConfig::load_or_default(sources.config)?;
    Ok(Validator::new(schema, store, config)?)
}

/// Validate each batch file in order within one session, so accepted
/// batches stay visible to the ones after them.
pub async fn validate_batches(
    session: &mut Session,
    batches: &[PathBuf],
    fail_fast: bool,
) -> Result<Vec<BatchOutcome>, CliError> {
    let mut outcomes = Vec::with_capacity(batches.len());
    for path in batches {
        let batch = load_batch(path)?;
        let source = path.display().to_string();
        let result = session
            .validate_edit_config_labeled(|| source.clone(), &batch)
            .await;

        let outcome = BatchOutcome::new(source, batch.len(), result);
        if let Some(error) = &outcome.error {
            tracing::warn!(
                event = "batch_rejected",
                source = %outcome.source,
                code = ?error.code,
                message = %error.message()
            );
        }
        let stop = fail_fast && outcome.is_rejected();
        outcomes.push(outcome);
        if stop {
            break;
        }
    }
    Ok(outcomes)
}

/// Validate one configuration document, as complete entries or, with
/// `incremental`, merged over the stored ones.
pub async fn validate_config_file(
    session: &mut Session,
    path: &Path,
    incremental: bool,
) -> Result<BatchOutcome, CliError> {
    let json = load_config(path)?;
    let items = parse_config(&json)
        .map(|doc| doc.values().map(BTreeMap::len).sum())
        .unwrap_or(0);
    let result = if incremental {
        session.validate_incremental_config(&json).await
    } else {
        session.validate_config(&json).await
    };

    let outcome = BatchOutcome::new(path.display().to_string(), items, result);
    if let Some(error) = &outcome.error {
        tracing::warn!(
            event = "config_rejected",
            source = %outcome.source,
            incremental,
            code = ?error.code,
            message = %error.message()
        );
    }
    Ok(outcome)
}

#[derive(Debug, Clone, Serialize)]
pub struct TableDependencies {
    pub table: String,
    pub dep_tables: Vec<String>,
    pub referring_tables: Vec<String>,
}

pub fn table_dependencies(session: &Session, table: &str) -> EngineResult<TableDependencies> {
    Ok(TableDependencies {
        table: table.to_string(),
        dep_tables: session.dep_tables(table)?,
        referring_tables: session.referring_tables(table),
    })
}

pub fn module_order(session: &Session, module: &str, table: Option<&str>) -> EngineResult<Vec<String>> {
    match table {
        Some(table) => session.ordered_dep_tables(module, table),
        None => session.ordered_tables(module),
    }
}

/// Everything removed or trimmed when `key` goes away, merged per entry.
pub async fn delete_plan(session: &Session, key: &str) -> EngineResult<BTreeMap<String, FieldMap>> {
    let mut plan: BTreeMap<String, FieldMap> = BTreeMap::new();
    for group in session.dep_data_for_delete(key).await? {
        for (entry, fields) in group.entries {
            match plan.get_mut(&entry) {
                // An empty map already removes the whole entry.
                Some(existing) if existing.is_empty() => {}
                Some(existing) if fields.is_empty() => existing.clear(),
                Some(existing) => existing.extend(fields),
                None => {
                    plan.insert(entry, fields);
                }
            }
        }
    }
    Ok(plan)
}

pub fn graph_report(schema: &SchemaModel) -> DependencyReport {
    schema.graph().report()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
    }

    fn schema_path() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../cfgval-core/tests/fixtures/sonic.schema.json")
    }

    fn validator() -> Validator {
        let schema = schema_path();
        let store = fixture("store.json");
        let config = fixture("cfgval.toml");
        build_validator(&Sources {
            schema: &schema,
            store: Some(&store),
            config: &config,
        })
        .expect("build validator")
    }

    #[tokio::test]
    async fn later_batches_see_accepted_ones() {
        let validator = validator();
        assert_eq!(validator.config().cache_ttl_secs, 60);
        assert_eq!(validator.config().pipeline_batch, 16);

        let mut session = validator.open_session();
        let batches = vec![
            fixture("batch_mirror.json"),
            fixture("batch_ports.json"),
            fixture("batch_mirror.json"),
            fixture("batch_vlan_conflict.json"),
        ];
        let outcomes = validate_batches(&mut session, &batches, false)
            .await
            .expect("batches load");

        let rejected: Vec<bool> = outcomes.iter().map(BatchOutcome::is_rejected).collect();
        assert_eq!(rejected, vec![true, false, false, true]);
        let conflict = outcomes[3].error.as_ref().expect("vlan conflict");
        assert_eq!(conflict.app_tag, "vlanid-in-use");
        assert_eq!(validator.stats().hits, 4);
        validator.shutdown().await;
    }

    #[tokio::test]
    async fn fail_fast_stops_at_first_rejection() {
        let validator = validator();
        let mut session = validator.open_session();
        let batches = vec![fixture("batch_vlan_conflict.json"), fixture("batch_ports.json")];
        let outcomes = validate_batches(&mut session, &batches, true)
            .await
            .expect("batches load");
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_rejected());
    }

    #[tokio::test]
    async fn missing_batch_file_is_an_error() {
        let validator = validator();
        let mut session = validator.open_session();
        let result = validate_batches(&mut session, &[fixture("absent.json")], false).await;
        assert!(matches!(result, Err(CliError::Output(_))));
    }

    #[tokio::test]
    async fn config_documents_full_and_incremental() {
        let validator = validator();
        let mut session = validator.open_session();

        let outcome = validate_config_file(&mut session, &fixture("config_mirror.json"), false)
            .await
            .expect("document loads");
        assert!(!outcome.is_rejected());
        assert_eq!(outcome.items, 2);

        let partial = fixture("config_vlan_mtu.json");
        let outcome = validate_config_file(&mut session, &partial, false)
            .await
            .expect("document loads");
        let error = outcome.error.as_ref().expect("vlanid left out");
        assert_eq!(error.app_tag, "mandatory-field-delete");

        let outcome = validate_config_file(&mut session, &partial, true)
            .await
            .expect("document loads");
        assert!(!outcome.is_rejected());
        validator.shutdown().await;
    }

    #[tokio::test]
    async fn topology_and_delete_plan() {
        let validator = validator();
        let session = validator.open_session();

        let deps = table_dependencies(&session, "ACL_RULE").expect("known table");
        assert!(deps.dep_tables.contains(&"ACL_TABLE".to_string()));
        assert!(table_dependencies(&session, "PORT")
            .expect("known table")
            .referring_tables
            .contains(&"MIRROR_SESSION".to_string()));

        assert_eq!(
            module_order(&session, "sonic-vlan", None).expect("module"),
            vec!["VLAN_MEMBER", "VLAN"]
        );

        let plan = delete_plan(&session, "ACL_TABLE|TestACL1").await.expect("plan");
        assert_eq!(plan.get("ACL_RULE|TestACL1|Rule1"), Some(&FieldMap::new()));

        let report = graph_report(validator.schema());
        assert!(report.cycle.is_none());
        let order = report.topo_order.expect("acyclic fixture");
        let position = |table: &str| order.iter().position(|name| name == table);
        assert!(position("ACL_RULE") < position("ACL_TABLE"));
    }
}
