mod commands;
mod output;

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use cfgval_core::{Error as CoreError, document_json_schema};
use cfgval_engine::{EngineError, Session, Validator};
use cfgval_store::StoreError;
use commands::Sources;
use output::{BatchOutcome, OutputError, ValidationReport, init_logging, write_json_atomic};

#[derive(Debug, Error)]
pub(crate) enum CliError {
    #[error("output error: {0}")]
    Output(#[from] OutputError),
    #[error("core error: {0}")]
    Core(#[from] CoreError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0} batch(es) rejected")]
    Rejected(usize),
}

#[derive(Parser, Debug)]
#[command(name = "cfgval", version, about = "Config DB validation CLI")]
struct Cli {
    /// Append JSON log lines to this file instead of logging to stderr.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate edit batches against a store snapshot.
    Validate(ValidateArgs),
    /// Validate a configuration document (table -> key -> fields).
    ValidateConfig(ValidateConfigArgs),
    /// Topologically sort tables by their references.
    Sort(SortArgs),
    /// Ordered tables of a module.
    Order(OrderArgs),
    /// Tables a table depends on and tables referring to it.
    Deps(DepsArgs),
    /// Entries removed or trimmed when a key is deleted.
    DeleteDeps(DeleteDepsArgs),
    /// Reference graph summary with topological order or cycle.
    Graph(GraphArgs),
    /// Print the JSON Schema of schema documents.
    EmitJsonSchema(EmitArgs),
}

#[derive(Args, Debug)]
struct SchemaArgs {
    /// Compiled schema document (JSON).
    #[arg(long, value_name = "PATH")]
    schema: PathBuf,
}

#[derive(Args, Debug)]
struct StoreArgs {
    /// Store snapshot of the form {"TABLE|key": {"field": "value"}}.
    #[arg(long, value_name = "PATH")]
    store: Option<PathBuf>,
    /// Validator settings; missing file means defaults.
    #[arg(long, value_name = "PATH", default_value = "cfgval.toml")]
    config: PathBuf,
}

#[derive(Args, Debug)]
struct ValidateArgs {
    #[command(flatten)]
    schema: SchemaArgs,
    #[command(flatten)]
    store: StoreArgs,
    /// Batch files (JSON arrays of edits), validated in order in one session.
    #[arg(value_name = "BATCH", required = true)]
    batches: Vec<PathBuf>,
    /// Stop at the first rejected batch.
    #[arg(long, default_value_t = false)]
    fail_fast: bool,
    /// Write the report here instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ValidateConfigArgs {
    #[command(flatten)]
    schema: SchemaArgs,
    #[command(flatten)]
    store: StoreArgs,
    /// Configuration document (JSON).
    #[arg(value_name = "DOCUMENT")]
    document: PathBuf,
    /// Merge the document over stored entries instead of replacing them.
    #[arg(long, default_value_t = false)]
    incremental: bool,
    /// Write the report here instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SortArgs {
    #[command(flatten)]
    schema: SchemaArgs,
    #[arg(value_name = "TABLE", required = true)]
    tables: Vec<String>,
}

#[derive(Args, Debug)]
struct OrderArgs {
    #[command(flatten)]
    schema: SchemaArgs,
    #[arg(value_name = "MODULE")]
    module: String,
    /// Restrict to this table and the module tables keyed on it.
    #[arg(long)]
    table: Option<String>,
}

#[derive(Args, Debug)]
struct DepsArgs {
    #[command(flatten)]
    schema: SchemaArgs,
    #[arg(value_name = "TABLE")]
    table: String,
}

#[derive(Args, Debug)]
struct DeleteDepsArgs {
    #[command(flatten)]
    schema: SchemaArgs,
    #[command(flatten)]
    store: StoreArgs,
    /// Full store key, e.g. PORT|Ethernet0.
    #[arg(value_name = "KEY")]
    key: String,
    /// Print the per-reference groups instead of the merged plan.
    #[arg(long, default_value_t = false)]
    grouped: bool,
}

#[derive(Args, Debug)]
struct GraphArgs {
    #[command(flatten)]
    schema: SchemaArgs,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct EmitArgs {
    #[arg(long)]
    out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_deref())?;

    match cli.command {
        Command::Validate(args) => run_validate(args).await,
        Command::ValidateConfig(args) => run_validate_config(args).await,
        Command::Sort(args) => {
            let validator = topology_validator(&args.schema)?;
            let order = validator.open_session().sort_dep_tables(&args.tables)?;
            emit(&order, None)
        }
        Command::Order(args) => {
            let validator = topology_validator(&args.schema)?;
            let session = validator.open_session();
            let order = commands::module_order(&session, &args.module, args.table.as_deref())?;
            emit(&order, None)
        }
        Command::Deps(args) => {
            let validator = topology_validator(&args.schema)?;
            let deps = commands::table_dependencies(&validator.open_session(), &args.table)?;
            emit(&deps, None)
        }
        Command::DeleteDeps(args) => run_delete_deps(args).await,
        Command::Graph(args) => {
            let schema = commands::load_schema(&args.schema.schema)?;
            emit(&commands::graph_report(&schema), args.out.as_deref())
        }
        Command::EmitJsonSchema(args) => emit(&document_json_schema(), args.out.as_deref()),
    }
}

async fn run_validate(args: ValidateArgs) -> Result<(), CliError> {
    let run = Run::begin();

    let validator = commands::build_validator(&Sources {
        schema: &args.schema.schema,
        store: args.store.store.as_deref(),
        config: &args.store.config,
    })?;
    let mut session = validator.open_session();
    tracing::info!(
        event = "run_started",
        run_id = %run.id,
        session_id = %session.id(),
        batches = args.batches.len()
    );

    let outcomes = commands::validate_batches(&mut session, &args.batches, args.fail_fast).await?;
    finish_run(run, &validator, session, outcomes, args.out.as_deref()).await
}

async fn run_validate_config(args: ValidateConfigArgs) -> Result<(), CliError> {
    let run = Run::begin();
    let validator = commands::build_validator(&Sources {
        schema: &args.schema.schema,
        store: args.store.store.as_deref(),
        config: &args.store.config,
    })?;
    let mut session = validator.open_session();
    tracing::info!(
        event = "run_started",
        run_id = %run.id,
        session_id = %session.id(),
        document = %args.document.display(),
        incremental = args.incremental
    );

    let outcome =
        commands::validate_config_file(&mut session, &args.document, args.incremental).await?;
    finish_run(run, &validator, session, vec![outcome], args.out.as_deref()).await
}

struct Run {
    id: Uuid,
    started_at: DateTime<Utc>,
    start: Instant,
}

impl Run {
    fn begin() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            start: Instant::now(),
        }
    }
}

/// Report the outcomes, close the session and fail on any rejection.
async fn finish_run(
    run: Run,
    validator: &Validator,
    session: Session,
    outcomes: Vec<BatchOutcome>,
    out: Option<&Path>,
) -> Result<(), CliError> {
    let report = ValidationReport::new(
        run.id,
        session.id(),
        validator.schema().schema_version(),
        run.started_at,
        outcomes,
        validator.stats(),
        validator.global_cache().stats().await,
    );
    session.close();
    validator.shutdown().await;

    tracing::info!(
        event = "run_finished",
        run_id = %run.id,
        accepted = report.accepted,
        rejected = report.rejected,
        duration_ms = run.start.elapsed().as_millis() as u64
    );
    emit(&report, out)?;

    if report.rejected > 0 {
        return Err(CliError::Rejected(report.rejected));
    }
    Ok(())
}

async fn run_delete_deps(args: DeleteDepsArgs) -> Result<(), CliError> {
    let validator = commands::build_validator(&Sources {
        schema: &args.schema.schema,
        store: args.store.store.as_deref(),
        config: &args.store.config,
    })?;
    let session = validator.open_session();

    let result = if args.grouped {
        emit(&session.dep_data_for_delete(&args.key).await?, None)
    } else {
        emit(&commands::delete_plan(&session, &args.key).await?, None)
    };
    validator.shutdown().await;
    result
}

/// Topology queries only need the schema; they run over an empty store.
fn topology_validator(args: &SchemaArgs) -> Result<Validator, CliError> {
    commands::build_validator(&Sources {
        schema: &args.schema,
        store: None,
        config: Path::new("cfgval.toml"),
    })
}

fn emit<T: Serialize>(value: &T, out: Option<&Path>) -> Result<(), CliError> {
    match out {
        Some(path) => {
            write_json_atomic(path, value)?;
            println!("{}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}
