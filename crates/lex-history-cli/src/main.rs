use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use lex_history_core::{parse_iso_date, Document, DEFAULT_MAX_DEPTH};
use lex_history_export::{
    render_version_at, DocumentLayout, ExportOptions, ExportReport, Exporter, FsBodyCache,
    GitSink, MemorySink, VersionedSink,
};
use lex_history_store_sqlite::{read_dataset, SqliteStore};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "lh")]
#[command(about = "Legal text history exporter")]
struct Cli {
    #[arg(long, default_value = "./lex_history.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Text {
        #[command(subcommand)]
        command: TextCommand,
    },
    /// Replay every version of the selected texts into git repositories.
    Export(ExportArgs),
    /// Print the text as in force on one date.
    Render(RenderArgs),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    Import(DbImportArgs),
    Backup(DbBackupArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DbImportArgs {
    #[arg(long = "in")]
    input: PathBuf,
    #[arg(long, default_value_t = false)]
    skip_existing: bool,
}

#[derive(Debug, Args)]
struct DbBackupArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Subcommand)]
enum TextCommand {
    List,
}

#[derive(Debug, Args)]
struct ExportArgs {
    #[arg(long = "text", required_unless_present = "all", conflicts_with = "all")]
    texts: Vec<String>,
    #[arg(long, default_value_t = false)]
    all: bool,
    #[arg(long)]
    cache: PathBuf,
    #[arg(long)]
    out: PathBuf,
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: usize,
    /// Render and report every version without touching the output directory.
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct RenderArgs {
    #[arg(long)]
    text: String,
    /// Date in `YYYY-MM-DD` form.
    #[arg(long)]
    at: String,
    #[arg(long)]
    cache: PathBuf,
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: usize,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mut store = SqliteStore::open(&cli.db)?;
    match cli.command {
        Command::Db { command } => run_db(command, &mut store),
        Command::Text { command: TextCommand::List } => run_text_list(&mut store),
        Command::Export(args) => run_export(&args, &mut store),
        Command::Render(args) => run_render(&args, &mut store),
    }
}

fn run_db(command: DbCommand, store: &mut SqliteStore) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => run_db_schema_version(store),
        DbCommand::Migrate(args) => run_db_migrate(&args, store),
        DbCommand::Import(args) => run_db_import(&args, store),
        DbCommand::Backup(args) => run_db_backup(&args, store),
        DbCommand::IntegrityCheck => run_db_integrity_check(store),
    }
}

fn run_db_schema_version(store: &SqliteStore) -> Result<()> {
    let status = store.schema_status()?;
    emit_json(serde_json::json!({
        "current_version": status.current_version,
        "target_version": status.target_version,
        "pending_versions": status.pending_versions,
        "up_to_date": status.pending_versions.is_empty()
    }))
}

fn run_db_migrate(args: &DbMigrateArgs, store: &mut SqliteStore) -> Result<()> {
    let before = store.schema_status()?;
    if args.dry_run {
        emit_json(serde_json::json!({
            "dry_run": true,
            "current_version": before.current_version,
            "target_version": before.target_version,
            "would_apply_versions": before.pending_versions
        }))?;
        return Ok(());
    }

    store.migrate()?;
    let after = store.schema_status()?;
    emit_json(serde_json::json!({
        "dry_run": false,
        "before_version": before.current_version,
        "applied_versions": before.pending_versions,
        "after_version": after.current_version,
        "target_version": after.target_version,
        "up_to_date": after.pending_versions.is_empty()
    }))
}

fn run_db_import(args: &DbImportArgs, store: &mut SqliteStore) -> Result<()> {
    store.migrate()?;
    let dataset = read_dataset(&args.input)?;
    let summary = store.import_dataset(&dataset, args.skip_existing)?;
    emit_json(serde_json::json!({
        "in_file": args.input,
        "skip_existing": args.skip_existing,
        "summary": summary
    }))
}

fn run_db_backup(args: &DbBackupArgs, store: &mut SqliteStore) -> Result<()> {
    store.migrate()?;
    store.backup_database(&args.out)?;
    emit_json(serde_json::json!({
        "backup_path": args.out,
        "status": "ok"
    }))
}

fn run_db_integrity_check(store: &SqliteStore) -> Result<()> {
    let report = store.integrity_check()?;
    emit_json(serde_json::to_value(&report).context("failed to serialize integrity report")?)
}

fn run_text_list(store: &mut SqliteStore) -> Result<()> {
    store.migrate()?;
    let documents = store.list_documents()?;
    emit_json(serde_json::json!({ "texts": documents }))
}

fn load_document(store: &SqliteStore, document_id: &str) -> Result<Document> {
    store.get_document(document_id)?.ok_or_else(|| anyhow!("unknown text: {document_id}"))
}

fn run_export(args: &ExportArgs, store: &mut SqliteStore) -> Result<()> {
    store.migrate()?;
    let documents = if args.all {
        store.list_documents()?
    } else {
        args.texts
            .iter()
            .map(|document_id| load_document(store, document_id))
            .collect::<Result<Vec<_>>>()?
    };

    tracing::info!(texts = documents.len(), dry_run = args.dry_run, "starting export");
    let bodies = FsBodyCache::new(&args.cache);
    let options = ExportOptions { max_depth: args.max_depth, ..ExportOptions::default() };
    let mut git = GitSink::default();
    let mut memory = MemorySink::over_disk();
    let sink: &mut dyn VersionedSink = if args.dry_run {
        &mut memory
    } else {
        DocumentLayout::create_category_dirs(&args.out)?;
        &mut git
    };

    let mut reports: Vec<ExportReport> = Vec::with_capacity(documents.len());
    let mut exporter = Exporter::new(&*store, &bodies, sink, options);
    for document in &documents {
        let report = exporter
            .export(document, &args.out)
            .with_context(|| format!("export of {} aborted", document.id))?;
        reports.push(report);
    }

    emit_json(serde_json::json!({
        "dry_run": args.dry_run,
        "out_dir": args.out,
        "reports": reports
    }))
}

fn run_render(args: &RenderArgs, store: &mut SqliteStore) -> Result<()> {
    store.migrate()?;
    let at = parse_iso_date(&args.at).with_context(|| format!("invalid --at date: {}", args.at))?;
    let document = load_document(store, &args.text)?;
    let bodies = FsBodyCache::new(&args.cache);

    let Some((index, rendered)) =
        render_version_at(&*store, &bodies, &document, at, args.max_depth)?
    else {
        return Err(anyhow!("text {} has no version in force on {}", document.id, args.at));
    };

    emit_json(serde_json::json!({
        "document_id": rendered.document_id,
        "index": index,
        "window": rendered.window,
        "content": rendered.content
    }))
}
