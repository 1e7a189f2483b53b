use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use kira_accession_store::app::{App, BatchResult};
use kira_accession_store::audit::{DebugCsvAudit, run_timestamp};
use kira_accession_store::config::{ConfigLoader, StoreConfig};
use kira_accession_store::domain::FetchBatch;
use kira_accession_store::error::KiraError;
use kira_accession_store::last_run::parse_date;
use kira_accession_store::output::JsonOutput;

#[derive(Parser)]
#[command(name = "kira-as")]
#[command(about = "Keeps the local accession stores of an incremental sequence fetch consistent")]
#[command(version, author)]
struct Cli {
    /// Path to kira-as.json (defaults to ./kira-as.json when present).
    #[arg(long, global = true)]
    config: Option<String>,

    /// Use the default store layout under this directory instead of a config file.
    #[arg(long, global = true, conflicts_with = "config")]
    root: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Persist fetch batches (JSON) into the stores and the run ledger")]
    Ingest(IngestArgs),
    #[command(about = "Print candidate accessions that are not yet processed")]
    Pending(PendingArgs),
    #[command(about = "Resolve the metadata table to one row per identifier")]
    Resolve,
    #[command(about = "Prune every store to an authoritative accession list")]
    Prune(PruneArgs),
    #[command(about = "Delete old ledger snapshots and debug files")]
    Cleanup,
    #[command(about = "Show or stamp the last run date")]
    LastRun(LastRunArgs),
}

#[derive(Args)]
struct IngestArgs {
    #[arg(required = true)]
    batches: Vec<PathBuf>,
}

#[derive(Args)]
struct PendingArgs {
    candidates: PathBuf,
}

#[derive(Args)]
struct PruneArgs {
    keep: PathBuf,
}

#[derive(Args)]
struct LastRunArgs {
    /// Stamp this date (YYYY-MM-DD).
    #[arg(long, conflicts_with = "today")]
    set: Option<String>,

    /// Stamp today's date.
    #[arg(long)]
    today: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::MissingConfig
        | KiraError::ConfigRead(_)
        | KiraError::ConfigParse(_)
        | KiraError::InvalidBatch(_)
        | KiraError::InvalidDate(_)
        | KiraError::MalformedAccession(_) => 2,
        KiraError::CorruptStore { .. } => 3,
        KiraError::StoreWrite { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = resolve_config(cli.config.as_deref(), cli.root)?;
    config.ensure_dirs()?;
    let app = App::new(config);

    match cli.command {
        Commands::Ingest(args) => run_ingest(&app, &args),
        Commands::Pending(args) => run_pending(&app, &args),
        Commands::Resolve => run_resolve(&app),
        Commands::Prune(args) => run_prune(&app, &args),
        Commands::Cleanup => print(&app.cleanup()?),
        Commands::LastRun(args) => run_last_run(&app, &args),
    }
}

fn resolve_config(path: Option<&str>, root: Option<String>) -> Result<StoreConfig, KiraError> {
    if let Some(root) = root {
        return Ok(StoreConfig::rooted_at(Utf8PathBuf::from(root)));
    }
    match ConfigLoader::resolve(path) {
        Err(KiraError::MissingConfig) => {
            tracing::info!("no kira-as.json found; using default layout in current directory");
            Ok(StoreConfig::rooted_at("."))
        }
        other => other,
    }
}

fn run_ingest(app: &App, args: &IngestArgs) -> miette::Result<()> {
    let audit = DebugCsvAudit::new(&app.config().debug_dir, "duplicates_debug", &run_timestamp());
    print(&ingest_all(app, &args.batches, audit)?)
}

fn ingest_all(
    app: &App,
    batches: &[PathBuf],
    audit: DebugCsvAudit,
) -> Result<Vec<BatchResult>, KiraError> {
    let ingested = ingest_batches(app, batches, &audit);
    // Rows dropped by batches persisted before a failure still belong in the dump.
    let dumped = audit.finish();
    let results = ingested?;
    dumped?;
    Ok(results)
}

fn ingest_batches(
    app: &App,
    batches: &[PathBuf],
    audit: &DebugCsvAudit,
) -> Result<Vec<BatchResult>, KiraError> {
    let mut results = Vec::with_capacity(batches.len());
    for (index, path) in batches.iter().enumerate() {
        let batch = read_batch(path)?;
        results.push(app.save_batch(&batch, audit)?);
        tracing::info!(batch = index + 1, "progress saved");
    }
    Ok(results)
}

fn run_pending(app: &App, args: &PendingArgs) -> miette::Result<()> {
    let candidates = read_accession_list(&args.candidates)?;
    let pending = app.pending(&candidates)?;
    JsonOutput::print_lines(&pending).into_diagnostic()
}

fn run_resolve(app: &App) -> miette::Result<()> {
    let audit = DebugCsvAudit::new(
        &app.config().debug_dir,
        "removed_metadata_rows",
        &run_timestamp(),
    );
    let result = app.post_process_metadata(&audit)?;
    audit.finish()?;
    print(&result)
}

fn run_prune(app: &App, args: &PruneArgs) -> miette::Result<()> {
    let keep = read_accession_list(&args.keep)?
        .into_iter()
        .collect::<BTreeSet<_>>();
    print(&app.prune(&keep)?)
}

fn run_last_run(app: &App, args: &LastRunArgs) -> miette::Result<()> {
    let date = match (&args.set, args.today) {
        (Some(value), _) => Some(app.stamp_run(Some(parse_date(value.trim())?))?),
        (None, true) => Some(app.stamp_run(None)?),
        (None, false) => app.last_run()?,
    };
    print(&date.map(|date| date.to_string()))
}

fn read_batch(path: &Path) -> Result<FetchBatch, KiraError> {
    let content = fs::read_to_string(path)
        .map_err(|err| KiraError::InvalidBatch(format!("{}: {err}", path.display())))?;
    serde_json::from_str(&content)
        .map_err(|err| KiraError::InvalidBatch(format!("{}: {err}", path.display())))
}

fn read_accession_list(path: &Path) -> Result<Vec<String>, KiraError> {
    let content = fs::read_to_string(path)
        .map_err(|err| KiraError::Filesystem(format!("read {}: {err}", path.display())))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

fn print<T: Serialize>(value: &T) -> miette::Result<()> {
    JsonOutput::print(value).into_diagnostic()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use kira_accession_store::domain::AccessionRow;
    use kira_accession_store::store::{MetadataTable, RecordStore};

    use super::*;

    #[test]
    fn failed_batch_still_writes_earlier_drops() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let config = StoreConfig::rooted_at(&root);
        config.ensure_dirs().unwrap();
        let app = App::new(config);

        let first = root.join("batch_1.json");
        fs::write(
            first.as_std_path(),
            r#"{ "accepted": ["A1.1", "A1.2"], "metadata": [] }"#,
        )
        .unwrap();
        let batches = vec![
            first.into_std_path_buf(),
            root.join("missing.json").into_std_path_buf(),
        ];
        let audit = DebugCsvAudit::new(&app.config().debug_dir, "duplicates_debug", "20240101-000000");
        let dump = audit.path().to_path_buf();

        let err = ingest_all(&app, &batches, audit).unwrap_err();

        assert_matches!(err, KiraError::InvalidBatch(_));
        let dumped = MetadataTable::new(dump).load().unwrap();
        assert_eq!(dumped.len(), 1);
        assert_eq!(dumped[0].accession(), "A1.1");
        assert_eq!(dumped[0].get("reason"), Some("update"));
    }
}
