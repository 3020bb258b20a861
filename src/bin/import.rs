use anyhow::Result;
use clap::Parser;
use citegraph::db::Session;
use citegraph::ingest::{import_file, import_folder, FolderImport, LoaderRegistry};
use citegraph::normalize::{normalize_staged, run_stage, ConceptPolicy, ImportReport, NormalizeOptions, Stage};
use citegraph::{staging, Config};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "import")]
#[command(about = "Import scraped batch files into the citegraph store (incremental by default)")]
struct Args {
    /// Batch files or folders; defaults to citegraph.batch_folder
    paths: Vec<PathBuf>,

    /// Store profile from config.toml
    #[arg(long)]
    store: Option<String>,

    /// Re-import files whose bytes are already in the import log
    #[arg(short, long)]
    force: bool,

    /// Normalize rows left in staging by an earlier incomplete run
    #[arg(long)]
    resume: bool,

    /// With --resume, run only this stage (entities, papers, supports, paper_concepts, citations)
    #[arg(long, requires = "resume")]
    stage: Option<Stage>,

    /// Override import.concept_policy (skip_first or all)
    #[arg(long)]
    concept_policy: Option<ConceptPolicy>,

    /// Print reports as JSON on stdout
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let args = Args::parse();
    let config = Config::load()?;
    let mut session = Session::open(&config, args.store.as_deref())?;

    let mut options = NormalizeOptions::from(&config.import);
    if let Some(policy) = args.concept_policy {
        options.concept_policy = policy;
    }

    let start = Instant::now();
    let reports = if args.resume {
        vec![resume(&mut session, &options, args.stage)?]
    } else {
        import_paths(&mut session, &config, &args.paths, &options, args.force)?
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            println!("{}", report.summary());
        }
    }

    let incomplete = reports.iter().filter(|r| !r.all_committed()).count();
    log::info!("=== Import Complete ===");
    log::info!("Batches imported: {} ({} incomplete)", reports.len(), incomplete);
    log::info!("Time: {:?}", start.elapsed());
    if incomplete > 0 {
        log::warn!("Some stages rolled back; staged rows were kept. Fix the cause and run with --resume.");
    }
    Ok(())
}

fn import_paths(
    session: &mut Session,
    config: &Config,
    paths: &[PathBuf],
    options: &NormalizeOptions,
    force: bool,
) -> Result<Vec<ImportReport>> {
    let registry = LoaderRegistry::new();
    let mut reports = Vec::new();
    if paths.is_empty() {
        log::info!("Importing batch folder {}", config.batch_folder().display());
        let folder = import_folder(session, &registry, config.batch_folder(), options, force)?;
        reports.extend(log_folder(folder));
        return Ok(reports);
    }

    for path in paths {
        if path.is_dir() {
            let folder = import_folder(session, &registry, path, options, force)?;
            reports.extend(log_folder(folder));
        } else if let Some(report) = import_file(session, &registry, path, options, force)? {
            reports.push(report);
        }
    }
    Ok(reports)
}

fn log_folder(folder: FolderImport) -> Vec<ImportReport> {
    log::info!(
        "Folder: {} imported, {} unchanged, {} failed",
        folder.reports.len(),
        folder.unchanged.len(),
        folder.failed.len()
    );
    for file in &folder.failed {
        log::warn!("  failed: {}", file.relative_path);
    }
    folder.reports
}

fn resume(session: &mut Session, options: &NormalizeOptions, only: Option<Stage>) -> Result<ImportReport> {
    let Some(stage) = only else {
        return Ok(normalize_staged(session, options)?);
    };

    let rows = staging::load_staged(&session.executor())?;
    log::info!("Re-running stage {} over {} staged row(s)", stage, rows.len());
    let mut report = ImportReport::new(staging::STAGING_TABLE, options.concept_policy);
    let started = Instant::now();
    // Failures are recorded in the report; staging is left in place either way.
    let _ = run_stage(session, stage, &rows, options, &mut report);
    report.elapsed_ms = started.elapsed().as_millis() as u64;
    Ok(report)
}
