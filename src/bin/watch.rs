//! Watch the batch folder; import new or changed batch files automatically.

use anyhow::Result;
use clap::Parser;
use citegraph::db::Session;
use citegraph::normalize::NormalizeOptions;
use citegraph::watch::run_watcher;
use citegraph::Config;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "watch")]
#[command(about = "Watch the batch folder and import batch files as they arrive")]
struct Args {
    /// Folder to watch; defaults to citegraph.batch_folder
    folder: Option<PathBuf>,

    /// Store profile from config.toml
    #[arg(long)]
    store: Option<String>,

    /// Debounce delay in milliseconds; defaults to import.debounce_ms
    #[arg(long)]
    debounce_ms: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let args = Args::parse();

    log::info!("Starting citegraph batch watcher");
    let config = Config::load()?;
    let folder = args.folder.unwrap_or_else(|| config.batch_folder().to_path_buf());
    let debounce_ms = args.debounce_ms.unwrap_or(config.import.debounce_ms);

    let mut session = Session::open(&config, args.store.as_deref())?;
    let options = NormalizeOptions::from(&config.import);

    log::info!("Watching for batches (Ctrl+C to stop)");
    run_watcher(&mut session, &folder, &options, debounce_ms)?;
    Ok(())
}
