use anyhow::Result;
use citegraph::db::{migrate, reset_schema, Session};
use citegraph::staging;
use citegraph::Config;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "citegraph")]
#[command(version, about = "Bibliographic normalization store and citation graph API")]
struct Args {
    /// Store profile from config.toml (defaults to citegraph.default_store)
    #[arg(long, global = true)]
    store: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply migrations and verify the schema (default)
    Verify,
    /// Drop every citegraph table and rebuild the schema
    Reset {
        /// Required; the reset is destructive
        #[arg(long)]
        yes: bool,
    },
    /// Serve the read-only HTTP API
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger from environment variable or default to info level
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let args = Args::parse();
    let config = Config::load()?;
    log::info!("Starting citegraph v{}", env!("CARGO_PKG_VERSION"));

    match args.command.unwrap_or(Command::Verify) {
        Command::Verify => run_schema_verification(&config, args.store.as_deref())?,
        Command::Reset { yes } => {
            if !yes {
                anyhow::bail!("reset drops every citegraph table; re-run with --yes");
            }
            let mut session = Session::open(&config, args.store.as_deref())?;
            reset_schema(&mut session, config.migrations_dir())?;
            log::info!("Schema rebuilt on {}", session.store().db_path.display());
        }
        Command::Serve => {
            let session = Session::open(&config, args.store.as_deref())?;
            citegraph::http::serve(&config, session).await?;
        }
    }

    Ok(())
}

/// Run migrations, then verify that all expected database objects exist
fn run_schema_verification(config: &Config, store: Option<&str>) -> Result<()> {
    let session = Session::open(config, store)?;
    log::info!("Database path: {}", session.store().db_path.display());
    let conn = session.executor().conn();

    let missing = migrate::missing_tables(conn)?;
    if !missing.is_empty() {
        anyhow::bail!("Missing table(s): {}", missing.join(", "));
    }
    log::debug!("✓ All tables exist");

    let applied = migrate::applied_migrations(conn)?;
    log::debug!("✓ {} migrations applied", applied.len());
    if let Some(latest) = applied.last() {
        log::info!("✓ Schema version {} ({})", latest.version, latest.name);
    }

    let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%' ORDER BY name")?;
    let indexes: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
    for index_name in ["idx_papers_external_id", "idx_papers_author", "idx_citations_target"] {
        if indexes.iter().any(|i| i == index_name) {
            log::debug!("✓ Index exists: {}", index_name);
        } else {
            log::warn!("Index not found: {}", index_name);
        }
    }

    let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if journal_mode.to_uppercase() != "WAL" {
        anyhow::bail!("Journal mode is not WAL: {}", journal_mode);
    }

    let foreign_keys: i32 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
    if foreign_keys != 1 {
        anyhow::bail!("Foreign keys not enabled");
    }

    let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
    if integrity != "ok" {
        anyhow::bail!("Database integrity check failed: {}", integrity);
    }
    log::info!("✓ Database integrity: OK");

    let staged = staging::staged_count(&session.executor())?;
    if staged > 0 {
        log::warn!("{} staged row(s) left from an incomplete import; run `import --resume`", staged);
    }

    log::info!("✓ Database schema verification complete");
    Ok(())
}
