use anyhow::Result;
use clap::Parser;
use citegraph::db::Session;
use citegraph::tables::{fetch_listing, Listing};
use citegraph::Config;

#[derive(Parser, Debug)]
#[command(name = "tables")]
#[command(about = "Print a citegraph listing (entity, relationship or citation table)")]
struct Args {
    /// Listing name, e.g. papers, supports-resolved, citations-by-author.
    /// Omit to list the available names.
    listing: Option<Listing>,

    /// Store profile from config.toml
    #[arg(long)]
    store: Option<String>,

    /// Print JSON instead of a text table
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "warn")).init();

    let args = Args::parse();
    let Some(listing) = args.listing else {
        for listing in Listing::ALL {
            println!("{:<26} {}", listing.name(), listing.columns().join(", "));
        }
        return Ok(());
    };

    let config = Config::load()?;
    let session = Session::open(&config, args.store.as_deref())?;
    let table = fetch_listing(&session.executor(), listing)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&table)?);
    } else {
        println!("{}", table.to_text());
    }
    Ok(())
}
