use anyhow::Result;
use clap::Parser;
use citegraph::db::Session;
use citegraph::graph::{compute_layout, compute_metrics, parse_metric_list, CitationGraph, EdgeResolution, LayoutKind, Metric};
use citegraph::Config;

#[derive(Parser, Debug)]
#[command(name = "graph")]
#[command(about = "Build a citation graph and print per-node metrics")]
struct Args {
    /// Edge resolution: external-id, paper-title or author
    #[arg(default_value = "paper-title")]
    resolution: EdgeResolution,

    /// Store profile from config.toml
    #[arg(long)]
    store: Option<String>,

    /// Comma separated metrics; defaults to graph.default_metrics
    #[arg(short, long)]
    metrics: Option<String>,

    /// Rank nodes by this metric (highest first)
    #[arg(short, long)]
    sort: Option<Metric>,

    /// Show only the first N nodes
    #[arg(short = 'n', long)]
    top: Option<usize>,

    /// Emit layout coordinates (circular, shell, random, spring) as JSON
    #[arg(long)]
    layout: Option<String>,

    /// Emit the node and weighted edge lists as JSON
    #[arg(long)]
    export: bool,

    /// Print metrics as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "warn")).init();

    let args = Args::parse();
    let config = Config::load()?;
    let session = Session::open(&config, args.store.as_deref())?;
    let graph = CitationGraph::load(&session, args.resolution)?;

    if args.export {
        println!("{}", serde_json::to_string_pretty(&graph.export())?);
        return Ok(());
    }

    if let Some(name) = &args.layout {
        let kind = LayoutKind::parse(name, config.graph.layout_iterations, config.graph.layout_seed)?;
        println!("{}", serde_json::to_string_pretty(&compute_layout(&graph, kind))?);
        return Ok(());
    }

    let mut metrics = match &args.metrics {
        Some(list) => parse_metric_list(list)?,
        None => config.graph.metrics()?,
    };
    if let Some(sort) = args.sort {
        if !metrics.contains(&sort) {
            metrics.push(sort);
        }
    }

    let result = compute_metrics(&graph, &metrics);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!(
        "{} graph: {} node(s), {} edge(s)",
        args.resolution,
        graph.node_count(),
        graph.edge_count()
    );

    let mut order: Vec<&str> = match args.sort {
        Some(sort) => result.ranked(sort).into_iter().map(|(label, _)| label).collect(),
        None => result.nodes.keys().map(String::as_str).collect(),
    };
    if let Some(top) = args.top {
        order.truncate(top);
    }

    let width = order.iter().map(|l| l.chars().count()).max().unwrap_or(4).max(4);
    let header: Vec<String> = metrics.iter().map(|m| format!("{:>22}", m.name())).collect();
    println!("{:<width$}{}", "node", header.join(""), width = width);
    for label in order {
        let Some(record) = result.get(label) else { continue };
        let cells: Vec<String> = metrics
            .iter()
            .map(|m| match m {
                Metric::Degree | Metric::InDegree | Metric::OutDegree => {
                    format!("{:>22}", record.get(*m).unwrap_or(0.0) as u64)
                }
                _ => format!("{:>22.6}", record.get(*m).unwrap_or(0.0)),
            })
            .collect();
        println!("{:<width$}{}", label, cells.join(""), width = width);
    }
    Ok(())
}
