//! Citation graph: edge-list resolution, the weighted digraph built from it,
//! per-node centrality, and cosmetic layouts.
//!
//! The graph is a read-only view over the normalized store. Building it never
//! writes, and every per-node result is keyed by node label in the graph's
//! node order.

mod builder;
mod edges;
mod layout;
mod metrics;

pub use builder::{CitationGraph, EdgeExport, GraphExport};
pub use edges::{fetch_edges, EdgeResolution};
pub use layout::{compute_layout, Layout, LayoutKind};
pub use metrics::{compute_metrics, parse_metric_list, Metric, MetricRecord, NodeMetrics};
