//! Per-node centrality over a [`CitationGraph`].
//!
//! Results come back as one ordered map from node label to a record of every
//! requested metric, taken from a single pass over the graph's node order.
//! Column vectors for presentation are derived from that map, never computed
//! separately, so labels and values cannot drift apart.
//!
//! All measures treat the graph as directed and unweighted:
//! - in-degree centrality: `in_degree / (n - 1)`, 1.0 for every node when n <= 1;
//! - closeness: incoming distances with Wasserman-Faust scaling
//!   `(r - 1) / d * (r - 1) / (n - 1)`, where `r` counts the nodes that can
//!   reach the node (itself included) and `d` sums their distances;
//! - betweenness: Brandes, normalised by `1 / ((n - 1)(n - 2))` when n > 2.

use indexmap::IndexMap;
use petgraph::graph::NodeIndex;
use petgraph::Direction;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use super::CitationGraph;
use crate::error::{CitegraphError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Degree,
    InDegree,
    OutDegree,
    InDegreeCentrality,
    Closeness,
    Betweenness,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::Degree,
        Metric::InDegree,
        Metric::OutDegree,
        Metric::InDegreeCentrality,
        Metric::Closeness,
        Metric::Betweenness,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Metric::Degree => "degree",
            Metric::InDegree => "in_degree",
            Metric::OutDegree => "out_degree",
            Metric::InDegreeCentrality => "in_degree_centrality",
            Metric::Closeness => "closeness",
            Metric::Betweenness => "betweenness",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = CitegraphError;

    /// Accepts the canonical names plus the plural legacy column names.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().replace('-', "_").to_lowercase().as_str() {
            "degree" | "degrees" => Ok(Metric::Degree),
            "in_degree" | "in_degrees" => Ok(Metric::InDegree),
            "out_degree" | "out_degrees" => Ok(Metric::OutDegree),
            "in_degree_centrality" | "degree_centrality" | "degree_centralities" => {
                Ok(Metric::InDegreeCentrality)
            }
            "closeness" | "closeness_centrality" | "closeness_centralities" => Ok(Metric::Closeness),
            "betweenness" | "betweenness_centrality" | "betweenness_centralities" => {
                Ok(Metric::Betweenness)
            }
            other => Err(CitegraphError::InvalidInput(format!(
                "unknown metric {:?} (expected one of: degree, in_degree, out_degree, \
                 in_degree_centrality, closeness, betweenness)",
                other
            ))),
        }
    }
}

/// Parse a comma separated metric list, e.g. `in_degree,betweenness`.
pub fn parse_metric_list(list: &str) -> Result<Vec<Metric>> {
    let mut metrics = Vec::new();
    for part in list.split(',').filter(|p| !p.trim().is_empty()) {
        let metric = part.parse()?;
        if !metrics.contains(&metric) {
            metrics.push(metric);
        }
    }
    Ok(metrics)
}

/// Requested metrics for one node; unrequested ones stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degree: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_degree: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub out_degree: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_degree_centrality: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closeness: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub betweenness: Option<f64>,
}

impl MetricRecord {
    pub fn get(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Degree => self.degree.map(|v| v as f64),
            Metric::InDegree => self.in_degree.map(|v| v as f64),
            Metric::OutDegree => self.out_degree.map(|v| v as f64),
            Metric::InDegreeCentrality => self.in_degree_centrality,
            Metric::Closeness => self.closeness,
            Metric::Betweenness => self.betweenness,
        }
    }
}

/// Metrics keyed by node label, in the graph's node order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeMetrics {
    pub metrics: Vec<Metric>,
    pub nodes: IndexMap<String, MetricRecord>,
}

impl NodeMetrics {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<&MetricRecord> {
        self.nodes.get(label)
    }

    /// Metric name -> per-node values, in node order.
    pub fn columns(&self) -> IndexMap<&'static str, Vec<f64>> {
        self.metrics
            .iter()
            .map(|m| {
                let values = self
                    .nodes
                    .values()
                    .map(|record| record.get(*m).unwrap_or(0.0))
                    .collect();
                (m.name(), values)
            })
            .collect()
    }

    /// Nodes sorted by `metric`, highest first. Ties keep node order.
    pub fn ranked(&self, metric: Metric) -> Vec<(&str, f64)> {
        let mut ranked: Vec<(&str, f64)> = self
            .nodes
            .iter()
            .filter_map(|(label, record)| record.get(metric).map(|v| (label.as_str(), v)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }
}

/// Compute `metrics` for every node of `graph`. Betweenness, the expensive
/// one, runs only when asked for.
pub fn compute_metrics(graph: &CitationGraph, metrics: &[Metric]) -> NodeMetrics {
    let inner = graph.inner();
    let n = inner.node_count();
    let wants = |m: Metric| metrics.contains(&m);

    let in_degrees: Vec<usize> = inner
        .node_indices()
        .map(|i| inner.edges_directed(i, Direction::Incoming).count())
        .collect();
    let out_degrees: Vec<usize> = inner
        .node_indices()
        .map(|i| inner.edges_directed(i, Direction::Outgoing).count())
        .collect();

    let closeness = if wants(Metric::Closeness) {
        Some(closeness_centrality(&adjacency(graph, Direction::Incoming)))
    } else {
        None
    };
    let betweenness = if wants(Metric::Betweenness) {
        log::debug!("betweenness over {} node(s)", n);
        Some(betweenness_centrality(&adjacency(graph, Direction::Outgoing)))
    } else {
        None
    };

    let mut nodes = IndexMap::with_capacity(n);
    for (pos, idx) in inner.node_indices().enumerate() {
        let record = MetricRecord {
            degree: wants(Metric::Degree).then(|| in_degrees[pos] + out_degrees[pos]),
            in_degree: wants(Metric::InDegree).then(|| in_degrees[pos]),
            out_degree: wants(Metric::OutDegree).then(|| out_degrees[pos]),
            in_degree_centrality: wants(Metric::InDegreeCentrality)
                .then(|| in_degree_centrality(in_degrees[pos], n)),
            closeness: closeness.as_ref().map(|c| c[pos]),
            betweenness: betweenness.as_ref().map(|b| b[pos]),
        };
        nodes.insert(inner[idx].clone(), record);
    }

    NodeMetrics {
        metrics: metrics.to_vec(),
        nodes,
    }
}

fn in_degree_centrality(in_degree: usize, n: usize) -> f64 {
    if n <= 1 {
        1.0
    } else {
        in_degree as f64 / (n - 1) as f64
    }
}

/// Distinct neighbours per node position, self-loops dropped (they never lie
/// on a shortest path).
fn adjacency(graph: &CitationGraph, direction: Direction) -> Vec<Vec<usize>> {
    let inner = graph.inner();
    inner
        .node_indices()
        .map(|i| {
            let mut out: Vec<usize> = inner
                .neighbors_directed(i, direction)
                .filter(|j| *j != i)
                .map(NodeIndex::index)
                .collect();
            out.sort_unstable();
            out.dedup();
            out
        })
        .collect()
}

fn bfs_distances(adj: &[Vec<usize>], start: usize) -> Vec<Option<usize>> {
    let mut dist = vec![None; adj.len()];
    dist[start] = Some(0);
    let mut queue = VecDeque::from([start]);
    while let Some(v) = queue.pop_front() {
        let next = dist[v].unwrap_or(0) + 1;
        for &w in &adj[v] {
            if dist[w].is_none() {
                dist[w] = Some(next);
                queue.push_back(w);
            }
        }
    }
    dist
}

/// `incoming[u]` lists the predecessors of `u`.
fn closeness_centrality(incoming: &[Vec<usize>]) -> Vec<f64> {
    let n = incoming.len();
    (0..n)
        .map(|u| {
            let dist = bfs_distances(incoming, u);
            let reached = dist.iter().filter(|d| d.is_some()).count();
            let total: usize = dist.iter().flatten().sum();
            if total == 0 || n <= 1 {
                return 0.0;
            }
            let r = (reached - 1) as f64;
            (r / total as f64) * (r / (n - 1) as f64)
        })
        .collect()
}

/// Brandes' algorithm over unweighted directed shortest paths.
fn betweenness_centrality(outgoing: &[Vec<usize>]) -> Vec<f64> {
    let n = outgoing.len();
    let mut centrality = vec![0.0; n];

    for s in 0..n {
        let mut stack = Vec::with_capacity(n);
        let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut sigma = vec![0.0_f64; n];
        let mut dist: Vec<Option<usize>> = vec![None; n];
        sigma[s] = 1.0;
        dist[s] = Some(0);

        let mut queue = VecDeque::from([s]);
        while let Some(v) = queue.pop_front() {
            stack.push(v);
            let dv = dist[v].unwrap_or(0);
            for &w in &outgoing[v] {
                if dist[w].is_none() {
                    dist[w] = Some(dv + 1);
                    queue.push_back(w);
                }
                if dist[w] == Some(dv + 1) {
                    sigma[w] += sigma[v];
                    preds[w].push(v);
                }
            }
        }

        let mut delta = vec![0.0_f64; n];
        while let Some(w) = stack.pop() {
            for &v in &preds[w] {
                delta[v] += sigma[v] / sigma[w] * (1.0 + delta[w]);
            }
            if w != s {
                centrality[w] += delta[w];
            }
        }
    }

    if n > 2 {
        let scale = 1.0 / ((n - 1) * (n - 2)) as f64;
        for value in &mut centrality {
            *value *= scale;
        }
    }
    centrality
}
