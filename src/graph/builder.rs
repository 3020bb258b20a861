use indexmap::IndexMap;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::Serialize;

use super::edges::{fetch_edges, EdgeResolution};
use crate::db::Session;
use crate::error::Result;

/// Directed, weighted citation graph.
///
/// One edge per distinct `(source, target)` pair, weighted by how often the
/// pair occurred in the input. Self-loops are kept. Nodes are added in
/// first-seen order and never removed, so node order is stable for the
/// lifetime of the graph and every per-node result follows it.
#[derive(Debug, Clone, Default)]
pub struct CitationGraph {
    graph: DiGraph<String, u32>,
    index: IndexMap<String, NodeIndex>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EdgeExport {
    pub source: String,
    pub target: String,
    pub weight: u32,
}

/// Serializable snapshot for rendering collaborators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphExport {
    pub nodes: Vec<String>,
    pub edges: Vec<EdgeExport>,
}

impl CitationGraph {
    pub fn from_edges<I, S>(edges: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let mut graph = CitationGraph::default();
        let mut weights: IndexMap<(NodeIndex, NodeIndex), u32> = IndexMap::new();

        for (source, target) in edges {
            let s = graph.node(source.into());
            let t = graph.node(target.into());
            *weights.entry((s, t)).or_insert(0) += 1;
        }

        for ((s, t), weight) in weights {
            graph.graph.add_edge(s, t, weight);
        }
        graph
    }

    /// Build from the normalized store.
    pub fn load(session: &Session, resolution: EdgeResolution) -> Result<Self> {
        let edges = fetch_edges(&session.executor(), resolution)?;
        let graph = Self::from_edges(edges);
        log::info!(
            "{} citation graph: {} node(s), {} edge(s)",
            resolution,
            graph.node_count(),
            graph.edge_count()
        );
        Ok(graph)
    }

    fn node(&mut self, label: String) -> NodeIndex {
        if let Some(idx) = self.index.get(&label) {
            return *idx;
        }
        let idx = self.graph.add_node(label.clone());
        self.index.insert(label, idx);
        idx
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn inner(&self) -> &DiGraph<String, u32> {
        &self.graph
    }

    /// Node labels in node order.
    pub fn labels(&self) -> impl Iterator<Item = &str> + '_ {
        self.graph.node_indices().map(move |i| self.graph[i].as_str())
    }

    pub fn index_of(&self, label: &str) -> Option<NodeIndex> {
        self.index.get(label).copied()
    }

    pub fn weight(&self, source: &str, target: &str) -> Option<u32> {
        let s = self.index_of(source)?;
        let t = self.index_of(target)?;
        self.graph.find_edge(s, t).map(|e| self.graph[e])
    }

    pub fn in_degree(&self, label: &str) -> Option<usize> {
        self.index_of(label)
            .map(|i| self.graph.edges_directed(i, Direction::Incoming).count())
    }

    pub fn out_degree(&self, label: &str) -> Option<usize> {
        self.index_of(label)
            .map(|i| self.graph.edges_directed(i, Direction::Outgoing).count())
    }

    /// In plus out; a self-loop counts once each way.
    pub fn degree(&self, label: &str) -> Option<usize> {
        Some(self.in_degree(label)? + self.out_degree(label)?)
    }

    pub fn export(&self) -> GraphExport {
        GraphExport {
            nodes: self.labels().map(str::to_string).collect(),
            edges: self
                .graph
                .edge_references()
                .map(|e| EdgeExport {
                    source: self.graph[e.source()].clone(),
                    target: self.graph[e.target()].clone(),
                    weight: *e.weight(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_pairs_become_weight() {
        let edges = vec![
            ("x", "y"),
            ("x", "y"),
            ("y", "z"),
            ("x", "y"),
        ];
        let graph = CitationGraph::from_edges(edges);
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.weight("x", "y"), Some(3));
        assert_eq!(graph.weight("y", "z"), Some(1));
        assert_eq!(graph.weight("y", "x"), None);
    }

    #[test]
    fn test_self_loops_preserved() {
        let graph = CitationGraph::from_edges(vec![("a", "a"), ("a", "a"), ("a", "b")]);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.weight("a", "a"), Some(2));
        assert_eq!(graph.in_degree("a"), Some(1));
        assert_eq!(graph.out_degree("a"), Some(2));
        assert_eq!(graph.degree("a"), Some(3));
    }

    #[test]
    fn test_node_order_is_first_seen() {
        let graph = CitationGraph::from_edges(vec![("c", "a"), ("b", "c"), ("a", "d")]);
        let labels: Vec<&str> = graph.labels().collect();
        assert_eq!(labels, vec!["c", "a", "b", "d"]);
        assert_eq!(graph.export().nodes, vec!["c", "a", "b", "d"]);
    }

    #[test]
    fn test_export() {
        let graph = CitationGraph::from_edges(vec![
            ("p".to_string(), "q".to_string()),
            ("p".to_string(), "q".to_string()),
        ]);
        let export = graph.export();
        assert_eq!(
            export.edges,
            vec![EdgeExport {
                source: "p".to_string(),
                target: "q".to_string(),
                weight: 2
            }]
        );
        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["edges"][0]["weight"], 2);
    }

    #[test]
    fn test_empty_graph() {
        let graph = CitationGraph::from_edges(Vec::<(String, String)>::new());
        assert!(graph.is_empty());
        assert_eq!(graph.in_degree("nobody"), None);
    }
}
