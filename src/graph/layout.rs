use indexmap::IndexMap;
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::f64::consts::TAU;
use std::fmt;

use super::CitationGraph;
use crate::error::{CitegraphError, Result};

/// Cosmetic 2-D placement strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayoutKind {
    Circular,
    /// Concentric shells, highest in-degree innermost.
    Shell,
    Random { seed: u64 },
    /// Fruchterman-Reingold force-directed placement.
    Spring { iterations: usize, seed: u64 },
}

impl LayoutKind {
    /// Parse a layout name; `iterations` and `seed` apply to the kinds that use them.
    pub fn parse(name: &str, iterations: usize, seed: u64) -> Result<Self> {
        match name.trim().replace('-', "_").to_lowercase().as_str() {
            "circular" | "circle" => Ok(LayoutKind::Circular),
            "shell" => Ok(LayoutKind::Shell),
            "random" => Ok(LayoutKind::Random { seed }),
            "spring" | "fruchterman_reingold" => {
                if iterations == 0 {
                    return Err(CitegraphError::InvalidInput(
                        "spring layout needs at least one iteration".to_string(),
                    ));
                }
                Ok(LayoutKind::Spring { iterations, seed })
            }
            other => Err(CitegraphError::InvalidInput(format!(
                "unknown layout {:?} (expected circular, shell, random or spring)",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LayoutKind::Circular => "circular",
            LayoutKind::Shell => "shell",
            LayoutKind::Random { .. } => "random",
            LayoutKind::Spring { .. } => "spring",
        }
    }
}

impl fmt::Display for LayoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Coordinates keyed by node label, in node order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Layout {
    pub layout: LayoutKind,
    pub positions: IndexMap<String, [f64; 2]>,
}

impl Layout {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<[f64; 2]> {
        self.positions.get(label).copied()
    }
}

pub fn compute_layout(graph: &CitationGraph, kind: LayoutKind) -> Layout {
    let points = match kind {
        LayoutKind::Circular => circular(graph.node_count()),
        LayoutKind::Shell => shell(graph),
        LayoutKind::Random { seed } => random(graph.node_count(), seed),
        LayoutKind::Spring { iterations, seed } => spring(graph, iterations, seed),
    };

    Layout {
        layout: kind,
        positions: graph.labels().map(str::to_string).zip(points).collect(),
    }
}

fn ring(count: usize, radius: f64, offset: f64) -> impl Iterator<Item = [f64; 2]> {
    (0..count).map(move |i| {
        let theta = offset + TAU * i as f64 / count as f64;
        [radius * theta.cos(), radius * theta.sin()]
    })
}

fn circular(n: usize) -> Vec<[f64; 2]> {
    if n == 1 {
        return vec![[0.0, 0.0]];
    }
    ring(n, 1.0, 0.0).collect()
}

fn shell(graph: &CitationGraph) -> Vec<[f64; 2]> {
    let inner = graph.inner();
    let n = inner.node_count();
    if n == 0 {
        return Vec::new();
    }

    let in_degrees: Vec<usize> = inner
        .node_indices()
        .map(|i| inner.edges_directed(i, Direction::Incoming).count())
        .collect();
    let mut levels = in_degrees.clone();
    levels.sort_unstable_by(|a, b| b.cmp(a));
    levels.dedup();

    let shells: Vec<Vec<usize>> = levels
        .iter()
        .map(|level| (0..n).filter(|pos| in_degrees[*pos] == *level).collect())
        .collect();

    let bump = 1.0 / shells.len() as f64;
    let mut radius = if shells[0].len() == 1 { 0.0 } else { bump };
    let mut points = vec![[0.0, 0.0]; n];
    for (depth, members) in shells.iter().enumerate() {
        // Stagger neighbouring shells so spokes do not line up.
        let offset = depth as f64 * std::f64::consts::PI / shells.len() as f64;
        for (pos, point) in members.iter().zip(ring(members.len(), radius, offset)) {
            points[*pos] = point;
        }
        radius += bump;
    }
    points
}

fn random(n: usize, seed: u64) -> Vec<[f64; 2]> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| [rng.gen::<f64>(), rng.gen::<f64>()]).collect()
}

fn spring(graph: &CitationGraph, iterations: usize, seed: u64) -> Vec<[f64; 2]> {
    let inner = graph.inner();
    let n = inner.node_count();
    match n {
        0 => return Vec::new(),
        1 => return vec![[0.0, 0.0]],
        _ => {}
    }

    // Symmetric attraction; parallel directions add up, self-loops pull nothing.
    let mut neighbours: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
    for edge in inner.edge_references() {
        let (s, t) = (edge.source().index(), edge.target().index());
        if s != t {
            let w = f64::from(*edge.weight());
            neighbours[s].push((t, w));
            neighbours[t].push((s, w));
        }
    }

    let mut pos = random(n, seed);
    let k = (1.0 / n as f64).sqrt();
    let mut temperature = 0.1;
    let cooling = temperature / (iterations as f64 + 1.0);
    let delta = |pos: &[[f64; 2]], i: usize, j: usize| {
        let dx = pos[i][0] - pos[j][0];
        let dy = pos[i][1] - pos[j][1];
        (dx, dy, (dx * dx + dy * dy).sqrt().max(0.01))
    };

    for _ in 0..iterations {
        let mut disp = vec![[0.0_f64; 2]; n];
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                let (dx, dy, dist) = delta(&pos, i, j);
                let force = k * k / (dist * dist);
                disp[i][0] += dx * force;
                disp[i][1] += dy * force;
            }
            for &(j, w) in &neighbours[i] {
                let (dx, dy, dist) = delta(&pos, i, j);
                let force = w * dist / k;
                disp[i][0] -= dx * force;
                disp[i][1] -= dy * force;
            }
        }
        for i in 0..n {
            let length = (disp[i][0] * disp[i][0] + disp[i][1] * disp[i][1])
                .sqrt()
                .max(0.01);
            pos[i][0] += disp[i][0] * temperature / length;
            pos[i][1] += disp[i][1] * temperature / length;
        }
        temperature -= cooling;
    }

    rescale(&mut pos);
    pos
}

/// Centre on the origin and scale so the largest coordinate magnitude is 1.
fn rescale(points: &mut [[f64; 2]]) {
    if points.is_empty() {
        return;
    }
    let count = points.len() as f64;
    let mean_x = points.iter().map(|p| p[0]).sum::<f64>() / count;
    let mean_y = points.iter().map(|p| p[1]).sum::<f64>() / count;
    let mut extent: f64 = 0.0;
    for p in points.iter_mut() {
        p[0] -= mean_x;
        p[1] -= mean_y;
        extent = extent.max(p[0].abs()).max(p[1].abs());
    }
    if extent > 0.0 {
        for p in points.iter_mut() {
            p[0] /= extent;
            p[1] /= extent;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CitationGraph {
        CitationGraph::from_edges(vec![
            ("a", "b"),
            ("a", "c"),
            ("b", "c"),
            ("d", "c"),
            ("c", "e"),
            ("e", "e"),
        ])
    }

    fn in_unit_box(layout: &Layout) -> bool {
        layout
            .positions
            .values()
            .all(|p| p.iter().all(|v| v.is_finite() && v.abs() <= 1.0 + 1e-9))
    }

    #[test]
    fn test_parse() {
        assert_eq!(LayoutKind::parse("circular", 10, 1).unwrap(), LayoutKind::Circular);
        assert_eq!(
            LayoutKind::parse("fruchterman-reingold", 25, 7).unwrap(),
            LayoutKind::Spring { iterations: 25, seed: 7 }
        );
        assert_eq!(LayoutKind::parse("random", 0, 3).unwrap(), LayoutKind::Random { seed: 3 });
        assert!(LayoutKind::parse("spring", 0, 3).is_err());
        let err = LayoutKind::parse("planar", 10, 1).unwrap_err();
        assert!(err.to_string().contains("planar"));
    }

    #[test]
    fn test_positions_follow_node_order() {
        let graph = sample();
        for kind in [
            LayoutKind::Circular,
            LayoutKind::Shell,
            LayoutKind::Random { seed: 5 },
            LayoutKind::Spring { iterations: 30, seed: 5 },
        ] {
            let layout = compute_layout(&graph, kind);
            let keys: Vec<&str> = layout.positions.keys().map(String::as_str).collect();
            let labels: Vec<&str> = graph.labels().collect();
            assert_eq!(keys, labels, "{}", kind);
            assert!(in_unit_box(&layout), "{}", kind);
        }
    }

    #[test]
    fn test_circular_on_unit_circle() {
        let layout = compute_layout(&sample(), LayoutKind::Circular);
        for p in layout.positions.values() {
            assert!(((p[0] * p[0] + p[1] * p[1]).sqrt() - 1.0).abs() < 1e-9);
        }
        let first = layout.get("a").unwrap();
        assert!((first[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_shell_puts_most_cited_in_centre() {
        // c is cited three times, more than anyone else.
        let layout = compute_layout(&sample(), LayoutKind::Shell);
        assert_eq!(layout.get("c").unwrap(), [0.0, 0.0]);
        let radius = |label: &str| {
            let p = layout.get(label).unwrap();
            (p[0] * p[0] + p[1] * p[1]).sqrt()
        };
        assert!(radius("a") > radius("b"));
    }

    #[test]
    fn test_seeded_layouts_are_reproducible() {
        let graph = sample();
        let kind = LayoutKind::Spring { iterations: 40, seed: 42 };
        assert_eq!(compute_layout(&graph, kind), compute_layout(&graph, kind));

        let r1 = compute_layout(&graph, LayoutKind::Random { seed: 1 });
        let r2 = compute_layout(&graph, LayoutKind::Random { seed: 2 });
        assert_ne!(r1, r2);
    }

    #[test]
    fn test_spring_reaches_extent() {
        let layout = compute_layout(&sample(), LayoutKind::Spring { iterations: 50, seed: 9 });
        let extent = layout
            .positions
            .values()
            .flat_map(|p| p.iter().map(|v| v.abs()))
            .fold(0.0_f64, f64::max);
        assert!((extent - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_graphs() {
        let empty = compute_layout(&CitationGraph::default(), LayoutKind::Spring { iterations: 5, seed: 1 });
        assert!(empty.is_empty());

        let single = CitationGraph::from_edges(vec![("x", "x")]);
        for kind in [LayoutKind::Circular, LayoutKind::Shell, LayoutKind::Spring { iterations: 5, seed: 1 }] {
            assert_eq!(compute_layout(&single, kind).get("x"), Some([0.0, 0.0]));
        }
    }

    #[test]
    fn test_spring_pull_is_symmetric_and_weighted() {
        let both_ways = CitationGraph::from_edges(vec![("a", "b"), ("b", "a"), ("b", "c")]);
        let twice = CitationGraph::from_edges(vec![("a", "b"), ("a", "b"), ("b", "c")]);
        let kind = LayoutKind::Spring { iterations: 30, seed: 11 };
        let left = compute_layout(&both_ways, kind);
        let right = compute_layout(&twice, kind);
        for (label, p) in &left.positions {
            let q = right.get(label).unwrap();
            assert!((p[0] - q[0]).abs() < 1e-9 && (p[1] - q[1]).abs() < 1e-9, "{}", label);
        }
    }

    #[test]
    fn test_spring_on_large_sparse_graph() {
        let labels: Vec<String> = (0..3000).map(|i| format!("W{}", i)).collect();
        let edges: Vec<(&str, &str)> = labels
            .windows(2)
            .map(|pair| (pair[0].as_str(), pair[1].as_str()))
            .collect();
        let graph = CitationGraph::from_edges(edges);
        let layout = compute_layout(&graph, LayoutKind::Spring { iterations: 1, seed: 3 });
        assert_eq!(layout.len(), 3000);
        assert!(in_unit_box(&layout));
    }
}
