//! Feedback loop detection
//!
//! Enumerates the elementary cycles of the routing graph and reports those
//! whose loop gain exceeds the effective threshold.
//!
//! Loop gain is the arithmetic sum of the edge gains in dB. That equals the
//! product of the linear gains for flat, frequency-independent edges and is
//! only an approximation once plugins shape the spectrum; no transfer
//! functions are composed here.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use parking_lot::RwLock;
use serde::Serialize;

use crate::config::FeedbackConfig;
use crate::error::{MixError, Result};
use crate::host::{NodeId, RoutingEdge, RoutingGraph};

/// How dangerous a loop is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackRisk {
    /// Above threshold but below unity gain
    Medium,
    /// Unity gain or more, self-sustaining
    High,
}

/// A routing cycle whose loop gain passed the threshold
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackLoop {
    /// Edges in traversal order; the last edge returns to the first source
    pub edges: Vec<(NodeId, NodeId)>,
    pub net_gain_db: f64,
    pub risk: FeedbackRisk,
}

impl FeedbackLoop {
    /// Nodes visited by the loop, starting at its first source
    pub fn nodes(&self) -> Vec<&NodeId> {
        self.edges.iter().map(|(source, _)| source).collect()
    }

    pub fn is_self_loop(&self) -> bool {
        self.edges.len() == 1
    }
}

/// Result of one feedback scan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackReport {
    /// Reported loops, loudest first
    pub loops: Vec<FeedbackLoop>,
    pub threshold_db: f64,
    pub sensitivity: f64,
    /// `threshold_db * sensitivity`
    pub effective_threshold_db: f64,
    pub cycles_examined: usize,
    pub edges_analyzed: usize,
    /// True when enumeration stopped at `max_cycles`
    pub truncated: bool,
    pub timestamp: DateTime<Utc>,
}

impl FeedbackReport {
    pub fn has_feedback(&self) -> bool {
        !self.loops.is_empty()
    }
}

/// Cycle search over the routing graph
pub struct FeedbackDetector {
    config: FeedbackConfig,
    /// Measured gains keyed by (source, destination); override the graph
    measured: RwLock<HashMap<(NodeId, NodeId), f64>>,
}

impl FeedbackDetector {
    pub fn new(config: FeedbackConfig) -> Self {
        Self {
            config,
            measured: RwLock::new(HashMap::new()),
        }
    }

    /// Record a live gain measurement for one connection
    pub fn set_measured_gain(&self, source: NodeId, destination: NodeId, gain_db: f64) {
        self.measured.write().insert((source, destination), gain_db);
    }

    pub fn clear_measured_gains(&self) {
        self.measured.write().clear();
    }

    /// Scan a routing graph
    ///
    /// `sensitivity` overrides the configured one for this scan only.
    pub fn scan(&self, graph: &dyn RoutingGraph, sensitivity: Option<f64>) -> Result<FeedbackReport> {
        self.detect(&graph.edges(), self.config.threshold_db, sensitivity)
    }

    /// Find loops in an explicit edge list
    pub fn detect(
        &self,
        edges: &[RoutingEdge],
        threshold_db: f64,
        sensitivity: Option<f64>,
    ) -> Result<FeedbackReport> {
        let sensitivity = sensitivity.unwrap_or(self.config.sensitivity);
        if !(0.0..=1.0).contains(&sensitivity) {
            return Err(MixError::InvalidSensitivity { sensitivity });
        }
        if !threshold_db.is_finite() {
            return Err(MixError::Config {
                reason: format!("feedback threshold {} must be finite", threshold_db),
            });
        }
        let effective_threshold_db = threshold_db * sensitivity;

        let graph = CycleGraph::build(edges, &self.measured.read());
        let search = graph.elementary_cycles(self.config.max_cycles);
        if search.truncated {
            warn!(
                "[FEEDBACK] cycle enumeration stopped at {} cycles",
                self.config.max_cycles
            );
        }

        let mut loops: Vec<FeedbackLoop> = search
            .cycles
            .iter()
            .filter_map(|cycle| {
                let net_gain_db: f64 = cycle.iter().map(|&(_, _, gain)| gain).sum();
                (net_gain_db > effective_threshold_db).then(|| FeedbackLoop {
                    edges: cycle
                        .iter()
                        .map(|&(from, to, _)| (graph.nodes[from].clone(), graph.nodes[to].clone()))
                        .collect(),
                    net_gain_db,
                    risk: if net_gain_db >= 0.0 {
                        FeedbackRisk::High
                    } else {
                        FeedbackRisk::Medium
                    },
                })
            })
            .collect();
        loops.sort_by(|a, b| b.net_gain_db.total_cmp(&a.net_gain_db));

        debug!(
            "[FEEDBACK] {} edges, {} cycles, {} above {:.1} dB",
            edges.len(),
            search.cycles.len(),
            loops.len(),
            effective_threshold_db
        );

        Ok(FeedbackReport {
            loops,
            threshold_db,
            sensitivity,
            effective_threshold_db,
            cycles_examined: search.cycles.len(),
            edges_analyzed: edges.len(),
            truncated: search.truncated,
            timestamp: Utc::now(),
        })
    }
}

// ============================================================================
// Cycle enumeration
// ============================================================================

/// (from, to, gain_db) using node indices
type IndexedEdge = (usize, usize, f64);

struct CycleSearch {
    cycles: Vec<Vec<IndexedEdge>>,
    truncated: bool,
}

/// Indexed adjacency with parallel edges collapsed to the loudest
struct CycleGraph {
    nodes: Vec<NodeId>,
    adjacency: Vec<Vec<(usize, f64)>>,
}

impl CycleGraph {
    fn build(edges: &[RoutingEdge], measured: &HashMap<(NodeId, NodeId), f64>) -> Self {
        let nodes: Vec<NodeId> = edges
            .iter()
            .flat_map(|e| [e.source.clone(), e.destination.clone()])
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let index: HashMap<&NodeId, usize> = nodes.iter().enumerate().map(|(i, n)| (n, i)).collect();

        let mut collapsed: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        for edge in edges {
            let gain = measured
                .get(&(edge.source.clone(), edge.destination.clone()))
                .copied()
                .unwrap_or(edge.gain_db);
            let key = (index[&edge.source], index[&edge.destination]);
            collapsed
                .entry(key)
                .and_modify(|g| *g = g.max(gain))
                .or_insert(gain);
        }

        let mut adjacency = vec![Vec::new(); nodes.len()];
        for ((from, to), gain) in collapsed {
            adjacency[from].push((to, gain));
        }

        Self { nodes, adjacency }
    }

    /// Every elementary cycle, each listed once from its smallest node
    ///
    /// Johnson's algorithm: repeatedly take the strongly connected component
    /// holding the smallest remaining node and search it from that node with
    /// blocking sets. Acyclic graphs stop after a single component pass.
    fn elementary_cycles(&self, limit: usize) -> CycleSearch {
        let mut search = CycleSearch {
            cycles: Vec::new(),
            truncated: false,
        };
        let n = self.nodes.len();
        let mut floor = 0;

        while floor < n && !search.truncated {
            let Some(component) = self
                .components_from(floor)
                .into_iter()
                .filter(|c| self.is_cyclic(c))
                .min_by_key(|c| c.iter().copied().min().unwrap_or(usize::MAX))
            else {
                break;
            };
            let Some(start) = component.iter().copied().min() else {
                break;
            };

            let mut blocks = BlockingSets::new(n, &component);
            self.circuit(start, start, &mut blocks, &mut search, limit);
            floor = start + 1;
        }
        search
    }

    fn is_cyclic(&self, component: &[usize]) -> bool {
        match component {
            [single] => self.adjacency[*single].iter().any(|&(to, _)| to == *single),
            _ => !component.is_empty(),
        }
    }

    /// Strongly connected components of the subgraph of nodes `>= floor`
    fn components_from(&self, floor: usize) -> Vec<Vec<usize>> {
        let mut tarjan = Tarjan::new(self, floor);
        for node in floor..self.nodes.len() {
            if tarjan.index[node].is_none() {
                tarjan.connect(node);
            }
        }
        tarjan.components
    }

    /// Search for cycles through `start` that continue from `current`
    fn circuit(
        &self,
        current: usize,
        start: usize,
        blocks: &mut BlockingSets,
        search: &mut CycleSearch,
        limit: usize,
    ) -> bool {
        let mut found = false;
        blocks.blocked[current] = true;

        for &(next, gain) in &self.adjacency[current] {
            if search.truncated {
                break;
            }
            if !blocks.member[next] {
                continue;
            }
            if next == start {
                if search.cycles.len() >= limit {
                    search.truncated = true;
                    break;
                }
                let mut cycle = blocks.path.clone();
                cycle.push((current, next, gain));
                search.cycles.push(cycle);
                found = true;
            } else if !blocks.blocked[next] {
                blocks.path.push((current, next, gain));
                if self.circuit(next, start, blocks, search, limit) {
                    found = true;
                }
                blocks.path.pop();
            }
        }

        if found {
            blocks.unblock(current);
        } else {
            for &(next, _) in &self.adjacency[current] {
                if blocks.member[next] && !blocks.waiting[next].contains(&current) {
                    blocks.waiting[next].push(current);
                }
            }
        }
        found
    }
}

/// Johnson search state for one component
struct BlockingSets {
    member: Vec<bool>,
    blocked: Vec<bool>,
    /// Nodes to unblock once the keyed node is unblocked
    waiting: Vec<Vec<usize>>,
    path: Vec<IndexedEdge>,
}

impl BlockingSets {
    fn new(n: usize, component: &[usize]) -> Self {
        let mut member = vec![false; n];
        for &node in component {
            member[node] = true;
        }
        Self {
            member,
            blocked: vec![false; n],
            waiting: vec![Vec::new(); n],
            path: Vec::new(),
        }
    }

    fn unblock(&mut self, node: usize) {
        self.blocked[node] = false;
        for next in std::mem::take(&mut self.waiting[node]) {
            if self.blocked[next] {
                self.unblock(next);
            }
        }
    }
}

/// Tarjan's strongly connected components, ignoring nodes below `floor`
struct Tarjan<'a> {
    graph: &'a CycleGraph,
    floor: usize,
    index: Vec<Option<usize>>,
    low: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    next_index: usize,
    components: Vec<Vec<usize>>,
}

impl<'a> Tarjan<'a> {
    fn new(graph: &'a CycleGraph, floor: usize) -> Self {
        let n = graph.nodes.len();
        Self {
            graph,
            floor,
            index: vec![None; n],
            low: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            next_index: 0,
            components: Vec::new(),
        }
    }

    fn connect(&mut self, node: usize) {
        self.index[node] = Some(self.next_index);
        self.low[node] = self.next_index;
        self.next_index += 1;
        self.stack.push(node);
        self.on_stack[node] = true;

        let graph = self.graph;
        for &(next, _) in &graph.adjacency[node] {
            if next < self.floor {
                continue;
            }
            match self.index[next] {
                None => {
                    self.connect(next);
                    self.low[node] = self.low[node].min(self.low[next]);
                }
                Some(next_index) if self.on_stack[next] => {
                    self.low[node] = self.low[node].min(next_index);
                }
                Some(_) => {}
            }
        }

        if self.index[node] == Some(self.low[node]) {
            let mut component = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack[member] = false;
                component.push(member);
                if member == node {
                    break;
                }
            }
            self.components.push(component);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;

    fn a() -> NodeId {
        NodeId::Plugin(1)
    }
    fn b() -> NodeId {
        NodeId::Plugin(2)
    }
    fn c() -> NodeId {
        NodeId::Bus("fx".into())
    }

    fn detector() -> FeedbackDetector {
        FeedbackDetector::new(FeedbackConfig::default())
    }

    #[test]
    fn test_two_node_loop_sums_gains() {
        let edges = vec![RoutingEdge::new(a(), b(), -5.0), RoutingEdge::new(b(), a(), 3.0)];
        let report = detector().detect(&edges, -20.0, None).unwrap();

        assert_eq!(report.loops.len(), 1);
        let found = &report.loops[0];
        assert_relative_eq!(found.net_gain_db, -2.0);
        assert_eq!(found.edges, vec![(a(), b()), (b(), a())]);
        assert_eq!(found.risk, FeedbackRisk::Medium);
        assert_relative_eq!(report.effective_threshold_db, -16.0);
    }

    #[test]
    fn test_threshold_sign_convention() {
        let edges = vec![RoutingEdge::new(a(), b(), -15.0), RoutingEdge::new(b(), a(), -15.0)];
        // -30 dB loop is quieter than the -20 dB threshold
        assert!(!detector().detect(&edges, -20.0, Some(1.0)).unwrap().has_feedback());
        // but louder than a -40 dB threshold
        assert!(detector().detect(&edges, -40.0, Some(1.0)).unwrap().has_feedback());
    }

    #[test]
    fn test_sensitivity_lowers_threshold() {
        let edges = vec![RoutingEdge::new(a(), b(), -9.0), RoutingEdge::new(b(), a(), -9.0)];
        let det = detector();
        assert!(det.detect(&edges, -20.0, Some(1.0)).unwrap().has_feedback());
        assert!(!det.detect(&edges, -20.0, Some(0.5)).unwrap().has_feedback());
        assert!(matches!(
            det.detect(&edges, -20.0, Some(1.5)),
            Err(MixError::InvalidSensitivity { .. })
        ));
    }

    #[test]
    fn test_self_loop_detected() {
        let edges = vec![RoutingEdge::new(c(), c(), 2.0)];
        let report = detector().detect(&edges, -20.0, None).unwrap();
        assert_eq!(report.loops.len(), 1);
        assert!(report.loops[0].is_self_loop());
        assert_eq!(report.loops[0].risk, FeedbackRisk::High);
    }

    #[test]
    fn test_acyclic_graph_reports_nothing() {
        let edges = vec![RoutingEdge::new(a(), b(), 0.0), RoutingEdge::new(b(), c(), 0.0)];
        let report = detector().detect(&edges, -20.0, None).unwrap();
        assert!(report.loops.is_empty());
        assert_eq!(report.cycles_examined, 0);
        assert_eq!(report.edges_analyzed, 2);

        let empty = detector().detect(&[], -20.0, None).unwrap();
        assert!(empty.loops.is_empty());
    }

    #[test]
    fn test_each_cycle_found_once() {
        // triangle plus a chord back: a->b->c->a and a->b->a
        let edges = vec![
            RoutingEdge::new(a(), b(), 0.0),
            RoutingEdge::new(b(), c(), 0.0),
            RoutingEdge::new(c(), a(), 0.0),
            RoutingEdge::new(b(), a(), -1.0),
        ];
        let report = detector().detect(&edges, -20.0, None).unwrap();
        assert_eq!(report.cycles_examined, 2);
        assert_eq!(report.loops[0].edges.len(), 3);
        assert_relative_eq!(report.loops[1].net_gain_db, -1.0);
    }

    #[test]
    fn test_parallel_edges_use_loudest() {
        let edges = vec![
            RoutingEdge::new(a(), b(), -30.0),
            RoutingEdge::new(a(), b(), -6.0),
            RoutingEdge::new(b(), a(), 0.0),
        ];
        let report = detector().detect(&edges, -20.0, None).unwrap();
        assert_eq!(report.cycles_examined, 1);
        assert_relative_eq!(report.loops[0].net_gain_db, -6.0);
    }

    #[test]
    fn test_measured_gain_overrides_configured() {
        let edges = vec![RoutingEdge::new(a(), b(), -40.0), RoutingEdge::new(b(), a(), 0.0)];
        let det = detector();
        assert!(!det.detect(&edges, -20.0, None).unwrap().has_feedback());

        det.set_measured_gain(a(), b(), 1.0);
        let report = det.detect(&edges, -20.0, None).unwrap();
        assert_eq!(report.loops[0].risk, FeedbackRisk::High);
    }

    #[test]
    fn test_dense_acyclic_graph_is_cheap() {
        // every node feeds every later node: no cycles, exponentially many paths
        let mut edges = Vec::new();
        for from in 0..40 {
            for to in (from + 1)..40 {
                edges.push(RoutingEdge::new(NodeId::Plugin(from), NodeId::Plugin(to), 0.0));
            }
        }
        edges.push(RoutingEdge::new(b(), a(), -3.0));
        edges.push(RoutingEdge::new(c(), a(), -3.0));

        let started = std::time::Instant::now();
        let report = detector().detect(&edges, -20.0, None).unwrap();
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
        assert!(!report.truncated);
        // the only loop is plugin 1 -> plugin 2 -> plugin 1
        assert_eq!(report.cycles_examined, 1);
        assert_relative_eq!(report.loops[0].net_gain_db, -3.0);
    }

    #[test]
    fn test_complete_graph_cycle_count() {
        // a complete digraph on 4 nodes has 6 + 8 + 6 elementary cycles
        let mut edges = Vec::new();
        for from in 0..4 {
            for to in 0..4 {
                if from != to {
                    edges.push(RoutingEdge::new(NodeId::Plugin(from), NodeId::Plugin(to), -30.0));
                }
            }
        }
        let report = detector().detect(&edges, -20.0, None).unwrap();
        assert_eq!(report.cycles_examined, 20);
        assert!(!report.truncated);
    }

    #[test]
    fn test_cycle_limit_truncates() {
        let det = FeedbackDetector::new(FeedbackConfig {
            max_cycles: 2,
            ..FeedbackConfig::default()
        });
        let edges: Vec<RoutingEdge> = (0..5)
            .map(|i| RoutingEdge::new(NodeId::Plugin(i), NodeId::Plugin(i), 0.0))
            .collect();
        let report = det.detect(&edges, -20.0, None).unwrap();
        assert!(report.truncated);
        assert_eq!(report.cycles_examined, 2);
    }
}
