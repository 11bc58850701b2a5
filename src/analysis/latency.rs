//! Latency estimation
//!
//! System latency is measured by sending a unit impulse around the host's
//! loopback path and finding where it arrives in the capture. Plugin
//! latency is what each plugin reports, summed along the active signal
//! path between the configured source and sink nodes.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;

use super::window::db_to_linear;
use crate::config::LatencyConfig;
use crate::error::{MixError, Result};
use crate::host::{NodeId, PluginHost, PluginId, RoutingGraph};

/// Node visits allowed when the routing between source and sink has cycles
const MAX_SEARCH_STEPS: usize = 100_000;

/// Reported latency of one plugin on the active path
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginLatency {
    pub plugin_id: PluginId,
    pub latency_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyReport {
    pub system_latency_ms: f64,
    pub system_latency_samples: usize,
    /// Plugins on the active path with their reported latency
    pub plugins: Vec<PluginLatency>,
    /// Plugins on the active path whose latency could not be read
    pub unavailable: Vec<PluginId>,
    /// Nodes from source to sink; empty when no path exists or plugins
    /// were not measured
    pub active_path: Vec<NodeId>,
    pub plugin_latency_ms: f64,
    pub total_latency_ms: f64,
    pub sample_rate: u32,
    pub measured_plugins: bool,
    /// True when a cyclic routing graph exhausted the path search budget
    pub truncated: bool,
    pub timestamp: DateTime<Utc>,
}

pub struct LatencyEstimator {
    config: LatencyConfig,
}

impl LatencyEstimator {
    pub fn new(config: LatencyConfig) -> Self {
        Self { config }
    }

    /// Measure system latency and, optionally, plugin latency on the active path
    pub fn measure(
        &self,
        host: &dyn PluginHost,
        graph: &dyn RoutingGraph,
        measure_plugins: bool,
    ) -> Result<LatencyReport> {
        let sample_rate = host.sample_rate();
        if sample_rate == 0 {
            return Err(MixError::LatencyProbeFailed {
                reason: "host reports a sample rate of 0".to_string(),
            });
        }

        let system_latency_samples = self.probe_system(host)?;
        let system_latency_ms = system_latency_samples as f64 * 1000.0 / sample_rate as f64;

        let ActivePath {
            nodes: active_path,
            plugins,
            unavailable,
            truncated,
        } = if measure_plugins {
            self.active_path(host, graph)
        } else {
            ActivePath::default()
        };

        let plugin_latency_ms: f64 = plugins.iter().map(|p| p.latency_ms).sum();
        debug!(
            "[LATENCY] system {:.2} ms, plugins {:.2} ms over {} nodes",
            system_latency_ms,
            plugin_latency_ms,
            active_path.len()
        );

        Ok(LatencyReport {
            system_latency_ms,
            system_latency_samples,
            plugins,
            unavailable,
            active_path,
            plugin_latency_ms,
            total_latency_ms: system_latency_ms + plugin_latency_ms,
            sample_rate,
            measured_plugins: measure_plugins,
            truncated,
            timestamp: Utc::now(),
        })
    }

    /// Round-trip a unit impulse and return its arrival offset in samples
    fn probe_system(&self, host: &dyn PluginHost) -> Result<usize> {
        let impulse = [1.0_f32];
        let capture = host.round_trip(&impulse, self.config.probe_length)?;
        let threshold = db_to_linear(self.config.detection_threshold_db) as f32;

        detect_arrival(&capture, threshold).ok_or_else(|| MixError::LatencyProbeFailed {
            reason: format!(
                "impulse not detected within {} samples",
                self.config.probe_length
            ),
        })
    }

    /// The source-to-sink path with the largest summed plugin latency
    ///
    /// Acyclic routing is solved exactly in topological order. Cyclic
    /// routing falls back to a depth-first search capped at
    /// `MAX_SEARCH_STEPS` node visits.
    fn active_path(&self, host: &dyn PluginHost, graph: &dyn RoutingGraph) -> ActivePath {
        let mut paths = PathGraph::default();
        let source = paths.intern(&self.config.source);
        let sink = paths.intern(&self.config.sink);
        for edge in graph.edges() {
            let from = paths.intern(&edge.source);
            let to = paths.intern(&edge.destination);
            if !paths.adjacency[from].contains(&to) {
                paths.adjacency[from].push(to);
            }
        }

        let mut latencies: HashMap<PluginId, Option<f64>> = HashMap::new();
        let weight: Vec<f64> = paths
            .nodes
            .iter()
            .map(|node| {
                node.plugin_id()
                    .and_then(|id| {
                        *latencies.entry(id).or_insert_with(|| match host.get_reported_latency(id) {
                            Ok(ms) if ms.is_finite() && ms >= 0.0 => Some(ms),
                            _ => None,
                        })
                    })
                    .unwrap_or(0.0)
            })
            .collect();

        let (best, truncated) = match paths.topological_order(source) {
            Some(order) => (paths.heaviest_acyclic(&order, &weight, source, sink), false),
            None => {
                let mut search = BoundedSearch::new(&paths, &weight, sink, source);
                search.visit(source, weight[source]);
                if search.truncated {
                    warn!(
                        "[LATENCY] path search stopped after {} steps",
                        MAX_SEARCH_STEPS
                    );
                }
                (search.best.map(|(_, path)| path), search.truncated)
            }
        };

        let Some(path) = best else {
            warn!(
                "[LATENCY] no routing path from {} to {}",
                self.config.source, self.config.sink
            );
            return ActivePath {
                truncated,
                ..ActivePath::default()
            };
        };

        let nodes: Vec<NodeId> = path.into_iter().map(|i| paths.nodes[i].clone()).collect();
        let mut plugins = Vec::new();
        let mut unavailable = Vec::new();
        for plugin_id in nodes.iter().filter_map(NodeId::plugin_id) {
            match latencies.get(&plugin_id).copied().flatten() {
                Some(latency_ms) => plugins.push(PluginLatency {
                    plugin_id,
                    latency_ms,
                }),
                None => unavailable.push(plugin_id),
            }
        }

        ActivePath {
            nodes,
            plugins,
            unavailable,
            truncated,
        }
    }
}

#[derive(Default)]
struct ActivePath {
    nodes: Vec<NodeId>,
    plugins: Vec<PluginLatency>,
    unavailable: Vec<PluginId>,
    truncated: bool,
}

// ============================================================================
// Path search
// ============================================================================

/// Routing graph with nodes replaced by indices
#[derive(Default)]
struct PathGraph {
    nodes: Vec<NodeId>,
    index: HashMap<NodeId, usize>,
    adjacency: Vec<Vec<usize>>,
}

impl PathGraph {
    fn intern(&mut self, node: &NodeId) -> usize {
        if let Some(&i) = self.index.get(node) {
            return i;
        }
        let i = self.nodes.len();
        self.nodes.push(node.clone());
        self.index.insert(node.clone(), i);
        self.adjacency.push(Vec::new());
        i
    }

    /// Topological order of the nodes reachable from `source`, or `None`
    /// when they contain a cycle
    fn topological_order(&self, source: usize) -> Option<Vec<usize>> {
        let n = self.nodes.len();
        let mut reachable = vec![false; n];
        let mut queue = VecDeque::from([source]);
        reachable[source] = true;
        while let Some(node) = queue.pop_front() {
            for &next in &self.adjacency[node] {
                if !reachable[next] {
                    reachable[next] = true;
                    queue.push_back(next);
                }
            }
        }

        let mut in_degree = vec![0usize; n];
        for node in (0..n).filter(|&i| reachable[i]) {
            for &next in &self.adjacency[node] {
                in_degree[next] += 1;
            }
        }

        let mut ready: VecDeque<usize> = (0..n).filter(|&i| reachable[i] && in_degree[i] == 0).collect();
        let mut order = Vec::new();
        while let Some(node) = ready.pop_front() {
            order.push(node);
            for &next in &self.adjacency[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push_back(next);
                }
            }
        }

        let total = reachable.iter().filter(|r| **r).count();
        (order.len() == total).then_some(order)
    }

    /// Heaviest source-to-sink path over an acyclic order
    fn heaviest_acyclic(
        &self,
        order: &[usize],
        weight: &[f64],
        source: usize,
        sink: usize,
    ) -> Option<Vec<usize>> {
        let n = self.nodes.len();
        let mut score: Vec<Option<f64>> = vec![None; n];
        let mut parent: Vec<Option<usize>> = vec![None; n];
        score[source] = Some(weight[source]);

        for &node in order {
            let Some(current) = score[node] else {
                continue;
            };
            for &next in &self.adjacency[node] {
                let candidate = current + weight[next];
                if score[next].map_or(true, |s| candidate > s) {
                    score[next] = Some(candidate);
                    parent[next] = Some(node);
                }
            }
        }

        score[sink]?;
        let mut path = vec![sink];
        let mut node = sink;
        while let Some(previous) = parent[node] {
            path.push(previous);
            node = previous;
        }
        path.reverse();
        Some(path)
    }
}

/// Backtracking search over simple paths with a visit budget
struct BoundedSearch<'a> {
    graph: &'a PathGraph,
    weight: &'a [f64],
    sink: usize,
    path: Vec<usize>,
    on_path: Vec<bool>,
    best: Option<(f64, Vec<usize>)>,
    steps: usize,
    truncated: bool,
}

impl<'a> BoundedSearch<'a> {
    fn new(graph: &'a PathGraph, weight: &'a [f64], sink: usize, source: usize) -> Self {
        let mut on_path = vec![false; graph.nodes.len()];
        on_path[source] = true;
        Self {
            graph,
            weight,
            sink,
            path: vec![source],
            on_path,
            best: None,
            steps: 0,
            truncated: false,
        }
    }

    fn visit(&mut self, node: usize, total: f64) {
        if self.steps >= MAX_SEARCH_STEPS {
            self.truncated = true;
            return;
        }
        self.steps += 1;

        if node == self.sink {
            if self.best.as_ref().map_or(true, |(b, _)| total > *b) {
                self.best = Some((total, self.path.clone()));
            }
            return;
        }

        let graph = self.graph;
        for &next in &graph.adjacency[node] {
            if self.truncated {
                return;
            }
            if self.on_path[next] {
                continue;
            }
            self.on_path[next] = true;
            self.path.push(next);
            self.visit(next, total + self.weight[next]);
            self.path.pop();
            self.on_path[next] = false;
        }
    }
}

/// First sample whose magnitude reaches `threshold`
fn detect_arrival(capture: &[f32], threshold: f32) -> Option<usize> {
    capture.iter().position(|s| s.abs() >= threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{InMemoryHost, ParameterSpec};
    use approx::assert_relative_eq;

    fn capture() -> NodeId {
        NodeId::System("capture".into())
    }
    fn playback() -> NodeId {
        NodeId::System("playback".into())
    }

    fn host() -> InMemoryHost {
        let host = InMemoryHost::new(48000);
        host.set_loopback_delay(Some(480));
        host.add_plugin(1, "EQ", 1.0, vec![ParameterSpec::new("gain", -12.0, 12.0)]);
        host.add_plugin(2, "Limiter", 5.0, vec![ParameterSpec::new("ceiling", -6.0, 0.0)]);
        host.add_plugin(3, "Reverb", 2.0, vec![ParameterSpec::new("mix", 0.0, 1.0)]);
        host
    }

    #[test]
    fn test_system_latency_from_impulse() {
        let host = host();
        let estimator = LatencyEstimator::new(LatencyConfig::default());
        let report = estimator.measure(&host, &host, false).unwrap();

        assert_eq!(report.system_latency_samples, 480);
        assert_relative_eq!(report.system_latency_ms, 10.0);
        assert_relative_eq!(report.total_latency_ms, 10.0);
        assert!(report.plugins.is_empty());
        assert!(!report.measured_plugins);
    }

    #[test]
    fn test_only_active_path_counts() {
        let host = host();
        // capture -> 1 -> 2 -> playback; plugin 3 loaded but unrouted
        host.connect(capture(), NodeId::Plugin(1), 0.0);
        host.connect(NodeId::Plugin(1), NodeId::Plugin(2), 0.0);
        host.connect(NodeId::Plugin(2), playback(), 0.0);

        let report = LatencyEstimator::new(LatencyConfig::default())
            .measure(&host, &host, true)
            .unwrap();

        assert_relative_eq!(report.plugin_latency_ms, 6.0);
        assert_relative_eq!(report.total_latency_ms, 16.0);
        assert_eq!(report.active_path.len(), 4);
    }

    #[test]
    fn test_slowest_branch_is_active() {
        let host = host();
        host.connect(capture(), NodeId::Plugin(1), 0.0);
        host.connect(capture(), NodeId::Plugin(3), 0.0);
        host.connect(NodeId::Plugin(1), playback(), 0.0);
        host.connect(NodeId::Plugin(3), playback(), 0.0);

        let report = LatencyEstimator::new(LatencyConfig::default())
            .measure(&host, &host, true)
            .unwrap();
        assert_eq!(report.plugins.len(), 1);
        assert_eq!(report.plugins[0].plugin_id, 3);
    }

    #[test]
    fn test_unreadable_plugin_listed() {
        let host = host();
        host.connect(capture(), NodeId::Plugin(9), 0.0);
        host.connect(NodeId::Plugin(9), playback(), 0.0);

        let report = LatencyEstimator::new(LatencyConfig::default())
            .measure(&host, &host, true)
            .unwrap();
        assert_eq!(report.unavailable, vec![9]);
        assert_relative_eq!(report.plugin_latency_ms, 0.0);
    }

    #[test]
    fn test_dense_acyclic_routing_is_exact_and_cheap() {
        let host = InMemoryHost::new(48000);
        host.set_loopback_delay(Some(48));
        for id in 0..40 {
            host.add_plugin(id, "Stage", 0.5, Vec::new());
            host.connect(capture(), NodeId::Plugin(id), 0.0);
            host.connect(NodeId::Plugin(id), playback(), 0.0);
            for later in (id + 1)..40 {
                host.connect(NodeId::Plugin(id), NodeId::Plugin(later), 0.0);
            }
        }

        let started = std::time::Instant::now();
        let report = LatencyEstimator::new(LatencyConfig::default())
            .measure(&host, &host, true)
            .unwrap();
        assert!(started.elapsed() < std::time::Duration::from_secs(1));

        // the heaviest path runs through every stage in order
        assert_eq!(report.plugins.len(), 40);
        assert_relative_eq!(report.plugin_latency_ms, 20.0);
        assert!(!report.truncated);
    }

    #[test]
    fn test_cyclic_routing_is_budgeted() {
        let host = host();
        host.connect(capture(), NodeId::Plugin(1), 0.0);
        host.connect(NodeId::Plugin(1), NodeId::Plugin(2), 0.0);
        host.connect(NodeId::Plugin(2), NodeId::Plugin(1), 0.0);
        host.connect(NodeId::Plugin(2), playback(), 0.0);

        let estimator = LatencyEstimator::new(LatencyConfig::default());
        let report = estimator.measure(&host, &host, true).unwrap();
        assert_relative_eq!(report.plugin_latency_ms, 6.0);
        assert!(!report.truncated);

        // every stage feeds every other: far more simple paths than the budget
        let dense = InMemoryHost::new(48000);
        dense.set_loopback_delay(Some(48));
        for id in 0..14 {
            dense.add_plugin(id, "Stage", 1.0, Vec::new());
            dense.connect(capture(), NodeId::Plugin(id), 0.0);
            dense.connect(NodeId::Plugin(id), playback(), 0.0);
            for other in (0..14).filter(|o| *o != id) {
                dense.connect(NodeId::Plugin(id), NodeId::Plugin(other), 0.0);
            }
        }
        let report = estimator.measure(&dense, &dense, true).unwrap();
        assert!(report.truncated);
        assert!(!report.active_path.is_empty());
    }

    #[test]
    fn test_disconnected_loopback_fails() {
        let host = InMemoryHost::new(48000);
        let err = LatencyEstimator::new(LatencyConfig::default())
            .measure(&host, &host, false)
            .unwrap_err();
        assert!(matches!(err, MixError::LatencyProbeFailed { .. }));
    }
}
