//! In-memory plugin host
//!
//! A self-contained host used by tests, the CLI and embedders that want to
//! drive the engine without a running audio server. Parameter storage,
//! audio taps, routing and a loopback path are all held behind
//! `parking_lot` locks so every call is atomic.

use std::collections::{BTreeMap, HashMap, VecDeque};

use parking_lot::{Mutex, RwLock};

use super::{NodeId, ParameterInfo, ParameterRef, PluginHost, PluginId, RoutingEdge, RoutingGraph};
use crate::analysis::AudioWindow;
use crate::error::{MixError, Result};

/// Writes kept by default before the oldest are dropped
pub const DEFAULT_WRITE_LOG_CAPACITY: usize = 4096;

/// Definition of one parameter for `InMemoryHost::add_plugin`
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub name: String,
    pub unit: String,
    pub min: f64,
    pub max: f64,
    pub default: f64,
}

impl ParameterSpec {
    /// New parameter whose default (and initial value) is `min`
    pub fn new(name: &str, min: f64, max: f64) -> Self {
        Self {
            name: name.to_string(),
            unit: String::new(),
            min,
            max,
            default: min,
        }
    }

    pub fn with_default(mut self, default: f64) -> Self {
        self.default = default;
        self
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.unit = unit.to_string();
        self
    }
}

#[derive(Debug, Clone)]
struct PluginState {
    name: String,
    latency_ms: f64,
    parameters: Vec<(ParameterSpec, f64)>,
}

/// Plugin host backed by plain memory
pub struct InMemoryHost {
    sample_rate: u32,
    plugins: RwLock<BTreeMap<PluginId, PluginState>>,
    taps: RwLock<HashMap<NodeId, AudioWindow>>,
    edges: RwLock<Vec<RoutingEdge>>,
    /// Loopback delay in samples; `None` means the loop is disconnected
    loopback_delay: RwLock<Option<usize>>,
    /// Most recent writes, oldest dropped first
    write_log: Mutex<VecDeque<(ParameterRef, f64)>>,
    write_log_capacity: usize,
}

impl InMemoryHost {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            plugins: RwLock::new(BTreeMap::new()),
            taps: RwLock::new(HashMap::new()),
            edges: RwLock::new(Vec::new()),
            loopback_delay: RwLock::new(None),
            write_log: Mutex::new(VecDeque::new()),
            write_log_capacity: DEFAULT_WRITE_LOG_CAPACITY,
        }
    }

    /// Keep at most `capacity` writes in the log; 0 disables it
    pub fn with_write_log_capacity(mut self, capacity: usize) -> Self {
        self.write_log_capacity = capacity;
        self
    }

    // ========================================================================
    // Plugins & parameters
    // ========================================================================

    /// Load a plugin with the given parameters (replaces any existing one)
    pub fn add_plugin(
        &self,
        plugin_id: PluginId,
        name: &str,
        latency_ms: f64,
        parameters: Vec<ParameterSpec>,
    ) {
        let parameters = parameters
            .into_iter()
            .map(|spec| {
                let initial = spec.default;
                (spec, initial)
            })
            .collect();

        self.plugins.write().insert(
            plugin_id,
            PluginState {
                name: name.to_string(),
                latency_ms,
                parameters,
            },
        );
    }

    /// Unload a plugin; its parameters stop resolving
    pub fn remove_plugin(&self, plugin_id: PluginId) -> bool {
        self.plugins.write().remove(&plugin_id).is_some()
    }

    /// Name of a loaded plugin
    pub fn plugin_name(&self, plugin_id: PluginId) -> Option<String> {
        self.plugins.read().get(&plugin_id).map(|p| p.name.clone())
    }

    /// Current value of a parameter, bypassing the bus
    pub fn value(&self, param: ParameterRef) -> Option<f64> {
        self.plugins
            .read()
            .get(&param.plugin_id)
            .and_then(|p| p.parameters.get(param.parameter_index as usize))
            .map(|(_, value)| *value)
    }

    /// Retained writes, oldest first
    pub fn writes(&self) -> Vec<(ParameterRef, f64)> {
        self.write_log.lock().iter().copied().collect()
    }

    /// Writes applied to one parameter, in order
    pub fn writes_to(&self, param: ParameterRef) -> Vec<f64> {
        self.write_log
            .lock()
            .iter()
            .filter(|(p, _)| *p == param)
            .map(|(_, v)| *v)
            .collect()
    }

    pub fn clear_writes(&self) {
        self.write_log.lock().clear();
    }

    // ========================================================================
    // Audio
    // ========================================================================

    /// Store the audio currently visible at a tap
    pub fn set_tap(&self, tap: NodeId, window: AudioWindow) {
        self.taps.write().insert(tap, window);
    }

    /// Connect the loopback path with a fixed delay in samples
    pub fn set_loopback_delay(&self, delay_samples: Option<usize>) {
        *self.loopback_delay.write() = delay_samples;
    }

    // ========================================================================
    // Routing
    // ========================================================================

    pub fn connect(&self, source: NodeId, destination: NodeId, gain_db: f64) {
        self.edges
            .write()
            .push(RoutingEdge::new(source, destination, gain_db));
    }

    /// Remove every connection from `source` to `destination`
    pub fn disconnect(&self, source: &NodeId, destination: &NodeId) -> usize {
        let mut edges = self.edges.write();
        let before = edges.len();
        edges.retain(|e| !(&e.source == source && &e.destination == destination));
        before - edges.len()
    }
}

impl PluginHost for InMemoryHost {
    fn get_parameter(&self, param: ParameterRef) -> Result<ParameterInfo> {
        let plugins = self.plugins.read();
        let (spec, value) = plugins
            .get(&param.plugin_id)
            .and_then(|p| p.parameters.get(param.parameter_index as usize))
            .ok_or(MixError::UnknownTarget { param })?;

        Ok(ParameterInfo {
            name: spec.name.clone(),
            unit: spec.unit.clone(),
            value: *value,
            min: spec.min,
            max: spec.max,
            default: spec.default,
        })
    }

    fn set_parameter(&self, param: ParameterRef, value: f64) -> Result<()> {
        let mut plugins = self.plugins.write();
        let slot = plugins
            .get_mut(&param.plugin_id)
            .and_then(|p| p.parameters.get_mut(param.parameter_index as usize))
            .ok_or(MixError::UnknownTarget { param })?;
        slot.1 = value;
        if self.write_log_capacity > 0 {
            let mut log = self.write_log.lock();
            if log.len() == self.write_log_capacity {
                log.pop_front();
            }
            log.push_back((param, value));
        }
        Ok(())
    }

    fn parameter_count(&self, plugin_id: PluginId) -> Result<u32> {
        self.plugins
            .read()
            .get(&plugin_id)
            .map(|p| p.parameters.len() as u32)
            .ok_or(MixError::UnknownPlugin { plugin_id })
    }

    fn get_audio_window(&self, tap: &NodeId, length: usize) -> Result<AudioWindow> {
        let taps = self.taps.read();
        let window = taps
            .get(tap)
            .ok_or_else(|| MixError::UnknownTap { tap: tap.clone() })?;

        if length == 0 || length >= window.len() {
            Ok(window.clone())
        } else {
            Ok(window.tail(length))
        }
    }

    fn get_reported_latency(&self, plugin_id: PluginId) -> Result<f64> {
        self.plugins
            .read()
            .get(&plugin_id)
            .map(|p| p.latency_ms)
            .ok_or(MixError::UnknownPlugin { plugin_id })
    }

    fn round_trip(&self, impulse: &[f32], capture_len: usize) -> Result<Vec<f32>> {
        let mut capture = vec![0.0_f32; capture_len];
        if let Some(delay) = *self.loopback_delay.read() {
            for (i, &sample) in impulse.iter().enumerate() {
                if let Some(slot) = capture.get_mut(delay + i) {
                    // Loopback cabling loses a little level
                    *slot += sample * 0.5;
                }
            }
        }
        Ok(capture)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl RoutingGraph for InMemoryHost {
    fn edges(&self) -> Vec<RoutingEdge> {
        self.edges.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_log_is_bounded() {
        let host = InMemoryHost::new(48000).with_write_log_capacity(3);
        host.add_plugin(1, "Gain", 0.0, vec![ParameterSpec::new("gain", 0.0, 10.0)]);
        let gain = ParameterRef::new(1, 0);
        for step in 0..10 {
            host.set_parameter(gain, f64::from(step)).unwrap();
        }
        assert_eq!(host.writes_to(gain), vec![7.0, 8.0, 9.0]);
        assert_eq!(host.value(gain), Some(9.0));

        let silent = InMemoryHost::new(48000).with_write_log_capacity(0);
        silent.add_plugin(1, "Gain", 0.0, vec![ParameterSpec::new("gain", 0.0, 10.0)]);
        silent.set_parameter(gain, 4.0).unwrap();
        assert!(silent.writes().is_empty());
        assert_eq!(silent.value(gain), Some(4.0));
    }

    #[test]
    fn test_parameter_lookup() {
        let host = InMemoryHost::new(48000);
        host.add_plugin(
            2,
            "Reverb",
            1.5,
            vec![ParameterSpec::new("mix", 0.0, 1.0).with_default(0.25)],
        );

        let info = host.get_parameter(ParameterRef::new(2, 0)).unwrap();
        assert_eq!(info.name, "mix");
        assert_eq!(info.value, 0.25);
        assert_eq!(host.parameter_count(2).unwrap(), 1);
        assert!(host.get_parameter(ParameterRef::new(2, 1)).is_err());
        assert_eq!(host.plugin_name(2).as_deref(), Some("Reverb"));
    }

    #[test]
    fn test_remove_plugin_unresolves_parameters() {
        let host = InMemoryHost::new(48000);
        host.add_plugin(1, "Gain", 0.0, vec![ParameterSpec::new("gain", -60.0, 12.0)]);
        assert!(host.remove_plugin(1));
        assert!(matches!(
            host.set_parameter(ParameterRef::new(1, 0), 0.0),
            Err(MixError::UnknownTarget { .. })
        ));
    }

    #[test]
    fn test_audio_window_tail() {
        let host = InMemoryHost::new(48000);
        let window = AudioWindow::from_channels(vec![vec![0.0, 1.0, 2.0, 3.0]], 48000).unwrap();
        host.set_tap(NodeId::Plugin(1), window);

        let tail = host.get_audio_window(&NodeId::Plugin(1), 2).unwrap();
        assert_eq!(tail.channel(0), &[2.0, 3.0]);
        assert!(host.get_audio_window(&NodeId::Plugin(9), 2).is_err());
    }

    #[test]
    fn test_round_trip_delay() {
        let host = InMemoryHost::new(48000);
        host.set_loopback_delay(Some(100));
        let capture = host.round_trip(&[1.0], 512).unwrap();
        assert_eq!(capture[100], 0.5);
        assert_eq!(capture.iter().filter(|s| **s != 0.0).count(), 1);
    }

    #[test]
    fn test_disconnect() {
        let host = InMemoryHost::new(48000);
        host.connect(NodeId::Plugin(1), NodeId::Plugin(2), 0.0);
        host.connect(NodeId::Plugin(2), NodeId::Plugin(1), 0.0);
        assert_eq!(host.disconnect(&NodeId::Plugin(1), &NodeId::Plugin(2)), 1);
        assert_eq!(host.edges().len(), 1);
    }
}
