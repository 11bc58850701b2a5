//! Plugin host and routing graph capabilities
//!
//! The engine never talks to a concrete audio host. It consumes:
//! - `PluginHost`: parameter read/write, metadata, audio taps, latency
//! - `RoutingGraph`: the current connections and their gains
//!
//! All parameter writes go through `ParameterBus`, the single writer.

mod bus;
mod memory;
mod types;

pub use bus::ParameterBus;
pub use memory::{InMemoryHost, ParameterSpec, DEFAULT_WRITE_LOG_CAPACITY};
pub use types::{NodeId, ParameterInfo, ParameterRef, PluginId, Range, RoutingEdge};

use crate::analysis::AudioWindow;
use crate::error::Result;

/// Capabilities the engine consumes from the plugin host
///
/// Implementations must make each `set_parameter` call atomic: a reader
/// never observes a partially applied value.
pub trait PluginHost: Send + Sync {
    /// Current value and metadata of a parameter
    ///
    /// Fails with `UnknownTarget` if the reference does not resolve.
    fn get_parameter(&self, param: ParameterRef) -> Result<ParameterInfo>;

    /// Write a parameter value in native units
    fn set_parameter(&self, param: ParameterRef, value: f64) -> Result<()>;

    /// Number of parameters exposed by a plugin
    fn parameter_count(&self, plugin_id: PluginId) -> Result<u32>;

    /// Copy of the most recent `length` frames captured at a tap
    fn get_audio_window(&self, tap: &NodeId, length: usize) -> Result<AudioWindow>;

    /// Latency the plugin reports for itself, in milliseconds
    fn get_reported_latency(&self, plugin_id: PluginId) -> Result<f64>;

    /// Play `impulse` through the host audio path and capture `capture_len`
    /// samples of the returning signal
    fn round_trip(&self, impulse: &[f32], capture_len: usize) -> Result<Vec<f32>>;

    /// Engine sample rate in Hz
    fn sample_rate(&self) -> u32;
}

/// Read access to the host's routing graph
pub trait RoutingGraph: Send + Sync {
    /// Snapshot of every connection
    fn edges(&self) -> Vec<RoutingEdge>;
}
