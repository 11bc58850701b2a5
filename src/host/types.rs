//! Shared host-side types
//!
//! Addresses of plugin parameters and routing nodes, native value ranges
//! and the routing edges the feedback and latency analysis walk.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MixError, Result};

/// Plugin instance identifier as assigned by the host
pub type PluginId = u32;

/// Unique address of one continuous plugin control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParameterRef {
    /// Plugin instance owning the parameter
    pub plugin_id: PluginId,
    /// Parameter index within the plugin
    pub parameter_index: u32,
}

impl ParameterRef {
    pub const fn new(plugin_id: PluginId, parameter_index: u32) -> Self {
        Self {
            plugin_id,
            parameter_index,
        }
    }
}

impl fmt::Display for ParameterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.plugin_id, self.parameter_index)
    }
}

// ============================================================================
// Range
// ============================================================================

#[derive(Deserialize)]
struct RawRange {
    min: f64,
    max: f64,
}

impl TryFrom<RawRange> for Range {
    type Error = MixError;

    fn try_from(raw: RawRange) -> Result<Self> {
        Range::new(raw.min, raw.max)
    }
}

/// Value range in a parameter's native units
///
/// Always satisfies `min < max` with both bounds finite; construction
/// (including deserialization) rejects anything else.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRange")]
pub struct Range {
    min: f64,
    max: f64,
}

impl Range {
    /// Create a validated range
    pub fn new(min: f64, max: f64) -> Result<Self> {
        if !min.is_finite() || !max.is_finite() {
            return Err(MixError::invalid_range(min, max, "bounds must be finite"));
        }
        if min >= max {
            return Err(MixError::invalid_range(min, max, "min must be below max"));
        }
        Ok(Self { min, max })
    }

    /// The normalized range 0.0-1.0
    pub fn unit() -> Self {
        Self { min: 0.0, max: 1.0 }
    }

    #[inline]
    pub fn min(&self) -> f64 {
        self.min
    }

    #[inline]
    pub fn max(&self) -> f64 {
        self.max
    }

    #[inline]
    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    #[inline]
    pub fn midpoint(&self) -> f64 {
        self.min * 0.5 + self.max * 0.5
    }

    /// Clamp a value into the range
    #[inline]
    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.min).min(self.max)
    }

    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Position of a value within the range as 0.0-1.0
    pub fn normalize(&self, value: f64) -> f64 {
        // halved so ranges near the f64 limits keep a finite span
        ((value * 0.5 - self.min * 0.5) / (self.max * 0.5 - self.min * 0.5)).clamp(0.0, 1.0)
    }

    /// Value at `t` (0.0-1.0) between the bounds
    pub fn lerp(&self, t: f64) -> f64 {
        self.min * (1.0 - t) + self.max * t
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

// ============================================================================
// Parameter metadata
// ============================================================================

/// Parameter metadata and current value as reported by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterInfo {
    pub name: String,
    pub unit: String,
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub default: f64,
}

impl ParameterInfo {
    /// The parameter's native range
    ///
    /// Fails with `InvalidRange` when the host reports a degenerate range.
    pub fn range(&self) -> Result<Range> {
        Range::new(self.min, self.max)
    }
}

// ============================================================================
// Routing
// ============================================================================

/// A node in the routing graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NodeId {
    /// A loaded plugin instance
    Plugin(PluginId),
    /// A mix bus
    Bus(String),
    /// A hardware/system port group (e.g. "capture", "playback")
    System(String),
}

impl NodeId {
    /// The plugin behind this node, if any
    pub fn plugin_id(&self) -> Option<PluginId> {
        match self {
            NodeId::Plugin(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeId::Plugin(id) => write!(f, "plugin:{}", id),
            NodeId::Bus(name) => write!(f, "bus:{}", name),
            NodeId::System(name) => write!(f, "system:{}", name),
        }
    }
}

impl FromStr for NodeId {
    type Err = MixError;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, name) = s.split_once(':').ok_or_else(|| MixError::Config {
            reason: format!("node '{}' must look like plugin:<id>, bus:<name> or system:<name>", s),
        })?;

        match kind {
            "plugin" => name
                .parse::<PluginId>()
                .map(NodeId::Plugin)
                .map_err(|_| MixError::Config {
                    reason: format!("invalid plugin id in node '{}'", s),
                }),
            "bus" if !name.is_empty() => Ok(NodeId::Bus(name.to_string())),
            "system" if !name.is_empty() => Ok(NodeId::System(name.to_string())),
            _ => Err(MixError::Config {
                reason: format!("unknown node kind in '{}'", s),
            }),
        }
    }
}

impl TryFrom<String> for NodeId {
    type Error = MixError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<NodeId> for String {
    fn from(node: NodeId) -> Self {
        node.to_string()
    }
}

/// A directed connection with its gain in dB
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingEdge {
    pub source: NodeId,
    pub destination: NodeId,
    #[serde(default)]
    pub gain_db: f64,
}

impl RoutingEdge {
    pub fn new(source: NodeId, destination: NodeId, gain_db: f64) -> Self {
        Self {
            source,
            destination,
            gain_db,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_validation() {
        assert!(Range::new(0.0, 1.0).is_ok());
        assert!(Range::new(1.0, 1.0).is_err());
        assert!(Range::new(5.0, -5.0).is_err());
        assert!(Range::new(f64::NAN, 1.0).is_err());
        assert!(Range::new(0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_range_clamp_and_normalize() {
        let range = Range::new(-10.0, 10.0).unwrap();
        assert_eq!(range.clamp(25.0), 10.0);
        assert_eq!(range.clamp(-25.0), -10.0);
        assert_eq!(range.normalize(0.0), 0.5);
        assert_eq!(range.midpoint(), 0.0);
        assert_eq!(range.lerp(0.75), 5.0);
    }

    #[test]
    fn test_range_helpers_near_f64_limits() {
        let wide = Range::new(-f64::MAX, f64::MAX).unwrap();
        assert_eq!(wide.midpoint(), 0.0);
        assert_eq!(wide.normalize(0.0), 0.5);
        assert_eq!(wide.lerp(1.0), f64::MAX);
        assert!(wide.lerp(0.3).is_finite());
    }

    #[test]
    fn test_range_deserialize_rejects_inverted() {
        let ok: Range = serde_json::from_str(r#"{"min": 20.0, "max": 20000.0}"#).unwrap();
        assert_eq!(ok.max(), 20000.0);

        let bad = serde_json::from_str::<Range>(r#"{"min": 5.0, "max": 1.0}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_node_id_roundtrip() {
        for text in ["plugin:4", "bus:drums", "system:capture"] {
            let node: NodeId = text.parse().unwrap();
            assert_eq!(node.to_string(), text);
        }
        assert!("plugin:abc".parse::<NodeId>().is_err());
        assert!("speaker".parse::<NodeId>().is_err());
    }

    #[test]
    fn test_node_id_serde_as_string() {
        let edge = RoutingEdge::new(NodeId::Plugin(1), NodeId::Bus("main".into()), -3.0);
        let json = serde_json::to_string(&edge).unwrap();
        assert!(json.contains("\"plugin:1\""));
        let back: RoutingEdge = serde_json::from_str(&json).unwrap();
        assert_eq!(back, edge);
    }
}
