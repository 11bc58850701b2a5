//! Mixpilot - Parameter Automation & Real-Time Analysis Engine
//!
//! Mixpilot drives plugin parameters on behalf of a natural-language
//! client and reports on the audio those parameters produce:
//! 1. Automation - curves, keyframes and morphs advanced by a tick driver,
//!    plus MIDI CC mappings, macros and direct control
//! 2. Analysis - levels, spectrum, feedback loops and latency, computed
//!    over copied audio windows and routing snapshots
//!
//! # Architecture
//!
//! The engine never talks to a concrete audio host. It consumes the
//! `PluginHost` and `RoutingGraph` capabilities, and every parameter write
//! goes through one `ParameterBus` so writers never interleave.

pub mod analysis;
pub mod automation;
pub mod cli;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod host;

pub use config::EngineConfig;
pub use engine::{Engine, TickDriver};
pub use error::{MixError, Result, TargetFailure};
pub use host::{InMemoryHost, NodeId, ParameterBus, ParameterRef, PluginHost, Range, RoutingGraph};
