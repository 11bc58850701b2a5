//! Error handling for Mixpilot
//!
//! Every failure in the automation and analysis core is recoverable at the
//! call boundary. Errors carry a stable code for the dispatch layer plus
//! recovery suggestions for the natural-language client.

use serde::Serialize;
use thiserror::Error;

use crate::host::{NodeId, ParameterRef, PluginId};

/// Result type alias for Mixpilot operations
pub type Result<T> = std::result::Result<T, MixError>;

/// Main error type for Mixpilot operations
#[derive(Error, Debug)]
pub enum MixError {
    // Resolution Errors
    #[error("Unknown target: {param} does not resolve in the plugin host")]
    UnknownTarget { param: ParameterRef },

    #[error("Target unavailable: {param} no longer resolves")]
    TargetUnavailable { param: ParameterRef },

    #[error("Unknown plugin: {plugin_id}")]
    UnknownPlugin { plugin_id: PluginId },

    #[error("Unknown audio tap: {tap}")]
    UnknownTap { tap: NodeId },

    #[error("Unknown automation run: {run_id}")]
    UnknownRun { run_id: uuid::Uuid },

    #[error("Unknown MIDI mapping: {mapping_id}")]
    UnknownMapping { mapping_id: uuid::Uuid },

    #[error("Unknown macro: {macro_id}")]
    UnknownMacro { macro_id: uuid::Uuid },

    #[error("Unknown recording: {recording_id}")]
    UnknownRecording { recording_id: uuid::Uuid },

    // Validation Errors
    #[error("Invalid range: min {min} must be finite and below max {max}")]
    InvalidRange { min: f64, max: f64, reason: String },

    #[error("Invalid duration: {duration_ms:.1}ms (must be > 0)")]
    InvalidDuration { duration_ms: f64 },

    #[error("Invalid FFT size: {size} (must be a power of two between 512 and 8192)")]
    InvalidFftSize { size: usize },

    #[error("Invalid keyframes: {reason}")]
    InvalidKeyframes { reason: String },

    #[error("Invalid curve: {reason}")]
    InvalidCurve { reason: String },

    #[error("Curve '{curve}' is not supported for {context}")]
    UnsupportedCurve { curve: String, context: String },

    #[error("Invalid MIDI CC number: {cc_number} (must be 0-127)")]
    InvalidCcNumber { cc_number: u8 },

    #[error("Invalid MIDI channel: {channel} (must be 1-16)")]
    InvalidMidiChannel { channel: u8 },

    #[error("Invalid macro value: {value} (must be within 0.0-1.0)")]
    InvalidMacroValue { value: f64 },

    #[error("Macro target {param} appears more than once")]
    DuplicateMacroTarget { param: ParameterRef },

    #[error("Invalid sensitivity: {sensitivity} (must be within 0.0-1.0)")]
    InvalidSensitivity { sensitivity: f64 },

    #[error("Invalid amount: {amount} (must be within 0.0-1.0)")]
    InvalidAmount { amount: f64 },

    #[error("Invalid audio window: {reason}")]
    InvalidAudio { reason: String },

    // Runtime Errors
    #[error("Latency probe failed: {reason}")]
    LatencyProbeFailed { reason: String },

    #[error("Engine tick driver is not running")]
    EngineStopped,

    #[error("Configuration error: {reason}")]
    Config { reason: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MixError {
    /// Shorthand for a range validation failure
    pub(crate) fn invalid_range(min: f64, max: f64, reason: impl Into<String>) -> Self {
        MixError::InvalidRange {
            min,
            max,
            reason: reason.into(),
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            MixError::UnknownTarget { .. } => "UNKNOWN_TARGET",
            MixError::TargetUnavailable { .. } => "TARGET_UNAVAILABLE",
            MixError::UnknownPlugin { .. } => "UNKNOWN_PLUGIN",
            MixError::UnknownTap { .. } => "UNKNOWN_TAP",
            MixError::UnknownRun { .. } => "UNKNOWN_RUN",
            MixError::UnknownMapping { .. } => "UNKNOWN_MAPPING",
            MixError::UnknownMacro { .. } => "UNKNOWN_MACRO",
            MixError::UnknownRecording { .. } => "UNKNOWN_RECORDING",
            MixError::InvalidRange { .. } => "INVALID_RANGE",
            MixError::InvalidDuration { .. } => "INVALID_DURATION",
            MixError::InvalidFftSize { .. } => "INVALID_FFT_SIZE",
            MixError::InvalidKeyframes { .. } => "INVALID_KEYFRAMES",
            MixError::InvalidCurve { .. } => "INVALID_CURVE",
            MixError::UnsupportedCurve { .. } => "UNSUPPORTED_CURVE",
            MixError::InvalidCcNumber { .. } => "INVALID_CC_NUMBER",
            MixError::InvalidMidiChannel { .. } => "INVALID_MIDI_CHANNEL",
            MixError::InvalidMacroValue { .. } => "INVALID_MACRO_VALUE",
            MixError::DuplicateMacroTarget { .. } => "DUPLICATE_MACRO_TARGET",
            MixError::InvalidSensitivity { .. } => "INVALID_SENSITIVITY",
            MixError::InvalidAmount { .. } => "INVALID_AMOUNT",
            MixError::InvalidAudio { .. } => "INVALID_AUDIO",
            MixError::LatencyProbeFailed { .. } => "LATENCY_PROBE_FAILED",
            MixError::EngineStopped => "ENGINE_STOPPED",
            MixError::Config { .. } => "CONFIG_ERROR",
            MixError::Io(_) => "IO_ERROR",
            MixError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if this error is recoverable
    ///
    /// Nothing in the core is fatal to the process; the dispatch layer may
    /// retry or report any of these to the client.
    pub fn is_recoverable(&self) -> bool {
        true
    }

    /// Check if this error was raised by call-time validation
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            MixError::InvalidRange { .. }
                | MixError::InvalidDuration { .. }
                | MixError::InvalidFftSize { .. }
                | MixError::InvalidKeyframes { .. }
                | MixError::InvalidCurve { .. }
                | MixError::UnsupportedCurve { .. }
                | MixError::InvalidCcNumber { .. }
                | MixError::InvalidMidiChannel { .. }
                | MixError::InvalidMacroValue { .. }
                | MixError::DuplicateMacroTarget { .. }
                | MixError::InvalidSensitivity { .. }
                | MixError::InvalidAmount { .. }
        )
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            MixError::UnknownTarget { .. } | MixError::TargetUnavailable { .. } => vec![
                "Check that the plugin is still loaded",
                "List the plugin's parameters to confirm the index",
            ],
            MixError::InvalidRange { .. } => vec![
                "Use a range whose minimum is below its maximum",
                "Exponential curves need a strictly positive minimum",
            ],
            MixError::InvalidDuration { .. } => vec!["Use a duration greater than zero"],
            MixError::InvalidFftSize { .. } => vec![
                "Use one of 512, 1024, 2048, 4096 or 8192",
            ],
            MixError::UnsupportedCurve { .. } => vec![
                "Use linear, exponential, logarithmic or sine for instantaneous controls",
                "Animate the control with an automation run for random motion",
            ],
            MixError::InvalidMidiChannel { .. } => vec!["MIDI channels are numbered 1 to 16"],
            MixError::InvalidCcNumber { .. } => vec!["MIDI CC numbers are 0 to 127"],
            MixError::DuplicateMacroTarget { .. } => vec![
                "Each parameter may appear only once per macro",
                "Create a second macro to drive the same parameter differently",
            ],
            MixError::LatencyProbeFailed { .. } => vec![
                "Check that the engine is running and the loopback path is connected",
                "Raise the probe length for high-latency paths",
            ],
            MixError::EngineStopped => vec!["Restart the tick driver"],
            _ => vec![],
        }
    }
}

/// A per-target failure inside an otherwise successful operation
///
/// Macros and morphs report one of these for each target that did not
/// land instead of failing the whole call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetFailure {
    pub param: ParameterRef,
    pub error_code: &'static str,
    pub message: String,
}

impl TargetFailure {
    pub fn new(param: ParameterRef, error: &MixError) -> Self {
        Self {
            param,
            error_code: error.error_code(),
            message: error.to_string(),
        }
    }
}
