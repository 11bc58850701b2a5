//! Engine configuration
//!
//! Defaults cover every field, so an empty JSON object is a valid config.
//! `MIXPILOT_*` environment variables override file values.

use std::env;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::analysis::WindowFunction;
use crate::error::{MixError, Result};
use crate::host::NodeId;

/// Supported FFT sizes
pub const FFT_SIZES: [usize; 5] = [512, 1024, 2048, 4096, 8192];

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scheduler: SchedulerConfig,
    pub analysis: AnalysisConfig,
    pub feedback: FeedbackConfig,
    pub latency: LatencyConfig,
}

/// Tick cadence and run bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Tick driver cadence in milliseconds
    pub tick_interval_ms: u64,
    /// How long finished runs stay queryable
    pub grace_period_ms: u64,
    /// Number of values returned as a preview when a run starts
    pub preview_steps: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 10,
            grace_period_ms: 5000,
            preview_steps: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// dB value reported for silence
    pub floor_db: f64,
    /// Level reports retained per tap
    pub history_capacity: usize,
    /// Audio span fed to the loudness meter
    pub loudness_window_ms: u64,
    pub default_fft_size: usize,
    pub default_window: WindowFunction,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            floor_db: -144.0,
            history_capacity: 100,
            loudness_window_ms: 3000,
            default_fft_size: 2048,
            default_window: WindowFunction::Hann,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Loop gain above which a cycle is reported, before sensitivity scaling
    pub threshold_db: f64,
    /// 0.0-1.0, higher lowers the effective threshold
    pub sensitivity: f64,
    /// Upper bound on cycles enumerated per scan
    pub max_cycles: usize,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            threshold_db: -20.0,
            sensitivity: 0.8,
            max_cycles: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyConfig {
    /// Samples captured after the impulse is sent
    pub probe_length: usize,
    /// Arrival threshold relative to the impulse peak
    pub detection_threshold_db: f64,
    /// Start of the active signal path
    pub source: NodeId,
    /// End of the active signal path
    pub sink: NodeId,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            probe_length: 8192,
            detection_threshold_db: -40.0,
            source: NodeId::System("capture".to_string()),
            sink: NodeId::System("playback".to_string()),
        }
    }
}

impl EngineConfig {
    /// Load a JSON config file, apply environment overrides and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let mut config: EngineConfig = serde_json::from_str(&text)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `MIXPILOT_*` variables on top of the current values
    ///
    /// Unset variables leave fields untouched; unparsable ones are errors.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        override_from_env("MIXPILOT_TICK_INTERVAL_MS", &mut self.scheduler.tick_interval_ms)?;
        override_from_env("MIXPILOT_GRACE_PERIOD_MS", &mut self.scheduler.grace_period_ms)?;
        override_from_env("MIXPILOT_PREVIEW_STEPS", &mut self.scheduler.preview_steps)?;

        override_from_env("MIXPILOT_FLOOR_DB", &mut self.analysis.floor_db)?;
        override_from_env("MIXPILOT_HISTORY_CAPACITY", &mut self.analysis.history_capacity)?;
        override_from_env("MIXPILOT_LOUDNESS_WINDOW_MS", &mut self.analysis.loudness_window_ms)?;
        override_from_env("MIXPILOT_FFT_SIZE", &mut self.analysis.default_fft_size)?;
        override_from_env("MIXPILOT_WINDOW_FUNCTION", &mut self.analysis.default_window)?;

        override_from_env("MIXPILOT_FEEDBACK_THRESHOLD_DB", &mut self.feedback.threshold_db)?;
        override_from_env("MIXPILOT_FEEDBACK_SENSITIVITY", &mut self.feedback.sensitivity)?;
        override_from_env("MIXPILOT_FEEDBACK_MAX_CYCLES", &mut self.feedback.max_cycles)?;

        override_from_env("MIXPILOT_LATENCY_PROBE_LENGTH", &mut self.latency.probe_length)?;
        override_from_env("MIXPILOT_LATENCY_SOURCE", &mut self.latency.source)?;
        override_from_env("MIXPILOT_LATENCY_SINK", &mut self.latency.sink)?;
        Ok(())
    }

    /// Reject inconsistent values
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.tick_interval_ms == 0 {
            return Err(config_error("scheduler.tick_interval_ms must be at least 1"));
        }
        if self.analysis.history_capacity == 0 {
            return Err(config_error("analysis.history_capacity must be at least 1"));
        }
        if self.analysis.loudness_window_ms == 0 {
            return Err(config_error("analysis.loudness_window_ms must be at least 1"));
        }
        if !self.analysis.floor_db.is_finite() || self.analysis.floor_db >= 0.0 {
            return Err(config_error("analysis.floor_db must be a finite negative dB value"));
        }
        if !FFT_SIZES.contains(&self.analysis.default_fft_size) {
            return Err(config_error(format!(
                "analysis.default_fft_size {} must be one of {:?}",
                self.analysis.default_fft_size, FFT_SIZES
            )));
        }
        if !(0.0..=1.0).contains(&self.feedback.sensitivity) {
            return Err(config_error("feedback.sensitivity must be within 0.0-1.0"));
        }
        if !self.feedback.threshold_db.is_finite() {
            return Err(config_error("feedback.threshold_db must be finite"));
        }
        if self.feedback.max_cycles == 0 {
            return Err(config_error("feedback.max_cycles must be at least 1"));
        }
        if self.latency.probe_length == 0 {
            return Err(config_error("latency.probe_length must be at least 1"));
        }
        if !self.latency.detection_threshold_db.is_finite() || self.latency.detection_threshold_db >= 0.0 {
            return Err(config_error("latency.detection_threshold_db must be below 0 dB"));
        }
        if self.latency.source == self.latency.sink {
            return Err(config_error("latency.source and latency.sink must differ"));
        }
        Ok(())
    }
}

fn config_error(reason: impl Into<String>) -> MixError {
    MixError::Config {
        reason: reason.into(),
    }
}

fn override_from_env<T: FromStr>(key: &str, slot: &mut T) -> Result<()> {
    if let Ok(raw) = env::var(key) {
        *slot = raw.trim().parse().map_err(|_| MixError::Config {
            reason: format!("{} has an invalid value '{}'", key, raw),
        })?;
    }
    Ok(())
}
