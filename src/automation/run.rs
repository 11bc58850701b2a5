//! Automation and morph runs
//!
//! Runs are created from requests, owned by the scheduler and exposed to
//! callers only as `RunSnapshot` values.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::curve::{Curve, Keyframe, Keyframes, RandomWalker};
use crate::error::{MixError, Result, TargetFailure};
use crate::host::{ParameterRef, PluginId, Range};

pub type RunId = Uuid;

/// Convert a duration in milliseconds, rejecting zero, negative, NaN and
/// values too large for a `Duration`
pub fn duration_from_ms(duration_ms: f64) -> Result<Duration> {
    if !duration_ms.is_finite() || duration_ms <= 0.0 {
        return Err(MixError::InvalidDuration { duration_ms });
    }
    Duration::try_from_secs_f64(duration_ms / 1000.0)
        .map_err(|_| MixError::InvalidDuration { duration_ms })
}

// ============================================================================
// Status
// ============================================================================

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Registered, waiting for the first tick at or after its start time
    Scheduled,
    Running,
    Completed,
    Cancelled,
}

impl RunStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, RunStatus::Scheduled | RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Scheduled => write!(f, "Scheduled"),
            RunStatus::Running => write!(f, "Running"),
            RunStatus::Completed => write!(f, "Completed"),
            RunStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// Cancelled by a caller
    Requested,
    /// Replaced by a newer run on the same target
    Preempted,
    /// The target stopped resolving mid-run
    TargetUnavailable,
    /// Engine shutdown
    Shutdown,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Requested => write!(f, "requested"),
            CancelReason::Preempted => write!(f, "preempted"),
            CancelReason::TargetUnavailable => write!(f, "target unavailable"),
            CancelReason::Shutdown => write!(f, "shutdown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    Automation,
    Morph,
}

// ============================================================================
// Requests
// ============================================================================

/// Parameters for animating one parameter along a curve
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AutomationRequest {
    pub target: ParameterRef,
    pub curve: Curve,
    /// Defaults to the parameter's native range
    #[serde(default)]
    pub range: Option<Range>,
    pub duration: Duration,
    /// Defaults to the time the run is started
    #[serde(default)]
    pub start_time: Option<Duration>,
    #[serde(default)]
    pub keyframes: Option<Vec<Keyframe>>,
}

impl AutomationRequest {
    pub fn new(target: ParameterRef, curve: Curve, duration: Duration) -> Self {
        Self {
            target,
            curve,
            range: None,
            duration,
            start_time: None,
            keyframes: None,
        }
    }

    pub fn with_range(mut self, range: Range) -> Self {
        self.range = Some(range);
        self
    }

    pub fn starting_at(mut self, start_time: Duration) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn with_keyframes(mut self, keyframes: Vec<Keyframe>) -> Self {
        self.keyframes = Some(keyframes);
        self
    }
}

/// Parameters for morphing a plugin toward a parameter snapshot
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MorphRequest {
    pub plugin_id: PluginId,
    /// Target value per parameter index
    pub target_state: BTreeMap<u32, f64>,
    pub duration: Duration,
    #[serde(default)]
    pub start_time: Option<Duration>,
}

impl MorphRequest {
    pub fn new(plugin_id: PluginId, target_state: BTreeMap<u32, f64>, duration: Duration) -> Self {
        Self {
            plugin_id,
            target_state,
            duration,
            start_time: None,
        }
    }

    pub fn starting_at(mut self, start_time: Duration) -> Self {
        self.start_time = Some(start_time);
        self
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// An earlier run that lost a target to a newly started one
///
/// Informational: last-writer-wins preemption is policy, not a failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictingTarget {
    pub target: ParameterRef,
    pub previous_run: RunId,
}

/// Result of starting a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartOutcome {
    pub run_id: RunId,
    pub preempted: Vec<ConflictingTarget>,
    /// First values the run will write, at evenly spaced progress points
    pub preview: Vec<f64>,
    /// Morph targets that could not be snapshotted
    pub failures: Vec<TargetFailure>,
}

/// Read-only view of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSnapshot {
    pub id: RunId,
    pub kind: RunKind,
    pub status: RunStatus,
    pub cancel_reason: Option<CancelReason>,
    pub targets: Vec<ParameterRef>,
    pub progress: f64,
    /// Last value written per target
    pub last_values: Vec<(ParameterRef, f64)>,
    pub start_time_ms: f64,
    pub duration_ms: f64,
}

impl RunSnapshot {
    /// Last value written to the run's only (or first) target
    pub fn last_value(&self) -> Option<f64> {
        self.last_values.first().map(|(_, v)| *v)
    }
}

// ============================================================================
// Runs
// ============================================================================

/// Timing and status shared by both run kinds
#[derive(Debug, Clone)]
pub(crate) struct RunClock {
    pub start_time: Duration,
    pub duration: Duration,
    pub status: RunStatus,
    pub cancel_reason: Option<CancelReason>,
    pub progress: f64,
    pub finished_at: Option<Duration>,
}

impl RunClock {
    pub fn new(start_time: Duration, duration: Duration) -> Self {
        Self {
            start_time,
            duration,
            status: RunStatus::Scheduled,
            cancel_reason: None,
            progress: 0.0,
            finished_at: None,
        }
    }

    /// Progress at `now`, or `None` before the start time
    pub fn progress_at(&self, now: Duration) -> Option<f64> {
        let elapsed = now.checked_sub(self.start_time)?;
        Some((elapsed.as_secs_f64() / self.duration.as_secs_f64()).clamp(0.0, 1.0))
    }

    pub fn finish(&mut self, status: RunStatus, reason: Option<CancelReason>, at: Duration) {
        self.status = status;
        self.cancel_reason = reason;
        self.finished_at = Some(at);
    }
}

/// One parameter animated along a curve
#[derive(Debug, Clone)]
pub(crate) struct AutomationRun {
    pub id: RunId,
    pub target: ParameterRef,
    pub curve: Curve,
    pub range: Range,
    pub keyframes: Option<Keyframes>,
    pub walker: Option<RandomWalker>,
    pub clock: RunClock,
    pub last_value: Option<f64>,
}

impl AutomationRun {
    /// Value at `progress`; advances the random walk when progress moved
    pub fn value_at(&mut self, progress: f64) -> Result<f64> {
        if let Some(walker) = self.walker.as_mut() {
            return Ok(walker.advance(progress));
        }
        match &self.keyframes {
            Some(keys) => keys.evaluate(&self.curve, progress, &self.range),
            None => super::curve::evaluate(&self.curve, progress, &self.range),
        }
    }
}

/// Start and end value of one morph target
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct MorphTarget {
    pub start: f64,
    pub end: f64,
    pub last_value: Option<f64>,
}

/// Many parameters moved linearly toward a snapshot
#[derive(Debug, Clone)]
pub(crate) struct MorphRun {
    pub id: RunId,
    pub plugin_id: PluginId,
    pub targets: BTreeMap<ParameterRef, MorphTarget>,
    pub clock: RunClock,
}

#[derive(Debug, Clone)]
pub(crate) enum Run {
    Automation(AutomationRun),
    Morph(MorphRun),
}

impl Run {
    pub fn id(&self) -> RunId {
        match self {
            Run::Automation(run) => run.id,
            Run::Morph(run) => run.id,
        }
    }

    pub fn clock(&self) -> &RunClock {
        match self {
            Run::Automation(run) => &run.clock,
            Run::Morph(run) => &run.clock,
        }
    }

    pub fn clock_mut(&mut self) -> &mut RunClock {
        match self {
            Run::Automation(run) => &mut run.clock,
            Run::Morph(run) => &mut run.clock,
        }
    }

    pub fn targets(&self) -> Vec<ParameterRef> {
        match self {
            Run::Automation(run) => vec![run.target],
            Run::Morph(run) => run.targets.keys().copied().collect(),
        }
    }

    pub fn snapshot(&self) -> RunSnapshot {
        let clock = self.clock();
        let (kind, last_values) = match self {
            Run::Automation(run) => (
                RunKind::Automation,
                run.last_value.map(|v| (run.target, v)).into_iter().collect(),
            ),
            Run::Morph(run) => (
                RunKind::Morph,
                run.targets
                    .iter()
                    .filter_map(|(param, t)| t.last_value.map(|v| (*param, v)))
                    .collect(),
            ),
        };

        RunSnapshot {
            id: self.id(),
            kind,
            status: clock.status,
            cancel_reason: clock.cancel_reason,
            targets: self.targets(),
            progress: clock.progress,
            last_values,
            start_time_ms: clock.start_time.as_secs_f64() * 1000.0,
            duration_ms: clock.duration.as_secs_f64() * 1000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_from_ms() {
        assert_eq!(duration_from_ms(250.0).unwrap(), Duration::from_millis(250));
        assert!(matches!(
            duration_from_ms(0.0),
            Err(MixError::InvalidDuration { .. })
        ));
        assert!(duration_from_ms(-10.0).is_err());
        assert!(duration_from_ms(f64::NAN).is_err());
    }

    #[test]
    fn test_duration_from_ms_rejects_overflow() {
        assert!(matches!(
            duration_from_ms(1e25),
            Err(MixError::InvalidDuration { duration_ms }) if duration_ms == 1e25
        ));
        assert!(duration_from_ms(f64::MAX).is_err());
        // a day still fits comfortably
        assert_eq!(
            duration_from_ms(86_400_000.0).unwrap(),
            Duration::from_secs(86_400)
        );
    }

    #[test]
    fn test_clock_progress() {
        let clock = RunClock::new(Duration::from_millis(100), Duration::from_millis(200));
        assert_eq!(clock.progress_at(Duration::from_millis(50)), None);
        assert_eq!(clock.progress_at(Duration::from_millis(100)), Some(0.0));
        assert_eq!(clock.progress_at(Duration::from_millis(200)), Some(0.5));
        assert_eq!(clock.progress_at(Duration::from_secs(5)), Some(1.0));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(RunStatus::Running.to_string(), "Running");
        assert!(RunStatus::Scheduled.is_active());
        assert!(!RunStatus::Cancelled.is_active());
    }
}
