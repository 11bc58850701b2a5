//! Automation Scheduler
//!
//! Sole owner of automation and morph runs. Each tick computes every active
//! run's progress, evaluates its curve and writes through the parameter
//! bus. At most one active run owns a parameter; starting another run on
//! it preempts the previous owner (last writer wins).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use super::curve::{self, Keyframes, RandomWalker};
use super::run::{
    AutomationRequest, AutomationRun, CancelReason, ConflictingTarget, MorphRequest, MorphRun,
    MorphTarget, Run, RunClock, RunId, RunSnapshot, RunStatus, StartOutcome,
};
use crate::config::SchedulerConfig;
use crate::error::{MixError, Result, TargetFailure};
use crate::host::{ParameterBus, ParameterRef, Range};

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickSummary {
    pub writes: usize,
    pub completed: Vec<RunId>,
    pub cancelled: Vec<RunId>,
    /// True when the tick was ignored because time went backward
    pub skipped: bool,
}

#[derive(Default)]
struct SchedulerState {
    runs: HashMap<RunId, Run>,
    /// Active owner of each parameter
    owners: HashMap<ParameterRef, RunId>,
    last_tick: Option<Duration>,
}

impl SchedulerState {
    fn now(&self) -> Duration {
        self.last_tick.unwrap_or_default()
    }

    /// Take `param` away from its current owner, if any
    fn release(&mut self, param: ParameterRef) -> Option<ConflictingTarget> {
        let previous = self.owners.remove(&param)?;
        let now = self.now();

        if let Some(run) = self.runs.get_mut(&previous) {
            match run {
                Run::Automation(auto) => {
                    auto.clock
                        .finish(RunStatus::Cancelled, Some(CancelReason::Preempted), now);
                }
                Run::Morph(morph) => {
                    morph.targets.remove(&param);
                    if morph.targets.is_empty() {
                        morph
                            .clock
                            .finish(RunStatus::Cancelled, Some(CancelReason::Preempted), now);
                    }
                }
            }
            warn!("[SCHEDULER] run {} preempted on {}", previous, param);
        }

        Some(ConflictingTarget {
            target: param,
            previous_run: previous,
        })
    }

    fn cancel(&mut self, run_id: RunId, reason: CancelReason) -> Result<RunSnapshot> {
        let now = self.now();
        let run = self
            .runs
            .get_mut(&run_id)
            .ok_or(MixError::UnknownRun { run_id })?;

        if run.clock().status.is_active() {
            run.clock_mut().finish(RunStatus::Cancelled, Some(reason), now);
            let targets = run.targets();
            for param in targets {
                if self.owners.get(&param) == Some(&run_id) {
                    self.owners.remove(&param);
                }
            }
            info!("[SCHEDULER] run {} cancelled ({})", run_id, reason);
        }

        Ok(self.runs[&run_id].snapshot())
    }
}

/// Owner of every automation and morph run
pub struct AutomationScheduler {
    bus: Arc<ParameterBus>,
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
}

impl AutomationScheduler {
    pub fn new(bus: Arc<ParameterBus>, config: SchedulerConfig) -> Self {
        Self {
            bus,
            config,
            state: Mutex::new(SchedulerState::default()),
        }
    }

    // ========================================================================
    // Starting runs
    // ========================================================================

    /// Register an automation run
    ///
    /// # Arguments
    /// * `request` - Target, curve, duration and optional range/keyframes
    /// * `now` - Current scheduler time, used when the request has no start time
    ///
    /// # Errors
    /// `InvalidDuration`, `UnknownTarget`, `InvalidRange`, `InvalidCurve`
    /// and `InvalidKeyframes` are raised before anything is registered.
    pub fn start(&self, request: AutomationRequest, now: Duration) -> Result<StartOutcome> {
        if request.duration.is_zero() {
            return Err(MixError::InvalidDuration { duration_ms: 0.0 });
        }

        let info = self.bus.read(request.target)?;
        let range = match request.range {
            Some(range) => range,
            None => info.range()?,
        };
        request.curve.validate(&range)?;

        let keyframes = request
            .keyframes
            .map(|points| Keyframes::new(points, &range))
            .transpose()?;
        if let Some(keys) = &keyframes {
            keys.check_curve(&request.curve)?;
        }

        let walker = match &request.curve {
            curve::Curve::RandomWalk { step_size, seed } => {
                Some(RandomWalker::new(*step_size, *seed, range, info.value)?)
            }
            _ => None,
        };

        let mut run = AutomationRun {
            id: Uuid::new_v4(),
            target: request.target,
            curve: request.curve,
            range,
            keyframes,
            walker,
            clock: RunClock::new(request.start_time.unwrap_or(now), request.duration),
            last_value: None,
        };

        let preview = self.preview(&mut run.clone())?;

        let mut state = self.state.lock();
        let preempted: Vec<ConflictingTarget> = state.release(run.target).into_iter().collect();

        let run_id = run.id;
        info!(
            "[SCHEDULER] automation {} on {}: {} over {:.0}ms",
            run_id,
            run.target,
            run.curve,
            request.duration.as_secs_f64() * 1000.0
        );
        state.owners.insert(run.target, run_id);
        state.runs.insert(run_id, Run::Automation(run));

        Ok(StartOutcome {
            run_id,
            preempted,
            preview,
            failures: Vec::new(),
        })
    }

    /// Register a morph run toward a parameter snapshot
    ///
    /// Start values are captured now. Targets that do not resolve are
    /// reported in `failures`; the call only fails when none resolve.
    pub fn start_morph(&self, request: MorphRequest, now: Duration) -> Result<StartOutcome> {
        if request.duration.is_zero() {
            return Err(MixError::InvalidDuration { duration_ms: 0.0 });
        }
        if request.target_state.is_empty() {
            return Err(MixError::Config {
                reason: "morph target state is empty".to_string(),
            });
        }

        let mut targets = BTreeMap::new();
        let mut failures = Vec::new();
        let mut first_error = None;

        for (&index, &end) in &request.target_state {
            let param = ParameterRef::new(request.plugin_id, index);
            match self.bus.read(param) {
                Ok(info) => {
                    let range = info.range()?;
                    if !end.is_finite() || !range.contains(end) {
                        return Err(MixError::invalid_range(
                            range.min(),
                            range.max(),
                            format!("morph value {} for {} is outside {}", end, param, range),
                        ));
                    }
                    targets.insert(
                        param,
                        MorphTarget {
                            start: range.clamp(info.value),
                            end,
                            last_value: None,
                        },
                    );
                }
                Err(err) => {
                    warn!("[SCHEDULER] morph target {} skipped: {}", param, err);
                    failures.push(TargetFailure::new(param, &err));
                    first_error.get_or_insert(err);
                }
            }
        }

        if targets.is_empty() {
            return Err(first_error.unwrap_or(MixError::UnknownPlugin {
                plugin_id: request.plugin_id,
            }));
        }

        let run = MorphRun {
            id: Uuid::new_v4(),
            plugin_id: request.plugin_id,
            targets,
            clock: RunClock::new(request.start_time.unwrap_or(now), request.duration),
        };
        let run_id = run.id;

        let mut state = self.state.lock();
        let preempted: Vec<ConflictingTarget> = run
            .targets
            .keys()
            .filter_map(|param| state.release(*param))
            .collect();

        info!(
            "[SCHEDULER] morph {} on plugin {}: {} targets over {:.0}ms",
            run_id,
            run.plugin_id,
            run.targets.len(),
            request.duration.as_secs_f64() * 1000.0
        );
        for param in run.targets.keys() {
            state.owners.insert(*param, run_id);
        }
        state.runs.insert(run_id, Run::Morph(run));

        Ok(StartOutcome {
            run_id,
            preempted,
            preview: Vec::new(),
            failures,
        })
    }

    fn preview(&self, run: &mut AutomationRun) -> Result<Vec<f64>> {
        curve::progress_points(self.config.preview_steps)
            .map(|p| run.value_at(p))
            .collect()
    }

    // ========================================================================
    // Ticking
    // ========================================================================

    /// Advance every active run to `now`
    ///
    /// A `now` earlier than the previous tick is ignored. Repeating the
    /// same `now` rewrites the same values.
    pub fn tick(&self, now: Duration) -> TickSummary {
        let mut state = self.state.lock();
        if state.last_tick.is_some_and(|last| now < last) {
            debug!("[SCHEDULER] ignoring tick at {:?}: time went backward", now);
            return TickSummary {
                skipped: true,
                ..TickSummary::default()
            };
        }
        state.last_tick = Some(now);

        let mut summary = TickSummary::default();
        let mut released = Vec::new();

        for run in state.runs.values_mut() {
            if !run.clock().status.is_active() {
                continue;
            }
            let Some(progress) = run.clock().progress_at(now) else {
                continue;
            };

            let clock = run.clock_mut();
            clock.status = RunStatus::Running;
            clock.progress = progress;

            match run {
                Run::Automation(auto) => {
                    let outcome = auto
                        .value_at(progress)
                        .and_then(|value| self.bus.write_runtime(auto.target, value));
                    match outcome {
                        Ok(written) => {
                            auto.last_value = Some(written);
                            summary.writes += 1;
                        }
                        Err(err) => {
                            warn!("[SCHEDULER] run {} lost {}: {}", auto.id, auto.target, err);
                            auto.clock.finish(
                                RunStatus::Cancelled,
                                Some(CancelReason::TargetUnavailable),
                                now,
                            );
                            released.push((auto.target, auto.id));
                            summary.cancelled.push(auto.id);
                            continue;
                        }
                    }
                }
                Run::Morph(morph) => {
                    let mut lost = Vec::new();
                    for (param, target) in morph.targets.iter_mut() {
                        let value = if progress >= 1.0 {
                            target.end
                        } else {
                            target.start + progress * (target.end - target.start)
                        };
                        match self.bus.write_runtime(*param, value) {
                            Ok(written) => {
                                target.last_value = Some(written);
                                summary.writes += 1;
                            }
                            Err(err) => {
                                warn!("[SCHEDULER] morph {} lost {}: {}", morph.id, param, err);
                                lost.push(*param);
                            }
                        }
                    }
                    for param in lost {
                        morph.targets.remove(&param);
                        released.push((param, morph.id));
                    }
                    if morph.targets.is_empty() {
                        morph.clock.finish(
                            RunStatus::Cancelled,
                            Some(CancelReason::TargetUnavailable),
                            now,
                        );
                        summary.cancelled.push(morph.id);
                        continue;
                    }
                }
            }

            if progress >= 1.0 {
                run.clock_mut().finish(RunStatus::Completed, None, now);
                for param in run.targets() {
                    released.push((param, run.id()));
                }
                summary.completed.push(run.id());
                info!("[SCHEDULER] run {} completed", run.id());
            }
        }

        for (param, run_id) in released {
            if state.owners.get(&param) == Some(&run_id) {
                state.owners.remove(&param);
            }
        }

        let grace = Duration::from_millis(self.config.grace_period_ms);
        state.runs.retain(|_, run| match run.clock().finished_at {
            Some(at) => now < at + grace,
            None => true,
        });

        summary
    }

    // ========================================================================
    // Control & queries
    // ========================================================================

    /// Cancel a run; its last written values stay in place
    ///
    /// Cancelling a finished run returns its snapshot unchanged.
    pub fn cancel(&self, run_id: RunId) -> Result<RunSnapshot> {
        self.state.lock().cancel(run_id, CancelReason::Requested)
    }

    /// Cancel every active run, returning how many were cancelled
    pub fn cancel_all(&self, reason: CancelReason) -> usize {
        let mut state = self.state.lock();
        let active: Vec<RunId> = state
            .runs
            .values()
            .filter(|run| run.clock().status.is_active())
            .map(Run::id)
            .collect();
        for run_id in &active {
            if let Err(e) = state.cancel(*run_id, reason) {
                debug!("[SCHEDULER] cancel {} skipped: {}", run_id, e);
            }
        }
        active.len()
    }

    pub fn status(&self, run_id: RunId) -> Result<RunSnapshot> {
        self.state
            .lock()
            .runs
            .get(&run_id)
            .map(Run::snapshot)
            .ok_or(MixError::UnknownRun { run_id })
    }

    /// Snapshots of every retained run, oldest start first
    pub fn list(&self) -> Vec<RunSnapshot> {
        let mut runs: Vec<RunSnapshot> = self.state.lock().runs.values().map(Run::snapshot).collect();
        runs.sort_by(|a, b| a.start_time_ms.total_cmp(&b.start_time_ms));
        runs
    }

    /// The active run that owns a parameter
    pub fn owner_of(&self, param: ParameterRef) -> Option<RunId> {
        self.state.lock().owners.get(&param).copied()
    }

    pub fn active_count(&self) -> usize {
        self.state
            .lock()
            .runs
            .values()
            .filter(|run| run.clock().status.is_active())
            .count()
    }

    /// Preview an automation without registering it
    pub fn preview_curve(&self, curve: &curve::Curve, range: &Range) -> Result<Vec<f64>> {
        curve::preview(curve, range, self.config.preview_steps)
    }
}
