//! Automation Integration Tests
//!
//! Drives the engine with explicit tick times so every write is
//! deterministic.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use approx::assert_relative_eq;
use mixpilot::automation::{
    duration_from_ms, AutomationRequest, CancelReason, Curve, Keyframe, MorphRequest, RunStatus,
};
use mixpilot::control::{MacroTargetSpec, MappingRequest};
use mixpilot::host::ParameterSpec;
use mixpilot::{Engine, EngineConfig, InMemoryHost, MixError, ParameterRef, Range};

const CUTOFF: ParameterRef = ParameterRef::new(1, 0);
const RESONANCE: ParameterRef = ParameterRef::new(1, 1);
const DRIVE: ParameterRef = ParameterRef::new(1, 2);
const SEND: ParameterRef = ParameterRef::new(2, 0);

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

/// A filter (plugin 1) and a reverb send (plugin 2)
fn setup() -> (Arc<InMemoryHost>, Engine) {
    let host = Arc::new(InMemoryHost::new(48000));
    host.add_plugin(
        1,
        "Filter",
        0.0,
        vec![
            ParameterSpec::new("cutoff", 20.0, 20000.0).with_unit("Hz"),
            ParameterSpec::new("resonance", 0.0, 1.0),
            ParameterSpec::new("drive", 0.0, 24.0).with_unit("dB"),
        ],
    );
    host.add_plugin(2, "Reverb", 0.0, vec![ParameterSpec::new("send", -60.0, 0.0)]);
    let engine = Engine::new(host.clone(), host.clone(), EngineConfig::default()).unwrap();
    (host, engine)
}

// === Curves through the scheduler ===

#[test]
fn test_exponential_sweep_is_monotonic_and_exact_at_ends() {
    let (host, engine) = setup();
    let request = AutomationRequest::new(CUTOFF, Curve::Exponential, ms(1000)).starting_at(ms(0));
    engine.scheduler().start(request, ms(0)).unwrap();

    let mut previous = f64::MIN;
    for t in (0..=1000).step_by(50) {
        engine.tick_at(ms(t));
        let value = host.value(CUTOFF).unwrap();
        assert!(value > previous, "cutoff {} at {}ms did not rise", value, t);
        assert!((20.0..=20000.0).contains(&value));
        previous = value;
    }

    let writes = host.writes_to(CUTOFF);
    assert_eq!(writes.first().copied(), Some(20.0));
    assert_eq!(writes.last().copied(), Some(20000.0));
}

#[test]
fn test_keyframed_run_hits_each_keyframe() {
    let (host, engine) = setup();
    let request = AutomationRequest::new(DRIVE, Curve::Linear, ms(400))
        .starting_at(ms(0))
        .with_keyframes(vec![
            Keyframe::new(0.0, 0.0),
            Keyframe::new(0.5, 20.0),
            Keyframe::new(1.0, 10.0),
        ]);
    engine.scheduler().start(request, ms(0)).unwrap();

    engine.tick_at(ms(100));
    assert_relative_eq!(host.value(DRIVE).unwrap(), 10.0, epsilon = 1e-9);
    engine.tick_at(ms(200));
    assert_relative_eq!(host.value(DRIVE).unwrap(), 20.0, epsilon = 1e-9);
    engine.tick_at(ms(400));
    assert_relative_eq!(host.value(DRIVE).unwrap(), 10.0, epsilon = 1e-9);
}

#[test]
fn test_multi_cycle_sine_restarts_each_cycle() {
    let (host, engine) = setup();
    let request = AutomationRequest::new(RESONANCE, Curve::Sine { cycles: 2 }, ms(400)).starting_at(ms(0));
    engine.scheduler().start(request, ms(0)).unwrap();

    engine.tick_at(ms(0));
    assert_eq!(host.value(RESONANCE), Some(0.0));
    engine.tick_at(ms(100));
    assert_relative_eq!(host.value(RESONANCE).unwrap(), 0.5, epsilon = 1e-9);
    engine.tick_at(ms(150));
    let rising = host.value(RESONANCE).unwrap();
    // second cycle starts again from the bottom
    engine.tick_at(ms(250));
    let restarted = host.value(RESONANCE).unwrap();
    assert!(restarted < rising, "{} should fall below {}", restarted, rising);
    engine.tick_at(ms(300));
    assert_relative_eq!(host.value(RESONANCE).unwrap(), 0.5, epsilon = 1e-9);
    engine.tick_at(ms(400));
    assert_eq!(host.value(RESONANCE), Some(1.0));
}

#[test]
fn test_random_walk_with_huge_step_stays_in_range() {
    let (host, engine) = setup();
    let request = AutomationRequest::new(SEND, Curve::RandomWalk { step_size: 1e300, seed: 5 }, ms(100))
        .starting_at(ms(0));
    engine.scheduler().start(request, ms(0)).unwrap();
    for t in (0..=100).step_by(10) {
        engine.tick_at(ms(t));
    }
    let writes = host.writes_to(SEND);
    assert_eq!(writes.len(), 11);
    assert!(writes.iter().all(|v| (-60.0..=0.0).contains(v)));
}

#[test]
fn test_random_walk_is_reproducible_across_engines() {
    let run = |seed: u64| {
        let (host, engine) = setup();
        let request = AutomationRequest::new(RESONANCE, Curve::RandomWalk { step_size: 0.1, seed }, ms(100))
            .starting_at(ms(0));
        engine.scheduler().start(request, ms(0)).unwrap();
        for t in (0..=100).step_by(10) {
            engine.tick_at(ms(t));
        }
        host.writes_to(RESONANCE)
    };

    let first = run(42);
    assert_eq!(first, run(42));
    assert_ne!(first, run(43));
    assert!(first.iter().all(|v| (0.0..=1.0).contains(v)));
}

#[test]
fn test_repeated_tick_rewrites_same_value() {
    let (host, engine) = setup();
    let request = AutomationRequest::new(RESONANCE, Curve::RandomWalk { step_size: 0.2, seed: 7 }, ms(100))
        .starting_at(ms(0));
    engine.scheduler().start(request, ms(0)).unwrap();

    engine.tick_at(ms(30));
    engine.tick_at(ms(30));
    let writes = host.writes_to(RESONANCE);
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0], writes[1]);
}

// === Ownership and preemption ===

#[test]
fn test_new_run_preempts_previous_owner() {
    let (_host, engine) = setup();
    let first = engine
        .scheduler()
        .start(AutomationRequest::new(CUTOFF, Curve::Linear, ms(1000)), ms(0))
        .unwrap();
    let second = engine
        .scheduler()
        .start(AutomationRequest::new(CUTOFF, Curve::Logarithmic, ms(1000)), ms(0))
        .unwrap();

    assert_eq!(second.preempted.len(), 1);
    assert_eq!(second.preempted[0].previous_run, first.run_id);
    assert_eq!(engine.scheduler().owner_of(CUTOFF), Some(second.run_id));

    let old = engine.automation_status(first.run_id).unwrap();
    assert_eq!(old.status, RunStatus::Cancelled);
    assert_eq!(old.cancel_reason, Some(CancelReason::Preempted));
    assert_eq!(engine.scheduler().active_count(), 1);
}

#[test]
fn test_automation_steals_single_target_from_morph() {
    let (host, engine) = setup();
    let state: BTreeMap<u32, f64> = [(0, 1000.0), (1, 1.0)].into_iter().collect();
    let morph = engine
        .scheduler()
        .start_morph(MorphRequest::new(1, state, ms(100)).starting_at(ms(0)), ms(0))
        .unwrap();
    engine
        .scheduler()
        .start(AutomationRequest::new(RESONANCE, Curve::Linear, ms(100)).starting_at(ms(0)), ms(0))
        .unwrap();

    let snapshot = engine.automation_status(morph.run_id).unwrap();
    assert_eq!(snapshot.status, RunStatus::Scheduled);
    assert_eq!(snapshot.targets, vec![CUTOFF]);

    engine.tick_at(ms(100));
    assert_eq!(host.value(CUTOFF), Some(1000.0));
    assert_eq!(host.value(RESONANCE), Some(1.0));
}

// === Morphs ===

#[test]
fn test_morph_lands_exactly_on_target_state() {
    let (host, engine) = setup();
    engine.set_parameter(CUTOFF, 440.0).unwrap();
    engine.set_parameter(DRIVE, 3.0).unwrap();

    let target: BTreeMap<u32, f64> = [(0, 12345.678), (1, 0.333), (2, 17.5)].into_iter().collect();
    let outcome = engine
        .scheduler()
        .start_morph(MorphRequest::new(1, target.clone(), ms(250)).starting_at(ms(0)), ms(0))
        .unwrap();
    assert!(outcome.failures.is_empty());

    for t in [0, 60, 125, 190, 250] {
        engine.tick_at(ms(t));
    }

    for (index, expected) in target {
        assert_eq!(host.value(ParameterRef::new(1, index)), Some(expected));
    }
    assert_eq!(
        engine.automation_status(outcome.run_id).unwrap().status,
        RunStatus::Completed
    );
}

#[test]
fn test_morph_reports_unresolved_targets() {
    let (_host, engine) = setup();
    let target: BTreeMap<u32, f64> = [(1, 0.5), (9, 0.5)].into_iter().collect();
    let outcome = engine
        .scheduler()
        .start_morph(MorphRequest::new(1, target, ms(100)), ms(0))
        .unwrap();
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].param, ParameterRef::new(1, 9));

    let nothing: BTreeMap<u32, f64> = [(9, 0.5)].into_iter().collect();
    assert!(engine.start_morph(1, nothing, ms(100)).is_err());
}

// === Failure isolation ===

#[test]
fn test_lost_target_cancels_only_its_run() {
    let (host, engine) = setup();
    let doomed = engine
        .scheduler()
        .start(AutomationRequest::new(SEND, Curve::Linear, ms(100)).starting_at(ms(0)), ms(0))
        .unwrap();
    let survivor = engine
        .scheduler()
        .start(AutomationRequest::new(DRIVE, Curve::Linear, ms(100)).starting_at(ms(0)), ms(0))
        .unwrap();

    engine.tick_at(ms(10));
    host.remove_plugin(2);
    let summary = engine.tick_at(ms(50));
    assert_eq!(summary.cancelled, vec![doomed.run_id]);

    let lost = engine.automation_status(doomed.run_id).unwrap();
    assert_eq!(lost.cancel_reason, Some(CancelReason::TargetUnavailable));

    engine.tick_at(ms(100));
    assert_eq!(
        engine.automation_status(survivor.run_id).unwrap().status,
        RunStatus::Completed
    );
    assert_eq!(host.value(DRIVE), Some(24.0));
}

#[test]
fn test_validation_rejects_before_registering() {
    let (_host, engine) = setup();
    let scheduler = engine.scheduler();

    let zero = scheduler.start(AutomationRequest::new(CUTOFF, Curve::Linear, Duration::ZERO), ms(0));
    assert!(matches!(zero, Err(MixError::InvalidDuration { .. })));

    let unknown = scheduler.start(
        AutomationRequest::new(ParameterRef::new(7, 0), Curve::Linear, ms(10)),
        ms(0),
    );
    assert!(matches!(unknown, Err(MixError::UnknownTarget { .. })));

    let bad_exp = scheduler.start(
        AutomationRequest::new(SEND, Curve::Exponential, ms(10)),
        ms(0),
    );
    assert!(matches!(bad_exp, Err(MixError::InvalidRange { .. })));

    // millisecond durations from a caller are checked before any request exists
    assert!(matches!(
        duration_from_ms(1e25),
        Err(MixError::InvalidDuration { .. })
    ));
    assert!(engine.list_automations().is_empty());
}

// === Instant writers share the bus ===

#[test]
fn test_midi_and_macro_writes_are_clamped_and_last_wins() {
    let (host, engine) = setup();
    engine
        .map_midi_cc(MappingRequest::new(RESONANCE, 71, 1).with_range(Range::new(0.0, 2.0).unwrap()))
        .unwrap();
    let created = engine
        .create_macro("brightness", vec![MacroTargetSpec::new(RESONANCE), MacroTargetSpec::new(CUTOFF)])
        .unwrap();

    let dispatch = engine.on_midi_cc(1, 71, 127);
    assert_eq!(dispatch.written, vec![(RESONANCE, 1.0)]);

    engine.set_macro_value(created.id, 0.25).unwrap();
    assert_relative_eq!(host.value(RESONANCE).unwrap(), 0.25);
    assert_relative_eq!(host.value(CUTOFF).unwrap(), 20.0 + 0.25 * 19980.0);
}

#[test]
fn test_recording_captures_a_ramp() {
    let (_host, engine) = setup();
    let recording = engine.recorder().start(&[DRIVE], ms(200), ms(0)).unwrap();
    engine
        .scheduler()
        .start(AutomationRequest::new(DRIVE, Curve::Linear, ms(200)).starting_at(ms(0)), ms(0))
        .unwrap();

    for t in (0..=200).step_by(50) {
        engine.tick_at(ms(t));
    }
    engine.tick_at(ms(250));

    let captured = engine.get_recording(recording).unwrap();
    let stats = captured.series[0].stats.unwrap();
    assert_eq!(captured.series[0].samples.len(), 5);
    assert_relative_eq!(stats.min, 0.0);
    assert_relative_eq!(stats.max, 24.0);
    assert_relative_eq!(stats.final_value, 24.0);
    assert_relative_eq!(stats.average, 12.0, epsilon = 1e-9);
    assert_eq!(stats.changes, 4);
}
