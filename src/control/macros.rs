//! Macro Engine
//!
//! One scalar in [0, 1] fanned out to several parameters, each through its
//! own range, curve and inversion. Writes happen immediately through the
//! parameter bus; a target that no longer resolves is reported and the
//! rest are still written.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::automation::{evaluate, Curve};
use crate::error::{MixError, Result, TargetFailure};
use crate::host::{ParameterBus, ParameterRef, Range};

pub type MacroId = Uuid;

/// Value a new macro starts at
pub const DEFAULT_MACRO_VALUE: f64 = 0.5;

/// A target as requested by the caller
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MacroTargetSpec {
    pub param: ParameterRef,
    /// Defaults to the parameter's native range
    #[serde(default)]
    pub range: Option<Range>,
    #[serde(default = "linear")]
    pub curve: Curve,
    #[serde(default)]
    pub inverted: bool,
}

fn linear() -> Curve {
    Curve::Linear
}

impl MacroTargetSpec {
    pub fn new(param: ParameterRef) -> Self {
        Self {
            param,
            range: None,
            curve: Curve::Linear,
            inverted: false,
        }
    }

    pub fn with_range(mut self, range: Range) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_curve(mut self, curve: Curve) -> Self {
        self.curve = curve;
        self
    }

    pub fn inverted(mut self) -> Self {
        self.inverted = true;
        self
    }
}

/// A resolved macro target
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MacroTarget {
    pub param: ParameterRef,
    pub range: Range,
    pub curve: Curve,
    pub inverted: bool,
}

impl MacroTarget {
    /// Parameter value for a macro value
    pub fn value_for(&self, macro_value: f64) -> Result<f64> {
        let effective = if self.inverted {
            1.0 - macro_value
        } else {
            macro_value
        };
        evaluate(&self.curve, effective, &self.range)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Macro {
    pub id: MacroId,
    pub name: String,
    /// In declaration order
    pub targets: Vec<MacroTarget>,
    /// Last value set
    pub value: f64,
}

/// Outcome of setting a macro value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MacroReport {
    pub macro_id: MacroId,
    pub value: f64,
    /// Values written, in target order
    pub applied: Vec<(ParameterRef, f64)>,
    pub failures: Vec<TargetFailure>,
}

impl MacroReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Registry of macros
pub struct MacroEngine {
    bus: Arc<ParameterBus>,
    macros: RwLock<HashMap<MacroId, Macro>>,
}

impl MacroEngine {
    pub fn new(bus: Arc<ParameterBus>) -> Self {
        Self {
            bus,
            macros: RwLock::new(HashMap::new()),
        }
    }

    /// Create a macro
    ///
    /// # Errors
    /// `DuplicateMacroTarget` when a parameter appears twice,
    /// `UnknownTarget` when a target does not resolve, `UnsupportedCurve`
    /// for random walks and `InvalidRange` for curves the range cannot carry.
    pub fn create(&self, name: &str, targets: Vec<MacroTargetSpec>) -> Result<Macro> {
        if targets.is_empty() {
            return Err(MixError::Config {
                reason: format!("macro '{}' has no targets", name),
            });
        }

        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(targets.len());
        for spec in targets {
            if !seen.insert(spec.param) {
                return Err(MixError::DuplicateMacroTarget { param: spec.param });
            }
            spec.curve.ensure_stateless("macros")?;

            let info = self.bus.read(spec.param)?;
            let range = match spec.range {
                Some(range) => range,
                None => info.range()?,
            };
            spec.curve.validate(&range)?;

            resolved.push(MacroTarget {
                param: spec.param,
                range,
                curve: spec.curve,
                inverted: spec.inverted,
            });
        }

        let created = Macro {
            id: Uuid::new_v4(),
            name: name.to_string(),
            targets: resolved,
            value: DEFAULT_MACRO_VALUE,
        };
        info!(
            "[MACRO] created '{}' controlling {} parameters",
            created.name,
            created.targets.len()
        );
        self.macros.write().insert(created.id, created.clone());
        Ok(created)
    }

    /// Drive every target of a macro from `value`
    pub fn set_value(&self, macro_id: MacroId, value: f64) -> Result<MacroReport> {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(MixError::InvalidMacroValue { value });
        }

        let targets = {
            let mut macros = self.macros.write();
            let entry = macros
                .get_mut(&macro_id)
                .ok_or(MixError::UnknownMacro { macro_id })?;
            entry.value = value;
            entry.targets.clone()
        };

        let mut report = MacroReport {
            macro_id,
            value,
            applied: Vec::with_capacity(targets.len()),
            failures: Vec::new(),
        };

        for target in &targets {
            let outcome = target
                .value_for(value)
                .and_then(|v| self.bus.write_runtime(target.param, v));
            match outcome {
                Ok(written) => report.applied.push((target.param, written)),
                Err(err) => {
                    warn!("[MACRO] {} target {}: {}", macro_id, target.param, err);
                    report.failures.push(TargetFailure::new(target.param, &err));
                }
            }
        }

        Ok(report)
    }

    pub fn get(&self, macro_id: MacroId) -> Result<Macro> {
        self.macros
            .read()
            .get(&macro_id)
            .cloned()
            .ok_or(MixError::UnknownMacro { macro_id })
    }

    pub fn remove(&self, macro_id: MacroId) -> Result<Macro> {
        self.macros
            .write()
            .remove(&macro_id)
            .ok_or(MixError::UnknownMacro { macro_id })
    }

    /// Every macro, sorted by name
    pub fn list(&self) -> Vec<Macro> {
        let mut all: Vec<Macro> = self.macros.read().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{InMemoryHost, ParameterSpec};
    use approx::assert_relative_eq;

    const P1: ParameterRef = ParameterRef::new(1, 0);
    const P2: ParameterRef = ParameterRef::new(1, 1);
    const P3: ParameterRef = ParameterRef::new(2, 0);

    fn setup() -> (Arc<InMemoryHost>, MacroEngine) {
        let host = Arc::new(InMemoryHost::new(48000));
        host.add_plugin(
            1,
            "Delay",
            0.0,
            vec![ParameterSpec::new("feedback", 0.0, 10.0), ParameterSpec::new("mix", 0.0, 10.0)],
        );
        host.add_plugin(2, "Reverb", 0.0, vec![ParameterSpec::new("size", 0.0, 1.0)]);
        let engine = MacroEngine::new(Arc::new(ParameterBus::new(host.clone())));
        (host, engine)
    }

    #[test]
    fn test_inverted_target() {
        let (host, engine) = setup();
        let range = Range::new(0.0, 10.0).unwrap();
        let created = engine
            .create(
                "space",
                vec![
                    MacroTargetSpec::new(P1).with_range(range),
                    MacroTargetSpec::new(P2).with_range(range).inverted(),
                ],
            )
            .unwrap();
        assert_eq!(created.value, DEFAULT_MACRO_VALUE);

        let report = engine.set_value(created.id, 0.3).unwrap();
        assert!(report.is_complete());
        assert_relative_eq!(host.value(P1).unwrap(), 3.0);
        assert_relative_eq!(host.value(P2).unwrap(), 7.0);
        assert_eq!(engine.get(created.id).unwrap().value, 0.3);
    }

    #[test]
    fn test_per_target_curves() {
        let (host, engine) = setup();
        let created = engine
            .create(
                "tone",
                vec![
                    MacroTargetSpec::new(P1)
                        .with_range(Range::new(1.0, 10.0).unwrap())
                        .with_curve(Curve::Exponential),
                    MacroTargetSpec::new(P3).with_curve(Curve::sine()),
                ],
            )
            .unwrap();

        engine.set_value(created.id, 0.5).unwrap();
        assert_relative_eq!(host.value(P1).unwrap(), 10.0_f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(host.value(P3).unwrap(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_duplicate_target_rejected() {
        let (_host, engine) = setup();
        let err = engine
            .create("dup", vec![MacroTargetSpec::new(P1), MacroTargetSpec::new(P1).inverted()])
            .unwrap_err();
        assert!(matches!(err, MixError::DuplicateMacroTarget { .. }));
        assert!(engine.list().is_empty());
    }

    #[test]
    fn test_partial_application() {
        let (host, engine) = setup();
        let created = engine
            .create("both", vec![MacroTargetSpec::new(P3), MacroTargetSpec::new(P1)])
            .unwrap();
        host.remove_plugin(2);

        let report = engine.set_value(created.id, 1.0).unwrap();
        assert_eq!(report.applied, vec![(P1, 10.0)]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].param, P3);
        assert_eq!(report.failures[0].error_code, "TARGET_UNAVAILABLE");
    }

    #[test]
    fn test_value_and_id_validation() {
        let (_host, engine) = setup();
        let created = engine.create("one", vec![MacroTargetSpec::new(P1)]).unwrap();
        assert!(matches!(
            engine.set_value(created.id, 1.2),
            Err(MixError::InvalidMacroValue { .. })
        ));
        assert!(matches!(
            engine.set_value(Uuid::new_v4(), 0.5),
            Err(MixError::UnknownMacro { .. })
        ));
        assert!(matches!(
            engine.create(
                "walk",
                vec![MacroTargetSpec::new(P2).with_curve(Curve::RandomWalk { step_size: 1.0, seed: 0 })]
            ),
            Err(MixError::UnsupportedCurve { .. })
        ));
    }

    #[test]
    fn test_remove_and_list() {
        let (_host, engine) = setup();
        let b = engine.create("b", vec![MacroTargetSpec::new(P1)]).unwrap();
        let a = engine.create("a", vec![MacroTargetSpec::new(P1)]).unwrap();
        let names: Vec<String> = engine.list().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["a", "b"]);

        engine.remove(a.id).unwrap();
        assert!(engine.get(a.id).is_err());
        assert!(engine.get(b.id).is_ok());
    }
}
