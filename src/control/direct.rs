//! Direct parameter control
//!
//! Immediate reads and writes plus seeded randomization, all through the
//! parameter bus.

use std::sync::Arc;

use log::{info, warn};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

use crate::error::{MixError, Result, TargetFailure};
use crate::host::{ParameterBus, ParameterInfo, ParameterRef, PluginId};

/// One randomized parameter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterChange {
    pub param: ParameterRef,
    pub name: String,
    pub old_value: f64,
    pub new_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RandomizeReport {
    pub plugin_id: PluginId,
    pub amount: f64,
    pub seed: u64,
    pub changes: Vec<ParameterChange>,
    pub failures: Vec<TargetFailure>,
}

pub struct DirectControl {
    bus: Arc<ParameterBus>,
}

impl DirectControl {
    pub fn new(bus: Arc<ParameterBus>) -> Self {
        Self { bus }
    }

    pub fn get(&self, param: ParameterRef) -> Result<ParameterInfo> {
        self.bus.read(param)
    }

    /// Write a value, returning what was actually written after clamping
    pub fn set(&self, param: ParameterRef, value: f64) -> Result<f64> {
        let written = self.bus.write(param, value)?;
        info!("[CONTROL] {} set to {:.4}", param, written);
        Ok(written)
    }

    /// Every parameter of a plugin, by index
    pub fn list(&self, plugin_id: PluginId) -> Result<Vec<(u32, ParameterInfo)>> {
        let count = self.bus.host().parameter_count(plugin_id)?;
        (0..count)
            .map(|index| Ok((index, self.bus.read(ParameterRef::new(plugin_id, index))?)))
            .collect()
    }

    /// Move each parameter toward a random point in its range
    ///
    /// # Arguments
    /// * `plugin_id` - Plugin whose parameters are randomized
    /// * `amount` - 0.0 leaves values unchanged, 1.0 jumps to the random point
    /// * `exclude` - Parameter indices left untouched
    /// * `seed` - Seed for the random targets
    pub fn randomize(
        &self,
        plugin_id: PluginId,
        amount: f64,
        exclude: &[u32],
        seed: u64,
    ) -> Result<RandomizeReport> {
        if !amount.is_finite() || !(0.0..=1.0).contains(&amount) {
            return Err(MixError::InvalidAmount { amount });
        }
        let count = self.bus.host().parameter_count(plugin_id)?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let mut report = RandomizeReport {
            plugin_id,
            amount,
            seed,
            changes: Vec::new(),
            failures: Vec::new(),
        };

        for index in (0..count).filter(|i| !exclude.contains(i)) {
            let param = ParameterRef::new(plugin_id, index);
            let outcome = self.bus.read(param).and_then(|info| {
                let range = info.range()?;
                let random = range.lerp(rng.random::<f64>());
                let target = info.value * (1.0 - amount) + random * amount;
                let written = self.bus.write(param, target)?;
                Ok(ParameterChange {
                    param,
                    name: info.name,
                    old_value: info.value,
                    new_value: written,
                })
            });
            match outcome {
                Ok(change) => report.changes.push(change),
                Err(err) => {
                    warn!("[CONTROL] randomize skipped {}: {}", param, err);
                    report.failures.push(TargetFailure::new(param, &err));
                }
            }
        }

        info!(
            "[CONTROL] randomized {} parameters of plugin {}",
            report.changes.len(),
            plugin_id
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{InMemoryHost, ParameterSpec};

    fn setup() -> (Arc<InMemoryHost>, DirectControl) {
        let host = Arc::new(InMemoryHost::new(48000));
        host.add_plugin(
            1,
            "Comp",
            0.0,
            vec![
                ParameterSpec::new("threshold", -60.0, 0.0).with_default(-20.0),
                ParameterSpec::new("ratio", 1.0, 20.0).with_default(4.0),
                ParameterSpec::new("makeup", 0.0, 24.0),
            ],
        );
        let control = DirectControl::new(Arc::new(ParameterBus::new(host.clone())));
        (host, control)
    }

    #[test]
    fn test_set_clamps() {
        let (host, control) = setup();
        let param = ParameterRef::new(1, 1);
        assert_eq!(control.set(param, 50.0).unwrap(), 20.0);
        assert_eq!(host.value(param), Some(20.0));
        assert_eq!(control.get(param).unwrap().value, 20.0);
    }

    #[test]
    fn test_list_parameters() {
        let (_host, control) = setup();
        let params = control.list(1).unwrap();
        assert_eq!(params.len(), 3);
        assert_eq!(params[2].1.name, "makeup");
        assert!(matches!(control.list(9), Err(MixError::UnknownPlugin { .. })));
    }

    #[test]
    fn test_randomize_is_seeded_and_respects_exclude() {
        let (host_a, control_a) = setup();
        let (_host_b, control_b) = setup();

        let a = control_a.randomize(1, 0.5, &[1], 99).unwrap();
        let b = control_b.randomize(1, 0.5, &[1], 99).unwrap();
        assert_eq!(a.changes, b.changes);
        assert_eq!(a.changes.len(), 2);
        assert!(a.changes.iter().all(|c| c.param.parameter_index != 1));
        assert_eq!(host_a.value(ParameterRef::new(1, 1)), Some(4.0));
    }

    #[test]
    fn test_randomize_handles_extreme_native_range() {
        let host = Arc::new(InMemoryHost::new(48000));
        host.add_plugin(
            4,
            "Wide",
            0.0,
            vec![ParameterSpec::new("offset", -1e308, 1e308).with_default(0.0)],
        );
        let control = DirectControl::new(Arc::new(ParameterBus::new(host.clone())));

        let report = control.randomize(4, 1.0, &[], 11).unwrap();
        assert_eq!(report.changes.len(), 1);
        let value = host.value(ParameterRef::new(4, 0)).unwrap();
        assert!(value.is_finite());
        assert_eq!(report.changes[0].new_value, value);
    }

    #[test]
    fn test_randomize_zero_amount_keeps_values() {
        let (host, control) = setup();
        control.randomize(1, 0.0, &[], 5).unwrap();
        assert_eq!(host.value(ParameterRef::new(1, 0)), Some(-20.0));
        assert!(matches!(
            control.randomize(1, 1.5, &[], 5),
            Err(MixError::InvalidAmount { .. })
        ));
    }
}
