//! Single-writer parameter bus
//!
//! The scheduler, MIDI mapper, macro engine and direct control all write
//! through one bus. A write reads the parameter's native range, clamps the
//! value into it and applies it while holding the bus lock, so two sources
//! targeting the same parameter resolve as last-write-wins and never
//! interleave.

use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use super::{ParameterInfo, ParameterRef, PluginHost};
use crate::error::{MixError, Result};

/// Serialized, clamping access to plugin parameters
pub struct ParameterBus {
    host: Arc<dyn PluginHost>,
    write_lock: Mutex<()>,
}

impl ParameterBus {
    pub fn new(host: Arc<dyn PluginHost>) -> Self {
        Self {
            host,
            write_lock: Mutex::new(()),
        }
    }

    /// The underlying host
    pub fn host(&self) -> &Arc<dyn PluginHost> {
        &self.host
    }

    /// Read a parameter's value and metadata
    pub fn read(&self, param: ParameterRef) -> Result<ParameterInfo> {
        self.host.get_parameter(param)
    }

    /// Check that a parameter resolves
    pub fn resolves(&self, param: ParameterRef) -> bool {
        self.host.get_parameter(param).is_ok()
    }

    /// Clamp `value` into the parameter's native range and write it
    ///
    /// Returns the value actually written.
    pub fn write(&self, param: ParameterRef, value: f64) -> Result<f64> {
        if !value.is_finite() {
            return Err(MixError::invalid_range(
                value,
                value,
                "parameter values must be finite",
            ));
        }

        let _guard = self.write_lock.lock();
        let info = self.host.get_parameter(param)?;
        let clamped = value.max(info.min).min(info.max);
        self.host.set_parameter(param, clamped)?;

        debug!("[BUS] {} <- {:.6}", param, clamped);
        Ok(clamped)
    }

    /// Write, reporting resolution failures as `TargetUnavailable`
    ///
    /// Used by runtime paths (ticks, MIDI, macros) where the target was valid
    /// when the run/mapping/macro was created.
    pub fn write_runtime(&self, param: ParameterRef, value: f64) -> Result<f64> {
        self.write(param, value).map_err(|err| match err {
            MixError::UnknownTarget { param } => MixError::TargetUnavailable { param },
            MixError::UnknownPlugin { .. } => MixError::TargetUnavailable { param },
            other => other,
        })
    }
}
