//! MIDI CC mapping
//!
//! Maps incoming Control Change messages to parameter writes through a
//! per-mapping range and curve. Several mappings may share one
//! (channel, cc) pair; each is written independently. Unmapped traffic is
//! ignored.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

use crate::automation::{evaluate, Curve};
use crate::error::{MixError, Result, TargetFailure};
use crate::host::{ParameterBus, ParameterRef, Range};

pub type MappingId = Uuid;

/// Highest CC number and 7-bit value
pub const MIDI_MAX: u8 = 127;

/// A CC-to-parameter mapping
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MidiMapping {
    pub id: MappingId,
    pub target: ParameterRef,
    pub cc_number: u8,
    /// 1-16
    pub channel: u8,
    pub range: Range,
    pub curve: Curve,
}

impl MidiMapping {
    /// Parameter value for a 7-bit controller value
    pub fn map_value(&self, value_7bit: u8) -> Result<f64> {
        let progress = f64::from(value_7bit.min(MIDI_MAX)) / f64::from(MIDI_MAX);
        evaluate(&self.curve, progress, &self.range)
    }
}

/// Parameters of a new mapping
#[derive(Debug, Clone, PartialEq)]
pub struct MappingRequest {
    pub target: ParameterRef,
    pub cc_number: u8,
    pub channel: u8,
    /// Defaults to the parameter's native range
    pub range: Option<Range>,
    pub curve: Curve,
}

impl MappingRequest {
    pub fn new(target: ParameterRef, cc_number: u8, channel: u8) -> Self {
        Self {
            target,
            cc_number,
            channel,
            range: None,
            curve: Curve::Linear,
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
}

/// Result of dispatching one MIDI event
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MidiDispatch {
    /// Values actually written, after clamping
    pub written: Vec<(ParameterRef, f64)>,
    pub failures: Vec<TargetFailure>,
}

impl MidiDispatch {
    pub fn is_empty(&self) -> bool {
        self.written.is_empty() && self.failures.is_empty()
    }
}

#[derive(Default)]
struct MappingTable {
    mappings: HashMap<MappingId, MidiMapping>,
    /// (channel, cc) -> mappings in creation order
    index: HashMap<(u8, u8), Vec<MappingId>>,
}

/// Registry and dispatcher of CC mappings
pub struct MidiMapper {
    bus: Arc<ParameterBus>,
    table: RwLock<MappingTable>,
}

impl MidiMapper {
    pub fn new(bus: Arc<ParameterBus>) -> Self {
        Self {
            bus,
            table: RwLock::new(MappingTable::default()),
        }
    }

    /// Register a mapping
    ///
    /// # Errors
    /// `InvalidCcNumber`, `InvalidMidiChannel`, `UnknownTarget`,
    /// `UnsupportedCurve` for random walks, `InvalidRange` for curves the
    /// range cannot carry.
    pub fn map(&self, request: MappingRequest) -> Result<MidiMapping> {
        if request.cc_number > MIDI_MAX {
            return Err(MixError::InvalidCcNumber {
                cc_number: request.cc_number,
            });
        }
        if !(1..=16).contains(&request.channel) {
            return Err(MixError::InvalidMidiChannel {
                channel: request.channel,
            });
        }
        request.curve.ensure_stateless("MIDI mappings")?;

        let info = self.bus.read(request.target)?;
        let range = match request.range {
            Some(range) => range,
            None => info.range()?,
        };
        request.curve.validate(&range)?;

        let mapping = MidiMapping {
            id: Uuid::new_v4(),
            target: request.target,
            cc_number: request.cc_number,
            channel: request.channel,
            range,
            curve: request.curve,
        };

        let mut table = self.table.write();
        table
            .index
            .entry((mapping.channel, mapping.cc_number))
            .or_default()
            .push(mapping.id);
        table.mappings.insert(mapping.id, mapping.clone());

        info!(
            "[MIDI] CC{} ch{} -> {} ({}, {})",
            mapping.cc_number, mapping.channel, mapping.target, mapping.range, mapping.curve
        );
        Ok(mapping)
    }

    pub fn remove(&self, id: MappingId) -> Result<MidiMapping> {
        let mut table = self.table.write();
        let mapping = table
            .mappings
            .remove(&id)
            .ok_or(MixError::UnknownMapping { mapping_id: id })?;

        let key = (mapping.channel, mapping.cc_number);
        if let Some(ids) = table.index.get_mut(&key) {
            ids.retain(|m| *m != id);
            if ids.is_empty() {
                table.index.remove(&key);
            }
        }
        Ok(mapping)
    }

    pub fn get(&self, id: MappingId) -> Result<MidiMapping> {
        self.table
            .read()
            .mappings
            .get(&id)
            .cloned()
            .ok_or(MixError::UnknownMapping { mapping_id: id })
    }

    /// Every mapping, ordered by channel then CC number
    pub fn list(&self) -> Vec<MidiMapping> {
        let mut all: Vec<MidiMapping> = self.table.read().mappings.values().cloned().collect();
        all.sort_by_key(|m| (m.channel, m.cc_number));
        all
    }

    /// Apply a Control Change event
    ///
    /// # Arguments
    /// * `channel` - MIDI channel 1-16
    /// * `cc_number` - Controller number 0-127
    /// * `value_7bit` - Controller value 0-127; anything above is ignored
    pub fn on_midi_cc(&self, channel: u8, cc_number: u8, value_7bit: u8) -> MidiDispatch {
        let mut dispatch = MidiDispatch::default();
        if value_7bit > MIDI_MAX {
            return dispatch;
        }

        let matching: Vec<MidiMapping> = {
            let table = self.table.read();
            match table.index.get(&(channel, cc_number)) {
                Some(ids) => ids.iter().filter_map(|id| table.mappings.get(id).cloned()).collect(),
                None => return dispatch,
            }
        };

        for mapping in matching {
            let outcome = mapping
                .map_value(value_7bit)
                .and_then(|value| self.bus.write_runtime(mapping.target, value));
            match outcome {
                Ok(written) => dispatch.written.push((mapping.target, written)),
                Err(err) => {
                    warn!("[MIDI] CC{} ch{}: {}", cc_number, channel, err);
                    dispatch.failures.push(TargetFailure::new(mapping.target, &err));
                }
            }
        }

        debug!(
            "[MIDI] CC{} ch{} = {} -> {} writes",
            cc_number,
            channel,
            value_7bit,
            dispatch.written.len()
        );
        dispatch
    }

    /// Decode raw MIDI bytes and apply them if they form a Control Change
    ///
    /// Returns `None` for anything that is not a complete CC message.
    pub fn on_midi_message(&self, bytes: &[u8]) -> Option<MidiDispatch> {
        let (channel, cc_number, value) = decode_control_change(bytes)?;
        Some(self.on_midi_cc(channel, cc_number, value))
    }
}

/// (channel 1-16, cc, value) of a Control Change message
pub fn decode_control_change(bytes: &[u8]) -> Option<(u8, u8, u8)> {
    let (&status, data) = bytes.split_first()?;
    if status & 0xF0 != 0xB0 || data.len() < 2 {
        return None;
    }
    let (cc_number, value) = (data[0], data[1]);
    if cc_number > MIDI_MAX || value > MIDI_MAX {
        return None;
    }
    Some(((status & 0x0F) + 1, cc_number, value))
}
