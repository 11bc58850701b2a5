//! Instantaneous parameter control
//!
//! Writers that apply values immediately rather than over time: MIDI CC
//! mappings, macros and direct get/set/randomize.

pub mod direct;
pub mod macros;
pub mod midi;

pub use direct::{DirectControl, ParameterChange, RandomizeReport};
pub use macros::{Macro, MacroEngine, MacroId, MacroReport, MacroTarget, MacroTargetSpec, DEFAULT_MACRO_VALUE};
pub use midi::{decode_control_change, MappingId, MappingRequest, MidiDispatch, MidiMapper, MidiMapping};
