//! Parameter automation
//!
//! - `curve`: pure curve evaluation plus seeded random-walk state
//! - `run`: automation/morph requests, lifecycle and snapshots
//! - `scheduler`: the single owner of active runs
//! - `recorder`: parameter capture over time

pub mod curve;
pub mod recorder;
pub mod run;
pub mod scheduler;

pub use curve::{evaluate, preview, Curve, Keyframe, Keyframes, RandomWalker};
pub use recorder::{ParameterRecorder, ParameterSeries, Recording, RecordingId, RecordingStatus, SeriesStats};
pub use run::{
    duration_from_ms, AutomationRequest, CancelReason, ConflictingTarget, MorphRequest, RunId, RunKind,
    RunSnapshot, RunStatus, StartOutcome,
};
pub use scheduler::{AutomationScheduler, TickSummary};
