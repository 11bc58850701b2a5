//! Parameter recording
//!
//! Captures the values of a set of parameters on every tick for a fixed
//! duration. Recordings can be read while still capturing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::info;
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{MixError, Result};
use crate::host::{ParameterBus, ParameterRef};

pub type RecordingId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    Recording,
    Completed,
    Stopped,
}

/// One captured value
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    /// Milliseconds since the recording started
    pub time_ms: f64,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesStats {
    pub min: f64,
    pub max: f64,
    pub average: f64,
    #[serde(rename = "final")]
    pub final_value: f64,
    /// Number of samples that differ from the one before
    pub changes: usize,
}

/// Samples of one parameter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterSeries {
    pub param: ParameterRef,
    pub samples: Vec<Sample>,
    /// `None` until the first sample lands
    pub stats: Option<SeriesStats>,
}

impl ParameterSeries {
    fn new(param: ParameterRef) -> Self {
        Self {
            param,
            samples: Vec::new(),
            stats: None,
        }
    }

    fn push(&mut self, sample: Sample) {
        let changed = self
            .samples
            .last()
            .is_some_and(|previous| previous.value != sample.value);
        self.samples.push(sample);

        let count = self.samples.len() as f64;
        self.stats = Some(match self.stats {
            None => SeriesStats {
                min: sample.value,
                max: sample.value,
                average: sample.value,
                final_value: sample.value,
                changes: 0,
            },
            Some(stats) => SeriesStats {
                min: stats.min.min(sample.value),
                max: stats.max.max(sample.value),
                average: stats.average + (sample.value - stats.average) / count,
                final_value: sample.value,
                changes: stats.changes + usize::from(changed),
            },
        });
    }
}

/// A recording and everything captured so far
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recording {
    pub id: RecordingId,
    pub status: RecordingStatus,
    pub duration_ms: f64,
    pub series: Vec<ParameterSeries>,
    pub started_at: DateTime<Utc>,
    #[serde(skip)]
    start_time: Duration,
}

/// Captures parameter values over time
pub struct ParameterRecorder {
    bus: Arc<ParameterBus>,
    recordings: Mutex<HashMap<RecordingId, Recording>>,
}

impl ParameterRecorder {
    pub fn new(bus: Arc<ParameterBus>) -> Self {
        Self {
            bus,
            recordings: Mutex::new(HashMap::new()),
        }
    }

    /// Start capturing `params` for `duration` from `now`
    pub fn start(&self, params: &[ParameterRef], duration: Duration, now: Duration) -> Result<RecordingId> {
        if duration.is_zero() {
            return Err(MixError::InvalidDuration { duration_ms: 0.0 });
        }
        if params.is_empty() {
            return Err(MixError::Config {
                reason: "a recording needs at least one parameter".to_string(),
            });
        }
        for param in params {
            self.bus.read(*param)?;
        }

        let mut series: Vec<ParameterSeries> = Vec::with_capacity(params.len());
        for param in params {
            if !series.iter().any(|s| s.param == *param) {
                series.push(ParameterSeries::new(*param));
            }
        }

        let recording = Recording {
            id: Uuid::new_v4(),
            status: RecordingStatus::Recording,
            duration_ms: duration.as_secs_f64() * 1000.0,
            series,
            started_at: Utc::now(),
            start_time: now,
        };
        let id = recording.id;
        info!("[RECORDER] recording {} started on {} parameters", id, params.len());
        self.recordings.lock().insert(id, recording);
        Ok(id)
    }

    /// Capture one sample of every active recording
    pub fn sample(&self, now: Duration) {
        let mut recordings = self.recordings.lock();
        for recording in recordings.values_mut() {
            if recording.status != RecordingStatus::Recording {
                continue;
            }
            let Some(elapsed) = now.checked_sub(recording.start_time) else {
                continue;
            };
            let time_ms = elapsed.as_secs_f64() * 1000.0;
            if time_ms > recording.duration_ms {
                recording.status = RecordingStatus::Completed;
                info!("[RECORDER] recording {} completed", recording.id);
                continue;
            }
            if recording
                .series
                .first()
                .and_then(|s| s.samples.last())
                .is_some_and(|last| last.time_ms >= time_ms)
            {
                continue;
            }

            for series in recording.series.iter_mut() {
                // unresolvable parameters simply miss this sample
                if let Ok(info) = self.bus.read(series.param) {
                    series.push(Sample {
                        time_ms,
                        value: info.value,
                    });
                }
            }
            if time_ms >= recording.duration_ms {
                recording.status = RecordingStatus::Completed;
                info!("[RECORDER] recording {} completed", recording.id);
            }
        }
    }

    /// Stop a recording early
    pub fn stop(&self, id: RecordingId) -> Result<Recording> {
        let mut recordings = self.recordings.lock();
        let recording = recordings
            .get_mut(&id)
            .ok_or(MixError::UnknownRecording { recording_id: id })?;
        if recording.status == RecordingStatus::Recording {
            recording.status = RecordingStatus::Stopped;
        }
        Ok(recording.clone())
    }

    pub fn get(&self, id: RecordingId) -> Result<Recording> {
        self.recordings
            .lock()
            .get(&id)
            .cloned()
            .ok_or(MixError::UnknownRecording { recording_id: id })
    }

    /// Discard a recording
    pub fn remove(&self, id: RecordingId) -> Result<Recording> {
        self.recordings
            .lock()
            .remove(&id)
            .ok_or(MixError::UnknownRecording { recording_id: id })
    }

    pub fn stop_all(&self) {
        for recording in self.recordings.lock().values_mut() {
            if recording.status == RecordingStatus::Recording {
                recording.status = RecordingStatus::Stopped;
            }
        }
    }
}
