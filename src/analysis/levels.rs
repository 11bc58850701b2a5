//! Level metering
//!
//! Sample peak and RMS come straight from the window. Loudness and true
//! peak use an EBU R128 meter: K-weighted gated loudness over the window,
//! and 4x oversampled peak detection for inter-sample peaks.
//!
//! Tap measurements cover the last `loudness_window_ms` of audio and are
//! kept in a bounded per-tap history.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use ebur128::{EbuR128, Mode};
use log::debug;
use parking_lot::Mutex;
use serde::Serialize;

use super::window::{linear_to_db, AudioWindow};
use crate::config::AnalysisConfig;
use crate::error::{MixError, Result};
use crate::host::{NodeId, PluginHost};

/// Peak and RMS of one channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChannelLevel {
    pub peak_db: f64,
    pub rms_db: f64,
}

/// Level measurement of one window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelReport {
    /// Tap the window came from, if measured through a host
    pub tap: Option<NodeId>,
    /// Highest sample peak across channels
    pub peak_db: f64,
    /// RMS across all channels
    pub rms_db: f64,
    /// Integrated loudness in LUFS
    pub lufs: f64,
    /// Oversampled peak in dBTP
    pub true_peak_db: f64,
    pub channels: Vec<ChannelLevel>,
    /// -1.0 (left) to +1.0 (right) from channel peaks; `None` unless stereo
    pub balance: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl LevelReport {
    /// True when any sample reached full scale
    pub fn is_clipping(&self) -> bool {
        self.peak_db >= 0.0
    }
}

/// Level meter with per-tap history
pub struct LevelMeter {
    config: AnalysisConfig,
    history: Mutex<HashMap<NodeId, VecDeque<LevelReport>>>,
}

impl LevelMeter {
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            config,
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Measure a window
    pub fn measure(&self, window: &AudioWindow) -> Result<LevelReport> {
        window.validate()?;
        let floor = self.config.floor_db;

        let channels: Vec<ChannelLevel> = (0..window.channels())
            .map(|ch| ChannelLevel {
                peak_db: linear_to_db(window.peak(ch), floor),
                rms_db: linear_to_db(window.rms(ch), floor),
            })
            .collect();

        let peak = (0..window.channels())
            .map(|ch| window.peak(ch))
            .fold(0.0_f64, f64::max);

        let mean_square = if window.is_empty() {
            0.0
        } else {
            (0..window.channels())
                .map(|ch| window.rms(ch).powi(2))
                .sum::<f64>()
                / window.channels() as f64
        };

        let (lufs, true_peak) = loudness(window)?;

        let balance = if window.channels() == 2 {
            let (left, right) = (window.peak(0), window.peak(1));
            Some(if left + right > 0.0 {
                (right - left) / (right + left)
            } else {
                0.0
            })
        } else {
            None
        };

        Ok(LevelReport {
            tap: None,
            peak_db: linear_to_db(peak, floor),
            rms_db: linear_to_db(mean_square.sqrt(), floor),
            lufs: if lufs.is_finite() { lufs.max(floor) } else { floor },
            true_peak_db: linear_to_db(true_peak, floor),
            channels,
            balance,
            timestamp: Utc::now(),
        })
    }

    /// Measure the recent audio at a tap and append it to the tap's history
    pub fn measure_tap(&self, host: &dyn PluginHost, tap: &NodeId) -> Result<LevelReport> {
        let frames = (self.config.loudness_window_ms as usize * host.sample_rate() as usize) / 1000;
        let window = host.get_audio_window(tap, frames.max(1))?;

        let mut report = self.measure(&window)?;
        report.tap = Some(tap.clone());

        debug!(
            "[LEVELS] {} peak {:.1} dB, rms {:.1} dB, {:.1} LUFS",
            tap, report.peak_db, report.rms_db, report.lufs
        );

        let mut history = self.history.lock();
        let ring = history.entry(tap.clone()).or_default();
        if ring.len() >= self.config.history_capacity {
            ring.pop_front();
        }
        ring.push_back(report.clone());

        Ok(report)
    }

    /// Past reports for a tap, oldest first
    pub fn history(&self, tap: &NodeId) -> Vec<LevelReport> {
        self.history
            .lock()
            .get(tap)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn clear_history(&self, tap: &NodeId) {
        self.history.lock().remove(tap);
    }
}

/// Integrated loudness (LUFS) and linear true peak of a window
fn loudness(window: &AudioWindow) -> Result<(f64, f64)> {
    let meter_error = |e: ebur128::Error| MixError::InvalidAudio {
        reason: format!("loudness meter: {:?}", e),
    };

    let mut meter = EbuR128::new(
        window.channels() as u32,
        window.sample_rate,
        Mode::I | Mode::TRUE_PEAK,
    )
    .map_err(meter_error)?;

    if !window.is_empty() {
        let planar: Vec<&[f32]> = window.samples.iter().map(Vec::as_slice).collect();
        meter.add_frames_planar_f32(&planar).map_err(meter_error)?;
    }

    let lufs = meter.loudness_global().map_err(meter_error)?;
    let mut true_peak = 0.0_f64;
    for ch in 0..window.channels() {
        true_peak = true_peak.max(meter.true_peak(ch as u32).map_err(meter_error)?);
    }

    Ok((lufs, true_peak))
}
