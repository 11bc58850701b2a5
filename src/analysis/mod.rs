//! Real-time signal analysis
//!
//! Read-only analysis over copied audio windows and routing snapshots:
//! - Levels: peak, RMS, loudness, true peak, balance
//! - Spectrum: windowed real FFT
//! - Feedback: routing cycles with excessive loop gain
//! - Latency: impulse round trip plus reported plugin latency

pub mod feedback;
pub mod latency;
pub mod levels;
pub mod spectrum;
pub mod window;

pub use feedback::{FeedbackDetector, FeedbackLoop, FeedbackReport, FeedbackRisk};
pub use latency::{LatencyEstimator, LatencyReport, PluginLatency};
pub use levels::{ChannelLevel, LevelMeter, LevelReport};
pub use spectrum::{validate_fft_size, SpectrumAnalyzer, SpectrumReport, WindowFunction};
pub use window::{db_to_linear, linear_to_db, AudioWindow, FLOOR_DB};
