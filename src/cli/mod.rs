//! CLI Module
//!
//! Offline front end for the analysis and curve code: meter or analyze a
//! WAV file, preview a curve, scan an edge list for feedback loops and
//! print the effective configuration.

pub mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::analysis::WindowFunction;

/// Mixpilot - parameter automation and real-time analysis engine
#[derive(Parser, Debug)]
#[command(name = "mixpilot")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Print reports as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Configuration file (JSON); MIXPILOT_* variables apply on top
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Measure peak, RMS, loudness and true peak of a WAV file
    Levels {
        /// WAV file to meter
        path: PathBuf,
    },

    /// Spectrum of the last FFT frame of a WAV file
    Spectrum {
        /// WAV file to analyze
        path: PathBuf,

        /// FFT size (512, 1024, 2048, 4096 or 8192)
        #[arg(long)]
        fft_size: Option<usize>,

        /// Window function
        #[arg(long)]
        window: Option<WindowFunction>,

        /// Number of loudest bins to print
        #[arg(long, default_value_t = 5)]
        top: usize,
    },

    /// Preview the values a curve produces over a range
    Curve {
        kind: CurveKind,

        #[arg(long, allow_hyphen_values = true)]
        min: f64,

        #[arg(long, allow_hyphen_values = true)]
        max: f64,

        /// Number of evenly spaced points
        #[arg(long)]
        steps: Option<usize>,

        /// Sine cycles
        #[arg(long, default_value_t = 1)]
        cycles: u32,

        /// Random walk step, as a fraction of the range
        #[arg(long, default_value_t = 0.1)]
        step_size: f64,

        /// Random walk seed
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },

    /// Find feedback loops in a JSON list of routing edges
    Feedback {
        /// File holding `[{"source": "bus:a", "destination": "bus:b", "gain_db": -3.0}, ...]`
        path: PathBuf,

        /// Scales the threshold (0.0-1.0)
        #[arg(long)]
        sensitivity: Option<f64>,

        /// Loop gain threshold in dB
        #[arg(long, allow_hyphen_values = true)]
        threshold: Option<f64>,
    },

    /// Print the effective configuration
    Config {
        /// Write it to this file instead of stdout
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

/// Curve kinds selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CurveKind {
    Linear,
    Exponential,
    Logarithmic,
    Sine,
    RandomWalk,
}
