//! FFT magnitude spectrum
//!
//! Mixes the window down to mono, takes the most recent `fft_size` frames
//! (zero-padded when the window is shorter), applies the window function
//! and runs a real FFT. Magnitudes are normalized by the window sum so a
//! full-scale sine centred on a bin reads 0 dBFS.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use realfft::RealFftPlanner;
use serde::{Deserialize, Serialize};

use super::window::{linear_to_db, AudioWindow};
use crate::config::FFT_SIZES;
use crate::error::{MixError, Result};

/// Window applied before the FFT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowFunction {
    #[default]
    Hann,
    Blackman,
    Hamming,
}

impl WindowFunction {
    /// Periodic window coefficients of length `size`
    pub fn coefficients(&self, size: usize) -> Vec<f64> {
        let n = size as f64;
        (0..size)
            .map(|i| {
                let x = 2.0 * std::f64::consts::PI * i as f64 / n;
                match self {
                    WindowFunction::Hann => 0.5 - 0.5 * x.cos(),
                    WindowFunction::Hamming => 0.54 - 0.46 * x.cos(),
                    WindowFunction::Blackman => 0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos(),
                }
            })
            .collect()
    }
}

impl fmt::Display for WindowFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowFunction::Hann => write!(f, "hann"),
            WindowFunction::Blackman => write!(f, "blackman"),
            WindowFunction::Hamming => write!(f, "hamming"),
        }
    }
}

impl FromStr for WindowFunction {
    type Err = MixError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "hann" | "hanning" => Ok(WindowFunction::Hann),
            "blackman" => Ok(WindowFunction::Blackman),
            "hamming" => Ok(WindowFunction::Hamming),
            other => Err(MixError::Config {
                reason: format!("unknown window function '{}'", other),
            }),
        }
    }
}

/// Magnitude spectrum of one window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpectrumReport {
    /// Bin centre frequencies in Hz, DC to Nyquist
    pub frequencies: Vec<f64>,
    /// Bin magnitudes in dBFS, same length as `frequencies`
    pub magnitudes_db: Vec<f64>,
    pub peak_frequency: f64,
    pub peak_magnitude: f64,
    /// Magnitude-weighted mean frequency in Hz (0 for silence)
    pub spectral_centroid: f64,
    pub fft_size: usize,
    pub window_function: WindowFunction,
    pub sample_rate: u32,
    pub timestamp: DateTime<Utc>,
}

/// Check that `fft_size` is a supported power of two
pub fn validate_fft_size(fft_size: usize) -> Result<()> {
    if FFT_SIZES.contains(&fft_size) {
        Ok(())
    } else {
        Err(MixError::InvalidFftSize { size: fft_size })
    }
}

/// Spectrum analyzer with a shared FFT planner
pub struct SpectrumAnalyzer {
    planner: Mutex<RealFftPlanner<f64>>,
    floor_db: f64,
}

impl SpectrumAnalyzer {
    pub fn new(floor_db: f64) -> Self {
        Self {
            planner: Mutex::new(RealFftPlanner::new()),
            floor_db,
        }
    }

    /// Analyze the most recent `fft_size` frames of a window
    pub fn analyze(
        &self,
        window: &AudioWindow,
        fft_size: usize,
        window_function: WindowFunction,
    ) -> Result<SpectrumReport> {
        validate_fft_size(fft_size)?;
        window.validate()?;

        let fft = self.planner.lock().plan_fft_forward(fft_size);

        let mono = window.mixdown();
        let start = mono.len().saturating_sub(fft_size);
        let recent = &mono[start..];

        let coefficients = window_function.coefficients(fft_size);
        let mut input = fft.make_input_vec();
        for (i, (slot, coeff)) in input.iter_mut().zip(&coefficients).enumerate() {
            *slot = recent.get(i).map_or(0.0, |&s| s as f64) * coeff;
        }

        let mut spectrum = fft.make_output_vec();
        fft.process(&mut input, &mut spectrum)
            .map_err(|e| MixError::InvalidAudio {
                reason: format!("FFT failed: {}", e),
            })?;

        let window_sum: f64 = coefficients.iter().sum();
        let normalization = 2.0 / window_sum;
        let last_bin = spectrum.len() - 1;
        let bin_width = window.sample_rate as f64 / fft_size as f64;

        let linear: Vec<f64> = spectrum
            .iter()
            .enumerate()
            .map(|(bin, value)| {
                let mag = value.norm() * normalization;
                // DC and Nyquist are not doubled
                if bin == 0 || bin == last_bin {
                    mag / 2.0
                } else {
                    mag
                }
            })
            .collect();

        let frequencies: Vec<f64> = (0..linear.len()).map(|bin| bin as f64 * bin_width).collect();
        let magnitudes_db: Vec<f64> = linear.iter().map(|&m| linear_to_db(m, self.floor_db)).collect();

        let (peak_bin, peak_magnitude) = magnitudes_db
            .iter()
            .copied()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (bin, db)| {
                if db > best.1 {
                    (bin, db)
                } else {
                    best
                }
            });

        let total: f64 = linear.iter().sum();
        let spectral_centroid = if total > 0.0 {
            frequencies.iter().zip(&linear).map(|(f, m)| f * m).sum::<f64>() / total
        } else {
            0.0
        };

        Ok(SpectrumReport {
            peak_frequency: frequencies[peak_bin],
            peak_magnitude,
            frequencies,
            magnitudes_db,
            spectral_centroid,
            fft_size,
            window_function,
            sample_rate: window.sample_rate,
            timestamp: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::window::FLOOR_DB;
    use approx::assert_abs_diff_eq;
    use test_case::test_case;

    #[test_case(512 ; "smallest")]
    #[test_case(2048 ; "default")]
    #[test_case(8192 ; "largest")]
    fn test_valid_fft_sizes(size: usize) {
        assert!(validate_fft_size(size).is_ok());
    }

    #[test_case(0)]
    #[test_case(256)]
    #[test_case(1000)]
    #[test_case(16384)]
    fn test_invalid_fft_sizes(size: usize) {
        assert!(matches!(
            validate_fft_size(size),
            Err(MixError::InvalidFftSize { .. })
        ));
    }

    #[test]
    fn test_peak_bin_of_centred_sine() {
        // bin 64 of a 2048-point FFT at 48kHz
        let frequency = 64.0 * 48000.0 / 2048.0;
        let window = AudioWindow::sine(frequency, 1.0, 1, 4096, 48000);
        let analyzer = SpectrumAnalyzer::new(FLOOR_DB);

        for function in [WindowFunction::Hann, WindowFunction::Blackman, WindowFunction::Hamming] {
            let report = analyzer.analyze(&window, 2048, function).unwrap();
            assert_eq!(report.frequencies.len(), 1025);
            assert_eq!(report.magnitudes_db.len(), 1025);
            assert_abs_diff_eq!(report.peak_frequency, frequency, epsilon = 1e-9);
            assert_abs_diff_eq!(report.peak_magnitude, 0.0, epsilon = 0.1);
            assert_abs_diff_eq!(report.spectral_centroid, frequency, epsilon = 50.0);
        }
    }

    #[test]
    fn test_short_window_is_zero_padded() {
        let window = AudioWindow::sine(1000.0, 0.5, 2, 300, 48000);
        let report = SpectrumAnalyzer::new(FLOOR_DB)
            .analyze(&window, 1024, WindowFunction::Hann)
            .unwrap();
        assert_eq!(report.magnitudes_db.len(), 513);
        assert!(report.magnitudes_db.iter().all(|m| m.is_finite()));
    }

    #[test]
    fn test_silence_reports_floor() {
        let window = AudioWindow::new(1, 2048, 48000);
        let report = SpectrumAnalyzer::new(FLOOR_DB)
            .analyze(&window, 2048, WindowFunction::Hann)
            .unwrap();
        assert!(report.magnitudes_db.iter().all(|&m| m == FLOOR_DB));
        assert_eq!(report.spectral_centroid, 0.0);
    }

    #[test]
    fn test_window_function_parse() {
        assert_eq!("Blackman".parse::<WindowFunction>().unwrap(), WindowFunction::Blackman);
        assert!("kaiser".parse::<WindowFunction>().is_err());
    }
}
