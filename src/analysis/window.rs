//! Audio Window
//!
//! A copied snapshot of recent audio from a tap. Analysis always runs over
//! one of these, never over a buffer the audio path is still writing.

use crate::error::{MixError, Result};

// ============================================================================
// Constants
// ============================================================================

/// Level reported for silence instead of -inf
pub const FLOOR_DB: f64 = -144.0;

/// Largest channel count accepted in a window
pub const MAX_CHANNELS: usize = 32;

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert decibels to linear amplitude
///
/// # Arguments
/// * `db` - Value in decibels
#[inline]
pub fn db_to_linear(db: f64) -> f64 {
    10.0_f64.powf(db / 20.0)
}

/// Convert linear amplitude to decibels, never going below `floor_db`
///
/// # Arguments
/// * `linear` - Linear amplitude value
/// * `floor_db` - Sentinel returned for silence or non-finite results
///
/// # Returns
/// Value in decibels. Zero, negative and NaN inputs map to `floor_db`.
#[inline]
pub fn linear_to_db(linear: f64, floor_db: f64) -> f64 {
    if linear.is_nan() || linear <= 0.0 {
        return floor_db;
    }
    let db = 20.0 * linear.log10();
    if db.is_finite() {
        db.max(floor_db)
    } else {
        floor_db
    }
}

// ============================================================================
// Audio Window
// ============================================================================

/// Non-interleaved 32-bit float audio captured from a tap
///
/// # Example
/// ```
/// use mixpilot::analysis::AudioWindow;
///
/// let window = AudioWindow::from_interleaved(&[0.5, -0.5, 0.25, -0.25], 2, 48000).unwrap();
/// assert_eq!(window.channels(), 2);
/// assert_eq!(window.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AudioWindow {
    /// Sample data: outer Vec is channels, inner Vec is samples
    pub samples: Vec<Vec<f32>>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioWindow {
    /// Silent window with the given shape
    pub fn new(channels: usize, frames: usize, sample_rate: u32) -> Self {
        Self {
            samples: vec![vec![0.0_f32; frames]; channels],
            sample_rate,
        }
    }

    /// Build from per-channel sample vectors
    ///
    /// Fails with `InvalidAudio` when channels differ in length or the
    /// channel count or sample rate is unusable.
    pub fn from_channels(samples: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        let window = Self {
            samples,
            sample_rate,
        };
        window.validate()?;
        Ok(window)
    }

    /// Build from interleaved sample data
    ///
    /// # Arguments
    /// * `interleaved` - Interleaved sample data (L, R, L, R, ... for stereo)
    /// * `channels` - Number of interleaved channels
    /// * `sample_rate` - Sample rate in Hz
    pub fn from_interleaved(interleaved: &[f32], channels: usize, sample_rate: u32) -> Result<Self> {
        if channels == 0 || channels > MAX_CHANNELS {
            return Err(MixError::InvalidAudio {
                reason: format!("channel count {} is outside 1-{}", channels, MAX_CHANNELS),
            });
        }

        if interleaved.len() % channels != 0 {
            return Err(MixError::InvalidAudio {
                reason: format!(
                    "Interleaved data length {} is not divisible by channel count {}",
                    interleaved.len(),
                    channels
                ),
            });
        }

        let frames = interleaved.len() / channels;
        let mut samples = vec![Vec::with_capacity(frames); channels];
        for frame in interleaved.chunks_exact(channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                samples[ch].push(sample);
            }
        }

        Self::from_channels(samples, sample_rate)
    }

    /// Full-scale-relative sine test window
    pub fn sine(frequency: f64, amplitude: f32, channels: usize, frames: usize, sample_rate: u32) -> Self {
        let channel: Vec<f32> = (0..frames)
            .map(|i| {
                let t = i as f64 / sample_rate as f64;
                amplitude * (2.0 * std::f64::consts::PI * frequency * t).sin() as f32
            })
            .collect();
        Self {
            samples: vec![channel; channels],
            sample_rate,
        }
    }

    /// Convert the window to interleaved format
    pub fn to_interleaved(&self) -> Vec<f32> {
        let num_channels = self.channels();
        let num_samples = self.len();

        let mut interleaved = Vec::with_capacity(num_channels * num_samples);
        for sample_idx in 0..num_samples {
            for channel in &self.samples {
                interleaved.push(channel[sample_idx]);
            }
        }
        interleaved
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.samples.len()
    }

    /// Number of frames per channel
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.first().map_or(0, Vec::len)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.len() as f64 / self.sample_rate as f64
    }

    /// Samples of one channel (empty slice if out of range)
    pub fn channel(&self, index: usize) -> &[f32] {
        self.samples.get(index).map_or(&[], Vec::as_slice)
    }

    /// Average of all channels
    pub fn mixdown(&self) -> Vec<f32> {
        let channels = self.channels();
        if channels == 0 {
            return Vec::new();
        }
        let scale = 1.0 / channels as f32;
        (0..self.len())
            .map(|i| self.samples.iter().map(|ch| ch[i]).sum::<f32>() * scale)
            .collect()
    }

    /// The last `frames` frames of the window
    pub fn tail(&self, frames: usize) -> Self {
        let start = self.len().saturating_sub(frames);
        Self {
            samples: self.samples.iter().map(|ch| ch[start..].to_vec()).collect(),
            sample_rate: self.sample_rate,
        }
    }

    /// Linear peak of one channel
    pub fn peak(&self, channel: usize) -> f64 {
        self.channel(channel)
            .iter()
            .map(|s| s.abs() as f64)
            .fold(0.0_f64, f64::max)
    }

    /// Linear RMS of one channel
    pub fn rms(&self, channel: usize) -> f64 {
        let samples = self.channel(channel);
        if samples.is_empty() {
            return 0.0;
        }
        let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        (sum_squares / samples.len() as f64).sqrt()
    }

    /// Check shape, sample rate and sample values
    pub fn validate(&self) -> Result<()> {
        if self.samples.is_empty() || self.channels() > MAX_CHANNELS {
            return Err(MixError::InvalidAudio {
                reason: format!("channel count {} is outside 1-{}", self.channels(), MAX_CHANNELS),
            });
        }
        if self.sample_rate == 0 {
            return Err(MixError::InvalidAudio {
                reason: "sample rate must be positive".to_string(),
            });
        }
        let frames = self.len();
        if self.samples.iter().any(|ch| ch.len() != frames) {
            return Err(MixError::InvalidAudio {
                reason: "channels have different lengths".to_string(),
            });
        }
        if self.samples.iter().flatten().any(|s| !s.is_finite()) {
            return Err(MixError::InvalidAudio {
                reason: "window contains NaN or infinite samples".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_db_conversion() {
        assert_relative_eq!(db_to_linear(0.0), 1.0);
        assert_relative_eq!(db_to_linear(-6.0), 0.501187, epsilon = 1e-5);
        assert_relative_eq!(linear_to_db(1.0, FLOOR_DB), 0.0);
        assert_eq!(linear_to_db(0.0, FLOOR_DB), FLOOR_DB);
        assert_eq!(linear_to_db(f64::NAN, FLOOR_DB), FLOOR_DB);
        assert_eq!(linear_to_db(1e-12, FLOOR_DB), FLOOR_DB);
    }

    #[test]
    fn test_interleave_roundtrip() {
        let data = vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6];
        let window = AudioWindow::from_interleaved(&data, 2, 48000).unwrap();
        assert_eq!(window.channel(0), &[0.1, 0.3, 0.5]);
        assert_eq!(window.channel(1), &[0.2, 0.4, 0.6]);
        assert_eq!(window.to_interleaved(), data);
    }

    #[test]
    fn test_interleaved_length_mismatch() {
        assert!(AudioWindow::from_interleaved(&[0.0, 0.0, 0.0], 2, 48000).is_err());
        assert!(AudioWindow::from_interleaved(&[0.0], 0, 48000).is_err());
    }

    #[test]
    fn test_validate_rejects_ragged_and_nan() {
        assert!(AudioWindow::from_channels(vec![vec![0.0; 4], vec![0.0; 3]], 48000).is_err());
        assert!(AudioWindow::from_channels(vec![vec![f32::NAN]], 48000).is_err());
        assert!(AudioWindow::from_channels(vec![vec![0.0]], 0).is_err());
    }

    #[test]
    fn test_peak_and_rms_of_sine() {
        let window = AudioWindow::sine(1000.0, 1.0, 1, 48000, 48000);
        assert_relative_eq!(window.peak(0), 1.0, epsilon = 1e-3);
        assert_relative_eq!(window.rms(0), std::f64::consts::FRAC_1_SQRT_2, epsilon = 1e-3);
    }

    #[test]
    fn test_tail_and_mixdown() {
        let window =
            AudioWindow::from_channels(vec![vec![1.0, 2.0, 3.0], vec![3.0, 2.0, 1.0]], 48000).unwrap();
        assert_eq!(window.tail(2).channel(0), &[2.0, 3.0]);
        assert_eq!(window.tail(10).len(), 3);
        assert_eq!(window.mixdown(), vec![2.0, 2.0, 2.0]);
    }
}
