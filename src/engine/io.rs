//! WAV file I/O
//!
//! Offline analysis reads recorded taps from WAV files. Samples are
//! converted to 32-bit float and kept at the file's own sample rate.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use log::debug;

use crate::analysis::window::{AudioWindow, MAX_CHANNELS};
use crate::error::{MixError, Result};

/// Read a WAV file into an analysis window
///
/// # Arguments
/// * `path` - Path to the WAV file
///
/// # Errors
/// * `Io` - If the file does not exist
/// * `InvalidAudio` - If the file is not a readable WAV file, has an
///   unsupported bit depth or contains no frames
pub fn load_wav(path: &Path) -> Result<AudioWindow> {
    if !path.exists() {
        return Err(MixError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} not found", path.display()),
        )));
    }

    let reader = WavReader::open(path).map_err(|e| MixError::InvalidAudio {
        reason: format!("failed to open {}: {}", path.display(), e),
    })?;

    let spec = reader.spec();
    let channels = spec.channels as usize;
    if channels == 0 || channels > MAX_CHANNELS {
        return Err(MixError::InvalidAudio {
            reason: format!("{} channels (1-{} supported)", channels, MAX_CHANNELS),
        });
    }

    let interleaved = read_samples_as_f32(reader, spec.bits_per_sample, spec.sample_format)?;
    let window = AudioWindow::from_interleaved(&interleaved, channels, spec.sample_rate)?;
    if window.is_empty() {
        return Err(MixError::InvalidAudio {
            reason: format!("{} contains no audio", path.display()),
        });
    }

    debug!(
        "[IO] loaded {} ({} ch, {} Hz, {:.2}s)",
        path.display(),
        channels,
        spec.sample_rate,
        window.duration_secs()
    );
    Ok(window)
}

/// Write a window to a 32-bit float WAV file
pub fn write_wav(path: &Path, window: &AudioWindow) -> Result<()> {
    window.validate()?;
    let spec = WavSpec {
        channels: window.channels() as u16,
        sample_rate: window.sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };

    let mut writer = WavWriter::create(path, spec).map_err(hound_to_io)?;
    for sample in window.to_interleaved() {
        writer.write_sample(sample).map_err(hound_to_io)?;
    }
    writer.finalize().map_err(hound_to_io)?;
    Ok(())
}

// ============================================================================
// Internal helper functions
// ============================================================================

fn hound_to_io(e: hound::Error) -> MixError {
    match e {
        hound::Error::IoError(io) => MixError::Io(io),
        other => MixError::Io(std::io::Error::other(other.to_string())),
    }
}

fn read_samples_as_f32<R: std::io::Read>(
    mut reader: WavReader<R>,
    bits_per_sample: u16,
    sample_format: SampleFormat,
) -> Result<Vec<f32>> {
    let invalid = |e: hound::Error| MixError::InvalidAudio {
        reason: format!("failed to read {}-bit samples: {}", bits_per_sample, e),
    };

    match sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(invalid),
        SampleFormat::Int => {
            let scale = match bits_per_sample {
                8 => 128.0,
                16 => 32768.0,
                24 => 8388608.0,
                32 => 2147483648.0,
                _ => {
                    return Err(MixError::InvalidAudio {
                        reason: format!("{}-bit integer audio is not supported", bits_per_sample),
                    })
                }
            };
            // hound widens every integer depth to i32
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| (v as f64 / scale) as f32))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(invalid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    #[test]
    fn test_float_file_is_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let window = AudioWindow::sine(440.0, 0.5, 2, 4800, 44100);

        write_wav(&path, &window).unwrap();
        let loaded = load_wav(&path).unwrap();

        assert_eq!(loaded.channels(), 2);
        assert_eq!(loaded.len(), 4800);
        assert_eq!(loaded.sample_rate, 44100);
        assert_relative_eq!(loaded.peak(0), window.peak(0), epsilon = 1e-6);
    }

    #[test]
    fn test_16_bit_file_is_scaled() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("int.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 48000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for _ in 0..100 {
            writer.write_sample(-16384i16).unwrap();
        }
        writer.finalize().unwrap();

        let loaded = load_wav(&path).unwrap();
        assert_relative_eq!(loaded.channel(0)[0], -0.5);
    }

    #[test]
    fn test_missing_and_garbage_files() {
        let dir = tempdir().unwrap();
        assert!(matches!(load_wav(&dir.path().join("nope.wav")), Err(MixError::Io(_))));

        let garbage = dir.path().join("garbage.wav");
        std::fs::write(&garbage, b"not a wav file").unwrap();
        assert!(matches!(load_wav(&garbage), Err(MixError::InvalidAudio { .. })));
    }
}
