//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::path::Path;

use log::info;
use serde::Serialize;

use crate::analysis::{FeedbackDetector, LevelMeter, SpectrumAnalyzer, WindowFunction};
use crate::automation::{preview, Curve};
use crate::cli::CurveKind;
use crate::config::EngineConfig;
use crate::engine::load_wav;
use crate::error::Result;
use crate::host::{Range, RoutingEdge};

/// Load the effective configuration: file (if any), then environment.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path),
        None => EngineConfig::from_env(),
    }
}

/// Meter a WAV file.
pub fn levels(config: &EngineConfig, path: &Path, json: bool) -> Result<()> {
    info!("Metering {}", path.display());
    let window = load_wav(path)?;
    let report = LevelMeter::new(config.analysis.clone()).measure(&window)?;

    if json {
        return print_json(&report);
    }

    println!("File:       {}", path.display());
    println!("Peak:       {:.2} dBFS", report.peak_db);
    println!("RMS:        {:.2} dBFS", report.rms_db);
    println!("Loudness:   {:.2} LUFS", report.lufs);
    println!("True peak:  {:.2} dBTP", report.true_peak_db);
    if let Some(balance) = report.balance {
        println!("Balance:    {:+.2}", balance);
    }
    for (i, channel) in report.channels.iter().enumerate() {
        println!(
            "  ch{}: peak {:.2} dBFS, rms {:.2} dBFS",
            i + 1,
            channel.peak_db,
            channel.rms_db
        );
    }
    if report.is_clipping() {
        println!("Clipping detected");
    }
    Ok(())
}

/// Analyze the spectrum of the last frame of a WAV file.
pub fn spectrum(
    config: &EngineConfig,
    path: &Path,
    fft_size: Option<usize>,
    window_function: Option<WindowFunction>,
    top: usize,
    json: bool,
) -> Result<()> {
    let fft_size = fft_size.unwrap_or(config.analysis.default_fft_size);
    let window_function = window_function.unwrap_or(config.analysis.default_window);
    info!("Analyzing {} ({} point {})", path.display(), fft_size, window_function);

    let window = load_wav(path)?;
    let report = SpectrumAnalyzer::new(config.analysis.floor_db).analyze(&window, fft_size, window_function)?;

    if json {
        return print_json(&report);
    }

    println!("File:      {}", path.display());
    println!("FFT:       {} points, {} window", report.fft_size, report.window_function);
    println!(
        "Peak:      {:.1} Hz at {:.2} dBFS",
        report.peak_frequency, report.peak_magnitude
    );
    println!("Centroid:  {:.1} Hz", report.spectral_centroid);

    let mut bins: Vec<(f64, f64)> = report
        .frequencies
        .iter()
        .copied()
        .zip(report.magnitudes_db.iter().copied())
        .collect();
    bins.sort_by(|a, b| b.1.total_cmp(&a.1));
    println!("Loudest bins:");
    for (frequency, magnitude) in bins.into_iter().take(top) {
        println!("  {:>10.1} Hz  {:>8.2} dB", frequency, magnitude);
    }
    Ok(())
}

/// Print the values a curve writes at evenly spaced progress points.
#[allow(clippy::too_many_arguments)]
pub fn curve(
    config: &EngineConfig,
    kind: CurveKind,
    min: f64,
    max: f64,
    steps: Option<usize>,
    cycles: u32,
    step_size: f64,
    seed: u64,
    json: bool,
) -> Result<()> {
    let range = Range::new(min, max)?;
    let curve = match kind {
        CurveKind::Linear => Curve::Linear,
        CurveKind::Exponential => Curve::Exponential,
        CurveKind::Logarithmic => Curve::Logarithmic,
        CurveKind::Sine => Curve::Sine { cycles },
        CurveKind::RandomWalk => Curve::RandomWalk { step_size, seed },
    };
    let steps = steps.unwrap_or(config.scheduler.preview_steps);
    let values = preview(&curve, &range, steps)?;

    if json {
        return print_json(&values);
    }

    println!("{} over [{}, {}]:", curve, range.min(), range.max());
    let last = steps.saturating_sub(1).max(1) as f64;
    for (i, value) in values.iter().enumerate() {
        println!("  {:>5.3}  {:.4}", i as f64 / last, value);
    }
    Ok(())
}

/// Scan a JSON edge list for feedback loops.
pub fn feedback(
    config: &EngineConfig,
    path: &Path,
    sensitivity: Option<f64>,
    threshold: Option<f64>,
    json: bool,
) -> Result<()> {
    let edges: Vec<RoutingEdge> = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    info!("Scanning {} edges from {}", edges.len(), path.display());

    let detector = FeedbackDetector::new(config.feedback.clone());
    let threshold = threshold.unwrap_or(config.feedback.threshold_db);
    let report = detector.detect(&edges, threshold, sensitivity)?;

    if json {
        return print_json(&report);
    }

    println!(
        "{} edges, {} cycles examined, effective threshold {:.2} dB",
        report.edges_analyzed, report.cycles_examined, report.effective_threshold_db
    );
    if !report.has_feedback() {
        println!("No feedback loops found.");
        return Ok(());
    }
    for feedback_loop in &report.loops {
        let path: Vec<String> = feedback_loop.nodes().iter().map(|n| n.to_string()).collect();
        println!(
            "  [{:?}] {:+.2} dB: {} -> {}",
            feedback_loop.risk,
            feedback_loop.net_gain_db,
            path.join(" -> "),
            path[0]
        );
    }
    if report.truncated {
        println!("(search stopped after {} cycles)", config.feedback.max_cycles);
    }
    Ok(())
}

/// Print or save the effective configuration.
pub fn show_config(config: &EngineConfig, file: Option<&Path>) -> Result<()> {
    let rendered = serde_json::to_string_pretty(config)?;
    match file {
        Some(path) => {
            std::fs::write(path, rendered)?;
            println!("Configuration written: {}", path.display());
        }
        None => println!("{}", rendered),
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_round_trips_through_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = EngineConfig::default();

        show_config(&config, Some(&path)).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_feedback_rejects_bad_edges() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("edges.json");
        std::fs::write(&path, r#"[{"source": "nowhere", "destination": "bus:a"}]"#).unwrap();
        assert!(feedback(&EngineConfig::default(), &path, None, None, true).is_err());
    }

    #[test]
    fn test_curve_rejects_inverted_range() {
        let config = EngineConfig::default();
        assert!(curve(&config, CurveKind::Linear, 1.0, 0.0, None, 1, 0.1, 0, true).is_err());
    }
}
