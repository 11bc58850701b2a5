//! Curve Evaluator
//!
//! Maps progress in [0, 1] onto a value range. Every curve kind is a
//! variant of `Curve` with its own arm in `interpolate`; adding a kind is
//! a compile-time change.
//!
//! `RandomWalk` is the only stateful kind. Runs own a seeded
//! `RandomWalker`; the free `evaluate` function treats a walk as a single
//! step from the range midpoint.

use std::f64::consts::PI;
use std::fmt;

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{MixError, Result};
use crate::host::Range;

// ============================================================================
// Curve
// ============================================================================

fn default_cycles() -> u32 {
    1
}

/// Shape of a parameter change over time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Curve {
    /// `min + p * (max - min)`
    Linear,
    /// `min * (max / min)^p`, requires a strictly positive range
    Exponential,
    /// `min + (max - min) * log10(1 + 9p)`
    Logarithmic,
    /// Half-cosine rise, repeated `cycles` times over the run
    Sine {
        #[serde(default = "default_cycles")]
        cycles: u32,
    },
    /// Bounded random motion, deterministic for a given seed
    RandomWalk { step_size: f64, seed: u64 },
}

impl Curve {
    pub fn sine() -> Self {
        Curve::Sine { cycles: 1 }
    }

    /// Lowercase name used in errors and the CLI
    pub fn name(&self) -> &'static str {
        match self {
            Curve::Linear => "linear",
            Curve::Exponential => "exponential",
            Curve::Logarithmic => "logarithmic",
            Curve::Sine { .. } => "sine",
            Curve::RandomWalk { .. } => "random_walk",
        }
    }

    /// Whether the curve's output depends only on progress and range
    pub fn is_stateless(&self) -> bool {
        !matches!(self, Curve::RandomWalk { .. })
    }

    /// Reject stateful curves where only instantaneous evaluation happens
    pub fn ensure_stateless(&self, context: &str) -> Result<()> {
        if self.is_stateless() {
            Ok(())
        } else {
            Err(MixError::UnsupportedCurve {
                curve: self.name().to_string(),
                context: context.to_string(),
            })
        }
    }

    /// Check the curve's own parameters and its compatibility with `range`
    pub fn validate(&self, range: &Range) -> Result<()> {
        match self {
            Curve::Exponential if range.min() <= 0.0 => Err(MixError::invalid_range(
                range.min(),
                range.max(),
                "exponential curves need a strictly positive minimum",
            )),
            Curve::Sine { cycles: 0 } => Err(MixError::InvalidCurve {
                reason: "sine curves need at least one cycle".to_string(),
            }),
            Curve::RandomWalk { step_size, .. } if !(step_size.is_finite() && *step_size > 0.0) => {
                Err(MixError::InvalidCurve {
                    reason: format!("random walk step size {} must be positive", step_size),
                })
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Curve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Curve::Sine { cycles } if *cycles != 1 => write!(f, "sine x{}", cycles),
            Curve::RandomWalk { step_size, seed } => {
                write!(f, "random_walk(step {}, seed {})", step_size, seed)
            }
            other => write!(f, "{}", other.name()),
        }
    }
}

/// Evaluate a curve at `progress` over `range`
///
/// Progress is clamped to [0, 1]; the result always lies within the range,
/// with `progress == 0` and `progress == 1` landing exactly on the bounds
/// for every deterministic curve.
pub fn evaluate(curve: &Curve, progress: f64, range: &Range) -> Result<f64> {
    curve.validate(range)?;
    if let Curve::RandomWalk { step_size, seed } = curve {
        let mut rng = ChaCha8Rng::seed_from_u64(*seed);
        let step = random_step(&mut rng, *step_size);
        return Ok(range.clamp(range.midpoint() + step));
    }
    let value = interpolate(curve, clamp_progress(progress), range.min(), range.max())?;
    Ok(range.clamp(value))
}

/// Values at `steps` evenly spaced progress points from 0 to 1
pub fn preview(curve: &Curve, range: &Range, steps: usize) -> Result<Vec<f64>> {
    progress_points(steps)
        .map(|p| evaluate(curve, p, range))
        .collect()
}

/// Evenly spaced progress points covering 0 and 1
pub(crate) fn progress_points(steps: usize) -> impl Iterator<Item = f64> {
    let denominator = steps.saturating_sub(1).max(1) as f64;
    (0..steps).map(move |i| (i as f64 / denominator).min(1.0))
}

fn clamp_progress(progress: f64) -> f64 {
    if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 1.0)
    }
}

/// Move from `from` to `to` along a deterministic curve
///
/// `from` may be above `to` (falling keyframe segments).
fn interpolate(curve: &Curve, progress: f64, from: f64, to: f64) -> Result<f64> {
    if progress <= 0.0 {
        return Ok(from);
    }
    if progress >= 1.0 && !matches!(curve, Curve::Sine { cycles } if *cycles > 1) {
        return Ok(to);
    }

    let value = match curve {
        Curve::Linear | Curve::RandomWalk { .. } => from + progress * (to - from),
        Curve::Exponential => {
            if from <= 0.0 || to <= 0.0 {
                return Err(MixError::invalid_range(
                    from.min(to),
                    from.max(to),
                    "exponential curves need strictly positive values",
                ));
            }
            from * (to / from).powf(progress)
        }
        Curve::Logarithmic => from + (to - from) * (1.0 + progress * 9.0).log10(),
        Curve::Sine { cycles } => {
            let scaled = progress * f64::from(*cycles);
            // each cycle restarts at `from`; the final point finishes the last rise
            let local = if scaled >= f64::from(*cycles) {
                1.0
            } else {
                scaled.fract()
            };
            from + (to - from) * (0.5 - 0.5 * (local * PI).cos())
        }
    };
    Ok(value)
}

// ============================================================================
// Keyframes
// ============================================================================

/// A (progress, value) pair in a keyframed automation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    pub progress: f64,
    pub value: f64,
}

impl Keyframe {
    pub fn new(progress: f64, value: f64) -> Self {
        Self { progress, value }
    }
}

/// Validated keyframes sorted by progress
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Keyframes(Vec<Keyframe>);

impl Keyframes {
    /// Sort and validate keyframes against the target range
    pub fn new(mut points: Vec<Keyframe>, range: &Range) -> Result<Self> {
        if points.is_empty() {
            return Err(invalid_keyframes("at least one keyframe is required"));
        }
        for point in &points {
            if !point.progress.is_finite() || !(0.0..=1.0).contains(&point.progress) {
                return Err(invalid_keyframes(format!(
                    "progress {} is outside 0.0-1.0",
                    point.progress
                )));
            }
            if !point.value.is_finite() || !range.contains(point.value) {
                return Err(invalid_keyframes(format!(
                    "value {} is outside {}",
                    point.value, range
                )));
            }
        }

        points.sort_by(|a, b| a.progress.total_cmp(&b.progress));
        if points.windows(2).any(|w| w[0].progress == w[1].progress) {
            return Err(invalid_keyframes("two keyframes share the same progress"));
        }
        Ok(Self(points))
    }

    pub fn points(&self) -> &[Keyframe] {
        &self.0
    }

    /// Check that `curve` can run between every pair of keyframes
    pub fn check_curve(&self, curve: &Curve) -> Result<()> {
        match curve {
            Curve::RandomWalk { .. } => Err(invalid_keyframes(
                "random walk curves cannot follow keyframes",
            )),
            Curve::Exponential if self.0.iter().any(|k| k.value <= 0.0) => {
                Err(MixError::invalid_range(
                    self.0.iter().map(|k| k.value).fold(f64::INFINITY, f64::min),
                    self.0.iter().map(|k| k.value).fold(f64::NEG_INFINITY, f64::max),
                    "exponential curves need strictly positive keyframe values",
                ))
            }
            _ => Ok(()),
        }
    }

    /// Value at `progress`: the bounding segment's curve at segment-local
    /// progress, holding the first/last value outside the keyframed span
    pub fn evaluate(&self, curve: &Curve, progress: f64, range: &Range) -> Result<f64> {
        let progress = clamp_progress(progress);
        let points = &self.0;
        let first = points[0];
        let last = points[points.len() - 1];

        if progress <= first.progress {
            return Ok(range.clamp(first.value));
        }
        if progress >= last.progress {
            return Ok(range.clamp(last.value));
        }

        let upper = points
            .iter()
            .position(|k| k.progress > progress)
            .unwrap_or(points.len() - 1);
        let (a, b) = (points[upper - 1], points[upper]);
        let local = (progress - a.progress) / (b.progress - a.progress);
        Ok(range.clamp(interpolate(curve, local, a.value, b.value)?))
    }
}

fn invalid_keyframes(reason: impl Into<String>) -> MixError {
    MixError::InvalidKeyframes {
        reason: reason.into(),
    }
}

// ============================================================================
// Random walk state
// ============================================================================

/// Seeded random-walk state owned by one run
///
/// Steps only when progress strictly increases, so re-evaluating the same
/// progress returns the cached value.
#[derive(Debug, Clone)]
pub struct RandomWalker {
    rng: ChaCha8Rng,
    step_size: f64,
    range: Range,
    value: f64,
    last_progress: f64,
}

impl RandomWalker {
    /// Start a walk at `start` (clamped into the range)
    pub fn new(step_size: f64, seed: u64, range: Range, start: f64) -> Result<Self> {
        Curve::RandomWalk { step_size, seed }.validate(&range)?;
        Ok(Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            step_size,
            range,
            value: range.clamp(start),
            last_progress: 0.0,
        })
    }

    /// Value at `progress`, taking one step if progress moved forward
    pub fn advance(&mut self, progress: f64) -> f64 {
        let progress = clamp_progress(progress);
        if progress > self.last_progress {
            let step = random_step(&mut self.rng, self.step_size);
            self.value = self.range.clamp(self.value + step);
            self.last_progress = progress;
        }
        self.value
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

/// Uniform step in [-step_size, step_size)
///
/// Scales a unit sample so a step size near `f64::MAX` never forms an
/// infinite span.
fn random_step(rng: &mut ChaCha8Rng, step_size: f64) -> f64 {
    (rng.random::<f64>() * 2.0 - 1.0) * step_size
}
