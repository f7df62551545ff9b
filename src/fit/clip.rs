//! Residual evaluation and the sigma-clip rule.
//!
//! Residuals are `observed − fitted`, per axis. A line is an outlier when its
//! residual strictly exceeds `sigma_clip` times the residual RMS of the
//! current active set; a residual exactly at the threshold is kept. All
//! outliers of a cycle are removed together.

use crate::config::ClipMetric;
use crate::line::DetectedLine;
use crate::polynomial::PolynomialCoefficientSet;

/// Combined RMS below this (pixels) means the surfaces pass through every
/// line; nothing is clipped.
pub const EXACT_FIT_RMS: f64 = 1e-6;

/// Residual of one line, `observed − fitted`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Residual {
    pub x: f64,
    pub y: f64,
}

impl Residual {
    /// Euclidean length `sqrt(x² + y²)`.
    pub fn combined(&self) -> f64 {
        self.x.hypot(self.y)
    }
}

/// Residuals of every line against the fitted surfaces.
pub fn residuals(coefficients: &PolynomialCoefficientSet, lines: &[DetectedLine]) -> Vec<Residual> {
    lines
        .iter()
        .map(|l| {
            let (fx, fy) = coefficients.evaluate(l.order, l.wavelength, l.slit_position);
            Residual {
                x: l.observed_x - fx,
                y: l.observed_y - fy,
            }
        })
        .collect()
}

/// Root-mean-square of a set of values; 0 for an empty set.
pub fn rms(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v * v, n + 1));
    if n == 0 {
        0.0
    } else {
        (sum / n as f64).sqrt()
    }
}

/// Per-axis RMS of a residual set, `(rms_x, rms_y)`.
pub fn residual_rms(residuals: &[Residual]) -> (f64, f64) {
    (
        rms(residuals.iter().map(|r| r.x)),
        rms(residuals.iter().map(|r| r.y)),
    )
}

/// Rejection thresholds for one clipping cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipThreshold {
    pub metric: ClipMetric,
    /// `sigma_clip · rms_x`
    pub x: f64,
    /// `sigma_clip · rms_y`
    pub y: f64,
    /// `sigma_clip · sqrt(rms_x² + rms_y²)`
    pub combined: f64,
    /// The fit is exact; no line is an outlier.
    pub exact: bool,
}

impl ClipThreshold {
    pub fn new(metric: ClipMetric, sigma_clip: f64, rms_x: f64, rms_y: f64) -> Self {
        let rms_xy = rms_x.hypot(rms_y);
        Self {
            metric,
            x: sigma_clip * rms_x,
            y: sigma_clip * rms_y,
            combined: sigma_clip * rms_xy,
            exact: rms_xy < EXACT_FIT_RMS,
        }
    }

    /// Whether a residual is strictly beyond the threshold.
    pub fn exceeds(&self, r: &Residual) -> bool {
        if self.exact {
            return false;
        }
        match self.metric {
            ClipMetric::Combined => r.combined() > self.combined,
            ClipMetric::PerAxis => r.x.abs() > self.x || r.y.abs() > self.y,
        }
    }
}

/// Indices of every residual beyond the threshold.
pub fn select_outliers(residuals: &[Residual], threshold: &ClipThreshold) -> Vec<usize> {
    residuals
        .iter()
        .enumerate()
        .filter(|(_, r)| threshold.exceeds(r))
        .map(|(i, _)| i)
        .collect()
}
