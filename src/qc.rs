//! Quality-control metrics of a dispersion solution.
//!
//! Detection statistics cover every catalogue line handed to the detector.
//! Residual statistics are taken over the lines the final fit kept, on the
//! absolute per-axis residuals and on the combined residual
//! `sqrt(rx² + ry²)`. Spreads are sample standard deviations.

use serde::{Deserialize, Serialize};

use crate::fit::clip::{residuals, Residual};
use crate::line::DetectedLine;
use crate::polynomial::PolynomialCoefficientSet;

/// Min / max / spread of one residual column, in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResidualSummary {
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
}

/// Quality-control record of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QcMetrics {
    /// Lines detected on the frame (`NLINE`).
    pub lines_detected: usize,
    /// Detected fraction of the catalogue lines searched (`PLINE`).
    pub detected_fraction: f64,
    /// `|residual_x|` (`XRESMIN`, `XRESMAX`, `XRESRMS`).
    pub residual_x: ResidualSummary,
    /// `|residual_y|` (`YRESMIN`, `YRESMAX`, `YRESRMS`).
    pub residual_y: ResidualSummary,
    /// Combined residual (`XYRESMIN`, `XYRESMAX`, `XYRESRMS`).
    pub residual_xy: ResidualSummary,
    pub residual_xy_mean: f64,
    pub residual_xy_median: f64,
}

impl QcMetrics {
    /// Metrics for a finished fit. `lines` is every line the detector was
    /// given, with its final quality.
    pub fn from_fit(coefficients: &PolynomialCoefficientSet, lines: &[DetectedLine]) -> Self {
        let searched = lines.len();
        let lines_detected = lines.iter().filter(|l| l.is_detected()).count();
        let detected_fraction = if searched == 0 {
            0.0
        } else {
            lines_detected as f64 / searched as f64
        };

        let kept: Vec<DetectedLine> = lines.iter().filter(|l| l.is_good()).cloned().collect();
        let res = residuals(coefficients, &kept);
        let abs_x: Vec<f64> = res.iter().map(|r| r.x.abs()).collect();
        let abs_y: Vec<f64> = res.iter().map(|r| r.y.abs()).collect();
        let xy: Vec<f64> = res.iter().map(Residual::combined).collect();

        Self {
            lines_detected,
            detected_fraction,
            residual_x: summarize(&abs_x),
            residual_y: summarize(&abs_y),
            residual_xy: summarize(&xy),
            residual_xy_mean: mean(&xy),
            residual_xy_median: median(&xy),
        }
    }
}

fn summarize(values: &[f64]) -> ResidualSummary {
    if values.is_empty() {
        return ResidualSummary::default();
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let std_dev = if values.len() < 2 {
        0.0
    } else {
        let m = mean(values);
        let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
        (ss / (values.len() - 1) as f64).sqrt()
    };
    ResidualSummary { min, max, std_dev }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut v = values.to_vec();
    v.sort_unstable_by(f64::total_cmp);
    let n = v.len();
    if n % 2 == 0 {
        0.5 * (v[n / 2 - 1] + v[n / 2])
    } else {
        v[n / 2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::DetectionFailure;
    use crate::line::{LineQuality, PredictedLine};
    use crate::polynomial::Basis;

    fn flat() -> PolynomialCoefficientSet {
        // X = 100, Y = 200 everywhere.
        let basis = Basis::Single {
            order_deg: 0,
            wavelength_deg: 0,
        };
        PolynomialCoefficientSet::new(basis, vec![100.0], vec![200.0]).unwrap()
    }

    fn line(wavelength: f64, dx: f64, dy: f64, quality: LineQuality) -> DetectedLine {
        DetectedLine {
            order: 1,
            wavelength,
            slit_index: None,
            slit_position: None,
            predicted_x: 100.0,
            predicted_y: 200.0,
            observed_x: 100.0 + dx,
            observed_y: 200.0 + dy,
            flux: 1.0,
            snr: 20.0,
            quality,
        }
    }

    #[test]
    fn test_metrics_use_kept_lines_only() {
        let lines = vec![
            line(1.0, 3.0, -4.0, LineQuality::Good),
            line(2.0, 0.0, 0.0, LineQuality::Good),
            line(3.0, -6.0, 8.0, LineQuality::Good),
            line(4.0, 50.0, 50.0, LineQuality::Rejected),
            DetectedLine::failed(
                &PredictedLine {
                    order: 1,
                    wavelength: 5.0,
                    slit_index: None,
                    slit_position: None,
                    predicted_x: 100.0,
                    predicted_y: 200.0,
                },
                DetectionFailure::BelowNoise,
            ),
        ];
        let qc = QcMetrics::from_fit(&flat(), &lines);

        assert_eq!(qc.lines_detected, 4);
        assert!((qc.detected_fraction - 0.8).abs() < 1e-12);

        assert_eq!((qc.residual_x.min, qc.residual_x.max), (0.0, 6.0));
        assert_eq!((qc.residual_y.min, qc.residual_y.max), (0.0, 8.0));
        assert_eq!((qc.residual_xy.min, qc.residual_xy.max), (0.0, 10.0));
        assert!((qc.residual_xy_mean - 5.0).abs() < 1e-12);
        assert!((qc.residual_xy_median - 5.0).abs() < 1e-12);
        // Sample std of {5, 0, 10}.
        assert!((qc.residual_xy.std_dev - 5.0).abs() < 1e-12);
        // Sample std of {3, 0, 6}.
        assert!((qc.residual_x.std_dev - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_input() {
        let qc = QcMetrics::from_fit(&flat(), &[]);
        assert_eq!(qc, QcMetrics::default());
    }
}
