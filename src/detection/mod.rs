//! Per-line detection: stamp → background → centroid.
//!
//! Every predicted line is measured independently, so the catalogue is
//! processed in parallel with rayon; the frame is shared read-only. A line
//! that cannot be measured comes back as a [`DetectedLine`] carrying a
//! [`DetectionFailure`] instead of aborting its siblings.

pub mod background;
pub mod gaussian;
pub mod stamp;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::DispersionFitConfig;
use crate::frame::CalibrationFrame;
use crate::line::{DetectedLine, PredictedLine};

use self::background::subtract_background;
use self::gaussian::fit_gaussian;
use self::stamp::Stamp;

/// Why a single line could not be measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum DetectionFailure {
    #[error("stamp lies entirely outside the frame")]
    StampOutOfBounds,
    #[error("too few valid pixels in the stamp")]
    TooFewValidPixels,
    #[error("centroid fit did not converge")]
    NotConverged,
    #[error("fitted centroid lies outside the stamp")]
    CentroidOutsideStamp,
    #[error("fitted amplitude is not positive")]
    NonPositiveAmplitude,
    #[error("fitted amplitude is consistent with noise")]
    BelowNoise,
    #[error("fitted width is implausible for a pinhole image")]
    ImplausibleWidth,
}

/// A measured line centroid in detector coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineCentroid {
    pub x: f64,
    pub y: f64,
    /// Peak height above the local background.
    pub amplitude: f64,
    /// Gaussian widths in pixels.
    pub sigma_x: f64,
    pub sigma_y: f64,
    /// Sigma-clipped median subtracted from the stamp.
    pub background: f64,
    /// Sigma-clipped standard deviation of the stamp.
    pub noise: f64,
}

impl LineCentroid {
    /// Integrated flux of the fitted Gaussian.
    pub fn flux(&self) -> f64 {
        2.0 * std::f64::consts::PI * self.amplitude * self.sigma_x * self.sigma_y
    }

    /// Amplitude over stamp noise; infinite for a noiseless stamp.
    pub fn snr(&self) -> f64 {
        if self.noise > 0.0 {
            self.amplitude / self.noise
        } else {
            f64::INFINITY
        }
    }
}

/// Measure one line on the frame.
pub fn measure_line(
    frame: &CalibrationFrame,
    line: &PredictedLine,
    config: &DispersionFitConfig,
) -> Result<LineCentroid, DetectionFailure> {
    let grid = frame.grid();
    let (px, py) = grid.to_pixel(line.predicted_x, line.predicted_y);
    let mut stamp = Stamp::extract(frame, px, py, config.win_x, config.win_y)?;
    let bg = subtract_background(&mut stamp, config.clipping_sigma, config.clipping_iterations);
    let fit = fit_gaussian(&stamp, &config.gaussian)?;

    if fit.amplitude <= config.detection_snr * bg.std_dev {
        return Err(DetectionFailure::BelowNoise);
    }

    let (x, y) = grid.to_detector(fit.x, fit.y);
    Ok(LineCentroid {
        x,
        y,
        amplitude: fit.amplitude,
        sigma_x: fit.sigma_x,
        sigma_y: fit.sigma_y,
        background: bg.median,
        noise: bg.std_dev,
    })
}

/// Measure every line, in parallel. The output is index-aligned with `lines`.
pub fn detect_lines(
    frame: &CalibrationFrame,
    lines: &[PredictedLine],
    config: &DispersionFitConfig,
) -> Vec<DetectedLine> {
    let detected: Vec<DetectedLine> = lines
        .par_iter()
        .map(|line| match measure_line(frame, line, config) {
            Ok(c) => DetectedLine::detected(line, &c),
            Err(reason) => DetectedLine::failed(line, reason),
        })
        .collect();

    let n_ok = detected.iter().filter(|d| d.is_detected()).count();
    debug!(
        "Detected {} of {} lines ({} failed)",
        n_ok,
        lines.len(),
        lines.len() - n_ok
    );
    detected
}

/// Number of failed detections per reason, in declaration order.
pub fn failure_breakdown(lines: &[DetectedLine]) -> Vec<(DetectionFailure, usize)> {
    use crate::line::LineQuality;
    const ALL: [DetectionFailure; 7] = [
        DetectionFailure::StampOutOfBounds,
        DetectionFailure::TooFewValidPixels,
        DetectionFailure::NotConverged,
        DetectionFailure::CentroidOutsideStamp,
        DetectionFailure::NonPositiveAmplitude,
        DetectionFailure::BelowNoise,
        DetectionFailure::ImplausibleWidth,
    ];
    ALL.iter()
        .map(|&reason| {
            let n = lines
                .iter()
                .filter(|l| l.quality == LineQuality::FailedDetection(reason))
                .count();
            (reason, n)
        })
        .filter(|&(_, n)| n > 0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelGrid;
    use crate::line::LineQuality;

    fn frame_with_lines(width: u32, height: u32, centres: &[(f64, f64)], bg: f32) -> CalibrationFrame {
        let mut data = vec![bg; (width * height) as usize];
        for row in 0..height {
            for col in 0..width {
                for &(x0, y0) in centres {
                    let dx = col as f64 - x0;
                    let dy = row as f64 - y0;
                    data[(row * width + col) as usize] +=
                        (800.0 * (-(dx * dx + dy * dy) / (2.0 * 1.5 * 1.5)).exp()) as f32;
                }
            }
        }
        CalibrationFrame::from_raw(width, height, data, None).unwrap()
    }

    fn predicted(order: u32, x: f64, y: f64) -> PredictedLine {
        PredictedLine {
            order,
            wavelength: 1.0,
            slit_index: None,
            slit_position: None,
            predicted_x: x,
            predicted_y: y,
        }
    }

    #[test]
    fn test_detect_mixed_outcomes() {
        let frame = frame_with_lines(80, 40, &[(20.2, 20.4), (60.7, 19.1)], 100.0);
        let lines = vec![
            predicted(1, 21.0, 20.0),
            predicted(2, 60.0, 20.0),
            predicted(3, 500.0, 20.0),
            // Nothing there: flat background.
            predicted(4, 40.0, 20.0),
        ];
        let detected = detect_lines(&frame, &lines, &DispersionFitConfig::default());
        assert_eq!(detected.len(), 4);

        assert_eq!(detected[0].quality, LineQuality::Good);
        assert!((detected[0].observed_x - 20.2).abs() < 0.01);
        assert!((detected[0].observed_y - 20.4).abs() < 0.01);
        assert_eq!(detected[1].quality, LineQuality::Good);
        assert!((detected[1].observed_x - 60.7).abs() < 0.01);

        assert_eq!(
            detected[2].quality,
            LineQuality::FailedDetection(DetectionFailure::StampOutOfBounds)
        );
        assert!(!detected[3].is_good());

        for (d, p) in detected.iter().zip(&lines) {
            assert_eq!(d.key(), p.key());
        }
        let breakdown = failure_breakdown(&detected);
        assert!(breakdown.contains(&(DetectionFailure::StampOutOfBounds, 1)));
    }

    #[test]
    fn test_far_off_prediction_fails_alone() {
        let frame = frame_with_lines(80, 40, &[(20.2, 20.4), (60.7, 19.1)], 100.0);
        let lines = vec![
            predicted(1, 21.0, 20.0),
            predicted(2, 1e20, 20.0),
            predicted(3, 60.0, 20.0),
            predicted(4, 40.0, -1e20),
        ];
        let detected = detect_lines(&frame, &lines, &DispersionFitConfig::default());
        assert_eq!(detected[0].quality, LineQuality::Good);
        assert_eq!(detected[2].quality, LineQuality::Good);
        for d in [&detected[1], &detected[3]] {
            assert_eq!(
                d.quality,
                LineQuality::FailedDetection(DetectionFailure::StampOutOfBounds)
            );
        }
    }

    #[test]
    fn test_width_floor_wider_than_stamp_fails_every_line() {
        let frame = frame_with_lines(80, 40, &[(20.2, 20.4), (60.7, 19.1)], 100.0);
        let lines = vec![predicted(1, 21.0, 20.0), predicted(2, 60.0, 20.0)];
        let mut config = DispersionFitConfig::default();
        config.gaussian.min_sigma = 30.0;
        let detected = detect_lines(&frame, &lines, &config);
        assert!(detected
            .iter()
            .all(|d| d.quality == LineQuality::FailedDetection(DetectionFailure::ImplausibleWidth)));
    }

    #[test]
    fn test_weak_line_below_noise() {
        // Alternating ±10 noise pattern with a faint bump on top.
        let (w, h) = (30u32, 30u32);
        let mut data: Vec<f32> = (0..w * h)
            .map(|i| if (i + i / w) % 2 == 0 { 90.0 } else { 110.0 })
            .collect();
        for row in 0..h {
            for col in 0..w {
                let dx = col as f64 - 15.0;
                let dy = row as f64 - 15.0;
                data[(row * w + col) as usize] += (20.0 * (-(dx * dx + dy * dy) / 4.5).exp()) as f32;
            }
        }
        let frame = CalibrationFrame::from_raw(w, h, data, None).unwrap();
        let result = measure_line(&frame, &predicted(1, 15.0, 15.0), &DispersionFitConfig::default());
        assert!(result.is_err(), "{result:?}");
    }

    #[test]
    fn test_detector_grid_is_applied() {
        let frame = frame_with_lines(40, 40, &[(20.0, 20.0)], 10.0)
            .with_grid(PixelGrid {
                origin_x: 1000.0,
                origin_y: 0.0,
                step_x: 2.0,
                step_y: 1.0,
            })
            .unwrap();
        let c = measure_line(&frame, &predicted(1, 1040.0, 20.0), &DispersionFitConfig::default()).unwrap();
        assert!((c.x - 1040.0).abs() < 0.01, "x = {}", c.x);
        assert!((c.y - 20.0).abs() < 0.01, "y = {}", c.y);
        assert!(c.background >= 10.0 - 1e-3 && c.background < 30.0);
        assert!(c.flux() > 0.0);
    }
}
