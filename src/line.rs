//! Predicted and detected calibration lines.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::detection::{DetectionFailure, LineCentroid};

/// An expected arc-line position, as listed in the predicted line catalogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictedLine {
    /// Echelle order number.
    pub order: u32,
    /// Wavelength in the catalogue's physical units (nm for the usual arc lists).
    pub wavelength: f64,
    /// Pinhole index along the slit, when the catalogue carries one.
    pub slit_index: Option<u32>,
    /// Position along the slit (arcsec). `None` for single-pinhole catalogues.
    pub slit_position: Option<f64>,
    /// Predicted detector column (pixels).
    pub predicted_x: f64,
    /// Predicted detector row (pixels).
    pub predicted_y: f64,
}

impl PredictedLine {
    pub fn key(&self) -> LineKey {
        LineKey {
            order: self.order,
            wavelength: self.wavelength,
            slit_position: self.slit_position,
        }
    }

    /// Same physical line, predicted somewhere else on the detector.
    pub fn moved_to(&self, x: f64, y: f64) -> Self {
        Self {
            predicted_x: x,
            predicted_y: y,
            ..self.clone()
        }
    }
}

/// Identity of a line: `(order, wavelength, slit_position)`.
///
/// Floats compare bitwise, so a key is only equal to keys built from the same
/// catalogue values.
#[derive(Debug, Clone, Copy)]
pub struct LineKey {
    pub order: u32,
    pub wavelength: f64,
    pub slit_position: Option<f64>,
}

impl LineKey {
    fn bits(&self) -> (u32, u64, Option<u64>) {
        (
            self.order,
            self.wavelength.to_bits(),
            self.slit_position.map(f64::to_bits),
        )
    }
}

impl PartialEq for LineKey {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for LineKey {}

impl Hash for LineKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
    }
}

impl std::fmt::Display for LineKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "order {} λ={}", self.order, self.wavelength)?;
        if let Some(s) = self.slit_position {
            write!(f, " slit={s}")?;
        }
        Ok(())
    }
}

/// Status of a line within a fitting run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineQuality {
    /// Detected and currently used by the fit.
    Good,
    /// Detected, then removed by sigma clipping. Never re-admitted.
    Rejected,
    /// No usable centroid could be measured.
    FailedDetection(DetectionFailure),
}

/// Measurement of one predicted line on the frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedLine {
    pub order: u32,
    pub wavelength: f64,
    pub slit_index: Option<u32>,
    pub slit_position: Option<f64>,
    /// Position the stamp was centred on.
    pub predicted_x: f64,
    pub predicted_y: f64,
    /// Sub-pixel centroid in frame coordinates. NaN when detection failed.
    pub observed_x: f64,
    pub observed_y: f64,
    /// Integrated Gaussian flux above background. 0 when detection failed.
    pub flux: f64,
    /// Fitted amplitude over stamp noise. 0 when detection failed.
    pub snr: f64,
    pub quality: LineQuality,
}

impl DetectedLine {
    /// Line whose centroid was measured.
    pub fn detected(line: &PredictedLine, centroid: &LineCentroid) -> Self {
        Self {
            observed_x: centroid.x,
            observed_y: centroid.y,
            flux: centroid.flux(),
            snr: centroid.snr(),
            quality: LineQuality::Good,
            ..Self::unmeasured(line)
        }
    }

    /// Line whose detection failed for `reason`.
    pub fn failed(line: &PredictedLine, reason: DetectionFailure) -> Self {
        Self {
            quality: LineQuality::FailedDetection(reason),
            ..Self::unmeasured(line)
        }
    }

    fn unmeasured(line: &PredictedLine) -> Self {
        Self {
            order: line.order,
            wavelength: line.wavelength,
            slit_index: line.slit_index,
            slit_position: line.slit_position,
            predicted_x: line.predicted_x,
            predicted_y: line.predicted_y,
            observed_x: f64::NAN,
            observed_y: f64::NAN,
            flux: 0.0,
            snr: 0.0,
            quality: LineQuality::Good,
        }
    }

    pub fn key(&self) -> LineKey {
        LineKey {
            order: self.order,
            wavelength: self.wavelength,
            slit_position: self.slit_position,
        }
    }

    pub fn is_good(&self) -> bool {
        self.quality == LineQuality::Good
    }

    pub fn is_detected(&self) -> bool {
        !matches!(self.quality, LineQuality::FailedDetection(_))
    }

    /// Slit coordinate used by the polynomial basis.
    pub fn slit_coordinate(&self) -> f64 {
        self.slit_position.unwrap_or(0.0)
    }
}
