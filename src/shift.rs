//! Multi-pinhole shift estimation.
//!
//! A multi-pinhole frame is first registered against a single-pinhole
//! dispersion solution:
//!
//! 1. Evaluate the prior solution at every central-pinhole line
//! 2. Detect those lines on the multi-pinhole frame, starting from the
//!    prior positions
//! 3. Take the per-axis median of `observed − prior` as the global shift
//! 4. Move every other pinhole's predicted position by that shift; central
//!    lines move to their prior position plus the shift
//!
//! The pinhole-to-pinhole geometry of the mask is fixed, so one translation
//! registers the whole catalogue. The estimator is a pure function: it
//! returns a new catalogue and leaves its input untouched.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalogue::{is_central, LineCatalogue};
use crate::config::DispersionFitConfig;
use crate::detection::detect_lines;
use crate::error::{ConfigError, DispersionError, FailureContext, FitStage, Result};
use crate::frame::CalibrationFrame;
use crate::line::{DetectedLine, PredictedLine};
use crate::polynomial::{Mode, PolynomialCoefficientSet};

/// Fewer central detections than this make the shift fragile.
const FEW_SHIFT_LINES: usize = 3;

/// Global detector offset between the prior solution and the frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelShift {
    pub dx: f64,
    pub dy: f64,
    /// Central-pinhole lines the median was taken over.
    pub lines_used: usize,
}

/// Result of the shift estimation.
#[derive(Debug, Clone)]
pub struct ShiftEstimate {
    pub shift: PixelShift,
    /// Input catalogue with shifted predicted positions.
    pub catalogue: LineCatalogue,
    /// Central-pinhole measurements the shift was derived from.
    pub central_lines: Vec<DetectedLine>,
}

/// Register `catalogue` against `frame` using a single-pinhole `prior`.
pub fn estimate_shift(
    frame: &CalibrationFrame,
    catalogue: &LineCatalogue,
    prior: &PolynomialCoefficientSet,
    config: &DispersionFitConfig,
) -> Result<ShiftEstimate> {
    if prior.mode() != Mode::Single {
        return Err(ConfigError::PriorNotSinglePinhole.into());
    }
    let mid = config.mid_slit_index;

    let expected: Vec<PredictedLine> = catalogue
        .central_lines(mid)
        .into_iter()
        .map(|l| {
            let (x, y) = prior.evaluate(l.order, l.wavelength, None);
            l.moved_to(x, y)
        })
        .collect();
    debug!(
        "Measuring {} central-pinhole lines for the multi-pinhole shift",
        expected.len()
    );

    let central_lines = detect_lines(frame, &expected, config);
    let (dxs, dys): (Vec<f64>, Vec<f64>) = central_lines
        .iter()
        .filter(|d| d.is_detected())
        .map(|d| (d.observed_x - d.predicted_x, d.observed_y - d.predicted_y))
        .unzip();

    let (Some(dx), Some(dy)) = (median(&dxs), median(&dys)) else {
        return Err(DispersionError::InsufficientData {
            stage: FitStage::ShiftEstimation,
            available: 0,
            required: 1,
            context: FailureContext {
                failed_detections: central_lines.len(),
                ..Default::default()
            },
        });
    };

    let shift = PixelShift {
        dx,
        dy,
        lines_used: dxs.len(),
    };
    if shift.lines_used < FEW_SHIFT_LINES {
        warn!(
            "Multi-pinhole shift rests on only {} central-pinhole line(s)",
            shift.lines_used
        );
    }
    info!(
        "Multi-pinhole shift: dx={:.3} dy={:.3} px from {} of {} central lines",
        shift.dx,
        shift.dy,
        shift.lines_used,
        expected.len()
    );

    Ok(ShiftEstimate {
        shift,
        catalogue: apply_shift(catalogue, prior, &shift, mid),
        central_lines,
    })
}

/// Move every line of `catalogue` by `shift`.
///
/// Central lines are re-anchored on the prior solution first; the others keep
/// their catalogue prediction.
pub fn apply_shift(
    catalogue: &LineCatalogue,
    prior: &PolynomialCoefficientSet,
    shift: &PixelShift,
    mid_slit_index: Option<u32>,
) -> LineCatalogue {
    catalogue.with_positions(|l| {
        let (x, y) = if is_central(l, mid_slit_index) {
            prior.evaluate(l.order, l.wavelength, None)
        } else {
            (l.predicted_x, l.predicted_y)
        };
        (x + shift.dx, y + shift.dy)
    })
}

/// Median of a slice, `None` when empty.
fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut v = values.to_vec();
    v.sort_unstable_by(f64::total_cmp);
    let n = v.len();
    Some(if n % 2 == 0 {
        0.5 * (v[n / 2 - 1] + v[n / 2])
    } else {
        v[n / 2]
    })
}
