//! Error taxonomy for the dispersion-map fitting engine.
//!
//! Only run-level failures are errors. Per-line detection problems are
//! recorded as [`DetectionFailure`](crate::detection::DetectionFailure)
//! values on the affected line, and an iteration budget that runs out while
//! lines are still being clipped is reported through
//! [`Convergence::IterationLimit`](crate::fit::Convergence) instead.

use std::fmt;

use thiserror::Error;

/// Stage of a run at which a fatal error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStage {
    /// Catalogue checked against the design-matrix size before any detection.
    Catalogue,
    /// Central-pinhole lines measured to derive the multi-pinhole shift.
    ShiftEstimation,
    /// Lines surviving detection, before the first fit.
    Detection,
    /// Least-squares solve inside the iteration controller.
    Fitting,
    /// Lines surviving a sigma-clip cycle.
    Clipping,
}

impl fmt::Display for FitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FitStage::Catalogue => "catalogue load",
            FitStage::ShiftEstimation => "shift estimation",
            FitStage::Detection => "line detection",
            FitStage::Fitting => "fitting",
            FitStage::Clipping => "clipping",
        };
        f.write_str(name)
    }
}

/// Snapshot of the run attached to fatal errors so they can be diagnosed
/// without rerunning.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FailureContext {
    /// Controller iteration at which the failure happened (0 = before the first fit).
    pub iteration: u32,
    pub active_lines: usize,
    pub rejected_lines: usize,
    pub failed_detections: usize,
    pub last_rms_x: Option<f64>,
    pub last_rms_y: Option<f64>,
}

impl fmt::Display for FailureContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "iteration {}, {} active, {} rejected, {} failed detections",
            self.iteration, self.active_lines, self.rejected_lines, self.failed_detections
        )?;
        if let (Some(rx), Some(ry)) = (self.last_rms_x, self.last_rms_y) {
            write!(f, ", last RMS x={rx:.4} px y={ry:.4} px")?;
        }
        Ok(())
    }
}

/// Configuration problems detected before any work is done.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("stamp half-widths must be at least 1 pixel (got win_x={win_x}, win_y={win_y})")]
    EmptyStamp { win_x: u32, win_y: u32 },
    #[error("{name} must be a positive finite number (got {value})")]
    NonPositive { name: &'static str, value: f64 },
    #[error("LM damping factors need lambda_up > 1 and 0 < lambda_down < 1 (got {lambda_up}, {lambda_down})")]
    InvalidDamping { lambda_up: f64, lambda_down: f64 },
    #[error("gaussian.min_sigma={min_sigma} px cannot fit a stamp with half-widths win_x={win_x}, win_y={win_y}")]
    SigmaExceedsStamp { min_sigma: f64, win_x: u32, win_y: u32 },
    #[error("{name} must be at least 1")]
    ZeroBudget { name: &'static str },
    #[error("slit_deg={slit_deg} requested for a single-pinhole fit, which has no slit dimension")]
    SlitDegreeInSingleMode { slit_deg: u32 },
    #[error("slit_deg={slit_deg} requested but {missing} catalogue lines carry no slit position")]
    MissingSlitPositions { slit_deg: u32, missing: usize },
    #[error("the prior solution must be a single-pinhole surface to estimate the multi-pinhole shift")]
    PriorNotSinglePinhole,
}

/// Fatal errors of a dispersion-map run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispersionError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Too few lines to constrain the polynomial surfaces.
    #[error("insufficient data at {stage}: {available} lines available, {required} required ({context})")]
    InsufficientData {
        stage: FitStage,
        available: usize,
        required: usize,
        context: FailureContext,
    },

    /// Enough lines, but their coordinates do not span the requested basis
    /// (e.g. a single echelle order with `order_deg > 0`).
    #[error("design matrix is rank deficient at {stage}: rank {rank} < {required} coefficients ({context})")]
    DegenerateDesign {
        stage: FitStage,
        rank: usize,
        required: usize,
        context: FailureContext,
    },
}

impl DispersionError {
    /// Attach run state to an error produced by a stateless component.
    pub(crate) fn with_context(self, context: FailureContext) -> Self {
        match self {
            DispersionError::InsufficientData {
                stage,
                available,
                required,
                ..
            } => DispersionError::InsufficientData {
                stage,
                available,
                required,
                context,
            },
            DispersionError::DegenerateDesign {
                stage,
                rank,
                required,
                ..
            } => DispersionError::DegenerateDesign {
                stage,
                rank,
                required,
                context,
            },
            other => other,
        }
    }
}

pub type Result<T, E = DispersionError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_data_message_carries_counts() {
        let err = DispersionError::InsufficientData {
            stage: FitStage::Clipping,
            available: 5,
            required: 12,
            context: FailureContext {
                iteration: 3,
                active_lines: 5,
                rejected_lines: 40,
                failed_detections: 2,
                last_rms_x: Some(0.5),
                last_rms_y: Some(0.25),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("clipping"), "{msg}");
        assert!(msg.contains("5 lines available, 12 required"), "{msg}");
        assert!(msg.contains("iteration 3"), "{msg}");
        assert!(msg.contains("x=0.5000"), "{msg}");
    }

    #[test]
    fn test_with_context_replaces_snapshot() {
        let err = DispersionError::DegenerateDesign {
            stage: FitStage::Fitting,
            rank: 3,
            required: 4,
            context: FailureContext::default(),
        };
        let ctx = FailureContext {
            iteration: 2,
            ..Default::default()
        };
        match err.with_context(ctx.clone()) {
            DispersionError::DegenerateDesign { context, .. } => assert_eq!(context, ctx),
            other => panic!("unexpected {other:?}"),
        }
    }
}
