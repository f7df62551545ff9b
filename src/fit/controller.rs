//! Robust iteration controller.
//!
//! Repeats fit → residuals → clip on a shrinking active set:
//!
//! 1. Fit both surfaces to the active lines
//! 2. Evaluate residuals and per-axis RMS over the active lines
//! 3. Flag every line beyond the clip threshold as `Rejected` (batch)
//! 4. Stop when a cycle rejects nothing; otherwise refit on the survivors
//!
//! Rejected lines never come back. The run fails when the survivors can no
//! longer constrain the basis, and stops early with
//! [`Convergence::IterationLimit`] when the cycle budget runs out.

use tracing::{debug, info, warn};

use crate::config::{ClipMetric, DispersionFitConfig};
use crate::error::{DispersionError, FailureContext, FitStage, Result};
use crate::line::{DetectedLine, LineQuality};
use crate::polynomial::{Basis, PolynomialCoefficientSet};

use super::clip::{residual_rms, residuals, select_outliers, ClipThreshold};
use super::solver::fit_surfaces;

/// How the controller stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Convergence {
    /// The last cycle rejected no line.
    Converged,
    /// `max_iterations` cycles ran and the last one still rejected lines.
    IterationLimit,
}

/// The controller's working state after one fit.
#[derive(Debug, Clone)]
pub struct FitState {
    pub coefficients: PolynomialCoefficientSet,
    /// Lines with quality `Good`, in catalogue order.
    pub active_lines: Vec<DetectedLine>,
    /// Number of fits performed so far.
    pub iteration: u32,
    pub rms_x: f64,
    pub rms_y: f64,
}

/// Statistics of one fit → clip cycle.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct IterationStats {
    pub iteration: u32,
    /// Lines the fit used.
    pub active_lines: usize,
    pub rejected_this_cycle: usize,
    /// RMS of the fit before clipping.
    pub rms_x: f64,
    pub rms_y: f64,
}

/// Result of a single cycle.
#[derive(Debug, Clone)]
pub struct Cycle {
    /// Fit over the cycle's input lines.
    pub state: FitState,
    /// Positions in `state.active_lines` of the lines to reject.
    pub outliers: Vec<usize>,
}

/// Final result of the controller.
#[derive(Debug, Clone)]
pub struct FitOutcome {
    pub state: FitState,
    /// Every input line, in input order, with its final quality.
    pub lines: Vec<DetectedLine>,
    pub history: Vec<IterationStats>,
    pub convergence: Convergence,
}

impl FitOutcome {
    pub fn rejected_count(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| l.quality == LineQuality::Rejected)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.lines.iter().filter(|l| !l.is_detected()).count()
    }
}

/// Sigma-clipping polynomial fitter.
#[derive(Debug, Clone, Copy)]
pub struct RobustFitter {
    basis: Basis,
    sigma_clip: f64,
    metric: ClipMetric,
    max_iterations: u32,
}

impl RobustFitter {
    pub fn new(basis: Basis, sigma_clip: f64, metric: ClipMetric, max_iterations: u32) -> Self {
        Self {
            basis,
            sigma_clip,
            metric,
            max_iterations,
        }
    }

    pub fn from_config(basis: Basis, config: &DispersionFitConfig) -> Self {
        Self::new(basis, config.sigma_clip, config.clip_metric, config.max_iterations)
    }

    pub fn basis(&self) -> Basis {
        self.basis
    }

    /// One Fitting → ResidualEval → Clipping cycle on `active`.
    pub fn cycle(&self, active: &[DetectedLine], iteration: u32) -> Result<Cycle> {
        let coefficients = fit_surfaces(self.basis, active)?;
        let res = residuals(&coefficients, active);
        let (rms_x, rms_y) = residual_rms(&res);
        let threshold = ClipThreshold::new(self.metric, self.sigma_clip, rms_x, rms_y);
        let outliers = select_outliers(&res, &threshold);
        Ok(Cycle {
            state: FitState {
                coefficients,
                active_lines: active.to_vec(),
                iteration,
                rms_x,
                rms_y,
            },
            outliers,
        })
    }

    /// Run the controller to convergence, the iteration limit, or failure.
    ///
    /// Lines that failed detection are carried through unchanged and never
    /// enter the fit.
    pub fn run(&self, mut lines: Vec<DetectedLine>) -> Result<FitOutcome> {
        let required = self.basis.num_coeffs();
        let failed_detections = lines.iter().filter(|l| !l.is_detected()).count();
        // Positions in `lines` of the active set.
        let mut active: Vec<usize> = lines
            .iter()
            .enumerate()
            .filter(|(_, l)| l.is_good())
            .map(|(i, _)| i)
            .collect();
        let mut rejected_total = lines
            .iter()
            .filter(|l| l.quality == LineQuality::Rejected)
            .count();

        if active.len() < required {
            return Err(DispersionError::InsufficientData {
                stage: FitStage::Detection,
                available: active.len(),
                required,
                context: FailureContext {
                    iteration: 0,
                    active_lines: active.len(),
                    rejected_lines: rejected_total,
                    failed_detections,
                    last_rms_x: None,
                    last_rms_y: None,
                },
            });
        }

        let mut history: Vec<IterationStats> = Vec::new();
        let mut iteration = 0u32;
        loop {
            iteration += 1;
            let active_lines: Vec<DetectedLine> = active.iter().map(|&i| lines[i].clone()).collect();
            let cycle = self.cycle(&active_lines, iteration).map_err(|e| {
                e.with_context(FailureContext {
                    iteration,
                    active_lines: active.len(),
                    rejected_lines: rejected_total,
                    failed_detections,
                    last_rms_x: history.last().map(|h| h.rms_x),
                    last_rms_y: history.last().map(|h| h.rms_y),
                })
            })?;
            let Cycle { mut state, outliers } = cycle;

            history.push(IterationStats {
                iteration,
                active_lines: active.len(),
                rejected_this_cycle: outliers.len(),
                rms_x: state.rms_x,
                rms_y: state.rms_y,
            });
            debug!(
                "Iteration {}: {} active lines, RMS x={:.4} y={:.4} px, {} clipped",
                iteration,
                active.len(),
                state.rms_x,
                state.rms_y,
                outliers.len()
            );

            if outliers.is_empty() {
                info!(
                    "Dispersion fit converged after {} iterations: {} lines used, {} rejected, RMS x={:.4} y={:.4} px",
                    iteration,
                    active.len(),
                    rejected_total,
                    state.rms_x,
                    state.rms_y
                );
                return Ok(FitOutcome {
                    state,
                    lines,
                    history,
                    convergence: Convergence::Converged,
                });
            }

            for &k in &outliers {
                lines[active[k]].quality = LineQuality::Rejected;
            }
            rejected_total += outliers.len();
            active.retain(|&i| lines[i].is_good());

            if active.len() < required {
                return Err(DispersionError::InsufficientData {
                    stage: FitStage::Clipping,
                    available: active.len(),
                    required,
                    context: FailureContext {
                        iteration,
                        active_lines: active.len(),
                        rejected_lines: rejected_total,
                        failed_detections,
                        last_rms_x: Some(state.rms_x),
                        last_rms_y: Some(state.rms_y),
                    },
                });
            }

            if iteration >= self.max_iterations {
                // Keep the last coefficients; report their RMS over the survivors.
                state.active_lines = active.iter().map(|&i| lines[i].clone()).collect();
                let res = residuals(&state.coefficients, &state.active_lines);
                (state.rms_x, state.rms_y) = residual_rms(&res);
                warn!(
                    "Dispersion fit stopped at the iteration limit ({}) while still clipping; \
                     {} lines used, {} rejected, RMS x={:.4} y={:.4} px",
                    self.max_iterations,
                    active.len(),
                    rejected_total,
                    state.rms_x,
                    state.rms_y
                );
                return Ok(FitOutcome {
                    state,
                    lines,
                    history,
                    convergence: Convergence::IterationLimit,
                });
            }
        }
    }
}
