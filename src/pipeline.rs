//! Single- and multi-pinhole dispersion-map runs.
//!
//! Both entry points follow the same flow once the catalogue is ready:
//!
//! ```text
//! catalogue ─▶ [shift, multi only] ─▶ detect_lines ─▶ RobustFitter::run ─▶ DispersionMap
//! ```
//!
//! The frame is only read; every run owns its own fit state, so independent
//! runs may execute concurrently on the same frame.

use tracing::info;

use crate::catalogue::LineCatalogue;
use crate::config::DispersionFitConfig;
use crate::detection::{detect_lines, failure_breakdown};
use crate::dispersion_map::DispersionMap;
use crate::error::{DispersionError, FailureContext, FitStage, Result};
use crate::fit::{Convergence, IterationStats, RobustFitter};
use crate::frame::CalibrationFrame;
use crate::line::DetectedLine;
use crate::polynomial::{Basis, Mode, PolynomialCoefficientSet};
use crate::qc::QcMetrics;
use crate::shift::{estimate_shift, PixelShift};

/// Everything a run produces.
#[derive(Debug, Clone)]
pub struct DispersionSolution {
    pub map: DispersionMap,
    pub coefficients: PolynomialCoefficientSet,
    /// Every catalogue line searched, in catalogue order, with its final quality.
    pub lines: Vec<DetectedLine>,
    pub qc: QcMetrics,
    /// Shift applied to the catalogue (multi-pinhole runs only).
    pub shift: Option<PixelShift>,
    pub convergence: Convergence,
    pub history: Vec<IterationStats>,
}

impl DispersionSolution {
    /// Number of fit → clip cycles run.
    pub fn iterations(&self) -> u32 {
        self.history.len() as u32
    }

    pub fn is_converged(&self) -> bool {
        self.convergence == Convergence::Converged
    }

    pub fn final_rms(&self) -> (f64, f64) {
        (self.map.final_rms_x, self.map.final_rms_y)
    }
}

/// Fit a dispersion solution to a single-pinhole arc frame.
///
/// When the catalogue lists every pinhole and `mid_slit_index` is set, only
/// the central-pinhole rows are used.
pub fn fit_single_pinhole(
    frame: &CalibrationFrame,
    catalogue: &LineCatalogue,
    config: &DispersionFitConfig,
) -> Result<DispersionSolution> {
    let basis = prepare(config, Mode::Single)?;
    let catalogue = catalogue.for_mode(Mode::Single, config.mid_slit_index);
    check_catalogue(&catalogue, &basis)?;
    info!(
        "Single-pinhole fit: {} lines, basis order_deg={} wavelength_deg={} ({} coefficients per axis)",
        catalogue.len(),
        basis.order_deg(),
        basis.wavelength_deg(),
        basis.num_coeffs()
    );
    fit_catalogue(frame, &catalogue, basis, config, None)
}

/// Fit a dispersion + spatial solution to a multi-pinhole arc frame.
///
/// `prior` is a single-pinhole solution; it registers the catalogue against
/// the frame before detection (see [`estimate_shift`]).
pub fn fit_multi_pinhole(
    frame: &CalibrationFrame,
    catalogue: &LineCatalogue,
    prior: &PolynomialCoefficientSet,
    config: &DispersionFitConfig,
) -> Result<DispersionSolution> {
    let basis = prepare(config, Mode::Multi)?;
    check_catalogue(catalogue, &basis)?;
    info!(
        "Multi-pinhole fit: {} lines, basis order_deg={} wavelength_deg={} slit_deg={} ({} coefficients per axis)",
        catalogue.len(),
        basis.order_deg(),
        basis.wavelength_deg(),
        basis.slit_deg(),
        basis.num_coeffs()
    );

    let estimate = estimate_shift(frame, catalogue, prior, config)?;
    fit_catalogue(frame, &estimate.catalogue, basis, config, Some(estimate.shift))
}

fn prepare(config: &DispersionFitConfig, mode: Mode) -> Result<Basis> {
    config.validate()?;
    Ok(config.basis(mode)?)
}

/// Pre-detection checks: slit data for the basis and enough lines to solve it.
fn check_catalogue(catalogue: &LineCatalogue, basis: &Basis) -> Result<()> {
    catalogue.check_dimensionality(basis)?;
    let required = basis.num_coeffs();
    if catalogue.len() < required {
        return Err(DispersionError::InsufficientData {
            stage: FitStage::Catalogue,
            available: catalogue.len(),
            required,
            context: FailureContext::default(),
        });
    }
    Ok(())
}

fn fit_catalogue(
    frame: &CalibrationFrame,
    catalogue: &LineCatalogue,
    basis: Basis,
    config: &DispersionFitConfig,
    shift: Option<PixelShift>,
) -> Result<DispersionSolution> {
    let detected = detect_lines(frame, catalogue.lines(), config);
    let n_detected = detected.iter().filter(|l| l.is_detected()).count();
    info!(
        "Detected {} of {} lines on the {}x{} frame",
        n_detected,
        detected.len(),
        frame.width(),
        frame.height()
    );
    for (reason, n) in failure_breakdown(&detected) {
        info!("  {} lines failed detection: {}", n, reason);
    }

    let outcome = RobustFitter::from_config(basis, config).run(detected)?;
    let qc = QcMetrics::from_fit(&outcome.state.coefficients, &outcome.lines);
    let map = DispersionMap::from_fit(
        &outcome.state.coefficients,
        outcome.state.rms_x,
        outcome.state.rms_y,
        outcome.state.active_lines.len(),
        outcome.rejected_count(),
        outcome.convergence,
    );

    Ok(DispersionSolution {
        map,
        coefficients: outcome.state.coefficients,
        lines: outcome.lines,
        qc,
        shift,
        convergence: outcome.convergence,
        history: outcome.history,
    })
}
