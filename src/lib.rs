//! # echelle-dispmap
//!
//! Dispersion and spatial solutions for echelle spectrograph arc frames taken
//! through single- or multi-pinhole masks.
//!
//! Given a calibration frame and a catalogue of predicted arc lines, the
//! crate measures every line's sub-pixel position and fits two independent
//! polynomial surfaces mapping (echelle order, wavelength[, slit position])
//! to detector X and Y, rejecting outlying lines as it goes.
//!
//! ## Example
//!
//! ```no_run
//! use echelle_dispmap::{
//!     fit_multi_pinhole, fit_single_pinhole, CalibrationFrame, DispersionFitConfig, LineCatalogue,
//! };
//!
//! let config = DispersionFitConfig {
//!     order_deg: 3,
//!     wavelength_deg: 4,
//!     mid_slit_index: Some(4),
//!     ..Default::default()
//! };
//! let catalogue = LineCatalogue::from_csv_path("data/predicted_lines_nir.csv").unwrap();
//!
//! // Single-pinhole frame: the dispersion solution.
//! let frame = CalibrationFrame::open("data/single_pinhole_arc.tif").unwrap();
//! let single = fit_single_pinhole(&frame, &catalogue, &config).unwrap();
//! single.map.save_csv("data/disp_map_single.csv").unwrap();
//!
//! // Multi-pinhole frame: the spatial solution, registered with the single one.
//! let frame = CalibrationFrame::open("data/multi_pinhole_arc.tif").unwrap();
//! let multi_config = DispersionFitConfig { slit_deg: 2, ..config };
//! let multi = fit_multi_pinhole(&frame, &catalogue, &single.coefficients, &multi_config).unwrap();
//! println!(
//!     "{} lines used, {} rejected, RMS x={:.3} y={:.3} px",
//!     multi.map.lines_used, multi.map.lines_rejected, multi.map.final_rms_x, multi.map.final_rms_y
//! );
//! ```
//!
//! ## Algorithm overview
//!
//! 1. **Shift** (multi-pinhole only): measure the central-pinhole lines at the positions
//!    predicted by the single-pinhole solution and move the whole catalogue by the
//!    median offset
//! 2. **Detection**: cut a stamp around each predicted position, subtract a
//!    sigma-clipped median background and fit a 2-D Gaussian (Levenberg–Marquardt);
//!    lines are measured in parallel and failures are recorded per line
//! 3. **Fit**: least-squares tensor-product polynomial surfaces for X and Y, solved by SVD
//! 4. **Clip**: reject every line beyond `sigma_clip × RMS` in one batch and refit,
//!    until a cycle rejects nothing or the iteration budget runs out
//!

pub mod catalogue;
pub mod config;
pub mod detection;
pub mod dispersion_map;
pub mod error;
pub mod fit;
pub mod frame;
pub mod line;
pub mod pipeline;
pub mod polynomial;
pub mod qc;
pub mod shift;

pub use catalogue::LineCatalogue;
pub use config::{ClipMetric, DispersionFitConfig, GaussianFitConfig};
pub use detection::{detect_lines, DetectionFailure, LineCentroid};
pub use dispersion_map::{
    load_coefficient_table, read_coefficient_table, write_coefficient_table, CoefficientTerm,
    DispersionMap, MapPosition,
};
pub use error::{ConfigError, DispersionError, FailureContext, FitStage};
pub use fit::{Convergence, FitOutcome, FitState, IterationStats, RobustFitter};
pub use frame::{CalibrationFrame, PixelGrid};
pub use line::{DetectedLine, LineKey, LineQuality, PredictedLine};
pub use pipeline::{fit_multi_pinhole, fit_single_pinhole, DispersionSolution};
pub use polynomial::{Basis, Exponents, Mode, PolynomialCoefficientSet};
pub use qc::{QcMetrics, ResidualSummary};
pub use shift::{apply_shift, estimate_shift, PixelShift, ShiftEstimate};
