//! Configuration for a dispersion-map run.
//!
//! All structs derive serde with `#[serde(default)]`, so a partial settings
//! document (JSON, YAML, ...) fills in the documented defaults. Loading the
//! document itself is left to the caller.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::polynomial::{Basis, Mode};

/// Statistic used to decide whether a line residual is an outlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipMetric {
    /// Euclidean residual `sqrt(rx² + ry²)` against
    /// `sigma_clip · sqrt(RMS_x² + RMS_y²)`.
    #[default]
    Combined,
    /// Reject when either `|rx| > sigma_clip · RMS_x` or
    /// `|ry| > sigma_clip · RMS_y`.
    PerAxis,
}

/// Levenberg–Marquardt settings for the 2-D Gaussian line centroider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaussianFitConfig {
    /// Maximum LM iterations before the fit is declared non-convergent.
    /// Default: 50
    pub max_iterations: u32,

    /// Relative parameter change below which the fit is converged.
    /// Default: 1e-6
    pub convergence_threshold: f64,

    /// Starting damping factor.
    /// Default: 0.001
    pub initial_lambda: f64,

    /// Damping multiplier after a rejected step.
    /// Default: 10.0
    pub lambda_up: f64,

    /// Damping multiplier after an accepted step.
    /// Default: 0.1
    pub lambda_down: f64,

    /// Initial Gaussian sigma (pixels) along both axes.
    /// Default: 1.5
    pub initial_sigma: f64,

    /// Smallest sigma (pixels) accepted for a real line. Narrower fits are
    /// hot pixels or cosmic-ray hits.
    /// Default: 0.3
    pub min_sigma: f64,
}

impl Default for GaussianFitConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            convergence_threshold: 1e-6,
            initial_lambda: 0.001,
            lambda_up: 10.0,
            lambda_down: 0.1,
            initial_sigma: 1.5,
            min_sigma: 0.3,
        }
    }
}

/// Configuration for a single- or multi-pinhole dispersion-map fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispersionFitConfig {
    /// Stamp half-width along X (pixels). The stamp spans `2·win_x + 1` columns.
    /// Default: 5
    pub win_x: u32,

    /// Stamp half-width along Y (pixels).
    /// Default: 5
    pub win_y: u32,

    /// Sigma threshold of the stamp background estimate.
    /// Default: 3.0
    pub clipping_sigma: f64,

    /// Maximum sigma-clip passes of the stamp background estimate.
    /// Default: 5
    pub clipping_iterations: u32,

    /// Residual clip threshold, in units of the residual RMS.
    /// Default: 3.0
    pub sigma_clip: f64,

    /// Maximum fit → clip cycles of the iteration controller.
    /// Default: 10
    pub max_iterations: u32,

    /// Highest exponent of the echelle order number.
    /// Default: 3
    pub order_deg: u32,

    /// Highest exponent of the wavelength.
    /// Default: 3
    pub wavelength_deg: u32,

    /// Highest exponent of the slit position. Must be 0 for single-pinhole fits.
    /// Default: 0
    pub slit_deg: u32,

    /// Outlier statistic used by the controller.
    /// Default: [`ClipMetric::Combined`]
    pub clip_metric: ClipMetric,

    /// A detected line's fitted amplitude must exceed this multiple of the
    /// stamp noise.
    /// Default: 5.0
    pub detection_snr: f64,

    /// Slit index of the central pinhole, for catalogues that carry one.
    /// When set, single-pinhole runs keep only rows with this index and the
    /// shift estimator uses it to find the central pinhole.
    /// Default: None (central means slit position 0)
    pub mid_slit_index: Option<u32>,

    /// Line centroider settings.
    pub gaussian: GaussianFitConfig,
}

impl Default for DispersionFitConfig {
    fn default() -> Self {
        Self {
            win_x: 5,
            win_y: 5,
            clipping_sigma: 3.0,
            clipping_iterations: 5,
            sigma_clip: 3.0,
            max_iterations: 10,
            order_deg: 3,
            wavelength_deg: 3,
            slit_deg: 0,
            clip_metric: ClipMetric::Combined,
            detection_snr: 5.0,
            mid_slit_index: None,
            gaussian: GaussianFitConfig::default(),
        }
    }
}

impl DispersionFitConfig {
    /// Check the settings that do not depend on the catalogue.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.win_x == 0 || self.win_y == 0 {
            return Err(ConfigError::EmptyStamp {
                win_x: self.win_x,
                win_y: self.win_y,
            });
        }
        for (name, value) in [
            ("clipping_sigma", self.clipping_sigma),
            ("sigma_clip", self.sigma_clip),
            ("detection_snr", self.detection_snr),
            ("gaussian.initial_sigma", self.gaussian.initial_sigma),
            ("gaussian.min_sigma", self.gaussian.min_sigma),
            ("gaussian.initial_lambda", self.gaussian.initial_lambda),
            ("gaussian.convergence_threshold", self.gaussian.convergence_threshold),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NonPositive { name, value });
            }
        }
        let g = &self.gaussian;
        if g.min_sigma > self.win_x.min(self.win_y) as f64 {
            return Err(ConfigError::SigmaExceedsStamp {
                min_sigma: g.min_sigma,
                win_x: self.win_x,
                win_y: self.win_y,
            });
        }
        if !(g.lambda_up > 1.0 && g.lambda_up.is_finite())
            || !(g.lambda_down > 0.0 && g.lambda_down < 1.0)
        {
            return Err(ConfigError::InvalidDamping {
                lambda_up: g.lambda_up,
                lambda_down: g.lambda_down,
            });
        }
        for (name, value) in [
            ("clipping_iterations", self.clipping_iterations),
            ("max_iterations", self.max_iterations),
            ("gaussian.max_iterations", self.gaussian.max_iterations),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroBudget { name });
            }
        }
        Ok(())
    }

    /// Polynomial basis for the given pinhole mode.
    ///
    /// Single-pinhole fits have no slit dimension, so `slit_deg > 0` is a
    /// configuration error there.
    pub fn basis(&self, mode: Mode) -> Result<Basis, ConfigError> {
        match mode {
            Mode::Single if self.slit_deg > 0 => Err(ConfigError::SlitDegreeInSingleMode {
                slit_deg: self.slit_deg,
            }),
            Mode::Single => Ok(Basis::Single {
                order_deg: self.order_deg,
                wavelength_deg: self.wavelength_deg,
            }),
            Mode::Multi => Ok(Basis::Multi {
                order_deg: self.order_deg,
                wavelength_deg: self.wavelength_deg,
                slit_deg: self.slit_deg,
            }),
        }
    }
}
