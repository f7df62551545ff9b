//! 2-D Gaussian line centroiding.
//!
//! Fits the model
//!
//! ```text
//! f(x, y) = A · exp(-((x - x₀)²/2σx² + (y - y₀)²/2σy²)) + B
//! ```
//!
//! to the valid pixels of a background-subtracted stamp with
//! Levenberg–Marquardt. The fit starts at the brightest valid pixel, so when
//! a stamp catches more than one feature the centroider locks onto the
//! strongest one.

use nalgebra::{Matrix6, Vector6};

use crate::config::GaussianFitConfig;

use super::stamp::Stamp;
use super::DetectionFailure;

/// Damping above which no step can reduce chi² any further: the fit sits at
/// its minimum.
const LAMBDA_CEILING: f64 = 1e10;

/// Fitted Gaussian parameters, in frame pixel-index coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianFit {
    pub x: f64,
    pub y: f64,
    pub amplitude: f64,
    pub sigma_x: f64,
    pub sigma_y: f64,
    /// Residual pedestal left after background subtraction.
    pub background: f64,
    /// RMS of the fit residuals.
    pub rms_residual: f64,
    pub iterations: u32,
}

// Parameter layout: [amplitude, x0, y0, sigma_x, sigma_y, background]
type Params = Vector6<f64>;

/// Fit a 2-D Gaussian to a background-subtracted stamp.
pub fn fit_gaussian(stamp: &Stamp, config: &GaussianFitConfig) -> Result<GaussianFit, DetectionFailure> {
    let pixels: Vec<(f64, f64, f64)> = stamp.valid_pixels().collect();
    // 6 parameters plus at least one degree of freedom.
    if pixels.len() < 7 {
        return Err(DetectionFailure::TooFewValidPixels);
    }

    let (px, py, peak) = pixels
        .iter()
        .copied()
        .max_by(|a, b| a.2.total_cmp(&b.2))
        .ok_or(DetectionFailure::TooFewValidPixels)?;
    if peak <= 0.0 {
        return Err(DetectionFailure::NonPositiveAmplitude);
    }

    let max_sigma = stamp.extent() as f64;
    // An accepted fit needs min_sigma <= sigma <= extent / 2.
    if !(config.min_sigma <= 0.5 * max_sigma) {
        return Err(DetectionFailure::ImplausibleWidth);
    }
    let min_sigma = 0.5 * config.min_sigma;
    let clamp = |p: &mut Params| {
        p[3] = p[3].clamp(min_sigma, max_sigma);
        p[4] = p[4].clamp(min_sigma, max_sigma);
    };

    let mut params = Params::new(
        peak,
        px,
        py,
        config.initial_sigma,
        config.initial_sigma,
        0.0,
    );
    clamp(&mut params);

    let mut chi2 = chi_squared(&pixels, &params);
    let mut lambda = config.initial_lambda;
    let mut converged = false;
    let mut iterations = 0;

    for iter in 0..config.max_iterations {
        iterations = iter + 1;

        let (jtj, jtr) = normal_equations(&pixels, &params);
        let mut damped = jtj;
        for i in 0..6 {
            damped[(i, i)] *= 1.0 + lambda;
        }

        let step = damped.lu().solve(&jtr);
        let Some(delta) = step else {
            lambda *= config.lambda_up;
            if lambda > LAMBDA_CEILING {
                converged = true;
                break;
            }
            continue;
        };

        let mut trial = params + delta;
        clamp(&mut trial);
        let trial_chi2 = chi_squared(&pixels, &trial);

        if trial_chi2.is_finite() && trial_chi2 < chi2 {
            let small = delta
                .iter()
                .zip(params.iter())
                .all(|(d, p)| d.abs() <= config.convergence_threshold * p.abs().max(1.0));
            params = trial;
            chi2 = trial_chi2;
            lambda *= config.lambda_down;
            if small {
                converged = true;
                break;
            }
        } else {
            lambda *= config.lambda_up;
            if lambda > LAMBDA_CEILING {
                converged = true;
                break;
            }
        }
    }

    if !converged || params.iter().any(|p| !p.is_finite()) {
        return Err(DetectionFailure::NotConverged);
    }

    let [amplitude, x, y, sigma_x, sigma_y, background] =
        [params[0], params[1], params[2], params[3], params[4], params[5]];

    if amplitude <= 0.0 {
        return Err(DetectionFailure::NonPositiveAmplitude);
    }
    if !stamp.contains(x, y) {
        return Err(DetectionFailure::CentroidOutsideStamp);
    }
    let plausible = |s: f64| s >= config.min_sigma && s <= 0.5 * max_sigma;
    if !plausible(sigma_x) || !plausible(sigma_y) {
        return Err(DetectionFailure::ImplausibleWidth);
    }

    Ok(GaussianFit {
        x,
        y,
        amplitude,
        sigma_x,
        sigma_y,
        background,
        rms_residual: (chi2 / pixels.len() as f64).sqrt(),
        iterations,
    })
}

/// Model value and its partial derivatives w.r.t. the parameters.
#[inline]
fn model_and_gradient(x: f64, y: f64, p: &Params) -> (f64, Params) {
    let (amp, x0, y0, sx, sy, bg) = (p[0], p[1], p[2], p[3], p[4], p[5]);
    let dx = x - x0;
    let dy = y - y0;
    let sx2 = sx * sx;
    let sy2 = sy * sy;
    let e = (-0.5 * (dx * dx / sx2 + dy * dy / sy2)).exp();
    let ae = amp * e;
    let grad = Params::new(
        e,
        ae * dx / sx2,
        ae * dy / sy2,
        ae * dx * dx / (sx2 * sx),
        ae * dy * dy / (sy2 * sy),
        1.0,
    );
    (ae + bg, grad)
}

fn chi_squared(pixels: &[(f64, f64, f64)], p: &Params) -> f64 {
    pixels
        .iter()
        .map(|&(x, y, z)| {
            let (m, _) = model_and_gradient(x, y, p);
            (z - m) * (z - m)
        })
        .sum()
}

/// `JᵀJ` and `Jᵀr` for residuals `r = data - model`.
fn normal_equations(pixels: &[(f64, f64, f64)], p: &Params) -> (Matrix6<f64>, Params) {
    let mut jtj = Matrix6::zeros();
    let mut jtr = Params::zeros();
    for &(x, y, z) in pixels {
        let (m, g) = model_and_gradient(x, y, p);
        jtj += g * g.transpose();
        jtr += g * (z - m);
    }
    (jtj, jtr)
}
