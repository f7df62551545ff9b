//! Shared synthetic data helpers: known polynomial surfaces, catalogues drawn
//! from them, and arc frames with Gaussian line profiles and pixel noise.
#![allow(dead_code)]

use echelle_dispmap::{Basis, CalibrationFrame, Exponents, PolynomialCoefficientSet};
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

/// Coefficient vector with the listed `((order, wavelength, slit) exponents, value)`
/// terms set and every other term zero.
pub fn coefficients(basis: &Basis, terms: &[((u32, u32, u32), f64)]) -> Vec<f64> {
    let mut c = vec![0.0; basis.num_coeffs()];
    for &((order, wavelength, slit), value) in terms {
        let idx = basis
            .index_of(Exponents {
                order,
                wavelength,
                slit,
            })
            .unwrap_or_else(|| panic!("term c{order}{wavelength}{slit} not in basis"));
        c[idx] = value;
    }
    c
}

pub fn surface(
    basis: Basis,
    x_terms: &[((u32, u32, u32), f64)],
    y_terms: &[((u32, u32, u32), f64)],
) -> PolynomialCoefficientSet {
    PolynomialCoefficientSet::new(basis, coefficients(&basis, x_terms), coefficients(&basis, y_terms))
        .expect("valid surface")
}

/// Line profile drawn on a synthetic frame.
#[derive(Debug, Clone, Copy)]
pub struct Profile {
    pub amplitude: f64,
    pub sigma: f64,
}

/// Render a frame with one Gaussian spot per centre on a flat background plus
/// Gaussian pixel noise.
pub fn render_frame(
    width: u32,
    height: u32,
    centres: &[(f64, f64)],
    profile: Profile,
    background: f64,
    noise_sigma: f64,
    rng: &mut StdRng,
) -> CalibrationFrame {
    let noise = Normal::new(0.0, noise_sigma).expect("valid noise sigma");
    let mut data: Vec<f32> = (0..width as usize * height as usize)
        .map(|_| (background + noise.sample(rng)) as f32)
        .collect();

    let reach = (6.0 * profile.sigma).ceil() as i64;
    let two_s2 = 2.0 * profile.sigma * profile.sigma;
    for &(x0, y0) in centres {
        let (c0, r0) = (x0.round() as i64, y0.round() as i64);
        for row in (r0 - reach).max(0)..=(r0 + reach).min(height as i64 - 1) {
            for col in (c0 - reach).max(0)..=(c0 + reach).min(width as i64 - 1) {
                let dx = col as f64 - x0;
                let dy = row as f64 - y0;
                let v = profile.amplitude * (-(dx * dx + dy * dy) / two_s2).exp();
                data[row as usize * width as usize + col as usize] += v as f32;
            }
        }
    }
    CalibrationFrame::from_raw(width, height, data, None).expect("valid frame")
}
