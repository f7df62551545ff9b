//! Least-squares solve of the X and Y surfaces.
//!
//! Both axes share one design matrix `A` (one row of monomials per active
//! line) and are solved as two independent systems `A·cx = x_obs`,
//! `A·cy = y_obs`. Raw monomials of wavelength and order span many decades,
//! so the columns are equilibrated to unit max-norm before an SVD solve and
//! the coefficients are rescaled afterwards.

use nalgebra::{DMatrix, DVector};

use crate::error::{DispersionError, FailureContext, FitStage, Result};
use crate::line::DetectedLine;
use crate::polynomial::{Basis, PolynomialCoefficientSet};

/// Singular values below this fraction of the largest are treated as zero.
const RANK_TOLERANCE: f64 = 1e-10;

/// Fit both surfaces to the observed centroids of `lines`.
///
/// Every line is used; the caller passes only active lines.
pub fn fit_surfaces(basis: Basis, lines: &[DetectedLine]) -> Result<PolynomialCoefficientSet> {
    let n = lines.len();
    let p = basis.num_coeffs();
    if n < p {
        return Err(DispersionError::InsufficientData {
            stage: FitStage::Fitting,
            available: n,
            required: p,
            context: FailureContext::default(),
        });
    }

    let mut a = DMatrix::<f64>::zeros(n, p);
    let mut row = vec![0.0; p];
    for (i, line) in lines.iter().enumerate() {
        basis.fill_row(
            line.order as f64,
            line.wavelength,
            line.slit_coordinate(),
            &mut row,
        );
        for (j, v) in row.iter().enumerate() {
            a[(i, j)] = *v;
        }
    }

    // Column equilibration.
    let scales: Vec<f64> = (0..p)
        .map(|j| {
            let m = a.column(j).amax();
            if m > 0.0 {
                m
            } else {
                1.0
            }
        })
        .collect();
    for (j, s) in scales.iter().enumerate() {
        for v in a.column_mut(j).iter_mut() {
            *v /= s;
        }
    }

    let degenerate = |rank: usize| DispersionError::DegenerateDesign {
        stage: FitStage::Fitting,
        rank,
        required: p,
        context: FailureContext::default(),
    };

    let svd = a.svd(true, true);
    let max_sv = svd.singular_values.max();
    let eps = RANK_TOLERANCE * max_sv;
    let rank = if max_sv > 0.0 { svd.rank(eps) } else { 0 };
    if rank < p {
        return Err(degenerate(rank));
    }

    let bx = DVector::from_iterator(n, lines.iter().map(|l| l.observed_x));
    let by = DVector::from_iterator(n, lines.iter().map(|l| l.observed_y));
    let cx = svd.solve(&bx, eps).map_err(|_| degenerate(rank))?;
    let cy = svd.solve(&by, eps).map_err(|_| degenerate(rank))?;

    let unscale = |c: DVector<f64>| -> Vec<f64> {
        c.iter().zip(&scales).map(|(v, s)| v / s).collect()
    };
    Ok(PolynomialCoefficientSet::from_solved(
        basis,
        unscale(cx),
        unscale(cy),
    ))
}
