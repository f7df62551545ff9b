//! Tensor-product monomial surfaces in (order, wavelength[, slit]).
//!
//! Each detector axis is modelled independently as
//!
//! ```text
//! X(m, λ, s) = Σ c_ijk · m^i · λ^j · s^k     0 ≤ i ≤ order_deg
//!                                            0 ≤ j ≤ wavelength_deg
//!                                            0 ≤ k ≤ slit_deg
//! ```
//!
//! and likewise for Y with its own coefficients. Single-pinhole surfaces drop
//! the slit factor entirely (k is always 0). Coefficients are stored flat in
//! loop order order → wavelength → slit, so `c000, c001, …, c010, …` for a
//! multi-pinhole basis. This is also the column order of the design matrix and
//! of the serialized coefficient table.

use rkyv::{Archive, Deserialize, Serialize};

/// Pinhole-mask geometry of a calibration frame.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    Archive,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// One pinhole at the slit centre: a pure dispersion solution.
    Single,
    /// A row of pinholes along the slit: a dispersion plus spatial solution.
    Multi,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Single => f.write_str("single-pinhole"),
            Mode::Multi => f.write_str("multi-pinhole"),
        }
    }
}

/// Exponent tuple of one monomial term.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
    Archive,
    Serialize,
    Deserialize,
)]
pub struct Exponents {
    pub order: u32,
    pub wavelength: u32,
    pub slit: u32,
}

impl Exponents {
    /// Column name in the coefficient table, e.g. `c120`.
    pub fn column_name(&self) -> String {
        format!("c{}{}{}", self.order, self.wavelength, self.slit)
    }
}

/// Monomial basis of a surface. Each mode carries its own term generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Basis {
    Single { order_deg: u32, wavelength_deg: u32 },
    Multi {
        order_deg: u32,
        wavelength_deg: u32,
        slit_deg: u32,
    },
}

impl Basis {
    pub fn mode(&self) -> Mode {
        match self {
            Basis::Single { .. } => Mode::Single,
            Basis::Multi { .. } => Mode::Multi,
        }
    }

    pub fn order_deg(&self) -> u32 {
        match *self {
            Basis::Single { order_deg, .. } | Basis::Multi { order_deg, .. } => order_deg,
        }
    }

    pub fn wavelength_deg(&self) -> u32 {
        match *self {
            Basis::Single { wavelength_deg, .. } | Basis::Multi { wavelength_deg, .. } => {
                wavelength_deg
            }
        }
    }

    /// Highest slit exponent; always 0 for single-pinhole surfaces.
    pub fn slit_deg(&self) -> u32 {
        match *self {
            Basis::Single { .. } => 0,
            Basis::Multi { slit_deg, .. } => slit_deg,
        }
    }

    /// Number of free coefficients per axis: `(od+1)(wd+1)(sd+1)`.
    pub fn num_coeffs(&self) -> usize {
        (self.order_deg() as usize + 1)
            * (self.wavelength_deg() as usize + 1)
            * (self.slit_deg() as usize + 1)
    }

    /// All exponent tuples in coefficient order.
    pub fn exponents(&self) -> Vec<Exponents> {
        let mut out = Vec::with_capacity(self.num_coeffs());
        for order in 0..=self.order_deg() {
            for wavelength in 0..=self.wavelength_deg() {
                for slit in 0..=self.slit_deg() {
                    out.push(Exponents {
                        order,
                        wavelength,
                        slit,
                    });
                }
            }
        }
        out
    }

    /// Flat index of an exponent tuple, or `None` if it is outside the basis.
    pub fn index_of(&self, e: Exponents) -> Option<usize> {
        if e.order > self.order_deg()
            || e.wavelength > self.wavelength_deg()
            || e.slit > self.slit_deg()
        {
            return None;
        }
        let nw = self.wavelength_deg() as usize + 1;
        let ns = self.slit_deg() as usize + 1;
        Some((e.order as usize * nw + e.wavelength as usize) * ns + e.slit as usize)
    }

    /// Monomial values at one physical coordinate, written into `row`.
    ///
    /// `row` must hold exactly [`num_coeffs`](Self::num_coeffs) values. The
    /// slit position is ignored by single-pinhole bases.
    pub fn fill_row(&self, order: f64, wavelength: f64, slit: f64, row: &mut [f64]) {
        debug_assert_eq!(row.len(), self.num_coeffs());
        match *self {
            Basis::Single {
                order_deg,
                wavelength_deg,
            } => single_terms(order_deg, wavelength_deg, order, wavelength, row),
            Basis::Multi {
                order_deg,
                wavelength_deg,
                slit_deg,
            } => multi_terms(
                order_deg,
                wavelength_deg,
                slit_deg,
                order,
                wavelength,
                slit,
                row,
            ),
        }
    }

    /// Monomial values at one physical coordinate.
    pub fn design_row(&self, order: f64, wavelength: f64, slit: f64) -> Vec<f64> {
        let mut row = vec![0.0; self.num_coeffs()];
        self.fill_row(order, wavelength, slit, &mut row);
        row
    }
}

// ── Term generators ─────────────────────────────────────────────────────────

/// `[1, v, v², …, v^deg]`
fn powers(v: f64, deg: u32) -> Vec<f64> {
    let mut out = Vec::with_capacity(deg as usize + 1);
    let mut p = 1.0;
    for _ in 0..=deg {
        out.push(p);
        p *= v;
    }
    out
}

fn single_terms(order_deg: u32, wavelength_deg: u32, m: f64, lambda: f64, row: &mut [f64]) {
    let pm = powers(m, order_deg);
    let pl = powers(lambda, wavelength_deg);
    let mut idx = 0;
    for a in &pm {
        for b in &pl {
            row[idx] = a * b;
            idx += 1;
        }
    }
}

fn multi_terms(
    order_deg: u32,
    wavelength_deg: u32,
    slit_deg: u32,
    m: f64,
    lambda: f64,
    s: f64,
    row: &mut [f64],
) {
    let pm = powers(m, order_deg);
    let pl = powers(lambda, wavelength_deg);
    let ps = powers(s, slit_deg);
    let mut idx = 0;
    for a in &pm {
        for b in &pl {
            let ab = a * b;
            for c in &ps {
                row[idx] = ab * c;
                idx += 1;
            }
        }
    }
}

// ── Coefficient set ─────────────────────────────────────────────────────────

/// Fitted X and Y surfaces sharing one basis.
///
/// Values are immutable: every refit produces a new set.
#[derive(Debug, Clone, PartialEq)]
pub struct PolynomialCoefficientSet {
    basis: Basis,
    x: Vec<f64>,
    y: Vec<f64>,
}

impl PolynomialCoefficientSet {
    /// Build a coefficient set, checking both vectors against the basis size.
    pub fn new(basis: Basis, x: Vec<f64>, y: Vec<f64>) -> anyhow::Result<Self> {
        let n = basis.num_coeffs();
        anyhow::ensure!(
            x.len() == n && y.len() == n,
            "{} basis has {} coefficients per axis, got x={} y={}",
            basis.mode(),
            n,
            x.len(),
            y.len()
        );
        Ok(Self { basis, x, y })
    }

    /// Sizes already known to match.
    pub(crate) fn from_solved(basis: Basis, x: Vec<f64>, y: Vec<f64>) -> Self {
        debug_assert_eq!(x.len(), basis.num_coeffs());
        debug_assert_eq!(y.len(), basis.num_coeffs());
        Self { basis, x, y }
    }

    pub fn basis(&self) -> Basis {
        self.basis
    }

    pub fn mode(&self) -> Mode {
        self.basis.mode()
    }

    pub fn coefficients_x(&self) -> &[f64] {
        &self.x
    }

    pub fn coefficients_y(&self) -> &[f64] {
        &self.y
    }

    pub fn max_order_exponent(&self) -> u32 {
        self.basis.order_deg()
    }

    pub fn max_wavelength_exponent(&self) -> u32 {
        self.basis.wavelength_deg()
    }

    /// 0 for single-pinhole surfaces.
    pub fn max_slit_exponent(&self) -> u32 {
        self.basis.slit_deg()
    }

    /// `(exponents, coefficient)` pairs of the X surface in coefficient order.
    pub fn terms_x(&self) -> impl Iterator<Item = (Exponents, f64)> + '_ {
        self.basis.exponents().into_iter().zip(self.x.iter().copied())
    }

    /// `(exponents, coefficient)` pairs of the Y surface in coefficient order.
    pub fn terms_y(&self) -> impl Iterator<Item = (Exponents, f64)> + '_ {
        self.basis.exponents().into_iter().zip(self.y.iter().copied())
    }

    /// Coefficient of one term, `(x, y)`.
    pub fn coefficient(&self, e: Exponents) -> Option<(f64, f64)> {
        self.basis.index_of(e).map(|i| (self.x[i], self.y[i]))
    }

    /// Detector position predicted for a physical coordinate.
    ///
    /// A missing slit position evaluates at the slit centre (0).
    pub fn evaluate(&self, order: u32, wavelength: f64, slit: Option<f64>) -> (f64, f64) {
        let row = self
            .basis
            .design_row(order as f64, wavelength, slit.unwrap_or(0.0));
        let x = row.iter().zip(&self.x).map(|(r, c)| r * c).sum();
        let y = row.iter().zip(&self.y).map(|(r, c)| r * c).sum();
        (x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_coeffs() {
        let single = Basis::Single {
            order_deg: 2,
            wavelength_deg: 3,
        };
        assert_eq!(single.num_coeffs(), 12);
        assert_eq!(single.slit_deg(), 0);

        let multi = Basis::Multi {
            order_deg: 3,
            wavelength_deg: 4,
            slit_deg: 2,
        };
        assert_eq!(multi.num_coeffs(), 4 * 5 * 3);
    }

    #[test]
    fn test_exponent_order_and_index() {
        let basis = Basis::Multi {
            order_deg: 1,
            wavelength_deg: 2,
            slit_deg: 1,
        };
        let exps = basis.exponents();
        assert_eq!(exps.len(), basis.num_coeffs());
        let names: Vec<String> = exps.iter().map(|e| e.column_name()).collect();
        assert_eq!(&names[..4], &["c000", "c001", "c010", "c011"]);
        assert_eq!(names.last().map(String::as_str), Some("c121"));
        for (i, e) in exps.iter().enumerate() {
            assert_eq!(basis.index_of(*e), Some(i));
        }
        assert_eq!(
            basis.index_of(Exponents {
                order: 2,
                wavelength: 0,
                slit: 0
            }),
            None
        );
    }

    #[test]
    fn test_design_row_values() {
        let basis = Basis::Single {
            order_deg: 1,
            wavelength_deg: 2,
        };
        // m = 2, λ = 3 → [1, 3, 9, 2, 6, 18]
        let row = basis.design_row(2.0, 3.0, 99.0);
        assert_eq!(row, vec![1.0, 3.0, 9.0, 2.0, 6.0, 18.0]);

        let multi = Basis::Multi {
            order_deg: 0,
            wavelength_deg: 1,
            slit_deg: 1,
        };
        // λ = 3, s = -2 → [1, -2, 3, -6]
        assert_eq!(multi.design_row(5.0, 3.0, -2.0), vec![1.0, -2.0, 3.0, -6.0]);
    }

    #[test]
    fn test_evaluate() {
        let basis = Basis::Single {
            order_deg: 1,
            wavelength_deg: 1,
        };
        // X = 10 + 2λ + 3m + mλ ; Y = 1 - m
        let set = PolynomialCoefficientSet::new(
            basis,
            vec![10.0, 2.0, 3.0, 1.0],
            vec![1.0, 0.0, -1.0, 0.0],
        )
        .unwrap();
        let (x, y) = set.evaluate(2, 0.5, None);
        assert!((x - (10.0 + 1.0 + 6.0 + 1.0)).abs() < 1e-12);
        assert!((y - (-1.0)).abs() < 1e-12);
        assert_eq!(
            set.coefficient(Exponents {
                order: 1,
                wavelength: 1,
                slit: 0
            }),
            Some((1.0, 0.0))
        );
    }

    #[test]
    fn test_new_rejects_wrong_length() {
        let basis = Basis::Single {
            order_deg: 1,
            wavelength_deg: 1,
        };
        assert!(PolynomialCoefficientSet::new(basis, vec![0.0; 3], vec![0.0; 4]).is_err());
    }
}
