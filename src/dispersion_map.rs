//! The dispersion map artifact.
//!
//! A [`DispersionMap`] is the final product of a run: the fitted X and Y
//! surfaces as `(exponents → coefficient)` terms plus fit metadata. It can be
//! stored three ways:
//!
//! - a coefficient table in CSV, one row per axis:
//!   `axis,order-deg,wavelength-deg,slit-deg,c000,c001,…`. This carries the
//!   surfaces only and is what later stages read back as a prior solution.
//! - JSON via serde, carrying the whole record.
//! - a compact rkyv binary, carrying the whole record.

use std::io::{Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use rkyv::{Archive, Deserialize, Serialize};

use crate::fit::Convergence;
use crate::polynomial::{Basis, Exponents, Mode, PolynomialCoefficientSet};

const TABLE_META: [&str; 4] = ["axis", "order-deg", "wavelength-deg", "slit-deg"];

/// One monomial term of a surface.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize, Archive, Serialize, Deserialize)]
pub struct CoefficientTerm {
    pub exponents: Exponents,
    pub value: f64,
}

/// Fitted dispersion (and spatial) solution with its fit statistics.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, Archive, Serialize, Deserialize)]
pub struct DispersionMap {
    pub mode: Mode,
    pub order_deg: u32,
    pub wavelength_deg: u32,
    /// 0 for single-pinhole maps.
    pub slit_deg: u32,
    pub coefficients_x: Vec<CoefficientTerm>,
    pub coefficients_y: Vec<CoefficientTerm>,
    pub final_rms_x: f64,
    pub final_rms_y: f64,
    pub lines_used: u32,
    pub lines_rejected: u32,
    /// `false` when the fit stopped at the iteration limit.
    pub converged: bool,
}

/// A physical coordinate evaluated through a map.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MapPosition {
    pub order: u32,
    pub wavelength: f64,
    pub slit_position: Option<f64>,
    pub x: f64,
    pub y: f64,
}

impl DispersionMap {
    pub fn from_fit(
        coefficients: &PolynomialCoefficientSet,
        final_rms_x: f64,
        final_rms_y: f64,
        lines_used: usize,
        lines_rejected: usize,
        convergence: Convergence,
    ) -> Self {
        Self {
            mode: coefficients.mode(),
            order_deg: coefficients.max_order_exponent(),
            wavelength_deg: coefficients.max_wavelength_exponent(),
            slit_deg: coefficients.max_slit_exponent(),
            coefficients_x: collect_terms(coefficients.terms_x()),
            coefficients_y: collect_terms(coefficients.terms_y()),
            final_rms_x,
            final_rms_y,
            lines_used: lines_used as u32,
            lines_rejected: lines_rejected as u32,
            converged: convergence == Convergence::Converged,
        }
    }

    pub fn basis(&self) -> Basis {
        match self.mode {
            Mode::Single => Basis::Single {
                order_deg: self.order_deg,
                wavelength_deg: self.wavelength_deg,
            },
            Mode::Multi => Basis::Multi {
                order_deg: self.order_deg,
                wavelength_deg: self.wavelength_deg,
                slit_deg: self.slit_deg,
            },
        }
    }

    /// Rebuild the surfaces. Terms may be listed in any order but must cover
    /// the basis exactly once.
    pub fn coefficient_set(&self) -> Result<PolynomialCoefficientSet> {
        anyhow::ensure!(
            self.mode == Mode::Multi || self.slit_deg == 0,
            "single-pinhole map with slit-deg {}",
            self.slit_deg
        );
        let basis = self.basis();
        let x = place_terms(&basis, &self.coefficients_x).context("x surface")?;
        let y = place_terms(&basis, &self.coefficients_y).context("y surface")?;
        PolynomialCoefficientSet::new(basis, x, y)
    }

    /// Evaluate the map at physical coordinates, dropping positions that land
    /// at non-positive detector coordinates.
    pub fn pixel_positions<I>(&self, coordinates: I) -> Result<Vec<MapPosition>>
    where
        I: IntoIterator<Item = (u32, f64, Option<f64>)>,
    {
        Ok(pixel_positions(&self.coefficient_set()?, coordinates))
    }

    // ── Binary (rkyv) ───────────────────────────────────────────────────────

    pub fn to_rkyv_bytes(&self) -> Result<Vec<u8>> {
        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map_err(|e| anyhow::anyhow!("rkyv serialization failed: {}", e))?;
        Ok(bytes.to_vec())
    }

    pub fn from_rkyv_bytes(bytes: &[u8]) -> Result<Self> {
        let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| anyhow::anyhow!("rkyv deserialization failed: {}", e))
    }

    /// Save the full record as rkyv binary.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_rkyv_bytes()?)
            .with_context(|| format!("Failed to write dispersion map: {}", path.display()))
    }

    /// Load a full record saved with [`save_to_file`](Self::save_to_file).
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read dispersion map: {}", path.display()))?;
        Self::from_rkyv_bytes(&bytes)
            .with_context(|| format!("Corrupt dispersion map: {}", path.display()))
    }

    // ── JSON ────────────────────────────────────────────────────────────────

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize dispersion map")
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Failed to parse dispersion map JSON")
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?)
            .with_context(|| format!("Failed to write dispersion map: {}", path.display()))
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read dispersion map: {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("In {}", path.display()))
    }

    // ── Coefficient table (CSV) ─────────────────────────────────────────────

    /// Write the coefficient table.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        write_coefficient_table(&self.coefficient_set()?, writer)
    }

    pub fn save_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create coefficient table: {}", path.display()))?;
        self.write_csv(file)
            .with_context(|| format!("Failed to write coefficient table: {}", path.display()))
    }
}

/// Write both surfaces of a coefficient set as a two-row CSV table.
pub fn write_coefficient_table<W: Write>(coefficients: &PolynomialCoefficientSet, writer: W) -> Result<()> {
    let basis = coefficients.basis();
    let mut wtr = csv::Writer::from_writer(writer);
    let mut header: Vec<String> = TABLE_META.iter().map(|s| s.to_string()).collect();
    header.extend(basis.exponents().iter().map(Exponents::column_name));
    wtr.write_record(&header)?;

    for (axis, values) in [
        ("x", coefficients.coefficients_x()),
        ("y", coefficients.coefficients_y()),
    ] {
        let mut record = vec![
            axis.to_string(),
            basis.order_deg().to_string(),
            basis.wavelength_deg().to_string(),
            basis.slit_deg().to_string(),
        ];
        // `{:?}` keeps the shortest representation that parses back exactly.
        record.extend(values.iter().map(|v| format!("{v:?}")));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Read a coefficient table written by [`write_coefficient_table`].
///
/// Tables with `slit-deg` 0 are read as single-pinhole surfaces.
pub fn read_coefficient_table<R: Read>(reader: R) -> Result<PolynomialCoefficientSet> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let header = rdr.headers().context("Failed to read coefficient table header")?.clone();
    anyhow::ensure!(
        header.len() > TABLE_META.len()
            && header.iter().zip(TABLE_META).all(|(h, m)| h.eq_ignore_ascii_case(m)),
        "coefficient table must start with columns {:?}",
        TABLE_META
    );

    let mut basis: Option<Basis> = None;
    let mut x: Option<Vec<f64>> = None;
    let mut y: Option<Vec<f64>> = None;
    for (i, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("Invalid coefficient table row {}", i + 2))?;
        let field = |k: usize| record.get(k).unwrap_or("");
        let deg = |k: usize| -> Result<u32> {
            field(k)
                .parse()
                .with_context(|| format!("Invalid {} in row {}", TABLE_META[k], i + 2))
        };
        let (od, wd, sd) = (deg(1)?, deg(2)?, deg(3)?);
        let row_basis = if sd == 0 {
            Basis::Single {
                order_deg: od,
                wavelength_deg: wd,
            }
        } else {
            Basis::Multi {
                order_deg: od,
                wavelength_deg: wd,
                slit_deg: sd,
            }
        };
        match basis {
            Some(b) => anyhow::ensure!(b == row_basis, "axes of the coefficient table disagree on degrees"),
            None => {
                let expected: Vec<String> = row_basis.exponents().iter().map(Exponents::column_name).collect();
                let names: Vec<&str> = header.iter().skip(TABLE_META.len()).collect();
                anyhow::ensure!(
                    names.len() == expected.len() && names.iter().zip(&expected).all(|(a, b)| a == b),
                    "coefficient columns do not match degrees ({}, {}, {})",
                    od,
                    wd,
                    sd
                );
                basis = Some(row_basis);
            }
        }

        let values = record
            .iter()
            .skip(TABLE_META.len())
            .map(|v| v.parse::<f64>())
            .collect::<Result<Vec<f64>, _>>()
            .with_context(|| format!("Invalid coefficient in row {}", i + 2))?;
        match field(0).to_ascii_lowercase().as_str() {
            "x" => x = Some(values),
            "y" => y = Some(values),
            other => anyhow::bail!("unknown axis {:?} in row {}", other, i + 2),
        }
    }

    match (basis, x, y) {
        (Some(b), Some(x), Some(y)) => PolynomialCoefficientSet::new(b, x, y),
        _ => anyhow::bail!("coefficient table needs one x row and one y row"),
    }
}

/// Load a coefficient table from disk, e.g. a prior single-pinhole solution.
pub fn load_coefficient_table<P: AsRef<Path>>(path: P) -> Result<PolynomialCoefficientSet> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open coefficient table: {}", path.display()))?;
    read_coefficient_table(file).with_context(|| format!("Failed to read coefficient table: {}", path.display()))
}

/// Evaluate surfaces at physical coordinates, keeping only positions with
/// positive detector X and Y.
pub fn pixel_positions<I>(coefficients: &PolynomialCoefficientSet, coordinates: I) -> Vec<MapPosition>
where
    I: IntoIterator<Item = (u32, f64, Option<f64>)>,
{
    coordinates
        .into_iter()
        .map(|(order, wavelength, slit_position)| {
            let (x, y) = coefficients.evaluate(order, wavelength, slit_position);
            MapPosition {
                order,
                wavelength,
                slit_position,
                x,
                y,
            }
        })
        .filter(|p| p.x > 0.0 && p.y > 0.0)
        .collect()
}

fn collect_terms(terms: impl Iterator<Item = (Exponents, f64)>) -> Vec<CoefficientTerm> {
    terms
        .map(|(exponents, value)| CoefficientTerm { exponents, value })
        .collect()
}

/// Flat coefficient vector from a term list.
fn place_terms(basis: &Basis, terms: &[CoefficientTerm]) -> Result<Vec<f64>> {
    let n = basis.num_coeffs();
    anyhow::ensure!(terms.len() == n, "expected {} terms, found {}", n, terms.len());
    let mut out = vec![f64::NAN; n];
    for t in terms {
        let idx = basis
            .index_of(t.exponents)
            .with_context(|| format!("term {} outside the basis", t.exponents.column_name()))?;
        anyhow::ensure!(out[idx].is_nan(), "duplicate term {}", t.exponents.column_name());
        out[idx] = t.value;
    }
    Ok(out)
}
