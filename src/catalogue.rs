//! Predicted line catalogue.
//!
//! A catalogue is the read-only table of expected arc lines for one detector
//! arm and pinhole mode. It is loaded from CSV with columns
//!
//! | column | type | required |
//! |---|---|---|
//! | `order` | integer | yes |
//! | `wavelength` | float | yes |
//! | `slit_index` | integer | no |
//! | `slit_position` | float | no |
//! | `detector_x` (or `predicted_x`) | float | yes |
//! | `detector_y` (or `predicted_y`) | float | yes |
//!
//! Header names are matched case-insensitively; extra columns are ignored.

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::line::PredictedLine;
use crate::polynomial::{Basis, Mode};

/// Immutable list of predicted lines with unique `(order, wavelength, slit)` keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineCatalogue {
    lines: Vec<PredictedLine>,
}

#[derive(Debug, Deserialize)]
struct CatalogueRow {
    order: u32,
    wavelength: f64,
    #[serde(default)]
    slit_index: Option<u32>,
    #[serde(default)]
    slit_position: Option<f64>,
    #[serde(alias = "predicted_x")]
    detector_x: f64,
    #[serde(alias = "predicted_y")]
    detector_y: f64,
}

impl LineCatalogue {
    /// Build a catalogue, rejecting non-finite values and duplicate line keys.
    pub fn new(lines: Vec<PredictedLine>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(lines.len());
        for line in &lines {
            anyhow::ensure!(
                line.wavelength.is_finite()
                    && line.predicted_x.is_finite()
                    && line.predicted_y.is_finite()
                    && line.slit_position.map_or(true, f64::is_finite),
                "non-finite value in catalogue line {}",
                line.key()
            );
            anyhow::ensure!(
                seen.insert(line.key()),
                "duplicate catalogue line {}",
                line.key()
            );
        }
        Ok(Self { lines })
    }

    /// Load a catalogue from a CSV file.
    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open line catalogue: {}", path.display()))?;
        let catalogue = Self::from_csv_reader(file)
            .with_context(|| format!("Failed to read line catalogue: {}", path.display()))?;
        info!(
            "Loaded {} predicted lines from {}",
            catalogue.len(),
            path.display()
        );
        Ok(catalogue)
    }

    /// Parse a catalogue from CSV text.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let headers: csv::StringRecord = rdr
            .headers()
            .context("Failed to read catalogue header")?
            .iter()
            .map(str::to_ascii_lowercase)
            .collect();
        rdr.set_headers(headers);

        let mut lines = Vec::new();
        for (i, row) in rdr.deserialize::<CatalogueRow>().enumerate() {
            // Row 1 is the header.
            let row = row.with_context(|| format!("Invalid catalogue row {}", i + 2))?;
            lines.push(PredictedLine {
                order: row.order,
                wavelength: row.wavelength,
                slit_index: row.slit_index,
                slit_position: row.slit_position,
                predicted_x: row.detector_x,
                predicted_y: row.detector_y,
            });
        }
        debug!("Parsed {} catalogue rows", lines.len());
        Self::new(lines)
    }

    pub fn lines(&self) -> &[PredictedLine] {
        &self.lines
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PredictedLine> {
        self.lines.iter()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn into_lines(self) -> Vec<PredictedLine> {
        self.lines
    }

    /// Number of lines without a slit position.
    pub fn missing_slit_positions(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| l.slit_position.is_none())
            .count()
    }

    /// Lines at the central pinhole.
    pub fn central_lines(&self, mid_slit_index: Option<u32>) -> Vec<&PredictedLine> {
        self.lines
            .iter()
            .filter(|l| is_central(l, mid_slit_index))
            .collect()
    }

    /// Lines used by a fit in the given mode.
    ///
    /// Single-pinhole fits of a catalogue that lists every pinhole keep only
    /// the central-pinhole rows. Everything else is returned unchanged.
    pub fn for_mode(&self, mode: Mode, mid_slit_index: Option<u32>) -> Self {
        match (mode, mid_slit_index) {
            (Mode::Single, Some(mid)) if self.lines.iter().any(|l| l.slit_index.is_some()) => {
                let lines: Vec<PredictedLine> = self
                    .lines
                    .iter()
                    .filter(|l| l.slit_index == Some(mid))
                    .cloned()
                    .collect();
                debug!(
                    "Kept {} of {} catalogue lines at slit index {}",
                    lines.len(),
                    self.lines.len(),
                    mid
                );
                Self { lines }
            }
            _ => self.clone(),
        }
    }

    /// New catalogue with every line moved to `f(line)`. Line keys are kept.
    pub fn with_positions<F>(&self, f: F) -> Self
    where
        F: Fn(&PredictedLine) -> (f64, f64),
    {
        let lines = self
            .lines
            .iter()
            .map(|l| {
                let (x, y) = f(l);
                l.moved_to(x, y)
            })
            .collect();
        Self { lines }
    }

    /// Check that the catalogue can support the requested basis.
    pub fn check_dimensionality(&self, basis: &Basis) -> Result<(), ConfigError> {
        let slit_deg = basis.slit_deg();
        if slit_deg > 0 {
            let missing = self.missing_slit_positions();
            if missing > 0 {
                return Err(ConfigError::MissingSlitPositions { slit_deg, missing });
            }
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a LineCatalogue {
    type Item = &'a PredictedLine;
    type IntoIter = std::slice::Iter<'a, PredictedLine>;

    fn into_iter(self) -> Self::IntoIter {
        self.lines.iter()
    }
}

/// Tolerance on the slit position of the central pinhole (arcsec).
const CENTRAL_SLIT_EPS: f64 = 1e-6;

/// Whether a line belongs to the central pinhole.
///
/// With `mid_slit_index` set, lines carrying a slit index are matched on it.
/// Otherwise the central pinhole is the one at slit position 0; a line with
/// no slit position counts as central.
pub fn is_central(line: &PredictedLine, mid_slit_index: Option<u32>) -> bool {
    match (mid_slit_index, line.slit_index) {
        (Some(mid), Some(idx)) => idx == mid,
        _ => line.slit_position.unwrap_or(0.0).abs() < CENTRAL_SLIT_EPS,
    }
}
