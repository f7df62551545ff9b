//! Robust local background removal.
//!
//! The background of a stamp is the sigma-clipped median of its valid pixels:
//!
//! 1. Take the median and standard deviation (about the median) of the
//!    remaining pixels
//! 2. Drop pixels further than `sigma · std` from the median
//! 3. Repeat until nothing is dropped or the iteration budget is used up
//!
//! The final median is subtracted uniformly from the stamp; the final standard
//! deviation is the stamp noise used for the detection threshold.

use super::stamp::Stamp;

/// Sigma-clipped statistics of a stamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackgroundStats {
    /// Clipped median (the subtracted level).
    pub median: f64,
    /// Clipped standard deviation about the median.
    pub std_dev: f64,
    /// Pixels surviving the clip.
    pub n_used: usize,
}

/// Sigma-clipped median and standard deviation of `values` (finite values only).
pub fn sigma_clipped_stats(values: &[f64], sigma: f64, iterations: u32) -> BackgroundStats {
    let mut kept: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if kept.is_empty() {
        return BackgroundStats {
            median: 0.0,
            std_dev: 0.0,
            n_used: 0,
        };
    }
    kept.sort_unstable_by(f64::total_cmp);

    let (mut median, mut std_dev) = median_and_spread(&kept);
    for _ in 0..iterations {
        if std_dev < 1e-12 {
            break;
        }
        let lo = median - sigma * std_dev;
        let hi = median + sigma * std_dev;
        let before = kept.len();
        // Still sorted after retain.
        kept.retain(|&v| v >= lo && v <= hi);
        if kept.len() == before || kept.is_empty() {
            break;
        }
        (median, std_dev) = median_and_spread(&kept);
    }

    BackgroundStats {
        median,
        std_dev,
        n_used: kept.len(),
    }
}

/// Estimate the stamp background and subtract it in place.
pub fn subtract_background(stamp: &mut Stamp, sigma: f64, iterations: u32) -> BackgroundStats {
    let values: Vec<f64> = stamp.valid_pixels().map(|(_, _, v)| v).collect();
    let stats = sigma_clipped_stats(&values, sigma, iterations);
    stamp.offset(stats.median);
    stats
}

/// Median and standard deviation about the median of sorted, non-empty data.
fn median_and_spread(sorted: &[f64]) -> (f64, f64) {
    let n = sorted.len();
    let median = if n % 2 == 0 {
        0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
    } else {
        sorted[n / 2]
    };
    let var = sorted.iter().map(|v| (v - median).powi(2)).sum::<f64>() / n as f64;
    (median, var.sqrt())
}
