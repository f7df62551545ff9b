//! Polynomial surface fitting with iterative outlier rejection.

pub mod clip;
pub mod controller;
pub mod solver;

pub use clip::{ClipThreshold, Residual};
pub use controller::{Convergence, Cycle, FitOutcome, FitState, IterationStats, RobustFitter};
pub use solver::fit_surfaces;
