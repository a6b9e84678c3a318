//! Global configuration defaults shared across the crate.
use std::sync::{LazyLock, RwLock};

pub static CONFIGURATION: LazyLock<RwLock<Configuration>> =
    LazyLock::new(|| RwLock::new(Configuration::default()));

pub struct Configuration {
    /// Default lower flux bound for reactions and problem variables
    pub lower_bound: f64,
    /// Default upper flux bound for reactions and problem variables
    pub upper_bound: f64,
    /// Tolerance used for floating point comparisons (e.g. abundance sums)
    pub tolerance: f64,
    /// Large constant standing in for "unconstrained" in linear formulations
    pub big_m: f64,
    /// Which solver backend to use
    pub solver: Solver,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            lower_bound: -1000.,
            upper_bound: 1000.,
            tolerance: 1e-07,
            big_m: 10_000.,
            solver: Solver::Microlp,
        }
    }
}

/// Enum used to specify the default solver to use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Solver {
    /// Use the microlp simplex solver
    Microlp,
}
