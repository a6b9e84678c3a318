//! Structured results returned by the community solve routines
use std::fmt::{Display, Formatter};

use indexmap::IndexMap;
use serde::Serialize;

use crate::optimize::OptimizationStatus;

/// Final status of a community solve
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    /// Both solve stages completed at an optimum
    Optimal,
    /// The linear program has no feasible point
    Infeasible,
    /// The objective is unbounded
    Unbounded,
    /// The solver hit a numerical problem
    NumericalError,
    /// An error was raised during one of the solve stages
    Exception,
}

impl From<OptimizationStatus> for SolveStatus {
    fn from(status: OptimizationStatus) -> Self {
        match status {
            OptimizationStatus::Optimal => SolveStatus::Optimal,
            OptimizationStatus::Infeasible => SolveStatus::Infeasible,
            OptimizationStatus::Unbounded => SolveStatus::Unbounded,
            OptimizationStatus::NumericalError | OptimizationStatus::Unoptimized => {
                SolveStatus::NumericalError
            }
        }
    }
}

impl Display for SolveStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SolveStatus::Optimal => write!(f, "optimal"),
            SolveStatus::Infeasible => write!(f, "infeasible"),
            SolveStatus::Unbounded => write!(f, "unbounded"),
            SolveStatus::NumericalError => write!(f, "numerical_error"),
            SolveStatus::Exception => write!(f, "exception occurred"),
        }
    }
}

/// Per-reaction entry of a [`SolveResult`]
#[derive(Clone, Debug, Serialize)]
pub struct ReactionRecord {
    /// Lower flux bound of the reaction in the solved model
    pub lower_bound: f64,
    /// Upper flux bound of the reaction in the solved model
    pub upper_bound: f64,
    /// Net flux (forward minus reverse) at the optimum, 0 if no solution
    pub flux: f64,
}

/// Structured report from a community solve
///
/// The shape is identical for successful, infeasible, and failed solves, so
/// reporting code has a single path: on failure `status` and `exception`
/// describe the cause and every numeric field is zero.
#[derive(Clone, Debug, Serialize)]
pub struct SolveResult {
    /// Final status of the solve
    pub status: SolveStatus,
    /// Wall-clock duration of the complete solve in seconds
    pub solve_time_seconds: f64,
    /// Whether an error was raised during either solve stage
    pub exception: bool,
    /// Message of the raised error, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception_message: Option<String>,
    /// Optimal value of the primary (growth) objective
    pub mu_objective: f64,
    /// Total absolute flux from the parsimonious stage
    pub flux_objective: f64,
    /// Bounds and flux for every reaction in the community model
    pub reactions: IndexMap<String, ReactionRecord>,
    /// Community-level exchange value for each exchanged metabolite
    pub community_exchange: IndexMap<String, f64>,
}

impl SolveResult {
    /// Serialize the result to a pretty-printed JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display() {
        assert_eq!(format!("{}", SolveStatus::Optimal), "optimal");
        assert_eq!(format!("{}", SolveStatus::Exception), "exception occurred");
    }

    #[test]
    fn status_from_optimization_status() {
        assert_eq!(
            SolveStatus::from(OptimizationStatus::Optimal),
            SolveStatus::Optimal
        );
        assert_eq!(
            SolveStatus::from(OptimizationStatus::Infeasible),
            SolveStatus::Infeasible
        );
    }

    #[test]
    fn serializes_to_json() {
        let mut reactions = IndexMap::new();
        reactions.insert(
            "BIO_A".to_string(),
            ReactionRecord {
                lower_bound: 0.0,
                upper_bound: 1000.0,
                flux: 10.0,
            },
        );
        let mut community_exchange = IndexMap::new();
        community_exchange.insert("glc_e".to_string(), -10.0);
        let result = SolveResult {
            status: SolveStatus::Optimal,
            solve_time_seconds: 0.01,
            exception: false,
            exception_message: None,
            mu_objective: 20.0,
            flux_objective: 40.0,
            reactions,
            community_exchange,
        };
        let json = result.to_json().unwrap();
        assert!(json.contains("\"status\": \"optimal\""));
        assert!(json.contains("\"BIO_A\""));
        assert!(!json.contains("exception_message"));
    }
}
