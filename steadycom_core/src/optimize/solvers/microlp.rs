//! Solver backend using the pure Rust microlp simplex implementation
use indexmap::IndexMap;
use microlp::{ComparisonOp, OptimizationDirection};
use tracing::trace;

use crate::optimize::constraint::Constraint;
use crate::optimize::objective::ObjectiveSense;
use crate::optimize::problem::Problem;
use crate::optimize::solvers::{Solve, SolverError};
use crate::optimize::{OptimizationStatus, ProblemSolution};

/// Solver backend translating a [`Problem`] into a microlp problem
#[derive(Debug, Default)]
pub struct MicrolpSolver {}

impl Solve for MicrolpSolver {
    fn solve(&mut self, problem: &Problem) -> Result<ProblemSolution, SolverError> {
        if problem.variables().is_empty() {
            return Err(SolverError::EmptyProblem);
        }
        let direction = match problem.objective().sense() {
            ObjectiveSense::Maximize => OptimizationDirection::Maximize,
            ObjectiveSense::Minimize => OptimizationDirection::Minimize,
        };
        // microlp takes the objective coefficient when the variable is created,
        // so accumulate the coefficients (a variable may appear in several
        // objective terms) before adding any variables
        let mut objective_coefficients: IndexMap<String, f64> = IndexMap::new();
        for term in problem.objective().terms() {
            *objective_coefficients
                .entry(term.variable_id())
                .or_insert(0.0) += term.coefficient;
        }

        let mut lp = microlp::Problem::new(direction);
        let mut lp_variables: IndexMap<String, microlp::Variable> = IndexMap::new();
        for (id, variable) in problem.variables() {
            let variable = variable.read().unwrap();
            let coefficient = objective_coefficients.get(id).copied().unwrap_or(0.0);
            let lp_var = lp.add_var(coefficient, (variable.lower_bound, variable.upper_bound));
            lp_variables.insert(id.clone(), lp_var);
        }

        for (id, constraint) in problem.constraints() {
            let constraint = constraint.read().unwrap();
            let terms: Vec<(microlp::Variable, f64)> = constraint
                .terms()
                .iter()
                .map(|term| (lp_variables[&term.variable_id()], term.coefficient))
                .collect();
            match &*constraint {
                Constraint::Equality { equals, .. } => {
                    lp.add_constraint(terms.as_slice(), ComparisonOp::Eq, *equals);
                }
                Constraint::Inequality {
                    lower_bound,
                    upper_bound,
                    ..
                } => {
                    // A two-sided constraint becomes a Ge/Le pair, infinite
                    // bounds are simply dropped
                    if lower_bound.is_finite() {
                        lp.add_constraint(terms.as_slice(), ComparisonOp::Ge, *lower_bound);
                    }
                    if upper_bound.is_finite() {
                        lp.add_constraint(terms.as_slice(), ComparisonOp::Le, *upper_bound);
                    }
                }
            }
            trace!("translated constraint {}", id);
        }

        match lp.solve() {
            Ok(solution) => {
                let variable_values: IndexMap<String, f64> = lp_variables
                    .iter()
                    .map(|(id, lp_var)| (id.clone(), solution[*lp_var]))
                    .collect();
                Ok(ProblemSolution {
                    status: OptimizationStatus::Optimal,
                    objective_value: Some(solution.objective()),
                    variable_values: Some(variable_values),
                })
            }
            Err(microlp::Error::Infeasible) => Ok(ProblemSolution {
                status: OptimizationStatus::Infeasible,
                objective_value: None,
                variable_values: None,
            }),
            Err(microlp::Error::Unbounded) => Ok(ProblemSolution {
                status: OptimizationStatus::Unbounded,
                objective_value: None,
                variable_values: None,
            }),
            Err(other) => Err(SolverError::SolveFailure(other.to_string())),
        }
    }
}
