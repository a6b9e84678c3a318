//! Module providing the interfaces for working with different solvers
pub mod microlp;

use thiserror::Error;

use crate::optimize::problem::Problem;
use crate::optimize::ProblemSolution;

/// Interface implemented by every solver backend
pub trait Solve {
    /// Solve the optimization problem
    ///
    /// Infeasibility and unboundedness are not errors from the backend's point
    /// of view: they are reported through the solution status. An `Err` means
    /// the solver itself failed.
    fn solve(&mut self, problem: &Problem) -> Result<ProblemSolution, SolverError>;
}

/// Errors raised by the solver backends
#[derive(Error, Debug, Clone)]
pub enum SolverError {
    /// The backend failed while solving
    #[error("Solver failed: {0}")]
    SolveFailure(String),
    /// The problem has no variables to optimize over
    #[error("Tried to solve a problem with no variables")]
    EmptyProblem,
}
