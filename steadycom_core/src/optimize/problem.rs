//! Provides struct representing an optimization problem
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;
use thiserror::Error;

use crate::configuration::{Solver, CONFIGURATION};
use crate::optimize::constraint::{Constraint, ConstraintTerm};
use crate::optimize::objective::{Objective, ObjectiveSense, ObjectiveTerm};
use crate::optimize::problem::ProblemError::{
    NonExistentVariable, NonExistentVariablesInObjective,
};
use crate::optimize::solvers::microlp::MicrolpSolver;
use crate::optimize::solvers::{Solve, SolverError};
use crate::optimize::variable::{Variable, VariableBuilder};
use crate::optimize::{OptimizationStatus, ProblemSolution};

/// An optimization problem
///
/// Variables and constraints are shared through `Arc<RwLock<>>`, so updating a
/// variable's bounds through the problem is visible to every constraint that
/// references it. Use [`Problem::deep_copy`] when an independent copy is needed.
#[derive(Debug)]
pub struct Problem {
    /// Objective to optimize
    objective: Objective,
    /// Variables of the optimization problem
    variables: IndexMap<String, Arc<RwLock<Variable>>>,
    /// Constraints of the optimization problem
    constraints: IndexMap<String, Arc<RwLock<Constraint>>>,
    /// Current status of the optimization problem
    status: OptimizationStatus,
}

impl Problem {
    // region Creation Functions
    /// Create a new optimization problem
    pub fn new(objective_sense: ObjectiveSense) -> Self {
        Self {
            objective: Objective::new(objective_sense),
            variables: IndexMap::new(),
            constraints: IndexMap::new(),
            status: OptimizationStatus::Unoptimized,
        }
    }

    /// Create a new maximization problem
    pub fn new_maximization() -> Self {
        Self::new(ObjectiveSense::Maximize)
    }

    /// Create a new minimization problem
    pub fn new_minimization() -> Self {
        Self::new(ObjectiveSense::Minimize)
    }

    /// Create an independent copy of this problem
    ///
    /// Every variable and constraint is rebuilt with fresh `Arc`s, so mutating
    /// the copy (for example pinning a variable's bounds before a solve) leaves
    /// the original untouched. A plain `Clone` would share the inner locks.
    pub fn deep_copy(&self) -> Self {
        let mut copy = Problem::new(self.objective.sense());
        for (id, var) in &self.variables {
            let new_var = var.read().unwrap().clone().wrap();
            copy.variables.insert(id.clone(), new_var);
        }
        for (id, cons) in &self.constraints {
            let rebuilt = match &*cons.read().unwrap() {
                Constraint::Equality { id, terms, equals } => Constraint::Equality {
                    id: id.clone(),
                    terms: copy.rebind_terms(terms),
                    equals: *equals,
                },
                Constraint::Inequality {
                    id,
                    terms,
                    lower_bound,
                    upper_bound,
                } => Constraint::Inequality {
                    id: id.clone(),
                    terms: copy.rebind_terms(terms),
                    lower_bound: *lower_bound,
                    upper_bound: *upper_bound,
                },
            };
            copy.constraints.insert(id.clone(), rebuilt.wrap());
        }
        for term in self.objective.terms() {
            let variable = copy.variables[&term.variable_id()].clone();
            copy.objective.add_linear_term(variable, term.coefficient);
        }
        copy
    }

    /// Rebind constraint terms to this problem's copies of the variables
    fn rebind_terms(&self, terms: &[ConstraintTerm]) -> Vec<ConstraintTerm> {
        terms
            .iter()
            .map(|term| ConstraintTerm {
                variable: self.variables[&term.variable_id()].clone(),
                coefficient: term.coefficient,
            })
            .collect()
    }
    // endregion Creation Functions

    // region Update Objective Sense
    /// Update the objective sense of the problem
    pub fn update_objective_sense(&mut self, sense: ObjectiveSense) {
        self.objective.set_sense(sense);
    }
    // endregion Update Objective Sense

    // region Adding Variables
    /// Add a variable to the optimization problem
    pub fn add_variable(&mut self, variable: Arc<RwLock<Variable>>) -> Result<(), ProblemError> {
        // Validate that the variable can in fact be added to the problem
        self.validate_variable(variable.clone())?;
        // Insert the variable into the variables IndexMap
        let var_id = variable.read().unwrap().id.clone();
        self.variables.insert(var_id, variable);
        Ok(())
    }

    /// Create a new variable and add it to the optimization problem
    pub fn add_new_variable(
        &mut self,
        id: &str,
        name: Option<&str>,
        lower_bound: f64,
        upper_bound: f64,
    ) -> Result<(), ProblemError> {
        let new_var = match name {
            Some(name) => VariableBuilder::default()
                .id(id)
                .name(name)
                .lower_bound(lower_bound)
                .upper_bound(upper_bound)
                .build()
                .unwrap()
                .wrap(),
            None => VariableBuilder::default()
                .id(id)
                .lower_bound(lower_bound)
                .upper_bound(upper_bound)
                .build()
                .unwrap()
                .wrap(),
        };
        self.add_variable(new_var)
    }
    // endregion Adding Variables

    // region Adding Constraints
    /// Add a constraint to the problem
    pub fn add_constraint(
        &mut self,
        constraint: Arc<RwLock<Constraint>>,
    ) -> Result<(), ProblemError> {
        self.validate_constraint(constraint.clone())?;
        self.constraints
            .insert(constraint.read().unwrap().get_id(), constraint.clone());
        Ok(())
    }

    /// Create a new equality constraint and add it to the problem
    pub fn add_new_equality_constraint(
        &mut self,
        id: &str,
        variables: &[Arc<RwLock<Variable>>],
        coefficients: &[f64],
        equals: f64,
    ) -> Result<(), ProblemError> {
        let new_cons = Constraint::new_equality(id, variables, coefficients, equals).wrap();
        self.add_constraint(new_cons)
    }

    /// Create a new equality constraint using variable ids rather than variable references, and add it to the problem
    pub fn add_new_equality_constraint_by_id(
        &mut self,
        id: &str,
        variables: &[&str],
        coefficients: &[f64],
        equals: f64,
    ) -> Result<(), ProblemError> {
        let variables = self.resolve_variable_ids(variables)?;
        self.add_new_equality_constraint(id, &variables, coefficients, equals)
    }

    /// Create a new inequality constraint and add it to the problem
    pub fn add_new_inequality_constraint(
        &mut self,
        id: &str,
        variables: &[Arc<RwLock<Variable>>],
        coefficients: &[f64],
        lower_bound: f64,
        upper_bound: f64,
    ) -> Result<(), ProblemError> {
        let new_cons =
            Constraint::new_inequality(id, variables, coefficients, lower_bound, upper_bound)
                .wrap();
        self.add_constraint(new_cons)
    }

    /// Create a new inequality constraint using variable ids rather than variable references, and add it to the problem
    pub fn add_new_inequality_constraint_by_id(
        &mut self,
        id: &str,
        variables: &[&str],
        coefficients: &[f64],
        lower_bound: f64,
        upper_bound: f64,
    ) -> Result<(), ProblemError> {
        let variables = self.resolve_variable_ids(variables)?;
        self.add_new_inequality_constraint(id, &variables, coefficients, lower_bound, upper_bound)
    }

    /// Look up a slice of variable ids, failing if any is not in the problem
    fn resolve_variable_ids(
        &self,
        variables: &[&str],
    ) -> Result<Vec<Arc<RwLock<Variable>>>, ProblemError> {
        variables
            .iter()
            .map(|v_id| {
                self.variables
                    .get(*v_id)
                    .cloned()
                    .ok_or(NonExistentVariable)
            })
            .collect()
    }
    // endregion Adding Constraints

    // region Adding Objective Terms
    /// Add a new linear term to the objective
    pub fn add_new_linear_objective_term(
        &mut self,
        variable: Arc<RwLock<Variable>>,
        coefficient: f64,
    ) -> Result<(), ProblemError> {
        self.validate_objective_variable(&variable)?;
        self.objective.add_linear_term(variable, coefficient);
        Ok(())
    }

    /// Add a new linear term to the objective using the variable id
    pub fn add_new_linear_objective_term_by_id(
        &mut self,
        variable_id: &str,
        coefficient: f64,
    ) -> Result<(), ProblemError> {
        let variable = match self.variables.get(variable_id) {
            Some(variable) => variable.clone(),
            None => return Err(NonExistentVariablesInObjective),
        };
        self.add_new_linear_objective_term(variable, coefficient)
    }

    /// Remove all terms from the objective
    pub fn remove_all_objective_terms(&mut self) {
        self.objective.remove_all_terms();
    }
    // endregion Adding Objective Terms

    // region update variable bounds
    /// Update the bounds of a variable
    pub fn update_variable_bounds(
        &mut self,
        id: &str,
        lower_bound: f64,
        upper_bound: f64,
    ) -> Result<(), ProblemError> {
        if lower_bound > upper_bound {
            return Err(ProblemError::InvalidVariableBounds);
        }
        match self.variables.get(id) {
            Some(var) => {
                let mut var = var.write().unwrap();
                var.lower_bound = lower_bound;
                var.upper_bound = upper_bound;
            }
            None => return Err(NonExistentVariable),
        };
        Ok(())
    }
    // endregion update variable bounds

    // region Accessors
    /// Get a variable by id
    pub fn get_variable(&self, id: &str) -> Option<Arc<RwLock<Variable>>> {
        self.variables.get(id).cloned()
    }

    /// Check whether a variable with the given id is in the problem
    pub fn has_variable(&self, id: &str) -> bool {
        self.variables.contains_key(id)
    }

    /// Get a constraint by id
    pub fn get_constraint(&self, id: &str) -> Option<Arc<RwLock<Constraint>>> {
        self.constraints.get(id).cloned()
    }

    /// Access all variables of the problem, keyed by id
    pub fn variables(&self) -> &IndexMap<String, Arc<RwLock<Variable>>> {
        &self.variables
    }

    /// Access all constraints of the problem, keyed by id
    pub fn constraints(&self) -> &IndexMap<String, Arc<RwLock<Constraint>>> {
        &self.constraints
    }

    /// Access the objective of the problem
    pub fn objective(&self) -> &Objective {
        &self.objective
    }

    /// Get the status from the most recent solve
    pub fn status(&self) -> OptimizationStatus {
        self.status
    }
    // endregion Accessors

    // region Solving
    /// Solve the problem with the solver selected in the global configuration
    pub fn solve(&mut self) -> Result<ProblemSolution, SolverError> {
        let solver = CONFIGURATION.read().unwrap().solver;
        let solution = match solver {
            Solver::Microlp => MicrolpSolver::default().solve(self)?,
        };
        self.status = solution.status;
        Ok(solution)
    }
    // endregion Solving

    // region Validation Functions
    /// Check that a variable to be added is valid to add to this problem
    fn validate_variable(&self, variable: Arc<RwLock<Variable>>) -> Result<(), ProblemError> {
        // Check if there is already a variable with this id
        if self.variables.contains_key(&variable.read().unwrap().id) {
            return Err(ProblemError::VariableIdAlreadyExists);
        };
        // Check if the variable bounds are valid
        let lb = variable.read().unwrap().lower_bound;
        let ub = variable.read().unwrap().upper_bound;
        if lb > ub {
            return Err(ProblemError::InvalidVariableBounds);
        }
        Ok(())
    }

    /// Check that a constraint to be added is valid to add to this Problem
    fn validate_constraint(&self, constraint: Arc<RwLock<Constraint>>) -> Result<(), ProblemError> {
        // Check that a constraint with the same id doesn't already exist
        if self
            .constraints
            .contains_key(&constraint.read().unwrap().get_id())
        {
            return Err(ProblemError::ConstraintAlreadyExists);
        }
        // Check that for inequality constraints the bounds make sense
        match *constraint.read().unwrap() {
            Constraint::Equality { .. } => {}
            Constraint::Inequality {
                lower_bound,
                upper_bound,
                ..
            } => {
                if lower_bound > upper_bound {
                    return Err(ProblemError::InvalidConstraintBounds);
                }
            }
        }
        // Check that the variables in this constraint are in the problem
        for var in constraint.read().unwrap().get_variables() {
            if let Some(problem_var) = self.variables.get(&var.read().unwrap().id) {
                if !Arc::ptr_eq(&var, problem_var) {
                    return Err(ProblemError::NonExistentVariablesInConstraint);
                }
            } else {
                return Err(ProblemError::NonExistentVariablesInConstraint);
            }
        }
        // All checks have passed
        Ok(())
    }

    /// Check that a variable used in an objective term belongs to this Problem
    fn validate_objective_variable(
        &self,
        variable: &Arc<RwLock<Variable>>,
    ) -> Result<(), ProblemError> {
        if let Some(problem_var) = self.variables.get(&variable.read().unwrap().id) {
            if !Arc::ptr_eq(variable, problem_var) {
                return Err(NonExistentVariablesInObjective);
            }
        } else {
            return Err(NonExistentVariablesInObjective);
        }
        Ok(())
    }
    // endregion Validation Functions
}

/// Errors associated with the Problem
#[derive(Error, Debug, Clone)]
pub enum ProblemError {
    /// Error when trying to add a variable with the same id as an existing variable
    #[error("Tried to add a variable with the same id as an existing variable")]
    VariableIdAlreadyExists,
    /// Error when trying to add variable with invalid bounds
    #[error("Tried to add a variable with lower_bound>upper_bound")]
    InvalidVariableBounds,
    /// Error when trying to add a constraint with the same id as an existing constraint
    #[error("Tried to add a constraint with the same id as an existing constraint")]
    ConstraintAlreadyExists,
    /// Error when trying to add a constraint with invalid bounds
    #[error("Tried to add an inequality constraint with lower_bound > upper_bound")]
    InvalidConstraintBounds,
    /// Error when trying to add a constraint that contains variables not in the problem
    #[error("Tried to add a constraint with variables not in the problem")]
    NonExistentVariablesInConstraint,
    /// Error when trying to add an objective term which includes variables not in the problem
    #[error("Tried adding an objective term with variables not in the problem")]
    NonExistentVariablesInObjective,
    /// Error when trying to perform an update on a variable that doesn't exist
    #[error("Tried to access a variable that doesn't exist")]
    NonExistentVariable,
}
