//! Provides struct for representing a constraint in an optimization problem
use std::fmt::{Display, Formatter};
use std::sync::{Arc, RwLock};

use crate::optimize::variable::Variable;

/// Represents a linear constraint in an optimization problem
#[derive(Debug, Clone)]
pub enum Constraint {
    /// Represents an equality constraint, where `terms` = `equals`
    Equality {
        /// Used to identify the constraint
        id: String,
        /// Linear terms which are added together, see [`ConstraintTerm`] for more
        terms: Vec<ConstraintTerm>,
        /// The right hand side of the equality constraint
        equals: f64,
    },
    /// Represents an inequality constraint
    Inequality {
        /// Used to identify the constraint
        id: String,
        /// Linear terms which are added together, see [`ConstraintTerm`] for more
        terms: Vec<ConstraintTerm>,
        /// The lowest value the sum of the terms can take
        lower_bound: f64,
        /// The highest value the sum of the terms can take
        upper_bound: f64,
    },
}

impl Constraint {
    /// Create a new equality constraint
    ///
    /// # Parameters
    /// - `id`: Identifier for the constraint
    /// - `variables`: A slice of wrapped variables
    /// - `coefficients`: A slice of coefficients for the variables
    /// - `equals`: The right hand side of the equality
    ///
    /// # Examples
    /// ```rust
    /// use steadycom_core::optimize::constraint::Constraint;
    /// use steadycom_core::optimize::variable::VariableBuilder;
    /// let x = VariableBuilder::default()
    ///     .id("x")
    ///     .lower_bound(0.0)
    ///     .upper_bound(20.)
    ///     .build()
    ///     .unwrap()
    ///     .wrap(); // This wraps the variable in an Arc<RwLock<>>
    /// let y = VariableBuilder::default()
    ///     .id("y")
    ///     .lower_bound(3.0)
    ///     .upper_bound(7.0)
    ///     .build()
    ///     .unwrap()
    ///     .wrap();
    /// // Create a constraint representing 3*x + 2*y = 6
    /// let new_constraint = Constraint::new_equality("c1", &[x, y], &[3.0, 2.0], 6.);
    /// ```
    pub fn new_equality(
        id: &str,
        variables: &[Arc<RwLock<Variable>>],
        coefficients: &[f64],
        equals: f64,
    ) -> Self {
        Constraint::Equality {
            id: id.to_string(),
            terms: Constraint::zip_into_terms(variables, coefficients),
            equals,
        }
    }

    /// Create a new inequality constraint representing
    /// `lower_bound` <= terms <= `upper_bound`
    pub fn new_inequality(
        id: &str,
        variables: &[Arc<RwLock<Variable>>],
        coefficients: &[f64],
        lower_bound: f64,
        upper_bound: f64,
    ) -> Self {
        Constraint::Inequality {
            id: id.to_string(),
            terms: Constraint::zip_into_terms(variables, coefficients),
            lower_bound,
            upper_bound,
        }
    }

    /// Wrap the constraint in an Arc<RwLock<>>
    pub fn wrap(self) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(self))
    }

    /// Get the id of the constraint
    pub fn get_id(&self) -> String {
        match self {
            Constraint::Equality { id, .. } => id.clone(),
            Constraint::Inequality { id, .. } => id.clone(),
        }
    }

    /// Access the linear terms of the constraint
    pub fn terms(&self) -> &[ConstraintTerm] {
        match self {
            Constraint::Equality { terms, .. } => terms,
            Constraint::Inequality { terms, .. } => terms,
        }
    }

    /// Get references to all the variables appearing in the constraint
    pub fn get_variables(&self) -> Vec<Arc<RwLock<Variable>>> {
        self.terms().iter().map(|t| t.variable.clone()).collect()
    }

    /// Multiply every term coefficient and the constraint bounds by `factor`
    ///
    /// This is the structural rewrite used to re-express species-level flux
    /// constraints on a community basis: the factor is the (non-negative)
    /// abundance fraction of the owning species.
    pub fn scale(&mut self, factor: f64) {
        match self {
            Constraint::Equality { terms, equals, .. } => {
                for term in terms.iter_mut() {
                    term.coefficient *= factor;
                }
                *equals *= factor;
            }
            Constraint::Inequality {
                terms,
                lower_bound,
                upper_bound,
                ..
            } => {
                for term in terms.iter_mut() {
                    term.coefficient *= factor;
                }
                *lower_bound *= factor;
                *upper_bound *= factor;
            }
        }
    }

    /// Take a slice of variable references, and a slice of coefficients and zip
    /// them together into a vec of ConstraintTerms
    fn zip_into_terms(
        variables: &[Arc<RwLock<Variable>>],
        coefficients: &[f64],
    ) -> Vec<ConstraintTerm> {
        variables
            .iter()
            .zip(coefficients)
            .map(|(var, coef)| ConstraintTerm {
                variable: var.clone(),
                coefficient: *coef,
            })
            .collect()
    }

    /// Create a string representation of the terms in the Constraint
    fn constraint_to_string(&self) -> String {
        match self {
            Constraint::Equality { terms, equals, .. } => {
                format!("{} = {}", Self::terms_to_string(terms), equals)
            }
            Constraint::Inequality {
                terms,
                lower_bound,
                upper_bound,
                ..
            } => {
                format!(
                    "{} <= {} <= {}",
                    lower_bound,
                    Self::terms_to_string(terms),
                    upper_bound
                )
            }
        }
    }

    /// Convert a vector of terms into a String representation
    fn terms_to_string(terms: &[ConstraintTerm]) -> String {
        let mut str_rep = String::new();
        let Some((last, rest)) = terms.split_last() else {
            return "0".to_string();
        };
        for t in rest {
            str_rep.push_str(format!("{} + ", t).as_str());
        }
        str_rep.push_str(format!("{}", last).as_str());
        str_rep
    }
}

impl Display for Constraint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.constraint_to_string())
    }
}

/// Represents a single term in a constraint, specifically
/// represents the multiplication of the `variable` by the `coefficient`
#[derive(Debug, Clone)]
pub struct ConstraintTerm {
    /// A reference to a [`Variable`]
    pub variable: Arc<RwLock<Variable>>,
    /// The coefficient for the variable
    pub coefficient: f64,
}

impl ConstraintTerm {
    /// Get the id of the variable in this term
    pub fn variable_id(&self) -> String {
        self.variable.read().unwrap().id.clone()
    }
}

impl Display for ConstraintTerm {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}*{}", self.coefficient, self.variable.read().unwrap().id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimize::variable::VariableBuilder;

    fn xy() -> (Arc<RwLock<Variable>>, Arc<RwLock<Variable>>) {
        let x = VariableBuilder::default()
            .id("x")
            .lower_bound(0.0)
            .upper_bound(10.0)
            .build()
            .unwrap()
            .wrap();
        let y = VariableBuilder::default()
            .id("y")
            .lower_bound(0.0)
            .upper_bound(10.0)
            .build()
            .unwrap()
            .wrap();
        (x, y)
    }

    #[test]
    fn equality_constraint() {
        let (x, y) = xy();
        let constraint = Constraint::new_equality("c", &[x, y], &[3.0, 2.0], 6.0);
        assert_eq!(constraint.get_id(), "c");
        assert_eq!(constraint.terms().len(), 2);
        assert_eq!(format!("{}", constraint), "3*x + 2*y = 6");
    }

    #[test]
    fn inequality_constraint() {
        let (x, y) = xy();
        let constraint = Constraint::new_inequality("c", &[x, y], &[1.0, -1.0], -2.0, 4.0);
        assert_eq!(format!("{}", constraint), "-2 <= 1*x + -1*y <= 4");
    }

    #[test]
    fn scale_multiplies_terms_and_bounds() {
        let (x, y) = xy();
        let mut equality = Constraint::new_equality("eq", &[x.clone(), y.clone()], &[2.0, -4.0], 8.0);
        equality.scale(0.5);
        assert!((equality.terms()[0].coefficient - 1.0).abs() < 1e-25);
        assert!((equality.terms()[1].coefficient - -2.0).abs() < 1e-25);
        match equality {
            Constraint::Equality { equals, .. } => assert!((equals - 4.0).abs() < 1e-25),
            Constraint::Inequality { .. } => panic!("constraint changed kind"),
        }

        let mut inequality = Constraint::new_inequality("ineq", &[x, y], &[2.0, 2.0], -2.0, 4.0);
        inequality.scale(0.5);
        match inequality {
            Constraint::Inequality {
                lower_bound,
                upper_bound,
                ..
            } => {
                assert!((lower_bound - -1.0).abs() < 1e-25);
                assert!((upper_bound - 2.0).abs() < 1e-25);
            }
            Constraint::Equality { .. } => panic!("constraint changed kind"),
        }
    }

    #[test]
    fn empty_constraint_display() {
        let constraint = Constraint::new_equality("empty", &[], &[], 0.0);
        assert_eq!(format!("{}", constraint), "0 = 0");
    }
}
