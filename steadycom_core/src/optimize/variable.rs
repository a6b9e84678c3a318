//! Module providing representation of optimization problem variables
use std::fmt::{Display, Formatter};
use std::sync::{Arc, RwLock};

use derive_builder::Builder;

use crate::configuration::CONFIGURATION;

/// A continuous decision variable in an optimization problem
#[derive(Builder, Debug, Clone)]
pub struct Variable {
    /// Used to identify the variable (must be unique within a problem)
    #[builder(setter(into))]
    pub id: String,
    /// Optional human readable name
    #[builder(default = "None", setter(into, strip_option))]
    pub name: Option<String>,
    /// Lowest value the variable may take
    #[builder(default = "CONFIGURATION.read().unwrap().lower_bound")]
    pub lower_bound: f64,
    /// Highest value the variable may take
    #[builder(default = "CONFIGURATION.read().unwrap().upper_bound")]
    pub upper_bound: f64,
}

impl Variable {
    /// Wrap the variable in an Arc<RwLock<>> for shared use by constraints and objectives
    pub fn wrap(self) -> Arc<RwLock<Variable>> {
        Arc::new(RwLock::new(self))
    }
}

impl Display for Variable {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "{}", self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_variable() {
        let variable = VariableBuilder::default()
            .id("x")
            .lower_bound(0.0)
            .upper_bound(20.0)
            .build()
            .unwrap();
        assert_eq!(variable.id, "x");
        assert!((variable.lower_bound - 0.0).abs() < 1e-25);
        assert!((variable.upper_bound - 20.0).abs() < 1e-25);
    }

    #[test]
    fn default_bounds_from_configuration() {
        let variable = VariableBuilder::default().id("y").build().unwrap();
        assert!((variable.lower_bound - -1000.0).abs() < 1e-25);
        assert!((variable.upper_bound - 1000.0).abs() < 1e-25);
    }

    #[test]
    fn display_prefers_name() {
        let variable = VariableBuilder::default()
            .id("v1")
            .name("flux through v1")
            .build()
            .unwrap();
        assert_eq!(format!("{}", variable), "flux through v1");
        let unnamed = VariableBuilder::default().id("v2").build().unwrap();
        assert_eq!(format!("{}", unnamed), "v2");
    }
}
