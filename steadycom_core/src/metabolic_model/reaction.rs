//! This module provides a struct for representing reactions
use std::hash::{DefaultHasher, Hash, Hasher};

use derive_builder::Builder;
use indexmap::IndexMap;

use crate::configuration::CONFIGURATION;

/// Represents a reaction in a metabolic model
#[derive(Builder, Debug, Clone)]
pub struct Reaction {
    /// Used to identify the reaction
    pub id: String,
    /// Metabolite stoichiometry of the reaction, a map of metabolite id to
    /// stoichiometric coefficient (negative for consumed, positive for produced)
    #[builder(default = "IndexMap::new()")]
    pub metabolites: IndexMap<String, f64>,
    /// Human-readable reaction name
    #[builder(default = "None")]
    pub name: Option<String>,
    /// Lower flux bound
    #[builder(default = "CONFIGURATION.read().unwrap().lower_bound")]
    pub lower_bound: f64,
    /// Upper flux bound
    #[builder(default = "CONFIGURATION.read().unwrap().upper_bound")]
    pub upper_bound: f64,
}

impl Reaction {
    /// Determine the id associated with the forward flux variable in the optimization problem
    ///
    /// # Note:
    /// The forward id is "{reaction_id}_forward"
    pub fn get_forward_id(&self) -> String {
        format!("{}_forward", &self.id)
    }

    /// Determine the id associated with the reverse flux variable in the optimization problem
    ///
    /// # Note:
    /// The reverse id is "{reaction_id}_reverse_{hexadecimal hash of reaction_id}",
    /// so it cannot collide with the id of a real reaction
    pub fn get_reverse_id(&self) -> String {
        format!("{}_reverse_{}", &self.id, hash_as_hex_string(&self.id))
    }

    /// Determine the upper bound of the variable associated with the forward flux
    pub(crate) fn get_forward_upper_bound(&self) -> f64 {
        if self.upper_bound > 0f64 {
            self.upper_bound
        } else {
            0f64
        }
    }

    /// Determine the lower bound of the variable associated with the forward flux
    pub(crate) fn get_forward_lower_bound(&self) -> f64 {
        if self.lower_bound > 0f64 {
            self.lower_bound
        } else {
            0f64
        }
    }

    /// Determine the upper bound of the variable associated with the reverse flux
    pub(crate) fn get_reverse_upper_bound(&self) -> f64 {
        if self.lower_bound < 0f64 {
            -self.lower_bound
        } else {
            0f64
        }
    }

    /// Determine the lower bound of the variable associated with the reverse flux
    pub(crate) fn get_reverse_lower_bound(&self) -> f64 {
        if self.upper_bound < 0f64 {
            -self.upper_bound
        } else {
            0f64
        }
    }
}

fn hash_as_hex_string<T: Hash>(t: &T) -> String {
    let mut s = DefaultHasher::new();
    t.hash(&mut s);
    format!("{:x}", s.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variable_ids() {
        let reaction = ReactionBuilder::default()
            .id("EXCH_glc".to_string())
            .build()
            .unwrap();
        assert_eq!(reaction.get_forward_id(), "EXCH_glc_forward");
        assert!(reaction.get_reverse_id().starts_with("EXCH_glc_reverse_"));
        // The hash suffix keeps the reverse id distinct from any reaction id
        assert_ne!(reaction.get_reverse_id(), "EXCH_glc_reverse");
    }

    #[test]
    fn reversible_reaction_bounds() {
        let reaction = ReactionBuilder::default()
            .id("r1".to_string())
            .lower_bound(-10.0)
            .upper_bound(25.0)
            .build()
            .unwrap();
        assert!((reaction.get_forward_lower_bound() - 0.0).abs() < 1e-25);
        assert!((reaction.get_forward_upper_bound() - 25.0).abs() < 1e-25);
        assert!((reaction.get_reverse_lower_bound() - 0.0).abs() < 1e-25);
        assert!((reaction.get_reverse_upper_bound() - 10.0).abs() < 1e-25);
    }

    #[test]
    fn irreversible_backward_reaction_bounds() {
        let reaction = ReactionBuilder::default()
            .id("r2".to_string())
            .lower_bound(-30.0)
            .upper_bound(-5.0)
            .build()
            .unwrap();
        assert!((reaction.get_forward_lower_bound() - 0.0).abs() < 1e-25);
        assert!((reaction.get_forward_upper_bound() - 0.0).abs() < 1e-25);
        assert!((reaction.get_reverse_lower_bound() - 5.0).abs() < 1e-25);
        assert!((reaction.get_reverse_upper_bound() - 30.0).abs() < 1e-25);
    }

    #[test]
    fn default_bounds_from_configuration() {
        let reaction = ReactionBuilder::default()
            .id("r3".to_string())
            .build()
            .unwrap();
        assert!((reaction.lower_bound - -1000.0).abs() < 1e-25);
        assert!((reaction.upper_bound - 1000.0).abs() < 1e-25);
    }
}
