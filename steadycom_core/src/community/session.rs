//! Community session: merging species models, building the shared optimization
//! problem, and running the two-stage growth solves
use std::fmt::{Display, Formatter};
use std::time::Instant;

use indexmap::IndexMap;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, trace};

use crate::community::exchange::ExchangeSet;
use crate::community::result::{ReactionRecord, SolveResult, SolveStatus};
use crate::configuration::CONFIGURATION;
use crate::metabolic_model::model::Model;
use crate::optimize::objective::ObjectiveSense;
use crate::optimize::problem::{Problem, ProblemError};
use crate::optimize::ProblemSolution;

/// Setup phase of a [`CommunitySession`]
///
/// The setup steps mutate the canonical community problem and are only valid
/// in a specific order, which the session enforces by tracking its phase and
/// rejecting out-of-order calls with [`CommunityError::WrongPhase`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Species models have been merged, no abundances assigned yet
    Merged,
    /// Abundances have been assigned
    AbundanceSet,
    /// Community exchange variables and constraints exist
    MediumDefined,
    /// Mass balances are abundance scaled and biomass is linked to mu
    Built,
    /// At least one solve has been run
    Solved,
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Merged => write!(f, "merged"),
            Phase::AbundanceSet => write!(f, "abundance_set"),
            Phase::MediumDefined => write!(f, "medium_defined"),
            Phase::Built => write!(f, "built"),
            Phase::Solved => write!(f, "solved"),
        }
    }
}

/// Errors raised while assembling or querying a community session
#[derive(Error, Debug)]
pub enum CommunityError {
    /// A community needs at least two species
    #[error("A community requires at least two species models, got {0}")]
    TooFewMembers(usize),
    /// Species models must carry an id to be merged
    #[error("Species model is missing an id")]
    MissingModelId,
    /// Two species with the same id would corrupt origin tracking
    #[error("Species id {0} is already a community member")]
    DuplicateSpeciesId(String),
    /// The exchange tag pattern could not be compiled
    #[error("Invalid exchange reaction pattern: {0}")]
    InvalidExchangePattern(#[from] regex::Error),
    /// An exchange reaction must move exactly one metabolite
    #[error("Exchange reaction {reaction} touches {count} metabolites, expected exactly 1")]
    MultiMetaboliteExchange { reaction: String, count: usize },
    /// A setup or solve call arrived out of order
    #[error("Operation {operation} requires phase {expected}, but the session is in phase {found}")]
    WrongPhase {
        operation: &'static str,
        expected: &'static str,
        found: Phase,
    },
    /// Abundance map does not have one entry per species
    #[error("Expected one abundance per species ({expected}), got {found}")]
    AbundanceCardinality { expected: usize, found: usize },
    /// A map referenced a species that is not a community member
    #[error("Species {0} is not a community member")]
    UnknownSpecies(String),
    /// Abundance fractions must sum to one
    #[error("Abundances must sum to 1, got {0}")]
    AbundanceSum(f64),
    /// Biomass map does not have one entry per species
    #[error("Expected one biomass reaction per species ({expected}), got {found}")]
    BiomassCardinality { expected: usize, found: usize },
    /// The named biomass reaction is not in the merged model
    #[error("Biomass reaction {0} is not in the community model")]
    BiomassReactionNotFound(String),
    /// An underlying problem mutation failed
    #[error(transparent)]
    Problem(#[from] ProblemError),
}

/// A community metabolic modeling session
///
/// Owns the merged community model and its canonical optimization problem.
/// Setup ([`define_abundance`](CommunitySession::define_abundance),
/// [`define_medium`](CommunitySession::define_medium),
/// [`build_community`](CommunitySession::build_community)) mutates the
/// canonical problem in place; the solve routines always work on a deep copy,
/// so repeated solves never see each other's mutations.
#[derive(Debug)]
pub struct CommunitySession {
    /// The merged community model
    model: Model,
    /// The canonical optimization problem for the community
    problem: Problem,
    /// Ids of the member species, in merge order
    members: Vec<String>,
    /// Exchange reactions grouped by the metabolite they exchange
    exchanges: ExchangeSet,
    /// Map from merged reaction id to the species it came from
    reaction_origin: IndexMap<String, String>,
    /// Map from merged metabolite id to the species it came from
    metabolite_origin: IndexMap<String, String>,
    /// Relative abundance fraction per species
    abundances: IndexMap<String, f64>,
    /// Large constant used for otherwise unconstrained bounds
    big_m: f64,
    /// Current setup phase
    phase: Phase,
}

impl CommunitySession {
    /// Create a session from two or more species models
    ///
    /// Reactions whose id matches `exchange_pattern` are classified as
    /// exchanges of the single metabolite they touch. The bigM bound is taken
    /// from the global configuration.
    pub fn new(models: &[Model], exchange_pattern: &str) -> Result<Self, CommunityError> {
        let big_m = CONFIGURATION.read().unwrap().big_m;
        Self::with_big_m(models, exchange_pattern, big_m)
    }

    /// Create a session with an explicit bigM bound
    pub fn with_big_m(
        models: &[Model],
        exchange_pattern: &str,
        big_m: f64,
    ) -> Result<Self, CommunityError> {
        if models.len() < 2 {
            return Err(CommunityError::TooFewMembers(models.len()));
        }
        let pattern = Regex::new(exchange_pattern)?;
        let mut session = CommunitySession {
            model: Model::new_empty(),
            problem: Problem::new_maximization(),
            members: Vec::new(),
            exchanges: ExchangeSet::new(),
            reaction_origin: IndexMap::new(),
            metabolite_origin: IndexMap::new(),
            abundances: IndexMap::new(),
            big_m,
            phase: Phase::Merged,
        };
        for model in models {
            session.merge_member(model, &pattern)?;
        }
        session.rebuild_problem()?;
        Ok(session)
    }

    /// Merge an additional species into an existing community
    ///
    /// Resets the session to the merged phase: the canonical problem is
    /// rebuilt and abundances are cleared, so the abundance, medium, and build
    /// steps must be repeated before the next solve.
    pub fn add_member(&mut self, model: &Model, exchange_pattern: &str) -> Result<(), CommunityError> {
        let pattern = Regex::new(exchange_pattern)?;
        self.merge_member(model, &pattern)?;
        self.abundances.clear();
        self.rebuild_problem()?;
        self.phase = Phase::Merged;
        Ok(())
    }

    /// Assign the relative abundance fraction of every species
    ///
    /// The map must have exactly one entry per member species and the
    /// fractions must sum to one (within the configured tolerance). On any
    /// violation the session is left unchanged.
    pub fn define_abundance(
        &mut self,
        abundances: &IndexMap<String, f64>,
    ) -> Result<(), CommunityError> {
        match self.phase {
            Phase::Merged | Phase::AbundanceSet => {}
            found => {
                return Err(CommunityError::WrongPhase {
                    operation: "define_abundance",
                    expected: "merged",
                    found,
                })
            }
        }
        if abundances.len() != self.members.len() {
            return Err(CommunityError::AbundanceCardinality {
                expected: self.members.len(),
                found: abundances.len(),
            });
        }
        for species in abundances.keys() {
            if !self.members.contains(species) {
                return Err(CommunityError::UnknownSpecies(species.clone()));
            }
        }
        let total: f64 = abundances.values().sum();
        let tolerance = CONFIGURATION.read().unwrap().tolerance;
        if (total - 1.0).abs() > tolerance {
            return Err(CommunityError::AbundanceSum(total));
        }
        self.abundances = abundances.clone();
        self.phase = Phase::AbundanceSet;
        Ok(())
    }

    /// Define the medium: the maximum community-level uptake per metabolite
    ///
    /// Creates one community exchange variable per exchanged metabolite,
    /// bounded above by the medium value (0 for unlisted metabolites, which
    /// can then only leave the community), and an equality constraint tying
    /// the variable to the abundance-weighted sum of the species' own
    /// exchange fluxes. Requires abundances to be assigned first.
    pub fn define_medium(&mut self, media: &IndexMap<String, f64>) -> Result<(), CommunityError> {
        match self.phase {
            Phase::AbundanceSet => {}
            found => {
                return Err(CommunityError::WrongPhase {
                    operation: "define_medium",
                    expected: "abundance_set",
                    found,
                })
            }
        }
        let metabolite_ids: Vec<String> = self.exchanges.metabolites().cloned().collect();
        for metabolite_id in &metabolite_ids {
            let upper_bound = media.get(metabolite_id).copied().unwrap_or(0.0);
            let variable_id = format!("x_c_{}", metabolite_id);
            self.problem
                .add_new_variable(&variable_id, None, -self.big_m, upper_bound)?;
            let mut variable_ids = vec![variable_id.clone()];
            let mut coefficients = vec![1.0];
            if let Some(reaction_ids) = self.exchanges.reactions_for(metabolite_id) {
                for reaction_id in reaction_ids {
                    let reaction = &self.model.reactions[reaction_id];
                    let abundance = self.abundances[&self.reaction_origin[reaction_id]];
                    variable_ids.push(reaction.get_forward_id());
                    coefficients.push(-abundance);
                    variable_ids.push(reaction.get_reverse_id());
                    coefficients.push(abundance);
                }
            }
            let variable_refs: Vec<&str> = variable_ids.iter().map(String::as_str).collect();
            let constraint_id = format!("exch_const_{}", metabolite_id);
            self.problem.add_new_equality_constraint_by_id(
                &constraint_id,
                &variable_refs,
                &coefficients,
                0.0,
            )?;
            if let Some(constraint) = self.problem.get_constraint(&constraint_id) {
                debug!(
                    "created community exchange constraint {}: {}",
                    constraint_id,
                    constraint.read().unwrap()
                );
            }
        }
        self.phase = Phase::MediumDefined;
        Ok(())
    }

    /// Scale every mass balance to a community basis and link biomass to mu
    ///
    /// `biomass` maps each species id to the (unsuffixed) id of its biomass
    /// reaction. Every species-local mass-balance constraint has its
    /// coefficients and bounds multiplied by the species' abundance, a shared
    /// growth-rate variable `mu` in `[0, bigM]` is created, and each species'
    /// biomass flux is constrained to equal `abundance * mu`. The objective
    /// becomes maximizing mu and the session is ready to solve.
    pub fn build_community(
        &mut self,
        biomass: &IndexMap<String, String>,
    ) -> Result<(), CommunityError> {
        match self.phase {
            Phase::MediumDefined => {}
            found => {
                return Err(CommunityError::WrongPhase {
                    operation: "build_community",
                    expected: "medium_defined",
                    found,
                })
            }
        }
        let biomass_ids = self.resolve_biomass(biomass)?;
        for (metabolite_id, species) in &self.metabolite_origin {
            // Metabolites used by no reaction have no mass balance constraint
            if let Some(constraint) = self.problem.get_constraint(metabolite_id) {
                let abundance = self.abundances[species];
                constraint.write().unwrap().scale(abundance);
                trace!("scaled mass balance {} by {}", metabolite_id, abundance);
            }
        }
        self.problem.add_new_variable("mu", None, 0.0, self.big_m)?;
        for (species, reaction_id) in &biomass_ids {
            let reaction = &self.model.reactions[reaction_id];
            let abundance = self.abundances[species];
            let forward_id = reaction.get_forward_id();
            let reverse_id = reaction.get_reverse_id();
            self.problem.add_new_equality_constraint_by_id(
                &format!("bio_const_{}", species),
                &[&forward_id, &reverse_id, "mu"],
                &[1.0, -1.0, -abundance],
                0.0,
            )?;
            debug!("linked biomass {} to mu with abundance {}", reaction_id, abundance);
        }
        self.problem.remove_all_objective_terms();
        self.problem.update_objective_sense(ObjectiveSense::Maximize);
        self.problem.add_new_linear_objective_term_by_id("mu", 1.0)?;
        self.phase = Phase::Built;
        Ok(())
    }

    /// Maximize the community growth rate, then minimize total flux at that rate
    ///
    /// `fixed_rates` pins the named reactions to literal flux values before
    /// the first stage (entries for unknown reactions are ignored). Solver
    /// failures are not propagated: infeasible, unbounded, and errored solves
    /// all come back as a [`SolveResult`] with zeroed numbers and a status
    /// describing the cause, so callers have a single reporting path.
    pub fn max_mu(
        &mut self,
        fixed_rates: &IndexMap<String, f64>,
    ) -> Result<SolveResult, CommunityError> {
        match self.phase {
            Phase::Built | Phase::Solved => {}
            found => {
                return Err(CommunityError::WrongPhase {
                    operation: "max_mu",
                    expected: "built",
                    found,
                })
            }
        }
        let start = Instant::now();
        let mut problem = self.problem.deep_copy();
        self.apply_fixed_rates(&mut problem, fixed_rates)?;
        let result = match run_stage(&mut problem) {
            StageOutcome::Optimal { objective: mu, .. } => {
                // Pin mu at its optimum and re-solve for the most parsimonious
                // flux distribution sustaining that growth rate
                problem.update_variable_bounds("mu", mu, mu)?;
                self.add_parsimonious_stage(&mut problem)?;
                match run_stage(&mut problem) {
                    StageOutcome::Optimal { objective, values } => self.assemble_result(
                        &problem,
                        &values,
                        SolveStatus::Optimal,
                        mu,
                        objective,
                        None,
                        start,
                    ),
                    StageOutcome::Failed(status) => self.empty_result(&problem, status, None, start),
                    StageOutcome::Errored(message) => {
                        self.empty_result(&problem, SolveStatus::Exception, Some(message), start)
                    }
                }
            }
            StageOutcome::Failed(status) => self.empty_result(&problem, status, None, start),
            StageOutcome::Errored(message) => {
                self.empty_result(&problem, SolveStatus::Exception, Some(message), start)
            }
        };
        self.phase = Phase::Solved;
        Ok(result)
    }

    /// Maximize the summed biomass flux of all species, then minimize total flux
    ///
    /// Unlike [`max_mu`](CommunitySession::max_mu) this does not tie species
    /// growth to a shared rate: the objective is the unweighted sum of every
    /// species' biomass flux, and the second stage holds that sum fixed with
    /// an explicit equality constraint. Usable as soon as the medium is
    /// defined; the canonical problem and phase are left unchanged.
    pub fn max_sum(
        &mut self,
        biomass: &IndexMap<String, String>,
    ) -> Result<SolveResult, CommunityError> {
        match self.phase {
            Phase::MediumDefined | Phase::Built | Phase::Solved => {}
            found => {
                return Err(CommunityError::WrongPhase {
                    operation: "max_sum",
                    expected: "medium_defined",
                    found,
                })
            }
        }
        let biomass_ids = self.resolve_biomass(biomass)?;
        let start = Instant::now();
        let mut problem = self.problem.deep_copy();
        problem.remove_all_objective_terms();
        problem.update_objective_sense(ObjectiveSense::Maximize);
        for (_, reaction_id) in &biomass_ids {
            let reaction = &self.model.reactions[reaction_id];
            problem.add_new_linear_objective_term_by_id(&reaction.get_forward_id(), 1.0)?;
            problem.add_new_linear_objective_term_by_id(&reaction.get_reverse_id(), -1.0)?;
        }
        let result = match run_stage(&mut problem) {
            StageOutcome::Optimal {
                objective: total_biomass,
                ..
            } => {
                let mut variable_ids = Vec::new();
                let mut coefficients = Vec::new();
                for (_, reaction_id) in &biomass_ids {
                    let reaction = &self.model.reactions[reaction_id];
                    variable_ids.push(reaction.get_forward_id());
                    coefficients.push(1.0);
                    variable_ids.push(reaction.get_reverse_id());
                    coefficients.push(-1.0);
                }
                let variable_refs: Vec<&str> = variable_ids.iter().map(String::as_str).collect();
                problem.add_new_equality_constraint_by_id(
                    "bio_sum_const",
                    &variable_refs,
                    &coefficients,
                    total_biomass,
                )?;
                self.add_parsimonious_stage(&mut problem)?;
                match run_stage(&mut problem) {
                    StageOutcome::Optimal { objective, values } => self.assemble_result(
                        &problem,
                        &values,
                        SolveStatus::Optimal,
                        total_biomass,
                        objective,
                        None,
                        start,
                    ),
                    StageOutcome::Failed(status) => self.empty_result(&problem, status, None, start),
                    StageOutcome::Errored(message) => {
                        self.empty_result(&problem, SolveStatus::Exception, Some(message), start)
                    }
                }
            }
            StageOutcome::Failed(status) => self.empty_result(&problem, status, None, start),
            StageOutcome::Errored(message) => {
                self.empty_result(&problem, SolveStatus::Exception, Some(message), start)
            }
        };
        Ok(result)
    }

    // region Accessors
    /// Ids of the member species, in merge order
    pub fn members(&self) -> &[String] {
        &self.members
    }

    /// Current setup phase of the session
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The merged community model
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// The exchange reactions grouped by exchanged metabolite
    pub fn exchanges(&self) -> &ExchangeSet {
        &self.exchanges
    }

    /// The species a merged reaction came from, if known
    pub fn reaction_origin(&self, reaction_id: &str) -> Option<&String> {
        self.reaction_origin.get(reaction_id)
    }

    /// The species a merged metabolite came from, if known
    pub fn metabolite_origin(&self, metabolite_id: &str) -> Option<&String> {
        self.metabolite_origin.get(metabolite_id)
    }
    // endregion Accessors

    // region Merge
    /// Merge one species model into the community model
    ///
    /// Every reaction and metabolite id is suffixed with the species id so the
    /// merged namespace stays collision free, and the origin of every entity
    /// is recorded. Exchange classification keys on the bare metabolite id so
    /// the same metabolite exchanged by different species groups together.
    fn merge_member(&mut self, model: &Model, pattern: &Regex) -> Result<(), CommunityError> {
        let species = model.id.clone().ok_or(CommunityError::MissingModelId)?;
        if self.members.contains(&species) {
            return Err(CommunityError::DuplicateSpeciesId(species));
        }
        // Validate the exchange structure before mutating anything
        for (reaction_id, reaction) in &model.reactions {
            if pattern.is_match(reaction_id) && reaction.metabolites.len() != 1 {
                return Err(CommunityError::MultiMetaboliteExchange {
                    reaction: reaction_id.clone(),
                    count: reaction.metabolites.len(),
                });
            }
        }
        for (reaction_id, reaction) in &model.reactions {
            let merged_id = format!("{}_{}", reaction_id, species);
            let mut merged = reaction.clone();
            merged.id = merged_id.clone();
            merged.metabolites = reaction
                .metabolites
                .iter()
                .map(|(metabolite_id, coefficient)| {
                    (format!("{}_{}", metabolite_id, species), *coefficient)
                })
                .collect();
            if pattern.is_match(reaction_id) {
                if let Some((metabolite_id, coefficient)) = reaction.metabolites.first() {
                    self.exchanges.insert(&merged_id, metabolite_id, *coefficient);
                    debug!("classified {} as exchange of {}", merged_id, metabolite_id);
                }
            }
            self.reaction_origin.insert(merged_id, species.clone());
            self.model.add_reaction(merged);
        }
        for (metabolite_id, metabolite) in &model.metabolites {
            let merged_id = format!("{}_{}", metabolite_id, species);
            let mut merged = metabolite.clone();
            merged.id = merged_id.clone();
            self.metabolite_origin.insert(merged_id, species.clone());
            self.model.add_metabolite(merged);
        }
        self.members.push(species);
        self.update_community_identity();
        Ok(())
    }

    /// Name the community model after its members
    fn update_community_identity(&mut self) {
        self.model.id = Some(format!("{}_community", self.members.join("&")));
        self.model.name = Some(format!("{} community", self.members.join(" & ")));
    }

    /// Rebuild the canonical problem from the merged model
    ///
    /// Each reaction becomes a non-negative forward/reverse variable pair and
    /// each metabolite becomes a steady-state mass-balance equality over the
    /// net fluxes of the reactions using it.
    fn rebuild_problem(&mut self) -> Result<(), ProblemError> {
        let mut problem = Problem::new_maximization();
        for reaction in self.model.reactions.values() {
            problem.add_new_variable(
                &reaction.get_forward_id(),
                None,
                reaction.get_forward_lower_bound(),
                reaction.get_forward_upper_bound(),
            )?;
            problem.add_new_variable(
                &reaction.get_reverse_id(),
                None,
                reaction.get_reverse_lower_bound(),
                reaction.get_reverse_upper_bound(),
            )?;
        }
        for metabolite_id in self.model.metabolites.keys() {
            let mut variable_ids = Vec::new();
            let mut coefficients = Vec::new();
            for reaction in self.model.reactions.values() {
                if let Some(coefficient) = reaction.metabolites.get(metabolite_id) {
                    variable_ids.push(reaction.get_forward_id());
                    coefficients.push(*coefficient);
                    variable_ids.push(reaction.get_reverse_id());
                    coefficients.push(-coefficient);
                }
            }
            if variable_ids.is_empty() {
                continue;
            }
            let variable_refs: Vec<&str> = variable_ids.iter().map(String::as_str).collect();
            problem.add_new_equality_constraint_by_id(
                metabolite_id,
                &variable_refs,
                &coefficients,
                0.0,
            )?;
        }
        self.problem = problem;
        Ok(())
    }
    // endregion Merge

    // region Solve helpers
    /// Check a biomass map and resolve it to merged reaction ids
    fn resolve_biomass(
        &self,
        biomass: &IndexMap<String, String>,
    ) -> Result<Vec<(String, String)>, CommunityError> {
        if biomass.len() != self.members.len() {
            return Err(CommunityError::BiomassCardinality {
                expected: self.members.len(),
                found: biomass.len(),
            });
        }
        let mut resolved = Vec::new();
        for (species, reaction_id) in biomass {
            if !self.members.contains(species) {
                return Err(CommunityError::UnknownSpecies(species.clone()));
            }
            let merged_id = format!("{}_{}", reaction_id, species);
            if !self.model.reactions.contains_key(&merged_id) {
                return Err(CommunityError::BiomassReactionNotFound(merged_id));
            }
            resolved.push((species.clone(), merged_id));
        }
        Ok(resolved)
    }

    /// Pin reactions to literal flux values by fixing both variable bounds
    fn apply_fixed_rates(
        &self,
        problem: &mut Problem,
        fixed_rates: &IndexMap<String, f64>,
    ) -> Result<(), ProblemError> {
        for (reaction_id, rate) in fixed_rates {
            let Some(reaction) = self.model.reactions.get(reaction_id) else {
                debug!("ignoring fixed rate for unknown reaction {}", reaction_id);
                continue;
            };
            let forward = rate.max(0.0);
            let reverse = (-rate).max(0.0);
            problem.update_variable_bounds(&reaction.get_forward_id(), forward, forward)?;
            problem.update_variable_bounds(&reaction.get_reverse_id(), reverse, reverse)?;
            debug!("fixed {} to {}", reaction_id, rate);
        }
        Ok(())
    }

    /// Replace the objective with minimizing total absolute flux
    ///
    /// Standard absolute value linearization: each reaction gets an auxiliary
    /// variable in `[0, 2 bigM]` with the constraint pair `aux >= flux` and
    /// `aux >= -flux`, and the auxiliaries are summed in the objective.
    fn add_parsimonious_stage(&self, problem: &mut Problem) -> Result<(), ProblemError> {
        problem.remove_all_objective_terms();
        problem.update_objective_sense(ObjectiveSense::Minimize);
        for reaction in self.model.reactions.values() {
            let auxiliary_id = format!("v_abs_{}", reaction.id);
            problem.add_new_variable(&auxiliary_id, None, 0.0, 2.0 * self.big_m)?;
            let forward_id = reaction.get_forward_id();
            let reverse_id = reaction.get_reverse_id();
            problem.add_new_inequality_constraint_by_id(
                &format!("v_abs_pos_{}", reaction.id),
                &[&auxiliary_id, &forward_id, &reverse_id],
                &[1.0, -1.0, 1.0],
                0.0,
                2.0 * self.big_m,
            )?;
            problem.add_new_inequality_constraint_by_id(
                &format!("v_abs_neg_{}", reaction.id),
                &[&auxiliary_id, &forward_id, &reverse_id],
                &[1.0, 1.0, -1.0],
                0.0,
                2.0 * self.big_m,
            )?;
            problem.add_new_linear_objective_term_by_id(&auxiliary_id, 1.0)?;
        }
        Ok(())
    }

    /// Build the structured report from a finished solve
    #[allow(clippy::too_many_arguments)]
    fn assemble_result(
        &self,
        problem: &Problem,
        values: &IndexMap<String, f64>,
        status: SolveStatus,
        mu_objective: f64,
        flux_objective: f64,
        exception_message: Option<String>,
        start: Instant,
    ) -> SolveResult {
        let mut reactions = IndexMap::new();
        for (reaction_id, reaction) in &self.model.reactions {
            let forward_id = reaction.get_forward_id();
            let reverse_id = reaction.get_reverse_id();
            let (forward_lb, forward_ub) = variable_bounds(problem, &forward_id);
            let (reverse_lb, reverse_ub) = variable_bounds(problem, &reverse_id);
            let flux = values.get(&forward_id).copied().unwrap_or(0.0)
                - values.get(&reverse_id).copied().unwrap_or(0.0);
            reactions.insert(
                reaction_id.clone(),
                ReactionRecord {
                    lower_bound: forward_lb - reverse_ub,
                    upper_bound: forward_ub - reverse_lb,
                    flux,
                },
            );
        }
        let mut community_exchange = IndexMap::new();
        for metabolite_id in self.exchanges.metabolites() {
            let value = values
                .get(&format!("x_c_{}", metabolite_id))
                .copied()
                .unwrap_or(0.0);
            community_exchange.insert(metabolite_id.clone(), value);
        }
        SolveResult {
            status,
            solve_time_seconds: start.elapsed().as_secs_f64(),
            exception: matches!(status, SolveStatus::Exception),
            exception_message,
            mu_objective,
            flux_objective,
            reactions,
            community_exchange,
        }
    }

    /// Build the report for a solve that produced no usable solution
    fn empty_result(
        &self,
        problem: &Problem,
        status: SolveStatus,
        exception_message: Option<String>,
        start: Instant,
    ) -> SolveResult {
        self.assemble_result(
            problem,
            &IndexMap::new(),
            status,
            0.0,
            0.0,
            exception_message,
            start,
        )
    }
    // endregion Solve helpers
}

/// Outcome of one solve stage
enum StageOutcome {
    Optimal {
        objective: f64,
        values: IndexMap<String, f64>,
    },
    Failed(SolveStatus),
    Errored(String),
}

/// Run one solve stage, folding solver errors into the outcome
fn run_stage(problem: &mut Problem) -> StageOutcome {
    match problem.solve() {
        Ok(ProblemSolution {
            status,
            objective_value,
            variable_values,
        }) => {
            if status.is_optimal() {
                StageOutcome::Optimal {
                    objective: objective_value.unwrap_or(0.0),
                    values: variable_values.unwrap_or_default(),
                }
            } else {
                StageOutcome::Failed(status.into())
            }
        }
        Err(err) => StageOutcome::Errored(err.to_string()),
    }
}

/// Bounds of a variable in the problem, `(0, 0)` if it does not exist
fn variable_bounds(problem: &Problem, id: &str) -> (f64, f64) {
    match problem.get_variable(id) {
        Some(variable) => {
            let variable = variable.read().unwrap();
            (variable.lower_bound, variable.upper_bound)
        }
        None => (0.0, 0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metabolic_model::metabolite::MetaboliteBuilder;
    use crate::metabolic_model::reaction::ReactionBuilder;
    use crate::optimize::constraint::Constraint;

    /// One-metabolite species: an exchange bringing glc_e in and a biomass
    /// reaction consuming it
    fn toy_species(species_id: &str) -> Model {
        let mut model = Model::new_empty();
        model.id = Some(species_id.to_string());
        model.add_metabolite(
            MetaboliteBuilder::default()
                .id("glc_e".to_string())
                .build()
                .unwrap(),
        );
        model.add_reaction(
            ReactionBuilder::default()
                .id("EXCH_glc_e".to_string())
                .metabolites(IndexMap::from([("glc_e".to_string(), 1.0)]))
                .lower_bound(-1000.0)
                .upper_bound(1000.0)
                .build()
                .unwrap(),
        );
        model.add_reaction(
            ReactionBuilder::default()
                .id("BIO".to_string())
                .metabolites(IndexMap::from([("glc_e".to_string(), -1.0)]))
                .lower_bound(0.0)
                .upper_bound(1000.0)
                .build()
                .unwrap(),
        );
        model
    }

    fn two_species_session() -> CommunitySession {
        CommunitySession::new(&[toy_species("A"), toy_species("B")], "^EXCH_").unwrap()
    }

    fn even_abundances() -> IndexMap<String, f64> {
        IndexMap::from([("A".to_string(), 0.5), ("B".to_string(), 0.5)])
    }

    fn glc_medium(uptake: f64) -> IndexMap<String, f64> {
        IndexMap::from([("glc_e".to_string(), uptake)])
    }

    fn biomass_map(session: &CommunitySession) -> IndexMap<String, String> {
        session
            .members()
            .iter()
            .map(|species| (species.clone(), "BIO".to_string()))
            .collect()
    }

    fn built_session(uptake: f64) -> CommunitySession {
        let mut session = two_species_session();
        session.define_abundance(&even_abundances()).unwrap();
        session.define_medium(&glc_medium(uptake)).unwrap();
        let biomass = biomass_map(&session);
        session.build_community(&biomass).unwrap();
        session
    }

    #[test]
    fn merge_suffixes_ids_and_records_origin() {
        let session = two_species_session();
        assert_eq!(session.members(), &["A".to_string(), "B".to_string()]);
        assert!(session.model().reactions.contains_key("EXCH_glc_e_A"));
        assert!(session.model().reactions.contains_key("BIO_B"));
        assert!(session.model().metabolites.contains_key("glc_e_A"));
        assert_eq!(session.reaction_origin("BIO_A"), Some(&"A".to_string()));
        assert_eq!(
            session.metabolite_origin("glc_e_B"),
            Some(&"B".to_string())
        );
        assert_eq!(session.model().id.as_deref(), Some("A&B_community"));
    }

    #[test]
    fn exchanges_group_by_bare_metabolite() {
        let session = two_species_session();
        let metabolites: Vec<&String> = session.exchanges().metabolites().collect();
        assert_eq!(metabolites, vec!["glc_e"]);
        assert_eq!(
            session.exchanges().reactions_for("glc_e").unwrap(),
            &["EXCH_glc_e_A".to_string(), "EXCH_glc_e_B".to_string()]
        );
        assert!(session.exchanges().is_exchange("EXCH_glc_e_A"));
        assert!(!session.exchanges().is_exchange("BIO_A"));
    }

    #[test]
    fn too_few_members_rejected() {
        let res = CommunitySession::new(&[toy_species("A")], "^EXCH_");
        assert!(matches!(res, Err(CommunityError::TooFewMembers(1))));
    }

    #[test]
    fn duplicate_species_rejected() {
        let res = CommunitySession::new(&[toy_species("A"), toy_species("A")], "^EXCH_");
        assert!(matches!(res, Err(CommunityError::DuplicateSpeciesId(_))));
    }

    #[test]
    fn model_without_id_rejected() {
        let mut nameless = toy_species("A");
        nameless.id = None;
        let res = CommunitySession::new(&[nameless, toy_species("B")], "^EXCH_");
        assert!(matches!(res, Err(CommunityError::MissingModelId)));
    }

    #[test]
    fn multi_metabolite_exchange_rejected() {
        let mut bad = toy_species("A");
        bad.add_reaction(
            ReactionBuilder::default()
                .id("EXCH_double".to_string())
                .metabolites(IndexMap::from([
                    ("glc_e".to_string(), 1.0),
                    ("ac_e".to_string(), -1.0),
                ]))
                .build()
                .unwrap(),
        );
        let res = CommunitySession::new(&[bad, toy_species("B")], "^EXCH_");
        match res {
            Err(CommunityError::MultiMetaboliteExchange { reaction, count }) => {
                assert_eq!(reaction, "EXCH_double");
                assert_eq!(count, 2);
            }
            _ => panic!("Multi-metabolite exchange not caught"),
        }
    }

    #[test]
    fn abundances_must_sum_to_one() {
        let mut session = two_species_session();
        let bad = IndexMap::from([("A".to_string(), 0.3), ("B".to_string(), 0.3)]);
        let res = session.define_abundance(&bad);
        assert!(matches!(res, Err(CommunityError::AbundanceSum(_))));
        // Rejection leaves the session unchanged
        assert!(session.abundances.is_empty());
        assert_eq!(session.phase(), Phase::Merged);
    }

    #[test]
    fn abundances_must_cover_every_species() {
        let mut session = two_species_session();
        let missing = IndexMap::from([("A".to_string(), 1.0)]);
        assert!(matches!(
            session.define_abundance(&missing),
            Err(CommunityError::AbundanceCardinality {
                expected: 2,
                found: 1
            })
        ));
        let unknown = IndexMap::from([("A".to_string(), 0.5), ("C".to_string(), 0.5)]);
        assert!(matches!(
            session.define_abundance(&unknown),
            Err(CommunityError::UnknownSpecies(_))
        ));
    }

    #[test]
    fn out_of_order_calls_rejected() {
        let mut session = two_species_session();
        // Medium before abundances
        let res = session.define_medium(&glc_medium(10.0));
        assert!(matches!(
            res,
            Err(CommunityError::WrongPhase {
                operation: "define_medium",
                ..
            })
        ));
        // Build before medium
        session.define_abundance(&even_abundances()).unwrap();
        let biomass = biomass_map(&session);
        let res = session.build_community(&biomass);
        assert!(matches!(
            res,
            Err(CommunityError::WrongPhase {
                operation: "build_community",
                ..
            })
        ));
        // Solve before build
        let res = session.max_mu(&IndexMap::new());
        assert!(matches!(
            res,
            Err(CommunityError::WrongPhase { operation: "max_mu", .. })
        ));
    }

    #[test]
    fn unknown_biomass_reaction_rejected() {
        let mut session = two_species_session();
        session.define_abundance(&even_abundances()).unwrap();
        session.define_medium(&glc_medium(10.0)).unwrap();
        let biomass = IndexMap::from([
            ("A".to_string(), "BIO".to_string()),
            ("B".to_string(), "GROWTH".to_string()),
        ]);
        let res = session.build_community(&biomass);
        assert!(matches!(
            res,
            Err(CommunityError::BiomassReactionNotFound(_))
        ));
    }

    #[test]
    fn scaling_rewrites_coefficients_and_bounds() {
        let mut session = two_species_session();
        let abundances = IndexMap::from([("A".to_string(), 0.25), ("B".to_string(), 0.75)]);
        session.define_abundance(&abundances).unwrap();
        session.define_medium(&glc_medium(10.0)).unwrap();
        let biomass = biomass_map(&session);
        session.build_community(&biomass).unwrap();

        // The mass balance for A's copy of glc_e is scaled by exactly 0.25
        let constraint = session.problem.get_constraint("glc_e_A").unwrap();
        let constraint = constraint.read().unwrap();
        for term in constraint.terms() {
            assert!((term.coefficient.abs() - 0.25).abs() < 1e-25);
        }
        match &*constraint {
            Constraint::Equality { equals, .. } => assert!((equals - 0.0).abs() < 1e-25),
            Constraint::Inequality { .. } => panic!("mass balance should be an equality"),
        }
    }

    #[test]
    fn growth_link_ties_biomass_to_mu() {
        let session = built_session(10.0);
        let constraint = session.problem.get_constraint("bio_const_A").unwrap();
        let constraint = constraint.read().unwrap();
        assert_eq!(constraint.terms().len(), 3);
        let mu_term = constraint
            .terms()
            .iter()
            .find(|term| term.variable_id() == "mu")
            .unwrap();
        assert!((mu_term.coefficient - -0.5).abs() < 1e-25);
    }

    #[test]
    fn max_mu_two_species() {
        let mut session = built_session(10.0);
        let result = session.max_mu(&IndexMap::new()).unwrap();
        assert_eq!(result.status, SolveStatus::Optimal);
        assert!(!result.exception);
        // Community uptake capped at 10 and x_c = 0.5 mu, so mu = 20
        assert!((result.mu_objective - 20.0).abs() < 1e-6);
        assert!((result.reactions["BIO_A"].flux - 10.0).abs() < 1e-6);
        assert!((result.reactions["BIO_B"].flux - 10.0).abs() < 1e-6);
        assert!((result.community_exchange["glc_e"] - 10.0).abs() < 1e-6);
        // Four reactions each carrying |flux| = 10
        assert!((result.flux_objective - 40.0).abs() < 1e-6);
        assert!(result.solve_time_seconds >= 0.0);
        assert_eq!(session.phase(), Phase::Solved);
    }

    #[test]
    fn equal_abundances_give_equal_biomass_fluxes() {
        let mut session = built_session(10.0);
        let result = session.max_mu(&IndexMap::new()).unwrap();
        assert!(
            (result.reactions["BIO_A"].flux - result.reactions["BIO_B"].flux).abs() < 1e-6
        );
        // flux(biomass) = abundance * mu for every species
        assert!((result.reactions["BIO_A"].flux - 0.5 * result.mu_objective).abs() < 1e-6);
    }

    #[test]
    fn max_mu_monotonic_in_medium() {
        let mut narrow = built_session(5.0);
        let mut wide = built_session(10.0);
        let narrow_mu = narrow.max_mu(&IndexMap::new()).unwrap().mu_objective;
        let wide_mu = wide.max_mu(&IndexMap::new()).unwrap().mu_objective;
        assert!((narrow_mu - 10.0).abs() < 1e-6);
        assert!(wide_mu >= narrow_mu);
    }

    #[test]
    fn empty_medium_gives_zero_growth() {
        let mut session = two_species_session();
        session.define_abundance(&even_abundances()).unwrap();
        session.define_medium(&IndexMap::new()).unwrap();
        let biomass = biomass_map(&session);
        session.build_community(&biomass).unwrap();
        let result = session.max_mu(&IndexMap::new()).unwrap();
        assert!(result.mu_objective.abs() < 1e-6);
        for record in result.reactions.values() {
            assert!(record.flux.abs() < 1e-6);
        }
    }

    #[test]
    fn repeated_solves_are_deterministic() {
        let mut session = built_session(10.0);
        let first = session.max_mu(&IndexMap::new()).unwrap();
        let second = session.max_mu(&IndexMap::new()).unwrap();
        assert_eq!(first.status, second.status);
        assert!((first.mu_objective - second.mu_objective).abs() < 1e-12);
        assert!((first.flux_objective - second.flux_objective).abs() < 1e-12);
        for (reaction_id, record) in &first.reactions {
            assert!((record.flux - second.reactions[reaction_id].flux).abs() < 1e-12);
        }
    }

    #[test]
    fn fixed_rates_pin_fluxes() {
        let mut session = built_session(10.0);
        let fixed = IndexMap::from([("EXCH_glc_e_A".to_string(), 4.0)]);
        let result = session.max_mu(&fixed).unwrap();
        assert_eq!(result.status, SolveStatus::Optimal);
        // A's uptake of 4 forces its biomass to 4 = 0.5 mu, so mu = 8
        assert!((result.mu_objective - 8.0).abs() < 1e-6);
        assert!((result.reactions["EXCH_glc_e_A"].flux - 4.0).abs() < 1e-6);
        assert!((result.reactions["EXCH_glc_e_A"].lower_bound - 4.0).abs() < 1e-6);
        assert!((result.reactions["EXCH_glc_e_A"].upper_bound - 4.0).abs() < 1e-6);
        // The canonical problem keeps its original bounds
        let forward = session.problem.get_variable("EXCH_glc_e_A_forward").unwrap();
        assert!((forward.read().unwrap().upper_bound - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn conflicting_fixed_rates_report_infeasible() {
        let mut session = built_session(10.0);
        // Both species must grow at 0.5 mu, so unequal pinned biomass fluxes
        // cannot be satisfied
        let fixed = IndexMap::from([
            ("BIO_A".to_string(), 5.0),
            ("BIO_B".to_string(), 3.0),
        ]);
        let result = session.max_mu(&fixed).unwrap();
        assert_eq!(result.status, SolveStatus::Infeasible);
        assert!(!result.exception);
        assert!(result.mu_objective.abs() < 1e-25);
        assert!(result.flux_objective.abs() < 1e-25);
        for record in result.reactions.values() {
            assert!(record.flux.abs() < 1e-25);
        }
        for value in result.community_exchange.values() {
            assert!(value.abs() < 1e-25);
        }
    }

    #[test]
    fn fixed_rates_for_unknown_reactions_are_ignored() {
        let mut session = built_session(10.0);
        let fixed = IndexMap::from([("NOT_A_REACTION".to_string(), 3.0)]);
        let result = session.max_mu(&fixed).unwrap();
        assert_eq!(result.status, SolveStatus::Optimal);
        assert!((result.mu_objective - 20.0).abs() < 1e-6);
    }

    #[test]
    fn max_sum_without_growth_link() {
        let mut session = two_species_session();
        session.define_abundance(&even_abundances()).unwrap();
        session.define_medium(&glc_medium(10.0)).unwrap();
        let biomass = biomass_map(&session);
        let result = session.max_sum(&biomass).unwrap();
        assert_eq!(result.status, SolveStatus::Optimal);
        // 0.5 (bio_A + bio_B) = x_c <= 10, so the summed biomass tops out at 20
        assert!((result.mu_objective - 20.0).abs() < 1e-6);
        assert!((result.flux_objective - 40.0).abs() < 1e-6);
        // max_sum leaves the setup phase untouched
        assert_eq!(session.phase(), Phase::MediumDefined);
    }

    #[test]
    fn max_sum_after_build() {
        let mut session = built_session(10.0);
        let biomass = biomass_map(&session);
        let result = session.max_sum(&biomass).unwrap();
        assert_eq!(result.status, SolveStatus::Optimal);
        // With the mu link in place the summed biomass equals mu = 20
        assert!((result.mu_objective - 20.0).abs() < 1e-6);
    }

    #[test]
    fn add_member_resets_and_extends() {
        let mut session = built_session(10.0);
        session.add_member(&toy_species("C"), "^EXCH_").unwrap();
        assert_eq!(session.phase(), Phase::Merged);
        assert_eq!(session.members().len(), 3);
        assert!(session.model().reactions.contains_key("BIO_C"));
        assert!(session.abundances.is_empty());
        assert_eq!(
            session.exchanges().reactions_for("glc_e").unwrap().len(),
            3
        );

        let abundances = IndexMap::from([
            ("A".to_string(), 0.25),
            ("B".to_string(), 0.25),
            ("C".to_string(), 0.5),
        ]);
        session.define_abundance(&abundances).unwrap();
        session.define_medium(&glc_medium(10.0)).unwrap();
        let biomass = biomass_map(&session);
        session.build_community(&biomass).unwrap();
        let result = session.max_mu(&IndexMap::new()).unwrap();
        assert_eq!(result.status, SolveStatus::Optimal);
        // x_c = (0.25^2 + 0.25^2 + 0.5^2) mu = 0.375 mu <= 10
        assert!((result.mu_objective - 10.0 / 0.375).abs() < 1e-6);
    }

    #[test]
    fn add_member_rejects_duplicates() {
        let mut session = two_species_session();
        let res = session.add_member(&toy_species("A"), "^EXCH_");
        assert!(matches!(res, Err(CommunityError::DuplicateSpeciesId(_))));
    }
}
