//! # steadycom_core
//!
//! Core library for community metabolic modeling under the SteadyCom
//! formalism. Merges single-organism stoichiometric models into one community
//! optimization problem, ties species-level fluxes to community-level
//! exchange rates at fixed relative abundances, and solves a two-stage linear
//! program: maximize the shared growth rate mu, then minimize total absolute
//! flux at that rate.
//!
//! The main entry point is [`community::session::CommunitySession`].

pub mod community;
pub mod configuration;
pub mod metabolic_model;
pub mod optimize;
