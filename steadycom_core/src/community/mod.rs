//! Module for assembling and solving community metabolic models

pub mod exchange;
pub mod result;
pub mod session;
