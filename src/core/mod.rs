//! Core types: errors, configuration, index path rules.

pub mod config;
pub mod errors;
pub mod paths;
