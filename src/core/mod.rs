//! Core types: errors, configuration, home-directory layout.

pub mod config;
pub mod errors;
pub mod paths;
