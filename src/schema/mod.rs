//! Schema module - Configuration types for evolutionary runs.

mod config;

pub use config::*;
