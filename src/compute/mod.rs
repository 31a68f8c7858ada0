//! Compute module - Grammar interpretation, mesh growth, and evolution.

mod geometry;
mod grammar;
mod mesh;
mod stl;

pub mod evolution;

pub use geometry::*;
pub use grammar::*;
pub use mesh::*;
pub use stl::*;
