//! Tetra Grammar - Evolving tetrahedral soft-robot bodies from growth grammars.
//!
//! A body is grown from a single seed tetrahedron by a small rewriting
//! grammar: every pending surface triangle carries a label, and the rule for
//! that label either relabels it, grows a new tetrahedron on it, or
//! subdivides it. A genetic algorithm searches the space of grammars.
//!
//! # Architecture
//!
//! The crate is split into two main modules:
//!
//! - `schema`: Configuration types for runs
//! - `compute`: Grammar chromosomes, mesh expansion, STL export, and the
//!   evolutionary loop (`compute::evolution`)
//!
//! # Example
//!
//! ```rust,no_run
//! use tetra_grammar::{
//!     compute::{Chromosome, MeshExpander},
//!     schema::{DebugFlags, MeshConfig},
//! };
//!
//! let grammar: Chromosome = "icaccgbdbdgbadagcbcdrdccb".parse().unwrap();
//!
//! // Grow the body for 25 steps
//! let expander = MeshExpander::build(&grammar, 25).unwrap();
//! let mesh = expander.build_mesh(&MeshConfig::default(), &DebugFlags::default());
//!
//! println!("{} nodes, {} skin faces", mesh.nodes.len(), mesh.faces.len());
//! ```

pub mod compute;
pub mod schema;

// Re-export commonly used types
pub use compute::evolution::EvolutionaryLoop;
pub use compute::{Chromosome, MeshExpander, SoftBodyMesh};
pub use schema::RunConfig;
