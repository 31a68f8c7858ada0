//! Evolutionary search over growth grammars.
//!
//! # Overview
//!
//! - **Fitness** (`fitness`): the evaluator seam and built-in geometric scores
//! - **Roulette** (`roulette`): fitness-proportional parent selection
//! - **Search** (`search`): the generational loop
//! - **Archive** (`archive`): `.pop`/`.best` run logs and their reader
//!
//! # Example
//!
//! ```rust,no_run
//! use tetra_grammar::compute::evolution::{EvolutionaryLoop, GeometricEvaluator, MemoryLog};
//! use tetra_grammar::schema::{FitnessFunction, RunConfig};
//!
//! let config = RunConfig {
//!     random_seed: Some(7),
//!     ..Default::default()
//! };
//! let evaluator = GeometricEvaluator::new(FitnessFunction::FaceCount);
//!
//! let mut ga = EvolutionaryLoop::new(config, evaluator, MemoryLog::new()).unwrap();
//! let summary = ga
//!     .run_with_callback(|report| {
//!         println!("Generation {}: best fitness = {:.3}",
//!             report.generation, report.best.fitness());
//!     })
//!     .unwrap();
//!
//! println!("Best grammar: {}", summary.best.encode());
//! ```

mod archive;
mod fitness;
mod roulette;
mod search;

pub use archive::{
    GenerationLog, GenerationRecord, MemoryLog, RecordError, RunArchive, RunHeader, RunLog,
    format_record, read_best_file,
};
pub use fitness::{
    EvaluationError, EvaluationSettings, FitnessEvaluator, GeometricEvaluator,
    evaluate_chromosome,
};
pub use roulette::RoulettePool;
pub use search::{EvolutionError, EvolutionHistory, EvolutionaryLoop, GenerationReport, RunSummary};
