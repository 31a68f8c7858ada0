//! Run configuration for grammar evolution.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::compute::{DEFAULT_NONTERMINALS, MAX_NONTERMINALS};

/// Top-level configuration for one evolutionary run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of chromosomes in the population.
    #[serde(default = "default_population_size")]
    pub population_size: usize,
    /// Number of evaluate/diversify/select/breed/print cycles.
    #[serde(default = "default_generations")]
    pub generations: usize,
    /// Expansion steps applied when building each body.
    #[serde(default = "default_expansions")]
    pub expansions: usize,
    /// Settling time handed to the evaluator before scoring starts.
    #[serde(default = "default_wait_time")]
    pub wait_time: u32,
    /// Scoring time handed to the evaluator.
    #[serde(default = "default_eval_time")]
    pub eval_time: u32,
    /// Size of the nonterminal alphabet.
    #[serde(default = "default_nonterminals")]
    pub nonterminals: usize,
    /// Random seed for reproducibility. Drawn from entropy when absent.
    #[serde(default)]
    pub random_seed: Option<u64>,
    /// Placement of built bodies.
    #[serde(default)]
    pub mesh: MeshConfig,
    /// Trace toggles passed through to the evaluator.
    #[serde(default)]
    pub debug: DebugFlags,
    /// Built-in evaluator used by the CLI.
    #[serde(default)]
    pub fitness: FitnessFunction,
    /// Evaluate individuals on the rayon thread pool.
    #[serde(default)]
    pub parallel_evaluation: bool,
    /// Directory for `.pop` and `.best` files.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            population_size: default_population_size(),
            generations: default_generations(),
            expansions: default_expansions(),
            wait_time: default_wait_time(),
            eval_time: default_eval_time(),
            nonterminals: default_nonterminals(),
            random_seed: None,
            mesh: MeshConfig::default(),
            debug: DebugFlags::default(),
            fitness: FitnessFunction::default(),
            parallel_evaluation: false,
            output_dir: default_output_dir(),
        }
    }
}

fn default_population_size() -> usize {
    10
}
fn default_generations() -> usize {
    100
}
fn default_expansions() -> usize {
    25
}
fn default_wait_time() -> u32 {
    20
}
fn default_eval_time() -> u32 {
    20
}
fn default_nonterminals() -> usize {
    DEFAULT_NONTERMINALS
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

/// Scale and placement of a built body.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Uniform scale applied to node positions.
    #[serde(default = "default_scale")]
    pub scale: f32,
    /// Height of the lowest node above `y = 0` after placement.
    #[serde(default = "default_ground_clearance")]
    pub ground_clearance: f32,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            scale: default_scale(),
            ground_clearance: default_ground_clearance(),
        }
    }
}

fn default_scale() -> f32 {
    4.0
}
fn default_ground_clearance() -> f32 {
    1.0
}

/// Boolean trace toggles.
///
/// Only `node_positions` and `placement` affect this crate (trace logging
/// during mesh building). The rest are carried for external evaluators and
/// recorded in run headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugFlags {
    /// Write a `<seed>.debug` evaluation trace next to the run logs.
    pub write_to_debug: bool,
    /// Echo each generation's best grammar to stdout.
    pub print_to_screen: bool,
    /// Trace scaled node positions while building a mesh.
    pub node_positions: bool,
    /// Trace the ground placement of a built mesh.
    pub placement: bool,
    /// Ask the evaluator to single-step its simulation.
    pub step_simulation: bool,
    /// Ask the evaluator to render with textures.
    pub textures: bool,
}

/// Built-in geometric fitness functions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FitnessFunction {
    /// Number of skin faces.
    FaceCount,
    /// `1 / (1 + d)` where `d` is the distance from `target` to the closest
    /// placed node.
    DistanceToPoint { target: [f32; 3] },
    /// Volume of the axis-aligned bounds of the placed nodes.
    BoundingBoxVolume,
}

impl Default for FitnessFunction {
    fn default() -> Self {
        Self::BoundingBoxVolume
    }
}

impl RunConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Crossover draws two distinct roulette entries.
        if self.population_size < 2 {
            return Err(ConfigError::PopulationTooSmall);
        }
        if self.generations == 0 {
            return Err(ConfigError::InvalidGenerations);
        }
        if !(1..=MAX_NONTERMINALS).contains(&self.nonterminals) {
            return Err(ConfigError::InvalidNonterminals(self.nonterminals));
        }
        if !(self.mesh.scale > 0.0) {
            return Err(ConfigError::InvalidScale(self.mesh.scale));
        }
        if !self.mesh.ground_clearance.is_finite() {
            return Err(ConfigError::InvalidClearance(self.mesh.ground_clearance));
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Population size must be at least 2")]
    PopulationTooSmall,
    #[error("Generation count must be non-zero")]
    InvalidGenerations,
    #[error("Nonterminal count must be in 1..=26, got {0}")]
    InvalidNonterminals(usize),
    #[error("Mesh scale must be positive, got {0}")]
    InvalidScale(f32),
    #[error("Ground clearance must be finite, got {0}")]
    InvalidClearance(f32),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
}

impl RunConfig {
    /// Load and validate a JSON config file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}
