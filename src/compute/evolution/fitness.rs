//! Fitness evaluation of grown bodies.
//!
//! Scoring a body is delegated to a [`FitnessEvaluator`]. Physics-based
//! locomotion tests live outside this crate; the built-in
//! [`GeometricEvaluator`] scores bodies from their shape alone.

use crate::compute::geometry::Point3;
use crate::compute::grammar::{Chromosome, GrammarError};
use crate::compute::mesh::{MeshExpander, SoftBodyMesh};
use crate::schema::{DebugFlags, FitnessFunction, MeshConfig, RunConfig};

/// Timing and trace settings handed to every evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvaluationSettings {
    /// Settling time before scoring starts.
    pub wait_time: u32,
    /// Scoring time.
    pub eval_time: u32,
    pub debug: DebugFlags,
}

impl EvaluationSettings {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            wait_time: config.wait_time,
            eval_time: config.eval_time,
            debug: config.debug,
        }
    }
}

/// Evaluation failure for a single individual.
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("Evaluation failed: {0}")]
    Failed(String),
    #[error("Evaluator returned non-finite fitness {0}")]
    NonFinite(f32),
    #[error("Grammar rejected: {0}")]
    Rejected(#[from] GrammarError),
}

/// Scores a built body. Higher is better.
///
/// Evaluators must be deterministic for a given mesh and settings, and
/// shareable across threads for parallel evaluation.
pub trait FitnessEvaluator: Sync {
    fn evaluate(
        &self,
        mesh: &SoftBodyMesh,
        settings: &EvaluationSettings,
    ) -> Result<f32, EvaluationError>;
}

impl<F> FitnessEvaluator for F
where
    F: Fn(&SoftBodyMesh, &EvaluationSettings) -> Result<f32, EvaluationError> + Sync,
{
    fn evaluate(
        &self,
        mesh: &SoftBodyMesh,
        settings: &EvaluationSettings,
    ) -> Result<f32, EvaluationError> {
        self(mesh, settings)
    }
}

/// Grow a chromosome's body and score it.
pub fn evaluate_chromosome<E: FitnessEvaluator + ?Sized>(
    chromosome: &Chromosome,
    expansions: usize,
    mesh_config: &MeshConfig,
    settings: &EvaluationSettings,
    evaluator: &E,
) -> Result<f32, EvaluationError> {
    let expander = MeshExpander::build(chromosome, expansions)?;
    let mesh = expander.build_mesh(mesh_config, &settings.debug);

    let fitness = evaluator.evaluate(&mesh, settings)?;
    if !fitness.is_finite() {
        return Err(EvaluationError::NonFinite(fitness));
    }

    log::debug!(
        "Evaluated {} ({} nodes, {} faces): {fitness:.6}",
        chromosome.encode(),
        mesh.nodes.len(),
        mesh.faces.len()
    );
    Ok(fitness)
}

/// Shape-only evaluator for runs without a physics backend.
#[derive(Debug, Clone)]
pub struct GeometricEvaluator {
    function: FitnessFunction,
}

impl GeometricEvaluator {
    pub fn new(function: FitnessFunction) -> Self {
        Self { function }
    }
}

impl FitnessEvaluator for GeometricEvaluator {
    fn evaluate(
        &self,
        mesh: &SoftBodyMesh,
        _settings: &EvaluationSettings,
    ) -> Result<f32, EvaluationError> {
        if mesh.nodes.is_empty() {
            return Err(EvaluationError::Failed("mesh has no nodes".into()));
        }

        let score = match &self.function {
            FitnessFunction::FaceCount => mesh.faces.len() as f32,
            FitnessFunction::DistanceToPoint { target } => {
                let target = Point3::new(target[0], target[1], target[2]);
                let closest = mesh
                    .placed_nodes()
                    .map(|p| p.distance(target))
                    .fold(f32::INFINITY, f32::min);
                1.0 / (1.0 + closest)
            }
            FitnessFunction::BoundingBoxVolume => {
                let (min, max) = bounds(mesh);
                let extent = max - min;
                extent.x * extent.y * extent.z
            }
        };

        Ok(score)
    }
}

/// Axis-aligned bounds of the placed nodes.
fn bounds(mesh: &SoftBodyMesh) -> (Point3, Point3) {
    let inf = Point3::new(f32::INFINITY, f32::INFINITY, f32::INFINITY);
    mesh.placed_nodes().fold((inf, inf * -1.0), |(lo, hi), p| {
        (
            Point3::new(lo.x.min(p.x), lo.y.min(p.y), lo.z.min(p.z)),
            Point3::new(hi.x.max(p.x), hi.y.max(p.y), hi.z.max(p.z)),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = "icaccgbdbdgbadagcbcdrdccb";

    fn settings() -> EvaluationSettings {
        EvaluationSettings::from_config(&RunConfig::default())
    }

    fn seed_mesh() -> SoftBodyMesh {
        let grammar: Chromosome = EXAMPLE.parse().unwrap();
        MeshExpander::new(&grammar)
            .unwrap()
            .build_mesh(&MeshConfig::default(), &DebugFlags::default())
    }

    #[test]
    fn test_face_count() {
        let evaluator = GeometricEvaluator::new(FitnessFunction::FaceCount);
        let score = evaluator.evaluate(&seed_mesh(), &settings()).unwrap();
        assert_eq!(score, 4.0);
    }

    #[test]
    fn test_bounding_box_volume() {
        let evaluator = GeometricEvaluator::new(FitnessFunction::BoundingBoxVolume);
        let score = evaluator.evaluate(&seed_mesh(), &settings()).unwrap();
        // Seed bounds scaled by 4: 1.732 x 1.5 x 1.414.
        let expected = (0.866_025 * 2.0 * 4.0) * (1.5 * 4.0) * (1.414_213 * 4.0);
        assert!((score - expected).abs() < 1e-2);
    }

    #[test]
    fn test_distance_to_point() {
        let mesh = seed_mesh();
        let on_node = mesh.placed_nodes().next().unwrap();
        let evaluator = GeometricEvaluator::new(FitnessFunction::DistanceToPoint {
            target: [on_node.x, on_node.y, on_node.z],
        });
        let score = evaluator.evaluate(&mesh, &settings()).unwrap();
        assert!((score - 1.0).abs() < 1e-6);

        let far = GeometricEvaluator::new(FitnessFunction::DistanceToPoint {
            target: [0.0, 0.0, 1000.0],
        });
        assert!(far.evaluate(&mesh, &settings()).unwrap() < 0.01);
    }

    #[test]
    fn test_evaluate_chromosome_growth_increases_faces() {
        let grammar: Chromosome = EXAMPLE.parse().unwrap();
        let evaluator = GeometricEvaluator::new(FitnessFunction::FaceCount);
        let config = MeshConfig::default();

        let seed = evaluate_chromosome(&grammar, 0, &config, &settings(), &evaluator).unwrap();
        let grown = evaluate_chromosome(&grammar, 10, &config, &settings(), &evaluator).unwrap();
        assert_eq!(seed, 4.0);
        assert!(grown > seed);
    }

    #[test]
    fn test_closure_evaluator_and_failures() {
        let grammar: Chromosome = EXAMPLE.parse().unwrap();
        let config = MeshConfig::default();

        let nan = |_: &SoftBodyMesh, _: &EvaluationSettings| -> Result<f32, EvaluationError> {
            Ok(f32::NAN)
        };
        assert!(matches!(
            evaluate_chromosome(&grammar, 5, &config, &settings(), &nan),
            Err(EvaluationError::NonFinite(_))
        ));

        let failing = |_: &SoftBodyMesh, _: &EvaluationSettings| -> Result<f32, EvaluationError> {
            Err(EvaluationError::Failed("simulation diverged".into()))
        };
        assert!(matches!(
            evaluate_chromosome(&grammar, 5, &config, &settings(), &failing),
            Err(EvaluationError::Failed(_))
        ));

        let no_grow: Chromosome = "iabcdrabcdrbcdarcdabrdabc".parse().unwrap();
        let constant =
            |_: &SoftBodyMesh, _: &EvaluationSettings| -> Result<f32, EvaluationError> { Ok(1.0) };
        assert!(matches!(
            evaluate_chromosome(&no_grow, 5, &config, &settings(), &constant),
            Err(EvaluationError::Rejected(GrammarError::MissingGrowRule))
        ));
    }
}
