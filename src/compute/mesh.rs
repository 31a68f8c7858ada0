//! Tetrahedral mesh growth driven by a grammar.
//!
//! The expander keeps two append-only arenas (nodes and tetrahedra) and a
//! FIFO queue of pending faces. Each expansion step pops the front face and
//! rewrites it according to the rule for its label:
//!
//! - **Relabel** re-enqueues the face under a new label.
//! - **Grow** erects a regular tetrahedron on the face and enqueues its three
//!   side faces.
//! - **Subdivide** splits the owning tetrahedron 1-to-12 when it is still
//!   whole, or splits only the face 1-to-4 when the tetrahedron has already
//!   been consumed by an earlier subdivision.
//!
//! Every step pops one face and pushes at least one, so the queue never
//! drains. The faces left in the queue form the skin of the finished body.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::geometry::Point3;
use super::grammar::{Chromosome, GrammarError, Label, Rule, RuleType};
use crate::schema::{DebugFlags, MeshConfig};

/// Corners of the seed tetrahedron (regular, edge length `sqrt(3)`).
pub const SEED_NODES: [Point3; 4] = [
    Point3::new(0.0, 1.0, -0.353_553),
    Point3::new(0.866_025, -0.5, -0.353_553),
    Point3::new(-0.866_025, -0.5, -0.353_553),
    Point3::new(0.0, 0.0, 1.060_66),
];

/// Seed faces, wound outward, in initial-rule operand order.
const SEED_FACES: [[usize; 3]; 4] = [[0, 3, 1], [0, 1, 2], [0, 2, 3], [1, 3, 2]];

/// Height of a regular tetrahedron per unit edge length, `sqrt(2/3)`.
const GROW_HEIGHT: f32 = 0.816_496_6;

/// Distance under which two node positions are considered the same point.
pub const MATCH_EPSILON: f32 = 0.001;

/// Tetra arena entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tetra {
    /// Live tetrahedron over four node indices.
    Whole([usize; 4]),
    /// Replaced by its twelve children. Kept so indices stay stable.
    Consumed,
}

impl Tetra {
    /// Node indices, or `None` once consumed.
    pub fn nodes(&self) -> Option<&[usize; 4]> {
        match self {
            Tetra::Whole(nodes) => Some(nodes),
            Tetra::Consumed => None,
        }
    }

    /// Whether the tetra is still live.
    pub fn is_whole(&self) -> bool {
        matches!(self, Tetra::Whole(_))
    }
}

/// A triangle awaiting rewriting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingFace {
    /// Corner node indices, wound outward.
    pub nodes: [usize; 3],
    /// Index of the tetra this face bounds.
    pub tetra: usize,
    /// Nonterminal selecting the rule applied when the face is popped.
    pub label: Label,
}

/// Interprets one grammar as a face-rewriting system.
pub struct MeshExpander<'g> {
    grammar: &'g Chromosome,
    nodes: Vec<Point3>,
    tetras: Vec<Tetra>,
    pending: VecDeque<PendingFace>,
}

impl<'g> MeshExpander<'g> {
    /// Seed a new expander with the unit tetrahedron.
    ///
    /// Grammars without a grow rule are rejected: they can only ever relabel
    /// or subdivide the seed.
    pub fn new(grammar: &'g Chromosome) -> Result<Self, GrammarError> {
        if !grammar.has_grow_rule() {
            return Err(GrammarError::MissingGrowRule);
        }

        let pending = SEED_FACES
            .iter()
            .zip(grammar.initial().operands)
            .map(|(&nodes, label)| PendingFace {
                nodes,
                tetra: 0,
                label,
            })
            .collect();

        Ok(Self {
            grammar,
            nodes: SEED_NODES.to_vec(),
            tetras: vec![Tetra::Whole([0, 1, 2, 3])],
            pending,
        })
    }

    /// Seed and run `expansions` steps.
    pub fn build(grammar: &'g Chromosome, expansions: usize) -> Result<Self, GrammarError> {
        let mut expander = Self::new(grammar)?;
        expander.expand(expansions);
        Ok(expander)
    }

    /// Apply `n` rewriting steps.
    pub fn expand(&mut self, n: usize) {
        for _ in 0..n {
            self.step();
        }
    }

    /// Rewrite the front pending face and return the rule type applied.
    pub fn step(&mut self) -> RuleType {
        // Every rule pushes at least as many faces as it pops.
        let face = self
            .pending
            .pop_front()
            .expect("pending face queue drained");
        let rule = *self.grammar.rule(face.label);

        match rule.kind {
            RuleType::Relabel => self.pending.push_back(PendingFace {
                label: rule.operands[0],
                ..face
            }),
            RuleType::Grow => self.grow(&face, &rule),
            RuleType::Subdivide => self.subdivide(&face, &rule),
            RuleType::Initial => unreachable!("initial rule in a nonterminal slot"),
        }

        rule.kind
    }

    fn push_node(&mut self, point: Point3) -> usize {
        self.nodes.push(point);
        self.nodes.len() - 1
    }

    fn grow(&mut self, face: &PendingFace, rule: &Rule) {
        let [n1, n2, n3] = face.nodes;
        let (v1, v2, v3) = (self.nodes[n1], self.nodes[n2], self.nodes[n3]);

        let center = Point3::centroid(v1, v2, v3);
        let normal = (v1 - center).cross(v2 - center).normalized() * v1.distance(v2) * GROW_HEIGHT;
        let apex = self.push_node(center + normal);

        let tetra = self.tetras.len();
        self.tetras.push(Tetra::Whole([n1, n2, n3, apex]));

        for (edge, label) in [[n1, n2], [n2, n3], [n3, n1]].into_iter().zip(rule.operands) {
            self.pending.push_back(PendingFace {
                nodes: [edge[0], edge[1], apex],
                tetra,
                label,
            });
        }
    }

    fn subdivide(&mut self, face: &PendingFace, rule: &Rule) {
        if let Tetra::Whole(corners) = self.tetras[face.tetra]
            && let Some(slots) = self.corner_slots(face, &corners)
        {
            self.subdivide_tetra(face, corners, slots, rule);
        } else {
            self.subdivide_face(face, rule);
        }
    }

    /// Position of each face vertex among the tetra's corners, by index or
    /// failing that by location.
    fn corner_slots(&self, face: &PendingFace, corners: &[usize; 4]) -> Option<[usize; 3]> {
        let mut slots = [0; 3];
        for (slot, &node) in slots.iter_mut().zip(&face.nodes) {
            *slot = corners.iter().position(|&c| c == node).or_else(|| {
                corners
                    .iter()
                    .position(|&c| self.nodes[c].approx_eq(self.nodes[node], MATCH_EPSILON))
            })?;
        }
        Some(slots)
    }

    /// 1-to-12 split of a whole tetra.
    ///
    /// Children are appended as four corner tetras (one per parent corner),
    /// four tetras under the middle triangle of each parent face (ordered
    /// `012, 013, 023, 123`), then four inner tetras around the centroid.
    fn subdivide_tetra(&mut self, face: &PendingFace, c: [usize; 4], slots: [usize; 3], rule: &Rule) {
        let p = c.map(|i| self.nodes[i]);

        let m01 = self.push_node(p[0].midpoint(p[1]));
        let m02 = self.push_node(p[0].midpoint(p[2]));
        let m03 = self.push_node(p[0].midpoint(p[3]));
        let m12 = self.push_node(p[1].midpoint(p[2]));
        let m13 = self.push_node(p[1].midpoint(p[3]));
        let m23 = self.push_node(p[2].midpoint(p[3]));
        let center = self.push_node(self.nodes[m01].midpoint(self.nodes[m23]));

        let mid = |a: usize, b: usize| match (a.min(b), a.max(b)) {
            (0, 1) => m01,
            (0, 2) => m02,
            (0, 3) => m03,
            (1, 2) => m12,
            (1, 3) => m13,
            _ => m23,
        };

        let base = self.tetras.len();
        self.tetras.extend(
            [
                [c[0], m01, m02, m03],
                [c[1], m01, m12, m13],
                [c[2], m02, m12, m23],
                [c[3], m03, m13, m23],
                [m01, m02, m12, center],
                [m01, m03, m13, center],
                [m02, m03, m23, center],
                [m12, m13, m23, center],
                [m01, m02, m03, center],
                [m01, m12, m13, center],
                [m02, m12, m23, center],
                [m03, m13, m23, center],
            ]
            .map(Tetra::Whole),
        );
        self.tetras[face.tetra] = Tetra::Consumed;

        let [s0, s1, s2] = slots;
        let [f0, f1, f2] = face.nodes;
        let (e01, e12, e02) = (mid(s0, s1), mid(s1, s2), mid(s0, s2));

        // The corner missing from this face picks the middle tetra under it.
        let missing = 6 - s0 - s1 - s2;
        let middle = base + 4 + (3 - missing);

        let children = [
            ([f0, e01, e02], base + s0),
            ([e01, f1, e12], base + s1),
            ([e02, e12, f2], base + s2),
            ([e02, e01, e12], middle),
        ];
        for ((nodes, tetra), label) in children.into_iter().zip(rule.operands) {
            self.pending.push_back(PendingFace {
                nodes,
                tetra,
                label,
            });
        }
    }

    /// 1-to-4 split of a face whose tetra was already subdivided.
    ///
    /// Each child triangle is assigned to a tetra containing all three of its
    /// corners, found by scanning the arena. With coincident nodes more than
    /// one tetra can match; the last one scanned wins.
    fn subdivide_face(&mut self, face: &PendingFace, rule: &Rule) {
        let [n0, n1, n2] = face.nodes;
        let (v0, v1, v2) = (self.nodes[n0], self.nodes[n1], self.nodes[n2]);

        let n3 = self.push_node(v0.midpoint(v1));
        let n4 = self.push_node(v1.midpoint(v2));
        let n5 = self.push_node(v0.midpoint(v2));

        let children = [[n0, n3, n5], [n3, n1, n4], [n5, n4, n2], [n5, n3, n4]];
        let targets = children.map(|tri| tri.map(|n| self.nodes[n]));

        let mut owners = [face.tetra; 4];
        for (index, tetra) in self.tetras.iter().enumerate() {
            let Some(corners) = tetra.nodes() else {
                continue;
            };
            let points = corners.map(|c| self.nodes[c]);
            if let Some(k) = targets.iter().position(|target| contains_all(&points, target)) {
                owners[k] = index;
            }
        }

        for ((nodes, tetra), label) in children.into_iter().zip(owners).zip(rule.operands) {
            self.pending.push_back(PendingFace {
                nodes,
                tetra,
                label,
            });
        }
    }

    /// The grammar being expanded.
    pub fn grammar(&self) -> &Chromosome {
        self.grammar
    }

    /// Node positions in unit scale.
    pub fn nodes(&self) -> &[Point3] {
        &self.nodes
    }

    /// Whole tetra arena, consumed entries included.
    pub fn tetras(&self) -> &[Tetra] {
        &self.tetras
    }

    /// Faces awaiting rewriting, front first.
    pub fn pending_faces(&self) -> &VecDeque<PendingFace> {
        &self.pending
    }

    /// Node indices of every tetra not yet consumed.
    pub fn whole_tetras(&self) -> impl Iterator<Item = &[usize; 4]> {
        self.tetras.iter().filter_map(Tetra::nodes)
    }

    /// Emit the finished body: the pending faces as skin, whole tetras with
    /// their edges as structure, and the lift that rests it above the ground.
    pub fn build_mesh(&self, config: &MeshConfig, debug: &DebugFlags) -> SoftBodyMesh {
        let nodes: Vec<Point3> = self.nodes.iter().map(|&p| p * config.scale).collect();

        if debug.node_positions {
            for (i, p) in nodes.iter().enumerate() {
                log::trace!("node {i}: ({:.4}, {:.4}, {:.4})", p.x, p.y, p.z);
            }
        }

        let faces = self
            .pending
            .iter()
            .map(|face| SkinFace {
                nodes: face.nodes,
                label: face.label,
            })
            .collect();

        let tetras: Vec<[usize; 4]> = self.whole_tetras().copied().collect();

        let mut seen = HashSet::new();
        let mut links = Vec::new();
        for t in &tetras {
            for (a, b) in [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)] {
                let link = [t[a].min(t[b]), t[a].max(t[b])];
                if seen.insert(link) {
                    links.push(link);
                }
            }
        }

        let lowest = nodes.iter().map(|p| p.y).fold(f32::INFINITY, f32::min);
        let translation = Point3::new(0.0, config.ground_clearance - lowest, 0.0);

        if debug.placement {
            log::trace!(
                "lowest node at y = {lowest:.4}, lifting by {:.4}",
                translation.y
            );
        }

        SoftBodyMesh {
            nodes,
            faces,
            tetras,
            links,
            lowest,
            translation,
        }
    }
}

fn contains_all(points: &[Point3; 4], target: &[Point3; 3]) -> bool {
    target
        .iter()
        .all(|t| points.iter().any(|p| p.approx_eq(*t, MATCH_EPSILON)))
}

/// One triangle of the body surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkinFace {
    /// Corner node indices, wound outward.
    pub nodes: [usize; 3],
    /// Label the face carried when expansion stopped.
    pub label: Label,
}

/// A built body, ready for an external physics collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftBodyMesh {
    /// Scaled node positions, before placement.
    pub nodes: Vec<Point3>,
    /// Surface triangles.
    pub faces: Vec<SkinFace>,
    /// Whole tetras.
    pub tetras: Vec<[usize; 4]>,
    /// Unique tetra edges, smaller index first.
    pub links: Vec<[usize; 2]>,
    /// Minimum `y` over the scaled nodes.
    pub lowest: f32,
    /// Offset placing the lowest node at the configured ground clearance.
    pub translation: Point3,
}

impl SoftBodyMesh {
    /// Node positions after placement.
    pub fn placed_nodes(&self) -> impl Iterator<Item = Point3> + '_ {
        self.nodes.iter().map(|&p| p + self.translation)
    }

    /// Corner positions of a skin face after placement.
    pub fn face_points(&self, face: &SkinFace) -> [Point3; 3] {
        face.nodes.map(|n| self.nodes[n] + self.translation)
    }
}
