//! The generational loop: evaluate, diversify, select, breed, print.

use std::io;
use std::time::Instant;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::compute::grammar::{Chromosome, GrammarError, GrammarRng};
use crate::schema::{ConfigError, RunConfig};

use super::archive::GenerationLog;
use super::fitness::{EvaluationError, EvaluationSettings, FitnessEvaluator, evaluate_chromosome};
use super::roulette::RoulettePool;

/// Fitness ratio under which two individuals count as near-duplicates.
const DIVERSITY_SCALAR: f32 = 0.1;

/// Chance, in percent, that a bred child comes from crossover rather than
/// mutation.
const CROSSOVER_PERCENT: u32 = 40;

/// Best and mean fitness after each selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvolutionHistory {
    /// Fitness of the top-ranked individual, one entry per generation.
    pub best_fitness: Vec<f32>,
    /// Population mean after diversification.
    pub mean_fitness: Vec<f32>,
}

/// Output of the print step.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    /// Generation number, starting at 1.
    pub generation: u32,
    /// Top-ranked individual of the generation.
    pub best: Chromosome,
    /// Population mean after diversification.
    pub mean_fitness: f32,
    /// Individuals scored this generation.
    pub evaluated: usize,
    /// Evaluations that failed and took the fallback fitness.
    pub failures: usize,
}

/// Result of a complete run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Seed the run was drawn from.
    pub seed: u64,
    /// Completed generations.
    pub generations: u32,
    /// Fittest individual seen at any selection.
    pub best: Chromosome,
    pub history: EvolutionHistory,
    /// Evaluator calls over the whole run.
    pub evaluations: usize,
    /// Evaluations that took the fallback fitness.
    pub failures: usize,
    /// Wall-clock time.
    pub elapsed_seconds: f64,
}

/// Errors that stop a run.
#[derive(Debug, thiserror::Error)]
pub enum EvolutionError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Grammar error: {0}")]
    Grammar(#[from] GrammarError),
    #[error("Failed to write generation log: {0}")]
    Log(#[from] io::Error),
    #[error("Population is empty, initialize first")]
    Uninitialized,
}

/// Evolves a population of grammars against a fitness evaluator.
///
/// The population is ordered. After selection the first half holds the
/// survivors and `cursor` marks the start of the half that breeding
/// replaces and the next evaluation scores.
pub struct EvolutionaryLoop<E, L> {
    config: RunConfig,
    seed: u64,
    rng: GrammarRng,
    evaluator: E,
    log: L,
    population: Vec<Chromosome>,
    cursor: usize,
    generation: u32,
    history: EvolutionHistory,
    champion: Option<Chromosome>,
    evaluated: usize,
    failures: usize,
    total_evaluations: usize,
    total_failures: usize,
}

impl<E: FitnessEvaluator, L: GenerationLog> EvolutionaryLoop<E, L> {
    /// Create a loop over a validated config. The RNG is seeded from
    /// `random_seed`, or from entropy when it is absent.
    pub fn new(config: RunConfig, evaluator: E, log: L) -> Result<Self, EvolutionError> {
        config.validate()?;
        let seed = config.random_seed.unwrap_or_else(rand::random);

        Ok(Self {
            config,
            seed,
            rng: GrammarRng::new(seed),
            evaluator,
            log,
            population: Vec::new(),
            cursor: 0,
            generation: 1,
            history: EvolutionHistory::default(),
            champion: None,
            evaluated: 0,
            failures: 0,
            total_evaluations: 0,
            total_failures: 0,
        })
    }

    /// Fill the population with random grammars.
    pub fn initialize(&mut self) -> Result<(), EvolutionError> {
        self.population = (0..self.config.population_size)
            .map(|_| Chromosome::random(self.config.nonterminals, &mut self.rng))
            .collect::<Result<_, _>>()?;
        self.cursor = 0;
        self.generation = 1;
        self.history = EvolutionHistory::default();
        self.champion = None;

        log::info!(
            "Initialized {} grammars over {} nonterminals (seed {})",
            self.population.len(),
            self.config.nonterminals,
            self.seed
        );
        Ok(())
    }

    /// Score every individual from the cursor on.
    ///
    /// A failed evaluation is logged and replaced by the lowest fitness among
    /// the survivors, or 0.0 when there are none.
    pub fn evaluate(&mut self) -> Result<(), EvolutionError> {
        if self.population.is_empty() {
            return Err(EvolutionError::Uninitialized);
        }

        let settings = EvaluationSettings::from_config(&self.config);
        let expansions = self.config.expansions;
        let mesh = &self.config.mesh;
        let evaluator = &self.evaluator;
        let score = |chromosome: &Chromosome| {
            evaluate_chromosome(chromosome, expansions, mesh, &settings, evaluator)
        };

        let pending = &self.population[self.cursor..];
        let results: Vec<Result<f32, EvaluationError>> = if self.config.parallel_evaluation {
            pending.par_iter().map(score).collect()
        } else {
            pending.iter().map(score).collect()
        };

        let fallback = self.population[..self.cursor]
            .iter()
            .map(Chromosome::fitness)
            .reduce(f32::min)
            .unwrap_or(0.0);

        self.evaluated = results.len();
        self.failures = 0;
        for (index, result) in (self.cursor..).zip(results) {
            let fitness = result.unwrap_or_else(|err| {
                log::warn!(
                    "Generation {} individual {index} failed evaluation: {err}; using {fallback:.6}",
                    self.generation
                );
                self.failures += 1;
                fallback
            });

            let individual = &mut self.population[index];
            individual.set_fitness(fitness);
            self.log.record_debug(&format!(
                "Generation {:>4} individual {index}: {individual}",
                self.generation
            ))?;
        }

        self.total_evaluations += self.evaluated;
        self.total_failures += self.failures;
        Ok(())
    }

    /// Zero the fitness of near-duplicates.
    ///
    /// For each pair `i < j` in current order: equal nonzero fitness zeroes
    /// `i`; otherwise fitness within 10% of `i`'s together with a grammar
    /// distance under `3 * (j - i)` zeroes `j`. The comparison uses `i`'s
    /// fitness as it was before the pass over `j`.
    pub fn diversify(&mut self) {
        let n = self.population.len();
        for i in 0..n.saturating_sub(1) {
            let fitness_i = self.population[i].fitness();

            for j in i + 1..n {
                let fitness_j = self.population[j].fitness();

                if fitness_i != 0.0 && fitness_i == fitness_j {
                    self.population[i].set_fitness(0.0);
                } else if (fitness_i - fitness_j).abs() < DIVERSITY_SCALAR * fitness_i {
                    let distance = self.population[i].difference(&self.population[j]);
                    if distance < 3 * (j - i) as u32 {
                        self.population[j].set_fitness(0.0);
                    }
                }
            }
        }
    }

    /// Rank by descending fitness, log the generation, and move the cursor
    /// to the lower half.
    pub fn select(&mut self) -> Result<(), EvolutionError> {
        if self.population.is_empty() {
            return Err(EvolutionError::Uninitialized);
        }

        self.population
            .sort_by(|a, b| b.fitness().total_cmp(&a.fitness()));

        for individual in &self.population {
            self.log.record_individual(self.generation, individual)?;
        }
        let best = &self.population[0];
        self.log.record_best(self.generation, best)?;

        let mean = self.population.iter().map(Chromosome::fitness).sum::<f32>()
            / self.population.len() as f32;
        self.history.best_fitness.push(best.fitness());
        self.history.mean_fitness.push(mean);

        if self
            .champion
            .as_ref()
            .is_none_or(|champion| best.fitness() > champion.fitness())
        {
            self.champion = Some(best.clone());
        }

        self.cursor = self.population.len() / 2;
        Ok(())
    }

    /// Replace everything from the cursor on with offspring of roulette-drawn
    /// parents, then advance the generation.
    ///
    /// Parents are read from the live population, so a slot already refilled
    /// in this pass can parent a later one.
    pub fn breed(&mut self) {
        let fitness: Vec<f32> = self.population.iter().map(Chromosome::fitness).collect();
        let pool = RoulettePool::from_fitness(&fitness);

        for index in self.cursor..self.population.len() {
            let mut child = if self.rng.percent() < CROSSOVER_PERCENT {
                let (first, second) = pool.draw_pair(&mut self.rng);
                let mut child = self.population[first].clone();
                // A slot drawn as its own second parent already holds the child.
                let other = if second == index {
                    child.clone()
                } else {
                    self.population[second].clone()
                };
                child.crossover(&other, &mut self.rng);
                child
            } else {
                let parent = pool.draw(&mut self.rng);
                let mut child = self.population[parent].clone();
                child.mutate(&mut self.rng);
                child.mutate(&mut self.rng);
                child
            };

            child.set_fitness(0.0);
            self.population[index] = child;
        }

        self.generation += 1;
    }

    /// Report the best individual of the generation just bred from.
    pub fn print(&self) -> GenerationReport {
        let generation = self.generation - 1;
        let best = self.population[0].clone();
        let mean_fitness = self.history.mean_fitness.last().copied().unwrap_or(0.0);

        log::info!("Generation {generation:>4}: {best}");
        if self.failures > 0 {
            log::info!(
                "Generation {generation:>4}: {} of {} evaluations failed",
                self.failures,
                self.evaluated
            );
        }

        GenerationReport {
            generation,
            best,
            mean_fitness,
            evaluated: self.evaluated,
            failures: self.failures,
        }
    }

    /// Run one full generation.
    pub fn step(&mut self) -> Result<GenerationReport, EvolutionError> {
        self.evaluate()?;
        self.diversify();
        self.select()?;
        self.breed();
        Ok(self.print())
    }

    /// Initialize and run the configured number of generations, calling
    /// `callback` after each one.
    pub fn run_with_callback<F>(&mut self, mut callback: F) -> Result<RunSummary, EvolutionError>
    where
        F: FnMut(&GenerationReport),
    {
        let start_time = Instant::now();
        self.total_evaluations = 0;
        self.total_failures = 0;

        self.initialize()?;
        for _ in 0..self.config.generations {
            let report = self.step()?;
            callback(&report);
        }

        let best = self
            .champion
            .clone()
            .ok_or(EvolutionError::Uninitialized)?;

        Ok(RunSummary {
            seed: self.seed,
            generations: self.generation - 1,
            best,
            history: self.history.clone(),
            evaluations: self.total_evaluations,
            failures: self.total_failures,
            elapsed_seconds: start_time.elapsed().as_secs_f64(),
        })
    }

    /// Run without progress reporting.
    pub fn run(&mut self) -> Result<RunSummary, EvolutionError> {
        self.run_with_callback(|_| {})
    }

    /// Validated run configuration.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Seed of the grammar RNG.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Current population, ranked after each selection.
    pub fn population(&self) -> &[Chromosome] {
        &self.population
    }

    /// First index replaced by breeding and scored by the next evaluation.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Generation currently being evaluated, starting at 1.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn history(&self) -> &EvolutionHistory {
        &self.history
    }

    /// The generation log.
    pub fn log(&self) -> &L {
        &self.log
    }

    /// Consume the loop, returning its log.
    pub fn into_log(self) -> L {
        self.log
    }
}
