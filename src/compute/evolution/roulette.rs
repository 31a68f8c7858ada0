//! Fitness-proportional parent selection.

use crate::compute::grammar::GrammarRng;

/// Roulette over a fitness-sorted population.
///
/// Each rank holds `max(1, floor((fitness - worst) * factor))` tickets, where
/// `factor` is the smallest power of ten lifting the fitness span to at least
/// ten. Tickets are stored as cumulative bounds rather than repeated indices;
/// drawing a uniform ticket and mapping it to its rank is equivalent.
///
/// Each rank's tickets are capped at `u64::MAX / len` so the running total
/// cannot overflow for very large fitness values.
#[derive(Debug, Clone)]
pub struct RoulettePool {
    /// `bounds[i]` is one past the last ticket of rank `i`.
    bounds: Vec<u64>,
}

impl RoulettePool {
    /// Build the pool over fitness values in rank order.
    pub fn from_fitness(fitness: &[f32]) -> Self {
        let best = fitness.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let worst = fitness.iter().copied().fold(f32::INFINITY, f32::min);
        let span = (best - worst).max(1.0);

        let mut factor = 1.0_f32;
        while span * factor < 10.0 {
            factor *= 10.0;
        }

        let cap = u64::MAX / fitness.len().max(1) as u64;
        let mut total = 0u64;
        let bounds = fitness
            .iter()
            .map(|&f| {
                total += (((f - worst) * factor) as u64).clamp(1, cap);
                total
            })
            .collect();

        Self { bounds }
    }

    /// Number of ranks.
    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    /// Whether the pool has no ranks.
    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    /// Total number of tickets.
    pub fn tickets(&self) -> u64 {
        self.bounds.last().copied().unwrap_or(0)
    }

    /// Tickets held by rank `i`.
    pub fn tickets_of(&self, i: usize) -> u64 {
        let start = if i == 0 { 0 } else { self.bounds[i - 1] };
        self.bounds[i] - start
    }

    /// Rank holding ticket `ticket`.
    pub fn rank_of(&self, ticket: u64) -> usize {
        self.bounds.partition_point(|&bound| bound <= ticket)
    }

    /// Draw one rank.
    ///
    /// # Panics
    ///
    /// Panics on an empty pool.
    pub fn draw(&self, rng: &mut GrammarRng) -> usize {
        self.rank_of(rng.ticket(self.tickets()))
    }

    /// Draw two distinct ranks, redrawing both until they differ.
    ///
    /// The pool must span at least two ranks or this never returns.
    pub fn draw_pair(&self, rng: &mut GrammarRng) -> (usize, usize) {
        debug_assert!(self.len() >= 2, "distinct pair needs two ranks");
        loop {
            let first = self.draw(rng);
            let second = self.draw(rng);
            if first != second {
                return (first, second);
            }
        }
    }
}
