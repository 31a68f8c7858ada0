//! Growth grammar chromosomes.
//!
//! A chromosome is a fixed-layout rule table. Slot 0 holds the initial rule,
//! whose four operands label the faces of the seed tetrahedron. Slot `k + 1`
//! holds the rewrite rule for nonterminal `k`. On the wire each slot is five
//! characters: a rule-type symbol followed by four operand labels, so a
//! grammar over `N` nonterminals encodes to exactly `5 * (N + 1)` characters:
//!
//! ```text
//! icacc gbdbd gbada gcbcd rdccb
//! ^^^^^ initial rule, seed faces labeled c, a, c, c
//!       ^^^^^ rule for 'a': grow, children labeled b, d, b
//! ```

use std::fmt;
use std::str::FromStr;

use rand::prelude::*;
use serde::{Deserialize, Serialize};

/// Width of one encoded rule slot.
pub const RULE_SIZE: usize = 5;

/// Operand labels per slot.
pub const OPERANDS: usize = RULE_SIZE - 1;

/// Default number of nonterminal labels.
pub const DEFAULT_NONTERMINALS: usize = 4;

/// Largest alphabet that fits in `'a'..='z'`.
pub const MAX_NONTERMINALS: usize = 26;

/// Distance weight of a rule-type mismatch.
const RULE_TYPE_WEIGHT: u32 = 5;

/// Errors raised while building or decoding a grammar.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GrammarError {
    #[error("Invalid encoding: expected {expected} characters, got {actual}")]
    InvalidEncoding { expected: usize, actual: usize },
    #[error("Encoding of {length} characters is not a whole number of rule slots")]
    UnalignedEncoding { length: usize },
    #[error("Slot {slot} has invalid rule type '{symbol}'")]
    InvalidRuleType { slot: usize, symbol: char },
    #[error("Slot {slot} has label '{symbol}' outside the {nonterminals}-letter alphabet")]
    InvalidLabel {
        slot: usize,
        symbol: char,
        nonterminals: usize,
    },
    #[error("Nonterminal count must be in 1..=26, got {0}")]
    InvalidNonterminalCount(usize),
    #[error("Grammar has no grow rule")]
    MissingGrowRule,
}

/// How a pending face is rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleType {
    /// Labels the seed faces. Only valid in slot 0.
    Initial,
    /// Re-enqueue the face under a new label.
    Relabel,
    /// Erect a tetrahedron on the face, yielding three child faces.
    Grow,
    /// Split the face (and its tetrahedron if still whole) into four.
    Subdivide,
}

impl RuleType {
    /// Rule types allowed in nonterminal slots, in mutation order.
    pub const REWRITES: [RuleType; 3] = [RuleType::Relabel, RuleType::Grow, RuleType::Subdivide];

    /// Character used in the encoding.
    pub fn symbol(self) -> char {
        match self {
            RuleType::Initial => 'i',
            RuleType::Relabel => 'r',
            RuleType::Grow => 'g',
            RuleType::Subdivide => 's',
        }
    }

    /// Inverse of [`RuleType::symbol`].
    pub fn from_symbol(symbol: char) -> Option<Self> {
        match symbol {
            'i' => Some(RuleType::Initial),
            'r' => Some(RuleType::Relabel),
            'g' => Some(RuleType::Grow),
            's' => Some(RuleType::Subdivide),
            _ => None,
        }
    }

    /// Number of meaningful operands.
    pub fn arity(self) -> usize {
        match self {
            RuleType::Relabel => 1,
            RuleType::Grow => 3,
            RuleType::Initial | RuleType::Subdivide => 4,
        }
    }
}

/// A nonterminal label, stored as a small integer id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label(pub u8);

impl Label {
    /// Zero-based id, `'a'` being 0.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Encoding character.
    pub fn to_char(self) -> char {
        char::from(b'a' + self.0)
    }

    /// Decode a label, rejecting characters outside the first
    /// `nonterminals` letters.
    pub fn from_char(symbol: char, nonterminals: usize) -> Option<Self> {
        if !symbol.is_ascii_lowercase() {
            return None;
        }
        let id = symbol as u8 - b'a';
        ((id as usize) < nonterminals).then_some(Label(id))
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_char())
    }
}

/// One rule slot: a rule type and four operand labels.
///
/// All four operands are kept even when the rule type ignores some, so the
/// encoding round-trips exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub kind: RuleType,
    /// Child labels, in face order.
    pub operands: [Label; OPERANDS],
}

impl Rule {
    /// The operands this rule type actually uses.
    pub fn labels(&self) -> &[Label] {
        &self.operands[..self.kind.arity()]
    }

    fn decode(slot: usize, chars: &[char], nonterminals: usize) -> Result<Self, GrammarError> {
        let symbol = chars[0];
        let kind = RuleType::from_symbol(symbol)
            .filter(|kind| (slot == 0) == (*kind == RuleType::Initial))
            .ok_or(GrammarError::InvalidRuleType { slot, symbol })?;

        let mut operands = [Label(0); OPERANDS];
        for (operand, &symbol) in operands.iter_mut().zip(&chars[1..]) {
            *operand = Label::from_char(symbol, nonterminals).ok_or(GrammarError::InvalidLabel {
                slot,
                symbol,
                nonterminals,
            })?;
        }

        Ok(Self { kind, operands })
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.symbol())?;
        for operand in &self.operands {
            write!(f, "{operand}")?;
        }
        Ok(())
    }
}

/// Random number generator for grammar operations.
///
/// Every stochastic decision in a run draws from one instance so that a
/// seed reproduces the whole run.
pub struct GrammarRng {
    rng: StdRng,
}

impl GrammarRng {
    /// Create from seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Create with random seed.
    pub fn random() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Uniform integer in `[0, 100)`.
    pub fn percent(&mut self) -> u32 {
        self.rng.gen_range(0..100)
    }

    /// Uniform index in `[0, n)`.
    pub fn below(&mut self, n: usize) -> usize {
        self.rng.gen_range(0..n)
    }

    /// Uniform roulette ticket in `[0, total)`.
    pub fn ticket(&mut self, total: u64) -> u64 {
        self.rng.gen_range(0..total)
    }

    /// Uniform nonterminal label.
    pub fn label(&mut self, nonterminals: usize) -> Label {
        Label(self.rng.gen_range(0..nonterminals) as u8)
    }

    fn operands(&mut self, nonterminals: usize) -> [Label; OPERANDS] {
        std::array::from_fn(|_| self.label(nonterminals))
    }
}

/// A grammar chromosome with its most recent fitness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chromosome {
    rules: Vec<Rule>,
    fitness: f32,
}

impl Chromosome {
    /// Generate a random grammar that satisfies the grow invariant.
    pub fn random(nonterminals: usize, rng: &mut GrammarRng) -> Result<Self, GrammarError> {
        if !(1..=MAX_NONTERMINALS).contains(&nonterminals) {
            return Err(GrammarError::InvalidNonterminalCount(nonterminals));
        }

        let placeholder = Rule {
            kind: RuleType::Relabel,
            operands: [Label(0); OPERANDS],
        };
        let mut chromosome = Self {
            rules: vec![placeholder; nonterminals + 1],
            fitness: 0.0,
        };
        chromosome.randomize(rng);
        Ok(chromosome)
    }

    /// Decode an exact-length encoding over `nonterminals` labels.
    ///
    /// The grow invariant is not enforced here; see [`Chromosome::has_grow_rule`].
    pub fn parse(encoded: &str, nonterminals: usize) -> Result<Self, GrammarError> {
        if !(1..=MAX_NONTERMINALS).contains(&nonterminals) {
            return Err(GrammarError::InvalidNonterminalCount(nonterminals));
        }

        let chars: Vec<char> = encoded.chars().collect();
        let expected = RULE_SIZE * (nonterminals + 1);
        if chars.len() != expected {
            return Err(GrammarError::InvalidEncoding {
                expected,
                actual: chars.len(),
            });
        }

        let rules = chars
            .chunks(RULE_SIZE)
            .enumerate()
            .map(|(slot, chunk)| Rule::decode(slot, chunk, nonterminals))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            rules,
            fitness: 0.0,
        })
    }

    /// Replace the rule table from an encoding of the same size.
    ///
    /// On error the chromosome is left unchanged.
    pub fn set_rules(&mut self, encoded: &str) -> Result<(), GrammarError> {
        let parsed = Self::parse(encoded, self.nonterminals())?;
        self.rules = parsed.rules;
        Ok(())
    }

    /// Copy another chromosome's rule table, keeping this one's fitness.
    pub fn copy_rules_from(&mut self, other: &Chromosome) {
        self.rules.clone_from(&other.rules);
    }

    /// The encoded rule table, without separators.
    pub fn encode(&self) -> String {
        self.rules.iter().map(Rule::to_string).collect()
    }

    /// Size of the label alphabet.
    pub fn nonterminals(&self) -> usize {
        self.rules.len() - 1
    }

    /// All slots, initial rule first.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// The initial rule labeling the seed faces.
    pub fn initial(&self) -> &Rule {
        &self.rules[0]
    }

    /// The rewrite rule for a nonterminal label.
    pub fn rule(&self, label: Label) -> &Rule {
        &self.rules[label.index() + 1]
    }

    /// Fitness from the last evaluation, 0.0 when unscored.
    pub fn fitness(&self) -> f32 {
        self.fitness
    }

    pub fn set_fitness(&mut self, fitness: f32) {
        self.fitness = fitness;
    }

    /// Whether at least one nonterminal slot is a grow rule.
    pub fn has_grow_rule(&self) -> bool {
        self.rules[1..].iter().any(|rule| rule.kind == RuleType::Grow)
    }

    /// Re-draw every slot until the grow invariant holds.
    pub fn randomize(&mut self, rng: &mut GrammarRng) {
        let nonterminals = self.nonterminals();
        loop {
            self.rules[0] = Rule {
                kind: RuleType::Initial,
                operands: rng.operands(nonterminals),
            };
            for rule in &mut self.rules[1..] {
                let kind = RuleType::REWRITES[rng.below(RuleType::REWRITES.len())];
                *rule = Rule {
                    kind,
                    operands: rng.operands(nonterminals),
                };
            }

            if self.has_grow_rule() {
                break;
            }
        }
    }

    /// Restore the grow invariant by full re-randomization.
    ///
    /// Returns whether the grammar had to be replaced.
    pub fn repair(&mut self, rng: &mut GrammarRng) -> bool {
        if self.has_grow_rule() {
            return false;
        }
        log::debug!("Grammar {} has no grow rule, re-randomizing", self.encode());
        self.randomize(rng);
        true
    }

    /// Point-mutate rule types and operands, then repair.
    ///
    /// Each slot has a 50% chance to change. Nonterminal slots change their
    /// rule type half of that time; otherwise one (relabel) or two operands
    /// get fresh labels.
    pub fn mutate(&mut self, rng: &mut GrammarRng) {
        let nonterminals = self.nonterminals();

        for (slot, rule) in self.rules.iter_mut().enumerate() {
            let r = rng.percent();
            if r >= 50 {
                continue;
            }

            if r < 25 && slot != 0 {
                rule.kind = RuleType::REWRITES[(r % 3) as usize];
                continue;
            }

            match rule.kind {
                RuleType::Relabel => rule.operands[0] = rng.label(nonterminals),
                RuleType::Grow => {
                    for _ in 0..2 {
                        let operand = rng.below(3);
                        rule.operands[operand] = rng.label(nonterminals);
                    }
                }
                RuleType::Subdivide | RuleType::Initial => {
                    for _ in 0..2 {
                        let operand = rng.below(OPERANDS);
                        rule.operands[operand] = rng.label(nonterminals);
                    }
                }
            }
        }

        self.repair(rng);
    }

    /// Uniform slot crossover: each nonterminal slot is taken from `other`
    /// with probability 1/2. The initial rule is never exchanged.
    pub fn crossover(&mut self, other: &Chromosome, rng: &mut GrammarRng) {
        for (mine, theirs) in self.rules.iter_mut().zip(&other.rules).skip(1) {
            if rng.percent() < 50 {
                *mine = *theirs;
            }
        }

        self.repair(rng);
    }

    /// Weighted Hamming distance between encodings: 5 per differing rule
    /// type, 1 per differing operand.
    pub fn difference(&self, other: &Chromosome) -> u32 {
        self.rules
            .iter()
            .zip(&other.rules)
            .map(|(a, b)| {
                let kind = if a.kind == b.kind { 0 } else { RULE_TYPE_WEIGHT };
                let operands = a
                    .operands
                    .iter()
                    .zip(&b.operands)
                    .filter(|(x, y)| x != y)
                    .count() as u32;
                kind + operands
            })
            .sum()
    }

    /// Largest value [`Chromosome::difference`] can take for this size.
    pub fn max_difference(&self) -> u32 {
        (RULE_TYPE_WEIGHT + OPERANDS as u32) * self.rules.len() as u32
    }
}

impl fmt::Display for Chromosome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Grammar: rules = ")?;
        for rule in &self.rules {
            write!(f, "{rule} ")?;
        }
        write!(f, " fitness = {:.6}", self.fitness)
    }
}

/// Decode an encoding, inferring the nonterminal count from its length.
impl FromStr for Chromosome {
    type Err = GrammarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let length = s.chars().count();
        if length % RULE_SIZE != 0 || length < 2 * RULE_SIZE {
            return Err(GrammarError::UnalignedEncoding { length });
        }
        Self::parse(s, length / RULE_SIZE - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const EXAMPLE: &str = "icaccgbdbdgbadagcbcdrdccb";

    #[test]
    fn test_parse_round_trip() {
        let grammar = Chromosome::parse(EXAMPLE, 4).unwrap();
        assert_eq!(grammar.encode(), EXAMPLE);
        assert_eq!(grammar.nonterminals(), 4);
        assert_eq!(grammar.fitness(), 0.0);
    }

    #[test]
    fn test_set_rules_round_trip() {
        let mut rng = GrammarRng::new(42);
        let mut grammar = Chromosome::random(4, &mut rng).unwrap();
        grammar.set_rules(EXAMPLE).unwrap();
        assert_eq!(grammar.encode(), EXAMPLE);
    }

    #[test]
    fn test_wrong_length_is_rejected() {
        let mut rng = GrammarRng::new(42);
        let mut grammar = Chromosome::random(4, &mut rng).unwrap();
        let before = grammar.encode();

        let err = grammar.set_rules("icaccgbdbd").unwrap_err();
        assert_eq!(
            err,
            GrammarError::InvalidEncoding {
                expected: 25,
                actual: 10
            }
        );
        assert_eq!(grammar.encode(), before);

        let long = format!("{EXAMPLE}a");
        assert!(matches!(
            Chromosome::parse(&long, 4),
            Err(GrammarError::InvalidEncoding { actual: 26, .. })
        ));
    }

    #[test]
    fn test_invalid_symbols_are_rejected() {
        assert_eq!(
            Chromosome::parse("xcaccgbdbdgbadagcbcdrdccb", 4),
            Err(GrammarError::InvalidRuleType {
                slot: 0,
                symbol: 'x'
            })
        );
        // Initial rule outside slot 0.
        assert_eq!(
            Chromosome::parse("icaccibdbdgbadagcbcdrdccb", 4),
            Err(GrammarError::InvalidRuleType {
                slot: 1,
                symbol: 'i'
            })
        );
        // 'e' is outside a four-letter alphabet.
        assert!(matches!(
            Chromosome::parse("icaccgbdbdgbaeagcbcdrdccb", 4),
            Err(GrammarError::InvalidLabel { slot: 2, symbol: 'e', .. })
        ));
    }

    #[test]
    fn test_from_str_infers_size() {
        let grammar: Chromosome = "iabcaggabc".parse().unwrap();
        assert_eq!(grammar.nonterminals(), 1);
        assert!(matches!(
            "iabca".parse::<Chromosome>(),
            Err(GrammarError::UnalignedEncoding { length: 5 })
        ));
    }

    #[test]
    fn test_rule_lookup() {
        let grammar = Chromosome::parse(EXAMPLE, 4).unwrap();
        assert_eq!(grammar.initial().to_string(), "icacc");
        assert_eq!(grammar.rule(Label(0)).to_string(), "gbdbd");
        assert_eq!(grammar.rule(Label(3)).kind, RuleType::Relabel);
        assert_eq!(grammar.rule(Label(3)).labels(), &[Label(3)]);
        assert_eq!(grammar.rule(Label(0)).labels().len(), 3);
    }

    #[test]
    fn test_display_format() {
        let mut grammar = Chromosome::parse(EXAMPLE, 4).unwrap();
        grammar.set_fitness(12.5);
        assert_eq!(
            grammar.to_string(),
            "Grammar: rules = icacc gbdbd gbada gcbcd rdccb  fitness = 12.500000"
        );
    }

    #[test]
    fn test_difference_weights() {
        let a = Chromosome::parse(EXAMPLE, 4).unwrap();
        // Rule type of slot 4 changed.
        let b = Chromosome::parse("icaccgbdbdgbadagcbcdsdccb", 4).unwrap();
        // One operand of slot 1 changed.
        let c = Chromosome::parse("icaccgadbdgbadagcbcdrdccb", 4).unwrap();

        assert_eq!(a.difference(&a), 0);
        assert_eq!(a.difference(&b), 5);
        assert_eq!(a.difference(&c), 1);
        assert_eq!(b.difference(&c), 6);
    }

    #[test]
    fn test_relabel_only_grammar_breaks_invariant() {
        let grammar = Chromosome::parse("iabcdrabcdrbcdarcdabrdabc", 4).unwrap();
        assert!(!grammar.has_grow_rule());

        let mut repaired = grammar.clone();
        let mut rng = GrammarRng::new(7);
        assert!(repaired.repair(&mut rng));
        assert!(repaired.has_grow_rule());
        assert!(!repaired.repair(&mut rng));
    }

    #[test]
    fn test_random_is_reproducible() {
        let a = Chromosome::random(4, &mut GrammarRng::new(99)).unwrap();
        let b = Chromosome::random(4, &mut GrammarRng::new(99)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.initial().kind, RuleType::Initial);
        assert!(a.rules()[1..].iter().all(|r| r.kind != RuleType::Initial));
    }

    #[test]
    fn test_random_rejects_bad_alphabet() {
        let mut rng = GrammarRng::new(1);
        assert_eq!(
            Chromosome::random(0, &mut rng),
            Err(GrammarError::InvalidNonterminalCount(0))
        );
        assert!(Chromosome::random(27, &mut rng).is_err());
    }

    #[test]
    fn test_crossover_slots_come_from_parents() {
        let mut rng = GrammarRng::new(11);
        let a = Chromosome::parse("iaaaaggggggaaaagbbbbgcccc", 4).unwrap();
        let b = Chromosome::parse("idddddgdddgddddgddddgdddd", 4).unwrap();

        for _ in 0..20 {
            let mut child = a.clone();
            child.crossover(&b, &mut rng);
            // Both parents are all-grow, so no repair can happen.
            assert_eq!(child.initial(), a.initial());
            for slot in 1..5 {
                let rule = child.rules()[slot];
                assert!(rule == a.rules()[slot] || rule == b.rules()[slot]);
            }
        }
    }

    #[test]
    fn test_mutation_stays_in_alphabet() {
        let mut rng = GrammarRng::new(5);
        let mut grammar = Chromosome::random(4, &mut rng).unwrap();
        for _ in 0..200 {
            grammar.mutate(&mut rng);
            assert!(grammar.has_grow_rule());
            assert_eq!(grammar.initial().kind, RuleType::Initial);
            let reparsed = Chromosome::parse(&grammar.encode(), 4).unwrap();
            assert_eq!(reparsed.rules(), grammar.rules());
        }
    }

    proptest! {
        #[test]
        fn prop_encoding_round_trips(encoded in "i[a-d]{4}([rgs][a-d]{4}){4}") {
            let mut grammar = Chromosome::random(4, &mut GrammarRng::new(0)).unwrap();
            grammar.set_rules(&encoded).unwrap();
            prop_assert_eq!(grammar.encode(), encoded);
        }

        #[test]
        fn prop_difference_is_bounded_metric(seed_a in any::<u64>(), seed_b in any::<u64>(), n in 1usize..8) {
            let a = Chromosome::random(n, &mut GrammarRng::new(seed_a)).unwrap();
            let b = Chromosome::random(n, &mut GrammarRng::new(seed_b)).unwrap();

            prop_assert_eq!(a.difference(&b), b.difference(&a));
            prop_assert_eq!(a.difference(&a), 0);
            prop_assert!(a.difference(&b) <= a.max_difference());
            prop_assert_eq!(a.difference(&b) == 0, a.rules() == b.rules());
        }

        #[test]
        fn prop_operators_preserve_grow_invariant(seed in any::<u64>(), n in 1usize..8) {
            let mut rng = GrammarRng::new(seed);
            let mut a = Chromosome::random(n, &mut rng).unwrap();
            prop_assert!(a.has_grow_rule());

            let b = Chromosome::random(n, &mut rng).unwrap();
            a.mutate(&mut rng);
            prop_assert!(a.has_grow_rule());
            a.crossover(&b, &mut rng);
            prop_assert!(a.has_grow_rule());
        }
    }
}
