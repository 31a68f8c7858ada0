//! Append-only run logs.
//!
//! Each run writes two text files named after its seed: `<seed>.pop` holds
//! every individual of every generation, `<seed>.best` the best individual
//! per generation. Both start with a header of run settings:
//!
//! ```text
//! Time seed: 1700000000
//! MAX_POPULATION = 10
//! ...
//! TEXTURES = 0
//! Generation    1: Grammar: rules = icacc gbdbd gbada gcbcd rdccb  fitness = 12.500000
//! ```

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::compute::grammar::{Chromosome, GrammarError};
use crate::compute::mesh::MeshExpander;
use crate::compute::stl::export_stl;
use crate::schema::{DebugFlags, MeshConfig, RunConfig};

/// Receives generation records from the evolutionary loop.
pub trait GenerationLog {
    /// One call per individual per generation, in ranked order.
    fn record_individual(&mut self, generation: u32, chromosome: &Chromosome) -> io::Result<()>;

    /// One call per generation with the best individual.
    fn record_best(&mut self, generation: u32, chromosome: &Chromosome) -> io::Result<()>;

    /// Free-form evaluation trace.
    fn record_debug(&mut self, _message: &str) -> io::Result<()> {
        Ok(())
    }
}

/// Render one record line, without the trailing newline.
///
/// Fitness is written with six decimals, so a record read back carries the
/// rounded value: `0.1234567` returns as `0.123457`.
pub fn format_record(generation: u32, chromosome: &Chromosome) -> String {
    format!("Generation {generation:>4}: {chromosome}")
}

/// Run settings written at the top of every log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHeader {
    /// Seed of the run, also the log file stem.
    pub seed: u64,
    /// `MAX_POPULATION`.
    pub population_size: usize,
    /// `MAX_GENERATION`.
    pub generations: usize,
    /// `NUM_EXPANSIONS`, needed to regrow recorded grammars.
    pub expansions: usize,
    /// `MAX_WAIT_TIME`.
    pub wait_time: u32,
    /// `MAX_EVAL_TIME`.
    pub eval_time: u32,
    /// Trace toggles, one `0`/`1` line each.
    pub debug: DebugFlags,
}

const HEADER_LINES: usize = 12;

impl RunHeader {
    pub fn from_config(config: &RunConfig, seed: u64) -> Self {
        Self {
            seed,
            population_size: config.population_size,
            generations: config.generations,
            expansions: config.expansions,
            wait_time: config.wait_time,
            eval_time: config.eval_time,
            debug: config.debug,
        }
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let flag = |on: bool| u8::from(on);
        writeln!(writer, "Time seed: {}", self.seed)?;
        writeln!(writer, "MAX_POPULATION = {}", self.population_size)?;
        writeln!(writer, "MAX_GENERATION = {}", self.generations)?;
        writeln!(writer, "NUM_EXPANSIONS = {}", self.expansions)?;
        writeln!(writer, "MAX_WAIT_TIME = {}", self.wait_time)?;
        writeln!(writer, "MAX_EVAL_TIME = {}", self.eval_time)?;
        writeln!(writer, "WRITE_TO_DEBUG = {}", flag(self.debug.write_to_debug))?;
        writeln!(writer, "PRINT_TO_SCREEN = {}", flag(self.debug.print_to_screen))?;
        writeln!(writer, "DEBUG_NODE_POSITIONS = {}", flag(self.debug.node_positions))?;
        writeln!(writer, "DEBUG_PLACEMENT = {}", flag(self.debug.placement))?;
        writeln!(writer, "STEP_SIMULATION = {}", flag(self.debug.step_simulation))?;
        writeln!(writer, "TEXTURES = {}", flag(self.debug.textures))
    }

    /// Parse the twelve header lines.
    pub fn parse(lines: &[&str]) -> Result<Self, RecordError> {
        if lines.len() < HEADER_LINES {
            return Err(RecordError::TruncatedHeader(lines.len()));
        }

        let seed = field(lines, 0, "Time seed", ": ")?;
        let population_size = field(lines, 1, "MAX_POPULATION", " = ")?;
        let generations = field(lines, 2, "MAX_GENERATION", " = ")?;
        let expansions = field(lines, 3, "NUM_EXPANSIONS", " = ")?;
        let wait_time = field(lines, 4, "MAX_WAIT_TIME", " = ")?;
        let eval_time = field(lines, 5, "MAX_EVAL_TIME", " = ")?;
        let flag = |index, key| field::<u8>(lines, index, key, " = ").map(|v| v != 0);

        Ok(Self {
            seed,
            population_size,
            generations,
            expansions,
            wait_time,
            eval_time,
            debug: DebugFlags {
                write_to_debug: flag(6, "WRITE_TO_DEBUG")?,
                print_to_screen: flag(7, "PRINT_TO_SCREEN")?,
                node_positions: flag(8, "DEBUG_NODE_POSITIONS")?,
                placement: flag(9, "DEBUG_PLACEMENT")?,
                step_simulation: flag(10, "STEP_SIMULATION")?,
                textures: flag(11, "TEXTURES")?,
            },
        })
    }
}

fn field<T: FromStr>(
    lines: &[&str],
    index: usize,
    key: &'static str,
    separator: &str,
) -> Result<T, RecordError> {
    let line = index + 1;
    let value = lines[index]
        .trim_end()
        .strip_prefix(key)
        .and_then(|rest| rest.strip_prefix(separator))
        .ok_or(RecordError::MissingField { line, key })?;

    value.trim().parse().map_err(|_| RecordError::InvalidValue {
        line,
        key,
        value: value.to_string(),
    })
}

/// One parsed record line.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRecord {
    /// Generation the line was written in.
    pub generation: u32,
    /// The recorded grammar, carrying the recorded fitness.
    pub chromosome: Chromosome,
}

impl GenerationRecord {
    /// Parse a record line; `line` numbers errors.
    pub fn parse(text: &str, line: usize) -> Result<Self, RecordError> {
        let malformed = || RecordError::MalformedRecord { line };

        let (generation, rest) = text
            .trim_end()
            .strip_prefix("Generation ")
            .and_then(|rest| rest.split_once(": "))
            .ok_or_else(malformed)?;
        let generation = generation.trim().parse().map_err(|_| malformed())?;

        let (rules, fitness) = rest
            .strip_prefix("Grammar: rules = ")
            .and_then(|rest| rest.split_once(" fitness = "))
            .ok_or_else(malformed)?;
        let fitness: f32 = fitness.trim().parse().map_err(|_| malformed())?;

        let encoded: String = rules.split_whitespace().collect();
        let mut chromosome: Chromosome = encoded
            .parse()
            .map_err(|source| RecordError::Grammar { line, source })?;
        chromosome.set_fitness(fitness);

        Ok(Self {
            generation,
            chromosome,
        })
    }
}

impl FromStr for GenerationRecord {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, 1)
    }
}

/// Contents of a `.pop` or `.best` file.
#[derive(Debug, Clone)]
pub struct RunLog {
    pub header: RunHeader,
    /// Record lines in file order.
    pub records: Vec<GenerationRecord>,
}

impl RunLog {
    /// Parse a whole log file: header, then one record per non-empty line.
    pub fn parse(text: &str) -> Result<Self, RecordError> {
        let lines: Vec<&str> = text.lines().collect();
        let header = RunHeader::parse(&lines)?;

        let records = lines
            .iter()
            .enumerate()
            .skip(HEADER_LINES)
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| GenerationRecord::parse(line, i + 1))
            .collect::<Result<_, _>>()?;

        Ok(Self { header, records })
    }

    /// Record with the highest generation number, latest wins on ties.
    pub fn last_best(&self) -> Option<&GenerationRecord> {
        self.records.iter().max_by_key(|r| r.generation)
    }

    /// Regrow every recorded grammar with the run's expansion count and
    /// write one STL per record into `dir`, named `<seed>_<index>.stl` in
    /// file order. Returns the written paths.
    pub fn export_meshes(
        &self,
        config: &MeshConfig,
        dir: impl AsRef<Path>,
    ) -> Result<Vec<PathBuf>, RecordError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        self.records
            .iter()
            .enumerate()
            .map(|(index, record)| -> Result<PathBuf, RecordError> {
                let expander = MeshExpander::build(&record.chromosome, self.header.expansions)
                    .map_err(|source| RecordError::Replay {
                        generation: record.generation,
                        source,
                    })?;
                let mesh = expander.build_mesh(config, &DebugFlags::default());

                let path = dir.join(format!("{}_{index:04}.stl", self.header.seed));
                export_stl(&mesh, &path)?;
                Ok(path)
            })
            .collect()
    }
}

/// Read a run log written by [`RunArchive`].
pub fn read_best_file(path: impl AsRef<Path>) -> Result<RunLog, RecordError> {
    let text = fs::read_to_string(path)?;
    RunLog::parse(&text)
}

/// Errors reading run logs.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Header has {0} lines, expected 12")]
    TruncatedHeader(usize),
    #[error("Line {line}: expected header field {key}")]
    MissingField { line: usize, key: &'static str },
    #[error("Line {line}: invalid value '{value}' for {key}")]
    InvalidValue {
        line: usize,
        key: &'static str,
        value: String,
    },
    #[error("Line {line}: malformed generation record")]
    MalformedRecord { line: usize },
    #[error("Line {line}: {source}")]
    Grammar {
        line: usize,
        #[source]
        source: GrammarError,
    },
    #[error("Generation {generation}: cannot grow recorded grammar: {source}")]
    Replay {
        generation: u32,
        #[source]
        source: GrammarError,
    },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// File-backed log writing `<seed>.pop`, `<seed>.best`, and with
/// `write_to_debug` set, `<seed>.debug`.
pub struct RunArchive {
    population: BufWriter<File>,
    best: BufWriter<File>,
    debug: Option<BufWriter<File>>,
    population_path: PathBuf,
    best_path: PathBuf,
}

impl RunArchive {
    /// Create the log files in `dir` and write their headers.
    pub fn create<P: AsRef<Path>>(dir: P, header: &RunHeader) -> io::Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let population_path = dir.join(format!("{}.pop", header.seed));
        let best_path = dir.join(format!("{}.best", header.seed));

        let mut population = BufWriter::new(File::create(&population_path)?);
        let mut best = BufWriter::new(File::create(&best_path)?);
        header.write_to(&mut population)?;
        header.write_to(&mut best)?;
        population.flush()?;
        best.flush()?;

        let debug = if header.debug.write_to_debug {
            let path = dir.join(format!("{}.debug", header.seed));
            Some(BufWriter::new(File::create(path)?))
        } else {
            None
        };

        log::info!(
            "Logging run to {} and {}",
            population_path.display(),
            best_path.display()
        );

        Ok(Self {
            population,
            best,
            debug,
            population_path,
            best_path,
        })
    }

    pub fn population_path(&self) -> &Path {
        &self.population_path
    }

    pub fn best_path(&self) -> &Path {
        &self.best_path
    }
}

impl GenerationLog for RunArchive {
    fn record_individual(&mut self, generation: u32, chromosome: &Chromosome) -> io::Result<()> {
        writeln!(self.population, "{}", format_record(generation, chromosome))?;
        self.population.flush()
    }

    fn record_best(&mut self, generation: u32, chromosome: &Chromosome) -> io::Result<()> {
        writeln!(self.best, "{}", format_record(generation, chromosome))?;
        self.best.flush()
    }

    fn record_debug(&mut self, message: &str) -> io::Result<()> {
        match &mut self.debug {
            Some(debug) => {
                writeln!(debug, "{message}")?;
                debug.flush()
            }
            None => Ok(()),
        }
    }
}

/// In-memory log of formatted record lines.
#[derive(Debug, Default, Clone)]
pub struct MemoryLog {
    /// Lines that would go to `.pop`.
    pub population: Vec<String>,
    /// Lines that would go to `.best`.
    pub best: Vec<String>,
    /// Debug trace messages.
    pub debug: Vec<String>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the best-individual lines back into records.
    pub fn best_records(&self) -> Result<Vec<GenerationRecord>, RecordError> {
        self.best
            .iter()
            .enumerate()
            .map(|(i, line)| GenerationRecord::parse(line, i + 1))
            .collect()
    }
}

impl GenerationLog for MemoryLog {
    fn record_individual(&mut self, generation: u32, chromosome: &Chromosome) -> io::Result<()> {
        self.population.push(format_record(generation, chromosome));
        Ok(())
    }

    fn record_best(&mut self, generation: u32, chromosome: &Chromosome) -> io::Result<()> {
        self.best.push(format_record(generation, chromosome));
        Ok(())
    }

    fn record_debug(&mut self, message: &str) -> io::Result<()> {
        self.debug.push(message.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = "icaccgbdbdgbadagcbcdrdccb";

    fn example(fitness: f32) -> Chromosome {
        let mut chromosome: Chromosome = EXAMPLE.parse().unwrap();
        chromosome.set_fitness(fitness);
        chromosome
    }

    fn header() -> RunHeader {
        let config = RunConfig {
            population_size: 6,
            generations: 3,
            debug: DebugFlags {
                placement: true,
                ..Default::default()
            },
            ..Default::default()
        };
        RunHeader::from_config(&config, 1_700_000_000)
    }

    #[test]
    fn test_record_format() {
        assert_eq!(
            format_record(7, &example(3.25)),
            "Generation    7: Grammar: rules = icacc gbdbd gbada gcbcd rdccb  fitness = 3.250000"
        );
    }

    #[test]
    fn test_record_round_trip() {
        let line = format_record(12, &example(0.125));
        let record: GenerationRecord = line.parse().unwrap();
        assert_eq!(record.generation, 12);
        assert_eq!(record.chromosome.encode(), EXAMPLE);
        assert_eq!(record.chromosome.fitness(), 0.125);
    }

    #[test]
    fn test_record_fitness_is_rounded() {
        let line = format_record(1, &example(0.123_456_7));
        assert!(line.ends_with(" fitness = 0.123457"));

        let record: GenerationRecord = line.parse().unwrap();
        assert_eq!(record.chromosome.fitness(), 0.123_457);
    }

    #[test]
    fn test_malformed_records() {
        assert!(matches!(
            "Gen 1: Grammar: rules = icacc  fitness = 1.0".parse::<GenerationRecord>(),
            Err(RecordError::MalformedRecord { .. })
        ));
        assert!(matches!(
            "Generation    1: Grammar: rules = icacc gbdbd  fitness = x".parse::<GenerationRecord>(),
            Err(RecordError::MalformedRecord { .. })
        ));
        assert!(matches!(
            "Generation    1: Grammar: rules = icacc gbdbx  fitness = 1.0".parse::<GenerationRecord>(),
            Err(RecordError::Grammar { .. })
        ));
    }

    #[test]
    fn test_header_round_trip() {
        let header = header();
        let mut out = Vec::new();
        header.write_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("Time seed: 1700000000\nMAX_POPULATION = 6\n"));
        assert!(text.contains("DEBUG_PLACEMENT = 1\n"));
        assert!(text.contains("TEXTURES = 0\n"));

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(RunHeader::parse(&lines).unwrap(), header);
    }

    #[test]
    fn test_header_errors() {
        assert!(matches!(
            RunHeader::parse(&["Time seed: 1"]),
            Err(RecordError::TruncatedHeader(1))
        ));

        let mut out = Vec::new();
        header().write_to(&mut out).unwrap();
        let text = String::from_utf8(out)
            .unwrap()
            .replace("NUM_EXPANSIONS = 25", "NUM_EXPANSIONS = many");
        let lines: Vec<&str> = text.lines().collect();
        assert!(matches!(
            RunHeader::parse(&lines),
            Err(RecordError::InvalidValue {
                line: 4,
                key: "NUM_EXPANSIONS",
                ..
            })
        ));
    }

    #[test]
    fn test_archive_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut archive = RunArchive::create(dir.path(), &header()).unwrap();

        archive.record_individual(1, &example(5.0)).unwrap();
        archive.record_individual(1, &example(2.0)).unwrap();
        archive.record_best(1, &example(5.0)).unwrap();
        archive.record_best(2, &example(8.0)).unwrap();
        archive.record_debug("ignored without write_to_debug").unwrap();

        assert!(archive.population_path().ends_with("1700000000.pop"));
        assert!(!dir.path().join("1700000000.debug").exists());

        let population = read_best_file(archive.population_path()).unwrap();
        assert_eq!(population.header, header());
        assert_eq!(population.records.len(), 2);

        let best = read_best_file(archive.best_path()).unwrap();
        let last = best.last_best().unwrap();
        assert_eq!(last.generation, 2);
        assert_eq!(last.chromosome.fitness(), 8.0);
    }

    #[test]
    fn test_debug_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut header = header();
        header.debug.write_to_debug = true;

        let mut archive = RunArchive::create(dir.path(), &header).unwrap();
        archive.record_debug("individual 1 evaluated").unwrap();

        let text = fs::read_to_string(dir.path().join("1700000000.debug")).unwrap();
        assert_eq!(text, "individual 1 evaluated\n");
    }

    #[test]
    fn test_export_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut archive = RunArchive::create(dir.path(), &header()).unwrap();
        for generation in 1..=3 {
            archive.record_best(generation, &example(generation as f32)).unwrap();
        }

        let log = read_best_file(archive.best_path()).unwrap();
        let out = dir.path().join("meshes");
        let paths = log.export_meshes(&MeshConfig::default(), &out).unwrap();

        assert_eq!(paths.len(), 3);
        assert!(paths[0].ends_with("1700000000_0000.stl"));
        assert!(paths[2].ends_with("1700000000_0002.stl"));
        for path in &paths {
            let stem = path.file_stem().unwrap().to_str().unwrap();
            let text = fs::read_to_string(path).unwrap();
            assert!(text.starts_with(&format!("solid {stem}\n")));
            assert!(text.ends_with(&format!("endsolid {stem}\n")));
            assert!(text.contains("facet normal"));
        }
    }

    #[test]
    fn test_export_rejects_grammar_without_grow() {
        let dir = tempfile::tempdir().unwrap();
        let mut no_grow: Chromosome = "iabcdrabcdrbcdarcdabrdabc".parse().unwrap();
        no_grow.set_fitness(1.0);
        let log = RunLog {
            header: header(),
            records: vec![GenerationRecord {
                generation: 4,
                chromosome: no_grow,
            }],
        };

        assert!(matches!(
            log.export_meshes(&MeshConfig::default(), dir.path()),
            Err(RecordError::Replay {
                generation: 4,
                source: GrammarError::MissingGrowRule,
            })
        ));
    }

    #[test]
    fn test_memory_log() {
        let mut log = MemoryLog::new();
        log.record_individual(1, &example(1.0)).unwrap();
        log.record_best(1, &example(1.0)).unwrap();
        log.record_best(2, &example(4.5)).unwrap();

        assert_eq!(log.population.len(), 1);
        let records = log.best_records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].generation, 2);
        assert_eq!(records[1].chromosome.fitness(), 4.5);
    }
}
