//! Tetra Grammar CLI - Evolve grammars or grow a single body.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::error::Error;
use std::path::PathBuf;
use std::time::Instant;

use tetra_grammar::{
    compute::{
        Chromosome, MeshExpander, export_stl,
        evolution::{EvolutionaryLoop, GeometricEvaluator, RunArchive, RunHeader, read_best_file},
    },
    schema::{DebugFlags, MeshConfig, RunConfig},
};

type CliResult = Result<(), Box<dyn Error>>;

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage(&args[0]);
        std::process::exit(1);
    }

    let result = match args[1].as_str() {
        "--example" => print_example_config(),
        "--rules" if args.len() >= 3 => grow_rules(&args[2..]),
        "--replay" if args.len() >= 3 => replay_best(&args[2..]),
        flag if flag.starts_with("--") => {
            print_usage(&args[0]);
            std::process::exit(1);
        }
        path => run_evolution(PathBuf::from(path)),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn print_usage(program: &str) {
    eprintln!("Usage: {program} <config.json>");
    eprintln!("       {program} --rules <encoded> [expansions] [out.stl]");
    eprintln!("       {program} --replay <run.best> [out.stl]");
    eprintln!("       {program} --replay <run.log> --all <out_dir>");
    eprintln!("       {program} --example");
    eprintln!();
    eprintln!("Evolve tetrahedral bodies from growth grammars.");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  config.json  Path to run configuration file");
    eprintln!("  encoded      Grammar encoding, e.g. icaccgbdbdgbadagcbcdrdccb");
    eprintln!("  expansions   Expansion steps (default: 25)");
    eprintln!("  run.best     Best-individual log written by a previous run");
    eprintln!("  --all        Export one STL per record of a .best or .pop log");
    eprintln!();
    eprintln!("Example configuration is generated with --example flag.");
}

fn run_evolution(config_path: PathBuf) -> CliResult {
    let mut config = RunConfig::from_file(&config_path)?;
    let seed = config.random_seed.unwrap_or_else(rand::random);
    config.random_seed = Some(seed);

    let header = RunHeader::from_config(&config, seed);
    let archive = RunArchive::create(&config.output_dir, &header)?;
    let best_path = archive.best_path().to_path_buf();
    let evaluator = GeometricEvaluator::new(config.fitness.clone());

    println!("Tetra Grammar Evolution");
    println!("=======================");
    println!("Time seed: {seed}");
    println!("Population: {}", config.population_size);
    println!("Generations: {}", config.generations);
    println!("Expansions: {}", config.expansions);
    println!("Fitness: {:?}", config.fitness);
    println!();

    let print_to_screen = config.debug.print_to_screen;
    let mut ga = EvolutionaryLoop::new(config, evaluator, archive)?;
    let summary = ga.run_with_callback(|report| {
        println!(
            "Generation {:>4}: best={:.6} mean={:.6} failures={}",
            report.generation,
            report.best.fitness(),
            report.mean_fitness,
            report.failures
        );
        if print_to_screen {
            println!("  {}", report.best);
        }
    })?;

    println!();
    println!("Best grammar: {}", summary.best.encode());
    println!("Best fitness: {:.6}", summary.best.fitness());
    println!(
        "Time: {:.2}s ({} evaluations, {} failed)",
        summary.elapsed_seconds, summary.evaluations, summary.failures
    );
    println!("Best log: {}", best_path.display());
    Ok(())
}

fn grow_rules(args: &[String]) -> CliResult {
    let grammar: Chromosome = args[0].parse()?;
    let expansions: usize = match args.get(1) {
        Some(s) => s.parse()?,
        None => 25,
    };
    let output = args.get(2).map(PathBuf::from);

    grow_and_export(&grammar, expansions, output)
}

fn replay_best(args: &[String]) -> CliResult {
    let log = read_best_file(&args[0])?;

    if args.get(1).map(String::as_str) == Some("--all") {
        let dir = args.get(2).map_or_else(|| PathBuf::from("."), PathBuf::from);
        let paths = log.export_meshes(&MeshConfig::default(), &dir)?;
        println!(
            "Exported {} records of seed {} to {}",
            paths.len(),
            log.header.seed,
            dir.display()
        );
        return Ok(());
    }

    let record = log
        .last_best()
        .ok_or_else(|| format!("{} has no generation records", args[0]))?;

    println!(
        "Replaying generation {} of seed {}",
        record.generation, log.header.seed
    );
    grow_and_export(
        &record.chromosome,
        log.header.expansions,
        args.get(1).map(PathBuf::from),
    )
}

fn grow_and_export(grammar: &Chromosome, expansions: usize, output: Option<PathBuf>) -> CliResult {
    let start = Instant::now();
    let expander = MeshExpander::build(grammar, expansions)?;
    let mesh = expander.build_mesh(&MeshConfig::default(), &DebugFlags::default());

    println!("Grammar: {}", grammar.encode());
    println!("Expansions: {expansions}");
    println!("  Nodes: {}", mesh.nodes.len());
    println!("  Tetras: {} whole of {}", mesh.tetras.len(), expander.tetras().len());
    println!("  Links: {}", mesh.links.len());
    println!("  Skin faces: {}", mesh.faces.len());
    println!("  Lift: {:.4}", mesh.translation.y);
    println!("Time: {:.3}ms", start.elapsed().as_secs_f64() * 1000.0);

    if let Some(path) = output {
        export_stl(&mesh, &path)?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}

fn print_example_config() -> CliResult {
    let config = RunConfig {
        random_seed: Some(1_700_000_000),
        ..Default::default()
    };

    println!("Example configuration (config.json):");
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
