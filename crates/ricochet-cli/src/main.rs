//! Ricochet CLI
//!
//! Command-line interface for alias queries over program files.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use ricochet_core::config::{ContextPolicy, OutputFormat};
use ricochet_core::Config;
use ricochet_program::{load_program, BatchLoader, Program, QuerySpec};
use ricochet_query::{AliasFinder, AliasResults, Query};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ricochet")]
#[command(author, version, about = "Demand-driven alias analysis", long_about = None)]
struct Cli {
    /// Configuration file (YAML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find the aliases of an access path at a statement
    Query {
        /// Program file
        #[arg(value_name = "PROGRAM")]
        program: PathBuf,

        /// Method containing the statement (`main` or `Owner.name`)
        #[arg(short, long)]
        method: String,

        /// Statement label or source position
        #[arg(short, long)]
        at: String,

        /// Access path, e.g. `a.f.g`, `a[]` or `Owner::s`
        #[arg(short, long)]
        path: String,

        /// Time budget in milliseconds
        #[arg(long)]
        budget_ms: Option<u64>,

        /// Output format (text, json)
        #[arg(short, long)]
        format: Option<String>,

        /// Treat parameters as origins instead of searching callers
        #[arg(long)]
        no_context: bool,

        /// Hide null and conservative origins
        #[arg(long)]
        hide_null: bool,
    },

    /// Run the queries embedded in every program file below a directory
    Batch {
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        /// File name patterns to include
        #[arg(long)]
        include: Vec<String>,

        /// File name patterns to skip
        #[arg(long)]
        exclude: Vec<String>,
    },

    /// List the statements of a program
    Show {
        #[arg(value_name = "PROGRAM")]
        program: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path).with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Query {
            program,
            method,
            at,
            path,
            budget_ms,
            format,
            no_context,
            hide_null,
        } => {
            let mut config = config;
            if let Some(budget_ms) = budget_ms {
                config.analysis.time_budget_ms = budget_ms;
            }
            if no_context {
                config.analysis.context = ContextPolicy::NoContext;
            }
            if hide_null {
                config.output.hide_null_allocations = true;
            }
            if let Some(format) = format {
                config.output.format = parse_format(&format)?;
            }
            cmd_query(&program, &method, &at, &path, &config)?;
        }
        Commands::Batch { dir, include, exclude } => {
            cmd_batch(&dir, &include, &exclude, &config)?;
        }
        Commands::Show { program } => {
            cmd_show(&program)?;
        }
    }

    Ok(())
}

fn parse_format(format: &str) -> Result<OutputFormat> {
    match format {
        "text" => Ok(OutputFormat::Text),
        "json" => Ok(OutputFormat::Json),
        other => bail!("unknown output format `{}` (expected text or json)", other),
    }
}

fn load(path: &Path) -> Result<Program> {
    load_program(path).with_context(|| format!("failed to load program {}", path.display()))
}

fn cmd_query(file: &Path, method: &str, at: &str, path: &str, config: &Config) -> Result<()> {
    let program = load(file)?;
    let query = Query::parse(&program, method, at, path, config.analysis.field_limits())
        .with_context(|| format!("invalid query `{}` at {}:{}", path, method, at))?;

    let finder = AliasFinder::new(&program, config.analysis.clone());
    let mut results = finder.find_aliases(&query)?;
    if config.output.hide_null_allocations {
        results = results.without_null_allocation_sites();
    }

    match config.output.format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&results_json(&program, &results))?;
            println!("{}", json);
        }
        OutputFormat::Text => print_results(&program, &results),
    }
    Ok(())
}

fn print_results(program: &Program, results: &AliasResults) {
    println!(
        "🔎 {} at {}",
        program.describe_path(results.path()),
        program.describe_stmt(results.point())
    );
    if results.timed_out() {
        println!("   ⚠️  Timed out, results are partial");
    }
    if results.is_empty() {
        println!("   No allocation reaches this path");
    }
    for (origin, aliases) in results {
        let marker = if origin.is_null { " (null)" } else { "" };
        println!(
            "\n📦 {}{} via {}",
            program.describe_stmt(origin.point),
            marker,
            program.describe_path(&origin.fact)
        );
        for alias in aliases {
            println!("   {}", program.describe_path(alias));
        }
    }
    let stats = results.stats();
    println!(
        "\n📊 {} forward / {} backward edges, {} POIs, {} ms",
        stats.forward_edges, stats.backward_edges, stats.pois, stats.elapsed_ms
    );
}

fn results_json(program: &Program, results: &AliasResults) -> serde_json::Value {
    let origins: Vec<serde_json::Value> = results
        .iter()
        .map(|(origin, aliases)| {
            serde_json::json!({
                "site": program.describe_stmt(origin.point),
                "null": origin.is_null,
                "fact": program.describe_path(&origin.fact),
                "aliases": aliases.iter().map(|ap| program.describe_path(ap)).collect::<Vec<_>>(),
            })
        })
        .collect();
    serde_json::json!({
        "path": program.describe_path(results.path()),
        "at": program.describe_stmt(results.point()),
        "timed_out": results.timed_out(),
        "origins": origins,
        "stats": results.stats(),
    })
}

/// Outcome of one embedded query
enum Outcome {
    Passed,
    Unchecked,
    Mismatch { expected: BTreeSet<String>, found: BTreeSet<String> },
    TimedOut,
    Failed(String),
}

fn run_embedded(program: &Program, spec: &QuerySpec, config: &Config) -> Outcome {
    let finder = AliasFinder::new(program, config.analysis.clone());
    let results = Query::from_spec(program, spec, config.analysis.field_limits())
        .and_then(|query| finder.find_aliases(&query));
    let results = match results {
        Ok(results) => results,
        Err(e) => return Outcome::Failed(e.to_string()),
    };
    if results.timed_out() {
        return Outcome::TimedOut;
    }
    let Some(expected) = &spec.expect else {
        return Outcome::Unchecked;
    };
    let expected: BTreeSet<String> = expected.iter().cloned().collect();
    let found: BTreeSet<String> = results
        .without_null_allocation_sites()
        .allocation_sites()
        .into_iter()
        .map(|site| program.describe_stmt(site))
        .collect();
    if found == expected {
        Outcome::Passed
    } else {
        Outcome::Mismatch { expected, found }
    }
}

fn cmd_batch(dir: &Path, include: &[String], exclude: &[String], config: &Config) -> Result<()> {
    println!("📂 Running queries below: {}", dir.display());

    let include: Vec<&str> = include.iter().map(String::as_str).collect();
    let exclude: Vec<&str> = exclude.iter().map(String::as_str).collect();
    let loader = if include.is_empty() && exclude.is_empty() {
        BatchLoader::new()?
    } else if include.is_empty() {
        BatchLoader::with_patterns(ricochet_program::batch::DEFAULT_INCLUDE, &exclude)?
    } else {
        BatchLoader::with_patterns(&include, &exclude)?
    };
    let loaded = loader.load_directory(dir);

    let reports: Vec<(PathBuf, String, Outcome)> = loaded
        .par_iter()
        .flat_map_iter(|(path, program)| {
            let outcomes: Vec<(PathBuf, String, Outcome)> = match program {
                Ok(program) => program
                    .queries()
                    .iter()
                    .enumerate()
                    .map(|(i, spec)| {
                        let name = spec.name.clone().unwrap_or_else(|| format!("#{}", i));
                        (path.clone(), name, run_embedded(program, spec, config))
                    })
                    .collect(),
                Err(e) => vec![(path.clone(), "<load>".to_string(), Outcome::Failed(e.to_string()))],
            };
            outcomes
        })
        .collect();

    let mut failures = 0;
    let mut passed = 0;
    for (path, name, outcome) in &reports {
        match outcome {
            Outcome::Passed => passed += 1,
            Outcome::Unchecked => info!("{} {}: no expectation", path.display(), name),
            Outcome::TimedOut => warn!("{} {}: timed out", path.display(), name),
            Outcome::Mismatch { expected, found } => {
                failures += 1;
                println!("❌ {} {}", path.display(), name);
                println!("   expected: {:?}", expected);
                println!("   found:    {:?}", found);
            }
            Outcome::Failed(e) => {
                failures += 1;
                println!("❌ {} {}: {}", path.display(), name, e);
            }
        }
    }

    println!(
        "\n📊 {} files, {} queries, {} passed, {} failed",
        loaded.len(),
        reports.len(),
        passed,
        failures
    );
    if failures > 0 {
        bail!("{} queries failed", failures);
    }
    Ok(())
}

fn cmd_show(file: &Path) -> Result<()> {
    let program = load(file)?;
    for method in program.methods() {
        let mut flags = Vec::new();
        if method.is_entry_point {
            flags.push("entry");
        }
        if method.is_static {
            flags.push("static");
        }
        if method.is_ignored {
            flags.push("ignored");
        }
        println!("\n{} [{}]", program.method_name(method.id), flags.join(", "));
        for &stmt in &method.body {
            let info = program.stmt_info(stmt);
            let label = info.label.as_deref().map(|l| format!("{}: ", l)).unwrap_or_default();
            println!("   {:>4}  {}{}", stmt.to_string(), label, info.text);
        }
    }
    for spec in program.queries() {
        println!("\n🔎 {} at {}:{}", spec.path, spec.method, spec.at);
    }
    Ok(())
}
