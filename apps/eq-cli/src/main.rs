use clap::{Parser, Subcommand};
use eq_project::{ProjectError, SolverInputs};
use eq_solver::{EquilibriumResult, IterationReport, SolverError};
use indexmap::IndexMap;
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "eq-cli")]
#[command(about = "Multi-phase, multi-component equilibrium calculator", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate problem file syntax and references
    Validate {
        /// Path to the problem file (YAML or JSON)
        problem_path: PathBuf,
    },
    /// Solve for equilibrium and evaluate the requested properties
    Solve {
        /// Path to the problem file (YAML or JSON)
        problem_path: PathBuf,
        /// Print the result as JSON instead of a table
        #[arg(long)]
        json: bool,
        /// Extra properties to evaluate (e.g. `HM.T`, `GM(FCC#2)`)
        #[arg(short, long = "property")]
        properties: Vec<String>,
    },
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Project(#[from] ProjectError),

    #[error(transparent)]
    Solver(#[from] SolverError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

type CliResult<T> = Result<T, CliError>;

fn main() -> CliResult<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Validate { problem_path } => cmd_validate(&problem_path),
        Commands::Solve {
            problem_path,
            json,
            properties,
        } => cmd_solve(&problem_path, json, &properties),
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => LevelFilter::ERROR,
        (false, 0) => LevelFilter::WARN,
        (false, 1) => LevelFilter::INFO,
        (false, 2) => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(false),
        )
        .with(level)
        .init();
}

fn cmd_validate(problem_path: &Path) -> CliResult<()> {
    println!("Validating problem: {}", problem_path.display());
    let problem = eq_project::load(problem_path)?;
    let inputs = eq_project::prepare(&problem)?;
    println!("✓ Problem is valid");
    println!(
        "  {} condition(s), {} starting composition set(s), {} property request(s)",
        inputs.conditions.len(),
        inputs.compsets.len(),
        inputs.properties.len()
    );
    Ok(())
}

#[derive(Serialize)]
struct PhaseReport {
    phase: String,
    amount: f64,
    fixed: bool,
    site_fractions: Vec<f64>,
}

#[derive(Serialize)]
struct SolveReport {
    name: String,
    converged: bool,
    iterations: usize,
    state_variables: IndexMap<String, f64>,
    chemical_potentials: IndexMap<String, f64>,
    phases: Vec<PhaseReport>,
    properties: IndexMap<String, Option<f64>>,
}

fn cmd_solve(problem_path: &Path, json: bool, extra_properties: &[String]) -> CliResult<()> {
    let problem = eq_project::load(problem_path)?;
    tracing::debug!(path = %problem_path.display(), name = %problem.name, "loaded problem");
    let SolverInputs {
        mut compsets,
        conditions,
        solver,
        mut properties,
    } = eq_project::prepare(&problem)?;
    for p in extra_properties {
        properties.push(p.parse()?);
    }

    let started = Instant::now();
    let result = if json {
        solver.solve(&mut compsets, &conditions)?
    } else {
        println!("Solving: {}", problem.name);
        let mut last_emit = Instant::now();
        let result = solver.solve_with_progress(
            &mut compsets,
            &conditions,
            Some(&mut |report: &IterationReport| {
                if last_emit.elapsed().as_millis() >= 100 {
                    render_cli_progress(report, started.elapsed().as_secs_f64());
                    last_emit = Instant::now();
                }
            }),
        )?;
        clear_progress_line();
        result
    };
    tracing::info!(
        converged = result.converged,
        iterations = result.iterations,
        elapsed_s = started.elapsed().as_secs_f64(),
        "solve finished"
    );

    let mut values = IndexMap::new();
    for p in &properties {
        values.insert(p.to_string(), p.compute(&compsets, &conditions)?);
    }
    let report = build_report(&problem.name, &result, &compsets, values);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, started.elapsed().as_secs_f64());
    }
    Ok(())
}

fn build_report(
    name: &str,
    result: &EquilibriumResult,
    compsets: &[eq_solver::CompositionSet],
    properties: IndexMap<String, Option<f64>>,
) -> SolveReport {
    let (state_variables, chemical_potentials) = match compsets.first() {
        Some(cs) => {
            let record = cs.phase_record();
            (
                record
                    .state_variables()
                    .iter()
                    .zip(cs.state_variables())
                    .map(|(sv, v)| (sv.to_string(), *v))
                    .collect(),
                record
                    .nonvacant_elements()
                    .iter()
                    .zip(result.chemical_potentials.iter())
                    .map(|(el, mu)| (el.clone(), *mu))
                    .collect(),
            )
        }
        None => (IndexMap::new(), IndexMap::new()),
    };
    SolveReport {
        name: name.to_string(),
        converged: result.converged,
        iterations: result.iterations,
        state_variables,
        chemical_potentials,
        phases: compsets
            .iter()
            .map(|cs| PhaseReport {
                phase: cs.phase_name().to_string(),
                amount: cs.np,
                fixed: cs.fixed,
                site_fractions: cs.site_fractions().to_vec(),
            })
            .collect(),
        properties,
    }
}

fn print_report(report: &SolveReport, elapsed_s: f64) {
    if report.converged {
        println!(
            "✓ Converged in {} iterations ({:.3}s)",
            report.iterations, elapsed_s
        );
    } else {
        println!(
            "✗ Not converged after {} iterations ({:.3}s)",
            report.iterations, elapsed_s
        );
    }

    println!("\nState variables:");
    for (name, value) in &report.state_variables {
        println!("  {:<6} {:>16.6}", name, value);
    }

    println!("\nChemical potentials [J/mol]:");
    for (element, mu) in &report.chemical_potentials {
        println!("  MU_{:<3} {:>16.6}", element, mu);
    }

    println!("\nPhases:");
    for phase in &report.phases {
        let y: Vec<String> = phase
            .site_fractions
            .iter()
            .map(|y| format!("{:.6}", y))
            .collect();
        println!(
            "  {:<12} NP={:<12.8}{}  y=[{}]",
            phase.phase,
            phase.amount,
            if phase.fixed { " (fixed)" } else { "" },
            y.join(", ")
        );
    }

    if !report.properties.is_empty() {
        println!("\nProperties:");
        for (name, value) in &report.properties {
            match value {
                Some(v) => println!("  {:<16} {:>16.6}", name, v),
                None => println!("  {:<16} {:>16}", name, "n/a"),
            }
        }
    }
}

fn clear_progress_line() {
    print!("\r{}\r", " ".repeat(120));
    let _ = io::stdout().flush();
}

fn render_cli_progress(report: &IterationReport, elapsed_s: f64) {
    let spinner = ['|', '/', '-', '\\'];
    let spin_idx = report.iteration % spinner.len();
    print!(
        "\r{} iter={}  residual={:.3e}  stable={:?}  elapsed={:.2}s",
        spinner[spin_idx],
        report.iteration,
        report.mass_residual,
        report.free_stable_compset_indices,
        elapsed_s
    );
    let _ = io::stdout().flush();
}
