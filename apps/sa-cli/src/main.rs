use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use sa_control::{
    AnalysisKind, AnalyzeResult, ControlConfig, ControlOverrides, ProgressEvent, ProgressStage,
    RunSummary, StepPlan, exit_status, load_overrides,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod scenario;

use scenario::Scenario;

#[derive(Parser)]
#[command(name = "sa-cli")]
#[command(about = "SmartAnalyze - adaptive convergence control for nonlinear analysis", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the sub-steps of a displacement protocol
    Plan {
        /// Largest sub-step magnitude
        #[arg(long)]
        max_step: f64,
        /// Target displacements, comma separated
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
        targets: Vec<f64>,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Validate control overrides and print the effective configuration
    Config {
        #[arg(long, value_enum)]
        analysis: AnalysisArg,
        /// Initial step (dt for transient, displacement for static)
        #[arg(long, allow_hyphen_values = true)]
        initial_step: f64,
        /// YAML or JSON file of control overrides
        #[arg(long)]
        overrides: Option<PathBuf>,
    },
    /// Run a scenario against the scripted solver
    Replay {
        /// Path to the scenario YAML file
        scenario_path: PathBuf,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum AnalysisArg {
    Static,
    Transient,
}

impl From<AnalysisArg> for AnalysisKind {
    fn from(arg: AnalysisArg) -> Self {
        match arg {
            AnalysisArg::Static => AnalysisKind::Static,
            AnalysisArg::Transient => AnalysisKind::Transient,
        }
    }
}

fn main() -> AnalyzeResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Plan {
            max_step,
            targets,
            json,
        } => cmd_plan(max_step, &targets, json),
        Commands::Config {
            analysis,
            initial_step,
            overrides,
        } => cmd_config(analysis.into(), initial_step, overrides.as_deref()),
        Commands::Replay {
            scenario_path,
            json,
        } => {
            let status = cmd_replay(&scenario_path, json)?;
            if status != 0 {
                std::process::exit(status);
            }
            Ok(())
        }
    }
}

fn cmd_plan(max_step: f64, targets: &[f64], json: bool) -> AnalyzeResult<()> {
    let plan = StepPlan::displacement(max_step, targets)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!(
        "{} sub-steps, total travel {:.6}",
        plan.len(),
        plan.total_distance()
    );
    for (level, (target, steps)) in targets.iter().zip(plan.levels()).enumerate() {
        println!("  level {} -> {}: {} sub-steps", level + 1, target, steps.len());
        for step in steps {
            println!("    {step}");
        }
    }
    Ok(())
}

fn cmd_config(
    analysis: AnalysisKind,
    initial_step: f64,
    overrides_path: Option<&Path>,
) -> AnalyzeResult<()> {
    let overrides = match overrides_path {
        Some(path) => load_overrides(path)?,
        None => ControlOverrides::default(),
    };
    let config = ControlConfig::new(analysis, initial_step, &overrides)?;
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}

fn cmd_replay(scenario_path: &Path, json: bool) -> AnalyzeResult<i32> {
    let scenario = Scenario::load(scenario_path)?;
    info!(path = %scenario_path.display(), "Replaying scenario");

    let mut last_emit = Instant::now();
    let (solver, result) = scenario.replay(Some(&mut |event| {
        let terminal = matches!(
            event.stage,
            ProgressStage::Finished | ProgressStage::Failed
        );
        if terminal || last_emit.elapsed().as_millis() >= 100 {
            render_cli_progress(&event);
            last_emit = Instant::now();
        }
    }));
    clear_progress_line();

    let status = exit_status(&result);
    match &result {
        Ok(summary) if json => println!("{}", serde_json::to_string_pretty(summary)?),
        Ok(summary) => print_summary(summary),
        Err(e) => eprintln!("✗ {e}"),
    }
    println!(
        "Solver calls: {} analyze, {} algorithm, {} test, {} integrator",
        solver.analyze_count(),
        solver.algorithm_changes(),
        solver.test_changes(),
        solver.control_changes()
    );
    Ok(status)
}

fn print_summary(summary: &RunSummary) {
    println!(
        "✓ {} analysis finished: {} sub-steps in {:.3}s",
        summary.analysis, summary.segments, summary.elapsed_s
    );
    let stats = &summary.stats;
    println!(
        "  attempts={}  failed={}  bisections={}  algorithm switches={}  iteration increases={}  loosenings={}  max depth={}",
        stats.solver_calls,
        stats.failed_attempts,
        stats.bisections,
        stats.algorithm_switches,
        stats.test_iteration_increases,
        stats.tolerance_loosenings,
        stats.max_depth
    );
    println!(
        "  final algorithm={}  test tol={:e}  test iterations={}",
        summary.final_algorithm, summary.final_test_tol, summary.final_test_iter_times
    );
}

fn clear_progress_line() {
    print!("\r{}\r", " ".repeat(120));
    let _ = io::stdout().flush();
}

fn render_cli_progress(event: &ProgressEvent) {
    let width = 28usize;
    let filled = ((event.fraction_complete * width as f64).round() as usize).min(width);
    let bar = format!(
        "{}{}",
        "#".repeat(filled),
        "-".repeat(width.saturating_sub(filled))
    );
    print!(
        "\r[{}] {:>6.2}%  {}/{}  elapsed={:.1}s",
        bar,
        event.fraction_complete * 100.0,
        event.completed,
        event.total,
        event.elapsed_wall_s
    );
    let _ = io::stdout().flush();
}
