//! End-to-end experiment runner behind the `topo3d` binary.

use crate::benchmark::{BenchmarkSummary, BenchmarkTracker};
use crate::cli::{create_config, generate_experiment_name, Args, LogLevel};
use crate::export::voxel_to_stl;
use crate::obstacles::{create_obstacle_mask, load_obstacle_config};
use crate::optimizer::top3d;
use crate::results::{ResultsManager, RunMetrics};
use crate::types::{Grid, OptimizationResult, OptimizerSettings, Result, TopoError};
use ndarray::Array3;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const STL_FILE: &str = "optimized_design.stl";

// ─────────────────────────────────────────────────────────────
//  Logging
// ─────────────────────────────────────────────────────────────

/// Install the global subscriber.  `RUST_LOG` wins over every flag;
/// otherwise `verbose` means DEBUG, `quiet` means WARN, else `level`.
/// With `log_file`, records are also written there without colours.
pub fn setup_logging(verbose: bool, quiet: bool, level: LogLevel, log_file: Option<&Path>) -> Result<()> {
    let default = if verbose {
        LogLevel::Debug.directive()
    } else if quiet {
        LogLevel::Warning.directive()
    } else {
        level.directive()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let file_layer = match log_file {
        Some(path) => {
            let file = File::create(path)?;
            Some(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init()
        .map_err(|e| TopoError::Io(std::io::Error::other(e)))
}

// ─────────────────────────────────────────────────────────────
//  Setup
// ─────────────────────────────────────────────────────────────

/// Everything prepared before the optimiser starts.
#[derive(Debug)]
pub struct Experiment {
    pub grid: Grid,
    pub settings: OptimizerSettings,
    pub obstacle_mask: Option<Array3<bool>>,
    pub results: ResultsManager,
}

/// Create the experiment directory, save the configuration and rasterise
/// the obstacle file, if any.
pub fn setup_experiment(args: &Args) -> Result<Experiment> {
    let grid = args.grid()?;
    let settings = args.settings();
    settings.validate()?;

    let name = generate_experiment_name(args);
    let results = ResultsManager::new(&args.results_dir, name, args.description.clone())?;
    info!("Experiment: {}", results.experiment_name());
    if let Some(description) = results.description() {
        info!("Description: {description}");
    }
    results.save_config(&create_config(args))?;

    let obstacle_mask = match &args.obstacle_config {
        Some(path) => {
            info!("Loading obstacle configuration from {}", path.display());
            let config = load_obstacle_config(path)?;
            let mask = create_obstacle_mask(&grid, &config.obstacles);
            let blocked = mask.iter().filter(|&&b| b).count();
            info!(
                "Created obstacle mask with {blocked} obstacle elements ({:.1}% of the domain)",
                100.0 * blocked as f64 / grid.num_elements() as f64
            );
            Some(mask)
        }
        None => None,
    };

    Ok(Experiment {
        grid,
        settings,
        obstacle_mask,
        results,
    })
}

// ─────────────────────────────────────────────────────────────
//  Optimisation
// ─────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct RunOutcome {
    pub result: OptimizationResult,
    pub runtime_seconds: f64,
    pub benchmark: Option<BenchmarkSummary>,
}

/// File name of a saved benchmark summary for `grid`.
pub fn benchmark_file_name(grid: &Grid) -> String {
    format!(
        "benchmark_size_{}_nelx{}_nely{}_nelz{}.json",
        grid.num_elements(),
        grid.nelx,
        grid.nely,
        grid.nelz
    )
}

/// Run the optimiser and time it.  With `benchmark`, per-phase timings
/// are logged; with `save_benchmark_dir`, they are also written there.
pub fn execute_optimization(
    grid: Grid,
    settings: &OptimizerSettings,
    obstacle_mask: Option<&Array3<bool>>,
    benchmark: bool,
    save_benchmark_dir: Option<&Path>,
) -> Result<RunOutcome> {
    info!(
        "Starting optimization with {}x{}x{} elements ({} total)",
        grid.nelx,
        grid.nely,
        grid.nelz,
        grid.num_elements()
    );
    let mut tracker = benchmark.then(BenchmarkTracker::with_memory_tracking);

    let started = Instant::now();
    let result = top3d(grid, settings, obstacle_mask, tracker.as_mut())?;
    let runtime_seconds = started.elapsed().as_secs_f64();
    info!("Optimization completed in {runtime_seconds:.2} seconds");

    let summary = match tracker.as_mut() {
        Some(tracker) => {
            tracker.finalize();
            let summary = tracker.summary();
            info!(
                "Benchmark: {:.2}s over {} iterations",
                summary.total_time_seconds, summary.iterations
            );
            for (phase, stats) in &summary.phases {
                info!(
                    "  {phase:<12} {:>9.3}s {:>5.1}% ({} calls)",
                    stats.total_seconds, stats.percentage, stats.calls
                );
            }
            if let Some(peak) = summary.peak_memory_mb {
                info!("Peak memory usage: {peak:.1} MB");
            }
            if let Some(dir) = save_benchmark_dir {
                std::fs::create_dir_all(dir)?;
                let path = dir.join(benchmark_file_name(&grid));
                tracker.save_to_file(&path)?;
                info!("Benchmark results saved to {}", path.display());
            }
            Some(summary)
        }
        None => None,
    };

    Ok(RunOutcome {
        result,
        runtime_seconds,
        benchmark: summary,
    })
}

// ─────────────────────────────────────────────────────────────
//  Output
// ─────────────────────────────────────────────────────────────

/// Write `optimized_design.stl` into `dir`.  Returns whether a file was
/// written; failures are logged and do not abort the run.
pub fn export_result_to_stl(
    export: bool,
    density: &Array3<f64>,
    dir: &Path,
    level: f64,
    smooth: bool,
    smooth_iterations: usize,
) -> bool {
    if !export {
        return false;
    }
    let path = dir.join(STL_FILE);
    info!("Exporting optimization result to STL: {}", path.display());
    match voxel_to_stl(density, &path, level, smooth, smooth_iterations) {
        Ok(_) => {
            info!("Successfully exported optimization result to {}", path.display());
            true
        }
        Err(e) => {
            error!("Failed to export STL: {e}");
            false
        }
    }
}

/// Text view of z-layer `k`: one line per row (top first), `█` where the
/// density exceeds `threshold`.
pub fn render_slice(density: &Array3<f64>, threshold: f64, k: usize) -> Result<String> {
    let (nely, nelx, nelz) = density.dim();
    if k >= nelz {
        return Err(TopoError::Shape(format!("slice {k} out of range for nelz = {nelz}")));
    }
    let mut out = String::with_capacity(nely * (nelx * 3 + 1));
    for j in 0..nely {
        for i in 0..nelx {
            out.push(if density[[j, i, k]] > threshold { '█' } else { ' ' });
        }
        out.push('\n');
    }
    Ok(out)
}

/// Paths written by a full run.
#[derive(Debug)]
pub struct RunArtifacts {
    pub experiment_dir: PathBuf,
    pub density: PathBuf,
    pub stl: Option<PathBuf>,
    pub metrics: RunMetrics,
    pub slice: String,
}

/// Full CLI pipeline: setup, optimise, save, export.
pub fn run(args: &Args) -> Result<RunArtifacts> {
    let experiment = setup_experiment(args)?;
    let results = &experiment.results;

    let benchmark_dir = args.results_dir.join("benchmarks");
    let outcome = execute_optimization(
        experiment.grid,
        &experiment.settings,
        experiment.obstacle_mask.as_ref(),
        args.benchmark,
        args.save_benchmark.then_some(benchmark_dir.as_path()),
    )?;
    let result = &outcome.result;

    let density = results.save_density(&result.density, &args.output)?;
    info!("Saved optimized design to {}", density.display());
    results.save_trace(&result.trace)?;
    if let Some(history) = &result.history {
        results.save_history(history)?;
    }

    let stl_exported = export_result_to_stl(
        args.export_stl,
        &result.density,
        results.experiment_dir(),
        args.stl_level,
        args.smooth_stl,
        args.smooth_iterations,
    );

    let grid = experiment.grid;
    let design_elements = match &experiment.obstacle_mask {
        Some(mask) => mask.iter().filter(|&&b| !b).count(),
        None => grid.num_elements(),
    };
    let metrics = RunMetrics {
        experiment_name: results.experiment_name().to_string(),
        description: results.description().map(str::to_string),
        runtime_seconds: outcome.runtime_seconds,
        iterations: result.iterations,
        converged: result.converged,
        final_objective: result.final_objective,
        final_volume_fraction: result.final_volume_fraction,
        target_volume_fraction: experiment.settings.volfrac,
        design_elements,
        total_elements: grid.num_elements(),
        solver: result.solver.name().to_string(),
        stl_exported,
    };
    results.save_metrics(&metrics)?;
    info!("Results saved to {}", results.experiment_dir().display());

    let slice = render_slice(&result.density, args.disp_thres, grid.nelz / 2)?;

    Ok(RunArtifacts {
        experiment_dir: results.experiment_dir().to_path_buf(),
        density,
        stl: stl_exported.then(|| results.experiment_dir().join(STL_FILE)),
        metrics,
        slice,
    })
}
