//! Command-line arguments and the configuration snapshot saved with each run.

use crate::types::{Grid, Material, OptimizerSettings, Result, SolverKind, DEFAULT_MOVE_LIMIT};
use clap::{ArgAction, Parser, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// `tracing` filter directive for this level.
    pub fn directive(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error | Self::Critical => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverChoice {
    Auto,
    Direct,
    Cg,
}

impl From<SolverChoice> for SolverKind {
    fn from(choice: SolverChoice) -> Self {
        match choice {
            SolverChoice::Auto => SolverKind::Auto,
            SolverChoice::Direct => SolverKind::Direct,
            SolverChoice::Cg => SolverKind::default_cg(),
        }
    }
}

/// 3D topology optimization of a cantilever beam.
#[derive(Debug, Clone, Parser, Serialize)]
#[command(name = "topo3d", version, about = "3D Topology Optimization")]
pub struct Args {
    // ── Basic parameters ──────────────────────────────────
    /// Number of elements in x direction
    #[arg(long, default_value_t = 60)]
    pub nelx: usize,

    /// Number of elements in y direction
    #[arg(long, default_value_t = 30)]
    pub nely: usize,

    /// Number of elements in z direction
    #[arg(long, default_value_t = 20)]
    pub nelz: usize,

    /// Volume fraction constraint
    #[arg(long, default_value_t = 0.3)]
    pub volfrac: f64,

    /// Penalty parameter
    #[arg(long, default_value_t = 3.0)]
    pub penal: f64,

    /// Filter radius
    #[arg(long, default_value_t = 3.0)]
    pub rmin: f64,

    /// Threshold for displaying elements in the slice preview
    #[arg(long = "disp-thres", alias = "disp_thres", default_value_t = 0.5)]
    pub disp_thres: f64,

    /// Convergence tolerance on design change
    #[arg(long, default_value_t = 0.01)]
    pub tolx: f64,

    /// Maximum number of iterations
    #[arg(long, default_value_t = 2000)]
    pub maxloop: usize,

    /// Linear solver for the equilibrium equations
    #[arg(long, value_enum, default_value_t = SolverChoice::Auto)]
    pub solver: SolverChoice,

    // ── Output parameters ─────────────────────────────────
    /// Output filename for the optimized design
    #[arg(long, default_value = "optimized_design.json")]
    pub output: String,

    /// Root directory for experiment outputs
    #[arg(long, env = "TOPO3D_RESULTS_DIR", default_value = "results")]
    pub results_dir: PathBuf,

    /// Export the final optimization result as an STL file
    #[arg(long)]
    pub export_stl: bool,

    /// Contour level for STL export
    #[arg(long, default_value_t = 0.5)]
    pub stl_level: f64,

    /// Apply smoothing to the exported STL
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub smooth_stl: bool,

    /// Number of smoothing iterations for STL export
    #[arg(long, default_value_t = 5)]
    pub smooth_iterations: usize,

    /// Custom name for the experiment
    #[arg(long)]
    pub experiment_name: Option<String>,

    /// Description of the experiment
    #[arg(long)]
    pub description: Option<String>,

    /// Record the density field every `history-frequency` iterations
    #[arg(long)]
    pub save_history: bool,

    #[arg(long, default_value_t = 10)]
    pub history_frequency: usize,

    /// Track per-phase timings
    #[arg(long)]
    pub benchmark: bool,

    /// Write the benchmark summary to `<results-dir>/benchmarks`
    #[arg(long, requires = "benchmark")]
    pub save_benchmark: bool,

    // ── Obstacle parameters ───────────────────────────────
    /// Path to a JSON file defining obstacles
    #[arg(long)]
    pub obstacle_config: Option<PathBuf>,

    // ── Logging parameters ────────────────────────────────
    /// Logging level
    #[arg(long, value_enum, ignore_case = true, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose output (DEBUG level)
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress output (WARNING level)
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    pub fn grid(&self) -> Result<Grid> {
        Grid::new(self.nelx, self.nely, self.nelz)
    }

    pub fn settings(&self) -> OptimizerSettings {
        OptimizerSettings {
            volfrac: self.volfrac,
            penal: self.penal,
            rmin: self.rmin,
            tolx: self.tolx,
            maxloop: self.maxloop,
            move_limit: DEFAULT_MOVE_LIMIT,
            solver: self.solver.into(),
            material: Material::default(),
            save_history: self.save_history,
            history_frequency: self.history_frequency,
        }
    }
}

/// Explicit `--experiment-name`, else `"{nelx}x{nely}x{nelz}_{obstacle}"`
/// where `obstacle` is the obstacle file stem or `no_obstacle`.
pub fn generate_experiment_name(args: &Args) -> String {
    if let Some(name) = &args.experiment_name {
        return name.clone();
    }
    let dims = format!("{}x{}x{}", args.nelx, args.nely, args.nelz);
    let obstacle = args
        .obstacle_config
        .as_ref()
        .and_then(|p| p.file_stem())
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "no_obstacle".to_string());
    format!("{dims}_{obstacle}")
}

/// Arguments plus the time the run was configured.
#[derive(Debug, Clone, Serialize)]
pub struct ExperimentConfig {
    #[serde(flatten)]
    pub args: Args,
    pub timestamp: String,
}

pub fn create_config(args: &Args) -> ExperimentConfig {
    ExperimentConfig {
        args: args.clone(),
        timestamp: chrono::Local::now().to_rfc3339(),
    }
}
