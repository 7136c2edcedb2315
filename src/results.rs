//! Per-experiment output directory: configuration, densities and metrics.

use crate::types::{DensityHistory, IterationRecord, Result, TopoError};
use ndarray::{Array3, ShapeBuilder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONFIG_FILE: &str = "config.json";
pub const METRICS_FILE: &str = "metrics.json";
pub const TRACE_FILE: &str = "trace.json";
pub const HISTORY_FILE: &str = "history.json";

/// On-disk form of a density field: `(nely, nelx, nelz)` shape with the
/// values in column-major order, so `data[e]` is element `e`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityFile {
    pub dim: [usize; 3],
    pub order: String,
    pub data: Vec<f64>,
}

impl DensityFile {
    pub fn from_field(field: &Array3<f64>) -> Self {
        let (nely, nelx, nelz) = field.dim();
        Self {
            dim: [nely, nelx, nelz],
            order: "F".into(),
            // Reversing the axes makes logical order walk axis 0 fastest.
            data: field.t().iter().copied().collect(),
        }
    }

    pub fn into_field(self) -> Result<Array3<f64>> {
        if self.order != "F" {
            return Err(TopoError::Shape(format!(
                "density data must be in F order, got {:?}",
                self.order
            )));
        }
        let [nely, nelx, nelz] = self.dim;
        Array3::from_shape_vec((nely, nelx, nelz).f(), self.data)
            .map_err(|e| TopoError::Shape(format!("density file does not match its dim: {e}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HistoryFile {
    iterations: Vec<usize>,
    densities: Vec<DensityFile>,
}

/// Summary of a finished run, written next to the design.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub experiment_name: String,
    pub description: Option<String>,
    pub runtime_seconds: f64,
    pub iterations: usize,
    pub converged: bool,
    pub final_objective: f64,
    pub final_volume_fraction: f64,
    pub target_volume_fraction: f64,
    pub design_elements: usize,
    pub total_elements: usize,
    pub solver: String,
    pub stl_exported: bool,
}

#[derive(Debug, Clone)]
pub struct ResultsManager {
    experiment_name: String,
    description: Option<String>,
    experiment_dir: PathBuf,
}

impl ResultsManager {
    /// Create (if needed) `<base_dir>/<experiment_name>/`.
    pub fn new(
        base_dir: impl AsRef<Path>,
        experiment_name: impl Into<String>,
        description: Option<String>,
    ) -> Result<Self> {
        let experiment_name = experiment_name.into();
        let experiment_dir = base_dir.as_ref().join(&experiment_name);
        fs::create_dir_all(&experiment_dir)?;
        debug!("Experiment directory: {}", experiment_dir.display());
        Ok(Self {
            experiment_name,
            description,
            experiment_dir,
        })
    }

    pub fn experiment_name(&self) -> &str {
        &self.experiment_name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn experiment_dir(&self) -> &Path {
        &self.experiment_dir
    }

    fn write_json<T: Serialize + ?Sized>(&self, file_name: &str, value: &T) -> Result<PathBuf> {
        let path = self.experiment_dir.join(file_name);
        fs::write(&path, serde_json::to_string_pretty(value)?)?;
        debug!("Saved {}", path.display());
        Ok(path)
    }

    pub fn save_config<T: Serialize>(&self, config: &T) -> Result<PathBuf> {
        self.write_json(CONFIG_FILE, config)
    }

    /// Save the density field under `file_name` inside the experiment
    /// directory.
    pub fn save_density(&self, density: &Array3<f64>, file_name: &str) -> Result<PathBuf> {
        self.write_json(file_name, &DensityFile::from_field(density))
    }

    pub fn save_metrics(&self, metrics: &RunMetrics) -> Result<PathBuf> {
        self.write_json(METRICS_FILE, metrics)
    }

    pub fn save_trace(&self, trace: &[IterationRecord]) -> Result<PathBuf> {
        self.write_json(TRACE_FILE, trace)
    }

    pub fn save_history(&self, history: &DensityHistory) -> Result<PathBuf> {
        let file = HistoryFile {
            iterations: history.iterations.clone(),
            densities: history.densities.iter().map(DensityFile::from_field).collect(),
        };
        self.write_json(HISTORY_FILE, &file)
    }
}

/// Read a density field written by [`ResultsManager::save_density`].
pub fn load_density(path: impl AsRef<Path>) -> Result<Array3<f64>> {
    let text = fs::read_to_string(path)?;
    serde_json::from_str::<DensityFile>(&text)?.into_field()
}

/// Read a history written by [`ResultsManager::save_history`].
pub fn load_history(path: impl AsRef<Path>) -> Result<DensityHistory> {
    let text = fs::read_to_string(path)?;
    let file: HistoryFile = serde_json::from_str(&text)?;
    Ok(DensityHistory {
        iterations: file.iterations,
        densities: file
            .densities
            .into_iter()
            .map(DensityFile::into_field)
            .collect::<Result<_>>()?,
    })
}
