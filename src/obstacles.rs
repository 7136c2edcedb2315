//! Obstacle regions loaded from JSON and rasterised onto the design grid.
//!
//! ```json
//! { "obstacles": [
//!     { "type": "cube",     "center": [0.5, 0.5, 0.2], "size": 0.15 },
//!     { "type": "sphere",   "center": [0.25, 0.25, 0.6], "radius": 0.1 },
//!     { "type": "cylinder", "center": [0.75, 0.5, 0.5], "radius": 0.08,
//!       "height": 0.7, "axis": 2 }
//! ] }
//! ```
//!
//! Centres are fractions of `(nelx, nely, nelz)`, with y counted from the
//! top row.  Cube sizes and cylinder heights are fractions of the axis they
//! lie along.  Radii are fractions of the smallest grid dimension, so
//! spheres stay round on non-cubic grids.

use crate::types::{Grid, Result, TopoError};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CubeSize {
    Uniform(f64),
    PerAxis([f64; 3]),
}

impl CubeSize {
    fn per_axis(&self) -> [f64; 3] {
        match *self {
            Self::Uniform(s) => [s, s, s],
            Self::PerAxis(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ObstacleShape {
    Cube {
        center: [f64; 3],
        size: CubeSize,
    },
    Sphere {
        center: [f64; 3],
        radius: f64,
    },
    Cylinder {
        center: [f64; 3],
        radius: f64,
        height: f64,
        #[serde(default = "default_axis")]
        axis: usize,
    },
}

fn default_axis() -> usize {
    2
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObstacleConfig {
    pub obstacles: Vec<ObstacleShape>,
}

impl ObstacleShape {
    fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(TopoError::ObstacleConfig(msg));
        let center = match self {
            Self::Cube { center, .. } | Self::Sphere { center, .. } | Self::Cylinder { center, .. } => center,
        };
        if center.iter().any(|c| !c.is_finite()) {
            return bad(format!("non-finite centre {center:?}"));
        }
        match self {
            Self::Cube { size, .. } => {
                if size.per_axis().iter().any(|&s| !(s > 0.0)) {
                    return bad(format!("cube size must be positive, got {size:?}"));
                }
            }
            Self::Sphere { radius, .. } => {
                if !(*radius > 0.0) {
                    return bad(format!("sphere radius must be positive, got {radius}"));
                }
            }
            Self::Cylinder { radius, height, axis, .. } => {
                if !(*radius > 0.0 && *height > 0.0) {
                    return bad(format!(
                        "cylinder radius and height must be positive, got {radius} and {height}"
                    ));
                }
                if *axis > 2 {
                    return bad(format!("cylinder axis must be 0, 1 or 2, got {axis}"));
                }
            }
        }
        Ok(())
    }

    /// Whether the point `p` (in element units) lies inside the shape.
    fn contains(&self, p: [f64; 3], dims: [f64; 3]) -> bool {
        let min_dim = dims.iter().copied().fold(f64::INFINITY, f64::min);
        match self {
            Self::Cube { center, size } => {
                let size = size.per_axis();
                (0..3).all(|d| (p[d] - center[d] * dims[d]).abs() <= 0.5 * size[d] * dims[d])
            }
            Self::Sphere { center, radius } => {
                let r = radius * min_dim;
                let dist2: f64 = (0..3).map(|d| (p[d] - center[d] * dims[d]).powi(2)).sum();
                dist2 <= r * r
            }
            Self::Cylinder { center, radius, height, axis } => {
                let r = radius * min_dim;
                let along = (p[*axis] - center[*axis] * dims[*axis]).abs();
                if along > 0.5 * height * dims[*axis] {
                    return false;
                }
                let dist2: f64 = (0..3)
                    .filter(|&d| d != *axis)
                    .map(|d| (p[d] - center[d] * dims[d]).powi(2))
                    .sum();
                dist2 <= r * r
            }
        }
    }
}

pub fn parse_obstacle_config(json: &str) -> Result<ObstacleConfig> {
    let config: ObstacleConfig = serde_json::from_str(json)
        .map_err(|e| TopoError::ObstacleConfig(format!("invalid obstacle JSON: {e}")))?;
    for shape in &config.obstacles {
        shape.validate()?;
    }
    Ok(config)
}

pub fn load_obstacle_config(path: impl AsRef<Path>) -> Result<ObstacleConfig> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let config = parse_obstacle_config(&text)?;
    debug!("Loaded {} obstacles from {}", config.obstacles.len(), path.display());
    Ok(config)
}

/// Boolean mask of shape `(nely, nelx, nelz)`: `true` where an element's
/// centre falls inside any of the shapes.
pub fn create_obstacle_mask(grid: &Grid, shapes: &[ObstacleShape]) -> Array3<bool> {
    let dims = [grid.nelx as f64, grid.nely as f64, grid.nelz as f64];
    Array3::from_shape_fn(grid.shape(), |(j, i, k)| {
        let p = [i as f64 + 0.5, j as f64 + 0.5, k as f64 + 0.5];
        shapes.iter().any(|s| s.contains(p, dims))
    })
}
