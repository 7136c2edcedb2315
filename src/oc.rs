//! Optimality-criteria design update with bisection on the volume multiplier.

use crate::filter::DensityFilter;
use crate::types::{Result, TopoError};

/// Relative width of the multiplier bracket at which bisection stops.
pub const BISECTION_TOLERANCE: f64 = 1e-3;
/// Upper end of the initial multiplier bracket.
pub const LAMBDA_MAX: f64 = 1e9;

/// Inputs to one OC step.  All slices are indexed by element.
#[derive(Debug, Clone, Copy)]
pub struct OcInput<'a> {
    /// Current design variables.
    pub x: &'a [f64],
    /// Filtered compliance sensitivity (≤ 0 on design elements).
    pub dc: &'a [f64],
    /// Filtered volume sensitivity (> 0 on design elements).
    pub dv: &'a [f64],
    /// `true` where an element is an obstacle and stays void.
    pub obstacle: &'a [bool],
    pub volfrac: f64,
    /// Number of non-obstacle elements.
    pub design_nele: usize,
    pub move_limit: f64,
}

/// One OC update.
///
///   x_new = clamp(x √(−dc / (dv λ)),  max(0, x − m),  min(1, x + m))
///
/// λ is bisected until the filtered design meets `volfrac` over the
/// design domain.  Returns the new design and `max |x_new − x|`.
pub fn optimality_criteria_update(input: &OcInput<'_>, filter: &DensityFilter) -> Result<(Vec<f64>, f64)> {
    let n = input.x.len();
    if input.dc.len() != n || input.dv.len() != n || input.obstacle.len() != n || filter.hs.len() != n {
        return Err(TopoError::Shape(format!(
            "OC inputs disagree in length: x={}, dc={}, dv={}, mask={}, filter={}",
            n,
            input.dc.len(),
            input.dv.len(),
            input.obstacle.len(),
            filter.hs.len()
        )));
    }
    if input.design_nele == 0 {
        return Err(TopoError::InvalidParameter("design domain is empty".into()));
    }

    let target = input.volfrac * input.design_nele as f64;
    let mut l1 = 0.0_f64;
    let mut l2 = LAMBDA_MAX;
    let mut x_new = vec![0.0; n];

    while (l2 - l1) / (l1 + l2) > BISECTION_TOLERANCE {
        let lmid = 0.5 * (l1 + l2);
        update_with_multiplier(input, lmid, &mut x_new);

        let x_phys = filter.apply(&x_new);
        let volume: f64 = x_phys
            .iter()
            .zip(input.obstacle)
            .filter(|&(_, &blocked)| !blocked)
            .map(|(&v, _)| v)
            .sum();

        if volume > target {
            l1 = lmid;
        } else {
            l2 = lmid;
        }
    }

    let change = x_new
        .iter()
        .zip(input.x)
        .map(|(a, b)| (a - b).abs())
        .fold(0.0_f64, f64::max);
    Ok((x_new, change))
}

/// Fill `out` with the OC fixed-point step for multiplier `lambda`.
fn update_with_multiplier(input: &OcInput<'_>, lambda: f64, out: &mut [f64]) {
    for e in 0..out.len() {
        if input.obstacle[e] {
            out[e] = 0.0;
            continue;
        }
        let x = input.x[e];
        let dv = input.dv[e];
        let be = if dv > 0.0 { (-input.dc[e] / (dv * lambda)).max(0.0) } else { 0.0 };
        let lower = (x - input.move_limit).max(0.0);
        let upper = (x + input.move_limit).min(1.0);
        out[e] = (x * be.sqrt()).clamp(lower, upper);
    }
}
