//! SIMP compliance minimisation driver.
//!
//! Each iteration runs the forward solve, evaluates compliance and its
//! sensitivities, filters them and applies the optimality-criteria update.

use crate::benchmark::{BenchmarkTracker, Phase};
use crate::fem::{assemble_stiffness, solve_displacements};
use crate::filter::DensityFilter;
use crate::mesh::{elements_from_mask, field_from_elements};
use crate::oc::{optimality_criteria_update, OcInput};
use crate::sensitivity::{
    compliance, compliance_sensitivity, update_element_compliance, volume_sensitivity,
};
use crate::types::{
    DensityHistory, FeCache, Grid, IterationRecord, OptimizationResult, OptimizerSettings, Result,
    TopoError,
};
use ndarray::Array3;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Log an INFO progress line every this many iterations.
const PROGRESS_INTERVAL: usize = 10;

/// Run the optimisation on `grid`.
///
/// `obstacle_mask` (shape `(nely, nelx, nelz)`) marks elements that must
/// stay void; they are excluded from the volume constraint.  Pass a
/// [`BenchmarkTracker`] to record per-phase timings.
pub fn top3d(
    grid: Grid,
    settings: &OptimizerSettings,
    obstacle_mask: Option<&Array3<bool>>,
    mut benchmark: Option<&mut BenchmarkTracker>,
) -> Result<OptimizationResult> {
    settings.validate()?;
    let material = settings.material;
    let penal = settings.penal;
    let nele = grid.num_elements();

    let obstacle = elements_from_mask(&grid, obstacle_mask)?;
    let design_nele = obstacle.iter().filter(|&&blocked| !blocked).count();
    if design_nele == 0 {
        return Err(TopoError::InvalidParameter(
            "obstacle mask covers the whole design domain".into(),
        ));
    }
    debug!(
        "Design elements: {design_nele}/{nele} ({:.1}%)",
        100.0 * design_nele as f64 / nele as f64
    );

    debug!("Building element stiffness, DOF tables and stiffness pattern");
    let mut cache = FeCache::new(grid, material)?;

    debug!("Building filter with radius {}", settings.rmin);
    let filter = DensityFilter::new(&grid, settings.rmin)?;

    debug!("Initializing design with volume fraction {}", settings.volfrac);
    let mut x: Vec<f64> = obstacle
        .iter()
        .map(|&blocked| if blocked { 0.0 } else { settings.volfrac })
        .collect();
    let mut x_phys = filter.apply(&x);
    zero_obstacles(&mut x_phys, &obstacle);

    let solver = settings.solver.resolve(cache.num_free());
    info!("Using solver: {}", solver.name());
    info!(
        "Starting optimization with tolerance {} and max iterations {}",
        settings.tolx, settings.maxloop
    );

    let mut history = if settings.save_history {
        Some(DensityHistory {
            iterations: vec![0],
            densities: vec![field_from_elements(&grid, x_phys.clone())?],
        })
    } else {
        None
    };

    let mut trace = Vec::new();
    let mut loop_ = 0usize;
    let mut change = 1.0_f64;
    let mut c = f64::NAN;
    let mut c_prev = f64::INFINITY;
    let mut volume_fraction = design_volume_fraction(&x_phys, &obstacle, design_nele);

    while change > settings.tolx && loop_ < settings.maxloop {
        loop_ += 1;
        let t_start = Instant::now();

        // 1. Assemble K(x̃)
        let t = Instant::now();
        assemble_stiffness(&mut cache, &x_phys, penal)?;
        record(&mut benchmark, Phase::Assembly, t);

        // 2. Solve K u = f
        let t = Instant::now();
        solve_displacements(&mut cache, settings.solver)?;
        record(&mut benchmark, Phase::Solve, t);

        // 3. Compliance and sensitivities
        let t = Instant::now();
        update_element_compliance(&mut cache);
        c = compliance(&x_phys, &cache.ce, penal, &material);
        let c_delta = c - c_prev;
        c_prev = c;
        let dc = compliance_sensitivity(&x_phys, &cache.ce, penal, &material);
        let dv = volume_sensitivity(nele);
        record(&mut benchmark, Phase::Sensitivity, t);

        // 4. Filter sensitivities, pin obstacles
        let t = Instant::now();
        let mut dc = filter.apply_to_sensitivity(&dc);
        let mut dv = filter.apply_to_sensitivity(&dv);
        zero_obstacles(&mut dc, &obstacle);
        zero_obstacles(&mut dv, &obstacle);
        record(&mut benchmark, Phase::Filter, t);

        // 5. OC update
        let t = Instant::now();
        let (mut x_new, step_change) = optimality_criteria_update(
            &OcInput {
                x: &x,
                dc: &dc,
                dv: &dv,
                obstacle: &obstacle,
                volfrac: settings.volfrac,
                design_nele,
                move_limit: settings.move_limit,
            },
            &filter,
        )?;
        zero_obstacles(&mut x_new, &obstacle);
        change = step_change;

        // 6. Physical densities
        x_phys = filter.apply(&x_new);
        zero_obstacles(&mut x_phys, &obstacle);
        x = x_new;
        record(&mut benchmark, Phase::Update, t);

        volume_fraction = design_volume_fraction(&x_phys, &obstacle, design_nele);
        let seconds = t_start.elapsed().as_secs_f64();
        debug!(
            "Iteration {loop_}: Obj={c:.4}, ΔObj={c_delta:.4}, Vol={volume_fraction:.3}, \
             change={change:.3}, time={seconds:.2}s"
        );
        if loop_ % PROGRESS_INTERVAL == 0 {
            info!(
                "Optimizing [{loop_}/{}] Obj={c:.4} ΔObj={c_delta:.4e} Vol={volume_fraction:.3} change={change:.3}",
                settings.maxloop
            );
        }
        trace.push(IterationRecord {
            iteration: loop_,
            objective: c,
            objective_delta: c_delta,
            volume_fraction,
            change,
            seconds,
        });

        if let Some(h) = history.as_mut() {
            if loop_ % settings.history_frequency == 0 {
                h.iterations.push(loop_);
                h.densities.push(field_from_elements(&grid, x_phys.clone())?);
            }
        }
        if let Some(b) = benchmark.as_deref_mut() {
            b.end_iteration();
        }
    }

    let converged = change <= settings.tolx;
    if loop_ < settings.maxloop {
        info!("Optimization converged in {loop_} iterations");
    } else {
        warn!(
            "Optimization reached maximum iterations ({}) without converging",
            settings.maxloop
        );
    }
    info!("Final objective value: {c:.6}");
    info!(
        "Final volume fraction: {volume_fraction:.6} (target: {:.6})",
        settings.volfrac
    );

    if let Some(h) = history.as_mut() {
        if h.iterations.last() != Some(&loop_) {
            h.iterations.push(loop_);
            h.densities.push(field_from_elements(&grid, x_phys.clone())?);
        }
        info!("Optimization history captured with {} frames", h.densities.len());
    }

    Ok(OptimizationResult {
        density: field_from_elements(&grid, x_phys)?,
        trace,
        iterations: loop_,
        converged,
        final_objective: c,
        final_volume_fraction: volume_fraction,
        solver,
        history,
    })
}

fn record(benchmark: &mut Option<&mut BenchmarkTracker>, phase: Phase, started: Instant) {
    if let Some(b) = benchmark.as_deref_mut() {
        b.record(phase, started.elapsed());
    }
}

fn zero_obstacles(values: &mut [f64], obstacle: &[bool]) {
    for (v, &blocked) in values.iter_mut().zip(obstacle) {
        if blocked {
            *v = 0.0;
        }
    }
}

/// Mean physical density over the non-obstacle elements.
fn design_volume_fraction(x_phys: &[f64], obstacle: &[bool], design_nele: usize) -> f64 {
    let total: f64 = x_phys
        .iter()
        .zip(obstacle)
        .filter(|&(_, &blocked)| !blocked)
        .map(|(&v, _)| v)
        .sum();
    total / design_nele as f64
}
