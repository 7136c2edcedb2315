//! Forward finite-element solve: assemble K(x), factorise / iterate, scatter u.

use crate::stiffness::KE_DOFS;
use crate::types::{FeCache, Factorization, LinearSolver, Result, SolverKind, TopoError, NOT_FREE};
use sprs::CsMat;
use tracing::debug;

// ─────────────────────────────────────────────────────────────
//  System matrix assembly  K(x)
// ─────────────────────────────────────────────────────────────

/// Zero-allocation in-place refill of `cache.k_matrix` from the physical
/// densities:  K_ff = Σ_e E(x_e) KE  via the precomputed `ke_to_nz` map.
pub fn assemble_stiffness(cache: &mut FeCache, x_phys: &[f64], penal: f64) -> Result<()> {
    let nele = cache.grid.num_elements();
    if x_phys.len() != nele {
        return Err(TopoError::Shape(format!(
            "density vector has {} entries, grid has {nele} elements",
            x_phys.len()
        )));
    }

    let material = cache.material;
    let data = cache.k_matrix.data_mut();
    data.fill(0.0);
    for (e, &xe) in x_phys.iter().enumerate() {
        let modulus = material.modulus(xe, penal);
        let nz_map = cache.ke_to_nz.element(e);
        for a in 0..KE_DOFS {
            let row = &cache.ke[a];
            let map = &nz_map[a * KE_DOFS..(a + 1) * KE_DOFS];
            for (b, &nz) in map.iter().enumerate() {
                if nz != NOT_FREE {
                    data[nz as usize] += modulus * row[b];
                }
            }
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────
//  Linear solve
// ─────────────────────────────────────────────────────────────

/// Solve K_ff u_f = f_f and scatter into the full displacement vector.
///
/// The direct path keeps its factorization in the cache and refreshes it
/// numerically on later calls.  The CG path warm-starts from the previous
/// solution.
pub fn solve_displacements(cache: &mut FeCache, solver: SolverKind) -> Result<()> {
    match solver.resolve(cache.num_free()) {
        LinearSolver::Direct => {
            match cache.factorization.as_mut() {
                Some(f) => f.update(cache.k_matrix.view())?,
                None => cache.factorization = Some(Factorization::new(cache.k_matrix.view())?),
            }
            let fact = cache
                .factorization
                .as_ref()
                .ok_or(TopoError::MissingFactorization)?;
            cache.u_free = fact.solve(&cache.force_free);
        }
        LinearSolver::ConjugateGradient { tolerance, max_iterations } => {
            let iters = conjugate_gradient(
                &cache.k_matrix,
                &cache.force_free,
                &mut cache.u_free,
                tolerance,
                max_iterations,
            )?;
            debug!("CG converged in {iters} iterations");
        }
    }

    scatter_displacements(cache);
    Ok(())
}

/// Write free-DOF displacements back into `cache.u`; fixed DOFs stay zero.
pub fn scatter_displacements(cache: &mut FeCache) {
    cache.u.fill(0.0);
    for (i, &dof) in cache.free_dofs.iter().enumerate() {
        cache.u[dof] = cache.u_free[i];
    }
}

/// Jacobi-preconditioned conjugate gradient on a symmetric CSC matrix.
///
/// `x` holds the initial guess on entry and the solution on exit.
/// Converges when ‖r‖ ≤ tolerance · ‖b‖.  Returns the iteration count.
pub fn conjugate_gradient(
    a: &CsMat<f64>,
    b: &[f64],
    x: &mut [f64],
    tolerance: f64,
    max_iterations: usize,
) -> Result<usize> {
    let n = b.len();
    if a.rows() != n || a.cols() != n || x.len() != n {
        return Err(TopoError::Shape(format!(
            "CG system is {}x{}, rhs {}, guess {}",
            a.rows(),
            a.cols(),
            n,
            x.len()
        )));
    }

    let b_norm = norm(b);
    if b_norm == 0.0 {
        x.fill(0.0);
        return Ok(0);
    }

    let inv_diag: Vec<f64> = diagonal(a)
        .into_iter()
        .map(|d| if d > 0.0 { 1.0 / d } else { 1.0 })
        .collect();

    let mut r = vec![0.0; n];
    spmv_into(a, x, &mut r);
    for i in 0..n {
        r[i] = b[i] - r[i];
    }
    let mut z: Vec<f64> = r.iter().zip(&inv_diag).map(|(ri, di)| ri * di).collect();
    let mut p = z.clone();
    let mut ap = vec![0.0; n];
    let mut rz = dot(&r, &z);

    for iter in 0..max_iterations {
        if norm(&r) <= tolerance * b_norm {
            return Ok(iter);
        }
        spmv_into(a, &p, &mut ap);
        let pap = dot(&p, &ap);
        if pap <= 0.0 {
            return Err(TopoError::Solver(format!(
                "CG breakdown at iteration {iter}: pᵀAp = {pap:.3e}"
            )));
        }
        let alpha = rz / pap;
        for i in 0..n {
            x[i] += alpha * p[i];
            r[i] -= alpha * ap[i];
        }
        for i in 0..n {
            z[i] = r[i] * inv_diag[i];
        }
        let rz_new = dot(&r, &z);
        let beta = rz_new / rz;
        rz = rz_new;
        for i in 0..n {
            p[i] = z[i] + beta * p[i];
        }
    }

    let rel = norm(&r) / b_norm;
    if rel <= tolerance {
        Ok(max_iterations)
    } else {
        Err(TopoError::Solver(format!(
            "CG did not converge in {max_iterations} iterations (relative residual {rel:.3e})"
        )))
    }
}

// ─────────────────────────────────────────────────────────────
//  Sparse helpers
// ─────────────────────────────────────────────────────────────

/// out = A x  for a CSC matrix.
fn spmv_into(a: &CsMat<f64>, x: &[f64], out: &mut [f64]) {
    out.fill(0.0);
    for (col, column) in a.outer_iterator().enumerate() {
        let xc = x[col];
        if xc == 0.0 {
            continue;
        }
        for (row, &v) in column.iter() {
            out[row] += v * xc;
        }
    }
}

fn diagonal(a: &CsMat<f64>) -> Vec<f64> {
    let mut d = vec![0.0; a.rows().min(a.cols())];
    for (outer, vec) in a.outer_iterator().enumerate() {
        for (inner, &v) in vec.iter() {
            if inner == outer {
                d[outer] = v;
            }
        }
    }
    d
}

#[inline]
fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[inline]
fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}
