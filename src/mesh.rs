//! Grid connectivity, loads and supports for the cantilever problem.
//!
//! The beam is clamped on the face `x = 0` and loaded downwards along the
//! top edge of the free end (`x = nelx`, node row 0) over its full depth.

use crate::stiffness::{KE_DOFS, LOCAL_NODES};
use crate::types::{Grid, Result, TopoError};
use ndarray::{Array3, ShapeBuilder};
use sprs::CsMat;

/// Global node of local node `a` of element (i, j, k).
///
/// Local y offset 1 is the upper node row (`row = j`), offset 0 the lower
/// one (`row = j + 1`).
#[inline]
fn local_to_global_node(grid: &Grid, i: usize, j: usize, k: usize, local: [usize; 3]) -> usize {
    grid.node_index(i + local[0], j + 1 - local[1], k + local[2])
}

/// Global DOFs of every element, ordered by element index.
pub fn element_dofs(grid: &Grid) -> Vec<[usize; KE_DOFS]> {
    (0..grid.num_elements())
        .map(|e| {
            let (i, j, k) = grid.element_coords(e);
            let mut dofs = [0usize; KE_DOFS];
            for (a, &local) in LOCAL_NODES.iter().enumerate() {
                let n = local_to_global_node(grid, i, j, k, local);
                dofs[3 * a] = 3 * n;
                dofs[3 * a + 1] = 3 * n + 1;
                dofs[3 * a + 2] = 3 * n + 2;
            }
            dofs
        })
        .collect()
}

/// Unit downward (−y) load on every node of the top edge at the free end.
pub fn force_vector(grid: &Grid) -> Vec<f64> {
    let mut f = vec![0.0; grid.num_dofs()];
    for k in 0..=grid.nelz {
        let n = grid.node_index(grid.nelx, 0, k);
        f[3 * n + 1] = -1.0;
    }
    f
}

/// Clamp every DOF on the face `x = 0`.
///
/// Returns `(free_dofs, fixed_dofs)`, both sorted ascending.
pub fn supports(grid: &Grid) -> (Vec<usize>, Vec<usize>) {
    let mut fixed = Vec::with_capacity(3 * (grid.nely + 1) * (grid.nelz + 1));
    for k in 0..=grid.nelz {
        for row in 0..=grid.nely {
            let n = grid.node_index(0, row, k);
            fixed.extend_from_slice(&[3 * n, 3 * n + 1, 3 * n + 2]);
        }
    }
    fixed.sort_unstable();

    let mut is_fixed = vec![false; grid.num_dofs()];
    for &d in &fixed {
        is_fixed[d] = true;
    }
    let free = (0..grid.num_dofs()).filter(|&d| !is_fixed[d]).collect();
    (free, fixed)
}

/// Sparsity pattern of the reduced stiffness matrix K_ff (values zeroed).
///
/// Two nodes couple iff they share an element, i.e. their grid indices
/// differ by at most one in every direction.
pub fn reduced_stiffness_pattern(
    grid: &Grid,
    dof_to_free_idx: &[Option<usize>],
    n_free: usize,
) -> Result<CsMat<f64>> {
    let mut indptr = Vec::with_capacity(n_free + 1);
    let mut indices = Vec::with_capacity(n_free * 81);
    indptr.push(0);

    let mut column = Vec::with_capacity(81);
    for (dof, free) in dof_to_free_idx.iter().enumerate() {
        if free.is_none() {
            continue;
        }
        let (i, row, k) = grid.node_coords(dof / 3);
        column.clear();
        for nk in k.saturating_sub(1)..=(k + 1).min(grid.nelz) {
            for ni in i.saturating_sub(1)..=(i + 1).min(grid.nelx) {
                for nr in row.saturating_sub(1)..=(row + 1).min(grid.nely) {
                    let n = grid.node_index(ni, nr, nk);
                    for d in 0..3 {
                        if let Some(r) = dof_to_free_idx[3 * n + d] {
                            column.push(r);
                        }
                    }
                }
            }
        }
        column.sort_unstable();
        indices.extend_from_slice(&column);
        indptr.push(indices.len());
    }

    if indptr.len() != n_free + 1 {
        return Err(TopoError::Shape(format!(
            "expected {n_free} free DOFs, found {}",
            indptr.len() - 1
        )));
    }

    let data = vec![0.0; indices.len()];
    CsMat::try_new_csc((n_free, n_free), indptr, indices, data)
        .map_err(|(_, _, _, e)| TopoError::Shape(format!("invalid stiffness pattern: {e}")))
}

/// Centre of element `e` in element-width units, `(x, y, z)` with y
/// measured along the row index.
#[inline]
pub fn element_centre(grid: &Grid, e: usize) -> [f64; 3] {
    let (i, j, k) = grid.element_coords(e);
    [i as f64 + 0.5, j as f64 + 0.5, k as f64 + 0.5]
}

// ─────────────────────────────────────────────────────────────
//  Element vectors  ↔  (nely, nelx, nelz) arrays
// ─────────────────────────────────────────────────────────────

fn check_shape<T>(grid: &Grid, field: &Array3<T>, what: &str) -> Result<()> {
    if field.dim() != grid.shape() {
        return Err(TopoError::Shape(format!(
            "{what} has shape {:?}, expected (nely, nelx, nelz) = {:?}",
            field.dim(),
            grid.shape()
        )));
    }
    Ok(())
}

/// Column-major `(nely, nelx, nelz)` array from an element-ordered vector.
pub fn field_from_elements(grid: &Grid, values: Vec<f64>) -> Result<Array3<f64>> {
    Array3::from_shape_vec(grid.shape().f(), values)
        .map_err(|e| TopoError::Shape(format!("cannot shape element vector: {e}")))
}

/// Element-ordered vector from a `(nely, nelx, nelz)` array.
pub fn elements_from_field(grid: &Grid, field: &Array3<f64>) -> Result<Vec<f64>> {
    check_shape(grid, field, "density field")?;
    Ok((0..grid.num_elements())
        .map(|e| {
            let (i, j, k) = grid.element_coords(e);
            field[[j, i, k]]
        })
        .collect())
}

/// Element-ordered obstacle flags; all `false` without a mask.
pub fn elements_from_mask(grid: &Grid, mask: Option<&Array3<bool>>) -> Result<Vec<bool>> {
    let Some(mask) = mask else {
        return Ok(vec![false; grid.num_elements()]);
    };
    check_shape(grid, mask, "obstacle mask")?;
    Ok((0..grid.num_elements())
        .map(|e| {
            let (i, j, k) = grid.element_coords(e);
            mask[[j, i, k]]
        })
        .collect())
}
