//! Element stiffness of the 8-node trilinear hexahedron.
//!
//! The unit cube is integrated with 2×2×2 Gauss quadrature, which is exact
//! for the trilinear shape functions on an undistorted element.

use crate::types::{Result, TopoError};

/// Nodes per element.
pub const KE_NODES: usize = 8;
/// Degrees of freedom per element (3 per node).
pub const KE_DOFS: usize = 3 * KE_NODES;

pub type ElementMatrix = [[f64; KE_DOFS]; KE_DOFS];

/// Local node offsets in physical (x, y, z): bottom face counter-clockwise,
/// then top face.
pub const LOCAL_NODES: [[usize; 3]; KE_NODES] = [
    [0, 0, 0],
    [1, 0, 0],
    [1, 1, 0],
    [0, 1, 0],
    [0, 0, 1],
    [1, 0, 1],
    [1, 1, 1],
    [0, 1, 1],
];

/// Isotropic constitutive matrix for unit Young's modulus, Voigt order
/// (xx, yy, zz, xy, yz, zx) with engineering shear strains.
pub fn constitutive_matrix(nu: f64) -> [[f64; 6]; 6] {
    let c = 1.0 / ((1.0 + nu) * (1.0 - 2.0 * nu));
    let mut d = [[0.0; 6]; 6];
    for i in 0..3 {
        for j in 0..3 {
            d[i][j] = if i == j { c * (1.0 - nu) } else { c * nu };
        }
        d[i + 3][i + 3] = c * (1.0 - 2.0 * nu) / 2.0;
    }
    d
}

/// 1D linear shape function and its derivative for a node at `offset`.
#[inline]
fn shape_1d(offset: usize, t: f64) -> (f64, f64) {
    if offset == 1 {
        (t, 1.0)
    } else {
        (1.0 - t, -1.0)
    }
}

/// Shape function gradients ∂N_a/∂(x, y, z) at a point of the unit cube.
fn shape_gradients(p: [f64; 3]) -> [[f64; 3]; KE_NODES] {
    let mut grads = [[0.0; 3]; KE_NODES];
    for (a, node) in LOCAL_NODES.iter().enumerate() {
        let (nx, dx) = shape_1d(node[0], p[0]);
        let (ny, dy) = shape_1d(node[1], p[1]);
        let (nz, dz) = shape_1d(node[2], p[2]);
        grads[a] = [dx * ny * nz, nx * dy * nz, nx * ny * dz];
    }
    grads
}

/// Strain-displacement matrix B (6 × 24) from shape gradients.
fn strain_displacement(grads: &[[f64; 3]; KE_NODES]) -> [[f64; KE_DOFS]; 6] {
    let mut b = [[0.0; KE_DOFS]; 6];
    for (a, g) in grads.iter().enumerate() {
        let c = 3 * a;
        b[0][c] = g[0];
        b[1][c + 1] = g[1];
        b[2][c + 2] = g[2];
        b[3][c] = g[1];
        b[3][c + 1] = g[0];
        b[4][c + 1] = g[2];
        b[4][c + 2] = g[1];
        b[5][c] = g[2];
        b[5][c + 2] = g[0];
    }
    b
}

/// Stiffness matrix of a unit-cube hexahedron with E = 1 and Poisson
/// ratio `nu`, in the DOF order `[ux_0, uy_0, uz_0, ux_1, …]` over
/// [`LOCAL_NODES`].
pub fn element_stiffness(nu: f64) -> Result<ElementMatrix> {
    if !(nu > -1.0 && nu < 0.5) {
        return Err(TopoError::InvalidParameter(format!(
            "Poisson ratio must lie in (-1, 0.5), got {nu}"
        )));
    }
    let d = constitutive_matrix(nu);
    let g = 0.5 / 3f64.sqrt();
    let points = [0.5 - g, 0.5 + g];
    // Each of the 8 points carries weight 1/8 of the unit volume.
    let weight = 0.125;

    let mut ke = [[0.0; KE_DOFS]; KE_DOFS];
    for &px in &points {
        for &py in &points {
            for &pz in &points {
                let b = strain_displacement(&shape_gradients([px, py, pz]));

                // db = D · B  (6 × 24)
                let mut db = [[0.0; KE_DOFS]; 6];
                for i in 0..6 {
                    for k in 0..6 {
                        if d[i][k] == 0.0 {
                            continue;
                        }
                        for c in 0..KE_DOFS {
                            db[i][c] += d[i][k] * b[k][c];
                        }
                    }
                }

                // ke += w · Bᵀ · (D B)
                for r in 0..KE_DOFS {
                    for i in 0..6 {
                        let bir = b[i][r];
                        if bir == 0.0 {
                            continue;
                        }
                        for c in 0..KE_DOFS {
                            ke[r][c] += weight * bir * db[i][c];
                        }
                    }
                }
            }
        }
    }
    Ok(ke)
}

/// uᵀ KE u for one element's 24 local displacements.
#[inline]
pub fn element_energy(ke: &ElementMatrix, ue: &[f64; KE_DOFS]) -> f64 {
    let mut energy = 0.0;
    for r in 0..KE_DOFS {
        let mut row = 0.0;
        for c in 0..KE_DOFS {
            row += ke[r][c] * ue[c];
        }
        energy += ue[r] * row;
    }
    energy
}
