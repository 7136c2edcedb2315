//! Element stiffness checks: symmetry, rigid-body null space and closed-form
//! entries of the unit-cube hexahedron.

use topo3d::stiffness::*;
use topo3d::types::TopoError;

// ─────────────────────────────────────────────────────────────
//  Helpers
// ─────────────────────────────────────────────────────────────

/// Nodal displacements of the linear field `u(p) = f(p)` at the 8 corners.
fn nodal_field(f: impl Fn([f64; 3]) -> [f64; 3]) -> [f64; KE_DOFS] {
    let mut u = [0.0; KE_DOFS];
    for (a, node) in LOCAL_NODES.iter().enumerate() {
        let p = [node[0] as f64, node[1] as f64, node[2] as f64];
        let v = f(p);
        u[3 * a..3 * a + 3].copy_from_slice(&v);
    }
    u
}

fn ke_times(ke: &ElementMatrix, u: &[f64; KE_DOFS]) -> [f64; KE_DOFS] {
    let mut out = [0.0; KE_DOFS];
    for r in 0..KE_DOFS {
        out[r] = (0..KE_DOFS).map(|c| ke[r][c] * u[c]).sum();
    }
    out
}

// ─────────────────────────────────────────────────────────────
//  Tests
// ─────────────────────────────────────────────────────────────

#[test]
fn ke_is_symmetric() {
    let ke = element_stiffness(0.3).unwrap();
    for r in 0..KE_DOFS {
        for c in 0..KE_DOFS {
            assert!(
                (ke[r][c] - ke[c][r]).abs() < 1e-12,
                "KE[{r}][{c}] = {} but KE[{c}][{r}] = {}",
                ke[r][c],
                ke[c][r]
            );
        }
    }
}

/// Three translations and three infinitesimal rotations produce no forces.
#[test]
fn rigid_body_modes_are_in_null_space() {
    let ke = element_stiffness(0.3).unwrap();
    let modes: Vec<(&str, [f64; KE_DOFS])> = vec![
        ("tx", nodal_field(|_| [1.0, 0.0, 0.0])),
        ("ty", nodal_field(|_| [0.0, 1.0, 0.0])),
        ("tz", nodal_field(|_| [0.0, 0.0, 1.0])),
        ("rx", nodal_field(|p| [0.0, -p[2], p[1]])),
        ("ry", nodal_field(|p| [p[2], 0.0, -p[0]])),
        ("rz", nodal_field(|p| [-p[1], p[0], 0.0])),
    ];
    for (name, u) in &modes {
        let f = ke_times(&ke, u);
        let max = f.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        assert!(max < 1e-12, "mode {name}: |KE u|_max = {max:.3e}");
        assert!(element_energy(&ke, u).abs() < 1e-12);
    }
}

/// KE_aa = (2 − 3ν) / (9 (1 + ν)(1 − 2ν)) for every DOF of the unit cube.
#[test]
fn diagonal_matches_closed_form() {
    for &nu in &[0.0, 0.25, 0.3, 0.45] {
        let ke = element_stiffness(nu).unwrap();
        let expected = (2.0 - 3.0 * nu) / (9.0 * (1.0 + nu) * (1.0 - 2.0 * nu));
        for a in 0..KE_DOFS {
            assert!(ke[a][a] > 0.0);
            assert!(
                (ke[a][a] - expected).abs() < 1e-12,
                "nu={nu}: KE[{a}][{a}] = {}, expected {expected}",
                ke[a][a]
            );
        }
    }
}

/// Uniaxial strain ε_xx = 1 stores energy D_11 over the unit volume.
#[test]
fn uniaxial_strain_energy() {
    let nu = 0.3;
    let ke = element_stiffness(nu).unwrap();
    let u = nodal_field(|p| [p[0], 0.0, 0.0]);
    let d11 = (1.0 - nu) / ((1.0 + nu) * (1.0 - 2.0 * nu));
    let energy = element_energy(&ke, &u);
    assert!((energy - d11).abs() < 1e-12, "energy = {energy}, D11 = {d11}");

    let d = constitutive_matrix(nu);
    assert!((d[0][0] - d11).abs() < 1e-15);
}

#[test]
fn rejects_invalid_poisson_ratio() {
    for &nu in &[0.5, 0.7, -1.0, f64::NAN] {
        assert!(
            matches!(element_stiffness(nu), Err(TopoError::InvalidParameter(_))),
            "nu = {nu} should be rejected"
        );
    }
}
