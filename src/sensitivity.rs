//! Compliance and its sensitivities with respect to the physical densities.
//!
//! For c = fᵀu = Σ_e E(x_e) u_eᵀ KE u_e the self-adjoint structure gives
//!   ∂c/∂x_e = −p (E0 − Emin) x_e^(p−1) u_eᵀ KE u_e
//! so no separate adjoint solve is needed.

use crate::stiffness::{element_energy, ElementMatrix, KE_DOFS};
use crate::types::{FeCache, Material};
use rayon::prelude::*;

/// Element compliance  ce_e = u_eᵀ KE u_e  (unit modulus), in parallel.
pub fn element_compliance(u: &[f64], edofs: &[[usize; KE_DOFS]], ke: &ElementMatrix) -> Vec<f64> {
    edofs
        .par_iter()
        .map(|dofs| {
            let mut ue = [0.0; KE_DOFS];
            for (slot, &dof) in ue.iter_mut().zip(dofs.iter()) {
                *slot = u[dof];
            }
            element_energy(ke, &ue)
        })
        .collect()
}

/// Refresh `cache.ce` from the current displacements.
pub fn update_element_compliance(cache: &mut FeCache) {
    cache.ce = element_compliance(&cache.u, &cache.edofs, &cache.ke);
}

/// Total compliance  Σ_e E(x_e) ce_e.
pub fn compliance(x_phys: &[f64], ce: &[f64], penal: f64, material: &Material) -> f64 {
    x_phys
        .iter()
        .zip(ce)
        .map(|(&x, &c)| material.modulus(x, penal) * c)
        .sum()
}

/// ∂c/∂x̃_e  (unfiltered, with respect to the physical densities).
pub fn compliance_sensitivity(x_phys: &[f64], ce: &[f64], penal: f64, material: &Material) -> Vec<f64> {
    let scale = -penal * (material.e0 - material.emin);
    x_phys
        .iter()
        .zip(ce)
        .map(|(&x, &c)| scale * x.powf(penal - 1.0) * c)
        .collect()
}

/// ∂V/∂x̃_e: every element contributes its unit volume.
pub fn volume_sensitivity(nele: usize) -> Vec<f64> {
    vec![1.0; nele]
}
