//! Linear density filter  x̃ = (H x) / Hs  with a cone-shaped kernel.

use crate::mesh::element_centre;
use crate::types::{Grid, Result, TopoError};
use sprs::{CsMat, TriMat};

#[derive(Debug, Clone)]
pub struct DensityFilter {
    /// `H[e, f] = max(0, rmin − ‖c_e − c_f‖)`  (CSR, nele × nele, symmetric)
    pub h: CsMat<f64>,
    /// Row sums of H.
    pub hs: Vec<f64>,
    pub rmin: f64,
}

impl DensityFilter {
    /// Build H and Hs for filter radius `rmin` (in element widths).
    pub fn new(grid: &Grid, rmin: f64) -> Result<Self> {
        if !(rmin > 0.0) {
            return Err(TopoError::InvalidParameter(format!(
                "filter radius must be positive, got {rmin}"
            )));
        }
        let nele = grid.num_elements();
        let reach = (rmin.ceil() as usize).saturating_sub(1);
        let span = 2 * reach + 1;
        let mut tri = TriMat::with_capacity((nele, nele), nele * span * span * span);

        for e in 0..nele {
            let (i1, j1, k1) = grid.element_coords(e);
            let ce = element_centre(grid, e);
            for k2 in k1.saturating_sub(reach)..=(k1 + reach).min(grid.nelz - 1) {
                for i2 in i1.saturating_sub(reach)..=(i1 + reach).min(grid.nelx - 1) {
                    for j2 in j1.saturating_sub(reach)..=(j1 + reach).min(grid.nely - 1) {
                        let f = grid.element_index(i2, j2, k2);
                        let cf = element_centre(grid, f);
                        let dist = ((ce[0] - cf[0]).powi(2)
                            + (ce[1] - cf[1]).powi(2)
                            + (ce[2] - cf[2]).powi(2))
                        .sqrt();
                        let w = rmin - dist;
                        if w > 0.0 {
                            tri.add_triplet(e, f, w);
                        }
                    }
                }
            }
        }

        let h: CsMat<f64> = tri.to_csr();
        let hs = h
            .outer_iterator()
            .map(|row| row.iter().map(|(_, &v)| v).sum::<f64>())
            .collect();
        Ok(Self { h, hs, rmin })
    }

    /// Physical densities  (H x) / Hs.
    pub fn apply(&self, x: &[f64]) -> Vec<f64> {
        let mut out = self.h_times(x);
        for (o, &s) in out.iter_mut().zip(&self.hs) {
            *o /= s;
        }
        out
    }

    /// Chain rule of [`apply`](Self::apply):  H (d / Hs).
    pub fn apply_to_sensitivity(&self, d: &[f64]) -> Vec<f64> {
        let scaled: Vec<f64> = d.iter().zip(&self.hs).map(|(&v, &s)| v / s).collect();
        self.h_times(&scaled)
    }

    fn h_times(&self, x: &[f64]) -> Vec<f64> {
        self.h
            .outer_iterator()
            .map(|row| row.iter().map(|(col, &v)| v * x[col]).sum::<f64>())
            .collect()
    }
}
