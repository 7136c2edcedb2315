//! Density filter: kernel weights, normalisation and the sensitivity chain rule.

use topo3d::filter::DensityFilter;
use topo3d::types::{Grid, TopoError};

fn grid(nelx: usize, nely: usize, nelz: usize) -> Grid {
    Grid::new(nelx, nely, nelz).unwrap()
}

fn weight(f: &DensityFilter, row: usize, col: usize) -> f64 {
    f.h.get(row, col).copied().unwrap_or(0.0)
}

#[test]
fn uniform_field_is_preserved() {
    let g = grid(5, 4, 3);
    let f = DensityFilter::new(&g, 2.5).unwrap();
    let x = vec![0.37; g.num_elements()];
    for v in f.apply(&x) {
        assert!((v - 0.37).abs() < 1e-14);
    }
}

#[test]
fn kernel_is_symmetric_and_row_sums_match() {
    let g = grid(4, 3, 3);
    let f = DensityFilter::new(&g, 1.8).unwrap();
    let n = g.num_elements();
    for e in 0..n {
        let row_sum: f64 = (0..n).map(|c| weight(&f, e, c)).sum();
        assert!((row_sum - f.hs[e]).abs() < 1e-12);
        for c in 0..n {
            assert_eq!(weight(&f, e, c), weight(&f, c, e), "H[{e},{c}] not symmetric");
        }
    }
}

/// Interior element of a 3×3×3 block with rmin = 1.5: itself (1.5),
/// 6 face neighbours (0.5 each) and 12 edge neighbours (1.5 − √2 each).
#[test]
fn interior_weights_for_radius_one_and_a_half() {
    let g = grid(3, 3, 3);
    let f = DensityFilter::new(&g, 1.5).unwrap();
    let centre = g.element_index(1, 1, 1);
    let expected = 1.5 + 6.0 * 0.5 + 12.0 * (1.5 - 2f64.sqrt());
    assert!((f.hs[centre] - expected).abs() < 1e-12, "Hs = {}", f.hs[centre]);
    assert_eq!(weight(&f, centre, g.element_index(0, 0, 0)), 0.0, "corner is out of reach");
}

#[test]
fn small_radius_is_identity() {
    let g = grid(3, 2, 2);
    let f = DensityFilter::new(&g, 1.0).unwrap();
    let x: Vec<f64> = (0..g.num_elements()).map(|e| e as f64 / 12.0).collect();
    assert_eq!(f.h.nnz(), g.num_elements());
    for (a, b) in f.apply(&x).iter().zip(&x) {
        assert!((a - b).abs() < 1e-15);
    }
}

/// yᵀ apply(x) = apply_to_sensitivity(y)ᵀ x for any x, y.
#[test]
fn sensitivity_filter_is_the_adjoint() {
    let g = grid(4, 3, 2);
    let f = DensityFilter::new(&g, 2.2).unwrap();
    let n = g.num_elements();
    let x: Vec<f64> = (0..n).map(|e| ((e * 7 % 5) as f64) / 4.0).collect();
    let y: Vec<f64> = (0..n).map(|e| -(((e * 3 % 7) as f64) + 1.0)).collect();

    let lhs: f64 = y.iter().zip(f.apply(&x)).map(|(a, b)| a * b).sum();
    let rhs: f64 = f.apply_to_sensitivity(&y).iter().zip(&x).map(|(a, b)| a * b).sum();
    assert!((lhs - rhs).abs() < 1e-10 * lhs.abs().max(1.0), "{lhs} vs {rhs}");
}

#[test]
fn rejects_non_positive_radius() {
    let g = grid(2, 2, 2);
    assert!(matches!(DensityFilter::new(&g, 0.0), Err(TopoError::InvalidParameter(_))));
    assert!(matches!(DensityFilter::new(&g, -1.0), Err(TopoError::InvalidParameter(_))));
}
