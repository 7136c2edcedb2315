use ndarray::Array3;
use serde::{Deserialize, Serialize};
use sprs::{CsMat, FillInReduction, SymmetryCheck};
use sprs_ldl::{Ldl, LdlNumeric};
use thiserror::Error;

use crate::mesh;
use crate::stiffness::{element_stiffness, ElementMatrix, KE_DOFS};

// ─────────────────────────────────────────────────────────────
//  Error type
// ─────────────────────────────────────────────────────────────

/// Unified error type for all fallible operations in the crate.
///
/// Every function in the public API returns `Result<T, TopoError>`
/// instead of panicking on bad input.
#[derive(Debug, Error)]
pub enum TopoError {
    /// Linear algebra failure (singular / not-SPD stiffness matrix).
    #[error("linear algebra error: {0}")]
    Linalg(#[from] sprs::errors::LinalgError),

    /// The factorization has not been computed yet.
    #[error("factorization not computed (assemble and solve first)")]
    MissingFactorization,

    /// Iterative solver did not reach its tolerance.
    #[error("solver error: {0}")]
    Solver(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Shape mismatch in input data.
    #[error("shape error: {0}")]
    Shape(String),

    #[error("obstacle config error: {0}")]
    ObstacleConfig(String),

    /// No voxel lies above the export contour level.
    #[error("no surface above the contour level, nothing to export")]
    EmptyMesh,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TopoError>;

// ─────────────────────────────────────────────────────────────
//  Constants
// ─────────────────────────────────────────────────────────────

/// Free-DOF count up to which `SolverKind::Auto` picks the direct solver.
pub const DIRECT_SOLVER_DOF_LIMIT: usize = 30_000;

pub const DEFAULT_CG_TOLERANCE: f64 = 1e-8;
pub const DEFAULT_CG_MAX_ITERATIONS: usize = 10_000;

pub const DEFAULT_MOVE_LIMIT: f64 = 0.2;

/// Marks a (a, b) pair of an element block that touches a fixed DOF.
pub const NOT_FREE: u32 = u32::MAX;

// ─────────────────────────────────────────────────────────────
//  Material
// ─────────────────────────────────────────────────────────────

/// Isotropic SIMP material: `E(x) = emin + x^p (e0 − emin)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub e0: f64,
    pub emin: f64,
    pub nu: f64,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            e0: 1.0,
            emin: 1e-9,
            nu: 0.3,
        }
    }
}

impl Material {
    /// Interpolated Young's modulus of an element with density `x`.
    #[inline]
    pub fn modulus(&self, x: f64, penal: f64) -> f64 {
        self.emin + x.powf(penal) * (self.e0 - self.emin)
    }
}

// ─────────────────────────────────────────────────────────────
//  Design grid
// ─────────────────────────────────────────────────────────────

/// Regular grid of unit hexahedral elements.
///
/// Elements are numbered column-major over a `(nely, nelx, nelz)` array:
/// `e = j + i·nely + k·nely·nelx`.  Nodes follow the same pattern over
/// `(nely+1, nelx+1, nelz+1)`, with node row 0 on the top face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid {
    pub nelx: usize,
    pub nely: usize,
    pub nelz: usize,
}

impl Grid {
    pub fn new(nelx: usize, nely: usize, nelz: usize) -> Result<Self> {
        if nelx == 0 || nely == 0 || nelz == 0 {
            return Err(TopoError::InvalidParameter(format!(
                "grid dimensions must be positive, got {nelx}x{nely}x{nelz}"
            )));
        }
        Ok(Self { nelx, nely, nelz })
    }

    pub fn num_elements(&self) -> usize {
        self.nelx * self.nely * self.nelz
    }

    pub fn num_nodes(&self) -> usize {
        (self.nelx + 1) * (self.nely + 1) * (self.nelz + 1)
    }

    pub fn num_dofs(&self) -> usize {
        3 * self.num_nodes()
    }

    /// Shape of a density / mask array: `(nely, nelx, nelz)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.nely, self.nelx, self.nelz)
    }

    #[inline]
    pub fn element_index(&self, i: usize, j: usize, k: usize) -> usize {
        j + i * self.nely + k * self.nely * self.nelx
    }

    /// Inverse of `element_index`: returns `(i, j, k)`.
    #[inline]
    pub fn element_coords(&self, e: usize) -> (usize, usize, usize) {
        let j = e % self.nely;
        let i = (e / self.nely) % self.nelx;
        let k = e / (self.nely * self.nelx);
        (i, j, k)
    }

    #[inline]
    pub fn node_index(&self, i: usize, row: usize, k: usize) -> usize {
        row + i * (self.nely + 1) + k * (self.nely + 1) * (self.nelx + 1)
    }

    /// Inverse of `node_index`: returns `(i, row, k)`.
    #[inline]
    pub fn node_coords(&self, n: usize) -> (usize, usize, usize) {
        let row = n % (self.nely + 1);
        let i = (n / (self.nely + 1)) % (self.nelx + 1);
        let k = n / ((self.nely + 1) * (self.nelx + 1));
        (i, row, k)
    }
}

// ─────────────────────────────────────────────────────────────
//  Solver / optimiser options
// ─────────────────────────────────────────────────────────────

/// Linear solver for the reduced system K_ff u_f = f_f.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SolverKind {
    /// Direct for small systems, conjugate gradient otherwise.
    Auto,
    /// Sparse LDLᵀ with reverse Cuthill–McKee ordering.
    Direct,
    /// Jacobi-preconditioned conjugate gradient.
    ConjugateGradient { tolerance: f64, max_iterations: usize },
}

impl Default for SolverKind {
    fn default() -> Self {
        Self::Auto
    }
}

impl SolverKind {
    pub fn default_cg() -> Self {
        Self::ConjugateGradient {
            tolerance: DEFAULT_CG_TOLERANCE,
            max_iterations: DEFAULT_CG_MAX_ITERATIONS,
        }
    }

    /// Resolve `Auto` into a concrete solver for a system of `n_free` DOFs.
    pub fn resolve(self, n_free: usize) -> LinearSolver {
        match self {
            Self::Auto if n_free <= DIRECT_SOLVER_DOF_LIMIT => LinearSolver::Direct,
            Self::Auto => LinearSolver::ConjugateGradient {
                tolerance: DEFAULT_CG_TOLERANCE,
                max_iterations: DEFAULT_CG_MAX_ITERATIONS,
            },
            Self::Direct => LinearSolver::Direct,
            Self::ConjugateGradient { tolerance, max_iterations } => {
                LinearSolver::ConjugateGradient { tolerance, max_iterations }
            }
        }
    }
}

/// A concrete linear solver, as chosen by [`SolverKind::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinearSolver {
    Direct,
    ConjugateGradient { tolerance: f64, max_iterations: usize },
}

impl LinearSolver {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Direct => "sparse LDLt (sprs-ldl)",
            Self::ConjugateGradient { .. } => "Jacobi-preconditioned CG",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerSettings {
    /// Target volume fraction of the design domain (obstacles excluded).
    pub volfrac: f64,
    /// SIMP penalization exponent.
    pub penal: f64,
    /// Density filter radius in element widths.
    pub rmin: f64,
    /// Stop once the largest design change drops to this value.
    pub tolx: f64,
    pub maxloop: usize,
    pub move_limit: f64,
    pub solver: SolverKind,
    pub material: Material,
    pub save_history: bool,
    pub history_frequency: usize,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            volfrac: 0.3,
            penal: 3.0,
            rmin: 3.0,
            tolx: 0.01,
            maxloop: 2000,
            move_limit: DEFAULT_MOVE_LIMIT,
            solver: SolverKind::Auto,
            material: Material::default(),
            save_history: false,
            history_frequency: 10,
        }
    }
}

impl OptimizerSettings {
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: String| Err(TopoError::InvalidParameter(msg));
        if !(self.volfrac > 0.0 && self.volfrac <= 1.0) {
            return bad(format!("volfrac must be in (0, 1], got {}", self.volfrac));
        }
        if !(self.penal >= 1.0) {
            return bad(format!("penal must be >= 1, got {}", self.penal));
        }
        if !(self.rmin > 0.0) {
            return bad(format!("rmin must be positive, got {}", self.rmin));
        }
        // The design change starts at 1, so tolx >= 1 would skip every iteration.
        if !(self.tolx > 0.0 && self.tolx < 1.0) {
            return bad(format!("tolx must be in (0, 1), got {}", self.tolx));
        }
        if self.maxloop == 0 {
            return bad("maxloop must be at least 1".into());
        }
        if !(self.move_limit > 0.0 && self.move_limit <= 1.0) {
            return bad(format!("move limit must be in (0, 1], got {}", self.move_limit));
        }
        if self.history_frequency == 0 {
            return bad("history frequency must be at least 1".into());
        }
        if !(self.material.emin > 0.0 && self.material.emin < self.material.e0) {
            return bad(format!(
                "material moduli must satisfy 0 < emin < e0, got emin={} e0={}",
                self.material.emin, self.material.e0
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────
//  Sparsity mapping  element block  →  K.data[] indices
// ─────────────────────────────────────────────────────────────

/// Pre-computed scatter of each element's 24×24 block into the CSC data
/// array of K_ff.  Flat layout: `entries[e * 576 + a * 24 + b]`, with
/// [`NOT_FREE`] where DOF `a` or `b` is fixed.
#[derive(Debug, Clone)]
pub struct KeToNz {
    pub entries: Vec<u32>,
}

impl KeToNz {
    #[inline]
    pub fn element(&self, e: usize) -> &[u32] {
        let block = KE_DOFS * KE_DOFS;
        &self.entries[e * block..(e + 1) * block]
    }
}

// ─────────────────────────────────────────────────────────────
//  Factorisation
// ─────────────────────────────────────────────────────────────

/// Numeric LDLᵀ factorization of the SPD stiffness matrix.
///
/// Uses reverse Cuthill–McKee fill-in reduction and validates D > 0 on
/// every factor / re-factor.
pub struct Factorization(LdlNumeric<f64, usize>);

impl std::fmt::Debug for Factorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Factorization(...)")
    }
}

impl Factorization {
    pub fn new(a: sprs::CsMatView<f64>) -> std::result::Result<Self, sprs::errors::LinalgError> {
        let ldl = Ldl::new()
            .fill_in_reduction(FillInReduction::ReverseCuthillMcKee)
            .check_symmetry(SymmetryCheck::DontCheckSymmetry)
            .numeric(a)?;
        check_positive_pivots(ldl.d(), "D <= 0 in stiffness factorization (not SPD)")?;
        Ok(Self(ldl))
    }

    /// Re-factor with updated numeric values (same sparsity pattern).
    pub fn update(&mut self, a: sprs::CsMatView<f64>) -> std::result::Result<(), sprs::errors::LinalgError> {
        self.0.update(a)?;
        check_positive_pivots(self.0.d(), "D <= 0 in stiffness re-factor (not SPD)")
    }

    pub fn solve(&self, rhs: &[f64]) -> Vec<f64> {
        self.0.solve(rhs)
    }
}

fn check_positive_pivots(d: &[f64], reason: &'static str) -> std::result::Result<(), sprs::errors::LinalgError> {
    for (i, &di) in d.iter().enumerate() {
        if di <= 0.0 {
            return Err(sprs::errors::LinalgError::SingularMatrix(
                sprs::errors::SingularMatrixInfo { index: i, reason },
            ));
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────
//  Pre-allocated finite-element cache
// ─────────────────────────────────────────────────────────────

/// All mutable workspace for assembly, solve and compliance evaluation.
/// Built once from a [`Grid`], reused across iterations.
#[derive(Debug)]
pub struct FeCache {
    pub grid: Grid,
    pub material: Material,

    // ── Element data ───────────────────────────────────────
    /// Unit-modulus hexahedron stiffness (24 × 24).
    pub ke: ElementMatrix,
    /// Global DOFs of every element, in `ke`'s local order.
    pub edofs: Vec<[usize; KE_DOFS]>,

    // ── Sparse system ──────────────────────────────────────
    /// Reduced stiffness K_ff (CSC, n_free × n_free).  The pattern is
    /// fixed; values are refilled in-place each iteration.
    pub k_matrix: CsMat<f64>,
    /// Created on the first direct solve, reused via `.update()`.
    pub factorization: Option<Factorization>,
    pub ke_to_nz: KeToNz,

    // ── Boundary conditions ────────────────────────────────
    pub free_dofs: Vec<usize>,
    pub fixed_dofs: Vec<usize>,
    /// Global DOF → free index  (`None` if fixed)
    pub dof_to_free_idx: Vec<Option<usize>>,
    /// Full load vector (ndof)
    pub force: Vec<f64>,
    /// Loads restricted to free DOFs
    pub force_free: Vec<f64>,

    // ── Solution buffers ───────────────────────────────────
    /// Full displacement vector (ndof), zero on fixed DOFs
    pub u: Vec<f64>,
    /// Free-DOF displacements (warm start for CG)
    pub u_free: Vec<f64>,
    /// Element compliance  u_eᵀ KE u_e
    pub ce: Vec<f64>,
}

impl FeCache {
    /// Build a fully pre-allocated cache for the cantilever on `grid`.
    pub fn new(grid: Grid, material: Material) -> Result<Self> {
        let ke = element_stiffness(material.nu)?;
        let edofs = mesh::element_dofs(&grid);
        let force = mesh::force_vector(&grid);
        let (free_dofs, fixed_dofs) = mesh::supports(&grid);

        // ── 1. DOF → free index ───────────────────────────
        let mut dof_to_free_idx = vec![None; grid.num_dofs()];
        for (i, &dof) in free_dofs.iter().enumerate() {
            dof_to_free_idx[dof] = Some(i);
        }

        // ── 2. K_ff sparsity pattern from node adjacency ──
        let k_matrix = mesh::reduced_stiffness_pattern(&grid, &dof_to_free_idx, free_dofs.len())?;

        // ── 3. Element block → nz mapping ─────────────────
        let block = KE_DOFS * KE_DOFS;
        let mut entries = vec![NOT_FREE; edofs.len() * block];
        let indptr = k_matrix.indptr();
        let indptr = indptr.raw_storage();
        let indices = k_matrix.indices();
        for (e, dofs) in edofs.iter().enumerate() {
            for (a, &dof_a) in dofs.iter().enumerate() {
                let Some(row) = dof_to_free_idx[dof_a] else { continue };
                for (b, &dof_b) in dofs.iter().enumerate() {
                    let Some(col) = dof_to_free_idx[dof_b] else { continue };
                    let nz = find_nz_index(indptr, indices, row, col).ok_or_else(|| {
                        TopoError::Shape(format!(
                            "sparsity pattern mismatch: element {e}, ({row},{col}) not in K"
                        ))
                    })?;
                    entries[e * block + a * KE_DOFS + b] = nz as u32;
                }
            }
        }

        let force_free: Vec<f64> = free_dofs.iter().map(|&d| force[d]).collect();
        let n_free = free_dofs.len();

        Ok(FeCache {
            grid,
            material,
            ke,
            k_matrix,
            factorization: None,
            ke_to_nz: KeToNz { entries },
            free_dofs,
            fixed_dofs,
            dof_to_free_idx,
            force,
            force_free,
            u: vec![0.0; grid.num_dofs()],
            u_free: vec![0.0; n_free],
            ce: vec![0.0; grid.num_elements()],
            edofs,
        })
    }

    pub fn num_free(&self) -> usize {
        self.free_dofs.len()
    }
}

// ─────────────────────────────────────────────────────────────
//  Optimisation result
// ─────────────────────────────────────────────────────────────

/// Per-iteration record of the optimisation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: usize,
    pub objective: f64,
    /// Change of the objective relative to the previous iteration
    /// (infinite on the first).
    pub objective_delta: f64,
    pub volume_fraction: f64,
    pub change: f64,
    pub seconds: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DensityHistory {
    pub iterations: Vec<usize>,
    pub densities: Vec<Array3<f64>>,
}

#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Physical (filtered) densities, shape `(nely, nelx, nelz)`.
    pub density: Array3<f64>,
    pub trace: Vec<IterationRecord>,
    pub iterations: usize,
    pub converged: bool,
    pub final_objective: f64,
    pub final_volume_fraction: f64,
    /// Solver actually used (`Auto` resolved).
    pub solver: LinearSolver,
    pub history: Option<DensityHistory>,
}

// ─────────────────────────────────────────────────────────────
//  Helper: find nz index in CSC
// ─────────────────────────────────────────────────────────────

/// Given CSC indptr and (sorted) indices arrays, find the position of
/// element (row, col) in the data array.  Returns `None` if the entry is
/// not in the sparsity pattern.
pub fn find_nz_index(indptr: &[usize], indices: &[usize], row: usize, col: usize) -> Option<usize> {
    let start = indptr[col];
    let end_ = indptr[col + 1];
    indices[start..end_].binary_search(&row).ok().map(|off| start + off)
}
