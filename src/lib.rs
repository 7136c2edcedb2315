//! **topo3d**: 3D SIMP topology optimisation of a cantilever beam.
//!
//! The pipeline, bottom-up:
//!
//! 1. **Element** (`stiffness`): 24×24 hexahedron stiffness by Gauss quadrature.
//! 2. **Mesh** (`mesh`): DOF numbering, loads, supports, K_ff sparsity pattern.
//! 3. **Forward solve** (`fem`): in-place assembly, sparse LDLᵀ or PCG.
//! 4. **Sensitivities** (`sensitivity`, `filter`): compliance, dc, density filter.
//! 5. **Update** (`oc`, `optimizer`): optimality criteria inside the SIMP loop.
//! 6. **I/O** (`obstacles`, `results`, `export`, `experiment`, `cli`).

pub mod types;
pub mod stiffness;
pub mod mesh;
pub mod filter;
pub mod fem;
pub mod sensitivity;
pub mod oc;
pub mod benchmark;
pub mod optimizer;
pub mod obstacles;
pub mod export;
pub mod results;
pub mod experiment;
pub mod cli;
