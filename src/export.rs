//! Surface extraction from the density field and binary STL output.
//!
//! The surface is the boundary of all voxels whose density exceeds the
//! contour level.  Vertices are shared between faces, so the mesh is closed
//! and stays closed under Laplacian smoothing.

use crate::types::{Result, TopoError};
use ndarray::Array3;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

/// Laplacian smoothing step size.
pub const SMOOTHING_LAMBDA: f64 = 0.5;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriangleMesh {
    pub vertices: Vec<[f64; 3]>,
    /// Counter-clockwise seen from outside.
    pub triangles: Vec<[usize; 3]>,
}

impl TriangleMesh {
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }
}

/// One cube face: outward neighbour offset and its four corners
/// (offsets from the voxel's lower corner), counter-clockwise from outside.
struct Face {
    neighbour: [isize; 3],
    corners: [[usize; 3]; 4],
}

const FACES: [Face; 6] = [
    Face { neighbour: [1, 0, 0], corners: [[1, 0, 0], [1, 1, 0], [1, 1, 1], [1, 0, 1]] },
    Face { neighbour: [-1, 0, 0], corners: [[0, 0, 0], [0, 0, 1], [0, 1, 1], [0, 1, 0]] },
    Face { neighbour: [0, 1, 0], corners: [[0, 1, 0], [0, 1, 1], [1, 1, 1], [1, 1, 0]] },
    Face { neighbour: [0, -1, 0], corners: [[0, 0, 0], [1, 0, 0], [1, 0, 1], [0, 0, 1]] },
    Face { neighbour: [0, 0, 1], corners: [[0, 0, 1], [1, 0, 1], [1, 1, 1], [0, 1, 1]] },
    Face { neighbour: [0, 0, -1], corners: [[0, 0, 0], [0, 1, 0], [1, 1, 0], [1, 0, 0]] },
];

/// Voxel occupancy in physical (x, y, z) with y pointing up; row 0 of the
/// density array is the top layer.
struct Occupancy<'a> {
    density: &'a Array3<f64>,
    level: f64,
    dims: [usize; 3],
}

impl Occupancy<'_> {
    fn solid(&self, p: [isize; 3]) -> bool {
        if (0..3).any(|d| p[d] < 0 || p[d] as usize >= self.dims[d]) {
            return false;
        }
        let (x, y, z) = (p[0] as usize, p[1] as usize, p[2] as usize);
        let row = self.dims[1] - 1 - y;
        self.density[[row, x, z]] > self.level
    }
}

/// Closed boundary surface of all voxels with density above `level`.
pub fn voxel_to_mesh(density: &Array3<f64>, level: f64) -> TriangleMesh {
    let (nely, nelx, nelz) = density.dim();
    let occ = Occupancy {
        density,
        level,
        dims: [nelx, nely, nelz],
    };

    let mut mesh = TriangleMesh::default();
    let mut vertex_ids: HashMap<[usize; 3], usize> = HashMap::new();

    for z in 0..nelz {
        for y in 0..nely {
            for x in 0..nelx {
                let here = [x as isize, y as isize, z as isize];
                if !occ.solid(here) {
                    continue;
                }
                for face in &FACES {
                    let nb = [
                        here[0] + face.neighbour[0],
                        here[1] + face.neighbour[1],
                        here[2] + face.neighbour[2],
                    ];
                    if occ.solid(nb) {
                        continue;
                    }
                    let ids = face.corners.map(|c| {
                        let key = [x + c[0], y + c[1], z + c[2]];
                        *vertex_ids.entry(key).or_insert_with(|| {
                            mesh.vertices.push([key[0] as f64, key[1] as f64, key[2] as f64]);
                            mesh.vertices.len() - 1
                        })
                    });
                    mesh.triangles.push([ids[0], ids[1], ids[2]]);
                    mesh.triangles.push([ids[0], ids[2], ids[3]]);
                }
            }
        }
    }
    debug!(
        "Extracted surface with {} vertices and {} triangles",
        mesh.vertices.len(),
        mesh.triangles.len()
    );
    mesh
}

/// Laplacian smoothing: each vertex moves `λ` of the way to the mean of
/// its edge neighbours, `iterations` times.
pub fn smooth_mesh(mesh: &mut TriangleMesh, iterations: usize) {
    if iterations == 0 || mesh.is_empty() {
        return;
    }
    let mut neighbours: Vec<Vec<usize>> = vec![Vec::new(); mesh.vertices.len()];
    for tri in &mesh.triangles {
        for (a, b) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
            neighbours[a].push(b);
            neighbours[b].push(a);
        }
    }
    for list in &mut neighbours {
        list.sort_unstable();
        list.dedup();
    }

    let mut next = mesh.vertices.clone();
    for _ in 0..iterations {
        for (v, list) in neighbours.iter().enumerate() {
            if list.is_empty() {
                continue;
            }
            let mut mean = [0.0; 3];
            for &n in list {
                for d in 0..3 {
                    mean[d] += mesh.vertices[n][d];
                }
            }
            for d in 0..3 {
                mean[d] /= list.len() as f64;
                next[v][d] = mesh.vertices[v][d] + SMOOTHING_LAMBDA * (mean[d] - mesh.vertices[v][d]);
            }
        }
        std::mem::swap(&mut mesh.vertices, &mut next);
    }
}

fn facet_normal(a: [f64; 3], b: [f64; 3], c: [f64; 3]) -> [f64; 3] {
    let u = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
    let v = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
    let n = [
        u[1] * v[2] - u[2] * v[1],
        u[2] * v[0] - u[0] * v[2],
        u[0] * v[1] - u[1] * v[0],
    ];
    let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
    if len > 0.0 {
        [n[0] / len, n[1] / len, n[2] / len]
    } else {
        [0.0; 3]
    }
}

/// Binary STL: 80-byte header, triangle count, 50 bytes per triangle.
pub fn write_stl(mesh: &TriangleMesh, path: impl AsRef<Path>) -> Result<()> {
    let count = u32::try_from(mesh.triangles.len())
        .map_err(|_| TopoError::Shape(format!("{} triangles exceed STL limit", mesh.triangles.len())))?;
    let mut out = BufWriter::new(File::create(path.as_ref())?);

    let mut header = [0u8; 80];
    let tag = b"topo3d binary STL";
    header[..tag.len()].copy_from_slice(tag);
    out.write_all(&header)?;
    out.write_all(&count.to_le_bytes())?;

    for tri in &mesh.triangles {
        let [a, b, c] = tri.map(|i| mesh.vertices[i]);
        for value in facet_normal(a, b, c).into_iter().chain(a).chain(b).chain(c) {
            out.write_all(&(value as f32).to_le_bytes())?;
        }
        out.write_all(&0u16.to_le_bytes())?;
    }
    out.flush()?;
    Ok(())
}

/// Extract, optionally smooth, and write the density field as STL.
pub fn voxel_to_stl(
    density: &Array3<f64>,
    output: impl AsRef<Path>,
    level: f64,
    smooth: bool,
    smooth_iterations: usize,
) -> Result<TriangleMesh> {
    let mut mesh = voxel_to_mesh(density, level);
    if mesh.is_empty() {
        return Err(TopoError::EmptyMesh);
    }
    if smooth {
        smooth_mesh(&mut mesh, smooth_iterations);
    }
    write_stl(&mesh, output.as_ref())?;
    info!(
        "Wrote {} triangles to {}",
        mesh.triangles.len(),
        output.as_ref().display()
    );
    Ok(mesh)
}
