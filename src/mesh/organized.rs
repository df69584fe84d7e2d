use crate::mesh::trimesh::TriangleMesh;
use glam::Vec3;

/// A mesh built from a regular 2D lattice of samples.
///
/// Keeps the row/column identity of each emitted vertex so later stages can
/// reason about lattice neighbors until the mesh is re-indexed arbitrarily.
/// Columns run along +X, rows along +Y.
pub struct OrganizedMesh {
    pub mesh: TriangleMesh,
    pub rows: usize,
    pub cols: usize,
    /// Vertex index per lattice sample, `None` where the sampler declined.
    grid: Vec<Option<usize>>,
}

impl OrganizedMesh {
    /// Builds a lattice mesh by sampling `rows * cols` positions.
    ///
    /// With `quads_only` (the default throughout this crate) each interior
    /// cell emits two triangles only when all four corners are valid.
    /// Otherwise cells with exactly three valid corners emit one triangle.
    pub fn from_lattice(
        rows: usize,
        cols: usize,
        mut sampler: impl FnMut(usize, usize) -> Option<Vec3>,
        quads_only: bool,
    ) -> Self {
        let mut grid: Vec<Option<usize>> = vec![None; rows * cols];
        let mut positions: Vec<Vec3> = Vec::with_capacity(rows * cols);

        for r in 0..rows {
            for c in 0..cols {
                if let Some(p) = sampler(r, c)
                    && p.is_finite()
                {
                    grid[r * cols + c] = Some(positions.len());
                    positions.push(p);
                }
            }
        }

        let mut triangles = Vec::with_capacity(2 * rows.saturating_sub(1) * cols.saturating_sub(1));
        for r in 0..rows.saturating_sub(1) {
            for c in 0..cols.saturating_sub(1) {
                let v00 = grid[r * cols + c];
                let v10 = grid[r * cols + c + 1];
                let v01 = grid[(r + 1) * cols + c];
                let v11 = grid[(r + 1) * cols + c + 1];

                match (v00, v10, v01, v11) {
                    (Some(a), Some(b), Some(c2), Some(d)) => {
                        // CCW seen from above
                        triangles.push([a, b, d]);
                        triangles.push([a, d, c2]);
                    }
                    (Some(a), Some(b), Some(c2), None) if !quads_only => {
                        triangles.push([a, b, c2]);
                    }
                    (Some(a), Some(b), None, Some(d)) if !quads_only => {
                        triangles.push([a, b, d]);
                    }
                    (Some(a), None, Some(c2), Some(d)) if !quads_only => {
                        triangles.push([a, d, c2]);
                    }
                    (None, Some(b), Some(c2), Some(d)) if !quads_only => {
                        triangles.push([b, d, c2]);
                    }
                    _ => {}
                }
            }
        }

        Self {
            mesh: TriangleMesh::new(triangles, positions, None, None),
            rows,
            cols,
            grid,
        }
    }

    /// Returns the vertex index emitted for the given lattice sample.
    pub fn vertex_at(&self, row: usize, col: usize) -> Option<usize> {
        self.grid[row * self.cols + col]
    }

    /// Computes per-vertex normals from lattice neighbors (central
    /// differences, falling back to forward/backward at the border).
    /// Normals point up for an upward-facing lattice.
    pub fn bake_lattice_normals(&mut self) {
        let mut normals = vec![Vec3::Z; self.mesh.count_vertices()];

        for r in 0..self.rows {
            for c in 0..self.cols {
                let Some(v) = self.vertex_at(r, c) else {
                    continue;
                };

                let sample = |rr: isize, cc: isize| -> Option<Vec3> {
                    if rr < 0 || cc < 0 || rr as usize >= self.rows || cc as usize >= self.cols {
                        return None;
                    }
                    self.vertex_at(rr as usize, cc as usize)
                        .map(|i| self.mesh.positions[i])
                };

                let here = self.mesh.positions[v];
                let right = sample(r as isize, c as isize + 1);
                let left = sample(r as isize, c as isize - 1);
                let up = sample(r as isize + 1, c as isize);
                let down = sample(r as isize - 1, c as isize);

                let dx = match (left, right) {
                    (Some(l), Some(rt)) => rt - l,
                    (None, Some(rt)) => rt - here,
                    (Some(l), None) => here - l,
                    (None, None) => continue,
                };
                let dy = match (down, up) {
                    (Some(d), Some(u)) => u - d,
                    (None, Some(u)) => u - here,
                    (Some(d), None) => here - d,
                    (None, None) => continue,
                };

                normals[v] = dx.cross(dy).normalize_or(Vec3::Z);
            }
        }

        self.mesh.normals = normals;
    }

    /// Consumes the lattice identity and hands over the plain mesh.
    pub fn into_mesh(self) -> TriangleMesh {
        self.mesh
    }
}
