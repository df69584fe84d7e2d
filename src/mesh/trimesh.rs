use crate::math::bounding_box::BoundingBox;
use glam::{Mat4, Vec2, Vec3, Vec4};
use std::collections::HashMap;

// EDGES //

/// A mesh edge of vertex indices. In counter-clockwise winding order.
pub type Edge = [usize; 2];

/// A set of two indices that can be operated from any set of positions.
pub trait EdgeOperations {
    /// Returns a new, flipped edge by changing vertex order.
    fn flip(&self) -> Self;
    /// Returns the XY-projected length of an edge.
    fn length_xy(&self, positions: &[Vec3]) -> f32;
}

impl EdgeOperations for Edge {
    fn flip(&self) -> Self {
        [self[1], self[0]]
    }

    fn length_xy(&self, positions: &[Vec3]) -> f32 {
        let a = positions[self[0]];
        let b = positions[self[1]];
        Vec2::new(a.x - b.x, a.y - b.y).length()
    }
}

// TRIANGLES //

/// A mesh triangle of vertex indices. In counter-clockwise face winding order.
pub type Triangle = [usize; 3];

/// A set of three indices that can be operated on from any set of positions.
pub trait TriangleOperations {
    /// Returns the calculated normal of the given face using a counter-clockwise wound triangle.
    fn normal(&self, positions: &[Vec3]) -> Vec3;
    /// Returns the centerpoint of the triangle.
    fn centerpoint(&self, positions: &[Vec3]) -> Vec3;
    /// Returns the area of the triangle.
    fn area(&self, positions: &[Vec3]) -> f32;
    /// Returns a new, flipped triangle by changing vertex order.
    fn flip(&self) -> Self;
    /// Returns a face-winded list of edges on this triangle.
    fn edges(&self) -> [Edge; 3];
}

impl TriangleOperations for Triangle {
    fn normal(&self, positions: &[Vec3]) -> Vec3 {
        let u = positions[self[1]] - positions[self[0]];
        let v = positions[self[2]] - positions[self[0]];
        let c = u.cross(v);

        let len = c.length_squared();
        if len <= 1e-12 {
            // Degenerate triangles default to up
            return Vec3::Z;
        }

        c / len.sqrt()
    }

    fn centerpoint(&self, positions: &[Vec3]) -> Vec3 {
        (positions[self[0]] + positions[self[1]] + positions[self[2]]) * Vec3::splat(1.0 / 3.0)
    }

    fn area(&self, positions: &[Vec3]) -> f32 {
        let ab = positions[self[0]] - positions[self[1]];
        let ac = positions[self[0]] - positions[self[2]];
        ab.cross(ac).length() * 0.5
    }

    fn flip(&self) -> Self {
        [self[1], self[0], self[2]]
    }

    fn edges(&self) -> [Edge; 3] {
        [[self[0], self[1]], [self[1], self[2]], [self[2], self[0]]]
    }
}

// MESHES //

/// Minimum face area below which a triangle is considered degenerate.
pub const DEGENERATE_AREA_EPS: f32 = 1e-10;

/// Container for triangle mesh data.
///
/// Vertex data lives in flat, contiguous buffers indexed by `triangles`;
/// `normals`, `colors` and `uv1` are either empty or full vertex length.
/// A point cloud is simply a mesh with zero triangles. Normal magnitude may
/// encode a per-point scalar (confidence or sample scale) rather than 1.
#[derive(Clone, PartialEq, Default)]
pub struct TriangleMesh {
    /// Primary mesh buffer, listing the index of corresponding vertex positions, in counter-clockwise face winding.
    pub triangles: Vec<Triangle>,
    /// Individual vertices of the mesh.
    pub positions: Vec<Vec3>,
    /// Normals of the mesh, assigned to vertices of the corresponding index.
    pub normals: Vec<Vec3>,
    /// Optional color data, assigned to vertices of the corresponding index.
    pub colors: Vec<Vec4>,
    /// Optional texture coordinates.
    pub uv1: Option<Vec<Vec2>>,
}

impl TriangleMesh {
    /// Creates a new TriangleMesh from the given mesh data.
    pub fn new(
        triangles: Vec<Triangle>,
        positions: Vec<Vec3>,
        normals: Option<Vec<Vec3>>,
        colors: Option<Vec<Vec4>>,
    ) -> Self {
        Self {
            triangles,
            positions,
            normals: normals.unwrap_or_default(),
            colors: colors.unwrap_or_default(),
            uv1: None,
        }
    }

    /// Creates a point cloud: vertex data with no faces.
    pub fn cloud(positions: Vec<Vec3>, normals: Option<Vec<Vec3>>) -> Self {
        Self::new(vec![], positions, normals, None)
    }

    /// Creates a new TriangleMesh from a list of indices.
    /// Every three indices are expected to represent a triangle, with counter-clockwise face winding.
    pub fn from_indices(
        indices: Vec<usize>,
        positions: Vec<Vec3>,
        normals: Option<Vec<Vec3>>,
    ) -> Self {
        let mut tris: Vec<Triangle> = Vec::with_capacity(indices.len() / 3);
        for i in 0..(indices.len() / 3) {
            tris.push([indices[i * 3], indices[i * 3 + 1], indices[i * 3 + 2]]);
        }

        Self {
            triangles: tris,
            positions,
            normals: normals.unwrap_or_default(),
            colors: vec![],
            uv1: None,
        }
    }

    /// Returns the number of vertex positions in the mesh.
    pub fn count_vertices(&self) -> usize {
        self.positions.len()
    }

    /// True if the mesh holds no faces and no vertices.
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty() && self.positions.is_empty()
    }

    pub fn has_normals(&self) -> bool {
        !self.normals.is_empty()
    }

    pub fn has_colors(&self) -> bool {
        !self.colors.is_empty()
    }

    /// Returns the axis-aligned bounds of all vertex positions.
    pub fn bounds(&self) -> BoundingBox {
        BoundingBox::from_points(&self.positions)
    }

    /// Joins the given mesh onto this one by index offsetting.
    /// Does not merge points or optimize the mesh in any way.
    /// Optional channels survive only when both meshes carry them.
    pub fn join(&mut self, mesh: Self) {
        if mesh.positions.is_empty() {
            return;
        }
        let idx_count = self.positions.len();
        let self_empty = idx_count == 0;

        if self.has_normals() && mesh.has_normals() || self_empty {
            self.normals.extend_from_slice(&mesh.normals);
        } else {
            self.normals.clear();
        }
        if self.has_colors() && mesh.has_colors() || self_empty {
            self.colors.extend_from_slice(&mesh.colors);
        } else {
            self.colors.clear();
        }
        match (&mut self.uv1, mesh.uv1) {
            (Some(a), Some(b)) => a.extend_from_slice(&b),
            (uv @ Some(_), None) if !self_empty => *uv = None,
            (uv @ None, Some(b)) if self_empty => *uv = Some(b),
            _ => {}
        }

        self.positions.extend_from_slice(&mesh.positions);

        self.triangles.reserve_exact(mesh.triangles.len());
        for tri in mesh.triangles.iter() {
            self.triangles
                .push([tri[0] + idx_count, tri[1] + idx_count, tri[2] + idx_count]);
        }
    }

    /// Applies a rigid transform to vertex positions and normals.
    /// Normal lengths are preserved, so per-point scalars encoded in the
    /// normal magnitude survive the change of frame.
    pub fn transform(&mut self, m: Mat4) {
        for p in self.positions.iter_mut() {
            *p = m.transform_point3(*p);
        }
        for n in self.normals.iter_mut() {
            *n = m.transform_vector3(*n);
        }
    }

    /// Drops vertices whose position, or normal when present, contains a
    /// non-finite component. Faces touching a dropped vertex are removed.
    pub fn retain_finite(&mut self) {
        let has_normals = self.has_normals();
        let positions = &self.positions;
        let normals = &self.normals;
        let valid = |idx: usize| -> bool {
            positions[idx].is_finite() && (!has_normals || normals[idx].is_finite())
        };

        let keep: Vec<bool> = (0..self.positions.len()).map(valid).collect();
        if keep.iter().all(|k| *k) {
            return;
        }

        self.triangles
            .retain(|tri| keep[tri[0]] && keep[tri[1]] && keep[tri[2]]);
        self.compact(&keep);
    }

    /// Keeps only faces passing the predicate. Vertex buffers are untouched;
    /// call `remove_unused` afterwards to compact them.
    pub fn retain_faces(&mut self, mut predicate: impl FnMut(&Triangle) -> bool) {
        self.triangles.retain(|tri| predicate(tri));
    }

    /// Clips the mesh against a box.
    /// Faces survive only when all three vertices are inside; for a point
    /// cloud (zero faces), vertices outside the box are dropped.
    pub fn clip_to_box(&mut self, bounds: BoundingBox) {
        if self.triangles.is_empty() {
            let positions = &self.positions;
            let keep: Vec<bool> = positions.iter().map(|p| bounds.contains(*p)).collect();
            self.compact(&keep);
            return;
        }

        let positions = &self.positions;
        self.triangles.retain(|tri| {
            bounds.contains(positions[tri[0]])
                && bounds.contains(positions[tri[1]])
                && bounds.contains(positions[tri[2]])
        });
        self.remove_unused();
    }

    /// Clips the mesh against an XY footprint, ignoring Z entirely.
    pub fn clip_to_xy(&mut self, bounds: BoundingBox) {
        if self.triangles.is_empty() {
            let positions = &self.positions;
            let keep: Vec<bool> = positions.iter().map(|p| bounds.contains_xy(*p)).collect();
            self.compact(&keep);
            return;
        }

        let positions = &self.positions;
        self.triangles.retain(|tri| {
            bounds.contains_xy(positions[tri[0]])
                && bounds.contains_xy(positions[tri[1]])
                && bounds.contains_xy(positions[tri[2]])
        });
        self.remove_unused();
    }

    /// Merges all vertices within the given threshold distance of each other,
    /// merging later vertices into earlier ones. Runs on a spatial hash so it
    /// stays linear in vertex count; point buffers here routinely exceed 1e8
    /// entries and a pairwise scan is not an option.
    ///
    /// After the merge, every pair of kept vertices is at least `threshold`
    /// apart. Triangle indices are remapped; degenerate faces are NOT removed.
    pub fn merge_by_distance(&mut self, threshold: f32) {
        if threshold <= 0.0 || self.positions.is_empty() {
            return;
        }

        let inv_cell = 1.0 / threshold;
        let thresh_squared = threshold * threshold;
        let cell_of = |p: Vec3| -> (i64, i64, i64) {
            (
                (p.x * inv_cell).floor() as i64,
                (p.y * inv_cell).floor() as i64,
                (p.z * inv_cell).floor() as i64,
            )
        };

        // Cell -> indices of kept vertices inside it
        let mut grid: HashMap<(i64, i64, i64), Vec<usize>> = HashMap::new();
        let mut remap: Vec<usize> = Vec::with_capacity(self.positions.len());
        let mut keep: Vec<bool> = vec![false; self.positions.len()];

        for (idx, pt) in self.positions.iter().enumerate() {
            let (cx, cy, cz) = cell_of(*pt);
            let mut target: Option<usize> = None;

            'scan: for dx in -1..=1i64 {
                for dy in -1..=1i64 {
                    for dz in -1..=1i64 {
                        if let Some(cell) = grid.get(&(cx + dx, cy + dy, cz + dz)) {
                            for kept in cell.iter() {
                                if pt.distance_squared(self.positions[*kept]) < thresh_squared {
                                    target = Some(*kept);
                                    break 'scan;
                                }
                            }
                        }
                    }
                }
            }

            match target {
                Some(kept) => remap.push(kept),
                None => {
                    keep[idx] = true;
                    remap.push(idx);
                    grid.entry((cx, cy, cz)).or_default().push(idx);
                }
            }
        }

        for tri in self.triangles.iter_mut() {
            for idx in tri.iter_mut() {
                *idx = remap[*idx];
            }
        }

        // Vertices that were merged away are now unreferenced
        if self.triangles.is_empty() {
            self.compact(&keep);
        } else {
            self.remove_unused();
        }
    }

    /// Removes degenerate triangles: repeated indices or near-zero area.
    pub fn remove_degenerate(&mut self) {
        let positions = &self.positions;
        self.triangles.retain(|tri| {
            tri[0] != tri[1]
                && tri[0] != tri[2]
                && tri[1] != tri[2]
                && tri.area(positions) > DEGENERATE_AREA_EPS
        });
    }

    /// Removes all unused vertex positions in the mesh, remapping triangle indices.
    pub fn remove_unused(&mut self) {
        let mut used: Vec<bool> = vec![false; self.positions.len()];
        for tri in self.triangles.iter() {
            for item in tri {
                used[*item] = true;
            }
        }
        self.compact(&used);
    }

    /// Drops vertices not flagged in `keep` and remaps triangle indices.
    fn compact(&mut self, keep: &[bool]) {
        let mut remapped: Vec<usize> = vec![usize::MAX; keep.len()];
        let mut new_idx: usize = 0;
        for (idx, kept) in keep.iter().enumerate() {
            if *kept {
                remapped[idx] = new_idx;
                new_idx += 1;
            }
        }

        debug_assert_eq!(self.positions.len(), keep.len());

        let mut idx = 0;
        self.positions.retain(|_| {
            let i = idx;
            idx += 1;
            keep[i]
        });

        if !self.normals.is_empty() {
            idx = 0;
            self.normals.retain(|_| {
                let i = idx;
                idx += 1;
                keep[i]
            });
        }
        if !self.colors.is_empty() {
            idx = 0;
            self.colors.retain(|_| {
                let i = idx;
                idx += 1;
                keep[i]
            });
        }
        if let Some(uv) = &mut self.uv1 {
            idx = 0;
            uv.retain(|_| {
                let i = idx;
                idx += 1;
                keep[i]
            });
        }

        for tri in self.triangles.iter_mut() {
            for i in tri.iter_mut() {
                *i = remapped[*i];
            }
        }
    }

    /// Standard mesh hygiene: drop degenerate faces, then unused vertices.
    /// Idempotent: `clean(clean(M)) == clean(M)`.
    pub fn clean(&mut self) {
        self.remove_degenerate();
        self.remove_unused();
        self.shrink_to_fit();
    }

    /// Removes connected components whose bounding-box diagonal is smaller
    /// than `min_ratio` of the largest component's diagonal.
    /// Returns the number of islands removed.
    pub fn remove_islands(&mut self, min_ratio: f32) -> usize {
        if min_ratio <= 0.0 || self.triangles.is_empty() {
            return 0;
        }

        // Union-find over vertices, joined through shared faces
        let mut parent: Vec<usize> = (0..self.positions.len()).collect();

        fn find(parent: &mut [usize], mut v: usize) -> usize {
            while parent[v] != v {
                parent[v] = parent[parent[v]];
                v = parent[v];
            }
            v
        }

        for tri in self.triangles.iter() {
            let a = find(&mut parent, tri[0]);
            let b = find(&mut parent, tri[1]);
            let c = find(&mut parent, tri[2]);
            parent[b] = a;
            parent[c] = a;
        }

        let mut component_bounds: HashMap<usize, BoundingBox> = HashMap::new();
        for tri in self.triangles.iter() {
            let root = find(&mut parent, tri[0]);
            let entry = component_bounds
                .entry(root)
                .or_insert_with(|| BoundingBox::new(self.positions[tri[0]], self.positions[tri[0]]));
            for idx in tri {
                *entry = entry.enclose(self.positions[*idx]);
            }
        }

        let largest = component_bounds
            .values()
            .map(|b| b.diagonal())
            .fold(0.0f32, f32::max);
        if largest <= 0.0 {
            return 0;
        }

        let cutoff = largest * min_ratio;
        let doomed: Vec<usize> = component_bounds
            .iter()
            .filter(|(_, b)| b.diagonal() < cutoff)
            .map(|(root, _)| *root)
            .collect();
        if doomed.is_empty() {
            return 0;
        }

        self.triangles.retain(|tri| {
            let root = find(&mut parent, tri[0]);
            !doomed.contains(&root)
        });
        self.remove_unused();

        doomed.len()
    }

    /// Calculates smooth vertex normals, using each triangle's surface area as a weight.
    /// Every returned normal is unit length; vertices with no faces default to up.
    pub fn get_normals_smooth(&self) -> Vec<Vec3> {
        let mut normals: Vec<Vec3> = vec![Vec3::ZERO; self.positions.len()];

        for tri in self.triangles.iter() {
            let weighted = tri.normal(&self.positions) * tri.area(&self.positions);
            for idx in tri.iter() {
                normals[*idx] += weighted;
            }
        }

        for n in normals.iter_mut() {
            *n = n.normalize_or(Vec3::Z);
        }

        normals
    }

    /// Bakes out smooth vertex normals, using each triangle's surface area as a weight.
    pub fn bake_normals_smooth(&mut self) {
        self.normals = self.get_normals_smooth();
    }

    /// Returns every directed edge that has no opposing face: the mesh boundary.
    /// Edge direction follows face winding, so for an upward-facing surface
    /// the outer boundary runs counter-clockwise seen from above.
    pub fn boundary_edges(&self) -> Vec<Edge> {
        let mut edges: HashMap<Edge, u32> = HashMap::new();
        for tri in self.triangles.iter() {
            for edge in tri.edges() {
                *edges.entry(edge).or_insert(0) += 1;
            }
        }

        let mut boundary: Vec<Edge> = edges
            .iter()
            .filter(|(edge, count)| **count == 1 && !edges.contains_key(&edge.flip()))
            .map(|(edge, _)| *edge)
            .collect();
        boundary.sort_unstable();
        boundary
    }

    /// Returns the calculated surface area of the mesh.
    pub fn surface_area(&self) -> f32 {
        let mut sum: f32 = 0.0;
        for tri in self.triangles.iter() {
            sum += tri.area(&self.positions);
        }
        sum
    }

    /// Shrinks mesh buffers to only use the necessary amount of memory.
    pub fn shrink_to_fit(&mut self) {
        self.triangles.shrink_to_fit();
        self.positions.shrink_to_fit();
        self.normals.shrink_to_fit();
        self.colors.shrink_to_fit();
        if let Some(uv) = &mut self.uv1 {
            uv.shrink_to_fit();
        }
    }
}

// UNIT TESTS //
#[cfg(test)]
mod tests {
    use super::*;
    use glam::vec3;

    fn quad_mesh() -> TriangleMesh {
        // Unit square at Z=0, two CCW faces
        TriangleMesh::new(
            vec![[0, 1, 2], [0, 2, 3]],
            vec![
                vec3(0.0, 0.0, 0.0),
                vec3(1.0, 0.0, 0.0),
                vec3(1.0, 1.0, 0.0),
                vec3(0.0, 1.0, 0.0),
            ],
            None,
            None,
        )
    }

    #[test]
    fn test_face_normal_and_area() {
        let mesh = quad_mesh();
        for tri in mesh.triangles.iter() {
            assert_eq!(
                Vec3::Z,
                tri.normal(&mesh.positions),
                "CCW quad faces point up"
            );
        }
        assert_eq!(1.0, mesh.surface_area(), "unit square area");
    }

    #[test]
    fn test_join_offsets_indices() {
        let mut a = quad_mesh();
        let mut b = quad_mesh();
        b.transform(Mat4::from_translation(vec3(5.0, 0.0, 0.0)));

        a.join(b);
        assert_eq!(8, a.count_vertices());
        assert_eq!(4, a.triangles.len());
        assert_eq!([4, 5, 6], a.triangles[2], "second mesh indices offset");
    }

    #[test]
    fn test_retain_finite_drops_bad_vertices() {
        let mut cloud = TriangleMesh::cloud(
            vec![
                vec3(0.0, 0.0, 0.0),
                vec3(f32::NAN, 0.0, 0.0),
                vec3(1.0, 1.0, 1.0),
            ],
            Some(vec![Vec3::Z, Vec3::Z, vec3(0.0, f32::INFINITY, 0.0)]),
        );
        cloud.retain_finite();

        assert_eq!(1, cloud.count_vertices(), "NaN position and Inf normal dropped");
        assert_eq!(vec3(0.0, 0.0, 0.0), cloud.positions[0]);
    }

    #[test]
    fn test_merge_by_distance_enforces_spacing() {
        let eps = 0.005;
        let mut cloud = TriangleMesh::cloud(
            vec![
                vec3(0.0, 0.0, 0.0),
                vec3(0.001, 0.0, 0.0),
                vec3(0.004, 0.0, 0.0),
                vec3(0.1, 0.0, 0.0),
            ],
            None,
        );
        cloud.merge_by_distance(eps);

        assert_eq!(2, cloud.count_vertices(), "near-duplicates coalesce");
        for (i, a) in cloud.positions.iter().enumerate() {
            for b in cloud.positions.iter().skip(i + 1) {
                assert!(
                    a.distance(*b) >= eps,
                    "all kept pairs at least eps apart: {a} vs {b}"
                );
            }
        }
    }

    #[test]
    fn test_merge_by_distance_remaps_faces() {
        let mut mesh = TriangleMesh::new(
            vec![[0, 1, 2], [3, 4, 5]],
            vec![
                vec3(1.0, 0.0, -1.0),
                vec3(-1.0, 0.0, -1.0),
                vec3(0.0, 0.0, 1.0),
                vec3(1.0, 1e-6, -1.0),
                vec3(-1.0, 1e-6, -1.0),
                vec3(0.0, 0.0, -1.0),
            ],
            None,
            None,
        );
        mesh.merge_by_distance(1e-5);

        assert_eq!(2, mesh.triangles.len(), "both faces survive");
        assert_eq!(4, mesh.count_vertices(), "merged vertices compacted");
        assert_eq!(vec![[0, 1, 2], [0, 1, 3]], mesh.triangles);
    }

    #[test]
    fn test_clean_is_idempotent() {
        let mut mesh = quad_mesh();
        // Degenerate face with a repeated index, plus an unused vertex
        mesh.positions.push(vec3(9.0, 9.0, 9.0));
        mesh.triangles.push([0, 0, 1]);

        mesh.clean();
        let once = mesh.clone();
        mesh.clean();

        assert_eq!(once.triangles, mesh.triangles, "clean is idempotent");
        assert_eq!(once.positions, mesh.positions);
        assert_eq!(2, mesh.triangles.len());
        assert_eq!(4, mesh.count_vertices(), "unused vertex removed");
    }

    #[test]
    fn test_clip_to_xy_idempotent() {
        let mut mesh = quad_mesh();
        let mut far = quad_mesh();
        far.transform(Mat4::from_translation(vec3(100.0, 0.0, 0.0)));
        mesh.join(far);

        let bounds = BoundingBox::square_xy(glam::Vec2::splat(0.5), 4.0, -10.0, 10.0);
        mesh.clip_to_xy(bounds);
        let once = mesh.clone();
        mesh.clip_to_xy(bounds);

        assert_eq!(once.positions, mesh.positions, "clip is idempotent");
        assert_eq!(2, mesh.triangles.len(), "distant quad clipped away");
    }

    #[test]
    fn test_remove_islands_by_ratio() {
        // 10 m island and a 1 m island
        let mut big = quad_mesh();
        big.transform(Mat4::from_scale(vec3(10.0, 10.0, 1.0)));
        let small = quad_mesh();
        let mut mesh = big.clone();
        mesh.join(small.clone());

        let removed = mesh.remove_islands(0.2);
        assert_eq!(1, removed, "1/10 diagonal ratio under 0.2 cutoff");
        assert_eq!(2, mesh.triangles.len());

        let mut mesh = big;
        mesh.join(small);
        let removed = mesh.remove_islands(0.05);
        assert_eq!(0, removed, "both kept at 0.05 cutoff");
        assert_eq!(4, mesh.triangles.len());
    }

    #[test]
    fn test_smooth_normals_unit_length() {
        let mut mesh = quad_mesh();
        // Tilt one vertex so faces disagree
        mesh.positions[2].z = 0.5;
        mesh.bake_normals_smooth();

        assert_eq!(mesh.count_vertices(), mesh.normals.len());
        for n in mesh.normals.iter() {
            assert!(
                (n.length() - 1.0).abs() < 1e-6,
                "vertex normal must be unit length, got {n}"
            );
        }
    }

    #[test]
    fn test_boundary_edges_of_quad() {
        let mesh = quad_mesh();
        let boundary = mesh.boundary_edges();

        assert_eq!(4, boundary.len(), "square has four boundary edges");
        // The shared diagonal must not appear
        assert!(!boundary.contains(&[0, 2]));
        assert!(!boundary.contains(&[2, 0]));
    }

    #[test]
    fn test_cloud_clip_to_box() {
        let mut cloud = TriangleMesh::cloud(
            vec![vec3(0.0, 0.0, 0.0), vec3(50.0, 0.0, 0.0)],
            Some(vec![Vec3::Z, Vec3::Z]),
        );
        cloud.clip_to_box(BoundingBox::new(Vec3::splat(-1.0), Vec3::splat(1.0)));

        assert_eq!(1, cloud.count_vertices());
        assert_eq!(1, cloud.normals.len(), "normals compact alongside positions");
    }
}
