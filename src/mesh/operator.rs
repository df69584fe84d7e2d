use crate::mesh::mask::barycentric_xy;
use crate::mesh::trimesh::TriangleMesh;
use glam::{Vec2, Vec3};
use rstar::{AABB, PointDistance, RTree, RTreeObject};
use std::collections::HashMap;

/// One mesh vertex projected to XY, held by the R-tree.
pub struct IndexedVertex {
    xy: [f32; 2],
    /// Index into the owning mesh's vertex buffers.
    pub index: usize,
}

impl RTreeObject for IndexedVertex {
    type Envelope = AABB<[f32; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.xy)
    }
}

impl PointDistance for IndexedVertex {
    fn distance_2(&self, point: &[f32; 2]) -> f32 {
        let dx = self.xy[0] - point[0];
        let dy = self.xy[1] - point[1];
        dx * dx + dy * dy
    }
}

/// Nearest-XY-vertex queries over a mesh.
///
/// A re-buildable acceleration structure, not an owned attribute of the
/// mesh: phases that need it construct it locally and drop it when done.
pub struct VertexIndexXY {
    tree: RTree<IndexedVertex>,
}

impl VertexIndexXY {
    /// Bulk-loads every finite position.
    pub fn build(positions: &[Vec3]) -> Self {
        Self::build_subset(positions, (0..positions.len()).collect())
    }

    /// Bulk-loads only the listed vertex indices.
    pub fn build_subset(positions: &[Vec3], indices: Vec<usize>) -> Self {
        let entries: Vec<IndexedVertex> = indices
            .into_iter()
            .filter(|idx| positions[*idx].is_finite())
            .map(|idx| IndexedVertex {
                xy: [positions[idx].x, positions[idx].y],
                index: idx,
            })
            .collect();

        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Returns the nearest vertex to the query point by XY distance,
    /// along with the squared distance.
    pub fn nearest(&self, xy: Vec2) -> Option<(usize, f32)> {
        let query = [xy.x, xy.y];
        self.tree
            .nearest_neighbor(&query)
            .map(|v| (v.index, v.distance_2(&query)))
    }

    /// Returns all vertex indices within `radius` of the query point in XY.
    pub fn within_radius(&self, xy: Vec2, radius: f32) -> Vec<usize> {
        self.tree
            .locate_within_distance([xy.x, xy.y], radius * radius)
            .map(|v| v.index)
            .collect()
    }
}

/// Fast XY point-in-face lookup over a mesh, for projecting points down
/// the Z axis onto its surface. Faces are bucketed by their XY bounds.
pub struct FaceLocatorXY {
    buckets: HashMap<(i32, i32), Vec<usize>>,
    cell: f32,
}

impl FaceLocatorXY {
    pub fn build(mesh: &TriangleMesh) -> Option<Self> {
        if mesh.triangles.is_empty() {
            return None;
        }

        let bounds = mesh.bounds();
        let span = (bounds.size().x).max(bounds.size().y);
        let cell = (span / (mesh.triangles.len() as f32).sqrt().max(1.0)).max(1e-3);

        let mut buckets: HashMap<(i32, i32), Vec<usize>> = HashMap::new();
        for (idx, tri) in mesh.triangles.iter().enumerate() {
            let a = mesh.positions[tri[0]];
            let b = mesh.positions[tri[1]];
            let c = mesh.positions[tri[2]];
            let lo_x = a.x.min(b.x).min(c.x);
            let hi_x = a.x.max(b.x).max(c.x);
            let lo_y = a.y.min(b.y).min(c.y);
            let hi_y = a.y.max(b.y).max(c.y);

            let x0 = (lo_x / cell).floor() as i32;
            let x1 = (hi_x / cell).floor() as i32;
            let y0 = (lo_y / cell).floor() as i32;
            let y1 = (hi_y / cell).floor() as i32;
            for x in x0..=x1 {
                for y in y0..=y1 {
                    buckets.entry((x, y)).or_default().push(idx);
                }
            }
        }

        Some(Self { buckets, cell })
    }

    /// Projects an XY point down the Z axis onto the mesh.
    /// Returns the highest intersection when faces overlap vertically,
    /// or `None` when the point misses the mesh entirely.
    pub fn project_down(&self, mesh: &TriangleMesh, xy: Vec2) -> Option<f32> {
        let key = (
            (xy.x / self.cell).floor() as i32,
            (xy.y / self.cell).floor() as i32,
        );
        let candidates = self.buckets.get(&key)?;

        let mut best: Option<f32> = None;
        for idx in candidates.iter() {
            let tri = mesh.triangles[*idx];
            let a = mesh.positions[tri[0]];
            let b = mesh.positions[tri[1]];
            let c = mesh.positions[tri[2]];
            let bary = barycentric_xy(
                Vec2::new(a.x, a.y),
                Vec2::new(b.x, b.y),
                Vec2::new(c.x, c.y),
                xy,
            );
            if bary.x >= -1e-5 && bary.y >= -1e-5 && bary.z >= -1e-5 {
                let z = a.z * bary.x + b.z * bary.y + c.z * bary.z;
                best = Some(match best {
                    Some(prev) => prev.max(z),
                    None => z,
                });
            }
        }
        best
    }
}
