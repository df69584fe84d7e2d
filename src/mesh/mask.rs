use crate::mesh::trimesh::{Triangle, TriangleMesh};
use delaunator::{Point, triangulate};
use glam::{Vec2, Vec3};
use std::collections::HashMap;

/// Face-survival predicate when filtering a mesh against a mask:
/// `Strict` requires all three vertices inside, `Lenient` any one.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ClipMode {
    Strict,
    Lenient,
}

const BARY_EPS: f32 = 1e-5;

/// A planar triangulation in XY used as an inside/outside test.
///
/// The (x, y) of each vertex doubles as its (u, v); a point is inside the
/// mask when some mask triangle contains it under barycentric coordinates.
/// Triangles are bucketed on a uniform XY grid so lookups stay cheap on
/// masks with tens of thousands of faces.
pub struct MaskMesh {
    positions: Vec<Vec2>,
    triangles: Vec<Triangle>,
    buckets: HashMap<(i32, i32), Vec<usize>>,
    cell: f32,
}

impl MaskMesh {
    /// Wraps an existing planar triangulation. Returns `None` when empty.
    pub fn new(positions: Vec<Vec2>, triangles: Vec<Triangle>) -> Option<Self> {
        if triangles.is_empty() || positions.is_empty() {
            return None;
        }

        // Bucket size scaled to the mask footprint; one triangle may span
        // several buckets.
        let (mut min, mut max) = (positions[0], positions[0]);
        for p in positions.iter() {
            min = min.min(*p);
            max = max.max(*p);
        }
        let span = (max - min).max_element();
        let cell = (span / (triangles.len() as f32).sqrt().max(1.0)).max(1e-3);

        let mut buckets: HashMap<(i32, i32), Vec<usize>> = HashMap::new();
        for (idx, tri) in triangles.iter().enumerate() {
            let a = positions[tri[0]];
            let b = positions[tri[1]];
            let c = positions[tri[2]];
            let lo = a.min(b).min(c);
            let hi = a.max(b).max(c);

            let x0 = (lo.x / cell).floor() as i32;
            let x1 = (hi.x / cell).floor() as i32;
            let y0 = (lo.y / cell).floor() as i32;
            let y1 = (hi.y / cell).floor() as i32;
            for x in x0..=x1 {
                for y in y0..=y1 {
                    buckets.entry((x, y)).or_default().push(idx);
                }
            }
        }

        Some(Self {
            positions,
            triangles,
            buckets,
            cell,
        })
    }

    /// Builds the Delaunay triangulation of a planar point set.
    /// Returns `None` for degenerate inputs (fewer than three distinct,
    /// non-collinear points).
    pub fn delaunay(points: &[Vec2]) -> Option<Self> {
        let sites: Vec<Point> = points
            .iter()
            .map(|p| Point {
                x: p.x as f64,
                y: p.y as f64,
            })
            .collect();

        let triangulation = triangulate(&sites);
        if triangulation.triangles.is_empty() {
            return None;
        }

        let mut triangles: Vec<Triangle> = Vec::with_capacity(triangulation.triangles.len() / 3);
        for tri in triangulation.triangles.chunks_exact(3) {
            triangles.push([tri[0], tri[1], tri[2]]);
        }

        Self::new(points.to_vec(), triangles)
    }

    /// Triangulates the interior of a closed, possibly non-convex polygon:
    /// Delaunay over its vertices, then faces whose centroid falls outside
    /// the polygon (even-odd rule) are discarded.
    pub fn from_polygon(polygon: &[Vec2]) -> Option<Self> {
        let mask = Self::delaunay(polygon)?;
        let inside: Vec<Triangle> = mask
            .triangles
            .iter()
            .filter(|tri| {
                let centroid = (mask.positions[tri[0]]
                    + mask.positions[tri[1]]
                    + mask.positions[tri[2]])
                    / 3.0;
                point_in_polygon(polygon, centroid)
            })
            .copied()
            .collect();

        Self::new(mask.positions, inside)
    }

    pub fn face_count(&self) -> usize {
        self.triangles.len()
    }

    /// True if the XY point lies inside some triangle of the mask.
    pub fn contains(&self, p: Vec2) -> bool {
        let key = (
            (p.x / self.cell).floor() as i32,
            (p.y / self.cell).floor() as i32,
        );
        let Some(candidates) = self.buckets.get(&key) else {
            return false;
        };

        for idx in candidates.iter() {
            let tri = self.triangles[*idx];
            let bary = barycentric_xy(
                self.positions[tri[0]],
                self.positions[tri[1]],
                self.positions[tri[2]],
                p,
            );
            if bary.x >= -BARY_EPS && bary.y >= -BARY_EPS && bary.z >= -BARY_EPS {
                return true;
            }
        }
        false
    }

    /// Filters mesh faces against the mask by vertex XY projection.
    pub fn clip_mesh(&self, mesh: &mut TriangleMesh, mode: ClipMode) {
        let positions = &mesh.positions;
        let inside = |idx: usize| -> bool {
            let p = positions[idx];
            self.contains(Vec2::new(p.x, p.y))
        };

        mesh.triangles.retain(|tri| match mode {
            ClipMode::Strict => inside(tri[0]) && inside(tri[1]) && inside(tri[2]),
            ClipMode::Lenient => inside(tri[0]) || inside(tri[1]) || inside(tri[2]),
        });
        mesh.remove_unused();
    }

    /// Drops mask faces that fail the predicate. Used to clip a hull mask
    /// to the configured surface extent.
    pub fn retain_faces(mut self, predicate: impl Fn(&[Vec2; 3]) -> bool) -> Option<Self> {
        self.triangles.retain(|tri| {
            predicate(&[
                self.positions[tri[0]],
                self.positions[tri[1]],
                self.positions[tri[2]],
            ])
        });
        Self::new(self.positions, self.triangles)
    }
}

/// Barycentric coordinates of `p` relative to triangle `(a, b, c)` in 2D.
/// Returns all-negative coordinates for degenerate triangles.
pub fn barycentric_xy(a: Vec2, b: Vec2, c: Vec2, p: Vec2) -> Vec3 {
    let v0 = b - a;
    let v1 = c - a;
    let v2 = p - a;

    let den = v0.x * v1.y - v1.x * v0.y;
    if den.abs() < 1e-12 {
        return Vec3::splat(-1.0);
    }

    let v = (v2.x * v1.y - v1.x * v2.y) / den;
    let w = (v0.x * v2.y - v2.x * v0.y) / den;
    Vec3::new(1.0 - v - w, v, w)
}

/// Even-odd ray-crossing test against a closed polygon.
pub fn point_in_polygon(polygon: &[Vec2], p: Vec2) -> bool {
    let mut inside = false;
    let n = polygon.len();
    let mut j = n - 1;
    for i in 0..n {
        let a = polygon[i];
        let b = polygon[j];
        if (a.y > p.y) != (b.y > p.y) {
            let x = a.x + (p.y - a.y) / (b.y - a.y) * (b.x - a.x);
            if p.x < x {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}
