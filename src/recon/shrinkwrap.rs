use crate::error::{Result, SceneError};
use crate::mesh::mask::MaskMesh;
use crate::mesh::operator::FaceLocatorXY;
use crate::mesh::organized::OrganizedMesh;
use crate::mesh::trimesh::{EdgeOperations, TriangleMesh};
use glam::{Vec2, Vec3};
use log::debug;
use std::collections::HashMap;

/// Settings for the lenient re-trim mask.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ShrinkwrapParams {
    /// Density of the projection grid.
    pub points_per_meter: f32,
    /// Outward offset applied to the extracted boundary, meters.
    pub mask_offset: f32,
}

impl Default for ShrinkwrapParams {
    fn default() -> Self {
        Self {
            points_per_meter: 4.0,
            mask_offset: 0.25,
        }
    }
}

/// Builds the lenient re-trim mask from a mesh:
/// shrink-wrap a regular XY grid onto it, extract the largest closed
/// boundary polygon of the wrapped surface, push it outward by the mask
/// offset, and triangulate the result.
///
/// Boundary extraction deliberately runs on the shrink-wrapped grid rather
/// than the input mesh itself; the raw mesh boundary is far too ragged and
/// extraction fails on it routinely.
pub fn build_lenient_mask(
    mesh: &TriangleMesh,
    params: &ShrinkwrapParams,
    nadir: Vec3,
) -> Result<MaskMesh> {
    let wrapped = shrinkwrap(mesh, params.points_per_meter)?;
    let polygon = largest_boundary_loop(&wrapped, nadir)?;
    let offset = offset_polygon(&polygon, params.mask_offset, nadir);

    debug!(
        "lenient mask: boundary of {} vertices, offset {} m",
        offset.len(),
        params.mask_offset
    );
    MaskMesh::from_polygon(&offset)
        .ok_or_else(|| SceneError::MaskFailed("offset polygon failed to triangulate".into()))
}

/// Projects a regular XY grid down the Z axis onto the mesh. Grid points
/// that miss the mesh are clipped, leaving holes in the wrap.
fn shrinkwrap(mesh: &TriangleMesh, points_per_meter: f32) -> Result<TriangleMesh> {
    let locator = FaceLocatorXY::build(mesh)
        .ok_or_else(|| SceneError::MaskFailed("mesh has no faces to wrap".into()))?;

    let bounds = mesh.bounds();
    let step = 1.0 / points_per_meter.max(1e-3);
    let cols = (bounds.size().x / step).ceil() as usize + 1;
    let rows = (bounds.size().y / step).ceil() as usize + 1;

    let mut wrapped = OrganizedMesh::from_lattice(
        rows,
        cols,
        |row, col| {
            let xy = Vec2::new(
                bounds.minimum.x + col as f32 * step,
                bounds.minimum.y + row as f32 * step,
            );
            locator
                .project_down(mesh, xy)
                .map(|z| Vec3::new(xy.x, xy.y, z))
        },
        true,
    )
    .into_mesh();

    wrapped.clean();
    if wrapped.triangles.is_empty() {
        return Err(SceneError::MaskFailed("shrinkwrap produced no faces".into()));
    }
    Ok(wrapped)
}

/// Walks the boundary-edge graph and returns the closed loop with the
/// largest XY-projected length, oriented counter-clockwise with respect to
/// the nadir. Zero-projected-length edges are discarded.
fn largest_boundary_loop(mesh: &TriangleMesh, nadir: Vec3) -> Result<Vec<Vec2>> {
    let edges = mesh.boundary_edges();
    if edges.is_empty() {
        return Err(SceneError::MaskFailed("wrapped mesh has no boundary".into()));
    }

    let mut next: HashMap<usize, usize> = HashMap::new();
    for edge in edges.iter() {
        if edge.length_xy(&mesh.positions) <= 0.0 {
            continue;
        }
        // Boundary of a manifold patch has one outgoing edge per vertex;
        // on pinched vertices the first edge wins
        next.entry(edge[0]).or_insert(edge[1]);
    }

    let mut best: Vec<Vec2> = vec![];
    let mut best_length = 0.0f32;
    let mut visited: std::collections::HashSet<usize> = std::collections::HashSet::new();

    for start in next.keys().copied().collect::<Vec<usize>>() {
        if visited.contains(&start) {
            continue;
        }

        let mut loop_vertices: Vec<usize> = vec![start];
        let mut length = 0.0f32;
        let mut current = start;
        let mut closed = false;

        for _ in 0..next.len() + 1 {
            let Some(dst) = next.get(&current).copied() else {
                break;
            };
            length += [current, dst].length_xy(&mesh.positions);
            if dst == start {
                closed = true;
                break;
            }
            if !visited.insert(dst) && dst != start {
                break;
            }
            loop_vertices.push(dst);
            current = dst;
        }
        visited.insert(start);

        if closed && length > best_length && loop_vertices.len() >= 3 {
            best_length = length;
            best = loop_vertices
                .iter()
                .map(|idx| {
                    let p = mesh.positions[*idx];
                    Vec2::new(p.x, p.y)
                })
                .collect();
        }
    }

    if best.len() < 3 {
        return Err(SceneError::MaskFailed("no closed boundary loop found".into()));
    }

    // CCW with respect to the nadir: looking down-nadir at the surface the
    // loop must run counter-clockwise
    let up_sign = if nadir.z <= 0.0 { 1.0 } else { -1.0 };
    if signed_area(&best) * up_sign < 0.0 {
        best.reverse();
    }
    Ok(best)
}

fn signed_area(polygon: &[Vec2]) -> f32 {
    let mut area = 0.0;
    for i in 0..polygon.len() {
        let a = polygon[i];
        let b = polygon[(i + 1) % polygon.len()];
        area += a.x * b.y - b.x * a.y;
    }
    area * 0.5
}

/// Pushes each vertex outward along the perpendicular of its incoming edge.
/// No self-intersection check; the mask is consumed leniently.
fn offset_polygon(polygon: &[Vec2], offset: f32, nadir: Vec3) -> Vec<Vec2> {
    let up_sign = if nadir.z <= 0.0 { 1.0 } else { -1.0 };
    let n = polygon.len();
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let src = polygon[(i + n - 1) % n];
        let dst = polygon[i];
        let dir = (dst - src).normalize_or(Vec2::X);
        let perp = Vec2::new(dir.y, -dir.x) * up_sign;
        out.push(dst + perp * offset);
    }
    out
}
