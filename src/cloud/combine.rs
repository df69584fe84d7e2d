use crate::mesh::trimesh::TriangleMesh;
use glam::{Vec3, Vec4};
use std::collections::HashMap;

/// Settings for outlier-resistant multi-cloud fusion.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct CombineParams {
    /// XY width of a grid cell, meters.
    pub cell_size: f32,
    /// Vertical cell height as a multiple of `cell_size`.
    pub cell_aspect: f32,
    /// Hard cap on samples kept per cell.
    pub max_per_cell: usize,
}

impl Default for CombineParams {
    fn default() -> Self {
        Self {
            cell_size: 0.025,
            cell_aspect: 4.0,
            max_per_cell: 2,
        }
    }
}

/// Fuses many point clouds into one, bucketing samples onto a 3D grid and
/// keeping at most `max_per_cell` per cell. Within a cell, samples closer to
/// their source origin win: a far-away camera's noisy echo of a surface some
/// other camera saw up close is the outlier this stage exists to drop.
///
/// Kept samples land in cell-rank order; normals and any per-point color
/// scalars ride along untouched.
pub fn clever_combine(clouds: &[(TriangleMesh, Vec3)], params: &CombineParams) -> TriangleMesh {
    #[cfg(debug_assertions)]
    assert!(params.cell_size > 0.0 && params.cell_aspect > 0.0 && params.max_per_cell > 0);

    let inv_xy = 1.0 / params.cell_size;
    let inv_z = 1.0 / (params.cell_size * params.cell_aspect);

    // (rank, cloud, point) triples per cell; the trailing indices break
    // rank ties deterministically.
    let mut cells: HashMap<(i64, i64, i64), Vec<(f32, usize, usize)>> = HashMap::new();
    for (cloud_idx, (cloud, origin)) in clouds.iter().enumerate() {
        for (pt_idx, pt) in cloud.positions.iter().enumerate() {
            let key = (
                (pt.x * inv_xy).floor() as i64,
                (pt.y * inv_xy).floor() as i64,
                (pt.z * inv_z).floor() as i64,
            );
            cells
                .entry(key)
                .or_default()
                .push((pt.distance_squared(*origin), cloud_idx, pt_idx));
        }
    }

    let all_normals = clouds
        .iter()
        .all(|(cloud, _)| cloud.has_normals() || cloud.count_vertices() == 0);
    let all_colors = clouds
        .iter()
        .all(|(cloud, _)| cloud.has_colors() || cloud.count_vertices() == 0);

    let mut keys: Vec<(i64, i64, i64)> = cells.keys().copied().collect();
    keys.sort_unstable();

    let mut positions: Vec<Vec3> = Vec::new();
    let mut normals: Vec<Vec3> = Vec::new();
    let mut colors: Vec<Vec4> = Vec::new();

    for key in keys {
        let Some(mut samples) = cells.remove(&key) else {
            continue;
        };
        samples.sort_unstable_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });
        samples.truncate(params.max_per_cell);

        for (_, cloud_idx, pt_idx) in samples {
            let (cloud, _) = &clouds[cloud_idx];
            positions.push(cloud.positions[pt_idx]);
            if all_normals {
                normals.push(cloud.normals[pt_idx]);
            }
            if all_colors {
                colors.push(cloud.colors[pt_idx]);
            }
        }
    }

    TriangleMesh::new(
        vec![],
        positions,
        all_normals.then_some(normals),
        all_colors.then_some(colors),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::vec3;

    fn cloud_of(points: Vec<Vec3>) -> TriangleMesh {
        let normals = vec![Vec3::Z; points.len()];
        TriangleMesh::cloud(points, Some(normals))
    }

    #[test]
    fn test_per_cell_cap() {
        // Five samples in one 1 m cell
        let cloud = cloud_of(vec![
            vec3(0.1, 0.1, 0.0),
            vec3(0.2, 0.2, 0.0),
            vec3(0.3, 0.3, 0.0),
            vec3(0.4, 0.4, 0.0),
            vec3(0.5, 0.5, 0.0),
        ]);
        let params = CombineParams {
            cell_size: 1.0,
            cell_aspect: 1.0,
            max_per_cell: 3,
        };

        let merged = clever_combine(&[(cloud, Vec3::ZERO)], &params);
        assert_eq!(3, merged.count_vertices(), "cap enforced");
        assert_eq!(3, merged.normals.len(), "normals preserved per sample");
    }

    #[test]
    fn test_closer_origin_wins() {
        // Two clouds see the same cell; camera B is much closer to it
        let far = cloud_of(vec![vec3(0.5, 0.5, 0.2)]);
        let near = cloud_of(vec![vec3(0.4, 0.4, 0.1)]);
        let params = CombineParams {
            cell_size: 1.0,
            cell_aspect: 1.0,
            max_per_cell: 1,
        };

        let merged = clever_combine(
            &[
                (far, vec3(100.0, 0.0, 0.0)),
                (near, vec3(1.0, 1.0, 1.0)),
            ],
            &params,
        );
        assert_eq!(1, merged.count_vertices());
        assert_eq!(
            vec3(0.4, 0.4, 0.1),
            merged.positions[0],
            "sample nearest its own origin outranks the rest"
        );
    }

    #[test]
    fn test_vertical_aspect_separates_cells() {
        // Same XY, 0.5 m apart vertically; aspect keeps them in one column
        // but distinct Z cells
        let cloud = cloud_of(vec![vec3(0.5, 0.5, 0.05), vec3(0.5, 0.5, 1.55)]);
        let params = CombineParams {
            cell_size: 1.0,
            cell_aspect: 1.0,
            max_per_cell: 1,
        };

        let merged = clever_combine(&[(cloud, Vec3::ZERO)], &params);
        assert_eq!(2, merged.count_vertices(), "distinct vertical cells both keep a sample");
    }

    #[test]
    fn test_cell_invariant_holds() {
        let mut points = vec![];
        for i in 0..100 {
            points.push(vec3(
                (i % 10) as f32 * 0.013,
                (i / 10) as f32 * 0.017,
                (i % 7) as f32 * 0.003,
            ));
        }
        let params = CombineParams {
            cell_size: 0.05,
            cell_aspect: 2.0,
            max_per_cell: 2,
        };
        let merged = clever_combine(&[(cloud_of(points), Vec3::ZERO)], &params);

        let mut counts: HashMap<(i64, i64, i64), usize> = HashMap::new();
        for p in merged.positions.iter() {
            let key = (
                (p.x / 0.05).floor() as i64,
                (p.y / 0.05).floor() as i64,
                (p.z / 0.1).floor() as i64,
            );
            *counts.entry(key).or_default() += 1;
        }
        for (cell, count) in counts {
            assert!(count <= 2, "cell {cell:?} holds {count} > cap");
        }
    }
}
