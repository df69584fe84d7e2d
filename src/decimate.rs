use crate::error::{Result, SceneError};
use crate::mesh::trimesh::TriangleMesh;
use log::debug;

/// Mesh decimation seam: reduce to at most `target_faces`, preserving
/// normals. Inputs already at or under the target pass through unchanged.
pub trait Decimator: Sync {
    fn decimate(&self, mesh: TriangleMesh, target_faces: usize) -> Result<TriangleMesh>;
}

/// The built-in decimator: vertex clustering on a growing grid.
///
/// Merges vertices by distance and cleans, widening the cluster cell until
/// the face count drops under the target. Crude next to an error-quadric
/// decimator, but deterministic and dependable at terrain scale.
pub struct ClusterDecimator {
    pub max_iterations: u32,
}

impl Default for ClusterDecimator {
    fn default() -> Self {
        Self { max_iterations: 12 }
    }
}

impl Decimator for ClusterDecimator {
    fn decimate(&self, mut mesh: TriangleMesh, target_faces: usize) -> Result<TriangleMesh> {
        if mesh.triangles.len() <= target_faces {
            return Ok(mesh);
        }
        if target_faces == 0 {
            return Err(SceneError::InvalidArg(
                "decimation target must be at least one face".into(),
            ));
        }

        let had_normals = mesh.has_normals();
        let diagonal = mesh.bounds().diagonal().max(1e-3);

        // First guess: uniform clusters sized so the surviving vertex count
        // roughly matches the target face budget
        let ratio = (target_faces as f32 / mesh.triangles.len() as f32).sqrt();
        let mut cell = (diagonal / (mesh.triangles.len() as f32).sqrt()) / ratio.max(1e-3);

        for _ in 0..self.max_iterations {
            mesh.merge_by_distance(cell);
            mesh.remove_degenerate();
            mesh.remove_unused();
            debug!(
                "decimate: cell {cell:.4} -> {} faces (target {target_faces})",
                mesh.triangles.len()
            );

            if mesh.triangles.is_empty() {
                return Err(SceneError::EmptyAfterDecimate);
            }
            if mesh.triangles.len() <= target_faces {
                if had_normals {
                    mesh.bake_normals_smooth();
                }
                return Ok(mesh);
            }
            cell *= 1.6;
        }

        Err(SceneError::EmptyAfterDecimate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::organized::OrganizedMesh;
    use glam::vec3;

    fn lattice(n: usize) -> TriangleMesh {
        let mut mesh = OrganizedMesh::from_lattice(
            n,
            n,
            |row, col| Some(vec3(col as f32, row as f32, 0.0)),
            true,
        )
        .into_mesh();
        mesh.bake_normals_smooth();
        mesh
    }

    #[test]
    fn test_pass_through_under_target() {
        let mesh = lattice(8);
        let faces = mesh.triangles.len();
        let positions = mesh.positions.clone();

        let result = ClusterDecimator::default()
            .decimate(mesh, faces)
            .expect("pass-through");
        assert_eq!(faces, result.triangles.len(), "already under target: no-op");
        assert_eq!(positions, result.positions, "no-op leaves vertices untouched");
    }

    #[test]
    fn test_reduces_to_target() {
        let mesh = lattice(20);
        let before = mesh.triangles.len();

        let result = ClusterDecimator::default()
            .decimate(mesh, 60)
            .expect("decimation succeeds");
        assert!(
            result.triangles.len() <= 60,
            "reduced from {before} to {} faces",
            result.triangles.len()
        );
        assert!(!result.triangles.is_empty());
        assert_eq!(
            result.count_vertices(),
            result.normals.len(),
            "normals preserved through decimation"
        );
        for n in result.normals.iter() {
            assert!((n.length() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_zero_target_rejected() {
        let result = ClusterDecimator::default().decimate(lattice(4), 0);
        assert!(matches!(result, Err(SceneError::InvalidArg(_))));
    }
}
