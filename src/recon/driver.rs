use crate::error::{Result, SceneError};
use crate::mesh::trimesh::TriangleMesh;
use crate::recon::params::{ReconstructionMethod, ReconstructionParameters};
use crate::recon::solver::{
    ImplicitReconstructor, SampleScaleReconstructor, trim_by_density,
};
use glam::Vec3;
use log::{info, warn};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Driver result: the trimmed surface plus the retained pre-trim mesh,
/// which stays alive until the (optional) lenient re-trim has run.
pub struct DriverOutput {
    pub mesh: TriangleMesh,
    pub untrimmed: Option<TriangleMesh>,
}

/// Sequences one reconstruction: solver call, envelope clip, island cull,
/// density trim. On solver failure the inputs are optionally preserved to
/// disk for post-mortem.
pub struct ReconstructionDriver<'a> {
    pub implicit: &'a dyn ImplicitReconstructor,
    pub sample_scale: &'a dyn SampleScaleReconstructor,
    /// Persistent temp location for failed-solver inputs; `None` disables
    /// preservation.
    pub preserve_inputs_to: Option<PathBuf>,
}

impl ReconstructionDriver<'_> {
    pub fn reconstruct(
        &self,
        cloud: &TriangleMesh,
        params: &ReconstructionParameters,
    ) -> Result<DriverOutput> {
        params.validate()?;

        let (mut mesh, untrimmed) = match params.method {
            ReconstructionMethod::Implicit => {
                let output = self
                    .implicit
                    .reconstruct(cloud, params)
                    .inspect_err(|_| self.preserve(cloud))?;
                (output.mesh, output.untrimmed)
            }
            ReconstructionMethod::SampleScale => {
                let mut intermediate: Option<TriangleMesh> = None;
                let mesh = self
                    .sample_scale
                    .reconstruct(cloud, None, &mut |raw| {
                        intermediate = Some(raw.clone());
                    })
                    .inspect_err(|_| self.preserve(cloud))?;
                (mesh, intermediate)
            }
        };

        if mesh.triangles.is_empty() {
            self.preserve(cloud);
            return Err(SceneError::ReconstructionFailed(
                "solver returned an empty mesh".into(),
            ));
        }
        info!(
            "reconstruction: {} vertices, {} faces",
            mesh.count_vertices(),
            mesh.triangles.len()
        );

        if let Some(envelope) = params.envelope {
            mesh.clip_to_box(envelope);
            if mesh.triangles.is_empty() {
                return Err(SceneError::EmptyAfterClip);
            }
        }

        if params.min_island_ratio > 0.0 {
            let removed = mesh.remove_islands(params.min_island_ratio);
            if removed > 0 {
                info!("reconstruction: removed {removed} small islands");
            }
        }

        // Density trim runs last, on the clipped and culled surface
        if mesh.has_normals() {
            let trimmed = trim_by_density(&mesh, params.trimmer_level);
            if trimmed.triangles.is_empty() {
                warn!(
                    "density trim at level {} emptied the mesh; keeping the untrimmed surface",
                    params.trimmer_level
                );
            } else {
                mesh = trimmed;
            }
        }

        Ok(DriverOutput { mesh, untrimmed })
    }

    /// Writes the solver input cloud as an xyz+normal text file for offline
    /// inspection. Best effort: failures are logged, never propagated.
    fn preserve(&self, cloud: &TriangleMesh) {
        let Some(dir) = &self.preserve_inputs_to else {
            return;
        };
        if let Err(err) = write_cloud(dir, cloud) {
            warn!("could not preserve solver inputs to {dir:?}: {err}");
        } else {
            info!("preserved solver inputs to {dir:?}");
        }
    }
}

fn write_cloud(dir: &Path, cloud: &TriangleMesh) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join("reconstruction-input.xyz");
    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    let fallback = Vec3::ZERO;
    for (idx, p) in cloud.positions.iter().enumerate() {
        let n = cloud.normals.get(idx).unwrap_or(&fallback);
        writeln!(
            file,
            "{} {} {} {} {} {}",
            p.x, p.y, p.z, n.x, n.y, n.z
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::bounding_box::BoundingBox;
    use crate::recon::solver::{FieldReconstructor, ReconstructionOutput, ScaleFieldReconstructor};
    use glam::vec3;

    fn flat_cloud(extent: f32, spacing: f32) -> TriangleMesh {
        let n = (extent / spacing) as i32;
        let mut positions = vec![];
        for y in -n..=n {
            for x in -n..=n {
                positions.push(vec3(x as f32 * spacing, y as f32 * spacing, 0.0));
            }
        }
        let count = positions.len();
        TriangleMesh::cloud(positions, Some(vec![Vec3::Z; count]))
    }

    fn quick_params() -> ReconstructionParameters {
        ReconstructionParameters {
            min_cell_width: Some(0.25),
            trimmer_level: 0.5,
            trimmer_level_lenient: 0.1,
            ..Default::default()
        }
    }

    fn driver<'a>(
        implicit: &'a FieldReconstructor,
        sample_scale: &'a ScaleFieldReconstructor,
    ) -> ReconstructionDriver<'a> {
        ReconstructionDriver {
            implicit,
            sample_scale,
            preserve_inputs_to: None,
        }
    }

    #[test]
    fn test_driver_retains_untrimmed() {
        let implicit = FieldReconstructor;
        let sample_scale = ScaleFieldReconstructor::new(quick_params());
        let output = driver(&implicit, &sample_scale)
            .reconstruct(&flat_cloud(3.0, 0.1), &quick_params())
            .expect("flat patch reconstructs");

        assert!(!output.mesh.triangles.is_empty());
        let untrimmed = output.untrimmed.expect("untrimmed retained");
        assert!(
            untrimmed.triangles.len() >= output.mesh.triangles.len(),
            "trim can only remove faces"
        );
        for n in output.mesh.normals.iter() {
            assert!((n.length() - 1.0).abs() < 1e-4, "trimmed mesh has unit normals");
        }
    }

    #[test]
    fn test_envelope_clips_output() {
        let implicit = FieldReconstructor;
        let sample_scale = ScaleFieldReconstructor::new(quick_params());
        let params = ReconstructionParameters {
            envelope: Some(BoundingBox::new(
                vec3(-1.0, -1.0, -5.0),
                vec3(1.0, 1.0, 5.0),
            )),
            ..quick_params()
        };
        let output = driver(&implicit, &sample_scale)
            .reconstruct(&flat_cloud(3.0, 0.1), &params)
            .expect("reconstruction with envelope");

        let bounds = output.mesh.bounds();
        assert!(bounds.maximum.x <= 1.0 + 1e-4);
        assert!(bounds.minimum.y >= -1.0 - 1e-4);
    }

    #[test]
    fn test_sample_scale_path_captures_intermediate() {
        let implicit = FieldReconstructor;
        let sample_scale = ScaleFieldReconstructor::new(quick_params());
        let params = ReconstructionParameters {
            method: ReconstructionMethod::SampleScale,
            ..quick_params()
        };

        let mut cloud = flat_cloud(2.0, 0.1);
        // Point scale in the normal magnitude
        for n in cloud.normals.iter_mut() {
            *n *= 0.2;
        }

        let output = driver(&implicit, &sample_scale)
            .reconstruct(&cloud, &params)
            .expect("sample-scale path runs");
        assert!(output.untrimmed.is_some(), "callback intermediate captured");
    }

    #[test]
    fn test_empty_solver_output_preserves_inputs() {
        struct EmptySolver;
        impl ImplicitReconstructor for EmptySolver {
            fn reconstruct(
                &self,
                _cloud: &TriangleMesh,
                _params: &ReconstructionParameters,
            ) -> crate::error::Result<ReconstructionOutput> {
                Ok(ReconstructionOutput {
                    mesh: TriangleMesh::default(),
                    untrimmed: None,
                })
            }
        }

        let tmp = std::env::temp_dir().join("terramesh-preserve-test");
        let _ = std::fs::remove_dir_all(&tmp);

        let sample_scale = ScaleFieldReconstructor::new(quick_params());
        let driver = ReconstructionDriver {
            implicit: &EmptySolver,
            sample_scale: &sample_scale,
            preserve_inputs_to: Some(tmp.clone()),
        };
        let result = driver.reconstruct(&flat_cloud(1.0, 0.1), &quick_params());

        assert!(matches!(result, Err(SceneError::ReconstructionFailed(_))));
        assert!(
            tmp.join("reconstruction-input.xyz").exists(),
            "inputs preserved for post-mortem"
        );
        let _ = std::fs::remove_dir_all(&tmp);
    }
}
