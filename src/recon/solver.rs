use crate::error::{Result, SceneError};
use crate::math::bounding_box::BoundingBox;
use crate::mesh::trimesh::{TriangleMesh, TriangleOperations};
use crate::recon::params::ReconstructionParameters;
use fast_surface_nets::{SurfaceNetsBuffer, ndshape::ConstShape, surface_nets};
use glam::{Vec2, Vec3};
use log::debug;
use ndshape::ConstShape3u32;
use rayon::prelude::*;

/// Result of an implicit reconstruction.
///
/// The driver clips and island-culls `mesh` before running the density trim,
/// so solvers hand back their raw surface.
pub struct ReconstructionOutput {
    /// The solver's surface. For the built-in solver, per-vertex normal
    /// LENGTH encodes the estimated local sample density.
    pub mesh: TriangleMesh,
    /// The pre-trim surface retained for the lenient re-trim path, with the
    /// same density encoding.
    pub untrimmed: Option<TriangleMesh>,
}

/// Implicit-field reconstruction seam. The driver only depends on this
/// contract, so an external Poisson binary can stand in for the built-in
/// solver.
pub trait ImplicitReconstructor: Sync {
    fn reconstruct(
        &self,
        cloud: &TriangleMesh,
        params: &ReconstructionParameters,
    ) -> Result<ReconstructionOutput>;
}

/// Sample-scale reconstruction seam: points contribute at their own scale
/// (normal magnitude) or at one global scale. The callback receives the
/// uncleaned intermediate mesh.
pub trait SampleScaleReconstructor: Sync {
    fn reconstruct(
        &self,
        cloud: &TriangleMesh,
        global_scale: Option<f32>,
        intermediate: &mut dyn FnMut(&TriangleMesh),
    ) -> Result<TriangleMesh>;
}

const CHUNK_CELLS: usize = 48;
const CHUNK_STRIDE: usize = CHUNK_CELLS - 2;
type ChunkShape = ConstShape3u32<48, 48, 48>;

/// Slopes steeper than this (|normal.z| below the cutoff) cannot come from
/// terrain in a column field; they are skirts at the data boundary.
const SKIRT_NORMAL_Z: f32 = 0.05;

/// The built-in implicit reconstructor.
///
/// Splats confidence-weighted oriented samples into a per-column
/// moving-least-squares height estimate, evaluates the signed field
/// `z - h(x, y)` over a voxel grid, and extracts the zero surface with
/// surface nets, chunk by chunk. Being column-based it cannot represent
/// overhangs; near-vertical faces are treated as boundary skirts and
/// dropped.
#[derive(Default)]
pub struct FieldReconstructor;

impl ImplicitReconstructor for FieldReconstructor {
    fn reconstruct(
        &self,
        cloud: &TriangleMesh,
        params: &ReconstructionParameters,
    ) -> Result<ReconstructionOutput> {
        params.validate()?;
        let field = ColumnField::splat_fixed(cloud, params)?;
        let untrimmed = field.extract()?;

        Ok(ReconstructionOutput {
            mesh: untrimmed.clone(),
            untrimmed: Some(untrimmed),
        })
    }
}

/// The built-in sample-scale reconstructor. Same column field, but each
/// sample's kernel radius comes from its own scale (normal magnitude) or a
/// global override.
pub struct ScaleFieldReconstructor {
    pub params: ReconstructionParameters,
    /// Kernel radius as a multiple of the per-sample scale.
    pub scale_multiplier: f32,
}

impl ScaleFieldReconstructor {
    pub fn new(params: ReconstructionParameters) -> Self {
        Self {
            params,
            scale_multiplier: 2.0,
        }
    }
}

impl SampleScaleReconstructor for ScaleFieldReconstructor {
    fn reconstruct(
        &self,
        cloud: &TriangleMesh,
        global_scale: Option<f32>,
        intermediate: &mut dyn FnMut(&TriangleMesh),
    ) -> Result<TriangleMesh> {
        self.params.validate()?;
        let field =
            ColumnField::splat_scaled(cloud, &self.params, global_scale, self.scale_multiplier)?;
        let mut mesh = field.extract()?;

        intermediate(&mesh);

        mesh.clean();
        if mesh.triangles.is_empty() {
            return Err(SceneError::ReconstructionFailed(
                "sample-scale surface vanished during cleanup".into(),
            ));
        }
        Ok(mesh)
    }
}

/// Re-trims a solver surface at a density cutoff. A face survives only when
/// all three vertices carry at least `level` of local sample density
/// (encoded as normal magnitude).
pub fn trim_by_density(untrimmed: &TriangleMesh, level: f32) -> TriangleMesh {
    let mut mesh = untrimmed.clone();
    let normals = &mesh.normals;
    mesh.triangles.retain(|tri| {
        normals[tri[0]].length() >= level
            && normals[tri[1]].length() >= level
            && normals[tri[2]].length() >= level
    });
    mesh.remove_unused();

    // Trimmed output carries plain unit normals; density stays on the
    // untrimmed copy only
    for n in mesh.normals.iter_mut() {
        *n = n.normalize_or(Vec3::Z);
    }
    mesh
}

/// Confidence-weighted column height/density estimate on the voxel XY grid.
struct ColumnField {
    origin: Vec3,
    cell: f32,
    nx: usize,
    ny: usize,
    nz: usize,
    /// Accumulated sample weight per column; 0 marks an empty column.
    weight: Vec<f32>,
    /// Weighted height estimate per column, finalized to a plain height.
    height: Vec<f32>,
}

impl ColumnField {
    fn domain(cloud: &TriangleMesh, params: &ReconstructionParameters) -> Result<(BoundingBox, f32)> {
        if cloud.count_vertices() == 0 {
            return Err(SceneError::ReconstructionFailed("empty input cloud".into()));
        }
        if !cloud.has_normals() {
            return Err(SceneError::InvalidArg(
                "reconstruction input must carry normals".into(),
            ));
        }

        let mut bounds = cloud.bounds();
        if params.pass_envelope_to_solver
            && let Some(envelope) = params.envelope
        {
            bounds = BoundingBox::new(
                bounds.minimum.max(envelope.minimum),
                bounds.maximum.min(envelope.maximum),
            );
            if bounds.size().cmplt(Vec3::ZERO).any() {
                return Err(SceneError::ReconstructionFailed(
                    "envelope excludes the entire input cloud".into(),
                ));
            }
        }

        let cell = params.cell_width(&bounds);
        Ok((bounds.expand_margin(cell * 2.0), cell))
    }

    fn empty(bounds: BoundingBox, cell: f32) -> Self {
        let size = bounds.size();
        let nx = (size.x / cell).ceil() as usize + 1;
        let ny = (size.y / cell).ceil() as usize + 1;
        let nz = ((size.z / cell).ceil() as usize + 3).max(4);
        Self {
            origin: bounds.minimum,
            cell,
            nx,
            ny,
            nz,
            weight: vec![0.0; nx * ny],
            height: vec![0.0; nx * ny],
        }
    }

    /// Splats every sample with a fixed kernel radius in cells.
    fn splat_fixed(cloud: &TriangleMesh, params: &ReconstructionParameters) -> Result<Self> {
        let (bounds, cell) = Self::domain(cloud, params)?;
        let mut field = Self::empty(bounds, cell);
        let radius = params.bspline_degree.max(1) as f32 * cell;

        for idx in 0..cloud.count_vertices() {
            field.splat_one(
                cloud.positions[idx],
                cloud.normals[idx],
                params.confidence_exponent,
                radius,
            );
        }
        field.finalize(params.min_samples_per_cell);
        Ok(field)
    }

    /// Splats every sample with its own kernel radius.
    fn splat_scaled(
        cloud: &TriangleMesh,
        params: &ReconstructionParameters,
        global_scale: Option<f32>,
        multiplier: f32,
    ) -> Result<Self> {
        let (bounds, cell) = Self::domain(cloud, params)?;
        let mut field = Self::empty(bounds, cell);

        for idx in 0..cloud.count_vertices() {
            let normal = cloud.normals[idx];
            let scale = global_scale.unwrap_or_else(|| normal.length());
            let radius = (scale * multiplier).max(cell);
            field.splat_one(
                cloud.positions[idx],
                normal,
                params.confidence_exponent,
                radius,
            );
        }
        field.finalize(params.min_samples_per_cell);
        Ok(field)
    }

    fn splat_one(&mut self, p: Vec3, normal: Vec3, confidence_exponent: f32, radius: f32) {
        let confidence = normal.length();
        if confidence <= 0.0 || !p.is_finite() {
            return;
        }
        let unit = normal / confidence;
        let conf_weight = if confidence_exponent == 0.0 {
            1.0
        } else {
            confidence.powf(confidence_exponent)
        };

        let reach = (radius / self.cell).ceil() as isize;
        let cx = ((p.x - self.origin.x) / self.cell).round() as isize;
        let cy = ((p.y - self.origin.y) / self.cell).round() as isize;

        for dy in -reach..=reach {
            for dx in -reach..=reach {
                let gx = cx + dx;
                let gy = cy + dy;
                if gx < 0 || gy < 0 || gx as usize >= self.nx || gy as usize >= self.ny {
                    continue;
                }
                let col_x = self.origin.x + gx as f32 * self.cell;
                let col_y = self.origin.y + gy as f32 * self.cell;
                let d = Vec2::new(col_x - p.x, col_y - p.y).length();
                if d > radius {
                    continue;
                }

                // Project the sample plane to the column center along Z;
                // near-horizontal normals cannot be projected and fall back
                // to the raw sample height.
                let h = if unit.z.abs() > 0.2 {
                    p.z - ((col_x - p.x) * unit.x + (col_y - p.y) * unit.y) / unit.z
                } else {
                    p.z
                };

                let t = 1.0 - d / radius;
                let w = conf_weight * t * t;
                let idx = gy as usize * self.nx + gx as usize;
                self.weight[idx] += w;
                self.height[idx] += h * w;
            }
        }
    }

    fn finalize(&mut self, min_weight: f32) {
        let floor = min_weight.max(1e-6);
        for idx in 0..self.weight.len() {
            if self.weight[idx] >= floor {
                self.height[idx] /= self.weight[idx];
            } else {
                self.weight[idx] = 0.0;
                self.height[idx] = f32::NAN;
            }
        }
    }

    fn column_height(&self, gx: usize, gy: usize) -> f32 {
        self.height[gy * self.nx + gx]
    }

    /// Bilinear sample density at a world XY; empty columns weigh zero.
    fn density_at(&self, xy: Vec2) -> f32 {
        let fx = ((xy.x - self.origin.x) / self.cell).clamp(0.0, (self.nx - 1) as f32);
        let fy = ((xy.y - self.origin.y) / self.cell).clamp(0.0, (self.ny - 1) as f32);
        let x0 = (fx.floor() as usize).min(self.nx - 2);
        let y0 = (fy.floor() as usize).min(self.ny - 2);
        let tx = fx - x0 as f32;
        let ty = fy - y0 as f32;

        let w = |x: usize, y: usize| self.weight[y * self.nx + x];
        let top = w(x0, y0) * (1.0 - tx) + w(x0 + 1, y0) * tx;
        let bottom = w(x0, y0 + 1) * (1.0 - tx) + w(x0 + 1, y0 + 1) * tx;
        top * (1.0 - ty) + bottom * ty
    }

    /// Signed field at voxel coordinates: height above the column surface,
    /// or far-outside for empty columns.
    fn field(&self, gx: usize, gy: usize, gz: usize) -> f32 {
        let far = self.cell * 10.0;
        if gx >= self.nx || gy >= self.ny {
            return far;
        }
        let h = self.column_height(gx, gy);
        if !h.is_finite() {
            return far;
        }
        let z = self.origin.z + gz as f32 * self.cell;
        (z - h).clamp(-far, far)
    }

    /// Runs surface nets over the field in fixed-size chunks (two-cell
    /// overlap so seams line up exactly), joins the chunk meshes, and
    /// encodes per-vertex density into the normal magnitude.
    fn extract(&self) -> Result<TriangleMesh> {
        let grids_x = self.nx.div_ceil(CHUNK_STRIDE);
        let grids_y = self.ny.div_ceil(CHUNK_STRIDE);
        let grids_z = self.nz.div_ceil(CHUNK_STRIDE);

        let mut chunk_offsets: Vec<[usize; 3]> = Vec::with_capacity(grids_x * grids_y * grids_z);
        for gz in 0..grids_z {
            for gy in 0..grids_y {
                for gx in 0..grids_x {
                    chunk_offsets.push([gx * CHUNK_STRIDE, gy * CHUNK_STRIDE, gz * CHUNK_STRIDE]);
                }
            }
        }

        let meshes: Vec<Option<TriangleMesh>> = chunk_offsets
            .par_iter()
            .map(|offset| self.extract_chunk(*offset))
            .collect();

        let mut mesh = TriangleMesh::default();
        for chunk in meshes.into_iter().flatten() {
            mesh.join(chunk);
        }
        if mesh.triangles.is_empty() {
            return Err(SceneError::ReconstructionFailed(
                "surface extraction produced no faces".into(),
            ));
        }

        // Chunk overlap duplicates seam vertices; a tiny merge stitches
        // them back together
        mesh.merge_by_distance(self.cell * 1e-3);
        mesh.remove_degenerate();
        mesh.remove_unused();

        // Column fields cannot express vertical geometry: anything that
        // steep is a skirt at the data boundary
        let positions = &mesh.positions;
        mesh.triangles
            .retain(|tri| tri.normal(positions).z.abs() > SKIRT_NORMAL_Z);
        mesh.remove_unused();
        if mesh.triangles.is_empty() {
            return Err(SceneError::ReconstructionFailed(
                "only boundary skirts were extracted".into(),
            ));
        }

        // Density rides on the normal magnitude of the untrimmed surface
        let mut normals = mesh.get_normals_smooth();
        for (idx, n) in normals.iter_mut().enumerate() {
            let p = mesh.positions[idx];
            *n *= self.density_at(Vec2::new(p.x, p.y)).max(1e-4);
        }
        mesh.normals = normals;

        debug!(
            "field extraction: {} vertices, {} faces over {}x{}x{} cells",
            mesh.count_vertices(),
            mesh.triangles.len(),
            self.nx,
            self.ny,
            self.nz
        );
        Ok(mesh)
    }

    fn extract_chunk(&self, offset: [usize; 3]) -> Option<TriangleMesh> {
        let mut grid = vec![0.0f32; ChunkShape::USIZE];
        for (i, value) in grid.iter_mut().enumerate() {
            let [lx, ly, lz] = ChunkShape::delinearize(i as u32);
            *value = self.field(
                offset[0] + lx as usize,
                offset[1] + ly as usize,
                offset[2] + lz as usize,
            );
        }

        let mut buffer = SurfaceNetsBuffer::default();
        surface_nets(
            &grid,
            &ChunkShape {},
            [0; 3],
            [(CHUNK_CELLS - 1) as u32; 3],
            &mut buffer,
        );
        if buffer.indices.is_empty() {
            return None;
        }

        let translation = self.origin
            + Vec3::new(offset[0] as f32, offset[1] as f32, offset[2] as f32) * self.cell;
        let indices = buffer.indices.iter().map(|idx| *idx as usize).collect();
        let positions = buffer
            .positions
            .iter()
            .map(|p| Vec3::from_array(*p) * self.cell + translation)
            .collect::<Vec<Vec3>>();
        let normals = buffer
            .normals
            .iter()
            .map(|n| Vec3::from_array(*n).normalize_or(Vec3::Z))
            .collect::<Vec<Vec3>>();

        let mut mesh = TriangleMesh::from_indices(indices, positions, Some(normals));

        // Make winding agree with the gradient normals so downstream CCW
        // assumptions hold
        let mut agreement = 0.0f32;
        for tri in mesh.triangles.iter() {
            let face = tri.normal(&mesh.positions);
            agreement += face.dot(
                mesh.normals[tri[0]] + mesh.normals[tri[1]] + mesh.normals[tri[2]],
            );
        }
        if agreement < 0.0 {
            for tri in mesh.triangles.iter_mut() {
                *tri = tri.flip();
            }
        }
        Some(mesh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::vec3;

    /// Dense flat patch at the given height.
    fn flat_cloud(extent: f32, spacing: f32, z: f32, confidence: f32) -> TriangleMesh {
        let n = (extent / spacing) as i32;
        let mut positions = vec![];
        for y in -n..=n {
            for x in -n..=n {
                positions.push(vec3(x as f32 * spacing, y as f32 * spacing, z));
            }
        }
        let normals = vec![Vec3::Z * confidence; positions.len()];
        TriangleMesh::cloud(positions, Some(normals))
    }

    fn quick_params() -> ReconstructionParameters {
        ReconstructionParameters {
            min_cell_width: Some(0.25),
            trimmer_level: 0.5,
            trimmer_level_lenient: 0.1,
            ..Default::default()
        }
    }

    #[test]
    fn test_flat_patch_reconstructs_flat() {
        let cloud = flat_cloud(3.0, 0.1, 0.5, 1.0);
        let output = FieldReconstructor
            .reconstruct(&cloud, &quick_params())
            .expect("flat patch reconstructs");

        assert!(!output.mesh.triangles.is_empty());
        let mut interior = 0;
        for p in output.mesh.positions.iter() {
            if p.x.abs() < 2.0 && p.y.abs() < 2.0 {
                interior += 1;
                crate::math::delta::assert_in_delta(
                    0.5,
                    p.z,
                    0.05,
                    "interior surface sits at the sample height",
                );
            }
        }
        assert!(interior > 50, "surface covers the patch interior");
    }

    #[test]
    fn test_untrimmed_encodes_density() {
        let cloud = flat_cloud(3.0, 0.1, 0.0, 1.0);
        let output = FieldReconstructor
            .reconstruct(&cloud, &quick_params())
            .expect("flat patch reconstructs");

        let untrimmed = output.untrimmed.expect("built-in solver keeps the pre-trim mesh");
        let max_density = untrimmed
            .normals
            .iter()
            .map(|n| n.length())
            .fold(0.0f32, f32::max);
        assert!(
            max_density > 1.0,
            "interior density should exceed unit, got {max_density}"
        );
    }

    #[test]
    fn test_empty_cloud_fails() {
        let cloud = TriangleMesh::default();
        let result = FieldReconstructor.reconstruct(&cloud, &quick_params());
        assert!(matches!(result, Err(SceneError::ReconstructionFailed(_))));
    }

    #[test]
    fn test_missing_normals_rejected() {
        let cloud = TriangleMesh::cloud(vec![Vec3::ZERO, Vec3::X, Vec3::Y], None);
        let result = FieldReconstructor.reconstruct(&cloud, &quick_params());
        assert!(matches!(result, Err(SceneError::InvalidArg(_))));
    }

    #[test]
    fn test_trim_by_density_strictness() {
        let mut mesh = TriangleMesh::new(
            vec![[0, 1, 2]],
            vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            Some(vec![Vec3::Z * 2.0, Vec3::Z * 2.0, Vec3::Z * 0.1]),
            None,
        );
        let trimmed = trim_by_density(&mesh, 1.0);
        assert!(
            trimmed.triangles.is_empty(),
            "one low-density vertex kills the face"
        );

        mesh.normals[2] = Vec3::Z * 1.5;
        let trimmed = trim_by_density(&mesh, 1.0);
        assert_eq!(1, trimmed.triangles.len());
        assert!((trimmed.normals[0].length() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_sample_scale_delivers_intermediate() {
        let cloud = flat_cloud(2.0, 0.1, 0.0, 0.2);
        let solver = ScaleFieldReconstructor::new(quick_params());

        let mut saw_intermediate = false;
        let mesh = solver
            .reconstruct(&cloud, Some(0.3), &mut |raw| {
                saw_intermediate = !raw.triangles.is_empty();
            })
            .expect("sample-scale reconstructs");

        assert!(saw_intermediate, "callback received the uncleaned mesh");
        assert!(!mesh.triangles.is_empty());
    }

    #[test]
    fn test_envelope_passed_to_solver_bounds_domain() {
        let cloud = flat_cloud(4.0, 0.1, 0.0, 1.0);
        let params = ReconstructionParameters {
            envelope: Some(BoundingBox::new(
                vec3(-1.0, -1.0, -1.0),
                vec3(1.0, 1.0, 1.0),
            )),
            pass_envelope_to_solver: true,
            ..quick_params()
        };

        let output = FieldReconstructor
            .reconstruct(&cloud, &params)
            .expect("envelope-bounded reconstruction");
        let bounds = output.mesh.bounds();
        assert!(
            bounds.maximum.x < 2.0 && bounds.minimum.x > -2.0,
            "solver domain stays near the envelope"
        );
    }
}
