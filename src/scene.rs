use crate::atlas::{AtlasParams, atlas_scene};
use crate::blend::{BlendParams, blend_and_join};
use crate::cloud::builder::{BuildOptions, build_point_clouds};
use crate::cloud::combine::{CombineParams, clever_combine};
use crate::cloud::wedge::{Wedge, WedgeId};
use crate::decimate::{ClusterDecimator, Decimator};
use crate::error::{Result, SceneError};
use crate::math::bounding_box::BoundingBox;
use crate::mesh::mask::ClipMode;
use crate::mesh::trimesh::{TriangleMesh, TriangleOperations};
use crate::orbital::dem::Dem;
use crate::orbital::fill::{FillParams, orbital_fill_cloud};
use crate::recon::driver::ReconstructionDriver;
use crate::recon::hull::build_surface_hull;
use crate::recon::params::ReconstructionParameters;
use crate::recon::shrinkwrap::{ShrinkwrapParams, build_lenient_mask};
use crate::recon::solver::{
    FieldReconstructor, ImplicitReconstructor, SampleScaleReconstructor, ScaleFieldReconstructor,
    trim_by_density,
};
use glam::{Vec2, Vec3, Vec4};
use log::{info, warn};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Top-level options mirroring the external CLI surface. Extents are full
/// widths of origin-centered squares, meters.
#[derive(Clone, Debug)]
pub struct SceneOptions {
    /// Overall scene width.
    pub extent: f32,
    /// Width of the reconstructed-surface region.
    pub surface_extent: f32,
    pub auto_expand_surface_extent: bool,
    pub max_auto_surface_extent: f32,
    /// Persist the expanded (rather than configured) surface extent on the
    /// output record for downstream tiling.
    pub use_expanded_surface_extent_for_tiling: bool,
    pub no_surface: bool,
    pub no_orbital: bool,
    pub orbital_blend_radius: f32,
    pub orbital_sew_radius: f32,
    pub orbital_blend_min: f32,
    pub orbital_blend_ppp: f32,
    /// DEM subsampling for the periphery lattice, pixels per sample.
    pub orbital_subsample: usize,
    /// Pixel padding added around the surface footprint when cutting the
    /// periphery, meters.
    pub orbital_fill_padding: f32,
    pub orbital_fill: FillParams,
    pub build: BuildOptions,
    /// `None` disables clever-combine; clouds concatenate unfiltered.
    pub combine: Option<CombineParams>,
    /// Group wedge clouds per sitedrive rather than per wedge.
    pub group_by_sitedrive: bool,
    pub recon: ReconstructionParameters,
    pub shrinkwrap: ShrinkwrapParams,
    pub target_surface_mesh_faces: usize,
    pub target_scene_mesh_faces: usize,
    /// Cut the final mesh down to the observed frustums.
    pub filter_triangles: bool,
    pub generate_uvs: bool,
    pub atlas: AtlasParams,
    /// Local-level down direction.
    pub nadir: Vec3,
    pub variant: String,
}

impl Default for SceneOptions {
    fn default() -> Self {
        Self {
            extent: 256.0,
            surface_extent: 64.0,
            auto_expand_surface_extent: true,
            max_auto_surface_extent: 256.0,
            use_expanded_surface_extent_for_tiling: false,
            no_surface: false,
            no_orbital: false,
            orbital_blend_radius: 4.0,
            orbital_sew_radius: 0.05,
            orbital_blend_min: 0.05,
            orbital_blend_ppp: 1.0,
            orbital_subsample: 1,
            orbital_fill_padding: 0.0,
            orbital_fill: FillParams {
                points_per_meter: 0.0,
                ..Default::default()
            },
            build: BuildOptions::default(),
            combine: Some(CombineParams::default()),
            group_by_sitedrive: true,
            recon: ReconstructionParameters::default(),
            shrinkwrap: ShrinkwrapParams::default(),
            target_surface_mesh_faces: 1_500_000,
            target_scene_mesh_faces: 2_000_000,
            filter_triangles: false,
            generate_uvs: false,
            atlas: AtlasParams::default(),
            nadir: Vec3::NEG_Z,
            variant: "scene".to_string(),
        }
    }
}

/// A convex viewing volume from alignment, as inward-facing half-spaces:
/// a point is inside when `n . p + d <= 0` for every plane.
#[derive(Clone, Debug)]
pub struct Frustum {
    pub planes: Vec<Vec4>,
}

impl Frustum {
    /// An axis-aligned box as a degenerate frustum hull.
    pub fn from_box(bounds: BoundingBox) -> Self {
        let planes = vec![
            Vec4::new(1.0, 0.0, 0.0, -bounds.maximum.x),
            Vec4::new(-1.0, 0.0, 0.0, bounds.minimum.x),
            Vec4::new(0.0, 1.0, 0.0, -bounds.maximum.y),
            Vec4::new(0.0, -1.0, 0.0, bounds.minimum.y),
            Vec4::new(0.0, 0.0, 1.0, -bounds.maximum.z),
            Vec4::new(0.0, 0.0, -1.0, bounds.minimum.z),
        ];
        Self { planes }
    }

    pub fn contains(&self, p: Vec3) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.x * p.x + plane.y * p.y + plane.z * p.z + plane.w <= 1e-6)
    }
}

/// Everything the core consumes for one run. Alignment, ingest and frame
/// resolution have already happened upstream.
pub struct SceneInputs {
    pub wedges: Vec<Wedge>,
    pub dem: Option<Dem>,
    /// Viewing frustums for the optional observation reduction.
    pub frustums: Vec<Frustum>,
}

/// The persisted result of a run.
pub struct SceneMeshRecord {
    pub variant: String,
    pub bounding_box: BoundingBox,
    /// Surface extent recorded for tiling; the configured value unless
    /// `use_expanded_surface_extent_for_tiling` is set.
    pub surface_extent: f32,
    pub mesh: TriangleMesh,
}

/// Sequences the whole run. Single-threaded phase order; the three parallel
/// sections (wedge clouds, blender passes) live inside their components.
pub struct SceneBuilder {
    pub options: SceneOptions,
    implicit: Box<dyn ImplicitReconstructor>,
    sample_scale: Box<dyn SampleScaleReconstructor>,
    decimator: Box<dyn Decimator>,
    abort: Arc<AtomicBool>,
    /// Persistent temp location for failed-solver inputs.
    pub preserve_inputs_to: Option<PathBuf>,
    debug_sink: Option<Box<dyn FnMut(&str, &TriangleMesh) + Send>>,
    debug_counter: u32,
}

impl SceneBuilder {
    pub fn new(options: SceneOptions) -> Self {
        let sample_scale = ScaleFieldReconstructor::new(options.recon.clone());
        Self {
            options,
            implicit: Box::new(FieldReconstructor),
            sample_scale: Box::new(sample_scale),
            decimator: Box::new(ClusterDecimator::default()),
            abort: Arc::new(AtomicBool::new(false)),
            preserve_inputs_to: None,
            debug_sink: None,
            debug_counter: 0,
        }
    }

    pub fn with_implicit(mut self, solver: Box<dyn ImplicitReconstructor>) -> Self {
        self.implicit = solver;
        self
    }

    pub fn with_sample_scale(mut self, solver: Box<dyn SampleScaleReconstructor>) -> Self {
        self.sample_scale = solver;
        self
    }

    pub fn with_decimator(mut self, decimator: Box<dyn Decimator>) -> Self {
        self.decimator = decimator;
        self
    }

    /// Receives every intermediate mesh with a monotonic numeric prefix,
    /// for offline inspection.
    pub fn with_debug_sink(
        mut self,
        sink: Box<dyn FnMut(&str, &TriangleMesh) + Send>,
    ) -> Self {
        self.debug_sink = Some(sink);
        self
    }

    /// Shared cancellation flag, checked between phases.
    pub fn abort_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    fn check_abort(&self) -> Result<()> {
        if self.abort.load(Ordering::Relaxed) {
            return Err(SceneError::Aborted);
        }
        Ok(())
    }

    fn emit_debug(&mut self, name: &str, mesh: &TriangleMesh) {
        if let Some(sink) = &mut self.debug_sink {
            let label = format!("{:02}-{name}", self.debug_counter);
            self.debug_counter += 1;
            sink(&label, mesh);
        }
    }

    /// Runs the full pipeline and returns the scene mesh record.
    pub fn build(&mut self, inputs: SceneInputs) -> Result<SceneMeshRecord> {
        self.validate(&inputs)?;

        let mut surface_extent = self.options.surface_extent;
        let mut surface: Option<SurfaceResult> = None;
        if !self.options.no_surface {
            let result = self.build_surface(&inputs)?;
            surface_extent = result.surface_extent;
            surface = Some(result);
        }
        self.check_abort()?;

        let periphery = if self.options.no_orbital {
            None
        } else {
            self.build_periphery(&inputs, surface.as_ref(), surface_extent)
        };
        self.check_abort()?;

        let has_periphery = periphery.is_some();
        let mut mesh = match (surface, periphery) {
            (Some(surface), Some(periphery)) => {
                let dem_mpp = inputs
                    .dem
                    .as_ref()
                    .map(|dem| dem.meters_per_pixel)
                    .unwrap_or(1.0);
                let params = BlendParams {
                    blend_radius: self.options.orbital_blend_radius,
                    sew_radius: self.options.orbital_sew_radius,
                    surface_extent,
                    orbital_mpp: dem_mpp,
                    blend_ppp: self.options.orbital_blend_ppp,
                    blend_min: self.options.orbital_blend_min,
                };
                blend_and_join(surface.mesh, periphery, &params)
            }
            (Some(surface), None) => surface.mesh,
            (None, Some(mut periphery)) => {
                periphery.clean();
                periphery.bake_normals_smooth();
                periphery
            }
            (None, None) => return Err(SceneError::NoInput),
        };
        self.emit_debug("blended", &mesh);
        self.check_abort()?;

        // Finish: decimate, observation cut, atlas
        mesh = self
            .decimator
            .decimate(mesh, self.options.target_scene_mesh_faces)?;

        if self.options.filter_triangles && !inputs.frustums.is_empty() {
            mesh = reduce_to_observations(mesh, &inputs.frustums);
            if mesh.triangles.is_empty() {
                return Err(SceneError::EmptyAfterClip);
            }
            self.emit_debug("observation-cut", &mesh);
        }

        mesh.clean();
        if mesh.triangles.is_empty() {
            return Err(SceneError::EmptyAfterClean);
        }

        if self.options.generate_uvs {
            let central_extent = surface_extent + 2.0 * self.options.orbital_blend_radius;
            mesh = atlas_scene(
                mesh,
                self.options.extent,
                central_extent,
                has_periphery,
                &self.options.atlas,
            )?;
        }
        self.emit_debug("final", &mesh);

        let bounding_box = mesh.bounds();
        info!(
            "scene mesh: {} vertices, {} faces, bounds {:?} .. {:?}",
            mesh.count_vertices(),
            mesh.triangles.len(),
            bounding_box.minimum,
            bounding_box.maximum
        );

        let recorded_extent = if self.options.use_expanded_surface_extent_for_tiling {
            surface_extent
        } else {
            self.options.surface_extent
        };
        Ok(SceneMeshRecord {
            variant: self.options.variant.clone(),
            bounding_box,
            surface_extent: recorded_extent,
            mesh,
        })
    }

    fn validate(&self, inputs: &SceneInputs) -> Result<()> {
        let options = &self.options;
        if options.extent <= 0.0 || options.surface_extent <= 0.0 {
            return Err(SceneError::InvalidArg("extents must be positive".into()));
        }
        if options.no_surface && options.no_orbital {
            return Err(SceneError::InvalidArg(
                "both surface and orbital are disabled".into(),
            ));
        }
        if !options.no_surface
            && !options.no_orbital
            && options.surface_extent > options.extent
        {
            return Err(SceneError::InvalidArg(format!(
                "surface extent {} exceeds extent {}",
                options.surface_extent, options.extent
            )));
        }
        if options.no_surface && inputs.dem.is_none() {
            return Err(SceneError::NoInput);
        }
        options.build.validate()?;
        options.recon.validate()
    }

    /// The surface path: wedges through clouds, combine, reconstruction,
    /// trims, clip and clean.
    fn build_surface(&mut self, inputs: &SceneInputs) -> Result<SurfaceResult> {
        let options = self.options.clone();

        // Phase: per-wedge clouds (parallel inside)
        let mut clouds = build_point_clouds(&inputs.wedges, &options.build, Vec2::ZERO)?;
        self.check_abort()?;

        let points_bounds = clouds
            .values()
            .map(TriangleMesh::bounds)
            .reduce(|a, b| a.join(&b))
            .unwrap_or_default();
        let surface_extent = expanded_surface_extent(&points_bounds, &options);
        if surface_extent > options.surface_extent {
            info!(
                "auto-expanded surface extent {} -> {surface_extent}",
                options.surface_extent
            );
        }

        let hull = {
            let all_points: Vec<Vec3> = clouds
                .values()
                .flat_map(|cloud| cloud.positions.iter().copied())
                .collect();
            build_surface_hull(&all_points, surface_extent, Vec2::ZERO).ok_or_else(|| {
                SceneError::ReconstructionFailed("surface hull construction failed".into())
            })?
        };
        self.check_abort()?;

        // Group per sitedrive or per wedge, with clever-combine origins
        let origins: BTreeMap<WedgeId, Vec3> = inputs
            .wedges
            .iter()
            .map(|wedge| (wedge.id.clone(), wedge.origin()))
            .collect();
        let mut groups = group_clouds(&mut clouds, &origins, options.group_by_sitedrive);
        drop(clouds); // per-wedge clouds are dead weight from here on

        // Orbital fill: point cloud of last resort under the surface extent
        let mut used_orbital_fill = false;
        if !options.no_orbital
            && options.orbital_fill.points_per_meter > 0.0
            && let Some(dem) = &inputs.dem
        {
            let surface_union = {
                let mut union = TriangleMesh::default();
                for (cloud, _) in groups.iter() {
                    union.positions.extend_from_slice(&cloud.positions);
                }
                union
            };
            let fill = orbital_fill_cloud(
                dem,
                surface_extent,
                Vec2::ZERO,
                &options.orbital_fill,
                Some(&surface_union),
            );
            if fill.count_vertices() > 0 {
                used_orbital_fill = true;
                // Rank far below every rover-range sample during combine
                groups.push((fill, Vec3::new(0.0, 0.0, 1e6)));
            }
        }
        self.check_abort()?;

        let mut combined = match &options.combine {
            Some(params) => clever_combine(&groups, params),
            None => {
                let mut all = TriangleMesh::default();
                for (cloud, _) in groups {
                    all.join(cloud);
                }
                all
            }
        };
        combined.retain_finite();
        if combined.count_vertices() == 0 {
            return Err(SceneError::NoInput);
        }
        self.emit_debug("combined-cloud", &combined);
        self.check_abort()?;

        let driver = ReconstructionDriver {
            implicit: self.implicit.as_ref(),
            sample_scale: self.sample_scale.as_ref(),
            preserve_inputs_to: self.preserve_inputs_to.clone(),
        };
        let output = driver.reconstruct(&combined, &options.recon)?;
        drop(combined);
        let mut mesh = output.mesh;
        let untrimmed = output.untrimmed;
        self.emit_debug("reconstructed", &mesh);
        self.check_abort()?;

        // Strict hull trim
        hull.clip_mesh(&mut mesh, ClipMode::Strict);
        if mesh.triangles.is_empty() {
            return Err(SceneError::EmptyAfterClip);
        }
        self.emit_debug("hull-trimmed", &mesh);

        mesh = self
            .decimator
            .decimate(mesh, options.target_surface_mesh_faces)?;
        self.check_abort()?;

        // Lenient re-trim instead of orbital hole-fill
        if !used_orbital_fill
            && options.recon.trimmer_level_lenient < options.recon.trimmer_level
            && let Some(untrimmed) = &untrimmed
        {
            match build_lenient_mask(&mesh, &options.shrinkwrap, options.nadir) {
                Ok(mask) => {
                    let mut retrimmed =
                        trim_by_density(untrimmed, options.recon.trimmer_level_lenient);
                    mask.clip_mesh(&mut retrimmed, ClipMode::Lenient);
                    if retrimmed.triangles.is_empty() {
                        warn!("lenient re-trim emptied the mesh, keeping strict trim");
                    } else {
                        mesh = retrimmed;
                        self.emit_debug("lenient-retrimmed", &mesh);
                    }
                }
                // Mask failure is non-fatal: the strict hull trim stands
                Err(err) => warn!("lenient re-trim mask failed: {err}"),
            }
        }
        self.check_abort()?;

        self.clip_surface_mesh(&mut mesh, &points_bounds, surface_extent)?;
        if options.no_orbital {
            // The driver historically clips twice on the orbital-less path;
            // the call is idempotent, so keep it
            self.clip_surface_mesh(&mut mesh, &points_bounds, surface_extent)?;
        }

        mesh.bake_normals_smooth();
        self.emit_debug("surface", &mesh);

        Ok(SurfaceResult {
            mesh,
            surface_extent,
        })
    }

    /// Clips to the observation bounds and the surface-extent square, then
    /// cleans and culls islands.
    fn clip_surface_mesh(
        &self,
        mesh: &mut TriangleMesh,
        points_bounds: &BoundingBox,
        surface_extent: f32,
    ) -> Result<()> {
        mesh.clip_to_xy(*points_bounds);
        mesh.clip_to_xy(BoundingBox::square_xy(
            Vec2::ZERO,
            surface_extent,
            f32::MIN,
            f32::MAX,
        ));
        if mesh.triangles.is_empty() {
            return Err(SceneError::EmptyAfterClip);
        }

        mesh.clean();
        mesh.remove_islands(self.options.recon.min_island_ratio);
        if mesh.triangles.is_empty() {
            return Err(SceneError::EmptyAfterClean);
        }
        Ok(())
    }

    /// Builds the organized periphery mesh with the surface footprint cut out.
    fn build_periphery(
        &mut self,
        inputs: &SceneInputs,
        surface: Option<&SurfaceResult>,
        surface_extent: f32,
    ) -> Option<TriangleMesh> {
        let dem = inputs.dem.as_ref()?;
        if self.options.extent <= surface_extent && surface.is_some() {
            return None;
        }

        let outer = dem.subrect_pixels(self.options.extent * 0.5, Vec2::ZERO);
        let inner = surface.map(|surface| {
            let bounds = surface.mesh.bounds();
            let padding = self.options.orbital_fill_padding;
            let min_px = dem.px_of_xy(Vec2::new(
                bounds.minimum.x - padding,
                bounds.minimum.y - padding,
            ));
            let max_px = dem.px_of_xy(Vec2::new(
                bounds.maximum.x + padding,
                bounds.maximum.y + padding,
            ));
            crate::orbital::dem::Subrect {
                min_x: min_px.x.floor() as i32,
                min_y: min_px.y.floor() as i32,
                max_x: max_px.x.ceil() as i32,
                max_y: max_px.y.ceil() as i32,
            }
        });

        // A cut window at least as large as the orbital footprint leaves
        // nothing to build
        if let Some(cut) = inner
            && cut.width() >= outer.width()
            && cut.height() >= outer.height()
        {
            info!("surface footprint covers the orbital radius, periphery disabled");
            return None;
        }

        let organized = dem.organized_mesh(outer, inner, self.options.orbital_subsample, true, true);
        let mesh = organized.into_mesh();
        if mesh.triangles.is_empty() {
            return None;
        }
        self.emit_debug("periphery", &mesh);
        Some(mesh)
    }
}

struct SurfaceResult {
    mesh: TriangleMesh,
    surface_extent: f32,
}

/// Grows the configured surface extent to cover every kept point, bounded
/// by the auto-expansion cap and the outer extent.
fn expanded_surface_extent(points_bounds: &BoundingBox, options: &SceneOptions) -> f32 {
    if !options.auto_expand_surface_extent || points_bounds.zero() {
        return options.surface_extent;
    }

    let reach = points_bounds
        .minimum
        .x
        .abs()
        .max(points_bounds.maximum.x.abs())
        .max(points_bounds.minimum.y.abs())
        .max(points_bounds.maximum.y.abs());
    let needed = (2.0 * reach).ceil();
    needed
        .min(options.max_auto_surface_extent)
        .min(options.extent)
        .max(options.surface_extent)
}

/// Folds per-wedge clouds into combine groups: one per sitedrive (clouds
/// joined, origins averaged) or one per wedge.
fn group_clouds(
    clouds: &mut BTreeMap<WedgeId, TriangleMesh>,
    origins: &BTreeMap<WedgeId, Vec3>,
    by_sitedrive: bool,
) -> Vec<(TriangleMesh, Vec3)> {
    let mut groups: Vec<(TriangleMesh, Vec3)> = Vec::new();

    if !by_sitedrive {
        for (id, cloud) in std::mem::take(clouds) {
            let origin = origins.get(&id).copied().unwrap_or_default();
            groups.push((cloud, origin));
        }
        return groups;
    }

    let mut current: Option<(String, TriangleMesh, Vec3, usize)> = None;
    for (id, cloud) in std::mem::take(clouds) {
        let origin = origins.get(&id).copied().unwrap_or_default();
        match &mut current {
            Some((sitedrive, merged, origin_sum, count)) if *sitedrive == id.sitedrive => {
                merged.join(cloud);
                *origin_sum += origin;
                *count += 1;
            }
            _ => {
                if let Some((_, merged, origin_sum, count)) = current.take() {
                    groups.push((merged, origin_sum / count as f32));
                }
                current = Some((id.sitedrive.clone(), cloud, origin, 1));
            }
        }
    }
    if let Some((_, merged, origin_sum, count)) = current.take() {
        groups.push((merged, origin_sum / count as f32));
    }
    groups
}

/// Keeps only faces that touch at least one viewing frustum.
fn reduce_to_observations(mut mesh: TriangleMesh, frustums: &[Frustum]) -> TriangleMesh {
    let positions = &mesh.positions;
    mesh.triangles.retain(|tri| {
        let centroid = tri.centerpoint(positions);
        frustums.iter().any(|frustum| {
            frustum.contains(positions[tri[0]])
                || frustum.contains(positions[tri[1]])
                || frustum.contains(positions[tri[2]])
                || frustum.contains(centroid)
        })
    });
    mesh.remove_unused();
    mesh
}
