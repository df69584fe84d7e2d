use crate::cloud::wedge::{StereoEye, Wedge, WedgeId};
use crate::error::{Result, SceneError};
use crate::mesh::trimesh::TriangleMesh;
use glam::{Vec2, Vec3};
use log::{debug, warn};
use rayon::prelude::*;
use std::collections::BTreeMap;

/// In-cloud deduplication distance, meters.
pub const CLOUD_MERGE_EPS: f32 = 0.005;

/// How (and whether) normal magnitude encodes a per-point scalar.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum NormalScale {
    /// Unit normals.
    #[default]
    None,
    /// Length falls linearly from 1 at the near limit to
    /// `linear_confidence_min` at the far limit.
    Confidence,
    /// Length is the local raster sample spacing, feeding the
    /// sample-scale reconstructor.
    PointScale,
}

/// Options for per-wedge point-cloud construction.
#[derive(Clone, Debug)]
pub struct BuildOptions {
    /// Minimum count of valid normal-raster samples in the 8-neighborhood
    /// for a vertex to survive. Range [0, 8]; 0 disables the filter.
    pub normal_filter: u32,
    pub stereo_eye: StereoEye,
    /// Width of an XY pre-clip square around the scene origin, meters.
    /// Zero disables the pre-clip.
    pub pre_clip_extent: f32,
    pub normal_scale: NormalScale,
    /// Confidence floor reached at the far limit. Range [0, 1].
    pub linear_confidence_min: f32,
    /// Subsample oversized rasters down to `max_raster_dim`.
    pub auto_decimate: bool,
    pub max_raster_dim: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            normal_filter: 0,
            stereo_eye: StereoEye::Auto,
            pre_clip_extent: 0.0,
            normal_scale: NormalScale::None,
            linear_confidence_min: 0.1,
            auto_decimate: true,
            max_raster_dim: 1024,
        }
    }
}

impl BuildOptions {
    pub fn validate(&self) -> Result<()> {
        if self.normal_filter > 8 {
            return Err(SceneError::InvalidArg(format!(
                "normal filter must be in [0, 8], got {}",
                self.normal_filter
            )));
        }
        if !(0.0..=1.0).contains(&self.linear_confidence_min) {
            return Err(SceneError::InvalidArg(format!(
                "linear confidence min must be in [0, 1], got {}",
                self.linear_confidence_min
            )));
        }
        Ok(())
    }
}

/// Builds one filtered, deduplicated point cloud per wedge, in the mesh frame.
///
/// Wedges are processed in parallel; per-wedge failures are logged and the
/// wedge skipped. The result map iterates by (sitedrive, wedge name), which
/// is the deterministic snapshot order downstream stages consume.
pub fn build_point_clouds(
    wedges: &[Wedge],
    options: &BuildOptions,
    origin: Vec2,
) -> Result<BTreeMap<WedgeId, TriangleMesh>> {
    options.validate()?;

    let built: Vec<(WedgeId, Result<Option<TriangleMesh>>)> = wedges
        .par_iter()
        .map(|wedge| (wedge.id.clone(), build_wedge_cloud(wedge, options, origin)))
        .collect();

    let mut clouds: BTreeMap<WedgeId, TriangleMesh> = BTreeMap::new();
    for (id, outcome) in built {
        match outcome {
            Ok(Some(cloud)) if cloud.count_vertices() > 0 => {
                debug!("wedge {id}: kept {} points", cloud.count_vertices());
                clouds.insert(id, cloud);
            }
            Ok(Some(_)) => warn!("wedge {id}: zero points kept, skipping"),
            Ok(None) => debug!("wedge {id}: excluded by policy"),
            Err(err) => warn!("wedge {id}: {err}, skipping"),
        }
    }

    if clouds.values().map(TriangleMesh::count_vertices).sum::<usize>() == 0 {
        return Err(SceneError::NoInput);
    }
    Ok(clouds)
}

fn build_wedge_cloud(
    wedge: &Wedge,
    options: &BuildOptions,
    origin: Vec2,
) -> Result<Option<TriangleMesh>> {
    if !wedge.reconstructable {
        return Ok(None);
    }
    if !options.stereo_eye.allows(wedge.eye) {
        return Ok(None);
    }
    let Some(normals) = &wedge.normals else {
        return Err(SceneError::InvalidArg("wedge has no normal raster".into()));
    };
    let Some(transform) = wedge.mesh_from_wedge else {
        return Err(SceneError::InvalidArg("wedge has no alignment transform".into()));
    };

    let points = &wedge.points;
    let dim = points.width.max(points.height);
    let stride = if options.auto_decimate && dim > options.max_raster_dim {
        dim.div_ceil(options.max_raster_dim)
    } else {
        1
    };

    let half_clip = options.pre_clip_extent * 0.5;
    let mut out_positions: Vec<Vec3> = Vec::new();
    let mut out_normals: Vec<Vec3> = Vec::new();

    for row in (0..points.height).step_by(stride) {
        for col in (0..points.width).step_by(stride) {
            if !points.valid(row, col) || !normals.valid(row, col) {
                continue;
            }
            if options.normal_filter > 0
                && normals.valid_neighbors(row, col, stride) < options.normal_filter
            {
                continue;
            }

            let cam_point = points.get(row, col);
            let position = transform.transform_point3(cam_point);
            if half_clip > 0.0
                && ((position.x - origin.x).abs() > half_clip
                    || (position.y - origin.y).abs() > half_clip)
            {
                continue;
            }

            let unit = normals.get(row, col).normalize_or(Vec3::Z);
            let scale = match options.normal_scale {
                NormalScale::None => 1.0,
                NormalScale::Confidence => {
                    confidence(cam_point.length(), wedge, options.linear_confidence_min)
                }
                NormalScale::PointScale => sample_spacing(points, row, col, stride),
            };
            out_positions.push(position);
            out_normals.push(transform.transform_vector3(unit) * scale);
        }
    }

    let mut cloud = TriangleMesh::cloud(out_positions, Some(out_normals));
    cloud.retain_finite();
    cloud.merge_by_distance(CLOUD_MERGE_EPS);
    Ok(Some(cloud))
}

/// Linear confidence falloff over camera distance, clamped at both limits.
fn confidence(distance: f32, wedge: &Wedge, floor: f32) -> f32 {
    if wedge.far_limit <= wedge.near_limit {
        return 1.0;
    }
    let t = ((distance - wedge.near_limit) / (wedge.far_limit - wedge.near_limit)).clamp(0.0, 1.0);
    1.0 + t * (floor - 1.0)
}

/// Local sample spacing: the largest camera-frame distance to a valid
/// axis-aligned raster neighbor at the working stride.
fn sample_spacing(points: &crate::cloud::wedge::Raster, row: usize, col: usize, stride: usize) -> f32 {
    let here = points.get(row, col);
    let mut spacing = 0.0f32;
    let offsets: [(isize, isize); 4] = [
        (0, stride as isize),
        (0, -(stride as isize)),
        (stride as isize, 0),
        (-(stride as isize), 0),
    ];
    for (dr, dc) in offsets {
        let r = row as isize + dr;
        let c = col as isize + dc;
        if r >= 0
            && c >= 0
            && (r as usize) < points.height
            && (c as usize) < points.width
            && points.valid(r as usize, c as usize)
        {
            spacing = spacing.max(here.distance(points.get(r as usize, c as usize)));
        }
    }
    if spacing > 0.0 { spacing } else { 1.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::wedge::{Raster, WedgeEye};
    use glam::{Mat4, vec3};

    fn grid_wedge(id: WedgeId, width: usize, height: usize, spacing: f32) -> Wedge {
        let points = Raster::from_fn(width, height, |row, col| {
            vec3(col as f32 * spacing, row as f32 * spacing, 5.0)
        });
        let normals = Raster::from_fn(width, height, |_, _| vec3(0.0, 0.0, -1.0));
        Wedge {
            id,
            eye: WedgeEye::Left,
            reconstructable: true,
            points,
            normals: Some(normals),
            // Camera looks down from above; flip into a Z-up mesh frame
            mesh_from_wedge: Some(Mat4::from_rotation_x(std::f32::consts::PI)),
            near_limit: 2.0,
            far_limit: 10.0,
            camera_center: None,
        }
    }

    #[test]
    fn test_builds_deduplicated_cloud() {
        let wedges = vec![grid_wedge(WedgeId::new("0001", "a"), 8, 8, 0.1)];
        let clouds = build_point_clouds(&wedges, &BuildOptions::default(), Vec2::ZERO)
            .expect("one wedge yields points");

        let cloud = &clouds[&WedgeId::new("0001", "a")];
        assert_eq!(64, cloud.count_vertices());
        for n in cloud.normals.iter() {
            assert!((n.length() - 1.0).abs() < 1e-5, "unit normals by default");
            assert!(n.z > 0.9, "normals flipped up into the mesh frame");
        }
    }

    #[test]
    fn test_merge_epsilon_enforced() {
        // 1 mm spacing collapses under the 5 mm merge epsilon
        let wedges = vec![grid_wedge(WedgeId::new("0001", "a"), 6, 6, 0.001)];
        let clouds = build_point_clouds(&wedges, &BuildOptions::default(), Vec2::ZERO)
            .expect("wedge yields points");

        let cloud = &clouds[&WedgeId::new("0001", "a")];
        assert!(
            cloud.count_vertices() < 36,
            "near-duplicates must coalesce, kept {}",
            cloud.count_vertices()
        );
        for (i, a) in cloud.positions.iter().enumerate() {
            for b in cloud.positions.iter().skip(i + 1) {
                assert!(a.distance(*b) >= CLOUD_MERGE_EPS);
            }
        }
    }

    #[test]
    fn test_confidence_scaling() {
        let wedges = vec![grid_wedge(WedgeId::new("0001", "a"), 4, 4, 0.1)];
        let options = BuildOptions {
            normal_scale: NormalScale::Confidence,
            linear_confidence_min: 0.2,
            ..Default::default()
        };
        let clouds =
            build_point_clouds(&wedges, &options, Vec2::ZERO).expect("wedge yields points");

        // All samples sit ~5 m from the camera: 3/8 of the way from near (2)
        // to far (10), so confidence ≈ 1 - 0.375 * 0.8
        let cloud = &clouds[&WedgeId::new("0001", "a")];
        for n in cloud.normals.iter() {
            crate::math::delta::assert_in_delta(
                0.7,
                n.length(),
                0.01,
                "confidence encodes in normal length",
            );
        }
    }

    #[test]
    fn test_pre_clip() {
        let wedges = vec![grid_wedge(WedgeId::new("0001", "a"), 8, 8, 1.0)];
        let options = BuildOptions {
            pre_clip_extent: 4.0,
            ..Default::default()
        };
        let clouds =
            build_point_clouds(&wedges, &options, Vec2::ZERO).expect("wedge yields points");

        let cloud = &clouds[&WedgeId::new("0001", "a")];
        for p in cloud.positions.iter() {
            assert!(p.x.abs() <= 2.0 && p.y.abs() <= 2.0, "pre-clip bound, got {p}");
        }
    }

    #[test]
    fn test_eye_and_error_skips() {
        let mut right = grid_wedge(WedgeId::new("0001", "right"), 4, 4, 0.1);
        right.eye = WedgeEye::Right;
        let mut broken = grid_wedge(WedgeId::new("0001", "broken"), 4, 4, 0.1);
        broken.mesh_from_wedge = None;
        let good = grid_wedge(WedgeId::new("0001", "good"), 4, 4, 0.1);

        let clouds = build_point_clouds(&[right, broken, good], &BuildOptions::default(), Vec2::ZERO)
            .expect("one good wedge remains");
        assert_eq!(1, clouds.len(), "right-eye and broken wedges skipped");
        assert!(clouds.contains_key(&WedgeId::new("0001", "good")));
    }

    #[test]
    fn test_all_wedges_empty_is_no_input() {
        let mut wedge = grid_wedge(WedgeId::new("0001", "a"), 4, 4, 0.1);
        wedge.reconstructable = false;

        let result = build_point_clouds(&[wedge], &BuildOptions::default(), Vec2::ZERO);
        assert!(matches!(result, Err(SceneError::NoInput)));
    }

    #[test]
    fn test_normal_filter_rejects_range() {
        let options = BuildOptions {
            normal_filter: 9,
            ..Default::default()
        };
        let result = build_point_clouds(&[], &options, Vec2::ZERO);
        assert!(matches!(result, Err(SceneError::InvalidArg(_))));
    }

    #[test]
    fn test_auto_decimate_strides() {
        let wedges = vec![grid_wedge(WedgeId::new("0001", "a"), 64, 64, 0.1)];
        let options = BuildOptions {
            auto_decimate: true,
            max_raster_dim: 16,
            ..Default::default()
        };
        let clouds =
            build_point_clouds(&wedges, &options, Vec2::ZERO).expect("wedge yields points");

        let cloud = &clouds[&WedgeId::new("0001", "a")];
        assert_eq!(16 * 16, cloud.count_vertices(), "stride-4 subsample");
    }
}
