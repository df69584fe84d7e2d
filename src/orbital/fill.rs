use crate::mesh::trimesh::TriangleMesh;
use crate::orbital::dem::Dem;
use glam::{Vec2, Vec3};
use log::debug;

/// Per-cell statistic used when matching fill heights to surface data.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum HeightMode {
    Min,
    Max,
    /// Midpoint of the cell's min and max.
    #[default]
    Med,
}

/// Settings for deforming the fill cloud onto the measured surface.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct HeightAdjust {
    pub mode: HeightMode,
    /// Width of the statistics grid cells, meters.
    pub cell_size: f32,
    /// Radius over which shifts propagate into cells with no surface data.
    pub width: f32,
    /// Falloff exponent for the propagated shift.
    pub blend: f32,
}

impl Default for HeightAdjust {
    fn default() -> Self {
        Self {
            mode: HeightMode::Med,
            cell_size: 1.0,
            width: 8.0,
            blend: 1.0,
        }
    }
}

/// Settings for the orbital fill sampler.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FillParams {
    /// Lattice density of the fill cloud.
    pub points_per_meter: f32,
    /// Confidence encoded as normal length on every fill point.
    pub confidence: f32,
    pub adjust: Option<HeightAdjust>,
}

impl Default for FillParams {
    fn default() -> Self {
        Self {
            points_per_meter: 2.0,
            confidence: 0.1,
            adjust: Some(HeightAdjust::default()),
        }
    }
}

/// Produces the point cloud of last resort: DEM heights densely sampled over
/// the surface-extent footprint, normals pointing up and scaled to the fill
/// confidence. Where surface data exists, an optional height-adjust pass
/// shifts fill Z to agree with it and propagates the shift smoothly outward.
///
/// Fill normals are NOT recomputed after the height adjustment; the
/// deformation is assumed gentle at orbital scale.
pub fn orbital_fill_cloud(
    dem: &Dem,
    surface_extent: f32,
    center: Vec2,
    params: &FillParams,
    surface: Option<&TriangleMesh>,
) -> TriangleMesh {
    if params.points_per_meter <= 0.0 || surface_extent <= 0.0 {
        return TriangleMesh::default();
    }

    let half = surface_extent * 0.5;
    let step = 1.0 / params.points_per_meter;
    let n = (surface_extent * params.points_per_meter).ceil() as usize + 1;

    let shift = params
        .adjust
        .as_ref()
        .zip(surface.filter(|s| s.count_vertices() > 0))
        .map(|(adjust, surface)| ShiftImage::build(dem, surface, surface_extent, center, adjust));

    let mut positions: Vec<Vec3> = Vec::new();
    for row in 0..n {
        for col in 0..n {
            let xy = center + Vec2::new(col as f32 * step - half, row as f32 * step - half);
            let Some(mut z) = dem.height_at_xy(xy) else {
                continue;
            };
            if let Some(shift) = &shift {
                z += shift.sample(xy);
            }
            positions.push(Vec3::new(xy.x, xy.y, z));
        }
    }

    debug!("orbital fill: {} points over {surface_extent} m", positions.len());
    let normals = vec![Vec3::Z * params.confidence; positions.len()];
    TriangleMesh::cloud(positions, Some(normals))
}

/// Per-cell Z shift between surface statistics and the DEM, radially
/// infilled where the surface has no samples.
struct ShiftImage {
    origin: Vec2,
    cell: f32,
    cols: usize,
    rows: usize,
    values: Vec<f32>,
}

impl ShiftImage {
    fn build(
        dem: &Dem,
        surface: &TriangleMesh,
        extent: f32,
        center: Vec2,
        adjust: &HeightAdjust,
    ) -> Self {
        let cell = adjust.cell_size.max(1e-3);
        let cols = (extent / cell).ceil() as usize + 1;
        let rows = cols;
        let origin = center - Vec2::splat(extent * 0.5);

        // Gather surface min/max per cell
        let mut min_z = vec![f32::INFINITY; cols * rows];
        let mut max_z = vec![f32::NEG_INFINITY; cols * rows];
        for p in surface.positions.iter() {
            let gx = ((p.x - origin.x) / cell).floor();
            let gy = ((p.y - origin.y) / cell).floor();
            if gx < 0.0 || gy < 0.0 {
                continue;
            }
            let (gx, gy) = (gx as usize, gy as usize);
            if gx >= cols || gy >= rows {
                continue;
            }
            let idx = gy * cols + gx;
            min_z[idx] = min_z[idx].min(p.z);
            max_z[idx] = max_z[idx].max(p.z);
        }

        // Shift where surface data exists
        let mut known = vec![f32::NAN; cols * rows];
        for gy in 0..rows {
            for gx in 0..cols {
                let idx = gy * cols + gx;
                if min_z[idx].is_infinite() {
                    continue;
                }
                let stat = match adjust.mode {
                    HeightMode::Min => min_z[idx],
                    HeightMode::Max => max_z[idx],
                    HeightMode::Med => 0.5 * (min_z[idx] + max_z[idx]),
                };
                let cell_center = origin + Vec2::new(gx as f32 + 0.5, gy as f32 + 0.5) * cell;
                if let Some(dem_z) = dem.height_at_xy(cell_center) {
                    known[idx] = stat - dem_z;
                }
            }
        }

        // Radial infill: unknown cells take a distance-weighted average of
        // known shifts within `width`, fading out by the blend exponent
        let reach = (adjust.width / cell).ceil() as isize;
        let mut values = vec![0.0f32; cols * rows];
        for gy in 0..rows {
            for gx in 0..cols {
                let idx = gy * cols + gx;
                if known[idx].is_finite() {
                    values[idx] = known[idx];
                    continue;
                }

                let mut sum = 0.0f32;
                let mut weight = 0.0f32;
                let mut nearest = f32::INFINITY;
                for dy in -reach..=reach {
                    for dx in -reach..=reach {
                        let nx = gx as isize + dx;
                        let ny = gy as isize + dy;
                        if nx < 0 || ny < 0 || nx as usize >= cols || ny as usize >= rows {
                            continue;
                        }
                        let nidx = ny as usize * cols + nx as usize;
                        if !known[nidx].is_finite() {
                            continue;
                        }
                        let d = ((dx * dx + dy * dy) as f32).sqrt() * cell;
                        if d > adjust.width {
                            continue;
                        }
                        let w = 1.0 - d / adjust.width;
                        sum += known[nidx] * w;
                        weight += w;
                        nearest = nearest.min(d);
                    }
                }

                if weight > 0.0 {
                    let falloff = (1.0 - nearest / adjust.width).powf(adjust.blend.max(0.0));
                    values[idx] = (sum / weight) * falloff;
                }
            }
        }

        Self {
            origin,
            cell,
            cols,
            rows,
            values,
        }
    }

    fn sample(&self, xy: Vec2) -> f32 {
        let gx = ((xy.x - self.origin.x) / self.cell).floor();
        let gy = ((xy.y - self.origin.y) / self.cell).floor();
        if gx < 0.0 || gy < 0.0 {
            return 0.0;
        }
        let (gx, gy) = (gx as usize, gy as usize);
        if gx >= self.cols || gy >= self.rows {
            return 0.0;
        }
        self.values[gy * self.cols + gx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::vec3;

    fn flat_dem() -> Dem {
        Dem::from_fn(64, 64, 1.0, |_| 0.0)
    }

    #[test]
    fn test_fill_density_and_normals() {
        let params = FillParams {
            points_per_meter: 2.0,
            confidence: 0.25,
            adjust: None,
        };
        let cloud = orbital_fill_cloud(&flat_dem(), 8.0, Vec2::ZERO, &params, None);

        assert_eq!(17 * 17, cloud.count_vertices(), "2/m lattice over 8 m");
        for (p, n) in cloud.positions.iter().zip(cloud.normals.iter()) {
            assert_eq!(0.0, p.z, "flat DEM fills at zero");
            assert!(
                (n.length() - 0.25).abs() < 1e-6,
                "confidence encoded as normal length"
            );
            assert!(n.z > 0.0, "fill normals point up");
        }
    }

    #[test]
    fn test_zero_rate_disables_fill() {
        let params = FillParams {
            points_per_meter: 0.0,
            ..Default::default()
        };
        let cloud = orbital_fill_cloud(&flat_dem(), 8.0, Vec2::ZERO, &params, None);
        assert!(cloud.is_empty());
    }

    #[test]
    fn test_height_adjust_matches_surface() {
        // Surface sits 0.4 m above the (flat, zero) DEM
        let surface = TriangleMesh::cloud(
            vec![
                vec3(-1.0, -1.0, 0.4),
                vec3(1.0, -1.0, 0.4),
                vec3(0.0, 1.0, 0.4),
            ],
            None,
        );
        let params = FillParams {
            points_per_meter: 2.0,
            confidence: 0.1,
            adjust: Some(HeightAdjust {
                cell_size: 1.0,
                width: 16.0,
                ..Default::default()
            }),
        };
        let cloud = orbital_fill_cloud(&flat_dem(), 8.0, Vec2::ZERO, &params, Some(&surface));

        let near_surface: Vec<&Vec3> = cloud
            .positions
            .iter()
            .filter(|p| p.x.abs() < 1.0 && p.y.abs() < 1.0)
            .collect();
        assert!(!near_surface.is_empty());
        for p in near_surface {
            crate::math::delta::assert_in_delta(
                0.4,
                p.z,
                0.08,
                "fill shifts to agree where surface data exists",
            );
        }
    }

    #[test]
    fn test_shift_fades_with_distance() {
        let surface = TriangleMesh::cloud(vec![vec3(0.0, 0.0, 1.0)], None);
        let params = FillParams {
            points_per_meter: 1.0,
            confidence: 0.1,
            adjust: Some(HeightAdjust {
                cell_size: 1.0,
                width: 4.0,
                ..Default::default()
            }),
        };
        let cloud = orbital_fill_cloud(&flat_dem(), 24.0, Vec2::ZERO, &params, Some(&surface));

        let far: Vec<&Vec3> = cloud
            .positions
            .iter()
            .filter(|p| p.x.abs() > 8.0 || p.y.abs() > 8.0)
            .collect();
        assert!(!far.is_empty());
        for p in far {
            assert!(
                p.z.abs() < 1e-6,
                "shift must decay to zero beyond the infill width, got {}",
                p.z
            );
        }
    }
}
