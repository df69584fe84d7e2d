use crate::mesh::operator::VertexIndexXY;
use crate::mesh::trimesh::TriangleMesh;
use glam::{Vec2, Vec3};
use log::{debug, info};
use rayon::prelude::*;

/// Orbital samples held back from blending at the outer rim, so a narrow
/// ring of untouched DEM heights survives around the blend band.
pub const GUTTER_SAMPLES: f32 = 2.0;

/// Settings for sewing and blending the orbital periphery onto the surface.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BlendParams {
    /// Height-blend band width, meters. Zero disables blending.
    pub blend_radius: f32,
    /// Snap-to-surface distance, meters. Zero disables sewing.
    pub sew_radius: f32,
    /// Width of the surface region, meters: pairing searches a box of
    /// `surface_extent / 2 + radius` around the origin.
    pub surface_extent: f32,
    /// Orbital DEM meters per pixel.
    pub orbital_mpp: f32,
    /// Orbital blend sampling density, points per pixel.
    pub blend_ppp: f32,
    /// Floor for the blend factor.
    pub blend_min: f32,
}

impl Default for BlendParams {
    fn default() -> Self {
        Self {
            blend_radius: 4.0,
            sew_radius: 0.05,
            surface_extent: 64.0,
            orbital_mpp: 1.0,
            blend_ppp: 1.0,
            blend_min: 0.05,
        }
    }
}

impl BlendParams {
    /// Blend radius after reserving the gutter ring.
    pub fn effective_radius(&self) -> f32 {
        (self.blend_radius - GUTTER_SAMPLES * (self.orbital_mpp / self.blend_ppp)).max(0.0)
    }
}

/// Sews and height-blends the orbital periphery onto the surface mesh, then
/// concatenates the two.
///
/// Pass 1 pairs orbital vertices to their nearest surface vertex by XY
/// distance; Pass 2 updates each paired orbital vertex independently, so
/// both passes parallelize over plain index ranges. Surface vertices are
/// never mutated here, which is what makes Pass 2 deterministic.
pub fn blend_and_join(
    mut surface: TriangleMesh,
    mut orbital: TriangleMesh,
    params: &BlendParams,
) -> TriangleMesh {
    if orbital.is_empty() {
        return surface;
    }
    if surface.is_empty() {
        orbital.clean();
        orbital.bake_normals_smooth();
        return orbital;
    }

    let radius = params.effective_radius();
    let pair_radius = radius.max(params.sew_radius);

    if pair_radius > 0.0 {
        let pairs = collect_pairs(&surface, &orbital, pair_radius, params);
        let paired_count = pairs.iter().flatten().count();
        debug!("blender: paired {paired_count} orbital vertices");
        apply_updates(&surface, &mut orbital, &pairs, radius, params);
    } else {
        info!("blender: both radii zero, concatenating periphery as-is");
    }

    orbital.clean();
    orbital.bake_normals_smooth();
    surface.join(orbital);
    surface.clean();
    surface
}

#[derive(Copy, Clone)]
struct Pair {
    surface_idx: usize,
    dist_squared: f32,
}

/// Pass 1: nearest surface vertex for every orbital vertex inside the
/// search box, filtered to the pairing radius.
fn collect_pairs(
    surface: &TriangleMesh,
    orbital: &TriangleMesh,
    pair_radius: f32,
    params: &BlendParams,
) -> Vec<Option<Pair>> {
    let index = VertexIndexXY::build(&surface.positions);
    let half = params.surface_extent * 0.5 + pair_radius;
    let radius_squared = pair_radius * pair_radius;

    orbital
        .positions
        .par_iter()
        .map(|p| {
            if p.x.abs() > half || p.y.abs() > half {
                return None;
            }
            let (surface_idx, dist_squared) = index.nearest(Vec2::new(p.x, p.y))?;
            (dist_squared < radius_squared).then_some(Pair {
                surface_idx,
                dist_squared,
            })
        })
        .collect()
}

/// Pass 2: per paired orbital vertex, either snap onto the matched surface
/// vertex or blend the DEM height toward the local surface height.
fn apply_updates(
    surface: &TriangleMesh,
    orbital: &mut TriangleMesh,
    pairs: &[Option<Pair>],
    radius: f32,
    params: &BlendParams,
) {
    let paired_indices: Vec<usize> = pairs
        .iter()
        .enumerate()
        .filter_map(|(idx, pair)| pair.map(|_| idx))
        .collect();
    let paired_index = VertexIndexXY::build_subset(&orbital.positions, paired_indices);

    let sew_squared = params.sew_radius * params.sew_radius;
    let smooth_radius = 0.1 * radius;
    let orbital_positions = &orbital.positions;

    let updates: Vec<Option<Vec3>> = pairs
        .par_iter()
        .enumerate()
        .map(|(idx, pair)| {
            let pair = (*pair)?;
            let v = orbital_positions[idx];

            if params.sew_radius > 0.0 && pair.dist_squared < sew_squared {
                // Sew: adopt the surface vertex position outright
                return Some(surface.positions[pair.surface_idx]);
            }
            if radius <= 0.0 {
                return None;
            }

            // Local mean of the surface partners of nearby paired vertices
            let mut mz = 0.0f32;
            let mut mxy = Vec2::ZERO;
            let mut count = 0usize;
            for neighbor in paired_index.within_radius(Vec2::new(v.x, v.y), smooth_radius) {
                if let Some(np) = pairs[neighbor] {
                    let s = surface.positions[np.surface_idx];
                    mz += s.z;
                    mxy += Vec2::new(s.x, s.y);
                    count += 1;
                }
            }
            if count == 0 {
                let s = surface.positions[pair.surface_idx];
                mz = s.z;
                mxy = Vec2::new(s.x, s.y);
                count = 1;
            }
            mz /= count as f32;
            mxy /= count as f32;

            let d = (mxy - Vec2::new(v.x, v.y)).length();
            let blend = (d / radius).sqrt().clamp(params.blend_min, 1.0);
            Some(Vec3::new(v.x, v.y, v.z * blend + mz * (1.0 - blend)))
        })
        .collect();

    for (idx, update) in updates.into_iter().enumerate() {
        if let Some(p) = update {
            orbital.positions[idx] = p;
        }
    }
}
