use crate::error::{Result, SceneError};
use crate::math::bounding_box::BoundingBox;
use crate::mesh::trimesh::TriangleMesh;
use glam::Vec2;
use log::warn;

/// UV generation strategy.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum AtlasMode {
    /// Charted UV atlas. Falls back to `Heightmap`; no charting backend is
    /// bundled with the core.
    UvAtlas,
    /// Orthographic projection of XY into [0, 1]^2.
    #[default]
    Heightmap,
    /// Per-face packing into a uniform grid of charts.
    Naive,
    /// Manifold-aware charting. Falls back through `UvAtlas` to `Heightmap`.
    Manifold,
}

/// Settings for atlasing and the surface-precedence texture warp.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AtlasParams {
    pub mode: AtlasMode,
    /// Output texture edge, pixels. The central submesh is atlased at
    /// `dst_surface_frac * texture_resolution`.
    pub texture_resolution: u32,
    /// Linear fraction of texture space the central (surface) box occupies
    /// after warping. Zero disables the warp.
    pub dst_surface_frac: f32,
    /// Easing exponent for the peripheral band of the warp.
    pub ease_exponent: f32,
}

impl Default for AtlasParams {
    fn default() -> Self {
        Self {
            mode: AtlasMode::Heightmap,
            texture_resolution: 4096,
            dst_surface_frac: 0.5,
            ease_exponent: 1.0,
        }
    }
}

/// Atlases the scene mesh.
///
/// Without an orbital periphery (or when the surface covers the whole
/// extent) the entire mesh is atlased by the configured mode. Otherwise the
/// central submesh (surface plus blend band) and the peripheral complement
/// are atlased separately into one consistent full-extent projection and
/// merged; the optional warp then grows the central box to
/// `dst_surface_frac` of texture space so surface texels take precedence
/// over orbital ones.
pub fn atlas_scene(
    mesh: TriangleMesh,
    extent: f32,
    central_extent: f32,
    has_periphery: bool,
    params: &AtlasParams,
) -> Result<TriangleMesh> {
    if mesh.triangles.is_empty() {
        return Err(SceneError::EmptyAfterClean);
    }

    if !has_periphery || central_extent >= extent {
        return Ok(apply_mode(mesh, params.mode));
    }

    let central_box = BoundingBox::square_xy(Vec2::ZERO, central_extent, f32::MIN, f32::MAX);
    let full_box = BoundingBox::square_xy(Vec2::ZERO, extent, f32::MIN, f32::MAX);

    // Central: faces fully inside the central box; peripheral: the rest
    let mut central = mesh.clone();
    central.clip_to_xy(central_box);

    let mut peripheral = mesh;
    {
        let positions = &peripheral.positions;
        peripheral.triangles.retain(|tri| {
            !(central_box.contains_xy(positions[tri[0]])
                && central_box.contains_xy(positions[tri[1]])
                && central_box.contains_xy(positions[tri[2]]))
        });
    }
    peripheral.remove_unused();

    // Atlas the central cut at its own resolution, then rescale its UVs
    // into the footprint subrect of the full projection so both halves
    // share one texture space
    heightmap_uvs(&mut central, &central_box);
    let footprint_frac = central_extent / extent;
    if let Some(uv) = &mut central.uv1 {
        for t in uv.iter_mut() {
            *t = Vec2::splat(0.5) + (*t - Vec2::splat(0.5)) * footprint_frac;
        }
    }

    heightmap_uvs(&mut peripheral, &full_box);

    let mut merged = central;
    merged.join(peripheral);

    if params.dst_surface_frac > 0.0 {
        warp_uvs(
            &mut merged,
            footprint_frac,
            params.dst_surface_frac,
            params.ease_exponent,
        );
    }
    Ok(merged)
}

fn apply_mode(mesh: TriangleMesh, mode: AtlasMode) -> TriangleMesh {
    match mode {
        AtlasMode::Heightmap => {
            let bounds = mesh.bounds();
            let mut mesh = mesh;
            heightmap_uvs(&mut mesh, &bounds);
            mesh
        }
        AtlasMode::Naive => naive_atlas(mesh),
        AtlasMode::UvAtlas => {
            warn!("no UV-atlas backend available, falling back to heightmap");
            apply_mode(mesh, AtlasMode::Heightmap)
        }
        AtlasMode::Manifold => {
            warn!("no manifold charting backend available, falling back to UV-atlas");
            apply_mode(mesh, AtlasMode::UvAtlas)
        }
    }
}

/// Orthographic XY projection into [0, 1]^2 over the given box.
fn heightmap_uvs(mesh: &mut TriangleMesh, bounds: &BoundingBox) {
    let min = Vec2::new(bounds.minimum.x, bounds.minimum.y);
    let size = Vec2::new(
        (bounds.maximum.x - bounds.minimum.x).max(1e-6),
        (bounds.maximum.y - bounds.minimum.y).max(1e-6),
    );
    let uv = mesh
        .positions
        .iter()
        .map(|p| (Vec2::new(p.x, p.y) - min) / size)
        .collect();
    mesh.uv1 = Some(uv);
}

/// Per-face chart packing: every face gets its own right triangle in a
/// uniform grid of cells. Vertices are split per face.
fn naive_atlas(mesh: TriangleMesh) -> TriangleMesh {
    let face_count = mesh.triangles.len();
    let grid = (face_count as f32).sqrt().ceil().max(1.0) as usize;
    let cell = 1.0 / grid as f32;
    let inset = cell * 0.05;

    let mut out = TriangleMesh::default();
    out.positions.reserve(face_count * 3);
    out.uv1 = Some(Vec::with_capacity(face_count * 3));

    let has_normals = mesh.has_normals();
    for (face_idx, tri) in mesh.triangles.iter().enumerate() {
        let base = out.positions.len();
        let cx = (face_idx % grid) as f32 * cell;
        let cy = (face_idx / grid) as f32 * cell;
        let corners = [
            Vec2::new(cx + inset, cy + inset),
            Vec2::new(cx + cell - inset, cy + inset),
            Vec2::new(cx + inset, cy + cell - inset),
        ];

        for (slot, idx) in tri.iter().enumerate() {
            out.positions.push(mesh.positions[*idx]);
            if has_normals {
                out.normals.push(mesh.normals[*idx]);
            }
            if let Some(uv) = &mut out.uv1 {
                uv.push(corners[slot]);
            }
        }
        out.triangles.push([base, base + 1, base + 2]);
    }
    out
}

/// Radial (Chebyshev) UV warp about the texture center: the central box at
/// `src_frac` of texture space grows to `dst_frac`, with the peripheral band
/// remapped under the easing exponent. Monotonic, so charts never fold.
fn warp_uvs(mesh: &mut TriangleMesh, src_frac: f32, dst_frac: f32, ease: f32) {
    let Some(uv) = &mut mesh.uv1 else {
        return;
    };
    let src = src_frac.clamp(1e-4, 1.0);
    let dst = dst_frac.clamp(src, 1.0);
    let ease = ease.max(1e-3);

    for t in uv.iter_mut() {
        let centered = *t - Vec2::splat(0.5);
        let r = centered.abs().max_element() * 2.0;
        if r <= 1e-6 {
            continue;
        }
        let warped = if r <= src {
            r * dst / src
        } else {
            let band = ((r - src) / (1.0 - src)).clamp(0.0, 1.0);
            dst + (1.0 - dst) * band.powf(ease)
        };
        *t = Vec2::splat(0.5) + centered * (warped / r);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::organized::OrganizedMesh;
    use glam::vec3;

    fn lattice(half: f32, step: f32) -> TriangleMesh {
        let n = (2.0 * half / step) as usize + 1;
        OrganizedMesh::from_lattice(
            n,
            n,
            |row, col| Some(vec3(col as f32 * step - half, row as f32 * step - half, 0.0)),
            true,
        )
        .into_mesh()
    }

    #[test]
    fn test_heightmap_uv_range() {
        let mesh = lattice(4.0, 1.0);
        let atlased = atlas_scene(mesh, 8.0, 8.0, false, &AtlasParams::default())
            .expect("atlas succeeds");

        let vertex_count = atlased.count_vertices();
        let uv = atlased.uv1.expect("uvs generated");
        for t in uv.iter() {
            assert!(t.x >= 0.0 && t.x <= 1.0 && t.y >= 0.0 && t.y <= 1.0);
        }
        assert_eq!(vertex_count, uv.len());
    }

    #[test]
    fn test_naive_splits_vertices() {
        let mesh = lattice(2.0, 1.0);
        let faces = mesh.triangles.len();
        let params = AtlasParams {
            mode: AtlasMode::Naive,
            ..Default::default()
        };
        let atlased = atlas_scene(mesh, 4.0, 4.0, false, &params).expect("atlas succeeds");

        assert_eq!(faces * 3, atlased.count_vertices(), "one chart per face");
        let uv = atlased.uv1.expect("uvs generated");
        for tri in atlased.triangles.iter() {
            let area = (uv[tri[1]] - uv[tri[0]]).perp_dot(uv[tri[2]] - uv[tri[0]]);
            assert!(area.abs() > 0.0, "chart triangles are non-degenerate");
        }
    }

    #[test]
    fn test_central_peripheral_warp() {
        let mesh = lattice(8.0, 0.5);
        let params = AtlasParams {
            dst_surface_frac: 0.5,
            ..Default::default()
        };
        // extent 16, central 4: footprint fraction 0.25 grows to 0.5
        let atlased = atlas_scene(mesh, 16.0, 4.0, true, &params).expect("atlas succeeds");

        let uv = atlased.uv1.as_ref().expect("uvs generated");
        for (idx, t) in uv.iter().enumerate() {
            assert!(t.x >= -1e-5 && t.x <= 1.0 + 1e-5, "u in range, got {t}");
            assert!(t.y >= -1e-5 && t.y <= 1.0 + 1e-5);

            let p = atlased.positions[idx];
            let r_uv = (*t - Vec2::splat(0.5)).abs().max_element() * 2.0;
            if p.x.abs().max(p.y.abs()) < 1.9 {
                assert!(
                    r_uv <= 0.5 + 1e-4,
                    "central vertices stay inside the warped central box"
                );
            }
            if p.x.abs().max(p.y.abs()) > 2.1 {
                assert!(
                    r_uv >= 0.5 - 1e-4,
                    "peripheral vertices stay outside the warped central box"
                );
            }
        }
    }

    #[test]
    fn test_warp_is_monotonic() {
        let mut mesh = lattice(4.0, 1.0);
        let bounds = mesh.bounds();
        heightmap_uvs(&mut mesh, &bounds);
        let before = mesh.uv1.clone().expect("uvs");
        warp_uvs(&mut mesh, 0.25, 0.5, 2.0);
        let after = mesh.uv1.expect("uvs");

        let radius = |t: &Vec2| (*t - Vec2::splat(0.5)).abs().max_element() * 2.0;
        let mut pairs: Vec<(f32, f32)> = before
            .iter()
            .zip(after.iter())
            .map(|(b, a)| (radius(b), radius(a)))
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        for window in pairs.windows(2) {
            assert!(
                window[1].1 >= window[0].1 - 1e-5,
                "warp must preserve radial ordering"
            );
        }
    }

    #[test]
    fn test_empty_mesh_rejected() {
        let result = atlas_scene(
            TriangleMesh::default(),
            8.0,
            4.0,
            false,
            &AtlasParams::default(),
        );
        assert!(matches!(result, Err(SceneError::EmptyAfterClean)));
    }
}
