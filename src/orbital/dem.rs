use crate::mesh::organized::OrganizedMesh;
use crate::mesh::trimesh::TriangleMesh;
use glam::{Vec2, Vec3};

/// An integer pixel window into the DEM. `max_x`/`max_y` are exclusive.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Subrect {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl Subrect {
    pub fn width(&self) -> i32 {
        (self.max_x - self.min_x).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.max_y - self.min_y).max(0)
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.min_x && x < self.max_x && y >= self.min_y && y < self.max_y
    }

    /// Clamps the window into `[0, width) x [0, height)`.
    pub fn clamp_to(&self, width: usize, height: usize) -> Self {
        Self {
            min_x: self.min_x.clamp(0, width as i32),
            min_y: self.min_y.clamp(0, height as i32),
            max_x: self.max_x.clamp(0, width as i32),
            max_y: self.max_y.clamp(0, height as i32),
        }
    }
}

/// A coarse orbital elevation raster co-registered to the scene frame.
///
/// Heights are row-major with NaN marking nodata. `origin_px` is the
/// (fractional) pixel position of the scene origin; scene XY meters map to
/// pixels through `meters_per_pixel`.
pub struct Dem {
    pub width: usize,
    pub height: usize,
    pub meters_per_pixel: f32,
    origin_px: Vec2,
    heights: Vec<f32>,
}

impl Dem {
    pub fn new(
        width: usize,
        height: usize,
        meters_per_pixel: f32,
        origin_px: Vec2,
        heights: Vec<f32>,
    ) -> Self {
        #[cfg(debug_assertions)]
        assert_eq!(width * height, heights.len(), "height data must fill the grid");
        Self {
            width,
            height,
            meters_per_pixel,
            origin_px,
            heights,
        }
    }

    /// A DEM sampled from a height function of scene XY, origin centered.
    pub fn from_fn(
        width: usize,
        height: usize,
        meters_per_pixel: f32,
        mut f: impl FnMut(Vec2) -> f32,
    ) -> Self {
        let origin_px = Vec2::new(width as f32 * 0.5, height as f32 * 0.5);
        let mut heights = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                let xy = (Vec2::new(x as f32, y as f32) - origin_px) * meters_per_pixel;
                heights.push(f(xy));
            }
        }
        Self::new(width, height, meters_per_pixel, origin_px, heights)
    }

    /// Scene XY of a pixel coordinate.
    pub fn xy_of_px(&self, px: Vec2) -> Vec2 {
        (px - self.origin_px) * self.meters_per_pixel
    }

    /// Pixel coordinate of a scene XY.
    pub fn px_of_xy(&self, xy: Vec2) -> Vec2 {
        xy / self.meters_per_pixel + self.origin_px
    }

    fn height_px(&self, x: i32, y: i32) -> Option<f32> {
        if x < 0 || y < 0 || x as usize >= self.width || y as usize >= self.height {
            return None;
        }
        let h = self.heights[y as usize * self.width + x as usize];
        h.is_finite().then_some(h)
    }

    /// Bilinear height at a scene XY; `None` off-raster or on nodata.
    pub fn height_at_xy(&self, xy: Vec2) -> Option<f32> {
        let px = self.px_of_xy(xy);
        let x0 = px.x.floor();
        let y0 = px.y.floor();
        let fx = px.x - x0;
        let fy = px.y - y0;

        let h00 = self.height_px(x0 as i32, y0 as i32)?;
        let h10 = self.height_px(x0 as i32 + 1, y0 as i32)?;
        let h01 = self.height_px(x0 as i32, y0 as i32 + 1)?;
        let h11 = self.height_px(x0 as i32 + 1, y0 as i32 + 1)?;

        let top = h00 * (1.0 - fx) + h10 * fx;
        let bottom = h01 * (1.0 - fx) + h11 * fx;
        Some(top * (1.0 - fy) + bottom * fy)
    }

    /// The pixel window covering a square of the given radius (meters)
    /// around a scene-frame center, clamped to the raster.
    pub fn subrect_pixels(&self, radius_m: f32, center: Vec2) -> Subrect {
        let center_px = self.px_of_xy(center);
        let radius_px = (radius_m / self.meters_per_pixel).ceil() as i32;
        Subrect {
            min_x: center_px.x.floor() as i32 - radius_px,
            min_y: center_px.y.floor() as i32 - radius_px,
            max_x: center_px.x.ceil() as i32 + radius_px + 1,
            max_y: center_px.y.ceil() as i32 + radius_px + 1,
        }
        .clamp_to(self.width, self.height)
    }

    /// Builds an organized quad mesh over `outer`, skipping samples inside
    /// the optional `inner` cut window. `subsample` strides the lattice.
    pub fn organized_mesh(
        &self,
        outer: Subrect,
        inner: Option<Subrect>,
        subsample: usize,
        with_normals: bool,
        quads_only: bool,
    ) -> OrganizedMesh {
        let stride = subsample.max(1) as i32;
        let rows = (outer.height() / stride + 1).max(0) as usize;
        let cols = (outer.width() / stride + 1).max(0) as usize;

        let mut organized = OrganizedMesh::from_lattice(
            rows,
            cols,
            |row, col| {
                let px = outer.min_x + col as i32 * stride;
                let py = outer.min_y + row as i32 * stride;
                if px >= outer.max_x || py >= outer.max_y {
                    return None;
                }
                if let Some(cut) = inner
                    && cut.contains(px, py)
                {
                    return None;
                }
                let z = self.height_px(px, py)?;
                let xy = self.xy_of_px(Vec2::new(px as f32, py as f32));
                Some(Vec3::new(xy.x, xy.y, z))
            },
            quads_only,
        );

        if with_normals {
            organized.bake_lattice_normals();
        }
        organized
    }

    /// Point-cloud variant of `organized_mesh`, used for hole-fill sampling.
    pub fn point_cloud(&self, outer: Subrect, subsample: usize) -> TriangleMesh {
        let organized = self.organized_mesh(outer, None, subsample, false, true);
        let count = organized.mesh.count_vertices();
        let mut cloud = organized.into_mesh();
        cloud.triangles.clear();
        cloud.normals = vec![Vec3::Z; count];
        cloud
    }
}
