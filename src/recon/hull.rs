use crate::mesh::mask::MaskMesh;
use glam::{Vec2, Vec3};
use log::debug;

/// Occupancy cell width for the hull raster, meters.
pub const SURFACE_HULL_MERGE_EPS: f32 = 0.1;
/// Morphological closing radius, cells.
pub const SURFACE_HULL_FILL_HOLES: usize = 10;

/// Builds the convex-or-near-convex XY trim mask for the reconstructed mesh.
///
/// Every point rasterizes into a 2D occupancy grid; holes close
/// morphologically up to [SURFACE_HULL_FILL_HOLES] cells; only edge cells
/// (occupied cells whose 3x3 neighborhood is not fully occupied) feed a 2D
/// Delaunay triangulation, which is then clipped to the surface extent.
pub fn build_surface_hull(points: &[Vec3], surface_extent: f32, center: Vec2) -> Option<MaskMesh> {
    let mut grid = OccupancyGrid::rasterize(points, SURFACE_HULL_MERGE_EPS)?;
    grid.close(SURFACE_HULL_FILL_HOLES);

    let edges = grid.edge_cells();
    debug!(
        "surface hull: {} edge cells from {}x{} occupancy",
        edges.len(),
        grid.cols,
        grid.rows
    );

    let mask = MaskMesh::delaunay(&edges)?;

    // Clip the hull to the configured surface extent
    let half = surface_extent * 0.5;
    mask.retain_faces(|tri| {
        let centroid = (tri[0] + tri[1] + tri[2]) / 3.0;
        (centroid.x - center.x).abs() <= half && (centroid.y - center.y).abs() <= half
    })
}

/// XY occupancy bitmap over the input footprint.
struct OccupancyGrid {
    cells: Vec<bool>,
    cols: usize,
    rows: usize,
    origin: Vec2,
    cell: f32,
}

impl OccupancyGrid {
    fn rasterize(points: &[Vec3], cell: f32) -> Option<Self> {
        if points.is_empty() {
            return None;
        }

        let mut min = Vec2::new(points[0].x, points[0].y);
        let mut max = min;
        for p in points.iter() {
            min = min.min(Vec2::new(p.x, p.y));
            max = max.max(Vec2::new(p.x, p.y));
        }

        // One-cell apron so border cells always have an unoccupied neighbor
        let origin = min - Vec2::splat(cell);
        let cols = ((max.x - origin.x) / cell).ceil() as usize + 2;
        let rows = ((max.y - origin.y) / cell).ceil() as usize + 2;

        let mut cells = vec![false; cols * rows];
        for p in points.iter() {
            let gx = ((p.x - origin.x) / cell).floor() as usize;
            let gy = ((p.y - origin.y) / cell).floor() as usize;
            if gx < cols && gy < rows {
                cells[gy * cols + gx] = true;
            }
        }

        Some(Self {
            cells,
            cols,
            rows,
            origin,
            cell,
        })
    }

    fn occupied(&self, gx: isize, gy: isize) -> bool {
        if gx < 0 || gy < 0 || gx as usize >= self.cols || gy as usize >= self.rows {
            return false;
        }
        self.cells[gy as usize * self.cols + gx as usize]
    }

    /// Morphological closing: dilate then erode by `radius` one-cell passes.
    fn close(&mut self, radius: usize) {
        for _ in 0..radius {
            self.pass(true);
        }
        for _ in 0..radius {
            self.pass(false);
        }
    }

    fn pass(&mut self, dilate: bool) {
        let mut next = self.cells.clone();
        for gy in 0..self.rows as isize {
            for gx in 0..self.cols as isize {
                let mut any = false;
                let mut all = true;
                for dy in -1..=1 {
                    for dx in -1..=1 {
                        let occ = self.occupied(gx + dx, gy + dy);
                        any |= occ;
                        all &= occ;
                    }
                }
                next[gy as usize * self.cols + gx as usize] = if dilate { any } else { all };
            }
        }
        self.cells = next;
    }

    /// World centers of occupied cells whose 3x3 neighborhood is not fully
    /// occupied.
    fn edge_cells(&self) -> Vec<Vec2> {
        let mut out = vec![];
        for gy in 0..self.rows as isize {
            for gx in 0..self.cols as isize {
                if !self.occupied(gx, gy) {
                    continue;
                }
                let mut all = true;
                for dy in -1..=1 {
                    for dx in -1..=1 {
                        all &= self.occupied(gx + dx, gy + dy);
                    }
                }
                if !all {
                    out.push(
                        self.origin + Vec2::new(gx as f32 + 0.5, gy as f32 + 0.5) * self.cell,
                    );
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::vec3;

    fn dense_square(extent: f32, spacing: f32) -> Vec<Vec3> {
        let n = (extent / spacing) as i32;
        let mut out = vec![];
        for y in -n..=n {
            for x in -n..=n {
                out.push(vec3(x as f32 * spacing, y as f32 * spacing, 0.0));
            }
        }
        out
    }

    #[test]
    fn test_hull_covers_footprint() {
        let points = dense_square(4.0, 0.05);
        let hull = build_surface_hull(&points, 32.0, Vec2::ZERO).expect("hull builds");

        assert!(hull.contains(Vec2::ZERO));
        assert!(hull.contains(Vec2::new(3.5, -3.5)));
        assert!(
            !hull.contains(Vec2::new(6.0, 0.0)),
            "hull does not stretch past the data"
        );
    }

    #[test]
    fn test_hole_filling() {
        // Square with a 0.6 m hole in the middle: well under the closing
        // radius, so it must disappear
        let points: Vec<Vec3> = dense_square(3.0, 0.05)
            .into_iter()
            .filter(|p| p.x.abs().max(p.y.abs()) > 0.3)
            .collect();
        let hull = build_surface_hull(&points, 32.0, Vec2::ZERO).expect("hull builds");

        assert!(hull.contains(Vec2::ZERO), "interior hole closed over");
    }

    #[test]
    fn test_extent_clip() {
        let points = dense_square(20.0, 0.25);
        let hull = build_surface_hull(&points, 8.0, Vec2::ZERO).expect("hull builds");

        assert!(hull.contains(Vec2::ZERO));
        assert!(
            !hull.contains(Vec2::new(15.0, 15.0)),
            "faces beyond the surface extent clipped off"
        );
    }

    #[test]
    fn test_empty_input() {
        assert!(build_surface_hull(&[], 8.0, Vec2::ZERO).is_none());
    }
}
