use glam::{Mat4, Vec3};
use std::fmt;

/// Identifies one observation: a sitedrive grouping token plus the wedge
/// name within it. Ordering is (sitedrive, name), which fixes the iteration
/// order downstream stages rely on.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WedgeId {
    pub sitedrive: String,
    pub name: String,
}

impl WedgeId {
    pub fn new(sitedrive: &str, name: &str) -> Self {
        Self {
            sitedrive: sitedrive.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for WedgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.sitedrive, self.name)
    }
}

/// Which camera produced a wedge.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WedgeEye {
    Mono,
    Left,
    Right,
}

/// Stereo-eye selection policy for the builder.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum StereoEye {
    /// Prefer left imagery; mono wedges always pass.
    #[default]
    Auto,
    Left,
    Right,
    Any,
}

impl StereoEye {
    pub fn allows(&self, eye: WedgeEye) -> bool {
        match self {
            Self::Any => true,
            Self::Auto | Self::Left => matches!(eye, WedgeEye::Mono | WedgeEye::Left),
            Self::Right => matches!(eye, WedgeEye::Mono | WedgeEye::Right),
        }
    }
}

/// A row-major 2D raster. Invalid samples carry non-finite components.
#[derive(Clone)]
pub struct Raster {
    pub width: usize,
    pub height: usize,
    data: Vec<Vec3>,
}

impl Raster {
    pub fn new(width: usize, height: usize, data: Vec<Vec3>) -> Self {
        #[cfg(debug_assertions)]
        assert_eq!(width * height, data.len(), "raster data must fill the grid");
        Self {
            width,
            height,
            data,
        }
    }

    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> Vec3) -> Self {
        let mut data = Vec::with_capacity(width * height);
        for row in 0..height {
            for col in 0..width {
                data.push(f(row, col));
            }
        }
        Self::new(width, height, data)
    }

    pub fn get(&self, row: usize, col: usize) -> Vec3 {
        self.data[row * self.width + col]
    }

    pub fn valid(&self, row: usize, col: usize) -> bool {
        self.get(row, col).is_finite()
    }

    /// Counts valid samples among the (up to 8) immediate neighbors at the
    /// given lattice spacing.
    pub fn valid_neighbors(&self, row: usize, col: usize, stride: usize) -> u32 {
        let stride = stride as isize;
        let mut count = 0;
        for dr in [-stride, 0, stride] {
            for dc in [-stride, 0, stride] {
                if dr == 0 && dc == 0 {
                    continue;
                }
                let r = row as isize + dr;
                let c = col as isize + dc;
                if r >= 0
                    && c >= 0
                    && (r as usize) < self.height
                    && (c as usize) < self.width
                    && self.valid(r as usize, c as usize)
                {
                    count += 1;
                }
            }
        }
        count
    }
}

/// One stereo / structured-light acquisition: co-registered XYZ and normal
/// rasters in the camera frame, plus the rigid transform into the mesh frame
/// established by external alignment.
pub struct Wedge {
    pub id: WedgeId,
    pub eye: WedgeEye,
    pub reconstructable: bool,
    /// Camera-frame positions; non-finite entries are holes.
    pub points: Raster,
    /// Camera-frame unit normals, co-registered with `points`.
    pub normals: Option<Raster>,
    /// Rigid transform from the camera frame into the mesh frame.
    pub mesh_from_wedge: Option<Mat4>,
    /// Camera distance below which confidence is 1.
    pub near_limit: f32,
    /// Camera distance at which confidence bottoms out.
    pub far_limit: f32,
    /// Mesh-frame camera station, when the camera model supplies one.
    pub camera_center: Option<Vec3>,
}

impl Wedge {
    /// The reference origin used to rank this wedge's samples during
    /// clever-combine: the camera station when known, otherwise the wedge
    /// frame origin pushed through the alignment transform.
    pub fn origin(&self) -> Vec3 {
        if let Some(center) = self.camera_center {
            return center;
        }
        match self.mesh_from_wedge {
            Some(m) => m.transform_point3(Vec3::ZERO),
            None => Vec3::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::vec3;

    #[test]
    fn test_wedge_id_ordering() {
        let mut ids = vec![
            WedgeId::new("0450", "zcam_b"),
            WedgeId::new("0321", "ncam_a"),
            WedgeId::new("0450", "ncam_a"),
        ];
        ids.sort();
        assert_eq!("0321/ncam_a", ids[0].to_string());
        assert_eq!("0450/ncam_a", ids[1].to_string());
        assert_eq!("0450/zcam_b", ids[2].to_string());
    }

    #[test]
    fn test_eye_policy() {
        assert!(StereoEye::Auto.allows(WedgeEye::Left));
        assert!(StereoEye::Auto.allows(WedgeEye::Mono));
        assert!(!StereoEye::Auto.allows(WedgeEye::Right));
        assert!(StereoEye::Any.allows(WedgeEye::Right));
        assert!(!StereoEye::Right.allows(WedgeEye::Left));
    }

    #[test]
    fn test_valid_neighbors() {
        let raster = Raster::from_fn(3, 3, |row, col| {
            if row == 0 && col == 0 {
                vec3(f32::NAN, 0.0, 0.0)
            } else {
                vec3(col as f32, row as f32, 0.0)
            }
        });

        assert_eq!(7, raster.valid_neighbors(1, 1, 1), "center sees one hole");
        assert_eq!(3, raster.valid_neighbors(0, 0, 1), "corner has three neighbors");
    }

    #[test]
    fn test_origin_falls_back_to_transform() {
        let wedge = Wedge {
            id: WedgeId::new("0001", "a"),
            eye: WedgeEye::Mono,
            reconstructable: true,
            points: Raster::from_fn(1, 1, |_, _| Vec3::ZERO),
            normals: None,
            mesh_from_wedge: Some(Mat4::from_translation(vec3(1.0, 2.0, 3.0))),
            near_limit: 2.0,
            far_limit: 10.0,
            camera_center: None,
        };
        assert_eq!(vec3(1.0, 2.0, 3.0), wedge.origin());
    }
}
