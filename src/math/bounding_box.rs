use glam::{Vec2, Vec3};

/// An axis-aligned Bounding Box. Z is vertical everywhere in this crate.
#[derive(Copy, Clone, PartialEq, Debug, Default)]
pub struct BoundingBox {
    /// Minimum axis values of the bounding box. A corner point.
    pub minimum: Vec3,
    /// Maximum axis values of the bounding box. A corner point.
    pub maximum: Vec3,
}

impl BoundingBox {
    /// Returns a new bounding box.
    /// Every axis of the `minimum` vector should be less than or equal to the corresponding `maximum` axis.
    pub fn new(minimum: Vec3, maximum: Vec3) -> Self {
        Self { minimum, maximum }
    }

    /// Creates a bounding box that encloses the given list of points.
    pub fn from_points(points: &[Vec3]) -> Self {
        if points.is_empty() {
            return Self::default();
        }

        let mut b = Self::new(points[0], points[0]);
        for pt in points.iter() {
            b = b.enclose(*pt);
        }
        b
    }

    /// Creates a square XY footprint of width `extent` centered on `center`,
    /// spanning the given vertical range.
    pub fn square_xy(center: Vec2, extent: f32, min_z: f32, max_z: f32) -> Self {
        let half = extent * 0.5;
        Self {
            minimum: Vec3::new(center.x - half, center.y - half, min_z),
            maximum: Vec3::new(center.x + half, center.y + half, max_z),
        }
    }

    /// Returns the central position of the Bounding Box.
    pub fn center(&self) -> Vec3 {
        self.minimum.midpoint(self.maximum)
    }

    /// Returns the size of the bounding box.
    pub fn size(&self) -> Vec3 {
        self.maximum - self.minimum
    }

    /// Returns the length of the box diagonal.
    pub fn diagonal(&self) -> f32 {
        self.size().length()
    }

    /// Returns a new bounding box with a flat scalar to expand all boundaries by.
    pub fn expand_margin(&self, margin: f32) -> Self {
        Self {
            minimum: self.minimum - Vec3::splat(margin),
            maximum: self.maximum + Vec3::splat(margin),
        }
    }

    /// Returns a new bounding box that encloses the given bounding boxes.
    pub fn join(&self, other: &Self) -> Self {
        Self {
            minimum: self.minimum.min(other.minimum),
            maximum: self.maximum.max(other.maximum),
        }
    }

    /// Returns a new bounding box which encloses the given point.
    pub fn enclose(&self, point: Vec3) -> Self {
        Self {
            minimum: self.minimum.min(point),
            maximum: self.maximum.max(point),
        }
    }

    /// Returns true if the point lies inside the box on all three axes.
    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.minimum).all() && point.cmple(self.maximum).all()
    }

    /// Returns true if the point's XY projection lies inside the box footprint.
    pub fn contains_xy(&self, point: Vec3) -> bool {
        point.x >= self.minimum.x
            && point.x <= self.maximum.x
            && point.y >= self.minimum.y
            && point.y <= self.maximum.y
    }

    /// Returns true if the bounding box has no volume.
    pub fn zero(&self) -> bool {
        self.minimum.eq(&self.maximum)
    }
}
