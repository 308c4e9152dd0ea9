//! Axis-aligned bounding boxes

use crate::foundation::math::Vec3;

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AABB {
    /// Minimum corner of the bounding box
    pub min: Vec3,
    /// Maximum corner of the bounding box
    pub max: Vec3,
}

impl AABB {
    /// Create a new AABB from min and max points
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Create an AABB centered at a point with given half extents
    pub fn from_center_extents(center: Vec3, extents: Vec3) -> Self {
        Self {
            min: center - extents,
            max: center + extents,
        }
    }

    /// Degenerate box around a single point
    pub fn from_point(point: Vec3) -> Self {
        Self { min: point, max: point }
    }

    /// Smallest box containing every point, `None` for an empty slice
    pub fn from_points(points: &[Vec3]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let mut bounds = Self::from_point(*first);
        for p in rest {
            bounds.min = bounds.min.inf(p);
            bounds.max = bounds.max.sup(p);
        }
        Some(bounds)
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Half size along each axis
    pub fn extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        point.x >= self.min.x && point.x <= self.max.x &&
        point.y >= self.min.y && point.y <= self.max.y &&
        point.z >= self.min.z && point.z <= self.max.z
    }

    pub fn intersects(&self, other: &AABB) -> bool {
        self.min.x <= other.max.x && self.max.x >= other.min.x &&
        self.min.y <= other.max.y && self.max.y >= other.min.y &&
        self.min.z <= other.max.z && self.max.z >= other.min.z
    }

    /// Closest point inside the box to `point`
    pub fn closest_point(&self, point: Vec3) -> Vec3 {
        point.sup(&self.min).inf(&self.max)
    }

    /// Sphere overlap test (touching counts as overlap)
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        (self.closest_point(center) - center).norm_squared() <= radius * radius
    }

    /// Box grown by `amount` on every side
    pub fn expanded(&self, amount: f32) -> Self {
        let pad = Vec3::repeat(amount);
        Self { min: self.min - pad, max: self.max + pad }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sphere_overlap() {
        let b = AABB::new(Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0));
        assert!(b.intersects_sphere(Vec3::new(1.5, 0.5, 0.5), 0.5));
        assert!(!b.intersects_sphere(Vec3::new(2.0, 2.0, 2.0), 0.5));
        assert!(b.intersects_sphere(Vec3::new(0.5, 0.5, 0.5), 0.0));
    }

    #[test]
    fn test_from_points() {
        let b = AABB::from_points(&[
            Vec3::new(1.0, -2.0, 0.0),
            Vec3::new(-1.0, 3.0, 0.5),
        ]).unwrap();
        assert_eq!(b.min, Vec3::new(-1.0, -2.0, 0.0));
        assert_eq!(b.max, Vec3::new(1.0, 3.0, 0.5));
        assert!(AABB::from_points(&[]).is_none());
    }
}
