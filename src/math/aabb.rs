//! Axis-aligned bounding box

use crate::core::types::Vec3;

/// Axis-aligned bounding box defined by min and max corners
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Create AABB from min and max corners
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Bounds of a terrain square: xz footprint around `center_xz`, y spanning the height range
    pub fn from_footprint(center_x: f32, center_z: f32, half_size: f32, min_y: f32, max_y: f32) -> Self {
        Self {
            min: Vec3::new(center_x - half_size, min_y, center_z - half_size),
            max: Vec3::new(center_x + half_size, max_y, center_z + half_size),
        }
    }

    /// Get center point
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Grow every face outward by `amount`
    pub fn inflated(&self, amount: f32) -> Aabb {
        Aabb {
            min: self.min - Vec3::splat(amount),
            max: self.max + Vec3::splat(amount),
        }
    }

    /// The eight corners, bit 0 = x, bit 1 = y, bit 2 = z
    pub fn corners(&self) -> [Vec3; 8] {
        std::array::from_fn(|i| {
            Vec3::new(
                if i & 1 != 0 { self.max.x } else { self.min.x },
                if i & 2 != 0 { self.max.y } else { self.min.y },
                if i & 4 != 0 { self.max.z } else { self.min.z },
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_and_accessors() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::ONE);
        assert_eq!(aabb.center(), Vec3::splat(0.5));
    }

    #[test]
    fn test_from_footprint() {
        let aabb = Aabb::from_footprint(10.0, -10.0, 5.0, 2.0, 8.0);
        assert_eq!(aabb.min, Vec3::new(5.0, 2.0, -15.0));
        assert_eq!(aabb.max, Vec3::new(15.0, 8.0, -5.0));
    }

    #[test]
    fn test_corners_cover_box() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::new(1.0, 2.0, 3.0));
        let corners = aabb.corners();
        assert_eq!(corners[0], Vec3::ZERO);
        assert_eq!(corners[7], Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(corners[2], Vec3::new(0.0, 2.0, 0.0));
    }

    #[test]
    fn test_inflated() {
        let aabb = Aabb::new(Vec3::ZERO, Vec3::ONE).inflated(0.5);
        assert_eq!(aabb.min, Vec3::splat(-0.5));
        assert_eq!(aabb.max, Vec3::splat(1.5));
        assert_eq!(aabb.center(), Vec3::splat(0.5));
    }
}
