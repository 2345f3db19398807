use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Rigid pose: rotation followed by translation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::IDENTITY
        }
    }

    pub fn from_position_rotation(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    /// Applies `other` in this transform's frame: `self * other`.
    pub fn combine(&self, other: &Transform) -> Transform {
        Transform {
            position: self.position + self.rotation * other.position,
            rotation: (self.rotation * other.rotation).normalize(),
        }
    }

    pub fn inverse(&self) -> Transform {
        let rotation = self.rotation.conjugate();
        Transform {
            position: rotation * -self.position,
            rotation,
        }
    }

    /// Expresses `other` relative to this frame: `self⁻¹ * other`.
    pub fn transform_inv(&self, other: &Transform) -> Transform {
        self.inverse().combine(other)
    }

    #[inline]
    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.position + self.rotation * point
    }

    #[inline]
    pub fn transform_vector(&self, vector: Vec3) -> Vec3 {
        self.rotation * vector
    }

    #[inline]
    pub fn inverse_transform_point(&self, point: Vec3) -> Vec3 {
        self.rotation.conjugate() * (point - self.position)
    }

    #[inline]
    pub fn inverse_transform_vector(&self, vector: Vec3) -> Vec3 {
        self.rotation.conjugate() * vector
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn inverse_round_trips_points() {
        let pose = Transform::from_position_rotation(
            Vec3::new(1.0, -2.0, 3.0),
            Quat::from_rotation_y(0.7),
        );
        let point = Vec3::new(0.3, 0.4, 0.5);
        let back = pose.inverse_transform_point(pose.transform_point(point));
        assert_relative_eq!(back.x, point.x, epsilon = 1e-5);
        assert_relative_eq!(back.y, point.y, epsilon = 1e-5);
        assert_relative_eq!(back.z, point.z, epsilon = 1e-5);
    }

    #[test]
    fn relative_pose_composes_back() {
        let cloth = Transform::from_position_rotation(Vec3::X, Quat::from_rotation_z(0.4));
        let shape = Transform::from_position_rotation(Vec3::Y * 2.0, Quat::from_rotation_x(-0.3));
        let local = cloth.transform_inv(&shape);
        let world = cloth.combine(&local);
        assert_relative_eq!(world.position.distance(shape.position), 0.0, epsilon = 1e-5);
        assert!(world.rotation.dot(shape.rotation).abs() > 0.9999);
    }
}
