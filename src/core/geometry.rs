use std::sync::Arc;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::mesh::{Aabb, ConvexMesh, HeightField, HeightFieldScale, TriangleMesh};
use super::types::Transform;

/// Collision geometry of a rigid shape.
///
/// Capsules are aligned with the local X axis. Planes pass through the local
/// origin with outward normal +X.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Geometry {
    Sphere {
        radius: f32,
    },
    Capsule {
        radius: f32,
        half_height: f32,
    },
    Plane,
    Box {
        half_extents: Vec3,
    },
    ConvexMesh {
        mesh: Arc<ConvexMesh>,
        scale: f32,
    },
    TriangleMesh {
        mesh: Arc<TriangleMesh>,
        scale: Vec3,
    },
    HeightField {
        field: Arc<HeightField>,
        scale: HeightFieldScale,
    },
}

/// Geometry discriminant, ordered the way cloth collision budgets are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GeometryKind {
    Sphere = 0,
    Capsule = 1,
    Plane = 2,
    Box = 3,
    ConvexMesh = 4,
    TriangleMesh = 5,
    HeightField = 6,
}

impl GeometryKind {
    pub const COUNT: usize = 7;

    pub const ALL: [GeometryKind; Self::COUNT] = [
        GeometryKind::Sphere,
        GeometryKind::Capsule,
        GeometryKind::Plane,
        GeometryKind::Box,
        GeometryKind::ConvexMesh,
        GeometryKind::TriangleMesh,
        GeometryKind::HeightField,
    ];

    pub fn is_mesh_like(self) -> bool {
        matches!(self, GeometryKind::TriangleMesh | GeometryKind::HeightField)
    }
}

impl Geometry {
    pub fn sphere(radius: f32) -> Self {
        Geometry::Sphere { radius }
    }

    pub fn capsule(radius: f32, half_height: f32) -> Self {
        Geometry::Capsule {
            radius,
            half_height,
        }
    }

    pub fn cuboid(half_extents: Vec3) -> Self {
        Geometry::Box { half_extents }
    }

    pub fn convex(mesh: ConvexMesh) -> Self {
        Geometry::ConvexMesh {
            mesh: Arc::new(mesh),
            scale: 1.0,
        }
    }

    pub fn triangle_mesh(mesh: TriangleMesh) -> Self {
        Geometry::TriangleMesh {
            mesh: Arc::new(mesh),
            scale: Vec3::ONE,
        }
    }

    pub fn height_field(field: HeightField, scale: HeightFieldScale) -> Self {
        Geometry::HeightField {
            field: Arc::new(field),
            scale,
        }
    }

    pub fn kind(&self) -> GeometryKind {
        match self {
            Geometry::Sphere { .. } => GeometryKind::Sphere,
            Geometry::Capsule { .. } => GeometryKind::Capsule,
            Geometry::Plane => GeometryKind::Plane,
            Geometry::Box { .. } => GeometryKind::Box,
            Geometry::ConvexMesh { .. } => GeometryKind::ConvexMesh,
            Geometry::TriangleMesh { .. } => GeometryKind::TriangleMesh,
            Geometry::HeightField { .. } => GeometryKind::HeightField,
        }
    }

    /// Bounds in the shape's local frame. Planes are unbounded.
    pub fn local_bounds(&self) -> Aabb {
        match self {
            Geometry::Sphere { radius } => Aabb::from_center_extents(Vec3::ZERO, Vec3::splat(*radius)),
            Geometry::Capsule {
                radius,
                half_height,
            } => Aabb::from_center_extents(
                Vec3::ZERO,
                Vec3::new(half_height + radius, *radius, *radius),
            ),
            Geometry::Plane => Aabb::new(
                Vec3::new(f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
                Vec3::new(0.0, f32::INFINITY, f32::INFINITY),
            ),
            Geometry::Box { half_extents } => Aabb::from_center_extents(Vec3::ZERO, *half_extents),
            Geometry::ConvexMesh { mesh, scale } => {
                Aabb::new(mesh.bounds.min * *scale, mesh.bounds.max * *scale)
            }
            Geometry::TriangleMesh { mesh, scale } => {
                let a = mesh.bounds.min * *scale;
                let b = mesh.bounds.max * *scale;
                Aabb::new(a.min(b), a.max(b))
            }
            Geometry::HeightField { field, scale } => field.local_bounds(scale),
        }
    }

    /// World bounds for a shape placed at `pose`.
    pub fn world_bounds(&self, pose: &Transform) -> Aabb {
        match self {
            Geometry::Sphere { radius } => {
                Aabb::from_center_extents(pose.position, Vec3::splat(*radius))
            }
            Geometry::Plane => {
                let normal = pose.rotation * Vec3::X;
                let mut min = Vec3::splat(f32::MIN);
                let mut max = Vec3::splat(f32::MAX);
                // An axis-aligned plane only bounds one axis.
                for axis in 0..3 {
                    if (normal[axis].abs() - 1.0).abs() < 1e-6 {
                        if normal[axis] > 0.0 {
                            max[axis] = pose.position[axis];
                        } else {
                            min[axis] = pose.position[axis];
                        }
                    }
                }
                Aabb::new(min, max)
            }
            _ => self.local_bounds().transformed(pose),
        }
    }

    /// Support point in the shape's local frame (convex kinds only).
    pub fn local_support(&self, direction: Vec3) -> Vec3 {
        let dir = direction.normalize_or_zero();
        match self {
            Geometry::Sphere { radius } => dir * *radius,
            Geometry::Capsule {
                radius,
                half_height,
            } => {
                let axis = Vec3::X * half_height.copysign(if dir.x == 0.0 { 1.0 } else { dir.x });
                axis + dir * *radius
            }
            Geometry::Box { half_extents } => Vec3::new(
                half_extents.x.copysign(direction.x),
                half_extents.y.copysign(direction.y),
                half_extents.z.copysign(direction.z),
            ),
            Geometry::ConvexMesh { mesh, scale } => farthest_vertex(&mesh.vertices, direction) * *scale,
            Geometry::TriangleMesh { mesh, scale } => {
                farthest_vertex(&mesh.vertices, direction * *scale) * *scale
            }
            Geometry::Plane | Geometry::HeightField { .. } => Vec3::ZERO,
        }
    }
}

fn farthest_vertex(vertices: &[Vec3], direction: Vec3) -> Vec3 {
    vertices
        .iter()
        .copied()
        .fold((Vec3::ZERO, f32::NEG_INFINITY), |(best, best_dot), v| {
            let d = v.dot(direction);
            if d > best_dot {
                (v, d)
            } else {
                (best, best_dot)
            }
        })
        .0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capsule_bounds_follow_x_axis() {
        let bounds = Geometry::capsule(0.5, 2.0).local_bounds();
        assert_eq!(bounds.max, Vec3::new(2.5, 0.5, 0.5));
    }

    #[test]
    fn ground_plane_bounds_only_clip_vertical_axis() {
        let pose = Transform::from_position_rotation(
            Vec3::ZERO,
            glam::Quat::from_rotation_z(std::f32::consts::FRAC_PI_2),
        );
        let bounds = Geometry::Plane.world_bounds(&pose);
        assert!(bounds.max.y.abs() < 1e-5);
        assert_eq!(bounds.max.x, f32::MAX);
    }

    #[test]
    fn box_support_picks_corner() {
        let support = Geometry::cuboid(Vec3::new(1.0, 2.0, 3.0)).local_support(Vec3::new(-1.0, 1.0, -1.0));
        assert_eq!(support, Vec3::new(-1.0, 2.0, -3.0));
    }
}
