//! Boolean overlap tests used by trigger evaluation and the packet pre-check.

use glam::Vec3;
use smallvec::SmallVec;

use crate::core::geometry::Geometry;
use crate::core::mesh::{triangle_bounds, Aabb};
use crate::core::types::Transform;
use crate::utils::math::{plane_distance, plane_from_point_normal, segment_segment_distance_squared};

/// Gilbert-Johnson-Keerthi (GJK) boolean intersection test.
///
/// Shapes that merely touch count as overlapping.
pub struct GjkOverlap;

impl GjkOverlap {
    const MAX_ITERATIONS: usize = 32;
    const EPSILON: f32 = 1e-6;

    /// Runs GJK over two support functions. `hint` seeds the first search
    /// direction and receives the last one, so coherent pairs converge quickly.
    pub fn intersect(
        support_a: impl Fn(Vec3) -> Vec3,
        support_b: impl Fn(Vec3) -> Vec3,
        hint: &mut Vec3,
    ) -> bool {
        let mut simplex: SmallVec<[Vec3; 4]> = SmallVec::new();
        let mut direction = if hint.length_squared() < Self::EPSILON {
            Vec3::X
        } else {
            *hint
        };

        for _ in 0..Self::MAX_ITERATIONS {
            let point = support_a(direction) - support_b(-direction);
            if point.dot(direction) < 0.0 {
                *hint = direction;
                return false;
            }

            simplex.push(point);
            if Self::contains_origin(&mut simplex, &mut direction) {
                *hint = direction;
                return true;
            }
            if direction.length_squared() < Self::EPSILON {
                // Origin lies on the simplex.
                return true;
            }
        }

        false
    }

    fn contains_origin(simplex: &mut SmallVec<[Vec3; 4]>, direction: &mut Vec3) -> bool {
        match simplex.len() {
            1 => {
                *direction = -simplex[0];
                false
            }
            2 => {
                let a = simplex[1];
                let b = simplex[0];
                let ab = b - a;
                let ao = -a;

                let dir = ab.cross(ao).cross(ab);
                if dir.length_squared() < Self::EPSILON {
                    if ao.length_squared() < Self::EPSILON || (0.0..=ab.length_squared()).contains(&ab.dot(ao)) {
                        *direction = Vec3::ZERO;
                    } else {
                        let axis = if ab.x.abs() < 0.1 { Vec3::X } else { Vec3::Y };
                        *direction = ab.cross(axis);
                    }
                } else {
                    *direction = dir;
                }
                false
            }
            3 => {
                let a = simplex[2];
                let b = simplex[1];
                let c = simplex[0];
                let ab = b - a;
                let ac = c - a;
                let ao = -a;
                let abc = ab.cross(ac);

                if abc.cross(ac).dot(ao) > 0.0 {
                    simplex.remove(1);
                    *direction = ac.cross(ao).cross(ac);
                } else if ab.cross(abc).dot(ao) > 0.0 {
                    simplex.remove(0);
                    *direction = ab.cross(ao).cross(ab);
                } else if abc.length_squared() < Self::EPSILON {
                    *direction = Vec3::Y;
                } else {
                    let side = abc.dot(ao);
                    if side.abs() < Self::EPSILON {
                        *direction = Vec3::ZERO;
                    } else if side > 0.0 {
                        *direction = abc;
                    } else {
                        // Keep the winding consistent with the tetrahedron case.
                        simplex.swap(0, 1);
                        *direction = -abc;
                    }
                }
                false
            }
            4 => {
                let a = simplex[3];
                let b = simplex[2];
                let c = simplex[1];
                let d = simplex[0];
                let ab = b - a;
                let ac = c - a;
                let ad = d - a;
                let ao = -a;
                let abc = ab.cross(ac);
                let acd = ac.cross(ad);
                let adb = ad.cross(ab);

                if abc.dot(ao) > 0.0 {
                    simplex.remove(0);
                    *direction = abc;
                    false
                } else if acd.dot(ao) > 0.0 {
                    simplex.remove(2);
                    *direction = acd;
                    false
                } else if adb.dot(ao) > 0.0 {
                    simplex.remove(1);
                    *direction = adb;
                    false
                } else {
                    true
                }
            }
            _ => false,
        }
    }
}

fn world_support(geometry: &Geometry, pose: &Transform, direction: Vec3) -> Vec3 {
    let local = geometry.local_support(pose.inverse_transform_vector(direction));
    pose.transform_point(local)
}

/// Core segment and radius of spheres and capsules.
fn swept_sphere(geometry: &Geometry, pose: &Transform) -> Option<(Vec3, Vec3, f32)> {
    match *geometry {
        Geometry::Sphere { radius } => Some((pose.position, pose.position, radius)),
        Geometry::Capsule { radius, half_height } => {
            let axis = pose.transform_vector(Vec3::X * half_height);
            Some((pose.position - axis, pose.position + axis, radius))
        }
        _ => None,
    }
}

fn triangle_support(triangle: &[Vec3; 3], direction: Vec3) -> Vec3 {
    let mut best = triangle[0];
    for &v in &triangle[1..] {
        if v.dot(direction) > best.dot(direction) {
            best = v;
        }
    }
    best
}

fn is_convex(geometry: &Geometry) -> bool {
    matches!(
        geometry,
        Geometry::Sphere { .. } | Geometry::Capsule { .. } | Geometry::Box { .. } | Geometry::ConvexMesh { .. }
    )
}

/// Visits the triangles of a mesh-like geometry overlapping `region` (in the
/// geometry's local frame). Returns false for non-mesh geometry.
fn for_each_triangle(geometry: &Geometry, region: &Aabb, visit: &mut dyn FnMut([Vec3; 3]) -> bool) -> bool {
    let mut stop = false;
    match geometry {
        Geometry::TriangleMesh { mesh, scale } => mesh.triangles_overlapping(*scale, region, |tri| {
            if !stop {
                stop = visit(tri);
            }
        }),
        Geometry::HeightField { field, scale } => field.triangles_overlapping(scale, region, |tri| {
            if !stop {
                stop = visit(tri);
            }
        }),
        _ => return false,
    }
    stop
}

/// Convex shape against the half-space behind the plane at `plane_pose`.
fn convex_plane_overlap(convex: &Geometry, convex_pose: &Transform, plane_pose: &Transform) -> bool {
    let normal = plane_pose.transform_vector(Vec3::X);
    let plane = plane_from_point_normal(plane_pose.position, normal);
    plane_distance(plane, world_support(convex, convex_pose, -normal)) <= 0.0
}

fn convex_mesh_overlap(
    convex: &Geometry,
    convex_pose: &Transform,
    mesh: &Geometry,
    mesh_pose: &Transform,
    hint: &mut Vec3,
) -> bool {
    let region = convex.world_bounds(convex_pose).transformed(&mesh_pose.inverse());
    for_each_triangle(mesh, &region, &mut |triangle| {
        let world = triangle.map(|v| mesh_pose.transform_point(v));
        GjkOverlap::intersect(
            |d| world_support(convex, convex_pose, d),
            |d| triangle_support(&world, d),
            hint,
        )
    })
}

/// Exact overlap of two placed geometries.
///
/// `hint` caches the last separating direction between calls for the same pair.
/// Plane-plane and mesh-mesh pairs fall back to bounds overlap.
pub fn geometries_overlap(
    geometry0: &Geometry,
    pose0: &Transform,
    geometry1: &Geometry,
    pose1: &Transform,
    hint: &mut Vec3,
) -> bool {
    if let (Some((p0, p1, r0)), Some((q0, q1, r1))) = (swept_sphere(geometry0, pose0), swept_sphere(geometry1, pose1)) {
        return segment_segment_distance_squared(p0, p1, q0, q1) <= (r0 + r1) * (r0 + r1);
    }
    match (is_convex(geometry0), is_convex(geometry1)) {
        (true, true) => GjkOverlap::intersect(
            |d| world_support(geometry0, pose0, d),
            |d| world_support(geometry1, pose1, d),
            hint,
        ),
        (true, false) => match geometry1 {
            Geometry::Plane => convex_plane_overlap(geometry0, pose0, pose1),
            _ => convex_mesh_overlap(geometry0, pose0, geometry1, pose1, hint),
        },
        (false, true) => match geometry0 {
            Geometry::Plane => convex_plane_overlap(geometry1, pose1, pose0),
            _ => convex_mesh_overlap(geometry1, pose1, geometry0, pose0, hint),
        },
        (false, false) => geometry0
            .world_bounds(pose0)
            .intersects(&geometry1.world_bounds(pose1)),
    }
}

/// Pre-check for a particle packet against a rigid shape. Mesh and heightfield
/// shapes must have at least one triangle touching the packet bounds; other
/// shapes only need overlapping world bounds.
pub fn packet_overlaps_shape(packet_bounds: &Aabb, geometry: &Geometry, pose: &Transform) -> bool {
    if !geometry.world_bounds(pose).intersects(packet_bounds) {
        return false;
    }
    if !geometry.kind().is_mesh_like() {
        return true;
    }
    let inverse = pose.inverse();
    let local = packet_bounds.transformed(&inverse);
    for_each_triangle(geometry, &local, &mut |triangle| {
        let world = triangle.map(|v| pose.transform_point(v));
        triangle_bounds(&world).intersects(packet_bounds)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mesh::{HeightField, HeightFieldScale};
    use glam::Quat;

    fn at(x: f32, y: f32, z: f32) -> Transform {
        Transform::from_position(Vec3::new(x, y, z))
    }

    #[test]
    fn spheres_overlap_until_separated() {
        let sphere = Geometry::sphere(1.0);
        let mut hint = Vec3::ZERO;
        assert!(geometries_overlap(&sphere, &at(0.0, 0.0, 0.0), &sphere, &at(1.5, 0.0, 0.0), &mut hint));
        assert!(!geometries_overlap(&sphere, &at(0.0, 0.0, 0.0), &sphere, &at(2.5, 0.0, 0.0), &mut hint));
    }

    #[test]
    fn capsule_reaches_along_its_axis() {
        let capsule = Geometry::capsule(0.5, 2.0);
        let sphere = Geometry::sphere(0.5);
        let mut hint = Vec3::ZERO;
        assert!(geometries_overlap(&capsule, &at(0.0, 0.0, 0.0), &sphere, &at(2.9, 0.0, 0.0), &mut hint));
        assert!(!geometries_overlap(&capsule, &at(0.0, 0.0, 0.0), &sphere, &at(0.0, 1.1, 0.0), &mut hint));
    }

    #[test]
    fn rotated_box_against_sphere() {
        let cube = Geometry::cuboid(Vec3::splat(1.0));
        let pose = Transform::from_position_rotation(Vec3::ZERO, Quat::from_rotation_y(std::f32::consts::FRAC_PI_4));
        let sphere = Geometry::sphere(0.2);
        let mut hint = Vec3::ZERO;
        // Corner reaches sqrt(2) along X after the rotation.
        assert!(geometries_overlap(&cube, &pose, &sphere, &at(1.5, 0.0, 0.0), &mut hint));
        assert!(!geometries_overlap(&cube, &pose, &sphere, &at(1.7, 0.0, 0.0), &mut hint));
    }

    #[test]
    fn plane_is_a_half_space() {
        let ground = Transform::from_position_rotation(Vec3::ZERO, Quat::from_rotation_z(std::f32::consts::FRAC_PI_2));
        let sphere = Geometry::sphere(0.5);
        let mut hint = Vec3::ZERO;
        assert!(geometries_overlap(&Geometry::Plane, &ground, &sphere, &at(3.0, 0.4, 0.0), &mut hint));
        assert!(!geometries_overlap(&sphere, &at(3.0, 0.6, 0.0), &Geometry::Plane, &ground, &mut hint));
    }

    #[test]
    fn packet_precheck_uses_heightfield_triangles() {
        let field = Geometry::height_field(
            HeightField::flat(4, 4, 0.0),
            HeightFieldScale {
                height_scale: 1.0,
                row_scale: 1.0,
                column_scale: 1.0,
            },
        );
        let above = Aabb::new(Vec3::new(0.5, 0.5, 0.5), Vec3::new(1.5, 1.5, 1.5));
        let touching = Aabb::new(Vec3::new(0.5, -0.1, 0.5), Vec3::new(1.5, 0.1, 1.5));
        assert!(!packet_overlaps_shape(&above, &field, &Transform::default()));
        assert!(packet_overlaps_shape(&touching, &field, &Transform::default()));
    }
}
