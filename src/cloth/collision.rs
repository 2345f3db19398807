//! Projection of rigid shapes overlapping a cloth into the cloth solver's
//! bounded collision primitive budget.
//!
//! Tracked shapes live in one array ordered by geometry kind (spheres,
//! capsules, planes, boxes, convexes, meshes, height fields). Each kind owns
//! a contiguous slice; adds append to the end of their slice and removes
//! compact it.

use std::collections::HashMap;

use glam::{Vec3, Vec4};
use log::{debug, warn};

use super::solver::ClothSolver;
use crate::config::{MAX_COLLISION_CAPSULES, MAX_COLLISION_PLANES, MAX_COLLISION_SPHERES};
use crate::core::geometry::{Geometry, GeometryKind};
use crate::core::handles::ShapeId;
use crate::core::mesh::{box_planes, Aabb};
use crate::core::types::Transform;
use crate::utils::logging::warn_capacity_exceeded;
use crate::utils::math::{bit_range_mask, transform_plane};

/// Geometry and world pose of a rigid shape.
#[derive(Debug, Clone, Copy)]
pub struct RigidShapeRef<'a> {
    pub geometry: &'a Geometry,
    pub pose: Transform,
}

/// Source of rigid shape data for the harvester.
pub trait ShapeLookup {
    fn rigid_shape(&self, shape: ShapeId) -> Option<RigidShapeRef<'_>>;
}

impl ShapeLookup for HashMap<ShapeId, (Geometry, Transform)> {
    fn rigid_shape(&self, shape: ShapeId) -> Option<RigidShapeRef<'_>> {
        self.get(&shape).map(|(geometry, pose)| RigidShapeRef {
            geometry,
            pose: *pose,
        })
    }
}

/// Cloth placement used to express rigid primitives in cloth-local space.
#[derive(Debug, Clone, Copy)]
pub struct ClothFrame {
    pub pose: Transform,
    /// Bounds of the cloth particles in cloth-local space.
    pub local_bounds: Aabb,
    pub contact_offset: f32,
}

/// Primitives supplied directly by the user; they occupy the front of each solver buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserPrimitiveCounts {
    pub spheres: u32,
    pub capsules: u32,
    pub planes: u32,
    pub convexes: u32,
    pub triangles: u32,
}

/// A rigid shape currently projected into the cloth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedShape {
    pub shape: ShapeId,
    pub kind: GeometryKind,
    /// Planes consumed from the shared plane budget.
    pub planes: u32,
    /// Shape pose relative to the cloth at the update before the latest one
    /// (meshes and height fields).
    pub previous_local: Option<Transform>,
    /// Shape pose relative to the cloth at the latest update.
    pub latest_local: Option<Transform>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PrimitiveGroup {
    SpheresAndCapsules,
    PlanesAndConvexes,
    Triangles,
}

impl PrimitiveGroup {
    fn of(kind: GeometryKind) -> Self {
        match kind {
            GeometryKind::Sphere | GeometryKind::Capsule => PrimitiveGroup::SpheresAndCapsules,
            GeometryKind::Plane | GeometryKind::Box | GeometryKind::ConvexMesh => {
                PrimitiveGroup::PlanesAndConvexes
            }
            GeometryKind::TriangleMesh | GeometryKind::HeightField => PrimitiveGroup::Triangles,
        }
    }
}

/// Rigid primitives in cloth-local space. Capsule indices and convex masks
/// are relative to the start of the rigid sphere/plane sections.
#[derive(Debug, Clone, Default)]
struct RigidPrimitives {
    spheres: Vec<Vec4>,
    capsules: Vec<[u32; 2]>,
    planes: Vec<Vec4>,
    convexes: Vec<u32>,
    previous_triangles: Vec<Vec3>,
    current_triangles: Vec<Vec3>,
}

/// Rigid element counts last written to the solver.
#[derive(Debug, Clone, Copy, Default)]
struct PushedCounts {
    spheres: u32,
    capsules: u32,
    planes: u32,
    convexes: u32,
}

/// Per-cloth collision-shape budget and the primitives derived from it.
#[derive(Debug, Clone, Default)]
pub struct ClothCollisionShapes {
    counts: [u32; GeometryKind::COUNT],
    shape_sims: Vec<TrackedShape>,
    user: UserPrimitiveCounts,
    plane_budget: u32,
    primitives: RigidPrimitives,
    pushed: PushedCounts,
    /// Current vertices of the user triangles as last set.
    user_triangles: Vec<Vec3>,
}

impl ClothCollisionShapes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, kind: GeometryKind) -> u32 {
        self.counts[kind as usize]
    }

    pub fn total_count(&self) -> u32 {
        self.counts.iter().sum()
    }

    pub fn user_counts(&self) -> UserPrimitiveCounts {
        self.user
    }

    /// Every tracked shape in kind order.
    pub fn shape_sims(&self) -> &[TrackedShape] {
        &self.shape_sims
    }

    fn offset(&self, kind: GeometryKind) -> usize {
        self.counts[..kind as usize].iter().sum::<u32>() as usize
    }

    pub fn shapes_of_kind(&self, kind: GeometryKind) -> &[TrackedShape] {
        let start = self.offset(kind);
        &self.shape_sims[start..start + self.count(kind) as usize]
    }

    pub fn contains(&self, shape: ShapeId) -> bool {
        self.shape_sims.iter().any(|tracked| tracked.shape == shape)
    }

    /// Spheres in use: user spheres, sphere shapes and two per capsule.
    pub fn sphere_budget_used(&self) -> u32 {
        self.user.spheres + self.count(GeometryKind::Sphere) + 2 * self.count(GeometryKind::Capsule)
    }

    pub fn plane_budget_used(&self) -> u32 {
        self.user.planes + self.plane_budget
    }

    fn has_budget(&self, kind: GeometryKind, planes: u32) -> bool {
        match kind {
            GeometryKind::Sphere => {
                if self.sphere_budget_used() + 1 > MAX_COLLISION_SPHERES {
                    warn_capacity_exceeded("cloth collision sphere", MAX_COLLISION_SPHERES);
                    return false;
                }
            }
            GeometryKind::Capsule => {
                if self.sphere_budget_used() + 2 > MAX_COLLISION_SPHERES {
                    warn_capacity_exceeded("cloth collision sphere", MAX_COLLISION_SPHERES);
                    return false;
                }
                if self.user.capsules + self.count(GeometryKind::Capsule) + 1 > MAX_COLLISION_CAPSULES {
                    warn_capacity_exceeded("cloth collision capsule", MAX_COLLISION_CAPSULES);
                    return false;
                }
            }
            GeometryKind::Plane | GeometryKind::Box | GeometryKind::ConvexMesh => {
                if planes == 0 {
                    warn!("convex collision shape without planes ignored by cloth");
                    return false;
                }
                if self.plane_budget_used() + planes > MAX_COLLISION_PLANES {
                    warn_capacity_exceeded("cloth collision plane", MAX_COLLISION_PLANES);
                    return false;
                }
            }
            GeometryKind::TriangleMesh | GeometryKind::HeightField => {}
        }
        true
    }

    /// Starts tracking `shape`. Returns `false` without mutating anything when
    /// the shape is already tracked, unknown, or over its kind's budget.
    pub fn add_collision_shape(
        &mut self,
        shape: ShapeId,
        lookup: &dyn ShapeLookup,
        frame: &ClothFrame,
        solver: &mut dyn ClothSolver,
    ) -> bool {
        if self.contains(shape) {
            return false;
        }
        let Some(rigid) = lookup.rigid_shape(shape) else {
            warn!("cloth collision add for unknown shape {shape:?}");
            return false;
        };
        let kind = rigid.geometry.kind();
        let planes = match rigid.geometry {
            Geometry::Plane => 1,
            Geometry::Box { .. } => 6,
            Geometry::ConvexMesh { mesh, .. } => mesh.polygon_count(),
            _ => 0,
        };
        if !self.has_budget(kind, planes) {
            return false;
        }

        let local = frame.pose.transform_inv(&rigid.pose);
        let position = self.offset(kind) + self.count(kind) as usize;
        self.shape_sims.insert(
            position,
            TrackedShape {
                shape,
                kind,
                planes,
                previous_local: kind.is_mesh_like().then_some(local),
                latest_local: kind.is_mesh_like().then_some(local),
            },
        );
        self.counts[kind as usize] += 1;
        self.plane_budget += planes;

        self.refresh_group(PrimitiveGroup::of(kind), lookup, frame, solver, false);
        true
    }

    /// Stops tracking `shape` and clears its primitives from the solver.
    pub fn remove_collision_shape(
        &mut self,
        shape: ShapeId,
        lookup: &dyn ShapeLookup,
        frame: &ClothFrame,
        solver: &mut dyn ClothSolver,
    ) -> bool {
        let Some(position) = self.shape_sims.iter().position(|t| t.shape == shape) else {
            return false;
        };
        let removed = self.shape_sims.remove(position);
        self.counts[removed.kind as usize] -= 1;
        self.plane_budget -= removed.planes;

        self.refresh_group(PrimitiveGroup::of(removed.kind), lookup, frame, solver, false);
        true
    }

    /// Drops every tracked rigid shape.
    pub fn clear(&mut self, solver: &mut dyn ClothSolver) {
        if self.shape_sims.is_empty() {
            return;
        }
        self.shape_sims.clear();
        self.counts = [0; GeometryKind::COUNT];
        self.plane_budget = 0;
        self.primitives = RigidPrimitives::default();
        self.push_spheres_and_capsules(solver);
        self.push_planes_and_convexes(solver);
        self.push_triangles(solver);
    }

    /// Re-derives every tracked primitive from current rigid poses and pushes
    /// the full set to the solver.
    pub fn update_rigid_body_positions(
        &mut self,
        lookup: &dyn ShapeLookup,
        frame: &ClothFrame,
        solver: &mut dyn ClothSolver,
    ) {
        for group in [
            PrimitiveGroup::SpheresAndCapsules,
            PrimitiveGroup::PlanesAndConvexes,
            PrimitiveGroup::Triangles,
        ] {
            self.refresh_group(group, lookup, frame, solver, true);
        }
    }

    /// Rebuilds one primitive group. Only `advance` refreshes move the
    /// previous mesh poses forward; add/remove refreshes keep them.
    fn refresh_group(
        &mut self,
        group: PrimitiveGroup,
        lookup: &dyn ShapeLookup,
        frame: &ClothFrame,
        solver: &mut dyn ClothSolver,
        advance: bool,
    ) {
        match group {
            PrimitiveGroup::SpheresAndCapsules => {
                self.build_spheres_and_capsules(lookup, frame);
                self.push_spheres_and_capsules(solver);
            }
            PrimitiveGroup::PlanesAndConvexes => {
                self.build_planes_and_convexes(lookup, frame);
                self.push_planes_and_convexes(solver);
            }
            PrimitiveGroup::Triangles => {
                self.build_triangles(lookup, frame, advance);
                self.push_triangles(solver);
            }
        }
    }

    fn local_pose(lookup: &dyn ShapeLookup, frame: &ClothFrame, shape: ShapeId) -> Option<(Geometry, Transform)> {
        let rigid = lookup.rigid_shape(shape);
        if rigid.is_none() {
            debug!("tracked cloth collision shape {shape:?} no longer resolves");
        }
        rigid.map(|r| (r.geometry.clone(), frame.pose.transform_inv(&r.pose)))
    }

    fn build_spheres_and_capsules(&mut self, lookup: &dyn ShapeLookup, frame: &ClothFrame) {
        let start = self.offset(GeometryKind::Sphere);
        let end = start + (self.count(GeometryKind::Sphere) + self.count(GeometryKind::Capsule)) as usize;
        let spheres = &mut self.primitives.spheres;
        let capsules = &mut self.primitives.capsules;
        spheres.clear();
        capsules.clear();

        for tracked in &self.shape_sims[start..end] {
            let Some((geometry, local)) = Self::local_pose(lookup, frame, tracked.shape) else {
                continue;
            };
            match geometry {
                Geometry::Sphere { radius } => spheres.push(local.position.extend(radius)),
                Geometry::Capsule {
                    radius,
                    half_height,
                } => {
                    let first = spheres.len() as u32;
                    let axis = local.transform_vector(Vec3::X * half_height);
                    spheres.push((local.position - axis).extend(radius));
                    spheres.push((local.position + axis).extend(radius));
                    capsules.push([first, first + 1]);
                }
                _ => {}
            }
        }
    }

    fn build_planes_and_convexes(&mut self, lookup: &dyn ShapeLookup, frame: &ClothFrame) {
        let start = self.offset(GeometryKind::Plane);
        let end = self.offset(GeometryKind::TriangleMesh);
        let planes = &mut self.primitives.planes;
        let convexes = &mut self.primitives.convexes;
        planes.clear();
        convexes.clear();

        for tracked in &self.shape_sims[start..end] {
            let Some((geometry, local)) = Self::local_pose(lookup, frame, tracked.shape) else {
                continue;
            };
            let first = planes.len() as u32;
            let mut push = |plane: Vec4| planes.push(transform_plane(plane, local.rotation, local.position));
            match &geometry {
                Geometry::Plane => push(Vec4::new(1.0, 0.0, 0.0, 0.0)),
                Geometry::Box { half_extents } => box_planes(*half_extents).into_iter().for_each(push),
                Geometry::ConvexMesh { mesh, scale } => mesh
                    .polygons
                    .iter()
                    .map(|p| p.truncate().extend(p.w * *scale))
                    .for_each(push),
                _ => {}
            }
            let added = planes.len() as u32 - first;
            convexes.push(bit_range_mask(first, added));
        }
    }

    fn build_triangles(&mut self, lookup: &dyn ShapeLookup, frame: &ClothFrame, advance: bool) {
        let region = frame.local_bounds.inflated(frame.contact_offset);
        let start = self.offset(GeometryKind::TriangleMesh);
        let previous = &mut self.primitives.previous_triangles;
        let current = &mut self.primitives.current_triangles;
        previous.clear();
        current.clear();

        for tracked in &mut self.shape_sims[start..] {
            let Some((geometry, local)) = Self::local_pose(lookup, frame, tracked.shape) else {
                continue;
            };
            let last = if advance {
                let last = tracked.latest_local.unwrap_or(local);
                tracked.previous_local = Some(last);
                tracked.latest_local = Some(local);
                last
            } else {
                tracked.previous_local.unwrap_or(local)
            };
            if region.is_empty() {
                continue;
            }

            let shape_region = region.transformed(&local.inverse());
            let mut emit = |triangle: [Vec3; 3]| {
                for vertex in triangle {
                    previous.push(last.transform_point(vertex));
                    current.push(local.transform_point(vertex));
                }
            };
            match &geometry {
                Geometry::TriangleMesh { mesh, scale } => {
                    mesh.triangles_overlapping(*scale, &shape_region, &mut emit)
                }
                Geometry::HeightField { field, scale } => {
                    field.triangles_overlapping(scale, &shape_region, &mut emit)
                }
                _ => {}
            }
        }
    }

    fn push_spheres_and_capsules(&mut self, solver: &mut dyn ClothSolver) {
        let base = self.user.spheres;
        let spheres = &self.primitives.spheres;
        solver.set_spheres(spheres, base, base + self.pushed.spheres);
        self.pushed.spheres = spheres.len() as u32;

        let capsules: Vec<[u32; 2]> = self
            .primitives
            .capsules
            .iter()
            .map(|[a, b]| [a + base, b + base])
            .collect();
        let first = self.user.capsules;
        solver.set_capsules(&capsules, first, first + self.pushed.capsules);
        self.pushed.capsules = capsules.len() as u32;
    }

    fn push_planes_and_convexes(&mut self, solver: &mut dyn ClothSolver) {
        let base = self.user.planes;
        let planes = &self.primitives.planes;
        solver.set_planes(planes, base, base + self.pushed.planes);
        self.pushed.planes = planes.len() as u32;

        let masks: Vec<u32> = self
            .primitives
            .convexes
            .iter()
            .map(|mask| mask << base)
            .collect();
        let first = self.user.convexes;
        solver.set_convexes(&masks, first, first + self.pushed.convexes);
        self.pushed.convexes = masks.len() as u32;
    }

    fn push_triangles(&mut self, solver: &mut dyn ClothSolver) {
        solver.set_triangles(
            &self.primitives.previous_triangles,
            &self.primitives.current_triangles,
            self.user.triangles,
        );
    }

    /// Replaces the user spheres; rigid spheres and capsule indices shift behind them.
    pub fn set_user_spheres(&mut self, spheres: &[Vec4], solver: &mut dyn ClothSolver) -> bool {
        let rigid = self.sphere_budget_used() - self.user.spheres;
        if spheres.len() as u32 + rigid > MAX_COLLISION_SPHERES {
            warn_capacity_exceeded("cloth collision sphere", MAX_COLLISION_SPHERES);
            return false;
        }
        solver.set_spheres(spheres, 0, self.user.spheres);
        self.user.spheres = spheres.len() as u32;
        self.push_spheres_and_capsules(solver);
        true
    }

    /// Replaces the user capsules; indices refer to user spheres.
    pub fn set_user_capsules(&mut self, capsules: &[[u32; 2]], solver: &mut dyn ClothSolver) -> bool {
        if capsules.len() as u32 + self.count(GeometryKind::Capsule) > MAX_COLLISION_CAPSULES {
            warn_capacity_exceeded("cloth collision capsule", MAX_COLLISION_CAPSULES);
            return false;
        }
        solver.set_capsules(capsules, 0, self.user.capsules);
        self.user.capsules = capsules.len() as u32;
        true
    }

    /// Replaces the user planes; rigid planes and convex masks shift behind them.
    pub fn set_user_planes(&mut self, planes: &[Vec4], solver: &mut dyn ClothSolver) -> bool {
        if planes.len() as u32 + self.plane_budget > MAX_COLLISION_PLANES {
            warn_capacity_exceeded("cloth collision plane", MAX_COLLISION_PLANES);
            return false;
        }
        solver.set_planes(planes, 0, self.user.planes);
        self.user.planes = planes.len() as u32;
        self.push_planes_and_convexes(solver);
        true
    }

    /// Replaces the user convex masks; masks refer to user planes.
    pub fn set_user_convexes(&mut self, masks: &[u32], solver: &mut dyn ClothSolver) -> bool {
        if masks.len() as u32 + self.count_convex_shapes() > MAX_COLLISION_PLANES {
            warn_capacity_exceeded("cloth collision convex", MAX_COLLISION_PLANES);
            return false;
        }
        solver.set_convexes(masks, 0, self.user.convexes);
        self.user.convexes = masks.len() as u32;
        true
    }

    /// Replaces the user triangles (three vertices each) with explicit
    /// start and end positions.
    pub fn set_user_triangles(&mut self, previous: &[Vec3], current: &[Vec3], solver: &mut dyn ClothSolver) {
        solver.set_triangles(previous, current, 0);
        self.user.triangles = (current.len() / 3) as u32;
        self.user_triangles.clear();
        self.user_triangles.extend_from_slice(current);
        self.push_triangles(solver);
    }

    /// Moves the user triangles to `current`. The vertices set last become
    /// the start positions; a changed triangle count starts at rest.
    pub fn move_user_triangles(&mut self, current: &[Vec3], solver: &mut dyn ClothSolver) {
        let previous = if self.user_triangles.len() == current.len() {
            std::mem::take(&mut self.user_triangles)
        } else {
            current.to_vec()
        };
        self.set_user_triangles(&previous, current, solver);
    }

    fn count_convex_shapes(&self) -> u32 {
        self.count(GeometryKind::Plane) + self.count(GeometryKind::Box) + self.count(GeometryKind::ConvexMesh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloth::solver::ClothCollisionBuffers;
    use crate::core::mesh::TriangleMesh;

    fn frame() -> ClothFrame {
        ClothFrame {
            pose: Transform::from_position(Vec3::new(0.0, 1.0, 0.0)),
            local_bounds: Aabb::from_center_extents(Vec3::ZERO, Vec3::ONE),
            contact_offset: 0.1,
        }
    }

    fn shapes(entries: Vec<(u32, Geometry, Vec3)>) -> HashMap<ShapeId, (Geometry, Transform)> {
        entries
            .into_iter()
            .map(|(id, geometry, position)| {
                (ShapeId::from_index(id), (geometry, Transform::from_position(position)))
            })
            .collect()
    }

    #[test]
    fn capsule_spheres_follow_sphere_shapes() {
        let lookup = shapes(vec![
            (0, Geometry::capsule(0.5, 1.0), Vec3::ZERO),
            (1, Geometry::sphere(0.25), Vec3::new(2.0, 1.0, 0.0)),
        ]);
        let mut collision = ClothCollisionShapes::new();
        let mut solver = ClothCollisionBuffers::new();
        assert!(collision.add_collision_shape(ShapeId::from_index(0), &lookup, &frame(), &mut solver));
        assert!(collision.add_collision_shape(ShapeId::from_index(1), &lookup, &frame(), &mut solver));

        assert_eq!(collision.shape_sims()[0].shape, ShapeId::from_index(1));
        assert_eq!(solver.spheres.len(), 3);
        assert_eq!(solver.spheres[0], Vec4::new(2.0, 0.0, 0.0, 0.25));
        assert_eq!(solver.capsules, vec![[1, 2]]);
        assert_eq!(solver.spheres[1].x, -1.0);
        assert_eq!(solver.spheres[1].y, -1.0);
    }

    #[test]
    fn boxes_consume_six_planes_and_one_convex() {
        let lookup = shapes(vec![
            (0, Geometry::Plane, Vec3::ZERO),
            (1, Geometry::cuboid(Vec3::ONE), Vec3::ZERO),
        ]);
        let mut collision = ClothCollisionShapes::new();
        let mut solver = ClothCollisionBuffers::new();
        collision.add_collision_shape(ShapeId::from_index(1), &lookup, &frame(), &mut solver);
        collision.add_collision_shape(ShapeId::from_index(0), &lookup, &frame(), &mut solver);
        assert_eq!(solver.planes.len(), 7);
        assert_eq!(solver.convexes, vec![0b1, 0b111_1110]);
        assert_eq!(collision.plane_budget_used(), 7);

        assert!(collision.remove_collision_shape(ShapeId::from_index(0), &lookup, &frame(), &mut solver));
        assert_eq!(solver.convexes, vec![0b11_1111]);
        assert_eq!(collision.count(GeometryKind::Plane), 0);
    }

    #[test]
    fn user_planes_shift_rigid_masks() {
        let lookup = shapes(vec![(0, Geometry::Plane, Vec3::ZERO)]);
        let mut collision = ClothCollisionShapes::new();
        let mut solver = ClothCollisionBuffers::new();
        collision.add_collision_shape(ShapeId::from_index(0), &lookup, &frame(), &mut solver);
        assert!(collision.set_user_planes(&[Vec4::Y, Vec4::Y], &mut solver));
        assert_eq!(solver.planes.len(), 3);
        assert_eq!(solver.convexes, vec![0b100]);
    }

    #[test]
    fn plane_budget_rejects_overflow() {
        let lookup = shapes(
            (0..6)
                .map(|i| (i, Geometry::cuboid(Vec3::ONE), Vec3::ZERO))
                .collect(),
        );
        let mut collision = ClothCollisionShapes::new();
        let mut solver = ClothCollisionBuffers::new();
        for i in 0..5 {
            assert!(collision.add_collision_shape(ShapeId::from_index(i), &lookup, &frame(), &mut solver));
        }
        assert!(!collision.add_collision_shape(ShapeId::from_index(5), &lookup, &frame(), &mut solver));
        assert_eq!(collision.count(GeometryKind::Box), 5);
        assert_eq!(solver.planes.len(), 30);
    }

    fn flat_triangle() -> Geometry {
        Geometry::triangle_mesh(TriangleMesh::new(
            vec![
                Vec3::new(-0.5, 0.0, -0.5),
                Vec3::new(0.5, 0.0, -0.5),
                Vec3::new(0.0, 0.0, 0.5),
            ],
            vec![[0, 1, 2]],
        ))
    }

    #[test]
    fn adding_a_mesh_keeps_the_motion_of_tracked_meshes() {
        let mut lookup = shapes(vec![
            (0, flat_triangle(), Vec3::new(0.0, 1.0, 0.0)),
            (1, flat_triangle(), Vec3::new(0.0, 0.5, 0.0)),
        ]);
        let mut collision = ClothCollisionShapes::new();
        let mut solver = ClothCollisionBuffers::new();
        assert!(collision.add_collision_shape(ShapeId::from_index(0), &lookup, &frame(), &mut solver));
        assert_eq!(solver.previous_triangles, solver.current_triangles);

        lookup.insert(
            ShapeId::from_index(0),
            (flat_triangle(), Transform::from_position(Vec3::new(0.0, 1.5, 0.0))),
        );
        collision.update_rigid_body_positions(&lookup, &frame(), &mut solver);
        assert!(collision.add_collision_shape(ShapeId::from_index(1), &lookup, &frame(), &mut solver));

        assert_eq!(solver.num_triangles(), 2);
        assert!(solver.previous_triangles[..3].iter().all(|v| v.y.abs() < 1e-6));
        assert!(solver.current_triangles[..3].iter().all(|v| (v.y - 0.5).abs() < 1e-6));
        assert_eq!(solver.previous_triangles[3..], solver.current_triangles[3..]);

        collision.update_rigid_body_positions(&lookup, &frame(), &mut solver);
        assert_eq!(solver.previous_triangles, solver.current_triangles);
    }

    #[test]
    fn moved_user_triangles_start_where_they_were() {
        let mut collision = ClothCollisionShapes::new();
        let mut solver = ClothCollisionBuffers::new();
        collision.move_user_triangles(&[Vec3::ZERO; 3], &mut solver);
        assert_eq!(solver.previous_triangles, vec![Vec3::ZERO; 3]);

        collision.move_user_triangles(&[Vec3::Y; 3], &mut solver);
        assert_eq!(solver.previous_triangles, vec![Vec3::ZERO; 3]);
        assert_eq!(solver.current_triangles, vec![Vec3::Y; 3]);

        collision.move_user_triangles(&[Vec3::X; 6], &mut solver);
        assert_eq!(solver.previous_triangles, solver.current_triangles);
        assert_eq!(collision.user_counts().triangles, 2);
    }
}
