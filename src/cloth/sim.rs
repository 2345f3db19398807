use std::sync::Arc;

use bitflags::bitflags;
use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};

use super::collision::{ClothCollisionShapes, ClothFrame, ShapeLookup};
use super::fabric::Fabric;
use super::solver::{ClothCollisionBuffers, ClothSolver};
use crate::config::DEFAULT_CONTACT_OFFSET;
use crate::core::filter::{FilterData, FilterObjectAttributes, FilterObjectType};
use crate::core::geometry::GeometryKind;
use crate::core::handles::{ClothId, ElementId, ShapeId};
use crate::core::mesh::Aabb;
use crate::core::types::Transform;
use crate::error::{SimError, SimResult};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ClothFlags: u16 {
        /// Collide against rigid shapes overlapping the cloth's broadphase volume.
        const SCENE_COLLISION = 1 << 0;
        const SWEPT_CONTACT = 1 << 1;
    }
}

impl Default for ClothFlags {
    fn default() -> Self {
        ClothFlags::SCENE_COLLISION
    }
}

/// Simulation-side cloth: pose, particles, shared fabric and the rigid
/// collision budget.
pub struct ClothSim {
    id: ClothId,
    pose: Transform,
    flags: ClothFlags,
    fabric: Arc<Fabric>,
    particles: Vec<Vec4>,
    contact_offset: f32,
    filter_data: FilterData,
    solver: Box<dyn ClothSolver>,
    collision: ClothCollisionShapes,
    element: Option<ElementId>,
}

impl std::fmt::Debug for ClothSim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClothSim")
            .field("id", &self.id)
            .field("pose", &self.pose)
            .field("flags", &self.flags)
            .field("particles", &self.particles.len())
            .field("collision_shapes", &self.collision.total_count())
            .finish()
    }
}

impl ClothSim {
    /// Cloth with local `particles` (`w` = inverse mass) instantiated from `fabric`.
    pub fn new(id: ClothId, fabric: Arc<Fabric>, particles: Vec<Vec4>, pose: Transform) -> SimResult<Self> {
        Self::with_solver(id, fabric, particles, pose, Box::new(ClothCollisionBuffers::new()))
    }

    pub fn with_solver(
        id: ClothId,
        fabric: Arc<Fabric>,
        particles: Vec<Vec4>,
        pose: Transform,
        solver: Box<dyn ClothSolver>,
    ) -> SimResult<Self> {
        if particles.len() != fabric.num_particles() as usize {
            return Err(SimError::InvalidOperation(format!(
                "cloth has {} particles, fabric expects {}",
                particles.len(),
                fabric.num_particles()
            )));
        }
        Ok(Self {
            id,
            pose,
            flags: ClothFlags::default(),
            fabric,
            particles,
            contact_offset: DEFAULT_CONTACT_OFFSET,
            filter_data: FilterData::default(),
            solver,
            collision: ClothCollisionShapes::new(),
            element: None,
        })
    }

    pub fn id(&self) -> ClothId {
        self.id
    }

    pub(crate) fn with_id(mut self, id: ClothId) -> Self {
        self.id = id;
        self
    }

    pub fn fabric(&self) -> &Arc<Fabric> {
        &self.fabric
    }

    pub fn pose(&self) -> Transform {
        self.pose
    }

    pub fn set_pose(&mut self, pose: Transform) {
        self.pose = pose;
    }

    pub fn flags(&self) -> ClothFlags {
        self.flags
    }

    pub fn has_scene_collision(&self) -> bool {
        self.flags.contains(ClothFlags::SCENE_COLLISION)
    }

    /// Clearing scene collision drops every tracked rigid shape.
    pub fn set_flags(&mut self, flags: ClothFlags) {
        self.flags = flags;
        if !self.has_scene_collision() {
            self.collision.clear(self.solver.as_mut());
        }
    }

    pub fn contact_offset(&self) -> f32 {
        self.contact_offset
    }

    pub fn set_contact_offset(&mut self, offset: f32) {
        self.contact_offset = offset;
    }

    pub fn filter_data(&self) -> &FilterData {
        &self.filter_data
    }

    pub fn set_filter_data(&mut self, data: FilterData) {
        self.filter_data = data;
    }

    pub fn filter_attributes(&self) -> FilterObjectAttributes {
        FilterObjectAttributes::new(FilterObjectType::Cloth)
    }

    pub fn element(&self) -> Option<ElementId> {
        self.element
    }

    pub fn set_element(&mut self, element: Option<ElementId>) {
        self.element = element;
    }

    pub fn particles(&self) -> &[Vec4] {
        &self.particles
    }

    pub fn set_particles(&mut self, particles: &[Vec4]) -> SimResult<()> {
        if particles.len() != self.particles.len() {
            return Err(SimError::MissingBuffer("particles"));
        }
        self.particles.copy_from_slice(particles);
        Ok(())
    }

    pub fn local_bounds(&self) -> Aabb {
        let mut bounds = Aabb::empty();
        for particle in &self.particles {
            bounds.extend(particle.truncate());
        }
        bounds
    }

    /// Broadphase volume: particle bounds in world space inflated by the contact offset.
    pub fn world_bounds(&self) -> Aabb {
        self.local_bounds()
            .transformed(&self.pose)
            .inflated(self.contact_offset)
    }

    fn frame(&self) -> ClothFrame {
        ClothFrame {
            pose: self.pose,
            local_bounds: self.local_bounds(),
            contact_offset: self.contact_offset,
        }
    }

    pub fn collision(&self) -> &ClothCollisionShapes {
        &self.collision
    }

    pub fn num_collision_shapes(&self, kind: GeometryKind) -> u32 {
        self.collision.count(kind)
    }

    pub fn solver(&self) -> &dyn ClothSolver {
        self.solver.as_ref()
    }

    /// Projects a rigid shape into the cloth; `false` when scene collision is
    /// off, the shape is already tracked, or its kind's budget is exhausted.
    pub fn add_collision_shape(&mut self, shape: ShapeId, lookup: &dyn ShapeLookup) -> bool {
        if !self.has_scene_collision() {
            return false;
        }
        let frame = self.frame();
        self.collision
            .add_collision_shape(shape, lookup, &frame, self.solver.as_mut())
    }

    pub fn remove_collision_shape(&mut self, shape: ShapeId, lookup: &dyn ShapeLookup) -> bool {
        let frame = self.frame();
        self.collision
            .remove_collision_shape(shape, lookup, &frame, self.solver.as_mut())
    }

    /// Per-step refresh of every tracked rigid primitive.
    pub fn update_rigid_body_positions(&mut self, lookup: &dyn ShapeLookup) {
        if self.collision.total_count() == 0 {
            return;
        }
        let frame = self.frame();
        self.collision
            .update_rigid_body_positions(lookup, &frame, self.solver.as_mut());
    }

    pub fn set_collision_spheres(&mut self, spheres: &[Vec4]) -> bool {
        self.collision.set_user_spheres(spheres, self.solver.as_mut())
    }

    pub fn set_collision_capsules(&mut self, capsules: &[[u32; 2]]) -> bool {
        self.collision.set_user_capsules(capsules, self.solver.as_mut())
    }

    pub fn set_collision_planes(&mut self, planes: &[Vec4]) -> bool {
        self.collision.set_user_planes(planes, self.solver.as_mut())
    }

    pub fn set_collision_convexes(&mut self, masks: &[u32]) -> bool {
        self.collision.set_user_convexes(masks, self.solver.as_mut())
    }

    /// Moves the user collision triangles; the previous call's vertices are
    /// the start positions for the next solve.
    pub fn set_collision_triangles(&mut self, triangles: &[Vec3]) {
        self.collision
            .move_user_triangles(triangles, self.solver.as_mut());
    }

    /// Rebases the cloth onto a new origin; particles are local and stay put.
    pub fn shift_origin(&mut self, shift: Vec3) {
        self.pose.position -= shift;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloth::fabric::{grid_fabric, FabricPool};
    use crate::core::geometry::Geometry;
    use std::collections::HashMap;

    fn cloth() -> ClothSim {
        let pool = FabricPool::new();
        let (desc, particles) = grid_fabric(2, 2, 1.0);
        let fabric = pool.create(desc).expect("valid fabric");
        ClothSim::new(ClothId::from_index(0), fabric, particles, Transform::default())
            .expect("matching particle count")
    }

    #[test]
    fn scene_collision_flag_gates_adds() {
        let mut cloth = cloth();
        let lookup: HashMap<ShapeId, (Geometry, Transform)> =
            HashMap::from([(ShapeId::from_index(0), (Geometry::sphere(1.0), Transform::default()))]);
        cloth.set_flags(ClothFlags::empty());
        assert!(!cloth.add_collision_shape(ShapeId::from_index(0), &lookup));
        assert_eq!(cloth.collision().total_count(), 0);

        cloth.set_flags(ClothFlags::SCENE_COLLISION);
        assert!(cloth.add_collision_shape(ShapeId::from_index(0), &lookup));
        cloth.set_flags(ClothFlags::empty());
        assert_eq!(cloth.collision().total_count(), 0);
        assert_eq!(cloth.solver().num_spheres(), 0);
    }

    #[test]
    fn mismatched_particles_are_rejected() {
        let pool = FabricPool::new();
        let (desc, _) = grid_fabric(2, 2, 1.0);
        let fabric = pool.create(desc).expect("valid fabric");
        assert!(ClothSim::new(ClothId::from_index(0), fabric, vec![Vec4::ZERO], Transform::default()).is_err());
    }
}
