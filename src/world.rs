//! Registry of every simulation object the near-phase and cloth layers touch.

use smallvec::SmallVec;

use crate::cloth::{ClothSim, RigidShapeRef, ShapeLookup};
use crate::core::actor::RigidActor;
use crate::core::constraints::ConstraintRegistry;
use crate::core::handles::{
    ActorId, ClothId, ElementId, InteractionId, LowLevelShapeId, ParticleSystemId, ShapeId,
};
use crate::core::mesh::Aabb;
use crate::core::shape::ShapeSim;
use crate::core::types::Transform;
use crate::particles::ParticleSystemSim;
use crate::utils::allocator::Arena;

/// What a broadphase element stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Shape(ShapeId),
    Packet {
        system: ParticleSystemId,
        low_level: LowLevelShapeId,
    },
    Cloth(ClothId),
}

/// Broadphase element record. Shape elements keep their interaction list here;
/// packets keep theirs on the [`PacketShape`](crate::particles::PacketShape).
#[derive(Debug, Clone)]
pub struct ElementSim {
    pub kind: ElementKind,
    interactions: SmallVec<[InteractionId; 4]>,
}

impl ElementSim {
    pub fn new(kind: ElementKind) -> Self {
        Self {
            kind,
            interactions: SmallVec::new(),
        }
    }
}

/// Central container for actors, shapes, elements, particle systems and cloths.
#[derive(Default)]
pub struct World {
    pub(crate) actors: Arena<ActorId, RigidActor>,
    pub(crate) shapes: Arena<ShapeId, ShapeSim>,
    pub(crate) elements: Arena<ElementId, ElementSim>,
    pub(crate) particle_systems: Arena<ParticleSystemId, ParticleSystemSim>,
    pub(crate) cloths: Arena<ClothId, ClothSim>,
    pub(crate) constraints: ConstraintRegistry,
}

/// Read-only view over shapes and actors that resolves world poses.
#[derive(Clone, Copy)]
pub struct RigidShapes<'a> {
    shapes: &'a Arena<ShapeId, ShapeSim>,
    actors: &'a Arena<ActorId, RigidActor>,
}

impl<'a> RigidShapes<'a> {
    pub fn new(shapes: &'a Arena<ShapeId, ShapeSim>, actors: &'a Arena<ActorId, RigidActor>) -> Self {
        Self { shapes, actors }
    }

    pub fn shape(&self, shape: ShapeId) -> Option<&'a ShapeSim> {
        self.shapes.get(shape)
    }

    pub fn actor(&self, actor: ActorId) -> Option<&'a RigidActor> {
        self.actors.get(actor)
    }

    pub fn world_pose(&self, shape: ShapeId) -> Option<Transform> {
        let sim = self.shapes.get(shape)?;
        let actor = self.actors.get(sim.actor)?;
        Some(sim.world_pose(&actor.pose))
    }
}

impl ShapeLookup for RigidShapes<'_> {
    fn rigid_shape(&self, shape: ShapeId) -> Option<RigidShapeRef<'_>> {
        let sim = self.shapes.get(shape)?;
        let actor = self.actors.get(sim.actor)?;
        Some(RigidShapeRef {
            geometry: &sim.geometry,
            pose: sim.world_pose(&actor.pose),
        })
    }
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_actor(&mut self, actor: RigidActor) -> ActorId {
        self.actors.insert_with(|id| RigidActor { id, ..actor })
    }

    pub fn actor(&self, id: ActorId) -> Option<&RigidActor> {
        self.actors.get(id)
    }

    pub fn actor_mut(&mut self, id: ActorId) -> Option<&mut RigidActor> {
        self.actors.get_mut(id)
    }

    pub fn actors(&self) -> impl Iterator<Item = &RigidActor> + '_ {
        self.actors.iter().map(|(_, actor)| actor)
    }

    /// Detaches the actor's shapes and removes it. Returns the removed shapes.
    pub fn remove_actor(&mut self, id: ActorId) -> Option<(RigidActor, Vec<ShapeSim>)> {
        let actor = self.actors.remove(id)?;
        let shapes = actor
            .shapes
            .iter()
            .filter_map(|&shape| self.shapes.remove(shape))
            .collect();
        Some((actor, shapes))
    }

    /// Attaches `shape` to `actor`; `None` if the actor does not exist.
    pub fn attach_shape(&mut self, actor: ActorId, shape: ShapeSim) -> Option<ShapeId> {
        if !self.actors.contains(actor) {
            return None;
        }
        let id = self.shapes.insert_with(|id| ShapeSim { id, actor, ..shape });
        if let Some(owner) = self.actors.get_mut(actor) {
            owner.shapes.push(id);
        }
        Some(id)
    }

    pub fn detach_shape(&mut self, shape: ShapeId) -> Option<ShapeSim> {
        let sim = self.shapes.remove(shape)?;
        if let Some(owner) = self.actors.get_mut(sim.actor) {
            owner.shapes.retain(|&s| s != shape);
        }
        Some(sim)
    }

    pub fn shape(&self, id: ShapeId) -> Option<&ShapeSim> {
        self.shapes.get(id)
    }

    pub fn shape_mut(&mut self, id: ShapeId) -> Option<&mut ShapeSim> {
        self.shapes.get_mut(id)
    }

    pub fn shape_world_bounds(&self, id: ShapeId) -> Option<Aabb> {
        let sim = self.shapes.get(id)?;
        let actor = self.actors.get(sim.actor)?;
        Some(sim.world_bounds(&actor.pose))
    }

    pub fn rigid_shapes(&self) -> RigidShapes<'_> {
        RigidShapes::new(&self.shapes, &self.actors)
    }

    pub fn add_element(&mut self, kind: ElementKind) -> ElementId {
        self.elements.insert(ElementSim::new(kind))
    }

    pub fn remove_element(&mut self, id: ElementId) -> Option<ElementSim> {
        self.elements.remove(id)
    }

    pub fn element(&self, id: ElementId) -> Option<&ElementSim> {
        self.elements.get(id)
    }

    pub fn element_kind(&self, id: ElementId) -> Option<ElementKind> {
        self.elements.get(id).map(|e| e.kind)
    }

    /// Interactions attached to an element, wherever the element keeps them.
    pub fn element_interactions(&self, id: ElementId) -> &[InteractionId] {
        let Some(element) = self.elements.get(id) else {
            return &[];
        };
        match element.kind {
            ElementKind::Packet { system, low_level } => self
                .particle_systems
                .get(system)
                .and_then(|sys| sys.packets().by_low_level(low_level))
                .map(|packet| packet.interactions())
                .unwrap_or(&[]),
            _ => &element.interactions,
        }
    }

    pub(crate) fn element_interactions_mut(
        &mut self,
        id: ElementId,
    ) -> Option<&mut SmallVec<[InteractionId; 4]>> {
        let element = self.elements.get_mut(id)?;
        match element.kind {
            ElementKind::Packet { system, low_level } => self
                .particle_systems
                .get_mut(system)?
                .packets_mut()
                .by_low_level_mut(low_level)
                .map(|packet| packet.interactions_mut()),
            _ => Some(&mut element.interactions),
        }
    }

    pub(crate) fn attach_interaction(&mut self, element: ElementId, interaction: InteractionId) {
        if let Some(list) = self.element_interactions_mut(element) {
            list.push(interaction);
        }
    }

    pub(crate) fn detach_interaction(&mut self, element: ElementId, interaction: InteractionId) {
        if let Some(list) = self.element_interactions_mut(element) {
            if let Some(slot) = list.iter().position(|&i| i == interaction) {
                list.swap_remove(slot);
            }
        }
    }

    pub fn add_particle_system(&mut self, make: impl FnOnce(ParticleSystemId) -> ParticleSystemSim) -> ParticleSystemId {
        self.particle_systems.insert_with(make)
    }

    pub fn particle_system(&self, id: ParticleSystemId) -> Option<&ParticleSystemSim> {
        self.particle_systems.get(id)
    }

    pub fn particle_system_mut(&mut self, id: ParticleSystemId) -> Option<&mut ParticleSystemSim> {
        self.particle_systems.get_mut(id)
    }

    pub fn remove_particle_system(&mut self, id: ParticleSystemId) -> Option<ParticleSystemSim> {
        self.particle_systems.remove(id)
    }

    pub fn particle_system_ids(&self) -> Vec<ParticleSystemId> {
        self.particle_systems.ids().collect()
    }

    pub fn add_cloth(&mut self, make: impl FnOnce(ClothId) -> ClothSim) -> ClothId {
        self.cloths.insert_with(make)
    }

    pub fn cloth(&self, id: ClothId) -> Option<&ClothSim> {
        self.cloths.get(id)
    }

    pub fn cloth_mut(&mut self, id: ClothId) -> Option<&mut ClothSim> {
        self.cloths.get_mut(id)
    }

    pub fn remove_cloth(&mut self, id: ClothId) -> Option<ClothSim> {
        self.cloths.remove(id)
    }

    pub fn cloth_ids(&self) -> Vec<ClothId> {
        self.cloths.ids().collect()
    }

    /// Runs `f` on a cloth with a shape lookup borrowed from the same world.
    pub fn with_cloth<R>(&mut self, id: ClothId, f: impl FnOnce(&mut ClothSim, &RigidShapes<'_>) -> R) -> Option<R> {
        let lookup = RigidShapes::new(&self.shapes, &self.actors);
        let cloth = self.cloths.get_mut(id)?;
        Some(f(cloth, &lookup))
    }

    pub fn constraints(&self) -> &ConstraintRegistry {
        &self.constraints
    }

    pub fn constraints_mut(&mut self) -> &mut ConstraintRegistry {
        &mut self.constraints
    }

    /// Whether the pair is joined by a collision-disabling joint or is a
    /// direct parent/child articulation link pair.
    pub fn collision_disabled(&self, a: ActorId, b: ActorId) -> bool {
        if self.constraints.collision_disabled(a, b) {
            return true;
        }
        let (Some(actor_a), Some(actor_b)) = (self.actors.get(a), self.actors.get(b)) else {
            return false;
        };
        match (actor_a.articulation, actor_b.articulation) {
            (Some(link_a), Some(link_b)) if link_a.articulation == link_b.articulation => {
                link_a.parent == Some(b) || link_b.parent == Some(a)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::actor::ArticulationLink;
    use crate::core::constraints::Joint;
    use crate::core::geometry::Geometry;

    #[test]
    fn attach_and_detach_keep_actor_shape_list_in_sync() {
        let mut world = World::new();
        let actor = world.add_actor(RigidActor::new_dynamic(Transform::default()));
        let shape = world
            .attach_shape(actor, ShapeSim::builder(Geometry::sphere(1.0)).build())
            .expect("actor exists");
        assert_eq!(world.shape(shape).map(|s| s.actor), Some(actor));
        assert_eq!(world.actor(actor).map(|a| a.shapes.len()), Some(1));

        world.detach_shape(shape);
        assert_eq!(world.actor(actor).map(|a| a.shapes.len()), Some(0));
    }

    #[test]
    fn joints_and_articulation_parents_disable_collision() {
        let mut world = World::new();
        let a = world.add_actor(RigidActor::new_dynamic(Transform::default()));
        let b = world.add_actor(RigidActor::new_dynamic(Transform::default()));
        let c = world.add_actor(RigidActor::new_dynamic(Transform::default()));
        world.constraints_mut().add_joint(
            Joint::Distance {
                body_a: a,
                body_b: b,
                distance: 1.0,
            },
            false,
        );
        assert!(world.collision_disabled(b, a));
        assert!(!world.collision_disabled(a, c));

        if let Some(actor) = world.actor_mut(c) {
            actor.articulation = Some(ArticulationLink {
                articulation: 0,
                parent: Some(b),
            });
        }
        if let Some(actor) = world.actor_mut(b) {
            actor.articulation = Some(ArticulationLink {
                articulation: 0,
                parent: None,
            });
        }
        assert!(world.collision_disabled(b, c));
    }
}
