//! Scene: owns the world, broadphase and near-phase, and orders the
//! per-step particle, overlap, trigger and cloth stages.

use std::sync::Arc;
use std::time::Instant;

use glam::{Vec3, Vec4};
use log::{debug, info, warn};

use crate::cloth::{ClothFlags, ClothSim, ClothSolver, Fabric};
use crate::collision::broadphase::{BroadPhase, BroadPhaseGroup};
use crate::config::{SceneConfig, SceneFlags};
use crate::core::actor::{ActorKind, RigidActor};
use crate::core::constraints::Joint;
use crate::core::filter::{FilterData, FilterShader, SimulationFilterCallback};
use crate::core::geometry::Geometry;
use crate::core::handles::{ActorId, ClothId, ElementId, InteractionId, LowLevelShapeId, ParticleSystemId, ShapeId};
use crate::core::shape::{ShapeFlags, ShapeSim};
use crate::core::types::Transform;
use crate::error::{SimError, SimResult};
use crate::nphase::{DirtyFlags, NPhaseCore, ReportBuffer};
use crate::particles::pipeline::{clear_all_sim_state, generate_all_shapes};
use crate::particles::{ParticleSolver, ParticleSystemFlags, ParticleSystemParams, ParticleSystemSim, ParticleSystemState, ShapeUpdate};
use crate::utils::allocator::ArenaKey;
use crate::utils::profiling::{StageTimer, StepProfiler};
use crate::world::{ElementKind, World};

/// Single-threaded orchestration of one simulation scene.
pub struct Scene {
    config: SceneConfig,
    world: World,
    broad_phase: BroadPhase,
    nphase: NPhaseCore,
    profiler: StepProfiler,
    frame: u64,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new(SceneConfig::default())
    }
}

impl Scene {
    pub fn new(config: SceneConfig) -> Self {
        info!(
            "scene created (parallel: {}, filter pairs: {})",
            config.parallel, config.filter_pair_capacity
        );
        Self {
            broad_phase: BroadPhase::new(config.broadphase_cell_size),
            nphase: NPhaseCore::new(&config),
            world: World::new(),
            profiler: StepProfiler::default(),
            frame: 0,
            config,
        }
    }

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn broad_phase(&self) -> &BroadPhase {
        &self.broad_phase
    }

    pub fn nphase(&self) -> &NPhaseCore {
        &self.nphase
    }

    /// Timings and counters of the last step.
    pub fn profiler(&self) -> &StepProfiler {
        &self.profiler
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn set_filter_shader(&mut self, shader: Box<dyn FilterShader>) {
        self.nphase.set_filter_shader(shader);
    }

    pub fn set_filter_callback(&mut self, callback: Option<Box<dyn SimulationFilterCallback>>) {
        self.nphase.set_filter_callback(callback);
    }

    // ---------------------------------------------------------------------
    // Rigid actors and shapes
    // ---------------------------------------------------------------------

    pub fn add_actor(&mut self, actor: RigidActor) -> ActorId {
        self.world.add_actor(actor)
    }

    fn actor_group(&self, actor: ActorId) -> BroadPhaseGroup {
        match self.world.actor(actor) {
            Some(a) if a.is_static() => BroadPhaseGroup::STATIC,
            _ => BroadPhaseGroup::unique(actor.index() as u32 * 2),
        }
    }

    /// Attaches a shape and registers its broadphase volume.
    pub fn add_shape(&mut self, actor: ActorId, shape: ShapeSim) -> Option<ShapeId> {
        let id = self.world.attach_shape(actor, shape)?;
        let element = self.world.add_element(ElementKind::Shape(id));
        let bounds = self.world.shape_world_bounds(id)?;
        let group = self.actor_group(actor);
        let sim = self.world.shape_mut(id)?;
        sim.element = Some(element);
        let (offset, trigger) = (sim.contact_offset, sim.is_trigger());
        self.broad_phase.add_bounds(element, bounds, offset, group, trigger);
        Some(id)
    }

    fn remove_volume(&mut self, element: ElementId) {
        let dropped = self.broad_phase.remove_bounds(element);
        self.nphase.on_volume_removed(&mut self.world, element, &dropped);
        self.world.remove_element(element);
    }

    pub fn remove_shape(&mut self, shape: ShapeId) -> Option<ShapeSim> {
        if let Some(element) = self.world.shape(shape)?.element {
            self.remove_volume(element);
        }
        let mut sim = self.world.detach_shape(shape)?;
        sim.element = None;
        Some(sim)
    }

    /// Removes an actor with all its shapes.
    pub fn remove_actor(&mut self, actor: ActorId) -> Option<RigidActor> {
        let shapes = self.world.actor(actor)?.shapes.clone();
        for shape in shapes {
            self.remove_shape(shape);
        }
        self.world.remove_actor(actor).map(|(actor, _)| actor)
    }

    fn refresh_shape_bounds(&mut self, actor: ActorId) {
        let Some(shapes) = self.world.actor(actor).map(|a| a.shapes.clone()) else {
            return;
        };
        for shape in shapes {
            let Some(sim) = self.world.shape(shape) else {
                continue;
            };
            let (element, offset) = (sim.element, sim.contact_offset);
            if let (Some(element), Some(bounds)) = (element, self.world.shape_world_bounds(shape)) {
                self.broad_phase.update_bounds(element, bounds, offset);
            }
        }
    }

    /// Teleports an actor, waking it and re-enabling its trigger pairs.
    pub fn set_actor_pose(&mut self, actor: ActorId, pose: Transform) -> bool {
        let Some(sim) = self.world.actor_mut(actor) else {
            return false;
        };
        sim.pose = pose;
        sim.wake_up();
        self.refresh_shape_bounds(actor);
        self.nphase.activate_actor_interactions(&self.world, actor);
        true
    }

    /// Switches an actor between dynamic and kinematic.
    pub fn set_actor_kind(&mut self, actor: ActorId, kind: ActorKind) -> SimResult<()> {
        let sim = self
            .world
            .actor_mut(actor)
            .ok_or_else(|| SimError::InvalidOperation(format!("unknown actor {actor:?}")))?;
        if sim.is_static() || kind == ActorKind::Static {
            return Err(SimError::InvalidOperation(
                "static actors cannot change kind".to_string(),
            ));
        }
        if sim.kind == kind {
            return Ok(());
        }
        sim.kind = kind;
        sim.wake_up();
        self.nphase
            .mark_actor_dirty(&self.world, actor, DirtyFlags::BODY_KINEMATIC);
        self.nphase.activate_actor_interactions(&self.world, actor);
        Ok(())
    }

    /// Wakes an actor and re-enables its trigger pairs. Returns `false` for
    /// unknown and static actors.
    pub fn wake_actor(&mut self, actor: ActorId) -> bool {
        let Some(sim) = self.world.actor_mut(actor) else {
            return false;
        };
        if sim.is_static() {
            return false;
        }
        sim.wake_up();
        self.nphase.activate_actor_interactions(&self.world, actor);
        true
    }

    pub fn set_dominance_group(&mut self, actor: ActorId, group: u8) {
        if let Some(sim) = self.world.actor_mut(actor) {
            sim.dominance_group = group;
            self.nphase.mark_actor_dirty(&self.world, actor, DirtyFlags::DOMINANCE);
        }
    }

    /// Replaces the scene flags. Only pairs filtered afterwards see the change.
    pub fn set_scene_flags(&mut self, flags: SceneFlags) {
        self.config.flags = flags;
        self.nphase.set_scene_flags(flags);
    }

    /// Refreshes cached per-pair state (dominance, visualization) of every
    /// overlap at the next step.
    pub fn refresh_all_overlaps(&mut self) {
        self.nphase
            .mark_all_overlaps_dirty(DirtyFlags::DOMINANCE | DirtyFlags::VISUALIZATION);
    }

    pub fn set_contact_report_threshold(&mut self, actor: ActorId, threshold: f32) {
        if let Some(sim) = self.world.actor_mut(actor) {
            sim.contact_report_threshold = threshold;
        }
    }

    pub fn set_shape_filter_data(&mut self, shape: ShapeId, data: FilterData) {
        let Some(sim) = self.world.shape_mut(shape) else {
            return;
        };
        sim.filter_data = data;
        if let Some(element) = sim.element {
            self.nphase
                .mark_element_dirty(&self.world, element, DirtyFlags::FILTER_STATE);
        }
        self.nphase.activate_shape_triggers(&self.world, shape);
    }

    pub fn set_shape_flags(&mut self, shape: ShapeId, flags: ShapeFlags) {
        let Some(sim) = self.world.shape_mut(shape) else {
            return;
        };
        sim.flags = flags;
        if let Some(element) = sim.element {
            self.nphase
                .mark_element_dirty(&self.world, element, DirtyFlags::SHAPE_FLAGS);
        }
        self.nphase.activate_shape_triggers(&self.world, shape);
    }

    /// Replaces a shape's geometry in place. The broadphase volume follows and
    /// the shape's trigger pairs are retested at the next step.
    pub fn set_shape_geometry(&mut self, shape: ShapeId, geometry: Geometry) -> bool {
        let Some(sim) = self.world.shape_mut(shape) else {
            return false;
        };
        sim.geometry = geometry;
        let actor = sim.actor;
        self.refresh_shape_bounds(actor);
        self.nphase.activate_shape_triggers(&self.world, shape);
        true
    }

    pub fn set_shape_rest_offset(&mut self, shape: ShapeId, rest_offset: f32) {
        let Some(sim) = self.world.shape_mut(shape) else {
            return;
        };
        sim.rest_offset = rest_offset;
        if let Some(element) = sim.element {
            self.nphase
                .mark_element_dirty(&self.world, element, DirtyFlags::REST_OFFSET);
        }
    }

    /// Registers a joint; pairs between its actors are refiltered.
    pub fn add_joint(&mut self, joint: Joint, collision_enabled: bool) -> usize {
        let (a, b) = joint.bodies();
        let index = self
            .world
            .constraints_mut()
            .add_joint(joint, collision_enabled);
        self.nphase.mark_actor_dirty(&self.world, a, DirtyFlags::FILTER_STATE);
        self.nphase.mark_actor_dirty(&self.world, b, DirtyFlags::FILTER_STATE);
        index
    }

    pub fn remove_joint(&mut self, index: usize) -> Option<Joint> {
        let joint = self.world.constraints_mut().remove_joint(index)?;
        let (a, b) = joint.bodies();
        self.nphase.mark_actor_dirty(&self.world, a, DirtyFlags::FILTER_STATE);
        self.nphase.mark_actor_dirty(&self.world, b, DirtyFlags::FILTER_STATE);
        Some(joint)
    }

    // ---------------------------------------------------------------------
    // Particle systems
    // ---------------------------------------------------------------------

    pub fn add_particle_system(&mut self, params: ParticleSystemParams) -> ParticleSystemId {
        self.world
            .add_particle_system(|id| ParticleSystemSim::new(id, params))
    }

    /// Adds a system with a caller-provided state and solver.
    pub fn add_particle_system_with(
        &mut self,
        params: ParticleSystemParams,
        state: Box<dyn ParticleSystemState>,
        solver: Box<dyn ParticleSolver>,
    ) -> ParticleSystemId {
        self.world
            .add_particle_system(|id| ParticleSystemSim::with_parts(id, params, state, solver))
    }

    pub fn particle_system(&self, id: ParticleSystemId) -> Option<&ParticleSystemSim> {
        self.world.particle_system(id)
    }

    pub fn particle_system_mut(&mut self, id: ParticleSystemId) -> Option<&mut ParticleSystemSim> {
        self.world.particle_system_mut(id)
    }

    /// Changes a system's flags. Disabling drops every packet.
    pub fn set_particle_system_flags(&mut self, id: ParticleSystemId, flags: ParticleSystemFlags) {
        let Some(system) = self.world.particle_system_mut(id) else {
            return;
        };
        let was_enabled = system.is_enabled();
        system.set_flags(flags);
        if was_enabled && !system.is_enabled() {
            self.remove_all_packets(id);
        } else {
            self.nphase
                .mark_particle_system_dirty(id, DirtyFlags::FILTER_STATE);
        }
    }

    pub fn set_particle_system_filter_data(&mut self, id: ParticleSystemId, data: FilterData) {
        if let Some(system) = self.world.particle_system_mut(id) {
            system.set_filter_data(data);
            self.nphase
                .mark_particle_system_dirty(id, DirtyFlags::FILTER_STATE);
        }
    }

    pub fn remove_particle_system(&mut self, id: ParticleSystemId) -> Option<ParticleSystemSim> {
        self.remove_all_packets(id);
        self.world.remove_particle_system(id)
    }

    fn remove_all_packets(&mut self, id: ParticleSystemId) {
        let packets: Vec<LowLevelShapeId> = match self.world.particle_system(id) {
            Some(system) => system.packets().iter().map(|p| p.low_level()).collect(),
            None => return,
        };
        for low_level in &packets {
            self.destroy_packet(id, *low_level);
        }
        if let Some(system) = self.world.particle_system_mut(id) {
            system.remove_all_packets();
        }
    }

    fn destroy_packet(&mut self, system: ParticleSystemId, low_level: LowLevelShapeId) {
        let element = self
            .world
            .particle_system(system)
            .and_then(|s| s.packets().by_low_level(low_level))
            .and_then(|p| p.element());
        if let Some(element) = element {
            self.remove_volume(element);
        }
        if let Some(sim) = self.world.particle_system_mut(system) {
            sim.packets_mut().destroy(low_level);
        }
    }

    fn apply_shape_update(&mut self, system: ParticleSystemId, update: ShapeUpdate) {
        let Some(contact_offset) = self
            .world
            .particle_system(system)
            .map(|s| s.params().contact_offset)
        else {
            return;
        };

        for &low_level in &update.destroyed {
            self.destroy_packet(system, low_level);
        }
        for spec in &update.updated {
            let element = self
                .world
                .particle_system_mut(system)
                .and_then(|s| s.packets_mut().by_low_level_mut(spec.id))
                .and_then(|packet| {
                    packet.set_bounds(spec.bounds);
                    packet.element()
                });
            if let Some(element) = element {
                self.broad_phase
                    .update_bounds(element, spec.bounds, contact_offset);
            }
        }
        for spec in &update.created {
            let created = self
                .world
                .particle_system_mut(system)
                .and_then(|s| s.packets_mut().create(spec.id, spec.bounds));
            if created.is_none() {
                continue;
            }
            let element = self.world.add_element(ElementKind::Packet {
                system,
                low_level: spec.id,
            });
            if let Some(packet) = self
                .world
                .particle_system_mut(system)
                .and_then(|s| s.packets_mut().by_low_level_mut(spec.id))
            {
                packet.set_element(Some(element));
            }
            self.broad_phase.add_bounds(
                element,
                spec.bounds,
                contact_offset,
                BroadPhaseGroup::PARTICLES,
                false,
            );
        }
        self.profiler.packets_created += update.created.len();
        self.profiler.packets_destroyed += update.destroyed.len();
    }

    // ---------------------------------------------------------------------
    // Cloth
    // ---------------------------------------------------------------------

    /// Adds a cloth instantiated from `fabric`; fails when the particle count
    /// does not match the fabric.
    pub fn add_cloth(&mut self, fabric: Arc<Fabric>, particles: Vec<Vec4>, pose: Transform) -> SimResult<ClothId> {
        let cloth = ClothSim::new(ClothId::from_index(u32::MAX), fabric, particles, pose)?;
        Ok(self.insert_cloth(cloth))
    }

    pub fn add_cloth_with_solver(
        &mut self,
        fabric: Arc<Fabric>,
        particles: Vec<Vec4>,
        pose: Transform,
        solver: Box<dyn ClothSolver>,
    ) -> SimResult<ClothId> {
        let cloth = ClothSim::with_solver(ClothId::from_index(u32::MAX), fabric, particles, pose, solver)?;
        Ok(self.insert_cloth(cloth))
    }

    fn insert_cloth(&mut self, cloth: ClothSim) -> ClothId {
        let id = self.world.add_cloth(|id| cloth.with_id(id));
        let element = self.world.add_element(ElementKind::Cloth(id));
        if let Some(cloth) = self.world.cloth_mut(id) {
            cloth.set_element(Some(element));
            let bounds = cloth.world_bounds();
            self.broad_phase.add_bounds(
                element,
                bounds,
                0.0,
                BroadPhaseGroup::unique(id.index() as u32 * 2 + 1),
                false,
            );
        }
        id
    }

    pub fn cloth(&self, id: ClothId) -> Option<&ClothSim> {
        self.world.cloth(id)
    }

    pub fn cloth_mut(&mut self, id: ClothId) -> Option<&mut ClothSim> {
        self.world.cloth_mut(id)
    }

    pub fn set_cloth_flags(&mut self, id: ClothId, flags: ClothFlags) {
        if let Some(cloth) = self.world.cloth_mut(id) {
            cloth.set_flags(flags);
        }
    }

    pub fn remove_cloth(&mut self, id: ClothId) -> Option<ClothSim> {
        if let Some(element) = self.world.cloth(id)?.element() {
            self.remove_volume(element);
        }
        self.world.remove_cloth(id)
    }

    fn update_cloth_bounds(&mut self) {
        for cloth in self.world.cloths.values_mut() {
            if let Some(element) = cloth.element() {
                self.broad_phase.update_bounds(element, cloth.world_bounds(), 0.0);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Events
    // ---------------------------------------------------------------------

    /// Feeds solver normal forces to the force-threshold event pass.
    pub fn report_contact_forces(&mut self, forces: &[(InteractionId, f32)]) {
        self.nphase.report_contact_forces(&self.world, forces);
    }

    /// Releases a filter-pair index held on behalf of the filter callback.
    pub fn release_filter_pair(&mut self, index: u32) -> bool {
        self.nphase.release_filter_pair(index)
    }

    pub fn reports(&self) -> &ReportBuffer {
        self.nphase.reports()
    }

    pub fn take_reports(&mut self) -> ReportBuffer {
        self.nphase.take_reports()
    }

    // ---------------------------------------------------------------------
    // Stepping
    // ---------------------------------------------------------------------

    /// Runs one step: particle shape generation and packet updates, cloth
    /// bounds, broadphase, near-phase, triggers, cloth collision refresh and
    /// actor sleeping.
    pub fn step(&mut self, dt: f32) {
        if !(dt.is_finite() && dt > 0.0) {
            warn!("scene step ignored: invalid time step {dt}");
            return;
        }
        let _timer = StageTimer::traced("scene::step");
        let start = Instant::now();
        self.profiler.reset();
        let parallel = self.config.parallel;

        {
            let _stage =
                StageTimer::recorded("scene::shape_generation", &mut self.profiler.shape_generation_time);
            let mut systems: Vec<&mut ParticleSystemSim> = self.world.particle_systems.values_mut().collect();
            clear_all_sim_state(&mut systems, parallel);
            generate_all_shapes(&mut systems, parallel);
        }
        for system in self.world.particle_system_ids() {
            let update = self
                .world
                .particle_system_mut(system)
                .and_then(ParticleSystemSim::take_shape_update);
            if let Some(update) = update {
                self.apply_shape_update(system, update);
            }
        }
        self.update_cloth_bounds();

        let overlaps = {
            let _stage =
                StageTimer::recorded("scene::broad_phase", &mut self.profiler.broad_phase_time);
            self.broad_phase.update()
        };
        self.profiler.overlaps_created = overlaps.created.len();
        self.profiler.overlaps_removed = overlaps.removed.len();

        {
            let _stage =
                StageTimer::recorded("scene::near_phase", &mut self.profiler.near_phase_time);
            self.nphase.on_overlap_removed(&mut self.world, &overlaps.removed);
            self.nphase.on_overlap_created(&mut self.world, &overlaps.created);
            self.nphase.fire_custom_filtering_callbacks(&mut self.world);
            self.profiler.dirty_interactions = self.nphase.dirty_count();
            self.nphase.update_dirty_interactions(&mut self.world);
            self.nphase.update_touches(&mut self.world);
            self.nphase.process_persistent_contact_events();
        }
        {
            let _stage = StageTimer::recorded("scene::triggers", &mut self.profiler.trigger_time);
            self.nphase.process_triggers(&self.world);
        }
        {
            let _stage =
                StageTimer::recorded("scene::cloth_collision", &mut self.profiler.cloth_collision_time);
            for cloth in self.world.cloth_ids() {
                let _ = self
                    .world
                    .with_cloth(cloth, |sim, lookup| sim.update_rigid_body_positions(lookup));
            }
        }
        for system in self.world.particle_systems.values_mut() {
            system.apply_collision_results(1.0);
        }

        for actor in self.world.actors.values_mut() {
            actor.advance_wake_counter(dt);
        }
        self.frame += 1;
        self.profiler.total_step_time = start.elapsed();
        self.profiler.report();
    }

    /// Moves the scene origin by `shift`: every world-space position loses `shift`.
    pub fn shift_origin(&mut self, shift: Vec3) {
        debug!("shifting scene origin by {shift}");
        for actor in self.world.actors.values_mut() {
            actor.pose.position -= shift;
        }
        let actors: Vec<ActorId> = self.world.actors().map(|a| a.id).collect();
        for actor in actors {
            self.refresh_shape_bounds(actor);
        }

        let contact_offsets: Vec<(ParticleSystemId, f32)> = self
            .world
            .particle_systems
            .iter()
            .map(|(id, s)| (id, s.params().contact_offset))
            .collect();
        for (id, offset) in contact_offsets {
            let Some(system) = self.world.particle_system_mut(id) else {
                continue;
            };
            system.shift_origin(shift);
            for packet in system.packets().iter() {
                if let Some(element) = packet.element() {
                    self.broad_phase.update_bounds(element, packet.bounds(), offset);
                }
            }
        }

        for cloth in self.world.cloths.values_mut() {
            cloth.shift_origin(shift);
        }
        self.update_cloth_bounds();
    }
}
