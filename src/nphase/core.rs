use std::collections::HashMap;

use glam::Vec3;
use log::{debug, warn};

use super::actor_pair::{ActorElementPairMap, ActorPairMap, ElementPairKey};
use super::filter::{
    normalize_filter_flags, prefilter_rigid_pair, shape_attributes, FilterOutcome, FilterPairRef, PairFilter,
    PairSide,
};
use super::interaction::{
    rigid_type_for, DirtyFlags, FilterInfo, Interaction, InteractionFlags, InteractionPayload, InteractionType,
    ParticleBodyInteraction, ShapeInteraction, TriggerInteraction,
};
use super::report::{ContactPairReport, ReportBuffer, TriggerPairReport, TriggerStatus};
use super::trigger::{process_trigger_tasks, TriggerTask};
use crate::collision::broadphase::ElementPair;
use crate::collision::overlap::{geometries_overlap, packet_overlaps_shape};
use crate::config::{SceneConfig, SceneFlags};
use crate::core::filter::{
    FilterFlags, FilterPairObject, FilterShader, FilterStatusChange, PairFlags, SimulationFilterCallback,
};
use crate::core::handles::{
    ActorId, ActorPairId, ClothId, ElementId, InteractionId, LowLevelShapeId, ParticleSystemId, ShapeId,
};
use crate::utils::allocator::Arena;
use crate::utils::profiling::StageTimer;
use crate::world::{ElementKind, World};

/// Lifetime counters of the near-phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NPhaseStats {
    pub interactions_created: u64,
    pub interactions_removed: u64,
    pub conversions: u64,
}

fn shape_of(world: &World, element: ElementId) -> Option<ShapeId> {
    match world.element_kind(element)? {
        ElementKind::Shape(shape) => Some(shape),
        _ => None,
    }
}

fn remove_id(list: &mut Vec<InteractionId>, id: InteractionId) {
    if let Some(slot) = list.iter().position(|&i| i == id) {
        list.swap_remove(slot);
    }
}

fn filter_info(outcome: FilterOutcome) -> FilterInfo {
    match outcome {
        FilterOutcome::Resolved(info) | FilterOutcome::Deferred(info) => info,
    }
}

/// Filter-facing view of one element.
fn element_side(world: &World, element: ElementId) -> Option<PairSide<'_>> {
    match world.element_kind(element)? {
        ElementKind::Shape(shape) => {
            let sim = world.shape(shape)?;
            let actor = world.actor(sim.actor)?;
            Some(PairSide {
                attributes: shape_attributes(sim, actor),
                data: &sim.filter_data,
                object: FilterPairObject::Shape(shape),
            })
        }
        ElementKind::Packet { system, .. } => system_side(world, system),
        ElementKind::Cloth(cloth) => {
            let sim = world.cloth(cloth)?;
            Some(PairSide {
                attributes: sim.filter_attributes(),
                data: sim.filter_data(),
                object: FilterPairObject::Cloth(cloth),
            })
        }
    }
}

fn system_side(world: &World, system: ParticleSystemId) -> Option<PairSide<'_>> {
    let sim = world.particle_system(system)?;
    Some(PairSide {
        attributes: sim.filter_attributes(),
        data: sim.filter_data(),
        object: FilterPairObject::ParticleSystem(system),
    })
}

fn shape_side(world: &World, shape: ShapeId) -> Option<PairSide<'_>> {
    let sim = world.shape(shape)?;
    let actor = world.actor(sim.actor)?;
    Some(PairSide {
        attributes: shape_attributes(sim, actor),
        data: &sim.filter_data,
        object: FilterPairObject::Shape(shape),
    })
}

/// Packet pairs with non-static bodies exist only while the system collides
/// with dynamic actors.
fn element_pair_admissible(world: &World, key: ElementPairKey) -> bool {
    let (Some(system), Some(shape)) = (world.particle_system(key.system), world.shape(key.shape)) else {
        return false;
    };
    world
        .actor(shape.actor)
        .is_some_and(|actor| actor.is_static() || system.collides_with_dynamic())
}

/// Near-phase core: turns broadphase overlaps into typed, filtered
/// interactions and keeps them current.
///
/// Rigid-rigid overlaps become OVERLAP, TRIGGER or MARKER interactions,
/// packet-rigid overlaps become PARTICLE_BODY (or MARKER) interactions that
/// share filter state per particle system and shape, and rigid-cloth overlaps
/// feed the cloth's collision budget without creating an interaction.
pub struct NPhaseCore {
    filter: PairFilter,
    interactions: Arena<InteractionId, Interaction>,
    actor_pairs: ActorPairMap,
    element_pairs: ActorElementPairMap,
    dirty: Vec<InteractionId>,
    global_dirty: DirtyFlags,
    pending_callbacks: Vec<ElementPair>,
    persistent_events: Vec<InteractionId>,
    persistent_events_next_frame: Vec<InteractionId>,
    force_threshold_events: Vec<InteractionId>,
    triggers: Vec<InteractionId>,
    reports: ReportBuffer,
    trigger_batch_size: usize,
    parallel: bool,
    stats: NPhaseStats,
}

impl NPhaseCore {
    pub fn new(config: &SceneConfig) -> Self {
        Self {
            filter: PairFilter::new(
                config.flags,
                config.filter_pair_capacity,
                config.filter_constant_block.clone(),
            ),
            interactions: Arena::new(),
            actor_pairs: ActorPairMap::new(),
            element_pairs: ActorElementPairMap::new(),
            dirty: Vec::new(),
            global_dirty: DirtyFlags::empty(),
            pending_callbacks: Vec::new(),
            persistent_events: Vec::new(),
            persistent_events_next_frame: Vec::new(),
            force_threshold_events: Vec::new(),
            triggers: Vec::new(),
            reports: ReportBuffer::default(),
            trigger_batch_size: config.trigger_batch_size,
            parallel: config.parallel,
            stats: NPhaseStats::default(),
        }
    }

    pub fn set_filter_shader(&mut self, shader: Box<dyn FilterShader>) {
        self.filter.set_shader(shader);
    }

    pub fn set_filter_callback(&mut self, callback: Option<Box<dyn SimulationFilterCallback>>) {
        self.filter.set_callback(callback);
    }

    pub fn set_scene_flags(&mut self, flags: SceneFlags) {
        self.filter.set_scene_flags(flags);
    }

    pub fn filter(&self) -> &PairFilter {
        &self.filter
    }

    pub fn stats(&self) -> NPhaseStats {
        self.stats
    }

    pub fn interaction(&self, id: InteractionId) -> Option<&Interaction> {
        self.interactions.get(id)
    }

    pub fn interactions(&self) -> impl Iterator<Item = &Interaction> + '_ {
        self.interactions.iter().map(|(_, interaction)| interaction)
    }

    pub fn interaction_count(&self) -> usize {
        self.interactions.len()
    }

    pub fn count_of_type(&self, kind: InteractionType) -> usize {
        self.interactions().filter(|i| i.interaction_type() == kind).count()
    }

    pub fn actor_pairs(&self) -> &ActorPairMap {
        &self.actor_pairs
    }

    pub fn element_pairs(&self) -> &ActorElementPairMap {
        &self.element_pairs
    }

    pub fn contact_report_actor_pair_count(&self) -> usize {
        self.actor_pairs.report_pair_count()
    }

    /// Pairs revisited by this frame's persistent-contact pass.
    pub fn persistent_event_pairs(&self) -> &[InteractionId] {
        &self.persistent_events
    }

    /// Pairs that join the persistent-contact pass at the next frame boundary.
    pub fn persistent_event_pairs_next_frame(&self) -> &[InteractionId] {
        &self.persistent_events_next_frame
    }

    pub fn force_threshold_pairs(&self) -> &[InteractionId] {
        &self.force_threshold_events
    }

    pub fn reports(&self) -> &ReportBuffer {
        &self.reports
    }

    pub fn take_reports(&mut self) -> ReportBuffer {
        self.reports.take()
    }

    /// Interaction between two elements, if any.
    pub fn find_interaction(&self, world: &World, a: ElementId, b: ElementId) -> Option<InteractionId> {
        world
            .element_interactions(a)
            .iter()
            .copied()
            .find(|&id| self.interactions.get(id).is_some_and(|i| i.connects(a, b)))
    }

    // ---------------------------------------------------------------------
    // Overlap events
    // ---------------------------------------------------------------------

    /// Creates interactions for new broadphase overlaps. Pairs whose shader
    /// result asks for the filter callback are queued for
    /// [`fire_custom_filtering_callbacks`](Self::fire_custom_filtering_callbacks).
    /// Returns the number of interactions created.
    pub fn on_overlap_created(&mut self, world: &mut World, pairs: &[ElementPair]) -> usize {
        let _timer = StageTimer::traced("nphase::on_overlap_created");
        let mut created = 0;
        for pair in pairs {
            let (Some(kind0), Some(kind1)) = (world.element_kind(pair.a), world.element_kind(pair.b)) else {
                continue;
            };
            match (kind0, kind1) {
                (ElementKind::Shape(s0), ElementKind::Shape(s1)) => {
                    match self.filter_rigid_pair(world, s0, s1, false, None) {
                        FilterOutcome::Deferred(_) => self.pending_callbacks.push(*pair),
                        FilterOutcome::Resolved(info) => {
                            if !info.is_killed()
                                && self
                                    .create_rigid_interaction(world, [pair.a, pair.b], [s0, s1], &info)
                                    .is_some()
                            {
                                created += 1;
                            }
                        }
                    }
                }
                (ElementKind::Shape(shape), ElementKind::Packet { system, low_level }) => {
                    if self
                        .create_particle_interaction(world, pair.b, system, low_level, pair.a, shape)
                        .is_some()
                    {
                        created += 1;
                    }
                }
                (ElementKind::Packet { system, low_level }, ElementKind::Shape(shape)) => {
                    if self
                        .create_particle_interaction(world, pair.a, system, low_level, pair.b, shape)
                        .is_some()
                    {
                        created += 1;
                    }
                }
                (ElementKind::Shape(shape), ElementKind::Cloth(cloth))
                | (ElementKind::Cloth(cloth), ElementKind::Shape(shape)) => {
                    self.add_cloth_shape(world, cloth, shape);
                }
                _ => {}
            }
        }
        if created > 0 {
            debug!("nphase: {created} interactions created from {} overlaps", pairs.len());
        }
        created
    }

    /// Tears down interactions of overlaps the broadphase no longer reports.
    pub fn on_overlap_removed(&mut self, world: &mut World, pairs: &[ElementPair]) {
        let _timer = StageTimer::traced("nphase::on_overlap_removed");
        for pair in pairs {
            self.pending_callbacks.retain(|p| p != pair);
            match (world.element_kind(pair.a), world.element_kind(pair.b)) {
                (Some(ElementKind::Shape(shape)), Some(ElementKind::Cloth(cloth)))
                | (Some(ElementKind::Cloth(cloth)), Some(ElementKind::Shape(shape))) => {
                    Self::remove_cloth_shape(world, cloth, shape);
                }
                _ => {
                    if let Some(id) = self.find_interaction(world, pair.a, pair.b) {
                        self.release_interaction(world, id, false, true);
                    }
                }
            }
        }
    }

    /// Removes everything attached to an element leaving the broadphase.
    /// `dropped` are the overlaps the broadphase released with it. Must run
    /// before the element and its object leave the world.
    pub fn on_volume_removed(&mut self, world: &mut World, element: ElementId, dropped: &[ElementPair]) {
        self.pending_callbacks.retain(|p| !p.contains(element));
        for pair in dropped {
            let other = pair.other(element);
            if let (Some(ElementKind::Shape(shape)), Some(ElementKind::Cloth(cloth))) =
                (world.element_kind(element), world.element_kind(other))
            {
                Self::remove_cloth_shape(world, cloth, shape);
            }
        }
        let attached = world.element_interactions(element).to_vec();
        for id in attached {
            self.release_interaction(world, id, true, true);
        }
    }

    // ---------------------------------------------------------------------
    // Filtering
    // ---------------------------------------------------------------------

    fn filter_rigid_pair(
        &mut self,
        world: &World,
        s0: ShapeId,
        s1: ShapeId,
        do_callbacks: bool,
        existing_index: Option<u32>,
    ) -> FilterOutcome {
        let kill = FilterOutcome::Resolved(FilterInfo::new(FilterFlags::KILL));
        let (Some(shape0), Some(shape1)) = (world.shape(s0), world.shape(s1)) else {
            return kill;
        };
        let (Some(actor0), Some(actor1)) = (world.actor(shape0.actor), world.actor(shape1.actor)) else {
            return kill;
        };
        if let Some(flags) = prefilter_rigid_pair(world, self.filter.scene_flags(), shape0, actor0, shape1, actor1) {
            return FilterOutcome::Resolved(FilterInfo::new(flags));
        }
        let side0 = PairSide {
            attributes: shape_attributes(shape0, actor0),
            data: &shape0.filter_data,
            object: FilterPairObject::Shape(s0),
        };
        let side1 = PairSide {
            attributes: shape_attributes(shape1, actor1),
            data: &shape1.filter_data,
            object: FilterPairObject::Shape(s1),
        };
        self.filter.run_filter(&side0, &side1, do_callbacks, existing_index)
    }

    /// Runs the deferred filter callbacks, then applies every status change
    /// the callback reports. Status changes take effect at the next
    /// [`update_dirty_interactions`](Self::update_dirty_interactions).
    pub fn fire_custom_filtering_callbacks(&mut self, world: &mut World) {
        let _timer = StageTimer::traced("nphase::filter_callbacks");
        for pair in std::mem::take(&mut self.pending_callbacks) {
            let (Some(s0), Some(s1)) = (shape_of(world, pair.a), shape_of(world, pair.b)) else {
                continue;
            };
            let info = filter_info(self.filter_rigid_pair(world, s0, s1, true, None));
            if !info.is_killed() {
                self.create_rigid_interaction(world, [pair.a, pair.b], [s0, s1], &info);
            }
        }

        while let Some(change) = self.filter.poll_status_change() {
            self.apply_status_change(change);
        }
    }

    fn apply_status_change(&mut self, change: FilterStatusChange) {
        let flags = normalize_filter_flags(change.filter_flags);
        let keeps_index = flags.wants_notify() || flags.contains(FilterFlags::KILL);
        let info = FilterInfo {
            filter_flags: flags,
            pair_flags: change.pair_flags,
            filter_pair_index: keeps_index.then_some(change.pair_id),
        };
        match self.filter.pairs.lookup(change.pair_id) {
            None => warn!("status change for unknown filter pair {}", change.pair_id),
            Some(FilterPairRef::Interaction(id)) => {
                if let Some(interaction) = self.interactions.get_mut(id) {
                    interaction.pending_filter = Some(info);
                }
                self.set_dirty(id, DirtyFlags::FILTER_STATE);
            }
            Some(FilterPairRef::ElementPair(key)) => {
                let Some(pair) = self.element_pairs.get_mut(&key) else {
                    return;
                };
                pair.filter = info;
                let members = pair.interactions.to_vec();
                if !keeps_index {
                    self.filter.pairs.release(change.pair_id);
                }
                for id in members {
                    if let Some(interaction) = self.interactions.get_mut(id) {
                        interaction.pending_filter = Some(info);
                    }
                    self.set_dirty(id, DirtyFlags::FILTER_STATE);
                }
            }
        }
    }

    /// Releases a filter-pair index on the user's request. No `pair_lost`
    /// callback is made. Returns false for an unknown index.
    pub fn release_filter_pair(&mut self, index: u32) -> bool {
        match self.filter.pairs.lookup(index) {
            Some(FilterPairRef::Interaction(id)) => {
                if let Some(interaction) = self.interactions.get_mut(id) {
                    interaction.filter_pair_index = None;
                    interaction.flags.remove(InteractionFlags::IS_FILTER_PAIR);
                }
            }
            Some(FilterPairRef::ElementPair(key)) => {
                if let Some(pair) = self.element_pairs.get_mut(&key) {
                    pair.filter.filter_pair_index = None;
                }
            }
            None => return false,
        }
        self.filter.pairs.release(index)
    }

    // ---------------------------------------------------------------------
    // Creation
    // ---------------------------------------------------------------------

    fn create_rigid_interaction(
        &mut self,
        world: &mut World,
        elements: [ElementId; 2],
        shapes: [ShapeId; 2],
        info: &FilterInfo,
    ) -> Option<InteractionId> {
        let shape0 = world.shape(shapes[0])?;
        let shape1 = world.shape(shapes[1])?;
        let actors = [shape0.actor, shape1.actor];
        let triggers = [shape0.is_trigger(), shape1.is_trigger()];
        let dominance = [
            world.actor(actors[0]).map_or(0, |a| a.dominance_group),
            world.actor(actors[1]).map_or(0, |a| a.dominance_group),
        ];

        let kind = rigid_type_for(info, triggers[0] || triggers[1]);
        let payload = match kind {
            InteractionType::Overlap => InteractionPayload::Overlap(ShapeInteraction {
                shapes,
                actors,
                actor_pair: self.actor_pairs.acquire(actors[0], actors[1]),
                hint: Vec3::ZERO,
                force_above_threshold: false,
                dominance,
            }),
            InteractionType::Trigger => {
                let (trigger, other) = if triggers[0] { (0, 1) } else { (1, 0) };
                InteractionPayload::Trigger(TriggerInteraction {
                    trigger_shape: shapes[trigger],
                    other_shape: shapes[other],
                    last_overlap: false,
                    hint: Vec3::ZERO,
                })
            }
            _ => InteractionPayload::Marker { element_pair: None },
        };

        let id = self
            .interactions
            .insert_with(|id| Interaction::new(id, elements, info, payload));
        if let Some(index) = info.filter_pair_index {
            self.filter.pairs.bind(index, FilterPairRef::Interaction(id));
        }
        match payload {
            InteractionPayload::Overlap(shape) if info.pair_flags.intersects(PairFlags::CONTACT_REPORT) => {
                self.promote_actor_pair(shape.actor_pair);
            }
            InteractionPayload::Trigger(_) => {
                if let Some(interaction) = self.interactions.get_mut(id) {
                    interaction
                        .flags
                        .insert(InteractionFlags::IS_ACTIVE | InteractionFlags::FORCE_TRIGGER_TEST);
                }
                self.triggers.push(id);
            }
            _ => {}
        }
        world.attach_interaction(elements[0], id);
        world.attach_interaction(elements[1], id);
        self.stats.interactions_created += 1;
        Some(id)
    }

    fn create_particle_interaction(
        &mut self,
        world: &mut World,
        packet_element: ElementId,
        system: ParticleSystemId,
        low_level: LowLevelShapeId,
        shape_element: ElementId,
        shape: ShapeId,
    ) -> Option<InteractionId> {
        let key = ElementPairKey { system, shape };
        let system_sim = world.particle_system(system)?;
        let shape_sim = world.shape(shape)?;
        let actor = world.actor(shape_sim.actor)?;
        if !system_sim.is_enabled() || shape_sim.is_trigger() || !element_pair_admissible(world, key) {
            return None;
        }
        let packet_bounds = system_sim.packets().by_low_level(low_level)?.bounds();
        let pose = shape_sim.world_pose(&actor.pose);
        if !packet_overlaps_shape(&packet_bounds, &shape_sim.geometry, &pose) {
            return None;
        }

        let info = match self.element_pairs.get(&key) {
            Some(pair) => pair.filter,
            None => {
                let info = filter_info(self.filter.run_filter(
                    &system_side(world, system)?,
                    &shape_side(world, shape)?,
                    true,
                    None,
                ));
                if info.is_killed() {
                    return None;
                }
                self.element_pairs.insert(key, info);
                if let Some(index) = info.filter_pair_index {
                    self.filter.pairs.bind(index, FilterPairRef::ElementPair(key));
                }
                info
            }
        };
        Some(self.insert_particle_interaction(world, [packet_element, shape_element], key, &info))
    }

    /// Builds a particle interaction referencing the element pair `key`.
    /// `elements` is `[packet, shape]`.
    fn insert_particle_interaction(
        &mut self,
        world: &mut World,
        elements: [ElementId; 2],
        key: ElementPairKey,
        info: &FilterInfo,
    ) -> InteractionId {
        let payload = if info.is_suppressed() {
            InteractionPayload::Marker {
                element_pair: Some(key),
            }
        } else {
            InteractionPayload::ParticleBody(ParticleBodyInteraction {
                system: key.system,
                shape: key.shape,
                packet: elements[0],
            })
        };
        let own = FilterInfo {
            filter_pair_index: None,
            ..*info
        };
        let id = self
            .interactions
            .insert_with(|id| Interaction::new(id, elements, &own, payload));
        self.element_pairs.add_ref(&key, id);
        world.attach_interaction(elements[0], id);
        world.attach_interaction(elements[1], id);
        self.stats.interactions_created += 1;
        id
    }

    fn add_cloth_shape(&mut self, world: &mut World, cloth: ClothId, shape: ShapeId) -> bool {
        let Some(cloth_sim) = world.cloth(cloth) else {
            return false;
        };
        if !cloth_sim.has_scene_collision() || world.shape(shape).map_or(true, |s| s.is_trigger()) {
            return false;
        }
        let cloth_data = *cloth_sim.filter_data();
        let cloth_side = PairSide {
            attributes: cloth_sim.filter_attributes(),
            data: &cloth_data,
            object: FilterPairObject::Cloth(cloth),
        };
        let Some(rigid_side) = shape_side(world, shape) else {
            return false;
        };
        let info = filter_info(self.filter.run_filter(&cloth_side, &rigid_side, true, None));
        // Cloth pairs are not tracked, so they cannot keep a filter-pair index.
        if let Some(index) = info.filter_pair_index {
            self.filter.pairs.release(index);
        }
        if info.is_killed() || info.is_suppressed() {
            return false;
        }
        world
            .with_cloth(cloth, |sim, lookup| sim.add_collision_shape(shape, lookup))
            .unwrap_or(false)
    }

    fn remove_cloth_shape(world: &mut World, cloth: ClothId, shape: ShapeId) {
        let _ = world.with_cloth(cloth, |sim, lookup| sim.remove_collision_shape(shape, lookup));
    }

    fn promote_actor_pair(&mut self, actor_pair: ActorPairId) {
        if self.actor_pairs.get(actor_pair).map_or(true, |p| p.is_report_pair()) {
            return;
        }
        self.actor_pairs.promote_to_report(actor_pair);
        let touching = self
            .interactions()
            .filter(|i| i.has_touch() && i.shape_interaction().is_some_and(|s| s.actor_pair == actor_pair))
            .count() as u32;
        if let Some(report) = self.actor_pairs.get_mut(actor_pair).and_then(|p| p.report_mut()) {
            report.touch_count = touching;
        }
    }

    // ---------------------------------------------------------------------
    // Removal
    // ---------------------------------------------------------------------

    fn emit_contact(&mut self, shape: &ShapeInteraction, events: PairFlags, removed_shape: bool) {
        if events.is_empty() {
            return;
        }
        self.reports.contacts.push(ContactPairReport {
            shapes: shape.shapes,
            actors: shape.actors,
            events,
            removed_shape,
        });
        if let Some(report) = self.actor_pairs.get_mut(shape.actor_pair).and_then(|p| p.report_mut()) {
            report.reports_sent += 1;
        }
    }

    fn remove_from_event_lists(&mut self, id: InteractionId, flags: InteractionFlags) {
        if flags.contains(InteractionFlags::IN_PERSISTENT_EVENT_LIST) {
            remove_id(&mut self.persistent_events, id);
        }
        if flags.contains(InteractionFlags::IN_PERSISTENT_EVENT_LIST_NEXT_FRAME) {
            remove_id(&mut self.persistent_events_next_frame, id);
        }
        if flags.contains(InteractionFlags::IN_FORCE_THRESHOLD_EVENT_LIST) {
            remove_id(&mut self.force_threshold_events, id);
        }
    }

    /// Keeps a shape interaction's event-list membership in line with its
    /// touch state and pair flags. Persistent-list entries join at the next
    /// frame boundary.
    fn sync_event_lists(&mut self, id: InteractionId) {
        const PERSISTENT: InteractionFlags = InteractionFlags::IN_PERSISTENT_EVENT_LIST
            .union(InteractionFlags::IN_PERSISTENT_EVENT_LIST_NEXT_FRAME);
        let Some(interaction) = self.interactions.get(id) else {
            return;
        };
        if interaction.interaction_type() != InteractionType::Overlap {
            return;
        }
        let flags = interaction.flags;
        let touching = interaction.has_touch();
        let wants_persist = touching && interaction.wants_persistent_events();
        let wants_force = touching && interaction.wants_force_events();

        let mut added = InteractionFlags::empty();
        let mut removed = InteractionFlags::empty();
        if wants_persist != flags.intersects(PERSISTENT) {
            if wants_persist {
                self.persistent_events_next_frame.push(id);
                added |= InteractionFlags::IN_PERSISTENT_EVENT_LIST_NEXT_FRAME;
            } else {
                self.remove_from_event_lists(id, flags & PERSISTENT);
                removed |= PERSISTENT;
            }
        }
        if wants_force != flags.contains(InteractionFlags::IN_FORCE_THRESHOLD_EVENT_LIST) {
            if wants_force {
                self.force_threshold_events.push(id);
                added |= InteractionFlags::IN_FORCE_THRESHOLD_EVENT_LIST;
            } else {
                self.remove_from_event_lists(id, InteractionFlags::IN_FORCE_THRESHOLD_EVENT_LIST);
                removed |= InteractionFlags::IN_FORCE_THRESHOLD_EVENT_LIST;
            }
        }
        if let Some(interaction) = self.interactions.get_mut(id) {
            interaction.flags.remove(removed);
            interaction.flags.insert(added);
        }
    }

    /// Wakes the actors behind `elements` and re-enables their trigger pairs.
    fn wake_elements(&mut self, world: &mut World, elements: [ElementId; 2]) {
        for element in elements {
            let Some(actor) = shape_of(world, element).and_then(|shape| world.shape(shape)).map(|s| s.actor) else {
                continue;
            };
            if let Some(sim) = world.actor_mut(actor) {
                sim.wake_up();
            }
            self.activate_actor_interactions(world, actor);
        }
    }

    fn trigger_report(world: &World, trigger: &TriggerInteraction, status: TriggerStatus, removed_shape: bool) -> Option<TriggerPairReport> {
        Some(TriggerPairReport {
            trigger_shape: trigger.trigger_shape,
            trigger_actor: world.shape(trigger.trigger_shape)?.actor,
            other_shape: trigger.other_shape,
            other_actor: world.shape(trigger.other_shape)?.actor,
            status,
            removed_shape,
        })
    }

    /// Releases one interaction. `object_removed` marks removal caused by an
    /// element leaving the scene; `notify_lost` controls the `pair_lost`
    /// callback for notify pairs.
    fn release_interaction(&mut self, world: &mut World, id: InteractionId, object_removed: bool, notify_lost: bool) {
        let Some(interaction) = self.interactions.remove(id) else {
            return;
        };

        if let Some(index) = interaction.filter_pair_index {
            if notify_lost {
                if let (Some(side0), Some(side1)) = (
                    element_side(world, interaction.elements[0]),
                    element_side(world, interaction.elements[1]),
                ) {
                    self.filter.notify_pair_lost(index, &side0, &side1, object_removed);
                }
            }
            self.filter.pairs.release(index);
        }

        match interaction.payload {
            InteractionPayload::Overlap(shape) => {
                if interaction.has_touch() {
                    let mut events = interaction.pair_flags & PairFlags::NOTIFY_TOUCH_LOST;
                    if shape.force_above_threshold {
                        events |= interaction.pair_flags & PairFlags::NOTIFY_THRESHOLD_FORCE_LOST;
                    }
                    self.emit_contact(&shape, events, object_removed);
                    if let Some(report) = self.actor_pairs.get_mut(shape.actor_pair).and_then(|p| p.report_mut()) {
                        report.touch_count = report.touch_count.saturating_sub(1);
                    }
                    if !object_removed {
                        self.wake_elements(world, interaction.elements);
                    }
                }
                self.remove_from_event_lists(id, interaction.flags);
                self.actor_pairs.release(shape.actor_pair);
            }
            InteractionPayload::Trigger(trigger) => {
                if trigger.last_overlap && interaction.pair_flags.contains(PairFlags::NOTIFY_TOUCH_LOST) {
                    if let Some(report) = Self::trigger_report(world, &trigger, TriggerStatus::Lost, object_removed) {
                        self.reports.triggers.push(report);
                    }
                }
                remove_id(&mut self.triggers, id);
            }
            InteractionPayload::ParticleBody(_) | InteractionPayload::Marker { element_pair: Some(_) } => {
                if let Some(key) = interaction.element_pair() {
                    if let Some(pair) = self.element_pairs.release(&key, id) {
                        if let Some(index) = pair.filter.filter_pair_index {
                            if notify_lost {
                                if let (Some(side0), Some(side1)) =
                                    (system_side(world, key.system), shape_side(world, key.shape))
                                {
                                    self.filter.notify_pair_lost(index, &side0, &side1, object_removed);
                                }
                            }
                            self.filter.pairs.release(index);
                        }
                    }
                }
            }
            InteractionPayload::Marker { element_pair: None } => {}
        }

        world.detach_interaction(interaction.elements[0], id);
        world.detach_interaction(interaction.elements[1], id);
        self.stats.interactions_removed += 1;
    }

    // ---------------------------------------------------------------------
    // Refiltering and conversion
    // ---------------------------------------------------------------------

    /// Reruns filtering for an interaction (or applies a pending status
    /// change). Returns the interaction that now represents the pair: the
    /// same id when only flags changed, a new id after a type conversion, or
    /// `None` when the pair was killed.
    pub fn refilter_interaction(&mut self, world: &mut World, id: InteractionId) -> Option<InteractionId> {
        self.refilter_in_pass(world, id, &mut HashMap::new())
    }

    /// Refilters one interaction. Element pairs already resolved in
    /// `resolved` reuse that result, so each pair runs its filter once per pass.
    fn refilter_in_pass(
        &mut self,
        world: &mut World,
        id: InteractionId,
        resolved: &mut HashMap<ElementPairKey, FilterInfo>,
    ) -> Option<InteractionId> {
        let (elements, old_index, pending, current_type, element_pair) = {
            let interaction = self.interactions.get_mut(id)?;
            (
                interaction.elements,
                interaction.filter_pair_index,
                interaction.pending_filter.take(),
                interaction.interaction_type(),
                interaction.element_pair(),
            )
        };
        if let Some(key) = element_pair {
            return self.refilter_particle_interaction(world, id, key, pending, current_type, resolved);
        }

        let shapes = [shape_of(world, elements[0])?, shape_of(world, elements[1])?];
        let info = match pending {
            Some(info) => info,
            None => filter_info(self.filter_rigid_pair(world, shapes[0], shapes[1], true, old_index)),
        };
        if info.is_killed() {
            self.release_interaction(world, id, false, true);
            return None;
        }
        if let Some(old) = old_index {
            if info.filter_pair_index != Some(old) {
                self.filter.pairs.release(old);
                if let Some(interaction) = self.interactions.get_mut(id) {
                    interaction.filter_pair_index = None;
                    interaction.flags.remove(InteractionFlags::IS_FILTER_PAIR);
                }
            }
        }

        let has_trigger = shapes
            .iter()
            .any(|&s| world.shape(s).is_some_and(|sim| sim.is_trigger()));
        let new_type = rigid_type_for(&info, has_trigger);
        if new_type != current_type {
            return self.convert(world, id, &info);
        }
        self.patch_in_place(id, &info);
        Some(id)
    }

    fn refilter_particle_interaction(
        &mut self,
        world: &mut World,
        id: InteractionId,
        key: ElementPairKey,
        pending: Option<FilterInfo>,
        current_type: InteractionType,
        resolved: &mut HashMap<ElementPairKey, FilterInfo>,
    ) -> Option<InteractionId> {
        let info = if !element_pair_admissible(world, key) {
            FilterInfo::new(FilterFlags::KILL)
        } else if let Some(info) = pending {
            info
        } else if let Some(&info) = resolved.get(&key) {
            info
        } else {
            let info = self.refilter_element_pair(world, key)?;
            resolved.insert(key, info);
            info
        };

        if info.is_killed() {
            let members = self
                .element_pairs
                .get(&key)
                .map(|p| p.interactions.to_vec())
                .unwrap_or_default();
            for member in members {
                self.release_interaction(world, member, false, true);
            }
            return None;
        }

        let new_type = if info.is_suppressed() {
            InteractionType::Marker
        } else {
            InteractionType::ParticleBody
        };
        if new_type != current_type {
            return self.convert(world, id, &info);
        }
        self.patch_in_place(id, &FilterInfo { filter_pair_index: None, ..info });
        Some(id)
    }

    /// Reruns the filter of a shared element pair and stores the result on it.
    fn refilter_element_pair(&mut self, world: &World, key: ElementPairKey) -> Option<FilterInfo> {
        let existing = self.element_pairs.get(&key).and_then(|p| p.filter.filter_pair_index);
        let info = filter_info(self.filter.run_filter(
            &system_side(world, key.system)?,
            &shape_side(world, key.shape)?,
            true,
            existing,
        ));
        let mut stored = info;
        if let Some(old) = existing {
            if info.is_killed() {
                stored.filter_pair_index = Some(old);
            } else if info.filter_pair_index != Some(old) {
                self.filter.pairs.release(old);
            }
        }
        if let Some(index) = info.filter_pair_index {
            if Some(index) != existing {
                self.filter.pairs.bind(index, FilterPairRef::ElementPair(key));
            }
        }
        if let Some(pair) = self.element_pairs.get_mut(&key) {
            pair.filter = stored;
        }
        Some(info)
    }

    fn patch_in_place(&mut self, id: InteractionId, info: &FilterInfo) {
        let Some(interaction) = self.interactions.get_mut(id) else {
            return;
        };
        interaction.pair_flags = info.pair_flags;
        interaction.filter_flags = info.filter_flags;
        if info.filter_pair_index.is_some() {
            interaction.filter_pair_index = info.filter_pair_index;
        }
        interaction
            .flags
            .set(InteractionFlags::IS_FILTER_PAIR, interaction.filter_pair_index.is_some());
        let payload = interaction.payload;
        if let Some(index) = info.filter_pair_index {
            self.filter.pairs.bind(index, FilterPairRef::Interaction(id));
        }
        match payload {
            InteractionPayload::Overlap(shape) => {
                if info.pair_flags.intersects(PairFlags::CONTACT_REPORT) {
                    self.promote_actor_pair(shape.actor_pair);
                }
                self.sync_event_lists(id);
            }
            InteractionPayload::Trigger(_) => {
                if let Some(interaction) = self.interactions.get_mut(id) {
                    interaction
                        .flags
                        .insert(InteractionFlags::IS_ACTIVE | InteractionFlags::FORCE_TRIGGER_TEST);
                }
            }
            _ => {}
        }
    }

    /// Replaces an interaction by one of the type `info` implies. The new
    /// interaction is built before the old one is released, inherits its
    /// filter-pair index, and both actors are woken.
    fn convert(&mut self, world: &mut World, id: InteractionId, info: &FilterInfo) -> Option<InteractionId> {
        let (elements, element_pair, carried) = {
            let old = self.interactions.get_mut(id)?;
            let carried = old.filter_pair_index.take();
            old.flags.remove(InteractionFlags::IS_FILTER_PAIR);
            (old.elements, old.element_pair(), carried)
        };

        let new_id = match element_pair {
            Some(key) => self.insert_particle_interaction(world, elements, key, info),
            None => {
                let shapes = [shape_of(world, elements[0])?, shape_of(world, elements[1])?];
                let info = FilterInfo {
                    filter_pair_index: info.filter_pair_index.or(carried),
                    ..*info
                };
                self.create_rigid_interaction(world, elements, shapes, &info)?
            }
        };
        self.release_interaction(world, id, false, false);
        self.wake_elements(world, elements);
        self.stats.conversions += 1;
        debug!("nphase: interaction {id:?} converted to {new_id:?}");
        Some(new_id)
    }

    // ---------------------------------------------------------------------
    // Dirty processing
    // ---------------------------------------------------------------------

    /// Queues an interaction for the next dirty pass. Repeated marks merge.
    pub fn set_dirty(&mut self, id: InteractionId, flags: DirtyFlags) {
        let Some(interaction) = self.interactions.get_mut(id) else {
            return;
        };
        interaction.dirty |= flags;
        if !interaction.flags.contains(InteractionFlags::IN_DIRTY_LIST) {
            interaction.flags.insert(InteractionFlags::IN_DIRTY_LIST);
            self.dirty.push(id);
        }
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    /// Marks every interaction of an element dirty.
    pub fn mark_element_dirty(&mut self, world: &World, element: ElementId, flags: DirtyFlags) {
        for &id in world.element_interactions(element) {
            self.set_dirty(id, flags);
        }
    }

    /// Marks every interaction of an actor's shapes dirty.
    pub fn mark_actor_dirty(&mut self, world: &World, actor: ActorId, flags: DirtyFlags) {
        let Some(actor) = world.actor(actor) else {
            return;
        };
        for &shape in &actor.shapes {
            if let Some(element) = world.shape(shape).and_then(|s| s.element) {
                self.mark_element_dirty(world, element, flags);
            }
        }
    }

    /// Marks every packet interaction of a particle system dirty.
    pub fn mark_particle_system_dirty(&mut self, system: ParticleSystemId, flags: DirtyFlags) {
        let members: Vec<InteractionId> = self
            .interactions()
            .filter(|i| i.element_pair().is_some_and(|key| key.system == system))
            .map(|i| i.id)
            .collect();
        for id in members {
            self.set_dirty(id, flags);
        }
    }

    /// Scene-wide change (dominance or visualization) that forces a pass over every overlap.
    pub fn mark_all_overlaps_dirty(&mut self, flags: DirtyFlags) {
        self.global_dirty |= flags;
    }

    /// Processes every dirty interaction once: refilter when needed, then
    /// apply the per-type incremental update if the interaction survived
    /// unconverted.
    pub fn update_dirty_interactions(&mut self, world: &mut World) {
        let _timer = StageTimer::traced("nphase::update_dirty_interactions");
        if !self.global_dirty.is_empty() {
            let flags = std::mem::take(&mut self.global_dirty);
            let overlaps: Vec<InteractionId> = self
                .interactions()
                .filter(|i| i.interaction_type() == InteractionType::Overlap)
                .map(|i| i.id)
                .collect();
            for id in overlaps {
                self.set_dirty(id, flags);
            }
        }

        let mut resolved = HashMap::new();
        for id in std::mem::take(&mut self.dirty) {
            let Some(interaction) = self.interactions.get_mut(id) else {
                continue;
            };
            let flags = std::mem::take(&mut interaction.dirty);
            interaction.flags.remove(InteractionFlags::IN_DIRTY_LIST);

            if flags.intersects(DirtyFlags::NEEDS_REFILTER) {
                match self.refilter_in_pass(world, id, &mut resolved) {
                    Some(current) if current == id => {}
                    _ => continue,
                }
            }
            self.update_interaction_state(world, id, flags);
        }
    }

    fn update_interaction_state(&mut self, world: &World, id: InteractionId, flags: DirtyFlags) {
        let Some(interaction) = self.interactions.get_mut(id) else {
            return;
        };
        match &mut interaction.payload {
            InteractionPayload::Overlap(shape) => {
                shape.dominance = [
                    world.actor(shape.actors[0]).map_or(0, |a| a.dominance_group),
                    world.actor(shape.actors[1]).map_or(0, |a| a.dominance_group),
                ];
            }
            InteractionPayload::Trigger(_) => {
                if flags.intersects(DirtyFlags::BODY_KINEMATIC | DirtyFlags::SHAPE_FLAGS | DirtyFlags::FILTER_STATE) {
                    interaction
                        .flags
                        .insert(InteractionFlags::IS_ACTIVE | InteractionFlags::FORCE_TRIGGER_TEST);
                }
            }
            _ => {}
        }
    }

    // ---------------------------------------------------------------------
    // Touch and contact events
    // ---------------------------------------------------------------------

    /// Exact touch test for every shape interaction with a moving actor.
    /// Emits touch-found and touch-lost reports and maintains the event lists.
    pub fn update_touches(&mut self, world: &mut World) {
        let _timer = StageTimer::traced("nphase::update_touches");
        let candidates: Vec<(InteractionId, [ElementId; 2], ShapeInteraction)> = self
            .interactions()
            .filter_map(|i| i.shape_interaction().map(|s| (i.id, i.elements, *s)))
            .collect();

        for (id, elements, mut shape) in candidates {
            let lookup = world.rigid_shapes();
            let moving = shape
                .actors
                .iter()
                .any(|&a| lookup.actor(a).is_some_and(|actor| actor.is_moving()));
            if !moving {
                continue;
            }
            let (Some(sim0), Some(sim1)) = (lookup.shape(shape.shapes[0]), lookup.shape(shape.shapes[1])) else {
                continue;
            };
            let (Some(pose0), Some(pose1)) = (lookup.world_pose(shape.shapes[0]), lookup.world_pose(shape.shapes[1]))
            else {
                continue;
            };
            let touching = geometries_overlap(&sim0.geometry, &pose0, &sim1.geometry, &pose1, &mut shape.hint);

            let Some(interaction) = self.interactions.get_mut(id) else {
                continue;
            };
            let had_touch = interaction.has_touch();
            let pair_flags = interaction.pair_flags;
            interaction.flags.set(InteractionFlags::HAS_TOUCH, touching);
            if let InteractionPayload::Overlap(stored) = &mut interaction.payload {
                stored.hint = shape.hint;
            }

            match (had_touch, touching) {
                (false, true) => {
                    if let Some(report) = self.actor_pairs.get_mut(shape.actor_pair).and_then(|p| p.report_mut()) {
                        report.touch_count += 1;
                    }
                    self.emit_contact(&shape, pair_flags & PairFlags::NOTIFY_TOUCH_FOUND, false);
                    self.sync_event_lists(id);
                }
                (true, false) => {
                    if let Some(report) = self.actor_pairs.get_mut(shape.actor_pair).and_then(|p| p.report_mut()) {
                        report.touch_count = report.touch_count.saturating_sub(1);
                    }
                    let mut events = pair_flags & PairFlags::NOTIFY_TOUCH_LOST;
                    if shape.force_above_threshold {
                        events |= pair_flags & PairFlags::NOTIFY_THRESHOLD_FORCE_LOST;
                        if let Some(InteractionPayload::Overlap(stored)) =
                            self.interactions.get_mut(id).map(|i| &mut i.payload)
                        {
                            stored.force_above_threshold = false;
                        }
                    }
                    self.emit_contact(&shape, events, false);
                    self.sync_event_lists(id);
                    self.wake_elements(world, elements);
                }
                _ => {}
            }
        }
    }

    /// Emits touch-persists events for this frame's persistent list, then
    /// promotes the entries queued for the next frame.
    pub fn process_persistent_contact_events(&mut self) {
        let _timer = StageTimer::traced("nphase::persistent_contacts");
        let current = self.persistent_events.clone();
        for id in current {
            let Some(interaction) = self.interactions.get(id) else {
                continue;
            };
            if !interaction.has_touch() || !interaction.wants_persistent_events() {
                continue;
            }
            if let Some(shape) = interaction.shape_interaction().copied() {
                self.emit_contact(&shape, PairFlags::NOTIFY_TOUCH_PERSISTS, false);
            }
        }

        for id in std::mem::take(&mut self.persistent_events_next_frame) {
            if let Some(interaction) = self.interactions.get_mut(id) {
                interaction
                    .flags
                    .remove(InteractionFlags::IN_PERSISTENT_EVENT_LIST_NEXT_FRAME);
                interaction.flags.insert(InteractionFlags::IN_PERSISTENT_EVENT_LIST);
                self.persistent_events.push(id);
            }
        }
    }

    /// Applies normal-force magnitudes from the solver to every pair in the
    /// force-threshold list. Pairs missing from `forces` read as zero force.
    pub fn report_contact_forces(&mut self, world: &World, forces: &[(InteractionId, f32)]) {
        let forces: HashMap<InteractionId, f32> = forces.iter().copied().collect();
        for id in self.force_threshold_events.clone() {
            let Some(interaction) = self.interactions.get_mut(id) else {
                continue;
            };
            let pair_flags = interaction.pair_flags;
            let InteractionPayload::Overlap(shape) = &mut interaction.payload else {
                continue;
            };
            let threshold = shape
                .actors
                .iter()
                .filter_map(|&a| world.actor(a))
                .map(|a| a.contact_report_threshold)
                .fold(f32::MAX, f32::min);
            let above = forces.get(&id).copied().unwrap_or(0.0) > threshold;
            let was_above = shape.force_above_threshold;
            shape.force_above_threshold = above;
            let snapshot = *shape;

            let event = match (was_above, above) {
                (false, true) => PairFlags::NOTIFY_THRESHOLD_FORCE_FOUND,
                (true, true) => PairFlags::NOTIFY_THRESHOLD_FORCE_PERSISTS,
                (true, false) => PairFlags::NOTIFY_THRESHOLD_FORCE_LOST,
                (false, false) => PairFlags::empty(),
            };
            self.emit_contact(&snapshot, pair_flags & event, false);
        }
    }

    // ---------------------------------------------------------------------
    // Triggers
    // ---------------------------------------------------------------------

    /// Re-enables trigger testing for every trigger pair of an actor's shapes.
    pub fn activate_actor_interactions(&mut self, world: &World, actor: ActorId) {
        let Some(actor) = world.actor(actor) else {
            return;
        };
        for &shape in &actor.shapes {
            self.activate_shape_triggers(world, shape);
        }
    }

    /// Re-enables trigger testing for the trigger pairs of one shape. Pairs
    /// deactivated at rest stay off until something about either side changes.
    pub fn activate_shape_triggers(&mut self, world: &World, shape: ShapeId) {
        let Some(element) = world.shape(shape).and_then(|s| s.element) else {
            return;
        };
        for &id in world.element_interactions(element) {
            if let Some(interaction) = self.interactions.get_mut(id) {
                if interaction.interaction_type() == InteractionType::Trigger {
                    interaction
                        .flags
                        .insert(InteractionFlags::IS_ACTIVE | InteractionFlags::FORCE_TRIGGER_TEST);
                }
            }
        }
    }

    pub fn active_trigger_count(&self) -> usize {
        self.triggers
            .iter()
            .filter(|&&id| {
                self.interactions
                    .get(id)
                    .is_some_and(|i| i.flags.contains(InteractionFlags::IS_ACTIVE))
            })
            .count()
    }

    /// Tests every active trigger pair in parallel batches. Pairs whose actors
    /// are both at rest are deactivated after the pass. Returns the number of
    /// pairs tested.
    pub fn process_triggers(&mut self, world: &World) -> usize {
        let _timer = StageTimer::traced("nphase::process_triggers");
        let lookup = world.rigid_shapes();
        let mut tasks = Vec::new();
        for &id in &self.triggers {
            let Some(interaction) = self.interactions.get(id) else {
                continue;
            };
            if !interaction.flags.contains(InteractionFlags::IS_ACTIVE) {
                continue;
            }
            let Some(trigger) = interaction.trigger() else {
                continue;
            };
            let (Some(trigger_sim), Some(other_sim)) =
                (lookup.shape(trigger.trigger_shape), lookup.shape(trigger.other_shape))
            else {
                continue;
            };
            let (Some(trigger_actor), Some(other_actor)) =
                (lookup.actor(trigger_sim.actor), lookup.actor(other_sim.actor))
            else {
                continue;
            };
            let (Some(trigger_pose), Some(other_pose)) =
                (lookup.world_pose(trigger.trigger_shape), lookup.world_pose(trigger.other_shape))
            else {
                continue;
            };
            tasks.push(TriggerTask {
                interaction: id,
                trigger_shape: trigger.trigger_shape,
                trigger_actor: trigger_actor.id,
                trigger_geometry: &trigger_sim.geometry,
                trigger_pose,
                other_shape: trigger.other_shape,
                other_actor: other_actor.id,
                other_geometry: &other_sim.geometry,
                other_pose,
                pair_flags: interaction.pair_flags,
                last_overlap: trigger.last_overlap,
                hint: trigger.hint,
                can_deactivate: !trigger_actor.is_moving() && !other_actor.is_moving(),
            });
        }
        if tasks.is_empty() {
            return 0;
        }

        let Some(result) = process_trigger_tasks(&mut tasks, self.trigger_batch_size, self.parallel) else {
            return 0;
        };
        for task in &tasks {
            if let Some(interaction) = self.interactions.get_mut(task.interaction) {
                interaction.flags.remove(InteractionFlags::FORCE_TRIGGER_TEST);
                if let InteractionPayload::Trigger(trigger) = &mut interaction.payload {
                    trigger.last_overlap = task.last_overlap;
                    trigger.hint = task.hint;
                }
            }
        }
        for id in result.deactivate {
            if let Some(interaction) = self.interactions.get_mut(id) {
                interaction.flags.remove(InteractionFlags::IS_ACTIVE);
            }
        }
        self.reports.triggers.extend(result.reports);
        tasks.len()
    }
}
