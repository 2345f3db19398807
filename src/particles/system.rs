use bitflags::bitflags;
use glam::Vec3;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::packet::{PacketShape, PacketShapeSet};
use super::solver::{GridPacketSolver, ParticleSolver, ShapeUpdate};
use super::state::ParticleSystemState;
use super::store::ParticleStore;
use crate::config::{DEFAULT_CONTACT_OFFSET, DEFAULT_PACKET_SIZE};
use crate::core::filter::{FilterData, FilterObjectAttributes, FilterObjectType};
use crate::core::handles::ParticleSystemId;
use crate::error::SimResult;
use crate::utils::Bitmap;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ParticleSystemFlags: u16 {
        const ENABLED = 1 << 0;
        const COLLISION_WITH_DYNAMIC_ACTORS = 1 << 1;
        const COLLISION_TWOWAY = 1 << 2;
        const PER_PARTICLE_REST_OFFSET = 1 << 3;
    }
}

impl Default for ParticleSystemFlags {
    fn default() -> Self {
        ParticleSystemFlags::ENABLED | ParticleSystemFlags::COLLISION_WITH_DYNAMIC_ACTORS
    }
}

/// Construction parameters of a particle system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticleSystemParams {
    pub max_particles: u32,
    pub flags: ParticleSystemFlags,
    pub is_fluid: bool,
    pub contact_offset: f32,
    pub rest_offset: f32,
    pub packet_size: f32,
    pub filter_data: FilterData,
}

impl Default for ParticleSystemParams {
    fn default() -> Self {
        Self {
            max_particles: 1024,
            flags: ParticleSystemFlags::default(),
            is_fluid: false,
            contact_offset: DEFAULT_CONTACT_OFFSET,
            rest_offset: 0.0,
            packet_size: DEFAULT_PACKET_SIZE,
            filter_data: FilterData::default(),
        }
    }
}

impl ParticleSystemParams {
    pub fn new(max_particles: u32) -> Self {
        Self {
            max_particles,
            ..Self::default()
        }
    }

    pub fn fluid(mut self) -> Self {
        self.is_fluid = true;
        self
    }

    pub fn with_flags(mut self, flags: ParticleSystemFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_filter_data(mut self, data: FilterData) -> Self {
        self.filter_data = data;
        self
    }

    pub fn with_packet_size(mut self, size: f32) -> Self {
        self.packet_size = size;
        self
    }

    pub fn with_contact_offset(mut self, offset: f32) -> Self {
        self.contact_offset = offset;
        self
    }
}

/// Simulation-side particle system: state, packets and solver.
pub struct ParticleSystemSim {
    id: ParticleSystemId,
    params: ParticleSystemParams,
    state: Box<dyn ParticleSystemState>,
    solver: Box<dyn ParticleSolver>,
    packets: PacketShapeSet,
    pending: Option<ShapeUpdate>,
}

impl std::fmt::Debug for ParticleSystemSim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticleSystemSim")
            .field("id", &self.id)
            .field("params", &self.params)
            .field("particles", &self.state.valid_particle_count())
            .field("packets", &self.packets.len())
            .finish()
    }
}

impl ParticleSystemSim {
    /// System backed by a host store and a grid packet solver.
    pub fn new(id: ParticleSystemId, params: ParticleSystemParams) -> Self {
        let has_rest_offsets = params
            .flags
            .contains(ParticleSystemFlags::PER_PARTICLE_REST_OFFSET);
        let state = Box::new(ParticleStore::new(params.max_particles, has_rest_offsets));
        let solver = Box::new(GridPacketSolver::new(params.packet_size, params.contact_offset));
        Self::with_parts(id, params, state, solver)
    }

    pub fn with_parts(
        id: ParticleSystemId,
        params: ParticleSystemParams,
        state: Box<dyn ParticleSystemState>,
        solver: Box<dyn ParticleSolver>,
    ) -> Self {
        Self {
            id,
            packets: PacketShapeSet::new(id),
            params,
            state,
            solver,
            pending: None,
        }
    }

    pub fn id(&self) -> ParticleSystemId {
        self.id
    }

    pub fn params(&self) -> &ParticleSystemParams {
        &self.params
    }

    pub fn flags(&self) -> ParticleSystemFlags {
        self.params.flags
    }

    /// Replaces the flags. Per-particle rest offsets are fixed at construction.
    pub fn set_flags(&mut self, flags: ParticleSystemFlags) {
        let fixed = ParticleSystemFlags::PER_PARTICLE_REST_OFFSET;
        self.params.flags = (flags - fixed) | (self.params.flags & fixed);
    }

    pub fn is_enabled(&self) -> bool {
        self.params.flags.contains(ParticleSystemFlags::ENABLED)
    }

    pub fn is_fluid(&self) -> bool {
        self.params.is_fluid
    }

    pub fn collides_with_dynamic(&self) -> bool {
        self.params
            .flags
            .contains(ParticleSystemFlags::COLLISION_WITH_DYNAMIC_ACTORS)
    }

    pub fn filter_data(&self) -> &FilterData {
        &self.params.filter_data
    }

    pub fn set_filter_data(&mut self, data: FilterData) {
        self.params.filter_data = data;
    }

    pub fn filter_attributes(&self) -> FilterObjectAttributes {
        FilterObjectAttributes::new(if self.params.is_fluid {
            FilterObjectType::ParticleFluid
        } else {
            FilterObjectType::ParticleSystem
        })
    }

    pub fn state(&self) -> &dyn ParticleSystemState {
        self.state.as_ref()
    }

    pub fn state_mut(&mut self) -> &mut dyn ParticleSystemState {
        self.state.as_mut()
    }

    pub fn packets(&self) -> &PacketShapeSet {
        &self.packets
    }

    pub fn packets_mut(&mut self) -> &mut PacketShapeSet {
        &mut self.packets
    }

    /// Shape-generation stage: asks the solver which packets appeared, moved
    /// or went stale. The result is held until the scene applies it.
    pub fn generate_shapes(&mut self) {
        if !self.is_enabled() {
            self.pending = None;
            return;
        }
        self.state.sync_device();
        let update = self.solver.generate_shapes(&self.state.particles(false, true));
        self.pending = Some(update);
    }

    pub fn take_shape_update(&mut self) -> Option<ShapeUpdate> {
        self.pending.take()
    }

    /// Packet changes a later stage must apply to the broadphase.
    pub fn pending_shape_update(&self) -> Option<&ShapeUpdate> {
        self.pending.as_ref()
    }

    /// Drops every packet, e.g. when the system is disabled or leaves the scene.
    pub fn remove_all_packets(&mut self) -> Vec<PacketShape> {
        self.solver.reset();
        self.pending = None;
        let packets = self.packets.drain();
        debug!("particle system {:?}: released {} packets", self.id, packets.len());
        packets
    }

    /// Per-step reset of transient solver annotations.
    pub fn clear_sim_state(&mut self) {
        self.state.clear_sim_state();
    }

    pub fn add_delta_velocities(
        &mut self,
        map: &Bitmap,
        deltas: &[Vec3],
        multiplier: f32,
    ) -> SimResult<()> {
        self.state.add_delta_velocities(map, deltas, multiplier)
    }

    /// Folds two-way solver impulses, if the solver produced any, into velocities.
    pub fn apply_collision_results(&mut self, multiplier: f32) {
        if !self.params.flags.contains(ParticleSystemFlags::COLLISION_TWOWAY) {
            return;
        }
        if let Some(results) = self.solver.collision_results() {
            if let Err(err) = self.state.add_delta_velocities(
                &results.two_way_map,
                &results.two_way_impulses,
                multiplier,
            ) {
                warn!("particle system {:?}: dropped two-way impulses: {err}", self.id);
            }
        }
    }

    pub fn shift_origin(&mut self, shift: Vec3) {
        self.state.shift_origin(shift);
        for packet in self.packets.iter_mut() {
            let bounds = packet.bounds();
            if !bounds.is_empty() {
                packet.set_bounds(bounds.translated(-shift));
            }
        }
    }
}
