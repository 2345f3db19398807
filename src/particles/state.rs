use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::layout::ParticleFlags;
use crate::core::mesh::Aabb;
use crate::error::{SimError, SimResult};
use crate::utils::{Bitmap, StridedView};

static ZERO_VELOCITY: [Vec3; 1] = [Vec3::ZERO];

/// Batch of particles to insert at caller-chosen indices.
///
/// `positions`, `velocities` and `rest_offsets` are read in lockstep with
/// `indices`. Omitted velocities read as zero through a zero-stride view.
#[derive(Debug, Clone, Copy)]
pub struct ParticleCreationData<'a> {
    pub indices: &'a [u32],
    pub positions: StridedView<'a, Vec3>,
    pub velocities: Option<StridedView<'a, Vec3>>,
    pub rest_offsets: Option<StridedView<'a, f32>>,
    pub flags: Option<&'a [ParticleFlags]>,
}

impl<'a> ParticleCreationData<'a> {
    pub fn new(indices: &'a [u32], positions: &'a [Vec3]) -> Self {
        Self {
            indices,
            positions: StridedView::from_slice(positions),
            velocities: None,
            rest_offsets: None,
            flags: None,
        }
    }

    pub fn with_velocities(mut self, velocities: &'a [Vec3]) -> Self {
        self.velocities = Some(StridedView::from_slice(velocities));
        self
    }

    pub fn with_rest_offsets(mut self, rest_offsets: &'a [f32]) -> Self {
        self.rest_offsets = Some(StridedView::from_slice(rest_offsets));
        self
    }

    pub fn with_flags(mut self, flags: &'a [ParticleFlags]) -> Self {
        self.flags = Some(flags);
        self
    }

    pub fn count(&self) -> usize {
        self.indices.len()
    }

    /// Velocities, or a constant zero view when none were supplied.
    pub fn velocities_or_zero(&self) -> StridedView<'a, Vec3> {
        self.velocities.unwrap_or_else(|| {
            StridedView::new(bytemuck::cast_slice(&ZERO_VELOCITY), 0, self.indices.len())
        })
    }

    /// Checks every supplied buffer covers the batch.
    pub fn check_buffers(&self, needs_rest_offsets: bool) -> SimResult<()> {
        let count = self.count();
        if self.positions.len() < count {
            return Err(SimError::MissingBuffer("positions"));
        }
        if self.velocities.is_some_and(|v| v.len() < count) {
            return Err(SimError::MissingBuffer("velocities"));
        }
        if self.flags.is_some_and(|f| f.len() < count) {
            return Err(SimError::MissingBuffer("flags"));
        }
        if needs_rest_offsets && self.rest_offsets.map_or(true, |r| r.len() < count) {
            return Err(SimError::MissingBuffer("rest_offsets"));
        }
        Ok(())
    }
}

/// Read-only snapshot of a particle state's live buffers.
///
/// Every view spans `valid_particle_range` slots; callers consult `bitmap`
/// for occupancy. All views are empty when the state holds no particles.
#[derive(Debug, Clone, Copy)]
pub struct ParticleReadData<'a> {
    pub valid_particle_range: u32,
    pub valid_particle_count: u32,
    pub bitmap: &'a [u32],
    pub positions: StridedView<'a, Vec3>,
    pub velocities: StridedView<'a, Vec3>,
    pub densities: StridedView<'a, f32>,
    pub flags: StridedView<'a, u16>,
    pub rest_offsets: StridedView<'a, f32>,
    pub world_bounds: Aabb,
    /// Views point at device-mirrored memory rather than the host store.
    pub on_device: bool,
}

impl ParticleReadData<'_> {
    pub fn is_valid(&self, index: u32) -> bool {
        crate::utils::bitmap::test(self.bitmap, index)
    }

    /// Indices of every live particle.
    pub fn live_indices(&self) -> impl Iterator<Item = u32> + '_ {
        crate::utils::bitmap::iter(self.bitmap).take_while(move |&i| i < self.valid_particle_range)
    }
}

/// Owned bulk description of a particle state, used for migration and
/// descriptor-based construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleDescriptor {
    pub max_particles: u32,
    pub num_particles: u32,
    pub valid_particle_range: u32,
    /// Occupancy words; `None` produces an empty store.
    pub bitmap: Option<Vec<u32>>,
    /// Indexed by particle slot, at least `valid_particle_range` long.
    pub positions: Vec<Vec3>,
    pub velocities: Vec<Vec3>,
    pub rest_offsets: Option<Vec<f32>>,
}

/// Storage capability a particle system needs from its backing engine.
///
/// [`ParticleStore`](super::store::ParticleStore) is the host implementation;
/// [`DeviceParticleState`](crate::gpu::DeviceParticleState) mirrors a store
/// into a compute backend.
pub trait ParticleSystemState: Send {
    fn max_particles(&self) -> u32;
    fn valid_particle_range(&self) -> u32;
    fn valid_particle_count(&self) -> u32;
    fn has_rest_offsets(&self) -> bool;
    fn world_bounds(&self) -> Aabb;

    /// Validates the whole batch, then inserts it. A rejected batch leaves the state untouched.
    fn add_particles(&mut self, data: &ParticleCreationData<'_>) -> SimResult<bool>;
    fn remove_particles(&mut self, indices: &[u32]) -> SimResult<()>;
    fn remove_all_particles(&mut self);

    fn set_positions(&mut self, indices: &[u32], positions: &[Vec3]) -> SimResult<()>;
    fn set_velocities(&mut self, indices: &[u32], velocities: &[Vec3]) -> SimResult<()>;
    fn set_rest_offsets(&mut self, indices: &[u32], rest_offsets: &[f32]) -> SimResult<()>;

    /// `velocity[i] += deltas[i] * multiplier` for every live `i` set in `map`.
    /// Fails without touching anything when `deltas` does not cover `map`.
    fn add_delta_velocities(
        &mut self,
        map: &Bitmap,
        deltas: &[Vec3],
        multiplier: f32,
    ) -> SimResult<()>;

    fn particles(&self, full_state: bool, device: bool) -> ParticleReadData<'_>;

    fn shift_origin(&mut self, shift: Vec3);
    fn clear_sim_state(&mut self);
    fn export_descriptor(&self) -> ParticleDescriptor;

    /// Pushes pending host changes to a device mirror, if any.
    fn sync_device(&mut self) {}
}
