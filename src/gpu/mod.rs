//! Device-mirrored particle state.
//!
//! The host [`ParticleStore`] stays authoritative; a compute backend receives a
//! tightly packed snapshot of live positions and velocities once per step.

use std::sync::Arc;

use glam::Vec3;
use log::trace;

use crate::core::mesh::Aabb;
use crate::error::SimResult;
use crate::particles::state::{
    ParticleCreationData, ParticleDescriptor, ParticleReadData, ParticleSystemState,
};
use crate::particles::store::ParticleStore;
use crate::utils::{Bitmap, StridedView};

/// Packed copy of the live particle buffers as seen by a compute backend.
#[derive(Debug, Default, Clone)]
pub struct DeviceSnapshot {
    pub positions: Vec<Vec3>,
    pub velocities: Vec<Vec3>,
    pub bitmap: Vec<u32>,
    pub valid_range: u32,
    pub valid_count: u32,
    pub bounds: Aabb,
}

impl DeviceSnapshot {
    fn refresh_from(&mut self, store: &ParticleStore) {
        let read = store.particles(true, false);
        self.positions.clear();
        self.positions.extend(read.positions.iter());
        self.velocities.clear();
        self.velocities.extend(read.velocities.iter());
        self.bitmap.clear();
        self.bitmap.extend_from_slice(read.bitmap);
        self.valid_range = read.valid_particle_range;
        self.valid_count = read.valid_particle_count;
        self.bounds = read.world_bounds;
    }
}

/// Trait implemented by GPU/compute backends that mirror particle buffers.
pub trait ComputeBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Called after the snapshot has been refreshed from the host store.
    fn upload(&self, _snapshot: &DeviceSnapshot) {}
}

/// Default backend that keeps all work on the CPU.
#[derive(Debug, Default)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }
}

/// Particle state whose reads can be served from a device mirror.
pub struct DeviceParticleState {
    host: ParticleStore,
    snapshot: DeviceSnapshot,
    stale: bool,
    backend: Arc<dyn ComputeBackend>,
}

impl std::fmt::Debug for DeviceParticleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceParticleState")
            .field("host", &self.host)
            .field("stale", &self.stale)
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl DeviceParticleState {
    pub fn new(max_particles: u32, has_rest_offsets: bool, backend: Arc<dyn ComputeBackend>) -> Self {
        Self::from_store(ParticleStore::new(max_particles, has_rest_offsets), backend)
    }

    /// Migrates an existing host store behind a backend.
    pub fn from_store(host: ParticleStore, backend: Arc<dyn ComputeBackend>) -> Self {
        Self {
            host,
            snapshot: DeviceSnapshot::default(),
            stale: true,
            backend,
        }
    }

    pub fn host(&self) -> &ParticleStore {
        &self.host
    }

    fn mark_stale<T>(&mut self, result: T) -> T {
        self.stale = true;
        result
    }
}

impl ParticleSystemState for DeviceParticleState {
    fn max_particles(&self) -> u32 {
        self.host.max_particles()
    }

    fn valid_particle_range(&self) -> u32 {
        self.host.valid_particle_range()
    }

    fn valid_particle_count(&self) -> u32 {
        self.host.valid_particle_count()
    }

    fn has_rest_offsets(&self) -> bool {
        self.host.has_rest_offsets()
    }

    fn world_bounds(&self) -> Aabb {
        self.host.world_bounds()
    }

    fn add_particles(&mut self, data: &ParticleCreationData<'_>) -> SimResult<bool> {
        let result = self.host.add_particles(data);
        self.mark_stale(result)
    }

    fn remove_particles(&mut self, indices: &[u32]) -> SimResult<()> {
        let result = self.host.remove_particles(indices);
        self.mark_stale(result)
    }

    fn remove_all_particles(&mut self) {
        self.host.remove_all_particles();
        self.stale = true;
    }

    fn set_positions(&mut self, indices: &[u32], positions: &[Vec3]) -> SimResult<()> {
        let result = self.host.set_positions(indices, positions);
        self.mark_stale(result)
    }

    fn set_velocities(&mut self, indices: &[u32], velocities: &[Vec3]) -> SimResult<()> {
        let result = self.host.set_velocities(indices, velocities);
        self.mark_stale(result)
    }

    fn set_rest_offsets(&mut self, indices: &[u32], rest_offsets: &[f32]) -> SimResult<()> {
        self.host.set_rest_offsets(indices, rest_offsets)
    }

    fn add_delta_velocities(
        &mut self,
        map: &Bitmap,
        deltas: &[Vec3],
        multiplier: f32,
    ) -> SimResult<()> {
        let result = self.host.add_delta_velocities(map, deltas, multiplier);
        self.mark_stale(result)
    }

    /// With `device && !full_state` and a current mirror, serves positions and
    /// velocities from the snapshot; everything else comes from the host.
    fn particles(&self, full_state: bool, device: bool) -> ParticleReadData<'_> {
        if !device || full_state || self.stale {
            return self.host.particles(full_state, false);
        }
        let snapshot = &self.snapshot;
        ParticleReadData {
            valid_particle_range: snapshot.valid_range,
            valid_particle_count: snapshot.valid_count,
            bitmap: &snapshot.bitmap,
            positions: StridedView::from_slice(&snapshot.positions),
            velocities: StridedView::from_slice(&snapshot.velocities),
            densities: StridedView::empty(),
            flags: StridedView::empty(),
            rest_offsets: StridedView::empty(),
            world_bounds: snapshot.bounds,
            on_device: true,
        }
    }

    fn shift_origin(&mut self, shift: Vec3) {
        self.host.shift_origin(shift);
        self.stale = true;
    }

    fn clear_sim_state(&mut self) {
        self.host.clear_sim_state();
    }

    fn export_descriptor(&self) -> ParticleDescriptor {
        self.host.export_descriptor()
    }

    fn sync_device(&mut self) {
        if !self.stale {
            return;
        }
        self.snapshot.refresh_from(&self.host);
        self.backend.upload(&self.snapshot);
        self.stale = false;
        trace!(
            "uploaded {} particles to {}",
            self.snapshot.valid_count,
            self.backend.name()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_reads_follow_sync() {
        let mut state = DeviceParticleState::new(8, false, Arc::new(CpuBackend::new()));
        state
            .add_particles(&ParticleCreationData::new(&[1], &[Vec3::X]))
            .expect("fresh slot");
        assert!(!state.particles(false, true).on_device);

        state.sync_device();
        let read = state.particles(false, true);
        assert!(read.on_device);
        assert_eq!(read.positions.get(1), Some(Vec3::X));
        assert!(read.densities.is_empty());
        assert!(!state.particles(true, true).on_device);
    }
}
