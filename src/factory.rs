//! Construction context for particle systems, cloths and fabrics.
//!
//! Subsystems must be registered before their objects can be created. Every
//! object handed out is tracked in a per-kind pool so that a second release
//! is detected and reported instead of corrupting the scene.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

use glam::Vec4;
use log::{debug, error};
use parking_lot::Mutex;

use crate::cloth::{Fabric, FabricDesc, FabricPool};
use crate::core::handles::{ClothId, ParticleSystemId};
use crate::core::types::Transform;
use crate::error::{SimError, SimResult};
use crate::particles::ParticleSystemParams;
use crate::scene::Scene;

/// Mutex-protected set of live objects of one kind.
#[derive(Debug)]
pub struct TrackingPool<T> {
    live: Mutex<HashSet<T>>,
}

impl<T> Default for TrackingPool<T> {
    fn default() -> Self {
        Self {
            live: Mutex::new(HashSet::new()),
        }
    }
}

impl<T: Copy + Eq + Hash> TrackingPool<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, value: T) {
        self.live.lock().insert(value);
    }

    /// Stops tracking `value`; false when it was not tracked.
    pub fn untrack(&self, value: T) -> bool {
        self.live.lock().remove(&value)
    }

    pub fn contains(&self, value: T) -> bool {
        self.live.lock().contains(&value)
    }

    pub fn len(&self) -> usize {
        self.live.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn invalid_operation(what: &str) -> SimError {
    error!("invalid operation: {what}");
    SimError::InvalidOperation(what.to_string())
}

/// Per-scene factory with per-kind tracking pools.
#[derive(Debug, Default)]
pub struct SimFactory {
    particles_registered: bool,
    cloth_registered: bool,
    particle_systems: TrackingPool<ParticleSystemId>,
    cloths: TrackingPool<ClothId>,
    fabrics: FabricPool,
}

impl SimFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_particles(&mut self) {
        self.particles_registered = true;
    }

    pub fn register_cloth(&mut self) {
        self.cloth_registered = true;
    }

    pub fn particles_registered(&self) -> bool {
        self.particles_registered
    }

    pub fn cloth_registered(&self) -> bool {
        self.cloth_registered
    }

    fn require(&self, registered: bool, subsystem: &'static str) -> SimResult<()> {
        if registered {
            return Ok(());
        }
        error!("invalid operation: {subsystem} subsystem used before registration");
        Err(SimError::SubsystemUnavailable(subsystem))
    }

    pub fn particle_systems(&self) -> &TrackingPool<ParticleSystemId> {
        &self.particle_systems
    }

    pub fn cloths(&self) -> &TrackingPool<ClothId> {
        &self.cloths
    }

    pub fn fabrics(&self) -> &FabricPool {
        &self.fabrics
    }

    /// Adds a particle system to `scene`; `None` when particles are not registered.
    pub fn create_particle_system(&self, scene: &mut Scene, params: ParticleSystemParams) -> Option<ParticleSystemId> {
        self.require(self.particles_registered, "particles").ok()?;
        let id = scene.add_particle_system(params);
        self.particle_systems.track(id);
        debug!("factory: created particle system {id:?}");
        Some(id)
    }

    pub fn release_particle_system(&self, scene: &mut Scene, id: ParticleSystemId) -> SimResult<()> {
        if !self.particle_systems.untrack(id) {
            return Err(invalid_operation("particle system released twice or not created by this factory"));
        }
        scene.remove_particle_system(id);
        Ok(())
    }

    /// Creates a fabric tracked by the factory's pool.
    pub fn create_fabric(&self, desc: FabricDesc) -> Option<Arc<Fabric>> {
        self.require(self.cloth_registered, "cloth").ok()?;
        match self.fabrics.create(desc) {
            Ok(fabric) => Some(fabric),
            Err(err) => {
                error!("invalid operation: fabric rejected: {err}");
                None
            }
        }
    }

    /// Drops the pool's reference to `fabric`. Cloths still using it keep it alive.
    pub fn release_fabric(&self, fabric: &Arc<Fabric>) -> SimResult<()> {
        self.fabrics.release(fabric)
    }

    /// Adds a cloth to `scene`; `None` when cloth is not registered, the
    /// fabric is not owned by this factory, or the particles do not match it.
    pub fn create_cloth(
        &self,
        scene: &mut Scene,
        fabric: Arc<Fabric>,
        particles: Vec<Vec4>,
        pose: Transform,
    ) -> Option<ClothId> {
        self.require(self.cloth_registered, "cloth").ok()?;
        if !self.fabrics.contains(&fabric) {
            invalid_operation("cloth created from a fabric this factory does not own");
            return None;
        }
        match scene.add_cloth(fabric, particles, pose) {
            Ok(id) => {
                self.cloths.track(id);
                Some(id)
            }
            Err(err) => {
                error!("invalid operation: cloth rejected: {err}");
                None
            }
        }
    }

    pub fn release_cloth(&self, scene: &mut Scene, id: ClothId) -> SimResult<()> {
        if !self.cloths.untrack(id) {
            return Err(invalid_operation("cloth released twice or not created by this factory"));
        }
        scene.remove_cloth(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloth::grid_fabric;

    #[test]
    fn unregistered_subsystems_return_none() {
        let factory = SimFactory::new();
        let mut scene = Scene::default();
        assert!(factory
            .create_particle_system(&mut scene, ParticleSystemParams::new(8))
            .is_none());
        let (desc, _) = grid_fabric(2, 2, 1.0);
        assert!(factory.create_fabric(desc).is_none());
    }

    #[test]
    fn second_release_is_an_error() {
        let mut factory = SimFactory::new();
        factory.register_particles();
        let mut scene = Scene::default();
        let id = factory
            .create_particle_system(&mut scene, ParticleSystemParams::new(8))
            .expect("registered");
        assert!(factory.release_particle_system(&mut scene, id).is_ok());
        assert!(matches!(
            factory.release_particle_system(&mut scene, id),
            Err(SimError::InvalidOperation(_))
        ));
        assert!(scene.particle_system(id).is_none());
    }

    #[test]
    fn cloth_keeps_fabric_alive_after_pool_release() {
        let mut factory = SimFactory::new();
        factory.register_cloth();
        let mut scene = Scene::default();
        let (desc, particles) = grid_fabric(3, 3, 0.5);
        let fabric = factory.create_fabric(desc).expect("registered");
        let cloth = factory
            .create_cloth(&mut scene, Arc::clone(&fabric), particles, Transform::default())
            .expect("matching fabric");

        assert!(factory.release_fabric(&fabric).is_ok());
        assert!(factory.release_fabric(&fabric).is_err());
        assert_eq!(scene.cloth(cloth).map(|c| c.fabric().num_particles()), Some(9));
        assert!(factory.release_cloth(&mut scene, cloth).is_ok());
        assert!(factory.cloths().is_empty());
    }
}
