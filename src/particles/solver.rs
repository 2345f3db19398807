//! Particle solver collaborator: spatial packet generation and per-step results.

use std::collections::BTreeMap;

use glam::Vec3;

use super::state::ParticleReadData;
use crate::core::handles::{ActorId, LowLevelShapeId};
use crate::core::mesh::Aabb;
use crate::utils::Bitmap;

/// A packet the solver wants tracked by the broadphase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacketSpec {
    pub id: LowLevelShapeId,
    pub bounds: Aabb,
}

/// Packets created, moved and made stale by one shape-generation pass.
///
/// `created` and `destroyed` are disjoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShapeUpdate {
    pub created: Vec<PacketSpec>,
    pub updated: Vec<PacketSpec>,
    pub destroyed: Vec<LowLevelShapeId>,
}

impl ShapeUpdate {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.destroyed.is_empty()
    }
}

/// Per-step solver output folded back onto the particle state.
#[derive(Debug, Clone, Default)]
pub struct ParticleCollisionResults {
    pub densities: Vec<f32>,
    pub collision_normals: Vec<Vec3>,
    pub collision_velocities: Vec<Vec3>,
    /// Slots that received a two-way impulse.
    pub two_way_map: Bitmap,
    pub two_way_impulses: Vec<Vec3>,
    pub two_way_bodies: Vec<Option<ActorId>>,
}

/// Low-level particle solver. Integration and SPH live behind this seam.
pub trait ParticleSolver: Send {
    fn generate_shapes(&mut self, particles: &ParticleReadData<'_>) -> ShapeUpdate;

    fn collision_results(&self) -> Option<&ParticleCollisionResults> {
        None
    }

    /// Forgets every packet, e.g. before the system leaves the scene.
    fn reset(&mut self);
}

type CellKey = (i32, i32, i32);

#[derive(Debug, Clone, Copy)]
struct Cell {
    id: LowLevelShapeId,
    bounds: Aabb,
}

/// Bins live particles into a uniform grid; every non-empty cell is a packet.
#[derive(Debug, Clone)]
pub struct GridPacketSolver {
    packet_size: f32,
    margin: f32,
    cells: BTreeMap<CellKey, Cell>,
    next_id: u32,
    free_ids: Vec<u32>,
}

impl GridPacketSolver {
    pub fn new(packet_size: f32, margin: f32) -> Self {
        Self {
            packet_size: packet_size.max(f32::EPSILON),
            margin,
            cells: BTreeMap::new(),
            next_id: 0,
            free_ids: Vec::new(),
        }
    }

    pub fn packet_size(&self) -> f32 {
        self.packet_size
    }

    pub fn packet_count(&self) -> usize {
        self.cells.len()
    }

    fn cell_of(&self, position: Vec3) -> CellKey {
        (
            (position.x / self.packet_size).floor() as i32,
            (position.y / self.packet_size).floor() as i32,
            (position.z / self.packet_size).floor() as i32,
        )
    }

    fn allocate_id(&mut self) -> LowLevelShapeId {
        let id = self.free_ids.pop().unwrap_or_else(|| {
            self.next_id += 1;
            self.next_id - 1
        });
        LowLevelShapeId(id)
    }
}

impl ParticleSolver for GridPacketSolver {
    fn generate_shapes(&mut self, particles: &ParticleReadData<'_>) -> ShapeUpdate {
        let mut occupied: BTreeMap<CellKey, Aabb> = BTreeMap::new();
        for index in particles.live_indices() {
            let Some(position) = particles.positions.get(index as usize) else {
                continue;
            };
            if !position.is_finite() {
                continue;
            }
            occupied
                .entry(self.cell_of(position))
                .or_insert_with(Aabb::empty)
                .extend(position);
        }

        let mut update = ShapeUpdate::default();
        let stale: Vec<CellKey> = self
            .cells
            .keys()
            .filter(|key| !occupied.contains_key(key))
            .copied()
            .collect();
        for key in stale {
            if let Some(cell) = self.cells.remove(&key) {
                update.destroyed.push(cell.id);
                self.free_ids.push(cell.id.0);
            }
        }

        for (key, tight) in occupied {
            let bounds = tight.inflated(self.margin);
            match self.cells.get_mut(&key) {
                Some(cell) => {
                    if cell.bounds != bounds {
                        cell.bounds = bounds;
                        update.updated.push(PacketSpec { id: cell.id, bounds });
                    }
                }
                None => {
                    let id = self.allocate_id();
                    self.cells.insert(key, Cell { id, bounds });
                    update.created.push(PacketSpec { id, bounds });
                }
            }
        }
        update
    }

    fn reset(&mut self) {
        self.cells.clear();
        self.free_ids.clear();
        self.next_id = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particles::state::ParticleCreationData;
    use crate::particles::store::ParticleStore;

    #[test]
    fn packets_follow_occupied_cells() {
        let mut store = ParticleStore::new(8, false);
        store
            .add_particles(&ParticleCreationData::new(
                &[0, 1, 2],
                &[Vec3::splat(0.1), Vec3::splat(0.2), Vec3::splat(5.5)],
            ))
            .expect("fresh slots");
        let mut solver = GridPacketSolver::new(1.0, 0.0);

        let first = solver.generate_shapes(&store.particles(true, false));
        assert_eq!(first.created.len(), 2);
        assert!(first.destroyed.is_empty());

        store.remove_particles(&[2]).expect("live");
        let second = solver.generate_shapes(&store.particles(true, false));
        assert!(second.created.is_empty());
        assert_eq!(second.destroyed.len(), 1);
        assert_eq!(solver.packet_count(), 1);
    }

    #[test]
    fn moving_particle_within_cell_updates_bounds() {
        let mut store = ParticleStore::new(2, false);
        store
            .add_particles(&ParticleCreationData::new(&[0], &[Vec3::splat(0.1)]))
            .expect("fresh slot");
        let mut solver = GridPacketSolver::new(1.0, 0.05);
        solver.generate_shapes(&store.particles(true, false));

        store.set_positions(&[0], &[Vec3::splat(0.6)]).expect("live");
        let update = solver.generate_shapes(&store.particles(true, false));
        assert_eq!(update.updated.len(), 1);
        assert!(update.updated[0].bounds.contains_point(Vec3::splat(0.6)));
    }
}
