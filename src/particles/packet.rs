use std::collections::HashMap;

use log::warn;
use smallvec::SmallVec;

use crate::core::handles::{ElementId, InteractionId, LowLevelShapeId, ParticleSystemId};
use crate::core::mesh::Aabb;

/// Broadphase volume covering a spatially coherent subset of one system's particles.
#[derive(Debug, Clone)]
pub struct PacketShape {
    index: u16,
    system: ParticleSystemId,
    low_level: LowLevelShapeId,
    bounds: Aabb,
    element: Option<ElementId>,
    interactions: SmallVec<[InteractionId; 4]>,
}

impl PacketShape {
    /// Position in the owning set. Re-fetch after any removal from the set.
    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn system(&self) -> ParticleSystemId {
        self.system
    }

    pub fn low_level(&self) -> LowLevelShapeId {
        self.low_level
    }

    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    pub fn set_bounds(&mut self, bounds: Aabb) {
        self.bounds = bounds;
    }

    pub fn is_in_broad_phase(&self) -> bool {
        self.element.is_some()
    }

    pub fn element(&self) -> Option<ElementId> {
        self.element
    }

    pub fn set_element(&mut self, element: Option<ElementId>) {
        self.element = element;
    }

    pub fn interactions(&self) -> &[InteractionId] {
        &self.interactions
    }

    pub fn add_interaction(&mut self, interaction: InteractionId) {
        self.interactions.push(interaction);
    }

    pub fn remove_interaction(&mut self, interaction: InteractionId) -> bool {
        match self.interactions.iter().position(|&i| i == interaction) {
            Some(slot) => {
                self.interactions.swap_remove(slot);
                true
            }
            None => false,
        }
    }

    pub(crate) fn interactions_mut(&mut self) -> &mut SmallVec<[InteractionId; 4]> {
        &mut self.interactions
    }
}

/// Dense packet array of one particle system with O(1) swap-remove.
#[derive(Debug, Clone)]
pub struct PacketShapeSet {
    system: ParticleSystemId,
    packets: Vec<PacketShape>,
    by_low_level: HashMap<LowLevelShapeId, u16>,
}

impl PacketShapeSet {
    pub const MAX_PACKETS: usize = u16::MAX as usize;

    pub fn new(system: ParticleSystemId) -> Self {
        Self {
            system,
            packets: Vec::new(),
            by_low_level: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Appends a packet for a solver shape; `None` when the set is full or the
    /// shape already has a packet.
    pub fn create(&mut self, low_level: LowLevelShapeId, bounds: Aabb) -> Option<u16> {
        if self.by_low_level.contains_key(&low_level) {
            warn!("packet for low-level shape {low_level:?} already exists");
            return None;
        }
        if self.packets.len() >= Self::MAX_PACKETS {
            crate::utils::logging::warn_capacity_exceeded("particle packet", Self::MAX_PACKETS as u32);
            return None;
        }
        let index = self.packets.len() as u16;
        self.packets.push(PacketShape {
            index,
            system: self.system,
            low_level,
            bounds,
            element: None,
            interactions: SmallVec::new(),
        });
        self.by_low_level.insert(low_level, index);
        Some(index)
    }

    /// Removes the packet of `low_level`; the last packet moves into its slot.
    pub fn destroy(&mut self, low_level: LowLevelShapeId) -> Option<PacketShape> {
        let index = self.by_low_level.remove(&low_level)?;
        let removed = self.packets.swap_remove(index as usize);
        if let Some(moved) = self.packets.get_mut(index as usize) {
            moved.index = index;
            self.by_low_level.insert(moved.low_level, index);
        }
        Some(removed)
    }

    pub fn get(&self, index: u16) -> Option<&PacketShape> {
        self.packets.get(index as usize)
    }

    pub fn get_mut(&mut self, index: u16) -> Option<&mut PacketShape> {
        self.packets.get_mut(index as usize)
    }

    pub fn index_of(&self, low_level: LowLevelShapeId) -> Option<u16> {
        self.by_low_level.get(&low_level).copied()
    }

    pub fn by_low_level(&self, low_level: LowLevelShapeId) -> Option<&PacketShape> {
        self.index_of(low_level).and_then(|index| self.get(index))
    }

    pub fn by_low_level_mut(&mut self, low_level: LowLevelShapeId) -> Option<&mut PacketShape> {
        let index = self.index_of(low_level)?;
        self.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PacketShape> {
        self.packets.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PacketShape> {
        self.packets.iter_mut()
    }

    /// Removes every packet, returning them in index order.
    pub fn drain(&mut self) -> Vec<PacketShape> {
        self.by_low_level.clear();
        std::mem::take(&mut self.packets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn set_with(count: u32) -> PacketShapeSet {
        let mut set = PacketShapeSet::new(ParticleSystemId::from_index(0));
        for id in 0..count {
            set.create(LowLevelShapeId(id), Aabb::from_center_extents(Vec3::ZERO, Vec3::ONE))
                .expect("room for packet");
        }
        set
    }

    #[test]
    fn destroy_swaps_last_into_hole() {
        let mut set = set_with(4);
        let removed = set.destroy(LowLevelShapeId(1)).expect("packet exists");
        assert_eq!(removed.index(), 1);
        assert_eq!(set.len(), 3);

        let moved = set.by_low_level(LowLevelShapeId(3)).expect("moved packet");
        assert_eq!(moved.index(), 1);
        for (position, packet) in set.iter().enumerate() {
            assert_eq!(packet.index() as usize, position);
        }
    }

    #[test]
    fn destroying_last_packet_moves_nothing() {
        let mut set = set_with(2);
        set.destroy(LowLevelShapeId(1));
        assert_eq!(set.index_of(LowLevelShapeId(0)), Some(0));
        assert!(set.destroy(LowLevelShapeId(1)).is_none());
    }

    #[test]
    fn duplicate_low_level_shape_is_rejected() {
        let mut set = set_with(1);
        assert!(set.create(LowLevelShapeId(0), Aabb::empty()).is_none());
    }

    #[test]
    fn interaction_cache_spills_past_four() {
        let mut set = set_with(1);
        let packet = set.get_mut(0).expect("packet");
        for i in 0..6 {
            packet.add_interaction(InteractionId::from_index(i));
        }
        assert!(packet.remove_interaction(InteractionId::from_index(2)));
        assert_eq!(packet.interactions().len(), 5);
        assert!(!packet.remove_interaction(InteractionId::from_index(2)));
    }
}
