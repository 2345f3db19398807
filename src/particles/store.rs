use std::mem::size_of;

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use log::{debug, warn};

use super::layout::{Particle, ParticleFlags, StoreHeader, StoreLayout};
use super::state::{ParticleCreationData, ParticleDescriptor, ParticleReadData, ParticleSystemState};
use crate::core::mesh::Aabb;
use crate::error::{SimError, SimResult};
use crate::utils::{bitmap, Bitmap, StridedView};

/// Storage unit of the arena; keeps every block 16-byte aligned.
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct StoreBlock([u8; 16]);

struct StoreParts<'a> {
    header: &'a mut StoreHeader,
    bitmap: &'a mut [u32],
    particles: &'a mut [Particle],
    rest_offsets: Option<&'a mut [f32]>,
}

/// Packed particle records plus occupancy bitmap and bounds in one aligned arena.
///
/// The arena bytes are the serialized form. `B` decides who owns them:
/// [`ParticleStore`] owns its blocks, [`ParticleStoreViewMut`] works in place
/// over serialized bytes borrowed from the caller.
#[derive(Clone)]
pub struct ParticleArena<B> {
    blocks: B,
    layout: StoreLayout,
}

/// Owned store; [`ParticleStore::as_bytes`] and [`ParticleStore::from_bytes`]
/// round-trip bit-exactly.
pub type ParticleStore = ParticleArena<Vec<StoreBlock>>;

/// Live store reconstructed in place over bytes it does not own. Every
/// mutation lands in the borrowed buffer.
pub type ParticleStoreViewMut<'a> = ParticleArena<&'a mut [StoreBlock]>;

impl<B: AsRef<[StoreBlock]>> std::fmt::Debug for ParticleArena<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let header = self.header();
        f.debug_struct("ParticleStore")
            .field("max_particles", &header.max_particles)
            .field("valid_range", &header.valid_range)
            .field("valid_count", &header.valid_count)
            .field("has_rest_offsets", &(header.has_rest_offsets != 0))
            .finish()
    }
}

impl ParticleArena<Vec<StoreBlock>> {
    /// Empty store with room for `max_particles`.
    pub fn new(max_particles: u32, has_rest_offsets: bool) -> Self {
        let layout = StoreLayout::new(max_particles, has_rest_offsets);
        let blocks = layout.total_bytes() / size_of::<StoreBlock>();
        let mut store = Self {
            blocks: vec![StoreBlock::zeroed(); blocks],
            layout,
        };
        *store.header_mut() = StoreHeader::new(max_particles, has_rest_offsets);
        store
    }

    /// Bulk import. Only bits below `valid_particle_range` are honored; a
    /// missing bitmap yields an empty store.
    pub fn from_descriptor(desc: &ParticleDescriptor, bounds: Aabb) -> SimResult<Self> {
        let range = desc.valid_particle_range;
        if range > desc.max_particles {
            return Err(SimError::IndexOutOfRange {
                index: range,
                max: desc.max_particles,
            });
        }

        let mut store = Self::new(desc.max_particles, desc.rest_offsets.is_some());
        let Some(source_bits) = desc.bitmap.as_deref() else {
            return Ok(store);
        };
        if desc.positions.len() < range as usize || desc.velocities.len() < range as usize {
            return Err(SimError::MissingBuffer("positions/velocities"));
        }
        if desc
            .rest_offsets
            .as_ref()
            .is_some_and(|offsets| offsets.len() < range as usize)
        {
            return Err(SimError::MissingBuffer("rest_offsets"));
        }
        let live = bitmap::count_below(source_bits, range);
        if live != desc.num_particles {
            warn!(
                "particle descriptor claims {} particles but its bitmap holds {live} below range {range}",
                desc.num_particles
            );
        }

        let parts = store.parts_mut();
        let mut highest = None;
        for index in bitmap::iter(source_bits).take_while(|&i| i < range) {
            bitmap::set(parts.bitmap, index);
            parts.particles[index as usize] = Particle {
                position: desc.positions[index as usize],
                velocity: desc.velocities[index as usize],
                density: 0.0,
                api_flags: ParticleFlags::VALID.bits(),
                internal_flags: 0,
            };
            highest = Some(index);
        }
        if let (Some(offsets), Some(source)) = (parts.rest_offsets, desc.rest_offsets.as_ref()) {
            for index in bitmap::iter(parts.bitmap) {
                offsets[index as usize] = source[index as usize];
            }
        }

        parts.header.valid_count = live;
        parts.header.valid_range = highest.map_or(0, |i| i + 1);
        parts.header.set_bounds(bounds);
        debug!("imported {live} particles (range {range})");
        Ok(store)
    }

    /// Copies a serialized store into a new owned arena.
    pub fn from_bytes(bytes: &[u8]) -> SimResult<Self> {
        let (_, layout) = StoreLayout::read_header(bytes)?;
        let mut blocks = vec![StoreBlock::zeroed(); layout.total_bytes() / size_of::<StoreBlock>()];
        bytemuck::cast_slice_mut::<StoreBlock, u8>(&mut blocks).copy_from_slice(bytes);
        let store = Self { blocks, layout };
        store.check_occupancy()?;
        Ok(store)
    }
}

impl<'a> ParticleArena<&'a mut [StoreBlock]> {
    /// Reconstructs a live store over `bytes` without copying. The buffer
    /// must start on a 16-byte boundary.
    pub fn from_bytes(bytes: &'a mut [u8]) -> SimResult<Self> {
        let (_, layout) = StoreLayout::read_header(bytes)?;
        let blocks = bytemuck::try_cast_slice_mut::<u8, StoreBlock>(bytes).map_err(|err| {
            SimError::LayoutMismatch(format!("in-place store needs 16-byte aligned bytes ({err:?})"))
        })?;
        let store = Self { blocks, layout };
        store.check_occupancy()?;
        Ok(store)
    }
}

impl<B: AsRef<[StoreBlock]>> ParticleArena<B> {
    /// Serialized form of the store.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.blocks.as_ref())
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    fn header(&self) -> &StoreHeader {
        bytemuck::from_bytes(&self.as_bytes()[..size_of::<StoreHeader>()])
    }

    fn bitmap_words(&self) -> &[u32] {
        let block = self.layout.bitmap;
        &bytemuck::cast_slice(block.bytes(self.as_bytes()))[..block.count]
    }

    fn particle_records(&self) -> &[Particle] {
        let block = self.layout.particles;
        &bytemuck::cast_slice(block.bytes(self.as_bytes()))[..block.count]
    }

    fn rest_offset_values(&self) -> Option<&[f32]> {
        self.layout
            .rest_offsets
            .map(|block| &bytemuck::cast_slice(block.bytes(self.as_bytes()))[..block.count])
    }

    /// Header counts must agree with the bitmap of serialized bytes.
    fn check_occupancy(&self) -> SimResult<()> {
        let header = self.header();
        let words = self.bitmap_words();
        let live = bitmap::count(words);
        let range = bitmap::highest_set_bit(words).map_or(0, |i| i + 1);
        if live != header.valid_count || range > header.valid_range {
            return Err(SimError::LayoutMismatch(format!(
                "bitmap holds {live} particles up to {range}, header says {} up to {}",
                header.valid_count, header.valid_range
            )));
        }
        Ok(())
    }

    pub fn max_particles(&self) -> u32 {
        self.header().max_particles
    }

    pub fn valid_particle_range(&self) -> u32 {
        self.header().valid_range
    }

    pub fn valid_particle_count(&self) -> u32 {
        self.header().valid_count
    }

    pub fn has_rest_offsets(&self) -> bool {
        self.layout.rest_offsets.is_some()
    }

    pub fn world_bounds(&self) -> Aabb {
        self.header().bounds()
    }

    pub fn bitmap(&self) -> &[u32] {
        self.bitmap_words()
    }

    pub fn is_valid(&self, index: u32) -> bool {
        bitmap::test(self.bitmap_words(), index)
    }

    /// Record at `index` if it is live.
    pub fn particle(&self, index: u32) -> Option<Particle> {
        self.is_valid(index)
            .then(|| self.particle_records()[index as usize])
    }

    pub fn rest_offset(&self, index: u32) -> Option<f32> {
        if !self.is_valid(index) {
            return None;
        }
        self.rest_offset_values()
            .map(|offsets| offsets[index as usize])
    }

    fn check_live(&self, indices: &[u32]) -> SimResult<()> {
        let max = self.max_particles();
        for &index in indices {
            if index >= max {
                return Err(SimError::IndexOutOfRange { index, max });
            }
            if !self.is_valid(index) {
                return Err(SimError::ParticleNotValid { index });
            }
        }
        Ok(())
    }

    /// Host buffers; `full_state` and `device` only matter to mirrored states.
    pub fn particles(&self, _full_state: bool, _device: bool) -> ParticleReadData<'_> {
        let header = self.header();
        let range = header.valid_range as usize;
        let bytes = self.layout.particles.bytes(self.as_bytes());
        let stride = size_of::<Particle>();
        let field = |offset: usize| if range == 0 { &bytes[..0] } else { &bytes[offset..] };

        ParticleReadData {
            valid_particle_range: header.valid_range,
            valid_particle_count: header.valid_count,
            bitmap: self.bitmap_words(),
            positions: StridedView::new(field(Particle::POSITION_OFFSET), stride, range),
            velocities: StridedView::new(field(Particle::VELOCITY_OFFSET), stride, range),
            densities: StridedView::new(field(Particle::DENSITY_OFFSET), stride, range),
            flags: StridedView::new(field(Particle::FLAGS_OFFSET), stride, range),
            rest_offsets: self
                .rest_offset_values()
                .map_or_else(StridedView::empty, |offsets| {
                    StridedView::from_slice(&offsets[..range])
                }),
            world_bounds: header.bounds(),
            on_device: false,
        }
    }

    pub fn export_descriptor(&self) -> ParticleDescriptor {
        let range = self.valid_particle_range() as usize;
        let records = &self.particle_records()[..range];
        ParticleDescriptor {
            max_particles: self.max_particles(),
            num_particles: self.valid_particle_count(),
            valid_particle_range: range as u32,
            bitmap: Some(self.bitmap_words().to_vec()),
            positions: records.iter().map(|p| p.position).collect(),
            velocities: records.iter().map(|p| p.velocity).collect(),
            rest_offsets: self
                .rest_offset_values()
                .map(|offsets| offsets[..range].to_vec()),
        }
    }
}

impl<B: AsRef<[StoreBlock]> + AsMut<[StoreBlock]>> ParticleArena<B> {
    fn header_mut(&mut self) -> &mut StoreHeader {
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(self.blocks.as_mut());
        bytemuck::from_bytes_mut(&mut bytes[..size_of::<StoreHeader>()])
    }

    fn parts_mut(&mut self) -> StoreParts<'_> {
        let layout = self.layout;
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(self.blocks.as_mut());
        let (header, rest) = bytes.split_at_mut(layout.header.byte_len);
        let (bitmap, rest) = rest.split_at_mut(layout.bitmap.byte_len);
        let (particles, rest) = rest.split_at_mut(layout.particles.byte_len);
        let rest_offsets = layout
            .rest_offsets
            .map(|block| &mut bytemuck::cast_slice_mut::<u8, f32>(rest)[..block.count]);

        StoreParts {
            header: bytemuck::from_bytes_mut(&mut header[..size_of::<StoreHeader>()]),
            bitmap: &mut bytemuck::cast_slice_mut::<u8, u32>(bitmap)[..layout.bitmap.count],
            particles: &mut bytemuck::cast_slice_mut::<u8, Particle>(particles)
                [..layout.particles.count],
            rest_offsets,
        }
    }

    pub fn add_particles(&mut self, data: &ParticleCreationData<'_>) -> SimResult<bool> {
        if data.count() == 0 {
            return Ok(true);
        }
        data.check_buffers(self.has_rest_offsets())?;
        let max = self.max_particles();
        for &index in data.indices {
            if index >= max {
                return Err(SimError::IndexOutOfRange { index, max });
            }
            if self.is_valid(index) {
                return Err(SimError::ParticleAlreadyValid { index });
            }
        }

        let velocities = data.velocities_or_zero();
        let parts = self.parts_mut();
        let mut bounds = parts.header.bounds();
        let mut added = 0;
        for (slot, &index) in data.indices.iter().enumerate() {
            let position = data.positions.get(slot).unwrap_or(Vec3::ZERO);
            let user_flags = data.flags.map_or(ParticleFlags::empty(), |flags| flags[slot]);
            if !bitmap::test(parts.bitmap, index) {
                bitmap::set(parts.bitmap, index);
                added += 1;
            }
            parts.particles[index as usize] = Particle {
                position,
                velocity: velocities.get(slot).unwrap_or(Vec3::ZERO),
                density: 0.0,
                api_flags: (user_flags | ParticleFlags::VALID).bits(),
                internal_flags: 0,
            };
            parts.header.valid_range = parts.header.valid_range.max(index + 1);
            bounds.extend(position);
        }

        if let (Some(offsets), Some(source)) = (parts.rest_offsets, data.rest_offsets) {
            for (slot, &index) in data.indices.iter().enumerate() {
                offsets[index as usize] = source.get(slot).unwrap_or(0.0);
            }
        }

        parts.header.valid_count += added;
        parts.header.set_bounds(bounds);
        Ok(true)
    }

    pub fn remove_particles(&mut self, indices: &[u32]) -> SimResult<()> {
        self.check_live(indices)?;
        let parts = self.parts_mut();
        for &index in indices {
            if !bitmap::test(parts.bitmap, index) {
                continue;
            }
            bitmap::reset(parts.bitmap, index);
            release_record(&mut parts.particles[index as usize]);
            parts.header.valid_count -= 1;
        }
        parts.header.valid_range = bitmap::highest_set_bit(parts.bitmap).map_or(0, |i| i + 1);
        if parts.header.valid_count == 0 {
            parts.header.set_bounds(Aabb::empty());
        }
        Ok(())
    }

    pub fn remove_all_particles(&mut self) {
        let parts = self.parts_mut();
        for index in bitmap::iter(parts.bitmap) {
            release_record(&mut parts.particles[index as usize]);
        }
        parts.bitmap.fill(0);
        parts.header.valid_count = 0;
        parts.header.valid_range = 0;
        parts.header.set_bounds(Aabb::empty());
    }

    pub fn set_positions(&mut self, indices: &[u32], positions: &[Vec3]) -> SimResult<()> {
        if positions.len() < indices.len() {
            return Err(SimError::MissingBuffer("positions"));
        }
        self.check_live(indices)?;
        let parts = self.parts_mut();
        let mut bounds = parts.header.bounds();
        for (&index, &position) in indices.iter().zip(positions) {
            parts.particles[index as usize].position = position;
            bounds.extend(position);
        }
        parts.header.set_bounds(bounds);
        Ok(())
    }

    pub fn set_velocities(&mut self, indices: &[u32], velocities: &[Vec3]) -> SimResult<()> {
        if velocities.len() < indices.len() {
            return Err(SimError::MissingBuffer("velocities"));
        }
        self.check_live(indices)?;
        let parts = self.parts_mut();
        for (&index, &velocity) in indices.iter().zip(velocities) {
            parts.particles[index as usize].velocity = velocity;
        }
        Ok(())
    }

    pub fn set_rest_offsets(&mut self, indices: &[u32], rest_offsets: &[f32]) -> SimResult<()> {
        if !self.has_rest_offsets() {
            return Err(SimError::InvalidOperation(
                "store was created without per-particle rest offsets".into(),
            ));
        }
        if rest_offsets.len() < indices.len() {
            return Err(SimError::MissingBuffer("rest_offsets"));
        }
        self.check_live(indices)?;
        if let Some(offsets) = self.parts_mut().rest_offsets {
            for (&index, &offset) in indices.iter().zip(rest_offsets) {
                offsets[index as usize] = offset;
            }
        }
        Ok(())
    }

    /// Sparse scatter-accumulate of solver impulses; slots that are not live are skipped.
    /// Every bit in `map` needs a delta, otherwise nothing is applied.
    pub fn add_delta_velocities(
        &mut self,
        map: &Bitmap,
        deltas: &[Vec3],
        multiplier: f32,
    ) -> SimResult<()> {
        if map
            .highest_set_bit()
            .is_some_and(|index| index as usize >= deltas.len())
        {
            return Err(SimError::MissingBuffer("delta velocities"));
        }
        let parts = self.parts_mut();
        for index in map.iter() {
            if !bitmap::test(parts.bitmap, index) {
                continue;
            }
            parts.particles[index as usize].velocity += deltas[index as usize] * multiplier;
        }
        Ok(())
    }

    /// Rebases every live position and the bounds onto a new origin.
    pub fn shift_origin(&mut self, shift: Vec3) {
        let parts = self.parts_mut();
        for index in bitmap::iter(parts.bitmap) {
            parts.particles[index as usize].position -= shift;
        }
        let bounds = parts.header.bounds();
        if !bounds.is_empty() {
            parts.header.set_bounds(bounds.translated(-shift));
        }
    }

    /// Zeroes density and internal flags of live particles.
    pub fn clear_sim_state(&mut self) {
        let parts = self.parts_mut();
        for index in bitmap::iter(parts.bitmap) {
            let record = &mut parts.particles[index as usize];
            record.density = 0.0;
            record.internal_flags = 0;
        }
    }

    /// Shrinks the bounds to exactly the live positions.
    pub fn recompute_bounds(&mut self) {
        let parts = self.parts_mut();
        let mut bounds = Aabb::empty();
        for index in bitmap::iter(parts.bitmap) {
            bounds.extend(parts.particles[index as usize].position);
        }
        parts.header.set_bounds(bounds);
    }

    /// Sets solver-owned fields of a live particle.
    pub fn write_sim_state(
        &mut self,
        index: u32,
        density: f32,
        flags: super::layout::InternalParticleFlags,
    ) -> SimResult<()> {
        self.check_live(&[index])?;
        let parts = self.parts_mut();
        let record = &mut parts.particles[index as usize];
        record.density = density;
        record.internal_flags = flags.bits();
        Ok(())
    }
}

/// Clears the flags of a freed slot; debug builds also poison its payload.
fn release_record(record: &mut Particle) {
    if cfg!(debug_assertions) {
        *record = Particle::poisoned();
    } else {
        record.api_flags = 0;
        record.internal_flags = 0;
    }
}

impl<B> ParticleSystemState for ParticleArena<B>
where
    B: AsRef<[StoreBlock]> + AsMut<[StoreBlock]> + Send,
{
    fn max_particles(&self) -> u32 {
        ParticleArena::max_particles(self)
    }

    fn valid_particle_range(&self) -> u32 {
        ParticleArena::valid_particle_range(self)
    }

    fn valid_particle_count(&self) -> u32 {
        ParticleArena::valid_particle_count(self)
    }

    fn has_rest_offsets(&self) -> bool {
        ParticleArena::has_rest_offsets(self)
    }

    fn world_bounds(&self) -> Aabb {
        ParticleArena::world_bounds(self)
    }

    fn add_particles(&mut self, data: &ParticleCreationData<'_>) -> SimResult<bool> {
        ParticleArena::add_particles(self, data)
    }

    fn remove_particles(&mut self, indices: &[u32]) -> SimResult<()> {
        ParticleArena::remove_particles(self, indices)
    }

    fn remove_all_particles(&mut self) {
        ParticleArena::remove_all_particles(self)
    }

    fn set_positions(&mut self, indices: &[u32], positions: &[Vec3]) -> SimResult<()> {
        ParticleArena::set_positions(self, indices, positions)
    }

    fn set_velocities(&mut self, indices: &[u32], velocities: &[Vec3]) -> SimResult<()> {
        ParticleArena::set_velocities(self, indices, velocities)
    }

    fn set_rest_offsets(&mut self, indices: &[u32], rest_offsets: &[f32]) -> SimResult<()> {
        ParticleArena::set_rest_offsets(self, indices, rest_offsets)
    }

    fn add_delta_velocities(
        &mut self,
        map: &Bitmap,
        deltas: &[Vec3],
        multiplier: f32,
    ) -> SimResult<()> {
        ParticleArena::add_delta_velocities(self, map, deltas, multiplier)
    }

    fn particles(&self, full_state: bool, device: bool) -> ParticleReadData<'_> {
        ParticleArena::particles(self, full_state, device)
    }

    fn shift_origin(&mut self, shift: Vec3) {
        ParticleArena::shift_origin(self, shift)
    }

    fn clear_sim_state(&mut self) {
        ParticleArena::clear_sim_state(self)
    }

    fn export_descriptor(&self) -> ParticleDescriptor {
        ParticleArena::export_descriptor(self)
    }
}

/// Borrowed, read-only view over serialized store bytes. Nothing is copied;
/// every read goes through the block offsets of the layout.
#[derive(Debug, Clone, Copy)]
pub struct ParticleStoreView<'a> {
    bytes: &'a [u8],
    header: StoreHeader,
    layout: StoreLayout,
}

impl<'a> ParticleStoreView<'a> {
    pub fn from_bytes(bytes: &'a [u8]) -> SimResult<Self> {
        let (header, layout) = StoreLayout::read_header(bytes)?;
        Ok(Self {
            bytes,
            header,
            layout,
        })
    }

    pub fn max_particles(&self) -> u32 {
        self.header.max_particles
    }

    pub fn valid_particle_range(&self) -> u32 {
        self.header.valid_range
    }

    pub fn valid_particle_count(&self) -> u32 {
        self.header.valid_count
    }

    pub fn has_rest_offsets(&self) -> bool {
        self.layout.rest_offsets.is_some()
    }

    pub fn world_bounds(&self) -> Aabb {
        self.header.bounds()
    }

    fn word(&self, word: usize) -> u32 {
        let start = self.layout.bitmap.byte_offset + word * size_of::<u32>();
        bytemuck::pod_read_unaligned(&self.bytes[start..start + size_of::<u32>()])
    }

    pub fn is_valid(&self, index: u32) -> bool {
        let word = (index / 32) as usize;
        word < self.layout.bitmap.count && self.word(word) & (1 << (index % 32)) != 0
    }

    pub fn particle(&self, index: u32) -> Option<Particle> {
        if !self.is_valid(index) {
            return None;
        }
        let start = self.layout.particles.byte_offset + index as usize * size_of::<Particle>();
        Some(bytemuck::pod_read_unaligned(
            &self.bytes[start..start + size_of::<Particle>()],
        ))
    }

    pub fn positions(&self) -> StridedView<'a, Vec3> {
        let range = self.header.valid_range as usize;
        if range == 0 {
            return StridedView::empty();
        }
        StridedView::new(
            &self.bytes[self.layout.particles.byte_offset..],
            size_of::<Particle>(),
            range,
        )
    }

    pub fn live_indices(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.header.valid_range).filter(move |&i| self.is_valid(i))
    }

    /// Copies the viewed bytes into an owned store.
    pub fn to_store(&self) -> SimResult<ParticleStore> {
        ParticleStore::from_bytes(self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particles::layout::InternalParticleFlags;

    fn store_with(indices: &[u32], positions: &[Vec3]) -> ParticleStore {
        let mut store = ParticleStore::new(10, false);
        store
            .add_particles(&ParticleCreationData::new(indices, positions))
            .expect("fresh indices");
        store
    }

    #[test]
    fn add_rejects_occupied_slot_without_mutation() {
        let mut store = store_with(&[1], &[Vec3::ONE]);
        let before = store.as_bytes().to_vec();
        let result = store.add_particles(&ParticleCreationData::new(
            &[2, 1],
            &[Vec3::ZERO, Vec3::ZERO],
        ));
        assert_eq!(result, Err(SimError::ParticleAlreadyValid { index: 1 }));
        assert_eq!(store.as_bytes(), &before[..]);
    }

    #[test]
    fn add_rejects_out_of_range() {
        let mut store = ParticleStore::new(4, false);
        let result = store.add_particles(&ParticleCreationData::new(&[4], &[Vec3::ZERO]));
        assert_eq!(result, Err(SimError::IndexOutOfRange { index: 4, max: 4 }));
    }

    #[test]
    fn duplicate_indices_in_one_batch_keep_last_write() {
        let mut store = ParticleStore::new(4, false);
        store
            .add_particles(&ParticleCreationData::new(
                &[2, 2],
                &[Vec3::ZERO, Vec3::splat(5.0)],
            ))
            .expect("valid batch");
        assert_eq!(store.valid_particle_count(), 1);
        assert_eq!(store.particle(2).map(|p| p.position), Some(Vec3::splat(5.0)));
    }

    #[test]
    fn valid_flag_tracks_bitmap() {
        let mut store = store_with(&[0, 5], &[Vec3::ZERO, Vec3::X]);
        assert!(store
            .particle(5)
            .is_some_and(|p| p.flags().contains(ParticleFlags::VALID)));
        store.remove_particles(&[5]).expect("live");
        assert!(store.particle(5).is_none());
        assert_eq!(store.particle_records()[5].api_flags, 0);
    }

    #[test]
    fn removing_dead_particle_is_an_error() {
        let mut store = store_with(&[0], &[Vec3::ZERO]);
        assert_eq!(
            store.remove_particles(&[3]),
            Err(SimError::ParticleNotValid { index: 3 })
        );
        assert_eq!(store.valid_particle_count(), 1);
    }

    #[test]
    fn clear_sim_state_keeps_api_flags() {
        let mut store = store_with(&[3], &[Vec3::ZERO]);
        store
            .write_sim_state(3, 1000.0, InternalParticleFlags::CONSTRAINT_0_VALID)
            .expect("live");
        store.clear_sim_state();
        let particle = store.particle(3).expect("live");
        assert_eq!(particle.density, 0.0);
        assert_eq!(particle.internal_flags, 0);
        assert_eq!(particle.flags(), ParticleFlags::VALID);
    }

    #[test]
    fn delta_velocities_skip_unset_bits() {
        let mut store = store_with(&[0, 1], &[Vec3::ZERO, Vec3::ZERO]);
        let mut map = Bitmap::new();
        map.set(1);
        store
            .add_delta_velocities(&map, &[Vec3::X, Vec3::Y], 2.0)
            .expect("deltas cover map");
        assert_eq!(store.particle(0).map(|p| p.velocity), Some(Vec3::ZERO));
        assert_eq!(store.particle(1).map(|p| p.velocity), Some(Vec3::new(0.0, 2.0, 0.0)));
    }

    #[test]
    fn short_delta_buffer_applies_nothing() {
        let mut store = store_with(&[0, 4], &[Vec3::ZERO, Vec3::ZERO]);
        let mut map = Bitmap::new();
        map.set(0);
        map.set(3);
        map.set(4);
        let before = store.as_bytes().to_vec();
        assert_eq!(
            store.add_delta_velocities(&map, &[Vec3::X; 4], 1.0),
            Err(SimError::MissingBuffer("delta velocities"))
        );
        assert_eq!(store.as_bytes(), &before[..]);

        // dead slot 3 is skipped, live slots on either side still accumulate
        store
            .add_delta_velocities(&map, &[Vec3::X; 5], 1.0)
            .expect("deltas cover map");
        assert_eq!(store.particle(0).map(|p| p.velocity), Some(Vec3::X));
        assert_eq!(store.particle(4).map(|p| p.velocity), Some(Vec3::X));
    }

    #[test]
    fn in_place_store_mutates_borrowed_bytes() {
        let store = store_with(&[2, 5], &[Vec3::X, Vec3::Y]);
        let mut blocks = store.blocks.clone();
        {
            let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut blocks);
            let mut in_place = ParticleStoreViewMut::from_bytes(bytes).expect("aligned bytes");
            let state: &mut dyn ParticleSystemState = &mut in_place;
            state
                .add_particles(&ParticleCreationData::new(&[7], &[Vec3::ONE]))
                .expect("free slot");
            state.remove_particles(&[2]).expect("live");
            state.set_positions(&[7], &[Vec3::Z]).expect("live");
            assert_eq!(state.valid_particle_count(), 2);
        }

        let reread = ParticleStoreView::from_bytes(bytemuck::cast_slice(&blocks))
            .expect("still a valid store");
        assert_eq!(reread.live_indices().collect::<Vec<_>>(), vec![5, 7]);
        assert_eq!(reread.particle(7).map(|p| p.position), Some(Vec3::Z));
        assert_eq!(reread.valid_particle_range(), 8);
        assert!(store.is_valid(2));
        assert!(!store.is_valid(7));
    }

    #[test]
    fn empty_store_reads_are_empty() {
        let store = ParticleStore::new(8, true);
        let read = store.particles(true, false);
        assert!(read.positions.is_empty());
        assert!(read.rest_offsets.is_empty());
        assert!(read.world_bounds.is_empty());
    }

    #[test]
    fn view_reads_without_copy() {
        let store = store_with(&[2, 9], &[Vec3::X, Vec3::Y]);
        let view = ParticleStoreView::from_bytes(store.as_bytes()).expect("valid bytes");
        assert_eq!(view.valid_particle_count(), 2);
        assert_eq!(view.live_indices().collect::<Vec<_>>(), vec![2, 9]);
        assert_eq!(view.particle(9).map(|p| p.position), Some(Vec3::Y));
        assert_eq!(view.positions().get(2), Some(Vec3::X));
    }
}
