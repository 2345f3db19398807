//! Flat binary layout of a particle store.
//!
//! `[header | bitmap words | particle records | rest offsets?]`, every block
//! starting on a 16-byte boundary.

use std::mem::size_of;

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::config::{PARTICLE_STORE_ALIGNMENT, PARTICLE_STORE_FORMAT_VERSION};
use crate::core::mesh::Aabb;
use crate::error::{SimError, SimResult};
use crate::utils::bitmap;

/// "PCST" little endian.
pub const STORE_MAGIC: u32 = 0x5453_4350;

bitflags! {
    /// API-visible per-particle flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ParticleFlags: u16 {
        /// Mirrors the occupancy bitmap; never set on a free slot.
        const VALID = 1 << 0;
        const COLLISION_WITH_STATIC = 1 << 1;
        const COLLISION_WITH_DYNAMIC = 1 << 2;
        const COLLISION_WITH_DRAIN = 1 << 3;
        const SPATIAL_DATA_STRUCTURE_OVERFLOW = 1 << 4;
    }
}

bitflags! {
    /// Solver annotations discarded by `clear_sim_state`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InternalParticleFlags: u16 {
        const CONSTRAINT_0_VALID = 1 << 0;
        const CONSTRAINT_1_VALID = 1 << 1;
        const CONSTRAINT_0_DYNAMIC = 1 << 2;
        const CONSTRAINT_1_DYNAMIC = 1 << 3;
        const DRAIN_CONTACT = 1 << 4;
        const PACKET_OVERFLOW = 1 << 5;
    }
}

/// Packed 32-byte particle record.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Particle {
    pub position: Vec3,
    pub velocity: Vec3,
    pub density: f32,
    pub api_flags: u16,
    pub internal_flags: u16,
}

impl Particle {
    pub const POSITION_OFFSET: usize = 0;
    pub const VELOCITY_OFFSET: usize = 12;
    pub const DENSITY_OFFSET: usize = 24;
    pub const FLAGS_OFFSET: usize = 28;

    pub fn flags(&self) -> ParticleFlags {
        ParticleFlags::from_bits_retain(self.api_flags)
    }

    pub fn internal_flags(&self) -> InternalParticleFlags {
        InternalParticleFlags::from_bits_retain(self.internal_flags)
    }

    /// Byte pattern written into freed slots in debug builds.
    pub(crate) fn poisoned() -> Self {
        Self {
            position: Vec3::splat(f32::NAN),
            velocity: Vec3::splat(f32::NAN),
            density: f32::NAN,
            api_flags: 0,
            internal_flags: 0,
        }
    }
}

/// Fixed 48-byte header at the start of the arena.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct StoreHeader {
    pub magic: u32,
    pub version: u32,
    pub max_particles: u32,
    pub valid_range: u32,
    pub valid_count: u32,
    pub has_rest_offsets: u32,
    pub bounds_min: [f32; 3],
    pub bounds_max: [f32; 3],
}

impl StoreHeader {
    pub fn new(max_particles: u32, has_rest_offsets: bool) -> Self {
        let empty = Aabb::empty();
        Self {
            magic: STORE_MAGIC,
            version: PARTICLE_STORE_FORMAT_VERSION,
            max_particles,
            valid_range: 0,
            valid_count: 0,
            has_rest_offsets: has_rest_offsets as u32,
            bounds_min: empty.min.to_array(),
            bounds_max: empty.max.to_array(),
        }
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::new(Vec3::from(self.bounds_min), Vec3::from(self.bounds_max))
    }

    pub fn set_bounds(&mut self, bounds: Aabb) {
        self.bounds_min = bounds.min.to_array();
        self.bounds_max = bounds.max.to_array();
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.magic != STORE_MAGIC {
            return Err(SimError::LayoutMismatch(format!(
                "bad magic {:#010x}",
                self.magic
            )));
        }
        if self.version != PARTICLE_STORE_FORMAT_VERSION {
            return Err(SimError::LayoutMismatch(format!(
                "format version {} (expected {PARTICLE_STORE_FORMAT_VERSION})",
                self.version
            )));
        }
        if self.valid_count > self.valid_range || self.valid_range > self.max_particles {
            return Err(SimError::LayoutMismatch(format!(
                "count {} / range {} / max {} out of order",
                self.valid_count, self.valid_range, self.max_particles
            )));
        }
        Ok(())
    }
}

/// One block of the arena: byte offset, padded byte length and element count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub byte_offset: usize,
    pub byte_len: usize,
    pub count: usize,
}

impl BlockRange {
    pub fn end(&self) -> usize {
        self.byte_offset + self.byte_len
    }

    pub fn bytes<'a>(&self, arena: &'a [u8]) -> &'a [u8] {
        &arena[self.byte_offset..self.end()]
    }
}

const fn align_up(value: usize) -> usize {
    value.div_ceil(PARTICLE_STORE_ALIGNMENT) * PARTICLE_STORE_ALIGNMENT
}

/// Typed offsets of every block for a given capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLayout {
    pub header: BlockRange,
    pub bitmap: BlockRange,
    pub particles: BlockRange,
    pub rest_offsets: Option<BlockRange>,
}

impl StoreLayout {
    pub fn new(max_particles: u32, has_rest_offsets: bool) -> Self {
        let header = BlockRange {
            byte_offset: 0,
            byte_len: align_up(size_of::<StoreHeader>()),
            count: 1,
        };
        let words = bitmap::word_count(max_particles);
        let bitmap = BlockRange {
            byte_offset: header.end(),
            byte_len: align_up(words * size_of::<u32>()),
            count: words,
        };
        let particles = BlockRange {
            byte_offset: bitmap.end(),
            byte_len: align_up(max_particles as usize * size_of::<Particle>()),
            count: max_particles as usize,
        };
        let rest_offsets = has_rest_offsets.then(|| BlockRange {
            byte_offset: particles.end(),
            byte_len: align_up(max_particles as usize * size_of::<f32>()),
            count: max_particles as usize,
        });
        Self {
            header,
            bitmap,
            particles,
            rest_offsets,
        }
    }

    pub fn for_header(header: &StoreHeader) -> Self {
        Self::new(header.max_particles, header.has_rest_offsets != 0)
    }

    pub fn total_bytes(&self) -> usize {
        self.rest_offsets.unwrap_or(self.particles).end()
    }

    /// Reads and validates the header of a serialized store.
    pub fn read_header(bytes: &[u8]) -> SimResult<(StoreHeader, StoreLayout)> {
        let header_size = size_of::<StoreHeader>();
        if bytes.len() < header_size {
            return Err(SimError::LayoutMismatch(format!(
                "{} bytes is shorter than the {header_size}-byte header",
                bytes.len()
            )));
        }
        let header: StoreHeader = bytemuck::pod_read_unaligned(&bytes[..header_size]);
        header.validate()?;
        let layout = Self::for_header(&header);
        if bytes.len() != layout.total_bytes() {
            return Err(SimError::LayoutMismatch(format!(
                "expected {} bytes, found {}",
                layout.total_bytes(),
                bytes.len()
            )));
        }
        Ok((header, layout))
    }
}
