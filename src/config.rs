//! Global configuration constants and scene-level settings.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Hard cap on collision spheres a cloth solver accepts (user + rigid + capsule ends).
pub const MAX_COLLISION_SPHERES: u32 = 32;

/// Hard cap on collision capsules a cloth solver accepts.
pub const MAX_COLLISION_CAPSULES: u32 = 32;

/// Hard cap on collision planes shared by planes, boxes and convex meshes.
pub const MAX_COLLISION_PLANES: u32 = 32;

/// Trigger interactions processed per parallel batch.
pub const TRIGGER_BATCH_SIZE: usize = 64;

/// Default number of filter-pair indices available to notify pairs.
pub const FILTER_PAIR_POOL_CAPACITY: u32 = 4096;

/// Default contact offset for shapes, packets and cloth.
pub const DEFAULT_CONTACT_OFFSET: f32 = 0.02;

/// Default edge length of a spatial particle packet.
pub const DEFAULT_PACKET_SIZE: f32 = 1.0;

/// Alignment of every block in the serialized particle arena.
pub const PARTICLE_STORE_ALIGNMENT: usize = 16;

/// Bumped whenever the serialized particle layout changes.
pub const PARTICLE_STORE_FORMAT_VERSION: u32 = 1;

/// Default cell size for the broad-phase uniform grid.
pub const DEFAULT_BROADPHASE_CELL_SIZE: f32 = 5.0;

bitflags! {
    /// Scene-wide switches consulted by pair filtering.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct SceneFlags: u32 {
        /// Generate pairs between kinematic and static actors.
        const ENABLE_KINEMATIC_STATIC_PAIRS = 1 << 0;
        /// Generate pairs between two kinematic actors.
        const ENABLE_KINEMATIC_PAIRS = 1 << 1;
    }
}

/// Scene construction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneConfig {
    pub flags: SceneFlags,
    pub filter_pair_capacity: u32,
    pub trigger_batch_size: usize,
    pub broadphase_cell_size: f32,
    pub parallel: bool,
    /// Opaque constant block handed to the filter shader.
    pub filter_constant_block: Vec<u8>,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            flags: SceneFlags::empty(),
            filter_pair_capacity: FILTER_PAIR_POOL_CAPACITY,
            trigger_batch_size: TRIGGER_BATCH_SIZE,
            broadphase_cell_size: DEFAULT_BROADPHASE_CELL_SIZE,
            parallel: cfg!(feature = "parallel"),
            filter_constant_block: Vec::new(),
        }
    }
}

impl SceneConfig {
    pub fn with_flags(mut self, flags: SceneFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_filter_pair_capacity(mut self, capacity: u32) -> Self {
        self.filter_pair_capacity = capacity;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}
