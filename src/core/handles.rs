//! Strongly typed handles for every simulation object kind.

use crate::arena_key;

arena_key!(
    /// Rigid actor (static, dynamic or kinematic body).
    ActorId
);
arena_key!(
    /// Collision shape attached to a rigid actor.
    ShapeId
);
arena_key!(
    /// Broadphase-registered volume: a rigid shape, a particle packet or a cloth.
    ElementId
);
arena_key!(
    /// Pairwise near-phase interaction.
    InteractionId
);
arena_key!(
    /// Particle system (plain particles or fluid).
    ParticleSystemId
);
arena_key!(
    /// Cloth instance.
    ClothId
);
arena_key!(
    /// Deduplicated actor pair shared by all shape interactions between two actors.
    ActorPairId
);

/// Solver-side handle of a spatial particle packet.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct LowLevelShapeId(pub u32);
