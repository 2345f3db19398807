//! Particle systems: packed storage, state capability, spatial packets and stage pipeline.

pub mod layout;
pub mod packet;
pub mod pipeline;
pub mod solver;
pub mod state;
pub mod store;
pub mod system;

pub use layout::{InternalParticleFlags, Particle, ParticleFlags, StoreLayout};
pub use packet::{PacketShape, PacketShapeSet};
pub use solver::{GridPacketSolver, PacketSpec, ParticleCollisionResults, ParticleSolver, ShapeUpdate};
pub use state::{ParticleCreationData, ParticleDescriptor, ParticleReadData, ParticleSystemState};
pub use store::{ParticleArena, ParticleStore, ParticleStoreView, ParticleStoreViewMut, StoreBlock};
pub use system::{ParticleSystemFlags, ParticleSystemParams, ParticleSystemSim};
