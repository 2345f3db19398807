//! Particle Cloth – particle-system and cloth layer of a rigid-body physics engine.
//!
//! This crate provides packed particle storage with spatial packet
//! decomposition, a near-phase that turns broadphase overlaps into filtered
//! interactions between rigid shapes, particle packets and cloth, and the
//! cloth-rigid collision-shape pipeline, orchestrated by a [`Scene`].

pub mod cloth;
pub mod collision;
pub mod config;
pub mod core;
pub mod error;
pub mod factory;
pub mod gpu;
pub mod nphase;
pub mod particles;
pub mod scene;
pub mod utils;
pub mod world;

pub use glam::{Quat, Vec3, Vec4};

pub use cloth::{ClothCollisionBuffers, ClothFlags, ClothSim, ClothSolver, Fabric, FabricDesc, FabricPool};
pub use collision::{BroadPhase, BroadPhaseGroup, ElementPair};
pub use config::{SceneConfig, SceneFlags};
pub use core::{
    actor::{ActorKind, RigidActor},
    filter::{FilterData, FilterFlags, FilterShader, PairFlags, SimulationFilterCallback},
    geometry::Geometry,
    handles::{ActorId, ClothId, ElementId, InteractionId, ParticleSystemId, ShapeId},
    shape::ShapeSim,
    types::Transform,
};
pub use error::{SimError, SimResult};
pub use factory::SimFactory;
pub use gpu::{ComputeBackend, CpuBackend, DeviceParticleState};
pub use nphase::{InteractionType, NPhaseCore, ReportBuffer};
pub use particles::{
    ParticleCreationData, ParticleFlags, ParticleReadData, ParticleStore, ParticleStoreViewMut,
    ParticleSystemParams, ParticleSystemSim, ParticleSystemState,
};
pub use scene::Scene;
pub use world::World;
