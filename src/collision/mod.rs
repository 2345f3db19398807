//! Broadphase volume tracking and exact overlap tests.

pub mod broadphase;
pub mod overlap;

pub use broadphase::{BroadPhase, BroadPhaseGroup, ElementPair, OverlapUpdate, SpatialGrid};
pub use overlap::{geometries_overlap, packet_overlaps_shape, GjkOverlap};
