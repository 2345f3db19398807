//! Cloth instances, shared fabrics and rigid collision-shape harvesting.

pub mod collision;
pub mod fabric;
pub mod sim;
pub mod solver;

pub use collision::{ClothCollisionShapes, ClothFrame, RigidShapeRef, ShapeLookup, TrackedShape};
pub use fabric::{grid_fabric, Fabric, FabricDesc, FabricPool};
pub use sim::{ClothFlags, ClothSim};
pub use solver::{ClothCollisionBuffers, ClothSolver};
