//! Core types describing actors, shapes, geometry, filtering vocabulary and handles.

pub mod actor;
pub mod constraints;
pub mod filter;
pub mod geometry;
pub mod handles;
pub mod mesh;
pub mod shape;
pub mod types;

pub use actor::{ActorKind, ArticulationLink, RigidActor};
pub use constraints::{ConstraintRegistry, Joint};
pub use filter::{
    FilterData, FilterFlags, FilterObjectAttributes, FilterObjectType, FilterShader, PairFlags,
    SimulationFilterCallback,
};
pub use geometry::{Geometry, GeometryKind};
pub use handles::*;
pub use mesh::{Aabb, ConvexMesh, HeightField, HeightFieldScale, TriangleMesh};
pub use shape::{ShapeBuilder, ShapeFlags, ShapeSim};
pub use types::Transform;
