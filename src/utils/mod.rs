//! Utility helpers: generational arenas, index pools, bitmaps, strided views, math and logging.

pub mod allocator;
pub mod bitmap;
pub mod logging;
pub mod math;
pub mod profiling;
pub mod strided;

pub use allocator::{Arena, ArenaKey, IndexPool};
pub use bitmap::Bitmap;
pub use math::*;
pub use strided::StridedView;
