//! Cloth solver collaborator.
//!
//! Collision primitives are written through index-ranged replacements:
//! `set_x(values, first, last)` replaces elements `[first, last)` with
//! `values`, growing or shrinking the buffer. Capsules reference sphere
//! indices; convex masks reference plane indices.

use glam::{Vec3, Vec4};

pub trait ClothSolver: Send {
    fn set_spheres(&mut self, spheres: &[Vec4], first: u32, last: u32);
    fn set_capsules(&mut self, capsules: &[[u32; 2]], first: u32, last: u32);
    fn set_planes(&mut self, planes: &[Vec4], first: u32, last: u32);
    fn set_convexes(&mut self, masks: &[u32], first: u32, last: u32);
    /// Replaces every triangle from `first` on; `previous` and `current` hold
    /// three vertices per triangle.
    fn set_triangles(&mut self, previous: &[Vec3], current: &[Vec3], first: u32);

    fn num_spheres(&self) -> u32;
    fn num_capsules(&self) -> u32;
    fn num_planes(&self) -> u32;
    fn num_convexes(&self) -> u32;
    fn num_triangles(&self) -> u32;
}

/// In-memory solver that keeps whatever was pushed.
#[derive(Debug, Clone, Default)]
pub struct ClothCollisionBuffers {
    pub spheres: Vec<Vec4>,
    pub capsules: Vec<[u32; 2]>,
    pub planes: Vec<Vec4>,
    pub convexes: Vec<u32>,
    pub previous_triangles: Vec<Vec3>,
    pub current_triangles: Vec<Vec3>,
}

impl ClothCollisionBuffers {
    pub fn new() -> Self {
        Self::default()
    }
}

fn splice<T: Copy>(buffer: &mut Vec<T>, values: &[T], first: u32, last: u32) {
    let first = (first as usize).min(buffer.len());
    let last = (last as usize).clamp(first, buffer.len());
    buffer.splice(first..last, values.iter().copied());
}

impl ClothSolver for ClothCollisionBuffers {
    fn set_spheres(&mut self, spheres: &[Vec4], first: u32, last: u32) {
        splice(&mut self.spheres, spheres, first, last);
    }

    fn set_capsules(&mut self, capsules: &[[u32; 2]], first: u32, last: u32) {
        splice(&mut self.capsules, capsules, first, last);
    }

    fn set_planes(&mut self, planes: &[Vec4], first: u32, last: u32) {
        splice(&mut self.planes, planes, first, last);
    }

    fn set_convexes(&mut self, masks: &[u32], first: u32, last: u32) {
        splice(&mut self.convexes, masks, first, last);
    }

    fn set_triangles(&mut self, previous: &[Vec3], current: &[Vec3], first: u32) {
        let start = (first as usize * 3).min(self.current_triangles.len());
        self.previous_triangles.truncate(start);
        self.previous_triangles.extend_from_slice(previous);
        self.current_triangles.truncate(start);
        self.current_triangles.extend_from_slice(current);
    }

    fn num_spheres(&self) -> u32 {
        self.spheres.len() as u32
    }

    fn num_capsules(&self) -> u32 {
        self.capsules.len() as u32
    }

    fn num_planes(&self) -> u32 {
        self.planes.len() as u32
    }

    fn num_convexes(&self) -> u32 {
        self.convexes.len() as u32
    }

    fn num_triangles(&self) -> u32 {
        (self.current_triangles.len() / 3) as u32
    }
}
