use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};

use super::types::Transform;
use crate::utils::math::plane_from_point_normal;

/// Axis-aligned bounding box used for particle bounds, broadphase volumes and culling.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Inverted box that any `extend` call overwrites.
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    pub fn from_center_extents(center: Vec3, extents: Vec3) -> Self {
        Self::new(center - extents, center + extents)
    }

    pub fn is_empty(&self) -> bool {
        self.min.cmpgt(self.max).any()
    }

    pub fn extend(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb::new(self.min.min(other.min), self.max.max(other.max))
    }

    pub fn from_points(points: &[Vec3]) -> Self {
        let mut bounds = Self::empty();
        for &p in points {
            bounds.extend(p);
        }
        bounds
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn extent(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn radius(&self) -> f32 {
        self.extent().length()
    }

    pub fn inflated(&self, amount: f32) -> Aabb {
        if self.is_empty() {
            return *self;
        }
        Aabb::new(self.min - Vec3::splat(amount), self.max + Vec3::splat(amount))
    }

    pub fn translated(&self, offset: Vec3) -> Aabb {
        Aabb::new(self.min + offset, self.max + offset)
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && other.min.cmple(self.max).all()
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        self.min.cmple(point).all() && point.cmple(self.max).all()
    }

    /// Bounds of this box after applying `pose` (box is treated as an oriented box).
    pub fn transformed(&self, pose: &Transform) -> Aabb {
        if self.is_empty() {
            return *self;
        }
        if !self.min.is_finite() || !self.max.is_finite() {
            return Aabb::new(Vec3::splat(f32::MIN), Vec3::splat(f32::MAX));
        }
        let center = pose.transform_point(self.center());
        let extent = self.extent();
        let axes = [
            pose.rotation * Vec3::X,
            pose.rotation * Vec3::Y,
            pose.rotation * Vec3::Z,
        ];
        let world_extent = axes[0].abs() * extent.x + axes[1].abs() * extent.y + axes[2].abs() * extent.z;
        Aabb::from_center_extents(center, world_extent)
    }
}

/// Bounds of a triangle.
pub fn triangle_bounds(triangle: &[Vec3; 3]) -> Aabb {
    Aabb::from_points(triangle)
}

/// Triangle mesh collider data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriangleMesh {
    pub vertices: Vec<Vec3>,
    pub indices: Vec<[u32; 3]>,
    pub bounds: Aabb,
}

impl TriangleMesh {
    pub fn new(vertices: Vec<Vec3>, indices: Vec<[u32; 3]>) -> Self {
        let bounds = Aabb::from_points(&vertices);
        Self {
            vertices,
            indices,
            bounds,
        }
    }

    pub fn triangle(&self, index: usize, scale: Vec3) -> [Vec3; 3] {
        let [a, b, c] = self.indices[index];
        [
            self.vertices[a as usize] * scale,
            self.vertices[b as usize] * scale,
            self.vertices[c as usize] * scale,
        ]
    }

    /// Visits the scaled triangles whose bounds touch `region` (mesh local space).
    pub fn triangles_overlapping(&self, scale: Vec3, region: &Aabb, mut visit: impl FnMut([Vec3; 3])) {
        for index in 0..self.indices.len() {
            let triangle = self.triangle(index, scale);
            if triangle_bounds(&triangle).intersects(region) {
                visit(triangle);
            }
        }
    }
}

/// Convex polyhedron given by its vertices and the outward planes of its polygons.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvexMesh {
    pub vertices: Vec<Vec3>,
    pub polygons: Vec<Vec4>,
    pub bounds: Aabb,
}

impl ConvexMesh {
    pub fn new(vertices: Vec<Vec3>, polygons: Vec<Vec4>) -> Self {
        let bounds = Aabb::from_points(&vertices);
        Self {
            vertices,
            polygons,
            bounds,
        }
    }

    /// Axis-aligned box expressed as a convex mesh.
    pub fn cuboid(half_extents: Vec3) -> Self {
        let mut vertices = Vec::with_capacity(8);
        for i in 0..8 {
            vertices.push(Vec3::new(
                if i & 1 == 0 { -half_extents.x } else { half_extents.x },
                if i & 2 == 0 { -half_extents.y } else { half_extents.y },
                if i & 4 == 0 { -half_extents.z } else { half_extents.z },
            ));
        }
        Self::new(vertices, box_planes(half_extents).to_vec())
    }

    pub fn polygon_count(&self) -> u32 {
        self.polygons.len() as u32
    }
}

/// The six outward planes of an origin-centered box.
pub fn box_planes(half_extents: Vec3) -> [Vec4; 6] {
    [
        plane_from_point_normal(Vec3::X * half_extents.x, Vec3::X),
        plane_from_point_normal(-Vec3::X * half_extents.x, -Vec3::X),
        plane_from_point_normal(Vec3::Y * half_extents.y, Vec3::Y),
        plane_from_point_normal(-Vec3::Y * half_extents.y, -Vec3::Y),
        plane_from_point_normal(Vec3::Z * half_extents.z, Vec3::Z),
        plane_from_point_normal(-Vec3::Z * half_extents.z, -Vec3::Z),
    ]
}

/// Scaling applied to height field samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeightFieldScale {
    pub height_scale: f32,
    pub row_scale: f32,
    pub column_scale: f32,
}

impl Default for HeightFieldScale {
    fn default() -> Self {
        Self {
            height_scale: 1.0,
            row_scale: 1.0,
            column_scale: 1.0,
        }
    }
}

/// Regular grid of height samples; rows run along local X, columns along local Z.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeightField {
    pub rows: u32,
    pub columns: u32,
    pub heights: Vec<f32>,
}

impl HeightField {
    /// `heights` is row-major with `rows * columns` samples.
    pub fn new(rows: u32, columns: u32, heights: Vec<f32>) -> Self {
        debug_assert_eq!(heights.len(), (rows * columns) as usize);
        Self {
            rows,
            columns,
            heights,
        }
    }

    pub fn flat(rows: u32, columns: u32, height: f32) -> Self {
        Self::new(rows, columns, vec![height; (rows * columns) as usize])
    }

    pub fn height(&self, row: u32, column: u32) -> f32 {
        self.heights[(row * self.columns + column) as usize]
    }

    pub fn vertex(&self, row: u32, column: u32, scale: &HeightFieldScale) -> Vec3 {
        Vec3::new(
            row as f32 * scale.row_scale,
            self.height(row, column) * scale.height_scale,
            column as f32 * scale.column_scale,
        )
    }

    pub fn local_bounds(&self, scale: &HeightFieldScale) -> Aabb {
        let (lo, hi) = self
            .heights
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &h| (lo.min(h), hi.max(h)));
        let y0 = lo * scale.height_scale;
        let y1 = hi * scale.height_scale;
        let x1 = (self.rows.saturating_sub(1)) as f32 * scale.row_scale;
        let z1 = (self.columns.saturating_sub(1)) as f32 * scale.column_scale;
        let mut bounds = Aabb::empty();
        bounds.extend(Vec3::new(0.0, y0.min(y1), 0.0));
        bounds.extend(Vec3::new(x1, y0.max(y1), z1));
        bounds
    }

    /// Visits the cell triangles whose bounds touch `region` (height field local space).
    pub fn triangles_overlapping(
        &self,
        scale: &HeightFieldScale,
        region: &Aabb,
        mut visit: impl FnMut([Vec3; 3]),
    ) {
        if self.rows < 2 || self.columns < 2 || region.is_empty() {
            return;
        }
        let cell_range = |lo: f32, hi: f32, step: f32, cells: u32| -> Option<(u32, u32)> {
            let (lo, hi) = if step < 0.0 { (hi / step, lo / step) } else { (lo / step, hi / step) };
            let first = lo.floor().max(0.0);
            let last = hi.ceil().min((cells - 1) as f32);
            (first <= last).then_some((first as u32, last as u32))
        };
        let Some((row0, row1)) = cell_range(region.min.x, region.max.x, scale.row_scale, self.rows) else {
            return;
        };
        let Some((col0, col1)) =
            cell_range(region.min.z, region.max.z, scale.column_scale, self.columns)
        else {
            return;
        };

        for row in row0..row1.min(self.rows - 1) {
            for column in col0..col1.min(self.columns - 1) {
                let v00 = self.vertex(row, column, scale);
                let v01 = self.vertex(row, column + 1, scale);
                let v10 = self.vertex(row + 1, column, scale);
                let v11 = self.vertex(row + 1, column + 1, scale);
                for triangle in [[v00, v01, v10], [v01, v11, v10]] {
                    if triangle_bounds(&triangle).intersects(region) {
                        visit(triangle);
                    }
                }
            }
        }
    }
}
