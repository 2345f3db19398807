use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::filter::FilterData;
use super::geometry::Geometry;
use super::handles::{ActorId, ElementId, ShapeId};
use super::mesh::Aabb;
use super::types::Transform;
use crate::config::DEFAULT_CONTACT_OFFSET;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ShapeFlags: u8 {
        const SIMULATION = 1 << 0;
        const TRIGGER = 1 << 1;
        const SCENE_QUERY = 1 << 2;
    }
}

impl Default for ShapeFlags {
    fn default() -> Self {
        ShapeFlags::SIMULATION | ShapeFlags::SCENE_QUERY
    }
}

/// Collision shape attached to a rigid actor.
#[derive(Debug, Clone)]
pub struct ShapeSim {
    pub id: ShapeId,
    pub actor: ActorId,
    pub geometry: Geometry,
    pub local_pose: Transform,
    pub flags: ShapeFlags,
    pub filter_data: FilterData,
    pub contact_offset: f32,
    pub rest_offset: f32,
    /// Broadphase volume, present while the shape is in the scene.
    pub element: Option<ElementId>,
}

impl ShapeSim {
    pub fn builder(geometry: Geometry) -> ShapeBuilder {
        ShapeBuilder::new(geometry)
    }

    pub fn is_trigger(&self) -> bool {
        self.flags.contains(ShapeFlags::TRIGGER)
    }

    pub fn world_pose(&self, actor_pose: &Transform) -> Transform {
        actor_pose.combine(&self.local_pose)
    }

    pub fn world_bounds(&self, actor_pose: &Transform) -> Aabb {
        self.geometry.world_bounds(&self.world_pose(actor_pose))
    }
}

pub struct ShapeBuilder {
    geometry: Geometry,
    local_pose: Transform,
    flags: ShapeFlags,
    filter_data: FilterData,
    contact_offset: f32,
    rest_offset: f32,
}

impl ShapeBuilder {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            local_pose: Transform::default(),
            flags: ShapeFlags::default(),
            filter_data: FilterData::default(),
            contact_offset: DEFAULT_CONTACT_OFFSET,
            rest_offset: 0.0,
        }
    }

    pub fn local_pose(mut self, pose: Transform) -> Self {
        self.local_pose = pose;
        self
    }

    /// Trigger shapes do not take part in contact simulation.
    pub fn trigger(mut self, is_trigger: bool) -> Self {
        if is_trigger {
            self.flags.remove(ShapeFlags::SIMULATION);
            self.flags.insert(ShapeFlags::TRIGGER);
        } else {
            self.flags.remove(ShapeFlags::TRIGGER);
            self.flags.insert(ShapeFlags::SIMULATION);
        }
        self
    }

    pub fn filter_data(mut self, data: FilterData) -> Self {
        self.filter_data = data;
        self
    }

    pub fn contact_offset(mut self, offset: f32) -> Self {
        self.contact_offset = offset;
        self
    }

    pub fn rest_offset(mut self, offset: f32) -> Self {
        self.rest_offset = offset;
        self
    }

    pub fn build(self) -> ShapeSim {
        ShapeSim {
            id: ShapeId::from_index(u32::MAX),
            actor: ActorId::from_index(u32::MAX),
            geometry: self.geometry,
            local_pose: self.local_pose,
            flags: self.flags,
            filter_data: self.filter_data,
            contact_offset: self.contact_offset,
            rest_offset: self.rest_offset,
            element: None,
        }
    }
}
