use serde::{Deserialize, Serialize};

use super::filter::FilterObjectType;
use super::handles::{ActorId, ShapeId};
use super::types::Transform;

/// Wake counter assigned when an actor is woken.
pub const DEFAULT_WAKE_COUNTER: f32 = 0.4;

/// Simulation category of a rigid actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActorKind {
    Static,
    Dynamic,
    Kinematic,
}

/// Membership of an actor in an articulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticulationLink {
    pub articulation: u32,
    pub parent: Option<ActorId>,
}

/// Rigid actor as seen by the particle, cloth and near-phase layers.
#[derive(Debug, Clone)]
pub struct RigidActor {
    pub id: ActorId,
    pub kind: ActorKind,
    pub pose: Transform,
    pub is_awake: bool,
    pub wake_counter: f32,
    pub dominance_group: u8,
    /// Normal force above which threshold-force contact events fire.
    pub contact_report_threshold: f32,
    pub articulation: Option<ArticulationLink>,
    pub shapes: Vec<ShapeId>,
}

impl Default for RigidActor {
    fn default() -> Self {
        Self {
            id: ActorId::from_index(u32::MAX),
            kind: ActorKind::Dynamic,
            pose: Transform::default(),
            is_awake: true,
            wake_counter: DEFAULT_WAKE_COUNTER,
            dominance_group: 0,
            contact_report_threshold: f32::MAX,
            articulation: None,
            shapes: Vec::new(),
        }
    }
}

impl RigidActor {
    pub fn new(kind: ActorKind, pose: Transform) -> Self {
        Self {
            kind,
            pose,
            is_awake: kind != ActorKind::Static,
            ..Self::default()
        }
    }

    pub fn new_static(pose: Transform) -> Self {
        Self::new(ActorKind::Static, pose)
    }

    pub fn new_dynamic(pose: Transform) -> Self {
        Self::new(ActorKind::Dynamic, pose)
    }

    pub fn new_kinematic(pose: Transform) -> Self {
        Self::new(ActorKind::Kinematic, pose)
    }

    pub fn is_static(&self) -> bool {
        self.kind == ActorKind::Static
    }

    pub fn is_kinematic(&self) -> bool {
        self.kind == ActorKind::Kinematic
    }

    pub fn is_dynamic(&self) -> bool {
        self.kind != ActorKind::Static
    }

    pub fn filter_type(&self) -> FilterObjectType {
        if self.is_static() {
            FilterObjectType::RigidStatic
        } else {
            FilterObjectType::RigidDynamic
        }
    }

    /// Returns `true` when the actor was asleep and got woken.
    pub fn wake_up(&mut self) -> bool {
        if self.is_static() {
            return false;
        }
        let was_asleep = !self.is_awake;
        self.is_awake = true;
        self.wake_counter = self.wake_counter.max(DEFAULT_WAKE_COUNTER);
        was_asleep
    }

    pub fn put_to_sleep(&mut self) {
        if self.is_dynamic() {
            self.is_awake = false;
            self.wake_counter = 0.0;
        }
    }

    /// Counts down the wake counter; dynamic bodies fall asleep at zero.
    pub fn advance_wake_counter(&mut self, dt: f32) {
        if self.kind != ActorKind::Dynamic || !self.is_awake {
            return;
        }
        self.wake_counter = (self.wake_counter - dt).max(0.0);
        if self.wake_counter == 0.0 {
            self.is_awake = false;
        }
    }

    /// Whether the actor currently moves and needs per-step overlap testing.
    pub fn is_moving(&self) -> bool {
        match self.kind {
            ActorKind::Static => false,
            ActorKind::Kinematic => self.is_awake,
            ActorKind::Dynamic => self.is_awake,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statics_never_wake() {
        let mut actor = RigidActor::new_static(Transform::default());
        assert!(!actor.wake_up());
        assert!(!actor.is_awake);
    }

    #[test]
    fn dynamic_falls_asleep_after_wake_counter() {
        let mut actor = RigidActor::new_dynamic(Transform::default());
        actor.advance_wake_counter(1.0);
        assert!(!actor.is_awake);
        assert!(actor.wake_up());
    }
}
