use std::collections::HashMap;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::handles::ActorId;

/// Joint kinds relevant to pair filtering; the joint solver itself lives elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Joint {
    Fixed {
        body_a: ActorId,
        body_b: ActorId,
        offset_a: Vec3,
        offset_b: Vec3,
    },
    Revolute {
        body_a: ActorId,
        body_b: ActorId,
        pivot: Vec3,
        axis: Vec3,
    },
    Distance {
        body_a: ActorId,
        body_b: ActorId,
        distance: f32,
    },
}

impl Joint {
    pub fn bodies(&self) -> (ActorId, ActorId) {
        match self {
            Joint::Fixed { body_a, body_b, .. }
            | Joint::Revolute { body_a, body_b, .. }
            | Joint::Distance { body_a, body_b, .. } => (*body_a, *body_b),
        }
    }
}

#[derive(Debug, Clone)]
struct JointEntry {
    joint: Joint,
    collision_enabled: bool,
}

/// Tracks joints so that the filter can suppress pairs whose actors are
/// connected by a joint with collision disabled.
#[derive(Debug, Default)]
pub struct ConstraintRegistry {
    joints: Vec<Option<JointEntry>>,
    disabled_pairs: HashMap<(ActorId, ActorId), u32>,
}

fn ordered(a: ActorId, b: ActorId) -> (ActorId, ActorId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl ConstraintRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a joint and returns its index.
    pub fn add_joint(&mut self, joint: Joint, collision_enabled: bool) -> usize {
        if !collision_enabled {
            let (a, b) = joint.bodies();
            *self.disabled_pairs.entry(ordered(a, b)).or_insert(0) += 1;
        }
        self.joints.push(Some(JointEntry {
            joint,
            collision_enabled,
        }));
        self.joints.len() - 1
    }

    pub fn remove_joint(&mut self, index: usize) -> Option<Joint> {
        let entry = self.joints.get_mut(index)?.take()?;
        if !entry.collision_enabled {
            let (a, b) = entry.joint.bodies();
            let key = ordered(a, b);
            if let Some(count) = self.disabled_pairs.get_mut(&key) {
                *count -= 1;
                if *count == 0 {
                    self.disabled_pairs.remove(&key);
                }
            }
        }
        Some(entry.joint)
    }

    pub fn joint(&self, index: usize) -> Option<&Joint> {
        self.joints.get(index)?.as_ref().map(|entry| &entry.joint)
    }

    pub fn collision_disabled(&self, a: ActorId, b: ActorId) -> bool {
        self.disabled_pairs.contains_key(&ordered(a, b))
    }

    /// Number of live joints.
    pub fn joint_count(&self) -> usize {
        self.joints.iter().filter(|entry| entry.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_pairs_are_symmetric_and_counted() {
        let a = ActorId::from_index(1);
        let b = ActorId::from_index(2);
        let mut registry = ConstraintRegistry::new();
        let joint = Joint::Distance {
            body_a: a,
            body_b: b,
            distance: 1.0,
        };
        let first = registry.add_joint(joint.clone(), false);
        let second = registry.add_joint(joint, false);
        assert!(registry.collision_disabled(b, a));
        registry.remove_joint(first);
        assert!(registry.collision_disabled(a, b));
        registry.remove_joint(second);
        assert!(!registry.collision_disabled(a, b));
    }
}
