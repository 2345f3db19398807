use serde::{Deserialize, Serialize};

use crate::core::filter::PairFlags;
use crate::core::handles::{ActorId, ShapeId};

/// Overlap transition of a trigger pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerStatus {
    Found,
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriggerPairReport {
    pub trigger_shape: ShapeId,
    pub trigger_actor: ActorId,
    pub other_shape: ShapeId,
    pub other_actor: ActorId,
    pub status: TriggerStatus,
    /// A shape left the scene; only set on `Lost`.
    pub removed_shape: bool,
}

/// Touch or force-threshold events of one shape pair during a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContactPairReport {
    pub shapes: [ShapeId; 2],
    pub actors: [ActorId; 2],
    /// Subset of the `NOTIFY_*` pair flags that fired.
    pub events: PairFlags,
    pub removed_shape: bool,
}

impl ContactPairReport {
    pub fn has(&self, event: PairFlags) -> bool {
        self.events.contains(event)
    }
}

/// Reports accumulated during a step, drained by the application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportBuffer {
    pub triggers: Vec<TriggerPairReport>,
    pub contacts: Vec<ContactPairReport>,
}

impl ReportBuffer {
    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty() && self.contacts.is_empty()
    }

    pub fn take(&mut self) -> ReportBuffer {
        std::mem::take(self)
    }
}
