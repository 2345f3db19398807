use bitflags::bitflags;
use glam::Vec3;

use super::actor_pair::ElementPairKey;
use crate::core::filter::{FilterFlags, PairFlags};
use crate::core::handles::{ActorId, ActorPairId, ElementId, InteractionId, ParticleSystemId, ShapeId};

/// Interaction type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractionType {
    /// Rigid-rigid contact-generating pair.
    Overlap,
    /// One side is a trigger shape.
    Trigger,
    /// Suppressed pair kept only for bookkeeping.
    Marker,
    /// Particle packet against a rigid shape.
    ParticleBody,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InteractionFlags: u16 {
        /// Holds a filter-pair index.
        const IS_FILTER_PAIR = 1 << 0;
        const HAS_TOUCH = 1 << 1;
        const IN_DIRTY_LIST = 1 << 2;
        const IN_PERSISTENT_EVENT_LIST = 1 << 3;
        /// Queued for the persistent list at the next frame boundary.
        const IN_PERSISTENT_EVENT_LIST_NEXT_FRAME = 1 << 4;
        const IN_FORCE_THRESHOLD_EVENT_LIST = 1 << 5;
        /// Trigger pair is tested every step.
        const IS_ACTIVE = 1 << 6;
        /// Trigger pair must be tested once even if neither actor moves.
        const FORCE_TRIGGER_TEST = 1 << 7;
    }
}

bitflags! {
    /// Reasons an interaction needs revisiting at the next dirty pass.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DirtyFlags: u16 {
        const FILTER_STATE = 1 << 0;
        const BODY_KINEMATIC = 1 << 1;
        const DOMINANCE = 1 << 2;
        const REST_OFFSET = 1 << 3;
        const VISUALIZATION = 1 << 4;
        const SHAPE_FLAGS = 1 << 5;

        /// Reasons that require the filter to run again.
        const NEEDS_REFILTER = Self::FILTER_STATE.bits() | Self::BODY_KINEMATIC.bits() | Self::SHAPE_FLAGS.bits();
    }
}

/// Rigid-rigid pair state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapeInteraction {
    pub shapes: [ShapeId; 2],
    pub actors: [ActorId; 2],
    pub actor_pair: ActorPairId,
    /// Last separating direction of the touch test.
    pub hint: Vec3,
    /// Whether the last reported normal force exceeded the pair's threshold.
    pub force_above_threshold: bool,
    /// Dominance of each side, refreshed by the dirty pass.
    pub dominance: [u8; 2],
}

/// Trigger pair state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerInteraction {
    pub trigger_shape: ShapeId,
    pub other_shape: ShapeId,
    pub last_overlap: bool,
    pub hint: Vec3,
}

/// Particle packet against rigid shape, sharing filter state through an element pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParticleBodyInteraction {
    pub system: ParticleSystemId,
    pub shape: ShapeId,
    pub packet: ElementId,
}

/// Type-specific interaction payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InteractionPayload {
    Overlap(ShapeInteraction),
    Trigger(TriggerInteraction),
    /// `element_pair` is set for suppressed particle pairs.
    Marker { element_pair: Option<ElementPairKey> },
    ParticleBody(ParticleBodyInteraction),
}

/// Filter outcome resolved for one pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilterInfo {
    pub filter_flags: FilterFlags,
    pub pair_flags: PairFlags,
    pub filter_pair_index: Option<u32>,
}

impl FilterInfo {
    pub fn new(filter_flags: FilterFlags) -> Self {
        Self {
            filter_flags,
            ..Self::default()
        }
    }

    pub fn is_killed(&self) -> bool {
        self.filter_flags.contains(FilterFlags::KILL)
    }

    pub fn is_suppressed(&self) -> bool {
        self.filter_flags.contains(FilterFlags::SUPPRESS)
    }
}

/// Typed pairwise relationship between two broadphase elements.
#[derive(Debug, Clone, PartialEq)]
pub struct Interaction {
    pub(crate) id: InteractionId,
    pub(crate) elements: [ElementId; 2],
    pub(crate) flags: InteractionFlags,
    pub(crate) dirty: DirtyFlags,
    pub(crate) pair_flags: PairFlags,
    pub(crate) filter_flags: FilterFlags,
    pub(crate) filter_pair_index: Option<u32>,
    /// Filter result set by a status change, consumed by the next refilter.
    pub(crate) pending_filter: Option<FilterInfo>,
    pub(crate) payload: InteractionPayload,
}

impl Interaction {
    pub(crate) fn new(id: InteractionId, elements: [ElementId; 2], info: &FilterInfo, payload: InteractionPayload) -> Self {
        let mut flags = InteractionFlags::empty();
        flags.set(InteractionFlags::IS_FILTER_PAIR, info.filter_pair_index.is_some());
        Self {
            id,
            elements,
            flags,
            dirty: DirtyFlags::empty(),
            pair_flags: info.pair_flags,
            filter_flags: info.filter_flags,
            filter_pair_index: info.filter_pair_index,
            pending_filter: None,
            payload,
        }
    }

    pub fn id(&self) -> InteractionId {
        self.id
    }

    pub fn elements(&self) -> [ElementId; 2] {
        self.elements
    }

    pub fn other_element(&self, element: ElementId) -> ElementId {
        if self.elements[0] == element {
            self.elements[1]
        } else {
            self.elements[0]
        }
    }

    pub fn connects(&self, a: ElementId, b: ElementId) -> bool {
        (self.elements[0] == a && self.elements[1] == b) || (self.elements[0] == b && self.elements[1] == a)
    }

    pub fn interaction_type(&self) -> InteractionType {
        match self.payload {
            InteractionPayload::Overlap(_) => InteractionType::Overlap,
            InteractionPayload::Trigger(_) => InteractionType::Trigger,
            InteractionPayload::Marker { .. } => InteractionType::Marker,
            InteractionPayload::ParticleBody(_) => InteractionType::ParticleBody,
        }
    }

    pub fn flags(&self) -> InteractionFlags {
        self.flags
    }

    pub fn dirty_flags(&self) -> DirtyFlags {
        self.dirty
    }

    pub fn pair_flags(&self) -> PairFlags {
        self.pair_flags
    }

    pub fn filter_flags(&self) -> FilterFlags {
        self.filter_flags
    }

    pub fn filter_pair_index(&self) -> Option<u32> {
        self.filter_pair_index
    }

    pub fn has_touch(&self) -> bool {
        self.flags.contains(InteractionFlags::HAS_TOUCH)
    }

    pub fn payload(&self) -> &InteractionPayload {
        &self.payload
    }

    pub fn shape_interaction(&self) -> Option<&ShapeInteraction> {
        match &self.payload {
            InteractionPayload::Overlap(shape) => Some(shape),
            _ => None,
        }
    }

    pub fn trigger(&self) -> Option<&TriggerInteraction> {
        match &self.payload {
            InteractionPayload::Trigger(trigger) => Some(trigger),
            _ => None,
        }
    }

    /// Element pair backing a particle interaction, if any.
    pub fn element_pair(&self) -> Option<ElementPairKey> {
        match self.payload {
            InteractionPayload::ParticleBody(p) => Some(ElementPairKey {
                system: p.system,
                shape: p.shape,
            }),
            InteractionPayload::Marker { element_pair } => element_pair,
            _ => None,
        }
    }

    /// Whether touch persistence events are requested.
    pub(crate) fn wants_persistent_events(&self) -> bool {
        self.pair_flags.contains(PairFlags::NOTIFY_TOUCH_PERSISTS)
    }

    pub(crate) fn wants_force_events(&self) -> bool {
        self.pair_flags.intersects(PairFlags::THRESHOLD_FORCE)
    }
}

/// Interaction type a filter outcome maps to for a rigid pair.
pub(crate) fn rigid_type_for(info: &FilterInfo, has_trigger: bool) -> InteractionType {
    if info.is_suppressed() {
        InteractionType::Marker
    } else if has_trigger {
        InteractionType::Trigger
    } else {
        InteractionType::Overlap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppressed_pairs_become_markers() {
        let info = FilterInfo::new(FilterFlags::SUPPRESS);
        assert_eq!(rigid_type_for(&info, true), InteractionType::Marker);
        assert_eq!(rigid_type_for(&FilterInfo::default(), true), InteractionType::Trigger);
        assert_eq!(rigid_type_for(&FilterInfo::default(), false), InteractionType::Overlap);
    }

    #[test]
    fn filter_pair_flag_follows_index() {
        let info = FilterInfo {
            filter_pair_index: Some(3),
            ..FilterInfo::default()
        };
        let interaction = Interaction::new(
            InteractionId::from_index(0),
            [ElementId::from_index(0), ElementId::from_index(1)],
            &info,
            InteractionPayload::Marker { element_pair: None },
        );
        assert!(interaction.flags().contains(InteractionFlags::IS_FILTER_PAIR));
        assert_eq!(interaction.other_element(ElementId::from_index(1)), ElementId::from_index(0));
    }
}
