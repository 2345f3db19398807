//! Filtering vocabulary shared by the near-phase, the user filter shader and the
//! user filter callback.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Outcome of pair filtering.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct FilterFlags: u16 {
        /// Discard the pair; no interaction is ever constructed.
        const KILL = 1 << 0;
        /// Keep the pair for bookkeeping only (marker interaction).
        const SUPPRESS = 1 << 1;
        /// Invoke the user filter callback.
        const CALLBACK = 1 << 2;
        /// Callback plus pair-lost and status-change notifications.
        const NOTIFY = (1 << 3) | Self::CALLBACK.bits();
    }
}

impl FilterFlags {
    pub const DEFAULT: FilterFlags = FilterFlags::empty();

    pub fn wants_notify(self) -> bool {
        self.contains(FilterFlags::NOTIFY)
    }
}

bitflags! {
    /// Per-pair behavior requested by filtering.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct PairFlags: u32 {
        const SOLVE_CONTACT = 1 << 0;
        const MODIFY_CONTACTS = 1 << 1;
        const NOTIFY_TOUCH_FOUND = 1 << 2;
        const NOTIFY_TOUCH_PERSISTS = 1 << 3;
        const NOTIFY_TOUCH_LOST = 1 << 4;
        const NOTIFY_THRESHOLD_FORCE_FOUND = 1 << 5;
        const NOTIFY_THRESHOLD_FORCE_PERSISTS = 1 << 6;
        const NOTIFY_THRESHOLD_FORCE_LOST = 1 << 7;
        const NOTIFY_CONTACT_POINTS = 1 << 8;
        const DETECT_DISCRETE_CONTACT = 1 << 9;

        const CONTACT_DEFAULT = Self::SOLVE_CONTACT.bits() | Self::DETECT_DISCRETE_CONTACT.bits();
        const TRIGGER_DEFAULT = Self::NOTIFY_TOUCH_FOUND.bits()
            | Self::NOTIFY_TOUCH_LOST.bits()
            | Self::DETECT_DISCRETE_CONTACT.bits();
        const THRESHOLD_FORCE = Self::NOTIFY_THRESHOLD_FORCE_FOUND.bits()
            | Self::NOTIFY_THRESHOLD_FORCE_PERSISTS.bits()
            | Self::NOTIFY_THRESHOLD_FORCE_LOST.bits();
        /// Flags that require contact-report bookkeeping on the actor pair.
        const CONTACT_REPORT = Self::NOTIFY_TOUCH_FOUND.bits()
            | Self::NOTIFY_TOUCH_PERSISTS.bits()
            | Self::NOTIFY_TOUCH_LOST.bits()
            | Self::THRESHOLD_FORCE.bits()
            | Self::NOTIFY_CONTACT_POINTS.bits();
    }
}

/// Kind of simulation object seen by the filter shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterObjectType {
    RigidStatic,
    RigidDynamic,
    ParticleSystem,
    ParticleFluid,
    Cloth,
}

/// Type and state bits describing one side of a filtered pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterObjectAttributes {
    pub object_type: FilterObjectType,
    pub kinematic: bool,
    pub trigger: bool,
}

impl FilterObjectAttributes {
    pub fn new(object_type: FilterObjectType) -> Self {
        Self {
            object_type,
            kinematic: false,
            trigger: false,
        }
    }
}

/// Four user words attached to every filterable object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FilterData {
    pub word0: u32,
    pub word1: u32,
    pub word2: u32,
    pub word3: u32,
}

impl FilterData {
    pub fn new(word0: u32, word1: u32, word2: u32, word3: u32) -> Self {
        Self {
            word0,
            word1,
            word2,
            word3,
        }
    }

    /// Layer/mask convention used by [`default_filter_shader`]: `word0` is the
    /// layer, `word1` the mask of layers it collides with.
    pub fn layer_mask(layer: u32, mask: u32) -> Self {
        Self::new(layer, mask, 0, 0)
    }
}

/// User filter shader: pure function of both sides' attributes and data.
pub trait FilterShader: Send + Sync {
    fn filter(
        &self,
        attributes0: FilterObjectAttributes,
        data0: &FilterData,
        attributes1: FilterObjectAttributes,
        data1: &FilterData,
        pair_flags: &mut PairFlags,
        constant_block: &[u8],
    ) -> FilterFlags;
}

impl<F> FilterShader for F
where
    F: Fn(FilterObjectAttributes, &FilterData, FilterObjectAttributes, &FilterData, &mut PairFlags, &[u8]) -> FilterFlags
        + Send
        + Sync,
{
    fn filter(
        &self,
        attributes0: FilterObjectAttributes,
        data0: &FilterData,
        attributes1: FilterObjectAttributes,
        data1: &FilterData,
        pair_flags: &mut PairFlags,
        constant_block: &[u8],
    ) -> FilterFlags {
        self(attributes0, data0, attributes1, data1, pair_flags, constant_block)
    }
}

/// Default shader: triggers get trigger flags, other pairs collide when each
/// side's layer is in the other's mask; zeroed filter data always collides.
pub fn default_filter_shader(
    attributes0: FilterObjectAttributes,
    data0: &FilterData,
    attributes1: FilterObjectAttributes,
    data1: &FilterData,
    pair_flags: &mut PairFlags,
    _constant_block: &[u8],
) -> FilterFlags {
    if attributes0.trigger || attributes1.trigger {
        *pair_flags = PairFlags::TRIGGER_DEFAULT;
        return FilterFlags::DEFAULT;
    }

    let unfiltered = |d: &FilterData| d.word0 == 0 && d.word1 == 0;
    if !unfiltered(data0)
        && !unfiltered(data1)
        && ((data0.word0 & data1.word1) == 0 || (data1.word0 & data0.word1) == 0)
    {
        return FilterFlags::SUPPRESS;
    }

    *pair_flags = PairFlags::CONTACT_DEFAULT;
    FilterFlags::DEFAULT
}

/// Identifies the two objects handed to the filter callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPairObject {
    Shape(super::handles::ShapeId),
    ParticleSystem(super::handles::ParticleSystemId),
    Cloth(super::handles::ClothId),
}

/// A pending status change requested by the filter callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterStatusChange {
    pub pair_id: u32,
    pub pair_flags: PairFlags,
    pub filter_flags: FilterFlags,
}

/// User filter callback invoked for pairs whose shader result requested it.
pub trait SimulationFilterCallback: Send {
    /// Called for a new pair; `pair_id` is valid only when the shader asked for notification.
    #[allow(clippy::too_many_arguments)]
    fn pair_found(
        &mut self,
        pair_id: Option<u32>,
        attributes0: FilterObjectAttributes,
        data0: &FilterData,
        object0: FilterPairObject,
        attributes1: FilterObjectAttributes,
        data1: &FilterData,
        object1: FilterPairObject,
        pair_flags: &mut PairFlags,
    ) -> FilterFlags;

    /// Called once when a notify pair goes away. `object_removed` is true when
    /// one of the objects was removed from the scene.
    fn pair_lost(
        &mut self,
        pair_id: u32,
        attributes0: FilterObjectAttributes,
        data0: &FilterData,
        attributes1: FilterObjectAttributes,
        data1: &FilterData,
        object_removed: bool,
    );

    /// Polled once per step until it returns `None`.
    fn status_change(&mut self) -> Option<FilterStatusChange>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dynamic() -> FilterObjectAttributes {
        FilterObjectAttributes::new(FilterObjectType::RigidDynamic)
    }

    #[test]
    fn notify_implies_callback() {
        assert!(FilterFlags::NOTIFY.contains(FilterFlags::CALLBACK));
        assert!(!FilterFlags::CALLBACK.wants_notify());
    }

    #[test]
    fn default_shader_masks_layers() {
        let mut flags = PairFlags::empty();
        let a = FilterData::layer_mask(1, 2);
        let b = FilterData::layer_mask(2, 1);
        assert_eq!(
            default_filter_shader(dynamic(), &a, dynamic(), &b, &mut flags, &[]),
            FilterFlags::DEFAULT
        );
        assert_eq!(flags, PairFlags::CONTACT_DEFAULT);

        let c = FilterData::layer_mask(4, 4);
        assert_eq!(
            default_filter_shader(dynamic(), &a, dynamic(), &c, &mut flags, &[]),
            FilterFlags::SUPPRESS
        );
    }

    #[test]
    fn default_shader_reports_triggers() {
        let mut flags = PairFlags::empty();
        let mut trigger = dynamic();
        trigger.trigger = true;
        default_filter_shader(trigger, &FilterData::default(), dynamic(), &FilterData::default(), &mut flags, &[]);
        assert_eq!(flags, PairFlags::TRIGGER_DEFAULT);
    }
}
