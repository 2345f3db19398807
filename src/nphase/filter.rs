//! Pair filtering: hard pre-filter rules, the user shader and callback, and
//! the filter-pair index table that lets the callback address pairs later.

use std::collections::HashMap;

use log::{error, warn};

use super::actor_pair::ElementPairKey;
use super::interaction::FilterInfo;
use crate::config::SceneFlags;
use crate::core::actor::RigidActor;
use crate::core::filter::{
    default_filter_shader, FilterData, FilterFlags, FilterObjectAttributes, FilterPairObject, FilterShader,
    FilterStatusChange, PairFlags, SimulationFilterCallback,
};
use crate::core::handles::InteractionId;
use crate::core::shape::ShapeSim;
use crate::utils::allocator::IndexPool;
use crate::utils::logging::warn_capacity_exceeded;
use crate::world::World;

/// Owner of a filter-pair index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterPairRef {
    Interaction(InteractionId),
    ElementPair(ElementPairKey),
}

/// Free-list backed filter-pair indices and what each one refers to.
pub struct FilterPairTable {
    pool: IndexPool,
    refs: HashMap<u32, FilterPairRef>,
}

impl FilterPairTable {
    pub fn new(capacity: u32) -> Self {
        Self {
            pool: IndexPool::new(capacity),
            refs: HashMap::new(),
        }
    }

    pub fn allocate(&mut self) -> Option<u32> {
        let index = self.pool.allocate();
        if index.is_none() {
            warn_capacity_exceeded("filter pair", self.pool.capacity());
        }
        index
    }

    pub fn bind(&mut self, index: u32, owner: FilterPairRef) {
        self.refs.insert(index, owner);
    }

    pub fn lookup(&self, index: u32) -> Option<FilterPairRef> {
        self.refs.get(&index).copied()
    }

    /// Returns the index to the pool. A second release is reported and ignored.
    pub fn release(&mut self, index: u32) -> bool {
        self.refs.remove(&index);
        if !self.pool.release(index) {
            error!("filter pair index {index} released twice");
            return false;
        }
        true
    }

    pub fn in_use(&self) -> u32 {
        self.pool.in_use()
    }

    pub fn is_allocated(&self, index: u32) -> bool {
        self.pool.is_allocated(index)
    }
}

/// One side of a pair handed to the shader and callback.
#[derive(Debug, Clone, Copy)]
pub struct PairSide<'a> {
    pub attributes: FilterObjectAttributes,
    pub data: &'a FilterData,
    pub object: FilterPairObject,
}

/// Result of [`PairFilter::run_filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    Resolved(FilterInfo),
    /// The shader asked for the callback but callbacks were deferred; holds the raw shader result.
    Deferred(FilterInfo),
}

/// KILL and SUPPRESS together are invalid; SUPPRESS wins.
pub fn normalize_filter_flags(flags: FilterFlags) -> FilterFlags {
    if flags.contains(FilterFlags::KILL | FilterFlags::SUPPRESS) {
        warn!("filter returned KILL and SUPPRESS together; treating the pair as suppressed");
        return flags - FilterFlags::KILL;
    }
    flags
}

/// Filter shader, optional callback and scene switches.
pub struct PairFilter {
    shader: Box<dyn FilterShader>,
    callback: Option<Box<dyn SimulationFilterCallback>>,
    constant_block: Vec<u8>,
    scene_flags: SceneFlags,
    pub(crate) pairs: FilterPairTable,
    shader_calls: u64,
}

impl PairFilter {
    pub fn new(scene_flags: SceneFlags, pair_capacity: u32, constant_block: Vec<u8>) -> Self {
        Self {
            shader: Box::new(default_filter_shader),
            callback: None,
            constant_block,
            scene_flags,
            pairs: FilterPairTable::new(pair_capacity),
            shader_calls: 0,
        }
    }

    pub fn set_shader(&mut self, shader: Box<dyn FilterShader>) {
        self.shader = shader;
    }

    pub fn set_callback(&mut self, callback: Option<Box<dyn SimulationFilterCallback>>) {
        self.callback = callback;
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    pub fn scene_flags(&self) -> SceneFlags {
        self.scene_flags
    }

    pub fn set_scene_flags(&mut self, flags: SceneFlags) {
        self.scene_flags = flags;
    }

    /// Number of times the user shader ran.
    pub fn shader_calls(&self) -> u64 {
        self.shader_calls
    }

    /// Runs the shader and, when requested and allowed, the callback.
    ///
    /// `existing_index` is the index a refiltered pair already holds; it is
    /// reused when the pair still asks for notification. Indices allocated
    /// here are released again if the final flags drop notification.
    pub fn run_filter(
        &mut self,
        side0: &PairSide<'_>,
        side1: &PairSide<'_>,
        do_callbacks: bool,
        existing_index: Option<u32>,
    ) -> FilterOutcome {
        let mut pair_flags = PairFlags::empty();
        self.shader_calls += 1;
        let mut flags = normalize_filter_flags(self.shader.filter(
            side0.attributes,
            side0.data,
            side1.attributes,
            side1.data,
            &mut pair_flags,
            &self.constant_block,
        ));

        if !flags.contains(FilterFlags::CALLBACK) {
            return FilterOutcome::Resolved(FilterInfo {
                filter_flags: flags,
                pair_flags,
                filter_pair_index: None,
            });
        }
        if self.callback.is_none() {
            flags.remove(FilterFlags::NOTIFY);
            return FilterOutcome::Resolved(FilterInfo {
                filter_flags: flags,
                pair_flags,
                filter_pair_index: None,
            });
        }
        if !do_callbacks {
            return FilterOutcome::Deferred(FilterInfo {
                filter_flags: flags,
                pair_flags,
                filter_pair_index: None,
            });
        }

        let mut fresh = None;
        let index = if flags.wants_notify() {
            existing_index.or_else(|| {
                fresh = self.pairs.allocate();
                fresh
            })
        } else {
            None
        };

        if let Some(callback) = self.callback.as_mut() {
            flags = normalize_filter_flags(callback.pair_found(
                index,
                side0.attributes,
                side0.data,
                side0.object,
                side1.attributes,
                side1.data,
                side1.object,
                &mut pair_flags,
            ));
        }

        let keep = index.is_some() && flags.wants_notify() && !flags.contains(FilterFlags::KILL);
        if !keep {
            if let Some(fresh) = fresh {
                self.pairs.release(fresh);
            }
        }
        FilterOutcome::Resolved(FilterInfo {
            filter_flags: flags,
            pair_flags,
            filter_pair_index: if keep { index } else { None },
        })
    }

    /// Tells the callback a notify pair went away.
    pub fn notify_pair_lost(&mut self, index: u32, side0: &PairSide<'_>, side1: &PairSide<'_>, object_removed: bool) {
        if let Some(callback) = self.callback.as_mut() {
            callback.pair_lost(
                index,
                side0.attributes,
                side0.data,
                side1.attributes,
                side1.data,
                object_removed,
            );
        }
    }

    /// Next pending status change from the callback.
    pub fn poll_status_change(&mut self) -> Option<FilterStatusChange> {
        self.callback.as_mut()?.status_change()
    }
}

/// Filter attributes of a rigid shape.
pub fn shape_attributes(shape: &ShapeSim, actor: &RigidActor) -> FilterObjectAttributes {
    FilterObjectAttributes {
        object_type: actor.filter_type(),
        kinematic: actor.is_kinematic(),
        trigger: shape.is_trigger(),
    }
}

/// Hard rules applied to rigid pairs before the user shader runs.
///
/// Returns `Some` when the pair's fate is decided without the shader.
pub fn prefilter_rigid_pair(
    world: &World,
    scene_flags: SceneFlags,
    shape0: &ShapeSim,
    actor0: &RigidActor,
    shape1: &ShapeSim,
    actor1: &RigidActor,
) -> Option<FilterFlags> {
    if shape0.is_trigger() && shape1.is_trigger() {
        return Some(FilterFlags::KILL);
    }
    if actor0.id == actor1.id {
        return Some(FilterFlags::KILL);
    }
    if actor0.is_static() && actor1.is_static() && !shape0.is_trigger() && !shape1.is_trigger() {
        return Some(FilterFlags::KILL);
    }
    // applies to trigger pairs as well
    let kinematic_static = (actor0.is_kinematic() && actor1.is_static()) || (actor1.is_kinematic() && actor0.is_static());
    if kinematic_static && !scene_flags.contains(SceneFlags::ENABLE_KINEMATIC_STATIC_PAIRS) {
        return Some(FilterFlags::SUPPRESS);
    }
    let kinematic_pair = actor0.is_kinematic() && actor1.is_kinematic();
    if kinematic_pair && !scene_flags.contains(SceneFlags::ENABLE_KINEMATIC_PAIRS) {
        return Some(FilterFlags::SUPPRESS);
    }
    if world.collision_disabled(actor0.id, actor1.id) {
        return Some(FilterFlags::SUPPRESS);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::filter::FilterObjectType;
    use crate::core::handles::ShapeId;

    struct NotifyAll {
        lost: Vec<u32>,
    }

    impl SimulationFilterCallback for NotifyAll {
        fn pair_found(
            &mut self,
            _pair_id: Option<u32>,
            _attributes0: FilterObjectAttributes,
            _data0: &FilterData,
            _object0: FilterPairObject,
            _attributes1: FilterObjectAttributes,
            _data1: &FilterData,
            _object1: FilterPairObject,
            pair_flags: &mut PairFlags,
        ) -> FilterFlags {
            *pair_flags = PairFlags::CONTACT_DEFAULT;
            FilterFlags::NOTIFY
        }

        fn pair_lost(
            &mut self,
            pair_id: u32,
            _attributes0: FilterObjectAttributes,
            _data0: &FilterData,
            _attributes1: FilterObjectAttributes,
            _data1: &FilterData,
            _object_removed: bool,
        ) {
            self.lost.push(pair_id);
        }

        fn status_change(&mut self) -> Option<FilterStatusChange> {
            None
        }
    }

    fn side(data: &FilterData) -> PairSide<'_> {
        PairSide {
            attributes: FilterObjectAttributes::new(FilterObjectType::RigidDynamic),
            data,
            object: FilterPairObject::Shape(ShapeId::from_index(0)),
        }
    }

    fn notify_shader(
        _: FilterObjectAttributes,
        _: &FilterData,
        _: FilterObjectAttributes,
        _: &FilterData,
        _: &mut PairFlags,
        _: &[u8],
    ) -> FilterFlags {
        FilterFlags::NOTIFY
    }

    #[test]
    fn kill_and_suppress_normalize_to_suppress() {
        assert_eq!(
            normalize_filter_flags(FilterFlags::KILL | FilterFlags::SUPPRESS),
            FilterFlags::SUPPRESS
        );
    }

    #[test]
    fn notify_pairs_receive_an_index() {
        let mut filter = PairFilter::new(SceneFlags::empty(), 4, Vec::new());
        filter.set_shader(Box::new(notify_shader));
        filter.set_callback(Some(Box::new(NotifyAll { lost: Vec::new() })));
        let data = FilterData::default();

        let outcome = filter.run_filter(&side(&data), &side(&data), true, None);
        let FilterOutcome::Resolved(info) = outcome else {
            panic!("callbacks were allowed");
        };
        assert_eq!(info.filter_pair_index, Some(0));
        assert_eq!(info.pair_flags, PairFlags::CONTACT_DEFAULT);
        assert!(filter.pairs.is_allocated(0));

        let deferred = filter.run_filter(&side(&data), &side(&data), false, None);
        assert!(matches!(deferred, FilterOutcome::Deferred(_)));
        assert_eq!(filter.pairs.in_use(), 1);
    }

    #[test]
    fn notify_without_callback_is_dropped() {
        let mut filter = PairFilter::new(SceneFlags::empty(), 4, Vec::new());
        filter.set_shader(Box::new(notify_shader));
        let data = FilterData::default();
        let FilterOutcome::Resolved(info) = filter.run_filter(&side(&data), &side(&data), true, None) else {
            panic!("no callback registered");
        };
        assert_eq!(info.filter_pair_index, None);
        assert!(!info.filter_flags.intersects(FilterFlags::NOTIFY));
    }

    #[test]
    fn double_release_is_rejected() {
        let mut table = FilterPairTable::new(2);
        let index = table.allocate().expect("capacity");
        assert!(table.release(index));
        assert!(!table.release(index));
    }
}
