//! Deduplicated per-actor-pair and per-(particle system, shape) aggregates.

use std::collections::HashMap;

use log::trace;
use smallvec::SmallVec;

use super::interaction::FilterInfo;
use crate::core::handles::{ActorId, ActorPairId, InteractionId, ParticleSystemId, ShapeId};
use crate::utils::allocator::Arena;

/// Contact-report bookkeeping added to an actor pair on first request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActorPairReport {
    /// Shape pairs between the two actors currently touching.
    pub touch_count: u32,
    /// Contact reports emitted for this actor pair.
    pub reports_sent: u32,
}

/// State shared by every shape interaction between two actors.
///
/// Promotion to the report variant happens in place, so interactions keep
/// addressing the pair through the same [`ActorPairId`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorPair {
    actors: [ActorId; 2],
    ref_count: u32,
    report: Option<ActorPairReport>,
}

impl ActorPair {
    pub fn actors(&self) -> [ActorId; 2] {
        self.actors
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    pub fn is_report_pair(&self) -> bool {
        self.report.is_some()
    }

    pub fn report(&self) -> Option<&ActorPairReport> {
        self.report.as_ref()
    }

    pub fn report_mut(&mut self) -> Option<&mut ActorPairReport> {
        self.report.as_mut()
    }
}

fn ordered(a: ActorId, b: ActorId) -> (ActorId, ActorId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Reference-counted actor pairs keyed by the unordered actor ids.
#[derive(Default)]
pub struct ActorPairMap {
    pairs: Arena<ActorPairId, ActorPair>,
    by_actors: HashMap<(ActorId, ActorId), ActorPairId>,
}

impl ActorPairMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds or creates the pair and takes a reference on it.
    pub fn acquire(&mut self, a: ActorId, b: ActorId) -> ActorPairId {
        let key = ordered(a, b);
        if let Some(&id) = self.by_actors.get(&key) {
            if let Some(pair) = self.pairs.get_mut(id) {
                pair.ref_count += 1;
                return id;
            }
        }
        let id = self.pairs.insert(ActorPair {
            actors: [key.0, key.1],
            ref_count: 1,
            report: None,
        });
        self.by_actors.insert(key, id);
        id
    }

    /// Drops a reference; returns true when the pair was destroyed.
    pub fn release(&mut self, id: ActorPairId) -> bool {
        let Some(pair) = self.pairs.get_mut(id) else {
            return false;
        };
        pair.ref_count = pair.ref_count.saturating_sub(1);
        if pair.ref_count > 0 {
            return false;
        }
        let key = (pair.actors[0], pair.actors[1]);
        self.by_actors.remove(&key);
        self.pairs.remove(id);
        true
    }

    /// Adds contact-report bookkeeping. Idempotent.
    pub fn promote_to_report(&mut self, id: ActorPairId) {
        if let Some(pair) = self.pairs.get_mut(id) {
            if pair.report.is_none() {
                trace!("actor pair {:?} promoted to report pair", pair.actors);
                pair.report = Some(ActorPairReport::default());
            }
        }
    }

    pub fn get(&self, id: ActorPairId) -> Option<&ActorPair> {
        self.pairs.get(id)
    }

    pub fn get_mut(&mut self, id: ActorPairId) -> Option<&mut ActorPair> {
        self.pairs.get_mut(id)
    }

    pub fn find(&self, a: ActorId, b: ActorId) -> Option<ActorPairId> {
        self.by_actors.get(&ordered(a, b)).copied()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Number of pairs carrying contact-report bookkeeping.
    pub fn report_pair_count(&self) -> usize {
        self.pairs.iter().filter(|(_, pair)| pair.is_report_pair()).count()
    }
}

/// Key of the filter state shared by all packets of one system against one shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementPairKey {
    pub system: ParticleSystemId,
    pub shape: ShapeId,
}

/// Cached filter outcome for a particle system and a rigid shape, referenced
/// by every packet interaction between them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorElementPair {
    pub(crate) filter: FilterInfo,
    pub(crate) interactions: SmallVec<[InteractionId; 4]>,
}

impl ActorElementPair {
    pub fn filter(&self) -> &FilterInfo {
        &self.filter
    }

    pub fn ref_count(&self) -> u32 {
        self.interactions.len() as u32
    }

    pub fn interactions(&self) -> &[InteractionId] {
        &self.interactions
    }
}

#[derive(Default)]
pub struct ActorElementPairMap {
    pairs: HashMap<ElementPairKey, ActorElementPair>,
}

impl ActorElementPairMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ElementPairKey) -> Option<&ActorElementPair> {
        self.pairs.get(key)
    }

    pub fn get_mut(&mut self, key: &ElementPairKey) -> Option<&mut ActorElementPair> {
        self.pairs.get_mut(key)
    }

    pub fn insert(&mut self, key: ElementPairKey, filter: FilterInfo) -> &mut ActorElementPair {
        self.pairs.entry(key).or_insert_with(|| ActorElementPair {
            filter,
            interactions: SmallVec::new(),
        })
    }

    /// References `interaction` from the pair.
    pub fn add_ref(&mut self, key: &ElementPairKey, interaction: InteractionId) {
        if let Some(pair) = self.pairs.get_mut(key) {
            pair.interactions.push(interaction);
        }
    }

    /// Drops the reference held by `interaction`; returns the pair once the last reference is gone.
    pub fn release(&mut self, key: &ElementPairKey, interaction: InteractionId) -> Option<ActorElementPair> {
        let pair = self.pairs.get_mut(key)?;
        if let Some(slot) = pair.interactions.iter().position(|&i| i == interaction) {
            pair.interactions.swap_remove(slot);
        }
        if pair.interactions.is_empty() {
            self.pairs.remove(key)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
