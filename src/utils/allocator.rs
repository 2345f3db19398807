use std::hash::Hash;
use std::marker::PhantomData;

use log::warn;

use super::bitmap::Bitmap;

/// Generational key used to address slots of an [`Arena`].
pub trait ArenaKey: Copy + Eq + Hash {
    fn from_parts(index: u32, generation: u32) -> Self;
    fn index(self) -> usize;
    fn generation(self) -> u32;
}

/// Declares a strongly typed generational handle.
#[macro_export]
macro_rules! arena_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            serde::Serialize,
            serde::Deserialize,
        )]
        pub struct $name {
            index: u32,
            generation: u32,
        }

        impl $name {
            /// Builds a handle from a raw slot index with generation zero.
            pub fn from_index(index: u32) -> Self {
                Self { index, generation: 0 }
            }
        }

        impl $crate::utils::allocator::ArenaKey for $name {
            fn from_parts(index: u32, generation: u32) -> Self {
                Self { index, generation }
            }

            fn index(self) -> usize {
                self.index as usize
            }

            fn generation(self) -> u32 {
                self.generation
            }
        }
    };
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Generational arena that hands out stable typed keys while preventing use-after-free.
pub struct Arena<K, T> {
    slots: Vec<Slot<T>>,
    free_list: Vec<u32>,
    len: usize,
    _key: PhantomData<K>,
}

impl<K: ArenaKey, T> Default for Arena<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: ArenaKey, T> Arena<K, T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            len: 0,
            _key: PhantomData,
        }
    }

    pub fn insert(&mut self, value: T) -> K {
        self.insert_with(|_| value)
    }

    /// Inserts a value that needs to know its own key during construction.
    pub fn insert_with(&mut self, make: impl FnOnce(K) -> T) -> K {
        self.len += 1;
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            let key = K::from_parts(index, slot.generation);
            slot.value = Some(make(key));
            return key;
        }

        let index = self.slots.len() as u32;
        let key = K::from_parts(index, 0);
        self.slots.push(Slot {
            generation: 0,
            value: Some(make(key)),
        });
        key
    }

    pub fn get(&self, key: K) -> Option<&T> {
        self.slots
            .get(key.index())
            .filter(|slot| slot.generation == key.generation())
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut T> {
        self.slots
            .get_mut(key.index())
            .filter(|slot| slot.generation == key.generation())
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn contains(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: K) -> Option<T> {
        let slot = self.slots.get_mut(key.index())?;
        if slot.generation != key.generation() {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(key.index() as u32);
        self.len -= 1;
        Some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (K, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|value| (K::from_parts(index as u32, slot.generation), value))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (K, &mut T)> + '_ {
        self.slots.iter_mut().enumerate().filter_map(|(index, slot)| {
            let generation = slot.generation;
            slot.value
                .as_mut()
                .map(|value| (K::from_parts(index as u32, generation), value))
        })
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> + '_ {
        self.slots.iter_mut().filter_map(|slot| slot.value.as_mut())
    }

    pub fn ids(&self) -> impl Iterator<Item = K> + '_ {
        self.iter().map(|(key, _)| key)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Bounded free-list index allocator.
///
/// Indices are handed out densely from `0..capacity`; released indices are
/// recycled LIFO. Double release is detected and rejected.
pub struct IndexPool {
    capacity: u32,
    next_fresh: u32,
    free: Vec<u32>,
    in_use: Bitmap,
}

impl IndexPool {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            next_fresh: 0,
            free: Vec::new(),
            in_use: Bitmap::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn in_use(&self) -> u32 {
        self.next_fresh - self.free.len() as u32
    }

    pub fn is_allocated(&self, index: u32) -> bool {
        index < self.capacity && self.in_use.test(index)
    }

    pub fn allocate(&mut self) -> Option<u32> {
        let index = match self.free.pop() {
            Some(index) => index,
            None if self.next_fresh < self.capacity => {
                self.next_fresh += 1;
                self.next_fresh - 1
            }
            None => return None,
        };
        self.in_use.set(index);
        Some(index)
    }

    /// Allocates up to `count` indices into `out` and returns how many were produced.
    pub fn allocate_many(&mut self, count: u32, out: &mut Vec<u32>) -> u32 {
        let mut produced = 0;
        while produced < count {
            match self.allocate() {
                Some(index) => {
                    out.push(index);
                    produced += 1;
                }
                None => {
                    warn!(
                        "index pool exhausted: produced {produced} of {count} requested (capacity {})",
                        self.capacity
                    );
                    break;
                }
            }
        }
        produced
    }

    /// Returns `false` when the index was not allocated.
    pub fn release(&mut self, index: u32) -> bool {
        if !self.is_allocated(index) {
            return false;
        }
        self.in_use.reset(index);
        self.free.push(index);
        true
    }
}
