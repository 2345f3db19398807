use std::collections::{HashMap, HashSet};

use glam::Vec3;
use log::debug;

use crate::config::DEFAULT_BROADPHASE_CELL_SIZE;
use crate::core::handles::ElementId;
use crate::core::mesh::Aabb;
use crate::utils::profiling::StageTimer;

/// Broadphase filter group. Volumes sharing a group never pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BroadPhaseGroup(pub u32);

impl BroadPhaseGroup {
    /// Every static shape.
    pub const STATIC: BroadPhaseGroup = BroadPhaseGroup(0);
    /// Every particle packet, so packets never overlap each other.
    pub const PARTICLES: BroadPhaseGroup = BroadPhaseGroup(1);
    const FIRST_UNIQUE: u32 = 2;

    /// Group reserved for a single dynamic actor or cloth.
    pub fn unique(index: u32) -> Self {
        BroadPhaseGroup(Self::FIRST_UNIQUE + index)
    }
}

/// Unordered element pair, stored with the smaller id first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementPair {
    pub a: ElementId,
    pub b: ElementId,
}

impl ElementPair {
    pub fn new(a: ElementId, b: ElementId) -> Self {
        if a <= b {
            Self { a, b }
        } else {
            Self { a: b, b: a }
        }
    }

    pub fn contains(&self, element: ElementId) -> bool {
        self.a == element || self.b == element
    }

    pub fn other(&self, element: ElementId) -> ElementId {
        if self.a == element {
            self.b
        } else {
            self.a
        }
    }
}

/// Overlap changes produced by one [`BroadPhase::update`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlapUpdate {
    pub created: Vec<ElementPair>,
    pub removed: Vec<ElementPair>,
}

impl OverlapUpdate {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct Volume {
    bounds: Aabb,
    group: BroadPhaseGroup,
    is_trigger: bool,
}

type Cell = (i32, i32, i32);

/// Uniform grid spatial partitioning used by the broad-phase.
pub struct SpatialGrid {
    cell_size: f32,
    grid: HashMap<Cell, Vec<ElementId>>,
}

impl SpatialGrid {
    /// Volumes spanning more cells than this per axis bypass the grid.
    const MAX_CELLS_PER_AXIS: f32 = 64.0;

    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            grid: HashMap::new(),
        }
    }

    fn world_to_grid(&self, pos: Vec3) -> Cell {
        (
            (pos.x / self.cell_size).floor() as i32,
            (pos.y / self.cell_size).floor() as i32,
            (pos.z / self.cell_size).floor() as i32,
        )
    }

    /// Cell range covered by `bounds`, or `None` for volumes too large to bin.
    fn cell_range(&self, bounds: &Aabb) -> Option<(Cell, Cell)> {
        let span = (bounds.max - bounds.min) / self.cell_size;
        if !bounds.min.is_finite() || !bounds.max.is_finite() || span.max_element() > Self::MAX_CELLS_PER_AXIS {
            return None;
        }
        Some((self.world_to_grid(bounds.min), self.world_to_grid(bounds.max)))
    }

    /// Bins `element`; returns false when it is too large for the grid.
    pub fn insert(&mut self, element: ElementId, bounds: &Aabb) -> bool {
        let Some((min_cell, max_cell)) = self.cell_range(bounds) else {
            return false;
        };
        for x in min_cell.0..=max_cell.0 {
            for y in min_cell.1..=max_cell.1 {
                for z in min_cell.2..=max_cell.2 {
                    self.grid.entry((x, y, z)).or_default().push(element);
                }
            }
        }
        true
    }

    pub fn clear(&mut self) {
        self.grid.clear();
    }

    fn cells(&self) -> impl Iterator<Item = &Vec<ElementId>> + '_ {
        self.grid.values()
    }
}

/// Incremental AABB broadphase.
///
/// Volumes are registered with a contact distance that inflates their bounds.
/// [`update`](Self::update) diffs the current overlap set against the previous
/// one; pairs dropped by [`remove_bounds`](Self::remove_bounds) are returned
/// immediately and never reported as removed later.
pub struct BroadPhase {
    grid: SpatialGrid,
    volumes: HashMap<ElementId, Volume>,
    pairs: HashSet<ElementPair>,
}

impl Default for BroadPhase {
    fn default() -> Self {
        Self::new(DEFAULT_BROADPHASE_CELL_SIZE)
    }
}

impl BroadPhase {
    pub fn new(cell_size: f32) -> Self {
        Self {
            grid: SpatialGrid::new(cell_size),
            volumes: HashMap::new(),
            pairs: HashSet::new(),
        }
    }

    pub fn add_bounds(
        &mut self,
        element: ElementId,
        bounds: Aabb,
        contact_distance: f32,
        group: BroadPhaseGroup,
        is_trigger: bool,
    ) {
        self.volumes.insert(
            element,
            Volume {
                bounds: bounds.inflated(contact_distance),
                group,
                is_trigger,
            },
        );
    }

    /// Moves a registered volume. Unknown elements are ignored.
    pub fn update_bounds(&mut self, element: ElementId, bounds: Aabb, contact_distance: f32) {
        if let Some(volume) = self.volumes.get_mut(&element) {
            volume.bounds = bounds.inflated(contact_distance);
        }
    }

    /// Unregisters a volume and returns the overlaps it took with it.
    pub fn remove_bounds(&mut self, element: ElementId) -> Vec<ElementPair> {
        if self.volumes.remove(&element).is_none() {
            return Vec::new();
        }
        let mut dropped: Vec<ElementPair> = self
            .pairs
            .iter()
            .filter(|pair| pair.contains(element))
            .copied()
            .collect();
        for pair in &dropped {
            self.pairs.remove(pair);
        }
        dropped.sort();
        dropped
    }

    pub fn contains(&self, element: ElementId) -> bool {
        self.volumes.contains_key(&element)
    }

    pub fn bounds(&self, element: ElementId) -> Option<Aabb> {
        self.volumes.get(&element).map(|v| v.bounds)
    }

    pub fn is_trigger(&self, element: ElementId) -> bool {
        self.volumes.get(&element).is_some_and(|v| v.is_trigger)
    }

    pub fn volume_count(&self) -> usize {
        self.volumes.len()
    }

    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_overlapping(&self, a: ElementId, b: ElementId) -> bool {
        self.pairs.contains(&ElementPair::new(a, b))
    }

    fn try_pair(&self, a: ElementId, b: ElementId, out: &mut HashSet<ElementPair>) {
        if a == b {
            return;
        }
        let (Some(va), Some(vb)) = (self.volumes.get(&a), self.volumes.get(&b)) else {
            return;
        };
        if va.group == vb.group || !va.bounds.intersects(&vb.bounds) {
            return;
        }
        out.insert(ElementPair::new(a, b));
    }

    /// Recomputes overlaps and returns the pairs created and removed since the last call.
    pub fn update(&mut self) -> OverlapUpdate {
        let _timer = StageTimer::traced("broadphase update");

        self.grid.clear();
        let mut unbinned = Vec::new();
        for (&element, volume) in &self.volumes {
            if !self.grid.insert(element, &volume.bounds) {
                unbinned.push(element);
            }
        }

        let mut current = HashSet::with_capacity(self.pairs.len());
        for cell in self.grid.cells() {
            for (i, &a) in cell.iter().enumerate() {
                for &b in &cell[i + 1..] {
                    self.try_pair(a, b, &mut current);
                }
            }
        }
        for &large in &unbinned {
            for &other in self.volumes.keys() {
                self.try_pair(large, other, &mut current);
            }
        }

        let mut created: Vec<ElementPair> = current.difference(&self.pairs).copied().collect();
        let mut removed: Vec<ElementPair> = self.pairs.difference(&current).copied().collect();
        created.sort();
        removed.sort();
        self.pairs = current;

        if !created.is_empty() || !removed.is_empty() {
            debug!(
                "broadphase: {} overlaps created, {} removed, {} active",
                created.len(),
                removed.len(),
                self.pairs.len()
            );
        }
        OverlapUpdate { created, removed }
    }
}
