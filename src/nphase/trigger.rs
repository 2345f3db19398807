//! Batched trigger overlap evaluation.
//!
//! Batches share only the report buffer (behind a mutex) and the
//! deactivation array, whose slots are claimed with an atomic cursor.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use glam::Vec3;
use log::error;
use parking_lot::Mutex;
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use super::report::{TriggerPairReport, TriggerStatus};
use crate::collision::overlap::geometries_overlap;
use crate::core::filter::PairFlags;
use crate::core::geometry::Geometry;
use crate::core::handles::{ActorId, InteractionId, ShapeId};
use crate::core::types::Transform;

/// Snapshot of one trigger pair, tested and updated by a batch.
#[derive(Debug, Clone)]
pub struct TriggerTask<'a> {
    pub interaction: InteractionId,
    pub trigger_shape: ShapeId,
    pub trigger_actor: ActorId,
    pub trigger_geometry: &'a Geometry,
    pub trigger_pose: Transform,
    pub other_shape: ShapeId,
    pub other_actor: ActorId,
    pub other_geometry: &'a Geometry,
    pub other_pose: Transform,
    pub pair_flags: PairFlags,
    pub last_overlap: bool,
    pub hint: Vec3,
    /// Neither side moves, so the pair can stop being tested after this pass.
    pub can_deactivate: bool,
}

impl TriggerTask<'_> {
    fn evaluate(&mut self) -> Option<TriggerPairReport> {
        let overlap = geometries_overlap(
            self.trigger_geometry,
            &self.trigger_pose,
            self.other_geometry,
            &self.other_pose,
            &mut self.hint,
        );
        let changed = overlap != self.last_overlap;
        self.last_overlap = overlap;
        if !changed {
            return None;
        }
        let (status, wanted) = if overlap {
            (TriggerStatus::Found, PairFlags::NOTIFY_TOUCH_FOUND)
        } else {
            (TriggerStatus::Lost, PairFlags::NOTIFY_TOUCH_LOST)
        };
        self.pair_flags.contains(wanted).then_some(TriggerPairReport {
            trigger_shape: self.trigger_shape,
            trigger_actor: self.trigger_actor,
            other_shape: self.other_shape,
            other_actor: self.other_actor,
            status,
            removed_shape: false,
        })
    }
}

/// Reports and deactivation proposals from one trigger pass.
#[derive(Debug, Default)]
pub struct TriggerPassResult {
    pub reports: Vec<TriggerPairReport>,
    pub deactivate: Vec<InteractionId>,
}

/// Tests every task in batches of `batch_size`, updating `last_overlap` and
/// `hint` in place. Returns `None` when scratch memory cannot be reserved.
pub fn process_trigger_tasks(tasks: &mut [TriggerTask<'_>], batch_size: usize, parallel: bool) -> Option<TriggerPassResult> {
    let mut slots: Vec<AtomicU32> = Vec::new();
    if slots.try_reserve_exact(tasks.len()).is_err() {
        error!("trigger pass: cannot reserve scratch for {} pairs; skipping trigger processing", tasks.len());
        return None;
    }
    slots.extend((0..tasks.len()).map(|_| AtomicU32::new(u32::MAX)));
    let cursor = AtomicUsize::new(0);
    let reports = Mutex::new(Vec::new());
    let batch_size = batch_size.max(1);

    let run_batch = |batch_index: usize, batch: &mut [TriggerTask<'_>]| {
        let mut local = Vec::new();
        for (offset, task) in batch.iter_mut().enumerate() {
            if let Some(report) = task.evaluate() {
                local.push(report);
            }
            if task.can_deactivate {
                let slot = cursor.fetch_add(1, Ordering::Relaxed);
                slots[slot].store((batch_index * batch_size + offset) as u32, Ordering::Relaxed);
            }
        }
        if !local.is_empty() {
            reports.lock().extend(local);
        }
    };

    #[cfg(feature = "parallel")]
    if parallel {
        tasks
            .par_chunks_mut(batch_size)
            .enumerate()
            .for_each(|(batch_index, batch)| run_batch(batch_index, batch));
    } else {
        tasks
            .chunks_mut(batch_size)
            .enumerate()
            .for_each(|(batch_index, batch)| run_batch(batch_index, batch));
    }
    #[cfg(not(feature = "parallel"))]
    {
        let _ = parallel;
        tasks
            .chunks_mut(batch_size)
            .enumerate()
            .for_each(|(batch_index, batch)| run_batch(batch_index, batch));
    }

    let claimed = cursor.into_inner();
    let mut deactivate: Vec<InteractionId> = slots[..claimed]
        .iter()
        .map(|slot| tasks[slot.load(Ordering::Relaxed) as usize].interaction)
        .collect();
    deactivate.sort();

    let mut reports = reports.into_inner();
    reports.sort_by_key(|r| (r.trigger_shape, r.other_shape));
    Some(TriggerPassResult { reports, deactivate })
}
