use std::time::{Duration, Instant};

/// Per-step timing and counters for the particle, near-phase and cloth stages.
#[derive(Debug, Default, Clone, Copy)]
pub struct StepProfiler {
    pub shape_generation_time: Duration,
    pub broad_phase_time: Duration,
    pub near_phase_time: Duration,
    pub trigger_time: Duration,
    pub cloth_collision_time: Duration,
    pub total_step_time: Duration,

    pub packets_created: usize,
    pub packets_destroyed: usize,
    pub overlaps_created: usize,
    pub overlaps_removed: usize,
    pub dirty_interactions: usize,
}

impl StepProfiler {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn report(&self) {
        let total_us = self.total_step_time.as_micros() as f32;
        if total_us < 1.0 {
            return;
        }

        let share = |d: Duration| (d.as_micros() as f32 / total_us) * 100.0;
        log::debug!(
            "step {:.2} ms | packets +{} -{} | overlaps +{} -{} | dirty {}",
            self.total_step_time.as_secs_f32() * 1000.0,
            self.packets_created,
            self.packets_destroyed,
            self.overlaps_created,
            self.overlaps_removed,
            self.dirty_interactions,
        );
        log::debug!(
            "  shapes {:.1}% | broadphase {:.1}% | near-phase {:.1}% | triggers {:.1}% | cloth {:.1}%",
            share(self.shape_generation_time),
            share(self.broad_phase_time),
            share(self.near_phase_time),
            share(self.trigger_time),
            share(self.cloth_collision_time),
        );
    }
}

/// Times one pipeline stage. The elapsed time is traced on drop and, for
/// recorded stages, added to a [`StepProfiler`] slot.
pub struct StageTimer<'a> {
    label: &'static str,
    start: Instant,
    output: Option<&'a mut Duration>,
}

impl<'a> StageTimer<'a> {
    /// Stage that is only traced.
    pub fn traced(label: &'static str) -> Self {
        Self {
            label,
            start: Instant::now(),
            output: None,
        }
    }

    /// Stage whose time also accumulates into `output`.
    pub fn recorded(label: &'static str, output: &'a mut Duration) -> Self {
        Self {
            label,
            start: Instant::now(),
            output: Some(output),
        }
    }
}

impl Drop for StageTimer<'_> {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        if let Some(output) = self.output.as_deref_mut() {
            *output += elapsed;
        }
        log::trace!("{} took {} us", self.label, elapsed.as_micros());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorded_stages_accumulate() {
        let mut profiler = StepProfiler::default();
        for _ in 0..2 {
            let _stage = StageTimer::recorded("test::stage", &mut profiler.trigger_time);
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(profiler.trigger_time >= Duration::from_millis(2));
        assert_eq!(profiler.near_phase_time, Duration::ZERO);

        profiler.reset();
        assert_eq!(profiler.trigger_time, Duration::ZERO);
    }
}
