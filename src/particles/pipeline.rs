//! Stage ordering for particle systems within one step.
//!
//! Shape generation runs for every system before any packet update is
//! applied; the scene then applies packet updates before near-phase overlap
//! processing can see them.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use super::system::ParticleSystemSim;
use crate::utils::profiling::StageTimer;

/// Runs the shape-generation stage over all systems and returns how many
/// produced an update.
pub fn generate_all_shapes(systems: &mut [&mut ParticleSystemSim], parallel: bool) -> usize {
    let _timer = StageTimer::traced("particles::generate_shapes");

    #[cfg(feature = "parallel")]
    if parallel {
        systems.par_iter_mut().for_each(|system| system.generate_shapes());
        return count_pending(systems);
    }
    #[cfg(not(feature = "parallel"))]
    let _ = parallel;

    for system in systems.iter_mut() {
        system.generate_shapes();
    }
    count_pending(systems)
}

fn count_pending(systems: &[&mut ParticleSystemSim]) -> usize {
    systems
        .iter()
        .filter(|system| system.pending_shape_update().is_some())
        .count()
}

/// Clears per-step solver annotations of every system.
pub fn clear_all_sim_state(systems: &mut [&mut ParticleSystemSim], parallel: bool) {
    let _timer = StageTimer::traced("particles::clear_sim_state");

    #[cfg(feature = "parallel")]
    if parallel {
        systems.par_iter_mut().for_each(|system| system.clear_sim_state());
        return;
    }
    #[cfg(not(feature = "parallel"))]
    let _ = parallel;

    for system in systems.iter_mut() {
        system.clear_sim_state();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::handles::ParticleSystemId;
    use crate::particles::state::ParticleCreationData;
    use crate::particles::system::ParticleSystemParams;
    use glam::Vec3;

    #[test]
    fn every_enabled_system_is_staged() {
        let mut a = ParticleSystemSim::new(ParticleSystemId::from_index(0), ParticleSystemParams::new(4));
        let mut b = ParticleSystemSim::new(ParticleSystemId::from_index(1), ParticleSystemParams::new(4));
        a.state_mut()
            .add_particles(&ParticleCreationData::new(&[0], &[Vec3::ZERO]))
            .expect("fresh slot");
        let mut systems = vec![&mut a, &mut b];
        assert_eq!(generate_all_shapes(&mut systems, true), 2);
        assert_eq!(a.take_shape_update().map(|u| u.created.len()), Some(1));
        assert_eq!(b.take_shape_update().map(|u| u.created.len()), Some(0));
    }
}
