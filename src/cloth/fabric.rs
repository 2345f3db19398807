//! Shared cloth fabrics and their tracking pool.

use std::sync::Arc;

use glam::{Vec3, Vec4};
use log::{debug, error};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PhaseKind {
    Vertical,
    Horizontal,
    Bending,
    Shearing,
}

/// Distance constraint between two cloth particles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FabricConstraint {
    pub particles: [u32; 2],
    pub rest_length: f32,
    pub phase: PhaseKind,
}

/// Static connectivity of a cloth mesh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FabricDesc {
    pub num_particles: u32,
    pub constraints: Vec<FabricConstraint>,
    /// Anchor particle and maximum distance per particle.
    pub tethers: Vec<(u32, f32)>,
}

/// Validated, immutable fabric shared by every cloth instantiated from it.
#[derive(Debug, PartialEq)]
pub struct Fabric {
    desc: FabricDesc,
}

impl Fabric {
    pub fn num_particles(&self) -> u32 {
        self.desc.num_particles
    }

    pub fn constraints(&self) -> &[FabricConstraint] {
        &self.desc.constraints
    }

    pub fn tethers(&self) -> &[(u32, f32)] {
        &self.desc.tethers
    }

    pub fn desc(&self) -> &FabricDesc {
        &self.desc
    }
}

/// Builds a rectangular grid fabric in the XZ plane together with its particles
/// (`xyz` position, `w` inverse mass).
pub fn grid_fabric(rows: u32, columns: u32, spacing: f32) -> (FabricDesc, Vec<Vec4>) {
    let index = |row: u32, column: u32| row * columns + column;
    let mut particles = Vec::with_capacity((rows * columns) as usize);
    for row in 0..rows {
        for column in 0..columns {
            let position = Vec3::new(column as f32 * spacing, 0.0, row as f32 * spacing);
            particles.push(position.extend(1.0));
        }
    }

    let mut constraints = Vec::new();
    let mut link = |a: u32, b: u32, phase: PhaseKind| {
        let rest_length = (particles[a as usize] - particles[b as usize]).truncate().length();
        constraints.push(FabricConstraint {
            particles: [a, b],
            rest_length,
            phase,
        });
    };
    for row in 0..rows {
        for column in 0..columns {
            if column + 1 < columns {
                link(index(row, column), index(row, column + 1), PhaseKind::Horizontal);
            }
            if row + 1 < rows {
                link(index(row, column), index(row + 1, column), PhaseKind::Vertical);
            }
            if row + 1 < rows && column + 1 < columns {
                link(index(row, column), index(row + 1, column + 1), PhaseKind::Shearing);
            }
            if column + 2 < columns {
                link(index(row, column), index(row, column + 2), PhaseKind::Bending);
            }
        }
    }

    let desc = FabricDesc {
        num_particles: rows * columns,
        constraints,
        tethers: Vec::new(),
    };
    (desc, particles)
}

/// Owning collection of live fabrics. The pool holds one strong reference;
/// cloths hold the others.
#[derive(Debug, Default)]
pub struct FabricPool {
    fabrics: Mutex<Vec<Arc<Fabric>>>,
}

impl FabricPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, desc: FabricDesc) -> SimResult<Arc<Fabric>> {
        for constraint in &desc.constraints {
            for &particle in &constraint.particles {
                if particle >= desc.num_particles {
                    return Err(SimError::IndexOutOfRange {
                        index: particle,
                        max: desc.num_particles,
                    });
                }
            }
        }
        if let Some(&(anchor, _)) = desc.tethers.iter().find(|(a, _)| *a >= desc.num_particles) {
            return Err(SimError::IndexOutOfRange {
                index: anchor,
                max: desc.num_particles,
            });
        }

        let fabric = Arc::new(Fabric { desc });
        self.fabrics.lock().push(Arc::clone(&fabric));
        debug!("created fabric with {} particles", fabric.num_particles());
        Ok(fabric)
    }

    /// Removes the pool's reference. Releasing a fabric the pool does not hold
    /// is reported and ignored.
    pub fn release(&self, fabric: &Arc<Fabric>) -> SimResult<()> {
        let mut fabrics = self.fabrics.lock();
        match fabrics.iter().position(|f| Arc::ptr_eq(f, fabric)) {
            Some(slot) => {
                fabrics.swap_remove(slot);
                Ok(())
            }
            None => {
                error!("invalid operation: fabric released twice or not owned by this pool");
                Err(SimError::InvalidOperation("fabric is not tracked by the pool".into()))
            }
        }
    }

    pub fn contains(&self, fabric: &Arc<Fabric>) -> bool {
        self.fabrics.lock().iter().any(|f| Arc::ptr_eq(f, fabric))
    }

    pub fn len(&self) -> usize {
        self.fabrics.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_release_is_reported_not_fatal() {
        let pool = FabricPool::new();
        let (desc, _) = grid_fabric(2, 2, 1.0);
        let fabric = pool.create(desc).expect("valid fabric");
        let user = Arc::clone(&fabric);

        assert!(pool.release(&fabric).is_ok());
        assert!(matches!(pool.release(&fabric), Err(SimError::InvalidOperation(_))));
        assert!(pool.is_empty());
        assert_eq!(user.num_particles(), 4);
    }

    #[test]
    fn constraint_indices_are_checked() {
        let pool = FabricPool::new();
        let desc = FabricDesc {
            num_particles: 2,
            constraints: vec![FabricConstraint {
                particles: [0, 2],
                rest_length: 1.0,
                phase: PhaseKind::Horizontal,
            }],
            tethers: Vec::new(),
        };
        assert_eq!(
            pool.create(desc),
            Err(SimError::IndexOutOfRange { index: 2, max: 2 })
        );
    }

    #[test]
    fn grid_links_neighbours() {
        let (desc, particles) = grid_fabric(3, 3, 0.5);
        assert_eq!(particles.len(), 9);
        assert!(desc
            .constraints
            .iter()
            .any(|c| c.particles == [0, 1] && (c.rest_length - 0.5).abs() < 1e-6));
    }
}
