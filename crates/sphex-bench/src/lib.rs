//! Benchmark profiles for the sphex engine.
//!
//! - [`reference_config`]: engine settings shared by every loop benchmark
//! - [`density_profile`]: a seeded gas cube partitioned over slab ranks
//! - [`run_density`]: one full density convergence on a local cluster

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::error::Error;
use std::sync::{Arc, Mutex, PoisonError};

use sphex_comm::{Communicator, LocalCluster};
use sphex_core::{Particle, Rank};
use sphex_engine::{ConvergenceReport, EngineConfig, NeighborLoop, RadiusLimits};
use sphex_payloads::{DensityOutput, DensityPayload};
use sphex_space::{Aabb, DomainGrid, GridOracle, SpaceError};
use sphex_test_utils::{partition, uniform_cube};

/// Engine settings for loop benchmarks: 32 +- 4 neighbours, radius in
/// `[1e-3, 1]`, `threads` workers per rank.
pub fn reference_config(threads: usize) -> EngineConfig {
    EngineConfig {
        threads: Some(threads),
        limits: RadiusLimits {
            min: 1e-3,
            max: 1.0,
        },
        ..EngineConfig::default()
    }
}

/// A partitioned particle set ready to hand to each rank.
#[derive(Clone, Debug)]
pub struct DensityProfile {
    /// Branch layout shared by all ranks.
    pub grid: Arc<DomainGrid>,
    /// Particles of each rank.
    pub locals: Vec<Vec<Particle>>,
}

/// `n` gas particles in the unit cube over `ranks` x-slabs of an 8^3
/// grid, starting at a radius well below the converged one.
///
/// # Errors
///
/// [`SpaceError::TooManyRanks`] for more than 8 ranks.
pub fn density_profile(n: usize, ranks: usize, seed: u64) -> Result<DensityProfile, SpaceError> {
    let grid = Arc::new(DomainGrid::slabs(Aabb::unit(), [8, 8, 8], ranks)?);
    let cloud = uniform_cube(n, 1.0, 0.02, seed);
    let locals = partition(&cloud.particles, ranks, |p| grid.owner_of(p));
    Ok(DensityProfile { grid, locals })
}

/// Converge the density of every particle of `profile`, returning each
/// rank's report and outputs.
///
/// Oracles and engines are built before any rank starts, so a bad
/// profile or config fails here instead of stranding peer ranks.
///
/// # Errors
///
/// Oracle construction, config validation, or an aborted run.
pub fn run_density(
    profile: &DensityProfile,
    config: &EngineConfig,
) -> Result<Vec<(ConvergenceReport, Vec<DensityOutput>)>, Box<dyn Error + Send + Sync>> {
    let oracles = profile
        .locals
        .iter()
        .enumerate()
        .map(|(r, particles)| GridOracle::build(Arc::clone(&profile.grid), Rank(r as u32), particles))
        .collect::<Result<Vec<_>, _>>()?;
    let engines = profile
        .locals
        .iter()
        .map(|_| NeighborLoop::new(config.clone(), DensityPayload::new()).map(Mutex::new))
        .collect::<Result<Vec<_>, _>>()?;

    let cluster = LocalCluster::new(profile.locals.len())?;
    let runs = cluster.run(|mut comm| {
        let r = comm.rank().index();
        let mut engine = engines[r].lock().unwrap_or_else(PoisonError::into_inner);
        let mut particles = profile.locals[r].clone();
        let mut outputs = vec![DensityOutput::default(); particles.len()];
        let report = engine.run(&mut comm, &oracles[r], &mut particles, &mut outputs);
        (report, outputs)
    })?;
    Ok(runs)
}
