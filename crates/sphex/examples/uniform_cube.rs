//! Density of a random gas cube on four in-process ranks.
//!
//! Run with `RUST_LOG=debug` to see per-chunk and per-pass logging.

use std::error::Error;
use std::sync::Arc;

use sphex::prelude::*;
use sphex_test_utils::{partition, uniform_cube};

const PARTICLES: usize = 20_000;
const RANKS: usize = 4;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    println!("=== sphex uniform cube: {PARTICLES} particles on {RANKS} ranks ===\n");

    let grid = Arc::new(DomainGrid::slabs(Aabb::unit(), [8, 8, 8], RANKS)?);
    let cloud = uniform_cube(PARTICLES, 1.0, 0.01, 2024);
    let locals = partition(&cloud.particles, RANKS, |p| grid.owner_of(p));
    let oracles = locals
        .iter()
        .enumerate()
        .map(|(r, ps)| GridOracle::build(Arc::clone(&grid), Rank(r as u32), ps))
        .collect::<Result<Vec<_>, _>>()?;

    let config = EngineConfig {
        export_buffer_bytes: 256 * 1024,
        ..EngineConfig::default()
    };
    config.validate()?;

    let runs = LocalCluster::new(RANKS)?.run(|mut comm| {
        let rank = comm.rank().index();
        let mut particles = locals[rank].clone();
        let mut outputs = vec![DensityOutput::default(); particles.len()];
        // Validated above; the payload cannot make construction fail.
        let report = match NeighborLoop::new(config.clone(), DensityPayload::new()) {
            Ok(mut engine) => engine.run(&mut comm, &oracles[rank], &mut particles, &mut outputs),
            Err(e) => unreachable!("{e}"),
        };
        (particles, outputs, report)
    })?;

    for (rank, (particles, outputs, report)) in runs.iter().enumerate() {
        let mean_h = particles.iter().map(|p| p.radius).sum::<f64>() / particles.len() as f64;
        let mean_rho = outputs.iter().map(|o| o.density).sum::<f64>() / outputs.len() as f64;
        println!(
            "rank {rank}: {} particles, {} iterations, {} exported, {} rollbacks, mean h {mean_h:.4}, mean density {mean_rho:.1}",
            particles.len(),
            report.iterations,
            report.total_exported(),
            report.total_rollbacks(),
        );
        println!(
            "        converged {}, pinned {}/{}, collapsed {}",
            report.verdicts.converged,
            report.verdicts.pinned_floor,
            report.verdicts.pinned_ceiling,
            report.verdicts.collapsed,
        );
    }
    Ok(())
}
