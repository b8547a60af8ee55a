//! Integration tests: reference payloads through the full engine.

use std::collections::HashMap;
use std::sync::Arc;

use sphex_comm::{Communicator, LocalCluster};
use sphex_core::{Pair, Particle, ParticleId, ParticleKind, Payload};
use sphex_engine::{EngineConfig, NeighborLoop, NeighborTarget};
use sphex_payloads::{cubic_spline, DensityOutput, DensityPayload, NeighborMassPayload};
use sphex_space::{Aabb, DomainGrid, GridOracle};
use sphex_test_utils::{brute_force_neighbors, partition, uniform_cube};

fn run_on<P>(
    particles: &[Particle],
    ranks: usize,
    config: &EngineConfig,
    payload: impl Fn() -> P + Sync,
    converge: bool,
) -> Vec<(Vec<Particle>, Vec<P::Output>)>
where
    P: Payload,
{
    let grid = Arc::new(DomainGrid::slabs(Aabb::unit(), [4, 4, 4], ranks).unwrap());
    let locals = partition(particles, ranks, |p| grid.owner_of(p));
    LocalCluster::new(ranks)
        .unwrap()
        .run(|mut comm| {
            let rank = comm.rank();
            let mut particles = locals[rank.index()].clone();
            let oracle = GridOracle::build(Arc::clone(&grid), rank, &particles).unwrap();
            let mut engine = NeighborLoop::new(config.clone(), payload()).unwrap();
            let mut outputs = vec![P::Output::default(); particles.len()];
            if converge {
                engine.run(&mut comm, &oracle, &mut particles, &mut outputs);
            } else {
                engine.run_once(&mut comm, &oracle, &particles, &mut outputs);
            }
            (particles, outputs)
        })
        .unwrap()
}

fn interior(p: &Particle, margin: f64) -> bool {
    p.pos.iter().all(|&x| x > margin && x < 1.0 - margin)
}

#[test]
fn density_converges_and_matches_direct_kernel_sum() {
    let cloud = uniform_cube(2000, 1.0, 0.05, 29);
    let config = EngineConfig {
        threads: Some(2),
        ..EngineConfig::default()
    };
    let runs = run_on(&cloud.particles, 2, &config, DensityPayload::new, true);

    let mut checked = 0;
    for (particles, outputs) in &runs {
        for (p, out) in particles.iter().zip(outputs) {
            assert!(!p.is_active());
            assert_eq!(out.neighbors, p.neighbors);
            let direct: f64 = cloud
                .particles
                .iter()
                .map(|q| q.mass * cubic_spline(Pair::between(p.pos, q.pos).r, p.radius))
                .sum();
            assert!(
                (out.density - direct).abs() <= 1e-9 * direct,
                "particle {}: {} vs {direct}",
                p.id,
                out.density
            );
            if interior(p, 0.25) {
                assert!(
                    (28.0..=36.0).contains(&out.neighbors),
                    "particle {}: {} neighbours",
                    p.id,
                    out.neighbors
                );
            }
            checked += 1;
        }
    }
    assert_eq!(checked, 2000);
}

#[test]
fn density_pass_is_independent_of_rank_count() {
    let cloud = uniform_cube(600, 1.0, 0.12, 31);
    let config = EngineConfig {
        threads: Some(2),
        ..EngineConfig::default()
    };
    let by_id = |runs: Vec<(Vec<Particle>, Vec<DensityOutput>)>| {
        runs.into_iter()
            .flat_map(|(ps, outs)| ps.into_iter().map(|p| p.id).zip(outs))
            .collect::<HashMap<ParticleId, _>>()
    };
    let one = by_id(run_on(&cloud.particles, 1, &config, DensityPayload::new, false));
    let four = by_id(run_on(&cloud.particles, 4, &config, DensityPayload::new, false));
    assert_eq!(one.len(), 600);
    for (id, a) in &one {
        let b = &four[id];
        assert!((a.density - b.density).abs() <= 1e-9 * a.density, "particle {id}");
        assert!((a.neighbors - b.neighbors).abs() <= 1e-9 * a.neighbors);
    }
}

#[test]
fn black_holes_converge_on_gas_neighbours() {
    let mut cloud = uniform_cube(1010, 1.0, 0.02, 37);
    for p in cloud.particles.iter_mut().take(10) {
        p.kind = ParticleKind::BlackHole;
    }
    let gas: Vec<Particle> = cloud
        .particles
        .iter()
        .filter(|p| p.kind == ParticleKind::Gas)
        .cloned()
        .collect();
    let config = EngineConfig {
        threads: Some(2),
        target: NeighborTarget {
            desired: 8.0,
            deviation: 1.0,
        },
        ..EngineConfig::default()
    };
    let payload = || NeighborMassPayload::new(ParticleKind::BlackHole, ParticleKind::Gas);
    let runs = run_on(&cloud.particles, 2, &config, payload, true);

    let mut holes = 0;
    for (particles, outputs) in &runs {
        for (p, out) in particles.iter().zip(outputs) {
            if p.kind != ParticleKind::BlackHole {
                assert!(p.is_active(), "gas is not a target");
                continue;
            }
            holes += 1;
            let reference = brute_force_neighbors(&gas, p.pos, p.radius).len();
            assert_eq!(out.neighbors, reference as f64, "black hole {}", p.id);
            assert_eq!(out.mass, reference as f64);
        }
    }
    assert_eq!(holes, 10);
}
