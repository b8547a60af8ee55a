//! Reusable particle fixtures.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sphex_core::{Particle, Rank};

/// A generated particle set plus the parameters that produced it.
#[derive(Clone, Debug)]
pub struct ParticleCloud {
    pub particles: Vec<Particle>,
    pub side: f64,
    pub seed: u64,
}

/// `n` unit-mass particles uniformly distributed in `[0, side]^3`.
///
/// Deterministic for a given seed. Ids are `0..n`, every particle starts
/// with `radius`.
pub fn uniform_cube(n: usize, side: f64, radius: f64, seed: u64) -> ParticleCloud {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let particles = (0..n)
        .map(|i| {
            let pos = [
                rng.random::<f64>() * side,
                rng.random::<f64>() * side,
                rng.random::<f64>() * side,
            ];
            Particle::new(i as u64, pos, 1.0, radius)
        })
        .collect();
    ParticleCloud {
        particles,
        side,
        seed,
    }
}

/// Split `particles` into `ranks` local sets using `owner_of`.
///
/// Order within each rank follows the input order.
pub fn partition(
    particles: &[Particle],
    ranks: usize,
    owner_of: impl Fn([f64; 3]) -> Rank,
) -> Vec<Vec<Particle>> {
    let mut out = vec![Vec::new(); ranks];
    for p in particles {
        out[owner_of(p.pos).index()].push(p.clone());
    }
    out
}

/// Indices of every particle strictly within `radius` of `center`.
pub fn brute_force_neighbors(particles: &[Particle], center: [f64; 3], radius: f64) -> Vec<usize> {
    let r2 = radius * radius;
    particles
        .iter()
        .enumerate()
        .filter(|(_, p)| {
            let d: f64 = (0..3).map(|k| (center[k] - p.pos[k]).powi(2)).sum();
            d < r2
        })
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_cloud() {
        let a = uniform_cube(50, 2.0, 0.1, 7);
        let b = uniform_cube(50, 2.0, 0.1, 7);
        assert_eq!(a.particles, b.particles);
        assert!(a
            .particles
            .iter()
            .all(|p| p.pos.iter().all(|&x| (0.0..=2.0).contains(&x))));
    }

    #[test]
    fn partition_keeps_every_particle() {
        let cloud = uniform_cube(100, 1.0, 0.1, 1);
        let parts = partition(&cloud.particles, 2, |p| Rank(u32::from(p[0] >= 0.5)));
        assert_eq!(parts[0].len() + parts[1].len(), 100);
        assert!(parts[1].iter().all(|p| p.pos[0] >= 0.5));
    }

    #[test]
    fn brute_force_includes_self() {
        let cloud = uniform_cube(10, 1.0, 0.1, 3);
        let hits = brute_force_neighbors(&cloud.particles, cloud.particles[4].pos, 1e-9);
        assert_eq!(hits, vec![4]);
    }
}
