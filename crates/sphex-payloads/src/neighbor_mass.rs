//! Top-hat neighbour census of one species around another.
//!
//! The shape of a black-hole environment estimate: for every target
//! particle, count the neighbours of a source species inside the search
//! sphere and sum their mass and momentum. The observation is the raw
//! count, so the solver converges the sphere to hold the desired number
//! of source particles.

use sphex_core::{Finished, Observation, Pair, Partial, Particle, ParticleKind, Payload, TagPair};

/// Sums over one neighbourhood.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NeighborMassPartial {
    /// Source particles inside the sphere.
    pub count: f64,
    /// Their total mass.
    pub mass: f64,
    /// Their total momentum.
    pub momentum: [f64; 3],
}

impl Partial for NeighborMassPartial {
    fn accumulate(&mut self, other: &Self) {
        self.count += other.count;
        self.mass += other.mass;
        for (m, o) in self.momentum.iter_mut().zip(other.momentum) {
            *m += o;
        }
    }
}

/// Per-particle census results.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NeighborMassOutput {
    /// Source particles inside the accepted sphere.
    pub neighbors: f64,
    /// Their total mass.
    pub mass: f64,
    /// Their mass-weighted mean velocity; zero when the sphere is empty.
    pub mean_velocity: [f64; 3],
}

/// Census of `source` particles around `target` particles.
#[derive(Clone, Debug)]
pub struct NeighborMassPayload {
    tags: TagPair,
    target: ParticleKind,
    source: ParticleKind,
}

impl NeighborMassPayload {
    /// Census of `source` neighbours around `target` particles, messaging
    /// on module 3's tags.
    pub fn new(target: ParticleKind, source: ParticleKind) -> Self {
        Self {
            tags: TagPair::for_module(3),
            target,
            source,
        }
    }

    /// Use `tags` instead of the default pair.
    pub fn with_tags(mut self, tags: TagPair) -> Self {
        self.tags = tags;
        self
    }
}

impl Payload for NeighborMassPayload {
    type Query = ();
    type Partial = NeighborMassPartial;
    type Output = NeighborMassOutput;

    fn name(&self) -> &str {
        "neighbor_mass"
    }

    fn tags(&self) -> TagPair {
        self.tags
    }

    fn applies_to(&self, particle: &Particle) -> bool {
        particle.kind == self.target
    }

    fn query(&self, _particle: &Particle) {}

    fn interact(
        &self,
        _query: &(),
        _radius: f64,
        neighbor: &Particle,
        _pair: &Pair,
        acc: &mut NeighborMassPartial,
    ) {
        if neighbor.kind != self.source {
            return;
        }
        acc.count += 1.0;
        acc.mass += neighbor.mass;
        for (p, v) in acc.momentum.iter_mut().zip(neighbor.vel) {
            *p += neighbor.mass * v;
        }
    }

    fn finish(
        &self,
        _particle: &Particle,
        partial: &NeighborMassPartial,
    ) -> Finished<NeighborMassOutput> {
        let mean_velocity = if partial.mass > 0.0 {
            partial.momentum.map(|p| p / partial.mass)
        } else {
            [0.0; 3]
        };
        Finished {
            output: NeighborMassOutput {
                neighbors: partial.count,
                mass: partial.mass,
                mean_velocity,
            },
            observation: Observation {
                neighbors: partial.count,
                dlogn_dlogh: None,
                condition_number: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_only_the_source_species() {
        let payload = NeighborMassPayload::new(ParticleKind::BlackHole, ParticleKind::Gas);
        let bh = Particle::new(0u64, [0.0; 3], 10.0, 1.0).with_kind(ParticleKind::BlackHole);
        let gas = [
            Particle::new(1u64, [0.1, 0.0, 0.0], 2.0, 0.1).with_velocity([1.0, 0.0, 0.0]),
            Particle::new(2u64, [0.0, 0.2, 0.0], 1.0, 0.1).with_velocity([0.0, 3.0, 0.0]),
        ];
        let star = Particle::new(3u64, [0.0, 0.0, 0.1], 5.0, 0.1).with_kind(ParticleKind::Star);

        let mut acc = NeighborMassPartial::default();
        for n in gas.iter().chain([&star, &bh]) {
            payload.interact(&(), bh.radius, n, &Pair::between(bh.pos, n.pos), &mut acc);
        }
        let fin = payload.finish(&bh, &acc);
        assert_eq!(fin.output.neighbors, 2.0);
        assert_eq!(fin.output.mass, 3.0);
        assert_eq!(fin.output.mean_velocity, [2.0 / 3.0, 1.0, 0.0]);
        assert_eq!(fin.observation.neighbors, 2.0);
        assert!(payload.applies_to(&bh));
        assert!(!payload.applies_to(&gas[0]));
    }

    #[test]
    fn empty_sphere_has_zero_velocity() {
        let payload = NeighborMassPayload::new(ParticleKind::Star, ParticleKind::Gas);
        let star = Particle::new(0u64, [0.0; 3], 1.0, 1.0).with_kind(ParticleKind::Star);
        let fin = payload.finish(&star, &NeighborMassPartial::default());
        assert_eq!(fin.output, NeighborMassOutput::default());
    }
}
