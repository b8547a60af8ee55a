//! Mock payloads for engine tests.
//!
//! - [`CountPayload`]: top-hat neighbour count and mass sum. The
//!   observation reports the raw count, so a particle converges once its
//!   count lies within the target window.

use std::sync::atomic::{AtomicUsize, Ordering};

use sphex_core::{Finished, Observation, Pair, Particle, Partial, Payload, TagPair};

/// Partial of [`CountPayload`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CountPartial {
    pub count: f64,
    pub mass: f64,
}

impl Partial for CountPartial {
    fn accumulate(&mut self, other: &Self) {
        self.count += other.count;
        self.mass += other.mass;
    }
}

/// Counts neighbours inside the search sphere.
///
/// `interactions` tallies `interact` calls across threads.
pub struct CountPayload {
    pub tags: TagPair,
    pub slope: Option<f64>,
    pub interactions: AtomicUsize,
}

impl CountPayload {
    pub fn new() -> Self {
        Self {
            tags: TagPair::for_module(1),
            slope: Some(3.0),
            interactions: AtomicUsize::new(0),
        }
    }

    /// Report no slope, forcing the solver onto its default.
    pub fn without_slope(mut self) -> Self {
        self.slope = None;
        self
    }

    pub fn interactions(&self) -> usize {
        self.interactions.load(Ordering::Relaxed)
    }
}

impl Default for CountPayload {
    fn default() -> Self {
        Self::new()
    }
}

impl Payload for CountPayload {
    type Query = f64;
    type Partial = CountPartial;
    type Output = CountPartial;

    fn name(&self) -> &str {
        "count"
    }

    fn tags(&self) -> TagPair {
        self.tags
    }

    fn query(&self, particle: &Particle) -> f64 {
        particle.mass
    }

    fn interact(
        &self,
        _query: &f64,
        _radius: f64,
        neighbor: &Particle,
        _pair: &Pair,
        acc: &mut CountPartial,
    ) {
        self.interactions.fetch_add(1, Ordering::Relaxed);
        acc.count += 1.0;
        acc.mass += neighbor.mass;
    }

    fn finish(&self, _particle: &Particle, partial: &CountPartial) -> Finished<CountPartial> {
        Finished {
            output: partial.clone(),
            observation: Observation {
                neighbors: partial.count,
                dlogn_dlogh: self.slope,
                condition_number: None,
            },
        }
    }
}
