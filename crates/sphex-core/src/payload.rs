//! The [`Payload`] trait: the physics plugged into the engine.
//!
//! A payload supplies three associated types instead of per-module
//! hand-written structs: the query shipped to remote ranks, the partial
//! result shipped back (and merged), and the per-particle output. The
//! engine owns everything else: neighbour iteration, export, exchange,
//! merge order and radius convergence.

use crate::id::TagPair;
use crate::particle::Particle;

/// How a contribution is folded into a particle's partial result.
///
/// The first contribution of a pass assigns, every later one adds. The
/// local walk always contributes first; imported fragments accumulate
/// on top in whatever order they arrive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeMode {
    /// Overwrite the slot.
    Assign,
    /// Add to the slot.
    Accumulate,
}

impl MergeMode {
    /// `Assign` for the first contribution (`index == 0`), otherwise
    /// `Accumulate`.
    pub fn for_contribution(index: usize) -> Self {
        if index == 0 {
            Self::Assign
        } else {
            Self::Accumulate
        }
    }
}

/// Partial sums produced by neighbour interactions.
///
/// `accumulate` must be associative and commutative up to floating-point
/// rounding; results are not bit-reproducible across thread counts.
pub trait Partial: Clone + Default + Send + Sync {
    /// Add `other` into `self`.
    fn accumulate(&mut self, other: &Self);
}

/// Fold `partial` into `slot` according to `mode`.
pub fn merge<T: Partial>(slot: &mut T, partial: &T, mode: MergeMode) {
    match mode {
        MergeMode::Assign => slot.clone_from(partial),
        MergeMode::Accumulate => slot.accumulate(partial),
    }
}

/// Geometry of one centre/neighbour pair.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pair {
    /// `center - neighbour`.
    pub dx: [f64; 3],
    /// Squared separation.
    pub r2: f64,
    /// Separation.
    pub r: f64,
}

impl Pair {
    /// Pair geometry between a search centre and a neighbour position.
    pub fn between(center: [f64; 3], neighbor: [f64; 3]) -> Self {
        let dx = [
            center[0] - neighbor[0],
            center[1] - neighbor[1],
            center[2] - neighbor[2],
        ];
        let r2 = dx[0] * dx[0] + dx[1] * dx[1] + dx[2] * dx[2];
        Self {
            dx,
            r2,
            r: r2.sqrt(),
        }
    }
}

/// What the bracket solver needs to know about a finished particle.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Observation {
    /// Observed (possibly kernel-weighted) neighbour count.
    pub neighbors: f64,
    /// `d ln N / d ln h` at the current radius, if the payload can
    /// estimate it. Used for the Newton-like single-bracket step.
    pub dlogn_dlogh: Option<f64>,
    /// Condition number of the local moment matrix, if computed.
    pub condition_number: Option<f64>,
}

/// Output of [`Payload::finish`].
#[derive(Clone, Debug, PartialEq)]
pub struct Finished<O> {
    /// Per-particle output fields.
    pub output: O,
    /// Convergence signal for the solver.
    pub observation: Observation,
}

/// A physics module instantiating the engine.
///
/// `interact` is called concurrently for different targets; it must not
/// touch shared mutable state.
pub trait Payload: Sync {
    /// Data shipped to remote ranks alongside the search sphere.
    type Query: Clone + Send + Sync + 'static;
    /// Partial sums shipped back and merged.
    type Partial: Partial + 'static;
    /// Per-particle output.
    type Output: Clone + Default + Send;

    /// Human-readable name for diagnostics.
    fn name(&self) -> &str;

    /// Message tags; must be unique among engines sharing a communicator.
    fn tags(&self) -> TagPair;

    /// Whether `particle` is a target of this module. Default: all.
    fn applies_to(&self, particle: &Particle) -> bool {
        let _ = particle;
        true
    }

    /// Build the query describing `particle` to a remote rank.
    fn query(&self, particle: &Particle) -> Self::Query;

    /// Add the contribution of `neighbor` to `acc`.
    ///
    /// `radius` is the searching particle's interaction radius.
    fn interact(
        &self,
        query: &Self::Query,
        radius: f64,
        neighbor: &Particle,
        pair: &Pair,
        acc: &mut Self::Partial,
    );

    /// Turn the fully merged partial of `particle` into output fields and
    /// a convergence observation.
    fn finish(&self, particle: &Particle, partial: &Self::Partial) -> Finished<Self::Output>;
}
