//! The particle data model.
//!
//! A [`Particle`] carries kinematic state plus the fields the bracket
//! solver owns: the interaction radius being solved for, its
//! [`Bracket`], and an explicit [`Activity`] tag. Physics-module output
//! lives outside the particle, in the module's own `Output` vector.

use crate::id::ParticleId;

/// Species tag of a particle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParticleKind {
    /// Gas cell / SPH particle.
    Gas,
    /// Collisionless dark-matter tracer.
    DarkMatter,
    /// Star particle.
    Star,
    /// Compact object (black hole sink).
    BlackHole,
}

/// Whether a particle still takes part in the convergence loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Activity {
    /// Needs (re-)evaluation in the next pass.
    #[default]
    Active,
    /// Radius accepted; skipped for the remainder of the loop.
    Converged,
}

/// A hard radius bound the solver has pinned a particle to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pin {
    /// Pinned to the global minimum radius.
    Floor,
    /// Pinned to the global maximum radius.
    Ceiling,
}

/// Known-good / known-bad radius bounds used by the bracket solver.
///
/// `left` is the largest radius seen with too few neighbours, `right`
/// the smallest radius seen with too many. `None` means "not yet seen".
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct Bracket {
    /// Lower bound (neighbour-deficient radius).
    pub left: Option<f64>,
    /// Upper bound (neighbour-excess radius).
    pub right: Option<f64>,
    /// Set while the radius sits on a hard bound for its extra pass.
    pub pin: Option<Pin>,
}

impl Bracket {
    /// Both bounds are known.
    pub fn is_closed(&self) -> bool {
        self.left.is_some() && self.right.is_some()
    }

    /// `left <= radius <= right` for whichever bounds are set.
    pub fn contains(&self, radius: f64) -> bool {
        self.left.is_none_or(|l| l <= radius) && self.right.is_none_or(|r| radius <= r)
    }

    /// Forget all bounds, e.g. when a new convergence loop starts.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// A simulated particle.
#[derive(Clone, Debug, PartialEq)]
pub struct Particle {
    /// Stable identity.
    pub id: ParticleId,
    /// Species.
    pub kind: ParticleKind,
    /// Position.
    pub pos: [f64; 3],
    /// Velocity.
    pub vel: [f64; 3],
    /// Mass.
    pub mass: f64,
    /// Interaction radius (smoothing length), solved for.
    pub radius: f64,
    /// Solver bounds on `radius`.
    pub bracket: Bracket,
    /// Convergence-loop participation.
    pub activity: Activity,
    /// Neighbour count observed in the last pass.
    pub neighbors: f64,
}

impl Particle {
    /// A gas particle at rest with the given initial radius.
    pub fn new(id: impl Into<ParticleId>, pos: [f64; 3], mass: f64, radius: f64) -> Self {
        Self {
            id: id.into(),
            kind: ParticleKind::Gas,
            pos,
            vel: [0.0; 3],
            mass,
            radius,
            bracket: Bracket::default(),
            activity: Activity::Active,
            neighbors: 0.0,
        }
    }

    /// Builder-style species override.
    pub fn with_kind(mut self, kind: ParticleKind) -> Self {
        self.kind = kind;
        self
    }

    /// Builder-style velocity override.
    pub fn with_velocity(mut self, vel: [f64; 3]) -> Self {
        self.vel = vel;
        self
    }

    /// Whether the particle still needs evaluation.
    pub fn is_active(&self) -> bool {
        self.activity == Activity::Active
    }

    /// Reactivate for a fresh convergence loop, clearing solver state.
    pub fn reactivate(&mut self) {
        self.activity = Activity::Active;
        self.bracket.reset();
    }
}
