//! Per-particle bracket solver for the interaction radius.
//!
//! Each pass hands the solver a particle and the [`Observation`] of its
//! neighbourhood. The solver either accepts the radius (the particle
//! leaves the active set) or tightens the particle's [`Bracket`] and
//! proposes the next trial radius:
//!
//! - both bounds known: geometric mean of the bounds, replaced by a
//!   cube-root blend with the arithmetic midpoint when the jump from the
//!   current radius is too large;
//! - one bound known: multiplicative step `(N_des / N)^(1 / slope)`,
//!   clamped to `[1 / max_step_factor, max_step_factor]`.
//!
//! Radii that would cross the global floor or ceiling are pinned there
//! for one extra pass. A particle still short of neighbours at the
//! ceiling (or still crowded at the floor) is then accepted as is; one
//! that overshot the window keeps searching inside the closed bracket.

use sphex_core::{Activity, Bracket, Observation, Particle, Pin};

use crate::config::{EngineConfig, NeighborTarget, RadiusLimits, SolverTuning};

/// Acceptance window after conditioning inflation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tolerance {
    /// Desired neighbour count.
    pub desired: f64,
    /// Accepted deviation.
    pub deviation: f64,
}

impl Tolerance {
    /// Lowest accepted count.
    pub fn low(&self) -> f64 {
        self.desired - self.deviation
    }

    /// Highest accepted count.
    pub fn high(&self) -> f64 {
        self.desired + self.deviation
    }

    /// Whether `n` lies inside the window.
    pub fn accepts(&self, n: f64) -> bool {
        self.low() <= n && n <= self.high()
    }
}

/// What the solver decided for one particle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Count inside the window; particle deactivated.
    Converged,
    /// Extra pass at a hard bound done and the count is still on the
    /// far side of the window; particle deactivated.
    Pinned(Pin),
    /// Bracket narrower than the collapse tolerance; particle
    /// deactivated.
    ///
    /// The count is outside the window and the radius is not at a hard
    /// bound. This happens for staircase counts (e.g. a top-hat census)
    /// whose step jumps over the whole window between two radii closer
    /// than `collapse_tolerance`.
    Collapsed,
    /// New trial radius set; particle stays active.
    Retry,
}

impl Verdict {
    /// Whether the particle left the active set.
    pub fn is_final(self) -> bool {
        self != Self::Retry
    }
}

/// Radius solver shared by every particle of a loop.
#[derive(Clone, Copy, Debug)]
pub struct BracketSolver {
    target: NeighborTarget,
    limits: RadiusLimits,
    tuning: SolverTuning,
}

impl BracketSolver {
    /// Solver with explicit parameters.
    pub fn new(target: NeighborTarget, limits: RadiusLimits, tuning: SolverTuning) -> Self {
        Self {
            target,
            limits,
            tuning,
        }
    }

    /// Solver using the parameters of `config`.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.target, config.limits, config.tuning)
    }

    /// Radius limits.
    pub fn limits(&self) -> RadiusLimits {
        self.limits
    }

    /// Acceptance window for a neighbourhood with the given moment
    /// matrix condition number.
    ///
    /// Above `condition_danger` both the target and the deviation are
    /// scaled by `condition / condition_danger`, capped at
    /// `max_condition_inflation`. A singular matrix (infinite or NaN
    /// condition number) gets the full cap.
    pub fn tolerance(&self, condition: Option<f64>) -> Tolerance {
        let t = &self.tuning;
        let factor = match condition {
            Some(c) if !c.is_finite() => t.max_condition_inflation,
            Some(c) if c > t.condition_danger => {
                (c / t.condition_danger).min(t.max_condition_inflation)
            }
            _ => 1.0,
        };
        Tolerance {
            desired: self.target.desired * factor,
            deviation: self.target.deviation * factor,
        }
    }

    /// Judge `particle`'s last pass and update its radius, bracket and
    /// activity.
    pub fn advance(&self, particle: &mut Particle, obs: &Observation) -> Verdict {
        let tol = self.tolerance(obs.condition_number);
        let n = if obs.neighbors.is_finite() {
            obs.neighbors
        } else {
            0.0
        };
        particle.neighbors = n;
        let h = particle.radius;

        if tol.accepts(n) {
            return finish(particle, Verdict::Converged);
        }
        if let Some(pin) = particle.bracket.pin {
            let stuck = match pin {
                Pin::Ceiling => n < tol.low(),
                Pin::Floor => n > tol.high(),
            };
            if stuck {
                log::warn!(
                    "particle {}: accepting {n:.2} neighbours at pinned radius {h:.4e} ({pin:?})",
                    particle.id
                );
                return finish(particle, Verdict::Pinned(pin));
            }
            // Overshot past the window: the bound closes the bracket.
            particle.bracket.pin = None;
        }

        let low = n < tol.low();
        let b = &mut particle.bracket;
        if low {
            b.left = Some(b.left.map_or(h, |l| l.max(h)));
        } else {
            b.right = Some(b.right.map_or(h, |r| r.min(h)));
        }

        if let (Some(l), Some(r)) = (b.left, b.right) {
            if r - l < self.tuning.collapse_tolerance * l {
                log::warn!(
                    "particle {}: bracket [{l:.6e}, {r:.6e}] collapsed with {n:.2} neighbours",
                    particle.id
                );
                return finish(particle, Verdict::Collapsed);
            }
        }

        let next = self.propose(h, n, tol.desired, obs.dlogn_dlogh, b);
        if low && next > self.limits.max {
            particle.radius = self.limits.max;
            particle.bracket.pin = Some(Pin::Ceiling);
        } else if !low && next < self.limits.min {
            particle.radius = self.limits.min;
            particle.bracket.pin = Some(Pin::Floor);
        } else {
            particle.radius = next.clamp(self.limits.min, self.limits.max);
        }
        Verdict::Retry
    }

    /// Next trial radius from the current radius `h` with `n` observed
    /// neighbours.
    pub fn propose(
        &self,
        h: f64,
        n: f64,
        desired: f64,
        dlogn_dlogh: Option<f64>,
        bracket: &Bracket,
    ) -> f64 {
        let t = &self.tuning;
        if let (Some(l), Some(r)) = (bracket.left, bracket.right) {
            let geo = (l * r).sqrt();
            if (geo / h).ln().abs() <= t.max_log_jump {
                return geo;
            }
            let mid = 0.5 * (l + r);
            return (0.5 * (geo.powi(3) + mid.powi(3))).cbrt();
        }
        let factor = if n <= 0.0 {
            t.max_step_factor
        } else {
            let slope = dlogn_dlogh
                .filter(|s| s.is_finite())
                .map_or(t.dims, |s| s.max(t.min_log_slope));
            ((desired / n).ln() / slope).exp()
        };
        h * factor.clamp(1.0 / t.max_step_factor, t.max_step_factor)
    }
}

fn finish(particle: &mut Particle, verdict: Verdict) -> Verdict {
    particle.activity = Activity::Converged;
    verdict
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn solver() -> BracketSolver {
        BracketSolver::new(
            NeighborTarget {
                desired: 32.0,
                deviation: 4.0,
            },
            RadiusLimits {
                min: 0.01,
                max: 10.0,
            },
            SolverTuning::default(),
        )
    }

    fn obs(n: f64) -> Observation {
        Observation {
            neighbors: n,
            dlogn_dlogh: None,
            condition_number: None,
        }
    }

    #[test]
    fn inside_window_converges() {
        let mut p = Particle::new(0, [0.0; 3], 1.0, 0.5);
        assert_eq!(solver().advance(&mut p, &obs(35.0)), Verdict::Converged);
        assert!(!p.is_active());
        assert_eq!(p.radius, 0.5);
    }

    #[test]
    fn zero_neighbours_doubles_radius() {
        let mut p = Particle::new(0, [0.0; 3], 1.0, 0.5);
        assert_eq!(solver().advance(&mut p, &obs(0.0)), Verdict::Retry);
        assert!((p.radius - 1.0).abs() < 1e-12);
        assert_eq!(p.bracket.left, Some(0.5));
        assert!(p.is_active());
    }

    #[test]
    fn too_many_shrinks_by_cube_root() {
        let mut p = Particle::new(0, [0.0; 3], 1.0, 1.0);
        solver().advance(&mut p, &obs(64.0));
        assert!((p.radius - 0.5f64.cbrt()).abs() < 1e-12);
        assert_eq!(p.bracket.right, Some(1.0));
    }

    #[test]
    fn closed_bracket_uses_geometric_mean() {
        let mut p = Particle::new(0, [0.0; 3], 1.0, 1.0);
        p.bracket.right = Some(1.2);
        solver().advance(&mut p, &obs(20.0));
        assert!((p.radius - (1.0f64 * 1.2).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn far_jump_blends_with_midpoint() {
        let s = solver();
        let b = Bracket {
            left: Some(0.1),
            right: Some(10.0),
            pin: None,
        };
        let next = s.propose(0.1, 1.0, 32.0, None, &b);
        let geo = 1.0f64;
        let mid = 5.05f64;
        assert!((next - (0.5 * (geo.powi(3) + mid.powi(3))).cbrt()).abs() < 1e-12);
        assert!(next > geo && next < mid);
    }

    #[test]
    fn slope_from_payload_is_used() {
        let s = solver();
        let b = Bracket::default();
        // N ~ h^1.5
        let next = s.propose(1.0, 16.0, 32.0, Some(1.5), &b);
        assert!((next - 2.0f64.powf(1.0 / 1.5)).abs() < 1e-12);
    }

    #[test]
    fn ceiling_pins_then_accepts() {
        let s = solver();
        let mut p = Particle::new(0, [0.0; 3], 1.0, 8.0);
        assert_eq!(s.advance(&mut p, &obs(1.0)), Verdict::Retry);
        assert_eq!(p.radius, 10.0);
        assert_eq!(p.bracket.pin, Some(Pin::Ceiling));
        assert!(p.is_active());
        assert_eq!(
            s.advance(&mut p, &obs(2.0)),
            Verdict::Pinned(Pin::Ceiling)
        );
        assert!(!p.is_active());
        assert_eq!(p.radius, 10.0);
    }

    #[test]
    fn floor_pins_then_accepts() {
        let s = solver();
        let mut p = Particle::new(0, [0.0; 3], 1.0, 0.011);
        assert_eq!(s.advance(&mut p, &obs(500.0)), Verdict::Retry);
        assert_eq!(p.radius, 0.01);
        assert_eq!(p.bracket.pin, Some(Pin::Floor));
        assert_eq!(s.advance(&mut p, &obs(400.0)), Verdict::Pinned(Pin::Floor));
    }

    #[test]
    fn ceiling_overshoot_keeps_searching() {
        let s = solver();
        let mut p = Particle::new(0, [0.0; 3], 1.0, 8.0);
        assert_eq!(s.advance(&mut p, &obs(1.0)), Verdict::Retry);
        assert_eq!(p.bracket.pin, Some(Pin::Ceiling));
        assert_eq!(s.advance(&mut p, &obs(100.0)), Verdict::Retry);
        assert!(p.is_active());
        assert_eq!(p.bracket.pin, None);
        assert_eq!(p.bracket.left, Some(8.0));
        assert_eq!(p.bracket.right, Some(10.0));
        assert!(p.radius > 8.0 && p.radius < 10.0);
    }

    #[test]
    fn floor_overshoot_keeps_searching() {
        let s = solver();
        let mut p = Particle::new(0, [0.0; 3], 1.0, 0.011);
        assert_eq!(s.advance(&mut p, &obs(500.0)), Verdict::Retry);
        assert_eq!(p.bracket.pin, Some(Pin::Floor));
        assert_eq!(s.advance(&mut p, &obs(2.0)), Verdict::Retry);
        assert!(p.is_active());
        assert_eq!(p.bracket.pin, None);
        assert_eq!(p.bracket.left, Some(0.01));
        assert_eq!(p.bracket.right, Some(0.011));
        assert!(p.radius > 0.01 && p.radius < 0.011);
    }

    #[test]
    fn pinned_particle_inside_window_converges() {
        let s = solver();
        let mut p = Particle::new(0, [0.0; 3], 1.0, 10.0);
        p.bracket.pin = Some(Pin::Ceiling);
        assert_eq!(s.advance(&mut p, &obs(31.0)), Verdict::Converged);
    }

    #[test]
    fn narrow_bracket_collapses() {
        let s = solver();
        let mut p = Particle::new(0, [0.0; 3], 1.0, 1.0);
        p.bracket.left = Some(0.9999);
        assert_eq!(s.advance(&mut p, &obs(50.0)), Verdict::Collapsed);
        assert!(!p.is_active());
    }

    #[test]
    fn conditioning_inflates_target() {
        let s = solver();
        assert_eq!(s.tolerance(None).desired, 32.0);
        assert_eq!(s.tolerance(Some(50.0)).desired, 32.0);
        let t = s.tolerance(Some(150.0));
        assert!((t.desired - 48.0).abs() < 1e-12);
        assert!((t.deviation - 6.0).abs() < 1e-12);
        assert_eq!(s.tolerance(Some(1e9)).desired, 64.0);
        assert_eq!(s.tolerance(Some(f64::INFINITY)).desired, 64.0);
    }

    #[test]
    fn ill_conditioned_neighbourhood_keeps_searching() {
        let s = solver();
        let mut p = Particle::new(0, [0.0; 3], 1.0, 1.0);
        let o = Observation {
            neighbors: 34.0,
            dlogn_dlogh: None,
            condition_number: Some(f64::INFINITY),
        };
        assert_eq!(s.advance(&mut p, &o), Verdict::Retry);
        assert!(p.radius > 1.0);
    }

    proptest! {
        #[test]
        fn radius_stays_inside_bracket(
            h0 in 0.02f64..5.0,
            counts in proptest::collection::vec(0.0f64..200.0, 1..40),
            slope in proptest::option::of(-1.0f64..6.0),
        ) {
            let s = solver();
            let mut p = Particle::new(0, [0.0; 3], 1.0, h0);
            for n in counts {
                let o = Observation { neighbors: n, dlogn_dlogh: slope, condition_number: None };
                let v = s.advance(&mut p, &o);
                prop_assert!(p.radius >= 0.01 && p.radius <= 10.0);
                if p.bracket.is_closed() {
                    prop_assert!(p.bracket.contains(p.radius), "{:?} vs {}", p.bracket, p.radius);
                }
                if v.is_final() {
                    prop_assert!(!p.is_active());
                    break;
                }
            }
        }
    }
}
