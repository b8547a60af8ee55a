//! SPH density estimate with adaptive smoothing length.

use smallvec::{smallvec, SmallVec};
use sphex_core::{
    Finished, Matrix3, Observation, Pair, Partial, Particle, ParticleKind, Payload, TagPair,
};

use crate::kernel::{cubic_spline, cubic_spline_dh, effective_neighbors};

/// Kernel sums of one particle's neighbourhood.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DensityPartial {
    /// `sum W`.
    pub weight: f64,
    /// `sum dW/dh`.
    pub weight_dh: f64,
    /// `sum m W`.
    pub rho: f64,
    /// `sum m dW/dh`.
    pub rho_dh: f64,
    /// `sum W dx dx^T`.
    pub moments: Matrix3,
}

impl Partial for DensityPartial {
    fn accumulate(&mut self, other: &Self) {
        self.weight += other.weight;
        self.weight_dh += other.weight_dh;
        self.rho += other.rho;
        self.rho_dh += other.rho_dh;
        self.moments += &other.moments;
    }
}

/// Per-particle density results.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DensityOutput {
    /// Kernel density estimate.
    pub density: f64,
    /// `d rho / dh` at the accepted smoothing length.
    pub drho_dh: f64,
    /// Grad-h correction `1 + h / (3 rho) * d rho / dh`; 1 for an empty
    /// neighbourhood.
    pub omega: f64,
    /// Kernel-weighted neighbour count.
    pub neighbors: f64,
    /// Condition number of the moment matrix; infinite when singular.
    pub condition_number: f64,
}

/// SPH density of the selected particle kinds, by default gas only.
///
/// Every neighbour inside the support contributes, whatever its kind.
#[derive(Clone, Debug)]
pub struct DensityPayload {
    tags: TagPair,
    kinds: SmallVec<[ParticleKind; 4]>,
    condition_feedback: bool,
}

impl DensityPayload {
    /// Density of gas particles, messaging on module 2's tags.
    pub fn new() -> Self {
        Self {
            tags: TagPair::for_module(2),
            kinds: smallvec![ParticleKind::Gas],
            condition_feedback: true,
        }
    }

    /// Use `tags` instead of the default pair.
    pub fn with_tags(mut self, tags: TagPair) -> Self {
        self.tags = tags;
        self
    }

    /// Evaluate particles of `kinds` instead of gas only.
    pub fn with_kinds(mut self, kinds: &[ParticleKind]) -> Self {
        self.kinds = kinds.iter().copied().collect();
        self
    }

    /// Whether the moment-matrix condition number is reported to the
    /// solver, widening the neighbour window in anisotropic regions.
    pub fn with_condition_feedback(mut self, enabled: bool) -> Self {
        self.condition_feedback = enabled;
        self
    }
}

impl Default for DensityPayload {
    fn default() -> Self {
        Self::new()
    }
}

impl Payload for DensityPayload {
    type Query = ();
    type Partial = DensityPartial;
    type Output = DensityOutput;

    fn name(&self) -> &str {
        "density"
    }

    fn tags(&self) -> TagPair {
        self.tags
    }

    fn applies_to(&self, particle: &Particle) -> bool {
        self.kinds.contains(&particle.kind)
    }

    fn query(&self, _particle: &Particle) {}

    fn interact(
        &self,
        _query: &(),
        radius: f64,
        neighbor: &Particle,
        pair: &Pair,
        acc: &mut DensityPartial,
    ) {
        if pair.r >= radius {
            return;
        }
        let w = cubic_spline(pair.r, radius);
        let dwdh = cubic_spline_dh(pair.r, radius);
        acc.weight += w;
        acc.weight_dh += dwdh;
        acc.rho += neighbor.mass * w;
        acc.rho_dh += neighbor.mass * dwdh;
        acc.moments.add_outer(pair.dx, w);
    }

    fn finish(&self, particle: &Particle, partial: &DensityPartial) -> Finished<DensityOutput> {
        let h = particle.radius;
        let neighbors = effective_neighbors(partial.weight, h);
        let dlogn_dlogh =
            (partial.weight > 0.0).then(|| 3.0 + h * partial.weight_dh / partial.weight);
        let omega = if partial.rho > 0.0 {
            1.0 + h / (3.0 * partial.rho) * partial.rho_dh
        } else {
            1.0
        };
        let condition_number = partial.moments.condition().condition_number;
        Finished {
            output: DensityOutput {
                density: partial.rho,
                drho_dh: partial.rho_dh,
                omega,
                neighbors,
                condition_number,
            },
            observation: Observation {
                neighbors,
                dlogn_dlogh,
                condition_number: self.condition_feedback.then_some(condition_number),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum_over(payload: &DensityPayload, center: &Particle, others: &[Particle]) -> DensityPartial {
        let mut acc = DensityPartial::default();
        for n in std::iter::once(center).chain(others) {
            let pair = Pair::between(center.pos, n.pos);
            payload.interact(&(), center.radius, n, &pair, &mut acc);
        }
        acc
    }

    fn octahedron(d: f64, mass: f64) -> Vec<Particle> {
        let mut out = Vec::new();
        for k in 0..3 {
            for s in [-d, d] {
                let mut pos = [0.0; 3];
                pos[k] = s;
                out.push(Particle::new(out.len() as u64 + 1, pos, mass, 1.0));
            }
        }
        out
    }

    #[test]
    fn isolated_particle_sees_only_itself() {
        let payload = DensityPayload::new();
        let p = Particle::new(0u64, [0.0; 3], 2.0, 0.5);
        let fin = payload.finish(&p, &sum_over(&payload, &p, &[]));
        assert!((fin.output.density - 2.0 * cubic_spline(0.0, 0.5)).abs() < 1e-12);
        assert!((fin.observation.neighbors - 32.0 / 3.0).abs() < 1e-9);
        assert!((fin.observation.dlogn_dlogh.unwrap()).abs() < 1e-12);
        assert!(fin.output.condition_number.is_infinite());
    }

    #[test]
    fn symmetric_shell_is_well_conditioned() {
        let payload = DensityPayload::new();
        let p = Particle::new(0u64, [0.0; 3], 1.0, 1.0);
        let fin = payload.finish(&p, &sum_over(&payload, &p, &octahedron(0.6, 1.0)));
        assert!((fin.output.condition_number - 1.0).abs() < 1e-9);
        assert_eq!(fin.observation.condition_number, Some(fin.output.condition_number));
        let expected = cubic_spline(0.0, 1.0) + 6.0 * cubic_spline(0.6, 1.0);
        assert!((fin.output.density - expected).abs() < 1e-12);
    }

    #[test]
    fn neighbours_outside_support_are_ignored() {
        let payload = DensityPayload::new();
        let p = Particle::new(0u64, [0.0; 3], 1.0, 0.5);
        let far = octahedron(0.5, 1.0);
        assert_eq!(sum_over(&payload, &p, &far), sum_over(&payload, &p, &[]));
    }

    #[test]
    fn slope_and_omega_follow_kernel_derivatives() {
        let payload = DensityPayload::new();
        let p = Particle::new(0u64, [0.0; 3], 1.0, 1.0);
        let shell = octahedron(0.4, 1.0);
        let fin = payload.finish(&p, &sum_over(&payload, &p, &shell));

        let n = |h: f64| {
            let q = Particle::new(0u64, [0.0; 3], 1.0, h);
            effective_neighbors(sum_over(&payload, &q, &shell).weight, h)
        };
        let d = 1e-6;
        let numeric = (n(1.0 + d).ln() - n(1.0 - d).ln()) / ((1.0 + d).ln() - (1.0 - d).ln());
        assert!((fin.observation.dlogn_dlogh.unwrap() - numeric).abs() < 1e-3);
        assert!(fin.output.omega > 0.0 && fin.output.omega < 1.0);
    }

    #[test]
    fn kinds_and_feedback_are_configurable() {
        let gas = Particle::new(0u64, [0.0; 3], 1.0, 1.0);
        let star = gas.clone().with_kind(ParticleKind::Star);
        let default = DensityPayload::new();
        assert!(default.applies_to(&gas));
        assert!(!default.applies_to(&star));

        let stars = DensityPayload::new()
            .with_kinds(&[ParticleKind::Star])
            .with_condition_feedback(false);
        assert!(stars.applies_to(&star));
        let fin = stars.finish(&star, &DensityPartial::default());
        assert_eq!(fin.observation.condition_number, None);
        assert_eq!(fin.observation.dlogn_dlogh, None);
        assert_eq!(fin.output.omega, 1.0);
    }

    #[test]
    fn accumulate_sums_every_field() {
        let mut a = DensityPartial {
            weight: 1.0,
            weight_dh: -2.0,
            rho: 3.0,
            rho_dh: -4.0,
            moments: Matrix3::IDENTITY,
        };
        let b = a.clone();
        a.accumulate(&b);
        assert_eq!(a.weight, 2.0);
        assert_eq!(a.rho_dh, -8.0);
        assert_eq!(a.moments.0[1][1], 2.0);
    }
}
