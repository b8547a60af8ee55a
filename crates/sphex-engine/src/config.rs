//! Engine configuration, validation, and error types.
//!
//! [`EngineConfig`] collects every knob of a convergence loop: thread
//! count, the export memory budget, the neighbour target and the solver's
//! tuned constants. [`validate()`](EngineConfig::validate) runs once when
//! a [`NeighborLoop`](crate::NeighborLoop) is built.

use std::error::Error;
use std::fmt;

// ── NeighborTarget ─────────────────────────────────────────────────

/// Desired neighbour count and the accepted deviation around it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NeighborTarget {
    /// Desired (kernel-weighted) neighbour count. Default: 32.
    pub desired: f64,
    /// Accepted deviation either side of `desired`. Default: 4.
    pub deviation: f64,
}

impl Default for NeighborTarget {
    fn default() -> Self {
        Self {
            desired: 32.0,
            deviation: 4.0,
        }
    }
}

// ── RadiusLimits ───────────────────────────────────────────────────

/// Hard floor and ceiling for the interaction radius.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RadiusLimits {
    /// Minimum radius. Default: 1e-6.
    pub min: f64,
    /// Maximum radius. Default: 1e6.
    pub max: f64,
}

impl Default for RadiusLimits {
    fn default() -> Self {
        Self { min: 1e-6, max: 1e6 }
    }
}

impl RadiusLimits {
    /// `radius` moved inside `[min, max]`. A NaN radius starts at the
    /// floor.
    pub fn clamp(&self, radius: f64) -> f64 {
        if radius.is_nan() {
            self.min
        } else {
            radius.clamp(self.min, self.max)
        }
    }
}

// ── SolverTuning ───────────────────────────────────────────────────

/// Empirically tuned constants of the bracket solver.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SolverTuning {
    /// Largest `|ln(next / current)|` accepted from the geometric mean
    /// before falling back to the cube-root blend. Default: 0.7.
    pub max_log_jump: f64,
    /// Largest multiplicative single-bracket step. Default: 2.0.
    pub max_step_factor: f64,
    /// Condition number above which the target is inflated. Default: 100.
    pub condition_danger: f64,
    /// Cap on the conditioning inflation of the target. Default: 2.0.
    pub max_condition_inflation: f64,
    /// Relative bracket width below which a particle is accepted.
    /// Default: 1e-3.
    pub collapse_tolerance: f64,
    /// Spatial dimension; the default `d ln N / d ln h`. Default: 3.
    pub dims: f64,
    /// Floor applied to a payload-supplied `d ln N / d ln h`. Default: 0.5.
    pub min_log_slope: f64,
}

impl Default for SolverTuning {
    fn default() -> Self {
        Self {
            max_log_jump: 0.7,
            max_step_factor: 2.0,
            condition_danger: 100.0,
            max_condition_inflation: 2.0,
            collapse_tolerance: 1e-3,
            dims: 3.0,
            min_log_slope: 0.5,
        }
    }
}

// ── ConfigError ────────────────────────────────────────────────────

/// Errors detected during [`EngineConfig::validate()`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Neighbour target is non-finite, non-positive, or its deviation is
    /// not smaller than the target.
    InvalidTarget {
        /// Description of the violated invariant.
        reason: String,
    },
    /// Radius limits are non-finite, non-positive or inverted.
    InvalidLimits {
        /// Configured minimum.
        min: f64,
        /// Configured maximum.
        max: f64,
    },
    /// `max_iterations` is zero.
    ZeroIterations,
    /// `neighbor_batch` is zero.
    ZeroBatch,
    /// A [`SolverTuning`] invariant is violated.
    InvalidTuning {
        /// Description of the violated invariant.
        reason: String,
    },
    /// The export budget cannot hold a single record of this payload.
    ExportBufferTooSmall {
        /// Configured budget.
        bytes: usize,
        /// Cost of one export record.
        per_record: usize,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTarget { reason } => write!(f, "invalid neighbour target: {reason}"),
            Self::InvalidLimits { min, max } => {
                write!(f, "radius limits must satisfy 0 < min < max, got {min} .. {max}")
            }
            Self::ZeroIterations => write!(f, "max_iterations must be at least 1"),
            Self::ZeroBatch => write!(f, "neighbor_batch must be at least 1"),
            Self::InvalidTuning { reason } => write!(f, "invalid solver tuning: {reason}"),
            Self::ExportBufferTooSmall { bytes, per_record } => write!(
                f,
                "export budget of {bytes} bytes cannot hold one {per_record}-byte record"
            ),
        }
    }
}

impl Error for ConfigError {}

// ── EngineConfig ───────────────────────────────────────────────────

/// Complete configuration of a [`NeighborLoop`](crate::NeighborLoop).
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Worker threads per rank. `None` = `available_parallelism`.
    pub threads: Option<usize>,
    /// Memory budget for one chunk's transfer buffers, in bytes.
    /// Default: 16 MiB.
    pub export_buffer_bytes: usize,
    /// Cap on bytes held by tagged per-pass allocations. `None` = no cap.
    pub ledger_limit_bytes: Option<usize>,
    /// Pass ceiling for one convergence loop. Default: 200.
    pub max_iterations: u32,
    /// Neighbour-count target.
    pub target: NeighborTarget,
    /// Radius floor and ceiling.
    pub limits: RadiusLimits,
    /// Solver constants.
    pub tuning: SolverTuning,
    /// Neighbours drained from the oracle per call. Default: 256.
    pub neighbor_batch: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threads: None,
            export_buffer_bytes: 16 * 1024 * 1024,
            ledger_limit_bytes: None,
            max_iterations: 200,
            target: NeighborTarget::default(),
            limits: RadiusLimits::default(),
            tuning: SolverTuning::default(),
            neighbor_batch: 256,
        }
    }
}

impl EngineConfig {
    /// Resolve the worker thread count.
    ///
    /// Explicit values are clamped to `[1, 64]`.
    pub fn resolved_threads(&self) -> usize {
        match self.threads {
            Some(n) => n.clamp(1, 64),
            None => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
                .clamp(1, 64),
        }
    }

    /// Validate all structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // 1. Target: finite, positive, deviation strictly inside.
        let t = &self.target;
        if !t.desired.is_finite() || t.desired <= 0.0 {
            return Err(ConfigError::InvalidTarget {
                reason: format!("desired must be finite and positive, got {}", t.desired),
            });
        }
        if !t.deviation.is_finite() || t.deviation < 0.0 || t.deviation >= t.desired {
            return Err(ConfigError::InvalidTarget {
                reason: format!(
                    "deviation must be in [0, desired), got {} for desired {}",
                    t.deviation, t.desired
                ),
            });
        }
        // 2. Limits: 0 < min < max, both finite.
        let l = &self.limits;
        if !l.min.is_finite() || !l.max.is_finite() || l.min <= 0.0 || l.min >= l.max {
            return Err(ConfigError::InvalidLimits {
                min: l.min,
                max: l.max,
            });
        }
        // 3. Loop bounds.
        if self.max_iterations == 0 {
            return Err(ConfigError::ZeroIterations);
        }
        if self.neighbor_batch == 0 {
            return Err(ConfigError::ZeroBatch);
        }
        // 4. Tuning.
        let s = &self.tuning;
        let checks: [(bool, &str, f64); 6] = [
            (s.max_step_factor > 1.0, "max_step_factor must exceed 1", s.max_step_factor),
            (s.max_log_jump > 0.0, "max_log_jump must be positive", s.max_log_jump),
            (s.condition_danger > 0.0, "condition_danger must be positive", s.condition_danger),
            (
                s.max_condition_inflation >= 1.0,
                "max_condition_inflation must be at least 1",
                s.max_condition_inflation,
            ),
            (s.dims > 0.0, "dims must be positive", s.dims),
            (s.min_log_slope > 0.0, "min_log_slope must be positive", s.min_log_slope),
        ];
        for (ok, what, value) in checks {
            if !ok || !value.is_finite() {
                return Err(ConfigError::InvalidTuning {
                    reason: format!("{what}, got {value}"),
                });
            }
        }
        if !(s.collapse_tolerance.is_finite() && s.collapse_tolerance >= 0.0) {
            return Err(ConfigError::InvalidTuning {
                reason: format!(
                    "collapse_tolerance must be finite and non-negative, got {}",
                    s.collapse_tolerance
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(EngineConfig::default().validate(), Ok(()));
    }

    #[test]
    fn explicit_threads_clamped() {
        let mut cfg = EngineConfig::default();
        cfg.threads = Some(0);
        assert_eq!(cfg.resolved_threads(), 1);
        cfg.threads = Some(1000);
        assert_eq!(cfg.resolved_threads(), 64);
        cfg.threads = None;
        assert!((1..=64).contains(&cfg.resolved_threads()));
    }

    #[test]
    fn deviation_must_be_below_target() {
        let mut cfg = EngineConfig::default();
        cfg.target.deviation = 32.0;
        match cfg.validate() {
            Err(ConfigError::InvalidTarget { .. }) => {}
            other => panic!("expected InvalidTarget, got {other:?}"),
        }
    }

    #[test]
    fn limits_clamp_starting_radius() {
        let limits = RadiusLimits { min: 0.1, max: 2.0 };
        assert_eq!(limits.clamp(0.5), 0.5);
        assert_eq!(limits.clamp(50.0), 2.0);
        assert_eq!(limits.clamp(0.0), 0.1);
        assert_eq!(limits.clamp(f64::INFINITY), 2.0);
        assert_eq!(limits.clamp(f64::NAN), 0.1);
    }

    #[test]
    fn inverted_limits_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.limits = RadiusLimits { min: 2.0, max: 1.0 };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::InvalidLimits { min: 2.0, max: 1.0 })
        );
        cfg.limits = RadiusLimits { min: 0.0, max: 1.0 };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_iterations_and_batch_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.max_iterations = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroIterations));
        let mut cfg = EngineConfig::default();
        cfg.neighbor_batch = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroBatch));
    }

    #[test]
    fn step_factor_must_exceed_one() {
        let mut cfg = EngineConfig::default();
        cfg.tuning.max_step_factor = 1.0;
        match cfg.validate() {
            Err(ConfigError::InvalidTuning { reason }) => {
                assert!(reason.contains("max_step_factor"));
            }
            other => panic!("expected InvalidTuning, got {other:?}"),
        }
    }

    #[test]
    fn nan_tuning_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.tuning.condition_danger = f64::NAN;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidTuning { .. })
        ));
    }
}
