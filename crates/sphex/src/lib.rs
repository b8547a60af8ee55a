//! sphex: adaptive neighbour evaluation and distributed exchange for
//! particle simulations.
//!
//! This is the top-level facade crate that re-exports the public API of
//! the sphex sub-crates.
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use sphex::prelude::*;
//!
//! // A 4x4x4 lattice on one rank.
//! let grid = Arc::new(DomainGrid::slabs(Aabb::unit(), [2, 2, 2], 1).unwrap());
//! let c = |k: u64| (k as f64 + 0.5) / 4.0;
//! let mut particles: Vec<Particle> = (0..64u64)
//!     .map(|i| Particle::new(i, [c(i % 4), c(i / 4 % 4), c(i / 16)], 1.0, 0.1))
//!     .collect();
//! let oracle = GridOracle::build(Arc::clone(&grid), Rank(0), &particles).unwrap();
//!
//! let config = EngineConfig {
//!     target: NeighborTarget { desired: 8.0, deviation: 2.0 },
//!     ..EngineConfig::default()
//! };
//! let payload = NeighborMassPayload::new(ParticleKind::Gas, ParticleKind::Gas);
//! let mut engine = NeighborLoop::new(config, payload).unwrap();
//!
//! let mut comm = LocalCluster::new(1).unwrap().endpoints().remove(0);
//! let mut outputs = vec![NeighborMassOutput::default(); particles.len()];
//! let report = engine.run(&mut comm, &oracle, &mut particles, &mut outputs);
//! assert_eq!(report.verdicts.total(), 64);
//! assert!(particles.iter().all(|p| !p.is_active()));
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `sphex-core` | Ids, particles, the payload and oracle traits |
//! | [`space`] | `sphex-space` | Reference domain grid and neighbour oracle |
//! | [`comm`] | `sphex-comm` | Communicator, local cluster, exchange, reductions |
//! | [`engine`] | `sphex-engine` | Solver, scheduler, evaluator, merge, driver |
//! | [`payloads`] | `sphex-payloads` | Reference density and census payloads |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types and traits (`sphex-core`).
///
/// Implement [`types::Payload`] to add a physics module and
/// [`types::NeighborOracle`] to plug in a spatial index.
pub use sphex_core as types;

/// Reference spatial index (`sphex-space`).
pub use sphex_space as space;

/// Message passing between ranks (`sphex-comm`).
///
/// [`comm::LocalCluster`] runs every rank as a thread of this process.
pub use sphex_comm as comm;

/// The neighbour-evaluation engine (`sphex-engine`).
///
/// [`engine::NeighborLoop`] is the entry point.
pub use sphex_engine as engine;

/// Reference payloads (`sphex-payloads`).
pub use sphex_payloads as payloads;

/// Common imports for typical sphex usage.
///
/// ```rust
/// use sphex::prelude::*;
/// ```
pub mod prelude {
    // Core types and traits
    pub use sphex_core::{
        Finished, NeighborOracle, Observation, Pair, Partial, Particle, ParticleId, ParticleKind,
        Payload, Rank, TagPair,
    };

    // Space
    pub use sphex_space::{Aabb, DomainGrid, GridOracle};

    // Communication
    pub use sphex_comm::{AbortCode, ClusterError, Communicator, LocalCluster};

    // Engine
    pub use sphex_engine::{
        ConvergenceReport, EngineConfig, NeighborLoop, NeighborTarget, PassMetrics, RadiusLimits,
    };

    // Payloads
    pub use sphex_payloads::{
        DensityOutput, DensityPayload, NeighborMassOutput, NeighborMassPayload,
    };
}
