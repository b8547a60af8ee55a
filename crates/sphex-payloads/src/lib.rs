//! Reference payloads for the sphex engine.
//!
//! Test-grade physics that exercises the full engine pipeline:
//!
//! - [`DensityPayload`]: SPH density with the cubic-spline kernel. Its
//!   observation is the kernel-weighted neighbour count, the analytic
//!   `d ln N / d ln h`, and the moment-matrix condition number.
//! - [`NeighborMassPayload`]: top-hat count, mass and momentum of the
//!   neighbours of one species around particles of another.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod density;
pub mod kernel;
pub mod neighbor_mass;

pub use density::{DensityOutput, DensityPartial, DensityPayload};
pub use kernel::{cubic_spline, cubic_spline_dh, cubic_spline_dr, effective_neighbors};
pub use neighbor_mass::{NeighborMassOutput, NeighborMassPartial, NeighborMassPayload};
