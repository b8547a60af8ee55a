//! Reference spatial index for the sphex engine.
//!
//! The simulation's real tree is an external collaborator; this crate
//! provides the smallest index that exercises the full oracle contract:
//!
//! - [`DomainGrid`]: a uniform grid of top-level branches, each owned by
//!   one rank. Shared by every rank of a run.
//! - [`GridOracle`]: per-rank [`NeighborOracle`](sphex_core::NeighborOracle)
//!   that scans owned branches and exports the rest.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod error;
pub mod grid;
pub mod oracle;

#[cfg(test)]
pub(crate) mod compliance;

pub use error::SpaceError;
pub use grid::{Aabb, DomainGrid};
pub use oracle::GridOracle;
