//! Test utilities and mock payloads for sphex development.
//!
//! - [`fixtures`]: seeded particle clouds, rank partitioning and a
//!   brute-force neighbour reference.
//! - [`mocks`]: small [`Payload`](sphex_core::Payload) implementations
//!   whose results are easy to predict.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;
pub mod mocks;

pub use fixtures::{brute_force_neighbors, partition, uniform_cube, ParticleCloud};
pub use mocks::{CountPayload, CountPartial};
