//! Adaptive neighbour evaluation over a distributed particle set.
//!
//! [`NeighborLoop`] drives a [`Payload`](sphex_core::Payload) to
//! convergence: each pass evaluates the active particles in chunks sized
//! by the export buffer, ships queries to the ranks owning remote
//! branches, merges the partial sums that come back, and lets the
//! [`BracketSolver`] adjust every particle's radius until its neighbour
//! count is accepted.
//!
//! The pieces are usable on their own: [`Scheduler`] for chunking with
//! rollback, [`Evaluator`] for the two-phase walk, [`MergeTable`] for
//! folding partials, [`BufferLedger`] for tagged buffer accounting.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod diagnostics;
pub mod driver;
pub mod evaluator;
pub mod ledger;
pub mod merge;
pub mod metrics;
pub mod scheduler;
pub mod solver;

pub use config::{ConfigError, EngineConfig, NeighborTarget, RadiusLimits, SolverTuning};
pub use diagnostics::describe;
pub use driver::NeighborLoop;
pub use evaluator::{Evaluator, Shipped};
pub use ledger::{AllocError, BufferLedger};
pub use merge::MergeTable;
pub use metrics::{ConvergenceReport, PassMetrics, VerdictTally};
pub use scheduler::{chunk_capacity, per_record_bytes, repartition, ScheduleError, Scheduler};
pub use solver::{BracketSolver, Tolerance, Verdict};
