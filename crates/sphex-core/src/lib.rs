//! Core types and traits for the sphex neighbour-evaluation engine.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the particle data model, strongly-typed identifiers, the export
//! bookkeeping shared between the oracle and the scheduler, and the two
//! seams every physics module plugs into: [`NeighborOracle`] and
//! [`Payload`].

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod conditioning;
pub mod error;
pub mod export;
pub mod id;
pub mod oracle;
pub mod particle;
pub mod payload;

pub use conditioning::{Conditioned, Matrix3};
pub use error::SearchError;
pub use export::{ExportBookkeeping, ExportBuffer, QueryRecord, NODE_LIST_LEN};
pub use id::{BranchId, MessageTag, ParticleId, Rank, TagPair};
pub use oracle::{NeighborOracle, SearchCursor, SearchMode, SearchOrigin};
pub use particle::{Activity, Bracket, Particle, ParticleKind, Pin};
pub use payload::{merge, Finished, MergeMode, Observation, Pair, Partial, Payload};
