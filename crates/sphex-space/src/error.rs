//! Error types for grid construction.

use std::fmt;

use sphex_core::{BranchId, Rank};

/// Errors arising from grid or oracle construction.
#[derive(Debug, Clone, PartialEq)]
pub enum SpaceError {
    /// A grid with zero branches along some axis.
    EmptyGrid,
    /// Bounds with `min >= max` or non-finite corners.
    InvalidBounds {
        /// What went wrong.
        reason: String,
    },
    /// `owners.len()` does not match the branch count.
    OwnerCountMismatch {
        /// Branches in the grid.
        branches: usize,
        /// Owners supplied.
        owners: usize,
    },
    /// A slab decomposition was requested for more ranks than x-slabs.
    TooManyRanks {
        /// Ranks requested.
        ranks: usize,
        /// Slabs available.
        slabs: usize,
    },
    /// A local particle lies in a branch owned by another rank.
    ForeignParticle {
        /// Local index of the particle.
        index: usize,
        /// Branch it falls into.
        branch: BranchId,
        /// Owner of that branch.
        owner: Rank,
    },
}

impl fmt::Display for SpaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyGrid => write!(f, "grid must have at least one branch per axis"),
            Self::InvalidBounds { reason } => write!(f, "invalid bounds: {reason}"),
            Self::OwnerCountMismatch { branches, owners } => {
                write!(f, "{owners} owners supplied for {branches} branches")
            }
            Self::TooManyRanks { ranks, slabs } => {
                write!(f, "cannot split {slabs} slabs across {ranks} ranks")
            }
            Self::ForeignParticle {
                index,
                branch,
                owner,
            } => write!(
                f,
                "local particle {index} lies in branch {branch} owned by rank {owner}"
            ),
        }
    }
}

impl std::error::Error for SpaceError {}
