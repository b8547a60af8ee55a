//! Strongly-typed identifiers for particles, ranks, tree branches and
//! message tags.

use std::fmt;

/// Globally unique particle identity.
///
/// Stable across ranks: a particle keeps its id when it is exported as a
/// query, which is what diagnostics print.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticleId(pub u64);

impl fmt::Display for ParticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ParticleId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Index of a worker process taking part in the distributed exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rank(pub u32);

impl Rank {
    /// The rank as a `usize`, for indexing per-rank count arrays.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Rank {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Identifies a top-level branch of the spatial index.
///
/// Branches are the unit of domain ownership: every branch belongs to
/// exactly one rank, and a remote search resumes from a list of them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BranchId(pub u32);

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for BranchId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Tag attached to every message so that receivers only match traffic
/// from the engine instance (and exchange direction) they expect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageTag(pub u32);

impl MessageTag {
    /// Bit reserved for engine control traffic (count negotiation and
    /// reductions) derived from a module's tags.
    pub const CONTROL_BIT: u32 = 1 << 31;

    /// The control-channel tag paired with this data tag.
    pub fn control(self) -> Self {
        Self(self.0 | Self::CONTROL_BIT)
    }

    /// Whether this tag lives in the control namespace.
    pub fn is_control(self) -> bool {
        self.0 & Self::CONTROL_BIT != 0
    }
}

impl fmt::Display for MessageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// The pair of tags a physics module uses, one per exchange direction.
///
/// Two engines running over the same communicator must use distinct
/// pairs; [`TagPair::for_module`] derives a non-overlapping pair from a
/// small module number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TagPair {
    /// Tag for queries shipped to the ranks owning remote branches.
    pub query: MessageTag,
    /// Tag for partial results shipped back to the exporting rank.
    pub result: MessageTag,
}

impl TagPair {
    /// Derive the tag pair for module number `module`.
    ///
    /// Module `n` uses tags `2n` (queries) and `2n + 1` (results).
    pub fn for_module(module: u16) -> Self {
        let base = u32::from(module) * 2;
        Self {
            query: MessageTag(base),
            result: MessageTag(base + 1),
        }
    }

    /// Whether any tag of `self` collides with any tag of `other`.
    pub fn overlaps(&self, other: &TagPair) -> bool {
        let mine = [self.query, self.result];
        let theirs = [other.query, other.result];
        mine.iter().any(|t| theirs.contains(t))
    }
}
