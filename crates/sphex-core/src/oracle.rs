//! The neighbour-oracle seam and its resumable search cursor.
//!
//! The engine never walks a spatial index itself. It asks a
//! [`NeighborOracle`] for a [`SearchCursor`] and then drains neighbours
//! from it in bounded batches, so that a search can be suspended and
//! resumed without holding an unbounded neighbour list.

use crate::error::SearchError;
use crate::export::ExportBookkeeping;
use crate::id::BranchId;

/// Where a search begins.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchOrigin<'a> {
    /// Local particle: start at the global root. Branches owned by
    /// other ranks are exported.
    Root,
    /// Imported query: resume from exactly these (locally owned)
    /// branches. Nothing is exported.
    Branches(&'a [BranchId]),
}

/// Whether a cursor was started for a local or an imported query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchMode {
    /// Started at the root for a local particle.
    Local,
    /// Started from a shipped branch list.
    Remote,
}

/// Resumable state of one neighbour search.
///
/// Holds the sphere being searched, the branches still to visit, and the
/// position inside the branch currently being scanned. Oracles own the
/// meaning of the scan offset.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchCursor {
    center: [f64; 3],
    radius: f64,
    mode: SearchMode,
    pending: Vec<BranchId>,
    current: Option<(BranchId, usize)>,
}

impl SearchCursor {
    /// A cursor that will visit `branches` in order.
    pub fn new(center: [f64; 3], radius: f64, mode: SearchMode, branches: &[BranchId]) -> Self {
        Self {
            center,
            radius,
            mode,
            pending: branches.iter().rev().copied().collect(),
            current: None,
        }
    }

    /// Search centre.
    pub fn center(&self) -> [f64; 3] {
        self.center
    }

    /// Search radius.
    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// Local or remote search.
    pub fn mode(&self) -> SearchMode {
        self.mode
    }

    /// Nothing left to visit.
    pub fn is_exhausted(&self) -> bool {
        self.pending.is_empty() && self.current.is_none()
    }

    /// Branches not yet opened.
    pub fn remaining_branches(&self) -> usize {
        self.pending.len()
    }

    /// Take the suspended scan position, or open the next branch at
    /// offset zero.
    pub fn resume(&mut self) -> Option<(BranchId, usize)> {
        self.current
            .take()
            .or_else(|| self.pending.pop().map(|b| (b, 0)))
    }

    /// Park the scan of `branch` at `offset` for the next call.
    pub fn suspend(&mut self, branch: BranchId, offset: usize) {
        self.current = Some((branch, offset));
    }
}

/// External spatial index answering "who is within `radius` of this
/// point?".
///
/// Implementations must be safe to call concurrently from several
/// threads, each with its own cursor and bookkeeping.
pub trait NeighborOracle: Sync {
    /// Begin a search around `center`.
    fn start(&self, center: [f64; 3], radius: f64, origin: SearchOrigin<'_>) -> SearchCursor;

    /// Continue the search, replacing `out` with at most `limit` local
    /// particle indices inside the sphere.
    ///
    /// Returns the number of neighbours written. A return of zero with
    /// an exhausted cursor ends the search. In local mode every branch
    /// owned by another rank is reported to `exports` before the call
    /// returns.
    ///
    /// # Errors
    ///
    /// [`SearchError::ExportBufferFull`] if `exports` could not reserve
    /// a record. The cursor must then be discarded.
    fn find_neighbors(
        &self,
        cursor: &mut SearchCursor,
        exports: &mut ExportBookkeeping<'_>,
        out: &mut Vec<usize>,
        limit: usize,
    ) -> Result<usize, SearchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_visits_branches_in_order() {
        let branches = [BranchId(4), BranchId(1), BranchId(9)];
        let mut c = SearchCursor::new([0.0; 3], 1.0, SearchMode::Remote, &branches);
        assert_eq!(c.resume(), Some((BranchId(4), 0)));
        c.suspend(BranchId(4), 17);
        assert_eq!(c.resume(), Some((BranchId(4), 17)));
        assert_eq!(c.resume(), Some((BranchId(1), 0)));
        assert_eq!(c.resume(), Some((BranchId(9), 0)));
        assert!(c.is_exhausted());
        assert_eq!(c.resume(), None);
    }

    #[test]
    fn empty_cursor_is_exhausted() {
        let c = SearchCursor::new([1.0, 2.0, 3.0], 0.5, SearchMode::Local, &[]);
        assert!(c.is_exhausted());
        assert_eq!(c.center(), [1.0, 2.0, 3.0]);
        assert_eq!(c.mode(), SearchMode::Local);
    }
}
