//! Per-rank neighbour oracle over a [`DomainGrid`].

use std::sync::Arc;

use sphex_core::{
    BranchId, ExportBookkeeping, NeighborOracle, Particle, Rank, SearchCursor, SearchError,
    SearchMode, SearchOrigin,
};

use crate::error::SpaceError;
use crate::grid::DomainGrid;

/// Brute-force-within-branch neighbour oracle for one rank.
///
/// Positions are copied at build time, so the caller may mutate its
/// particles (radii, outputs) while the oracle is in use. A moved
/// particle requires a rebuild.
#[derive(Clone, Debug)]
pub struct GridOracle {
    grid: Arc<DomainGrid>,
    rank: Rank,
    positions: Vec<[f64; 3]>,
    members: Vec<Vec<u32>>,
}

impl GridOracle {
    /// Index the local `particles` of `rank`.
    ///
    /// # Errors
    ///
    /// [`SpaceError::ForeignParticle`] if a particle lies in a branch
    /// the grid assigns to another rank.
    pub fn build(
        grid: Arc<DomainGrid>,
        rank: Rank,
        particles: &[Particle],
    ) -> Result<Self, SpaceError> {
        let mut members = vec![Vec::new(); grid.branch_count()];
        let mut positions = Vec::with_capacity(particles.len());
        for (index, p) in particles.iter().enumerate() {
            let branch = grid.branch_of(p.pos);
            let owner = grid.owner(branch);
            if owner != rank {
                return Err(SpaceError::ForeignParticle {
                    index,
                    branch,
                    owner,
                });
            }
            members[branch.0 as usize].push(index as u32);
            positions.push(p.pos);
        }
        Ok(Self {
            grid,
            rank,
            positions,
            members,
        })
    }

    /// The shared grid.
    pub fn grid(&self) -> &DomainGrid {
        &self.grid
    }

    /// Rank this oracle answers for.
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Number of indexed particles.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether no particle is indexed.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    fn is_local(&self, branch: BranchId) -> bool {
        self.grid.owner(branch) == self.rank
    }
}

impl NeighborOracle for GridOracle {
    fn start(&self, center: [f64; 3], radius: f64, origin: SearchOrigin<'_>) -> SearchCursor {
        match origin {
            SearchOrigin::Root => {
                // Foreign branches first: all exports happen on the first call.
                let mut branches = self.grid.branches_within(center, radius);
                branches.sort_by_key(|&b| self.is_local(b));
                SearchCursor::new(center, radius, SearchMode::Local, &branches)
            }
            SearchOrigin::Branches(list) => {
                let owned: Vec<BranchId> =
                    list.iter().copied().filter(|&b| self.is_local(b)).collect();
                SearchCursor::new(center, radius, SearchMode::Remote, &owned)
            }
        }
    }

    fn find_neighbors(
        &self,
        cursor: &mut SearchCursor,
        exports: &mut ExportBookkeeping<'_>,
        out: &mut Vec<usize>,
        limit: usize,
    ) -> Result<usize, SearchError> {
        out.clear();
        let limit = limit.max(1);
        let center = cursor.center();
        let r2max = cursor.radius() * cursor.radius();

        while out.len() < limit {
            let Some((branch, offset)) = cursor.resume() else {
                break;
            };
            if !self.is_local(branch) {
                if cursor.mode() == SearchMode::Local {
                    exports.export(self.grid.owner(branch), branch)?;
                }
                continue;
            }
            let members = &self.members[branch.0 as usize];
            for (i, &m) in members.iter().enumerate().skip(offset) {
                if out.len() == limit {
                    cursor.suspend(branch, i);
                    return Ok(out.len());
                }
                let p = self.positions[m as usize];
                let dx = center[0] - p[0];
                let dy = center[1] - p[1];
                let dz = center[2] - p[2];
                if dx * dx + dy * dy + dz * dz < r2max {
                    out.push(m as usize);
                }
            }
        }
        Ok(out.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Aabb;
    use sphex_core::ExportBuffer;

    fn two_rank_grid() -> Arc<DomainGrid> {
        Arc::new(DomainGrid::slabs(Aabb::unit(), [2, 1, 1], 2).unwrap())
    }

    fn drain(
        oracle: &GridOracle,
        cursor: &mut SearchCursor,
        book: &mut ExportBookkeeping<'_>,
        limit: usize,
    ) -> Vec<usize> {
        let mut all = Vec::new();
        let mut out = Vec::new();
        loop {
            let n = oracle.find_neighbors(cursor, book, &mut out, limit).unwrap();
            all.extend_from_slice(&out);
            if n == 0 && cursor.is_exhausted() {
                break;
            }
        }
        all.sort_unstable();
        all
    }

    #[test]
    fn foreign_particle_rejected() {
        let grid = two_rank_grid();
        let ps = vec![Particle::new(0, [0.9, 0.5, 0.5], 1.0, 0.1)];
        let err = GridOracle::build(grid, Rank(0), &ps).unwrap_err();
        assert!(matches!(err, SpaceError::ForeignParticle { index: 0, .. }));
    }

    #[test]
    fn local_search_exports_remote_branch_once() {
        let grid = two_rank_grid();
        let ps = vec![
            Particle::new(0, [0.45, 0.5, 0.5], 1.0, 0.1),
            Particle::new(1, [0.40, 0.5, 0.5], 1.0, 0.1),
            Particle::new(2, [0.10, 0.5, 0.5], 1.0, 0.1),
        ];
        let oracle = GridOracle::build(grid, Rank(0), &ps).unwrap();
        let buffer = ExportBuffer::new(4);
        let mut book = ExportBookkeeping::new(&buffer);
        book.begin(0, 0);
        let mut cursor = oracle.start(ps[0].pos, 0.1, SearchOrigin::Root);
        let found = drain(&oracle, &mut cursor, &mut book, 1);
        assert_eq!(found, vec![0, 1]);
        assert_eq!(book.staged().len(), 1);
        assert_eq!(book.staged()[0].dest, Rank(1));
        assert_eq!(book.staged()[0].branches.as_slice(), &[BranchId(1)]);
    }

    #[test]
    fn remote_search_never_exports() {
        let grid = two_rank_grid();
        let ps = vec![Particle::new(0, [0.55, 0.5, 0.5], 1.0, 0.1)];
        let oracle = GridOracle::build(grid, Rank(1), &ps).unwrap();
        let buffer = ExportBuffer::new(0);
        let mut book = ExportBookkeeping::new(&buffer);
        let branches = [BranchId(0), BranchId(1)];
        let mut cursor = oracle.start(
            [0.45, 0.5, 0.5],
            0.2,
            SearchOrigin::Branches(&branches),
        );
        let found = drain(&oracle, &mut cursor, &mut book, 8);
        assert_eq!(found, vec![0]);
        assert!(book.staged().is_empty());
    }

    #[test]
    fn full_buffer_surfaces_error() {
        let grid = two_rank_grid();
        let ps = vec![Particle::new(0, [0.45, 0.5, 0.5], 1.0, 0.1)];
        let oracle = GridOracle::build(grid, Rank(0), &ps).unwrap();
        let buffer = ExportBuffer::new(0);
        let mut book = ExportBookkeeping::new(&buffer);
        book.begin(0, 0);
        let mut cursor = oracle.start(ps[0].pos, 0.1, SearchOrigin::Root);
        let mut out = Vec::new();
        assert_eq!(
            oracle.find_neighbors(&mut cursor, &mut book, &mut out, 8),
            Err(SearchError::ExportBufferFull)
        );
        assert!(buffer.is_full());
    }

    #[test]
    fn boundary_distance_is_exclusive() {
        let grid = Arc::new(DomainGrid::slabs(Aabb::unit(), [1, 1, 1], 1).unwrap());
        let ps = vec![
            Particle::new(0, [0.5, 0.5, 0.5], 1.0, 0.1),
            Particle::new(1, [0.75, 0.5, 0.5], 1.0, 0.1),
        ];
        let oracle = GridOracle::build(grid, Rank(0), &ps).unwrap();
        let buffer = ExportBuffer::new(0);
        let mut book = ExportBookkeeping::new(&buffer);
        let mut cursor = oracle.start(ps[0].pos, 0.25, SearchOrigin::Root);
        assert_eq!(drain(&oracle, &mut cursor, &mut book, 8), vec![0]);
    }
}
