//! Oracle contract checks against a brute-force reference.
//!
//! A distributed search is correct when the union of the local walk and
//! every remote walk started from the exported branch lists equals the
//! brute-force neighbour set over the whole particle population.

use std::sync::Arc;

use sphex_core::{
    ExportBookkeeping, ExportBuffer, NeighborOracle, Particle, ParticleId, Rank, SearchCursor,
    SearchOrigin,
};
use sphex_test_utils::{brute_force_neighbors, partition};

use crate::grid::DomainGrid;
use crate::oracle::GridOracle;

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
            return all;
        }
    }
}

/// Assert that local plus exported searches find exactly the brute-force
/// neighbour set of every particle.
pub fn assert_distributed_search_complete(
    grid: &Arc<DomainGrid>,
    ranks: usize,
    particles: &[Particle],
    radius: f64,
    limit: usize,
) {
    let locals = partition(particles, ranks, |p| grid.owner_of(p));
    let oracles: Vec<GridOracle> = locals
        .iter()
        .enumerate()
        .map(|(r, ps)| GridOracle::build(Arc::clone(grid), Rank(r as u32), ps).unwrap())
        .collect();

    for (r, ps) in locals.iter().enumerate() {
        for (i, p) in ps.iter().enumerate() {
            let buffer = ExportBuffer::new(usize::MAX);
            let mut book = ExportBookkeeping::new(&buffer);
            book.begin(i, i);
            let mut cursor = oracles[r].start(p.pos, radius, SearchOrigin::Root);
            let mut found: Vec<ParticleId> = drain(&oracles[r], &mut cursor, &mut book, limit)
                .into_iter()
                .map(|j| ps[j].id)
                .collect();
            book.commit();
            drop(book);

            for record in buffer.into_records() {
                assert_ne!(record.dest, Rank(r as u32), "exported to self");
                let dest = record.dest.index();
                let mut remote = oracles[dest].start(
                    p.pos,
                    radius,
                    SearchOrigin::Branches(&record.branches),
                );
                let scratch = ExportBuffer::new(0);
                let mut none = ExportBookkeeping::new(&scratch);
                found.extend(
                    drain(&oracles[dest], &mut remote, &mut none, limit)
                        .into_iter()
                        .map(|j| locals[dest][j].id),
                );
                assert!(none.staged().is_empty(), "remote walk exported");
            }

            found.sort_unstable();
            let mut expected: Vec<ParticleId> = brute_force_neighbors(particles, p.pos, radius)
                .into_iter()
                .map(|j| particles[j].id)
                .collect();
            expected.sort_unstable();
            assert_eq!(found, expected, "particle {} on rank {r}", p.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Aabb;
    use proptest::prelude::*;
    use sphex_test_utils::uniform_cube;

    #[test]
    fn single_rank_matches_brute_force() {
        let grid = Arc::new(DomainGrid::slabs(Aabb::unit(), [4, 4, 4], 1).unwrap());
        let cloud = uniform_cube(200, 1.0, 0.1, 11);
        assert_distributed_search_complete(&grid, 1, &cloud.particles, 0.15, 7);
    }

    #[test]
    fn four_ranks_match_brute_force() {
        let grid = Arc::new(DomainGrid::slabs(Aabb::unit(), [4, 3, 2], 4).unwrap());
        let cloud = uniform_cube(200, 1.0, 0.1, 12);
        assert_distributed_search_complete(&grid, 4, &cloud.particles, 0.3, 3);
    }

    #[test]
    fn radius_larger_than_domain() {
        let grid = Arc::new(DomainGrid::slabs(Aabb::unit(), [3, 3, 3], 3).unwrap());
        let cloud = uniform_cube(60, 1.0, 0.1, 13);
        assert_distributed_search_complete(&grid, 3, &cloud.particles, 5.0, 16);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn any_split_matches_brute_force(
            seed in 0u64..1000,
            ranks in 1usize..=4,
            radius in 0.01f64..0.6,
            limit in 1usize..20,
        ) {
            let grid = Arc::new(DomainGrid::slabs(Aabb::unit(), [4, 2, 2], ranks).unwrap());
            let cloud = uniform_cube(80, 1.0, 0.1, seed);
            assert_distributed_search_complete(&grid, ranks, &cloud.particles, radius, limit);
        }
    }
}
