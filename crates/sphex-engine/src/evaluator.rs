//! Two-phase parallel evaluation.
//!
//! The local phase walks this rank's particles from the root of the
//! spatial index; the remote phase walks queries imported from other
//! ranks from the branch lists they arrived with. Both run the same
//! neighbour loop on a scoped thread pool whose workers pull positions
//! from a shared [`WorkCursor`]. Workers only read particles; each keeps
//! its own export bookkeeping and result list.

use std::panic;
use std::thread;

use smallvec::SmallVec;
use sphex_core::{
    BranchId, ExportBookkeeping, ExportBuffer, NeighborOracle, Pair, Particle, ParticleId,
    Payload, SearchError, SearchOrigin, NODE_LIST_LEN,
};

use crate::scheduler::{LocalPhase, LocalResult, WorkCursor};

/// A query as it travels to the rank owning `branches`.
#[derive(Clone, Debug, PartialEq)]
pub struct Shipped<Q> {
    /// Identity of the exporting particle, for diagnostics.
    pub source: ParticleId,
    /// Search centre.
    pub center: [f64; 3],
    /// Search radius.
    pub radius: f64,
    /// Branches on the receiving rank to search.
    pub branches: SmallVec<[BranchId; NODE_LIST_LEN]>,
    /// Payload-specific query data.
    pub query: Q,
}

/// Neighbour-loop runner over one rank's particles.
pub struct Evaluator<'a, P, O> {
    payload: &'a P,
    oracle: &'a O,
    particles: &'a [Particle],
    batch: usize,
}

impl<'a, P, O> Evaluator<'a, P, O>
where
    P: Payload,
    O: NeighborOracle,
{
    /// Runner draining up to `batch` neighbours per oracle call.
    pub fn new(payload: &'a P, oracle: &'a O, particles: &'a [Particle], batch: usize) -> Self {
        Self {
            payload,
            oracle,
            particles,
            batch: batch.max(1),
        }
    }

    /// Accumulate every neighbour of the sphere into a fresh partial.
    fn walk(
        &self,
        query: &P::Query,
        center: [f64; 3],
        radius: f64,
        origin: SearchOrigin<'_>,
        book: &mut ExportBookkeeping<'_>,
        scratch: &mut Vec<usize>,
    ) -> Result<P::Partial, SearchError> {
        let mut acc = P::Partial::default();
        let mut cursor = self.oracle.start(center, radius, origin);
        loop {
            self.oracle
                .find_neighbors(&mut cursor, book, scratch, self.batch)?;
            for &j in scratch.iter() {
                let neighbor = &self.particles[j];
                let pair = Pair::between(center, neighbor.pos);
                self.payload.interact(query, radius, neighbor, &pair, &mut acc);
            }
            if cursor.is_exhausted() {
                return Ok(acc);
            }
        }
    }

    fn local_worker(
        &self,
        worklist: &[usize],
        cursor: &WorkCursor,
        buffer: &ExportBuffer,
    ) -> Vec<LocalResult<P::Partial>> {
        let mut book = ExportBookkeeping::new(buffer);
        let mut scratch = Vec::with_capacity(self.batch);
        let mut out = Vec::new();
        while !buffer.is_full() {
            let Some(i) = cursor.claim() else { break };
            let target = worklist[i];
            let p = &self.particles[target];
            book.begin(target, i);
            let query = self.payload.query(p);
            match self.walk(
                &query,
                p.pos,
                p.radius,
                SearchOrigin::Root,
                &mut book,
                &mut scratch,
            ) {
                Ok(partial) => {
                    book.commit();
                    out.push(LocalResult {
                        origin: i,
                        target,
                        partial,
                    });
                }
                Err(SearchError::ExportBufferFull) => break,
            }
        }
        out
    }

    /// Evaluate worklist positions from `start` until the worklist is
    /// exhausted or `buffer` fills.
    pub fn local_phase(
        &self,
        worklist: &[usize],
        start: usize,
        buffer: &ExportBuffer,
        threads: usize,
    ) -> LocalPhase<P::Partial> {
        let cursor = WorkCursor::new(start, worklist.len());
        let threads = threads.min(worklist.len().saturating_sub(start)).max(1);
        let finished = self.on_pool("sphex-local", threads, || {
            self.local_worker(worklist, &cursor, buffer)
        });
        LocalPhase {
            finished: finished.into_iter().flatten().collect(),
            claimed_end: cursor.position(),
        }
    }

    /// Evaluate every imported query, returning partials in import order.
    ///
    /// # Errors
    ///
    /// [`SearchError::ExportBufferFull`] if the oracle tried to export
    /// from an imported query.
    pub fn remote_phase(
        &self,
        imported: &[Shipped<P::Query>],
        threads: usize,
        results: &mut Vec<P::Partial>,
    ) -> Result<(), SearchError> {
        let cursor = WorkCursor::new(0, imported.len());
        let sink = ExportBuffer::new(0);
        let threads = threads.min(imported.len()).max(1);
        let per_worker = self.on_pool("sphex-remote", threads, || -> Result<_, SearchError> {
            let mut book = ExportBookkeeping::new(&sink);
            let mut scratch = Vec::with_capacity(self.batch);
            let mut out = Vec::new();
            while let Some(i) = cursor.claim() {
                let s = &imported[i];
                book.begin(i, i);
                let partial = self.walk(
                    &s.query,
                    s.center,
                    s.radius,
                    SearchOrigin::Branches(&s.branches),
                    &mut book,
                    &mut scratch,
                )?;
                out.push((i, partial));
            }
            Ok(out)
        });

        results.clear();
        results.resize_with(imported.len(), Default::default);
        for worker in per_worker {
            for (i, partial) in worker? {
                results[i] = partial;
            }
        }
        Ok(())
    }

    /// Run `work` on `threads` workers: helpers on named scoped threads
    /// plus the calling thread. A helper that cannot be spawned is
    /// skipped; the remaining workers drain the cursor.
    fn on_pool<R, W>(&self, name: &str, threads: usize, work: W) -> Vec<R>
    where
        R: Send,
        W: Fn() -> R + Sync,
    {
        if threads <= 1 {
            return vec![work()];
        }
        thread::scope(|s| {
            let mut handles = Vec::with_capacity(threads - 1);
            for k in 1..threads {
                match thread::Builder::new()
                    .name(format!("{name}-{k}"))
                    .spawn_scoped(s, &work)
                {
                    Ok(h) => handles.push(h),
                    Err(e) => log::warn!("{name}: could not spawn worker {k}: {e}"),
                }
            }
            let mut results = vec![work()];
            for h in handles {
                match h.join() {
                    Ok(r) => results.push(r),
                    Err(payload) => panic::resume_unwind(payload),
                }
            }
            results
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use sphex_core::Rank;
    use sphex_space::{Aabb, DomainGrid, GridOracle};
    use sphex_test_utils::{brute_force_neighbors, uniform_cube, CountPartial, CountPayload};

    fn setup(n: usize, ranks: usize) -> (Arc<DomainGrid>, Vec<Particle>) {
        let grid = Arc::new(DomainGrid::slabs(Aabb::unit(), [4, 2, 2], ranks).unwrap());
        let cloud = uniform_cube(n, 1.0, 0.15, 21);
        (grid, cloud.particles)
    }

    #[test]
    fn single_rank_counts_match_brute_force() {
        let (grid, ps) = setup(300, 1);
        let oracle = GridOracle::build(grid, Rank(0), &ps).unwrap();
        let payload = CountPayload::new();
        let eval = Evaluator::new(&payload, &oracle, &ps, 5);
        let worklist: Vec<usize> = (0..ps.len()).collect();
        let buffer = ExportBuffer::new(0);
        let phase = eval.local_phase(&worklist, 0, &buffer, 4);

        assert_eq!(phase.finished.len(), ps.len());
        assert_eq!(phase.claimed_end, ps.len());
        for r in &phase.finished {
            let expected = brute_force_neighbors(&ps, ps[r.target].pos, 0.15).len();
            assert_eq!(r.partial.count, expected as f64);
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn local_phase_from_offset() {
        let (grid, ps) = setup(50, 1);
        let oracle = GridOracle::build(grid, Rank(0), &ps).unwrap();
        let payload = CountPayload::new();
        let eval = Evaluator::new(&payload, &oracle, &ps, 64);
        let worklist: Vec<usize> = (0..ps.len()).rev().collect();
        let buffer = ExportBuffer::new(0);
        let phase = eval.local_phase(&worklist, 40, &buffer, 3);
        let mut origins: Vec<usize> = phase.finished.iter().map(|r| r.origin).collect();
        origins.sort_unstable();
        assert_eq!(origins, (40..50).collect::<Vec<_>>());
        assert!(phase.finished.iter().all(|r| r.target == worklist[r.origin]));
    }

    #[test]
    fn remote_phase_fills_results_in_import_order() {
        let (grid, ps) = setup(200, 2);
        let mine: Vec<Particle> = ps
            .iter()
            .filter(|p| grid.owner_of(p.pos) == Rank(1))
            .cloned()
            .collect();
        let oracle = GridOracle::build(Arc::clone(&grid), Rank(1), &mine).unwrap();
        let payload = CountPayload::new();
        let eval = Evaluator::new(&payload, &oracle, &mine, 3);

        let centers = [[0.45, 0.5, 0.5], [0.3, 0.2, 0.8], [0.49, 0.9, 0.1]];
        let imported: Vec<Shipped<f64>> = centers
            .iter()
            .map(|&c| Shipped {
                source: ParticleId(0),
                center: c,
                radius: 0.2,
                branches: grid.branches_within(c, 0.2).into_iter().collect(),
                query: 1.0,
            })
            .collect();
        let mut results = Vec::new();
        eval.remote_phase(&imported, 2, &mut results).unwrap();

        assert_eq!(results.len(), 3);
        for (c, r) in centers.iter().zip(&results) {
            let expected = brute_force_neighbors(&mine, *c, 0.2).len() as f64;
            assert_eq!(r, &CountPartial { count: expected, mass: expected });
        }
    }

    #[test]
    fn full_buffer_stops_claiming() {
        let (grid, ps) = setup(120, 2);
        let mine: Vec<Particle> = ps
            .iter()
            .filter(|p| grid.owner_of(p.pos) == Rank(0))
            .cloned()
            .collect();
        let oracle = GridOracle::build(grid, Rank(0), &mine).unwrap();
        let payload = CountPayload::new();
        let eval = Evaluator::new(&payload, &oracle, &mine, 16);
        let worklist: Vec<usize> = (0..mine.len()).collect();
        let buffer = ExportBuffer::new(0);
        let phase = eval.local_phase(&worklist, 0, &buffer, 1);
        // Radius 0.15 near x = 0.5 forces an export; nothing fits.
        assert!(buffer.is_full());
        assert!(phase.claimed_end < worklist.len());
        assert!(phase.finished.iter().all(|r| r.origin < phase.claimed_end));
    }
}
