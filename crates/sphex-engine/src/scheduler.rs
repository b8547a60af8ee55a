//! Export/import scheduling of one pass.
//!
//! A pass walks the worklist (positions of the active particles) in
//! chunks. Each chunk runs the local phase until the worklist is done or
//! the export buffer fills. On overflow the chunk is cut back to the
//! longest contiguous run of finished particles from its start: export
//! records of later particles are moved behind the kept ones and
//! dropped, their local partials discarded, and the cursor rewound so
//! the next chunk retries them.

use std::error::Error;
use std::fmt;
use std::mem::size_of;
use std::sync::atomic::{AtomicUsize, Ordering};

use sphex_core::{ExportBuffer, QueryRecord};

/// Bytes one export costs: its record, the shipped query, and a staging
/// copy the size of the larger of query and result.
pub fn per_record_bytes<Q, R>() -> usize {
    size_of::<QueryRecord>() + size_of::<Q>() + size_of::<Q>().max(size_of::<R>())
}

/// Number of export records a chunk may hold within `budget` bytes.
pub fn chunk_capacity<Q, R>(budget: usize) -> usize {
    budget / per_record_bytes::<Q, R>()
}

/// Shared claim cursor over worklist positions `start..end`.
#[derive(Debug)]
pub struct WorkCursor {
    next: AtomicUsize,
    end: usize,
}

impl WorkCursor {
    /// Cursor handing out `start..end`.
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            next: AtomicUsize::new(start),
            end,
        }
    }

    /// Claim the next position.
    pub fn claim(&self) -> Option<usize> {
        let i = self.next.fetch_add(1, Ordering::Relaxed);
        (i < self.end).then_some(i)
    }

    /// One past the last position handed out.
    pub fn position(&self) -> usize {
        self.next.load(Ordering::Relaxed).min(self.end)
    }
}

/// Move the elements satisfying `keep` to the front in a single pass of
/// swaps and return how many there are.
///
/// Kept elements retain their relative order. The rest end up behind
/// them in unspecified order.
pub fn repartition<T>(items: &mut [T], keep: impl Fn(&T) -> bool) -> usize {
    let mut front = 0;
    for i in 0..items.len() {
        if keep(&items[i]) {
            items.swap(front, i);
            front += 1;
        }
    }
    front
}

/// Length of the leading run of `true`.
pub fn finished_prefix(processed: &[bool]) -> usize {
    processed.iter().take_while(|&&p| p).count()
}

/// A finished local evaluation.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalResult<T> {
    /// Worklist position.
    pub origin: usize,
    /// Local particle index.
    pub target: usize,
    /// Partial sums of the local walk.
    pub partial: T,
}

/// Output of one local-phase attempt.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalPhase<T> {
    /// Particles whose walk completed, in any order.
    pub finished: Vec<LocalResult<T>>,
    /// One past the last worklist position claimed.
    pub claimed_end: usize,
}

/// A settled chunk: kept export records and local partials.
#[derive(Debug)]
pub struct Chunk<T> {
    /// First worklist position of the chunk.
    pub start: usize,
    /// One past the last position finished by the chunk.
    pub end: usize,
    /// Export records of finished particles, in commit order.
    pub records: Vec<QueryRecord>,
    /// Local partials of finished particles.
    pub finished: Vec<LocalResult<T>>,
    /// Overflow rollbacks taken while settling the chunk.
    pub rollbacks: u32,
}

/// The export buffer cannot hold the exports of one particle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduleError {
    /// Buffer capacity in records.
    pub capacity: usize,
    /// Worklist position that could not be finished.
    pub position: usize,
    /// Local index of that particle.
    pub particle: usize,
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "export buffer of {} records cannot hold the exports of particle {} (worklist position {})",
            self.capacity, self.particle, self.position
        )
    }
}

impl Error for ScheduleError {}

/// Chunked walk over one pass's worklist.
#[derive(Debug)]
pub struct Scheduler {
    worklist: Vec<usize>,
    position: usize,
    capacity: usize,
    threads: usize,
}

impl Scheduler {
    /// Scheduler over `worklist` (local particle indices) with an export
    /// buffer of `capacity` records and `threads` workers.
    pub fn new(worklist: Vec<usize>, capacity: usize, threads: usize) -> Self {
        Self {
            worklist,
            position: 0,
            capacity,
            threads: threads.max(1),
        }
    }

    /// Particles to evaluate this pass.
    pub fn worklist(&self) -> &[usize] {
        &self.worklist
    }

    /// Next worklist position to evaluate.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Positions not yet finished.
    pub fn remaining(&self) -> usize {
        self.worklist.len() - self.position
    }

    /// Whether every particle of the worklist is finished.
    pub fn is_done(&self) -> bool {
        self.position >= self.worklist.len()
    }

    /// Export buffer capacity in records.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Run the local phase of the next chunk and settle it.
    ///
    /// `walk(worklist, start, buffer, threads)` must evaluate particles
    /// from `start` onwards, stop claiming once `buffer` is full, and
    /// report every particle whose walk completed. A chunk that made no
    /// progress on several threads is retried on one thread before
    /// giving up, since another thread may have taken the slot the
    /// first particle needed.
    ///
    /// # Errors
    ///
    /// [`ScheduleError`] if not even the first particle fits.
    pub fn run_chunk<T, F>(
        &mut self,
        mut storage: Vec<QueryRecord>,
        mut walk: F,
    ) -> Result<Chunk<T>, ScheduleError>
    where
        F: FnMut(&[usize], usize, &ExportBuffer, usize) -> LocalPhase<T>,
    {
        let start = self.position;
        let mut threads = self.threads;
        let mut rollbacks = 0;
        loop {
            let buffer = ExportBuffer::with_storage(self.capacity, storage);
            let phase = walk(&self.worklist, start, &buffer, threads);
            let full = buffer.is_full();
            let mut records = buffer.into_records();

            let end = if full {
                let claimed = phase.claimed_end.saturating_sub(start);
                let mut processed = vec![false; claimed];
                for r in &phase.finished {
                    processed[r.origin - start] = true;
                }
                start + finished_prefix(&processed)
            } else {
                phase.claimed_end
            };

            if full && end == start {
                if threads > 1 {
                    log::debug!(
                        "chunk at {start}: no particle finished on {threads} threads, retrying serially"
                    );
                    threads = 1;
                    rollbacks += 1;
                    storage = records;
                    continue;
                }
                return Err(ScheduleError {
                    capacity: self.capacity,
                    position: start,
                    particle: self.worklist[start],
                });
            }

            let kept = repartition(&mut records, |r| r.origin < end);
            records.truncate(kept);
            let mut finished = phase.finished;
            finished.retain(|r| r.origin < end);
            if full {
                rollbacks += 1;
                log::debug!(
                    "chunk at {start}: buffer full, finished {} of {} claimed, rewinding to {end}",
                    end - start,
                    phase.claimed_end - start
                );
            }
            self.position = end;
            return Ok(Chunk {
                start,
                end,
                records,
                finished,
                rollbacks,
            });
        }
    }
}
