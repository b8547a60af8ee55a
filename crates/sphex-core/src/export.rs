//! Export bookkeeping shared by the neighbour oracle and the scheduler.
//!
//! While walking a particle's neighbourhood, the oracle reports every
//! branch owned by another rank through [`ExportBookkeeping::export`].
//! Records are staged per thread, keyed per destination rank, and only
//! committed to the shared [`ExportBuffer`] once the particle's local
//! walk finished. Slots are reserved up front against the buffer's
//! capacity, so the committed record count never exceeds it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::error::SearchError;
use crate::id::{BranchId, Rank};

/// Maximum number of branch ids carried by one query record.
///
/// A particle overlapping more remote branches on one rank emits
/// several records (continuation fragments) whose partial results are
/// summed on return.
pub const NODE_LIST_LEN: usize = 8;

/// One export: "evaluate particle `source` on rank `dest`, starting
/// from these branches".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryRecord {
    /// Local index of the exporting particle.
    pub source: usize,
    /// Position of the particle in the pass worklist. Used by chunk
    /// rollback to decide whether the record belongs to a finished
    /// particle.
    pub origin: usize,
    /// Rank owning the listed branches.
    pub dest: Rank,
    /// Branches to resume the search from on `dest`.
    pub branches: SmallVec<[BranchId; NODE_LIST_LEN]>,
}

impl QueryRecord {
    /// A record with an empty branch list.
    pub fn new(source: usize, origin: usize, dest: Rank) -> Self {
        Self {
            source,
            origin,
            dest,
            branches: SmallVec::new(),
        }
    }

    /// Whether another branch fits into this record.
    pub fn has_room(&self) -> bool {
        self.branches.len() < NODE_LIST_LEN
    }
}

/// Capacity-limited, thread-shared export record store for one chunk.
pub struct ExportBuffer {
    capacity: usize,
    reserved: AtomicUsize,
    full: AtomicBool,
    records: Mutex<Vec<QueryRecord>>,
}

impl ExportBuffer {
    /// An empty buffer accepting at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self::with_storage(capacity, Vec::new())
    }

    /// An empty buffer reusing `storage` as its backing allocation.
    pub fn with_storage(capacity: usize, mut storage: Vec<QueryRecord>) -> Self {
        storage.clear();
        Self {
            capacity,
            reserved: AtomicUsize::new(0),
            full: AtomicBool::new(false),
            records: Mutex::new(storage),
        }
    }

    /// Maximum number of records.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots reserved so far (committed or still staged).
    pub fn reserved(&self) -> usize {
        self.reserved.load(Ordering::Acquire)
    }

    /// Whether a reservation has failed since the last reset.
    pub fn is_full(&self) -> bool {
        self.full.load(Ordering::Acquire)
    }

    /// Reserve one record slot. Marks the buffer full on failure.
    pub fn try_reserve(&self) -> bool {
        let ok = self
            .reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .is_ok();
        if !ok {
            self.full.store(true, Ordering::Release);
        }
        ok
    }

    /// Append staged records of a finished particle.
    fn commit(&self, staged: &mut Vec<QueryRecord>) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.append(staged);
    }

    /// Number of committed records.
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no record has been committed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consume the buffer, returning the committed records.
    pub fn into_records(self) -> Vec<QueryRecord> {
        self.records
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Per-thread export staging for the particle currently being walked.
///
/// Tracks, for each destination rank, which staged record still accepts
/// branch ids, so that one particle produces one record per destination
/// unless its node list overflows.
pub struct ExportBookkeeping<'a> {
    buffer: &'a ExportBuffer,
    source: usize,
    origin: usize,
    open: IndexMap<Rank, usize>,
    staged: Vec<QueryRecord>,
}

impl<'a> ExportBookkeeping<'a> {
    /// Staging area reserving its slots from `buffer`.
    pub fn new(buffer: &'a ExportBuffer) -> Self {
        Self {
            buffer,
            source: 0,
            origin: 0,
            open: IndexMap::new(),
            staged: Vec::new(),
        }
    }

    /// Start staging exports for the particle at local index `source`
    /// (worklist position `origin`). Discards anything still staged.
    pub fn begin(&mut self, source: usize, origin: usize) {
        self.source = source;
        self.origin = origin;
        self.open.clear();
        self.staged.clear();
    }

    /// Record that the current particle's search must continue on
    /// `branch`, owned by `dest`.
    ///
    /// # Errors
    ///
    /// [`SearchError::ExportBufferFull`] if a new record was needed and
    /// no slot could be reserved.
    pub fn export(&mut self, dest: Rank, branch: BranchId) -> Result<(), SearchError> {
        if let Some(&slot) = self.open.get(&dest) {
            let record = &mut self.staged[slot];
            if record.has_room() {
                record.branches.push(branch);
                return Ok(());
            }
        }
        if !self.buffer.try_reserve() {
            return Err(SearchError::ExportBufferFull);
        }
        let mut record = QueryRecord::new(self.source, self.origin, dest);
        record.branches.push(branch);
        self.open.insert(dest, self.staged.len());
        self.staged.push(record);
        Ok(())
    }

    /// Records staged for the current particle.
    pub fn staged(&self) -> &[QueryRecord] {
        &self.staged
    }

    /// Move the staged records into the shared buffer.
    pub fn commit(&mut self) {
        self.open.clear();
        if !self.staged.is_empty() {
            self.buffer.commit(&mut self.staged);
        }
    }
}
