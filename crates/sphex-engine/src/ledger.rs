//! Tagged accounting for per-pass transfer buffers.
//!
//! Every dynamically sized buffer of a pass is obtained from a
//! [`BufferLedger`] under a short static tag and handed back with
//! [`free`](BufferLedger::free) once the chunk is done. The ledger
//! tracks live bytes per tag and the high-water mark, and enforces an
//! optional cap. Allocation failure is fatal for the run.

use std::error::Error;
use std::fmt;
use std::mem::size_of;

use indexmap::IndexMap;

/// Errors from [`BufferLedger::alloc`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AllocError {
    /// The request would push live bytes past the ledger cap.
    LimitExceeded {
        /// Tag of the request.
        tag: &'static str,
        /// Bytes requested.
        requested: usize,
        /// Bytes already live.
        in_use: usize,
        /// Ledger cap.
        limit: usize,
    },
    /// The allocator refused the reservation.
    Reserve {
        /// Tag of the request.
        tag: &'static str,
        /// Bytes requested.
        requested: usize,
    },
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LimitExceeded {
                tag,
                requested,
                in_use,
                limit,
            } => write!(
                f,
                "{tag}: {requested} bytes requested with {in_use} of {limit} bytes in use"
            ),
            Self::Reserve { tag, requested } => {
                write!(f, "{tag}: failed to reserve {requested} bytes")
            }
        }
    }
}

impl Error for AllocError {}

/// Named, tagged allocations with byte accounting.
#[derive(Debug, Default)]
pub struct BufferLedger {
    limit: Option<usize>,
    live: IndexMap<&'static str, usize>,
    in_use: usize,
    peak: usize,
}

// Compile-time assertion: a ledger moves with its engine across threads.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<BufferLedger>();
};

impl BufferLedger {
    /// A ledger capping live bytes at `limit` (`None` = uncapped).
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    /// Allocate an empty vector with room for exactly `len` elements.
    ///
    /// # Errors
    ///
    /// [`AllocError::LimitExceeded`] over the cap, [`AllocError::Reserve`]
    /// if the allocator fails.
    pub fn alloc<T>(&mut self, tag: &'static str, len: usize) -> Result<Vec<T>, AllocError> {
        let requested = len.saturating_mul(size_of::<T>());
        if let Some(limit) = self.limit {
            if self.in_use.saturating_add(requested) > limit {
                return Err(AllocError::LimitExceeded {
                    tag,
                    requested,
                    in_use: self.in_use,
                    limit,
                });
            }
        }
        let mut v = Vec::new();
        v.try_reserve_exact(len)
            .map_err(|_| AllocError::Reserve { tag, requested })?;
        *self.live.entry(tag).or_insert(0) += requested;
        self.in_use += requested;
        self.peak = self.peak.max(self.in_use);
        Ok(v)
    }

    /// Return a buffer obtained from [`alloc`](Self::alloc) under `tag`.
    ///
    /// Accounts the buffer's current capacity, never more than the tag
    /// holds.
    pub fn free<T>(&mut self, tag: &'static str, buf: Vec<T>) {
        let bytes = buf.capacity().saturating_mul(size_of::<T>());
        drop(buf);
        if let Some(held) = self.live.get_mut(tag) {
            let released = bytes.min(*held);
            *held -= released;
            self.in_use -= released;
        }
    }

    /// Account every buffer under `tag` as released, for buffers whose
    /// ownership left the rank (sent to a peer). Returns the bytes
    /// released.
    pub fn release(&mut self, tag: &'static str) -> usize {
        let released = self.live.get_mut(tag).map_or(0, std::mem::take);
        self.in_use -= released;
        released
    }

    /// Live bytes across all tags.
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    /// Live bytes under `tag`.
    pub fn tag_bytes(&self, tag: &str) -> usize {
        self.live.get(tag).copied().unwrap_or(0)
    }

    /// High-water mark of live bytes.
    pub fn peak(&self) -> usize {
        self.peak
    }

    /// Tags in first-use order with their live bytes.
    pub fn tags(&self) -> impl Iterator<Item = (&'static str, usize)> + '_ {
        self.live.iter().map(|(&t, &b)| (t, b))
    }
}
