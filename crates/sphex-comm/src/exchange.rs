//! Count negotiation, offsets and the pairwise hypercube transfer.
//!
//! A pass moves data in two directions with the same machinery: queries
//! from exporting ranks to branch owners, then results back along the
//! reverse path. Each direction is an all-to-all count exchange followed
//! by [`exchange`], which visits partners in hypercube order
//! (`partner = rank ^ group` for `group = 1, 2, 3, ..`) and only talks to
//! partners with non-zero traffic in either direction.

use sphex_core::{MessageTag, Rank};

use crate::communicator::{CommExt, Communicator};
use crate::error::CommError;

/// Exclusive prefix sums of `counts`.
pub fn offsets(counts: &[usize]) -> Vec<usize> {
    let mut acc = 0;
    counts
        .iter()
        .map(|&c| {
            let at = acc;
            acc += c;
            at
        })
        .collect()
}

/// Partners of `rank` in exchange order.
///
/// Every other rank of a cluster of `size` appears exactly once, and
/// `b` lists `a` in the same round in which `a` lists `b`.
pub fn hypercube_partners(rank: Rank, size: usize) -> impl Iterator<Item = Rank> {
    let me = rank.0;
    let rounds = size.next_power_of_two() as u32;
    (1..rounds)
        .map(move |group| me ^ group)
        .filter(move |&p| (p as usize) < size)
        .map(Rank)
}

/// All-to-all exchange of per-destination counts.
///
/// `send[r]` is how many elements this rank will send to rank `r`. The
/// result's entry `r` is how many it will receive from rank `r`.
///
/// # Errors
///
/// Any [`CommError`] from the underlying sends and receives.
pub fn exchange_counts<C: Communicator + ?Sized>(
    comm: &mut C,
    tag: MessageTag,
    send: &[usize],
) -> Result<Vec<usize>, CommError> {
    let me = comm.rank();
    let size = comm.size();
    let mut recv = vec![0; size];
    for r in 0..size {
        let peer = Rank(r as u32);
        if peer != me {
            comm.send_value(peer, tag, send[r])?;
        }
    }
    for (r, slot) in recv.iter_mut().enumerate() {
        let peer = Rank(r as u32);
        *slot = if peer == me {
            send[r]
        } else {
            comm.recv_value::<usize>(peer, tag)?
        };
    }
    Ok(recv)
}

/// Data laid out contiguously by rank, with the counts and offsets that
/// delimit each rank's region.
#[derive(Clone, Debug, PartialEq)]
pub struct Transfer<T> {
    /// Elements of every rank, rank 0 first.
    pub data: Vec<T>,
    /// Elements per rank.
    pub counts: Vec<usize>,
    /// Start of each rank's region in `data`.
    pub offsets: Vec<usize>,
}

impl<T> Transfer<T> {
    /// Concatenate per-rank parts.
    pub fn from_parts(parts: Vec<Vec<T>>) -> Self {
        let counts: Vec<usize> = parts.iter().map(Vec::len).collect();
        let offsets = offsets(&counts);
        let data = parts.into_iter().flatten().collect();
        Self {
            data,
            counts,
            offsets,
        }
    }

    /// Split `data` back into per-rank parts using `counts`.
    ///
    /// `counts` must sum to `data.len()`.
    pub fn split(data: Vec<T>, counts: &[usize]) -> Vec<Vec<T>> {
        debug_assert_eq!(counts.iter().sum::<usize>(), data.len());
        let mut rest = data.into_iter();
        counts
            .iter()
            .map(|&c| rest.by_ref().take(c).collect())
            .collect()
    }

    /// Total element count.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether no rank contributed anything.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Region belonging to `rank`.
    pub fn region(&self, rank: Rank) -> &[T] {
        let start = self.offsets[rank.index()];
        &self.data[start..start + self.counts[rank.index()]]
    }
}

/// Pairwise transfer of `outgoing[r]` to every rank `r`.
///
/// `recv_counts[r]` must be the count rank `r` negotiated for this rank
/// (see [`exchange_counts`]). Returns everything received, laid out by
/// source rank; this rank's own part is moved through without a send.
///
/// # Errors
///
/// [`CommError::CountMismatch`] if a partner delivered a different count
/// than negotiated, plus any error of the underlying messaging.
pub fn exchange<C, T>(
    comm: &mut C,
    tag: MessageTag,
    mut outgoing: Vec<Vec<T>>,
    recv_counts: &[usize],
) -> Result<Transfer<T>, CommError>
where
    C: Communicator + ?Sized,
    T: Send + 'static,
{
    let me = comm.rank();
    let size = comm.size();
    let mut incoming: Vec<Vec<T>> = (0..size).map(|_| Vec::new()).collect();
    incoming[me.index()] = std::mem::take(&mut outgoing[me.index()]);

    for partner in hypercube_partners(me, size) {
        let p = partner.index();
        let send = std::mem::take(&mut outgoing[p]);
        if send.is_empty() && recv_counts[p] == 0 {
            continue;
        }
        if !send.is_empty() {
            comm.send_vec(partner, tag, send)?;
        }
        if recv_counts[p] > 0 {
            let got: Vec<T> = comm.recv_vec(partner, tag)?;
            if got.len() != recv_counts[p] {
                return Err(CommError::CountMismatch {
                    source: partner,
                    tag,
                    expected: recv_counts[p],
                    got: got.len(),
                });
            }
            incoming[p] = got;
        }
    }
    Ok(Transfer::from_parts(incoming))
}
