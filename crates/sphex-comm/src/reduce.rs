//! Global reductions.
//!
//! Ranks count in the tens, so a reduction is a direct all-to-all of
//! one value per rank, folded in rank order on every rank. The fold
//! order makes floating-point results identical across ranks.

use sphex_core::{MessageTag, Rank};

use crate::communicator::{CommExt, Communicator};
use crate::error::CommError;

/// Combine `value` from every rank with `op`, in rank order.
///
/// # Errors
///
/// Any [`CommError`] from the underlying messaging.
pub fn all_reduce<C, T, F>(comm: &mut C, tag: MessageTag, value: T, op: F) -> Result<T, CommError>
where
    C: Communicator + ?Sized,
    T: Copy + Send + 'static,
    F: Fn(T, T) -> T,
{
    let me = comm.rank();
    let size = comm.size();
    for r in 0..size as u32 {
        if Rank(r) != me {
            comm.send_value(Rank(r), tag, value)?;
        }
    }
    let mut acc: Option<T> = None;
    for r in 0..size as u32 {
        let v = if Rank(r) == me {
            value
        } else {
            comm.recv_value::<T>(Rank(r), tag)?
        };
        acc = Some(match acc {
            Some(a) => op(a, v),
            None => v,
        });
    }
    Ok(acc.unwrap_or(value))
}

/// Global sum.
///
/// # Errors
///
/// See [`all_reduce`].
pub fn all_reduce_sum<C: Communicator + ?Sized>(
    comm: &mut C,
    tag: MessageTag,
    value: u64,
) -> Result<u64, CommError> {
    all_reduce(comm, tag, value, |a, b| a + b)
}

/// Global maximum.
///
/// # Errors
///
/// See [`all_reduce`].
pub fn all_reduce_max<C: Communicator + ?Sized>(
    comm: &mut C,
    tag: MessageTag,
    value: f64,
) -> Result<f64, CommError> {
    all_reduce(comm, tag, value, f64::max)
}

/// Block until every rank has entered the barrier.
///
/// # Errors
///
/// See [`all_reduce`].
pub fn barrier<C: Communicator + ?Sized>(comm: &mut C, tag: MessageTag) -> Result<(), CommError> {
    all_reduce(comm, tag, (), |_, _| ())
}
