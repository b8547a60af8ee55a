//! The communicator seam.

use std::any::{type_name, Any};

use sphex_core::{MessageTag, Rank};

use crate::abort::AbortCode;
use crate::error::CommError;

/// Point-to-point tagged messaging between the ranks of one run.
///
/// Messages between a given pair of ranks with the same tag are
/// delivered in send order. Receives block until a message matching
/// both `source` and `tag` arrives; other traffic is held back for later
/// receives.
pub trait Communicator: Send {
    /// This rank.
    fn rank(&self) -> Rank;

    /// Number of ranks in the run.
    fn size(&self) -> usize;

    /// Send an opaque message to `dest`.
    ///
    /// # Errors
    ///
    /// [`CommError::InvalidRank`] or [`CommError::Disconnected`].
    fn send_any(&self, dest: Rank, tag: MessageTag, body: Box<dyn Any + Send>)
        -> Result<(), CommError>;

    /// Block until a message from `source` with `tag` arrives.
    ///
    /// # Errors
    ///
    /// [`CommError::PeerAborted`] if any peer aborted the run, or
    /// [`CommError::Disconnected`].
    fn recv_any(&mut self, source: Rank, tag: MessageTag) -> Result<Box<dyn Any + Send>, CommError>;

    /// Tell every peer the run is over. Best effort; never blocks.
    fn broadcast_abort(&self, code: AbortCode, message: &str);
}

/// Typed helpers over [`Communicator`].
pub trait CommExt: Communicator {
    /// Send a vector to `dest`.
    fn send_vec<T: Send + 'static>(
        &self,
        dest: Rank,
        tag: MessageTag,
        data: Vec<T>,
    ) -> Result<(), CommError> {
        self.send_any(dest, tag, Box::new(data))
    }

    /// Receive a vector from `source`.
    fn recv_vec<T: 'static>(&mut self, source: Rank, tag: MessageTag) -> Result<Vec<T>, CommError> {
        let body = self.recv_any(source, tag)?;
        body.downcast::<Vec<T>>()
            .map(|b| *b)
            .map_err(|_| CommError::TypeMismatch {
                source,
                tag,
                expected: type_name::<Vec<T>>(),
            })
    }

    /// Send a single value to `dest`.
    fn send_value<T: Send + 'static>(
        &self,
        dest: Rank,
        tag: MessageTag,
        value: T,
    ) -> Result<(), CommError> {
        self.send_any(dest, tag, Box::new(value))
    }

    /// Receive a single value from `source`.
    fn recv_value<T: 'static>(&mut self, source: Rank, tag: MessageTag) -> Result<T, CommError> {
        let body = self.recv_any(source, tag)?;
        body.downcast::<T>()
            .map(|b| *b)
            .map_err(|_| CommError::TypeMismatch {
                source,
                tag,
                expected: type_name::<T>(),
            })
    }
}

impl<C: Communicator + ?Sized> CommExt for C {}
