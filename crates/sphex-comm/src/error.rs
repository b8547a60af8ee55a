//! Error types for message passing and cluster execution.

use std::error::Error;
use std::fmt;

use sphex_core::{MessageTag, Rank};

use crate::abort::AbortCode;

/// Errors returned by [`Communicator`](crate::Communicator) operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommError {
    /// The peer's endpoint is gone.
    Disconnected {
        /// Peer that could not be reached.
        rank: Rank,
    },
    /// A rank outside `0..size` was addressed.
    InvalidRank {
        /// The offending rank.
        rank: Rank,
        /// Cluster size.
        size: usize,
    },
    /// A matched message carried a different type than requested.
    TypeMismatch {
        /// Sender.
        source: Rank,
        /// Tag matched.
        tag: MessageTag,
        /// Type the receiver asked for.
        expected: &'static str,
    },
    /// A transfer delivered a different element count than negotiated.
    CountMismatch {
        /// Sender.
        source: Rank,
        /// Tag matched.
        tag: MessageTag,
        /// Negotiated count.
        expected: usize,
        /// Delivered count.
        got: usize,
    },
    /// A peer aborted the run while this rank was waiting.
    PeerAborted {
        /// Rank that aborted.
        rank: Rank,
        /// Its abort code.
        code: AbortCode,
        /// Its abort message.
        message: String,
    },
}

impl fmt::Display for CommError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected { rank } => write!(f, "rank {rank} disconnected"),
            Self::InvalidRank { rank, size } => {
                write!(f, "rank {rank} out of range for cluster of {size}")
            }
            Self::TypeMismatch {
                source,
                tag,
                expected,
            } => write!(
                f,
                "message from rank {source} with tag {tag} is not a {expected}"
            ),
            Self::CountMismatch {
                source,
                tag,
                expected,
                got,
            } => write!(
                f,
                "rank {source} sent {got} elements on tag {tag}, expected {expected}"
            ),
            Self::PeerAborted {
                rank,
                code,
                message,
            } => write!(f, "rank {rank} aborted ({code}): {message}"),
        }
    }
}

impl Error for CommError {}

/// Outcome of a [`LocalCluster`](crate::LocalCluster) run that did not
/// complete on every rank.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClusterError {
    /// A cluster of zero ranks was requested.
    EmptyCluster,
    /// A rank thread could not be spawned.
    Spawn {
        /// Rank whose thread failed.
        rank: Rank,
        /// OS error text.
        reason: String,
    },
    /// A rank called [`abort_run`](crate::abort_run).
    Aborted {
        /// Rank that initiated the abort.
        rank: Rank,
        /// Abort code.
        code: AbortCode,
        /// Abort message.
        message: String,
    },
    /// A rank panicked outside the abort path.
    Panicked {
        /// Rank that panicked.
        rank: Rank,
        /// Panic message, if it was a string.
        message: String,
    },
}

impl fmt::Display for ClusterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyCluster => write!(f, "cluster must have at least one rank"),
            Self::Spawn { rank, reason } => write!(f, "failed to spawn rank {rank}: {reason}"),
            Self::Aborted {
                rank,
                code,
                message,
            } => write!(f, "run aborted by rank {rank} ({code}): {message}"),
            Self::Panicked { rank, message } => write!(f, "rank {rank} panicked: {message}"),
        }
    }
}

impl Error for ClusterError {}
