//! Run-wide fatal abort.
//!
//! There is no partial recovery from a failed distributed pass: every
//! other rank is blocked in, or about to enter, an exchange with the
//! failing one. [`abort_run`] logs, flushes, tells every peer, then
//! unwinds the calling rank with a [`RunAborted`] payload that the
//! cluster runner turns into a [`ClusterError`](crate::ClusterError).

use std::fmt;

use sphex_core::Rank;

use crate::communicator::Communicator;

/// Why a run was aborted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AbortCode {
    /// Particles still unconverged at the iteration ceiling.
    ConvergenceFailure,
    /// The export buffer cannot hold one particle's queries.
    ExportBufferTooSmall,
    /// A tagged per-pass allocation failed.
    AllocationFailed,
    /// Message passing failed.
    CommFailure,
    /// Another rank aborted first.
    PeerAborted,
    /// The neighbour oracle broke its contract, e.g. exported while
    /// walking an imported query.
    OracleContract,
}

impl AbortCode {
    /// Stable numeric code, for process exit statuses.
    pub fn as_i32(self) -> i32 {
        match self {
            Self::ConvergenceFailure => 1,
            Self::ExportBufferTooSmall => 2,
            Self::AllocationFailed => 3,
            Self::CommFailure => 4,
            Self::PeerAborted => 5,
            Self::OracleContract => 6,
        }
    }
}

impl fmt::Display for AbortCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConvergenceFailure => "convergence failure",
            Self::ExportBufferTooSmall => "export buffer too small",
            Self::AllocationFailed => "allocation failed",
            Self::CommFailure => "communication failure",
            Self::PeerAborted => "peer aborted",
            Self::OracleContract => "oracle contract violation",
        };
        f.write_str(name)
    }
}

/// Unwind payload of an aborted rank.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunAborted {
    /// Rank that called [`abort_run`].
    pub rank: Rank,
    /// Abort code.
    pub code: AbortCode,
    /// Diagnostic message.
    pub message: String,
}

impl fmt::Display for RunAborted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rank {} aborted ({}): {}", self.rank, self.code, self.message)
    }
}

/// Abort the whole run.
///
/// Logs `message` at error level, flushes the logger, broadcasts the
/// abort to every peer and unwinds this rank with [`RunAborted`].
pub fn abort_run<C: Communicator + ?Sized>(
    comm: &C,
    code: AbortCode,
    message: impl Into<String>,
) -> ! {
    let message = message.into();
    let rank = comm.rank();
    log::error!("rank {rank}: aborting run ({code}): {message}");
    log::logger().flush();
    comm.broadcast_abort(code, &message);
    std::panic::panic_any(RunAborted {
        rank,
        code,
        message,
    })
}
