//! Error types shared between the neighbour oracle and the engine.

use std::error::Error;
use std::fmt;

/// Outcome signals from a neighbour search that stop it early.
///
/// `ExportBufferFull` is not a failure: it tells the scheduler to stop
/// claiming particles, roll back the partially completed chunk, and
/// ship what it has.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchError {
    /// No export slot could be reserved for a remote branch.
    ExportBufferFull,
}

impl fmt::Display for SearchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExportBufferFull => write!(f, "export buffer full"),
        }
    }
}

impl Error for SearchError {}
