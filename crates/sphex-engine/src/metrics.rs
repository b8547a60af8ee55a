//! Per-pass and per-loop metrics.

use sphex_core::Pin;

use crate::solver::Verdict;

/// Counters and timings of one pass on one rank.
///
/// Durations are wall-clock microseconds.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PassMetrics {
    /// Particles evaluated.
    pub active: usize,
    /// Chunks the pass was split into (global, identical on all ranks).
    pub chunks: u32,
    /// Export-buffer overflow rollbacks.
    pub rollbacks: u32,
    /// Query records shipped to other ranks.
    pub exported: usize,
    /// Queries received from other ranks.
    pub imported: usize,
    /// Time in local phases.
    pub local_us: u64,
    /// Time in remote phases.
    pub remote_us: u64,
    /// Time in count negotiation, transfers and reductions.
    pub exchange_us: u64,
    /// High-water mark of tagged per-pass buffers, in bytes.
    pub peak_buffer_bytes: usize,
}

/// How particles left the convergence loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VerdictTally {
    /// Neighbour count inside the window.
    pub converged: usize,
    /// Accepted at the radius floor.
    pub pinned_floor: usize,
    /// Accepted at the radius ceiling.
    pub pinned_ceiling: usize,
    /// Accepted on a collapsed bracket.
    pub collapsed: usize,
}

impl VerdictTally {
    /// Count one final verdict. `Retry` is ignored.
    pub fn record(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::Converged => self.converged += 1,
            Verdict::Pinned(Pin::Floor) => self.pinned_floor += 1,
            Verdict::Pinned(Pin::Ceiling) => self.pinned_ceiling += 1,
            Verdict::Collapsed => self.collapsed += 1,
            Verdict::Retry => {}
        }
    }

    /// Particles accepted by any verdict.
    pub fn total(&self) -> usize {
        self.converged + self.pinned_floor + self.pinned_ceiling + self.collapsed
    }
}

/// Result of a convergence loop on one rank.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConvergenceReport {
    /// Passes run (global, identical on all ranks).
    pub iterations: u32,
    /// Metrics of each pass.
    pub passes: Vec<PassMetrics>,
    /// Final verdicts of this rank's particles.
    pub verdicts: VerdictTally,
}

impl ConvergenceReport {
    /// Query records exported over the whole loop.
    pub fn total_exported(&self) -> usize {
        self.passes.iter().map(|p| p.exported).sum()
    }

    /// Overflow rollbacks over the whole loop.
    pub fn total_rollbacks(&self) -> u32 {
        self.passes.iter().map(|p| p.rollbacks).sum()
    }
}
