//! Folding local and returned partials into per-particle slots.
//!
//! Every particle evaluated in a pass has one slot. The first
//! contribution assigns, every later one accumulates, so slots never
//! need clearing between passes and node-list fragments returned by
//! several ranks are summed rather than overwritten.

use sphex_comm::Transfer;
use sphex_core::{merge, MergeMode, Partial, Rank};

use crate::scheduler::LocalResult;

/// Per-particle merge slots for one pass.
#[derive(Clone, Debug)]
pub struct MergeTable<T> {
    slots: Vec<T>,
    contributions: Vec<u32>,
}

impl<T: Partial> MergeTable<T> {
    /// Slots for `len` local particles.
    pub fn new(len: usize) -> Self {
        Self {
            slots: vec![T::default(); len],
            contributions: vec![0; len],
        }
    }

    /// Fold `partial` into `target`'s slot, returning the mode used.
    pub fn merge(&mut self, target: usize, partial: &T) -> MergeMode {
        let mode = MergeMode::for_contribution(self.contributions[target] as usize);
        merge(&mut self.slots[target], partial, mode);
        self.contributions[target] += 1;
        mode
    }

    /// Fold the local results of a chunk.
    pub fn merge_local(&mut self, finished: &[LocalResult<T>]) {
        for r in finished {
            self.merge(r.target, &r.partial);
        }
    }

    /// Fold results shipped back from every rank.
    ///
    /// `sources[r][k]` is the local particle whose query was the `k`-th
    /// sent to rank `r`; `returned.region(r)[k]` is its result.
    pub fn merge_returned(&mut self, sources: &[Vec<usize>], returned: &Transfer<T>) {
        for (r, targets) in sources.iter().enumerate() {
            let region = returned.region(Rank(r as u32));
            for (&target, partial) in targets.iter().zip(region) {
                self.merge(target, partial);
            }
        }
    }

    /// Merged slot of `target`.
    pub fn get(&self, target: usize) -> &T {
        &self.slots[target]
    }

    /// Contributions folded into `target` this pass.
    pub fn contributions(&self, target: usize) -> u32 {
        self.contributions[target]
    }

    /// Start a new pass; the next contribution to every slot assigns.
    pub fn reset(&mut self) {
        self.contributions.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, Default, PartialEq)]
    struct Mass(f64);

    impl Partial for Mass {
        fn accumulate(&mut self, other: &Self) {
            self.0 += other.0;
        }
    }

    #[test]
    fn assign_then_accumulate_is_double() {
        let mut t = MergeTable::new(1);
        let x = Mass(2.5);
        assert_eq!(t.merge(0, &x), MergeMode::Assign);
        assert_eq!(t.merge(0, &x), MergeMode::Accumulate);
        assert_eq!(t.get(0), &Mass(5.0));
    }

    #[test]
    fn reset_makes_stale_slots_harmless() {
        let mut t = MergeTable::new(2);
        t.merge(1, &Mass(7.0));
        t.reset();
        t.merge(1, &Mass(1.0));
        assert_eq!(t.get(1), &Mass(1.0));
        assert_eq!(t.contributions(1), 1);
    }

    #[test]
    fn local_then_fragments_from_two_ranks() {
        let mut t = MergeTable::new(3);
        t.merge_local(&[
            LocalResult {
                origin: 0,
                target: 2,
                partial: Mass(1.0),
            },
            LocalResult {
                origin: 1,
                target: 0,
                partial: Mass(10.0),
            },
        ]);
        // Particle 2 sent two fragments to rank 1 and one to rank 2.
        let sources = vec![vec![], vec![2, 2], vec![2, 0]];
        let returned = Transfer::from_parts(vec![
            vec![],
            vec![Mass(0.5), Mass(0.25)],
            vec![Mass(0.125), Mass(3.0)],
        ]);
        t.merge_returned(&sources, &returned);
        assert_eq!(t.get(2), &Mass(1.875));
        assert_eq!(t.contributions(2), 4);
        assert_eq!(t.get(0), &Mass(13.0));
        assert_eq!(t.get(1), &Mass::default());
    }
}
