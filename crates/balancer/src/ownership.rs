//! Ownership tables: contiguous hindex ranges per process.
//!
//! An `OwnershipTable` is an ordered sequence of per-process patch
//! counts whose cumulative sums give each process a contiguous,
//! non-overlapping hindex range covering `[0, total_patches)` exactly.
//! Because the hindex order is locality preserving, contiguous ranges
//! are also spatially compact.

use serde::{Deserialize, Serialize};

use crate::error::{BalanceError, Result};

/// One patch changing owner, derived by diffing two tables.
///
/// Ephemeral: generated by [`OwnershipTable::diff`], consumed once by
/// the migration protocol, then discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationRequest {
    /// Patch being reassigned.
    pub hindex: u64,
    /// Rank that owns the patch under the old table.
    pub old_owner: usize,
    /// Rank that owns the patch under the new table.
    pub new_owner: usize,
}

/// Mapping from contiguous hindex ranges to owning processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipTable {
    /// Patches owned by each rank, in rank order.
    counts: Vec<u64>,
    /// Cumulative range starts; `starts[r]..starts[r+1]` is rank r's
    /// range, and `starts[P]` equals the patch total.
    starts: Vec<u64>,
}

impl OwnershipTable {
    /// Build a proportional contiguous split of `total_patches` across
    /// processes weighted by `capabilities`.
    ///
    /// Each rank gets the floor of its proportional share; the rounding
    /// remainder is distributed one patch each to the first ranks in
    /// order, so the counts always sum exactly. When there are at least
    /// as many patches as processes, every process is guaranteed a
    /// non-empty range.
    ///
    /// # Panics
    /// Panics if `capabilities` is empty or contains a non-positive
    /// weight; both are caller bugs caught by config validation.
    pub fn build(total_patches: u64, capabilities: &[f64]) -> Self {
        assert!(!capabilities.is_empty(), "capability vector must not be empty");
        assert!(
            capabilities.iter().all(|&c| c > 0.0),
            "capability weights must be positive"
        );

        let nproc = capabilities.len();
        let cap_total: f64 = capabilities.iter().sum();

        let mut counts: Vec<u64> = capabilities
            .iter()
            .map(|&c| (total_patches as f64 * c / cap_total).floor() as u64)
            .collect();

        let assigned: u64 = counts.iter().sum();
        let mut remainder = total_patches - assigned;
        for count in counts.iter_mut() {
            if remainder == 0 {
                break;
            }
            *count += 1;
            remainder -= 1;
        }

        // A tiny capability weight can floor to zero even though enough
        // patches exist; take from the fullest ranks so every process
        // owns at least one patch when total_patches >= nproc.
        if total_patches >= nproc as u64 {
            for i in 0..nproc {
                if counts[i] == 0 {
                    let donor = counts
                        .iter()
                        .enumerate()
                        .max_by_key(|(_, &c)| c)
                        .map(|(j, _)| j)
                        .expect("non-empty counts");
                    counts[donor] -= 1;
                    counts[i] += 1;
                }
            }
        }

        Self::from_counts(counts)
    }

    /// Build a table directly from per-rank patch counts.
    pub fn from_counts(counts: Vec<u64>) -> Self {
        let mut starts = Vec::with_capacity(counts.len() + 1);
        let mut cursor = 0u64;
        starts.push(0);
        for &c in &counts {
            cursor += c;
            starts.push(cursor);
        }
        Self { counts, starts }
    }

    /// Number of processes in the table.
    pub fn process_count(&self) -> usize {
        self.counts.len()
    }

    /// Global patch total covered by the table.
    pub fn total_patches(&self) -> u64 {
        *self.starts.last().expect("starts is never empty")
    }

    /// Per-rank patch counts.
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Rank owning the given hindex, by binary search over the
    /// cumulative range starts.
    pub fn owner_of(&self, hindex: u64) -> Result<usize> {
        if hindex >= self.total_patches() {
            return Err(BalanceError::OutOfRange {
                hindex,
                total: self.total_patches(),
            });
        }
        // First rank whose range ends beyond hindex.
        let rank = self.starts[1..].partition_point(|&end| end <= hindex);
        debug_assert!(self.range_of(rank).contains(&hindex));
        Ok(rank)
    }

    /// The contiguous hindex range `[start, end)` owned by `rank`.
    ///
    /// # Panics
    /// Panics if `rank` is not a valid process index.
    pub fn range_of(&self, rank: usize) -> std::ops::Range<u64> {
        self.starts[rank]..self.starts[rank + 1]
    }

    /// Every hindex whose owner differs between `old` and `new`, in
    /// ascending order. Deterministic, and complete: unchanged patches
    /// never appear.
    ///
    /// # Panics
    /// Panics if the tables disagree on patch total or process count;
    /// diffing incompatible tables is a caller bug.
    pub fn diff(old: &Self, new: &Self) -> Vec<MigrationRequest> {
        assert_eq!(
            old.total_patches(),
            new.total_patches(),
            "cannot diff tables over different patch totals"
        );
        assert_eq!(
            old.process_count(),
            new.process_count(),
            "cannot diff tables over different process counts"
        );

        let mut requests = Vec::new();
        let (mut rank_old, mut rank_new) = (0usize, 0usize);
        for h in 0..old.total_patches() {
            while old.starts[rank_old + 1] <= h {
                rank_old += 1;
            }
            while new.starts[rank_new + 1] <= h {
                rank_new += 1;
            }
            if rank_old != rank_new {
                requests.push(MigrationRequest {
                    hindex: h,
                    old_owner: rank_old,
                    new_owner: rank_new,
                });
            }
        }
        requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Partition invariant: ranges are disjoint and cover the full
    /// hindex space exactly once.
    fn assert_partition(table: &OwnershipTable, total: u64) {
        assert_eq!(table.total_patches(), total);
        let mut covered = 0u64;
        for rank in 0..table.process_count() {
            let range = table.range_of(rank);
            assert_eq!(range.start, covered, "gap or overlap before rank {rank}");
            covered = range.end;
            for h in range {
                assert_eq!(table.owner_of(h).unwrap(), rank);
            }
        }
        assert_eq!(covered, total);
    }

    #[test]
    fn build_uniform_partition() {
        for total in [0u64, 1, 7, 8, 64] {
            for nproc in [1usize, 2, 3, 5] {
                let table = OwnershipTable::build(total, &vec![1.0; nproc]);
                assert_partition(&table, total);
                // Counts differ by at most one under uniform capability.
                let min = table.counts().iter().min().unwrap();
                let max = table.counts().iter().max().unwrap();
                assert!(max - min <= 1, "uniform split uneven: {:?}", table.counts());
            }
        }
    }

    #[test]
    fn build_weighted_partition() {
        let table = OwnershipTable::build(100, &[3.0, 1.0]);
        assert_partition(&table, 100);
        assert_eq!(table.counts(), &[75, 25]);
    }

    #[test]
    fn build_never_starves_a_process() {
        // A near-zero weight still gets one patch when enough exist.
        let table = OwnershipTable::build(8, &[100.0, 0.001]);
        assert_partition(&table, 8);
        assert!(table.counts().iter().all(|&c| c >= 1));
    }

    #[test]
    fn empty_ranges_only_when_patches_scarce() {
        let table = OwnershipTable::build(2, &[1.0, 1.0, 1.0]);
        assert_partition(&table, 2);
        assert_eq!(table.counts().iter().filter(|&&c| c == 0).count(), 1);
    }

    #[test]
    fn owner_of_rejects_out_of_range() {
        let table = OwnershipTable::build(8, &[1.0, 1.0]);
        assert!(table.owner_of(7).is_ok());
        let err = table.owner_of(8).unwrap_err();
        assert!(matches!(
            err,
            crate::error::BalanceError::OutOfRange { hindex: 8, total: 8 }
        ));
    }

    #[test]
    fn diff_is_complete_and_ascending() {
        let old = OwnershipTable::from_counts(vec![4, 4]);
        let new = OwnershipTable::from_counts(vec![6, 2]);
        let requests = OwnershipTable::diff(&old, &new);
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[0],
            MigrationRequest { hindex: 4, old_owner: 1, new_owner: 0 }
        );
        assert_eq!(
            requests[1],
            MigrationRequest { hindex: 5, old_owner: 1, new_owner: 0 }
        );

        // Unchanged patches never appear; changed ones appear once.
        for h in 0..8 {
            let changed = old.owner_of(h).unwrap() != new.owner_of(h).unwrap();
            let occurrences = requests.iter().filter(|r| r.hindex == h).count();
            assert_eq!(occurrences, usize::from(changed), "hindex {h}");
        }
    }

    #[test]
    fn diff_of_identical_tables_is_empty() {
        let table = OwnershipTable::build(16, &[1.0, 2.0, 1.0]);
        assert!(OwnershipTable::diff(&table, &table).is_empty());
    }
}
