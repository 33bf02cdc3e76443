//! Load balancing: recompute the ownership table from measured cost.
//!
//! The partitioner walks hindices in ascending order, closing each
//! process's contiguous range once its capability-weighted share of the
//! total cost is reached. For non-negative costs this greedy single
//! pass minimizes the maximum bucket sum among contiguity-constrained
//! partitions, and runs in O(total_patches).

use crate::ownership::OwnershipTable;

/// Tunables governing when and how a rebalance takes effect.
#[derive(Debug, Clone, Copy)]
pub struct BalancePolicy {
    /// Floor applied to every cost sample so idle patches still count
    /// toward fair range-splitting instead of being invisible.
    pub cost_floor: f64,
    /// Minimum reduction of the max-to-average load ratio required for
    /// a new table to replace the current one. Below this the rebalance
    /// is skipped entirely, avoiding migration thrashing.
    pub improvement_threshold: f64,
}

impl Default for BalancePolicy {
    fn default() -> Self {
        Self {
            cost_floor: 1e-9,
            improvement_threshold: 0.05,
        }
    }
}

/// Compute a new ownership table from per-patch costs.
///
/// Always returns a valid table. Returns `current` unchanged when the
/// candidate's improvement falls below the policy threshold. Falls back
/// to the uniform proportional split when every cost sample is zero.
///
/// Every process must call this with identical inputs (costs are summed
/// across the group beforehand) so all derive the same table.
///
/// # Panics
/// Panics if `costs` does not cover `current`'s patch total or if
/// `capabilities` does not match its process count; both are caller
/// bugs.
pub fn rebalance(
    costs: &[f64],
    current: &OwnershipTable,
    capabilities: &[f64],
    policy: &BalancePolicy,
) -> OwnershipTable {
    let total = current.total_patches();
    assert_eq!(costs.len() as u64, total, "cost table does not cover patch space");
    assert_eq!(
        capabilities.len(),
        current.process_count(),
        "capability vector does not match process count"
    );

    if costs.iter().all(|&c| c == 0.0) {
        return OwnershipTable::build(total, capabilities);
    }

    let floored: Vec<f64> = costs.iter().map(|&c| c.max(policy.cost_floor)).collect();
    let candidate = prefix_partition(&floored, capabilities);

    if candidate == *current {
        return current.clone();
    }

    let ratio_current = imbalance_ratio(&floored, current, capabilities);
    let ratio_candidate = imbalance_ratio(&floored, &candidate, capabilities);
    if ratio_current - ratio_candidate < policy.improvement_threshold {
        tracing::debug!(
            ratio_current,
            ratio_candidate,
            "rebalance skipped: improvement below threshold"
        );
        return current.clone();
    }

    tracing::info!(
        ratio_current,
        ratio_candidate,
        "rebalance accepted: {:?} -> {:?}",
        current.counts(),
        candidate.counts()
    );
    candidate
}

/// Greedy contiguous partition of `costs` into capability-weighted
/// buckets. The patch straddling a bucket boundary goes to whichever
/// side leaves the bucket closer to its target share.
fn prefix_partition(costs: &[f64], capabilities: &[f64]) -> OwnershipTable {
    let nproc = capabilities.len();
    let total = costs.len();
    let cap_total: f64 = capabilities.iter().sum();
    let cost_total: f64 = costs.iter().sum();
    let target = cost_total / cap_total;

    let mut counts = vec![0u64; nproc];
    let mut cursor = 0usize;
    for rank in 0..nproc {
        let remaining = total - cursor;
        if rank == nproc - 1 {
            counts[rank] = remaining as u64;
            break;
        }
        let later_ranks = nproc - rank - 1;
        // When patches outnumber processes, keep one in reserve for
        // every later rank so no process is forced empty.
        let (min_take, max_take) = if total >= nproc {
            (1usize, remaining - later_ranks)
        } else {
            (0usize, remaining)
        };

        let share = target * capabilities[rank];
        let mut accumulated = 0.0f64;
        let mut take = 0usize;
        while take < max_take {
            let cost = costs[cursor + take];
            if accumulated + cost > share && take >= min_take {
                if (accumulated + cost - share).abs() < (share - accumulated).abs() {
                    take += 1;
                }
                break;
            }
            accumulated += cost;
            take += 1;
        }
        counts[rank] = take.max(min_take) as u64;
        cursor += counts[rank] as usize;
    }

    OwnershipTable::from_counts(counts)
}

/// Maximum capability-normalized process load divided by the average.
/// 1.0 is perfect balance.
fn imbalance_ratio(costs: &[f64], table: &OwnershipTable, capabilities: &[f64]) -> f64 {
    let cap_total: f64 = capabilities.iter().sum();
    let cost_total: f64 = costs.iter().sum();
    if cost_total <= 0.0 {
        return 1.0;
    }
    let average = cost_total / cap_total;

    let mut worst = 0.0f64;
    for rank in 0..table.process_count() {
        let range = table.range_of(rank);
        let load: f64 = costs[range.start as usize..range.end as usize].iter().sum();
        let normalized = load / capabilities[rank];
        if normalized > worst {
            worst = normalized;
        }
    }
    worst / average
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strict_policy() -> BalancePolicy {
        // Zero threshold: accept any strict improvement.
        BalancePolicy {
            cost_floor: 1e-9,
            improvement_threshold: 0.0,
        }
    }

    #[test]
    fn skewed_costs_shift_the_boundary() {
        // 8 patches, 2 processes, uniform capability. Patches 0-3 cost 1,
        // patches 4-7 cost 5. Closest contiguous split puts the boundary
        // at hindex 6: buckets of 14 and 10 instead of 9 and 15.
        let costs = [1.0, 1.0, 1.0, 1.0, 5.0, 5.0, 5.0, 5.0];
        let current = OwnershipTable::from_counts(vec![4, 4]);
        let new = rebalance(&costs, &current, &[1.0, 1.0], &strict_policy());
        assert_eq!(new.counts(), &[6, 2]);
    }

    #[test]
    fn uniform_costs_keep_uniform_split() {
        let costs = [1.0; 12];
        let current = OwnershipTable::build(12, &[1.0; 3]);
        let new = rebalance(&costs, &current, &[1.0; 3], &strict_policy());
        assert_eq!(new, current);
    }

    #[test]
    fn all_zero_costs_fall_back_to_uniform_split() {
        let costs = [0.0; 8];
        let skewed = OwnershipTable::from_counts(vec![7, 1]);
        let new = rebalance(&costs, &skewed, &[1.0, 1.0], &strict_policy());
        assert_eq!(new, OwnershipTable::build(8, &[1.0, 1.0]));
    }

    #[test]
    fn no_op_rebalance_is_idempotent() {
        let costs = [0.0; 8];
        let caps = [1.0, 1.0];
        let first = rebalance(&costs, &OwnershipTable::build(8, &caps), &caps, &strict_policy());
        let second = rebalance(&costs, &first, &caps, &strict_policy());
        assert_eq!(first, second, "repeated rebalance must not drift");
    }

    #[test]
    fn small_gains_are_skipped() {
        // A mild imbalance: improvement exists but is below threshold.
        let costs = [1.0, 1.0, 1.0, 1.1, 1.0, 1.0, 1.0, 1.0];
        let current = OwnershipTable::from_counts(vec![4, 4]);
        let policy = BalancePolicy {
            cost_floor: 1e-9,
            improvement_threshold: 0.5,
        };
        let new = rebalance(&costs, &current, &[1.0, 1.0], &policy);
        assert_eq!(new, current, "tiny improvement should not trigger migration");
    }

    #[test]
    fn fairness_improves_from_a_skewed_table() {
        // Near-uniform cost but a deliberately skewed starting table:
        // the rebalanced spread must not be wider than the input's.
        let costs: Vec<f64> = (0..16).map(|i| 1.0 + 0.01 * (i % 3) as f64).collect();
        let caps = [1.0; 4];
        let skewed = OwnershipTable::from_counts(vec![10, 2, 2, 2]);
        let new = rebalance(&costs, &skewed, &caps, &strict_policy());

        let spread = |table: &OwnershipTable| {
            let loads: Vec<f64> = (0..4)
                .map(|r| {
                    let range = table.range_of(r);
                    costs[range.start as usize..range.end as usize].iter().sum::<f64>()
                })
                .collect();
            let max = loads.iter().cloned().fold(f64::MIN, f64::max);
            let min = loads.iter().cloned().fold(f64::MAX, f64::min);
            max - min
        };
        assert!(
            spread(&new) <= spread(&skewed),
            "rebalance widened the load spread: {} > {}",
            spread(&new),
            spread(&skewed)
        );
    }

    #[test]
    fn heterogeneous_capability_weights_shares() {
        // Uniform cost, 2:1 capability: the faster process should take
        // about two thirds of the patches.
        let costs = [1.0; 12];
        let current = OwnershipTable::from_counts(vec![6, 6]);
        let new = rebalance(&costs, &current, &[2.0, 1.0], &strict_policy());
        assert_eq!(new.counts(), &[8, 4]);
    }

    #[test]
    fn more_processes_than_patches() {
        let costs = [1.0, 1.0];
        let current = OwnershipTable::build(2, &[1.0; 4]);
        let new = rebalance(&costs, &current, &[1.0; 4], &strict_policy());
        assert_eq!(new.total_patches(), 2);
        assert_eq!(new.counts().iter().sum::<u64>(), 2);
    }
}
