//! Per-patch cost accumulation over one rebalance interval.
//!
//! Physics kernels record wall time (or a proxy) against each patch as
//! they run. The load balancer reads and zeroes the table at every
//! rebalance by taking a fresh one, rather than mutating in place.

use serde::{Deserialize, Serialize};

/// Accumulated cost per patch since the last rebalance.
///
/// The table is indexed by hindex over the global patch space; entries
/// for patches the process does not own simply stay zero, which lets a
/// later elementwise sum across processes recover the global picture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostTable {
    samples: Vec<f64>,
}

impl CostTable {
    /// Create a zeroed table over `total_patches` entries.
    pub fn new(total_patches: u64) -> Self {
        Self {
            samples: vec![0.0; total_patches as usize],
        }
    }

    /// Rebuild a table from previously saved samples.
    pub fn from_samples(samples: Vec<f64>) -> Self {
        Self { samples }
    }

    /// Accumulate `seconds` of measured cost against `hindex`.
    ///
    /// An out-of-range hindex is a caller bug: asserted in debug
    /// builds, ignored in release.
    pub fn record(&mut self, hindex: u64, seconds: f64) {
        debug_assert!(
            (hindex as usize) < self.samples.len(),
            "cost recorded for hindex {hindex} outside patch total {}",
            self.samples.len()
        );
        if let Some(slot) = self.samples.get_mut(hindex as usize) {
            *slot += seconds;
        }
    }

    /// Accumulated cost for one patch.
    pub fn get(&self, hindex: u64) -> f64 {
        self.samples.get(hindex as usize).copied().unwrap_or(0.0)
    }

    /// All samples, indexed by hindex.
    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Sum over all patches.
    pub fn total(&self) -> f64 {
        self.samples.iter().sum()
    }

    /// Take the accumulated samples, leaving a fresh zeroed table for
    /// the next interval.
    pub fn take(&mut self) -> CostTable {
        let fresh = vec![0.0; self.samples.len()];
        CostTable {
            samples: std::mem::replace(&mut self.samples, fresh),
        }
    }
}
