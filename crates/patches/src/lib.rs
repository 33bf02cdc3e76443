//! Patch Data Model
//!
//! This crate provides the spatial unit of ownership ("patch") for the
//! domain-decomposed simulation, and everything needed to move one
//! between processes. It is designed to be separable and data-focused.
//!
//! # Modules
//! - [`hindex`] -- Hilbert-curve patch indexing (locality-preserving).
//! - [`particle`] -- Struct-of-arrays per-species particle storage.
//! - [`field`] -- Named real/complex field sub-grids with ghost halo.
//! - [`probe`] -- Diagnostic sample points with accumulated history.
//! - [`payload`] -- Self-describing, length-prefixed migration frames.

#![warn(missing_docs)]

pub mod field;
pub mod hindex;
pub mod particle;
pub mod payload;
pub mod probe;

pub use field::{FieldGrid, FieldKind};
pub use hindex::PatchGrid;
pub use particle::ParticleArrays;
pub use payload::PayloadError;
pub use probe::Probe;

use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Patch -- the unit of ownership and migration
// ---------------------------------------------------------------------------

/// A fixed spatial subdomain: the unit of ownership and migration.
///
/// The patch set partitions the whole simulation domain and never changes
/// membership, only ownership. A patch belongs to exactly one process's
/// [`PatchStore`] at any instant; migration moves the whole object.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    /// Hilbert index under the global patch ordering.
    pub hindex: u64,
    /// Grid coordinates of this patch.
    pub coords: (u64, u64),
    /// Per-species particle populations.
    pub species: Vec<ParticleArrays>,
    /// Named field sub-grids over the patch's cells.
    pub fields: Vec<FieldGrid>,
    /// Diagnostic probes attached to this patch.
    pub probes: Vec<Probe>,
}

impl Patch {
    /// Create an empty patch at the given position in the grid.
    pub fn new(hindex: u64, coords: (u64, u64)) -> Self {
        Self {
            hindex,
            coords,
            species: Vec::new(),
            fields: Vec::new(),
            probes: Vec::new(),
        }
    }

    /// Total number of particles across all species.
    pub fn particle_count(&self) -> usize {
        self.species.iter().map(ParticleArrays::len).sum()
    }
}

// ---------------------------------------------------------------------------
// PatchStore -- one process's exclusively owned patches
// ---------------------------------------------------------------------------

/// The set of patches a single process currently owns.
///
/// Insertion and removal are the only ways ownership changes hands:
/// migration removes the patch here and inserts it into the destination
/// process's store, never leaving shared or duplicated state.
#[derive(Debug, Default)]
pub struct PatchStore {
    patches: BTreeMap<u64, Patch>,
}

impl PatchStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a patch, taking ownership. Returns the previous patch if
    /// one with the same hindex was already present (a protocol bug).
    pub fn insert(&mut self, patch: Patch) -> Option<Patch> {
        self.patches.insert(patch.hindex, patch)
    }

    /// Remove and return the patch with the given hindex, relinquishing
    /// ownership entirely.
    pub fn remove(&mut self, hindex: u64) -> Option<Patch> {
        self.patches.remove(&hindex)
    }

    /// Borrow the patch with the given hindex.
    pub fn get(&self, hindex: u64) -> Option<&Patch> {
        self.patches.get(&hindex)
    }

    /// Mutably borrow the patch with the given hindex.
    pub fn get_mut(&mut self, hindex: u64) -> Option<&mut Patch> {
        self.patches.get_mut(&hindex)
    }

    /// Whether a patch with this hindex is locally owned.
    pub fn contains(&self, hindex: u64) -> bool {
        self.patches.contains_key(&hindex)
    }

    /// Number of locally owned patches.
    pub fn len(&self) -> usize {
        self.patches.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    /// Owned hindices in ascending order.
    pub fn hindices(&self) -> Vec<u64> {
        self.patches.keys().copied().collect()
    }

    /// Iterate over owned patches in ascending hindex order.
    pub fn iter(&self) -> impl Iterator<Item = &Patch> {
        self.patches.values()
    }

    /// Total particle count across all locally owned patches.
    pub fn total_particles(&self) -> usize {
        self.patches.values().map(Patch::particle_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_insert_remove_is_a_move() {
        let mut store = PatchStore::new();
        let mut patch = Patch::new(3, (1, 1));
        let mut sp = ParticleArrays::new();
        sp.push_particle(0.0, 0.0, [0.0; 3], 1.0, -1.0);
        patch.species.push(sp);
        assert!(store.insert(patch).is_none());

        assert!(store.contains(3));
        assert_eq!(store.total_particles(), 1);

        let taken = store.remove(3).expect("patch should be present");
        assert_eq!(taken.particle_count(), 1);
        assert!(!store.contains(3));
        assert_eq!(store.total_particles(), 0);
    }

    #[test]
    fn hindices_are_sorted() {
        let mut store = PatchStore::new();
        for h in [7, 0, 3] {
            store.insert(Patch::new(h, (0, 0)));
        }
        assert_eq!(store.hindices(), vec![0, 3, 7]);
    }

    #[test]
    fn duplicate_insert_returns_previous() {
        let mut store = PatchStore::new();
        store.insert(Patch::new(1, (0, 1)));
        let previous = store.insert(Patch::new(1, (0, 1)));
        assert!(previous.is_some());
        assert_eq!(store.len(), 1);
    }
}
