//! Checkpointing of ownership state alongside patch payloads.
//!
//! A restored run must reproduce identical ownership, not a freshly
//! rebalanced one, so the checkpoint carries the ownership table and
//! the live (not yet consumed) cost samples in addition to every
//! locally owned patch. Patches reuse the migration payload framing,
//! which re-validates integrity on load.

use std::path::Path;

use serde::{Deserialize, Serialize};

use patches::{payload, PatchStore};

use crate::cost::CostTable;
use crate::error::{BalanceError, Result};
use crate::ownership::OwnershipTable;
use crate::runner::Process;

/// On-disk checkpoint for one process.
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    table: OwnershipTable,
    cost_samples: Vec<f64>,
    /// Locally owned patches as migration frames, ascending hindex.
    patch_frames: Vec<Vec<u8>>,
}

/// Write this process's state to `path`.
pub fn save(path: &Path, process: &Process) -> Result<()> {
    let (table, costs, store) = process.checkpoint_parts();
    let mut patch_frames = Vec::with_capacity(store.len());
    for patch in store.iter() {
        let frame = payload::encode(patch).map_err(|source| BalanceError::Payload {
            hindex: patch.hindex,
            source,
        })?;
        patch_frames.push(frame);
    }
    let file = CheckpointFile {
        table: table.clone(),
        cost_samples: costs.samples().to_vec(),
        patch_frames,
    };
    let bytes = bincode::serialize(&file)?;
    std::fs::write(path, bytes)?;
    tracing::info!(
        path = %path.display(),
        patches = store.len(),
        "checkpoint written"
    );
    Ok(())
}

/// Restore this process's state from `path`.
pub fn restore(path: &Path, process: &mut Process) -> Result<()> {
    let bytes = std::fs::read(path)?;
    let file: CheckpointFile = bincode::deserialize(&bytes)?;

    let mut store = PatchStore::new();
    for (i, frame) in file.patch_frames.iter().enumerate() {
        let patch = payload::decode(frame)
            .map_err(|source| BalanceError::Checkpoint(format!("patch frame {i}: {source}")))?;
        let hindex = patch.hindex;
        if store.insert(patch).is_some() {
            return Err(BalanceError::DuplicatePatch { hindex });
        }
    }

    let costs = CostTable::from_samples(file.cost_samples);
    let restored_patches = store.len();
    process.restore_parts(file.table, costs, store)?;
    tracing::info!(
        path = %path.display(),
        patches = restored_patches,
        "checkpoint restored"
    );
    Ok(())
}
