//! Patch migration between processes after a rebalance.
//!
//! Requests come from diffing two valid ownership tables, so each
//! hindex has exactly one source and one destination and every posted
//! send has exactly one matching receive. No acknowledgement handshake
//! is needed: posting is sufficient. A closing barrier guarantees every
//! outstanding transfer for the rebalance has completed before the next
//! timestep touches any patch.

use patches::{payload, PatchStore};

use crate::error::{BalanceError, Result};
use crate::ownership::MigrationRequest;
use crate::transport::{Endpoint, Tag};

/// Counts of what this process moved during one migrate cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Patches this process sent away.
    pub sent: usize,
    /// Patches this process received.
    pub received: usize,
}

/// Execute every migration request involving this process, then wait
/// for the whole group at the closing barrier.
///
/// Requests where this process is the old owner serialize the patch,
/// post the send, and destructively remove the patch from the local
/// store; the transport owns the state from that point. Requests where
/// this process is the new owner complete the matching tagged receive,
/// validate the payload, and insert the rebuilt patch.
///
/// Requests involving other process pairs are ignored; every process in
/// the group must be given the same request sequence.
pub fn migrate(
    requests: &[MigrationRequest],
    store: &mut PatchStore,
    endpoint: &mut Endpoint,
) -> Result<MigrationReport> {
    let rank = endpoint.rank();
    let mut report = MigrationReport::default();

    // Post all outgoing transfers before completing any receive, so no
    // pair of processes can wait on each other's unposted sends.
    for request in requests.iter().filter(|r| r.old_owner == rank) {
        // Removing at post time assumes the transport never drops a
        // posted message. A lossy transport must keep the patch until
        // the receive is acknowledged.
        let patch = store
            .remove(request.hindex)
            .ok_or(BalanceError::MissingPatch { hindex: request.hindex })?;
        let frame = payload::encode(&patch).map_err(|source| BalanceError::Payload {
            hindex: request.hindex,
            source,
        })?;
        tracing::debug!(
            hindex = request.hindex,
            to = request.new_owner,
            particles = patch.particle_count(),
            bytes = frame.len(),
            "patch send posted"
        );
        endpoint.post_send(request.new_owner, Tag::Patch(request.hindex), frame)?;
        report.sent += 1;
    }

    for request in requests.iter().filter(|r| r.new_owner == rank) {
        let frame = endpoint.recv_match(request.old_owner, Tag::Patch(request.hindex))?;
        let patch = payload::decode(&frame).map_err(|source| BalanceError::Payload {
            hindex: request.hindex,
            source,
        })?;
        tracing::debug!(
            hindex = request.hindex,
            from = request.old_owner,
            particles = patch.particle_count(),
            "patch received"
        );
        if store.insert(patch).is_some() {
            return Err(BalanceError::DuplicatePatch { hindex: request.hindex });
        }
        report.received += 1;
    }

    // Sole synchronization point: after this, every send and receive of
    // the current rebalance has completed group-wide, so every sent
    // patch is released and every received one owned.
    endpoint.barrier();

    if report.sent > 0 || report.received > 0 {
        tracing::info!(
            rank,
            sent = report.sent,
            received = report.received,
            "migration cycle complete"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::channel_group;
    use patches::{Patch, ParticleArrays};
    use std::thread;

    fn patch_with_particles(hindex: u64, count: usize) -> Patch {
        let mut patch = Patch::new(hindex, (hindex, 0));
        let mut sp = ParticleArrays::new();
        for i in 0..count {
            sp.push_particle(i as f64 * 0.1, 0.0, [1.0, 0.0, 0.0], 1.0, -1.0);
        }
        patch.species.push(sp);
        patch
    }

    #[test]
    fn two_process_exchange_preserves_every_patch() {
        let requests = vec![
            MigrationRequest { hindex: 2, old_owner: 0, new_owner: 1 },
            MigrationRequest { hindex: 5, old_owner: 1, new_owner: 0 },
            MigrationRequest { hindex: 6, old_owner: 1, new_owner: 0 },
        ];

        let mut group = channel_group(2);
        let mut p1 = group.pop().unwrap();
        let mut p0 = group.pop().unwrap();

        let requests_clone = requests.clone();
        let handle = thread::spawn(move || {
            let mut store = PatchStore::new();
            store.insert(patch_with_particles(5, 4));
            store.insert(patch_with_particles(6, 2));
            let report = migrate(&requests_clone, &mut store, &mut p1).unwrap();
            (store, report)
        });

        let mut store0 = PatchStore::new();
        store0.insert(patch_with_particles(2, 3));
        let report0 = migrate(&requests, &mut store0, &mut p0).unwrap();
        let (store1, report1) = handle.join().unwrap();

        assert_eq!(report0, MigrationReport { sent: 1, received: 2 });
        assert_eq!(report1, MigrationReport { sent: 2, received: 1 });

        assert_eq!(store0.hindices(), vec![5, 6]);
        assert_eq!(store1.hindices(), vec![2]);
        // Conservation: 3 + 4 + 2 particles, redistributed but intact.
        assert_eq!(store0.total_particles() + store1.total_particles(), 9);
    }

    #[test]
    fn missing_source_patch_is_a_caller_bug() {
        let requests = vec![MigrationRequest { hindex: 1, old_owner: 0, new_owner: 1 }];
        let mut group = channel_group(2);
        let _p1 = group.pop().unwrap();
        let mut p0 = group.pop().unwrap();

        let mut empty = PatchStore::new();
        let err = migrate(&requests, &mut empty, &mut p0).unwrap_err();
        assert!(matches!(err, BalanceError::MissingPatch { hindex: 1 }));
    }
}
