//! Tagged point-to-point message passing between processes.
//!
//! The subsystem only ever needs three primitives: post a tagged send,
//! complete a matching tagged receive, and a group-wide barrier. This
//! module provides them over in-memory channels with one endpoint per
//! simulated process running in its own thread. The API is shaped so a
//! network transport (sockets, shared memory, an HPC messaging layer)
//! can replace the channel group as a drop-in replacement.

use std::collections::VecDeque;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Barrier};

use crate::error::{BalanceError, Result};

/// Message tag, namespaced per protocol so migration payloads and
/// reduction traffic can never be confused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Migration payload for one patch, tagged by hindex.
    Patch(u64),
    /// Collective reduction traffic for one round and phase.
    Reduce {
        /// Monotonic collective round counter.
        round: u64,
        /// Protocol phase within the round.
        phase: u8,
    },
}

/// One in-flight message.
#[derive(Debug)]
struct Message {
    source: usize,
    tag: Tag,
    bytes: Vec<u8>,
}

/// A process's connection to the group: its rank, senders to every
/// peer, and its own inbox.
pub struct Endpoint {
    rank: usize,
    peers: Vec<Sender<Message>>,
    inbox: Receiver<Message>,
    /// Messages received while waiting for a different (source, tag).
    stash: VecDeque<Message>,
    barrier: Arc<Barrier>,
}

/// Create a fully connected group of `size` endpoints, one per process.
pub fn channel_group(size: usize) -> Vec<Endpoint> {
    assert!(size > 0, "process group must not be empty");
    let barrier = Arc::new(Barrier::new(size));
    let mut senders = Vec::with_capacity(size);
    let mut inboxes = Vec::with_capacity(size);
    for _ in 0..size {
        let (tx, rx) = channel();
        senders.push(tx);
        inboxes.push(rx);
    }
    inboxes
        .into_iter()
        .enumerate()
        .map(|(rank, inbox)| Endpoint {
            rank,
            peers: senders.clone(),
            inbox,
            stash: VecDeque::new(),
            barrier: Arc::clone(&barrier),
        })
        .collect()
}

impl Endpoint {
    /// This process's rank within the group.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Number of processes in the group.
    pub fn size(&self) -> usize {
        self.peers.len()
    }

    /// Post a tagged send to `dest`. Non-blocking: the bytes are owned
    /// by the transport from here on.
    pub fn post_send(&self, dest: usize, tag: Tag, bytes: Vec<u8>) -> Result<()> {
        self.peers[dest]
            .send(Message {
                source: self.rank,
                tag,
                bytes,
            })
            .map_err(|_| BalanceError::Transport { peer: dest })
    }

    /// Complete the receive matching `(source, tag)`, blocking until the
    /// message arrives. Messages for other pending receives are stashed
    /// rather than dropped, so completion order between disjoint tags is
    /// free to interleave.
    pub fn recv_match(&mut self, source: usize, tag: Tag) -> Result<Vec<u8>> {
        if let Some(pos) = self
            .stash
            .iter()
            .position(|m| m.source == source && m.tag == tag)
        {
            let msg = self.stash.remove(pos).expect("position just found");
            return Ok(msg.bytes);
        }
        loop {
            let msg = self
                .inbox
                .recv()
                .map_err(|_| BalanceError::Transport { peer: source })?;
            if msg.source == source && msg.tag == tag {
                return Ok(msg.bytes);
            }
            self.stash.push_back(msg);
        }
    }

    /// Block until every process in the group has entered the barrier.
    pub fn barrier(&self) {
        self.barrier.wait();
    }
}
