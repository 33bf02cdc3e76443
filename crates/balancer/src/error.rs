//! Error taxonomy for the decomposition and balancing subsystem.
//!
//! `OutOfRange` and `MissingPatch` signal caller bugs and are
//! recoverable at the call site. Payload integrity and collective
//! mismatch failures mean the simulation state is no longer
//! trustworthy; callers are expected to abort the whole process group
//! rather than continue split-brained.

use patches::PayloadError;

/// Errors produced by the balancing subsystem.
#[derive(Debug, thiserror::Error)]
pub enum BalanceError {
    /// An hindex lookup outside the global patch total.
    #[error("hindex {hindex} out of range (total patches {total})")]
    OutOfRange {
        /// Offending hindex.
        hindex: u64,
        /// Global patch total of the table consulted.
        total: u64,
    },

    /// A migration request named a patch the source store does not own.
    #[error("migration source does not own patch {hindex}")]
    MissingPatch {
        /// Hindex of the absent patch.
        hindex: u64,
    },

    /// A received patch was already locally owned, meaning two tables
    /// that should be disjoint partitions were not.
    #[error("received patch {hindex} is already owned locally")]
    DuplicatePatch {
        /// Hindex of the doubly owned patch.
        hindex: u64,
    },

    /// A migration payload failed its integrity checks. Fatal.
    #[error("malformed migration payload for patch {hindex}")]
    Payload {
        /// Hindex the payload was tagged with.
        hindex: u64,
        /// Underlying framing failure.
        #[source]
        source: PayloadError,
    },

    /// Processes disagreed on collective participation. Fatal: the
    /// alternative is a deadlocked reduction.
    #[error("collective reduction mismatch: {0}")]
    CollectiveMismatch(String),

    /// A transport endpoint disappeared mid-run. Fatal: the process
    /// set is assumed fixed and reliable, so there is nothing to retry.
    #[error("transport peer {peer} disconnected")]
    Transport {
        /// Rank of the unreachable peer.
        peer: usize,
    },

    /// Invalid run configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A checkpoint failed its integrity checks on restore.
    #[error("corrupt checkpoint: {0}")]
    Checkpoint(String),

    /// Checkpoint file I/O failure.
    #[error("checkpoint I/O error")]
    Io(#[from] std::io::Error),

    /// Checkpoint (de)serialization failure.
    #[error("checkpoint codec error")]
    Codec(#[from] bincode::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BalanceError>;
