//! Dynamic Domain Decomposition and Load Balancing
//!
//! This crate maps spatial patches to owning processes, periodically
//! recomputes that mapping to equalize measured per-patch cost across
//! processes with heterogeneous capability, and migrates the full state
//! of reassigned patches between processes without deadlock or data
//! loss. It also provides the collective reductions diagnostics need.
//!
//! # Modules
//! - [`config`] -- JSON run configuration with validation.
//! - [`ownership`] -- Contiguous hindex ranges per process; diffing.
//! - [`cost`] -- Per-patch cost accumulation per rebalance interval.
//! - [`balance`] -- Greedy capability-weighted repartitioning.
//! - [`transport`] -- Tagged point-to-point messaging and barriers.
//! - [`migrate`] -- Asynchronous whole-patch transfer protocol.
//! - [`reduce`] -- All-reduce of scalar and histogram diagnostics.
//! - [`runner`] -- Per-process driver: `step()`, cadence, cost intake.
//! - [`checkpoint`] -- Persist ownership + costs + patches.
//! - [`error`] -- Error taxonomy.

#![warn(missing_docs)]

pub mod balance;
pub mod checkpoint;
pub mod config;
pub mod cost;
pub mod error;
pub mod migrate;
pub mod ownership;
pub mod reduce;
pub mod runner;
pub mod transport;

pub use balance::{rebalance, BalancePolicy};
pub use config::RunConfig;
pub use cost::CostTable;
pub use error::{BalanceError, Result};
pub use migrate::{migrate, MigrationReport};
pub use ownership::{MigrationRequest, OwnershipTable};
pub use reduce::{DiagValue, DiagnosticRegistry, ReduceOp};
pub use runner::{Process, StepOutcome};
pub use transport::{channel_group, Endpoint, Tag};
