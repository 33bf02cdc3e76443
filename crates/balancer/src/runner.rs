//! Per-process driver tying the subsystem together.
//!
//! Each process owns a [`Process`]: its patch store, the ownership
//! table (identical on every rank), and the cost table for the current
//! rebalance interval. `step()` advances the simulation one unit and
//! internally decides whether the step triggers a rebalance and the
//! migrations that follow.
//!
//! Cost samples are summed across the group and every rank then runs
//! the same deterministic partitioner, so all ranks derive identical
//! tables without a coordinating broadcast.

use std::sync::Mutex;

use patches::{Patch, PatchGrid, PatchStore};

use crate::balance::{self, BalancePolicy};
use crate::config::RunConfig;
use crate::cost::CostTable;
use crate::error::{BalanceError, Result};
use crate::migrate::{self, MigrationReport};
use crate::ownership::OwnershipTable;
use crate::reduce::{self, DiagValue, DiagnosticRegistry, ReduceOp};
use crate::transport::Endpoint;

/// What one call to [`Process::step`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    /// Step counter after this step.
    pub step: u64,
    /// Whether this step attempted a rebalance (cadence reached).
    pub rebalance_attempted: bool,
    /// Migration activity, present when the table actually changed.
    pub migration: Option<MigrationReport>,
}

/// One process's view of the decomposed run.
pub struct Process {
    grid: PatchGrid,
    capabilities: Vec<f64>,
    policy: BalancePolicy,
    rebalance_every: u64,
    step_count: u64,
    reduce_round: u64,
    table: OwnershipTable,
    /// Concurrent writers: physics worker threads record cost for the
    /// patches they were assigned.
    costs: Mutex<CostTable>,
    store: PatchStore,
    endpoint: Endpoint,
    diagnostics: DiagnosticRegistry,
}

impl Process {
    /// Create a process from its endpoint and the run configuration.
    /// The initial ownership table is the proportional capability split;
    /// the store starts empty (see [`Process::seed_owned`]).
    pub fn new(endpoint: Endpoint, config: &RunConfig) -> Result<Self> {
        config.validate()?;
        if endpoint.size() != config.process_count {
            return Err(BalanceError::Config(format!(
                "endpoint group has {} processes, config says {}",
                endpoint.size(),
                config.process_count
            )));
        }
        let grid = PatchGrid::new(config.grid_order);
        let capabilities = config.capability_vector();
        let table = OwnershipTable::build(grid.total_patches(), &capabilities);
        let costs = Mutex::new(CostTable::new(grid.total_patches()));
        Ok(Self {
            grid,
            capabilities,
            policy: config.policy(),
            rebalance_every: config.rebalance_every,
            step_count: 0,
            reduce_round: 0,
            table,
            costs,
            store: PatchStore::new(),
            endpoint,
            diagnostics: DiagnosticRegistry::new(),
        })
    }

    /// This process's rank.
    pub fn rank(&self) -> usize {
        self.endpoint.rank()
    }

    /// The patch grid shared by the whole run.
    pub fn grid(&self) -> &PatchGrid {
        &self.grid
    }

    /// The current ownership table (identical on every rank).
    pub fn table(&self) -> &OwnershipTable {
        &self.table
    }

    /// The locally owned patches.
    pub fn store(&self) -> &PatchStore {
        &self.store
    }

    /// Mutable access to the locally owned patches.
    pub fn store_mut(&mut self) -> &mut PatchStore {
        &mut self.store
    }

    /// Steps executed so far.
    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    /// Rank currently owning `hindex`, for collaborators that need to
    /// address a specific patch's process.
    pub fn owner_of(&self, hindex: u64) -> Result<usize> {
        self.table.owner_of(hindex)
    }

    /// Accumulate measured kernel cost against a patch. Callable from
    /// physics worker threads while a step is in flight.
    pub fn record_cost(&self, hindex: u64, seconds: f64) {
        self.costs
            .lock()
            .expect("cost table lock poisoned")
            .record(hindex, seconds);
    }

    /// Register a diagnostic key for collective reduction.
    pub fn register_diagnostic(&mut self, key: impl Into<String>, op: ReduceOp) {
        self.diagnostics.register(key, op);
    }

    /// Populate the store with this rank's initial range, building each
    /// patch from its hindex and grid coordinates.
    pub fn seed_owned(&mut self, mut build: impl FnMut(u64, (u64, u64)) -> Patch) {
        for hindex in self.table.range_of(self.rank()) {
            let coords = self.grid.hindex_to_coordinates(hindex);
            let patch = build(hindex, coords);
            debug_assert_eq!(patch.hindex, hindex, "seeded patch disagrees on hindex");
            self.store.insert(patch);
        }
        tracing::info!(
            rank = self.rank(),
            patches = self.store.len(),
            particles = self.store.total_particles(),
            "store seeded"
        );
    }

    /// Advance the simulation by one unit: run `kernel` over every
    /// locally owned patch, record its measured cost, and on the
    /// configured cadence rebalance and migrate.
    ///
    /// No patch is read or written by kernels while its migration is
    /// outstanding: migration happens strictly after the kernel sweep,
    /// and ends with the group-wide barrier.
    pub fn step(&mut self, mut kernel: impl FnMut(&mut Patch) -> f64) -> Result<StepOutcome> {
        for hindex in self.store.hindices() {
            let patch = self.store.get_mut(hindex).expect("hindex listed but absent");
            let elapsed = kernel(patch);
            self.record_cost(hindex, elapsed);
        }
        self.step_count += 1;

        let mut outcome = StepOutcome {
            step: self.step_count,
            rebalance_attempted: false,
            migration: None,
        };
        if self.step_count % self.rebalance_every == 0 {
            outcome.rebalance_attempted = true;
            outcome.migration = self.rebalance_and_migrate()?;
        }
        Ok(outcome)
    }

    /// Reduce `values` across the group under the registered operators.
    /// Every rank receives the identical result.
    pub fn reduce_diagnostics(
        &mut self,
        values: &std::collections::BTreeMap<String, DiagValue>,
    ) -> Result<std::collections::BTreeMap<String, DiagValue>> {
        let round = self.next_round();
        reduce::all_reduce(&mut self.endpoint, round, &self.diagnostics, values)
    }

    /// Read and zero the cost table, derive the new table identically on
    /// every rank, and migrate reassigned patches. Returns the migration
    /// report when the table changed.
    fn rebalance_and_migrate(&mut self) -> Result<Option<MigrationReport>> {
        let interval = self
            .costs
            .lock()
            .expect("cost table lock poisoned")
            .take();
        let round = self.next_round();
        let global = reduce::sum_vectors(&mut self.endpoint, round, interval.samples())?;

        let candidate = balance::rebalance(&global, &self.table, &self.capabilities, &self.policy);
        if candidate == self.table {
            tracing::debug!(rank = self.rank(), step = self.step_count, "no rebalance needed");
            return Ok(None);
        }

        let requests = OwnershipTable::diff(&self.table, &candidate);
        tracing::info!(
            rank = self.rank(),
            step = self.step_count,
            reassigned = requests.len(),
            "ownership changed, migrating"
        );
        let report = migrate::migrate(&requests, &mut self.store, &mut self.endpoint)?;
        self.table = candidate;
        debug_assert_eq!(
            self.store.len() as u64,
            self.table.range_of(self.rank()).end - self.table.range_of(self.rank()).start,
            "store out of sync with ownership table"
        );
        Ok(Some(report))
    }

    /// Monotonic collective round counter; every rank advances it in
    /// lockstep because collectives happen at the same points of the
    /// same step sequence.
    fn next_round(&mut self) -> u64 {
        self.reduce_round += 1;
        self.reduce_round
    }

    /// Split this process into its checkpointable parts.
    pub(crate) fn checkpoint_parts(&self) -> (&OwnershipTable, CostTable, &PatchStore) {
        let costs = self
            .costs
            .lock()
            .expect("cost table lock poisoned")
            .clone();
        (&self.table, costs, &self.store)
    }

    /// Replace table, cost samples, and store from a checkpoint, so the
    /// restored run reproduces identical ownership rather than a
    /// freshly rebalanced one.
    pub(crate) fn restore_parts(
        &mut self,
        table: OwnershipTable,
        costs: CostTable,
        store: PatchStore,
    ) -> Result<()> {
        if table.total_patches() != self.grid.total_patches() {
            return Err(BalanceError::Config(format!(
                "checkpoint covers {} patches, grid has {}",
                table.total_patches(),
                self.grid.total_patches()
            )));
        }
        if table.process_count() != self.endpoint.size() {
            return Err(BalanceError::Config(format!(
                "checkpoint has {} processes, group has {}",
                table.process_count(),
                self.endpoint.size()
            )));
        }
        self.table = table;
        *self.costs.lock().expect("cost table lock poisoned") = costs;
        self.store = store;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::channel_group;

    fn single_process(grid_order: u32, rebalance_every: u64) -> Process {
        let config = RunConfig {
            name: "unit".to_string(),
            grid_order,
            process_count: 1,
            capabilities: None,
            rebalance_every,
            improvement_threshold: 0.05,
            cost_floor: 1e-9,
            max_timesteps: None,
        };
        let endpoint = channel_group(1).pop().unwrap();
        Process::new(endpoint, &config).unwrap()
    }

    #[test]
    fn step_runs_kernel_over_owned_patches() {
        let mut process = single_process(1, 10);
        process.seed_owned(|h, coords| Patch::new(h, coords));

        let mut visited = Vec::new();
        let outcome = process
            .step(|patch| {
                visited.push(patch.hindex);
                0.5
            })
            .unwrap();

        assert_eq!(visited, vec![0, 1, 2, 3]);
        assert_eq!(outcome.step, 1);
        assert!(!outcome.rebalance_attempted);
    }

    #[test]
    fn cadence_triggers_rebalance_and_resets_costs() {
        let mut process = single_process(1, 2);
        process.seed_owned(|h, coords| Patch::new(h, coords));

        process.step(|_| 1.0).unwrap();
        let outcome = process.step(|_| 1.0).unwrap();
        assert!(outcome.rebalance_attempted);
        // Single process: table cannot change, so no migration.
        assert!(outcome.migration.is_none());
        // Cost table was read and zeroed by the rebalance.
        let (_, costs, _) = process.checkpoint_parts();
        assert_eq!(costs.total(), 0.0);
    }

    #[test]
    fn owner_of_delegates_to_table() {
        let process = single_process(1, 10);
        assert_eq!(process.owner_of(3).unwrap(), 0);
        assert!(process.owner_of(99).is_err());
    }
}
