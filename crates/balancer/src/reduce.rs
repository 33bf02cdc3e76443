//! Collective reductions across the process group.
//!
//! Diagnostics need globally aggregated values (sums, minima, maxima of
//! scalars and histogram-shaped quantities) that come out identical on
//! every process. The implementation gathers to rank 0, folds, and
//! broadcasts the result -- all-reduce semantics over the point-to-point
//! transport.
//!
//! A collective must either complete on all processes or the whole run
//! aborts: partial participation deadlocks the group. To turn the
//! deadlock into a diagnosable failure, every round starts with a
//! lightweight handshake comparing key-set fingerprints before any
//! value is exchanged.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::error::{BalanceError, Result};
use crate::transport::{Endpoint, Tag};

const PHASE_FINGERPRINT: u8 = 0;
const PHASE_VERDICT: u8 = 1;
const PHASE_GATHER: u8 = 2;
const PHASE_RESULT: u8 = 3;
const PHASE_COST_GATHER: u8 = 4;
const PHASE_COST_RESULT: u8 = 5;

/// Reduction operator applied per diagnostic key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReduceOp {
    /// Elementwise sum.
    Sum,
    /// Elementwise minimum.
    Min,
    /// Elementwise maximum.
    Max,
}

/// A diagnostic value participating in a reduction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DiagValue {
    /// A single scalar.
    Scalar(f64),
    /// A binned quantity, reduced elementwise.
    Histogram(Vec<f64>),
}

/// The diagnostic keys a run reduces each cadence, with their
/// operators. All processes must register identical sets.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticRegistry {
    ops: BTreeMap<String, ReduceOp>,
}

impl DiagnosticRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a key with its reduction operator. Re-registering a key
    /// replaces its operator.
    pub fn register(&mut self, key: impl Into<String>, op: ReduceOp) {
        self.ops.insert(key.into(), op);
    }

    /// Operator registered for `key`, if any.
    pub fn op(&self, key: &str) -> Option<ReduceOp> {
        self.ops.get(key).copied()
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether no keys are registered.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    fn fingerprint(&self, values: &BTreeMap<String, DiagValue>) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        for (key, op) in &self.ops {
            key.hash(&mut hasher);
            op.hash(&mut hasher);
            match values.get(key) {
                Some(DiagValue::Scalar(_)) => 1u8.hash(&mut hasher),
                Some(DiagValue::Histogram(bins)) => {
                    2u8.hash(&mut hasher);
                    bins.len().hash(&mut hasher);
                }
                None => 0u8.hash(&mut hasher),
            }
        }
        hasher.finish()
    }
}

/// All-reduce `values` across the group according to the registry's
/// operators. Every process receives the identical result map.
///
/// Fails with [`BalanceError::CollectiveMismatch`] on every process if
/// the group disagrees on keys, operators, or histogram shapes.
pub fn all_reduce(
    endpoint: &mut Endpoint,
    round: u64,
    registry: &DiagnosticRegistry,
    values: &BTreeMap<String, DiagValue>,
) -> Result<BTreeMap<String, DiagValue>> {
    for key in values.keys() {
        if registry.op(key).is_none() {
            return Err(BalanceError::CollectiveMismatch(format!(
                "value for unregistered key {key:?}"
            )));
        }
    }

    // Handshake: agree on participation before exchanging any value.
    let fingerprint = registry.fingerprint(values);
    handshake(endpoint, round, fingerprint)?;

    let size = endpoint.size();
    if endpoint.rank() == 0 {
        let mut folded = values.clone();
        for peer in 1..size {
            let bytes = endpoint.recv_match(peer, Tag::Reduce { round, phase: PHASE_GATHER })?;
            let theirs: BTreeMap<String, DiagValue> = bincode::deserialize(&bytes)?;
            for (key, value) in theirs {
                let op = registry.op(&key).ok_or_else(|| {
                    BalanceError::CollectiveMismatch(format!("peer {peer} sent unknown key {key:?}"))
                })?;
                match folded.remove(&key) {
                    Some(mine) => {
                        folded.insert(key, combine(op, mine, value)?);
                    }
                    None => {
                        folded.insert(key, value);
                    }
                }
            }
        }
        let bytes = bincode::serialize(&folded)?;
        for peer in 1..size {
            endpoint.post_send(peer, Tag::Reduce { round, phase: PHASE_RESULT }, bytes.clone())?;
        }
        Ok(folded)
    } else {
        let bytes = bincode::serialize(values)?;
        endpoint.post_send(0, Tag::Reduce { round, phase: PHASE_GATHER }, bytes)?;
        let bytes = endpoint.recv_match(0, Tag::Reduce { round, phase: PHASE_RESULT })?;
        Ok(bincode::deserialize(&bytes)?)
    }
}

/// Elementwise sum of equal-length vectors across the group, used to
/// combine per-process cost tables so every process can then derive a
/// byte-identical ownership table deterministically.
pub fn sum_vectors(endpoint: &mut Endpoint, round: u64, local: &[f64]) -> Result<Vec<f64>> {
    let size = endpoint.size();
    if endpoint.rank() == 0 {
        let mut folded = local.to_vec();
        for peer in 1..size {
            let bytes =
                endpoint.recv_match(peer, Tag::Reduce { round, phase: PHASE_COST_GATHER })?;
            let theirs: Vec<f64> = bincode::deserialize(&bytes)?;
            if theirs.len() != folded.len() {
                return Err(BalanceError::CollectiveMismatch(format!(
                    "cost vector length {} from peer {peer}, expected {}",
                    theirs.len(),
                    folded.len()
                )));
            }
            for (mine, other) in folded.iter_mut().zip(theirs) {
                *mine += other;
            }
        }
        let bytes = bincode::serialize(&folded)?;
        for peer in 1..size {
            endpoint.post_send(peer, Tag::Reduce { round, phase: PHASE_COST_RESULT }, bytes.clone())?;
        }
        Ok(folded)
    } else {
        let bytes = bincode::serialize(local)?;
        endpoint.post_send(0, Tag::Reduce { round, phase: PHASE_COST_GATHER }, bytes)?;
        let bytes = endpoint.recv_match(0, Tag::Reduce { round, phase: PHASE_COST_RESULT })?;
        Ok(bincode::deserialize(&bytes)?)
    }
}

/// Compare key-set fingerprints across the group before the reduction
/// proper. Rank 0 collects and broadcasts the verdict, so every process
/// observes the same outcome.
fn handshake(endpoint: &mut Endpoint, round: u64, fingerprint: u64) -> Result<()> {
    let size = endpoint.size();
    if endpoint.rank() == 0 {
        let mut agreed = true;
        for peer in 1..size {
            let bytes =
                endpoint.recv_match(peer, Tag::Reduce { round, phase: PHASE_FINGERPRINT })?;
            let theirs = u64::from_le_bytes(bytes.try_into().map_err(|_| {
                BalanceError::CollectiveMismatch("malformed fingerprint".into())
            })?);
            if theirs != fingerprint {
                agreed = false;
            }
        }
        for peer in 1..size {
            endpoint.post_send(
                peer,
                Tag::Reduce { round, phase: PHASE_VERDICT },
                vec![u8::from(agreed)],
            )?;
        }
        if !agreed {
            return Err(BalanceError::CollectiveMismatch(
                "processes disagree on diagnostic keys".into(),
            ));
        }
    } else {
        endpoint.post_send(
            0,
            Tag::Reduce { round, phase: PHASE_FINGERPRINT },
            fingerprint.to_le_bytes().to_vec(),
        )?;
        let verdict = endpoint.recv_match(0, Tag::Reduce { round, phase: PHASE_VERDICT })?;
        if verdict != [1] {
            return Err(BalanceError::CollectiveMismatch(
                "processes disagree on diagnostic keys".into(),
            ));
        }
    }
    Ok(())
}

fn combine(op: ReduceOp, a: DiagValue, b: DiagValue) -> Result<DiagValue> {
    match (a, b) {
        (DiagValue::Scalar(x), DiagValue::Scalar(y)) => Ok(DiagValue::Scalar(fold(op, x, y))),
        (DiagValue::Histogram(xs), DiagValue::Histogram(ys)) => {
            if xs.len() != ys.len() {
                return Err(BalanceError::CollectiveMismatch(format!(
                    "histogram shapes differ: {} vs {} bins",
                    xs.len(),
                    ys.len()
                )));
            }
            Ok(DiagValue::Histogram(
                xs.into_iter().zip(ys).map(|(x, y)| fold(op, x, y)).collect(),
            ))
        }
        _ => Err(BalanceError::CollectiveMismatch(
            "scalar reduced against histogram".into(),
        )),
    }
}

fn fold(op: ReduceOp, x: f64, y: f64) -> f64 {
    match op {
        ReduceOp::Sum => x + y,
        ReduceOp::Min => x.min(y),
        ReduceOp::Max => x.max(y),
    }
}
