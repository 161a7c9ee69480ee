//! Snapshot reconciliation.
//!
//! A probe run yields a [`Snapshot`]: the complete set of label tuples it
//! observed, tagged with the generation of the scheduler tick that produced
//! it. [`reconcile`] makes the family equal to that snapshot: tuples in the
//! snapshot are upserted first, then tuples the family still holds but the
//! snapshot lacks are deleted. Both steps happen under one acquisition of the
//! family's write lock, so a scrape sees either the previous state or the new
//! one.
//!
//! Snapshots are only accepted in generation order. A snapshot whose
//! generation is not newer than the family's committed (or retired)
//! generation is reported as [`ReconcileOutcome::Stale`] and changes nothing.

use std::collections::BTreeMap;

use crate::registry::{LabelTuple, MetricFamily, RegistryError, Series};

/// Value recorded for presence-style series.
pub const PRESENT: f64 = 1.0;

/// Full result of one successful probe run.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    generation: u64,
    samples: BTreeMap<LabelTuple, f64>,
}

impl Snapshot {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            samples: BTreeMap::new(),
        }
    }

    /// Builds a presence snapshot: every tuple gets the value 1.
    pub fn from_tuples(generation: u64, tuples: impl IntoIterator<Item = LabelTuple>) -> Self {
        let mut snapshot = Self::new(generation);
        for tuple in tuples {
            snapshot.insert(tuple);
        }
        snapshot
    }

    pub fn insert(&mut self, tuple: LabelTuple) {
        self.samples.insert(tuple, PRESENT);
    }

    /// Inserts a tuple with an explicit value. A repeated tuple keeps the
    /// last value.
    pub fn insert_value(&mut self, tuple: LabelTuple, value: f64) {
        self.samples.insert(tuple, value);
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn samples(&self) -> &BTreeMap<LabelTuple, f64> {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Counts of what one reconciliation changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
}

impl ReconcileStats {
    /// Number of series in the family after the reconciliation.
    pub fn total(&self) -> usize {
        self.added + self.updated + self.unchanged
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied(ReconcileStats),
    /// The snapshot's generation was already committed or retired.
    Stale { generation: u64, committed: u64 },
}

/// Applies `snapshot` to `family`.
///
/// Every tuple is checked against the family's label schema before the lock
/// is taken; one bad tuple rejects the whole snapshot and leaves the family
/// untouched.
pub fn reconcile(
    family: &MetricFamily,
    snapshot: Snapshot,
) -> Result<ReconcileOutcome, RegistryError> {
    for tuple in snapshot.samples.keys() {
        family.check_arity(tuple)?;
    }

    let generation = snapshot.generation;
    let mut state = family.write();
    if generation <= state.generation {
        return Ok(ReconcileOutcome::Stale {
            generation,
            committed: state.generation,
        });
    }

    let to_remove: Vec<LabelTuple> = state
        .series
        .keys()
        .filter(|tuple| !snapshot.samples.contains_key(*tuple))
        .cloned()
        .collect();

    let mut stats = ReconcileStats::default();
    for (tuple, value) in snapshot.samples {
        match state.series.get_mut(&tuple) {
            Some(series) => {
                if series.value.to_bits() == value.to_bits() {
                    stats.unchanged += 1;
                } else {
                    stats.updated += 1;
                }
                *series = Series { value, generation };
            }
            None => {
                state.series.insert(tuple, Series { value, generation });
                stats.added += 1;
            }
        }
    }

    for tuple in &to_remove {
        state.series.remove(tuple);
    }
    stats.removed = to_remove.len();
    state.generation = generation;

    Ok(ReconcileOutcome::Applied(stats))
}
