//! The history policy.
//!
//! Every committed datum is appended to the snapshot's log, unless its
//! attribute is flagged `db/noHistory`. For such attributes, superseding
//! or retracting a value physically discards the datums that asserted it,
//! so only the latest value can ever be read back from history.
use std::sync::Arc;

use tracing::trace;

use crate::construct::{Attribute, AttributeKeeper, Datum, Operation, Snapshot, Thing};
use crate::datatype::Value;
use crate::schema;

/// A fully resolved proposal: nothing in it refers to tempids or idents.
#[derive(Debug, Clone)]
pub struct Fact {
    pub operation: Operation,
    pub entity: Thing,
    pub attribute: Arc<Attribute>,
    pub value: Value,
}

/// Applies one fact to the staged snapshot and returns the datums it
/// committed. Facts that would not change the current state commit nothing.
pub fn apply(snapshot: &mut Snapshot, fact: Fact, tx: Thing, t: u64) -> Vec<Arc<Datum>> {
    let Fact {
        operation,
        entity,
        attribute,
        value,
    } = fact;
    let mut committed = Vec::new();
    match operation {
        Operation::Add => {
            if snapshot.holds(entity, attribute.attribute(), &value) {
                return committed;
            }
            if !attribute.many() {
                let superseded = snapshot.current(entity, attribute.attribute()).to_vec();
                for old in superseded {
                    committed.push(retract(snapshot, entity, &attribute, old, tx, t));
                }
            }
            snapshot.thing_generator.retain(entity);
            snapshot.insert_value(entity, &attribute, value.clone());
            let datum = Arc::new(Datum::new(entity, attribute.attribute(), value, tx, t, Operation::Add));
            snapshot.history.push_back(Arc::clone(&datum));
            committed.push(datum);
        }
        Operation::Retract => {
            if snapshot.holds(entity, attribute.attribute(), &value) {
                committed.push(retract(snapshot, entity, &attribute, value, tx, t));
            }
        }
    }
    committed
}

fn retract(
    snapshot: &mut Snapshot,
    entity: Thing,
    attribute: &Attribute,
    value: Value,
    tx: Thing,
    t: u64,
) -> Arc<Datum> {
    snapshot.remove_value(entity, attribute, &value);
    let datum = Arc::new(Datum::new(entity, attribute.attribute(), value, tx, t, Operation::Retract));
    if attribute.no_history() {
        let before = snapshot.history.len();
        snapshot.history.retain(|d| {
            !(d.entity() == entity && d.attribute() == attribute.attribute() && d.value() == datum.value())
        });
        trace!(
            attribute = %attribute.ident(),
            discarded = before - snapshot.history.len(),
            "history discarded"
        );
    } else {
        snapshot.history.push_back(Arc::clone(&datum));
    }
    datum
}

/// Extends the ledger hash chain with the datums of one transaction.
pub(crate) fn chain(previous: Option<&blake3::Hash>, datums: &[Arc<Datum>]) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    if let Some(previous) = previous {
        hasher.update(previous.as_bytes());
    }
    for datum in datums {
        hasher.update(datum.to_string().as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize()
}

impl Snapshot {
    /// The database as it was at basis `t`, rebuilt from the retained history.
    /// Values of no-history attributes that have since been superseded are
    /// gone from the log and so are absent from the past as well.
    pub fn as_of(&self, t: u64) -> Snapshot {
        if t >= self.basis_t {
            return self.clone();
        }
        let mut past = Snapshot::empty();
        // replay with the present metadata, then derive what held at t
        past.attribute_keeper = self.attribute_keeper.clone();
        for datum in self.history.iter().take_while(|d| d.t() <= t) {
            let Some(attribute) = self.attribute_keeper.lookup(&datum.attribute()) else {
                continue;
            };
            past.thing_generator.retain(datum.entity());
            past.thing_generator.retain(datum.tx());
            if datum.added() {
                past.insert_value(datum.entity(), &attribute, datum.value().clone());
            } else {
                past.remove_value(datum.entity(), &attribute, datum.value());
            }
            past.history.push_back(Arc::clone(datum));
        }
        let mut keeper = AttributeKeeper::new();
        for attribute in self.attribute_keeper.iter() {
            if past.ident(attribute.attribute()).is_none() {
                continue;
            }
            if let Ok(derived) = schema::derive(&past, attribute.attribute()) {
                keeper.keep(derived);
            }
        }
        past.attribute_keeper = keeper;
        past.avet.clear();
        let attributes: Vec<Arc<Attribute>> = past.attribute_keeper.iter().map(Arc::clone).collect();
        for attribute in attributes.iter().filter(|a| a.indexed()) {
            past.reindex(attribute);
        }
        past.transactions = self.transactions.iter().take(t as usize + 1).copied().collect();
        past.ledger = self.ledger.iter().take(t as usize + 1).copied().collect();
        past.basis_t = t;
        past
    }
}
