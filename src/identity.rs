//! Uniqueness and identity resolution.
//!
//! Unique attributes are always indexed, so every check here is a probe of
//! the `(attribute, value) -> entities` index. Identity attributes turn a
//! collision on a tempid into an upsert: the tempid resolves to the entity
//! already holding the value. Tempids asserting the same identity value in
//! one transaction are unified into a single entity.
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::construct::{Attribute, Datum, Operation, Snapshot, Thing, ThingGenerator, Unique};
use crate::datatype::Value;
use crate::error::{Result, SchemataError};
use crate::transact::{Candidate, Proposal, Target, Tempid};

/// The entity position a unique value is proposed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolving {
    /// A tempid that has not been assigned an entity yet.
    Temp,
    /// An entity that already exists.
    Committed(Thing),
}

fn conflict(attribute: &Attribute, value: &Value, existing: Thing) -> SchemataError {
    SchemataError::UniqueConflict {
        attribute: attribute.ident().to_string(),
        value: value.to_string(),
        existing,
    }
}

/// Resolves the entity a unique value is proposed for. A tempid matching
/// an identity value resolves to the holder (`Some`), an unmatched tempid
/// stays new (`None`), and a committed entity resolves to itself.
pub fn resolve(
    snapshot: &Snapshot,
    resolving: Resolving,
    attribute: &Attribute,
    value: &Value,
) -> Result<Option<Thing>> {
    let holder = holder_of(snapshot, attribute, value);
    match (resolving, holder, attribute.unique()) {
        (Resolving::Temp, None, _) => Ok(None),
        (Resolving::Temp, Some(existing), Some(Unique::Identity)) => Ok(Some(existing)),
        (Resolving::Temp, Some(existing), _) => Err(conflict(attribute, value, existing)),
        (Resolving::Committed(entity), Some(existing), _) if existing != entity => {
            Err(conflict(attribute, value, existing))
        }
        (Resolving::Committed(entity), _, _) => Ok(Some(entity)),
    }
}

fn holder_of(snapshot: &Snapshot, attribute: &Attribute, value: &Value) -> Option<Thing> {
    attribute.unique()?;
    snapshot
        .avet
        .lookup(&(attribute.attribute(), value.clone()))
        .and_then(|holders| holders.iter().next().copied())
}

// a minimal union-find over tempid positions
struct Unification {
    parent: Vec<usize>,
}
impl Unification {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }
    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }
    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a != b {
            // the earlier tempid represents the group
            let (low, high) = if a < b { (a, b) } else { (b, a) };
            self.parent[high] = low;
        }
    }
}

/// Assigns an entity to every tempid asserted in a transaction, in order
/// of first appearance.
pub(crate) fn resolve_tempids(
    snapshot: &Snapshot,
    generator: &mut ThingGenerator,
    proposals: &[&Proposal],
    asserted: &[Tempid],
) -> Result<HashMap<Tempid, Thing>> {
    let position: HashMap<&Tempid, usize> = asserted.iter().enumerate().map(|(i, t)| (t, i)).collect();
    let mut unification = Unification::new(asserted.len());
    let mut upserts: HashMap<usize, Thing> = HashMap::new();
    let mut claimed: HashMap<(Thing, &Value), usize> = HashMap::new();
    let mut matched: Vec<(usize, Thing, &Proposal, &Value)> = Vec::new();
    let mut held: Vec<(usize, Thing, &Proposal, &Value)> = Vec::new();

    for &proposal in proposals {
        let (Operation::Add, Target::Temp(tempid), Candidate::Value(value)) =
            (proposal.operation, &proposal.entity, &proposal.value)
        else {
            continue;
        };
        let Some(&i) = position.get(tempid) else {
            continue;
        };
        match proposal.attribute.unique() {
            Some(Unique::Identity) => {
                if let Some(existing) = resolve(snapshot, Resolving::Temp, &proposal.attribute, value)? {
                    matched.push((i, existing, proposal, value));
                }
                match claimed.get(&(proposal.attribute.attribute(), value)) {
                    Some(&other) => unification.union(i, other),
                    None => {
                        claimed.insert((proposal.attribute.attribute(), value), i);
                    }
                }
            }
            Some(Unique::Value) => {
                if let Some(existing) = holder_of(snapshot, &proposal.attribute, value) {
                    held.push((i, existing, proposal, value));
                }
            }
            None => {}
        }
    }
    // one group of tempids may upsert into at most one existing entity
    for (i, existing, proposal, value) in matched {
        let root = unification.find(i);
        match upserts.get(&root) {
            Some(&other) if other != existing => {
                return Err(conflict(&proposal.attribute, value, other));
            }
            Some(_) => {}
            None => {
                upserts.insert(root, existing);
            }
        }
    }

    // a held unique value is only acceptable on the entity it is held by
    for (i, existing, proposal, value) in held {
        if upserts.get(&unification.find(i)) != Some(&existing) {
            return Err(conflict(&proposal.attribute, value, existing));
        }
    }

    let mut assigned: HashMap<usize, Thing> = HashMap::new();
    let mut tempids = HashMap::new();
    for (i, tempid) in asserted.iter().enumerate() {
        let root = unification.find(i);
        let thing = match (upserts.get(&root), assigned.get(&root)) {
            (Some(&existing), _) => existing,
            (None, Some(&thing)) => thing,
            (None, None) => {
                let thing = generator.generate();
                assigned.insert(root, thing);
                thing
            }
        };
        if root != i || upserts.contains_key(&root) {
            debug!(tempid = %tempid, entity = thing, "tempid unified");
        }
        tempids.insert(tempid.clone(), thing);
    }
    Ok(tempids)
}

/// Verifies that no unique value added in a transaction is held by more
/// than one entity once it has been applied.
pub(crate) fn check_unique(snapshot: &Snapshot, datums: &[Arc<Datum>]) -> Result<()> {
    for datum in datums.iter().filter(|d| d.added()) {
        let Some(attribute) = snapshot.attribute_keeper.lookup(&datum.attribute()) else {
            continue;
        };
        if attribute.unique().is_none() {
            continue;
        }
        let holders = snapshot.avet.lookup(&(attribute.attribute(), datum.value().clone()));
        if let Some(existing) = holders
            .into_iter()
            .flatten()
            .copied()
            .find(|&holder| holder != datum.entity())
        {
            return Err(conflict(&attribute, datum.value(), existing));
        }
    }
    Ok(())
}

/// Verifies that the values already held for an attribute that has just
/// become unique do not collide.
pub(crate) fn check_existing_unique(snapshot: &Snapshot, attribute: &Attribute) -> Result<()> {
    let mut seen: HashMap<&Value, Thing> = HashMap::new();
    for (entity, values) in snapshot.eav.iter() {
        for value in values.get(&attribute.attribute()).into_iter().flatten() {
            if let Some(&existing) = seen.get(value) {
                return Err(conflict(attribute, value, existing));
            }
            seen.insert(value, *entity);
        }
    }
    Ok(())
}
