//! References, idents and component ownership.
//!
//! Component references make the referenced entity part of the referencing
//! one. Retracting an entity therefore retracts everything it owns, however
//! deeply, and the traversal keeps a visited set so that a cyclic graph of
//! component references still yields a finite cascade.
use std::collections::BTreeMap;

use roaring::RoaringTreemap;
use serde_json::json;

use crate::construct::{Operation, Snapshot, Thing};
use crate::datatype::{Keyword, Value};
use crate::error::{Result, SchemataError};
use crate::history::Fact;
use crate::transact::Target;

/// Resolves a symbolic ident to the entity it names.
pub fn resolve_ref(snapshot: &Snapshot, ident: &Keyword) -> Result<Thing> {
    snapshot
        .idents
        .get_by_left(ident)
        .copied()
        .ok_or_else(|| SchemataError::UnknownIdent(ident.to_string()))
}

pub(crate) fn resolve_target(snapshot: &Snapshot, target: &Target) -> Result<Thing> {
    match target {
        Target::Id(thing) => match snapshot.exists(*thing) {
            true => Ok(*thing),
            false => Err(SchemataError::UnknownEntity(*thing)),
        },
        Target::Ident(ident) => resolve_ref(snapshot, ident),
        Target::Lookup(attribute, value) => snapshot
            .avet
            .lookup(&(*attribute, value.clone()))
            .and_then(|holders| holders.iter().next().copied())
            .ok_or_else(|| {
                let ident = snapshot
                    .ident(*attribute)
                    .map(|i| i.to_string())
                    .unwrap_or_else(|| attribute.to_string());
                SchemataError::UnknownIdent(format!("lookup ref [{} {}]", ident, value))
            }),
        Target::Temp(tempid) => Err(SchemataError::InvalidTransaction(format!(
            "tempid {} was not assigned an entity",
            tempid
        ))),
    }
}

/// The entity and every entity it transitively owns through component
/// references. Each entity is visited at most once.
pub fn retract_entity(snapshot: &Snapshot, entity: Thing) -> RoaringTreemap {
    let mut visited = RoaringTreemap::new();
    let mut worklist = vec![entity];
    while let Some(next) = worklist.pop() {
        if !visited.insert(next) {
            continue;
        }
        let Some(values) = snapshot.eav.get(&next) else {
            continue;
        };
        for (attribute, values) in values.iter() {
            let component = snapshot
                .attribute_keeper
                .lookup(attribute)
                .map(|a| a.component())
                .unwrap_or(false);
            if !component {
                continue;
            }
            for value in values {
                if let Value::Ref(owned) = value {
                    if !visited.contains(*owned) {
                        worklist.push(*owned);
                    }
                }
            }
        }
    }
    visited
}

/// Retractions of every current value of an entity and of every reference
/// pointing at it, in attribute order.
pub(crate) fn retractions(snapshot: &Snapshot, entity: Thing) -> Vec<Fact> {
    let mut facts = Vec::new();
    if let Some(values) = snapshot.eav.get(&entity) {
        let mut attributes: Vec<&Thing> = values.keys().collect();
        attributes.sort_unstable();
        for attribute in attributes {
            let Some(kept) = snapshot.attribute_keeper.lookup(attribute) else {
                continue;
            };
            for value in values.get(attribute).into_iter().flatten() {
                facts.push(Fact {
                    operation: Operation::Retract,
                    entity,
                    attribute: kept.clone(),
                    value: value.clone(),
                });
            }
        }
    }
    for (referrer, attribute) in snapshot.referrers(entity) {
        let Some(kept) = snapshot.attribute_keeper.lookup(&attribute) else {
            continue;
        };
        facts.push(Fact {
            operation: Operation::Retract,
            entity: referrer,
            attribute: kept,
            value: Value::Ref(entity),
        });
    }
    facts
}

// ------------- Touch -------------
#[derive(Debug, Clone, PartialEq)]
pub enum TouchedValue {
    Value(Value),
    Component(Touched),
}

/// An entity with its components expanded in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Touched {
    pub entity: Thing,
    pub attributes: BTreeMap<Keyword, Vec<TouchedValue>>,
}

impl Touched {
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert(String::from("db/id"), json!(self.entity));
        for (attribute, values) in &self.attributes {
            let values: Vec<serde_json::Value> = values
                .iter()
                .map(|value| match value {
                    TouchedValue::Value(value) => json!(value.to_string()),
                    TouchedValue::Component(touched) => touched.to_json(),
                })
                .collect();
            map.insert(attribute.as_str().to_owned(), serde_json::Value::Array(values));
        }
        serde_json::Value::Object(map)
    }
}

fn touch(snapshot: &Snapshot, entity: Thing, visited: &mut RoaringTreemap) -> Touched {
    visited.insert(entity);
    let mut attributes = BTreeMap::new();
    if let Some(values) = snapshot.eav.get(&entity) {
        for (attribute, values) in values.iter() {
            let Some(kept) = snapshot.attribute_keeper.lookup(attribute) else {
                continue;
            };
            let touched = values
                .iter()
                .map(|value| match value {
                    Value::Ref(owned) if kept.component() && !visited.contains(*owned) => {
                        TouchedValue::Component(touch(snapshot, *owned, visited))
                    }
                    other => TouchedValue::Value(other.clone()),
                })
                .collect();
            attributes.insert(kept.ident().clone(), touched);
        }
    }
    Touched { entity, attributes }
}

impl Snapshot {
    /// Every entity a retraction of `entity` would retract, in ascending order.
    pub fn cascade(&self, entity: Thing) -> Vec<Thing> {
        retract_entity(self, entity).iter().collect()
    }
    /// The entity with its component entities expanded recursively. A
    /// component that was already expanded is left as a reference.
    pub fn touch(&self, entity: Thing) -> Option<Touched> {
        if !self.eav.contains_key(&entity) {
            return None;
        }
        let mut visited = RoaringTreemap::new();
        Some(touch(self, entity, &mut visited))
    }
}
