//! Type and cardinality validation of proposed values.
use std::collections::HashMap;
use std::sync::Arc;

use num_bigint::BigInt;

use crate::construct::{Attribute, Operation, Snapshot, Thing};
use crate::datatype::{Double, Float, Keyword, Value, ValueType};
use crate::error::{Result, SchemataError};
use crate::history::Fact;
use crate::schema;
use crate::transact::{Candidate, Target, Tempid, TxValue};

fn mismatch(attribute: &Attribute, found: impl ToString) -> SchemataError {
    SchemataError::TypeMismatch {
        attribute: attribute.ident().to_string(),
        expected: attribute.value_type().to_string(),
        found: found.to_string(),
    }
}

/// Checks a proposed value against the declared type of the attribute.
/// Reference attributes yield a target that is resolved later, once
/// tempids have been assigned.
pub(crate) fn validate(snapshot: &Snapshot, attribute: &Attribute, value: &TxValue) -> Result<Candidate> {
    if attribute.is_ref() {
        let target = match value {
            TxValue::Scalar(Value::Ref(thing)) => Target::Id(*thing),
            TxValue::Scalar(Value::Integer(id)) if *id >= 0 => Target::Id(*id as Thing),
            TxValue::Scalar(Value::Keyword(ident)) => Target::Ident(ident.clone()),
            TxValue::Scalar(Value::String(tempid)) | TxValue::Temp(tempid) => {
                Target::Temp(Tempid::Named(tempid.clone()))
            }
            TxValue::Ident(ident) => Target::Ident(
                Keyword::new(ident).ok_or_else(|| SchemataError::UnknownIdent(ident.clone()))?,
            ),
            TxValue::Lookup(unique, v) => lookup_target(snapshot, unique, v.clone())?,
            TxValue::Many(items) => match lookup_shape(snapshot, items) {
                Some((unique, v)) => lookup_target(snapshot, unique.ident().as_str(), v)?,
                None => return Err(mismatch(attribute, "list")),
            },
            TxValue::Scalar(other) => return Err(mismatch(attribute, other.value_type())),
            TxValue::Nested(_) => return Err(mismatch(attribute, "entity map")),
        };
        return Ok(Candidate::Target(target));
    }
    let value = match value {
        TxValue::Scalar(v) => coerce(attribute, v.clone())?,
        TxValue::Ident(ident) if attribute.value_type() == ValueType::Keyword => Value::Keyword(
            Keyword::new(ident).ok_or_else(|| mismatch(attribute, format!("'{}'", ident)))?,
        ),
        TxValue::Ident(_) => return Err(mismatch(attribute, ValueType::Keyword)),
        TxValue::Temp(_) | TxValue::Lookup(..) | TxValue::Nested(_) => {
            return Err(mismatch(attribute, ValueType::Reference));
        }
        TxValue::Many(_) => return Err(mismatch(attribute, "list")),
    };
    Ok(Candidate::Value(value))
}

/// Widens a value to the declared type where no precision is lost in
/// intent: integers to floating point or big integers, doubles to floats.
pub fn coerce(attribute: &Attribute, value: Value) -> Result<Value> {
    let declared = attribute.value_type();
    if value.value_type() == declared {
        return Ok(value);
    }
    let coerced = match (declared, &value) {
        (ValueType::Float, Value::Integer(i)) => Value::Float(Float(*i as f32)),
        (ValueType::Float, Value::Double(d)) => Value::Float(Float(d.0 as f32)),
        (ValueType::Double, Value::Integer(i)) => Value::Double(Double(*i as f64)),
        (ValueType::BigInteger, Value::Integer(i)) => Value::BigInteger(BigInt::from(*i)),
        _ => return Err(mismatch(attribute, value.value_type())),
    };
    Ok(coerced)
}

pub fn check_cardinality(attribute: &Attribute, count: usize) -> Result<()> {
    if !attribute.many() && count > 1 {
        return Err(SchemataError::CardinalityViolation(format!(
            "{} has cardinality one but was given {} values",
            attribute.ident(),
            count
        )));
    }
    Ok(())
}

/// A two element list whose head names a unique attribute is a lookup ref.
pub(crate) fn lookup_shape(snapshot: &Snapshot, items: &[TxValue]) -> Option<(Arc<Attribute>, Value)> {
    let [head, value] = items else {
        return None;
    };
    let ident = match head {
        TxValue::Scalar(Value::Keyword(ident)) => ident.clone(),
        TxValue::Ident(ident) => Keyword::new(ident)?,
        _ => return None,
    };
    let attribute = snapshot.attribute_keeper.get(&ident)?;
    attribute.unique()?;
    match value {
        TxValue::Scalar(v) => Some((attribute, v.clone())),
        TxValue::Ident(i) if attribute.value_type() == ValueType::Keyword => {
            Some((attribute, Value::Keyword(Keyword::new(i)?)))
        }
        _ => None,
    }
}

pub(crate) fn lookup_target(snapshot: &Snapshot, attribute: &str, value: Value) -> Result<Target> {
    let attribute = schema::attribute_for(snapshot, attribute)?;
    if attribute.unique().is_none() {
        return Err(SchemataError::InvalidTransaction(format!(
            "lookup ref on {} which is not unique",
            attribute.ident()
        )));
    }
    let value = coerce(&attribute, value)?;
    Ok(Target::Lookup(attribute.attribute(), value))
}

/// Rejects two different values asserted for the same cardinality one
/// attribute of the same entity within one transaction.
pub(crate) fn check_conflicts<'f>(facts: impl Iterator<Item = &'f Fact>) -> Result<()> {
    let mut asserted: HashMap<(Thing, Thing), &Value> = HashMap::new();
    for fact in facts {
        if fact.operation != Operation::Add || fact.attribute.many() {
            continue;
        }
        let key = (fact.entity, fact.attribute.attribute());
        match asserted.get(&key) {
            Some(&previous) if previous != &fact.value => {
                return Err(SchemataError::CardinalityViolation(format!(
                    "{} of entity {} asserted as both {} and {}",
                    fact.attribute.ident(),
                    fact.entity,
                    previous,
                    fact.value
                )));
            }
            Some(_) => {}
            None => {
                asserted.insert(key, &fact.value);
            }
        }
    }
    Ok(())
}
