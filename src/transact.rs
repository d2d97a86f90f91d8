//! The write path.
//!
//! A transaction is an ordered list of [`TxOp`]s. It is staged against a
//! private copy of the current [`Snapshot`] and runs through these phases:
//!
//! 1. attribute resolution and flattening of entity maps (registry),
//! 2. value type and cardinality validation,
//! 3. tempid resolution with identity upserts,
//! 4. resolution of references, idents and lookup refs,
//! 5. component cascades for retracted entities,
//! 6. application under the history policy,
//! 7. schema refresh and uniqueness verification.
//!
//! Any error discards the staged copy, so a transaction either commits
//! completely or leaves no trace. Writers are serialized; readers keep
//! whatever snapshot they hold.
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use roaring::RoaringTreemap;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::construct::{Attribute, Database, Datum, Operation, Snapshot, Thing};
use crate::datatype::{Decimal, Keyword, Uri, Value};
use crate::error::{Result, SchemataError};
use crate::history::{self, Fact};
use crate::interface::CancelToken;
use crate::{graph, identity, schema, validate};

// ------------- Transaction input -------------
/// A reference to an entity in transaction data.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityRef {
    /// A committed entity id.
    Id(Thing),
    /// A temporary id, resolved to a new or upserted entity on commit.
    Temp(String),
    /// A symbolic ident such as `role/guest`.
    Ident(String),
    /// A unique attribute and a value held by exactly one entity.
    Lookup(String, Value),
}
impl EntityRef {
    pub fn temp(tempid: &str) -> Self {
        EntityRef::Temp(tempid.to_owned())
    }
    pub fn ident(ident: &str) -> Self {
        EntityRef::Ident(ident.to_owned())
    }
    pub fn lookup(attribute: &str, value: impl Into<Value>) -> Self {
        EntityRef::Lookup(attribute.to_owned(), value.into())
    }
}
impl From<Thing> for EntityRef {
    fn from(thing: Thing) -> Self {
        EntityRef::Id(thing)
    }
}

/// A value in transaction data. Reference attributes interpret strings as
/// tempids, keywords as idents and integers as entity ids.
#[derive(Debug, Clone, PartialEq)]
pub enum TxValue {
    Scalar(Value),
    Ident(String),
    Temp(String),
    Lookup(String, Value),
    Nested(EntityMap),
    Many(Vec<TxValue>),
}
impl TxValue {
    pub fn ident(ident: &str) -> Self {
        TxValue::Ident(ident.to_owned())
    }
    pub fn temp(tempid: &str) -> Self {
        TxValue::Temp(tempid.to_owned())
    }
    pub fn lookup(attribute: &str, value: impl Into<Value>) -> Self {
        TxValue::Lookup(attribute.to_owned(), value.into())
    }
    pub fn many<T: Into<TxValue>>(values: impl IntoIterator<Item = T>) -> Self {
        TxValue::Many(values.into_iter().map(Into::into).collect())
    }
}
macro_rules! scalar_tx_value {
    ($($t:ty),*) => {
        $(impl From<$t> for TxValue {
            fn from(value: $t) -> Self {
                TxValue::Scalar(Value::from(value))
            }
        })*
    };
}
scalar_tx_value!(
    &str,
    String,
    i64,
    bool,
    f32,
    f64,
    BigInt,
    Decimal,
    DateTime<Utc>,
    Uuid,
    Uri,
    Keyword,
    Vec<u8>
);
impl From<Value> for TxValue {
    fn from(value: Value) -> Self {
        TxValue::Scalar(value)
    }
}
impl From<EntityMap> for TxValue {
    fn from(map: EntityMap) -> Self {
        TxValue::Nested(map)
    }
}
impl From<EntityRef> for TxValue {
    fn from(entity: EntityRef) -> Self {
        match entity {
            EntityRef::Id(thing) => TxValue::Scalar(Value::Ref(thing)),
            EntityRef::Temp(tempid) => TxValue::Temp(tempid),
            EntityRef::Ident(ident) => TxValue::Ident(ident),
            EntityRef::Lookup(attribute, value) => TxValue::Lookup(attribute, value),
        }
    }
}

/// An assertion map: every attribute in it is asserted for one entity.
/// Without an explicit id the map describes a new entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityMap {
    pub id: Option<EntityRef>,
    pub attributes: Vec<(String, TxValue)>,
}
impl EntityMap {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn id(mut self, id: EntityRef) -> Self {
        self.id = Some(id);
        self
    }
    pub fn with(mut self, attribute: &str, value: impl Into<TxValue>) -> Self {
        self.attributes.push((attribute.to_owned(), value.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TxOp {
    Map(EntityMap),
    Add(EntityRef, String, TxValue),
    Retract(EntityRef, String, TxValue),
    RetractEntity(EntityRef),
}
impl TxOp {
    pub fn add(entity: impl Into<EntityRef>, attribute: &str, value: impl Into<TxValue>) -> Self {
        TxOp::Add(entity.into(), attribute.to_owned(), value.into())
    }
    pub fn retract(entity: impl Into<EntityRef>, attribute: &str, value: impl Into<TxValue>) -> Self {
        TxOp::Retract(entity.into(), attribute.to_owned(), value.into())
    }
    pub fn retract_entity(entity: impl Into<EntityRef>) -> Self {
        TxOp::RetractEntity(entity.into())
    }
}

// ------------- Transaction result -------------
#[derive(Debug)]
pub struct TxReport {
    pub db_before: Arc<Snapshot>,
    pub db_after: Arc<Snapshot>,
    pub tx: Thing,
    pub t: u64,
    pub tx_data: Vec<Arc<Datum>>,
    pub tempids: HashMap<String, Thing>,
}
impl TxReport {
    pub fn to_json(&self) -> serde_json::Value {
        let tx_data: Vec<serde_json::Value> = self
            .tx_data
            .iter()
            .map(|datum| {
                let attribute = self
                    .db_after
                    .attribute_of(datum.attribute())
                    .map(|a| a.ident().to_string())
                    .unwrap_or_else(|| datum.attribute().to_string());
                json!({
                    "e": datum.entity(),
                    "a": attribute,
                    "v": datum.value().to_string(),
                    "tx": datum.tx(),
                    "op": datum.operation().to_string(),
                })
            })
            .collect();
        json!({
            "basis_before": self.db_before.basis_t(),
            "basis_after": self.db_after.basis_t(),
            "tx": self.tx,
            "tx_data": tx_data,
            "tempids": self.tempids,
            "ledger_head": self.db_after.ledger_head(),
        })
    }
}

// ------------- Staged representations -------------
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Tempid {
    Named(String),
    Generated(usize),
}
impl std::fmt::Display for Tempid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tempid::Named(name) => write!(f, "\"{}\"", name),
            Tempid::Generated(n) => write!(f, "#{}", n),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Target {
    Id(Thing),
    Temp(Tempid),
    Ident(Keyword),
    Lookup(Thing, Value),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Candidate {
    Value(Value),
    Target(Target),
}

#[derive(Debug, Clone)]
pub(crate) struct Proposal {
    pub(crate) operation: Operation,
    pub(crate) entity: Target,
    pub(crate) attribute: Arc<Attribute>,
    pub(crate) value: Candidate,
}

enum Step {
    Fact(Proposal),
    RetractEntity(Target),
}

enum Resolved {
    Fact(Fact),
    RetractEntity(RoaringTreemap),
}

// Flattens transaction operations into single-valued proposals.
struct Flattener<'s> {
    snapshot: &'s Snapshot,
    steps: Vec<Step>,
    generated: usize,
    // tempids in entity position, in order of first appearance
    asserted: Vec<Tempid>,
}

impl<'s> Flattener<'s> {
    fn new(snapshot: &'s Snapshot) -> Self {
        Self {
            snapshot,
            steps: Vec::new(),
            generated: 0,
            asserted: Vec::new(),
        }
    }
    fn op(&mut self, op: TxOp) -> Result<()> {
        match op {
            TxOp::Map(map) => {
                self.map(map)?;
            }
            TxOp::Add(entity, attribute, value) => {
                let entity = self.entity(entity, true)?;
                let attribute = schema::attribute_for(self.snapshot, &attribute)?;
                self.values(Operation::Add, &entity, &attribute, value)?;
            }
            TxOp::Retract(entity, attribute, value) => {
                let entity = self.entity(entity, false)?;
                let attribute = schema::attribute_for(self.snapshot, &attribute)?;
                self.values(Operation::Retract, &entity, &attribute, value)?;
            }
            TxOp::RetractEntity(entity) => {
                let entity = self.entity(entity, false)?;
                self.steps.push(Step::RetractEntity(entity));
            }
        }
        Ok(())
    }
    fn map(&mut self, map: EntityMap) -> Result<Target> {
        if map.attributes.is_empty() {
            return Err(SchemataError::InvalidTransaction(String::from(
                "an entity map must assert at least one attribute",
            )));
        }
        let entity = match map.id {
            Some(id) => self.entity(id, true)?,
            None => {
                self.generated += 1;
                let tempid = Tempid::Generated(self.generated);
                self.asserted.push(tempid.clone());
                Target::Temp(tempid)
            }
        };
        for (attribute, value) in map.attributes {
            let attribute = schema::attribute_for(self.snapshot, &attribute)?;
            self.values(Operation::Add, &entity, &attribute, value)?;
        }
        Ok(entity)
    }
    fn entity(&mut self, entity: EntityRef, asserting: bool) -> Result<Target> {
        let target = match entity {
            EntityRef::Id(thing) => Target::Id(thing),
            EntityRef::Temp(tempid) => {
                let tempid = Tempid::Named(tempid);
                if !asserting {
                    return Err(SchemataError::InvalidTransaction(format!(
                        "tempid {} can only be used to assert",
                        tempid
                    )));
                }
                if !self.asserted.contains(&tempid) {
                    self.asserted.push(tempid.clone());
                }
                Target::Temp(tempid)
            }
            EntityRef::Ident(ident) => Target::Ident(
                Keyword::new(&ident).ok_or_else(|| SchemataError::UnknownIdent(ident.clone()))?,
            ),
            EntityRef::Lookup(attribute, value) => {
                validate::lookup_target(self.snapshot, &attribute, value)?
            }
        };
        Ok(target)
    }
    fn values(
        &mut self,
        operation: Operation,
        entity: &Target,
        attribute: &Arc<Attribute>,
        value: TxValue,
    ) -> Result<()> {
        let values = match value {
            TxValue::Many(items) if validate::lookup_shape(self.snapshot, &items).is_none() => items,
            other => vec![other],
        };
        validate::check_cardinality(attribute, values.len())?;
        for value in values {
            let candidate = match value {
                TxValue::Nested(_) if operation == Operation::Retract => {
                    return Err(SchemataError::InvalidTransaction(format!(
                        "cannot retract a nested entity map under {}",
                        attribute.ident()
                    )));
                }
                TxValue::Nested(map) => self.nested(attribute, map)?,
                other => validate::validate(self.snapshot, attribute, &other)?,
            };
            self.steps.push(Step::Fact(Proposal {
                operation,
                entity: entity.clone(),
                attribute: Arc::clone(attribute),
                value: candidate,
            }));
        }
        Ok(())
    }
    fn nested(&mut self, attribute: &Arc<Attribute>, map: EntityMap) -> Result<Candidate> {
        if !attribute.is_ref() {
            return Err(SchemataError::TypeMismatch {
                attribute: attribute.ident().to_string(),
                expected: attribute.value_type().to_string(),
                found: String::from("entity map"),
            });
        }
        let identified = map.attributes.iter().any(|(name, _)| {
            schema::attribute_for(self.snapshot, name)
                .map(|a| a.unique().is_some())
                .unwrap_or(false)
        });
        if !attribute.component() && !identified {
            return Err(SchemataError::InvalidTransaction(format!(
                "nested map under {} must be a component or carry a unique attribute",
                attribute.ident()
            )));
        }
        let target = self.map(map)?;
        Ok(Candidate::Target(target))
    }
}

impl Database {
    pub fn transact(&self, ops: Vec<TxOp>) -> Result<TxReport> {
        self.transact_cancellable(ops, &CancelToken::new())
    }

    /// Transacts unless the token is cancelled before the commit point,
    /// in which case nothing is applied.
    pub fn transact_cancellable(&self, ops: Vec<TxOp>, cancel: &CancelToken) -> Result<TxReport> {
        let _writer = self.writer()?;
        let db_before = self.snapshot()?;
        match stage(&db_before, ops) {
            Ok((staged, tx, tx_data, tempids)) => {
                if cancel.is_cancelled() {
                    warn!(t = staged.basis_t(), "transaction cancelled before commit");
                    return Err(SchemataError::Cancelled);
                }
                let db_after = Arc::new(staged);
                self.publish(Arc::clone(&db_after))?;
                info!(
                    t = db_after.basis_t(),
                    datums = tx_data.len(),
                    tempids = tempids.len(),
                    "transaction committed"
                );
                Ok(TxReport {
                    t: db_after.basis_t(),
                    db_before,
                    db_after,
                    tx,
                    tx_data,
                    tempids,
                })
            }
            Err(e) => {
                warn!(error = %e, basis = db_before.basis_t(), "transaction rejected");
                Err(e)
            }
        }
    }
}

type Staged = (Snapshot, Thing, Vec<Arc<Datum>>, HashMap<String, Thing>);

fn stage(before: &Snapshot, ops: Vec<TxOp>) -> Result<Staged> {
    let mut flattener = Flattener::new(before);
    for op in ops {
        flattener.op(op)?;
    }
    let Flattener { steps, asserted, .. } = flattener;
    debug!(steps = steps.len(), tempids = asserted.len(), "transaction flattened");

    let mut staged = before.clone();
    let t = before.basis_t() + 1;
    let tx = staged.thing_generator.generate();

    let proposals: Vec<&Proposal> = steps
        .iter()
        .filter_map(|step| match step {
            Step::Fact(proposal) => Some(proposal),
            Step::RetractEntity(_) => None,
        })
        .collect();
    let tempids = identity::resolve_tempids(before, &mut staged.thing_generator, &proposals, &asserted)?;
    debug!(tempids = tempids.len(), "tempids resolved");

    let mut resolved = Vec::with_capacity(steps.len());
    for step in steps {
        match step {
            Step::Fact(proposal) => {
                let entity = resolve_entity(before, &tempids, &proposal.entity)?;
                let value = match proposal.value {
                    Candidate::Value(value) => value,
                    Candidate::Target(target) => Value::Ref(resolve_entity(before, &tempids, &target)?),
                };
                resolved.push(Resolved::Fact(Fact {
                    operation: proposal.operation,
                    entity,
                    attribute: proposal.attribute,
                    value,
                }));
            }
            Step::RetractEntity(target) => {
                let entity = resolve_entity(before, &tempids, &target)?;
                resolved.push(Resolved::RetractEntity(graph::retract_entity(before, entity)));
            }
        }
    }
    validate::check_conflicts(resolved.iter().filter_map(|r| match r {
        Resolved::Fact(fact) => Some(fact),
        Resolved::RetractEntity(_) => None,
    }))?;

    let tx_instant = schema::attribute_for(&staged, "db/txInstant")?;
    let mut tx_data = history::apply(
        &mut staged,
        Fact {
            operation: Operation::Add,
            entity: tx,
            attribute: tx_instant,
            value: Value::Timestamp(Utc::now()),
        },
        tx,
        t,
    );
    for step in resolved {
        match step {
            Resolved::Fact(fact) => tx_data.extend(history::apply(&mut staged, fact, tx, t)),
            Resolved::RetractEntity(cascade) => {
                debug!(entities = cascade.len(), "retracting entity cascade");
                for entity in cascade.iter() {
                    for fact in graph::retractions(&staged, entity) {
                        tx_data.extend(history::apply(&mut staged, fact, tx, t));
                    }
                }
            }
        }
    }

    let touched = schema::touched(&staged, &tx_data);
    if !touched.is_empty() {
        schema::refresh(&mut staged, &touched)?;
    }
    identity::check_unique(&staged, &tx_data)?;

    let previous = staged.ledger.last().copied();
    staged.ledger.push_back(history::chain(previous.as_ref(), &tx_data));
    staged.transactions.push_back(tx);
    staged.basis_t = t;

    let tempids = tempids
        .into_iter()
        .filter_map(|(tempid, thing)| match tempid {
            Tempid::Named(name) => Some((name, thing)),
            Tempid::Generated(_) => None,
        })
        .collect();
    Ok((staged, tx, tx_data, tempids))
}

fn resolve_entity(snapshot: &Snapshot, tempids: &HashMap<Tempid, Thing>, target: &Target) -> Result<Thing> {
    match target {
        Target::Temp(tempid) => tempids.get(tempid).copied().ok_or_else(|| {
            SchemataError::InvalidTransaction(format!("tempid {} is only used as a value", tempid))
        }),
        other => graph::resolve_target(snapshot, other),
    }
}
