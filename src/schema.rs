//! The attribute registry.
//!
//! Attributes are entities like any other: an attribute is an entity carrying
//! a `db/ident`, a `db/valueType` and a `db/cardinality`, plus optional flags.
//! The system attributes needed to describe attributes are installed by the
//! genesis transaction (`t = 0`) as ordinary datoms, and every later schema
//! change is committed through the same write path as user data.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::construct::{
    Attribute, Cardinality, Database, Datum, Operation, Snapshot, Thing, Unique,
};
use crate::datatype::{Keyword, Value, ValueType};
use crate::error::{Result, SchemataError};
use crate::history;
use crate::transact::{EntityMap, EntityRef, TxOp, TxValue};

// ident, value type, cardinality, uniqueness, indexed
const SYSTEM_ATTRIBUTES: [(&str, ValueType, Cardinality, Option<Unique>, bool); 10] = [
    ("db/ident", ValueType::Keyword, Cardinality::One, Some(Unique::Identity), false),
    ("db/valueType", ValueType::Reference, Cardinality::One, None, false),
    ("db/cardinality", ValueType::Reference, Cardinality::One, None, false),
    ("db/unique", ValueType::Reference, Cardinality::One, None, false),
    ("db/index", ValueType::Boolean, Cardinality::One, None, false),
    ("db/fulltext", ValueType::Boolean, Cardinality::One, None, false),
    ("db/isComponent", ValueType::Boolean, Cardinality::One, None, false),
    ("db/noHistory", ValueType::Boolean, Cardinality::One, None, false),
    ("db/doc", ValueType::String, Cardinality::One, None, false),
    ("db/txInstant", ValueType::Timestamp, Cardinality::One, None, true),
];

// attributes whose assertion on an entity makes it a schema candidate
const STRUCTURAL: [&str; 7] = [
    "db/valueType",
    "db/cardinality",
    "db/unique",
    "db/index",
    "db/fulltext",
    "db/isComponent",
    "db/noHistory",
];

/// Builds the genesis snapshot holding the system attributes and the
/// enumeration entities for value types, cardinalities and uniqueness modes.
pub(crate) fn genesis() -> Snapshot {
    let mut snapshot = Snapshot::empty();
    let mut attributes = Vec::new();
    for (ident, value_type, cardinality, unique, index) in SYSTEM_ATTRIBUTES {
        let thing = snapshot.thing_generator.generate();
        let attribute = Attribute::new(thing, Keyword::unchecked(ident), value_type, cardinality)
            .with_unique(unique)
            .with_index(index);
        let (kept_attribute, _) = snapshot.attribute_keeper.keep(attribute);
        attributes.push(kept_attribute);
    }
    let mut enumerations: Vec<Keyword> = ValueType::ALL.iter().map(|v| v.ident()).collect();
    enumerations.push(Cardinality::One.ident());
    enumerations.push(Cardinality::Many.ident());
    enumerations.push(Unique::Value.ident());
    enumerations.push(Unique::Identity.ident());
    let enumerations: Vec<(Keyword, Thing)> = enumerations
        .into_iter()
        .map(|ident| (ident, snapshot.thing_generator.generate()))
        .collect();
    let tx = snapshot.thing_generator.generate();

    let system = |snapshot: &Snapshot, ident: &str| -> Arc<Attribute> {
        match snapshot.attribute_keeper.get(&Keyword::unchecked(ident)) {
            Some(attribute) => attribute,
            None => unreachable!("system attribute {} is kept above", ident),
        }
    };
    let db_ident = system(&snapshot, "db/ident");
    let mut datums = Vec::new();
    for (ident, thing) in enumerations {
        datums.push(assert_genesis(&mut snapshot, thing, &db_ident, Value::Keyword(ident), tx));
    }
    for attribute in attributes.iter() {
        let entity = attribute.attribute();
        datums.push(assert_genesis(
            &mut snapshot,
            entity,
            &db_ident,
            Value::Keyword(attribute.ident().clone()),
            tx,
        ));
        let mut enumerated = vec![
            ("db/valueType", attribute.value_type().ident()),
            ("db/cardinality", attribute.cardinality().ident()),
        ];
        if let Some(unique) = attribute.unique() {
            enumerated.push(("db/unique", unique.ident()));
        }
        for (system_ident, enumeration) in enumerated {
            let target = match snapshot.idents.get_by_left(&enumeration) {
                Some(target) => *target,
                None => unreachable!("enumeration {} is asserted above", enumeration),
            };
            let system_attribute = system(&snapshot, system_ident);
            datums.push(assert_genesis(&mut snapshot, entity, &system_attribute, Value::Ref(target), tx));
        }
        if attribute.index() {
            let db_index = system(&snapshot, "db/index");
            datums.push(assert_genesis(&mut snapshot, entity, &db_index, Value::Boolean(true), tx));
        }
    }
    let tx_instant = system(&snapshot, "db/txInstant");
    datums.push(assert_genesis(
        &mut snapshot,
        tx,
        &tx_instant,
        Value::Timestamp(DateTime::<Utc>::default()),
        tx,
    ));
    snapshot.ledger.push_back(history::chain(None, &datums));
    snapshot.transactions.push_back(tx);
    debug!(datums = datums.len(), "genesis installed");
    snapshot
}

fn assert_genesis(
    snapshot: &mut Snapshot,
    entity: Thing,
    attribute: &Attribute,
    value: Value,
    tx: Thing,
) -> Arc<Datum> {
    snapshot.insert_value(entity, attribute, value.clone());
    let datum = Arc::new(Datum::new(entity, attribute.attribute(), value, tx, 0, Operation::Add));
    snapshot.history.push_back(Arc::clone(&datum));
    datum
}

// ------------- Attribute Definition -------------
/// A proposed attribute. Identifier, value type and cardinality must all be
/// present before it can be installed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeDefinition {
    pub ident: Option<String>,
    pub value_type: Option<ValueType>,
    pub cardinality: Option<Cardinality>,
    pub unique: Option<Unique>,
    pub index: bool,
    pub fulltext: bool,
    pub component: bool,
    pub no_history: bool,
    pub doc: Option<String>,
}

impl AttributeDefinition {
    pub fn new(ident: &str) -> Self {
        Self {
            ident: Some(ident.to_owned()),
            ..Default::default()
        }
    }
    pub fn value_type(mut self, value_type: ValueType) -> Self {
        self.value_type = Some(value_type);
        self
    }
    pub fn cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = Some(cardinality);
        self
    }
    pub fn unique(mut self, unique: Unique) -> Self {
        self.unique = Some(unique);
        self
    }
    pub fn index(mut self) -> Self {
        self.index = true;
        self
    }
    pub fn fulltext(mut self) -> Self {
        self.fulltext = true;
        self
    }
    pub fn component(mut self) -> Self {
        self.component = true;
        self
    }
    pub fn no_history(mut self) -> Self {
        self.no_history = true;
        self
    }
    pub fn doc(mut self, doc: &str) -> Self {
        self.doc = Some(doc.to_owned());
        self
    }

    fn check(&self) -> Result<(Keyword, ValueType, Cardinality)> {
        let mut missing = Vec::new();
        if self.ident.is_none() {
            missing.push("ident");
        }
        if self.value_type.is_none() {
            missing.push("value type");
        }
        if self.cardinality.is_none() {
            missing.push("cardinality");
        }
        let name = self.ident.clone().unwrap_or_else(|| String::from("attribute"));
        let (Some(ident), Some(value_type), Some(cardinality)) =
            (&self.ident, self.value_type, self.cardinality)
        else {
            return Err(SchemataError::SchemaIncomplete(format!(
                "{} is missing {}",
                name,
                missing.join(", ")
            )));
        };
        let ident = Keyword::new(ident).ok_or_else(|| {
            SchemataError::SchemaIncomplete(format!("'{}' is not a valid ident", ident))
        })?;
        if ident.namespace() == Some("db") {
            return Err(SchemataError::SchemaConflict(format!(
                "{} is in the reserved db namespace",
                ident
            )));
        }
        check_flags(&ident, value_type, self.component, self.fulltext)?;
        Ok((ident, value_type, cardinality))
    }

    /// The entity map that installs this definition, tempid `"attribute"`.
    pub fn to_entity_map(&self) -> EntityMap {
        let mut map = EntityMap::new().id(EntityRef::temp("attribute"));
        if let Some(ident) = self.ident.as_ref().and_then(|i| Keyword::new(i)) {
            map = map.with("db/ident", Value::Keyword(ident));
        }
        if let Some(value_type) = self.value_type {
            map = map.with("db/valueType", TxValue::ident(value_type.ident().as_str()));
        }
        if let Some(cardinality) = self.cardinality {
            map = map.with("db/cardinality", TxValue::ident(cardinality.ident().as_str()));
        }
        if let Some(unique) = self.unique {
            map = map.with("db/unique", TxValue::ident(unique.ident().as_str()));
        }
        for (flag, set) in [
            ("db/index", self.index),
            ("db/fulltext", self.fulltext),
            ("db/isComponent", self.component),
            ("db/noHistory", self.no_history),
        ] {
            if set {
                map = map.with(flag, true);
            }
        }
        if let Some(doc) = &self.doc {
            map = map.with("db/doc", doc.as_str());
        }
        map
    }
}

fn check_flags(ident: &Keyword, value_type: ValueType, component: bool, fulltext: bool) -> Result<()> {
    if component && value_type != ValueType::Reference {
        return Err(SchemataError::SchemaConflict(format!(
            "{} is a component but has value type {}",
            ident, value_type
        )));
    }
    if fulltext && value_type != ValueType::String {
        return Err(SchemataError::SchemaConflict(format!(
            "{} is full-text indexed but has value type {}",
            ident, value_type
        )));
    }
    Ok(())
}

/// Installs an attribute, returning the thing that identifies it. Installing
/// an identical definition again is idempotent and returns the same thing.
pub fn install(database: &Database, definition: AttributeDefinition) -> Result<Thing> {
    let (ident, value_type, cardinality) = definition.check()?;
    let snapshot = database.snapshot()?;
    if let Some(existing) = snapshot.attribute_keeper.get(&ident) {
        conflicts(&existing, value_type, cardinality)?;
    } else if let Some(entity) = snapshot.idents.get_by_left(&ident) {
        return Err(SchemataError::SchemaConflict(format!(
            "{} already names entity {} which is not an attribute",
            ident, entity
        )));
    }
    let report = database.transact(vec![TxOp::Map(definition.to_entity_map())])?;
    report
        .tempids
        .get("attribute")
        .copied()
        .ok_or_else(|| SchemataError::SchemaIncomplete(format!("{} was not installed", ident)))
}

impl Database {
    pub fn install(&self, definition: AttributeDefinition) -> Result<Thing> {
        install(self, definition)
    }
}

fn conflicts(existing: &Attribute, value_type: ValueType, cardinality: Cardinality) -> Result<()> {
    if existing.value_type() != value_type || existing.cardinality() != cardinality {
        return Err(SchemataError::SchemaConflict(format!(
            "{} is installed as <{}, {}> and cannot become <{}, {}>",
            existing.ident(),
            existing.value_type(),
            existing.cardinality(),
            value_type,
            cardinality
        )));
    }
    Ok(())
}

/// Resolves an attribute by ident, as every datum in a transaction must.
pub fn attribute_for(snapshot: &Snapshot, ident: &str) -> Result<Arc<Attribute>> {
    Keyword::new(ident)
        .and_then(|keyword| snapshot.attribute_keeper.get(&keyword))
        .ok_or_else(|| SchemataError::UnknownIdent(format!("attribute {}", ident)))
}

// ------------- Schema as data -------------
/// Entities whose schema description was touched by the given datums.
pub(crate) fn touched(snapshot: &Snapshot, datums: &[Arc<Datum>]) -> Vec<Thing> {
    let structural: Vec<Thing> = STRUCTURAL
        .iter()
        .filter_map(|ident| snapshot.attribute_keeper.get(&Keyword::unchecked(ident)))
        .map(|attribute| attribute.attribute())
        .collect();
    let db_ident = snapshot
        .attribute_keeper
        .get(&Keyword::unchecked("db/ident"))
        .map(|attribute| attribute.attribute());
    let db_doc = snapshot
        .attribute_keeper
        .get(&Keyword::unchecked("db/doc"))
        .map(|attribute| attribute.attribute());
    let mut touched = Vec::new();
    for datum in datums {
        let entity = datum.entity();
        let installed = snapshot.attribute_keeper.lookup(&entity).is_some();
        let relevant = structural.contains(&datum.attribute())
            || (installed && (Some(datum.attribute()) == db_ident || Some(datum.attribute()) == db_doc));
        if relevant && !touched.contains(&entity) {
            touched.push(entity);
        }
    }
    touched
}

/// Re-derives the attributes described by the touched entities and keeps
/// them, rejecting incomplete descriptions and conflicting redefinitions.
pub(crate) fn refresh(snapshot: &mut Snapshot, touched: &[Thing]) -> Result<Vec<Arc<Attribute>>> {
    let mut refreshed = Vec::new();
    for &entity in touched {
        let installed = snapshot.attribute_keeper.lookup(&entity);
        if let Some(previous) = &installed {
            if snapshot.ident(entity) != Some(previous.ident()) {
                return Err(SchemataError::SchemaConflict(format!(
                    "the ident of installed attribute {} is immutable",
                    previous.ident()
                )));
            }
        }
        let attribute = derive(snapshot, entity)?;
        if let Some(previous) = &installed {
            conflicts(previous, attribute.value_type(), attribute.cardinality())?;
        }
        let was_indexed = installed.as_ref().map(|p| p.indexed()).unwrap_or(false);
        let was_unique = installed.as_ref().and_then(|p| p.unique()).is_some();
        let (kept_attribute, previously_kept) = snapshot.attribute_keeper.keep(attribute);
        if kept_attribute.indexed() != was_indexed {
            snapshot.reindex(&kept_attribute);
        }
        if previously_kept && !was_unique && kept_attribute.unique().is_some() {
            crate::identity::check_existing_unique(snapshot, &kept_attribute)?;
        }
        debug!(attribute = %kept_attribute, altered = previously_kept, "attribute kept");
        refreshed.push(kept_attribute);
    }
    Ok(refreshed)
}

/// Builds the attribute described by an entity in the given state.
pub(crate) fn derive(snapshot: &Snapshot, entity: Thing) -> Result<Attribute> {
    let ident = snapshot.ident(entity).cloned().ok_or_else(|| {
        SchemataError::SchemaIncomplete(format!("entity {} has no db/ident", entity))
    })?;
    let value_type = enumerated(snapshot, entity, "db/valueType")
        .and_then(|k| ValueType::from_ident(&k))
        .ok_or_else(|| SchemataError::SchemaIncomplete(format!("{} has no value type", ident)))?;
    let cardinality = enumerated(snapshot, entity, "db/cardinality")
        .and_then(|k| Cardinality::from_ident(&k))
        .ok_or_else(|| SchemataError::SchemaIncomplete(format!("{} has no cardinality", ident)))?;
    let unique = match system_value(snapshot, entity, "db/unique") {
        None => None,
        Some(_) => Some(
            enumerated(snapshot, entity, "db/unique")
                .and_then(|k| Unique::from_ident(&k))
                .ok_or_else(|| {
                    SchemataError::SchemaIncomplete(format!("{} has an unknown uniqueness", ident))
                })?,
        ),
    };
    let flag = |name: &str| {
        system_value(snapshot, entity, name)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    };
    let (index, fulltext, component, no_history) = (
        flag("db/index"),
        flag("db/fulltext"),
        flag("db/isComponent"),
        flag("db/noHistory"),
    );
    check_flags(&ident, value_type, component, fulltext)?;
    let doc = system_value(snapshot, entity, "db/doc").and_then(|v| v.as_str().map(String::from));
    Ok(Attribute::new(entity, ident, value_type, cardinality)
        .with_unique(unique)
        .with_index(index)
        .with_fulltext(fulltext)
        .with_component(component)
        .with_no_history(no_history)
        .with_doc(doc))
}

fn system_value(snapshot: &Snapshot, entity: Thing, ident: &str) -> Option<Value> {
    let attribute = snapshot.attribute_keeper.get(&Keyword::unchecked(ident))?;
    snapshot.current(entity, attribute.attribute()).first().cloned()
}

fn enumerated(snapshot: &Snapshot, entity: Thing, ident: &str) -> Option<Keyword> {
    let target = system_value(snapshot, entity, ident)?.as_ref()?;
    snapshot.ident(target).cloned()
}
