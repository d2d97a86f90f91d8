use std::sync::{Arc, Mutex, MutexGuard, RwLock};

// used to keep the one-to-one mapping between idents and the things they name
use bimap::BiMap;

// other keepers use HashSet or HashMap
use core::hash::{BuildHasher, BuildHasherDefault};
use seahash::SeaHasher;
use std::collections::hash_map::{Entry, RandomState};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

// snapshot indexes are persistent, so a staged copy shares all untouched structure
use im::Vector;

// used to print out readable forms of a construct
use std::fmt;

use chrono::{DateTime, Utc};

// our own stuff that we need
use crate::datatype::{Keyword, Value, ValueType};
use crate::error::Result;

// ------------- Thing -------------
pub type Thing = u64;

pub type ThingHasher = BuildHasherDefault<SeaHasher>;
pub type OtherHasher = BuildHasherDefault<SeaHasher>;

pub const GENESIS: Thing = 0;

#[derive(Debug, Clone)]
pub struct ThingGenerator {
    lower_bound: Thing,
    retained: im::HashSet<Thing, ThingHasher>,
}

impl ThingGenerator {
    pub fn new() -> Self {
        Self {
            lower_bound: GENESIS,
            retained: im::HashSet::default(),
        }
    }
    // Things may be explicitly referenced, but only implicitly created.
    // The retain function is used when replaying history into a past snapshot.
    pub fn retain(&mut self, t: Thing) {
        self.retained.insert(t);
        if t > self.lower_bound {
            self.lower_bound = t;
        }
    }
    pub fn check(&self, t: Thing) -> Option<Thing> {
        self.retained.contains(&t).then_some(t)
    }
    // Retracted things still appear in history, so ids are never reused.
    pub fn generate(&mut self) -> Thing {
        self.lower_bound += 1;
        self.retained.insert(self.lower_bound);
        self.lower_bound
    }
}

// ------------- Cardinality & Uniqueness -------------
#[derive(Eq, PartialEq, Hash, Clone, Copy, Debug)]
pub enum Cardinality {
    One,
    Many,
}
impl Cardinality {
    pub fn ident(&self) -> Keyword {
        match self {
            Cardinality::One => Keyword::unchecked("db.cardinality/one"),
            Cardinality::Many => Keyword::unchecked("db.cardinality/many"),
        }
    }
    pub fn from_ident(ident: &Keyword) -> Option<Cardinality> {
        match ident.as_str() {
            "db.cardinality/one" => Some(Cardinality::One),
            "db.cardinality/many" => Some(Cardinality::Many),
            _ => None,
        }
    }
}
impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Cardinality::One => write!(f, "one"),
            Cardinality::Many => write!(f, "many"),
        }
    }
}

#[derive(Eq, PartialEq, Hash, Clone, Copy, Debug)]
pub enum Unique {
    Value,
    Identity,
}
impl Unique {
    pub fn ident(&self) -> Keyword {
        match self {
            Unique::Value => Keyword::unchecked("db.unique/value"),
            Unique::Identity => Keyword::unchecked("db.unique/identity"),
        }
    }
    pub fn from_ident(ident: &Keyword) -> Option<Unique> {
        match ident.as_str() {
            "db.unique/value" => Some(Unique::Value),
            "db.unique/identity" => Some(Unique::Identity),
            _ => None,
        }
    }
}
impl fmt::Display for Unique {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Unique::Value => write!(f, "value"),
            Unique::Identity => write!(f, "identity"),
        }
    }
}

// ------------- Attribute -------------
#[derive(Eq, PartialEq, Clone, Debug)]
pub struct Attribute {
    attribute: Thing, // let it be a thing so we can "talk" about attributes using datums
    ident: Keyword,
    value_type: ValueType,
    cardinality: Cardinality,
    unique: Option<Unique>,
    index: bool,
    fulltext: bool,
    component: bool,
    no_history: bool,
    doc: Option<String>,
}

impl Attribute {
    pub fn new(
        attribute: Thing,
        ident: Keyword,
        value_type: ValueType,
        cardinality: Cardinality,
    ) -> Self {
        Self {
            attribute,
            ident,
            value_type,
            cardinality,
            unique: None,
            index: false,
            fulltext: false,
            component: false,
            no_history: false,
            doc: None,
        }
    }
    pub fn with_unique(mut self, unique: Option<Unique>) -> Self {
        self.unique = unique;
        self
    }
    pub fn with_index(mut self, index: bool) -> Self {
        self.index = index;
        self
    }
    pub fn with_fulltext(mut self, fulltext: bool) -> Self {
        self.fulltext = fulltext;
        self
    }
    pub fn with_component(mut self, component: bool) -> Self {
        self.component = component;
        self
    }
    pub fn with_no_history(mut self, no_history: bool) -> Self {
        self.no_history = no_history;
        self
    }
    pub fn with_doc(mut self, doc: Option<String>) -> Self {
        self.doc = doc;
        self
    }
    // Only getters are exposed, which yields true immutability
    // for attributes once they have been kept.
    pub fn attribute(&self) -> Thing {
        self.attribute
    }
    pub fn ident(&self) -> &Keyword {
        &self.ident
    }
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }
    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }
    pub fn unique(&self) -> Option<Unique> {
        self.unique
    }
    pub fn index(&self) -> bool {
        self.index
    }
    /// Unique attributes are indexed whether or not the index flag is set.
    pub fn indexed(&self) -> bool {
        self.index || self.unique.is_some()
    }
    pub fn fulltext(&self) -> bool {
        self.fulltext
    }
    pub fn component(&self) -> bool {
        self.component
    }
    pub fn no_history(&self) -> bool {
        self.no_history
    }
    pub fn doc(&self) -> Option<&str> {
        self.doc.as_deref()
    }
    pub fn is_ref(&self) -> bool {
        self.value_type == ValueType::Reference
    }
    pub fn many(&self) -> bool {
        self.cardinality == Cardinality::Many
    }
}
impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} <{}, {}", self.ident, self.value_type, self.cardinality)?;
        if let Some(unique) = self.unique {
            write!(f, ", unique {}", unique)?;
        }
        if self.component {
            write!(f, ", component")?;
        }
        if self.no_history {
            write!(f, ", no history")?;
        }
        write!(f, ">")
    }
}

#[derive(Debug, Clone)]
pub struct AttributeKeeper {
    kept: HashMap<Keyword, Arc<Attribute>, OtherHasher>,
    lookup: HashMap<Thing, Arc<Attribute>, ThingHasher>, // double indexing, but attributes should be few
}
impl AttributeKeeper {
    pub fn new() -> Self {
        Self {
            kept: HashMap::default(),
            lookup: HashMap::default(),
        }
    }
    /// Keeps the attribute, replacing an earlier version with the same identity.
    /// Returns the kept attribute and whether its thing was previously kept.
    pub fn keep(&mut self, attribute: Attribute) -> (Arc<Attribute>, bool) {
        let thing = attribute.attribute();
        let keepsake = attribute.ident().clone();
        let previously_kept = match self.lookup.get(&thing) {
            Some(previous) => {
                let previous_ident = previous.ident().clone();
                self.kept.remove(&previous_ident);
                true
            }
            None => false,
        };
        let kept_attribute = match self.kept.entry(keepsake) {
            Entry::Vacant(e) => Arc::clone(e.insert(Arc::new(attribute))),
            Entry::Occupied(mut e) => {
                e.insert(Arc::new(attribute));
                Arc::clone(e.get())
            }
        };
        self.lookup.insert(thing, Arc::clone(&kept_attribute));
        (kept_attribute, previously_kept)
    }
    pub fn get(&self, ident: &Keyword) -> Option<Arc<Attribute>> {
        self.kept.get(ident).map(Arc::clone)
    }
    pub fn lookup(&self, attribute: &Thing) -> Option<Arc<Attribute>> {
        self.lookup.get(attribute).map(Arc::clone)
    }
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Attribute>> {
        self.lookup.values()
    }
    pub fn len(&self) -> usize {
        self.kept.len()
    }
}

// ------------- Datum -------------
#[derive(Eq, PartialEq, Hash, Clone, Copy, Debug)]
pub enum Operation {
    Add,
    Retract,
}
impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operation::Add => write!(f, "add"),
            Operation::Retract => write!(f, "retract"),
        }
    }
}

/// An immutable fact: entity, attribute, value, the transaction that
/// committed it (both its entity and its basis `t`), and whether it was
/// added or retracted.
#[derive(Eq, PartialEq, Hash, Clone, Debug)]
pub struct Datum {
    entity: Thing,
    attribute: Thing,
    value: Value,
    tx: Thing,
    t: u64,
    operation: Operation,
}
impl Datum {
    pub fn new(
        entity: Thing,
        attribute: Thing,
        value: Value,
        tx: Thing,
        t: u64,
        operation: Operation,
    ) -> Self {
        Self {
            entity,
            attribute,
            value,
            tx,
            t,
            operation,
        }
    }
    pub fn entity(&self) -> Thing {
        self.entity
    }
    pub fn attribute(&self) -> Thing {
        self.attribute
    }
    pub fn value(&self) -> &Value {
        &self.value
    }
    pub fn tx(&self) -> Thing {
        self.tx
    }
    pub fn t(&self) -> u64 {
        self.t
    }
    pub fn operation(&self) -> Operation {
        self.operation
    }
    pub fn added(&self) -> bool {
        self.operation == Operation::Add
    }
}
impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[{} {} {} {} {}]",
            self.entity, self.attribute, self.value, self.tx, self.operation
        )
    }
}

// ------------- Lookups -------------
#[derive(Debug, Clone)]
pub struct Lookup<K: Eq + Hash + Clone, V: Eq + Hash + Clone, H: BuildHasher + Default = RandomState> {
    index: im::HashMap<K, im::HashSet<V, H>, H>,
}
impl<K: Eq + Hash + Clone, V: Eq + Hash + Clone, H: BuildHasher + Default> Lookup<K, V, H> {
    pub fn new() -> Self {
        Self {
            index: im::HashMap::default(),
        }
    }
    pub fn insert(&mut self, key: K, value: V) {
        let set = self.index.entry(key).or_insert_with(im::HashSet::default);
        set.insert(value);
    }
    pub fn remove(&mut self, key: &K, value: &V) {
        if let Some(set) = self.index.get_mut(key) {
            set.remove(value);
            if set.is_empty() {
                self.index.remove(key);
            }
        }
    }
    pub fn lookup(&self, key: &K) -> Option<&im::HashSet<V, H>> {
        self.index.get(key)
    }
    pub fn clear(&mut self) {
        self.index.clear();
    }
    pub fn len(&self) -> usize {
        self.index.len()
    }
}

// ------------- Snapshot -------------
pub type EntityValues = im::HashMap<Thing, Vec<Value>, ThingHasher>;

/// An immutable database value as of some basis `t`. Transactions never
/// touch a published snapshot; they stage a copy and publish a new one.
/// The copy shares every index node the transaction does not change.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub(crate) basis_t: u64,
    pub(crate) thing_generator: ThingGenerator,
    pub(crate) attribute_keeper: AttributeKeeper,
    // symbolic names consulted wherever an entity identifier is expected
    pub(crate) idents: BiMap<Keyword, Thing>,
    // current state: entity -> attribute -> value(s)
    pub(crate) eav: im::HashMap<Thing, EntityValues, ThingHasher>,
    // (attribute, value) -> entities, for indexed and unique attributes
    pub(crate) avet: Lookup<(Thing, Value), Thing, OtherHasher>,
    // referenced entity -> (referencing entity, attribute)
    pub(crate) vaet: Lookup<Thing, (Thing, Thing), ThingHasher>,
    pub(crate) history: Vector<Arc<Datum>>,
    // the transaction entity of every basis t, genesis at index 0
    pub(crate) transactions: Vector<Thing>,
    pub(crate) ledger: Vector<blake3::Hash>,
}

impl Snapshot {
    pub(crate) fn empty() -> Self {
        Self {
            basis_t: 0,
            thing_generator: ThingGenerator::new(),
            attribute_keeper: AttributeKeeper::new(),
            idents: BiMap::new(),
            eav: im::HashMap::default(),
            avet: Lookup::new(),
            vaet: Lookup::new(),
            history: Vector::new(),
            transactions: Vector::new(),
            ledger: Vector::new(),
        }
    }

    // ---- state primitives used by the write path ----
    pub(crate) fn current(&self, entity: Thing, attribute: Thing) -> &[Value] {
        self.eav
            .get(&entity)
            .and_then(|values| values.get(&attribute))
            .map(|values| values.as_slice())
            .unwrap_or(&[])
    }
    pub(crate) fn holds(&self, entity: Thing, attribute: Thing, value: &Value) -> bool {
        self.current(entity, attribute).contains(value)
    }
    pub(crate) fn insert_value(&mut self, entity: Thing, attribute: &Attribute, value: Value) {
        let values = self
            .eav
            .entry(entity)
            .or_insert_with(EntityValues::default)
            .entry(attribute.attribute())
            .or_insert_with(Vec::new);
        if values.contains(&value) {
            return;
        }
        values.push(value.clone());
        if attribute.indexed() {
            self.avet.insert((attribute.attribute(), value.clone()), entity);
        }
        if let Value::Ref(target) = value {
            self.vaet.insert(target, (entity, attribute.attribute()));
        }
        if attribute.ident().as_str() == "db/ident" {
            if let Value::Keyword(ident) = value {
                self.idents.insert(ident, entity);
            }
        }
    }
    pub(crate) fn remove_value(&mut self, entity: Thing, attribute: &Attribute, value: &Value) {
        let Some(values) = self.eav.get_mut(&entity) else {
            return;
        };
        if let Some(current) = values.get_mut(&attribute.attribute()) {
            current.retain(|v| v != value);
            if current.is_empty() {
                values.remove(&attribute.attribute());
            }
        }
        if values.is_empty() {
            self.eav.remove(&entity);
        }
        self.avet.remove(&(attribute.attribute(), value.clone()), &entity);
        if let Value::Ref(target) = value {
            self.vaet.remove(target, &(entity, attribute.attribute()));
        }
        if attribute.ident().as_str() == "db/ident" {
            if let Value::Keyword(ident) = value {
                if self.idents.get_by_left(ident) == Some(&entity) {
                    self.idents.remove_by_left(ident);
                }
            }
        }
    }
    /// Rebuilds the value index of one attribute from the current state.
    pub(crate) fn reindex(&mut self, attribute: &Attribute) {
        let thing = attribute.attribute();
        let mut held = Vec::new();
        for (entity, values) in self.eav.iter() {
            if let Some(values) = values.get(&thing) {
                for value in values {
                    held.push((*entity, value.clone()));
                }
            }
        }
        for (entity, value) in held {
            if attribute.indexed() {
                self.avet.insert((thing, value), entity);
            } else {
                self.avet.remove(&(thing, value), &entity);
            }
        }
    }

    // ---- queries ----
    pub fn basis_t(&self) -> u64 {
        self.basis_t
    }
    /// The hash chained over every committed transaction up to this snapshot.
    pub fn ledger_head(&self) -> Option<String> {
        self.ledger.last().map(|hash| hash.to_hex().to_string())
    }
    pub fn exists(&self, entity: Thing) -> bool {
        self.thing_generator.check(entity).is_some()
    }
    pub fn entid(&self, ident: &str) -> Option<Thing> {
        let ident = Keyword::new(ident)?;
        self.idents.get_by_left(&ident).copied()
    }
    pub fn ident(&self, entity: Thing) -> Option<&Keyword> {
        self.idents.get_by_right(&entity)
    }
    pub fn attribute(&self, ident: &str) -> Option<Arc<Attribute>> {
        self.attribute_keeper.get(&Keyword::new(ident)?)
    }
    pub fn attribute_of(&self, attribute: Thing) -> Option<Arc<Attribute>> {
        self.attribute_keeper.lookup(&attribute)
    }
    pub fn attributes(&self) -> Vec<Arc<Attribute>> {
        let mut attributes: Vec<_> = self.attribute_keeper.iter().map(Arc::clone).collect();
        attributes.sort_by(|a, b| a.ident().cmp(b.ident()));
        attributes
    }
    /// The current attribute values of an entity, keyed by attribute ident.
    pub fn entity(&self, entity: Thing) -> Option<BTreeMap<Keyword, Vec<Value>>> {
        let values = self.eav.get(&entity)?;
        let mut map = BTreeMap::new();
        for (attribute, values) in values.iter() {
            if let Some(attribute) = self.attribute_keeper.lookup(attribute) {
                map.insert(attribute.ident().clone(), values.clone());
            }
        }
        Some(map)
    }
    pub fn values(&self, entity: Thing, attribute: &str) -> Vec<Value> {
        match self.attribute(attribute) {
            Some(attribute) => self.current(entity, attribute.attribute()).to_vec(),
            None => Vec::new(),
        }
    }
    pub fn value(&self, entity: Thing, attribute: &str) -> Option<Value> {
        self.values(entity, attribute).into_iter().next()
    }
    /// Finds the entity holding `value` for a unique attribute.
    pub fn lookup(&self, attribute: &str, value: impl Into<Value>) -> Option<Thing> {
        let attribute = self.attribute(attribute)?;
        attribute.unique()?;
        self.avet
            .lookup(&(attribute.attribute(), value.into()))
            .and_then(|entities| entities.iter().next().copied())
    }
    /// Every entity holding `value` for an indexed attribute.
    pub fn holders(&self, attribute: &str, value: impl Into<Value>) -> Vec<Thing> {
        let Some(attribute) = self.attribute(attribute) else {
            return Vec::new();
        };
        let mut holders: Vec<Thing> = self
            .avet
            .lookup(&(attribute.attribute(), value.into()))
            .map(|entities| entities.iter().copied().collect())
            .unwrap_or_default();
        holders.sort_unstable();
        holders
    }
    /// Entities referencing `entity`, paired with the referencing attribute.
    pub fn referrers(&self, entity: Thing) -> Vec<(Thing, Thing)> {
        let mut referrers: Vec<(Thing, Thing)> = self
            .vaet
            .lookup(&entity)
            .map(|refs| refs.iter().copied().collect())
            .unwrap_or_default();
        referrers.sort_unstable();
        referrers
    }
    /// The ordered log of every retained datum.
    pub fn history(&self) -> &Vector<Arc<Datum>> {
        &self.history
    }
    pub fn history_of(&self, entity: Thing, attribute: &str) -> Vec<Arc<Datum>> {
        let Some(attribute) = self.attribute(attribute) else {
            return Vec::new();
        };
        self.history
            .iter()
            .filter(|d| d.entity() == entity && d.attribute() == attribute.attribute())
            .map(Arc::clone)
            .collect()
    }
    pub fn tx_of(&self, t: u64) -> Option<Thing> {
        self.transactions.get(t as usize).copied()
    }
    pub fn tx_instant(&self, t: u64) -> Option<DateTime<Utc>> {
        let tx = self.tx_of(t)?;
        match self.value(tx, "db/txInstant") {
            Some(Value::Timestamp(instant)) => Some(instant),
            _ => None,
        }
    }
}

// ------------- Database -------------
// This sets up the database with the necessary structures
#[derive(Clone)]
pub struct Database {
    // serializes writers, so the committed log has a strict total order
    writer: Arc<Mutex<()>>,
    // the latest published snapshot, readers clone the Arc and never block writers for long
    current: Arc<RwLock<Arc<Snapshot>>>,
}

impl Database {
    pub fn new() -> Database {
        // The genesis transaction installs the system attributes
        // and enumerations as ordinary datoms.
        let genesis = crate::schema::genesis();
        Database {
            writer: Arc::new(Mutex::new(())),
            current: Arc::new(RwLock::new(Arc::new(genesis))),
        }
    }
    /// The current database value.
    pub fn snapshot(&self) -> Result<Arc<Snapshot>> {
        let current = self.current.read()?;
        Ok(Arc::clone(&*current))
    }
    pub(crate) fn writer(&self) -> Result<MutexGuard<'_, ()>> {
        Ok(self.writer.lock()?)
    }
    pub(crate) fn publish(&self, snapshot: Arc<Snapshot>) -> Result<()> {
        let mut current = self.current.write()?;
        *current = snapshot;
        Ok(())
    }
}

impl Default for Database {
    fn default() -> Self {
        Database::new()
    }
}
