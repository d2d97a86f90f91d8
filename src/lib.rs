//! Schemata – an attribute-based schema engine in the style of Datomic.
//!
//! All information is kept as *datums*: facts of the form
//! `(entity, attribute, value, transaction, added?)`, where:
//! * A [`construct::Thing`] is an opaque identity (a simple `u64`) for entities,
//!   attributes and transactions alike.
//! * An [`construct::Attribute`] declares a value type, a cardinality and
//!   optional uniqueness, indexing, component and no-history flags.
//! * A [`construct::Datum`] is one immutable fact in the history log.
//!
//! Attributes are themselves entities, described by datums on the system
//! attributes (`db/ident`, `db/valueType`, `db/cardinality`, ...) that the
//! genesis transaction installs. Schema changes are therefore versioned like
//! any other data.
//!
//! ## Modules
//! * [`construct`] – things, attributes, datums, keepers and the [`construct::Snapshot`] / [`construct::Database`] pair.
//! * [`datatype`] – keywords and the closed set of value types and values.
//! * [`schema`] – the attribute registry and the genesis transaction.
//! * [`validate`] – type coercion and cardinality checks.
//! * [`identity`] – uniqueness constraints and identity upserts.
//! * [`graph`] – idents, references and component cascades.
//! * [`history`] – the history policy and past snapshots.
//! * [`transact`] – the serialized, all-or-nothing write path.
//! * [`txdata`] – an EDN-like text notation for transactions (`txdata.pest`).
//! * [`interface`] – background transactions with cancellation.
//! * [`config`] – settings for the command line runner.
//!
//! ## Quick Start
//! ```
//! use schemata::construct::{Cardinality, Database, Unique};
//! use schemata::datatype::ValueType;
//! use schemata::schema::AttributeDefinition;
//!
//! let db = Database::new();
//! db.install(
//!     AttributeDefinition::new("user/email")
//!         .value_type(ValueType::String)
//!         .cardinality(Cardinality::One)
//!         .unique(Unique::Identity),
//! )
//! .unwrap();
//! let first = db.transact_str(r#"[{:user/email "a@example.com"}]"#).unwrap();
//! let again = db.transact_str(r#"[{:db/id "u" :user/email "a@example.com"}]"#).unwrap();
//! assert_eq!(first.db_after.lookup("user/email", "a@example.com"), Some(again.tempids["u"]));
//! ```
//!
//! ## Concurrency
//! Writers are serialized, and each transaction is staged against a private
//! copy of the latest snapshot. Readers hold `Arc<Snapshot>` values that are
//! never mutated, so they never observe a partially applied transaction.

pub mod config;
pub mod construct;
pub mod datatype;
pub mod error;
pub mod graph;
pub mod history;
pub mod identity;
pub mod interface;
pub mod schema;
pub mod transact;
pub mod txdata;
pub mod validate;

pub use construct::{Database, Snapshot, Thing};
pub use error::{Result, SchemataError};
pub use transact::{EntityMap, EntityRef, TxOp, TxReport, TxValue};
