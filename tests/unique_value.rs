use schemata::construct::{Cardinality, Database, Unique};
use schemata::datatype::{Value, ValueType};
use schemata::error::SchemataError;
use schemata::schema::AttributeDefinition;
use schemata::transact::{EntityRef, TxOp};

fn setup() -> Database {
    let db = Database::new();
    db.install(
        AttributeDefinition::new("citizen/ssn")
            .value_type(ValueType::String)
            .cardinality(Cardinality::One)
            .unique(Unique::Value),
    )
    .unwrap();
    db.install(
        AttributeDefinition::new("citizen/name")
            .value_type(ValueType::String)
            .cardinality(Cardinality::One),
    )
    .unwrap();
    db
}

#[test]
fn a_new_entity_cannot_take_a_held_value() {
    let db = setup();
    db.transact_str(r#"[{:citizen/ssn "123" :citizen/name "First"}]"#)
        .unwrap();
    let result = db.transact_str(r#"[{:db/id "second" :citizen/ssn "123"}]"#);
    assert!(matches!(result, Err(SchemataError::UniqueConflict { .. })));
    // value uniqueness never merges
    assert_eq!(db.snapshot().unwrap().holders("citizen/ssn", "123").len(), 1);
}

#[test]
fn a_committed_entity_cannot_take_a_held_value() {
    let db = setup();
    let first = db.transact_str(r#"[{:db/id "a" :citizen/ssn "123"}]"#).unwrap().tempids["a"];
    let second = db.transact_str(r#"[{:db/id "b" :citizen/ssn "456"}]"#).unwrap().tempids["b"];
    match db.transact(vec![TxOp::add(second, "citizen/ssn", "123")]) {
        Err(SchemataError::UniqueConflict { attribute, existing, .. }) => {
            assert_eq!(attribute, ":citizen/ssn");
            assert_eq!(existing, first);
        }
        other => panic!("expected a unique conflict, got {:?}", other.map(|r| r.t)),
    }
}

#[test]
fn reasserting_a_held_value_on_its_holder_is_a_no_op() {
    let db = setup();
    let first = db.transact_str(r#"[{:db/id "a" :citizen/ssn "123"}]"#).unwrap().tempids["a"];
    let report = db.transact(vec![TxOp::add(first, "citizen/ssn", "123")]).unwrap();
    // only the transaction instant
    assert_eq!(report.tx_data.len(), 1);
}

#[test]
fn a_released_value_can_be_taken() {
    let db = setup();
    let first = db.transact_str(r#"[{:db/id "a" :citizen/ssn "123"}]"#).unwrap().tempids["a"];
    db.transact(vec![TxOp::retract(first, "citizen/ssn", "123")]).unwrap();
    let report = db.transact_str(r#"[{:db/id "b" :citizen/ssn "123"}]"#).unwrap();
    assert_ne!(report.tempids["b"], first);
    assert_eq!(report.db_after.lookup("citizen/ssn", "123"), Some(report.tempids["b"]));
}

#[test]
fn swapping_values_within_one_transaction_is_allowed() {
    let db = setup();
    let a = db.transact_str(r#"[{:db/id "a" :citizen/ssn "1"}]"#).unwrap().tempids["a"];
    let b = db.transact_str(r#"[{:db/id "b" :citizen/ssn "2"}]"#).unwrap().tempids["b"];
    let report = db
        .transact(vec![
            TxOp::add(a, "citizen/ssn", "2"),
            TxOp::add(b, "citizen/ssn", "1"),
        ])
        .unwrap();
    assert_eq!(report.db_after.lookup("citizen/ssn", "1"), Some(b));
    assert_eq!(report.db_after.lookup("citizen/ssn", "2"), Some(a));
}

#[test]
fn lookup_refs_identify_entities_by_unique_value() {
    let db = setup();
    let first = db.transact_str(r#"[{:db/id "a" :citizen/ssn "123"}]"#).unwrap().tempids["a"];
    db.transact_str(r#"[[:db/add [:citizen/ssn "123"] :citizen/name "Named"]]"#)
        .unwrap();
    assert_eq!(
        db.snapshot().unwrap().value(first, "citizen/name"),
        Some(Value::from("Named"))
    );

    let missing = db.transact(vec![TxOp::add(
        EntityRef::lookup("citizen/ssn", "999"),
        "citizen/name",
        "Nobody",
    )]);
    assert!(matches!(missing, Err(SchemataError::UnknownIdent(_))));

    let not_unique = db.transact(vec![TxOp::add(
        EntityRef::lookup("citizen/name", "Named"),
        "citizen/name",
        "Renamed",
    )]);
    assert!(matches!(not_unique, Err(SchemataError::InvalidTransaction(_))));
}

#[test]
fn an_upsert_may_restate_its_own_unique_values() {
    let db = setup();
    db.install(
        AttributeDefinition::new("citizen/passport")
            .value_type(ValueType::String)
            .cardinality(Cardinality::One)
            .unique(Unique::Identity),
    )
    .unwrap();
    let first = db
        .transact_str(r#"[{:db/id "a" :citizen/passport "P-1" :citizen/ssn "123"}]"#)
        .unwrap()
        .tempids["a"];
    let report = db
        .transact_str(r#"[{:db/id "b" :citizen/passport "P-1" :citizen/ssn "123" :citizen/name "Same"}]"#)
        .unwrap();
    assert_eq!(report.tempids["b"], first);
    assert_eq!(report.db_after.value(first, "citizen/name"), Some(Value::from("Same")));

    // without the identity the held value belongs to someone else
    let result = db.transact_str(r#"[{:db/id "c" :citizen/passport "P-2" :citizen/ssn "123"}]"#);
    assert!(matches!(result, Err(SchemataError::UniqueConflict { existing, .. }) if existing == first));
}
