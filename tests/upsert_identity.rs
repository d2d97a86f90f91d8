use schemata::construct::{Cardinality, Database, Thing, Unique};
use schemata::datatype::{Value, ValueType};
use schemata::error::SchemataError;
use schemata::identity::{self, Resolving};
use schemata::schema::AttributeDefinition;
use schemata::transact::{EntityMap, EntityRef, TxOp};

fn setup() -> Database {
    let db = Database::new();
    db.install(
        AttributeDefinition::new("user/email")
            .value_type(ValueType::String)
            .cardinality(Cardinality::One)
            .unique(Unique::Identity),
    )
    .unwrap();
    db.install(
        AttributeDefinition::new("user/handle")
            .value_type(ValueType::String)
            .cardinality(Cardinality::One)
            .unique(Unique::Identity),
    )
    .unwrap();
    db.install(
        AttributeDefinition::new("user/name")
            .value_type(ValueType::String)
            .cardinality(Cardinality::One),
    )
    .unwrap();
    db
}

fn user(db: &Database, tempid: &str, email: &str) -> Thing {
    let report = db
        .transact(vec![TxOp::Map(
            EntityMap::new().id(EntityRef::temp(tempid)).with("user/email", email),
        )])
        .expect("user transacted");
    report.tempids[tempid]
}

#[test]
fn a_tempid_matching_an_identity_resolves_to_the_holder() {
    let db = setup();
    let alice = user(&db, "alice", "alice@example.com");
    let again = user(&db, "other", "alice@example.com");
    assert_eq!(alice, again);

    let snapshot = db.snapshot().unwrap();
    let email = snapshot.attribute("user/email").unwrap();
    assert_eq!(
        identity::resolve(&snapshot, Resolving::Temp, &email, &Value::from("alice@example.com")).unwrap(),
        Some(alice)
    );
    assert_eq!(
        identity::resolve(&snapshot, Resolving::Temp, &email, &Value::from("nobody@example.com")).unwrap(),
        None
    );
}

#[test]
fn upserted_attributes_land_on_the_existing_entity() {
    let db = setup();
    let alice = user(&db, "alice", "alice@example.com");
    let report = db
        .transact(vec![
            TxOp::add(EntityRef::temp("t"), "user/email", "alice@example.com"),
            TxOp::add(EntityRef::temp("t"), "user/name", "Alice"),
        ])
        .unwrap();
    assert_eq!(report.tempids["t"], alice);
    assert_eq!(report.db_after.value(alice, "user/name"), Some(Value::from("Alice")));
    // no new entity was created for the tempid
    assert_eq!(report.db_after.holders("user/email", "alice@example.com"), vec![alice]);
}

#[test]
fn tempids_sharing_an_identity_in_one_transaction_are_unified() {
    let db = setup();
    let report = db
        .transact(vec![
            TxOp::add(EntityRef::temp("a"), "user/email", "new@example.com"),
            TxOp::add(EntityRef::temp("b"), "user/email", "new@example.com"),
            TxOp::add(EntityRef::temp("b"), "user/name", "New"),
        ])
        .unwrap();
    assert_eq!(report.tempids["a"], report.tempids["b"]);
    assert_eq!(
        report.db_after.value(report.tempids["a"], "user/name"),
        Some(Value::from("New"))
    );
}

#[test]
fn a_committed_entity_cannot_take_an_identity_held_by_another() {
    let db = setup();
    let alice = user(&db, "alice", "alice@example.com");
    let bob = user(&db, "bob", "bob@example.com");
    let basis = db.snapshot().unwrap().basis_t();
    match db.transact(vec![TxOp::add(bob, "user/email", "alice@example.com")]) {
        Err(SchemataError::UniqueConflict { existing, .. }) => assert_eq!(existing, alice),
        other => panic!("expected a unique conflict, got {:?}", other.map(|r| r.t)),
    }
    assert_eq!(db.snapshot().unwrap().basis_t(), basis);

    let snapshot = db.snapshot().unwrap();
    let email = snapshot.attribute("user/email").unwrap();
    assert!(matches!(
        identity::resolve(&snapshot, Resolving::Committed(bob), &email, &Value::from("alice@example.com")),
        Err(SchemataError::UniqueConflict { .. })
    ));
}

#[test]
fn one_tempid_cannot_upsert_into_two_entities() {
    let db = setup();
    user(&db, "alice", "alice@example.com");
    db.transact(vec![TxOp::add(EntityRef::temp("b"), "user/handle", "bobby")])
        .unwrap();
    let result = db.transact(vec![TxOp::Map(
        EntityMap::new()
            .id(EntityRef::temp("x"))
            .with("user/email", "alice@example.com")
            .with("user/handle", "bobby"),
    )]);
    assert!(matches!(result, Err(SchemataError::UniqueConflict { .. })));
}

#[test]
fn maps_without_an_id_upsert_as_well() {
    let db = setup();
    let alice = user(&db, "alice", "alice@example.com");
    let report = db
        .transact(vec![TxOp::Map(
            EntityMap::new()
                .with("user/email", "alice@example.com")
                .with("user/name", "Alice Liddell"),
        )])
        .unwrap();
    assert!(report.tempids.is_empty());
    assert_eq!(
        report.db_after.value(alice, "user/name"),
        Some(Value::from("Alice Liddell"))
    );
}
