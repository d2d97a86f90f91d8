use schemata::construct::{Cardinality, Database, Unique};
use schemata::datatype::{Value, ValueType};
use schemata::error::SchemataError;
use schemata::graph::{self, TouchedValue};
use schemata::schema::AttributeDefinition;
use schemata::transact::{EntityMap, EntityRef, TxOp, TxValue};

fn setup() -> Database {
    let db = Database::new();
    let definitions = [
        AttributeDefinition::new("order/number")
            .value_type(ValueType::String)
            .cardinality(Cardinality::One)
            .unique(Unique::Identity),
        AttributeDefinition::new("order/lines")
            .value_type(ValueType::Reference)
            .cardinality(Cardinality::Many)
            .component(),
        AttributeDefinition::new("order/customer")
            .value_type(ValueType::Reference)
            .cardinality(Cardinality::One),
        AttributeDefinition::new("line/sku")
            .value_type(ValueType::String)
            .cardinality(Cardinality::One),
        AttributeDefinition::new("line/next")
            .value_type(ValueType::Reference)
            .cardinality(Cardinality::One)
            .component(),
        AttributeDefinition::new("customer/name")
            .value_type(ValueType::String)
            .cardinality(Cardinality::One),
        AttributeDefinition::new("customer/email")
            .value_type(ValueType::String)
            .cardinality(Cardinality::One)
            .unique(Unique::Identity),
    ];
    for definition in definitions {
        db.install(definition).unwrap();
    }
    db
}

#[test]
fn retracting_an_entity_retracts_its_components() {
    let db = setup();
    let report = db
        .transact_str(
            r#"[{:db/id "customer" :customer/name "Ada"}
                {:db/id "order"
                 :order/number "o-1"
                 :order/customer "customer"
                 :order/lines [{:line/sku "A"} {:line/sku "B"}]}]"#,
        )
        .unwrap();
    let order = report.tempids["order"];
    let customer = report.tempids["customer"];
    let snapshot = report.db_after;
    let lines: Vec<u64> = snapshot
        .values(order, "order/lines")
        .iter()
        .filter_map(Value::as_ref)
        .collect();
    assert_eq!(lines.len(), 2);
    let mut expected = vec![order, lines[0], lines[1]];
    expected.sort_unstable();
    // the customer is referenced but not owned
    assert_eq!(snapshot.cascade(order), expected);

    let retracted = db.transact(vec![TxOp::retract_entity(order)]).unwrap();
    let after = retracted.db_after;
    assert!(after.entity(order).is_none());
    for line in lines {
        assert!(after.entity(line).is_none());
    }
    assert_eq!(after.value(customer, "customer/name"), Some(Value::from("Ada")));
    assert!(retracted.tx_data.iter().skip(1).all(|d| !d.added()));
}

#[test]
fn cyclic_components_terminate() {
    let db = setup();
    let report = db
        .transact(vec![
            TxOp::add(EntityRef::temp("a"), "line/sku", "A"),
            TxOp::add(EntityRef::temp("b"), "line/sku", "B"),
            TxOp::add(EntityRef::temp("a"), "line/next", TxValue::temp("b")),
            TxOp::add(EntityRef::temp("b"), "line/next", TxValue::temp("a")),
        ])
        .unwrap();
    let (a, b) = (report.tempids["a"], report.tempids["b"]);
    let cascade = graph::retract_entity(&report.db_after, a);
    assert_eq!(cascade.len(), 2);
    assert!(cascade.contains(a) && cascade.contains(b));

    let after = db.transact(vec![TxOp::retract_entity(a)]).unwrap().db_after;
    assert!(after.entity(a).is_none());
    assert!(after.entity(b).is_none());
}

#[test]
fn retracting_an_entity_removes_references_to_it() {
    let db = setup();
    let report = db
        .transact_str(r#"[{:db/id "c" :customer/name "Ada"} {:db/id "o" :order/number "o-1" :order/customer "c"}]"#)
        .unwrap();
    let (customer, order) = (report.tempids["c"], report.tempids["o"]);
    assert_eq!(report.db_after.referrers(customer).len(), 1);

    let after = db.transact(vec![TxOp::retract_entity(customer)]).unwrap().db_after;
    assert!(after.values(order, "order/customer").is_empty());
    assert_eq!(after.value(order, "order/number"), Some(Value::from("o-1")));
}

#[test]
fn touch_expands_components_in_place() {
    let db = setup();
    let report = db
        .transact_str(r#"[{:db/id "o" :order/number "o-2" :order/lines [{:line/sku "C"}]}]"#)
        .unwrap();
    let touched = report.db_after.touch(report.tempids["o"]).unwrap();
    let lines = touched
        .attributes
        .iter()
        .find(|(k, _)| k.as_str() == "order/lines")
        .map(|(_, v)| v)
        .unwrap();
    match &lines[0] {
        TouchedValue::Component(line) => {
            assert!(line.attributes.values().any(|v| v == &vec![TouchedValue::Value(Value::from("C"))]));
        }
        other => panic!("expected an expanded component, got {:?}", other),
    }
    assert_eq!(touched.to_json()["order/number"][0], "o-2");
}

#[test]
fn nested_maps_need_ownership_or_identity() {
    let db = setup();
    // order/customer is neither a component nor is customer/name unique
    let orphan = db.transact(vec![TxOp::Map(
        EntityMap::new()
            .with("order/number", "o-3")
            .with("order/customer", EntityMap::new().with("customer/name", "Bea")),
    )]);
    assert!(matches!(orphan, Err(SchemataError::InvalidTransaction(_))));

    // a nested map carrying a unique attribute is allowed, and upserts
    let existing = db
        .transact_str(r#"[{:db/id "c" :customer/email "bea@example.com"}]"#)
        .unwrap()
        .tempids["c"];
    let report = db
        .transact(vec![TxOp::Map(
            EntityMap::new().with("order/number", "o-5").with(
                "order/customer",
                EntityMap::new()
                    .with("customer/email", "bea@example.com")
                    .with("customer/name", "Bea"),
            ),
        )])
        .unwrap();
    let order = report.db_after.lookup("order/number", "o-5").unwrap();
    assert_eq!(report.db_after.value(order, "order/customer"), Some(Value::Ref(existing)));
    assert_eq!(report.db_after.value(existing, "customer/name"), Some(Value::from("Bea")));
}

#[test]
fn retracting_a_nested_map_creates_nothing() {
    let db = setup();
    let order = db
        .transact(vec![TxOp::Map(
            EntityMap::new().id(EntityRef::temp("o")).with("order/number", "o-6"),
        )])
        .unwrap()
        .tempids["o"];
    let basis = db.snapshot().unwrap().basis_t();
    let result = db.transact(vec![TxOp::retract(
        order,
        "order/customer",
        TxValue::Nested(EntityMap::new().with("customer/email", "zed@example.com")),
    )]);
    assert!(matches!(result, Err(SchemataError::InvalidTransaction(_))));
    let snapshot = db.snapshot().unwrap();
    assert_eq!(snapshot.basis_t(), basis);
    assert!(snapshot.lookup("customer/email", "zed@example.com").is_none());
}
