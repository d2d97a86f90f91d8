use schemata::construct::{Cardinality, Database, Unique};
use schemata::datatype::{Value, ValueType};

const SCHEMA: &str = r#"
[{:db/ident       :user/email
  :db/valueType   :db.type/string
  :db/cardinality :db.cardinality/one
  :db/unique      :db.unique/identity
  :db/doc         "The email address of a user, unique across all users"}
 {:db/ident       :user/name
  :db/valueType   :db.type/string
  :db/cardinality :db.cardinality/one
  :db/index       true}
 {:db/ident       :user/roles
  :db/valueType   :db.type/reference
  :db/cardinality :db.cardinality/many}]
"#;

fn setup() -> Database {
    let db = Database::new();
    db.transact_str(SCHEMA).expect("schema installs");
    db.transact_str("[{:db/ident :role/guest} {:db/ident :role/author}]")
        .expect("roles install");
    db
}

#[test]
fn schema_transacted_as_data_is_installed() {
    let db = setup();
    let snapshot = db.snapshot().unwrap();
    let email = snapshot.attribute("user/email").expect("email installed");
    assert_eq!(email.value_type(), ValueType::String);
    assert_eq!(email.cardinality(), Cardinality::One);
    assert_eq!(email.unique(), Some(Unique::Identity));
    assert!(email.doc().is_some());
    assert!(snapshot.attribute("user/name").unwrap().indexed());
    assert!(snapshot.attribute("user/roles").unwrap().many());
    // the install transaction plus the roles transaction
    assert_eq!(snapshot.basis_t(), 2);
}

#[test]
fn asserting_the_same_email_again_merges_into_one_user() {
    let db = setup();
    let first = db
        .transact_str(r#"[{:db/id "alice" :user/email "a@example.com" :user/roles [:role/guest :role/author]}]"#)
        .expect("user inserted");
    let alice = first.tempids["alice"];
    let second = db
        .transact_str(r#"[{:db/id "someone" :user/email "a@example.com"}]"#)
        .expect("upsert");
    assert_eq!(second.tempids["someone"], alice);

    let snapshot = db.snapshot().unwrap();
    assert_eq!(snapshot.holders("user/email", "a@example.com"), vec![alice]);
    let mut roles = snapshot.values(alice, "user/roles");
    roles.sort_by_key(|v| v.as_ref());
    let mut expected = vec![
        Value::Ref(snapshot.entid("role/guest").unwrap()),
        Value::Ref(snapshot.entid("role/author").unwrap()),
    ];
    expected.sort_by_key(|v| v.as_ref());
    assert_eq!(roles, expected);
}

#[test]
fn upserting_roles_accumulates_the_set() {
    let db = setup();
    db.transact_str(r#"[{:user/email "a@example.com" :user/name "Alice" :user/roles [:role/guest]}]"#)
        .unwrap();
    let report = db
        .transact_str(r#"[{:db/id "again" :user/email "a@example.com" :user/roles [:role/author]}]"#)
        .unwrap();
    let alice = report.tempids["again"];
    let snapshot = report.db_after;
    assert_eq!(snapshot.values(alice, "user/roles").len(), 2);
    assert_eq!(snapshot.value(alice, "user/name"), Some(Value::from("Alice")));
    // only the new role and the transaction instant were committed
    assert_eq!(report.tx_data.len(), 2);
}

#[test]
fn indexed_names_can_be_searched() {
    let db = setup();
    db.transact_str(
        r#"[{:user/email "a@example.com" :user/name "Sam"}
            {:user/email "b@example.com" :user/name "Sam"}]"#,
    )
    .unwrap();
    let snapshot = db.snapshot().unwrap();
    assert_eq!(snapshot.holders("user/name", "Sam").len(), 2);
    // user/name is indexed but not unique
    assert_eq!(snapshot.lookup("user/name", "Sam"), None);
}
