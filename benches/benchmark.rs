use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use schemata::construct::{Cardinality, Database, Unique};
use schemata::datatype::ValueType;
use schemata::schema::AttributeDefinition;
use schemata::transact::{EntityMap, EntityRef, TxOp};

fn database() -> Database {
    let db = Database::new();
    db.install(
        AttributeDefinition::new("user/email")
            .value_type(ValueType::String)
            .cardinality(Cardinality::One)
            .unique(Unique::Identity),
    )
    .unwrap();
    db.install(
        AttributeDefinition::new("user/visits")
            .value_type(ValueType::Integer)
            .cardinality(Cardinality::One),
    )
    .unwrap();
    db
}

fn users(range: std::ops::Range<u64>) -> Vec<TxOp> {
    range
        .map(|n| {
            TxOp::Map(
                EntityMap::new()
                    .id(EntityRef::temp(&format!("user-{}", n)))
                    .with("user/email", format!("user-{}@example.com", n))
                    .with("user/visits", n as i64),
            )
        })
        .collect()
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let db = database();
    let mut next = 0;
    c.bench_function("insert 100", |b| {
        b.iter(|| {
            let report = db.transact(users(next..next + 100)).unwrap();
            next += 100;
            black_box(report.t)
        })
    });

    let db = database();
    db.transact(users(0..1000)).unwrap();
    c.bench_function("upsert 100", |b| b.iter(|| black_box(db.transact(users(0..100)).unwrap().t)));

    let snapshot = db.snapshot().unwrap();
    println!("{} datums in history", snapshot.history().len());
    c.bench_function("lookup 1k", |b| {
        b.iter(|| {
            (0..1000)
                .filter_map(|n| snapshot.lookup("user/email", format!("user-{}@example.com", n)))
                .count()
        })
    });
    c.bench_function("as_of schema", |b| b.iter(|| black_box(snapshot.as_of(1).basis_t())));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
