//! Textual transaction data.
//!
//! Transactions can be written in an EDN-like notation (see `txdata.pest`).
//! A transaction is a vector of forms, where each form is either an entity
//! map or one of
//!
//! * `[:db/add e a v]`
//! * `[:db/retract e a v]`
//! * `[:db/retractEntity e]`
//!
//! In entity position, integers are entity ids, strings are tempids,
//! keywords are idents and `[attribute value]` pairs are lookup refs.
//! Scalars beyond the plain ones are written `#inst "..."`, `#uuid "..."`,
//! `#uri "..."`, `#bytes "hex"`, `12N` (big integer) and `1.5M` (big decimal).
use std::str::FromStr;

use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;
use tracing::debug;
use uuid::Uuid;

use crate::construct::{Database, Thing};
use crate::datatype::{Decimal, Keyword, Uri, Value};
use crate::error::{Result, SchemataError};
use crate::transact::{EntityMap, EntityRef, TxOp, TxReport, TxValue};

#[derive(Parser)]
#[grammar = "txdata.pest"]
struct TxDataParser;

#[derive(Debug, Clone, PartialEq)]
enum Edn {
    Nil,
    Boolean(bool),
    Integer(i64),
    BigInteger(BigInt),
    Double(f64),
    BigDecimal(Decimal),
    String(String),
    Keyword(Keyword),
    Tagged(String, String),
    Vector(Vec<Edn>),
    Map(Vec<(Edn, Edn)>),
}

fn parse_error(message: impl Into<String>) -> SchemataError {
    SchemataError::Parse {
        message: message.into(),
        line: None,
        col: None,
    }
}

fn read(text: &str) -> Result<Vec<Edn>> {
    let mut pairs = TxDataParser::parse(Rule::document, text).map_err(|e| {
        let (line, col) = match e.line_col {
            pest::error::LineColLocation::Pos((line, col)) => (line, col),
            pest::error::LineColLocation::Span((line, col), _) => (line, col),
        };
        SchemataError::Parse {
            message: e.variant.message().to_string(),
            line: Some(line),
            col: Some(col),
        }
    })?;
    let document = pairs.next().ok_or_else(|| parse_error("empty document"))?;
    document
        .into_inner()
        .filter(|pair| pair.as_rule() != Rule::EOI)
        .map(edn)
        .collect()
}

fn edn(pair: Pair<Rule>) -> Result<Edn> {
    let text = pair.as_str();
    let value = match pair.as_rule() {
        Rule::map => {
            let mut items = pair.into_inner();
            let mut entries = Vec::new();
            while let Some(key) = items.next() {
                let value = items
                    .next()
                    .ok_or_else(|| parse_error("map with an odd number of forms"))?;
                entries.push((edn(key)?, edn(value)?));
            }
            Edn::Map(entries)
        }
        Rule::vector => Edn::Vector(pair.into_inner().map(edn).collect::<Result<_>>()?),
        Rule::tagged => {
            let mut inner = pair.into_inner();
            let tag = inner.next().map(|p| p.as_str().to_owned()).unwrap_or_default();
            let Some(Edn::String(literal)) = inner.next().map(edn).transpose()? else {
                return Err(parse_error(format!("tag #{} must be followed by a string", tag)));
            };
            Edn::Tagged(tag, literal)
        }
        Rule::keyword => Edn::Keyword(
            Keyword::new(text).ok_or_else(|| parse_error(format!("invalid keyword {}", text)))?,
        ),
        Rule::string => {
            let inner = pair.into_inner().next().map(|p| p.as_str()).unwrap_or_default();
            Edn::String(unescape(inner))
        }
        Rule::boolean => Edn::Boolean(text == "true"),
        Rule::nil => Edn::Nil,
        Rule::bigdec => Edn::BigDecimal(
            Decimal::from_str(text.trim_end_matches('M'))
                .ok_or_else(|| parse_error(format!("invalid big decimal {}", text)))?,
        ),
        Rule::bigint => Edn::BigInteger(
            BigInt::from_str(text.trim_end_matches('N').trim_start_matches('+'))
                .map_err(|_| parse_error(format!("invalid big integer {}", text)))?,
        ),
        Rule::double => {
            Edn::Double(f64::from_str(text).map_err(|_| parse_error(format!("invalid double {}", text)))?)
        }
        Rule::integer => Edn::Integer(
            i64::from_str(text).map_err(|_| parse_error(format!("integer {} out of range", text)))?,
        ),
        other => return Err(parse_error(format!("unexpected {:?}", other))),
    };
    Ok(value)
}

fn unescape(s: &str) -> String {
    let mut unescaped = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            unescaped.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => unescaped.push('\n'),
            Some('r') => unescaped.push('\r'),
            Some('t') => unescaped.push('\t'),
            Some(other) => unescaped.push(other),
            None => {}
        }
    }
    unescaped
}

// ------------- Interpretation -------------
fn scalar(edn: Edn) -> Result<Value> {
    let value = match edn {
        Edn::Boolean(b) => Value::Boolean(b),
        Edn::Integer(i) => Value::Integer(i),
        Edn::BigInteger(i) => Value::BigInteger(i),
        Edn::Double(d) => Value::from(d),
        Edn::BigDecimal(d) => Value::BigDecimal(d),
        Edn::String(s) => Value::String(s),
        Edn::Keyword(k) => Value::Keyword(k),
        Edn::Tagged(tag, literal) => tagged(&tag, &literal)?,
        Edn::Nil => return Err(parse_error("nil is not a value")),
        Edn::Vector(_) | Edn::Map(_) => return Err(parse_error("expected a scalar value")),
    };
    Ok(value)
}

fn tagged(tag: &str, literal: &str) -> Result<Value> {
    let invalid = || parse_error(format!("invalid #{} \"{}\"", tag, literal));
    let value = match tag {
        "inst" => Value::Timestamp(
            DateTime::parse_from_rfc3339(literal)
                .map_err(|_| invalid())?
                .with_timezone(&Utc),
        ),
        "uuid" => Value::Uuid(Uuid::parse_str(literal).map_err(|_| invalid())?),
        "uri" => Value::Uri(Uri::new(literal).ok_or_else(invalid)?),
        "bytes" => Value::Bytes(hex::decode(literal).map_err(|_| invalid())?),
        _ => return Err(parse_error(format!("unknown tag #{}", tag))),
    };
    Ok(value)
}

fn entity_ref(edn: Edn) -> Result<EntityRef> {
    match edn {
        Edn::Integer(id) if id >= 0 => Ok(EntityRef::Id(id as Thing)),
        Edn::String(tempid) => Ok(EntityRef::Temp(tempid)),
        Edn::Keyword(ident) => Ok(EntityRef::Ident(ident.as_str().to_owned())),
        Edn::Vector(items) => match <[Edn; 2]>::try_from(items) {
            Ok([Edn::Keyword(attribute), value]) => {
                Ok(EntityRef::Lookup(attribute.as_str().to_owned(), scalar(value)?))
            }
            _ => Err(SchemataError::InvalidTransaction(String::from(
                "a lookup ref is written [attribute value]",
            ))),
        },
        other => Err(SchemataError::InvalidTransaction(format!(
            "{:?} does not identify an entity",
            other
        ))),
    }
}

fn tx_value(edn: Edn) -> Result<TxValue> {
    match edn {
        Edn::Vector(items) => Ok(TxValue::Many(
            items.into_iter().map(tx_value).collect::<Result<_>>()?,
        )),
        Edn::Map(entries) => Ok(TxValue::Nested(entity_map(entries)?)),
        other => Ok(TxValue::Scalar(scalar(other)?)),
    }
}

fn attribute_name(edn: Edn) -> Result<String> {
    match edn {
        Edn::Keyword(attribute) => Ok(attribute.as_str().to_owned()),
        other => Err(SchemataError::InvalidTransaction(format!(
            "attribute must be a keyword, got {:?}",
            other
        ))),
    }
}

fn entity_map(entries: Vec<(Edn, Edn)>) -> Result<EntityMap> {
    let mut map = EntityMap::new();
    for (key, value) in entries {
        let attribute = attribute_name(key)?;
        if attribute == "db/id" {
            map = map.id(entity_ref(value)?);
        } else {
            map.attributes.push((attribute, tx_value(value)?));
        }
    }
    Ok(map)
}

fn form(edn: Edn) -> Result<TxOp> {
    let items = match edn {
        Edn::Map(entries) => return Ok(TxOp::Map(entity_map(entries)?)),
        Edn::Vector(items) => items,
        other => {
            return Err(SchemataError::InvalidTransaction(format!(
                "{:?} is neither an entity map nor an operation",
                other
            )));
        }
    };
    let mut items = items.into_iter();
    let operation = match items.next() {
        Some(Edn::Keyword(operation)) => operation,
        _ => {
            return Err(SchemataError::InvalidTransaction(String::from(
                "an operation starts with a keyword",
            )));
        }
    };
    let arguments: Vec<Edn> = items.collect();
    let arity = |expected: usize| {
        if arguments.len() == expected {
            Ok(())
        } else {
            Err(SchemataError::InvalidTransaction(format!(
                "{} takes {} arguments, got {}",
                operation,
                expected,
                arguments.len()
            )))
        }
    };
    match operation.as_str() {
        "db/add" | "db/retract" => {
            arity(3)?;
            let mut arguments = arguments.into_iter();
            let (Some(e), Some(a), Some(v)) = (arguments.next(), arguments.next(), arguments.next()) else {
                return Err(SchemataError::InvalidTransaction(format!("{} takes 3 arguments", operation)));
            };
            let (entity, attribute, value) = (entity_ref(e)?, attribute_name(a)?, tx_value(v)?);
            if operation.as_str() == "db/add" {
                Ok(TxOp::Add(entity, attribute, value))
            } else {
                Ok(TxOp::Retract(entity, attribute, value))
            }
        }
        "db/retractEntity" | "db.fn/retractEntity" => {
            arity(1)?;
            let entity = arguments
                .into_iter()
                .next()
                .ok_or_else(|| SchemataError::InvalidTransaction(format!("{} takes 1 argument", operation)))?;
            Ok(TxOp::RetractEntity(entity_ref(entity)?))
        }
        _ => Err(SchemataError::InvalidTransaction(format!("unknown operation {}", operation))),
    }
}

fn transaction(edn: Edn) -> Result<Vec<TxOp>> {
    match edn {
        Edn::Vector(forms) => forms.into_iter().map(form).collect(),
        other => Err(SchemataError::InvalidTransaction(format!(
            "a transaction is a vector of forms, got {:?}",
            other
        ))),
    }
}

/// Parses a single transaction.
pub fn parse(text: &str) -> Result<Vec<TxOp>> {
    let mut values = read(text)?;
    if values.len() != 1 {
        return Err(SchemataError::InvalidTransaction(format!(
            "expected one transaction, found {}",
            values.len()
        )));
    }
    let ops = transaction(values.remove(0))?;
    debug!(ops = ops.len(), "transaction parsed");
    Ok(ops)
}

/// Parses a script of consecutive transactions.
pub fn parse_script(text: &str) -> Result<Vec<Vec<TxOp>>> {
    read(text)?.into_iter().map(transaction).collect()
}

impl Database {
    /// Parses and transacts a single transaction.
    pub fn transact_str(&self, text: &str) -> Result<TxReport> {
        self.transact(parse(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_positions_follow_their_notation() {
        let ops = parse(
            r#"[[:db/add 42 :user/name "Jane"]
                [:db/add "jane" :user/name "Jane"]
                [:db/retract :role/guest :db/doc "old"]
                [:db/retractEntity [:user/email "jane@example.com"]]]"#,
        )
        .unwrap();
        assert_eq!(ops.len(), 4);
        assert_eq!(ops[0], TxOp::Add(EntityRef::Id(42), "user/name".into(), TxValue::from("Jane")));
        assert!(matches!(&ops[1], TxOp::Add(EntityRef::Temp(t), _, _) if t == "jane"));
        assert!(matches!(&ops[2], TxOp::Retract(EntityRef::Ident(i), _, _) if i == "role/guest"));
        assert!(matches!(&ops[3], TxOp::RetractEntity(EntityRef::Lookup(a, _)) if a == "user/email"));
    }

    #[test]
    fn maps_carry_nested_maps_and_lists() {
        let ops = parse(
            r#"[{:db/id "order" ; a comment
                 :order/lines [{:line/sku "A-1" :line/count 2}]
                 :order/total 12.50M}]"#,
        )
        .unwrap();
        let TxOp::Map(map) = &ops[0] else {
            panic!("expected an entity map");
        };
        assert_eq!(map.id, Some(EntityRef::temp("order")));
        assert!(matches!(&map.attributes[0].1, TxValue::Many(lines) if matches!(lines[0], TxValue::Nested(_))));
        assert!(matches!(&map.attributes[1].1, TxValue::Scalar(Value::BigDecimal(_))));
    }

    #[test]
    fn tagged_literals_become_typed_values() {
        let ops = parse(
            r#"[[:db/add 1 :a/at #inst "2024-01-02T03:04:05Z"]
                [:db/add 1 :a/id #uuid "67e55044-10b1-426f-9247-bb680e5fe0c8"]
                [:db/add 1 :a/bytes #bytes "cafe"]
                [:db/add 1 :a/big 123456789012345678901234567890N]]"#,
        )
        .unwrap();
        let values: Vec<&TxValue> = ops
            .iter()
            .map(|op| match op {
                TxOp::Add(_, _, v) => v,
                _ => panic!("expected :db/add"),
            })
            .collect();
        assert!(matches!(values[0], TxValue::Scalar(Value::Timestamp(_))));
        assert!(matches!(values[1], TxValue::Scalar(Value::Uuid(_))));
        assert_eq!(values[2], &TxValue::Scalar(Value::Bytes(vec![0xca, 0xfe])));
        assert!(matches!(values[3], TxValue::Scalar(Value::BigInteger(_))));
        for odd in [r#"#bytes "abc""#, r#"#bytes "zz""#] {
            let text = format!("[[:db/add 1 :a/bytes {}]]", odd);
            assert!(matches!(parse(&text), Err(SchemataError::Parse { .. })));
        }
    }

    #[test]
    fn syntax_errors_report_a_position() {
        match parse("[[:db/add 1 :a/b \"unterminated]]") {
            Err(SchemataError::Parse { line, col, .. }) => {
                assert_eq!(line, Some(1));
                assert!(col.is_some());
            }
            other => panic!("expected a parse error, got {:?}", other.map(|ops| ops.len())),
        }
    }

    #[test]
    fn scripts_hold_consecutive_transactions() {
        let script = parse_script("[[:db/add 1 :a/b 1]] [[:db/add 1 :a/b 2] [:db/add 1 :a/c 3]]").unwrap();
        assert_eq!(script.len(), 2);
        assert_eq!(script[1].len(), 2);
    }
}
