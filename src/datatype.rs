// used for timestamps in the database
use chrono::{DateTime, SecondsFormat, Utc};
// used for decimal numbers
use bigdecimal::BigDecimal;
// used for integers of arbitrary size
use num_bigint::BigInt;
// used for uuid values
use uuid::Uuid;
// so that keyword and uri validation is compiled once
use lazy_static::lazy_static;
use regex::Regex;

// used when parsing a string to a value
use std::str::FromStr;
// used to print out readable forms of a data type
use std::fmt;
// used to indicate that data types need to be hashable
use std::hash::{Hash, Hasher};
// used to expose the wrapped values
use std::ops;

use crate::construct::Thing;

lazy_static! {
    static ref KEYWORD: Regex =
        Regex::new(r##"^[^\s/:\[\]{}()"#,;]+(/[^\s/:\[\]{}()"#,;]+)?$"##).unwrap();
    static ref URI: Regex = Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:\S*$").unwrap();
}

// ------------- Keyword -------------
/// A symbolic, optionally namespaced name such as `user/email`.
/// Printed with a leading colon, the way it is written in transaction data.
#[derive(Eq, PartialEq, Hash, PartialOrd, Ord, Clone, Debug)]
pub struct Keyword(String);

impl Keyword {
    pub fn new(s: &str) -> Option<Keyword> {
        let s = s.strip_prefix(':').unwrap_or(s);
        if KEYWORD.is_match(s) {
            Some(Keyword(s.to_owned()))
        } else {
            None
        }
    }
    // for idents known to be well formed
    pub(crate) fn unchecked(s: &str) -> Keyword {
        Keyword(s.to_owned())
    }
    pub fn namespace(&self) -> Option<&str> {
        self.0.split_once('/').map(|(ns, _)| ns)
    }
    pub fn name(&self) -> &str {
        match self.0.split_once('/') {
            Some((_, name)) => name,
            None => &self.0,
        }
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl FromStr for Keyword {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Keyword::new(s).ok_or_else(|| format!("'{}' is not a valid keyword", s))
    }
}
impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, ":{}", self.0)
    }
}

// ------------- Uri -------------
#[derive(Eq, PartialEq, Hash, PartialOrd, Ord, Clone, Debug)]
pub struct Uri(String);

impl Uri {
    pub fn new(s: &str) -> Option<Uri> {
        if URI.is_match(s) {
            Some(Uri(s.to_owned()))
        } else {
            None
        }
    }
    pub fn scheme(&self) -> &str {
        self.0.split_once(':').map(|(scheme, _)| scheme).unwrap_or_default()
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ------------- Floating point -------------
// Floats take part in hashed indexes, so equality is defined on the bit
// pattern after folding -0.0 into 0.0 and every NaN into one NaN.
#[derive(Clone, Copy, Debug)]
pub struct Float(pub f32);

impl Float {
    fn canonical_bits(&self) -> u32 {
        if self.0.is_nan() {
            f32::NAN.to_bits()
        } else if self.0 == 0.0 {
            0
        } else {
            self.0.to_bits()
        }
    }
}
impl PartialEq for Float {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_bits() == other.canonical_bits()
    }
}
impl Eq for Float {}
impl Hash for Float {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical_bits().hash(state);
    }
}
impl fmt::Display for Float {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Double(pub f64);

impl Double {
    fn canonical_bits(&self) -> u64 {
        if self.0.is_nan() {
            f64::NAN.to_bits()
        } else if self.0 == 0.0 {
            0
        } else {
            self.0.to_bits()
        }
    }
}
impl PartialEq for Double {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_bits() == other.canonical_bits()
    }
}
impl Eq for Double {}
impl Hash for Double {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical_bits().hash(state);
    }
}
impl fmt::Display for Double {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

// ------------- Decimal -------------
#[derive(Eq, PartialEq, Hash, PartialOrd, Ord, Clone, Debug)]
pub struct Decimal(BigDecimal);

impl Decimal {
    pub fn from_str(s: &str) -> Option<Decimal> {
        match BigDecimal::from_str(s) {
            Ok(decimal) => Some(Decimal(decimal)),
            _ => None,
        }
    }
}
impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl ops::Deref for Decimal {
    type Target = BigDecimal;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
impl From<BigDecimal> for Decimal {
    fn from(d: BigDecimal) -> Self {
        Decimal(d)
    }
}

// ------------- Value Types -------------
/// The fixed set of value types an attribute can declare.
#[derive(Eq, PartialEq, Hash, PartialOrd, Ord, Clone, Copy, Debug)]
pub enum ValueType {
    Keyword,
    String,
    Integer,
    Boolean,
    BigInteger,
    Float,
    Double,
    BigDecimal,
    Timestamp,
    Reference,
    Uuid,
    Uri,
    Bytes,
}

impl ValueType {
    pub const ALL: [ValueType; 13] = [
        ValueType::Keyword,
        ValueType::String,
        ValueType::Integer,
        ValueType::Boolean,
        ValueType::BigInteger,
        ValueType::Float,
        ValueType::Double,
        ValueType::BigDecimal,
        ValueType::Timestamp,
        ValueType::Reference,
        ValueType::Uuid,
        ValueType::Uri,
        ValueType::Bytes,
    ];
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::Keyword => "keyword",
            ValueType::String => "string",
            ValueType::Integer => "integer",
            ValueType::Boolean => "boolean",
            ValueType::BigInteger => "big-integer",
            ValueType::Float => "float",
            ValueType::Double => "double",
            ValueType::BigDecimal => "big-decimal",
            ValueType::Timestamp => "timestamp",
            ValueType::Reference => "reference",
            ValueType::Uuid => "uuid",
            ValueType::Uri => "uri",
            ValueType::Bytes => "byte-sequence",
        }
    }
    /// The ident of the enumeration entity standing for this type, e.g. `:db.type/string`.
    pub fn ident(&self) -> Keyword {
        Keyword::unchecked(&format!("db.type/{}", self.name()))
    }
    pub fn from_ident(ident: &Keyword) -> Option<ValueType> {
        if ident.namespace() != Some("db.type") {
            return None;
        }
        let value_type = match ident.name() {
            "keyword" => ValueType::Keyword,
            "string" => ValueType::String,
            "integer" | "long" => ValueType::Integer,
            "boolean" => ValueType::Boolean,
            "big-integer" | "bigint" => ValueType::BigInteger,
            "float" => ValueType::Float,
            "double" => ValueType::Double,
            "big-decimal" | "bigdec" => ValueType::BigDecimal,
            "timestamp" | "instant" => ValueType::Timestamp,
            "reference" | "ref" => ValueType::Reference,
            "uuid" => ValueType::Uuid,
            "uri" => ValueType::Uri,
            "byte-sequence" | "bytes" => ValueType::Bytes,
            _ => return None,
        };
        Some(value_type)
    }
}
impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ------------- Values -------------
#[derive(Eq, PartialEq, Hash, Clone, Debug)]
pub enum Value {
    Keyword(Keyword),
    String(String),
    Integer(i64),
    Boolean(bool),
    BigInteger(BigInt),
    Float(Float),
    Double(Double),
    BigDecimal(Decimal),
    Timestamp(DateTime<Utc>),
    Ref(Thing),
    Uuid(Uuid),
    Uri(Uri),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Keyword(_) => ValueType::Keyword,
            Value::String(_) => ValueType::String,
            Value::Integer(_) => ValueType::Integer,
            Value::Boolean(_) => ValueType::Boolean,
            Value::BigInteger(_) => ValueType::BigInteger,
            Value::Float(_) => ValueType::Float,
            Value::Double(_) => ValueType::Double,
            Value::BigDecimal(_) => ValueType::BigDecimal,
            Value::Timestamp(_) => ValueType::Timestamp,
            Value::Ref(_) => ValueType::Reference,
            Value::Uuid(_) => ValueType::Uuid,
            Value::Uri(_) => ValueType::Uri,
            Value::Bytes(_) => ValueType::Bytes,
        }
    }
    pub fn as_ref(&self) -> Option<Thing> {
        match self {
            Value::Ref(thing) => Some(*thing),
            _ => None,
        }
    }
    pub fn as_keyword(&self) -> Option<&Keyword> {
        match self {
            Value::Keyword(keyword) => Some(keyword),
            _ => None,
        }
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }
    pub fn as_timestamp(&self) -> Option<&DateTime<Utc>> {
        match self {
            Value::Timestamp(t) => Some(t),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Keyword(k) => write!(f, "{}", k),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::BigInteger(i) => write!(f, "{}N", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Double(x) => write!(f, "{}", x),
            Value::BigDecimal(d) => write!(f, "{}M", d),
            Value::Timestamp(t) => {
                write!(f, "#inst \"{}\"", t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Value::Ref(thing) => write!(f, "{}", thing),
            Value::Uuid(u) => write!(f, "#uuid \"{}\"", u),
            Value::Uri(u) => write!(f, "#uri \"{}\"", u),
            Value::Bytes(b) => write!(f, "#bytes \"{}\"", hex::encode(b)),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}
impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}
impl From<f32> for Value {
    fn from(x: f32) -> Self {
        Value::Float(Float(x))
    }
}
impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Double(Double(x))
    }
}
impl From<BigInt> for Value {
    fn from(i: BigInt) -> Self {
        Value::BigInteger(i)
    }
}
impl From<Decimal> for Value {
    fn from(d: Decimal) -> Self {
        Value::BigDecimal(d)
    }
}
impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Value::Timestamp(t)
    }
}
impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Value::Uuid(u)
    }
}
impl From<Uri> for Value {
    fn from(u: Uri) -> Self {
        Value::Uri(u)
    }
}
impl From<Keyword> for Value {
    fn from(k: Keyword) -> Self {
        Value::Keyword(k)
    }
}
impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}
