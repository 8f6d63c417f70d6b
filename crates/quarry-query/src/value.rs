use std::cmp::Ordering;
use std::fmt;

use bson::Bson;
use serde::{Deserialize, Serialize, Serializer};

/// A scalar operand of a criterion.
///
/// `Int` and `Float` are both numbers and compare exactly by magnitude, so
/// `Int(2) == Float(2.0)`, and both serialize as `{"int": 2}`. Values of
/// different kinds never compare equal; ordering across kinds is only used
/// to keep sets deterministic.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Milliseconds since the Unix epoch.
    Date(i64),
}

/// The comparable element type of a value. `Null` has no kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Bool,
    Number,
    String,
    Date,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Bool => write!(f, "bool"),
            ValueKind::Number => write!(f, "number"),
            ValueKind::String => write!(f, "string"),
            ValueKind::Date => write!(f, "date"),
        }
    }
}

impl Value {
    pub fn date(millis: i64) -> Self {
        Value::Date(millis)
    }

    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(ValueKind::Bool),
            Value::Int(_) | Value::Float(_) => Some(ValueKind::Number),
            Value::String(_) => Some(ValueKind::String),
            Value::Date(_) => Some(ValueKind::Date),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Convert a scalar BSON value. Documents, arrays and the exotic BSON
    /// types have no `Value` form.
    pub fn from_bson(bson: &Bson) -> Option<Value> {
        match bson {
            Bson::Null | Bson::Undefined => Some(Value::Null),
            Bson::Boolean(b) => Some(Value::Bool(*b)),
            Bson::Int32(i) => Some(Value::Int(i64::from(*i))),
            Bson::Int64(i) => Some(Value::Int(*i)),
            Bson::Double(f) => Some(Value::Float(*f)),
            Bson::String(s) => Some(Value::String(s.clone())),
            Bson::DateTime(dt) => Some(Value::Date(dt.timestamp_millis())),
            _ => None,
        }
    }

    pub fn to_bson(&self) -> Bson {
        match self {
            Value::Null => Bson::Null,
            Value::Bool(b) => Bson::Boolean(*b),
            Value::Int(i) => Bson::Int64(*i),
            Value::Float(f) => Bson::Double(*f),
            Value::String(s) => Bson::String(s.clone()),
            Value::Date(ms) => Bson::DateTime(bson::DateTime::from_millis(*ms)),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::String(_) => 3,
            Value::Date(_) => 4,
        }
    }
}

/// 2^63, the first float above `i64::MAX`.
const I64_LIMIT: f64 = 9_223_372_036_854_775_808.0;

/// `f` as an `i64` when it is integral and in range.
fn exact_int(f: f64) -> Option<i64> {
    (f.fract() == 0.0 && (-I64_LIMIT..I64_LIMIT).contains(&f)).then_some(f as i64)
}

/// NaN sorts above every number and equals itself; `-0.0 == 0.0`.
fn cmp_floats(x: f64, y: f64) -> Ordering {
    match (x.is_nan(), y.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) if x < y => Ordering::Less,
        (false, false) if x > y => Ordering::Greater,
        (false, false) => Ordering::Equal,
    }
}

fn cmp_int_float(i: i64, f: f64) -> Ordering {
    if f.is_nan() || f >= I64_LIMIT {
        return Ordering::Less;
    }
    if f < -I64_LIMIT {
        return Ordering::Greater;
    }
    let whole = f.trunc();
    i.cmp(&(whole as i64)).then_with(|| cmp_floats(whole, f))
}

fn cmp_numbers(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => cmp_floats(*x, *y),
        (Value::Int(x), Value::Float(y)) => cmp_int_float(*x, *y),
        (Value::Float(x), Value::Int(y)) => cmp_int_float(*y, *x).reverse(),
        _ => unreachable!("cmp_numbers called with non-numeric values"),
    }
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum Encoded<'a> {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(&'a str),
    Date(i64),
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let encoded = match self {
            Value::Null => Encoded::Null,
            Value::Bool(b) => Encoded::Bool(*b),
            Value::Int(i) => Encoded::Int(*i),
            Value::Float(f) => exact_int(*f).map_or(Encoded::Float(*f), Encoded::Int),
            Value::String(s) => Encoded::String(s),
            Value::Date(ms) => Encoded::Date(*ms),
        };
        encoded.serialize(serializer)
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (a, b) if a.rank() == 2 && b.rank() == 2 => cmp_numbers(a, b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Date(ms) => write!(f, "date({ms})"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<bson::DateTime> for Value {
    fn from(v: bson::DateTime) -> Self {
        Value::Date(v.timestamp_millis())
    }
}
