//! Dynamic value model for stored records.
//!
//! Every field of a record is a [`Value`]: one of the core variants
//! (null, bool, int, float, text, bytes, list, map) or one of the five
//! registered semantic types (timestamp, duration, URI, big integer,
//! regex pattern). Maps preserve insertion order via [`Fields`].

mod bigint;
mod fields;
mod key;

pub use bigint::BigInt;
pub use fields::Fields;
pub use key::canonical_key;

use chrono::{DateTime, TimeZone, Utc};
use std::cmp::Ordering;

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(Fields),
    /// Milliseconds since the Unix epoch, UTC.
    Timestamp(i64),
    /// Milliseconds.
    Duration(i64),
    Uri(String),
    BigInt(BigInt),
    /// Regex source text; compiled lazily by the query layer.
    Pattern(String),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Timestamp(_) => "timestamp",
            Value::Duration(_) => "duration",
            Value::Uri(_) => "uri",
            Value::BigInt(_) => "bigint",
            Value::Pattern(_) => "pattern",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view: both `Int` and `Float` read as f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Uri(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Fields> {
        match self {
            Value::Map(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(millis) => Utc.timestamp_millis_opt(*millis).single(),
            _ => None,
        }
    }

    pub fn timestamp_from(dt: DateTime<Utc>) -> Value {
        Value::Timestamp(dt.timestamp_millis())
    }

    /// Compare two values of the same variant class. Cross-class
    /// comparisons yield `None` except Int/Float, which compare by
    /// magnitude.
    pub fn cmp_same_type(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Duration(a), Value::Duration(b)) => Some(a.cmp(b)),
            (Value::Uri(a), Value::Uri(b)) => Some(a.cmp(b)),
            (Value::BigInt(a), Value::BigInt(b)) => Some(a.cmp(b)),
            (Value::Pattern(a), Value::Pattern(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Equality under the same rules as [`Value::cmp_same_type`].
    pub fn eq_same_type(&self, other: &Value) -> Option<bool> {
        self.cmp_same_type(other).map(|ord| ord == Ordering::Equal)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cmp::Ordering::{Equal, Greater, Less};

    #[test]
    fn cmp_same_type_works() {
        assert_eq!(Value::Int(1).cmp_same_type(&Value::Int(2)), Some(Less));
        assert_eq!(Value::Int(1).cmp_same_type(&Value::Text("1".into())), None);
    }

    #[test]
    fn int_and_float_compare_by_magnitude() {
        assert_eq!(
            Value::Int(2).cmp_same_type(&Value::Float(1.5)),
            Some(Greater)
        );
        assert_eq!(Value::Float(2.0).cmp_same_type(&Value::Int(2)), Some(Equal));
    }

    #[test]
    fn truthiness_is_strict() {
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Int(1).as_bool(), None);
        assert_eq!(Value::Text("true".into()).as_bool(), None);
        assert_eq!(Value::Null.as_bool(), None);
    }

    #[test]
    fn numeric_view_covers_both_variants() {
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Float(3.5).as_f64(), Some(3.5));
        assert_eq!(Value::Text("3".into()).as_f64(), None);
    }

    #[test]
    fn timestamp_round_trip() {
        let dt = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let v = Value::timestamp_from(dt);
        assert_eq!(v.as_timestamp(), Some(dt));
    }

    #[test]
    fn serde_round_trip_stability() {
        let mut fields = Fields::new();
        fields.insert("z", Value::Int(1));
        fields.insert("a", Value::Bool(true));
        let vals = vec![
            Value::Int(-42),
            Value::Text("Ada".into()),
            Value::Bool(true),
            Value::Null,
            Value::Bytes(vec![0, 1, 2]),
            Value::List(vec![Value::Float(2.5)]),
            Value::Map(fields),
            Value::Timestamp(1_700_000_000_000),
            Value::Duration(86_400_000),
            Value::Uri("https://example.com".into()),
            Value::BigInt(BigInt::from_i64(-9_999)),
            Value::Pattern("^a.*z$".into()),
        ];

        let json = serde_json::to_string(&vals).unwrap();
        let back: Vec<Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(vals, back);
    }

    proptest! {
        #[test]
        fn order_is_antisymmetric(i in any::<i64>(), j in any::<i64>()) {
            let a = Value::Int(i);
            let b = Value::Int(j);
            let ord1 = a.cmp_same_type(&b);
            let ord2 = b.cmp_same_type(&a);
            match (ord1, ord2) {
                (Some(o1), Some(o2)) => prop_assert_eq!(o1, o2.reverse()),
                _ => prop_assert!(false, "int comparison must be total"),
            }
        }

        #[test]
        fn text_cmp_matches_std(a in ".*", b in ".*") {
            let va = Value::Text(a.clone());
            let vb = Value::Text(b.clone());
            prop_assert_eq!(va.cmp_same_type(&vb), Some(a.cmp(&b)));
        }
    }
}
