//! The document model and the typed entity bridge.

use common::{DbError, DbResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use types::{Fields, Value};

/// One record as the collection layer sees it: optional id, version
/// counter, and the field map. The raw [`Value`] variants stay behind
/// typed accessors.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Document {
    id: Option<String>,
    version: u64,
    body: Fields,
}

impl Document {
    pub fn new() -> Self {
        Document::default()
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Document {
            id: Some(id.into()),
            version: 0,
            body: Fields::new(),
        }
    }

    pub(crate) fn from_parts(id: String, version: u64, body: Fields) -> Self {
        Document {
            id: Some(id),
            version,
            body,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = Some(id.into());
    }

    /// Version counter observed when this document was read; used as
    /// the expected version for optimistic updates. Zero means "no
    /// expectation".
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn set_expected_version(&mut self, version: u64) {
        self.version = version;
    }

    pub fn body(&self) -> &Fields {
        &self.body
    }

    pub fn into_body(self) -> Fields {
        self.body
    }

    /// Builder-style field assignment.
    pub fn set(mut self, field: impl Into<String>, value: Value) -> Self {
        self.body.insert(field, value);
        self
    }

    pub fn insert_field(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.body.insert(field, value)
    }

    pub fn remove_field(&mut self, field: &str) -> Option<Value> {
        self.body.remove(field)
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        self.body.get_path(path)
    }

    // Typed accessors; a present field of the wrong type is an error,
    // a missing field is `NotFound`.

    pub fn get_str(&self, path: &str) -> DbResult<&str> {
        self.typed(path, Value::as_str, "text")
    }

    pub fn get_i64(&self, path: &str) -> DbResult<i64> {
        self.typed(path, Value::as_i64, "int")
    }

    pub fn get_f64(&self, path: &str) -> DbResult<f64> {
        self.typed(path, Value::as_f64, "number")
    }

    pub fn get_bool(&self, path: &str) -> DbResult<bool> {
        self.typed(path, Value::as_bool, "bool")
    }

    pub fn get_bytes(&self, path: &str) -> DbResult<&[u8]> {
        self.typed(path, Value::as_bytes, "bytes")
    }

    fn typed<'a, T>(
        &'a self,
        path: &str,
        extract: impl Fn(&'a Value) -> Option<T>,
        expected: &str,
    ) -> DbResult<T> {
        let value = self
            .body
            .get_path(path)
            .ok_or_else(|| DbError::NotFound(format!("field '{path}'")))?;
        extract(value).ok_or_else(|| {
            DbError::InvalidArgument(format!(
                "field '{path}' is {}, expected {expected}",
                value.type_name()
            ))
        })
    }
}

impl From<Fields> for Document {
    fn from(body: Fields) -> Self {
        Document {
            id: None,
            version: 0,
            body,
        }
    }
}

/// Typed records: anything serde-serializable with an id slot.
///
/// The bridge goes through JSON values, so plain structs map to the
/// core value variants; use [`Document`] directly when the semantic
/// types (timestamps, big integers, ...) must round-trip.
pub trait Entity: Serialize + DeserializeOwned {
    fn entity_id(&self) -> Option<String>;
    fn set_entity_id(&mut self, id: &str);
}

pub(crate) fn entity_to_body<T: Serialize>(entity: &T) -> DbResult<Fields> {
    let json = serde_json::to_value(entity)
        .map_err(|e| DbError::Encoding(format!("entity serialize failed: {e}")))?;
    match json_to_value(json) {
        Value::Map(fields) => Ok(fields),
        other => Err(DbError::Encoding(format!(
            "entity must serialize to a map, got {}",
            other.type_name()
        ))),
    }
}

pub(crate) fn entity_from_body<T: DeserializeOwned>(body: &Fields) -> DbResult<T> {
    let json = value_to_json(&Value::Map(body.clone()));
    serde_json::from_value(json)
        .map_err(|e| DbError::Decoding(format!("entity deserialize failed: {e}")))
}

fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::Text(s),
        serde_json::Value::Array(items) => {
            Value::List(items.into_iter().map(json_to_value).collect())
        }
        serde_json::Value::Object(map) => {
            let mut fields = Fields::with_capacity(map.len());
            for (k, v) in map {
                fields.insert(k, json_to_value(v));
            }
            Value::Map(fields)
        }
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(f) => serde_json::Value::from(*f),
        Value::Text(s) | Value::Uri(s) | Value::Pattern(s) => {
            serde_json::Value::String(s.clone())
        }
        Value::Bytes(b) => serde_json::Value::Array(
            b.iter().map(|&byte| serde_json::Value::from(byte)).collect(),
        ),
        Value::List(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Map(fields) => {
            let mut map = serde_json::Map::with_capacity(fields.len());
            for (k, v) in fields.iter() {
                map.insert(k.to_string(), value_to_json(v));
            }
            serde_json::Value::Object(map)
        }
        Value::Timestamp(millis) | Value::Duration(millis) => serde_json::Value::from(*millis),
        Value::BigInt(big) => serde_json::Value::from(big.to_i64().unwrap_or_default()),
    }
}
