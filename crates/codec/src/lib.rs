//! Binary record codec.
//!
//! Self-describing, versioned, deterministic: every value is written as
//! a tag byte followed by a length-prefixed payload, maps in insertion
//! order. The record envelope carries the record id and its version
//! counter so a heap slot is decodable in isolation.
//!
//! Semantic types (timestamp, duration, uri, bigint, pattern) are
//! encoded as a shared tag plus the registered type name; decoding a
//! name missing from the [`TypeRegistry`] fails rather than guessing.

mod registry;

pub use registry::TypeRegistry;

use common::{DbError, DbResult};
use types::{BigInt, Fields, Value};

const ENVELOPE_MAGIC: u8 = 0xE1;
const CODEC_VERSION: u8 = 1;

const TAG_NULL: u8 = 0x00;
const TAG_FALSE: u8 = 0x01;
const TAG_TRUE: u8 = 0x02;
const TAG_INT: u8 = 0x03;
const TAG_FLOAT: u8 = 0x04;
const TAG_TEXT: u8 = 0x05;
const TAG_BYTES: u8 = 0x06;
const TAG_LIST: u8 = 0x07;
const TAG_MAP: u8 = 0x08;
const TAG_SEMANTIC: u8 = 0x10;

/// A decoded record: id, version counter, body.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub id: String,
    pub version: u64,
    pub body: Fields,
}

impl Record {
    pub fn new(id: impl Into<String>, version: u64, body: Fields) -> Self {
        Record {
            id: id.into(),
            version,
            body,
        }
    }
}

/// Encode a record into its on-disk byte form.
pub fn encode_record(record: &Record) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_record_len(record));
    out.push(ENVELOPE_MAGIC);
    out.push(CODEC_VERSION);
    write_str(&record.id, &mut out);
    out.extend_from_slice(&record.version.to_le_bytes());
    write_value(&Value::Map(record.body.clone()), &mut out);
    out
}

/// Exact size of [`encode_record`]'s output, computed without allocating.
pub fn encoded_record_len(record: &Record) -> usize {
    2 + str_len(&record.id) + 8 + map_len(&record.body) + 1
}

/// Decode a record, resolving semantic tags through `registry`.
pub fn decode_record(bytes: &[u8], registry: &TypeRegistry) -> DbResult<Record> {
    let mut reader = Reader::new(bytes, registry);
    let magic = reader.u8()?;
    if magic != ENVELOPE_MAGIC {
        return Err(DbError::Decoding(format!(
            "bad record magic 0x{magic:02x}"
        )));
    }
    let version_byte = reader.u8()?;
    if version_byte != CODEC_VERSION {
        return Err(DbError::Decoding(format!(
            "unsupported codec version {version_byte}"
        )));
    }
    let id = reader.string()?;
    let record_version = reader.u64()?;
    let body = match reader.value()? {
        Value::Map(fields) => fields,
        other => {
            return Err(DbError::Decoding(format!(
                "record body must be a map, found {}",
                other.type_name()
            )))
        }
    };
    reader.expect_end()?;
    Ok(Record {
        id,
        version: record_version,
        body,
    })
}

/// Read only the record id from encoded bytes, without touching the
/// body. Used when rebuilding the slot directory from a heap scan.
pub fn record_id_prefix(bytes: &[u8]) -> DbResult<String> {
    let registry = TypeRegistry::empty();
    let mut reader = Reader::new(bytes, &registry);
    let magic = reader.u8()?;
    if magic != ENVELOPE_MAGIC {
        return Err(DbError::Decoding(format!("bad record magic 0x{magic:02x}")));
    }
    let version = reader.u8()?;
    if version != CODEC_VERSION {
        return Err(DbError::Decoding(format!(
            "unsupported codec version {version}"
        )));
    }
    reader.string()
}

/// Read the record version counter without decoding the body.
pub fn record_version_prefix(bytes: &[u8]) -> DbResult<u64> {
    let registry = TypeRegistry::empty();
    let mut reader = Reader::new(bytes, &registry);
    reader.u8()?;
    reader.u8()?;
    reader.string()?;
    reader.u64()
}

/// Encode a bare value (used by index persistence and tests).
pub fn encode_value(value: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(value_len(value));
    write_value(value, &mut out);
    out
}

pub fn decode_value(bytes: &[u8], registry: &TypeRegistry) -> DbResult<Value> {
    let mut reader = Reader::new(bytes, registry);
    let value = reader.value()?;
    reader.expect_end()?;
    Ok(value)
}

// ---- encoding ----

fn write_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Bool(false) => out.push(TAG_FALSE),
        Value::Bool(true) => out.push(TAG_TRUE),
        Value::Int(i) => {
            out.push(TAG_INT);
            out.extend_from_slice(&i.to_le_bytes());
        }
        Value::Float(f) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&f.to_bits().to_le_bytes());
        }
        Value::Text(s) => {
            out.push(TAG_TEXT);
            write_str(s, out);
        }
        Value::Bytes(b) => {
            out.push(TAG_BYTES);
            write_len(b.len(), out);
            out.extend_from_slice(b);
        }
        Value::List(items) => {
            out.push(TAG_LIST);
            write_len(items.len(), out);
            for item in items {
                write_value(item, out);
            }
        }
        Value::Map(fields) => {
            out.push(TAG_MAP);
            write_len(fields.len(), out);
            for (k, v) in fields.iter() {
                write_str(k, out);
                write_value(v, out);
            }
        }
        Value::Timestamp(millis) => write_semantic(registry::TIMESTAMP, &millis.to_le_bytes(), out),
        Value::Duration(millis) => write_semantic(registry::DURATION, &millis.to_le_bytes(), out),
        Value::Uri(s) => write_semantic(registry::URI, s.as_bytes(), out),
        Value::BigInt(big) => {
            let mut payload = Vec::with_capacity(1 + big.magnitude().len());
            payload.push(u8::from(big.is_negative()));
            payload.extend_from_slice(big.magnitude());
            write_semantic(registry::BIGINT, &payload, out);
        }
        Value::Pattern(s) => write_semantic(registry::PATTERN, s.as_bytes(), out),
    }
}

fn write_semantic(name: &str, payload: &[u8], out: &mut Vec<u8>) {
    out.push(TAG_SEMANTIC);
    write_str(name, out);
    write_len(payload.len(), out);
    out.extend_from_slice(payload);
}

fn write_str(s: &str, out: &mut Vec<u8>) {
    write_len(s.len(), out);
    out.extend_from_slice(s.as_bytes());
}

fn write_len(len: usize, out: &mut Vec<u8>) {
    out.extend_from_slice(&(len as u32).to_le_bytes());
}

fn value_len(value: &Value) -> usize {
    1 + match value {
        Value::Null | Value::Bool(_) => 0,
        Value::Int(_) | Value::Float(_) => 8,
        Value::Text(s) => str_len(s),
        Value::Bytes(b) => 4 + b.len(),
        Value::List(items) => 4 + items.iter().map(value_len).sum::<usize>(),
        Value::Map(fields) => map_len(fields),
        Value::Timestamp(_) => semantic_len(registry::TIMESTAMP, 8),
        Value::Duration(_) => semantic_len(registry::DURATION, 8),
        Value::Uri(s) => semantic_len(registry::URI, s.len()),
        Value::BigInt(big) => semantic_len(registry::BIGINT, 1 + big.magnitude().len()),
        Value::Pattern(s) => semantic_len(registry::PATTERN, s.len()),
    }
}

fn map_len(fields: &Fields) -> usize {
    4 + fields
        .iter()
        .map(|(k, v)| str_len(k) + value_len(v))
        .sum::<usize>()
}

fn str_len(s: &str) -> usize {
    4 + s.len()
}

fn semantic_len(name: &str, payload: usize) -> usize {
    str_len(name) + 4 + payload
}

// ---- decoding ----

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    registry: &'a TypeRegistry,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8], registry: &'a TypeRegistry) -> Self {
        Reader {
            bytes,
            pos: 0,
            registry,
        }
    }

    fn take(&mut self, n: usize) -> DbResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| DbError::Decoding("truncated record".into()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> DbResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> DbResult<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> DbResult<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> DbResult<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn string(&mut self) -> DbResult<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| DbError::Decoding(format!("invalid utf-8 in record: {e}")))
    }

    fn value(&mut self) -> DbResult<Value> {
        let tag = self.u8()?;
        match tag {
            TAG_NULL => Ok(Value::Null),
            TAG_FALSE => Ok(Value::Bool(false)),
            TAG_TRUE => Ok(Value::Bool(true)),
            TAG_INT => Ok(Value::Int(self.i64()?)),
            TAG_FLOAT => Ok(Value::Float(f64::from_bits(self.u64()?))),
            TAG_TEXT => Ok(Value::Text(self.string()?)),
            TAG_BYTES => {
                let len = self.u32()? as usize;
                Ok(Value::Bytes(self.take(len)?.to_vec()))
            }
            TAG_LIST => {
                let count = self.u32()? as usize;
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    items.push(self.value()?);
                }
                Ok(Value::List(items))
            }
            TAG_MAP => {
                let count = self.u32()? as usize;
                let mut fields = Fields::with_capacity(count.min(1024));
                for _ in 0..count {
                    let key = self.string()?;
                    let value = self.value()?;
                    fields.insert(key, value);
                }
                Ok(Value::Map(fields))
            }
            TAG_SEMANTIC => self.semantic(),
            other => Err(DbError::Decoding(format!("unknown value tag 0x{other:02x}"))),
        }
    }

    fn semantic(&mut self) -> DbResult<Value> {
        let name = self.string()?;
        let len = self.u32()? as usize;
        let payload = self.take(len)?;
        if !self.registry.is_registered(&name) {
            return Err(DbError::Decoding(format!("unknown semantic type '{name}'")));
        }
        match name.as_str() {
            registry::TIMESTAMP => Ok(Value::Timestamp(read_i64(payload)?)),
            registry::DURATION => Ok(Value::Duration(read_i64(payload)?)),
            registry::URI => Ok(Value::Uri(read_utf8(payload)?)),
            registry::BIGINT => {
                let (&sign, magnitude) = payload
                    .split_first()
                    .ok_or_else(|| DbError::Decoding("empty bigint payload".into()))?;
                Ok(Value::BigInt(BigInt::from_sign_magnitude(
                    sign != 0,
                    magnitude,
                )))
            }
            registry::PATTERN => Ok(Value::Pattern(read_utf8(payload)?)),
            other => Err(DbError::Decoding(format!(
                "semantic type '{other}' has no decoder"
            ))),
        }
    }

    fn expect_end(&self) -> DbResult<()> {
        if self.pos == self.bytes.len() {
            Ok(())
        } else {
            Err(DbError::Decoding(format!(
                "{} trailing bytes after record",
                self.bytes.len() - self.pos
            )))
        }
    }
}

fn read_i64(payload: &[u8]) -> DbResult<i64> {
    let arr: [u8; 8] = payload
        .try_into()
        .map_err(|_| DbError::Decoding("semantic payload must be 8 bytes".into()))?;
    Ok(i64::from_le_bytes(arr))
}

fn read_utf8(payload: &[u8]) -> DbResult<String> {
    String::from_utf8(payload.to_vec())
        .map_err(|e| DbError::Decoding(format!("invalid utf-8 in semantic payload: {e}")))
}
