//! Order-preserving key encoding for ordered indexes.
//!
//! `canonical_key(a) < canonical_key(b)` (bytewise) iff `a` sorts
//! before `b` under the index ordering: null first, then booleans
//! (false < true), numbers by magnitude, text lexicographic, bytes,
//! lists, maps, then the semantic types. Int and Float share the
//! number class; ties on magnitude fall back to a variant
//! discriminator so distinct values never encode identically.

use crate::{BigInt, Fields, Value};

const CLASS_NULL: u8 = 0x00;
const CLASS_BOOL: u8 = 0x01;
const CLASS_NUMBER: u8 = 0x02;
const CLASS_TEXT: u8 = 0x03;
const CLASS_BYTES: u8 = 0x04;
const CLASS_LIST: u8 = 0x05;
const CLASS_MAP: u8 = 0x06;
const CLASS_TIMESTAMP: u8 = 0x07;
const CLASS_DURATION: u8 = 0x08;
const CLASS_URI: u8 = 0x09;
const CLASS_BIGINT: u8 = 0x0a;
const CLASS_PATTERN: u8 = 0x0b;

pub fn canonical_key(value: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    encode_into(value, &mut out);
    out
}

fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(CLASS_NULL),
        Value::Bool(b) => {
            out.push(CLASS_BOOL);
            out.push(u8::from(*b));
        }
        Value::Int(i) => {
            out.push(CLASS_NUMBER);
            out.extend_from_slice(&ordered_f64_bits(*i as f64));
            // Exact tiebreak: floats sort before ints of equal magnitude.
            out.push(1);
            out.extend_from_slice(&ordered_i64_bits(*i));
        }
        Value::Float(f) => {
            out.push(CLASS_NUMBER);
            out.extend_from_slice(&ordered_f64_bits(*f));
            out.push(0);
        }
        Value::Text(s) => {
            out.push(CLASS_TEXT);
            encode_terminated(s.as_bytes(), out);
        }
        Value::Bytes(b) => {
            out.push(CLASS_BYTES);
            encode_terminated(b, out);
        }
        Value::List(items) => {
            out.push(CLASS_LIST);
            for item in items {
                out.push(1);
                encode_into(item, out);
            }
            out.push(0);
        }
        Value::Map(fields) => {
            out.push(CLASS_MAP);
            encode_map(fields, out);
        }
        Value::Timestamp(millis) => {
            out.push(CLASS_TIMESTAMP);
            out.extend_from_slice(&ordered_i64_bits(*millis));
        }
        Value::Duration(millis) => {
            out.push(CLASS_DURATION);
            out.extend_from_slice(&ordered_i64_bits(*millis));
        }
        Value::Uri(s) => {
            out.push(CLASS_URI);
            encode_terminated(s.as_bytes(), out);
        }
        Value::BigInt(big) => {
            out.push(CLASS_BIGINT);
            encode_bigint(big, out);
        }
        Value::Pattern(s) => {
            out.push(CLASS_PATTERN);
            encode_terminated(s.as_bytes(), out);
        }
    }
}

/// Map bits so that the unsigned byte order of the result matches the
/// numeric order of the input, NaN sorting last.
fn ordered_f64_bits(f: f64) -> [u8; 8] {
    let f = if f == 0.0 { 0.0 } else { f };
    let bits = f.to_bits();
    let flipped = if bits & (1 << 63) != 0 {
        !bits
    } else {
        bits | (1 << 63)
    };
    flipped.to_be_bytes()
}

fn ordered_i64_bits(i: i64) -> [u8; 8] {
    ((i as u64) ^ (1 << 63)).to_be_bytes()
}

/// Escape 0x00 as 0x00 0xFF and terminate with 0x00 0x00 so that a
/// shorter prefix always sorts before any extension of it.
fn encode_terminated(bytes: &[u8], out: &mut Vec<u8>) {
    for &b in bytes {
        out.push(b);
        if b == 0 {
            out.push(0xff);
        }
    }
    out.push(0);
    out.push(0);
}

fn encode_map(fields: &Fields, out: &mut Vec<u8>) {
    for (k, v) in fields.iter() {
        out.push(1);
        encode_terminated(k.as_bytes(), out);
        encode_into(v, out);
    }
    out.push(0);
}

fn encode_bigint(big: &BigInt, out: &mut Vec<u8>) {
    let mag = big.magnitude();
    if big.is_negative() {
        // Longer magnitudes are more negative; invert both length and bytes.
        out.push(0);
        out.extend_from_slice(&(!(mag.len() as u32)).to_be_bytes());
        for &b in mag {
            out.push(!b);
        }
    } else {
        out.push(1);
        out.extend_from_slice(&(mag.len() as u32).to_be_bytes());
        out.extend_from_slice(mag);
    }
}
