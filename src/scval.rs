//! Rendering of Soroban contract values.
//!
//! Two forms are produced for every [`ScVal`]: a canonical string used for
//! topics and map keys, and a JSON tree used for event payloads. Both are
//! total. Variants outside the decoded set are re-encoded to XDR and
//! rendered as lowercase hex, identically in both forms.

use serde_json::{Map, Value};
use stellar_xdr::curr::{Limits, ScVal, WriteXdr};

/// Canonical string form of `val`.
pub fn scval_to_string(val: &ScVal) -> String {
    match val {
        ScVal::Bool(b) => b.to_string(),
        ScVal::I32(n) => n.to_string(),
        ScVal::I64(n) => n.to_string(),
        ScVal::U32(n) => n.to_string(),
        ScVal::U64(n) => n.to_string(),
        ScVal::Symbol(sym) => utf8_lossy(sym.0.as_slice()),
        ScVal::String(s) => utf8_lossy(s.0.as_slice()),
        ScVal::Bytes(bytes) => hex::encode(bytes.0.as_slice()),
        other => xdr_hex(other),
    }
}

/// JSON form of `val`. Vectors and maps are decoded recursively, map keys
/// use the canonical string form of the key.
pub fn scval_to_json(val: &ScVal) -> Value {
    match val {
        ScVal::Bool(b) => Value::Bool(*b),
        ScVal::I32(n) => Value::from(*n),
        ScVal::I64(n) => Value::from(*n),
        ScVal::U32(n) => Value::from(*n),
        ScVal::U64(n) => Value::from(*n),
        ScVal::Symbol(sym) => Value::String(utf8_lossy(sym.0.as_slice())),
        ScVal::String(s) => Value::String(utf8_lossy(s.0.as_slice())),
        ScVal::Bytes(bytes) => Value::String(hex::encode(bytes.0.as_slice())),
        ScVal::Vec(Some(vec)) => Value::Array(vec.0.iter().map(scval_to_json).collect()),
        ScVal::Map(Some(map)) => {
            let mut object = Map::with_capacity(map.0.len());
            for entry in map.0.iter() {
                object.insert(scval_to_string(&entry.key), scval_to_json(&entry.val));
            }
            Value::Object(object)
        }
        other => Value::String(xdr_hex(other)),
    }
}

fn utf8_lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn xdr_hex(val: &ScVal) -> String {
    match val.to_xdr(Limits::none()) {
        Ok(bytes) => hex::encode(bytes),
        Err(err) => {
            log::warn!("cannot re-encode contract value {}: {}", val.name(), err);
            String::new()
        }
    }
}
