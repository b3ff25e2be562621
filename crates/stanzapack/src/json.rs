//! # JSON Bridge
//!
//! Converts between [`Value`] and JSON text. Binary values have no JSON
//! counterpart; they are written as `{"bytes": [..], "subtype": n|null}`,
//! the same shape other JSON libraries use when dumping binary payloads.
//! Reading JSON never produces a `Value::Binary`; consumers that expect a
//! dumped binary recognise the object shape themselves.

use serde_json::Number;

use crate::Binary;
use crate::Error;
use crate::Map;
use crate::Result;
use crate::Value;

impl Value {
    /// Parses JSON text into a value tree, keeping object key order.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let json: serde_json::Value = serde_json::from_str(text).map_err(|e| Error::Json(e.to_string()))?;
        Ok(Self::from(json))
    }

    /// Serializes the value tree as compact JSON text.
    pub fn to_json_string(&self) -> String {
        serde_json::Value::from(self.clone()).to_string()
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => number_to_value(&n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(obj) => {
                Value::Object(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

fn number_to_value(n: &Number) -> Value {
    if let Some(u) = n.as_u64() {
        Value::UInt(u)
    } else if let Some(i) = n.as_i64() {
        Value::Int(i)
    } else {
        Value::Float(n.as_f64().unwrap_or(f64::NAN))
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::Number(i.into()),
            Value::UInt(u) => serde_json::Value::Number(u.into()),
            // Non-finite floats have no JSON spelling.
            Value::Float(f) => Number::from_f64(f).map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::String(s) => serde_json::Value::String(s),
            Value::Array(items) => serde_json::Value::Array(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                serde_json::Value::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
            Value::Binary(bin) => dumped_binary(bin),
        }
    }
}

fn dumped_binary(bin: Binary) -> serde_json::Value {
    let mut obj = serde_json::Map::new();
    let bytes = bin.bytes.into_iter().map(|b| serde_json::Value::Number(b.into())).collect();
    obj.insert("bytes".to_string(), serde_json::Value::Array(bytes));
    let subtype = bin.subtype.map_or(serde_json::Value::Null, |s| serde_json::Value::Number(s.into()));
    obj.insert("subtype".to_string(), subtype);
    serde_json::Value::Object(obj)
}

/// Reads back a binary payload from its dumped JSON object shape.
///
/// Returns `None` unless `value` is an object with a `bytes` array of values
/// below 256 and an unsigned (or null) `subtype`.
pub fn undump_binary(value: &Value) -> Option<Binary> {
    let map: &Map = value.as_object()?;
    let bytes = map.get("bytes")?.as_array()?;
    let subtype = match map.get("subtype")? {
        Value::Null => None,
        Value::UInt(s) => Some(*s),
        _ => return None,
    };
    let bytes = bytes
        .iter()
        .map(|b| match b {
            Value::UInt(u) => u8::try_from(*u).ok(),
            _ => None,
        })
        .collect::<Option<Vec<u8>>>()?;
    Some(Binary { subtype, bytes })
}
