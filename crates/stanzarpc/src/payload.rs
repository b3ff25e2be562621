//! # Payloads
//!
//! Typed request and response bodies convert to and from the generic
//! [`Value`] tree, which is what actually goes on the wire.

use stanzapack::Map;
use stanzapack::Value;

use crate::error::Result;
use crate::error::RpcError;

/// A type that travels as a `Value`.
pub trait Payload: Sized {
    fn to_value(&self) -> Value;
    fn from_value(value: Value) -> Result<Self>;

    /// Encodes the payload as a standalone body.
    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.to_value().to_bytes()?)
    }

    /// Decodes a standalone body.
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::from_value(Value::from_bytes(bytes)?)
    }
}

impl Payload for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }

    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl Payload for bool {
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        value.as_bool().ok_or_else(|| mismatch("value", "bool", &value))
    }
}

impl Payload for String {
    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }

    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(mismatch("value", "string", &other)),
        }
    }
}

impl Payload for u64 {
    fn to_value(&self) -> Value {
        Value::UInt(*self)
    }

    fn from_value(value: Value) -> Result<Self> {
        value.as_u64().ok_or_else(|| mismatch("value", "uint", &value))
    }
}

pub(crate) fn mismatch(field: &str, expected: &'static str, found: &Value) -> RpcError {
    RpcError::TypeMismatch { field: field.to_string(), expected, found: found.kind() }
}

/// Field access for object-shaped payloads.
pub(crate) struct Fields {
    map: Map,
}

impl Fields {
    pub(crate) fn new(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self { map }),
            other => Err(mismatch("payload", "object", &other)),
        }
    }

    pub(crate) fn take(&mut self, key: &str) -> Result<Value> {
        self.map.remove(key).ok_or_else(|| RpcError::MissingField(key.to_string()))
    }

    pub(crate) fn take_opt(&mut self, key: &str) -> Option<Value> {
        match self.map.remove(key) {
            Some(Value::Null) | None => None,
            Some(value) => Some(value),
        }
    }

    pub(crate) fn string(&mut self, key: &str) -> Result<String> {
        match self.take(key)? {
            Value::String(s) => Ok(s),
            other => Err(mismatch(key, "string", &other)),
        }
    }

    pub(crate) fn opt_string(&mut self, key: &str) -> Result<Option<String>> {
        match self.take_opt(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(mismatch(key, "string", &other)),
        }
    }

    pub(crate) fn uint(&mut self, key: &str) -> Result<u64> {
        let value = self.take(key)?;
        value.as_u64().ok_or_else(|| mismatch(key, "uint", &value))
    }

    pub(crate) fn array(&mut self, key: &str) -> Result<Vec<Value>> {
        match self.take(key)? {
            Value::Array(items) => Ok(items),
            other => Err(mismatch(key, "array", &other)),
        }
    }
}
