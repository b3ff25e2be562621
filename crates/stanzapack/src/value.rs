//! # Value Tree
//!
//! The JSON-like tagged tree used uniformly for arguments, return values and
//! configuration. Objects keep their insertion order so that documents
//! round-trip in the order they were written.

use crate::Decoder;
use crate::Encoder;
use crate::Error;
use crate::Result;
use crate::Tag;

/// Maximum nesting accepted by [`Value::decode`].
pub const MAX_DEPTH: usize = 128;

/// A binary payload with an optional subtype marker.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Binary {
    pub subtype: Option<u64>,
    pub bytes: Vec<u8>,
}

impl Binary {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { subtype: None, bytes }
    }

    pub fn with_subtype(subtype: u64, bytes: Vec<u8>) -> Self {
        Self { subtype: Some(subtype), bytes }
    }
}

/// An insertion-ordered string-keyed map.
///
/// Lookups are linear; objects exchanged here are small.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Map {
    entries: Vec<(String, Value)>,
}

impl Map {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.entries.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Inserts a value, replacing (in place) any previous value under the same key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        match self.get_mut(&key) {
            Some(slot) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

impl IntoIterator for Map {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Map {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Map::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// A structured value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Object(Map),
    Binary(Binary),
}

impl Value {
    pub fn object() -> Self {
        Value::Object(Map::new())
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

    /// Returns the value as a signed integer when it fits.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::UInt(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    /// Returns the value as an unsigned integer when it fits.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(u) => Some(*u),
            Value::Int(i) => u64::try_from(*i).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            Value::UInt(u) => Some(*u as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Map> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&Binary> {
        match self {
            Value::Binary(bin) => Some(bin),
            _ => None,
        }
    }

    /// Looks up a key when the value is an object.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// A short name for the kind of value, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Binary(_) => "binary",
        }
    }

    /// Writes this value into the encoder.
    pub fn encode(&self, enc: &mut Encoder) -> Result<()> {
        match self {
            Value::Null => enc.null(),
            Value::Bool(b) => enc.bool(*b),
            Value::Int(i) => enc.int(*i),
            Value::UInt(u) => enc.uint(*u),
            Value::Float(f) => enc.float(*f),
            Value::String(s) => enc.str(s),
            Value::Binary(bin) => enc.binary(bin.subtype, &bin.bytes),
            Value::Array(items) => {
                enc.array_begin()?;
                for item in items {
                    item.encode(enc)?;
                }
                enc.array_end()
            }
            Value::Object(map) => {
                enc.object_begin()?;
                for (key, item) in map.iter() {
                    enc.variant_begin(key)?;
                    item.encode(enc)?;
                    enc.variant_end()?;
                }
                enc.object_end()
            }
        }
    }

    /// Reads one value from the decoder.
    pub fn decode(dec: &mut Decoder) -> Result<Self> {
        Self::decode_at(dec, 0)
    }

    fn decode_at(dec: &mut Decoder, depth: usize) -> Result<Self> {
        if depth > MAX_DEPTH {
            return Err(Error::DepthExceeded(MAX_DEPTH));
        }
        let value = match dec.peek_tag()? {
            Tag::Null => { dec.null()?; Value::Null }
            Tag::BoolTrue | Tag::BoolFalse => Value::Bool(dec.bool()?),
            Tag::Int => Value::Int(dec.int()?),
            Tag::UInt => Value::UInt(dec.uint()?),
            Tag::Float => Value::Float(dec.float()?),
            Tag::String => Value::String(dec.str()?.to_string()),
            Tag::Bytes | Tag::Binary => {
                let (subtype, bytes) = dec.binary()?;
                Value::Binary(Binary { subtype, bytes: bytes.to_vec() })
            }
            Tag::Array => {
                let mut iter = dec.array()?;
                let mut items = Vec::new();
                while let Some(mut item) = iter.next()? {
                    items.push(Self::decode_at(&mut item, depth + 1)?);
                }
                Value::Array(items)
            }
            Tag::Object => {
                let mut iter = dec.object()?;
                let mut map = Map::new();
                while let Some((key, mut item)) = iter.next()? {
                    map.insert(key, Self::decode_at(&mut item, depth + 1)?);
                }
                Value::Object(map)
            }
            tag => return Err(Error::InvalidTag(tag as u8)),
        };
        Ok(value)
    }

    /// Encodes this value as a standalone byte buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        self.encode(&mut enc)?;
        enc.into_bytes()
    }

    /// Decodes a standalone byte buffer holding exactly one value.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(bytes);
        let value = Self::decode(&mut dec)?;
        if dec.remaining() != 0 {
            return Err(Error::TooManyItems(crate::Scope::Root));
        }
        Ok(value)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self { Value::Bool(v) }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self { Value::Int(v) }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self { Value::Int(v as i64) }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self { Value::UInt(v) }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self { Value::UInt(v as u64) }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self { Value::Float(v) }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self { Value::String(v.to_string()) }
}

impl From<String> for Value {
    fn from(v: String) -> Self { Value::String(v) }
}

impl From<Binary> for Value {
    fn from(v: Binary) -> Self { Value::Binary(v) }
}

impl From<Map> for Value {
    fn from(v: Map) -> Self { Value::Object(v) }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self { Value::Array(v.into_iter().map(Into::into).collect()) }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self { v.map_or(Value::Null, Into::into) }
}
