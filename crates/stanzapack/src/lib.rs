//! # Stanzapack
//!
//! The structured value tree exchanged between clients, providers and
//! interpreter backends, together with its bounded binary encoding.
//!
//! ## Philosophy
//!
//! - **One Value Shape**: Arguments, return values and remote memory views all travel
//!   as the same JSON-like [`Value`] tree. Binary payloads carry an optional subtype
//!   so that special blobs stay distinguishable from ordinary bytes.
//! - **Skippable**: every item is `[tag][length?][payload]`, so a reader can step over
//!   fields it does not understand.
//! - **Bounded**: Encoders track open scopes explicitly. Decoders are zero-copy, bounds-checked views.
//!
//! ## Format
//!
//! | kind       | layout                                  |
//! |------------|-----------------------------------------|
//! | scalar     | `tag:1 payload:0/8`                     |
//! | string     | `tag:1 len:4 utf8:len`                  |
//! | binary     | `tag:1 subtype:8 len:4 bytes:len`       |
//! | container  | `tag:1 len:4 body:len`                  |
//!
//! Lengths and numbers are little-endian on the wire.

pub mod json;
pub mod value;

#[cfg(test)]
mod tests;

pub use value::Binary;
pub use value::Map;
pub use value::Value;

/// Encoding and decoding failures.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    InvalidTag(u8),
    /// A string payload was not UTF-8.
    InvalidUtf8,
    /// `*_end` was called for a scope other than the innermost open one.
    ScopeMismatch { expected: Scope, actual: Scope },
    /// `*_end` was called with nothing open.
    ScopeUnderflow,
    /// `into_bytes` was called before every scope was closed.
    ScopeStillOpen,
    /// The input ended in the middle of an item.
    UnexpectedEnd,
    /// A payload does not fit a 32-bit length.
    BlobTooLarge(usize),
    /// A second item was written into a result or variant.
    TooManyItems(Scope),
    EmptyAdt(Scope),
    /// Something other than a keyed entry was written into an object.
    InvalidObjectEntry,
    /// A value tree nests deeper than the decoder allows.
    DepthExceeded(usize),
    /// Text could not be converted to or from JSON.
    Json(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidTag(b) => write!(f, "unexpected tag byte {:#04x}", b),
            Error::InvalidUtf8 => f.write_str("string payload is not UTF-8"),
            Error::ScopeMismatch { expected, actual } => {
                write!(f, "tried to close {:?} while {:?} is open", expected, actual)
            }
            Error::UnexpectedEnd => f.write_str("input ended inside an item"),
            Error::BlobTooLarge(len) => write!(f, "{} bytes exceed the 32-bit length limit", len),
            Error::TooManyItems(s) => write!(f, "{:?} holds exactly one item", s),
            Error::EmptyAdt(s) => write!(f, "{:?} closed before its item was written", s),
            Error::DepthExceeded(limit) => write!(f, "Value nesting exceeds the limit of {}", limit),
            Error::Json(msg) => write!(f, "JSON error: {}", msg),
            Error::ScopeUnderflow | Error::ScopeStillOpen | Error::InvalidObjectEntry => write!(f, "{:?}", self),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// The first byte of every encoded item.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    /// Ignored filler.
    Pad = 0x00,

    // Fixed-width scalars
    Null = 0x01,
    BoolTrue = 0x02,
    BoolFalse = 0x03,
    Int = 0x04,
    UInt = 0x05,
    Float = 0x06,

    // length-prefixed payloads
    String = 0x10,
    Bytes = 0x11,
    // subtype, then a length-prefixed payload
    Binary = 0x12,

    // containers
    Array = 0x20,
    Object = 0x21,

    // single-item wrappers
    ResultOk = 0x30,
    ResultErr = 0x31,
    Variant = 0x32,
}

impl Tag {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Tag::Pad),
            0x01 => Some(Tag::Null),
            0x02 => Some(Tag::BoolTrue),
            0x03 => Some(Tag::BoolFalse),
            0x04 => Some(Tag::Int),
            0x05 => Some(Tag::UInt),
            0x06 => Some(Tag::Float),
            0x10 => Some(Tag::String),
            0x11 => Some(Tag::Bytes),
            0x12 => Some(Tag::Binary),
            0x20 => Some(Tag::Array),
            0x21 => Some(Tag::Object),
            0x30 => Some(Tag::ResultOk),
            0x31 => Some(Tag::ResultErr),
            0x32 => Some(Tag::Variant),
            _ => None,
        }
    }
}

/// What an open encoder scope admits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Top level; any number of items.
    Root,
    /// Any number of items.
    Array,
    /// Only keyed entries (variants).
    Object,
    /// One item.
    Result,
    /// A name followed by one item.
    Variant,
}

/// One open container: where its body starts and how many items it holds.
struct Frame {
    start: usize,
    scope: Scope,
    count: usize,
}

/// Writes items into a growing buffer.
///
/// Containers are opened with `*_begin` and closed with `*_end`; their length
/// headers are filled in on close. Objects only take keyed entries, results
/// and variants take exactly one item, and the bytes are only handed out once
/// every container is closed.
pub struct Encoder {
    buf: Vec<u8>,
    /// Open scopes above the root.
    stack: Vec<Frame>,
    root_count: usize,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(256),
            stack: Vec::with_capacity(8),
            root_count: 0,
        }
    }

    /// The encoded bytes. Fails with `ScopeStillOpen` if a container is unclosed.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        if !self.stack.is_empty() {
            Err(Error::ScopeStillOpen)
        } else {
            Ok(self.buf)
        }
    }

    /// Number of items written at the root.
    pub fn root_items(&self) -> usize {
        self.root_count
    }

    fn current_scope(&self) -> (Scope, usize) {
        match self.stack.last() {
            Some(frame) => (frame.scope, frame.count),
            None => (Scope::Root, self.root_count),
        }
    }

    fn check_write(&self, tag: Tag) -> Result<()> {
        let (scope, count) = self.current_scope();
        match scope {
            Scope::Root | Scope::Array => Ok(()),
            Scope::Object if tag == Tag::Variant => Ok(()),
            Scope::Object => Err(Error::InvalidObjectEntry),
            Scope::Result | Scope::Variant if count >= 1 => Err(Error::TooManyItems(scope)),
            Scope::Result | Scope::Variant => Ok(()),
        }
    }

    fn count_item(&mut self) {
        match self.stack.last_mut() {
            Some(frame) => frame.count += 1,
            None => self.root_count += 1,
        }
    }

    fn put_tag(&mut self, tag: Tag) -> Result<()> {
        self.check_write(tag).map(|()| self.buf.push(tag as u8))
    }

    fn write_len(&mut self, len: usize) -> Result<()> {
        let len = u32::try_from(len).map_err(|_| Error::BlobTooLarge(len))?;
        self.buf.extend_from_slice(&len.to_le_bytes());
        Ok(())
    }

    fn open(&mut self, tag: Tag, scope: Scope) -> Result<()> {
        self.put_tag(tag)?;
        // patched in `close`
        self.buf.extend_from_slice(&0u32.to_le_bytes());
        let start = self.buf.len();
        self.stack.push(Frame { start, scope, count: 0 });
        Ok(())
    }

    fn close(&mut self, expected: Scope) -> Result<()> {
        let (scope, count) = match self.stack.last() {
            Some(frame) => (frame.scope, frame.count),
            None => return Err(Error::ScopeUnderflow),
        };
        if scope != expected {
            return Err(Error::ScopeMismatch { expected, actual: scope });
        }
        if count == 0 && matches!(scope, Scope::Result | Scope::Variant) {
            return Err(Error::EmptyAdt(scope));
        }

        let Some(Frame { start, .. }) = self.stack.pop() else {
            return Err(Error::ScopeUnderflow);
        };
        let written = self.buf.len() - start;
        let len = u32::try_from(written).map_err(|_| Error::BlobTooLarge(written))?;
        self.buf[start - 4..start].copy_from_slice(&len.to_le_bytes());

        self.count_item();
        Ok(())
    }

    /// Encodes `null`.
    pub fn null(&mut self) -> Result<()> {
        self.put_tag(Tag::Null)?;
        self.count_item();
        Ok(())
    }

    pub fn bool(&mut self, v: bool) -> Result<()> {
        self.put_tag(if v { Tag::BoolTrue } else { Tag::BoolFalse })?;
        self.count_item();
        Ok(())
    }

    pub fn int(&mut self, v: i64) -> Result<()> {
        self.fixed(Tag::Int, v.to_le_bytes())
    }

    pub fn uint(&mut self, v: u64) -> Result<()> {
        self.fixed(Tag::UInt, v.to_le_bytes())
    }

    pub fn float(&mut self, v: f64) -> Result<()> {
        self.fixed(Tag::Float, v.to_le_bytes())
    }

    fn fixed(&mut self, tag: Tag, payload: [u8; 8]) -> Result<()> {
        self.put_tag(tag)?;
        self.buf.extend_from_slice(&payload);
        self.count_item();
        Ok(())
    }

    fn blob(&mut self, tag: Tag, payload: &[u8]) -> Result<()> {
        self.put_tag(tag)?;
        self.write_len(payload.len())?;
        self.buf.extend_from_slice(payload);
        self.count_item();
        Ok(())
    }

    pub fn str(&mut self, v: &str) -> Result<()> {
        self.blob(Tag::String, v.as_bytes())
    }

    /// Plain bytes without a subtype.
    pub fn bytes(&mut self, v: &[u8]) -> Result<()> {
        self.blob(Tag::Bytes, v)
    }

    /// Encodes a binary blob, with its subtype when it has one.
    pub fn binary(&mut self, subtype: Option<u64>, v: &[u8]) -> Result<()> {
        let Some(subtype) = subtype else {
            return self.bytes(v);
        };
        self.put_tag(Tag::Binary)?;
        self.buf.extend_from_slice(&subtype.to_le_bytes());
        self.write_len(v.len())?;
        self.buf.extend(v);
        self.count_item();
        Ok(())
    }

    pub fn array_begin(&mut self) -> Result<()> { self.open(Tag::Array, Scope::Array) }
    pub fn array_end(&mut self) -> Result<()> { self.close(Scope::Array) }

    /// Every entry is written as `variant_begin(key)`, one value, `variant_end()`.
    pub fn object_begin(&mut self) -> Result<()> { self.open(Tag::Object, Scope::Object) }
    pub fn object_end(&mut self) -> Result<()> { self.close(Scope::Object) }

    /// Opens the success arm of a result; one item must follow.
    pub fn result_ok_begin(&mut self) -> Result<()> { self.open(Tag::ResultOk, Scope::Result) }
    pub fn result_ok_end(&mut self) -> Result<()> { self.close(Scope::Result) }

    /// Opens the failure arm of a result; one item must follow.
    pub fn result_err_begin(&mut self) -> Result<()> { self.open(Tag::ResultErr, Scope::Result) }
    pub fn result_err_end(&mut self) -> Result<()> { self.close(Scope::Result) }

    /// Opens a named item. The name is written now; one payload item must follow.
    pub fn variant_begin(&mut self, name: &str) -> Result<()> {
        self.open(Tag::Variant, Scope::Variant)?;
        self.str(name)?;
        // The name is metadata; the payload is still owed.
        if let Some(frame) = self.stack.last_mut() {
            frame.count = 0;
        }
        Ok(())
    }
    pub fn variant_end(&mut self) -> Result<()> { self.close(Scope::Variant) }
}

/// Reads items out of a borrowed buffer without copying.
///
/// Each read moves past the item. Entering a container yields a decoder
/// that can only see the container's body.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Unread bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    /// The tag of the next item, without moving past it.
    pub fn peek_tag(&self) -> Result<Tag> {
        let Some(&b) = self.buf.first() else {
            return Err(Error::UnexpectedEnd);
        };
        Tag::from_u8(b).ok_or(Error::InvalidTag(b))
    }

    fn advance(&mut self, n: usize) -> Result<()> {
        self.take(n).map(drop)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let head = self.buf.get(..n).ok_or(Error::UnexpectedEnd)?;
        self.buf = &self.buf[n..];
        Ok(head)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn read_len(&mut self) -> Result<usize> {
        Ok(u32::from_le_bytes(self.read_array()?) as usize)
    }

    fn expect_tag(&mut self, expected: Tag) -> Result<()> {
        match self.peek_tag()? {
            tag if tag == expected => self.advance(1),
            tag => Err(Error::InvalidTag(tag as u8)),
        }
    }

    /// Moves past the next item, containers included.
    pub fn skip(&mut self) -> Result<()> {
        let tag = self.peek_tag()?;
        self.advance(1)?;

        let len = match tag {
            Tag::Pad | Tag::Null | Tag::BoolTrue | Tag::BoolFalse => 0,
            Tag::Int | Tag::UInt | Tag::Float => 8,
            Tag::Binary => {
                self.advance(8)?;
                self.read_len()?
            }
            _ => self.read_len()?,
        };
        self.advance(len)
    }

    pub fn null(&mut self) -> Result<()> { self.expect_tag(Tag::Null) }

    pub fn bool(&mut self) -> Result<bool> {
        let value = match self.peek_tag()? {
            Tag::BoolTrue => true,
            Tag::BoolFalse => false,
            tag => return Err(Error::InvalidTag(tag as u8)),
        };
        self.advance(1)?;
        Ok(value)
    }

    pub fn int(&mut self) -> Result<i64> { self.expect_tag(Tag::Int)?; Ok(i64::from_le_bytes(self.read_array()?)) }
    pub fn uint(&mut self) -> Result<u64> { self.expect_tag(Tag::UInt)?; Ok(u64::from_le_bytes(self.read_array()?)) }
    pub fn float(&mut self) -> Result<f64> { self.expect_tag(Tag::Float)?; Ok(f64::from_le_bytes(self.read_array()?)) }

    pub fn str(&mut self) -> Result<&'a str> {
        let raw = self.blob(Tag::String)?;
        std::str::from_utf8(raw).map_err(|_| Error::InvalidUtf8)
    }

    /// Plain bytes; see [`Decoder::binary`] for subtyped blobs.
    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        self.blob(Tag::Bytes)
    }

    fn blob(&mut self, tag: Tag) -> Result<&'a [u8]> {
        self.expect_tag(tag)?;
        let len = self.read_len()?;
        self.take(len)
    }

    /// Decodes a binary blob, accepting both plain bytes and subtyped binary.
    pub fn binary(&mut self) -> Result<(Option<u64>, &'a [u8])> {
        match self.peek_tag()? {
            Tag::Bytes => Ok((None, self.bytes()?)),
            Tag::Binary => {
                self.advance(1)?;
                let subtype = u64::from_le_bytes(self.read_array()?);
                let len = self.read_len()?;
                Ok((Some(subtype), self.take(len)?))
            }
            tag => Err(Error::InvalidTag(tag as u8)),
        }
    }

    fn enter(&mut self, tag: Tag) -> Result<Decoder<'a>> {
        self.blob(tag).map(Decoder::new)
    }

    /// Enters an array.
    pub fn array(&mut self) -> Result<ArrayIter<'a>> {
        Ok(ArrayIter { dec: self.enter(Tag::Array)? })
    }

    /// Enters an object.
    pub fn object(&mut self) -> Result<ObjectIter<'a>> {
        Ok(ObjectIter { dec: self.enter(Tag::Object)? })
    }

    /// Enters a result, handing back a decoder for whichever arm is present.
    pub fn result(&mut self) -> Result<std::result::Result<Decoder<'a>, Decoder<'a>>> {
        let tag = self.peek_tag()?;
        match tag {
            Tag::ResultOk => self.enter(tag).map(Ok),
            Tag::ResultErr => self.enter(tag).map(Err),
            _ => Err(Error::InvalidTag(tag as u8)),
        }
    }

    /// Enters a named item: its name and a decoder positioned at its payload.
    pub fn variant(&mut self) -> Result<(&'a str, Decoder<'a>)> {
        let mut body = self.enter(Tag::Variant)?;
        Ok((body.str()?, body))
    }
}

/// Walks the items of an array.
#[derive(Debug)]
pub struct ArrayIter<'a> {
    dec: Decoder<'a>,
}

impl<'a> ArrayIter<'a> {
    /// A decoder covering exactly the next item.
    pub fn next(&mut self) -> Result<Option<Decoder<'a>>> {
        if self.dec.buf.is_empty() {
            return Ok(None);
        }
        let before = self.dec.buf;
        self.dec.skip()?;
        let used = before.len() - self.dec.buf.len();
        Ok(Some(Decoder::new(&before[..used])))
    }
}

/// Walks the entries of an object.
#[derive(Debug)]
pub struct ObjectIter<'a> {
    dec: Decoder<'a>,
}

impl<'a> ObjectIter<'a> {
    /// The next key and a decoder for its value, `Ok(None)` at the end.
    pub fn next(&mut self) -> Result<Option<(&'a str, Decoder<'a>)>> {
        if self.dec.buf.is_empty() {
            return Ok(None);
        }
        self.dec.variant().map(Some)
    }
}
