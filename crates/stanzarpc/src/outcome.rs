//! # Outcomes
//!
//! `Outcome<T>` is the success-value-or-error-message type returned by
//! interpreter backends and carried in every reply body. A failure carries a
//! [`Status`] code next to its human-readable message so callers can tell
//! protocol failures (unknown session, duplicate name) from backend ones.
//!
//! ## Wire Format
//! - Success: `ResultOk(<value>)`
//! - Failure: `ResultErr({ "status": int, "message": string })`

use stanzapack::Decoder;
use stanzapack::Encoder;
use stanzapack::Value;

use crate::error::Result;
use crate::error::RpcError;
use crate::payload::Payload;

/// Status codes surfaced to callers.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success = 0,
    /// Error when allocating something.
    Allocation = -1,
    /// Invalid argument to some call.
    InvalidArgument = -2,
    /// Error from the transport or engine.
    Transport = -3,
    /// Unsupported language.
    Language = -4,
    /// Code interpretation failed.
    Code = -5,
    /// Unknown provider.
    UnknownProvider = -6,
    /// A session with this name already exists.
    SessionExists = -7,
    /// No session exists with this name or id.
    NoSession = -8,
    /// Could not initialize a session.
    SessionInit = -9,
    /// A concurrency primitive failed.
    Concurrency = -10,
}

impl Status {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Status::Success),
            -1 => Some(Status::Allocation),
            -2 => Some(Status::InvalidArgument),
            -3 => Some(Status::Transport),
            -4 => Some(Status::Language),
            -5 => Some(Status::Code),
            -6 => Some(Status::UnknownProvider),
            -7 => Some(Status::SessionExists),
            -8 => Some(Status::NoSession),
            -9 => Some(Status::SessionInit),
            -10 => Some(Status::Concurrency),
            _ => None,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Status::Success => "success",
            Status::Allocation => "allocation failure",
            Status::InvalidArgument => "invalid argument",
            Status::Transport => "transport failure",
            Status::Language => "unsupported language",
            Status::Code => "code interpretation failure",
            Status::UnknownProvider => "unknown provider",
            Status::SessionExists => "session already exists",
            Status::NoSession => "no such session",
            Status::SessionInit => "session initialization failure",
            Status::Concurrency => "concurrency primitive failure",
        };
        f.write_str(text)
    }
}

/// The error half of an [`Outcome`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub status: Status,
    pub message: String,
}

impl Failure {
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    /// A failure raised by interpreted code.
    pub fn code(message: impl Into<String>) -> Self {
        Self::new(Status::Code, message)
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Failure {}

/// Either a success value of type `T` or a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Success(T),
    Failure(Failure),
}

impl<T> Outcome<T> {
    pub fn failure(status: Status, message: impl Into<String>) -> Self {
        Outcome::Failure(Failure::new(status, message))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Borrows the success value; fails when this outcome is a failure.
    pub fn value(&self) -> std::result::Result<&T, &Failure> {
        match self {
            Outcome::Success(v) => Ok(v),
            Outcome::Failure(f) => Err(f),
        }
    }

    /// The failure message, empty on success.
    pub fn error(&self) -> &str {
        match self {
            Outcome::Success(_) => "",
            Outcome::Failure(f) => &f.message,
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Outcome::Success(_) => Status::Success,
            Outcome::Failure(f) => f.status,
        }
    }

    pub fn into_result(self) -> std::result::Result<T, Failure> {
        self.into()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Success(v) => Outcome::Success(f(v)),
            Outcome::Failure(e) => Outcome::Failure(e),
        }
    }
}

impl<T> From<std::result::Result<T, Failure>> for Outcome<T> {
    fn from(r: std::result::Result<T, Failure>) -> Self {
        match r {
            Ok(v) => Outcome::Success(v),
            Err(f) => Outcome::Failure(f),
        }
    }
}

impl<T> From<Outcome<T>> for std::result::Result<T, Failure> {
    fn from(o: Outcome<T>) -> Self {
        match o {
            Outcome::Success(v) => Ok(v),
            Outcome::Failure(f) => Err(f),
        }
    }
}

impl<T: Payload> Outcome<T> {
    /// Encode this outcome into the encoder.
    pub fn encode(&self, enc: &mut Encoder) -> Result<()> {
        match self {
            Outcome::Success(v) => {
                enc.result_ok_begin()?;
                v.to_value().encode(enc)?;
                enc.result_ok_end()?;
            }
            Outcome::Failure(f) => {
                enc.result_err_begin()?;
                enc.object_begin()?;
                enc.variant_begin("status")?;
                enc.int(f.status.code() as i64)?;
                enc.variant_end()?;
                enc.variant_begin("message")?;
                enc.str(&f.message)?;
                enc.variant_end()?;
                enc.object_end()?;
                enc.result_err_end()?;
            }
        }
        Ok(())
    }

    /// Decode an outcome from the decoder.
    pub fn decode(dec: &mut Decoder) -> Result<Self> {
        match dec.result()? {
            Ok(mut body) => Ok(Outcome::Success(T::from_value(Value::decode(&mut body)?)?)),
            Err(mut body) => {
                let mut map = body.object()?;
                let mut status = None;
                let mut message = None;
                while let Some((key, mut val)) = map.next()? {
                    match key {
                        "status" => status = Some(val.int()?),
                        "message" => message = Some(val.str()?.to_string()),
                        _ => val.skip()?,
                    }
                }
                let code = status.ok_or(RpcError::MissingField("status".into()))?;
                let status = Status::from_code(code)
                    .ok_or_else(|| RpcError::UnknownVariant(format!("Status code {}", code)))?;
                let message = message.ok_or(RpcError::MissingField("message".into()))?;
                Ok(Outcome::Failure(Failure { status, message }))
            }
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        self.encode(&mut enc)?;
        Ok(enc.into_bytes()?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(bytes);
        Self::decode(&mut dec)
    }
}
