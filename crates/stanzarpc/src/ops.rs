//! # Session Operations
//!
//! The six remote operations a session provider answers, and the typed
//! bodies that travel with them. Every response body is an `Outcome<T>` of
//! the listed response type.
//!
//! | Operation                 | Request           | Response        |
//! |---------------------------|-------------------|-----------------|
//! | `stanza_get_session_info` | `GetSessionInfo`  | `SessionInfo`   |
//! | `stanza_create_session`   | `CreateSession`   | `SessionId`     |
//! | `stanza_delete_session`   | `DeleteSession`   | `bool`          |
//! | `stanza_execute`          | `Execute`         | `Value`         |
//! | `stanza_load`             | `Load`            | `Value`         |
//! | `stanza_call`             | `Call`            | `Value`         |

use stanzapack::Map;
use stanzapack::Value;

use crate::error::Result;
use crate::payload::Fields;
use crate::payload::Payload;
use crate::payload::mismatch;

pub const GET_SESSION_INFO: &str = "stanza_get_session_info";
pub const CREATE_SESSION: &str = "stanza_create_session";
pub const DELETE_SESSION: &str = "stanza_delete_session";
pub const EXECUTE: &str = "stanza_execute";
pub const LOAD: &str = "stanza_load";
pub const CALL: &str = "stanza_call";

/// All session operation names, in registration order.
pub const ALL: [&str; 6] = [GET_SESSION_INFO, CREATE_SESSION, DELETE_SESSION, EXECUTE, LOAD, CALL];

/// Identifies a session inside one provider. Ids are reused after deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

impl From<SessionId> for u64 {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl Payload for SessionId {
    fn to_value(&self) -> Value {
        Value::UInt(self.0)
    }

    fn from_value(value: Value) -> Result<Self> {
        value.as_u64().map(SessionId).ok_or_else(|| mismatch("id", "uint", &value))
    }
}

/// Which session a code operation runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionTarget {
    /// An existing session.
    Id(SessionId),
    /// A throwaway session created for this one operation.
    Anonymous,
}

impl SessionTarget {
    /// Wire sentinel for [`SessionTarget::Anonymous`], sent as a signed int.
    pub const ANONYMOUS: i64 = -2;

    /// Ids travel as unsigned ints and the sentinel as a signed one, so no
    /// id can be mistaken for it.
    pub fn to_wire(self) -> Value {
        match self {
            SessionTarget::Id(id) => Value::UInt(id.0),
            SessionTarget::Anonymous => Value::Int(Self::ANONYMOUS),
        }
    }

    pub fn from_wire(raw: &Value) -> Option<Self> {
        match *raw {
            Value::Int(Self::ANONYMOUS) => Some(SessionTarget::Anonymous),
            Value::UInt(id) => Some(SessionTarget::Id(SessionId(id))),
            Value::Int(id) => u64::try_from(id).ok().map(|id| SessionTarget::Id(SessionId(id))),
            _ => None,
        }
    }
}

impl std::fmt::Display for SessionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionTarget::Id(id) => id.fmt(f),
            SessionTarget::Anonymous => f.write_str("anonymous"),
        }
    }
}

impl From<SessionId> for SessionTarget {
    fn from(id: SessionId) -> Self {
        SessionTarget::Id(id)
    }
}

fn take_target(fields: &mut Fields) -> Result<SessionTarget> {
    let raw = fields.take("target")?;
    SessionTarget::from_wire(&raw).ok_or_else(|| mismatch("target", "session id", &raw))
}

/// Looks a session up by name.
#[derive(Debug, Clone, PartialEq)]
pub struct GetSessionInfo {
    pub name: String,
}

/// What a provider knows about a named session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub language: String,
}

/// Creates a named session.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateSession {
    pub name: String,
    pub language: String,
}

/// Deletes a session by id.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteSession {
    pub id: SessionId,
}

/// Runs source code.
#[derive(Debug, Clone, PartialEq)]
pub struct Execute {
    pub target: SessionTarget,
    /// Only meaningful for anonymous targets.
    pub language: Option<String>,
    pub code: String,
    pub args: Vec<Value>,
}

/// Runs a source file that lives on the provider's host.
#[derive(Debug, Clone, PartialEq)]
pub struct Load {
    pub target: SessionTarget,
    pub language: Option<String>,
    pub path: String,
    pub args: Vec<Value>,
}

/// Invokes a named function, optionally as a method of `object`.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub target: SessionTarget,
    pub language: Option<String>,
    pub function: String,
    pub object: String,
    pub args: Vec<Value>,
}

impl Payload for GetSessionInfo {
    fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("name", self.name.as_str());
        Value::Object(map)
    }

    fn from_value(value: Value) -> Result<Self> {
        let mut fields = Fields::new(value)?;
        Ok(Self { name: fields.string("name")? })
    }
}

impl Payload for SessionInfo {
    fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("id", self.id.0);
        map.insert("language", self.language.as_str());
        Value::Object(map)
    }

    fn from_value(value: Value) -> Result<Self> {
        let mut fields = Fields::new(value)?;
        Ok(Self { id: SessionId(fields.uint("id")?), language: fields.string("language")? })
    }
}

impl Payload for CreateSession {
    fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("name", self.name.as_str());
        map.insert("language", self.language.as_str());
        Value::Object(map)
    }

    fn from_value(value: Value) -> Result<Self> {
        let mut fields = Fields::new(value)?;
        Ok(Self { name: fields.string("name")?, language: fields.string("language")? })
    }
}

impl Payload for DeleteSession {
    fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("id", self.id.0);
        Value::Object(map)
    }

    fn from_value(value: Value) -> Result<Self> {
        let mut fields = Fields::new(value)?;
        Ok(Self { id: SessionId(fields.uint("id")?) })
    }
}

impl Payload for Execute {
    fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("target", self.target.to_wire());
        map.insert("language", self.language.clone());
        map.insert("code", self.code.as_str());
        map.insert("args", Value::Array(self.args.clone()));
        Value::Object(map)
    }

    fn from_value(value: Value) -> Result<Self> {
        let mut fields = Fields::new(value)?;
        Ok(Self {
            target: take_target(&mut fields)?,
            language: fields.opt_string("language")?,
            code: fields.string("code")?,
            args: fields.array("args")?,
        })
    }
}

impl Payload for Load {
    fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("target", self.target.to_wire());
        map.insert("language", self.language.clone());
        map.insert("path", self.path.as_str());
        map.insert("args", Value::Array(self.args.clone()));
        Value::Object(map)
    }

    fn from_value(value: Value) -> Result<Self> {
        let mut fields = Fields::new(value)?;
        Ok(Self {
            target: take_target(&mut fields)?,
            language: fields.opt_string("language")?,
            path: fields.string("path")?,
            args: fields.array("args")?,
        })
    }
}

impl Payload for Call {
    fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("target", self.target.to_wire());
        map.insert("language", self.language.clone());
        map.insert("function", self.function.as_str());
        map.insert("object", self.object.as_str());
        map.insert("args", Value::Array(self.args.clone()));
        Value::Object(map)
    }

    fn from_value(value: Value) -> Result<Self> {
        let mut fields = Fields::new(value)?;
        Ok(Self {
            target: take_target(&mut fields)?,
            language: fields.opt_string("language")?,
            function: fields.string("function")?,
            object: fields.opt_string("object")?.unwrap_or_default(),
            args: fields.array("args")?,
        })
    }
}
