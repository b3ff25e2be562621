//! # Errors
//!
//! Operational failures of the protocol layer, and the reasons a remote
//! engine gives when it cannot even run a handler.

use stanzapack::Error as PackError;

/// Local failures to build or read a frame or payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcError {
    Serialization(PackError),
    /// A payload field had the wrong kind of value.
    TypeMismatch { field: String, expected: &'static str, found: &'static str },
    /// An object was missing a required field.
    MissingField(String),
    /// A frame kind, fault or enum variant this version does not know.
    UnknownVariant(String),
    /// A frame is missing a header or carries one out of range.
    ProtocolViolation(String),
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialization(e) => write!(f, "Serialization error: {}", e),
            Self::TypeMismatch { field, expected, found } => {
                write!(f, "Field '{}' has type {}, expected {}", field, found, expected)
            }
            Self::MissingField(field) => write!(f, "Missing field '{}'", field),
            Self::UnknownVariant(name) => write!(f, "Unknown variant: {}", name),
            Self::ProtocolViolation(msg) => write!(f, "Protocol violation: {}", msg),
        }
    }
}

impl std::error::Error for RpcError {}

impl From<PackError> for RpcError {
    fn from(e: PackError) -> Self { Self::Serialization(e) }
}

pub type Result<T> = std::result::Result<T, RpcError>;

/// Why a remote engine could not dispatch a call. Sent as the failure arm
/// of a reply.
///
/// Application failures never appear here: they travel inside a successful
/// reply as a failed `Outcome`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// No provider with this id is registered for the operation.
    UnknownProvider(u16),
    /// The operation name is not registered on the remote engine.
    UnknownOperation(String),
    /// The bulk region handle does not name a live region.
    InvalidRegion(u64),
    /// The bulk region was not exposed with the access mode required.
    AccessDenied(u64),
    /// A bulk transfer fell outside the bounds of its region.
    OutOfBounds { offset: u64, length: u64, size: u64 },
    /// The handler task ended without producing a reply.
    HandlerFailed(String),
    /// The RPC frame was malformed.
    ProtocolViolation(String),
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownProvider(id) => write!(f, "No provider with id {}", id),
            Self::UnknownOperation(op) => write!(f, "Unknown operation '{}'", op),
            Self::InvalidRegion(id) => write!(f, "No bulk region with handle {}", id),
            Self::AccessDenied(id) => write!(f, "Access mode does not permit this transfer on region {}", id),
            Self::OutOfBounds { offset, length, size } => {
                write!(f, "Transfer of {} bytes at offset {} exceeds region size {}", length, offset, size)
            }
            Self::HandlerFailed(msg) => write!(f, "Handler failed: {}", msg),
            Self::ProtocolViolation(msg) => write!(f, "Protocol violation: {}", msg),
        }
    }
}

impl std::error::Error for Fault {}

impl Fault {
    pub(crate) fn as_tag(&self) -> &'static str {
        match self {
            Self::UnknownProvider(_) => "UnknownProvider",
            Self::UnknownOperation(_) => "UnknownOperation",
            Self::InvalidRegion(_) => "InvalidRegion",
            Self::AccessDenied(_) => "AccessDenied",
            Self::OutOfBounds { .. } => "OutOfBounds",
            Self::HandlerFailed(_) => "HandlerFailed",
            Self::ProtocolViolation(_) => "ProtocolViolation",
        }
    }
}
