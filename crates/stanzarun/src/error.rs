//! # Runtime Errors
//!
//! Every failure a caller of this crate can observe. Errors are `Clone` so a
//! [`Future`](crate::future::Future) can hand the same outcome to repeated waits.

use stanzapack::Error as PackError;
use stanzarpc::Failure;
use stanzarpc::Fault;
use stanzarpc::RpcError;
use stanzarpc::Status;

use crate::transport;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The connection to a remote engine failed.
    Transport(transport::Error),
    /// A frame or payload could not be encoded or decoded.
    Rpc(RpcError),
    /// A value could not be encoded or decoded.
    Pack(PackError),
    /// The remote engine refused to dispatch the call.
    Fault(Fault),
    /// The remote operation ran and reported a failure.
    Remote(Failure),
    /// A memory view was malformed or out of bounds.
    InvalidView(String),
    /// Nothing answering to this provider id lives at the address.
    NotAProvider { address: String, provider_id: u16 },
    /// A provider with this id is already registered on the engine.
    DuplicateProvider(u16),
    /// A provider configuration document was rejected.
    InvalidConfig(String),
    /// The response channel was dropped before a reply arrived.
    Closed,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Rpc(e) => write!(f, "RPC error: {}", e),
            Self::Pack(e) => write!(f, "Stanzapack error: {}", e),
            Self::Fault(fault) => write!(f, "Remote fault: {}", fault),
            Self::Remote(failure) => write!(f, "{}", failure.message),
            Self::InvalidView(msg) => write!(f, "Invalid memory view: {}", msg),
            Self::NotAProvider { address, provider_id } => {
                write!(f, "No session provider with id {} at {}", provider_id, address)
            }
            Self::DuplicateProvider(id) => write!(f, "Provider id {} is already registered", id),
            Self::InvalidConfig(msg) => write!(f, "Invalid provider configuration: {}", msg),
            Self::Closed => write!(f, "Response channel closed"),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// The status code a caller would see for this error.
    pub fn status(&self) -> Status {
        match self {
            Self::Remote(failure) => failure.status,
            Self::Transport(_) | Self::Fault(_) | Self::Closed => Status::Transport,
            Self::Rpc(_) | Self::Pack(_) | Self::InvalidView(_) | Self::InvalidConfig(_) => {
                Status::InvalidArgument
            }
            Self::NotAProvider { .. } | Self::DuplicateProvider(_) => Status::UnknownProvider,
        }
    }
}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<RpcError> for Error {
    fn from(e: RpcError) -> Self {
        Self::Rpc(e)
    }
}

impl From<PackError> for Error {
    fn from(e: PackError) -> Self {
        Self::Pack(e)
    }
}

impl From<Fault> for Error {
    fn from(e: Fault) -> Self {
        Self::Fault(e)
    }
}

impl From<Failure> for Error {
    fn from(e: Failure) -> Self {
        Self::Remote(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
